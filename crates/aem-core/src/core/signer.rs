// crates/aem-core/src/core/signer.rs
// ============================================================================
// Module: AEM Report Signer
// Description: HMAC-SHA512 signatures for aggregation report entries.
// Purpose: Authenticate conversion reports with the per-link shared secret.
// Dependencies: base64, sha2, thiserror, crate::core::identifiers
// ============================================================================

//! ## Overview
//! Aggregation entries are signed with HMAC-SHA512 keyed by the shared secret
//! delivered in the attribution deep link. The signed message is the pipe
//! joined tuple `campaign_id|conversion_value|delay_flow|"server"`, and the
//! signature travels as URL-safe base64 without padding.
//!
//! Security posture: the shared secret arrives base64 encoded in an untrusted
//! deep link; decode failures surface as typed errors, never panics.

// ============================================================================
// SECTION: Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::Digest;
use sha2::Sha512;
use thiserror::Error;

use crate::core::identifiers::CampaignId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// SHA-512 internal block size in bytes, the HMAC key padding width.
const SHA512_BLOCK_SIZE: usize = 128;
/// Fixed delay-flow label for server-mediated reporting.
const DELAY_FLOW_SERVER: &str = "server";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Error decoding URL-safe base64 input.
#[derive(Debug, Error)]
#[error("invalid url-safe base64: {0}")]
pub struct Base64DecodeError(#[from] base64::DecodeError);

/// Errors producing a report signature.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The shared secret is present but empty.
    #[error("shared secret is empty")]
    EmptySecret,
    /// The shared secret is not valid URL-safe base64.
    #[error("shared secret failed to decode: {0}")]
    InvalidSecret(#[from] Base64DecodeError),
}

// ============================================================================
// SECTION: Base64 Helpers
// ============================================================================

/// Decodes URL-safe base64 without padding.
///
/// # Errors
///
/// Returns [`Base64DecodeError`] when `input` is not valid URL-safe base64.
pub fn decode_base64_url(input: &str) -> Result<Vec<u8>, Base64DecodeError> {
    Ok(URL_SAFE_NO_PAD.decode(input.trim_end_matches('='))?)
}

// ============================================================================
// SECTION: HMAC-SHA512
// ============================================================================

/// Computes HMAC-SHA512 over `message` with `key`.
///
/// Keys longer than the SHA-512 block are hashed first per RFC 2104.
#[must_use]
pub fn hmac_sha512(key: &[u8], message: &[u8]) -> [u8; 64] {
    let mut block_key = [0u8; SHA512_BLOCK_SIZE];
    if key.len() > SHA512_BLOCK_SIZE {
        let digest = Sha512::digest(key);
        block_key[..digest.len()].copy_from_slice(&digest);
    } else {
        block_key[..key.len()].copy_from_slice(key);
    }

    let mut inner_pad = [0u8; SHA512_BLOCK_SIZE];
    let mut outer_pad = [0u8; SHA512_BLOCK_SIZE];
    for (index, byte) in block_key.iter().enumerate() {
        inner_pad[index] = byte ^ 0x36;
        outer_pad[index] = byte ^ 0x5c;
    }

    let mut inner = Sha512::new();
    inner.update(inner_pad);
    inner.update(message);
    let inner_digest = inner.finalize();

    let mut outer = Sha512::new();
    outer.update(outer_pad);
    outer.update(inner_digest);
    outer.finalize().into()
}

// ============================================================================
// SECTION: Report Signing
// ============================================================================

/// Signs one aggregation entry for the given campaign and conversion value.
///
/// `delay` is the consumption-hour delay reported alongside the entry; it is
/// part of the signed message so the server can verify the reported timing.
///
/// # Errors
///
/// Returns [`SigningError`] when the shared secret is empty or does not
/// decode as URL-safe base64.
pub fn sign_report(
    secret: &str,
    campaign_id: &CampaignId,
    conversion_value: i32,
    delay: i64,
) -> Result<String, SigningError> {
    if secret.is_empty() {
        return Err(SigningError::EmptySecret);
    }
    let key = decode_base64_url(secret)?;
    let message = format!(
        "{}|{conversion_value}|{delay}|{DELAY_FLOW_SERVER}",
        campaign_id.as_str()
    );
    let mac = hmac_sha512(&key, message.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(mac))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        reason = "test assertions may panic on failure by design"
    )]

    use super::*;

    /// RFC 4231 test case 1 for HMAC-SHA512.
    #[test]
    fn hmac_sha512_matches_rfc_4231_case_one() {
        let key = [0x0bu8; 20];
        let mac = hmac_sha512(&key, b"Hi There");
        let expected = "87aa7cdea5ef619d4ff0b4241a1d6cb02379f4e2ce4ec2787ad0b30545e17cde\
                        daa833b7d6b8a702038b274eaea3f4e4be9d914eeb61f1702e696c203a126854";
        assert_eq!(hex_string(&mac), expected);
    }

    /// RFC 4231 test case 2 exercises a short textual key.
    #[test]
    fn hmac_sha512_matches_rfc_4231_case_two() {
        let mac = hmac_sha512(b"Jefe", b"what do ya want for nothing?");
        let expected = "164b7a7bfcf819e2e395fbe73b56e0a387bd64222e831fd610270cd7ea250554\
                        9758bf75c05a994a6d034f65f8f0e6fdcaeab1a34d4a6b4b636e070a38bce737";
        assert_eq!(hex_string(&mac), expected);
    }

    /// Keys above the block size must be hashed before padding.
    #[test]
    fn hmac_sha512_hashes_oversized_keys() {
        let key = [0xaau8; 131];
        let mac = hmac_sha512(&key, b"Test Using Larger Than Block-Size Key - Hash Key First");
        let expected = "80b24263c7c1a3ebb71493c1dd7be8b49b46d1f41b4aeec1121b013783f8f352\
                        6b56d037e05f2598bd0fd2215d6a1e5295e64f73f63f0aec8b915a985d786598";
        assert_eq!(hex_string(&mac), expected);
    }

    /// Signatures are deterministic and padding-free URL-safe base64.
    #[test]
    fn sign_report_is_deterministic() {
        let campaign = CampaignId::new("84325");
        let secret = URL_SAFE_NO_PAD.encode(b"top-secret-key");
        let first = sign_report(&secret, &campaign, 6, 24).unwrap();
        let second = sign_report(&secret, &campaign, 6, 24).unwrap();
        assert_eq!(first, second);
        assert!(!first.contains('='));
        assert!(!first.contains('+'));
        assert!(!first.contains('/'));
    }

    /// A different conversion value must change the signature.
    #[test]
    fn sign_report_binds_conversion_value() {
        let campaign = CampaignId::new("84325");
        let secret = URL_SAFE_NO_PAD.encode(b"top-secret-key");
        let low = sign_report(&secret, &campaign, 1, 24).unwrap();
        let high = sign_report(&secret, &campaign, 2, 24).unwrap();
        assert_ne!(low, high);
    }

    /// Empty and undecodable secrets surface typed errors.
    #[test]
    fn sign_report_rejects_bad_secrets() {
        let campaign = CampaignId::new("84325");
        assert!(matches!(
            sign_report("", &campaign, 0, 24),
            Err(SigningError::EmptySecret)
        ));
        assert!(matches!(
            sign_report("!!not-base64!!", &campaign, 0, 24),
            Err(SigningError::InvalidSecret(_))
        ));
    }

    /// Decoding tolerates trailing padding characters.
    #[test]
    fn decode_base64_url_accepts_trailing_padding() {
        let padded = "aGVsbG8=";
        assert_eq!(decode_base64_url(padded).unwrap(), b"hello");
    }

    /// Renders a digest as lowercase hex for fixture comparison.
    fn hex_string(bytes: &[u8]) -> String {
        bytes.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}
