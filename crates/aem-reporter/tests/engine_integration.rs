// crates/aem-reporter/tests/engine_integration.rs
// ============================================================================
// Module: Attribution Engine Integration Tests
// Description: End-to-end engine tests over deterministic collaborator fakes.
// Purpose: Verify the lifecycle from deep link to confirmed aggregation send.
// ============================================================================

//! Integration tests for the attribution engine.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::sync::mpsc;
use std::time::Duration;

use aem_core::ConfigMode;
use aem_core::NetworkError;
use aem_core::SECONDS_PER_DAY;
use aem_reporter::AemEngine;
use aem_reporter::EnginePolicy;
use aem_store::FileReportStore;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

use common::FakeNetworker;
use common::FakePlatform;
use common::FixedClock;
use common::NOW;
use common::config_payload;
use common::default_config_entry;
use common::gated_config_entry;
use common::wait_for;

/// Engine plus the fakes it was built over.
struct Harness {
    engine: AemEngine,
    networker: FakeNetworker,
    platform: FakePlatform,
    clock: FixedClock,
    dir: TempDir,
}

fn harness(policy: EnginePolicy) -> Harness {
    let dir = TempDir::new().expect("tempdir");
    let networker = FakeNetworker::new();
    let platform = FakePlatform::new();
    let clock = FixedClock::at(NOW);
    let store = FileReportStore::open(dir.path().join("aem")).expect("store");
    let engine = AemEngine::new(
        "123",
        store,
        networker.clone(),
        platform.clone(),
        clock.clone(),
        policy,
    );
    Harness {
        engine,
        networker,
        platform,
        clock,
        dir,
    }
}

fn harness_with_default_config() -> Harness {
    let h = harness(EnginePolicy::default());
    h.networker
        .stage_config_response(Ok(config_payload(vec![default_config_entry(10_000)])));
    h.engine.enable();
    assert!(wait_for(|| {
        h.engine
            .snapshot()
            .is_some_and(|snapshot| !snapshot.configuration_counts.is_empty())
    }));
    h
}

fn parameters(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("object parameters")
}

// ----------------------------------------------------------------------------
// Deep links
// ----------------------------------------------------------------------------

#[test]
fn deep_link_produces_fresh_invocation() {
    let h = harness_with_default_config();
    h.engine.handle_url("myapp://attr?campaign_id=42&acs_token=abc&business_id=biz1");

    assert!(wait_for(|| {
        h.engine.snapshot().is_some_and(|snapshot| snapshot.invocations.len() == 1)
    }));
    let snapshot = h.engine.snapshot().expect("snapshot");
    let invocation = &snapshot.invocations[0];
    assert_eq!(invocation.campaign_id.as_str(), "42");
    assert_eq!(invocation.acs_token, "abc");
    assert_eq!(
        invocation.business_id.as_ref().map(aem_core::BusinessId::as_str),
        Some("biz1")
    );
    assert_eq!(invocation.conversion_value, 0);
    assert_eq!(invocation.priority, -1);
    assert!(invocation.is_aggregated);
}

#[test]
fn malformed_links_and_disabled_engines_are_ignored() {
    let h = harness(EnginePolicy::default());
    // Not enabled yet: both entry points are no-ops.
    h.engine.handle_url("myapp://attr?campaign_id=42&acs_token=abc");
    h.engine.record_event("fb_mobile_purchase", None, None, None);

    h.engine.enable();
    h.engine.handle_url("myapp://attr?acs_token=only-token");
    let snapshot = h.engine.snapshot().expect("snapshot");
    assert!(snapshot.invocations.is_empty());
}

// ----------------------------------------------------------------------------
// Event recording
// ----------------------------------------------------------------------------

#[test]
fn recorded_event_updates_conversion_value() {
    let h = harness_with_default_config();
    h.engine.handle_url("myapp://attr?campaign_id=42&acs_token=abc");

    h.engine.record_event("fb_mobile_purchase", Some("USD".to_string()), Some(12.5), None);
    assert!(wait_for(|| {
        h.engine.snapshot().is_some_and(|snapshot| {
            snapshot.invocations.first().is_some_and(|invocation| {
                invocation.conversion_value == 2 && invocation.priority == 5
            })
        })
    }));
    let invocation = h.engine.snapshot().expect("snapshot").invocations[0].clone();
    assert!(!invocation.is_aggregated);
    assert!(invocation.recorded_events.contains("fb_mobile_purchase"));
}

#[test]
fn unknown_events_do_not_attribute() {
    let h = harness_with_default_config();
    h.engine.handle_url("myapp://attr?campaign_id=42&acs_token=abc");
    h.engine.record_event("fb_custom_event", None, None, None);

    // The purchase still attributes afterwards, proving the queue drained.
    h.engine.record_event("fb_mobile_purchase", None, None, None);
    assert!(wait_for(|| {
        h.engine.snapshot().is_some_and(|snapshot| {
            snapshot.invocations.first().is_some_and(|invocation| {
                invocation.conversion_value == 2
            })
        })
    }));
    let invocation = h.engine.snapshot().expect("snapshot").invocations[0].clone();
    assert!(!invocation.recorded_events.contains("fb_custom_event"));
}

#[test]
fn config_level_rule_gates_attribution() {
    let h = harness(EnginePolicy::default());
    h.networker
        .stage_config_response(Ok(config_payload(vec![gated_config_entry(10_000)])));
    h.engine.enable();
    assert!(wait_for(|| {
        h.engine
            .snapshot()
            .is_some_and(|snapshot| !snapshot.configuration_counts.is_empty())
    }));
    h.engine.handle_url("myapp://attr?campaign_id=42&acs_token=abc");

    // Parameters outside the is_any set never attribute.
    h.engine.record_event(
        "fb_mobile_purchase",
        None,
        None,
        Some(parameters(json!({"value": "z"}))),
    );
    h.engine.record_event(
        "fb_mobile_purchase",
        None,
        None,
        Some(parameters(json!({"value": "b"}))),
    );
    assert!(wait_for(|| {
        h.engine.snapshot().is_some_and(|snapshot| {
            snapshot.invocations.first().is_some_and(|invocation| {
                invocation.conversion_value == 2 && invocation.priority == 5
            })
        })
    }));
}

// ----------------------------------------------------------------------------
// Refresh coalescing
// ----------------------------------------------------------------------------

#[test]
fn concurrent_refreshes_coalesce_into_one_fetch() {
    let h = harness(EnginePolicy::default());
    h.networker
        .stage_config_response(Ok(config_payload(vec![default_config_entry(10_000)])));
    h.networker.hold_config_requests();
    h.engine.enable();
    assert!(wait_for(|| h.networker.count("GET", "aem_conversion_configs") == 1));

    let (first_sender, first) = mpsc::channel();
    let (second_sender, second) = mpsc::channel();
    h.engine.refresh_configurations(
        false,
        Some(Box::new(move |outcome| {
            let _ = first_sender.send(outcome);
        })),
    );
    h.engine.refresh_configurations(
        false,
        Some(Box::new(move |outcome| {
            let _ = second_sender.send(outcome);
        })),
    );

    h.networker.release_config_requests();
    let first_outcome = first.recv_timeout(Duration::from_secs(5)).expect("first completion");
    let second_outcome =
        second.recv_timeout(Duration::from_secs(5)).expect("second completion");
    assert!(first_outcome.is_none());
    assert!(second_outcome.is_none());
    // Both waiters shared the single in-flight fetch.
    assert_eq!(h.networker.count("GET", "aem_conversion_configs"), 1);
}

#[test]
fn failed_refresh_reports_the_error_to_waiters() {
    let h = harness(EnginePolicy::default());
    h.networker.stage_config_response(Err(NetworkError::Server {
        code: 503,
    }));
    h.engine.enable();

    let (sender, receiver) = mpsc::channel();
    h.engine.refresh_configurations(
        true,
        Some(Box::new(move |outcome| {
            let _ = sender.send(outcome);
        })),
    );
    let outcome = receiver.recv_timeout(Duration::from_secs(5)).expect("completion");
    // The staged failure lands on whichever fetch this completion joined.
    if let Some(error) = outcome {
        assert!(matches!(error, NetworkError::Server { code: 503 }));
    }
}

#[test]
fn open_invocations_keep_their_version_across_refreshes() {
    let h = harness_with_default_config();
    h.engine.handle_url("myapp://attr?campaign_id=42&acs_token=abc");
    h.engine.record_event("fb_mobile_purchase", None, None, None);
    assert!(wait_for(|| {
        h.engine.snapshot().is_some_and(|snapshot| {
            snapshot.invocations.first().is_some_and(|invocation| {
                invocation.conversion_value == 2
            })
        })
    }));
    // Attribution pinned the version the invocation evaluated under.
    let invocation = h.engine.snapshot().expect("snapshot").invocations[0].clone();
    assert_eq!(invocation.config_id, 10_000);

    // A forced refresh delivers a newer version; retention must keep both
    // it and the version the open invocation is bound to.
    h.networker
        .stage_config_response(Ok(config_payload(vec![default_config_entry(20_000)])));
    let (sender, receiver) = mpsc::channel();
    h.engine.refresh_configurations(
        true,
        Some(Box::new(move |outcome| {
            let _ = sender.send(outcome);
        })),
    );
    assert!(
        receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("completion")
            .is_none()
    );

    let snapshot = h.engine.snapshot().expect("snapshot");
    assert_eq!(snapshot.configuration_counts[&ConfigMode::Default], 2);
    assert_eq!(snapshot.invocations[0].config_id, 10_000);
    assert_eq!(snapshot.invocations[0].conversion_value, 2);
}

// ----------------------------------------------------------------------------
// Aggregation
// ----------------------------------------------------------------------------

#[test]
fn aggregation_marks_invocations_only_after_confirmed_send() {
    let h = harness_with_default_config();
    h.engine.handle_url("myapp://attr?campaign_id=42&acs_token=abc");
    h.engine.record_event("fb_mobile_purchase", None, None, None);
    assert!(wait_for(|| {
        h.engine.snapshot().is_some_and(|snapshot| {
            snapshot.invocations.first().is_some_and(|invocation| !invocation.is_aggregated)
        })
    }));

    // First cycle fails at the transport; the invocation must stay pending.
    h.networker.stage_post_response(Err(NetworkError::Transport("offline".to_string())));
    h.engine.flush(true);
    assert!(wait_for(|| h.networker.count("POST", "aem_conversions") == 1));
    let snapshot = h.engine.snapshot().expect("snapshot");
    assert!(!snapshot.invocations[0].is_aggregated);
    assert!(snapshot.min_aggregation_timestamp.is_none());

    // Retry until the (now succeeding) cycle confirms.
    assert!(wait_for(|| {
        h.engine.flush(true);
        h.engine.snapshot().is_some_and(|snapshot| {
            snapshot.invocations.first().is_some_and(|invocation| invocation.is_aggregated)
        })
    }));
    let snapshot = h.engine.snapshot().expect("snapshot");
    assert!(snapshot.min_aggregation_timestamp.is_some());

    // The confirmed entry carried aggregate fields only.
    let report = h
        .networker
        .calls()
        .into_iter()
        .filter(|call| call.method == "POST" && call.path.ends_with("aem_conversions"))
        .next_back()
        .expect("aggregation call");
    assert_eq!(report.params["campaign_id"], "42");
    assert_eq!(report.params["conversion_data"], "2");
    assert_eq!(report.params["delay_flow"], "server");
    assert!(!report.params.contains_key("hmac"));
}

#[test]
fn unforced_flush_waits_for_cutoff() {
    let h = harness_with_default_config();
    h.engine.handle_url("myapp://attr?campaign_id=42&acs_token=abc");
    h.engine.record_event("fb_mobile_purchase", None, None, None);
    assert!(wait_for(|| {
        h.engine.snapshot().is_some_and(|snapshot| {
            snapshot.invocations.first().is_some_and(|invocation| !invocation.is_aggregated)
        })
    }));

    // Within the cutoff window nothing reports.
    h.engine.flush(false);
    let snapshot = h.engine.snapshot().expect("snapshot");
    assert!(!snapshot.invocations[0].is_aggregated);
    assert_eq!(h.networker.count("POST", "aem_conversions"), 0);

    // Past the cutoff the same flush reports.
    h.clock.advance(SECONDS_PER_DAY + 1);
    assert!(wait_for(|| {
        h.engine.flush(false);
        h.engine.snapshot().is_some_and(|snapshot| {
            snapshot.invocations.first().is_some_and(|invocation| invocation.is_aggregated)
        })
    }));
}

#[test]
fn platform_reported_events_keep_bookkeeping_but_no_credit() {
    let h = harness_with_default_config();
    h.platform.report_event("fb_mobile_purchase");
    h.engine.handle_url("myapp://attr?campaign_id=42&acs_token=abc&has_skan=1");

    h.engine.record_event("fb_mobile_purchase", None, None, None);
    assert!(wait_for(|| {
        h.engine.snapshot().is_some_and(|snapshot| {
            snapshot.invocations.first().is_some_and(|invocation| {
                invocation.conversion_value == 2
            })
        })
    }));
    // Conversion state advanced, but the update is not reported externally.
    let invocation = h.engine.snapshot().expect("snapshot").invocations[0].clone();
    assert!(invocation.is_aggregated);
}

// ----------------------------------------------------------------------------
// Debugging and catalog reports
// ----------------------------------------------------------------------------

#[test]
fn test_deep_links_fire_a_debugging_report() {
    let h = harness_with_default_config();
    h.engine.handle_url("myapp://attr?campaign_id=42&acs_token=abc&test_deeplink=1");

    assert!(wait_for(|| h.networker.count("POST", "aem_conversions") == 1));
    let report = h
        .networker
        .calls()
        .into_iter()
        .find(|call| call.method == "POST")
        .expect("debugging call");
    assert_eq!(report.params["campaign_id"], "42");
    assert_eq!(report.params["conversion_data"], "0");
    assert_eq!(report.params["is_conversion_filtering"], "true");

    // The test invocation is still tracked like any other.
    assert!(wait_for(|| {
        h.engine.snapshot().is_some_and(|snapshot| snapshot.invocations.len() == 1)
    }));
}

#[test]
fn catalog_match_gates_the_conversion_filter_report() {
    let policy = EnginePolicy {
        conversion_filtering_enabled: true,
        ..EnginePolicy::default()
    };
    let h = harness(policy);
    h.networker
        .stage_config_response(Ok(config_payload(vec![default_config_entry(10_000)])));
    h.engine.enable();
    assert!(wait_for(|| {
        h.engine
            .snapshot()
            .is_some_and(|snapshot| !snapshot.configuration_counts.is_empty())
    }));
    h.engine.handle_url("myapp://attr?campaign_id=42&acs_token=abc&catalog_id=cat-7");

    h.networker.stage_filter_response(Ok(json!({
        "data": [{"content_id_belongs_to_catalog_id": true}]
    })));
    h.engine.record_event(
        "fb_mobile_purchase",
        None,
        None,
        Some(parameters(json!({"fb_content_id": "[\"sku-1\"]"}))),
    );

    assert!(wait_for(|| h.networker.count("GET", "aem_conversion_filter") == 1));
    let catalog_call = h
        .networker
        .calls()
        .into_iter()
        .find(|call| call.path.ends_with("aem_conversion_filter") && call.method == "GET")
        .expect("catalog call");
    assert_eq!(catalog_call.params["catalog_id"], "cat-7");
    assert_eq!(catalog_call.params["content_ids"], r#"["sku-1"]"#);

    // The match verdict triggers the follow-up filter report.
    assert!(wait_for(|| h.networker.count("POST", "aem_conversions") == 1));
}

// ----------------------------------------------------------------------------
// Durability
// ----------------------------------------------------------------------------

#[test]
fn state_survives_an_engine_restart() {
    let h = harness_with_default_config();
    h.engine.handle_url("myapp://attr?campaign_id=42&acs_token=abc");
    h.engine.record_event("fb_mobile_purchase", None, None, None);
    assert!(wait_for(|| {
        h.engine.snapshot().is_some_and(|snapshot| {
            snapshot.invocations.first().is_some_and(|invocation| {
                invocation.conversion_value == 2
            })
        })
    }));

    let Harness {
        engine,
        networker,
        platform,
        clock,
        dir,
    } = h;
    drop(engine);

    let store = FileReportStore::open(dir.path().join("aem")).expect("store");
    let revived = AemEngine::new(
        "123",
        store,
        networker.clone(),
        platform.clone(),
        clock.clone(),
        EnginePolicy::default(),
    );
    revived.enable();
    assert!(wait_for(|| {
        revived.snapshot().is_some_and(|snapshot| {
            snapshot.invocations.first().is_some_and(|invocation| {
                invocation.conversion_value == 2 && invocation.priority == 5
            })
        })
    }));
}
