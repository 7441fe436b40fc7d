// crates/aem-reporter/src/engine.rs
// ============================================================================
// Module: Attribution Engine
// Description: Serial command-queue engine driving the AEM lifecycle.
// Purpose: Orchestrate deep links, event attribution, refreshes, and reports.
// Dependencies: aem-core, rand, serde_json, tracing, crate::{parser, request}
// ============================================================================

//! ## Overview
//! The engine owns all mutable attribution state on one dedicated worker
//! thread fed by an mpsc channel. Public entry points post commands and
//! return immediately; network calls run on short-lived helper threads that
//! post their outcome back as commands, so completions never race event
//! recording.
//! Invariants:
//! - Commands are processed strictly in submission order.
//! - At most one configuration refresh is in flight; refresh completions run
//!   exactly once, in FIFO order.
//! - `is_aggregated` flips to true only after a confirmed send.
//! - Aggregation cycles respect the minimum interval unless forced.
//!
//! Security posture: deep links and server payloads are untrusted; every
//! failure degrades with a log line, never a panic or a host-visible error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use aem_core::AemNetworker;
use aem_core::CampaignId;
use aem_core::Clock;
use aem_core::ConfigMode;
use aem_core::Configuration;
use aem_core::ConfigurationMap;
use aem_core::Invocation;
use aem_core::NetworkError;
use aem_core::PlatformChannel;
use aem_core::ReportStore;
use aem_core::Timestamp;
use rand::Rng;
use serde_json::Map;
use serde_json::Value;
use tracing::debug;
use tracing::warn;

use crate::parser;
use crate::request;

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Tunable timing and feature knobs of the engine.
///
/// # Invariants
/// - Intervals are in seconds and non-negative.
#[derive(Debug, Clone, Copy)]
pub struct EnginePolicy {
    /// Age after which a cached configuration set is refreshed.
    pub config_refresh_ttl_seconds: i64,
    /// Minimum spacing between aggregation cycles.
    pub min_aggregation_interval_seconds: i64,
    /// Whether catalog matching and the follow-up debugging report run.
    pub conversion_filtering_enabled: bool,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            config_refresh_ttl_seconds: 86_400,
            min_aggregation_interval_seconds: 30,
            conversion_filtering_enabled: false,
        }
    }
}

/// Base consumption delay reported with every aggregation entry, in hours.
const BASE_CONSUMPTION_DELAY_HOURS: i64 = 24;
/// Upper bound (exclusive) of the per-entry consumption-delay jitter.
const CONSUMPTION_DELAY_JITTER_HOURS: i64 = 24;
/// How long [`AemEngine::snapshot`] waits for the worker to answer.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Identity of an invocation across the async report boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InvocationKey {
    /// Campaign identifier of the invocation.
    campaign_id: CampaignId,
    /// Attribution token of the invocation.
    acs_token: String,
    /// Creation time of the invocation.
    timestamp: Timestamp,
}

impl InvocationKey {
    /// Builds the key identifying `invocation`.
    fn of(invocation: &Invocation) -> Self {
        Self {
            campaign_id: invocation.campaign_id.clone(),
            acs_token: invocation.acs_token.clone(),
            timestamp: invocation.timestamp,
        }
    }

    /// Returns true when `invocation` is the one this key identifies.
    fn matches(&self, invocation: &Invocation) -> bool {
        invocation.campaign_id == self.campaign_id
            && invocation.acs_token == self.acs_token
            && invocation.timestamp == self.timestamp
    }
}

/// Completion invoked on the worker after a refresh settles.
type RefreshCompletion = Box<dyn FnOnce(&mut EngineState, Option<NetworkError>) + Send>;

/// Host-facing refresh completion.
pub type RefreshCallback = Box<dyn FnOnce(Option<NetworkError>) + Send>;

/// Commands processed serially by the worker thread.
enum Command {
    /// Load persisted state and start reporting.
    Enable,
    /// Parse an attribution deep link.
    HandleUrl(String),
    /// Record one in-app event.
    RecordEvent {
        /// Event name.
        event: String,
        /// Event currency, if any.
        currency: Option<String>,
        /// Event value, if any.
        value: Option<f64>,
        /// Event parameters, if any.
        parameters: Option<Map<String, Value>>,
    },
    /// Request a configuration refresh.
    Refresh {
        /// Bypass freshness checks when set.
        forced: bool,
        /// Completion to run after the refresh settles.
        completion: Option<RefreshCompletion>,
    },
    /// Outcome of an in-flight configuration fetch.
    ConfigResponse(Result<Value, NetworkError>),
    /// Report all unaggregated invocations.
    Flush {
        /// Ignore interval and cutoff eligibility when set.
        forced: bool,
    },
    /// Outcome of an in-flight aggregation cycle.
    AggregationOutcome {
        /// Invocations whose entries were confirmed sent.
        succeeded: Vec<InvocationKey>,
        /// First failure of the cycle, if any.
        error: Option<NetworkError>,
    },
    /// Outcome of a catalog match query.
    CatalogOutcome {
        /// Invocation the query was issued for.
        key: InvocationKey,
        /// Whether the content belongs to the invocation's catalog.
        matched: bool,
    },
    /// Answer a state snapshot for diagnostics and tests.
    Snapshot(mpsc::Sender<EngineSnapshot>),
    /// Stop the worker thread.
    Shutdown,
}

// ============================================================================
// SECTION: Snapshot
// ============================================================================

/// Point-in-time view of engine state for diagnostics and tests.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    /// Whether reporting is enabled.
    pub enabled: bool,
    /// Open invocations in insertion order.
    pub invocations: Vec<Invocation>,
    /// Number of cached configurations per mode.
    pub configuration_counts: BTreeMap<ConfigMode, usize>,
    /// Earliest time the next aggregation cycle may run.
    pub min_aggregation_timestamp: Option<Timestamp>,
    /// Whether a configuration refresh is in flight.
    pub is_refreshing: bool,
}

// ============================================================================
// SECTION: Engine Handle
// ============================================================================

/// Handle to the attribution engine.
///
/// All methods post to the worker thread and return immediately. Dropping
/// the handle shuts the worker down after the queued commands drain.
pub struct AemEngine {
    /// Command channel into the worker.
    sender: mpsc::Sender<Command>,
    /// Worker thread handle, joined on drop.
    worker: Option<thread::JoinHandle<()>>,
}

impl AemEngine {
    /// Starts the engine worker for `app_id` over the given collaborators.
    #[must_use]
    pub fn new(
        app_id: impl Into<String>,
        store: impl ReportStore + 'static,
        networker: impl AemNetworker + 'static,
        platform: impl PlatformChannel + 'static,
        clock: impl Clock + 'static,
        policy: EnginePolicy,
    ) -> Self {
        let (sender, receiver) = mpsc::channel();
        let state = EngineState {
            app_id: app_id.into(),
            store: Box::new(store),
            networker: Arc::new(networker),
            platform: Arc::new(platform),
            clock: Arc::new(clock),
            policy,
            sender: sender.clone(),
            enabled: false,
            invocations: Vec::new(),
            configurations: ConfigurationMap::new(),
            config_refresh_timestamp: None,
            is_refreshing: false,
            refresh_completions: VecDeque::new(),
            min_aggregation_timestamp: None,
            is_sending_aggregation: false,
        };
        let worker = thread::spawn(move || run_worker(state, receiver));
        Self {
            sender,
            worker: Some(worker),
        }
    }

    /// Loads persisted state and starts reporting.
    pub fn enable(&self) {
        let _ = self.sender.send(Command::Enable);
    }

    /// Handles an attribution deep link.
    pub fn handle_url(&self, link: &str) {
        let _ = self.sender.send(Command::HandleUrl(link.to_string()));
    }

    /// Records one in-app event against the attributed invocation, if any.
    pub fn record_event(
        &self,
        event: impl Into<String>,
        currency: Option<String>,
        value: Option<f64>,
        parameters: Option<Map<String, Value>>,
    ) {
        let _ = self.sender.send(Command::RecordEvent {
            event: event.into(),
            currency,
            value,
            parameters,
        });
    }

    /// Requests a configuration refresh.
    ///
    /// When a refresh is already in flight the request coalesces onto it;
    /// `completion` still runs exactly once after that refresh settles, in
    /// submission order.
    pub fn refresh_configurations(&self, forced: bool, completion: Option<RefreshCallback>) {
        let completion = completion.map(|callback| -> RefreshCompletion {
            Box::new(move |_state, outcome| callback(outcome))
        });
        let _ = self.sender.send(Command::Refresh {
            forced,
            completion,
        });
    }

    /// Reports all unaggregated invocations.
    ///
    /// With `forced` set, interval and cutoff eligibility are ignored.
    pub fn flush(&self, forced: bool) {
        let _ = self.sender.send(Command::Flush {
            forced,
        });
    }

    /// Returns a snapshot of engine state, or `None` when the worker is gone.
    #[must_use]
    pub fn snapshot(&self) -> Option<EngineSnapshot> {
        let (answer, receiver) = mpsc::channel();
        self.sender.send(Command::Snapshot(answer)).ok()?;
        receiver.recv_timeout(SNAPSHOT_TIMEOUT).ok()
    }
}

impl Drop for AemEngine {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// Drains the command channel until shutdown.
fn run_worker(mut state: EngineState, receiver: mpsc::Receiver<Command>) {
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Enable => state.enable(),
            Command::HandleUrl(link) => state.handle_url(&link),
            Command::RecordEvent {
                event,
                currency,
                value,
                parameters,
            } => state.record_event(event, currency, value, parameters),
            Command::Refresh {
                forced,
                completion,
            } => state.ensure_refresh(forced, completion),
            Command::ConfigResponse(result) => state.finish_refresh(result),
            Command::Flush {
                forced,
            } => state.check_aggregation(forced),
            Command::AggregationOutcome {
                succeeded,
                error,
            } => state.finish_aggregation(&succeeded, error),
            Command::CatalogOutcome {
                key,
                matched,
            } => state.finish_catalog_check(&key, matched),
            Command::Snapshot(answer) => {
                let _ = answer.send(state.snapshot());
            }
            Command::Shutdown => break,
        }
    }
}

// ============================================================================
// SECTION: Engine State
// ============================================================================

/// All mutable engine state, owned exclusively by the worker thread.
struct EngineState {
    /// Application identifier scoping every endpoint path.
    app_id: String,
    /// Durable storage for invocations, configurations, and scheduling.
    store: Box<dyn ReportStore>,
    /// Transport to the attribution endpoints.
    networker: Arc<dyn AemNetworker>,
    /// Parallel platform attribution channel, for double-counting checks.
    platform: Arc<dyn PlatformChannel>,
    /// Source of the current time.
    clock: Arc<dyn Clock>,
    /// Timing and feature knobs.
    policy: EnginePolicy,
    /// Channel back into the worker, handed to helper threads.
    sender: mpsc::Sender<Command>,
    /// Whether reporting is enabled.
    enabled: bool,
    /// Open invocations in insertion order.
    invocations: Vec<Invocation>,
    /// Cached configurations grouped by mode.
    configurations: ConfigurationMap,
    /// Time of the last successful configuration refresh.
    config_refresh_timestamp: Option<Timestamp>,
    /// Whether a configuration fetch is in flight.
    is_refreshing: bool,
    /// Completions awaiting the in-flight refresh, FIFO.
    refresh_completions: VecDeque<RefreshCompletion>,
    /// Earliest time the next aggregation cycle may run.
    min_aggregation_timestamp: Option<Timestamp>,
    /// Whether an aggregation cycle is in flight.
    is_sending_aggregation: bool,
}

impl EngineState {
    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Loads persisted state and kicks off an initial refresh.
    fn enable(&mut self) {
        if self.enabled {
            return;
        }
        self.enabled = true;

        match self.store.load_invocations() {
            Ok(invocations) => self.invocations = invocations,
            Err(error) => warn!(%error, "failed to load invocations, starting empty"),
        }
        match self.store.load_configurations() {
            Ok(configurations) => self.configurations = configurations,
            Err(error) => warn!(%error, "failed to load configurations, starting empty"),
        }
        match self.store.load_aggregation_schedule() {
            Ok(not_before) => self.min_aggregation_timestamp = not_before,
            Err(error) => warn!(%error, "failed to load aggregation schedule"),
        }

        self.ensure_refresh(false, None);
    }

    /// Parses a deep link into a fresh invocation.
    fn handle_url(&mut self, link: &str) {
        if !self.enabled {
            return;
        }
        let payload = match parser::parse_url(link) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(%error, "rejected attribution deep link");
                return;
            }
        };

        let invocation = Invocation::from_link(payload, self.clock.now());
        if invocation.is_test_mode {
            self.spawn_debugging_request(&invocation);
        }
        self.invocations.push(invocation);
        self.persist_invocations();
        self.ensure_refresh(false, None);
    }

    // ------------------------------------------------------------------
    // Event recording
    // ------------------------------------------------------------------

    /// Records an event, refreshing configurations first when needed.
    fn record_event(
        &mut self,
        event: String,
        currency: Option<String>,
        value: Option<f64>,
        parameters: Option<Map<String, Value>>,
    ) {
        if !self.enabled {
            return;
        }
        // Attribution runs after the refresh settles so a cold start still
        // sees configurations; with a warm cache it runs immediately.
        let completion: RefreshCompletion = Box::new(move |state, _outcome| {
            state.attribute(&event, currency.as_deref(), value, parameters.as_ref());
        });
        self.ensure_refresh(false, Some(completion));
    }

    /// Attributes one event to the best open invocation and reacts to any
    /// conversion value change.
    fn attribute(
        &mut self,
        event: &str,
        currency: Option<&str>,
        value: Option<f64>,
        parameters: Option<&Map<String, Value>>,
    ) {
        let now = self.clock.now();
        let Some(index) = self.select_invocation(event, currency, value, parameters, now) else {
            return;
        };

        let configurations = &self.configurations;
        let invocation = &mut self.invocations[index];
        invocation.attribute_event(event, currency, value, parameters, configurations, now, true);
        let updated = invocation.update_conversion_value(configurations, now);

        if updated && self.is_double_counting(index, event) {
            // The platform channel already claims credit for this event;
            // bookkeeping stays, external credit is suppressed.
            self.invocations[index].is_aggregated = true;
            debug!(event, "suppressed aggregation credit for platform-reported event");
        }

        if self.policy.conversion_filtering_enabled {
            self.spawn_catalog_check(index, parameters);
        }

        self.persist_invocations();
        if updated {
            self.check_aggregation(false);
        }
    }

    /// Picks the invocation the event attributes to, newest first.
    ///
    /// Only the newest general (business-less) invocation is considered;
    /// business-scoped invocations all stay candidates. The probe runs
    /// without mutating state.
    fn select_invocation(
        &mut self,
        event: &str,
        currency: Option<&str>,
        value: Option<f64>,
        parameters: Option<&Map<String, Value>>,
        now: Timestamp,
    ) -> Option<usize> {
        let configurations = &self.configurations;
        let mut seen_general = false;
        for index in (0 .. self.invocations.len()).rev() {
            let invocation = &mut self.invocations[index];
            if invocation.business_id.is_none() {
                if seen_general {
                    continue;
                }
                seen_general = true;
            }
            if invocation
                .attribute_event(event, currency, value, parameters, configurations, now, false)
            {
                return Some(index);
            }
        }
        None
    }

    /// Returns true when the platform channel already reports this event for
    /// the invocation at `index`.
    fn is_double_counting(&self, index: usize, event: &str) -> bool {
        self.invocations[index].has_platform_attribution
            && !self.platform.should_cutoff()
            && self.platform.is_reporting_event(event)
    }

    // ------------------------------------------------------------------
    // Configuration refresh
    // ------------------------------------------------------------------

    /// Starts a refresh when one is due, coalescing onto any in-flight one.
    ///
    /// `completion` runs exactly once: immediately when no refresh is
    /// needed, otherwise after the (possibly shared) refresh settles.
    fn ensure_refresh(&mut self, forced: bool, completion: Option<RefreshCompletion>) {
        if !self.should_refresh(forced) {
            if let Some(completion) = completion {
                completion(self, None);
            }
            return;
        }
        if let Some(completion) = completion {
            self.refresh_completions.push_back(completion);
        }
        if self.is_refreshing {
            return;
        }
        self.is_refreshing = true;

        let path = request::configs_path(&self.app_id);
        let params = request::configs_params(&self.invocations);
        let networker = Arc::clone(&self.networker);
        let sender = self.sender.clone();
        let _ = thread::spawn(move || {
            let result = networker.get(&path, &params);
            let _ = sender.send(Command::ConfigResponse(result));
        });
    }

    /// Decides whether the cached configurations need a refresh.
    fn should_refresh(&self, forced: bool) -> bool {
        if forced || self.configurations.is_empty() {
            return true;
        }
        let fresh = self.config_refresh_timestamp.is_some_and(|refreshed_at| {
            self.clock.now().seconds_since(refreshed_at) <= self.policy.config_refresh_ttl_seconds
        });
        if !fresh {
            return true;
        }
        // A business-scoped invocation with no business configurations yet
        // means the cache predates the scope and must be refetched.
        let has_business_configs = self.configurations.contains_key(&ConfigMode::Brand)
            || self.configurations.contains_key(&ConfigMode::Cpas);
        self.invocations.iter().any(|invocation| invocation.business_id.is_some())
            && !has_business_configs
    }

    /// Applies a settled configuration fetch and drains waiting completions.
    fn finish_refresh(&mut self, result: Result<Value, NetworkError>) {
        self.is_refreshing = false;
        let outcome = match result {
            Ok(payload) => {
                self.add_configurations(&payload);
                self.config_refresh_timestamp = Some(self.clock.now());
                self.clear_cache();
                self.persist_configurations();
                self.persist_invocations();
                None
            }
            Err(error) => {
                warn!(%error, "configuration refresh failed");
                Some(error)
            }
        };

        let completions: Vec<RefreshCompletion> =
            self.refresh_completions.drain(..).collect();
        for completion in completions {
            completion(self, outcome.clone());
        }
    }

    /// Parses and indexes the entries of a configuration payload.
    ///
    /// Entries parse independently; a malformed entry is dropped with a
    /// warning and never aborts the batch.
    fn add_configurations(&mut self, payload: &Value) {
        let Some(entries) = payload.get("data").and_then(Value::as_array) else {
            warn!("configuration payload has no data array");
            return;
        };
        for entry in entries {
            match Configuration::from_json(entry) {
                Ok(configuration) => self.add_configuration(configuration),
                Err(error) => warn!(%error, "dropped malformed configuration entry"),
            }
        }
    }

    /// Inserts one configuration, replacing the same-version same-scope
    /// entry and keeping each mode list sorted by version.
    fn add_configuration(&mut self, configuration: Configuration) {
        let list = self.configurations.entry(configuration.mode).or_default();
        if let Some(existing) = list.iter_mut().find(|candidate| {
            candidate.is_same(configuration.valid_from, configuration.business_id.as_ref())
        }) {
            *existing = configuration;
        } else {
            list.push(configuration);
            list.sort_by_key(|candidate| candidate.valid_from);
        }
    }

    /// Drops exhausted invocations and configurations nothing references.
    ///
    /// An invocation leaves once it is aggregated and out of window. A
    /// configuration stays while it is the newest of its scope or an open
    /// invocation is bound to it.
    fn clear_cache(&mut self) {
        let now = self.clock.now();
        let configurations = &self.configurations;
        // Bind still-unbound invocations first so the versions they evaluate
        // under survive the retention pass below.
        for invocation in &mut self.invocations {
            let _ = invocation.find_configuration(configurations);
        }
        self.invocations.retain(|invocation| {
            !(invocation.is_aggregated && invocation.is_out_of_window(configurations, now))
        });

        let invocations = &self.invocations;
        for list in self.configurations.values_mut() {
            let newest_per_scope: Vec<i64> = scope_maxima(list);
            list.retain(|configuration| {
                newest_per_scope.contains(&configuration.valid_from)
                    || invocations.iter().any(|invocation| {
                        configuration.is_same(invocation.config_id, invocation.business_id.as_ref())
                    })
            });
        }
        self.configurations.retain(|_, list| !list.is_empty());
    }

    // ------------------------------------------------------------------
    // Aggregation reporting
    // ------------------------------------------------------------------

    /// Starts an aggregation cycle when one is due.
    ///
    /// Unforced cycles honor the minimum interval and only report
    /// invocations past their configuration cutoff. A signing failure
    /// abandons the whole cycle; state is untouched so it retries later.
    fn check_aggregation(&mut self, forced: bool) {
        if self.is_sending_aggregation {
            return;
        }
        let now = self.clock.now();
        if !forced
            && self.min_aggregation_timestamp.is_some_and(|not_before| now < not_before)
        {
            return;
        }

        let mut entries = Vec::new();
        for invocation in &self.invocations {
            if invocation.is_aggregated {
                continue;
            }
            if !forced && !invocation.is_past_cutoff(&self.configurations, now) {
                continue;
            }
            let delay_hours = BASE_CONSUMPTION_DELAY_HOURS
                + rand::thread_rng().gen_range(0 .. CONSUMPTION_DELAY_JITTER_HOURS);
            match request::aggregation_params(invocation, delay_hours) {
                Ok(params) => entries.push((InvocationKey::of(invocation), params)),
                Err(error) => {
                    warn!(%error, "abandoned aggregation cycle, unusable shared secret");
                    return;
                }
            }
        }
        if entries.is_empty() {
            return;
        }
        self.is_sending_aggregation = true;

        let path = request::conversions_path(&self.app_id);
        let networker = Arc::clone(&self.networker);
        let sender = self.sender.clone();
        let _ = thread::spawn(move || {
            let mut succeeded = Vec::new();
            let mut first_error = None;
            for (key, params) in entries {
                match networker.post(&path, &params) {
                    Ok(_) => succeeded.push(key),
                    Err(error) => {
                        first_error.get_or_insert(error);
                    }
                }
            }
            let _ = sender.send(Command::AggregationOutcome {
                succeeded,
                error: first_error,
            });
        });
    }

    /// Applies the outcome of an aggregation cycle.
    ///
    /// Confirmed entries flip `is_aggregated`; failures stay unaggregated
    /// and retry on a later cycle.
    fn finish_aggregation(&mut self, succeeded: &[InvocationKey], error: Option<NetworkError>) {
        self.is_sending_aggregation = false;
        if let Some(error) = error {
            warn!(%error, "aggregation cycle partially failed, will retry");
        }
        if succeeded.is_empty() {
            return;
        }

        for invocation in &mut self.invocations {
            if succeeded.iter().any(|key| key.matches(invocation)) {
                invocation.is_aggregated = true;
            }
        }

        let not_before =
            self.clock.now().plus_seconds(self.policy.min_aggregation_interval_seconds);
        self.min_aggregation_timestamp = Some(not_before);
        if let Err(error) = self.store.save_aggregation_schedule(not_before) {
            warn!(%error, "failed to persist aggregation schedule");
        }
        self.persist_invocations();
    }

    // ------------------------------------------------------------------
    // Catalog matching and debugging reports
    // ------------------------------------------------------------------

    /// Fires a catalog match query for the invocation at `index`, when it
    /// carries a catalog and the event carries content ids.
    fn spawn_catalog_check(&self, index: usize, parameters: Option<&Map<String, Value>>) {
        let invocation = &self.invocations[index];
        let Some(catalog_id) = &invocation.catalog_id else {
            return;
        };
        let Some(content_ids) = parameters.and_then(request::content_ids) else {
            return;
        };

        let key = InvocationKey::of(invocation);
        let path = request::filter_path(&self.app_id);
        let params = request::catalog_params(catalog_id, &content_ids);
        let networker = Arc::clone(&self.networker);
        let sender = self.sender.clone();
        let _ = thread::spawn(move || {
            let matched = networker
                .get(&path, &params)
                .is_ok_and(|payload| catalog_matched(&payload));
            let _ = sender.send(Command::CatalogOutcome {
                key,
                matched,
            });
        });
    }

    /// Reacts to a settled catalog match query.
    fn finish_catalog_check(&mut self, key: &InvocationKey, matched: bool) {
        if !matched {
            return;
        }
        if let Some(invocation) =
            self.invocations.iter().find(|invocation| key.matches(invocation))
        {
            self.spawn_debugging_request(invocation);
        }
    }

    /// Fires a fire-and-forget debugging report for `invocation`.
    fn spawn_debugging_request(&self, invocation: &Invocation) {
        let path = request::conversions_path(&self.app_id);
        let params = request::debugging_params(invocation);
        let networker = Arc::clone(&self.networker);
        let _ = thread::spawn(move || {
            if let Err(error) = networker.post(&path, &params) {
                warn!(%error, "debugging report failed");
            }
        });
    }

    // ------------------------------------------------------------------
    // Persistence and snapshots
    // ------------------------------------------------------------------

    /// Persists the invocation list; memory stays authoritative on failure.
    fn persist_invocations(&self) {
        if let Err(error) = self.store.save_invocations(&self.invocations) {
            warn!(%error, "failed to persist invocations");
        }
    }

    /// Persists the configuration map; memory stays authoritative on failure.
    fn persist_configurations(&self) {
        if let Err(error) = self.store.save_configurations(&self.configurations) {
            warn!(%error, "failed to persist configurations");
        }
    }

    /// Builds a point-in-time snapshot of the state.
    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            enabled: self.enabled,
            invocations: self.invocations.clone(),
            configuration_counts: self
                .configurations
                .iter()
                .map(|(mode, list)| (*mode, list.len()))
                .collect(),
            min_aggregation_timestamp: self.min_aggregation_timestamp,
            is_refreshing: self.is_refreshing,
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Newest `valid_from` per business scope within one mode list.
fn scope_maxima(list: &[Configuration]) -> Vec<i64> {
    let mut maxima: BTreeMap<Option<String>, i64> = BTreeMap::new();
    for configuration in list {
        let scope =
            configuration.business_id.as_ref().map(|id| id.as_str().to_string());
        let entry = maxima.entry(scope).or_insert(configuration.valid_from);
        if configuration.valid_from > *entry {
            *entry = configuration.valid_from;
        }
    }
    maxima.into_values().collect()
}

/// Reads the catalog match verdict out of a filter response payload.
fn catalog_matched(payload: &Value) -> bool {
    payload
        .get("data")
        .and_then(Value::as_array)
        .and_then(|entries| entries.first())
        .and_then(|entry| entry.get("content_id_belongs_to_catalog_id"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
