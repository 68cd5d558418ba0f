//! Concurrent verification engine
//!
//! Schedules one bounded task per proxy record, supports pause, resume and
//! cancel at runtime, deduplicates inputs on the `host:port` pair, and
//! publishes per-result and lifecycle events on a typed channel.

use crate::proxy::models::{ProxyRecord, ProxyType};
use crate::proxy::parser::ProxyParser;
use crate::proxy::probe::{self, NetTransport, ProbeOptions, ProbeTransport};
use crate::proxy::store::{ResultStore, Statistics};
use crate::Result;
use anyhow::{bail, Context};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::warn;

/// Default probe timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Minimum accepted probe timeout in milliseconds
pub const MIN_TIMEOUT_MS: u64 = 1_000;

/// Default number of concurrent workers
pub const DEFAULT_WORKERS: usize = 50;

/// Hard cap on concurrent workers
pub const MAX_WORKERS: usize = 200;

/// Default URL proxies are tested against
pub const DEFAULT_TEST_URL: &str = "http://httpbin.org/ip";

/// Default URL for the HTTPS stage
pub const DEFAULT_HTTPS_TEST_URL: &str = "https://httpbin.org/ip";

/// How long `cancel` waits for outstanding tasks to unwind
const CANCEL_GRACE: Duration = Duration::from_secs(5);
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout applied to every probe stage
    pub timeout: Duration,
    /// Number of records probed concurrently
    pub workers: usize,
    /// URL requested through each proxy
    pub test_url: String,
    /// URL requested in the HTTPS stage
    pub https_test_url: String,
    /// Whether the HTTPS stage runs at all
    pub test_https: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            workers: DEFAULT_WORKERS,
            test_url: DEFAULT_TEST_URL.to_string(),
            https_test_url: DEFAULT_HTTPS_TEST_URL.to_string(),
            test_https: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_https_test_url(mut self, url: String) -> Self {
        self.https_test_url = url;
        self
    }

    pub fn with_test_https(mut self, test_https: bool) -> Self {
        self.test_https = test_https;
        self
    }

    /// Apply the validation clamps: timeout floored at one second, worker
    /// count held to `[1, MAX_WORKERS]`.
    pub fn clamped(mut self) -> Self {
        self.timeout = self.timeout.max(Duration::from_millis(MIN_TIMEOUT_MS));
        self.workers = self.workers.clamp(1, MAX_WORKERS);
        self
    }

    fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            timeout: self.timeout,
            test_url: self.test_url.clone(),
            https_test_url: self.https_test_url.clone(),
            test_https: self.test_https,
        }
    }
}

/// Events published by the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// One record finished its probe
    Checked(ProxyRecord),
    /// Lifecycle or progress message
    Status(String),
    /// Every scheduled record of the pass has been checked
    Completed,
}

#[derive(Debug, Clone, Copy, Default)]
struct ControlFlags {
    paused: bool,
    canceled: bool,
}

struct EngineInner {
    config: RwLock<EngineConfig>,
    limiter: RwLock<Arc<Semaphore>>,
    control: watch::Sender<ControlFlags>,
    checked: AtomicUsize,
    total: AtomicUsize,
    in_flight: AtomicUsize,
    seen: Mutex<HashSet<String>>,
    store: ResultStore,
    events: mpsc::UnboundedSender<EngineEvent>,
    transport: Arc<dyn ProbeTransport>,
}

/// Drives the layered probe over an arbitrary-sized batch of records with
/// a bounded worker pool.
///
/// Constructors hand back the receiving half of the event channel; the
/// engine owns the sender. Events are published from worker tasks, so
/// consumers needing UI-thread affinity must redispatch themselves.
pub struct VerificationEngine {
    inner: Arc<EngineInner>,
}

impl VerificationEngine {
    /// Create an engine with the default configuration.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with a custom configuration.
    pub fn with_config(config: EngineConfig) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        Self::with_transport(config, Arc::new(NetTransport))
    }

    /// Create an engine with a custom configuration and transport.
    pub fn with_transport(
        config: EngineConfig,
        transport: Arc<dyn ProbeTransport>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let config = config.clamped();
        let (events, receiver) = mpsc::unbounded_channel();
        let (control, _) = watch::channel(ControlFlags::default());
        let limiter = Arc::new(Semaphore::new(config.workers));

        let inner = Arc::new(EngineInner {
            config: RwLock::new(config),
            limiter: RwLock::new(limiter),
            control,
            checked: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            seen: Mutex::new(HashSet::new()),
            store: ResultStore::new(),
            events,
            transport,
        });

        (Self { inner }, receiver)
    }

    /// Apply a new configuration, clamped as on construction.
    ///
    /// A worker-count change is rejected while a pass is active; callers
    /// must `reset` first so in-flight tasks never straddle two pools.
    pub fn configure(&self, config: EngineConfig) -> Result<()> {
        let config = config.clamped();
        let workers_changed = self.read_config().workers != config.workers;

        if workers_changed {
            if self.pass_active() {
                bail!("cannot change worker count while a pass is active; call reset() first");
            }
            *self.inner.limiter.write().expect("limiter lock poisoned") =
                Arc::new(Semaphore::new(config.workers));
        }

        *self.inner.config.write().expect("config lock poisoned") = config;
        Ok(())
    }

    /// Load a batch of raw address lines: parse, dedup against everything
    /// seen so far, and schedule one task per new record. Returns the
    /// number of newly scheduled records.
    pub fn load_lines<I, S>(&self, lines: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let records = ProxyParser::parse_lines(lines);

        let fresh: Vec<ProxyRecord> = {
            let mut seen = self.inner.seen.lock().expect("dedup set lock poisoned");
            records
                .into_iter()
                .filter(|record| seen.insert(record.address()))
                .collect()
        };

        if fresh.is_empty() {
            return 0;
        }

        let scheduled = fresh.len();
        self.inner.total.fetch_add(scheduled, Ordering::SeqCst);
        self.emit_status(format!("Loaded {} proxies", scheduled));

        for record in fresh {
            self.schedule(record);
        }

        scheduled
    }

    /// Load a proxy list file. An unreadable file is the only error; a
    /// malformed line inside it is merely skipped.
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read proxy list {}", path.as_ref().display()))?;
        Ok(self.load_lines(content.lines()))
    }

    /// Parse and schedule a single additional address. Returns whether a
    /// new record was scheduled.
    pub fn add_one(&self, line: &str) -> bool {
        let Some(record) = ProxyParser::parse_line(line) else {
            warn!("Ignoring malformed proxy address: {}", line);
            return false;
        };

        let is_new = self
            .inner
            .seen
            .lock()
            .expect("dedup set lock poisoned")
            .insert(record.address());
        if !is_new {
            return false;
        }

        self.inner.total.fetch_add(1, Ordering::SeqCst);
        self.schedule(record);
        true
    }

    /// Block not-yet-started tasks at their control point. Tasks already
    /// inside a probe are not interrupted.
    pub fn pause(&self) {
        self.inner.control.send_modify(|flags| flags.paused = true);
        self.emit_status("Verification paused".to_string());
    }

    pub fn resume(&self) {
        self.inner.control.send_modify(|flags| flags.paused = false);
        self.emit_status("Verification resumed".to_string());
    }

    /// Request cancellation and wait, bounded by a grace period, for
    /// outstanding tasks to unwind.
    ///
    /// Cancellation is cooperative: no further task begins a probe, queued
    /// pool waits fail immediately, and a task already inside a network
    /// call runs to that call's own timeout and still records its result.
    pub async fn cancel(&self) {
        self.inner.control.send_modify(|flags| flags.canceled = true);
        self.inner
            .limiter
            .read()
            .expect("limiter lock poisoned")
            .close();

        let deadline = tokio::time::Instant::now() + CANCEL_GRACE;
        while self.inner.in_flight.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "Outstanding probe tasks did not unwind within {:?}",
                    CANCEL_GRACE
                );
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }

        self.emit_status("Verification canceled".to_string());
    }

    /// Cancel, clear every result and counter, and return the engine to
    /// its initial empty state with a fresh pool.
    pub async fn reset(&self) {
        self.cancel().await;

        self.inner.store.clear();
        self.inner
            .seen
            .lock()
            .expect("dedup set lock poisoned")
            .clear();
        self.inner.checked.store(0, Ordering::SeqCst);
        self.inner.total.store(0, Ordering::SeqCst);
        self.inner.control.send_replace(ControlFlags::default());

        let workers = self.read_config().workers;
        *self.inner.limiter.write().expect("limiter lock poisoned") =
            Arc::new(Semaphore::new(workers));

        self.emit_status("Engine reset".to_string());
    }

    /// Fraction of the pass finished so far, 0 when nothing is loaded.
    pub fn progress(&self) -> f64 {
        let total = self.inner.total.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        (self.inner.checked.load(Ordering::SeqCst) as f64 / total as f64).clamp(0.0, 1.0)
    }

    pub fn checked_count(&self) -> usize {
        self.inner.checked.load(Ordering::SeqCst)
    }

    pub fn total_count(&self) -> usize {
        self.inner.total.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.control.borrow().paused
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.control.borrow().canceled
    }

    /// Snapshot of every checked record
    pub fn all(&self) -> Vec<ProxyRecord> {
        self.inner.store.all()
    }

    /// Snapshot of the valid records
    pub fn valid(&self) -> Vec<ProxyRecord> {
        self.inner.store.valid()
    }

    /// Valid records of the given kind
    pub fn by_type(&self, kind: ProxyType) -> Vec<ProxyRecord> {
        self.inner.store.by_type(kind)
    }

    /// Up to `limit` valid records, fastest first
    pub fn fastest(&self, limit: usize) -> Vec<ProxyRecord> {
        self.inner.store.fastest(limit)
    }

    pub fn count(&self) -> usize {
        self.inner.store.count()
    }

    pub fn valid_count(&self) -> usize {
        self.inner.store.valid_count()
    }

    pub fn statistics(&self) -> Statistics {
        self.inner
            .store
            .statistics(self.checked_count(), self.total_count())
    }

    /// Export the valid records. Returns the number written.
    pub fn export_valid<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let written = self.inner.store.export_valid(&path)?;
        self.emit_status(format!(
            "Exported {} valid proxies to {}",
            written,
            path.as_ref().display()
        ));
        Ok(written)
    }

    /// Export the valid records of one kind. Returns the number written.
    pub fn export_by_type<P: AsRef<Path>>(&self, path: P, kind: ProxyType) -> Result<usize> {
        let written = self.inner.store.export_by_type(&path, kind)?;
        self.emit_status(format!(
            "Exported {} {} proxies to {}",
            written,
            kind,
            path.as_ref().display()
        ));
        Ok(written)
    }

    fn schedule(&self, mut record: ProxyRecord) {
        let inner = Arc::clone(&self.inner);
        inner.in_flight.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let _guard = InFlightGuard(Arc::clone(&inner));

            let limiter = inner.limiter.read().expect("limiter lock poisoned").clone();
            // Acquire fails only once cancel has closed the pool.
            let Ok(_permit) = limiter.acquire_owned().await else {
                return;
            };

            if !wait_until_active(&inner).await {
                return;
            }

            let options = inner
                .config
                .read()
                .expect("config lock poisoned")
                .probe_options();
            probe::run(&mut record, &options, inner.transport.as_ref()).await;

            inner.store.push(record.clone());
            let _ = inner.events.send(EngineEvent::Checked(record));

            let checked = inner.checked.fetch_add(1, Ordering::SeqCst) + 1;
            let total = inner.total.load(Ordering::SeqCst);
            let _ = inner.events.send(EngineEvent::Status(format!(
                "Progress: {}/{} ({} valid)",
                checked,
                total,
                inner.store.valid_count()
            )));

            // The fetch-add above hands each task a distinct count, so at
            // most one of them observes the equality and fires completion.
            if checked == total {
                let _ = inner.events.send(EngineEvent::Completed);
            }
        });
    }

    fn pass_active(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst) > 0
            || self.inner.checked.load(Ordering::SeqCst) < self.inner.total.load(Ordering::SeqCst)
    }

    fn read_config(&self) -> EngineConfig {
        self.inner.config.read().expect("config lock poisoned").clone()
    }

    fn emit_status(&self, message: String) {
        let _ = self.inner.events.send(EngineEvent::Status(message));
    }
}

struct InFlightGuard(Arc<EngineInner>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Park until the engine is neither paused nor canceled. Returns false
/// when the pass was canceled.
async fn wait_until_active(inner: &EngineInner) -> bool {
    let mut control = inner.control.subscribe();
    loop {
        let flags = *control.borrow_and_update();
        if flags.canceled {
            return false;
        }
        if !flags.paused {
            return true;
        }
        if control.changed().await.is_err() {
            return false;
        }
    }
}
