//! Admission Controller - priority queues, concurrency ceiling, circuit breaker
//!
//! Every inbound request passes through here before it may touch the
//! database. The controller either:
//! 1. Rejects immediately (breaker open)
//! 2. Admits immediately (below the concurrency ceiling)
//! 3. Queues into one of four priority classes and dispatches later
//!
//! ARCHITECTURE:
//! ```text
//! Request → admit(priority) → breaker check:
//!     │
//!     ├─ OPEN, timeout not elapsed → reject (retry-after)
//!     ├─ OPEN, timeout elapsed → HALF_OPEN, admit single trial
//!     │
//!     ├─ active < ceiling → admit, return RequestPermit
//!     │
//!     └─ at ceiling → enqueue [critical|high|normal|low] FIFO,
//!        await dispatch grant (bounded wait)
//!
//! Permit completion/drop → decrement active → record breaker outcome
//!     → drain queues in strict priority order
//! ```
//!
//! The permit is RAII: no matter how the handler exits (success, error,
//! timeout, panic, cancellation) the active count is decremented exactly
//! once, so the ceiling can never leak.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use presensi_common::config::AdmissionSettings;
use presensi_common::error::ErrorClass;

use crate::metrics;

// ═══════════════════════════════════════════════════════════════════════════
// PRIORITY CLASSES
// ═══════════════════════════════════════════════════════════════════════════

/// Priority class of an inbound request.
///
/// Strict ordering: critical drains before high, high before normal, normal
/// before low. FIFO within a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    fn index(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

/// Outcome of an admitted request, reported on completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(ErrorClass),
    Timeout,
}

impl Outcome {
    /// Whether this outcome counts as a failure for breaker purposes.
    ///
    /// Business failures (constraint violations etc.) say nothing about the
    /// health of the infrastructure and are counted as completions.
    fn is_breaker_failure(self) -> bool {
        matches!(
            self,
            Outcome::Timeout | Outcome::Failure(ErrorClass::Infrastructure)
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Concurrency ceiling for in-flight requests
    pub max_concurrent_requests: usize,
    /// Total queued requests across all priority classes
    pub max_queued_requests: usize,
    /// How long a request may wait in queue before rejection
    pub queue_wait_timeout: Duration,
    /// Deadline for an admitted handler to complete
    pub request_timeout: Duration,
    /// Circuit breaker parameters
    pub breaker: BreakerConfig,
    /// Arrivals per second that count as a burst
    pub burst_threshold: usize,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failure ratio over the rolling window that trips the breaker
    pub failure_ratio: f64,
    /// Span of the rolling outcome window
    pub window: Duration,
    /// Minimum completions in the window before the breaker may trip
    pub min_samples: usize,
    /// How long the breaker stays open before a half-open trial
    pub open_timeout: Duration,
}

impl From<&AdmissionSettings> for AdmissionConfig {
    fn from(s: &AdmissionSettings) -> Self {
        Self {
            max_concurrent_requests: s.max_concurrent_requests,
            max_queued_requests: s.max_queued_requests,
            queue_wait_timeout: Duration::from_secs(s.queue_wait_timeout_secs),
            request_timeout: Duration::from_secs(s.request_timeout_secs),
            breaker: BreakerConfig {
                failure_ratio: s.breaker_failure_ratio,
                window: Duration::from_secs(s.breaker_window_secs),
                min_samples: s.breaker_min_samples,
                open_timeout: Duration::from_secs(s.breaker_open_timeout_secs),
            },
            burst_threshold: s.burst_threshold,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

enum BreakerDecision {
    Admit,
    AdmitTrial,
    Reject { retry_after: Duration },
}

struct Breaker {
    cfg: BreakerConfig,
    state: BreakerState,
    /// Rolling window of (completed_at, counted_failure)
    window: VecDeque<(Instant, bool)>,
    failure_count: u64,
    success_count: u64,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl Breaker {
    fn new(cfg: BreakerConfig) -> Self {
        Self {
            cfg,
            state: BreakerState::Closed,
            window: VecDeque::new(),
            failure_count: 0,
            success_count: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    fn check_admit(&mut self, now: Instant) -> BreakerDecision {
        match self.state {
            BreakerState::Closed => BreakerDecision::Admit,
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|t| now.duration_since(t))
                    .unwrap_or(self.cfg.open_timeout);
                if elapsed >= self.cfg.open_timeout {
                    self.transition(BreakerState::HalfOpen);
                    self.trial_in_flight = true;
                    BreakerDecision::AdmitTrial
                } else {
                    BreakerDecision::Reject {
                        retry_after: self.cfg.open_timeout - elapsed,
                    }
                }
            }
            BreakerState::HalfOpen => {
                if self.trial_in_flight {
                    // One trial at a time; everyone else waits out the timeout
                    BreakerDecision::Reject {
                        retry_after: self.cfg.open_timeout,
                    }
                } else {
                    self.trial_in_flight = true;
                    BreakerDecision::AdmitTrial
                }
            }
        }
    }

    fn record(&mut self, now: Instant, failure: bool, was_trial: bool) {
        if was_trial {
            self.trial_in_flight = false;
            if failure {
                // Failed trial reopens and restarts the open timer
                self.opened_at = Some(now);
                self.transition(BreakerState::Open);
            } else {
                self.window.clear();
                self.failure_count = 0;
                self.success_count = 0;
                self.opened_at = None;
                self.transition(BreakerState::Closed);
            }
            return;
        }

        // Stragglers completing while the breaker is open don't change state
        if self.state == BreakerState::Open {
            return;
        }

        self.window.push_back((now, failure));
        if failure {
            self.failure_count += 1;
        } else {
            self.success_count += 1;
        }
        self.prune(now);

        if self.state == BreakerState::Closed {
            let total = self.failure_count + self.success_count;
            if total as usize >= self.cfg.min_samples {
                let ratio = self.failure_count as f64 / total as f64;
                if ratio >= self.cfg.failure_ratio {
                    warn!(
                        failures = self.failure_count,
                        total = total,
                        ratio = format!("{:.2}", ratio),
                        "Circuit breaker tripped"
                    );
                    self.opened_at = Some(now);
                    self.transition(BreakerState::Open);
                }
            }
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&(at, failure)) = self.window.front() {
            if now.duration_since(at) <= self.cfg.window {
                break;
            }
            self.window.pop_front();
            if failure {
                self.failure_count -= 1;
            } else {
                self.success_count -= 1;
            }
        }
    }

    fn reset(&mut self) {
        self.window.clear();
        self.failure_count = 0;
        self.success_count = 0;
        self.opened_at = None;
        self.trial_in_flight = false;
        self.transition(BreakerState::Closed);
    }

    fn transition(&mut self, to: BreakerState) {
        if self.state != to {
            info!(from = self.state.as_str(), to = to.as_str(), "Circuit breaker transition");
            self.state = to;
            metrics::set_breaker_state(to.as_str());
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// BURST DETECTION
// ═══════════════════════════════════════════════════════════════════════════

struct BurstWindow {
    threshold: usize,
    arrivals: VecDeque<Instant>,
    in_burst: bool,
    burst_count: u64,
    last_burst: Option<Instant>,
}

impl BurstWindow {
    fn new(threshold: usize) -> Self {
        Self {
            threshold,
            arrivals: VecDeque::new(),
            in_burst: false,
            burst_count: 0,
            last_burst: None,
        }
    }

    /// Record an arrival; edge-triggered so a sustained burst counts once
    fn record(&mut self, now: Instant) {
        self.arrivals.push_back(now);
        while let Some(&front) = self.arrivals.front() {
            if now.duration_since(front) <= Duration::from_secs(1) {
                break;
            }
            self.arrivals.pop_front();
        }

        let rate = self.arrivals.len();
        if rate > self.threshold {
            if !self.in_burst {
                self.in_burst = true;
                self.burst_count += 1;
                self.last_burst = Some(now);
                metrics::record_burst();
                warn!(rate_per_sec = rate, threshold = self.threshold, "Traffic burst detected");
            }
        } else if self.in_burst && rate <= self.threshold / 2 {
            self.in_burst = false;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// ADMISSION ERRORS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum AdmitError {
    /// Circuit breaker is open
    #[error("circuit breaker open, retry after {} ms", retry_after.as_millis())]
    BreakerOpen { retry_after: Duration },

    /// All priority queues are at capacity and nothing lower could be shed
    #[error("admission queue full for {} requests", priority.as_str())]
    QueueFull { priority: Priority },

    /// Shed from the queue to make room for higher-priority work
    #[error("shed from admission queue by higher-priority work")]
    Shed,

    /// Timed out waiting in the queue
    #[error("timed out after {waited_ms} ms waiting for admission")]
    QueueTimeout { waited_ms: u64 },
}

impl AdmitError {
    /// Stable code for the HTTP error body
    pub fn code(&self) -> &'static str {
        match self {
            AdmitError::BreakerOpen { .. } => "BREAKER_OPEN",
            AdmitError::QueueFull { .. } => "QUEUE_FULL",
            AdmitError::Shed => "SHED",
            AdmitError::QueueTimeout { .. } => "QUEUE_TIMEOUT",
        }
    }

    /// Retry hint in seconds, where one applies
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AdmitError::BreakerOpen { retry_after } => Some(retry_after.as_secs().max(1)),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STATS SNAPSHOTS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct QueueDepths {
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub failure_count: u64,
    pub success_count: u64,
    /// How long the breaker has been open, if it is
    pub open_for_ms: Option<u64>,
    pub trial_in_flight: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStats {
    pub active_requests: usize,
    pub max_concurrent_requests: usize,
    pub queued: QueueDepths,
    pub breaker: BreakerStats,
    pub bursts_detected: u64,
    pub last_burst_ms_ago: Option<u64>,
    pub total_admitted: u64,
    pub total_rejected: u64,
    pub total_shed: u64,
    pub total_queue_timeouts: u64,
}

// ═══════════════════════════════════════════════════════════════════════════
// ADMISSION CONTROLLER
// ═══════════════════════════════════════════════════════════════════════════

struct Waiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

struct Inner {
    active: usize,
    queues: [VecDeque<Waiter>; 4],
    breaker: Breaker,
    burst: BurstWindow,
}

impl Inner {
    fn total_queued(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }
}

struct Shared {
    cfg: AdmissionConfig,
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    total_admitted: AtomicU64,
    total_rejected: AtomicU64,
    total_shed: AtomicU64,
    total_queue_timeouts: AtomicU64,
}

/// The admission controller. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct AdmissionController {
    shared: Arc<Shared>,
}

impl AdmissionController {
    pub fn new(cfg: AdmissionConfig) -> Self {
        let breaker = Breaker::new(cfg.breaker.clone());
        let burst = BurstWindow::new(cfg.burst_threshold);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    active: 0,
                    queues: [
                        VecDeque::new(),
                        VecDeque::new(),
                        VecDeque::new(),
                        VecDeque::new(),
                    ],
                    breaker,
                    burst,
                }),
                cfg,
                next_id: AtomicU64::new(0),
                total_admitted: AtomicU64::new(0),
                total_rejected: AtomicU64::new(0),
                total_shed: AtomicU64::new(0),
                total_queue_timeouts: AtomicU64::new(0),
            }),
        }
    }

    /// Deadline the HTTP layer applies to each admitted handler
    pub fn request_timeout(&self) -> Duration {
        self.shared.cfg.request_timeout
    }

    /// Admit a request, queueing it if the ceiling is reached.
    ///
    /// On success the returned [`RequestPermit`] must be completed (or
    /// dropped) to free the slot.
    pub async fn admit(&self, priority: Priority) -> Result<RequestPermit, AdmitError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let enqueued_at = Instant::now();

        let mut rx = {
            let mut inner = self.shared.inner.lock();
            let now = Instant::now();
            inner.burst.record(now);

            match inner.breaker.check_admit(now) {
                BreakerDecision::Reject { retry_after } => {
                    self.shared.total_rejected.fetch_add(1, Ordering::Relaxed);
                    metrics::record_rejection("breaker_open");
                    debug!(id, priority = priority.as_str(), "Rejected: breaker open");
                    return Err(AdmitError::BreakerOpen { retry_after });
                }
                BreakerDecision::AdmitTrial => {
                    // The single half-open trial bypasses the ceiling so
                    // recovery cannot starve behind queued work.
                    inner.active += 1;
                    metrics::set_active_requests(inner.active);
                    self.shared.total_admitted.fetch_add(1, Ordering::Relaxed);
                    info!(id, priority = priority.as_str(), "Admitted as breaker trial");
                    return Ok(self.permit(id, priority, true));
                }
                BreakerDecision::Admit => {}
            }

            if inner.active < self.shared.cfg.max_concurrent_requests {
                inner.active += 1;
                metrics::set_active_requests(inner.active);
                self.shared.total_admitted.fetch_add(1, Ordering::Relaxed);
                metrics::record_admission(priority.as_str());
                return Ok(self.permit(id, priority, false));
            }

            // At the ceiling: queue, shedding lower-priority work if needed
            if inner.total_queued() >= self.shared.cfg.max_queued_requests
                && !shed_below(&mut inner, priority)
            {
                self.shared.total_rejected.fetch_add(1, Ordering::Relaxed);
                metrics::record_rejection("queue_full");
                warn!(
                    id,
                    priority = priority.as_str(),
                    queued = inner.total_queued(),
                    "Rejected: admission queue full"
                );
                return Err(AdmitError::QueueFull { priority });
            }

            let (tx, rx) = oneshot::channel();
            let qi = priority.index();
            inner.queues[qi].push_back(Waiter { id, tx });
            metrics::set_queue_depth(priority.as_str(), inner.queues[qi].len());
            debug!(
                id,
                priority = priority.as_str(),
                depth = inner.queues[qi].len(),
                "Request queued"
            );
            rx
        };

        match tokio::time::timeout(self.shared.cfg.queue_wait_timeout, &mut rx).await {
            Ok(Ok(())) => {
                // Dispatched by a completing request; active already counted
                let waited = enqueued_at.elapsed();
                self.shared.total_admitted.fetch_add(1, Ordering::Relaxed);
                metrics::record_admission(priority.as_str());
                metrics::observe_queue_wait(waited.as_secs_f64());
                debug!(id, wait_ms = waited.as_millis() as u64, "Dispatched from queue");
                Ok(self.permit(id, priority, false))
            }
            Ok(Err(_)) => {
                // Sender dropped: we were shed to make room for higher work
                self.shared.total_shed.fetch_add(1, Ordering::Relaxed);
                metrics::record_rejection("shed");
                Err(AdmitError::Shed)
            }
            Err(_) => {
                let mut inner = self.shared.inner.lock();
                let qi = priority.index();
                if let Some(pos) = inner.queues[qi].iter().position(|w| w.id == id) {
                    let _ = inner.queues[qi].remove(pos);
                    metrics::set_queue_depth(priority.as_str(), inner.queues[qi].len());
                } else if rx.try_recv().is_ok() {
                    // Lost the race: a grant arrived while we were timing
                    // out. Give the slot straight back.
                    inner.active -= 1;
                    self.drain_locked(&mut inner);
                }
                drop(inner);
                self.shared.total_queue_timeouts.fetch_add(1, Ordering::Relaxed);
                metrics::record_rejection("queue_timeout");
                warn!(id, priority = priority.as_str(), "Timed out waiting for admission");
                Err(AdmitError::QueueTimeout {
                    waited_ms: enqueued_at.elapsed().as_millis() as u64,
                })
            }
        }
    }

    /// Manually reset the circuit breaker (admin endpoint)
    pub fn reset_breaker(&self) {
        let mut inner = self.shared.inner.lock();
        inner.breaker.reset();
        info!("Circuit breaker manually reset");
    }

    /// Current breaker state
    pub fn breaker_state(&self) -> BreakerState {
        self.shared.inner.lock().breaker.state
    }

    /// Snapshot of the full admission state
    pub fn stats(&self) -> AdmissionStats {
        let inner = self.shared.inner.lock();
        let now = Instant::now();
        AdmissionStats {
            active_requests: inner.active,
            max_concurrent_requests: self.shared.cfg.max_concurrent_requests,
            queued: QueueDepths {
                critical: inner.queues[0].len(),
                high: inner.queues[1].len(),
                normal: inner.queues[2].len(),
                low: inner.queues[3].len(),
                total: inner.total_queued(),
            },
            breaker: BreakerStats {
                state: inner.breaker.state,
                failure_count: inner.breaker.failure_count,
                success_count: inner.breaker.success_count,
                open_for_ms: inner
                    .breaker
                    .opened_at
                    .filter(|_| inner.breaker.state == BreakerState::Open)
                    .map(|t| now.duration_since(t).as_millis() as u64),
                trial_in_flight: inner.breaker.trial_in_flight,
            },
            bursts_detected: inner.burst.burst_count,
            last_burst_ms_ago: inner
                .burst
                .last_burst
                .map(|t| now.duration_since(t).as_millis() as u64),
            total_admitted: self.shared.total_admitted.load(Ordering::Relaxed),
            total_rejected: self.shared.total_rejected.load(Ordering::Relaxed),
            total_shed: self.shared.total_shed.load(Ordering::Relaxed),
            total_queue_timeouts: self.shared.total_queue_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Compact stats for the X-Load-Balancer-Stats response header
    pub fn header_stats(&self) -> serde_json::Value {
        let s = self.stats();
        serde_json::json!({
            "active": s.active_requests,
            "max": s.max_concurrent_requests,
            "queued": s.queued.total,
            "breaker": s.breaker.state,
        })
    }

    fn permit(&self, id: u64, priority: Priority, trial: bool) -> RequestPermit {
        RequestPermit {
            ctrl: self.clone(),
            id,
            priority,
            trial,
            completed: false,
        }
    }

    fn release(&self, outcome: Outcome, was_trial: bool) {
        let mut inner = self.shared.inner.lock();
        debug_assert!(inner.active > 0, "release without matching admit");
        inner.active = inner.active.saturating_sub(1);
        let now = Instant::now();
        inner
            .breaker
            .record(now, outcome.is_breaker_failure(), was_trial);
        self.drain_locked(&mut inner);
        metrics::set_active_requests(inner.active);
    }

    /// Drain queued requests in strict priority order, FIFO within a class
    fn drain_locked(&self, inner: &mut Inner) {
        while inner.active < self.shared.cfg.max_concurrent_requests {
            // Breaker may have opened since these were queued; recovery
            // trials are granted only to fresh arrivals in admit()
            if inner.breaker.state != BreakerState::Closed {
                break;
            }

            let Some((qi, waiter)) = pop_highest(&mut inner.queues) else {
                break;
            };
            inner.active += 1;
            if waiter.tx.send(()).is_err() {
                // Waiter gave up (queue-wait timeout); take the slot back
                inner.active -= 1;
                continue;
            }
            metrics::set_queue_depth(Priority::ALL[qi].as_str(), inner.queues[qi].len());
        }
    }
}

fn pop_highest(queues: &mut [VecDeque<Waiter>; 4]) -> Option<(usize, Waiter)> {
    for (qi, queue) in queues.iter_mut().enumerate() {
        if let Some(w) = queue.pop_front() {
            return Some((qi, w));
        }
    }
    None
}

/// Shed the newest entry of the lowest queued class strictly below
/// `newcomer`, making room for it. Returns false if nothing lower is queued.
fn shed_below(inner: &mut Inner, newcomer: Priority) -> bool {
    for qi in ((newcomer.index() + 1)..4).rev() {
        if let Some(victim) = inner.queues[qi].pop_back() {
            debug!(
                victim_id = victim.id,
                victim_priority = Priority::ALL[qi].as_str(),
                newcomer = newcomer.as_str(),
                "Shedding queued request for higher-priority work"
            );
            metrics::set_queue_depth(Priority::ALL[qi].as_str(), inner.queues[qi].len());
            // Dropping the sender resolves the waiter with Shed
            return true;
        }
    }
    false
}

// ═══════════════════════════════════════════════════════════════════════════
// REQUEST PERMIT
// ═══════════════════════════════════════════════════════════════════════════

/// RAII handle for an admitted request.
///
/// Call [`RequestPermit::complete`] with the request outcome. If the permit
/// is dropped without completing (panic, cancellation), the slot is released
/// and the drop is accounted as an infrastructure failure.
pub struct RequestPermit {
    ctrl: AdmissionController,
    id: u64,
    priority: Priority,
    trial: bool,
    completed: bool,
}

impl std::fmt::Debug for RequestPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPermit")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("trial", &self.trial)
            .finish()
    }
}

impl RequestPermit {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Report the outcome, decrement the active count, and drain the queues
    pub fn complete(mut self, outcome: Outcome) {
        self.completed = true;
        metrics::record_completion(self.priority.as_str(), outcome_label(outcome));
        self.ctrl.release(outcome, self.trial);
    }
}

impl Drop for RequestPermit {
    fn drop(&mut self) {
        if !self.completed {
            warn!(id = self.id, "Request permit dropped without completion");
            self.ctrl
                .release(Outcome::Failure(ErrorClass::Infrastructure), self.trial);
        }
    }
}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Success => "success",
        Outcome::Failure(ErrorClass::Business) => "business_error",
        Outcome::Failure(ErrorClass::Infrastructure) => "failure",
        Outcome::Timeout => "timeout",
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
