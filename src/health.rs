//! Background liveness monitoring of the origin.
//!
//! # Lifecycle
//!
//! ```text
//! HealthMonitor::start ── probe once ──▶ Running ── stop() ──▶ Stopped
//!                                          ▲    │
//!                                          └────┘ set_probe(): stop, swap, probe once, restart
//! ```
//!
//! The monitor keeps one cached boolean. [`HealthMonitor::is_available`] reads
//! it under a short lock and never waits on a probe. Probes run outside that
//! lock, so a slow origin cannot stall readers.
//!
//! Loop lifecycle changes (`set_probe`, `stop`) are serialized by a second
//! async lock, and stopping is a rendezvous: the caller waits until the loop
//! task has observed cancellation and exited. At most one loop is ever alive.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::origin::Origin;

/// How often the default probe runs.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(10);

/// How long the default probe waits for a TCP connection.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Shortest probe period; shorter requests, zero included, are raised to it.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Longest probe period; longer requests are lowered to it so the first
/// deadline stays representable.
pub const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Brings `period` into `MIN_PERIOD..=MAX_PERIOD`.
fn effective_period(period: Duration) -> Duration {
    let clamped = period.clamp(MIN_PERIOD, MAX_PERIOD);
    if clamped != period {
        warn!(requested = ?period, effective = ?clamped, "health probe period out of range, clamped");
    }
    clamped
}

// ── Probes ────────────────────────────────────────────────────────────────────

/// A boxed future resolving to the probe verdict.
pub type ProbeFuture = Pin<Box<dyn Future<Output = bool> + Send + 'static>>;

/// A liveness check for an origin. `true` means available.
///
/// Implemented for any `Fn(Origin) -> impl Future<Output = bool>`:
///
/// ```rust
/// use revmux::{Origin, health::Probe};
///
/// fn assert_probe(_: impl Probe) {}
/// assert_probe(|_origin: Origin| async { true });
/// ```
pub trait Probe: Send + Sync + 'static {
    fn probe(&self, origin: Origin) -> ProbeFuture;
}

impl<F, Fut> Probe for F
where
    F: Fn(Origin) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    fn probe(&self, origin: Origin) -> ProbeFuture {
        Box::pin((self)(origin))
    }
}

/// The default probe: the origin is available if a TCP connection to
/// `host:port` opens within the timeout. The connection is closed at once.
#[derive(Clone, Copy, Debug)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Probe for TcpProbe {
    fn probe(&self, origin: Origin) -> ProbeFuture {
        let timeout = self.timeout;
        Box::pin(async move {
            let addr = origin.address();
            match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
                Ok(Ok(stream)) => {
                    drop(stream);
                    true
                }
                Ok(Err(e)) => {
                    debug!(%addr, error = %e, "health probe: connect failed");
                    false
                }
                Err(_) => {
                    debug!(%addr, ?timeout, "health probe: connect timed out");
                    false
                }
            }
        })
    }
}

// ── Probe loop ────────────────────────────────────────────────────────────────

/// The running probe loop: a cancellation sender and the task to join.
struct Worker {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Worker {
    fn spawn(origin: Origin, probe: Arc<dyn Probe>, period: Duration, status: Arc<Mutex<bool>>) -> Self {
        let (cancel, mut cancelled) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            // The synchronous probe already covered t = 0. `period` is clamped,
            // so neither `interval_at` nor the deadline addition can panic.
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // Cancellation is checked before each tick and again while the
                // probe runs, so a slow probe never delays `stop`.
                tokio::select! {
                    biased;
                    _ = &mut cancelled => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    biased;
                    _ = &mut cancelled => break,
                    available = probe.probe(origin.clone()) => record(&status, &origin, available),
                }
            }
            debug!(%origin, "health loop exited");
        });
        Self { cancel, task }
    }

    fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signals the loop and waits for it to exit.
    async fn stop(self) {
        let _ = self.cancel.send(());
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!(error = %e, "health loop panicked");
            }
        }
    }
}

// ── Monitor ───────────────────────────────────────────────────────────────────

struct Control {
    probe: Arc<dyn Probe>,
    period: Duration,
    worker: Option<Worker>,
}

/// Periodically probes one origin and caches whether it is reachable.
///
/// State sits behind two locks. The cached verdict has its own short
/// `std::sync::Mutex`, so [`is_available`](Self::is_available) never waits on
/// a probe or on a stop rendezvous. The probe, its period and the loop handle
/// share one `tokio::sync::Mutex`, which serializes `set_probe` and `stop`
/// and keeps at most one loop alive.
///
/// Dropping the monitor cancels its loop; the loop task exits on its next
/// poll. Call [`stop`](Self::stop) to wait for that explicitly.
pub struct HealthMonitor {
    origin: Origin,
    status: Arc<Mutex<bool>>,
    control: tokio::sync::Mutex<Control>,
}

impl HealthMonitor {
    /// Probes `origin` once with `probe`, then starts probing every `period`.
    ///
    /// Must be called within a tokio runtime.
    pub async fn start(origin: Origin, probe: impl Probe, period: Duration) -> Self {
        Self::start_shared(origin, Arc::new(probe), period).await
    }

    pub(crate) async fn start_shared(origin: Origin, probe: Arc<dyn Probe>, period: Duration) -> Self {
        let period = effective_period(period);
        let available = probe.probe(origin.clone()).await;
        info!(%origin, available, ?period, "health monitor started");

        let status = Arc::new(Mutex::new(available));
        let worker = Worker::spawn(origin.clone(), Arc::clone(&probe), period, Arc::clone(&status));
        Self {
            origin,
            status,
            control: tokio::sync::Mutex::new(Control { probe, period, worker: Some(worker) }),
        }
    }

    /// The result of the most recent probe.
    pub fn is_available(&self) -> bool {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// The interval of the current probe loop, after clamping.
    pub async fn period(&self) -> Duration {
        self.control.lock().await.period
    }

    /// Replaces the probe and its period. `period` is clamped to
    /// [`MIN_PERIOD`]`..=`[`MAX_PERIOD`].
    ///
    /// The running loop is stopped and joined, `probe` runs once so
    /// [`is_available`](Self::is_available) reflects it immediately, then a
    /// new loop starts. Works after [`stop`](Self::stop) as well.
    pub async fn set_probe(&self, probe: impl Probe, period: Duration) {
        let mut control = self.control.lock().await;
        if let Some(worker) = control.worker.take() {
            worker.stop().await;
        }
        let period = effective_period(period);
        control.probe = Arc::new(probe);
        control.period = period;

        let available = control.probe.probe(self.origin.clone()).await;
        record(&self.status, &self.origin, available);

        control.worker = Some(Worker::spawn(
            self.origin.clone(),
            Arc::clone(&control.probe),
            period,
            Arc::clone(&self.status),
        ));
        debug!(origin = %self.origin, ?period, "health probe replaced");
    }

    /// Stops the probe loop and waits for it to exit. Stopping twice is a no-op.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        if let Some(worker) = control.worker.take() {
            worker.stop().await;
            info!(origin = %self.origin, "health monitor stopped");
        }
    }

    /// Whether a probe loop is currently running. A loop that died is not.
    pub async fn is_running(&self) -> bool {
        self.control.lock().await.worker.as_ref().is_some_and(Worker::is_alive)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn record(status: &Mutex<bool>, origin: &Origin, available: bool) {
    let mut current = status.lock().unwrap_or_else(PoisonError::into_inner);
    if *current != available {
        if available {
            info!(%origin, "origin became available");
        } else {
            warn!(%origin, "origin became unavailable");
        }
    }
    *current = available;
}
