//! Timer-driven periodic capture.
//!
//! The cadence source stands in for a hardware alarm: an interval task
//! whose tick body does the minimum an interrupt handler may: look up the
//! registered job owner and spawn one short-lived hand-off task. All
//! blocking work (gate acquisition, capture, export, restarting the tick
//! flow) happens in the hand-off task, which terminates itself after one
//! cycle.

use crate::error::CamError;
use crate::gate::SensorGate;
use crate::snapshot::{self, Exporter};
use crate::storage::StorageMedium;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(1);

/// Lifetime-scoped registration of "the current periodic job owner".
///
/// The alarm's tick body resolves the owner through this slot rather than
/// a process global. At most one controller may hold a registration;
/// a second controller registering into the same slot is a programming
/// error and panics.
pub struct OwnerSlot {
    current: Mutex<Option<(u64, Weak<JobRuntime>)>>,
}

impl OwnerSlot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(None),
        })
    }

    fn register(&self, controller_id: u64, runtime: &Arc<JobRuntime>) {
        let mut current = self.current.lock();
        if let Some((owner_id, weak)) = current.as_ref() {
            if *owner_id != controller_id && weak.upgrade().is_some() {
                panic!("periodic job owner already registered by another controller");
            }
        }
        *current = Some((controller_id, Arc::downgrade(runtime)));
    }

    fn deregister(&self, controller_id: u64) {
        let mut current = self.current.lock();
        if matches!(current.as_ref(), Some((owner_id, _)) if *owner_id == controller_id) {
            *current = None;
        }
    }

    fn lookup(&self) -> Option<Arc<JobRuntime>> {
        self.current
            .lock()
            .as_ref()
            .and_then(|(_, weak)| weak.upgrade())
    }
}

/// State shared between the controller, the alarm task and in-flight
/// hand-off tasks.
struct JobRuntime {
    exporter: Arc<Exporter>,
    gate: Arc<SensorGate>,
    medium: Arc<dyn StorageMedium>,
    prefix: String,
    /// Tick delivery; cleared by the hand-off task for the duration of a
    /// capture so firings never overlap.
    ticking: AtomicBool,
    /// Alarm armed; cleared by `pause`, set by `resume`.
    enabled: AtomicBool,
    captures: AtomicU64,
    failures: AtomicU64,
}

struct Job {
    alarm: JoinHandle<()>,
    runtime: Arc<JobRuntime>,
    period: Duration,
}

impl Drop for Job {
    fn drop(&mut self) {
        self.alarm.abort();
    }
}

/// The periodic-capture state machine: IDLE → ARMED → (tick) → CAPTURING →
/// ARMED, driven by [`start`](PeriodicCapture::start),
/// [`pause`](PeriodicCapture::pause), [`resume`](PeriodicCapture::resume)
/// and [`stop`](PeriodicCapture::stop).
pub struct PeriodicCapture {
    id: u64,
    exporter: Arc<Exporter>,
    gate: Arc<SensorGate>,
    slot: Arc<OwnerSlot>,
    // start/stop are serialized against each other; the capture path is
    // serialized separately by the sensor gate.
    job: tokio::sync::Mutex<Option<Job>>,
}

impl PeriodicCapture {
    pub fn new(exporter: Arc<Exporter>, gate: Arc<SensorGate>, slot: Arc<OwnerSlot>) -> Self {
        Self {
            id: NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed),
            exporter,
            gate,
            slot,
            job: tokio::sync::Mutex::new(None),
        }
    }

    /// Arms periodic capture. A zero period is a no-op that leaves any
    /// running job untouched. Otherwise the previous job (if any) is torn
    /// down deterministically before the new alarm is armed.
    pub async fn start(
        &self,
        period: Duration,
        medium: Arc<dyn StorageMedium>,
        prefix: Option<&str>,
    ) -> Result<(), CamError> {
        if period.is_zero() {
            return Ok(());
        }

        if !self.exporter.mounts().ensure_mounted(medium.as_ref()) {
            return Err(CamError::StorageUnmounted);
        }

        let prefix = match prefix {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => self.exporter.prefix().to_string(),
        };

        let mut job = self.job.lock().await;
        self.purge(&mut job).await;

        let runtime = Arc::new(JobRuntime {
            exporter: Arc::clone(&self.exporter),
            gate: Arc::clone(&self.gate),
            medium,
            prefix,
            ticking: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
            captures: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });
        self.slot.register(self.id, &runtime);

        let alarm = tokio::spawn(alarm_task(period, Arc::clone(&self.slot)));
        *job = Some(Job {
            alarm,
            runtime,
            period,
        });
        info!(period_s = %period.as_secs_f32(), "periodic capture armed");
        Ok(())
    }

    /// Temporarily suspends the capture cycle and closes the medium.
    pub async fn pause(&self) {
        let job = self.job.lock().await;
        if let Some(job) = job.as_ref() {
            job.runtime.enabled.store(false, Ordering::SeqCst);
            job.runtime.medium.unmount();
            info!("periodic capture paused");
        }
    }

    /// Resumes a paused capture cycle, reopening the medium first.
    pub async fn resume(&self) -> Result<(), CamError> {
        let job = self.job.lock().await;
        if let Some(job) = job.as_ref() {
            job.runtime.medium.mount()?;
            job.runtime.enabled.store(true, Ordering::SeqCst);
            info!("periodic capture resumed");
        }
        Ok(())
    }

    /// Releases the alarm and deregisters the owner. Safe to call with a
    /// hand-off task in flight: the gate is taken before the alarm is torn
    /// down, so no task still runs against the dismantled job.
    pub async fn stop(&self) {
        let mut job = self.job.lock().await;
        self.purge(&mut job).await;
        self.slot.deregister(self.id);
    }

    pub async fn is_running(&self) -> bool {
        self.job.lock().await.is_some()
    }

    pub async fn period(&self) -> Option<Duration> {
        self.job.lock().await.as_ref().map(|job| job.period)
    }

    /// Successful capture cycles of the current job.
    pub async fn capture_count(&self) -> u64 {
        match self.job.lock().await.as_ref() {
            Some(job) => job.runtime.captures.load(Ordering::SeqCst),
            None => 0,
        }
    }

    async fn purge(&self, job: &mut Option<Job>) {
        if let Some(job) = job.take() {
            if let Ok(permit) = self.gate.acquire(None).await {
                job.alarm.abort();
                drop(permit);
            }
            // Job::drop aborts the alarm as well, covering the closed-gate
            // path during shutdown.
        }
    }
}

impl Drop for PeriodicCapture {
    fn drop(&mut self) {
        self.slot.deregister(self.id);
        if let Ok(mut job) = self.job.try_lock() {
            job.take();
        }
    }
}

/// The alarm loop. Each tick is the "interrupt": no blocking, no I/O,
/// just owner lookup and hand-off spawn.
async fn alarm_task(period: Duration, slot: Arc<OwnerSlot>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick of a tokio interval completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(runtime) = slot.lookup() else {
            warn!("capture alarm fired with no registered owner");
            continue;
        };
        if !runtime.ticking.load(Ordering::SeqCst) || !runtime.enabled.load(Ordering::SeqCst) {
            continue;
        }
        tokio::spawn(handoff_task(runtime));
    }
}

/// One capture cycle, spawned per firing; terminates itself.
async fn handoff_task(runtime: Arc<JobRuntime>) {
    let permit = match runtime.gate.acquire(None).await {
        Ok(permit) => permit,
        Err(err) => {
            warn!(error = %err, "hand-off task could not take the sensor gate");
            return;
        }
    };

    // Hold tick delivery while the capture is in progress.
    runtime.ticking.store(false, Ordering::SeqCst);

    let name = format!("{}{}", runtime.prefix, snapshot::timestamp());
    match runtime
        .exporter
        .export_locked(runtime.medium.as_ref(), Some(&name))
    {
        Ok(file) => {
            runtime.captures.fetch_add(1, Ordering::SeqCst);
            debug!(file = %file, "periodic capture cycle complete");
        }
        Err(err) => {
            // A missed cycle, not a system fault.
            runtime.failures.fetch_add(1, Ordering::SeqCst);
            warn!(error = %err, "periodic capture cycle failed");
        }
    }

    runtime.ticking.store(true, Ordering::SeqCst);
    drop(permit);
}
