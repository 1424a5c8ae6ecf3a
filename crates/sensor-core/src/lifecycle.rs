//! Start/stop lifecycle shared by producers, the hub ticker and the sink.
//!
//! Each background task gets a [`CancelToken`]. Stopping drops the sending
//! half of the token's channel, which wakes every wait the task is parked on.
//! The stop call then waits for the task to report its exit, bounded by a
//! timeout; a task that does not exit in time is reported as still running
//! and left alone.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const START_GRACE: Duration = Duration::from_secs(2);
pub const STOP_TIMEOUT_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Already running or still stopping; nothing was spawned
    AlreadyRunning,
    /// The OS refused to spawn the worker thread
    SpawnFailed,
    /// The task's wake interval is zero; nothing was spawned
    InvalidInterval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
    /// The task did not exit within the timeout
    StillRunning,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifecycleConfig {
    /// Upper bound on how long `start` waits for the loop to begin
    pub start_grace: Duration,
    /// Stop waits at most `stop_timeout_factor` wake intervals
    pub stop_timeout_factor: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            start_grace: START_GRACE,
            stop_timeout_factor: STOP_TIMEOUT_FACTOR,
        }
    }
}

impl LifecycleConfig {
    pub fn stop_timeout(&self, interval: Duration) -> Duration {
        interval.mul_f64(self.stop_timeout_factor.max(0.0))
    }
}

/// Cancellation signal observed by a background task at its wait points.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    /// Create a token together with the handle that cancels it on drop.
    pub fn pair() -> (Sender<()>, Self) {
        let (tx, rx) = bounded(0);
        (tx, Self { rx })
    }

    /// Sleep for `timeout` unless cancelled first. Returns `true` when
    /// cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        !matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }

    pub fn is_cancelled(&self) -> bool {
        !matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Channel that becomes ready once cancelled, for use in `select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

/// Handed to the task body; signalling it releases the caller of `start`.
pub struct Ready {
    tx: Sender<()>,
}

impl Ready {
    pub fn signal(self) {
        let _ = self.tx.try_send(());
    }
}

struct Task {
    cancel: Option<Sender<()>>,
    exited: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl Task {
    fn has_exited(&self) -> bool {
        matches!(self.exited.try_recv(), Err(TryRecvError::Disconnected))
    }
}

#[derive(Default)]
struct Inner {
    state: LifecycleState,
    task: Option<Task>,
}

/// Owns at most one background thread and its state machine
/// `Idle -> Running -> Stopping -> Stopped`. A stopped lifecycle can be
/// started again.
pub struct Lifecycle {
    name: String,
    inner: Mutex<Inner>,
}

impl Lifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        let mut inner = self.lock();
        Self::reap(&self.name, &mut inner);
        inner.state
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Spawn `body` on a named thread unless a task is already active, then
    /// wait up to `grace` for the body to signal [`Ready`].
    pub fn start<F>(&self, grace: Duration, body: F) -> StartOutcome
    where
        F: FnOnce(CancelToken, Ready) + Send + 'static,
    {
        let mut inner = self.lock();
        Self::reap(&self.name, &mut inner);
        if matches!(
            inner.state,
            LifecycleState::Running | LifecycleState::Stopping
        ) {
            warn!(task = %self.name, state = ?inner.state, "Thread is already running");
            return StartOutcome::AlreadyRunning;
        }

        let (cancel_tx, token) = CancelToken::pair();
        let (exit_tx, exit_rx) = bounded::<()>(0);
        let (ready_tx, ready_rx) = bounded::<()>(1);
        let ready = Ready { tx: ready_tx };

        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                let _exit_guard = exit_tx;
                body(token, ready);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!(task = %self.name, error = %e, "Failed to spawn thread");
                return StartOutcome::SpawnFailed;
            }
        };

        info!(task = %self.name, "Starting thread");
        inner.task = Some(Task {
            cancel: Some(cancel_tx),
            exited: exit_rx,
            thread: Some(handle),
        });
        inner.state = LifecycleState::Running;
        drop(inner);

        if let Err(RecvTimeoutError::Timeout) = ready_rx.recv_timeout(grace) {
            debug!(
                task = %self.name,
                grace_ms = grace.as_millis() as u64,
                "Thread not ready within grace period"
            );
        }
        StartOutcome::Started
    }

    /// Cancel the running task and wait up to `timeout` for it to exit.
    pub fn stop(&self, timeout: Duration) -> StopOutcome {
        let exited = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            Self::reap(&self.name, inner);
            if matches!(inner.state, LifecycleState::Idle | LifecycleState::Stopped) {
                debug!(task = %self.name, "Stop requested but thread is not running");
                return StopOutcome::NotRunning;
            }
            let Some(task) = inner.task.as_mut() else {
                inner.state = LifecycleState::Stopped;
                return StopOutcome::NotRunning;
            };
            task.cancel.take();
            inner.state = LifecycleState::Stopping;
            task.exited.clone()
        };

        if let Err(RecvTimeoutError::Timeout) = exited.recv_timeout(timeout) {
            warn!(
                task = %self.name,
                timeout_ms = timeout.as_millis() as u64,
                "Thread is still running"
            );
            return StopOutcome::StillRunning;
        }

        let mut inner = self.lock();
        Self::reap(&self.name, &mut inner);
        info!(task = %self.name, "Thread has stopped");
        StopOutcome::Stopped
    }

    /// Join a task that has already exited and mark the lifecycle stopped.
    fn reap(name: &str, inner: &mut Inner) {
        let exited = inner.task.as_ref().is_some_and(Task::has_exited);
        if !exited {
            return;
        }
        if let Some(mut task) = inner.task.take() {
            if let Some(handle) = task.thread.take() {
                if handle.join().is_err() {
                    error!(task = %name, "Thread panicked");
                }
            }
        }
        inner.state = LifecycleState::Stopped;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        // Dropping the cancel sender wakes the task; the thread is detached.
        if let Some(task) = self.lock().task.as_mut() {
            task.cancel.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn ticking(counter: Arc<AtomicUsize>) -> impl FnOnce(CancelToken, Ready) + Send + 'static {
        move |cancel, ready| {
            ready.signal();
            while !cancel.wait(Duration::from_millis(10)) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[test]
    fn start_twice_spawns_once() {
        let lifecycle = Lifecycle::new("test-worker");
        let spawned = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&spawned);
        let first = lifecycle.start(START_GRACE, move |cancel, ready| {
            count.fetch_add(1, Ordering::SeqCst);
            ready.signal();
            cancel.wait(Duration::from_secs(60));
        });
        let count = Arc::clone(&spawned);
        let second = lifecycle.start(START_GRACE, move |_, ready| {
            count.fetch_add(1, Ordering::SeqCst);
            ready.signal();
        });

        assert_eq!(first, StartOutcome::Started);
        assert_eq!(second, StartOutcome::AlreadyRunning);
        assert_eq!(spawned.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.stop(Duration::from_secs(1)), StopOutcome::Stopped);
    }

    #[test]
    fn stop_when_idle_is_noop() {
        let lifecycle = Lifecycle::new("idle");
        assert_eq!(lifecycle.stop(Duration::from_millis(10)), StopOutcome::NotRunning);
        assert_eq!(lifecycle.state(), LifecycleState::Idle);
    }

    #[test]
    fn stop_interrupts_long_wait() {
        let lifecycle = Lifecycle::new("sleeper");
        lifecycle.start(START_GRACE, |cancel, ready| {
            ready.signal();
            cancel.wait(Duration::from_secs(60));
        });

        let begin = Instant::now();
        assert_eq!(lifecycle.stop(Duration::from_secs(5)), StopOutcome::Stopped);
        assert!(begin.elapsed() < Duration::from_secs(1));
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert_eq!(lifecycle.stop(Duration::from_millis(10)), StopOutcome::NotRunning);
    }

    #[test]
    fn uncooperative_task_reports_still_running() {
        let lifecycle = Lifecycle::new("stubborn");
        lifecycle.start(START_GRACE, |_cancel, ready| {
            ready.signal();
            thread::sleep(Duration::from_millis(300));
        });

        assert_eq!(
            lifecycle.stop(Duration::from_millis(20)),
            StopOutcome::StillRunning
        );
        assert_eq!(lifecycle.state(), LifecycleState::Stopping);
        assert_eq!(
            lifecycle.start(START_GRACE, |_, _| {}),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(lifecycle.stop(Duration::from_secs(2)), StopOutcome::Stopped);
    }

    #[test]
    fn can_restart_after_stop() {
        let lifecycle = Lifecycle::new("restart");
        let counter = Arc::new(AtomicUsize::new(0));
        assert_eq!(
            lifecycle.start(START_GRACE, ticking(Arc::clone(&counter))),
            StartOutcome::Started
        );
        assert_eq!(lifecycle.stop(Duration::from_secs(1)), StopOutcome::Stopped);
        assert_eq!(
            lifecycle.start(START_GRACE, ticking(Arc::clone(&counter))),
            StartOutcome::Started
        );
        assert!(lifecycle.is_running());
        assert_eq!(lifecycle.stop(Duration::from_secs(1)), StopOutcome::Stopped);
    }

    #[test]
    fn token_reports_cancellation() {
        let (tx, token) = CancelToken::pair();
        assert!(!token.is_cancelled());
        assert!(!token.wait(Duration::from_millis(1)));
        drop(tx);
        assert!(token.is_cancelled());
        assert!(token.wait(Duration::from_secs(10)));
    }
}
