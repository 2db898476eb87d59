//! Fixed-period, cancellable loops for cluster ticks and matchmaker fill checks

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Outcome of timing one iteration against its period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// Finished early; sleep for the remainder
    Ahead(Duration),
    /// Took the whole period or longer; start the next iteration right away
    Lagging(Duration),
}

impl Pace {
    pub fn measure(period: Duration, elapsed: Duration) -> Self {
        match period.checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => Pace::Ahead(remaining),
            _ => Pace::Lagging(elapsed.saturating_sub(period)),
        }
    }
}

/// Spawn a loop that calls `tick` once per `period` until `cancel` fires.
///
/// Each iteration runs `tick` to completion, then sleeps for whatever is left of
/// the period. An overrun is logged and the next iteration starts immediately;
/// missed iterations are never replayed. Cancellation is observed between
/// iterations, so an in-flight tick always completes.
pub fn spawn_fixed_period<F>(
    label: String,
    period: Duration,
    cancel: CancellationToken,
    tick: F,
) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(run_fixed_period(label, period, cancel, tick))
}

/// A fixed-period loop running on an OS thread of its own
pub struct LoopThread {
    label: String,
    handle: thread::JoinHandle<()>,
}

impl LoopThread {
    /// Wait for the loop to exit without blocking the async workers
    pub async fn join(self) -> Result<(), JoinError> {
        let Self { label, handle } = self;
        tokio::task::spawn_blocking(move || {
            if let Err(cause) = handle.join() {
                warn!(loop_name = %label, "Loop thread panicked");
                std::panic::resume_unwind(cause);
            }
        })
        .await
    }
}

/// Like [`spawn_fixed_period`], but on a dedicated thread driving its own
/// current-thread runtime. Use it for ticks that do blocking work.
pub fn spawn_fixed_period_thread<F>(
    label: String,
    period: Duration,
    cancel: CancellationToken,
    tick: F,
) -> io::Result<LoopThread>
where
    F: FnMut() + Send + 'static,
{
    let name = label.clone();
    let handle = thread::Builder::new().name(label.clone()).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(loop_name = %name, error = %e, "Could not build loop runtime");
                return;
            }
        };
        runtime.block_on(run_fixed_period(name, period, cancel, tick));
    })?;

    Ok(LoopThread { label, handle })
}

async fn run_fixed_period<F>(label: String, period: Duration, cancel: CancellationToken, mut tick: F)
where
    F: FnMut(),
{
    debug!(loop_name = %label, period_ms = period.as_millis() as u64, "Fixed-period loop starting");

    while !cancel.is_cancelled() {
        let started = Instant::now();
        tick();

        match Pace::measure(period, started.elapsed()) {
            Pace::Ahead(remaining) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(remaining) => {}
                }
            }
            Pace::Lagging(behind) => {
                warn!(
                    loop_name = %label,
                    period_ms = period.as_millis() as u64,
                    behind_us = behind.as_micros() as u64,
                    "Loop is lagging behind schedule"
                );
                tokio::task::yield_now().await;
            }
        }
    }

    debug!(loop_name = %label, "Fixed-period loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn pace_splits_ahead_and_lagging() {
        let period = Duration::from_millis(10);
        assert_eq!(
            Pace::measure(period, Duration::from_millis(4)),
            Pace::Ahead(Duration::from_millis(6))
        );
        assert_eq!(
            Pace::measure(period, Duration::from_millis(10)),
            Pace::Lagging(Duration::ZERO)
        );
        assert_eq!(
            Pace::measure(period, Duration::from_millis(25)),
            Pace::Lagging(Duration::from_millis(15))
        );
    }

    #[tokio::test]
    async fn loop_ticks_until_cancelled() {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let counter = count.clone();
        let handle = spawn_fixed_period(
            "test".to_string(),
            Duration::from_millis(5),
            cancel.clone(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        handle.await.unwrap();

        let ticks = count.load(Ordering::SeqCst);
        assert!(ticks >= 2, "expected several ticks, got {ticks}");

        // Nothing runs after the loop has exited
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), ticks);
    }

    #[tokio::test]
    async fn dedicated_loop_runs_off_the_calling_thread() {
        let caller = thread::current().id();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let sink = seen.clone();
        let looped = spawn_fixed_period_thread(
            "dedicated".to_string(),
            Duration::from_millis(5),
            cancel.clone(),
            move || sink.lock().push((thread::current().id(), thread::current().name().map(String::from))),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        looped.join().await.unwrap();

        let seen = seen.lock();
        assert!(seen.len() >= 2);
        assert!(seen.iter().all(|(id, _)| *id != caller));
        assert!(seen.iter().all(|(_, name)| name.as_deref() == Some("dedicated")));
    }

    #[tokio::test]
    async fn overrunning_tick_does_not_replay_backlog() {
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let counter = count.clone();
        let started = Instant::now();
        let handle = spawn_fixed_period(
            "slow".to_string(),
            Duration::from_millis(1),
            cancel.clone(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
            },
        );

        tokio::time::sleep(Duration::from_millis(55)).await;
        cancel.cancel();
        handle.await.unwrap();

        // One tick per 10ms of wall time at most; no catch-up bursts
        let budget = started.elapsed().as_millis() as usize / 10 + 1;
        assert!(count.load(Ordering::SeqCst) <= budget);
    }
}
