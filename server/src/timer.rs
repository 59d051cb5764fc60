use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

const TICK: Duration = Duration::from_secs(1);

/// Countdown for one round. Ticks roughly once per second with the seconds
/// remaining and runs the expiry callback at most once.
///
/// The timer does not decide whether the round may still be resolved; the
/// room checks that under its own lock when the expiry callback arrives.
#[derive(Debug)]
pub struct RoundTimer {
    deadline: Instant,
    stopped: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl RoundTimer {
    pub fn start<T, E>(duration: Duration, on_tick: T, on_expire: E) -> Self
    where
        T: Fn(u64) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let deadline = Instant::now() + duration;
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();

        let handle = tokio::spawn(async move {
            let mut ticks = interval(TICK);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                if flag.load(Ordering::Acquire) {
                    return;
                }
                let left = seconds_until(deadline);
                if left == 0 {
                    // whoever flips the flag first owns expiry
                    if !flag.swap(true, Ordering::AcqRel) {
                        on_expire();
                    }
                    return;
                }
                on_tick(left);
            }
        });

        RoundTimer {
            deadline,
            stopped,
            handle,
        }
    }

    /// Cancels ticking and suppresses expiry. Safe to call repeatedly and from
    /// any task, including from inside the expiry callback.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    /// Whole seconds left, from the wall clock rather than from ticks seen.
    pub fn time_left(&self) -> u64 {
        if self.is_running() {
            seconds_until(self.deadline)
        } else {
            0
        }
    }
}

impl Drop for RoundTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn seconds_until(deadline: Instant) -> u64 {
    let left = deadline.saturating_duration_since(Instant::now());
    // round up so "0" only shows once the deadline has really passed
    let secs = left.as_secs();
    if left.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn ticks_then_expires_once() {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let fired = Arc::new(AtomicUsize::new(0));

        let t = ticks.clone();
        let f = fired.clone();
        let timer = RoundTimer::start(
            Duration::from_secs(3),
            move |left| t.lock().push(left),
            move || {
                f.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(timer.time_left(), 3);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*ticks.lock(), vec![3, 2, 1]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_running());
        assert_eq!(timer.time_left(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_suppresses_expiry() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let timer = RoundTimer::start(
            Duration::from_secs(2),
            |_| {},
            move || {
                f.fetch_add(1, Ordering::SeqCst);
            },
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
        timer.stop();
        timer.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timer.time_left(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn time_left_follows_the_clock() {
        let timer = RoundTimer::start(Duration::from_secs(10), |_| {}, || {});
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(timer.time_left(), 8);
    }
}
