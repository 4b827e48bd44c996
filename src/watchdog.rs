use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use crate::live_status::SharedStatus;

/// Exit code the outer supervisor treats as "relaunch me".
pub const RESTART_EXIT_CODE: i32 = 75;

/// Liveness timer fed by the control loop.
///
/// The feed is a single atomic store so it is safe from any task; the check
/// only compares timestamps.
pub struct Watchdog {
    epoch: Instant,
    last_feed_ms: AtomicU64,
    ceiling: Duration,
    check_interval: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Alive,
    /// Expired, but an update owns the device.
    Suppressed,
    Expired,
}

impl Watchdog {
    pub fn new(ceiling: Duration, check_interval: Duration) -> Self {
        Watchdog {
            epoch: Instant::now(),
            last_feed_ms: AtomicU64::new(0),
            ceiling,
            check_interval,
        }
    }

    pub fn feed(&self) {
        self.feed_at(Instant::now());
    }

    pub fn feed_at(&self, now: Instant) {
        let ms = now.saturating_duration_since(self.epoch).as_millis() as u64;
        self.last_feed_ms.store(ms, Ordering::Release);
    }

    pub fn silence_at(&self, now: Instant) -> Duration {
        let last_feed = self.epoch + Duration::from_millis(self.last_feed_ms.load(Ordering::Acquire));
        now.saturating_duration_since(last_feed)
    }

    pub fn check_at(&self, now: Instant, update_in_progress: bool) -> Verdict {
        if self.silence_at(now) <= self.ceiling {
            Verdict::Alive
        } else if update_in_progress {
            Verdict::Suppressed
        } else {
            Verdict::Expired
        }
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }
}

/// What to do when the loop has gone silent. Must not block.
pub trait RestartHook: Send + Sync {
    fn restart(&self, silence: Duration);
}

/// Exits the process; the outer supervisor (or init system) relaunches it.
pub struct ExitRestart;

impl RestartHook for ExitRestart {
    fn restart(&self, silence: Duration) {
        log::error!(
            "[WATCHDOG] ✗ Control loop silent for {:.1}s, restarting",
            silence.as_secs_f64()
        );
        std::process::exit(RESTART_EXIT_CODE);
    }
}

/// Watchdog task: ticks on its own cadence, independent of the control loop.
pub async fn watchdog_task<H: RestartHook>(watchdog: Arc<Watchdog>, status: Arc<SharedStatus>, hook: H) {
    let mut ticker = interval(watchdog.check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let now = Instant::now();
        match watchdog.check_at(now, status.is_update_in_progress()) {
            Verdict::Alive => {}
            Verdict::Suppressed => {
                log::warn!(
                    "[WATCHDOG] ⚠ Silent for {:.1}s during update, restart held",
                    watchdog.silence_at(now).as_secs_f64()
                );
            }
            Verdict::Expired => {
                hook.restart(watchdog.silence_at(now));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingHook(Arc<Mutex<Vec<Duration>>>);

    impl RestartHook for RecordingHook {
        fn restart(&self, silence: Duration) {
            self.0.lock().unwrap().push(silence);
        }
    }

    #[test]
    fn test_fed_watchdog_is_alive() {
        let dog = Watchdog::new(Duration::from_secs(10), Duration::from_secs(1));
        let start = Instant::now();
        dog.feed_at(start);
        assert_eq!(dog.check_at(start + Duration::from_secs(9), false), Verdict::Alive);
    }

    #[test]
    fn test_eleven_seconds_silence_expires() {
        let dog = Watchdog::new(Duration::from_secs(10), Duration::from_secs(1));
        let start = Instant::now();
        dog.feed_at(start);
        let later = start + Duration::from_secs(11);
        assert_eq!(dog.check_at(later, false), Verdict::Expired);
        assert!(dog.silence_at(later) >= Duration::from_secs(10));
    }

    #[test]
    fn test_update_suppresses_restart() {
        let dog = Watchdog::new(Duration::from_secs(10), Duration::from_secs(1));
        let start = Instant::now();
        dog.feed_at(start);
        assert_eq!(dog.check_at(start + Duration::from_secs(11), true), Verdict::Suppressed);
    }

    #[test]
    fn test_feed_resets_silence() {
        let dog = Watchdog::new(Duration::from_secs(10), Duration::from_secs(1));
        let start = Instant::now();
        dog.feed_at(start);
        dog.feed_at(start + Duration::from_secs(8));
        assert_eq!(dog.check_at(start + Duration::from_secs(15), false), Verdict::Alive);
    }

    #[tokio::test]
    async fn test_task_restarts_on_next_tick_when_starved() {
        let dog = Arc::new(Watchdog::new(Duration::from_millis(50), Duration::from_millis(10)));
        dog.feed();
        let hook = RecordingHook::default();
        let calls = hook.0.clone();

        // Never fed again: the task must fire and return
        tokio::time::timeout(
            Duration::from_secs(2),
            watchdog_task(dog, Arc::new(SharedStatus::new()), hook),
        )
        .await
        .expect("watchdog never fired");

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0] > Duration::from_millis(50));
    }
}
