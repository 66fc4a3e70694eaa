//! Idle-shutdown governor.
//!
//! A counter tracks outstanding jobs; while it is non-zero the countdown is
//! suppressed. Every transition back to zero re-arms a single-shot countdown
//! over the configured window, and expiry is observed by the server
//! controller to terminate the process.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug)]
struct TimerState {
    outstanding: u64,
    // bumped whenever a pending countdown must be invalidated
    generation: u64,
}

#[derive(Debug)]
struct Shared {
    window: Option<Duration>,
    state: Mutex<TimerState>,
    expired: watch::Sender<bool>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn arm(shared: &Arc<Shared>) {
    let Some(window) = shared.window else {
        return;
    };
    let generation = {
        let mut state = shared.lock();
        state.generation = state.generation.wrapping_add(1);
        state.generation
    };
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::time::sleep(window).await;
        let fire = {
            let state = shared.lock();
            state.outstanding == 0 && state.generation == generation
        };
        if fire {
            let _ = shared.expired.send(true);
        }
    });
}

fn release(shared: &Arc<Shared>) {
    let idle = {
        let mut state = shared.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        state.outstanding == 0
    };
    if idle {
        arm(shared);
    }
}

#[derive(Debug)]
pub struct InactivityTimer {
    shared: Arc<Shared>,
}

impl InactivityTimer {
    /// Create the timer and start the first countdown. A `None` window
    /// disables idle shutdown entirely.
    pub fn new(window: Option<Duration>) -> Arc<Self> {
        let (expired, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            window,
            state: Mutex::new(TimerState {
                outstanding: 0,
                generation: 0,
            }),
            expired,
        });
        arm(&shared);
        Arc::new(Self { shared })
    }

    pub fn window(&self) -> Option<Duration> {
        self.shared.window
    }

    /// Mark the start of a job. The countdown stays suppressed until the
    /// returned guard is dropped and no other jobs remain.
    pub fn activity(&self) -> ActivityGuard {
        let mut state = self.shared.lock();
        state.outstanding += 1;
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        ActivityGuard {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn outstanding(&self) -> u64 {
        self.shared.lock().outstanding
    }

    /// Resolves once the idle window has elapsed with zero outstanding jobs.
    /// Never resolves when idle shutdown is disabled.
    pub async fn expired(&self) {
        let mut rx = self.shared.expired.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// RAII handle for one outstanding job.
pub struct ActivityGuard {
    shared: Arc<Shared>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        release(&self.shared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(500);

    #[tokio::test(start_paused = true)]
    async fn fires_after_idle_window() {
        let timer = InactivityTimer::new(Some(WINDOW));
        tokio::time::timeout(WINDOW * 2, timer.expired())
            .await
            .expect("timer should have fired");
    }

    #[tokio::test(start_paused = true)]
    async fn outstanding_jobs_suppress_the_countdown() {
        let timer = InactivityTimer::new(Some(WINDOW));
        let guard = timer.activity();
        assert!(tokio::time::timeout(WINDOW * 4, timer.expired())
            .await
            .is_err());
        drop(guard);
        tokio::time::timeout(WINDOW * 2, timer.expired())
            .await
            .expect("timer should re-arm once idle");
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_restarts_on_each_return_to_idle() {
        let timer = InactivityTimer::new(Some(WINDOW));
        tokio::time::sleep(WINDOW / 2).await;
        let guard = timer.activity();
        drop(guard);
        // the original countdown was invalidated, so nothing fires at the
        // original deadline
        assert!(
            tokio::time::timeout(WINDOW * 3 / 4, timer.expired())
                .await
                .is_err(),
            "stale countdown must not fire"
        );
        tokio::time::timeout(WINDOW, timer.expired())
            .await
            .expect("fresh countdown should fire");
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_timer_never_fires() {
        let timer = InactivityTimer::new(None);
        assert!(
            tokio::time::timeout(Duration::from_secs(3600), timer.expired())
                .await
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn counter_tracks_nested_guards() {
        let timer = InactivityTimer::new(Some(WINDOW));
        let a = timer.activity();
        let b = timer.activity();
        assert_eq!(timer.outstanding(), 2);
        drop(a);
        assert_eq!(timer.outstanding(), 1);
        assert!(tokio::time::timeout(WINDOW * 2, timer.expired())
            .await
            .is_err());
        drop(b);
        tokio::time::timeout(WINDOW * 2, timer.expired())
            .await
            .expect("last guard re-arms");
    }
}
