//! Simulated progress for the reconstruction call, which reports nothing
//! until it finishes.

use std::{future::Future, time::Duration};

use rand::Rng;
use tokio::{
    task::{AbortHandle, JoinHandle},
    time::{interval_at, Instant, MissedTickBehavior},
};

/// Upper bound of the simulated estimate; only a terminal response reaches 100.
pub const SIMULATED_PROGRESS_CAP: f32 = 90.0;
pub const MAX_SIMULATED_INCREMENT: f32 = 10.0;
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

pub fn advance_simulated(current: f32, rng: &mut impl Rng) -> f32 {
    if current >= SIMULATED_PROGRESS_CAP {
        return current;
    }
    let increment = rng.random_range(0.0..MAX_SIMULATED_INCREMENT);
    (current + increment).min(SIMULATED_PROGRESS_CAP)
}

/// Periodic task bound to the operation it decorates. The task is aborted
/// when the ticker is dropped, so every exit path of the owning scope
/// releases it.
pub struct ProgressTicker {
    task: JoinHandle<()>,
}

impl ProgressTicker {
    /// Runs `on_tick` every `period`, starting one period from now. The task
    /// ends on its own once `on_tick` resolves to `false`. Periods shorter
    /// than [`MIN_TICK_PERIOD`] are raised to it.
    pub fn spawn<F, Fut>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let period = period.max(MIN_TICK_PERIOD);
        let task = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if !on_tick().await {
                    break;
                }
            }
        });
        Self { task }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.task.abort();
    }
}
