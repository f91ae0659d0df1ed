/*!
 * Poll scheduling.
 *
 * One background task drives both timers. The short timer refreshes door
 * state, the long timer revalidates the cloud session. Ticks run inside
 * the loop body, so a slow tick delays the next one instead of overlapping
 * it.
 */
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use garagelink_core::config::PollingConfig;
use garagelink_core::error::{Error as CoreError, Result as CoreResult};
use garagelink_core::utils::spawn_and_log;

use crate::controller::Controller;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

fn at_least_min(interval: Duration, what: &str) -> Duration {
    if interval < MIN_INTERVAL {
        warn!("{} interval {:?} is too short, using {:?}", what, interval, MIN_INTERVAL);
        return MIN_INTERVAL;
    }
    interval
}

/// Drives a controller's short and long polls
#[derive(Debug, Clone)]
pub struct PollScheduler {
    controller: Arc<Controller>,
    short_interval: Duration,
    long_interval: Duration,
}

impl PollScheduler {
    /// Create a scheduler with explicit intervals
    ///
    /// Intervals shorter than one second are raised to one second.
    pub fn new(controller: Arc<Controller>, short_interval: Duration, long_interval: Duration) -> Self {
        Self {
            controller,
            short_interval: at_least_min(short_interval, "short poll"),
            long_interval: at_least_min(long_interval, "long poll"),
        }
    }

    /// Interval between short polls
    pub fn short_interval(&self) -> Duration {
        self.short_interval
    }

    /// Interval between long polls
    pub fn long_interval(&self) -> Duration {
        self.long_interval
    }

    /// Create a scheduler from the polling section of the configuration
    pub fn from_config(controller: Arc<Controller>, config: &PollingConfig) -> Self {
        Self::new(controller, config.short_interval(), config.long_interval())
    }

    /// Start polling in the background
    ///
    /// The first short poll fires one short interval from now, since
    /// [`Controller::start`] already polled once.
    pub fn spawn(self) -> PollHandle {
        let (shutdown, rx) = watch::channel(false);
        info!(
            "Polling every {:?}, revalidating login every {:?}",
            self.short_interval, self.long_interval
        );
        let task = spawn_and_log("poll scheduler", self.run(rx));
        PollHandle { shutdown, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) -> CoreResult<()> {
        let now = Instant::now();
        let mut short = time::interval_at(now + self.short_interval, self.short_interval);
        let mut long = time::interval_at(now + self.long_interval, self.long_interval);
        short.set_missed_tick_behavior(MissedTickBehavior::Delay);
        long.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = short.tick() => {
                    debug!("short poll");
                    self.controller.poll().await;
                }
                _ = long.tick() => {
                    debug!("long poll");
                    self.controller.long_poll().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Err(CoreError::runtime("poll handle dropped without stopping"));
                    }
                    if *shutdown.borrow() {
                        info!("Polling stopped");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Handle to a running poll task
#[derive(Debug)]
pub struct PollHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Whether the poll task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop polling and wait for an in-progress tick to finish
    pub async fn stop(self) {
        if self.shutdown.send(true).is_err() {
            debug!("poll task already exited");
        }
        if let Err(e) = self.task.await {
            warn!("poll task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::RecordingHost;
    use crate::simulated::SimulatedCloud;

    fn controller(cloud: &Arc<SimulatedCloud>) -> Arc<Controller> {
        Arc::new(Controller::new(cloud.clone(), Arc::new(RecordingHost::new())))
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_and_long_ticks() {
        let cloud = Arc::new(SimulatedCloud::new().with_door("A1", "Left", "closed"));
        let scheduler = PollScheduler::new(
            controller(&cloud),
            Duration::from_secs(10),
            Duration::from_secs(30),
        );
        let handle = scheduler.spawn();

        time::sleep(Duration::from_secs(25)).await;
        assert_eq!(cloud.fetch_calls(), 2);
        assert_eq!(cloud.login_calls(), 0);

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(cloud.fetch_calls(), 3);
        assert_eq!(cloud.login_calls(), 1);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_intervals_are_raised() {
        let cloud = Arc::new(SimulatedCloud::new());
        let mut polling = PollingConfig::default();
        polling.short_poll_secs = 0;
        polling.long_poll_secs = 0;

        let scheduler = PollScheduler::from_config(controller(&cloud), &polling);
        assert_eq!(scheduler.short_interval(), Duration::from_secs(1));
        assert_eq!(scheduler.long_interval(), Duration::from_secs(1));

        let handle = scheduler.spawn();
        time::sleep(Duration::from_millis(2500)).await;
        assert!(!handle.is_finished());
        assert_eq!(cloud.fetch_calls(), 2);
        assert_eq!(cloud.login_calls(), 2);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_polling() {
        let cloud = Arc::new(SimulatedCloud::new());
        let handle = PollScheduler::new(
            controller(&cloud),
            Duration::from_secs(10),
            Duration::from_secs(30),
        )
        .spawn();

        time::sleep(Duration::from_secs(15)).await;
        handle.stop().await;
        let fetches = cloud.fetch_calls();

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(cloud.fetch_calls(), fetches);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_polls_keep_running() {
        let cloud = Arc::new(SimulatedCloud::new().with_door("A1", "Left", "open"));
        cloud.fail_fetches(4);
        cloud.fail_logins(1);
        let handle = PollScheduler::new(
            controller(&cloud),
            Duration::from_secs(10),
            Duration::from_secs(30),
        )
        .spawn();

        time::sleep(Duration::from_secs(35)).await;
        assert!(!handle.is_finished());
        // two failing ticks of two attempts each, then a clean one
        assert_eq!(cloud.fetch_calls(), 5);
        assert_eq!(cloud.login_calls(), 1);

        handle.stop().await;
    }
}
