//! Named one-shot timers and the heartbeat interval.
//!
//! Each slot holds at most one pending deadline. Arming a slot drops the
//! previous deadline first, so a slot can never fire twice.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};

pub(crate) struct Timer {
    name: &'static str,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Timer {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self { name, sleep: None }
    }

    pub(crate) fn arm(&mut self, after: Duration) {
        if self.sleep.take().is_some() {
            crate::log_debug!("Re-arming {} timer; previous deadline dropped", self.name);
        }
        self.sleep = Some(Box::pin(time::sleep(after)));
    }

    /// Returns whether a deadline was pending.
    pub(crate) fn clear(&mut self) -> bool {
        self.sleep.take().is_some()
    }

    /// Resolves when the armed deadline passes and disarms the slot.
    /// Pending forever while unarmed.
    pub(crate) async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => std::future::pending().await,
        }
    }
}

pub(crate) struct Heartbeat {
    interval: Option<Interval>,
}

impl Heartbeat {
    pub(crate) const fn new() -> Self {
        Self { interval: None }
    }

    /// Restart the interval; the first tick lands one `period` from now.
    pub(crate) fn start(&mut self, period: Duration) {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    pub(crate) fn stop(&mut self) {
        self.interval = None;
    }

    pub(crate) async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }
}

/// Every timer the connection task owns.
pub(crate) struct Timers {
    pub(crate) connect_timeout: Timer,
    pub(crate) reconnect: Timer,
    pub(crate) idle_disconnect: Timer,
    pub(crate) heartbeat: Heartbeat,
}

impl Timers {
    pub(crate) const fn new() -> Self {
        Self {
            connect_timeout: Timer::new("connect-timeout"),
            reconnect: Timer::new("reconnect"),
            idle_disconnect: Timer::new("idle-disconnect"),
            heartbeat: Heartbeat::new(),
        }
    }

    pub(crate) fn clear_all(&mut self) {
        self.connect_timeout.clear();
        self.reconnect.clear();
        self.idle_disconnect.clear();
        self.heartbeat.stop();
    }
}
