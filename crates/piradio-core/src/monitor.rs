//! Background monitors.
//!
//! Two independent loops, each waking once a second for the life of the
//! process.  They share nothing but the controller's state lock.
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::info;

use crate::controller::Controller;

pub const TICK: Duration = Duration::from_secs(1);

/// Stops playback when the sleep timer runs out.
pub fn spawn_timer_monitor(controller: Arc<Controller>) -> JoinHandle<()> {
    spawn_loop("timer", controller, |c| async move {
        c.timer_tick().await;
    })
}

/// Turns the backlight off after the idle timeout.
pub fn spawn_idle_monitor(controller: Arc<Controller>) -> JoinHandle<()> {
    spawn_loop("idle-display", controller, |c| async move {
        c.idle_tick().await;
    })
}

fn spawn_loop<F, Fut>(name: &'static str, controller: Arc<Controller>, tick: F) -> JoinHandle<()>
where
    F: Fn(Arc<Controller>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!("{} monitor started", name);
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            tick(Arc::clone(&controller)).await;
        }
    })
}
