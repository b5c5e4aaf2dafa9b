//! Poll/publish loop
//!
//! Each round fetches the device state, applies the online hysteresis,
//! publishes every bound topic whose value changed and sleeps until the
//! next round. A round can be aborted at any point by a pause request from
//! the dispatch loop:
//!
//! ```text
//! Running --pause--> Paused --resume--> Resuming --> Running
//! ```

use crate::control::Control;
use crate::device::DeviceContext;
use crate::fetch::fetch;
use crate::state::{OnlineHysteresis, PublishedState};
use std::sync::Arc;
use std::time::Duration;
use tb2m_core::resolve;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// A round (cycle and sleep) is in flight
    Running,
    /// Waiting for the command to finish
    Paused,
    /// Next round starts without sleeping
    Resuming,
}

#[derive(Debug, Default)]
struct PollState {
    published: PublishedState,
    hysteresis: OnlineHysteresis,
}

pub(crate) struct PollLoop {
    ctx: Arc<DeviceContext>,
    control: mpsc::Receiver<Control>,
    state: PollState,
}

impl PollLoop {
    pub(crate) fn new(ctx: Arc<DeviceContext>, control: mpsc::Receiver<Control>) -> Self {
        Self {
            ctx,
            control,
            state: PollState::default(),
        }
    }

    pub(crate) async fn run(mut self, cancel: CancellationToken) {
        let mut phase = Phase::Running;
        let mut clear_stale = false;

        loop {
            phase = match phase {
                Phase::Running => {
                    if std::mem::take(&mut clear_stale) {
                        debug!(device = %self.ctx.id(), "Clearing old state");
                        self.state.published.clear();
                    }

                    let current = round(&self.ctx, &mut self.state);
                    tokio::pin!(current);

                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = &mut current => break Phase::Running,
                            control = self.control.recv() => match control {
                                Some(Control::ClearStale) => clear_stale = true,
                                Some(Control::Pause(ack)) => {
                                    debug!(device = %self.ctx.id(), "Canceling poll");
                                    if ack.send(()).is_ok() {
                                        break Phase::Paused;
                                    }
                                    break Phase::Resuming;
                                }
                                Some(Control::Resume) => {
                                    warn!(device = %self.ctx.id(), "Resume requested while polling");
                                }
                                None => return,
                            }
                        }
                    }
                }
                Phase::Paused => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        control = self.control.recv() => match control {
                            Some(Control::Resume) => Phase::Resuming,
                            Some(Control::ClearStale) => {
                                clear_stale = true;
                                Phase::Paused
                            }
                            Some(Control::Pause(ack)) => {
                                let _ = ack.send(());
                                Phase::Paused
                            }
                            None => return,
                        }
                    }
                }
                Phase::Resuming => {
                    debug!(device = %self.ctx.id(), "Resuming poll");
                    Phase::Running
                }
            };
        }
    }
}

/// One cycle bounded by the watchdog, then the adaptive sleep
async fn round(ctx: &DeviceContext, state: &mut PollState) {
    let started = Instant::now();
    let watchdog = ctx.settings.watchdog();

    let interval = match timeout(watchdog, cycle(ctx, state)).await {
        Ok(interval) => interval,
        Err(_) => {
            warn!(device = %ctx.id(), timeout_secs = watchdog.as_secs(), "Poll cycle timed out");
            ctx.settings.fast_retry
        }
    };

    let wait = interval.saturating_sub(started.elapsed());
    debug!(device = %ctx.id(), wait_ms = wait.as_millis() as u64, "Next poll");
    sleep(wait).await;
}

/// Fetch and publish. Returns the interval until the next cycle.
async fn cycle(ctx: &DeviceContext, state: &mut PollState) -> Duration {
    let settings = &ctx.settings;
    let record = &ctx.record;

    debug!(device = %ctx.id(), "Getting state");
    let reading = match fetch(record.kind, &record.vin, ctx.proxy.as_ref(), ctx.started).await {
        Ok(reading) => reading,
        Err(e) => {
            warn!(device = %ctx.id(), error = %e, "Failed to get state");
            ctx.publish_error(Some(&e)).await;
            return settings.fast_retry;
        }
    };

    if !state.hysteresis.observe(reading.online) {
        debug!(
            device = %ctx.id(),
            hysteresis = state.hysteresis.remaining(),
            "Device going offline"
        );
        return settings.fast_retry;
    }

    for (topic, path) in &record.bindings.publish {
        let value = resolve(&reading.tree, path);
        if !state.published.changed(topic, &value) {
            continue;
        }
        info!(device = %ctx.id(), topic = %topic, path = %path, state = %value, "Publishing");
        if let Err(e) = ctx.publisher.publish(topic, value.clone(), true).await {
            error!(device = %ctx.id(), topic = %topic, error = %e, "Failed to publish state");
            return settings.fast_retry;
        }
        state.published.record(topic, value);
    }

    if reading.charging {
        settings.poll_interval_charging
    } else {
        settings.poll_interval
    }
}
