//! Heartbeat ping/pong liveness monitoring.
//!
//! Each active connection gets a monitor task that queues a ping every
//! interval and waits for the pong. A missed pong does not close the socket
//! directly; the connection is handed to [`Dispatcher::reap`] so cleanup runs
//! through the same path as a failed delivery.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

use super::dispatcher::Dispatcher;
use super::session::{Outbound, Outbox};

/// Heartbeat timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Time between pings
    pub interval: Duration,
    /// How long to wait for the pong after each ping
    pub timeout: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of the heartbeat loop, logged when the monitor ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeartbeatOutcome {
    /// The peer stopped answering and was handed to the dispatcher
    TimedOut,
    /// The ping could not even be queued
    Unreachable,
    /// The monitor handle was dropped
    Stopped,
}

/// Running heartbeat for one connection. Dropping it stops the task.
pub struct LivenessMonitor {
    task: JoinHandle<()>,
    pong_tx: mpsc::UnboundedSender<()>,
}

impl LivenessMonitor {
    pub fn spawn(outbox: Outbox, dispatcher: Dispatcher, settings: HeartbeatSettings) -> Self {
        let (pong_tx, pong_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let connection_id = outbox.connection_id().to_string();
            let outcome = run_heartbeat(outbox, dispatcher, settings, pong_rx).await;
            tracing::debug!(connection_id = %connection_id, outcome = ?outcome, "Heartbeat stopped");
        });
        Self { task, pong_tx }
    }

    /// Forward a pong received on the connection
    pub fn record_pong(&self) {
        let _ = self.pong_tx.send(());
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_heartbeat(
    outbox: Outbox,
    dispatcher: Dispatcher,
    settings: HeartbeatSettings,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
) -> HeartbeatOutcome {
    let mut ticker = interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        ticker.tick().await;

        // Pongs from earlier rounds don't count for this one
        while pong_rx.try_recv().is_ok() {}

        if let Err(failure) = outbox.try_deliver(Outbound::Ping) {
            tracing::debug!(
                connection_id = %outbox.connection_id(),
                error = %failure,
                "Heartbeat ping not queued"
            );
            dispatcher
                .reap(outbox.connection_id(), "heartbeat undeliverable")
                .await;
            return HeartbeatOutcome::Unreachable;
        }

        match timeout(settings.timeout, pong_rx.recv()).await {
            Ok(Some(())) => continue,
            Ok(None) => return HeartbeatOutcome::Stopped,
            Err(_) => {
                tracing::warn!(
                    connection_id = %outbox.connection_id(),
                    timeout = ?settings.timeout,
                    "Heartbeat timed out"
                );
                dispatcher
                    .reap(outbox.connection_id(), "heartbeat timeout")
                    .await;
                return HeartbeatOutcome::TimedOut;
            }
        }
    }
}
