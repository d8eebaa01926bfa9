//! Background heartbeat publisher and status poller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sedmesh_core::{keys, Message};
use tracing::{debug, warn};

use super::status::{Side, Status, StatusBoard};
use crate::error::TransportError;
use crate::service::config::ConfigHandle;
use crate::service::worker::BackgroundRunnable;
use crate::traits::{StatusProbe, Transport};

/// Broker path heartbeats are posted to.
pub const HEARTBEAT_PATH: &str = "/sed/v1/heartbeat";
/// Property carrying the server-side status in a heartbeat.
pub const STATUS_PROPERTY: &str = "status";

/// On-demand requests accepted by the heartbeat and poller workers.
#[derive(Debug)]
pub enum LifecycleTask {
    /// Run immediately instead of waiting for the next tick.
    Now,
}

// ---------------------------------------------------------------------------
// HeartbeatPublisher
// ---------------------------------------------------------------------------

/// Announces this node to the broker while its server side is not stopped.
pub struct HeartbeatPublisher {
    transport: Arc<dyn Transport>,
    config: ConfigHandle,
    board: Arc<StatusBoard>,
    sequence: u64,
}

impl HeartbeatPublisher {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: ConfigHandle, board: Arc<StatusBoard>) -> Self {
        Self {
            transport,
            config,
            board,
            sequence: 0,
        }
    }

    fn heartbeat(&mut self, status: Status) -> Message {
        self.sequence += 1;
        let config = self.config.load();
        let id = &config.identity;
        let topic = sedmesh_core::TopicAttributes::new()
            .with(keys::topic::TOPIC_TYPE, keys::topic_type::HEARTBEAT)
            .with(keys::topic::SRC_ORG, &id.org)
            .with(keys::topic::SRC_WORKSPACE, &id.workspace)
            .with(keys::topic::SRC_ENV, &id.env)
            .with(keys::topic::SRC_SU, &id.su)
            .with(keys::topic::SRC_NODE, &id.node)
            .with(keys::topic::SRC_INSTANCE, &id.instance);
        Message {
            id: self.sequence,
            topic,
            ..Message::default()
        }
        .with_property(STATUS_PROPERTY, status.as_str())
    }

    /// Posts one heartbeat. Skipped while the server side is stopped.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the broker could not be reached.
    pub async fn beat(&mut self) -> Result<bool, TransportError> {
        let status = self.board.get(Side::Server);
        if status == Status::Stop {
            return Ok(false);
        }
        let message = self.heartbeat(status);
        let timeout = Duration::from_millis(self.config.load().heartbeat_interval_ms.max(1));
        self.transport.post(message, HEARTBEAT_PATH, timeout).await?;
        debug!(status = %status, sequence = self.sequence, "heartbeat sent");
        Ok(true)
    }

    async fn beat_logged(&mut self) {
        if let Err(e) = self.beat().await {
            metrics::counter!("sed_heartbeat_failures_total").increment(1);
            warn!(error = %e, "heartbeat failed");
        }
    }
}

#[async_trait]
impl BackgroundRunnable for HeartbeatPublisher {
    type Task = LifecycleTask;

    async fn run(&mut self, task: LifecycleTask) {
        match task {
            LifecycleTask::Now => self.beat_logged().await,
        }
    }

    async fn on_tick(&mut self) {
        self.beat_logged().await;
    }
}

// ---------------------------------------------------------------------------
// StatusPoller
// ---------------------------------------------------------------------------

/// Mirrors the broker's view of one side onto the status board.
pub struct StatusPoller {
    probe: Arc<dyn StatusProbe>,
    board: Arc<StatusBoard>,
    side: Side,
}

impl StatusPoller {
    #[must_use]
    pub fn new(probe: Arc<dyn StatusProbe>, board: Arc<StatusBoard>, side: Side) -> Self {
        Self { probe, board, side }
    }

    /// Polls once and applies the reported status. A reported `Stop` runs
    /// the full stop sequence; illegal moves are logged and ignored.
    pub async fn poll(&self) {
        let reported = match self.probe.poll().await {
            Ok(status) => status,
            Err(e) => {
                warn!(side = %self.side, error = %e, "status poll failed");
                return;
            }
        };
        if reported == Status::Stop {
            self.board.stop(self.side);
            return;
        }
        if let Err(e) = self.board.transition(self.side, reported) {
            warn!(error = %e, "ignoring reported status");
        }
    }
}

#[async_trait]
impl BackgroundRunnable for StatusPoller {
    type Task = LifecycleTask;

    async fn run(&mut self, task: LifecycleTask) {
        match task {
            LifecycleTask::Now => self.poll().await,
        }
    }

    async fn on_tick(&mut self) {
        self.poll().await;
    }
}
