//! Completion notifications.
//!
//! Publishing is fire-and-forget: a failed publish is logged by the caller and
//! never fails the operation that produced the event.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::session::Session;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationFinished {
    pub event: String,
    pub user_id: String,
    pub session_id: Uuid,
    pub points_earned: u32,
    pub timestamp: DateTime<Utc>,
}

impl SimulationFinished {
    pub const EVENT: &'static str = "simulation_finished";

    /// Event for a completed session; points are its final score.
    pub fn for_session(session: &Session) -> Self {
        Self {
            event: Self::EVENT.to_string(),
            user_id: session.user_id.clone(),
            session_id: session.id,
            points_earned: session.final_score.unwrap_or(0),
            timestamp: Utc::now(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn publish(&self, event: SimulationFinished) -> Result<()>;
}

/// Forwards events into a bounded tokio channel.
pub struct ChannelNotifier {
    sender: mpsc::Sender<SimulationFinished>,
}

impl ChannelNotifier {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<SimulationFinished>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl CompletionNotifier for ChannelNotifier {
    async fn publish(&self, event: SimulationFinished) -> Result<()> {
        self.sender
            .try_send(event)
            .map_err(|e| anyhow!("completion event dropped: {e}"))
    }
}

pub struct NoopNotifier;

#[async_trait]
impl CompletionNotifier for NoopNotifier {
    async fn publish(&self, _event: SimulationFinished) -> Result<()> {
        Ok(())
    }
}
