//! Connection status of the client and server sides of this node.
//!
//! State machine per side:
//!
//! ```text
//! Stop -> StartingInit -> StartingRegister -> StartingConnect -> Started
//!   ^                                                              |
//!   +------------------------ PreStop <------------- (any) --------+
//! ```
//!
//! Forward moves may skip phases; the only way back is through `PreStop`.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Stop,
    PreStop,
    StartingInit,
    StartingRegister,
    StartingConnect,
    Started,
}

impl Status {
    /// Position on the forward path; `PreStop` sits off it.
    fn rank(self) -> Option<u8> {
        match self {
            Self::Stop => Some(0),
            Self::StartingInit => Some(1),
            Self::StartingRegister => Some(2),
            Self::StartingConnect => Some(3),
            Self::Started => Some(4),
            Self::PreStop => None,
        }
    }

    #[must_use]
    pub fn is_starting(self) -> bool {
        matches!(
            self,
            Self::StartingInit | Self::StartingRegister | Self::StartingConnect
        )
    }

    /// Whether moving from `self` to `to` is allowed.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        match (self, to) {
            (Self::PreStop, Self::Stop) => true,
            (Self::Stop, Self::PreStop) => false,
            (_, Self::PreStop) => true,
            (from, to) => match (from.rank(), to.rank()) {
                (Some(a), Some(b)) => b > a,
                _ => false,
            },
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "STOP",
            Self::PreStop => "PRE_STOP",
            Self::StartingInit => "STARTING_INIT",
            Self::StartingRegister => "STARTING_REGISTER",
            Self::StartingConnect => "STARTING_CONNECT",
            Self::Started => "STARTED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StatusError {
    #[error("illegal {side} status transition {from} -> {to}")]
    IllegalTransition { side: Side, from: Status, to: Status },
}

/// A status change published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub side: Side,
    pub from: Status,
    pub to: Status,
}

// ---------------------------------------------------------------------------
// StatusBoard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Sides {
    client: Status,
    server: Status,
}

impl Sides {
    fn slot(&mut self, side: Side) -> &mut Status {
        match side {
            Side::Client => &mut self.client,
            Side::Server => &mut self.server,
        }
    }
}

/// Shared status of both sides. Both start at `Stop`.
#[derive(Debug)]
pub struct StatusBoard {
    sides: Mutex<Sides>,
    changes: watch::Sender<Option<StatusChange>>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            sides: Mutex::new(Sides {
                client: Status::Stop,
                server: Status::Stop,
            }),
            changes: tx,
        }
    }

    #[must_use]
    pub fn get(&self, side: Side) -> Status {
        *self.sides.lock().slot(side)
    }

    /// Moves `side` to `to`. Returns `false` when it is already there.
    ///
    /// # Errors
    ///
    /// Returns `StatusError::IllegalTransition` for a backward move that does
    /// not go through `PreStop`.
    pub fn transition(&self, side: Side, to: Status) -> Result<bool, StatusError> {
        let change = {
            let mut sides = self.sides.lock();
            let slot = sides.slot(side);
            let from = *slot;
            if from == to {
                return Ok(false);
            }
            if !from.can_transition(to) {
                return Err(StatusError::IllegalTransition { side, from, to });
            }
            *slot = to;
            StatusChange { side, from, to }
        };
        info!(side = %side, from = %change.from, to = %change.to, "status changed");
        self.changes.send_replace(Some(change));
        Ok(true)
    }

    /// Runs the stop sequence `PreStop -> Stop`; a no-op when stopped.
    pub fn stop(&self, side: Side) {
        if self.get(side) == Status::Stop {
            return;
        }
        // Both moves are legal from any non-stopped state.
        let _ = self.transition(side, Status::PreStop);
        let _ = self.transition(side, Status::Stop);
    }

    /// Whether both sides are `Started`.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        let sides = *self.sides.lock();
        sides.client == Status::Started && sides.server == Status::Started
    }

    /// Receiver of the most recent change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<StatusChange>> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_moves_may_skip_phases() {
        let board = StatusBoard::new();
        assert!(board.transition(Side::Server, Status::StartingInit).unwrap());
        assert!(board.transition(Side::Server, Status::Started).unwrap());
        assert_eq!(board.get(Side::Server), Status::Started);
        assert_eq!(board.get(Side::Client), Status::Stop);
    }

    #[test]
    fn backward_moves_are_rejected() {
        let board = StatusBoard::new();
        board.transition(Side::Client, Status::StartingConnect).unwrap();
        let err = board.transition(Side::Client, Status::StartingInit).unwrap_err();
        assert_eq!(
            err,
            StatusError::IllegalTransition {
                side: Side::Client,
                from: Status::StartingConnect,
                to: Status::StartingInit,
            }
        );
        assert!(board.transition(Side::Client, Status::Stop).is_err());
        assert_eq!(board.get(Side::Client), Status::StartingConnect);
    }

    #[test]
    fn stop_sequence_and_restart() {
        let board = StatusBoard::new();
        board.transition(Side::Server, Status::Started).unwrap();
        board.stop(Side::Server);
        assert_eq!(board.get(Side::Server), Status::Stop);

        assert!(board.transition(Side::Server, Status::PreStop).is_err());
        assert!(board.transition(Side::Server, Status::StartingInit).unwrap());

        board.transition(Side::Server, Status::PreStop).unwrap();
        assert!(board.transition(Side::Server, Status::Started).is_err());
    }

    #[test]
    fn repeated_status_is_a_no_op() {
        let board = StatusBoard::new();
        let rx = board.subscribe();
        assert!(!board.transition(Side::Client, Status::Stop).unwrap());
        assert!(rx.borrow().is_none());
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let board = StatusBoard::new();
        let mut rx = board.subscribe();
        board.transition(Side::Client, Status::Started).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(
            *rx.borrow(),
            Some(StatusChange {
                side: Side::Client,
                from: Status::Stop,
                to: Status::Started,
            })
        );
        assert!(!board.is_ready());
        board.transition(Side::Server, Status::Started).unwrap();
        assert!(board.is_ready());
    }

    #[test]
    fn wire_names() {
        assert_eq!(serde_json::to_string(&Status::PreStop).unwrap(), "\"PRE_STOP\"");
        assert_eq!(Status::StartingRegister.to_string(), "STARTING_REGISTER");
        assert!(Status::StartingConnect.is_starting());
    }
}
