//! Operation lifecycle.
//!
//! Backup: `Idle -> Building -> Uploading -> Committed`.
//! Restore: `Idle -> Downloading -> Extracting -> Restored`.
//! Any non-terminal state may move to `Failed` or `Cancelled`.

use std::fmt::{Display, Formatter, Result as FmtResult};

use chrono::{DateTime, Utc};
use savesync_core::{EngineError, EngineResult, ErrorMetadata, GameIdentity};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Backup,
    Restore,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            OperationKind::Backup => write!(f, "backup"),
            OperationKind::Restore => write!(f, "restore"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum OperationState {
    Idle,
    Building,
    Uploading,
    Committed,
    Downloading,
    Extracting,
    Restored,
    /// Error code of the failure.
    Failed(String),
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Committed
                | OperationState::Restored
                | OperationState::Failed(_)
                | OperationState::Cancelled
        )
    }

    /// Whether an operation of `kind` may move from `self` to `next`.
    pub fn can_transition_to(&self, kind: OperationKind, next: &OperationState) -> bool {
        use OperationState::*;

        if self.is_terminal() {
            return false;
        }
        match (kind, self, next) {
            (_, _, Failed(_)) | (_, _, Cancelled) => true,
            (OperationKind::Backup, Idle, Building)
            | (OperationKind::Backup, Building, Uploading)
            | (OperationKind::Backup, Uploading, Committed) => true,
            (OperationKind::Restore, Idle, Downloading)
            | (OperationKind::Restore, Downloading, Extracting)
            | (OperationKind::Restore, Extracting, Restored) => true,
            _ => false,
        }
    }
}

impl Display for OperationState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            OperationState::Idle => write!(f, "idle"),
            OperationState::Building => write!(f, "building"),
            OperationState::Uploading => write!(f, "uploading"),
            OperationState::Committed => write!(f, "committed"),
            OperationState::Downloading => write!(f, "downloading"),
            OperationState::Extracting => write!(f, "extracting"),
            OperationState::Restored => write!(f, "restored"),
            OperationState::Failed(reason) => write!(f, "failed({})", reason),
            OperationState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One observed state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub operation_id: Uuid,
    pub game_identity: GameIdentity,
    pub kind: OperationKind,
    pub from: OperationState,
    pub to: OperationState,
    pub at: DateTime<Utc>,
}

/// Optional receiver of state changes (progress reporting).
pub type TransitionSender = mpsc::UnboundedSender<StateTransition>;

/// Tracks the state of one operation and publishes its transitions.
#[derive(Debug)]
pub struct OperationTracker {
    operation_id: Uuid,
    game: GameIdentity,
    kind: OperationKind,
    state: OperationState,
    observer: Option<TransitionSender>,
}

impl OperationTracker {
    pub fn new(kind: OperationKind, game: GameIdentity, observer: Option<TransitionSender>) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            game,
            kind,
            state: OperationState::Idle,
            observer,
        }
    }

    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    pub fn state(&self) -> &OperationState {
        &self.state
    }

    /// Move to `next`. An illegal transition is an internal error and leaves the state unchanged.
    pub fn advance(&mut self, next: OperationState) -> EngineResult<()> {
        if !self.state.can_transition_to(self.kind, &next) {
            return Err(EngineError::Internal(format!(
                "Illegal {} transition {} -> {}",
                self.kind, self.state, next
            )));
        }

        let from = std::mem::replace(&mut self.state, next.clone());
        tracing::info!(
            operation_id = %self.operation_id,
            game_id = %self.game,
            kind = %self.kind,
            from = %from,
            to = %next,
            "Operation state changed"
        );

        if let Some(observer) = &self.observer {
            // A dropped receiver only means nobody is listening any more.
            let _ = observer.send(StateTransition {
                operation_id: self.operation_id,
                game_identity: self.game.clone(),
                kind: self.kind,
                from,
                to: next,
                at: Utc::now(),
            });
        }
        Ok(())
    }

    /// Record the terminal state matching `err`. No-op once terminal.
    pub fn fail(&mut self, err: &EngineError) {
        if self.state.is_terminal() {
            return;
        }
        let next = match err {
            EngineError::Cancelled => OperationState::Cancelled,
            other => OperationState::Failed(other.error_code().to_string()),
        };
        // Failed and Cancelled are reachable from every non-terminal state.
        let _ = self.advance(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tracker(kind: OperationKind) -> (OperationTracker, mpsc::UnboundedReceiver<StateTransition>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            OperationTracker::new(kind, GameIdentity::new("G1").unwrap(), Some(tx)),
            rx,
        )
    }

    #[test]
    fn test_backup_happy_path() {
        let (mut tracker, mut rx) = new_tracker(OperationKind::Backup);
        tracker.advance(OperationState::Building).unwrap();
        tracker.advance(OperationState::Uploading).unwrap();
        tracker.advance(OperationState::Committed).unwrap();
        assert!(tracker.state().is_terminal());

        let mut seen = Vec::new();
        while let Ok(transition) = rx.try_recv() {
            seen.push(transition.to);
        }
        assert_eq!(
            seen,
            vec![
                OperationState::Building,
                OperationState::Uploading,
                OperationState::Committed
            ]
        );
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let (mut tracker, _rx) = new_tracker(OperationKind::Backup);
        assert!(tracker.advance(OperationState::Uploading).is_err());
        assert!(tracker.advance(OperationState::Downloading).is_err());
        assert_eq!(tracker.state(), &OperationState::Idle);

        let (mut restore, _rx) = new_tracker(OperationKind::Restore);
        assert!(restore.advance(OperationState::Building).is_err());
        restore.advance(OperationState::Downloading).unwrap();
        assert!(restore.advance(OperationState::Restored).is_err());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let (mut tracker, _rx) = new_tracker(OperationKind::Restore);
        tracker.advance(OperationState::Downloading).unwrap();
        tracker.fail(&EngineError::DownloadCorrupt {
            expected: "a".into(),
            actual: "b".into(),
        });
        assert_eq!(
            tracker.state(),
            &OperationState::Failed("DOWNLOAD_CORRUPT".to_string())
        );

        tracker.fail(&EngineError::Cancelled);
        assert!(tracker.advance(OperationState::Extracting).is_err());
        assert!(matches!(tracker.state(), OperationState::Failed(_)));
    }

    #[test]
    fn test_cancel_from_any_active_state() {
        let (mut tracker, _rx) = new_tracker(OperationKind::Backup);
        tracker.advance(OperationState::Building).unwrap();
        tracker.fail(&EngineError::Cancelled);
        assert_eq!(tracker.state(), &OperationState::Cancelled);
    }

    #[test]
    fn test_works_without_observer() {
        let mut tracker =
            OperationTracker::new(OperationKind::Backup, GameIdentity::new("G1").unwrap(), None);
        tracker.advance(OperationState::Building).unwrap();
        assert_eq!(tracker.state(), &OperationState::Building);
    }
}
