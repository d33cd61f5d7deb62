//! Session state machine
//!
//! `Idle → Validating → Converting → ApplyingEffects → Mastering →
//! EmbeddingMetadata → Completed`, with `Cancelled` and `Failed` reachable
//! from every non-terminal stage. Anything else is an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{MareaError, Result};

/// Lifecycle stage of one processing session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    Idle,
    Validating,
    Converting,
    ApplyingEffects,
    Mastering,
    EmbeddingMetadata,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStage {
    pub fn name(&self) -> &'static str {
        match self {
            SessionStage::Idle => "idle",
            SessionStage::Validating => "validating",
            SessionStage::Converting => "converting",
            SessionStage::ApplyingEffects => "applying_effects",
            SessionStage::Mastering => "mastering",
            SessionStage::EmbeddingMetadata => "embedding_metadata",
            SessionStage::Completed => "completed",
            SessionStage::Cancelled => "cancelled",
            SessionStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStage::Completed | SessionStage::Cancelled | SessionStage::Failed
        )
    }

    /// The forward successor, if any
    pub fn next(&self) -> Option<SessionStage> {
        match self {
            SessionStage::Idle => Some(SessionStage::Validating),
            SessionStage::Validating => Some(SessionStage::Converting),
            SessionStage::Converting => Some(SessionStage::ApplyingEffects),
            SessionStage::ApplyingEffects => Some(SessionStage::Mastering),
            SessionStage::Mastering => Some(SessionStage::EmbeddingMetadata),
            SessionStage::EmbeddingMetadata => Some(SessionStage::Completed),
            SessionStage::Completed | SessionStage::Cancelled | SessionStage::Failed => None,
        }
    }

    pub fn can_transition_to(&self, to: SessionStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        matches!(to, SessionStage::Cancelled | SessionStage::Failed) || self.next() == Some(to)
    }
}

impl std::fmt::Display for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of the stage history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: SessionStage,
    pub entered_at: DateTime<Utc>,
}

/// Validated stage transitions with history
#[derive(Debug, Clone)]
pub struct StageMachine {
    current: SessionStage,
    history: Vec<StageRecord>,
}

impl StageMachine {
    pub fn new() -> Self {
        Self {
            current: SessionStage::Idle,
            history: vec![StageRecord {
                stage: SessionStage::Idle,
                entered_at: Utc::now(),
            }],
        }
    }

    pub fn current(&self) -> SessionStage {
        self.current
    }

    pub fn history(&self) -> &[StageRecord] {
        &self.history
    }

    /// Stage names in the order they were entered
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.history.iter().map(|r| r.stage.name()).collect()
    }

    pub fn transition(&mut self, to: SessionStage) -> Result<()> {
        if !self.current.can_transition_to(to) {
            return Err(MareaError::InvalidTransition {
                from: self.current.name().to_string(),
                to: to.name().to_string(),
            });
        }
        info!(from = %self.current, to = %to, "Session stage");
        self.current = to;
        self.history.push(StageRecord {
            stage: to,
            entered_at: Utc::now(),
        });
        Ok(())
    }

    /// Step to the forward successor
    pub fn advance(&mut self) -> Result<SessionStage> {
        let next = self.current.next().ok_or_else(|| MareaError::InvalidTransition {
            from: self.current.name().to_string(),
            to: "next".to_string(),
        })?;
        self.transition(next)?;
        Ok(next)
    }
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_happy_path() {
        let mut machine = StageMachine::new();
        while machine.current() != SessionStage::Completed {
            machine.advance().unwrap();
        }
        assert_eq!(
            machine.stage_names(),
            vec![
                "idle",
                "validating",
                "converting",
                "applying_effects",
                "mastering",
                "embedding_metadata",
                "completed"
            ]
        );
    }

    #[test_case(SessionStage::Idle ; "from idle")]
    #[test_case(SessionStage::Converting ; "from converting")]
    #[test_case(SessionStage::EmbeddingMetadata ; "from embedding")]
    fn test_cancel_and_fail_from_non_terminal(stage: SessionStage) {
        assert!(stage.can_transition_to(SessionStage::Cancelled));
        assert!(stage.can_transition_to(SessionStage::Failed));
    }

    #[test_case(SessionStage::Idle, SessionStage::Mastering ; "skip ahead")]
    #[test_case(SessionStage::Mastering, SessionStage::Converting ; "go back")]
    #[test_case(SessionStage::Completed, SessionStage::Failed ; "leave terminal")]
    #[test_case(SessionStage::Cancelled, SessionStage::Cancelled ; "re-enter terminal")]
    fn test_invalid_transitions(from: SessionStage, to: SessionStage) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn test_invalid_transition_is_error() {
        let mut machine = StageMachine::new();
        let err = machine.transition(SessionStage::Completed).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TRANSITION");
        assert_eq!(machine.current(), SessionStage::Idle);
        assert_eq!(machine.history().len(), 1);
    }

    #[test]
    fn test_terminal_has_no_successor() {
        let mut machine = StageMachine::new();
        machine.transition(SessionStage::Cancelled).unwrap();
        assert!(machine.advance().is_err());
    }
}
