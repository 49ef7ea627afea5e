use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::domain::ProgramId;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    aggregator::ContributionAggregator,
    resolver::{BindingError, BindingResolver},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Draft,
    Published,
    Bound,
    Executing,
    Completed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("cannot {action} a session that is {state:?}")]
    InvalidTransition {
        state: SessionState,
        action: &'static str,
    },
    #[error("program upload failed: {0}")]
    Upload(String),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error("bindings belong to program {found}, session runs {expected}")]
    ProgramMismatch { expected: ProgramId, found: ProgramId },
    #[error("{ok} of {expected} contributions stored")]
    Incomplete { ok: usize, expected: usize },
    #[error("compute failed: {0}")]
    Compute(String),
}

/// Error kept on the session after a failed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionFault {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// `Draft → Published → Bound → Executing → Completed | Aborted`
#[derive(Debug, Clone)]
pub struct SessionStepper {
    state: SessionState,
    program_id: Option<ProgramId>,
    last_error: Option<SessionFault>,
}

impl Default for SessionStepper {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStepper {
    pub fn new() -> Self {
        Self {
            state: SessionState::Draft,
            program_id: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn program_id(&self) -> Option<&ProgramId> {
        self.program_id.as_ref()
    }

    pub fn last_error(&self) -> Option<&SessionFault> {
        self.last_error.as_ref()
    }

    fn expect_state(&self, expected: SessionState, action: &'static str) -> Result<(), StepError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(StepError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }

    fn fail(&mut self, error: StepError) -> StepError {
        warn!(state = ?self.state, %error, "session step rejected");
        self.last_error = Some(SessionFault {
            message: error.to_string(),
            at: Utc::now(),
        });
        error
    }

    fn advance(&mut self, next: SessionState) {
        info!(from = ?self.state, to = ?next, "session advanced");
        self.state = next;
        self.last_error = None;
    }

    /// Applies the upload outcome. A failed upload keeps the draft editable.
    pub fn publish<E: Display>(
        &mut self,
        outcome: Result<ProgramId, E>,
    ) -> Result<ProgramId, StepError> {
        self.expect_state(SessionState::Draft, "publish")?;
        match outcome {
            Ok(program_id) => {
                self.program_id = Some(program_id.clone());
                self.advance(SessionState::Published);
                Ok(program_id)
            }
            Err(err) => Err(self.fail(StepError::Upload(err.to_string()))),
        }
    }

    pub fn bind(&mut self, resolver: &BindingResolver) -> Result<(), StepError> {
        self.expect_state(SessionState::Published, "bind")?;
        self.check_program(&resolver.descriptor().program_id)?;
        if let Err(err) = resolver.validate() {
            return Err(self.fail(err.into()));
        }
        self.advance(SessionState::Bound);
        Ok(())
    }

    pub fn begin_execution(&mut self, ledger: &ContributionAggregator) -> Result<(), StepError> {
        self.expect_state(SessionState::Bound, "execute")?;
        self.check_program(ledger.program_id())?;
        if !ledger.is_complete() {
            return Err(self.fail(StepError::Incomplete {
                ok: ledger.ok_count(),
                expected: ledger.expected(),
            }));
        }
        self.advance(SessionState::Executing);
        Ok(())
    }

    /// A failed compute leaves the session executing with the error attached,
    /// so the owner can go back to `Bound` or abort.
    pub fn finish<E: Display>(&mut self, outcome: Result<(), E>) -> Result<(), StepError> {
        self.expect_state(SessionState::Executing, "finish")?;
        match outcome {
            Ok(()) => {
                self.advance(SessionState::Completed);
                Ok(())
            }
            Err(err) => Err(self.fail(StepError::Compute(err.to_string()))),
        }
    }

    pub fn return_to_bound(&mut self) -> Result<(), StepError> {
        self.expect_state(SessionState::Executing, "return to bound")?;
        self.advance(SessionState::Bound);
        Ok(())
    }

    pub fn abort(&mut self) -> Result<(), StepError> {
        if self.state.is_terminal() {
            return Err(StepError::InvalidTransition {
                state: self.state,
                action: "abort",
            });
        }
        self.advance(SessionState::Aborted);
        Ok(())
    }

    fn check_program(&mut self, found: &ProgramId) -> Result<(), StepError> {
        match &self.program_id {
            Some(expected) if expected == found => Ok(()),
            Some(expected) => {
                let error = StepError::ProgramMismatch {
                    expected: expected.clone(),
                    found: found.clone(),
                };
                Err(self.fail(error))
            }
            None => Err(StepError::InvalidTransition {
                state: self.state,
                action: "bind",
            }),
        }
    }
}

#[cfg(test)]
#[path = "tests/stepper_tests.rs"]
mod tests;
