use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one run.
///
/// `Pending -> Collecting -> Evaluating -> Sealing -> Done`; `Failed` is
/// reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Collecting,
    Evaluating,
    Sealing,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Pending, Collecting)
            | (Collecting, Evaluating)
            | (Evaluating, Sealing)
            | (Sealing, Done) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Pending => "pending",
            RunState::Collecting => "collecting",
            RunState::Evaluating => "evaluating",
            RunState::Sealing => "sealing",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}
