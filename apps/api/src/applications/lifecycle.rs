//! Application lifecycle state machine.
//!
//! Two independent axes:
//!   status:      Pending → Shortlisted | Rejected
//!   revaluation: None → Pending → Approved | Rejected
//! A revaluation can only be requested once the application has left
//! `Pending`, and at most once. Terminal states are never left.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Shortlisted,
    Rejected,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Shortlisted => "shortlisted",
            ApplicationStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevaluationStatus {
    None,
    Pending,
    Approved,
    Rejected,
}

impl RevaluationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevaluationStatus::None => "none",
            RevaluationStatus::Pending => "pending",
            RevaluationStatus::Approved => "approved",
            RevaluationStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseStateError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for ApplicationStatus {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApplicationStatus::Pending),
            "shortlisted" => Ok(ApplicationStatus::Shortlisted),
            "rejected" => Ok(ApplicationStatus::Rejected),
            other => Err(ParseStateError {
                kind: "application status",
                value: other.to_string(),
            }),
        }
    }
}

impl FromStr for RevaluationStatus {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(RevaluationStatus::None),
            "pending" => Ok(RevaluationStatus::Pending),
            "approved" => Ok(RevaluationStatus::Approved),
            "rejected" => Ok(RevaluationStatus::Rejected),
            other => Err(ParseStateError {
                kind: "revaluation status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for RevaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recruiter's review outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Shortlisted,
    Rejected,
}

/// Recruiter's answer to a revaluation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevaluationOutcome {
    Approved,
    Rejected,
}

#[derive(Debug, Error, PartialEq)]
#[error("cannot {action}: application is {status} (revaluation {revaluation})")]
pub struct TransitionError {
    pub action: &'static str,
    pub status: ApplicationStatus,
    pub revaluation: RevaluationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Lifecycle {
    pub status: ApplicationStatus,
    pub revaluation: RevaluationStatus,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::initial()
    }
}

impl Lifecycle {
    pub fn initial() -> Self {
        Self {
            status: ApplicationStatus::Pending,
            revaluation: RevaluationStatus::None,
        }
    }

    pub fn revaluation_requested(&self) -> bool {
        self.revaluation != RevaluationStatus::None
    }

    fn illegal(&self, action: &'static str) -> TransitionError {
        TransitionError {
            action,
            status: self.status,
            revaluation: self.revaluation,
        }
    }

    pub fn decide(self, decision: Decision) -> Result<Self, TransitionError> {
        match self.status {
            ApplicationStatus::Pending => Ok(Self {
                status: match decision {
                    Decision::Shortlisted => ApplicationStatus::Shortlisted,
                    Decision::Rejected => ApplicationStatus::Rejected,
                },
                ..self
            }),
            ApplicationStatus::Shortlisted | ApplicationStatus::Rejected => {
                Err(self.illegal("decide"))
            }
        }
    }

    pub fn request_revaluation(self) -> Result<Self, TransitionError> {
        match (self.status, self.revaluation) {
            (ApplicationStatus::Pending, _) => Err(self.illegal("request revaluation")),
            (_, RevaluationStatus::None) => Ok(Self {
                revaluation: RevaluationStatus::Pending,
                ..self
            }),
            (_, RevaluationStatus::Pending | RevaluationStatus::Approved | RevaluationStatus::Rejected) => {
                Err(self.illegal("request revaluation"))
            }
        }
    }

    pub fn resolve_revaluation(self, outcome: RevaluationOutcome) -> Result<Self, TransitionError> {
        match self.revaluation {
            RevaluationStatus::Pending => Ok(Self {
                revaluation: match outcome {
                    RevaluationOutcome::Approved => RevaluationStatus::Approved,
                    RevaluationOutcome::Rejected => RevaluationStatus::Rejected,
                },
                ..self
            }),
            RevaluationStatus::None | RevaluationStatus::Approved | RevaluationStatus::Rejected => {
                Err(self.illegal("resolve revaluation"))
            }
        }
    }
}
