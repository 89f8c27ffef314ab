use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Recruiter,
    Candidate,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Recruiter => "recruiter",
            Role::Candidate => "candidate",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recruiter" => Ok(Role::Recruiter),
            "candidate" => Ok(Role::Candidate),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// The authenticated caller, as asserted by the gateway in front of the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn recruiter(id: Uuid) -> Self {
        Self {
            id,
            role: Role::Recruiter,
        }
    }

    pub fn candidate(id: Uuid) -> Self {
        Self {
            id,
            role: Role::Candidate,
        }
    }
}
