//! Caller identity as handed over by the session layer.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// The role derived from a user's profile record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  Student,
  Teacher,
  HeadTeacher,
}

impl Role {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Student => "student",
      Self::Teacher => "teacher",
      Self::HeadTeacher => "head_teacher",
    }
  }

  /// Teachers and head teachers may read and recompute class averages.
  pub fn is_staff(&self) -> bool { !matches!(self, Self::Student) }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Role {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "student" => Ok(Self::Student),
      "teacher" => Ok(Self::Teacher),
      "head_teacher" => Ok(Self::HeadTeacher),
      other => Err(Error::Validation(format!("unknown role: {other:?}"))),
    }
  }
}

/// An authenticated user making a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
  pub user_id: String,
  pub role:    Role,
}

impl Caller {
  pub fn new(user_id: impl Into<String>, role: Role) -> Self {
    Self { user_id: user_id.into(), role }
  }

  /// Reject callers that may not see or trigger aggregates.
  pub fn require_staff(&self) -> crate::Result<()> {
    if self.role.is_staff() {
      Ok(())
    } else {
      Err(Error::InsufficientPermissions(format!(
        "role {} cannot access class averages",
        self.role
      )))
    }
  }
}
