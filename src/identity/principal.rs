use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Closed set of permission classes. Anything outside it is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Parent,
    Admin,
    User,
}

impl Role {
    pub const ALL: [Role; 5] = [Role::Student, Role::Teacher, Role::Parent, Role::Admin, Role::User];

    /// Role assigned when an identity record carries none.
    pub const DEFAULT: Role = Role::Student;

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Parent => "parent",
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    /// Landing view after a successful login when no return location was remembered.
    pub fn dashboard_path(&self) -> &'static str {
        match self {
            Role::Student => "/dashboard/student",
            Role::Teacher => "/dashboard/teacher",
            Role::Parent => "/dashboard/parent",
            Role::Admin => "/dashboard/admin",
            Role::User => "/",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "teacher" => Ok(Role::Teacher),
            "parent" => Ok(Role::Parent),
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            _ => Err(AuthError::InvalidRole(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    Inactive,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Inactive => "inactive",
        }
    }
}

impl FromStr for Status {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Status::Active),
            "inactive" => Ok(Status::Inactive),
            _ => Err(AuthError::Unknown(format!("unrecognised status '{s}'"))),
        }
    }
}

/// The authenticated user, merged from the credential verifier and the identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub unique_id: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub photo_url: String,
    pub role: Role,
    #[serde(default)]
    pub status: Status,
}
