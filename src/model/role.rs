use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Totally ordered role lattice.
///
/// `Root` is server scope only; course membership uses `Other..=Owner`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Unknown,
    Other,
    Student,
    Grader,
    Admin,
    Owner,
    Root,
}

impl Role {
    pub const COURSE_ROLES: [Role; 5] = [
        Role::Other,
        Role::Student,
        Role::Grader,
        Role::Admin,
        Role::Owner,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Unknown => "unknown",
            Role::Other => "other",
            Role::Student => "student",
            Role::Grader => "grader",
            Role::Admin => "admin",
            Role::Owner => "owner",
            Role::Root => "root",
        }
    }

    pub fn is_course_role(self) -> bool {
        (Role::Other..=Role::Owner).contains(&self)
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unknown" => Ok(Role::Unknown),
            "other" => Ok(Role::Other),
            "student" => Ok(Role::Student),
            "grader" => Ok(Role::Grader),
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            "root" => Ok(Role::Root),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// Type-level role tag used by [`crate::api::TargetUserSelfOr`].
pub trait RoleMarker: Send + Sync + 'static {
    const ROLE: Role;
}

/// Marker for [`Role::Grader`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GraderRole;

impl RoleMarker for GraderRole {
    const ROLE: Role = Role::Grader;
}

/// Marker for [`Role::Admin`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdminRole;

impl RoleMarker for AdminRole {
    const ROLE: Role = Role::Admin;
}
