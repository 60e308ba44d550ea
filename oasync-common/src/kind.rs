//! Entity kinds synchronized from the remote catalog

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two catalog entity kinds
///
/// Passes visit kinds in [`EntityKind::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Employee,
    Project,
}

impl EntityKind {
    /// Processing order within a run
    pub const ALL: [EntityKind; 2] = [EntityKind::Employee, EntityKind::Project];

    /// Stable lowercase name used in settings keys and database rows
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Employee => "employee",
            EntityKind::Project => "project",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "employee" => Ok(EntityKind::Employee),
            "project" => Ok(EntityKind::Project),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown entity kind: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("file".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_employees_are_processed_first() {
        assert_eq!(EntityKind::ALL[0], EntityKind::Employee);
    }
}
