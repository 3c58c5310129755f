//! Identifiers
//!
//! Every entity is addressed by a string newtype. Ids are opaque: the
//! engine never parses them, it only compares and orders them.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn short(&self) -> &str {
                self.0.get(..8).unwrap_or(&self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Unique identifier for a workflow definition
    WorkflowDefinitionId
);

string_id!(
    /// Identifier of a task definition, unique within its workflow
    TaskDefinitionId
);

string_id!(
    /// Identifier shared by the task definitions of one parallel group
    ParallelGroupId
);

string_id!(
    /// Unique identifier for a workflow instance
    WorkflowInstanceId
);

string_id!(
    /// Unique identifier for an instance task
    InstanceTaskId
);

string_id!(
    /// Stable identity of an instance file across all of its versions
    InstanceFileId
);

string_id!(
    /// Unique identifier for a recorded decision
    DecisionId
);

string_id!(
    /// A role in the user directory (who may perform a task)
    RoleId
);

string_id!(
    /// A user or service identity
    Identity
);

string_id!(
    /// A run calendar known to the calendar oracle
    CalendarId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = WorkflowInstanceId::generate();
        let b = WorkflowInstanceId::generate();
        assert_ne!(a, b);
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn test_short_id_on_short_input() {
        let id = TaskDefinitionId::new("2");
        assert_eq!(id.short(), "2");
        assert_eq!(format!("{}", id), "2");
    }

    #[test]
    fn test_id_serializes_transparently() {
        let id = InstanceFileId::new("file-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"file-1\"");
    }
}
