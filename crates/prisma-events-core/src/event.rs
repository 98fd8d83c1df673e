//! Mutation events as seen by listeners

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::EventsError;

/// Where a dispatched event came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// The mutation ran in this process.
    Local,
    /// The mutation ran elsewhere and arrived through the broker.
    Remote,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Local => "local",
            EventSource::Remote => "remote",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutating operations that emit events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Create,
    Update,
    UpdateMany,
    Upsert,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Create,
        Operation::Update,
        Operation::UpdateMany,
        Operation::Upsert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::UpdateMany => "updateMany",
            Operation::Upsert => "upsert",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = EventsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| EventsError::UnsupportedOperation(s.to_string()))
    }
}

/// Payload handed to listener callbacks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MutationEvent {
    /// Entity type the mutation targeted, e.g. `user`
    pub entity_type: String,

    /// Operation that produced the event
    pub operation: Operation,

    /// Original operation arguments, emission flag stripped
    pub args: serde_json::Value,

    /// Result returned by the write
    pub result: serde_json::Value,

    /// Local or broker-delivered
    pub source: EventSource,
}

impl MutationEvent {
    pub fn new(
        entity_type: impl Into<String>,
        operation: Operation,
        args: serde_json::Value,
        result: serde_json::Value,
        source: EventSource,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            operation,
            args,
            result,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::UpdateMany.as_str(), "updateMany");
        assert_eq!("upsert".parse::<Operation>().unwrap(), Operation::Upsert);
        assert!("delete".parse::<Operation>().is_err());
        assert_eq!(
            serde_json::to_value(Operation::UpdateMany).unwrap(),
            json!("updateMany")
        );
    }

    #[test]
    fn test_mutation_event_serialization() {
        let event = MutationEvent::new(
            "user",
            Operation::Create,
            json!({"data": {"name": "ada"}}),
            json!({"id": 1, "name": "ada"}),
            EventSource::Remote,
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["entityType"], "user");
        assert_eq!(value["source"], "remote");
    }
}
