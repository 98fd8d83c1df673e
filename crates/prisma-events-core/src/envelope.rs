//! Broker wire format

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EventSource, EventsError, MutationEvent, Operation, Result};

/// Event record placed on the broker.
///
/// Serialized as UTF-8 JSON:
/// `{ "entityType", "operation", "args", "result", "timestamp", "eventId" }`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub entity_type: String,
    pub operation: Operation,
    pub args: serde_json::Value,
    pub result: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub event_id: String,
}

impl EventEnvelope {
    /// Build an envelope stamped with the current time and its content digest.
    pub fn new(
        entity_type: impl Into<String>,
        operation: Operation,
        args: serde_json::Value,
        result: serde_json::Value,
    ) -> Self {
        let entity_type = entity_type.into();
        let event_id = event_id(&entity_type, operation, &args, &result);

        Self {
            entity_type,
            operation,
            args,
            result,
            timestamp: Utc::now(),
            event_id,
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse an inbound payload. Anything that is not a complete envelope is rejected.
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        let envelope: EventEnvelope = serde_json::from_slice(payload)
            .map_err(|e| EventsError::EnvelopeError(e.to_string()))?;

        if envelope.entity_type.is_empty() {
            return Err(EventsError::EnvelopeError("empty entityType".to_string()));
        }
        if envelope.event_id.is_empty() {
            return Err(EventsError::EnvelopeError("empty eventId".to_string()));
        }

        Ok(envelope)
    }

    pub fn into_event(self, source: EventSource) -> MutationEvent {
        MutationEvent::new(self.entity_type, self.operation, self.args, self.result, source)
    }
}

/// Deterministic digest of `(entity_type, operation, args, result)`.
///
/// Identical content always hashes to the same id. Two distinct writes with
/// identical values therefore share an id too; the id only serves loop-back
/// suppression.
pub fn event_id(
    entity_type: &str,
    operation: Operation,
    args: &serde_json::Value,
    result: &serde_json::Value,
) -> String {
    let canonical = serde_json::json!([
        entity_type,
        operation.as_str(),
        canonicalize(args),
        canonicalize(result)
    ]);
    format!("{:x}", md5::compute(canonical.to_string()))
}

/// Rebuild objects with sorted keys so the encoding does not depend on
/// insertion order (serde_json may be built with `preserve_order`).
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}
