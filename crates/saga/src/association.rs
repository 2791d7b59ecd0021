//! Correlating events to saga instances.

use common::SagaId;
use event_store::EventRecord;
use serde_json::Value;

use crate::{Result, SagaError};

/// Envelope fields that resolve to the record's aggregate id when the
/// payload does not carry the property itself.
const AGGREGATE_ID_FIELDS: [&str; 3] = ["aggregate_id", "aggregateId", "id"];

/// Reads the saga id named by `property` from `record`.
///
/// The payload is searched first; dotted properties (`transfer.id`)
/// descend into nested objects. If the payload has no such field, the
/// aggregate id fields of the envelope are consulted. The value must be a
/// UUID string.
pub fn resolve_saga_id(record: &EventRecord, property: &str) -> Result<SagaId> {
    if let Some(value) = lookup_path(&record.payload, property) {
        return parse(record, property, value);
    }

    if AGGREGATE_ID_FIELDS.contains(&property) {
        return Ok(SagaId::from(record.aggregate_id));
    }

    Err(SagaError::MissingAssociation {
        event_type: record.event_type.clone(),
        property: property.to_string(),
    })
}

fn lookup_path<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(payload, |value, segment| value.get(segment))
        .filter(|value| !value.is_null())
}

fn parse(record: &EventRecord, property: &str, value: &Value) -> Result<SagaId> {
    value
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| SagaError::InvalidAssociation {
            event_type: record.event_type.clone(),
            property: property.to_string(),
            value: value.to_string(),
        })
}
