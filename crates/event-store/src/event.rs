use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::AggregateId;

/// Storage-assigned identifier of a persisted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-aggregate sequence number used for optimistic concurrency control.
///
/// The first event of an aggregate has version 0 and every following event
/// increments it by one. [`Version::initial`] (-1) stands for "no events yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The version of an aggregate without events.
    pub fn initial() -> Self {
        Self(-1)
    }

    /// The version of an aggregate's first event.
    pub fn first() -> Self {
        Self(0)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn is_initial(&self) -> bool {
        self.0 < 0
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Number of events an aggregate at this version has seen.
    pub fn event_count(&self) -> u64 {
        (self.0 + 1).max(0) as u64
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::initial()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// A fact produced by an aggregate, before the store has assigned its
/// final version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: String,
    pub aggregate_id: AggregateId,
    /// Version the producing aggregate reached by applying this event.
    pub version: Version,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: AggregateId,
        version: Version,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            aggregate_id,
            version,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Builds an event from a serializable payload.
    pub fn from_payload<T: Serialize>(
        event_type: impl Into<String>,
        aggregate_id: AggregateId,
        version: Version,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            event_type,
            aggregate_id,
            version,
            serde_json::to_value(payload)?,
        ))
    }
}

/// The persisted form of an [`Event`].
///
/// For a fixed `aggregate_id`, records are unique per `version` and form a
/// gap-free sequence starting at [`Version::first`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: EventId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub event_type: String,
    pub version: Version,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    /// Wraps `event` for storage at `version`, which overrides the
    /// version the aggregate proposed.
    pub fn new(aggregate_type: impl Into<String>, version: Version, event: Event) -> Self {
        Self {
            id: EventId::new(),
            aggregate_id: event.aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type,
            version,
            payload: event.payload,
            timestamp: event.timestamp,
        }
    }

    /// Deserializes the payload into a concrete event type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    pub fn to_event(&self) -> Event {
        Event {
            event_type: self.event_type.clone(),
            aggregate_id: self.aggregate_id,
            version: self.version,
            payload: self.payload.clone(),
            timestamp: self.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_start_below_zero() {
        assert_eq!(Version::initial().as_i64(), -1);
        assert_eq!(Version::first().as_i64(), 0);
        assert_eq!(Version::initial().next(), Version::first());
        assert!(Version::default().is_initial());
        assert!(!Version::first().is_initial());
    }

    #[test]
    fn event_count_follows_version() {
        assert_eq!(Version::initial().event_count(), 0);
        assert_eq!(Version::first().event_count(), 1);
        assert_eq!(Version::new(9).event_count(), 10);
    }

    #[test]
    fn record_takes_assigned_version() {
        let id = AggregateId::new();
        let event = Event::new("Deposited", id, Version::new(7), serde_json::json!({"amount": 5}));

        let record = EventRecord::new("Account", Version::new(3), event.clone());

        assert_eq!(record.version, Version::new(3));
        assert_eq!(record.aggregate_id, id);
        assert_eq!(record.aggregate_type, "Account");
        assert_eq!(record.event_type, "Deposited");
        assert_eq!(record.payload, event.payload);
        assert_eq!(record.timestamp, event.timestamp);
    }

    #[test]
    fn record_serializes_with_stable_field_names() {
        let record = EventRecord::new(
            "Account",
            Version::first(),
            Event::new("Opened", AggregateId::new(), Version::first(), serde_json::json!({})),
        );

        let json = serde_json::to_value(&record).unwrap();

        for field in [
            "id",
            "aggregateId",
            "aggregateType",
            "eventType",
            "version",
            "payload",
            "timestamp",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert_eq!(json["version"], serde_json::json!(0));
    }

    #[test]
    fn payload_as_reads_typed_payload() {
        #[derive(Debug, PartialEq, Deserialize)]
        struct Deposited {
            amount: u64,
        }

        let event = Event::new(
            "Deposited",
            AggregateId::new(),
            Version::first(),
            serde_json::json!({"amount": 40}),
        );
        let record = EventRecord::new("Account", Version::first(), event);

        assert_eq!(record.payload_as::<Deposited>().unwrap(), Deposited { amount: 40 });
    }
}
