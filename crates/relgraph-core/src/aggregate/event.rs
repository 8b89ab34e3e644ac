//! Stored event envelope and typed payload codec.
//!
//! An [`Event`] is the unit appended to the event log: the aggregate it
//! belongs to, its per-aggregate version, the event type discriminant, the
//! JSON payload and the caller metadata `{tenant, userId, app}`.
//!
//! Payloads are typed per aggregate through [`DomainEvent`]: an adjacently
//! tagged serde enum whose tag is the stored `eventType` and whose content
//! is the stored `data`.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Caller metadata attached to every event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventMetadata {
    pub tenant: String,
    pub user_id: String,
    pub app: String,
}

/// One immutable, versioned fact about an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub version: i64,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    pub metadata: EventMetadata,
}

impl Event {
    /// Tenant-local id of the aggregate, i.e. the aggregate id without its
    /// `<type>-<tenant>-` prefix.
    #[must_use]
    pub fn object_id(&self) -> &str {
        object_id(&self.aggregate_id, &self.aggregate_type, &self.metadata.tenant)
    }

    #[must_use]
    pub fn tenant(&self) -> &str {
        &self.metadata.tenant
    }

    /// Decode the payload into the aggregate's event enum.
    pub fn payload<E: DomainEvent>(&self) -> Result<E> {
        E::decode(&self.event_type, &self.data)
    }
}

/// Build the stream id `<type>-<tenant>-<objectId>`.
#[must_use]
pub fn aggregate_id(aggregate_type: &str, tenant: &str, object_id: &str) -> String {
    format!("{aggregate_type}-{tenant}-{object_id}")
}

/// Strip the `<type>-<tenant>-` prefix; ids without the prefix are returned
/// unchanged.
#[must_use]
pub fn object_id<'a>(aggregate_id: &'a str, aggregate_type: &str, tenant: &str) -> &'a str {
    aggregate_id
        .strip_prefix(aggregate_type)
        .and_then(|rest| rest.strip_prefix('-'))
        .and_then(|rest| rest.strip_prefix(tenant))
        .and_then(|rest| rest.strip_prefix('-'))
        .unwrap_or(aggregate_id)
}

/// Typed payload set of one aggregate type.
///
/// Implementors are serde enums declared with
/// `#[serde(tag = "eventType", content = "data")]` whose variants each carry
/// a struct payload.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone {
    /// Split into the stored `(eventType, data)` pair.
    fn encode(&self) -> Result<(String, Value)> {
        match serde_json::to_value(self)? {
            Value::Object(mut map) => {
                let event_type = match map.remove("eventType") {
                    Some(Value::String(event_type)) => event_type,
                    _ => return Err(Error::Internal("event enum is missing its tag".to_string())),
                };
                let data = map.remove("data").unwrap_or(Value::Null);
                Ok((event_type, data))
            }
            other => Err(Error::Internal(format!("event encoded as non-object {other}"))),
        }
    }

    /// Rebuild the typed event from the stored `(eventType, data)` pair.
    fn decode(event_type: &str, data: &Value) -> Result<Self> {
        let tagged = serde_json::json!({ "eventType": event_type, "data": data });
        serde_json::from_value(tagged).map_err(|err| {
            if err.to_string().contains("unknown variant") {
                Error::InvalidRequestType(event_type.to_string())
            } else {
                Error::Codec(err)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Renamed {
        name: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "eventType", content = "data")]
    enum SampleEvent {
        #[serde(rename = "SAMPLE_RENAMED")]
        Renamed(Renamed),
    }

    impl DomainEvent for SampleEvent {}

    #[test]
    fn object_id_strips_type_and_tenant() {
        let id = aggregate_id("contact", "ziggy", "c-1");
        assert_eq!(id, "contact-ziggy-c-1");
        assert_eq!(object_id(&id, "contact", "ziggy"), "c-1");
        assert_eq!(object_id("c-1", "contact", "ziggy"), "c-1");
        assert_eq!(object_id(&id, "contact", "other"), id);
    }

    #[test]
    fn payload_round_trips_through_tag_and_data() {
        let event = SampleEvent::Renamed(Renamed { name: "Acme".into() });
        let (event_type, data) = event.encode().expect("encode");
        assert_eq!(event_type, "SAMPLE_RENAMED");
        assert_eq!(data["name"], "Acme");
        assert_eq!(SampleEvent::decode(&event_type, &data).expect("decode"), event);
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let err = SampleEvent::decode("SAMPLE_DELETED", &serde_json::json!({}))
            .expect_err("unknown type");
        assert!(matches!(err, Error::InvalidRequestType(_)));
    }

    #[test]
    fn malformed_payload_is_a_codec_error() {
        let err = SampleEvent::decode("SAMPLE_RENAMED", &serde_json::json!({"name": 3}))
            .expect_err("bad payload");
        assert!(matches!(err, Error::Codec(_)));
    }
}
