//! # CloudEvent Envelope
//!
//! Self-describing envelope for every message that crosses the bus.
//!
//! ## Design Principles
//!
//! 1. **CloudEvents 1.0 structured mode**: one JSON document carries the
//!    routing attributes and the payload
//! 2. **Validated construction**: `type`, `source`, `id`, `specversion` and
//!    `data` are mandatory; an envelope that lacks one never exists
//! 3. **Immutable**: fields are private and only readable through getters
//! 4. **Typed payloads**: consumers decode the envelope once with an opaque
//!    `serde_json::Value` payload and [`CloudEvent::cast`] it into the
//!    concrete payload type selected by the `type` discriminator
//!
//! ## Envelope Attributes
//!
//! - `type`: discriminator that selects payload schema and dispatch
//! - `source`: URI identifying the producing system
//! - `id`: unique per message (a UUID when produced here)
//! - `specversion`: CloudEvents version, `"1.0"`
//! - `dataschema`, `subject`, `time`, `datacontenttype`: optional
//! - `data`: the payload (generic type parameter)

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// CloudEvents specification version written on every produced envelope
pub const CLOUD_EVENTS_SPEC_VERSION: &str = "1.0";

/// Content type of JSON encoded `data`
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Errors raised while constructing or decoding an envelope
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope attribute '{0}' is missing or empty")]
    MissingAttribute(&'static str),

    #[error("envelope data must not be null")]
    NullData,

    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failure to cast an opaque payload into a concrete payload type.
///
/// A cast failure means the producer and consumer disagree on the payload
/// shape. It is always unrecoverable: retrying the same bytes can only fail
/// again.
#[derive(Debug, thiserror::Error)]
pub enum CastError {
    #[error("unrecoverable: cloud event {event_id} has a null payload, expected {target}")]
    NullPayload {
        event_id: String,
        target: &'static str,
    },

    #[error("unrecoverable: cloud event {event_id} payload does not match {target}: {source}")]
    Incompatible {
        event_id: String,
        target: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl CastError {
    /// Id of the envelope whose payload could not be cast
    pub fn event_id(&self) -> &str {
        match self {
            CastError::NullPayload { event_id, .. } | CastError::Incompatible { event_id, .. } => {
                event_id
            }
        }
    }
}

/// CloudEvents 1.0 envelope
///
/// # Type Parameter
///
/// * `T` - The event payload type. Consumers start from
///   `CloudEvent<serde_json::Value>` and cast.
///
/// # Examples
///
/// ```rust
/// use event_bus::CloudEvent;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Ping {
///     seq: u32,
/// }
///
/// let envelope = CloudEvent::new(
///     "example.ping.v1",
///     "urn:example:pinger",
///     "6f1c1e9e-3b8e-4b0c-9d8d-1f3c0b6a7e11",
///     serde_json::json!({ "seq": 7 }),
/// )
/// .unwrap();
///
/// let typed = envelope.cast::<Ping>().unwrap();
/// assert_eq!(typed.data(), &Ping { seq: 7 });
/// assert_eq!(typed.id(), envelope.id());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent<T> {
    #[serde(rename = "type")]
    event_type: String,

    source: String,

    id: String,

    #[serde(rename = "specversion", alias = "specVersion")]
    spec_version: String,

    #[serde(
        rename = "dataschema",
        alias = "dataSchema",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    data_schema: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    subject: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<DateTime<Utc>>,

    #[serde(
        rename = "datacontenttype",
        alias = "dataContentType",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    data_content_type: Option<String>,

    data: T,
}

impl<T> CloudEvent<T> {
    /// Create a new envelope, validating the mandatory attributes.
    ///
    /// `specversion` is set to [`CLOUD_EVENTS_SPEC_VERSION`].
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        id: impl Into<String>,
        data: T,
    ) -> Result<Self, EnvelopeError> {
        let envelope = Self {
            event_type: event_type.into(),
            source: source.into(),
            id: id.into(),
            spec_version: CLOUD_EVENTS_SPEC_VERSION.to_string(),
            data_schema: None,
            subject: None,
            time: None,
            data_content_type: None,
            data,
        };
        envelope.validate()?;
        Ok(envelope)
    }

    /// Create a new envelope with a freshly generated UUID v4 id
    pub fn generate(
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: T,
    ) -> Result<Self, EnvelopeError> {
        Self::new(event_type, source, Uuid::new_v4().to_string(), data)
    }

    pub fn with_data_schema(mut self, data_schema: impl Into<String>) -> Self {
        self.data_schema = Some(data_schema.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_data_content_type(mut self, data_content_type: impl Into<String>) -> Self {
        self.data_content_type = Some(data_content_type.into());
        self
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn spec_version(&self) -> &str {
        &self.spec_version
    }

    pub fn data_schema(&self) -> Option<&str> {
        self.data_schema.as_deref()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.time
    }

    pub fn data_content_type(&self) -> Option<&str> {
        self.data_content_type.as_deref()
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// Check that every mandatory string attribute is present and non-empty
    fn validate(&self) -> Result<(), EnvelopeError> {
        let required = [
            ("type", &self.event_type),
            ("source", &self.source),
            ("id", &self.id),
            ("specversion", &self.spec_version),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(EnvelopeError::MissingAttribute(name));
            }
        }

        Ok(())
    }

    /// Rebuild the envelope around a different payload, keeping every attribute
    fn map_data<U>(&self, data: U) -> CloudEvent<U> {
        CloudEvent {
            event_type: self.event_type.clone(),
            source: self.source.clone(),
            id: self.id.clone(),
            spec_version: self.spec_version.clone(),
            data_schema: self.data_schema.clone(),
            subject: self.subject.clone(),
            time: self.time,
            data_content_type: self.data_content_type.clone(),
            data,
        }
    }
}

impl<T: Serialize> CloudEvent<T> {
    /// Serialize the envelope to its JSON wire form
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Convert a typed envelope back into one with an opaque payload
    pub fn to_untyped(&self) -> Result<CloudEvent<Value>, serde_json::Error> {
        Ok(self.map_data(serde_json::to_value(&self.data)?))
    }
}

impl CloudEvent<Value> {
    /// Decode an envelope with an opaque payload from wire bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: CloudEvent<Value> = serde_json::from_slice(bytes)?;
        envelope.validate()?;

        if envelope.data.is_null() {
            return Err(EnvelopeError::NullData);
        }

        Ok(envelope)
    }

    /// Cast the opaque payload into `U`, producing a new envelope.
    ///
    /// The payload is deserialized directly from the JSON value, so a JSON
    /// string cast to `String` passes through unchanged. The source envelope
    /// is left untouched. Both outcomes are logged with the envelope id.
    pub fn cast<U: DeserializeOwned>(&self) -> Result<CloudEvent<U>, CastError> {
        let target = std::any::type_name::<U>();

        tracing::debug!(event_id = %self.id, target, "Casting cloud event payload");

        if self.data.is_null() {
            tracing::error!(event_id = %self.id, target, "Cloud event payload is null");
            return Err(CastError::NullPayload {
                event_id: self.id.clone(),
                target,
            });
        }

        match U::deserialize(&self.data) {
            Ok(data) => Ok(self.map_data(data)),
            Err(source) => {
                tracing::error!(
                    event_id = %self.id,
                    event_type = %self.event_type,
                    target,
                    error = %source,
                    "Failed to cast cloud event payload into the requested type"
                );
                Err(CastError::Incompatible {
                    event_id: self.id.clone(),
                    target,
                    source,
                })
            }
        }
    }
}
