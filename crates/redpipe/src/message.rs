use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;
use crate::topics;

/// Unit of work flowing through a pipeline and across the topic bus.
///
/// `topic` routes the message when it is published, `payload` is the
/// caller's data, and any additional fields ride along in `extra`
/// (flattened when the message is rendered as JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Routing topic for publication (e.g. "orders", "metrics.cpu").
    pub topic: String,

    /// Arbitrary payload. `Value::Null` is a valid payload.
    #[serde(default)]
    pub payload: Value,

    /// Extra fields carried alongside the payload.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Field of an error event that carries the message the stage failed on.
const ORIGIN_FIELD: &str = "msg";

impl Message {
    /// Create a message with no extra fields.
    pub fn new(topic: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            extra: Map::new(),
        }
    }

    /// Create a message whose payload is `payload` serialized to JSON.
    pub fn encode<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(topic, serde_json::to_value(payload)?))
    }

    /// Deserialize the payload into the expected type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Strictly parse a JSON value into a message.
    ///
    /// The value must be an object with a string `topic` and a `payload`
    /// key (which may be `null`). All other keys become extra fields.
    pub fn from_value(value: Value) -> Result<Self, PipelineError> {
        let Value::Object(mut fields) = value else {
            return Err(PipelineError::MalformedMessage("expected a JSON object".into()));
        };
        let topic = match fields.remove("topic") {
            Some(Value::String(topic)) => topic,
            Some(_) => {
                return Err(PipelineError::MalformedMessage("topic is not a string".into()))
            }
            None => return Err(PipelineError::MalformedMessage("missing topic".into())),
        };
        let payload = fields
            .remove("payload")
            .ok_or_else(|| PipelineError::MalformedMessage("missing payload".into()))?;
        Ok(Self {
            topic,
            payload,
            extra: fields,
        })
    }

    /// Leniently turn submitted JSON into a message.
    ///
    /// A missing, empty, or non-string topic becomes `default_topic` and a
    /// missing payload becomes `null`. Non-object values yield `None`.
    pub fn from_input(value: Value, default_topic: &str) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };
        let topic = match fields.remove("topic") {
            Some(Value::String(topic)) if !topic.is_empty() => topic,
            _ => default_topic.to_string(),
        };
        let payload = fields.remove("payload").unwrap_or(Value::Null);
        Some(Self {
            topic,
            payload,
            extra: fields,
        })
    }

    /// Render the message as a single JSON object (extra fields flattened).
    pub fn to_value(&self) -> Value {
        let mut fields = self.extra.clone();
        fields.insert("topic".into(), Value::String(self.topic.clone()));
        fields.insert("payload".into(), self.payload.clone());
        Value::Object(fields)
    }

    /// Copy this message, replacing the payload.
    pub fn with_payload(&self, payload: impl Into<Value>) -> Self {
        Self {
            topic: self.topic.clone(),
            payload: payload.into(),
            extra: self.extra.clone(),
        }
    }

    /// Attach (or overwrite) an extra field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Look up an extra field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Build the event published on [`topics::ERROR`] when a stage fails on `origin`.
    pub(crate) fn stage_error(error: String, origin: &Message) -> Self {
        Self::new(topics::ERROR, error).with_field(ORIGIN_FIELD, origin.to_value())
    }

    /// For error events: the message the failing stage was given.
    pub fn origin(&self) -> Option<Message> {
        self.extra
            .get(ORIGIN_FIELD)
            .and_then(|value| Message::from_value(value.clone()).ok())
    }
}
