//! Job payload encoding.
//!
//! A payload is a tagged value: its [`PayloadKind`] says how the body is
//! framed and its type tag names the decoder registered in a
//! [`JobRegistry`]. Queue backends store the encoded envelope and never look
//! inside it.
//!
//! ```rust
//! use aint_queue::serializer::{JobPayload, PayloadKind};
//!
//! let payload = JobPayload::callable("send_report", &serde_json::json!({"week": 42})).unwrap();
//! let stored = payload.encode().unwrap();
//!
//! let decoded = JobPayload::decode(1, &stored).unwrap();
//! assert_eq!(decoded.kind, PayloadKind::Callable);
//! assert_eq!(decoded.type_tag, "send_report");
//! ```

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;

use crate::core::Job;
use crate::error::{QueueError, Result};

pub mod compress;
pub mod registry;

pub use registry::JobRegistry;

/// A job type that can be stored by name and rebuilt from its JSON form.
pub trait NamedJob: Job + Serialize + DeserializeOwned + 'static {
    /// Type tag written into the payload.
    const NAME: &'static str;
}

/// How a payload body is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Registered function name plus JSON arguments
    Callable,
    /// JSON body of a [`NamedJob`]
    Object,
    /// JSON body of a [`NamedJob`] behind a compression flag byte
    CompressedObject,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Callable => "callable",
            PayloadKind::Object => "object",
            PayloadKind::CompressedObject => "compressed_object",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "callable" => Some(PayloadKind::Callable),
            "object" => Some(PayloadKind::Object),
            "compressed_object" => Some(PayloadKind::CompressedObject),
            _ => None,
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    kind: String,
    #[serde(rename = "type")]
    type_tag: String,
    body: String,
}

/// An encoded job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPayload {
    pub kind: PayloadKind,
    pub type_tag: String,
    pub body: Vec<u8>,
}

impl JobPayload {
    /// Payload invoking a registered function with JSON arguments.
    pub fn callable<A: Serialize>(name: impl Into<String>, args: &A) -> Result<Self> {
        Ok(Self {
            kind: PayloadKind::Callable,
            type_tag: name.into(),
            body: serde_json::to_vec(args)?,
        })
    }

    pub fn object<J: NamedJob>(job: &J) -> Result<Self> {
        Ok(Self {
            kind: PayloadKind::Object,
            type_tag: J::NAME.to_string(),
            body: serde_json::to_vec(job)?,
        })
    }

    /// Like [`JobPayload::object`], deflating bodies of at least `threshold` bytes.
    pub fn compressed<J: NamedJob>(job: &J, threshold: usize) -> Result<Self> {
        let json = serde_json::to_vec(job)?;
        Ok(Self {
            kind: PayloadKind::CompressedObject,
            type_tag: J::NAME.to_string(),
            body: compress::pack(&json, threshold)?,
        })
    }

    /// JSON text of the body with any compression framing removed.
    pub fn json_body(&self) -> Result<Vec<u8>> {
        match self.kind {
            PayloadKind::CompressedObject => compress::unpack(&self.body),
            PayloadKind::Callable | PayloadKind::Object => Ok(self.body.clone()),
        }
    }

    /// Envelope string stored in the messages hash.
    pub fn encode(&self) -> Result<String> {
        let envelope = Envelope {
            kind: self.kind.as_str().to_string(),
            type_tag: self.type_tag.clone(),
            body: BASE64.encode(&self.body),
        };
        Ok(serde_json::to_string(&envelope)?)
    }

    /// Parse a stored envelope. Any defect is an invalid job.
    pub fn decode(id: u64, raw: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(raw)
            .map_err(|e| QueueError::invalid_job(id, format!("malformed envelope: {}", e)))?;
        let kind = PayloadKind::from_tag(&envelope.kind).ok_or_else(|| {
            QueueError::invalid_job(id, format!("unknown payload kind '{}'", envelope.kind))
        })?;
        let body = BASE64
            .decode(envelope.body.as_bytes())
            .map_err(|e| QueueError::invalid_job(id, format!("body is not base64: {}", e)))?;

        Ok(Self {
            kind,
            type_tag: envelope.type_tag,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_kind_is_invalid_job() {
        let raw = r#"{"kind":"closure","type":"x","body":""}"#;
        match JobPayload::decode(12, raw) {
            Err(QueueError::InvalidJob { id, message }) => {
                assert_eq!(id, 12);
                assert!(message.contains("closure"));
            }
            other => panic!("expected invalid job, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_invalid_job() {
        assert!(matches!(
            JobPayload::decode(3, "not json"),
            Err(QueueError::InvalidJob { id: 3, .. })
        ));
    }

    #[test]
    fn test_envelope_keeps_binary_body() {
        let payload = JobPayload {
            kind: PayloadKind::CompressedObject,
            type_tag: "blob".to_string(),
            body: vec![1, 0, 255, 7],
        };
        let decoded = JobPayload::decode(1, &payload.encode().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }
}
