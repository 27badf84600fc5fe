use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::JobError;

/// Decoded form of the `payload` column: which handler to run and its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub handler: String,
    #[serde(default)]
    pub args: Value,
}

impl Payload {
    pub fn new(handler: impl Into<String>, args: Value) -> Self {
        Self {
            handler: handler.into(),
            args,
        }
    }

    pub fn decode(raw: &str) -> Result<Self, JobError> {
        let payload: Payload =
            serde_json::from_str(raw).map_err(|e| JobError::new("BAD_PAYLOAD", e.to_string()))?;
        if payload.handler.trim().is_empty() {
            return Err(JobError::new("BAD_PAYLOAD", "handler key is empty"));
        }
        Ok(payload)
    }

    pub fn encode(&self) -> String {
        // Serializing a String and a serde_json::Value cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
