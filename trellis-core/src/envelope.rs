//! The standard JSON response envelope.
//!
//! ```json
//! { "status": "success", "message": "OK", "data": [...], "total": 42 }
//! { "status": "failed", "message": "Unprocessable Entity", "errors": { "email": "invalid" } }
//! ```
//!
//! Empty fields are omitted. The HTTP status travels in the status line.

use crate::error::{Error, Result};
use http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(skip)]
    pub code: StatusCode,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub message: Value,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(skip_serializing_if = "is_zero")]
    pub total: i64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_data<T: Serialize + ?Sized>(&mut self, data: &T) -> Result<()> {
        self.data = serde_json::to_value(data)?;
        Ok(())
    }

    pub fn set_total(&mut self, total: i64) {
        self.total = total;
    }

    pub fn set_message(&mut self, message: impl Into<Value>) {
        self.message = message.into();
    }

    /// Mark the envelope successful with a 200 code.
    pub fn succeed(&mut self) {
        self.code = StatusCode::OK;
        self.status = STATUS_SUCCESS.to_string();
    }

    /// Turn the envelope into a failure for `err`.
    ///
    /// Data and total are dropped. HTTP errors keep their code, validation
    /// failures become 422 with the field map, anything else is 400. The
    /// message is the status text of the resulting code.
    pub fn set_error(&mut self, err: &Error) {
        self.code = match err {
            Error::Http(e) => e.code,
            Error::Validation(v) => {
                self.errors = v
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::BAD_REQUEST,
        };
        self.status = STATUS_FAILED.to_string();
        self.data = Value::Null;
        self.total = 0;
        self.message = Value::String(
            self.code
                .canonical_reason()
                .unwrap_or_default()
                .to_string(),
        );
    }

    pub(crate) fn reset(&mut self) {
        self.code = StatusCode::OK;
        self.status.clear();
        self.message = Value::Null;
        self.data = Value::Null;
        self.total = 0;
        self.errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HttpError, ValidationErrors};
    use serde_json::json;

    #[test]
    fn test_empty_fields_are_omitted() {
        let mut envelope = Envelope::new();
        envelope.succeed();
        envelope.set_data(&vec![1, 2]).unwrap();
        envelope.set_total(2);

        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"status": "success", "data": [1, 2], "total": 2})
        );
    }

    #[test]
    fn test_set_error_http() {
        let mut envelope = Envelope::new();
        envelope.set_data(&"dropped").unwrap();
        envelope.set_error(&HttpError::new(StatusCode::CONFLICT).into());

        assert_eq!(envelope.code, StatusCode::CONFLICT);
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"status": "failed", "message": "Conflict"})
        );
    }

    #[test]
    fn test_set_error_validation() {
        let mut envelope = Envelope::new();
        envelope.set_error(&ValidationErrors::new().with("email", "invalid").into());

        assert_eq!(envelope.code, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "status": "failed",
                "message": "Unprocessable Entity",
                "errors": {"email": "invalid"}
            })
        );
    }

    #[test]
    fn test_set_error_other_is_bad_request() {
        let mut envelope = Envelope::new();
        envelope.set_error(&Error::internal("nope"));
        assert_eq!(envelope.code, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_reset() {
        let mut envelope = Envelope::new();
        envelope.set_error(&ValidationErrors::new().with("a", "b").into());
        envelope.reset();
        assert_eq!(envelope, Envelope::new());
    }
}
