use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AppError;

/// Payload key carrying the subject's platform user id.
pub const SUBJECT_KEY: &str = "discordId";

/// Payload key carrying the test result text.
pub const RESULT_KEY: &str = "result";

/// A validated notification request, the unit of work on the event queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Correlation id for log lines
    pub id: Uuid,
    /// Platform user id of the subject
    pub subject_id: u64,
    /// Trimmed, non-empty outcome text (e.g. "sikeres", "fail")
    pub result: String,
    pub received_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(subject_id: u64, result: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id,
            result: result.into(),
            received_at: Utc::now(),
        }
    }

    /// Validate a raw webhook body and normalize it into an event.
    ///
    /// `discordId` may be a JSON number or a numeric string; `result` may be a
    /// string, number or boolean. Both must be present and non-empty.
    pub fn from_payload(payload: &Value) -> Result<Self, AppError> {
        let body = payload.as_object().ok_or_else(|| {
            AppError::Validation("Request body must be a JSON object".to_string())
        })?;

        let subject_id = match body.get(SUBJECT_KEY) {
            None | Some(Value::Null) => return Err(missing(SUBJECT_KEY)),
            Some(raw) => normalize_subject_id(raw)?,
        };

        let result = match body.get(RESULT_KEY) {
            None | Some(Value::Null) => return Err(missing(RESULT_KEY)),
            Some(raw) => normalize_result(raw)?,
        };

        Ok(Self::new(subject_id, result))
    }

    /// Platform mention markup for the subject.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.subject_id)
    }
}

fn missing(key: &str) -> AppError {
    AppError::Validation(format!("Missing {}", key))
}

/// Normalize a subject id given as a number or numeric string.
pub fn normalize_subject_id(raw: &Value) -> Result<u64, AppError> {
    let parsed = match raw {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err(missing(SUBJECT_KEY));
            }
            trimmed.parse::<u64>().ok()
        }
        _ => None,
    };

    match parsed {
        Some(id) if id > 0 => Ok(id),
        _ => Err(AppError::Validation(format!(
            "{} must be a positive integer",
            SUBJECT_KEY
        ))),
    }
}

/// Normalize a result value into trimmed text.
pub fn normalize_result(raw: &Value) -> Result<String, AppError> {
    let text = match raw {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => {
            return Err(AppError::Validation(format!(
                "{} must be a string",
                RESULT_KEY
            )));
        }
    };

    if text.is_empty() {
        return Err(missing(RESULT_KEY));
    }
    Ok(text)
}
