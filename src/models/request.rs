//! Invocation payloads and responses.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::models::SnapshotDate;

/// A page number as invokers send it: integer, numeric string, or an
/// object wrapping either under `page_number`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PageNumberInput {
    Int(i64),
    Text(String),
    Nested { page_number: Box<PageNumberInput> },
}

impl PageNumberInput {
    /// Resolve to a page number ≥ 1.
    pub fn resolve(&self) -> Result<u32> {
        let raw = match self {
            Self::Int(n) => *n,
            Self::Text(s) => s.trim().parse::<i64>().map_err(|_| {
                AppError::invalid_input(format!("page_number '{s}' is not numeric"))
            })?,
            Self::Nested { page_number } => return page_number.resolve(),
        };
        u32::try_from(raw)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| AppError::invalid_input(format!("page_number {raw} must be >= 1")))
    }
}

/// Crawl-page invocation payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrawlPageRequest {
    #[serde(default)]
    pub page_number: Option<PageNumberInput>,

    #[serde(default)]
    pub snapshot_date: Option<String>,
}

impl CrawlPageRequest {
    /// Requested page, defaulting to 1.
    pub fn page_number(&self) -> Result<u32> {
        self.page_number
            .as_ref()
            .map(PageNumberInput::resolve)
            .unwrap_or(Ok(1))
    }

    /// Requested snapshot date, defaulting to today (UTC).
    pub fn snapshot_date(&self) -> Result<SnapshotDate> {
        match self.snapshot_date.as_deref() {
            Some(raw) => raw.parse(),
            None => Ok(SnapshotDate::today_utc()),
        }
    }
}

/// Merge invocation payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MergeRequest {
    #[serde(default)]
    pub snapshot_date: Option<String>,
}

impl MergeRequest {
    /// The required snapshot date.
    pub fn snapshot_date(&self) -> Result<SnapshotDate> {
        self.snapshot_date
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::invalid_input("Missing 'snapshot_date' in event"))?
            .parse()
    }
}

/// Status-coded response returned to invokers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: Value,
}

impl InvocationResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    pub fn error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            body: json!({ "error": message.into() }),
        }
    }
}

impl From<&AppError> for InvocationResponse {
    fn from(error: &AppError) -> Self {
        Self::error(error.status_code(), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_of(json: &str) -> Result<u32> {
        let request: CrawlPageRequest = serde_json::from_str(json).unwrap();
        request.page_number()
    }

    #[test]
    fn test_page_number_shapes() {
        assert_eq!(page_of(r#"{"page_number": 4}"#).unwrap(), 4);
        assert_eq!(page_of(r#"{"page_number": "7"}"#).unwrap(), 7);
        assert_eq!(page_of(r#"{"page_number": {"page_number": 2}}"#).unwrap(), 2);
        assert_eq!(
            page_of(r#"{"page_number": {"page_number": "11"}}"#).unwrap(),
            11
        );
    }

    #[test]
    fn test_page_number_defaults_to_one() {
        assert_eq!(page_of("{}").unwrap(), 1);
        assert_eq!(page_of(r#"{"page_number": null}"#).unwrap(), 1);
    }

    #[test]
    fn test_page_number_rejects_invalid() {
        assert!(matches!(
            page_of(r#"{"page_number": 0}"#),
            Err(AppError::InvalidInput(_))
        ));
        assert!(page_of(r#"{"page_number": "abc"}"#).is_err());
        assert!(page_of(r#"{"page_number": -3}"#).is_err());
    }

    #[test]
    fn test_merge_request_requires_date() {
        let request: MergeRequest = serde_json::from_str("{}").unwrap();
        let err = request.snapshot_date().unwrap_err();
        assert_eq!(err.status_code(), 400);

        let request: MergeRequest =
            serde_json::from_str(r#"{"snapshot_date": "2025-10-02"}"#).unwrap();
        assert_eq!(request.snapshot_date().unwrap().to_string(), "20251002");
    }

    #[test]
    fn test_response_shape() {
        let response = InvocationResponse::ok(json!({ "message": "done" }));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["statusCode"], 200);
        assert_eq!(value["body"]["message"], "done");

        let err = AppError::invalid_input("bad");
        let response = InvocationResponse::from(&err);
        assert_eq!(response.status_code, 400);
        assert_eq!(response.body["error"], "Invalid input: bad");
    }
}
