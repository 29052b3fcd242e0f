use super::error::HTTP_STATUS_GOOD;
use super::request::ApiRequestBase;
use crate::timestamp::Timestamp;
use crate::SERVER_VERSION;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The uniform envelope every API endpoint answers with.
///
/// Fields are private so that `success == (status == 200)` always holds:
/// only [`ApiResponse::success`] builds a successful envelope, and error
/// envelopes come from [`ApiError::to_response`](super::ApiError::to_response).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse {
    id: String,
    locator: String,
    #[serde(rename = "server-version")]
    server_version: String,
    #[serde(rename = "start-timestamp")]
    start_timestamp: Timestamp,
    #[serde(rename = "end-timestamp")]
    end_timestamp: Timestamp,
    status: u16,
    success: bool,
    message: String,
    content: Value,
}

impl ApiResponse {
    pub fn success(base: &ApiRequestBase, content: Value) -> Self {
        Self {
            id: base.request_id.to_string(),
            locator: String::new(),
            server_version: SERVER_VERSION.to_string(),
            start_timestamp: base.timestamp,
            end_timestamp: Timestamp::now(),
            status: HTTP_STATUS_GOOD,
            success: true,
            message: String::new(),
            content,
        }
    }

    pub(crate) fn failure(
        id: String,
        locator: String,
        start_timestamp: Timestamp,
        status: u16,
        message: String,
    ) -> Self {
        Self {
            id,
            locator,
            server_version: SERVER_VERSION.to_string(),
            start_timestamp,
            end_timestamp: Timestamp::now(),
            status,
            success: status == HTTP_STATUS_GOOD,
            message,
            content: Value::Null,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn start_timestamp(&self) -> Timestamp {
        self.start_timestamp
    }

    pub fn end_timestamp(&self) -> Timestamp {
        self.end_timestamp
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    pub fn into_content(self) -> Value {
        self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::RequestId;

    #[test]
    fn test_success_envelope() {
        let mut base = ApiRequestBase::default();
        base.request_id = RequestId::new();
        base.timestamp = Timestamp(1_000);

        let response = ApiResponse::success(&base, serde_json::json!({"a": 1}));
        assert!(response.success());
        assert_eq!(response.status(), 200);
        assert_eq!(response.id(), base.request_id.to_string());
        assert_eq!(response.start_timestamp(), Timestamp(1_000));
        assert!(response.end_timestamp() >= response.start_timestamp());
        assert_eq!(response.server_version(), SERVER_VERSION);
    }

    #[test]
    fn test_wire_names() {
        let response = ApiResponse::failure("x".into(), "-018".into(), Timestamp(5), 400, "m".into());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["server-version"], SERVER_VERSION);
        assert_eq!(json["start-timestamp"], 5);
        assert_eq!(json["success"], false);
        assert!(json["content"].is_null());

        let back: ApiResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, response);
    }
}
