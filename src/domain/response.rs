use serde::Serialize;

use crate::error::Result;

/// Boundary envelope consumed by the out-of-scope API layer.
///
/// Partial success still carries `status: true` with a "partially
/// bought/sold" message so callers can tell total failure from partial fills.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResponse {
    pub status: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl WorkflowResponse {
    pub fn ok(message: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            status: true,
            message: message.into(),
            data: serde_json::to_value(data).ok(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_status(mut self, status: bool) -> Self {
        self.status = status;
        self
    }
}

/// Attach the HTTP-equivalent status hint a workflow result maps to
pub fn with_status_hint(result: Result<WorkflowResponse>) -> (u16, WorkflowResponse) {
    match result {
        Ok(response) => (200, response),
        Err(e) => (e.status_hint(), WorkflowResponse::failure(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PocketError;

    #[test]
    fn errors_map_to_their_hint() {
        let (hint, response) = with_status_hint(Err(PocketError::PocketNotFound("P9".into())));
        assert_eq!(hint, 404);
        assert!(!response.status);
        assert!(response.message.contains("P9"));
    }

    #[test]
    fn ok_responses_carry_data() {
        let (hint, response) =
            with_status_hint(Ok(WorkflowResponse::ok("done", serde_json::json!({"n": 1}))));
        assert_eq!(hint, 200);
        assert!(response.status);
        assert!(response.data.is_some());
    }
}
