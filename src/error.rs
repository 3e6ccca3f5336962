//! JSON status replies for activation requests

use crate::activator::{Activation, ActivationError};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Outcome reported to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WakeStatus {
    /// Host or name not configured
    Ignored,
    /// Activation could not proceed
    Error,
    /// Stack was already up
    Running,
    /// Stack launch in progress
    Starting,
}

impl WakeStatus {
    /// Get the default HTTP status code for this outcome
    pub fn status_code(&self) -> StatusCode {
        match self {
            WakeStatus::Ignored => StatusCode::NOT_FOUND,
            WakeStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
            WakeStatus::Running => StatusCode::OK,
            WakeStatus::Starting => StatusCode::ACCEPTED,
        }
    }

    /// Get the status as a string for the X-Wake-Status header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            WakeStatus::Ignored => "ignored",
            WakeStatus::Error => "error",
            WakeStatus::Running => "running",
            WakeStatus::Starting => "starting",
        }
    }
}

/// JSON body: `{status, message?, stack?}`
#[derive(Debug, Serialize)]
pub struct WakeReply {
    pub status: WakeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// HTTP status to send, not part of the body
    #[serde(skip)]
    pub http_status: StatusCode,
}

impl WakeReply {
    pub fn ignored(message: impl Into<String>) -> Self {
        Self {
            status: WakeStatus::Ignored,
            message: Some(message.into()),
            stack: None,
            http_status: WakeStatus::Ignored.status_code(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: WakeStatus::Error,
            message: Some(message.into()),
            stack: None,
            http_status: WakeStatus::Error.status_code(),
        }
    }

    /// Reply for an activation outcome of `stack`
    pub fn from_activation(stack: &str, result: &Result<Activation, ActivationError>) -> Self {
        match result {
            Ok(Activation::AlreadyRunning) => Self::with_stack(WakeStatus::Running, stack),
            Ok(Activation::Starting) => Self::with_stack(WakeStatus::Starting, stack),
            Err(e @ ActivationError::ComposeNotFound { .. }) => Self::error(e.to_string()),
            Err(e @ ActivationError::LaunchFailed { .. }) => {
                let mut reply = Self::error(e.to_string());
                reply.http_status = StatusCode::SERVICE_UNAVAILABLE;
                reply
            }
        }
    }

    fn with_stack(status: WakeStatus, stack: &str) -> Self {
        Self {
            status,
            message: None,
            stack: Some(stack.to_string()),
            http_status: status.status_code(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"status":"{}"}}"#, self.status.as_header_value())
        })
    }
}

/// Create a JSON reply with the X-Wake-Status header
pub fn json_reply(reply: &WakeReply) -> Response<Full<Bytes>> {
    Response::builder()
        .status(reply.http_status)
        .header("Content-Type", "application/json")
        .header("X-Wake-Status", reply.status.as_header_value())
        .body(Full::new(Bytes::from(reply.to_json())))
        .expect("valid response with StatusCode enum and static headers")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_status_codes() {
        assert_eq!(WakeStatus::Ignored.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(WakeStatus::Error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(WakeStatus::Running.status_code(), StatusCode::OK);
        assert_eq!(WakeStatus::Starting.status_code(), StatusCode::ACCEPTED);
    }

    #[test]
    fn test_ignored_reply_json() {
        let reply = WakeReply::ignored("Host foo no configurado");
        assert_eq!(
            reply.to_json(),
            r#"{"status":"ignored","message":"Host foo no configurado"}"#
        );
    }

    #[test]
    fn test_activation_replies() {
        let reply = WakeReply::from_activation("demo", &Ok(Activation::Starting));
        assert_eq!(reply.to_json(), r#"{"status":"starting","stack":"demo"}"#);
        assert_eq!(reply.http_status, StatusCode::ACCEPTED);

        let reply = WakeReply::from_activation("demo", &Ok(Activation::AlreadyRunning));
        assert_eq!(reply.to_json(), r#"{"status":"running","stack":"demo"}"#);
        assert_eq!(reply.http_status, StatusCode::OK);
    }

    #[test]
    fn test_activation_error_replies() {
        let missing = Err(ActivationError::ComposeNotFound {
            dir: PathBuf::from("/srv/demo"),
        });
        let reply = WakeReply::from_activation("demo", &missing);
        assert_eq!(
            reply.to_json(),
            r#"{"status":"error","message":"No se encontró archivo compose en /srv/demo"}"#
        );

        let failed = Err(ActivationError::LaunchFailed {
            project: "demo".to_string(),
            source: anyhow::anyhow!("permission denied"),
        });
        let reply = WakeReply::from_activation("demo", &failed);
        assert_eq!(reply.status, WakeStatus::Error);
        assert_eq!(reply.http_status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(reply.message.unwrap().contains("permission denied"));
    }

    #[test]
    fn test_json_reply_headers() {
        let response = json_reply(&WakeReply::ignored("Host x no configurado"));

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );
        assert_eq!(response.headers().get("X-Wake-Status").unwrap(), "ignored");
    }
}
