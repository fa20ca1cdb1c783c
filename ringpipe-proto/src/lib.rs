//! Wire types for the ringpipe metadata directory protocol.
//!
//! The directory speaks newline-delimited JSON over TCP: one request object
//! per line, one response object per line. Values are opaque strings; callers
//! that need to move binary blobs base64-encode them before they reach this
//! layer.

use serde::{Deserialize, Serialize};

/// A single directory command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Request {
    /// Store a key/value pair, overwriting any previous value.
    #[serde(rename = "SET")]
    Set { key: String, value: String },
    /// Look up the value stored under a key.
    #[serde(rename = "GET")]
    Get { key: String },
    /// Drop every stored key.
    #[serde(rename = "CLEAR")]
    Clear,
}

/// The directory's reply to a [`Request`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "OK")]
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    #[serde(rename = "ERROR")]
    Error { message: String },
}

impl Response {
    /// Plain acknowledgement with no payload.
    pub fn ok() -> Self {
        Response::Ok { value: None }
    }

    /// Successful lookup carrying the stored value.
    pub fn ok_value(value: impl Into<String>) -> Self {
        Response::Ok {
            value: Some(value.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Response::Error {
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }

    /// Extract the value of a successful lookup, if any.
    pub fn into_value(self) -> Option<String> {
        match self {
            Response::Ok { value } => value,
            Response::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Request, Response};

    #[test]
    fn set_request_wire_shape() {
        let req = Request::Set {
            key: "sender_metadata".to_string(),
            value: "YWJj".to_string(),
        };
        let json = serde_json::to_string(&req).expect("serialize");
        assert_eq!(
            json,
            r#"{"cmd":"SET","key":"sender_metadata","value":"YWJj"}"#
        );
        let back: Request = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, req);
    }

    #[test]
    fn get_request_wire_shape() {
        let json = r#"{"cmd":"GET","key":"receiver_metadata"}"#;
        let req: Request = serde_json::from_str(json).expect("deserialize");
        assert_eq!(
            req,
            Request::Get {
                key: "receiver_metadata".to_string()
            }
        );
    }

    #[test]
    fn clear_request_wire_shape() {
        let req: Request = serde_json::from_str(r#"{"cmd":"CLEAR"}"#).expect("deserialize");
        assert_eq!(req, Request::Clear);
    }

    #[test]
    fn ok_response_omits_missing_value() {
        let json = serde_json::to_string(&Response::ok()).expect("serialize");
        assert_eq!(json, r#"{"status":"OK"}"#);
        let back: Response = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, Response::ok());
    }

    #[test]
    fn ok_response_with_value() {
        let json = serde_json::to_string(&Response::ok_value("payload")).expect("serialize");
        assert_eq!(json, r#"{"status":"OK","value":"payload"}"#);
        assert_eq!(
            Response::ok_value("payload").into_value(),
            Some("payload".to_string())
        );
    }

    #[test]
    fn error_response_carries_message() {
        let resp = Response::error("Key 'x' not found");
        assert!(!resp.is_ok());
        let json = serde_json::to_string(&resp).expect("serialize");
        assert_eq!(json, r#"{"status":"ERROR","message":"Key 'x' not found"}"#);
    }

    #[test]
    fn unknown_command_is_rejected() {
        let result: Result<Request, _> = serde_json::from_str(r#"{"cmd":"DELETE","key":"x"}"#);
        assert!(result.is_err());
    }
}
