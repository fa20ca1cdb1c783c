//! Per-connection request handling for the metadata directory.

use std::sync::Arc;

use log::{debug, warn};
use ringpipe_proto::{Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::store::MetadataStore;

/// Execute one directory command against the store.
pub fn execute(store: &MetadataStore, request: Request) -> Response {
    match request {
        Request::Set { key, value } => {
            debug!("SET key={key} value_len={}", value.len());
            store.set(key, value);
            Response::ok()
        }
        Request::Get { key } => match store.get(&key) {
            Some(value) => {
                debug!("GET key={key} -> hit ({} bytes)", value.len());
                Response::ok_value(value)
            }
            None => {
                debug!("GET key={key} -> miss");
                Response::error(format!("Key '{key}' not found"))
            }
        },
        Request::Clear => {
            debug!("CLEAR ({} entries)", store.len());
            store.clear();
            Response::ok()
        }
    }
}

/// Parse one request line and produce the response line to send back.
///
/// Malformed JSON yields an ERROR response rather than a dropped connection.
pub fn respond_to_line(store: &MetadataStore, line: &str) -> String {
    let response = match serde_json::from_str::<Request>(line) {
        Ok(request) => execute(store, request),
        Err(err) => {
            warn!("rejecting malformed request: {err}");
            Response::error("Invalid JSON")
        }
    };
    // Response serialization cannot fail: plain strings only.
    serde_json::to_string(&response).unwrap_or_else(|_| r#"{"status":"ERROR"}"#.to_string())
}

/// Serve directory commands on one client connection until EOF.
pub async fn handle_connection(stream: TcpStream, store: Arc<MetadataStore>) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let mut reply = respond_to_line(&store, line);
                reply.push('\n');
                if let Err(err) = writer.write_all(reply.as_bytes()).await {
                    warn!("write to {peer} failed: {err}");
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                warn!("read from {peer} failed: {err}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ringpipe_proto::{Request, Response};

    use super::{execute, respond_to_line};
    use crate::store::MetadataStore;

    #[test]
    fn set_then_get_round_trips() {
        let store = MetadataStore::new();

        let resp = execute(
            &store,
            Request::Set {
                key: "k".to_string(),
                value: "v".to_string(),
            },
        );
        assert_eq!(resp, Response::ok());

        let resp = execute(
            &store,
            Request::Get {
                key: "k".to_string(),
            },
        );
        assert_eq!(resp, Response::ok_value("v"));
    }

    #[test]
    fn get_missing_key_is_an_error() {
        let store = MetadataStore::new();
        let resp = execute(
            &store,
            Request::Get {
                key: "absent".to_string(),
            },
        );
        assert!(!resp.is_ok());
    }

    #[test]
    fn clear_empties_the_store() {
        let store = MetadataStore::new();
        store.set("a", "1");
        let resp = execute(&store, Request::Clear);
        assert_eq!(resp, Response::ok());
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_json_yields_error_line() {
        let store = Arc::new(MetadataStore::new());
        let reply = respond_to_line(&store, "not json at all");
        let resp: Response = serde_json::from_str(&reply).expect("valid response JSON");
        assert!(!resp.is_ok());
    }

    #[test]
    fn valid_line_yields_ok_line() {
        let store = Arc::new(MetadataStore::new());
        let reply = respond_to_line(&store, r#"{"cmd":"SET","key":"a","value":"b"}"#);
        assert_eq!(reply, r#"{"status":"OK"}"#);
        assert_eq!(store.get("a"), Some("b".to_string()));
    }
}
