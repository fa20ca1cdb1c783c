//! The metadata exchange channel: publish/retrieve opaque blobs by key.
//!
//! Two interchangeable backends exist. [`DirectoryChannel`] talks to the
//! metadata directory service over TCP; [`NotifyChannel`] rides on the
//! notification substrate for deployments without a directory. The handshake
//! layer works unmodified against either.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use log::debug;
use parking_lot::Mutex;
use ringpipe_proto::{Request, Response};

use crate::error::{Result, TransferError};
use crate::messages;
use crate::notify::Notifier;

/// How often `retrieve` re-polls for a key that has not appeared yet.
pub const RETRIEVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default bound on identity/descriptor resolution at startup.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Publish/retrieve opaque blobs under string keys.
pub trait MetadataChannel {
    /// Fire-and-forget publication; safe before any retriever exists.
    fn publish(&self, key: &str, blob: &[u8]) -> Result<()>;

    /// Poll for a key until it appears or `timeout` elapses.
    ///
    /// Returns [`TransferError::RetrieveTimeout`] on expiry - never blocks
    /// indefinitely.
    fn retrieve(&self, key: &str, timeout: Duration) -> Result<Bytes>;

    /// Drop all published state.
    fn clear(&self) -> Result<()>;
}

/// Blocking TCP client for the metadata directory.
///
/// One connection per request, newline-delimited JSON, blob values carried as
/// base64 strings.
pub struct DirectoryChannel {
    addr: String,
}

impl DirectoryChannel {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    fn request(&self, request: &Request) -> Result<Response> {
        let stream = TcpStream::connect(&self.addr)?;
        let mut writer = stream.try_clone()?;
        let mut line = serde_json::to_string(request)
            .map_err(|e| TransferError::Channel(format!("encode request: {e}")))?;
        line.push('\n');
        writer.write_all(line.as_bytes())?;
        writer.flush()?;

        let mut reply = String::new();
        BufReader::new(stream).read_line(&mut reply)?;
        serde_json::from_str(reply.trim())
            .map_err(|e| TransferError::Channel(format!("decode response: {e}")))
    }
}

impl MetadataChannel for DirectoryChannel {
    fn publish(&self, key: &str, blob: &[u8]) -> Result<()> {
        let response = self.request(&Request::Set {
            key: key.to_string(),
            value: BASE64.encode(blob),
        })?;
        if response.is_ok() {
            debug!("published {} bytes under '{key}'", blob.len());
            Ok(())
        } else {
            Err(TransferError::Channel(format!(
                "directory rejected SET for '{key}'"
            )))
        }
    }

    fn retrieve(&self, key: &str, timeout: Duration) -> Result<Bytes> {
        let start = Instant::now();
        loop {
            let response = self.request(&Request::Get {
                key: key.to_string(),
            })?;
            if let Some(value) = response.into_value() {
                let blob = BASE64
                    .decode(value.as_bytes())
                    .map_err(|e| TransferError::Channel(format!("bad base64 for '{key}': {e}")))?;
                return Ok(Bytes::from(blob));
            }
            if start.elapsed() >= timeout {
                return Err(TransferError::RetrieveTimeout {
                    key: key.to_string(),
                    waited: start.elapsed(),
                });
            }
            thread::sleep(RETRIEVE_POLL_INTERVAL);
        }
    }

    fn clear(&self) -> Result<()> {
        let response = self.request(&Request::Clear)?;
        if response.is_ok() {
            Ok(())
        } else {
            Err(TransferError::Channel("directory rejected CLEAR".into()))
        }
    }
}

/// Metadata channel layered on the notification substrate.
///
/// `publish` sends a `K:<key>:<blob>` notification to the peer; `retrieve`
/// drains incoming notifications into a local key cache until the wanted key
/// shows up. Non-KV payloads drained here are discarded - every protocol
/// message that can arrive while a retrieve is in progress is re-sent until
/// its sender is satisfied, so dropping an early copy is harmless.
pub struct NotifyChannel<N> {
    notifier: N,
    peer: String,
    cache: Mutex<std::collections::HashMap<String, Bytes>>,
}

impl<N: Notifier> NotifyChannel<N> {
    pub fn new(notifier: N, peer: impl Into<String>) -> Self {
        Self {
            notifier,
            peer: peer.into(),
            cache: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn absorb_drained(&self) -> Result<()> {
        let drained = self.notifier.drain()?;
        let mut cache = self.cache.lock();
        for (_, payloads) in drained {
            for payload in payloads {
                if let Some((key, blob)) = messages::parse_kv(&payload) {
                    cache.insert(key, blob);
                }
            }
        }
        Ok(())
    }
}

impl<N: Notifier> MetadataChannel for NotifyChannel<N> {
    fn publish(&self, key: &str, blob: &[u8]) -> Result<()> {
        self.notifier.send(&self.peer, messages::encode_kv(key, blob))
    }

    fn retrieve(&self, key: &str, timeout: Duration) -> Result<Bytes> {
        let start = Instant::now();
        loop {
            self.absorb_drained()?;
            if let Some(blob) = self.cache.lock().get(key) {
                return Ok(blob.clone());
            }
            if start.elapsed() >= timeout {
                return Err(TransferError::RetrieveTimeout {
                    key: key.to_string(),
                    waited: start.elapsed(),
                });
            }
            thread::sleep(RETRIEVE_POLL_INTERVAL);
        }
    }

    fn clear(&self) -> Result<()> {
        self.cache.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::channel::{MetadataChannel, NotifyChannel};
    use crate::error::TransferError;
    use crate::notify::{InProcHub, Notifier};

    #[test]
    fn notify_channel_publish_then_retrieve() {
        let hub = InProcHub::new();
        let a = NotifyChannel::new(hub.endpoint("a"), "b");
        let b = NotifyChannel::new(hub.endpoint("b"), "a");

        a.publish("a_identity", b"blob-a").expect("publish");

        let blob = b
            .retrieve("a_identity", Duration::from_secs(1))
            .expect("retrieve");
        assert_eq!(blob.as_ref(), b"blob-a");
    }

    #[test]
    fn notify_channel_times_out_on_missing_key() {
        let hub = InProcHub::new();
        let b = NotifyChannel::new(hub.endpoint("b"), "a");

        let err = b
            .retrieve("never_published", Duration::from_millis(250))
            .expect_err("must time out");
        assert!(matches!(err, TransferError::RetrieveTimeout { .. }));
    }

    #[test]
    fn notify_channel_keys_are_independent() {
        let hub = InProcHub::new();
        let a = hub.endpoint("a");
        let b = NotifyChannel::new(hub.endpoint("b"), "a");

        a.send("b", crate::messages::encode_kv("k1", b"v1"))
            .expect("send");
        a.send("b", crate::messages::encode_kv("k2", b"v2"))
            .expect("send");

        assert_eq!(
            b.retrieve("k2", Duration::from_secs(1)).expect("k2").as_ref(),
            b"v2"
        );
        assert_eq!(
            b.retrieve("k1", Duration::from_secs(1)).expect("k1").as_ref(),
            b"v1"
        );
    }

    #[test]
    fn notify_channel_ignores_unrelated_payloads() {
        let hub = InProcHub::new();
        let a = hub.endpoint("a");
        let b = NotifyChannel::new(hub.endpoint("b"), "a");

        a.send("b", bytes::Bytes::from_static(b"READY")).expect("send");
        a.send("b", crate::messages::encode_kv("k", b"v")).expect("send");

        assert_eq!(
            b.retrieve("k", Duration::from_secs(1)).expect("k").as_ref(),
            b"v"
        );
    }
}
