//! Correlated request/reply on top of [`Presence`] pub/sub.
//!
//! A request frame `[method, requestId, args]` is published on the callee's
//! inbox topic (`p:<processId>` for matchmaking methods, `$<roomId>` for
//! room method calls). The caller subscribes to the single-use reply topic
//! `ipc:<requestId>` *before* publishing, then races the reply against a
//! timeout. Replies are `[code, payload]` with `code ∈ {SUCCESS, ERROR}`;
//! an error reply carries a message string, never object identity.

use std::time::Duration;

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{IpcError, Presence};

/// Reply code: the handler succeeded; payload is the result.
pub const SUCCESS: u8 = 0;
/// Reply code: the handler failed; payload is a message string.
pub const ERROR: u8 = 1;

/// Bound for fast health probes.
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(1);
/// Bound for create/reserve calls that do real work on the remote side.
pub const LONG_TIMEOUT: Duration = Duration::from_secs(5);

/// A request frame: `[method, requestId, args]` (serialized as a JSON array).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request(pub String, pub String, pub Vec<Value>);

impl Request {
    pub fn method(&self) -> &str {
        &self.0
    }

    pub fn request_id(&self) -> &str {
        &self.1
    }

    pub fn args(&self) -> &[Value] {
        &self.2
    }
}

/// A reply frame: `[code, payload]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply(pub u8, pub Value);

/// The single-use reply topic for a request id.
pub fn reply_topic(request_id: &str) -> String {
    format!("ipc:{request_id}")
}

fn random_request_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// Performs one request/reply round trip.
///
/// The reply subscription is removed on every exit path, so a reply that
/// arrives after the timeout is dropped silently.
pub async fn request<P: Presence>(
    presence: &P,
    topic: &str,
    method: &str,
    args: Vec<Value>,
    timeout: Duration,
) -> Result<Value, IpcError> {
    let request_id = random_request_id();
    let reply_topic = reply_topic(&request_id);

    // Subscribe before publishing — the callee may reply immediately.
    let mut subscription = presence.subscribe(&reply_topic).await?;
    let frame = serde_json::to_vec(&Request(method.to_string(), request_id, args))?;
    presence.publish(topic, &frame).await?;

    let outcome = tokio::time::timeout(timeout, subscription.next()).await;
    let _ = presence.unsubscribe(&reply_topic).await;

    match outcome {
        Ok(Some(bytes)) => {
            let reply: Reply = serde_json::from_slice(&bytes)?;
            match reply.0 {
                SUCCESS => Ok(reply.1),
                _ => Err(IpcError::Remote(
                    reply.1.as_str().unwrap_or("unknown remote error").to_string(),
                )),
            }
        }
        Ok(None) => Err(IpcError::ChannelClosed),
        Err(_) => {
            tracing::debug!(topic, method, "ipc request timed out");
            Err(IpcError::Timeout {
                topic: topic.to_string(),
                method: method.to_string(),
            })
        }
    }
}

/// Parses an inbox payload into a [`Request`].
pub fn decode_request(data: &[u8]) -> Result<Request, IpcError> {
    Ok(serde_json::from_slice(data)?)
}

/// Publishes the handler's outcome on the reply topic.
///
/// `Err` carries the handler's message string; the caller sees it as
/// [`IpcError::Remote`].
pub async fn respond<P: Presence>(
    presence: &P,
    request_id: &str,
    result: Result<Value, String>,
) -> Result<(), IpcError> {
    let reply = match result {
        Ok(payload) => Reply(SUCCESS, payload),
        Err(message) => Reply(ERROR, Value::String(message)),
    };
    presence
        .publish(&reply_topic(request_id), &serde_json::to_vec(&reply)?)
        .await?;
    Ok(())
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalPresence;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_request_frame_serializes_as_array() {
        let frame = Request("create".into(), "r1".into(), vec![json!("chat")]);
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"["create","r1",["chat"]]"#);
    }

    #[test]
    fn test_reply_frame_serializes_as_array() {
        let reply = Reply(SUCCESS, json!({ "ok": true }));
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(json, r#"[0,{"ok":true}]"#);
    }

    #[tokio::test]
    async fn test_request_reply_success_round_trip() {
        let presence = Arc::new(LocalPresence::new());

        // A responder that echoes its first argument back.
        let responder = Arc::clone(&presence);
        let mut inbox = presence.subscribe("p:remote").await.unwrap();
        tokio::spawn(async move {
            let bytes = inbox.next().await.unwrap();
            let req = decode_request(&bytes).unwrap();
            assert_eq!(req.method(), "echo");
            respond(&*responder, req.request_id(), Ok(req.args()[0].clone()))
                .await
                .unwrap();
        });

        let result = request(
            &*presence,
            "p:remote",
            "echo",
            vec![json!({ "x": 1 })],
            LONG_TIMEOUT,
        )
        .await
        .unwrap();

        assert_eq!(result, json!({ "x": 1 }));
    }

    #[tokio::test]
    async fn test_request_error_reply_carries_message() {
        let presence = Arc::new(LocalPresence::new());

        let responder = Arc::clone(&presence);
        let mut inbox = presence.subscribe("p:remote").await.unwrap();
        tokio::spawn(async move {
            let bytes = inbox.next().await.unwrap();
            let req = decode_request(&bytes).unwrap();
            respond(&*responder, req.request_id(), Err("boom".into()))
                .await
                .unwrap();
        });

        let result = request(&*presence, "p:remote", "fail", vec![], LONG_TIMEOUT).await;

        assert!(matches!(result, Err(IpcError::Remote(msg)) if msg == "boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out_when_nobody_listens() {
        let presence = LocalPresence::new();

        let result = request(
            &presence,
            "p:dead",
            "create",
            vec![],
            Duration::from_secs(1),
        )
        .await;

        assert!(matches!(result, Err(IpcError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_is_dropped_silently() {
        let presence = Arc::new(LocalPresence::new());

        let responder = Arc::clone(&presence);
        let mut inbox = presence.subscribe("p:slow").await.unwrap();
        let late = tokio::spawn(async move {
            let bytes = inbox.next().await.unwrap();
            let req = decode_request(&bytes).unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            // The caller has already timed out and unsubscribed — this
            // publish goes nowhere and must not error.
            respond(&*responder, req.request_id(), Ok(json!(1))).await.unwrap();
        });

        let result = request(
            &*presence,
            "p:slow",
            "create",
            vec![],
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(IpcError::Timeout { .. })));

        late.await.unwrap();
    }
}
