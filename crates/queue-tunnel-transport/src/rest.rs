//! REST transport for Firebase Realtime Database style stores.
//!
//! Every path is addressed as `<base>/<path>.json`. `POST` appends a child
//! under a server-generated push id, which sorts by creation time and so
//! satisfies the increasing-key contract for a single writer.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use queue_tunnel_core::{
    LaneMessage, LaneRef, MessageKey, QueueTransport, SessionName, SessionStatus, TransportError,
};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::Value;

/// Response body of a push.
#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

/// REST-backed queue.
#[derive(Debug, Clone)]
pub struct RestQueue {
    client: Client,
    base: Url,
    auth: Option<String>,
}

impl RestQueue {
    /// Create a transport for the store at `base_url`.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        auth: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let trimmed = base_url.trim_end_matches('/');
        let base = Url::parse(trimmed)
            .map_err(|e| TransportError::Internal(format!("Invalid store URL {trimmed}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Internal(e.to_string()))?;

        Ok(Self { client, base, auth })
    }

    /// URL for a store path, e.g. `sessions/demo/input`.
    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        let mut url = Url::parse(&format!("{}/{path}.json", self.base.as_str().trim_end_matches('/')))
            .map_err(|e| TransportError::Internal(e.to_string()))?;
        if let Some(auth) = &self.auth {
            url.query_pairs_mut().append_pair("auth", auth);
        }
        Ok(url)
    }

    async fn send(request: RequestBuilder) -> Result<Response, TransportError> {
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Parse the JSON snapshot of a lane.
///
/// `null` is an empty lane. Entries that are not lane messages are skipped;
/// they cannot be delivered and are left for whoever clears the store.
fn parse_snapshot(value: Value) -> Result<BTreeMap<MessageKey, LaneMessage>, TransportError> {
    let entries = match value {
        Value::Null => return Ok(BTreeMap::new()),
        Value::Object(entries) => entries,
        other => {
            return Err(TransportError::Malformed(format!(
                "expected object, got {other}"
            )));
        }
    };

    let mut snapshot = BTreeMap::new();
    for (key, raw) in entries {
        match serde_json::from_value::<LaneMessage>(raw) {
            Ok(message) => {
                snapshot.insert(MessageKey::new(key), message);
            }
            Err(e) => tracing::warn!(%key, "Skipping unreadable lane entry: {e}"),
        }
    }
    Ok(snapshot)
}

#[async_trait]
impl QueueTransport for RestQueue {
    async fn push(&self, lane: &LaneRef, message: &LaneMessage) -> Result<MessageKey, TransportError> {
        let url = self.endpoint(&lane.path())?;
        let response = Self::send(self.client.post(url).json(message)).await?;
        let pushed: PushResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        Ok(MessageKey::new(pushed.name))
    }

    async fn fetch_all(
        &self,
        lane: &LaneRef,
    ) -> Result<BTreeMap<MessageKey, LaneMessage>, TransportError> {
        let url = self.endpoint(&lane.path())?;
        let response = Self::send(self.client.get(url)).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        parse_snapshot(value)
    }

    async fn delete(&self, lane: &LaneRef, key: &MessageKey) -> Result<(), TransportError> {
        // Deleting a missing child succeeds, which gives idempotence for free.
        let url = self.endpoint(&format!("{}/{key}", lane.path()))?;
        Self::send(self.client.delete(url)).await?;
        Ok(())
    }

    async fn set_status(
        &self,
        session: &SessionName,
        status: &SessionStatus,
    ) -> Result<(), TransportError> {
        let url = self.endpoint(&session.status_path())?;
        Self::send(self.client.put(url).json(status)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use queue_tunnel_core::Lane;
    use serde_json::json;

    use super::*;

    fn queue(auth: Option<&str>) -> RestQueue {
        RestQueue::new(
            "https://example-rtdb.firebaseio.com/",
            auth.map(str::to_string),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_layout() {
        let lane = LaneRef::new(SessionName::new("demo-session").unwrap(), Lane::Output);
        let url = queue(None).endpoint(&lane.path()).unwrap();
        assert_eq!(
            url.as_str(),
            "https://example-rtdb.firebaseio.com/sessions/demo-session/output.json"
        );
    }

    #[test]
    fn test_endpoint_carries_auth() {
        let url = queue(Some("t0k&n")).endpoint("sessions/s/state").unwrap();
        assert_eq!(url.query(), Some("auth=t0k%26n"));
    }

    #[test]
    fn test_invalid_base_url() {
        let err = RestQueue::new("not a url", None, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, TransportError::Internal(_)));
    }

    #[test]
    fn test_parse_snapshot_orders_keys() {
        let snapshot = parse_snapshot(json!({
            "-NzB": {"data": "cw=="},
            "-NzA": {"b": 108},
            "-NzC": {"b": 10},
        }))
        .unwrap();

        let bytes: Vec<u8> = snapshot
            .values()
            .flat_map(|m| m.decode().unwrap())
            .collect();
        assert_eq!(bytes, b"ls\n");
    }

    #[test]
    fn test_parse_snapshot_null_and_garbage() {
        assert!(parse_snapshot(Value::Null).unwrap().is_empty());
        assert!(matches!(
            parse_snapshot(json!([1, 2])),
            Err(TransportError::Malformed(_))
        ));

        let snapshot = parse_snapshot(json!({"k1": {"b": 1}, "k2": "junk"})).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(&MessageKey::new("k1")));
    }

    #[test]
    fn test_push_response_shape() {
        let pushed: PushResponse = serde_json::from_str(r#"{"name":"-NzA1"}"#).unwrap();
        assert_eq!(pushed.name, "-NzA1");
    }
}
