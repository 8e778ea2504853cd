//! etcd v2 keys API backend.

use crate::error::{FlagError, Result};
use crate::sources::{
    ChangeValue, ObservedChange, Snapshot, SnapshotEntry, WatchCursor, WatchError, WatchSource,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const ERROR_KEY_NOT_FOUND: u64 = 100;
const ERROR_PRECONDITION_FAILED: u64 = 101;
const ERROR_WATCHER_CLEARED: u64 = 400;
const ERROR_EVENT_INDEX_CLEARED: u64 = 401;

const INDEX_HEADER: &str = "X-Etcd-Index";

/// A subtree of an etcd cluster, read and watched through the v2 HTTP keys API.
///
/// Changes are observed with recursive long-poll watches
/// (`wait=true&waitIndex=N`); rollbacks use `prevIndex` conditional writes and
/// deletes so they never clobber a newer external write.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_flags::sources::EtcdSource;
/// use std::time::Duration;
///
/// # fn example() -> hotswap_flags::error::Result<()> {
/// let source = EtcdSource::builder()
///     .with_endpoint("http://127.0.0.1:2379")
///     .with_root("/flagz/my_service")
///     .with_watch_timeout(Duration::from_secs(60))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EtcdSource {
    endpoint: String,
    root: String,
    client: Client,
    auth: Option<(String, String)>,
    request_timeout: Duration,
    watch_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct EtcdResponse {
    #[serde(default)]
    action: String,
    node: Option<EtcdNode>,
    #[serde(rename = "prevNode")]
    prev_node: Option<EtcdNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdNode {
    #[serde(default)]
    key: String,
    value: Option<String>,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    nodes: Vec<EtcdNode>,
    #[serde(default)]
    modified_index: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdErrorBody {
    error_code: u64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: String,
    #[serde(default)]
    index: u64,
}

impl EtcdSource {
    /// Create a builder with default settings.
    pub fn builder() -> EtcdSourceBuilder {
        EtcdSourceBuilder::new()
    }

    /// The watched root key.
    pub fn root(&self) -> &str {
        &self.root
    }

    fn url(&self, key: &str) -> String {
        format!("{}/v2/keys{}", self.endpoint, key)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        cancel: Option<&CancellationToken>,
        watching: bool,
    ) -> std::result::Result<Response, WatchError> {
        let request = self.authorize(request);
        let result = match cancel {
            Some(cancel) => tokio::select! {
                _ = cancel.cancelled() => return Err(WatchError::Cancelled),
                result = request.send() => result,
            },
            None => request.send().await,
        };
        result.map_err(|e| transport_error(e, watching))
    }

    /// Issue a conditional write or delete and map the outcome to a cursor.
    async fn conditional(&self, request: RequestBuilder) -> std::result::Result<WatchCursor, WatchError> {
        let response = self.send(request, None, false).await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, false))?;
        if status.is_success() {
            let decoded: EtcdResponse = decode(&body)?;
            let index = decoded.node.map(|n| n.modified_index).unwrap_or_default();
            return Ok(WatchCursor(index));
        }
        match decode::<EtcdErrorBody>(&body) {
            Ok(err) if err.error_code == ERROR_KEY_NOT_FOUND => Err(WatchError::PreconditionFailed),
            Ok(err) => Err(classify(&err)),
            Err(_) => Err(status_error(status)),
        }
    }
}

#[async_trait]
impl WatchSource for EtcdSource {
    async fn bulk_read(&self) -> std::result::Result<Snapshot, WatchError> {
        let request = self
            .client
            .get(self.url(&self.root))
            .query(&[("recursive", "true"), ("sorted", "true")])
            .timeout(self.request_timeout);
        let response = self.send(request, None, false).await?;
        let status = response.status();
        let header_index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, false))?;

        if !status.is_success() {
            return match decode::<EtcdErrorBody>(&body) {
                Ok(err) if err.error_code == ERROR_KEY_NOT_FOUND => {
                    debug!(root = %self.root, "watched root does not exist yet");
                    Ok(Snapshot {
                        cursor: WatchCursor(header_index.unwrap_or(err.index)),
                        entries: Vec::new(),
                    })
                }
                Ok(err) => Err(classify(&err)),
                Err(_) => Err(status_error(status)),
            };
        }

        let decoded: EtcdResponse = decode(&body)?;
        let cursor = header_index.ok_or_else(|| {
            WatchError::Backend(format!("response is missing the {} header", INDEX_HEADER))
        })?;
        let entries = decoded
            .node
            .map(|node| {
                node.nodes
                    .into_iter()
                    .map(|child| {
                        if child.dir {
                            SnapshotEntry::dir(child.key)
                        } else {
                            SnapshotEntry::leaf(child.key, child.value.unwrap_or_default())
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Snapshot {
            cursor: WatchCursor(cursor),
            entries,
        })
    }

    async fn watch_next(
        &self,
        after: WatchCursor,
        cancel: &CancellationToken,
    ) -> std::result::Result<ObservedChange, WatchError> {
        let wait_index = (after.index() + 1).to_string();
        let request = self
            .client
            .get(self.url(&self.root))
            .query(&[
                ("wait", "true"),
                ("recursive", "true"),
                ("waitIndex", wait_index.as_str()),
            ])
            .timeout(self.watch_timeout);
        let response = self.send(request, Some(cancel), true).await?;
        let status = response.status();
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(WatchError::Cancelled),
            body = response.text() => body.map_err(|e| transport_error(e, true))?,
        };

        if !status.is_success() {
            return match decode::<EtcdErrorBody>(&body) {
                Ok(err) => Err(classify(&err)),
                Err(_) => Err(status_error(status)),
            };
        }
        // etcd closes idle long-polls with an empty body.
        if body.trim().is_empty() {
            return Err(WatchError::DeadlineExceeded);
        }

        let decoded: EtcdResponse = decode(&body)?;
        to_change(decoded)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        value: &str,
        expected: WatchCursor,
    ) -> std::result::Result<WatchCursor, WatchError> {
        let prev_index = expected.index().to_string();
        let request = self
            .client
            .put(self.url(key))
            .query(&[("prevIndex", prev_index.as_str())])
            .form(&[("value", value)])
            .timeout(self.request_timeout);
        self.conditional(request).await
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        expected: WatchCursor,
    ) -> std::result::Result<WatchCursor, WatchError> {
        let prev_index = expected.index().to_string();
        let request = self
            .client
            .delete(self.url(key))
            .query(&[("prevIndex", prev_index.as_str())])
            .timeout(self.request_timeout);
        self.conditional(request).await
    }

    fn name(&self) -> String {
        format!("etcd:{}{}", self.endpoint, self.root)
    }
}

fn decode<'a, T: Deserialize<'a>>(body: &'a str) -> std::result::Result<T, WatchError> {
    serde_json::from_str(body)
        .map_err(|e| WatchError::Backend(format!("malformed etcd response: {}", e)))
}

fn to_change(response: EtcdResponse) -> std::result::Result<ObservedChange, WatchError> {
    let node = response
        .node
        .ok_or_else(|| WatchError::Backend("watch response without a node".to_string()))?;
    let value = if node.dir {
        ChangeValue::Directory
    } else {
        match response.action.as_str() {
            "delete" | "expire" | "compareAndDelete" => ChangeValue::Deleted,
            _ => ChangeValue::Value(node.value.unwrap_or_default()),
        }
    };
    Ok(ObservedChange {
        key: node.key,
        value,
        previous: response.prev_node.and_then(|prev| prev.value),
        cursor: WatchCursor(node.modified_index),
    })
}

fn classify(err: &EtcdErrorBody) -> WatchError {
    let detail = format!("etcd error {}: {} ({})", err.error_code, err.message, err.cause);
    match err.error_code {
        ERROR_PRECONDITION_FAILED => WatchError::PreconditionFailed,
        ERROR_EVENT_INDEX_CLEARED => WatchError::ResyncRequired(detail),
        ERROR_WATCHER_CLEARED => WatchError::Transient(detail),
        300..=399 | 500..=599 => WatchError::Transient(detail),
        _ => WatchError::Backend(detail),
    }
}

fn status_error(status: StatusCode) -> WatchError {
    let detail = format!(
        "HTTP {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("unknown")
    );
    if status.is_server_error() {
        WatchError::Transient(detail)
    } else {
        WatchError::Backend(detail)
    }
}

fn transport_error(err: reqwest::Error, watching: bool) -> WatchError {
    if err.is_timeout() && watching {
        WatchError::DeadlineExceeded
    } else {
        WatchError::Transient(format!("etcd request failed: {}", err))
    }
}

/// Builder for [`EtcdSource`].
#[derive(Debug, Clone)]
pub struct EtcdSourceBuilder {
    endpoint: String,
    root: String,
    auth: Option<(String, String)>,
    request_timeout: Duration,
    watch_timeout: Duration,
}

impl EtcdSourceBuilder {
    /// Defaults: `http://127.0.0.1:2379`, root `/flagz`, 5s requests, 60s watches.
    pub fn new() -> Self {
        Self {
            endpoint: "http://127.0.0.1:2379".to_string(),
            root: "/flagz".to_string(),
            auth: None,
            request_timeout: Duration::from_secs(5),
            watch_timeout: Duration::from_secs(60),
        }
    }

    /// Set the cluster endpoint, e.g. `http://etcd:2379`.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the directory holding one key per flag.
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// Use HTTP basic authentication.
    pub fn with_basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some((user.into(), password.into()));
        self
    }

    /// Timeout for reads and conditional writes.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// How long a single long-poll may wait before it is re-issued.
    pub fn with_watch_timeout(mut self, timeout: Duration) -> Self {
        self.watch_timeout = timeout;
        self
    }

    /// Build the source.
    ///
    /// # Errors
    ///
    /// Returns [`FlagError::Config`] for an endpoint without an HTTP scheme, a
    /// root that is not an absolute key, or an HTTP client that cannot be built.
    pub fn build(self) -> Result<EtcdSource> {
        let endpoint = self.endpoint.trim_end_matches('/').to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(FlagError::Config(format!(
                "etcd endpoint must be an http(s) URL: {}",
                endpoint
            )));
        }
        if !self.root.starts_with('/') {
            return Err(FlagError::Config(format!(
                "etcd root must start with '/': {}",
                self.root
            )));
        }
        let root = match self.root.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };

        let client = Client::builder()
            .build()
            .map_err(|e| FlagError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(EtcdSource {
            endpoint,
            root,
            client,
            auth: self.auth,
            request_timeout: self.request_timeout,
            watch_timeout: self.watch_timeout,
        })
    }
}

impl Default for EtcdSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_normalizes() {
        let source = EtcdSource::builder()
            .with_endpoint("http://etcd:2379/")
            .with_root("/flagz/svc/")
            .build()
            .unwrap();
        assert_eq!(source.root(), "/flagz/svc");
        assert_eq!(source.url("/flagz/svc/a"), "http://etcd:2379/v2/keys/flagz/svc/a");
        assert_eq!(source.name(), "etcd:http://etcd:2379/flagz/svc");
    }

    #[test]
    fn test_builder_rejects_bad_input() {
        assert!(EtcdSource::builder().with_endpoint("etcd:2379").build().is_err());
        assert!(EtcdSource::builder().with_root("flagz").build().is_err());
    }

    #[test]
    fn test_classify_error_codes() {
        let body = |code| EtcdErrorBody {
            error_code: code,
            message: "m".to_string(),
            cause: "c".to_string(),
            index: 0,
        };
        assert_eq!(classify(&body(101)), WatchError::PreconditionFailed);
        assert!(matches!(classify(&body(401)), WatchError::ResyncRequired(_)));
        assert!(matches!(classify(&body(400)), WatchError::Transient(_)));
        assert!(matches!(classify(&body(300)), WatchError::Transient(_)));
        assert!(matches!(classify(&body(500)), WatchError::Transient(_)));
        assert!(matches!(classify(&body(102)), WatchError::Backend(_)));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY),
            WatchError::Transient(_)
        ));
    }

    #[test]
    fn test_decode_watch_update() {
        let body = r#"{
            "action": "set",
            "node": {"key": "/flagz/some_int", "value": "2016", "modifiedIndex": 42, "createdIndex": 7},
            "prevNode": {"key": "/flagz/some_int", "value": "2015", "modifiedIndex": 7, "createdIndex": 7}
        }"#;
        let change = to_change(decode(body).unwrap()).unwrap();
        assert_eq!(change.key, "/flagz/some_int");
        assert_eq!(change.value, ChangeValue::Value("2016".to_string()));
        assert_eq!(change.previous.as_deref(), Some("2015"));
        assert_eq!(change.cursor, WatchCursor(42));
    }

    #[test]
    fn test_decode_watch_delete_and_dir() {
        let body = r#"{"action": "delete", "node": {"key": "/flagz/x", "modifiedIndex": 9}}"#;
        let change = to_change(decode(body).unwrap()).unwrap();
        assert_eq!(change.value, ChangeValue::Deleted);
        assert_eq!(change.previous, None);

        let body = r#"{"action": "set", "node": {"key": "/flagz/sub", "dir": true, "modifiedIndex": 10}}"#;
        let change = to_change(decode(body).unwrap()).unwrap();
        assert_eq!(change.value, ChangeValue::Directory);
    }

    #[test]
    fn test_decode_error_body() {
        let body = r#"{"errorCode":401,"message":"The event in requested index is outdated and cleared","cause":"the requested history has been cleared [1008/4]","index":2007}"#;
        let err: EtcdErrorBody = decode(body).unwrap();
        assert_eq!(err.error_code, ERROR_EVENT_INDEX_CLEARED);
        assert_eq!(err.index, 2007);
    }
}
