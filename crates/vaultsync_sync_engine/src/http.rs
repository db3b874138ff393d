//! HTTP transport implementation.
//!
//! The HTTP client itself is abstracted via a trait so any library
//! (reqwest, hyper, ureq, a platform fetch bridge) can carry the requests.
//!
//! | Operation | Request |
//! |---|---|
//! | push | `POST {base}/records/{id}?updatedAt=T`, body = sealed blob |
//! | fetch page | `GET {base}/records?limit=N&continuationToken=T` |
//! | delete | `DELETE {base}/records/{id}` |
//!
//! `{id}` is percent-encoded as a single path segment. Query pairs are
//! passed unencoded; the client encodes them.

use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteTransport;
use async_trait::async_trait;
use parking_lot::RwLock;
use vaultsync_sync_protocol::{PageRequest, PageResponse, PushAck, PushRequest};

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// DELETE
    Delete,
}

/// A request handed to an [`HttpClient`].
///
/// Query parameters are unencoded; the client is responsible for URL
/// encoding them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL without query string.
    pub url: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Vec<u8>,
}

/// A response returned by an [`HttpClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body bytes.
    pub body: Vec<u8>,
}

/// HTTP client abstraction.
///
/// Returns `Err` only when no response was received at all (connection
/// refused, DNS, timeout); such errors are treated as retryable.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// HTTP-based remote transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    bearer_token: RwLock<Option<String>>,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport for the store at `base_url`.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            bearer_token: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sets or clears the bearer token sent with every request.
    pub fn set_bearer_token(&self, token: Option<String>) {
        *self.bearer_token.write() = token;
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn request(&self, method: Method, path: &str) -> HttpRequest {
        let mut headers = Vec::new();
        if let Some(token) = self.bearer_token.read().as_ref() {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        HttpRequest {
            method,
            url: format!("{}{}", self.base_url, path),
            query: Vec::new(),
            headers,
            body: Vec::new(),
        }
    }

    async fn send(&self, request: HttpRequest) -> SyncResult<Vec<u8>> {
        let response = match self.client.send(request).await {
            Ok(response) => response,
            Err(e) => {
                *self.last_error.write() = Some(e.clone());
                return Err(SyncError::transport_retryable(e));
            }
        };

        match check_status(response.status, &response.body) {
            Ok(()) => {
                *self.last_error.write() = None;
                Ok(response.body)
            }
            Err(e) => {
                *self.last_error.write() = Some(e.to_string());
                Err(e)
            }
        }
    }
}

fn record_path(id: &str) -> String {
    format!("/records/{}", path_segment(id))
}

/// Percent-encodes everything outside the RFC 3986 unreserved set.
fn path_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(char::from(byte))
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Maps an HTTP status to the sync error taxonomy.
fn check_status(status: u16, body: &[u8]) -> SyncResult<()> {
    let detail = || {
        let text = String::from_utf8_lossy(body);
        let text = text.trim();
        if text.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {text}")
        }
    };

    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(SyncError::AuthenticationFailed(detail())),
        408 => Err(SyncError::Timeout),
        429 => Err(SyncError::transport_retryable(detail())),
        500..=599 => Err(SyncError::ServerError(detail())),
        _ => Err(SyncError::transport_fatal(detail())),
    }
}

#[async_trait]
impl<C: HttpClient> RemoteTransport for HttpTransport<C> {
    async fn push(&self, request: PushRequest) -> SyncResult<PushAck> {
        let mut http = self.request(Method::Post, &record_path(&request.record_id));
        http.query
            .push(("updatedAt".to_string(), request.updated_at.to_string()));
        http.headers.push((
            "Content-Type".to_string(),
            "application/octet-stream".to_string(),
        ));
        http.body = request.blob;

        let body = self.send(http).await?;
        Ok(PushAck::from_json(&body)?)
    }

    async fn fetch_page(&self, request: PageRequest) -> SyncResult<PageResponse> {
        let mut http = self.request(Method::Get, "/records");
        http.query = request
            .query()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();

        let body = self.send(http).await?;
        Ok(PageResponse::from_json(&body)?)
    }

    async fn delete(&self, id: &str) -> SyncResult<()> {
        let http = self.request(Method::Delete, &record_path(id));
        self.send(http).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use vaultsync_codec::{encode, EncryptionKey};
    use vaultsync_sync_protocol::RemoteRecord;

    #[derive(Default, Clone)]
    struct ScriptedClient {
        sent: Arc<Mutex<Vec<HttpRequest>>>,
        replies: Arc<Mutex<VecDeque<Result<HttpResponse, String>>>>,
    }

    impl ScriptedClient {
        fn reply(&self, status: u16, body: &[u8]) {
            self.replies.lock().push_back(Ok(HttpResponse {
                status,
                body: body.to_vec(),
            }));
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.sent.lock().push(request);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err("no scripted reply".into()))
        }
    }

    fn transport() -> (HttpTransport<ScriptedClient>, ScriptedClient) {
        let client = ScriptedClient::default();
        (HttpTransport::new("https://sync.example.com/", client.clone()), client)
    }

    #[tokio::test]
    async fn push_posts_blob() {
        let (transport, client) = transport();
        transport.set_bearer_token(Some("tok".into()));
        client.reply(200, br#"{"recordId":"c1","version":3}"#);

        let ack = transport
            .push(PushRequest::new("c1", vec![1, 2, 3], 42))
            .await
            .unwrap();
        assert_eq!(ack.version, 3);

        let sent = client.sent.lock();
        assert_eq!(sent[0].method, Method::Post);
        assert_eq!(sent[0].url, "https://sync.example.com/records/c1");
        assert_eq!(sent[0].body, vec![1, 2, 3]);
        assert!(sent[0].query.contains(&("updatedAt".into(), "42".into())));
        assert!(sent[0]
            .headers
            .contains(&("Authorization".into(), "Bearer tok".into())));
    }

    #[tokio::test]
    async fn fetch_page_sends_structured_query() {
        let (transport, client) = transport();
        let page = PageResponse {
            records: vec![RemoteRecord {
                id: "c1".into(),
                blob: encode(&1u32, &EncryptionKey::generate()).unwrap(),
                updated_at: 1,
                version: 1,
            }],
            next_token: None,
            deleted_ids: vec![],
        };
        client.reply(200, &page.to_json().unwrap());

        let fetched = transport
            .fetch_page(PageRequest::after(20, "a b&c"))
            .await
            .unwrap();
        assert_eq!(fetched, page);

        let sent = client.sent.lock();
        assert_eq!(sent[0].method, Method::Get);
        assert_eq!(
            sent[0].query,
            vec![
                ("limit".to_string(), "20".to_string()),
                ("continuationToken".to_string(), "a b&c".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn status_mapping() {
        let (transport, client) = transport();
        for status in [500, 503, 429, 408] {
            client.reply(status, b"");
            let err = transport.delete("c1").await.unwrap_err();
            assert!(err.is_retryable(), "{status} should be retryable");
        }

        client.reply(401, b"expired");
        let err = transport.delete("c1").await.unwrap_err();
        assert!(matches!(err, SyncError::AuthenticationFailed(_)));
        assert!(transport.last_error().unwrap().contains("expired"));

        client.reply(404, b"");
        let err = transport.delete("c1").await.unwrap_err();
        assert!(!err.is_retryable());

        client.reply(204, b"");
        transport.delete("c1").await.unwrap();
        assert!(transport.last_error().is_none());
    }

    #[tokio::test]
    async fn record_ids_are_encoded_as_one_segment() {
        let (transport, client) = transport();
        client.reply(200, br#"{"recordId":"a b/c","version":1}"#);
        client.reply(204, b"");

        transport
            .push(PushRequest::new("a b/c", vec![1], 1))
            .await
            .unwrap();
        transport.delete("../x?y#z%").await.unwrap();

        let sent = client.sent.lock();
        assert_eq!(sent[0].url, "https://sync.example.com/records/a%20b%2Fc");
        assert_eq!(
            sent[1].url,
            "https://sync.example.com/records/..%2Fx%3Fy%23z%25"
        );
        assert_eq!(path_segment("Ab-9._~"), "Ab-9._~");
        assert_eq!(path_segment("é"), "%C3%A9");
    }

    #[tokio::test]
    async fn connection_failure_is_retryable() {
        let (transport, _client) = transport();
        let err = transport.delete("c1").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(transport.last_error().as_deref(), Some("no scripted reply"));
    }
}
