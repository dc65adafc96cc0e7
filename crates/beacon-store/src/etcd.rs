//! etcd v2 keys API client.
//!
//! Speaks plain HTTP/1.1 over a fresh TCP connection per request, the
//! same way the health probes do. Every request is bounded by a timeout
//! so a wedged etcd member cannot stall a publish cycle indefinitely.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::net::TcpStream;
use tracing::debug;
use url::form_urlencoded;

use crate::error::{StoreError, StoreResult};
use crate::node::Node;
use crate::KeyStore;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// etcd error codes we distinguish.
const CODE_KEY_NOT_FOUND: u32 = 100;
const CODE_NOT_A_FILE: u32 = 102;
const CODE_NOT_A_DIR: u32 = 104;

#[derive(Deserialize)]
struct KeysResponse {
    node: Node,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "errorCode")]
    error_code: u32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    cause: Option<String>,
}

/// Client for a single etcd endpoint.
#[derive(Debug, Clone)]
pub struct EtcdStore {
    /// `host:port` of the etcd client URL.
    address: String,
    request_timeout: Duration,
}

impl EtcdStore {
    /// Create a client for an `http://host:port` endpoint.
    pub fn new(endpoint: &str) -> StoreResult<Self> {
        if endpoint.starts_with("https://") {
            return Err(StoreError::Transport(format!(
                "unsupported etcd endpoint (TLS not available): {endpoint}"
            )));
        }
        let address = endpoint
            .strip_prefix("http://")
            .unwrap_or(endpoint)
            .trim_end_matches('/');
        if address.is_empty() || address.contains('/') {
            return Err(StoreError::Transport(format!("invalid etcd endpoint: {endpoint}")));
        }
        Ok(Self {
            address: address.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn request(
        &self,
        method: Method,
        key: &str,
        query: &[(&str, String)],
        form: Option<String>,
    ) -> StoreResult<(StatusCode, Bytes)> {
        let mut uri = format!("/v2/keys{key}");
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(&encode_pairs(query));
        }

        let exchange = async {
            let stream = TcpStream::connect(&self.address)
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?;
            let io = TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "etcd connection ended with error");
                }
            });

            let mut builder = Request::builder()
                .method(method)
                .uri(&uri)
                .header(HOST, &self.address)
                .header(USER_AGENT, "beacon-publisher/0.1");
            let body = match form {
                Some(form) => {
                    builder = builder.header(CONTENT_TYPE, "application/x-www-form-urlencoded");
                    Full::new(Bytes::from(form))
                }
                None => Full::new(Bytes::new()),
            };
            let req = builder
                .body(body)
                .map_err(|e| StoreError::Transport(e.to_string()))?;

            let resp = sender
                .send_request(req)
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?;
            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?
                .to_bytes();
            Ok((status, bytes))
        };

        tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| {
                StoreError::Transport(format!("request to {} timed out", self.address))
            })?
    }

    /// Issue a request and discard a successful body.
    async fn expect_success(
        &self,
        method: Method,
        key: &str,
        query: &[(&str, String)],
        form: Option<String>,
    ) -> StoreResult<()> {
        let (status, body) = self.request(method, key, query, form).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(decode_error(status, key, &body))
        }
    }
}

#[async_trait]
impl KeyStore for EtcdStore {
    async fn set(&self, key: &str, value: &str, ttl: u64) -> StoreResult<()> {
        let mut form = vec![("value", value.to_string())];
        if ttl > 0 {
            form.push(("ttl", ttl.to_string()));
        }
        self.expect_success(Method::PUT, key, &[], Some(encode_pairs(&form)))
            .await
    }

    async fn delete(&self, key: &str, recursive: bool) -> StoreResult<()> {
        self.expect_success(Method::DELETE, key, &[("recursive", recursive.to_string())], None)
            .await
    }

    async fn get(&self, key: &str, recursive: bool) -> StoreResult<Node> {
        let query = [
            ("recursive", recursive.to_string()),
            ("sorted", "true".to_string()),
        ];
        let (status, body) = self.request(Method::GET, key, &query, None).await?;
        if !status.is_success() {
            return Err(decode_error(status, key, &body));
        }
        let resp: KeysResponse =
            serde_json::from_slice(&body).map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(resp.node)
    }

    async fn update_dir(&self, key: &str, ttl: u64) -> StoreResult<()> {
        let form = [
            ("dir", "true".to_string()),
            ("prevExist", "true".to_string()),
            ("ttl", ttl.to_string()),
        ];
        self.expect_success(Method::PUT, key, &[], Some(encode_pairs(&form)))
            .await
    }
}

fn encode_pairs(pairs: &[(&str, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        serializer.append_pair(k, v);
    }
    serializer.finish()
}

/// Map an etcd error response onto `StoreError`.
fn decode_error(status: StatusCode, key: &str, body: &[u8]) -> StoreError {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(err) => {
            let subject = err.cause.unwrap_or_else(|| key.to_string());
            match err.error_code {
                CODE_KEY_NOT_FOUND => StoreError::NotFound(subject),
                CODE_NOT_A_FILE => StoreError::NotAFile(subject),
                CODE_NOT_A_DIR => StoreError::NotADirectory(subject),
                code => StoreError::Rejected {
                    code,
                    message: err.message,
                },
            }
        }
        Err(_) => StoreError::Rejected {
            code: u32::from(status.as_u16()),
            message: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};

    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::Response;
    use tokio::net::TcpListener;

    #[derive(Debug, Clone)]
    struct Seen {
        method: Method,
        uri: String,
        body: String,
    }

    /// Serve one canned response per connection, recording each request.
    async fn fake_etcd(status: u16, reply: &'static str) -> (String, Arc<Mutex<Vec<Seen>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let log = log.clone();
                tokio::spawn(async move {
                    let svc = service_fn(move |req: Request<Incoming>| {
                        let log = log.clone();
                        async move {
                            let method = req.method().clone();
                            let uri = req.uri().to_string();
                            let body = req.into_body().collect().await.unwrap().to_bytes();
                            log.lock().unwrap().push(Seen {
                                method,
                                uri,
                                body: String::from_utf8_lossy(&body).into_owned(),
                            });
                            Ok::<_, Infallible>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(Bytes::from_static(reply.as_bytes())))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await;
                });
            }
        });

        (format!("http://{addr}"), seen)
    }

    #[test]
    fn endpoint_parsing() {
        assert_eq!(EtcdStore::new("http://127.0.0.1:4001").unwrap().address(), "127.0.0.1:4001");
        assert_eq!(EtcdStore::new("10.0.0.1:2379/").unwrap().address(), "10.0.0.1:2379");
        assert!(EtcdStore::new("https://10.0.0.1:2379").is_err());
        assert!(EtcdStore::new("http://").is_err());
    }

    #[test]
    fn error_codes_map_to_variants() {
        let body = br#"{"errorCode":100,"message":"Key not found","cause":"/deis/services/x","index":3}"#;
        assert!(matches!(
            decode_error(StatusCode::NOT_FOUND, "/k", body),
            StoreError::NotFound(ref k) if k == "/deis/services/x"
        ));

        let body = br#"{"errorCode":104,"message":"Not a directory","index":3}"#;
        assert!(matches!(
            decode_error(StatusCode::FORBIDDEN, "/k", body),
            StoreError::NotADirectory(ref k) if k == "/k"
        ));

        let body = br#"{"errorCode":105,"message":"Key already exists"}"#;
        assert!(matches!(
            decode_error(StatusCode::PRECONDITION_FAILED, "/k", body),
            StoreError::Rejected { code: 105, .. }
        ));

        assert!(matches!(
            decode_error(StatusCode::BAD_GATEWAY, "/k", b"upstream down"),
            StoreError::Rejected { code: 502, .. }
        ));
    }

    #[tokio::test]
    async fn set_sends_form_encoded_value_and_ttl() {
        let (endpoint, seen) = fake_etcd(201, r#"{"action":"set","node":{"key":"/k"}}"#).await;
        let store = EtcdStore::new(&endpoint).unwrap();

        store
            .set("/deis/services/myapp/myapp_v1.web.1", "10.0.0.5:8080", 20)
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].method, Method::PUT);
        assert_eq!(seen[0].uri, "/v2/keys/deis/services/myapp/myapp_v1.web.1");
        assert_eq!(seen[0].body, "value=10.0.0.5%3A8080&ttl=20");
    }

    #[tokio::test]
    async fn update_dir_requires_prior_existence() {
        let (endpoint, seen) = fake_etcd(200, r#"{"action":"update","node":{"key":"/d","dir":true}}"#).await;
        let store = EtcdStore::new(&endpoint).unwrap();

        store.update_dir("/deis/services/myapp", 20).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].method, Method::PUT);
        assert_eq!(seen[0].body, "dir=true&prevExist=true&ttl=20");
    }

    #[tokio::test]
    async fn delete_passes_recursive_flag() {
        let (endpoint, seen) = fake_etcd(200, r#"{"action":"delete","node":{"key":"/k"}}"#).await;
        let store = EtcdStore::new(&endpoint).unwrap();

        store.delete("/deis/services/a/a_v1.web.1", false).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].method, Method::DELETE);
        assert_eq!(seen[0].uri, "/v2/keys/deis/services/a/a_v1.web.1?recursive=false");
    }

    #[tokio::test]
    async fn get_decodes_directory() {
        let (endpoint, seen) = fake_etcd(
            200,
            r#"{"action":"get","node":{"key":"/deis/services/a","dir":true,"nodes":[{"key":"/deis/services/a/a_v3.web.1","value":"h:1"}]}}"#,
        )
        .await;
        let store = EtcdStore::new(&endpoint).unwrap();

        let node = store.get("/deis/services/a", false).await.unwrap();
        assert!(node.dir);
        assert_eq!(node.nodes[0].key, "/deis/services/a/a_v3.web.1");
        assert_eq!(
            seen.lock().unwrap()[0].uri,
            "/v2/keys/deis/services/a?recursive=false&sorted=true"
        );
    }

    #[tokio::test]
    async fn get_missing_key_maps_to_not_found() {
        let (endpoint, _) = fake_etcd(
            404,
            r#"{"errorCode":100,"message":"Key not found","cause":"/deis/services/a","index":1}"#,
        )
        .await;
        let store = EtcdStore::new(&endpoint).unwrap();

        let err = store.get("/deis/services/a", false).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transport_error() {
        let store = EtcdStore::new("http://127.0.0.1:1")
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        let err = store.set("/k", "v", 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(_)));
    }
}
