//! Docker Engine API client.
//!
//! Uses two endpoints: `GET /containers/json` for listings and a
//! long-lived `GET /events` for lifecycle notifications. The engine is
//! reached over its unix socket (`unix:///var/run/docker.sock`) or over
//! TCP (`tcp://host:2375`).

use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{Container, ContainerEvent, Port};
use bytes::Bytes;
use http::header::{HOST, USER_AGENT};
use http::{Method, Request, Response};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::error::{RuntimeError, RuntimeResult};
use crate::subscription::Subscription;
use crate::ContainerRuntime;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone)]
enum Endpoint {
    #[cfg(unix)]
    Unix(std::path::PathBuf),
    Tcp(String),
}

/// Client for one Docker engine.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    endpoint: Endpoint,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiContainer {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    ports: Vec<ApiPort>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiPort {
    #[serde(default)]
    public_port: u16,
}

impl ApiContainer {
    /// Published ports only, ascending and de-duplicated (the engine lists
    /// one entry per bound host address).
    fn into_container(self) -> Container {
        let mut ports: Vec<Port> = self
            .ports
            .into_iter()
            .filter(|p| p.public_port != 0)
            .map(|p| Port {
                public_port: p.public_port,
            })
            .collect();
        ports.sort();
        ports.dedup();
        Container {
            id: self.id,
            names: self.names,
            ports,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApiActor {
    #[serde(rename = "ID")]
    pub id: Option<String>,
}

/// One object from the `/events` stream. Older engines only send
/// `status`/`id`; newer ones add `Type`/`Action`/`Actor`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApiEvent {
    pub status: Option<String>,
    pub id: Option<String>,
    #[serde(rename = "Type")]
    pub kind: Option<String>,
    #[serde(rename = "Action")]
    pub action: Option<String>,
    #[serde(rename = "Actor")]
    pub actor: Option<ApiActor>,
}

impl ApiEvent {
    /// Container lifecycle event, or `None` for image/network/volume events.
    pub fn into_event(self) -> Option<ContainerEvent> {
        if self.kind.as_deref().is_some_and(|k| k != "container") {
            return None;
        }
        let id = self.id.or_else(|| self.actor.and_then(|a| a.id))?;
        let status = self.status.or(self.action)?;
        Some(ContainerEvent::new(&id, status.as_str()))
    }
}

impl DockerRuntime {
    /// Create a client for `unix://<path>`, `tcp://host:port` or `http://host:port`.
    pub fn new(address: &str) -> RuntimeResult<Self> {
        let endpoint = if let Some(path) = address.strip_prefix("unix://") {
            unix_endpoint(address, path)?
        } else if let Some(hostport) = address
            .strip_prefix("tcp://")
            .or_else(|| address.strip_prefix("http://"))
        {
            let hostport = hostport.trim_end_matches('/');
            if hostport.is_empty() {
                return Err(RuntimeError::InvalidAddress(address.to_string()));
            }
            Endpoint::Tcp(hostport.to_string())
        } else {
            return Err(RuntimeError::InvalidAddress(address.to_string()));
        };

        Ok(Self {
            endpoint,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Issue a GET and return once response headers arrive.
    async fn get(&self, path: &str) -> RuntimeResult<Response<Incoming>> {
        let exchange = async {
            match &self.endpoint {
                #[cfg(unix)]
                Endpoint::Unix(socket) => {
                    let stream = tokio::net::UnixStream::connect(socket)
                        .await
                        .map_err(|e| RuntimeError::Connect(format!("{}: {e}", socket.display())))?;
                    send_get(stream, "docker", path).await
                }
                Endpoint::Tcp(addr) => {
                    let stream = TcpStream::connect(addr)
                        .await
                        .map_err(|e| RuntimeError::Connect(format!("{addr}: {e}")))?;
                    send_get(stream, addr, path).await
                }
            }
        };

        let resp = tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| RuntimeError::Connect(format!("request {path} timed out")))??;

        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let body = resp
                .into_body()
                .collect()
                .await
                .map(|b| b.to_bytes())
                .unwrap_or_default();
            Err(RuntimeError::Http {
                status,
                message: String::from_utf8_lossy(&body).trim().to_string(),
            })
        }
    }
}

#[cfg(unix)]
fn unix_endpoint(address: &str, path: &str) -> RuntimeResult<Endpoint> {
    if path.is_empty() {
        return Err(RuntimeError::InvalidAddress(address.to_string()));
    }
    Ok(Endpoint::Unix(path.into()))
}

#[cfg(not(unix))]
fn unix_endpoint(address: &str, _path: &str) -> RuntimeResult<Endpoint> {
    Err(RuntimeError::InvalidAddress(format!(
        "unix sockets unsupported on this platform: {address}"
    )))
}

async fn send_get<S>(stream: S, host: &str, path: &str) -> RuntimeResult<Response<Incoming>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| RuntimeError::Connect(e.to_string()))?;

    // Drive the connection in the background; it outlives this call
    // while a streaming body is being read.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "runtime connection ended with error");
        }
    });

    let req = Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(HOST, host)
        .header(USER_AGENT, "beacon-publisher/0.1")
        .body(Empty::<Bytes>::new())
        .map_err(|e| RuntimeError::Connect(e.to_string()))?;

    sender
        .send_request(req)
        .await
        .map_err(|e| RuntimeError::Connect(e.to_string()))
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self) -> RuntimeResult<Vec<Container>> {
        let resp = self.get("/containers/json").await?;
        let body = tokio::time::timeout(self.request_timeout, resp.into_body().collect())
            .await
            .map_err(|_| RuntimeError::Connect("container listing timed out".to_string()))?
            .map_err(|e| RuntimeError::Connect(e.to_string()))?
            .to_bytes();
        let containers: Vec<ApiContainer> =
            serde_json::from_slice(&body).map_err(|e| RuntimeError::Decode(e.to_string()))?;
        Ok(containers.into_iter().map(ApiContainer::into_container).collect())
    }

    async fn subscribe(&self) -> RuntimeResult<Subscription> {
        let filters = form_urlencoded::Serializer::new(String::new())
            .append_pair("filters", r#"{"type":["container"]}"#)
            .finish();
        let resp = self.get(&format!("/events?{filters}")).await?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let mut body = resp.into_body();
        let feeder = tokio::spawn(async move {
            let mut buf: Vec<u8> = Vec::new();
            while let Some(frame) = body.frame().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "runtime event stream failed");
                        break;
                    }
                };
                let Ok(data) = frame.into_data() else { continue };
                buf.extend_from_slice(&data);

                let (events, consumed) = split_events(&buf);
                buf.drain(..consumed);
                for event in events.into_iter().filter_map(ApiEvent::into_event) {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            debug!("runtime event stream ended");
        });

        Ok(Subscription::new(rx, Some(feeder)))
    }
}

/// Largest malformed tail held back while waiting for its newline.
pub const MAX_PENDING_EVENT_BYTES: usize = 64 * 1024;

/// Pull every complete event object out of `buf`.
///
/// Returns the decoded events and how many bytes were consumed; an
/// incomplete trailing object is left for the next read. A malformed
/// line is skipped up to the next newline. If that newline has not
/// arrived yet the line is held back too, unless it has grown past
/// [`MAX_PENDING_EVENT_BYTES`].
pub fn split_events(buf: &[u8]) -> (Vec<ApiEvent>, usize) {
    let mut events = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        let rest = &buf[offset..];
        let mut stream = serde_json::Deserializer::from_slice(rest).into_iter::<ApiEvent>();
        match stream.next() {
            None => return (events, buf.len()),
            Some(Ok(event)) => {
                events.push(event);
                offset += stream.byte_offset();
            }
            Some(Err(e)) if e.is_eof() => break,
            Some(Err(e)) => match rest.iter().position(|&b| b == b'\n') {
                Some(nl) => {
                    warn!(error = %e, "skipping malformed runtime event");
                    offset += nl + 1;
                }
                None if rest.len() > MAX_PENDING_EVENT_BYTES => {
                    warn!(error = %e, bytes = rest.len(), "dropping oversized malformed runtime event");
                    return (events, buf.len());
                }
                None => break,
            },
        }
    }

    (events, offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;

    use beacon_core::EventStatus;
    use http_body_util::Full;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use tokio::net::TcpListener;

    /// Fake engine answering every request with `reply`.
    async fn fake_engine(reply: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let svc = service_fn(move |_req: Request<Incoming>| async move {
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(200)
                                .body(Full::new(Bytes::from_static(reply.as_bytes())))
                                .unwrap(),
                        )
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await;
                });
            }
        });
        format!("tcp://{addr}")
    }

    #[test]
    fn address_forms() {
        assert!(DockerRuntime::new("unix:///var/run/docker.sock").is_ok());
        assert!(DockerRuntime::new("tcp://127.0.0.1:2375").is_ok());
        assert!(DockerRuntime::new("http://127.0.0.1:2375").is_ok());
        assert!(DockerRuntime::new("tcp://").is_err());
        assert!(DockerRuntime::new("127.0.0.1:2375").is_err());
    }

    #[test]
    fn split_events_keeps_incomplete_tail() {
        let buf = br#"{"status":"start","id":"a"}
{"status":"stop","id":"b"}
{"status":"sta"#;
        let (events, consumed) = split_events(buf);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id.as_deref(), Some("a"));
        assert_eq!(events[1].status.as_deref(), Some("stop"));
        assert_eq!(&buf[consumed..], br#"
{"status":"sta"#);
    }

    #[test]
    fn split_events_handles_concatenated_objects() {
        let buf = br#"{"status":"start","id":"a"}{"status":"die","id":"a"}"#;
        let (events, consumed) = split_events(buf);
        assert_eq!(events.len(), 2);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn split_events_skips_malformed_line() {
        let buf = b"{\"status\": 5}\n{\"status\":\"stop\",\"id\":\"b\"}\n";
        let (events, consumed) = split_events(buf);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("b"));
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn split_events_holds_malformed_line_until_newline() {
        let (events, consumed) = split_events(b"{bad");
        assert!(events.is_empty());
        assert_eq!(consumed, 0);

        let buf = b"{bad\n{\"status\":\"start\",\"id\":\"a\"}";
        let (events, consumed) = split_events(buf);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("a"));
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn split_events_drops_oversized_malformed_tail() {
        let mut buf = b"{\"status\":\"stop\",\"id\":\"b\"}{bad".to_vec();
        buf.resize(buf.len() + MAX_PENDING_EVENT_BYTES, b'x');
        let (events, consumed) = split_events(&buf);
        assert_eq!(events.len(), 1);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn api_event_conversion() {
        let legacy: ApiEvent = serde_json::from_str(r#"{"status":"start","id":"abc","from":"img"}"#).unwrap();
        assert_eq!(legacy.into_event(), Some(ContainerEvent::start("abc")));

        let modern: ApiEvent = serde_json::from_str(
            r#"{"Type":"container","Action":"stop","Actor":{"ID":"def","Attributes":{}}}"#,
        )
        .unwrap();
        assert_eq!(modern.into_event(), Some(ContainerEvent::stop("def")));

        let image: ApiEvent =
            serde_json::from_str(r#"{"status":"pull","id":"busybox","Type":"image","Action":"pull"}"#).unwrap();
        assert_eq!(image.into_event(), None);

        let other: ApiEvent = serde_json::from_str(r#"{"status":"die","id":"abc"}"#).unwrap();
        assert_eq!(
            other.into_event().unwrap().status,
            EventStatus::Other("die".to_string())
        );
    }

    #[test]
    fn api_container_keeps_published_ports_sorted() {
        let raw = r#"{"Id":"abc","Names":["/myapp_v1.web.1"],"Ports":[
            {"PrivatePort":5000,"PublicPort":49154,"Type":"tcp","IP":"0.0.0.0"},
            {"PrivatePort":22,"Type":"tcp"},
            {"PrivatePort":80,"PublicPort":49153,"Type":"tcp","IP":"0.0.0.0"},
            {"PrivatePort":80,"PublicPort":49153,"Type":"tcp","IP":"::"}
        ]}"#;
        let c: ApiContainer = serde_json::from_str(raw).unwrap();
        let c = c.into_container();
        assert_eq!(c.id, "abc");
        assert_eq!(
            c.ports,
            vec![Port { public_port: 49153 }, Port { public_port: 49154 }]
        );
    }

    #[tokio::test]
    async fn list_containers_over_tcp() {
        let addr = fake_engine(
            r#"[{"Id":"abc","Names":["/myapp_v1.web.1"],"Ports":[{"PrivatePort":80,"PublicPort":8080,"Type":"tcp"}]}]"#,
        )
        .await;
        let rt = DockerRuntime::new(&addr).unwrap();
        let containers = rt.list_containers().await.unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].lowest_port(), Some(8080));

        let found = rt.find_container("abc").await.unwrap();
        assert_eq!(found.names, vec!["/myapp_v1.web.1"]);
    }

    #[tokio::test]
    async fn subscribe_streams_container_events() {
        let addr = fake_engine(
            "{\"status\":\"start\",\"id\":\"abc\"}\n{\"status\":\"pull\",\"id\":\"img\",\"Type\":\"image\"}\n{\"status\":\"stop\",\"id\":\"abc\"}\n",
        )
        .await;
        let rt = DockerRuntime::new(&addr).unwrap();
        let mut sub = rt.subscribe().await.unwrap();

        assert_eq!(sub.recv().await, Some(ContainerEvent::start("abc")));
        assert_eq!(sub.recv().await, Some(ContainerEvent::stop("abc")));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn unreachable_engine_is_connect_error() {
        let rt = DockerRuntime::new("tcp://127.0.0.1:1")
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        assert!(matches!(
            rt.list_containers().await,
            Err(RuntimeError::Connect(_))
        ));
    }
}
