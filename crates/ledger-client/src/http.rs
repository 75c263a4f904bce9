use crate::{gateway::SegmentLedger, LedgerError};
use analysis::CameraDirectoryService;
use anyhow::{anyhow, Context, Result};
use model::{CameraId, LedgerReply, SegmentCheck, SegmentRecord, SegmentSubmission};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_url: String,
    /// Raw `Cookie` header of an authenticated session, e.g. `connect.sid=...`.
    pub session_cookie: Option<String>,
    /// Current user, if logged in. The server stamps its own copy.
    pub user_id: Option<i64>,
    pub timeout_ms: u64,
    pub use_system_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".into(),
            session_cookie: None,
            user_id: None,
            timeout_ms: 10_000,
            use_system_proxy: true,
        }
    }
}

/// Both backing services live behind the same authenticated origin.
pub struct HttpLedger {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpLedger {
    pub fn new(cfg: &ServerConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = &cfg.session_cookie {
            headers.insert(COOKIE, HeaderValue::from_str(cookie).context("invalid session cookie")?);
        }
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .default_headers(headers);
        if !cfg.use_system_proxy {
            builder = builder.no_proxy();
        }
        let http_client = builder.build().context("Failed to build HTTP client")?;
        Ok(Self { http_client, base_url: cfg.base_url.clone() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, i64)]) -> Result<T> {
        let url = self.url(path);
        debug!("GET {url} {query:?}");
        let response = self.http_client.get(&url).query(query).send().await
            .with_context(|| format!("GET {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
            return Err(anyhow!("GET {url} returned {status}: {body}"));
        }
        response.json::<T>().await.with_context(|| format!("decode response of {url}"))
    }

    async fn post_segment(&self, record: &SegmentRecord) -> Result<()> {
        let url = self.url("/api/segments");
        let body = SegmentSubmission::try_from(record)?;
        let response = self.http_client.post(&url).json(&body).send().await
            .with_context(|| format!("POST {url}"))?;
        let status = response.status();
        let reply = response.json::<LedgerReply>().await.unwrap_or_default();
        if !status.is_success() {
            let reason = reply.error.unwrap_or_else(|| "<no body>".to_string());
            return Err(anyhow!("POST {url} returned {status}: {reason}"));
        }
        info!(
            "segment {} -> {} stored ({})",
            record.first_camera_id,
            record.second_camera_id,
            reply.status.as_deref().unwrap_or("ok")
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl CameraDirectoryService for HttpLedger {
    async fn fetch_cameras(&self) -> Result<Vec<Value>> {
        self.get_json("/api/cameras", &[]).await
    }
}

#[async_trait::async_trait]
impl SegmentLedger for HttpLedger {
    async fn segment_exists(&self, first: CameraId, second: CameraId) -> Result<bool, LedgerError> {
        self.get_json::<SegmentCheck>("/api/check-segment", &[("first", first.0), ("second", second.0)])
            .await
            .map(|c| c.exists)
            .map_err(|e| LedgerError::SubmissionFailed(format!("{e:#}")))
    }

    async fn submit(&self, record: &SegmentRecord) -> Result<(), LedgerError> {
        self.post_segment(record)
            .await
            .map_err(|e| LedgerError::SubmissionFailed(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::datetime_from_ms;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Accepts one connection, answers with `status`/`body` and hands back the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (ServerConfig, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut req = Vec::new();
            let mut buf = [0u8; 4096];
            let mut expected: Option<usize> = None;
            loop {
                if let Some(total) = expected {
                    if req.len() >= total {
                        break;
                    }
                }
                let n = sock.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                req.extend_from_slice(&buf[..n]);
                if expected.is_none() {
                    if let Some(end) = req.windows(4).position(|w| w == b"\r\n\r\n") {
                        let head = String::from_utf8_lossy(&req[..end]).to_lowercase();
                        let len = head
                            .lines()
                            .find_map(|l| l.strip_prefix("content-length:"))
                            .and_then(|v| v.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        expected = Some(end + 4 + len);
                    }
                }
            }
            let resp = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            let _ = sock.shutdown().await;
            String::from_utf8_lossy(&req).into_owned()
        });
        let cfg = ServerConfig {
            base_url: format!("http://{addr}/"),
            session_cookie: Some("connect.sid=s%3Aabc".into()),
            user_id: Some(7),
            timeout_ms: 5_000,
            use_system_proxy: false,
        };
        (cfg, task)
    }

    fn record() -> SegmentRecord {
        SegmentRecord {
            user_id: Some(7),
            first_camera_id: CameraId(1),
            second_camera_id: CameraId(2),
            first_camera_name: "A".into(),
            second_camera_name: "B".into(),
            average_speed_kmh: 60.0,
            started_at: datetime_from_ms(0).unwrap(),
            finished_at: datetime_from_ms(60_000).unwrap(),
        }
    }

    #[test]
    fn url_join() {
        let ledger = HttpLedger::new(&ServerConfig { base_url: "http://x:3000/".into(), ..Default::default() }).unwrap();
        assert_eq!(ledger.url("/api/cameras"), "http://x:3000/api/cameras");
    }

    #[test]
    fn rejects_unprintable_cookie() {
        let cfg = ServerConfig { session_cookie: Some("bad\ncookie".into()), ..Default::default() };
        assert!(HttpLedger::new(&cfg).is_err());
    }

    #[tokio::test]
    async fn fetches_cameras_with_session_cookie() {
        let (cfg, server) = serve_once("200 OK", r#"[{"id":1,"name":"A","latitude":"42.1","longitude":23.0}]"#).await;
        let ledger = HttpLedger::new(&cfg).unwrap();
        let cams = ledger.fetch_cameras().await.unwrap();
        assert_eq!(cams.len(), 1);
        let req = server.await.unwrap();
        assert!(req.starts_with("GET /api/cameras "), "{req}");
        assert!(req.to_lowercase().contains("cookie: connect.sid=s%3aabc"));
    }

    #[tokio::test]
    async fn check_segment_preserves_order() {
        let (cfg, server) = serve_once("200 OK", r#"{"exists":true}"#).await;
        let ledger = HttpLedger::new(&cfg).unwrap();
        assert!(ledger.segment_exists(CameraId(2), CameraId(1)).await.unwrap());
        let req = server.await.unwrap();
        assert!(req.starts_with("GET /api/check-segment?first=2&second=1 "), "{req}");
    }

    #[tokio::test]
    async fn directory_error_status_is_an_error() {
        let (cfg, server) = serve_once("401 Unauthorized", r#"{"error":"login required"}"#).await;
        let ledger = HttpLedger::new(&cfg).unwrap();
        let err = ledger.fetch_cameras().await.unwrap_err();
        assert!(format!("{err:#}").contains("401"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn submit_posts_camel_case_body() {
        let (cfg, server) = serve_once("200 OK", r#"{"status":"ok"}"#).await;
        let ledger = HttpLedger::new(&cfg).unwrap();
        ledger.submit(&record()).await.unwrap();
        let req = server.await.unwrap();
        assert!(req.starts_with("POST /api/segments "), "{req}");
        let body: Value = serde_json::from_str(req.split("\r\n\r\n").nth(1).unwrap()).unwrap();
        assert_eq!(body["firstCameraId"], 1);
        assert_eq!(body["secondCameraId"], 2);
        assert_eq!(body["startedAt"], "1970-01-01T00:00:00Z");
        assert_eq!(body["finishedAt"], "1970-01-01T00:01:00Z");
    }

    #[tokio::test]
    async fn submit_failure_carries_server_reason() {
        let (cfg, server) = serve_once("500 Internal Server Error", r#"{"error":"Internal server error"}"#).await;
        let ledger = HttpLedger::new(&cfg).unwrap();
        let err = ledger.submit(&record()).await.unwrap_err();
        let LedgerError::SubmissionFailed(msg) = err;
        assert!(msg.contains("500") && msg.contains("Internal server error"), "{msg}");
        server.await.unwrap();
    }
}
