//! HTTP client for the catch API
//!
//! `POST {server_url}/api/catches` with an `Idempotency-Key` header carrying
//! the mutation's local id, and `GET {server_url}/api/health` for
//! connectivity probing.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::types::{CatchCreateInput, CatchRecord};

use super::endpoint::{CatchEndpoint, ConnectivityProbe, SubmitError};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// HTTP client for the catch API
pub struct CatchClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl CatchClient {
    /// Create a new client from configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        config.validate()?;

        let base_url = config
            .server_url
            .as_deref()
            .ok_or_else(|| Error::Config("api.server_url is required".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = &config.api_token {
            let auth_value = format!("Bearer {}", token);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| Error::Config(format!("invalid api_token: {}", e)))?,
            );
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Api(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if the client can reach the server
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/health", self.base_url);

        match self.http_client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Health check failed");
                false
            }
        }
    }
}

#[async_trait]
impl CatchEndpoint for CatchClient {
    async fn create_catch(
        &self,
        input: &CatchCreateInput,
        idempotency_key: &str,
    ) -> std::result::Result<CatchRecord, SubmitError> {
        let url = format!("{}/api/catches", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(input)
            .send()
            .await
            .map_err(|e| SubmitError::transient(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            response
                .json::<CatchRecord>()
                .await
                .map_err(|e| SubmitError::transient(format!("failed to parse response: {}", e)))
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            Err(SubmitError::from_status(status.as_u16(), error_text))
        }
    }
}

#[async_trait]
impl ConnectivityProbe for CatchClient {
    async fn is_reachable(&self) -> bool {
        self.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SubmitErrorKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one HTTP response and hand back the raw request.
    async fn one_shot_server(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });

        (format!("http://{}", addr), handle)
    }

    fn client_for(url: &str) -> CatchClient {
        CatchClient::new(&ApiConfig {
            server_url: Some(url.to_string()),
            api_token: Some("tok_test".to_string()),
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn sample_input() -> CatchCreateInput {
        CatchCreateInput::new("spot-9", "zander", chrono::Utc::now())
    }

    #[test]
    fn test_client_requires_valid_config() {
        assert!(CatchClient::new(&ApiConfig::default()).is_err());
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = client_for("https://api.example.com/");
        assert_eq!(client.base_url(), "https://api.example.com");
    }

    #[tokio::test]
    async fn test_create_catch_sends_idempotency_key() {
        let (url, server) =
            one_shot_server("201 Created", r#"{"id":"c-1","spotId":"spot-9"}"#).await;
        let client = client_for(&url);

        let record = client
            .create_catch(&sample_input(), "local-123")
            .await
            .unwrap();
        assert_eq!(record.id, "c-1");
        assert_eq!(record.spot_id.as_deref(), Some("spot-9"));

        let request = server.await.unwrap().to_lowercase();
        assert!(request.starts_with("post /api/catches"));
        assert!(request.contains("idempotency-key: local-123"));
        assert!(request.contains("authorization: bearer tok_test"));
        assert!(request.contains("\"speciesid\":\"zander\""));
    }

    #[tokio::test]
    async fn test_create_catch_classifies_status() {
        let (url, _server) = one_shot_server("401 Unauthorized", r#"{"error":"expired"}"#).await;
        let err = client_for(&url)
            .create_catch(&sample_input(), "k")
            .await
            .unwrap_err();
        assert_eq!(err.kind, SubmitErrorKind::Auth);

        let (url, _server) = one_shot_server("422 Unprocessable Entity", r#"{"error":"weight"}"#).await;
        let err = client_for(&url)
            .create_catch(&sample_input(), "k")
            .await
            .unwrap_err();
        assert_eq!(err.kind, SubmitErrorKind::Validation);
        assert_eq!(err.status, Some(422));

        let (url, _server) = one_shot_server("503 Service Unavailable", "{}").await;
        let err = client_for(&url)
            .create_catch(&sample_input(), "k")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_for(&format!("http://{}", addr));
        let err = client.create_catch(&sample_input(), "k").await.unwrap_err();
        assert!(err.is_transient());
        assert!(!client.health_check().await);
    }
}
