use super::state_backend::{Backend, BackendError, SourceDescriptor};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fetches the state with an HTTP GET, as served by Terraform's `http`
/// backend or a pre-signed object URL.
pub struct HttpBackend {
    client: Client,
    url: String,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .user_agent(concat!("infralog/", env!("CARGO_PKG_VERSION")))
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn get_state(&self) -> Result<Vec<u8>, BackendError> {
        debug!("Fetching state from URL: {}", self.url);

        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    fn name(&self) -> &'static str {
        "http"
    }

    fn source(&self) -> SourceDescriptor {
        SourceDescriptor::new("http", self.url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_state_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/state"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"version": 4}"#))
            .expect(1)
            .mount(&mock_server)
            .await;

        let backend = HttpBackend::new(
            format!("{}/state", mock_server.uri()),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        );
        assert_eq!(backend.get_state().await.unwrap(), br#"{"version": 4}"#.to_vec());
        assert_eq!(backend.source().backend, "http");
    }

    #[tokio::test]
    async fn test_get_state_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let backend = HttpBackend::new(mock_server.uri(), Duration::from_secs(5));
        match backend.get_state().await {
            Err(BackendError::Status { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected status error, got {:?}", other.map(|b| b.len())),
        }
    }
}
