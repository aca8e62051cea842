//! HTTP transport implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};

use super::{HttpMethod, ProbeDefinition, ProbeError, Transport, TransportResponse};

/// Transport over a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("healthtrail/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self { client })
    }

    async fn send(
        &self,
        method: Method,
        definition: &ProbeDefinition,
    ) -> Result<reqwest::Response, ProbeError> {
        self.client
            .request(method, definition.url().clone())
            .timeout(definition.timeout())
            .send()
            .await
            .map_err(|e| map_error(e, definition.timeout()))
    }
}

fn map_error(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(timeout)
    } else if e.is_builder() {
        ProbeError::Config(e.to_string())
    } else {
        ProbeError::Network(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, definition: &ProbeDefinition) -> Result<TransportResponse, ProbeError> {
        let response = match definition.method() {
            HttpMethod::Get => self.send(Method::GET, definition).await?,
            HttpMethod::Head => {
                let response = self.send(Method::HEAD, definition).await?;
                if matches!(
                    response.status(),
                    StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED
                ) {
                    tracing::debug!("{} rejected HEAD, retrying with GET", definition.name());
                    self.send(Method::GET, definition).await?
                } else {
                    response
                }
            }
        };

        let status = response.status().as_u16();

        // Read the full body to measure complete transfer time
        response
            .bytes()
            .await
            .map_err(|e| map_error(e, definition.timeout()))?;

        Ok(TransportResponse { status })
    }
}
