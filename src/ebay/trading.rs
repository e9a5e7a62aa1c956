use crate::ebay::config::TradingConfig;
use crate::http::build_client;
use reqwest::Client;
use std::future::Future;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TradingError {
    #[error("trading api endpoint is not configured")]
    MissingEndpoint,
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {0}")]
    Http(u16),
}

/// One XML document in, one XML document out.
pub trait TradingApi: Send + Sync {
    fn submit(
        &self,
        call_name: &'static str,
        xml: String,
    ) -> impl Future<Output = Result<String, TradingError>> + Send;
}

pub struct TradingClient {
    http: Client,
    config: TradingConfig,
}

impl TradingClient {
    pub fn new(config: TradingConfig) -> Self {
        Self {
            http: build_client(config.timeout_secs),
            config,
        }
    }
}

impl TradingApi for TradingClient {
    async fn submit(&self, call_name: &'static str, xml: String) -> Result<String, TradingError> {
        let endpoint = self.config.endpoint.trim();
        if endpoint.is_empty() {
            return Err(TradingError::MissingEndpoint);
        }
        let response = self
            .http
            .post(endpoint)
            .header(
                "X-EBAY-API-COMPATIBILITY-LEVEL",
                self.config.compat_level.to_string(),
            )
            .header("X-EBAY-API-DEV-NAME", &self.config.dev_id)
            .header("X-EBAY-API-APP-NAME", &self.config.app_id)
            .header("X-EBAY-API-CERT-NAME", &self.config.cert_id)
            .header("X-EBAY-API-CALL-NAME", call_name)
            .header("X-EBAY-API-SITEID", self.config.site_id.to_string())
            .header("Content-Type", "text/xml")
            .body(xml)
            .send()
            .await
            .map_err(|err| TradingError::Request(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TradingError::Request(err.to_string()))?;
        debug!(target = "relay.trading", call = call_name, status = status.as_u16(), "trading_response");

        // Error statuses still carry an Ack document worth parsing.
        if !status.is_success() && !body.contains("<Ack>") {
            return Err(TradingError::Http(status.as_u16()));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blank_endpoint_fails_before_network() {
        let client = TradingClient::new(TradingConfig {
            endpoint: " ".into(),
            auth_token: "t".into(),
            dev_id: String::new(),
            app_id: String::new(),
            cert_id: String::new(),
            site_id: 0,
            compat_level: 1193,
            timeout_secs: 5,
        });
        let err = client
            .submit("AddFixedPriceItem", "<x/>".into())
            .await
            .unwrap_err();
        assert!(matches!(err, TradingError::MissingEndpoint));
    }
}
