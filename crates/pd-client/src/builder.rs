use crate::client::PdClient;
use crate::config::{PdClientConfig, TlsOptions};
use crate::error::Result;

/// Fluent alternative to `PdClient::new` for wiring TLS and tuning
/// constants together before the async bootstrap runs.
pub struct PdClientBuilder {
    endpoints: Vec<String>,
    config: PdClientConfig,
}

impl PdClientBuilder {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            config: PdClientConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PdClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.config.tls = tls;
        self
    }

    pub async fn build(self) -> Result<PdClient> {
        PdClient::new(self.endpoints, self.config).await
    }
}
