// src/clients/elasticsearch.rs
use crate::config::ElasticsearchConfig;
use crate::health::Ping;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

pub struct ElasticsearchClient {
    http: Client,
    url: Url,
}

impl ElasticsearchClient {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to create elasticsearch HTTP client")?;

        Ok(Self {
            http,
            url: config.url.clone(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Ping for ElasticsearchClient {
    /// `HEAD /` on the cluster; any non-2xx answer counts as a failure.
    async fn ping(&self) -> Result<()> {
        self.http
            .head(self.url.as_str())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
