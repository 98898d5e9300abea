use std::time::Duration;

use async_trait::async_trait;
use bn_core::{AppError, ImageFetcher, Result};
use reqwest::Client;

/// Downloads avatars straight from the image host; no relay involved.
pub struct HttpImageFetcher {
    http: Client,
}

impl HttpImageFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::InvalidConfig(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Io(format!("fetch {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(AppError::Io(format!("fetch {url}: status {}", response.status())));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Io(format!("fetch {url}: {e}")))?;
        Ok(bytes.to_vec())
    }
}
