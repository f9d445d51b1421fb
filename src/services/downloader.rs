use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Proxy};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::traits::FileTransport;

/// Downloads attachments over HTTP.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Uses the same timeouts and proxies as the API client.
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(concat!("board-archiver/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = config.http_proxy.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.proxy(Proxy::http(proxy)?);
        }
        if let Some(proxy) = config.https_proxy.as_deref().filter(|p| !p.is_empty()) {
            builder = builder.proxy(Proxy::https(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl FileTransport for HttpTransport {
    async fn download(&self, url: &str, destination: &Path) -> Result<u64> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await?;

        // Write next to the target and rename, so an interrupted download
        // never leaves a truncated file under the final name.
        let partial = partial_path(destination);
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, destination).await?;

        Ok(bytes.len() as u64)
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}
