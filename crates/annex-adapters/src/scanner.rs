//! Media-server library scan trigger implementing [`LibraryScanner`].
//!
//! Speaks the Jellyfin refresh endpoint; the media-server connection rides
//! on the server's `endpoint` descriptor.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use annex_core::{CoreError, CoreResult, LibraryScanner, ServerConfig};

const SERVICE: &str = "library_scanner";

/// Media-server descriptor carried on a server's `endpoint` payload.
#[derive(Debug, Deserialize)]
struct MediaServerEndpoint {
    media_server_url: String,
    media_server_api_key: String,
}

/// Scan trigger for Jellyfin-compatible media servers.
pub struct JellyfinScanner {
    client: Client,
}

impl JellyfinScanner {
    /// Build the scanner.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new() -> CoreResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|err| CoreError::external(SERVICE, "build_client", err))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LibraryScanner for JellyfinScanner {
    async fn scan(&self, server: &ServerConfig, delivered_path: &str) -> CoreResult<()> {
        let Ok(endpoint) =
            serde_json::from_value::<MediaServerEndpoint>(server.endpoint.clone())
        else {
            // A server without a media-server descriptor simply has nothing
            // to refresh.
            debug!(server = %server.name, "no media server configured; skipping scan");
            return Ok(());
        };
        let mut url = Url::parse(&endpoint.media_server_url)
            .and_then(|base| base.join("Library/Refresh"))
            .map_err(|err| CoreError::external(SERVICE, "build_url", err))?;
        url.query_pairs_mut()
            .append_pair("api_key", &endpoint.media_server_api_key);
        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|err| CoreError::external(SERVICE, "scan", err))?;
        if response.status().is_success() {
            debug!(server = %server.name, path = delivered_path, "library scan triggered");
            Ok(())
        } else {
            Err(CoreError::External {
                service: SERVICE,
                operation: "scan",
                source: format!("refresh rejected with status {}", response.status()).into(),
            })
        }
    }
}
