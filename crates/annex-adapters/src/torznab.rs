//! Torznab/Newznab-style indexer client implementing [`IndexerClient`].
//!
//! Queries each configured endpoint's JSON search surface and merges the
//! results; a failing indexer is counted, not fatal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use annex_core::{CoreError, CoreResult, IndexerClient, IndexerResponse, Release, SearchQuery};

const SERVICE: &str = "indexer";

/// One configured Torznab endpoint.
#[derive(Debug, Clone)]
pub struct TorznabEndpoint {
    /// Display name used in release attribution and logs.
    pub name: String,
    /// API base URL (the `/api` root).
    pub base_url: String,
    /// API key appended to every query.
    pub api_key: String,
}

/// Wire format of a Torznab JSON item.
#[derive(Debug, Deserialize)]
struct TorznabItem {
    title: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    seeders: u32,
    #[serde(default)]
    leechers: u32,
    #[serde(rename = "link")]
    download_url: String,
    #[serde(rename = "pubDate", default)]
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TorznabChannel {
    #[serde(default)]
    item: Vec<TorznabItem>,
}

#[derive(Debug, Deserialize)]
struct TorznabPayload {
    channel: TorznabChannel,
}

/// Multi-endpoint Torznab client.
pub struct TorznabClient {
    endpoints: Vec<TorznabEndpoint>,
    client: Client,
}

impl TorznabClient {
    /// Build a client over the configured endpoints.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(endpoints: Vec<TorznabEndpoint>) -> CoreResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|err| CoreError::external(SERVICE, "build_client", err))?;
        Ok(Self { endpoints, client })
    }

    fn search_url(
        endpoint: &TorznabEndpoint,
        function: &str,
        query: &SearchQuery,
        season: Option<i32>,
        episode: Option<i32>,
    ) -> CoreResult<Url> {
        let mut url = Url::parse(&endpoint.base_url)
            .map_err(|err| CoreError::external(SERVICE, "parse_base_url", err))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("t", function);
            pairs.append_pair("apikey", &endpoint.api_key);
            pairs.append_pair("o", "json");
            pairs.append_pair("q", &query.title);
            if let Some(year) = query.year {
                pairs.append_pair("year", &year.to_string());
            }
            if let Some(tmdb_id) = query.tmdb_id {
                pairs.append_pair("tmdbid", &tmdb_id.to_string());
            }
            if let Some(imdb_id) = &query.imdb_id {
                pairs.append_pair("imdbid", imdb_id);
            }
            if let Some(season) = season {
                pairs.append_pair("season", &season.to_string());
            }
            if let Some(episode) = episode {
                pairs.append_pair("ep", &episode.to_string());
            }
        }
        Ok(url)
    }

    async fn query_endpoint(
        &self,
        endpoint: &TorznabEndpoint,
        function: &str,
        query: &SearchQuery,
        season: Option<i32>,
        episode: Option<i32>,
    ) -> CoreResult<Vec<Release>> {
        let url = Self::search_url(endpoint, function, query, season, episode)?;
        let payload = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| CoreError::external(SERVICE, "search", err))?
            .json::<TorznabPayload>()
            .await
            .map_err(|err| CoreError::external(SERVICE, "decode", err))?;
        Ok(payload
            .channel
            .item
            .into_iter()
            .map(|item| Release {
                title: item.title,
                indexer: endpoint.name.clone(),
                resolution: None,
                source: None,
                codec: None,
                size_bytes: item.size,
                seeders: item.seeders,
                leechers: item.leechers,
                download_url: item.download_url,
                published_at: item.published_at,
                score: 0,
            })
            .collect())
    }

    async fn search(
        &self,
        function: &str,
        query: &SearchQuery,
        season: Option<i32>,
        episode: Option<i32>,
    ) -> CoreResult<IndexerResponse> {
        let mut response = IndexerResponse::default();
        for endpoint in &self.endpoints {
            response.indexers_queried += 1;
            match self
                .query_endpoint(endpoint, function, query, season, episode)
                .await
            {
                Ok(releases) => response.releases.extend(releases),
                Err(err) => {
                    response.indexers_failed += 1;
                    warn!(indexer = %endpoint.name, error = %err, "indexer query failed");
                }
            }
        }
        Ok(response)
    }
}

#[async_trait]
impl IndexerClient for TorznabClient {
    async fn search_movie(&self, query: &SearchQuery) -> CoreResult<IndexerResponse> {
        self.search("movie", query, None, None).await
    }

    async fn search_season(
        &self,
        query: &SearchQuery,
        season: i32,
    ) -> CoreResult<IndexerResponse> {
        self.search("tvsearch", query, Some(season), None).await
    }

    async fn search_episode(
        &self,
        query: &SearchQuery,
        season: i32,
        episode: i32,
    ) -> CoreResult<IndexerResponse> {
        self.search("tvsearch", query, Some(season), Some(episode))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_url_carries_identifiers() {
        let endpoint = TorznabEndpoint {
            name: "idx".to_owned(),
            base_url: "http://indexer.local/api".to_owned(),
            api_key: "key".to_owned(),
        };
        let query = SearchQuery {
            title: "Fight Club".to_owned(),
            year: Some(1999),
            tmdb_id: Some(550),
            imdb_id: Some("tt0137523".to_owned()),
        };
        let url =
            TorznabClient::search_url(&endpoint, "movie", &query, None, None).expect("url");
        let rendered = url.to_string();
        assert!(rendered.contains("t=movie"));
        assert!(rendered.contains("apikey=key"));
        assert!(rendered.contains("year=1999"));
        assert!(rendered.contains("tmdbid=550"));
        assert!(rendered.contains("imdbid=tt0137523"));
    }

    #[test]
    fn season_search_appends_season_parameter() {
        let endpoint = TorznabEndpoint {
            name: "idx".to_owned(),
            base_url: "http://indexer.local/api".to_owned(),
            api_key: "key".to_owned(),
        };
        let query = SearchQuery {
            title: "Show".to_owned(),
            ..SearchQuery::default()
        };
        let url = TorznabClient::search_url(&endpoint, "tvsearch", &query, Some(2), None)
            .expect("url");
        assert!(url.to_string().contains("season=2"));
    }
}
