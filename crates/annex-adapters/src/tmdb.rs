//! TMDB metadata provider implementing [`MetadataProvider`].

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use annex_core::{
    CoreError, CoreResult, EpisodeMetadata, MetadataProvider, MovieMetadata, SeasonMetadata,
    ShowMetadata,
};

const SERVICE: &str = "metadata";
const DEFAULT_BASE_URL: &str = "https://api.themoviedb.org/3/";

#[derive(Debug, Deserialize)]
struct MoviePayload {
    id: i64,
    title: String,
    #[serde(default)]
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeasonSummaryPayload {
    season_number: i32,
}

#[derive(Debug, Deserialize)]
struct ShowPayload {
    id: i64,
    name: String,
    #[serde(default)]
    seasons: Vec<SeasonSummaryPayload>,
}

#[derive(Debug, Deserialize)]
struct EpisodePayload {
    episode_number: i32,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    air_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeasonPayload {
    season_number: i32,
    #[serde(default)]
    episodes: Vec<EpisodePayload>,
}

/// TMDB v3 API client.
pub struct TmdbClient {
    base: Url,
    api_key: String,
    client: Client,
}

impl TmdbClient {
    /// Build a client with the default API base URL.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(api_key: &str) -> CoreResult<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    /// Build a client against a custom base URL (mirrors, tests).
    ///
    /// # Errors
    ///
    /// Returns an error when the base URL is invalid.
    pub fn with_base_url(base_url: &str, api_key: &str) -> CoreResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|err| CoreError::external(SERVICE, "parse_base_url", err))?;
        let client = Client::builder()
            .build()
            .map_err(|err| CoreError::external(SERVICE, "build_client", err))?;
        Ok(Self {
            base,
            api_key: api_key.to_owned(),
            client,
        })
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
    ) -> CoreResult<T> {
        let mut url = self
            .base
            .join(path)
            .map_err(|err| CoreError::external(SERVICE, operation, err))?;
        url.query_pairs_mut().append_pair("api_key", &self.api_key);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| CoreError::external(SERVICE, operation, err))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::not_found("tmdb_entity", path));
        }
        response
            .json::<T>()
            .await
            .map_err(|err| CoreError::external(SERVICE, operation, err))
    }
}

fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    raw.and_then(|value| NaiveDate::parse_from_str(value, "%Y-%m-%d").ok())
}

#[async_trait]
impl MetadataProvider for TmdbClient {
    async fn get_show(&self, tmdb_id: i64) -> CoreResult<ShowMetadata> {
        let payload: ShowPayload = self.fetch("get_show", &format!("tv/{tmdb_id}")).await?;
        Ok(ShowMetadata {
            tmdb_id: payload.id,
            title: payload.name,
            seasons: payload
                .seasons
                .into_iter()
                .map(|season| season.season_number)
                .filter(|season| *season > 0)
                .collect(),
        })
    }

    async fn get_seasons(&self, tmdb_id: i64) -> CoreResult<Vec<SeasonMetadata>> {
        let show = self.get_show(tmdb_id).await?;
        let mut seasons = Vec::with_capacity(show.seasons.len());
        for season in show.seasons {
            seasons.push(self.get_season(tmdb_id, season).await?);
        }
        Ok(seasons)
    }

    async fn get_season(&self, tmdb_id: i64, season: i32) -> CoreResult<SeasonMetadata> {
        let payload: SeasonPayload = self
            .fetch("get_season", &format!("tv/{tmdb_id}/season/{season}"))
            .await?;
        Ok(SeasonMetadata {
            season: payload.season_number,
            episodes: payload
                .episodes
                .into_iter()
                .map(|episode| EpisodeMetadata {
                    season: payload.season_number,
                    episode: episode.episode_number,
                    title: episode.name,
                    air_date: parse_date(episode.air_date.as_deref()),
                })
                .collect(),
        })
    }

    async fn get_movie(&self, tmdb_id: i64) -> CoreResult<MovieMetadata> {
        let payload: MoviePayload = self.fetch("get_movie", &format!("movie/{tmdb_id}")).await?;
        let year = parse_date(payload.release_date.as_deref())
            .map(|date| chrono::Datelike::year(&date));
        Ok(MovieMetadata {
            tmdb_id: payload.id,
            title: payload.title,
            year,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_parse_leniently() {
        assert_eq!(
            parse_date(Some("2024-06-01")),
            NaiveDate::from_ymd_opt(2024, 6, 1)
        );
        assert_eq!(parse_date(Some("not-a-date")), None);
        assert_eq!(parse_date(None), None);
    }
}
