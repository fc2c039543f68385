//! qBittorrent Web API client implementing [`TorrentClient`].
//!
//! Speaks the `api/v2` surface: cookie-based login, `torrents/info`,
//! `torrents/add`, `torrents/delete`, `torrents/properties` and
//! `torrents/files`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use annex_core::{
    CoreError, CoreResult, TorrentClient, TorrentClientState, TorrentFileEntry, TorrentProgress,
    TorrentSummary,
};

const SERVICE: &str = "torrent_client";

fn external(operation: &'static str, source: impl Into<String>) -> CoreError {
    CoreError::External {
        service: SERVICE,
        operation,
        source: source.into().into(),
    }
}

fn http(operation: &'static str, err: reqwest::Error) -> CoreError {
    CoreError::external(SERVICE, operation, err)
}

/// One row of `torrents/info`.
#[derive(Debug, Deserialize)]
struct TorrentInfoRow {
    hash: String,
    name: String,
    /// Completion ratio in `[0, 1]`.
    progress: f64,
    state: String,
    save_path: Option<String>,
    content_path: Option<String>,
    #[serde(default)]
    num_seeds: i32,
    #[serde(default)]
    num_leechs: i32,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    dlspeed: i64,
}

/// One row of `torrents/files`.
#[derive(Debug, Deserialize)]
struct TorrentFileRow {
    name: String,
    size: u64,
}

fn map_state(state: &str) -> TorrentClientState {
    match state {
        "uploading" | "stalledUP" | "pausedUP" | "stoppedUP" | "queuedUP" | "checkingUP"
        | "forcedUP" => TorrentClientState::Completed,
        "downloading" | "forcedDL" | "metaDL" | "checkingDL" | "allocating" => {
            TorrentClientState::Downloading
        }
        "stalledDL" => TorrentClientState::Stalled,
        "error" | "missingFiles" => TorrentClientState::Errored,
        _ => TorrentClientState::Queued,
    }
}

fn summary_from_row(row: TorrentInfoRow) -> TorrentSummary {
    TorrentSummary {
        state: map_state(&row.state),
        hash: row.hash,
        name: row.name,
        progress: row.progress * 100.0,
        save_path: row.save_path,
        content_path: row.content_path,
        seeders: row.num_seeds,
        peers: row.num_leechs,
        size_bytes: row.size,
        download_bps: row.dlspeed.try_into().unwrap_or(0),
    }
}

/// Cookie-authenticated qBittorrent Web API client.
pub struct QbitClient {
    base: Url,
    username: String,
    password: String,
    client: Client,
}

impl QbitClient {
    /// Build a client for the given Web UI base URL.
    ///
    /// # Errors
    ///
    /// Returns an error when the base URL is invalid or the HTTP client
    /// cannot be constructed.
    pub fn new(base_url: &str, username: &str, password: &str) -> CoreResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|err| CoreError::external(SERVICE, "parse_base_url", err))?;
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|err| http("build_client", err))?;
        Ok(Self {
            base,
            username: username.to_owned(),
            password: password.to_owned(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> CoreResult<Url> {
        self.base
            .join(path)
            .map_err(|err| CoreError::external(SERVICE, "build_url", err))
    }

    /// Log in, establishing the session cookie. qBittorrent answers `200`
    /// with body `Fails.` on bad credentials.
    async fn login(&self) -> CoreResult<()> {
        let url = self.endpoint("api/v2/auth/login")?;
        let response = self
            .client
            .post(url)
            .form(&[("username", &self.username), ("password", &self.password)])
            .send()
            .await
            .map_err(|err| http("login", err))?;
        let body = response.text().await.map_err(|err| http("login", err))?;
        if body.trim() == "Ok." {
            debug!("qbittorrent session established");
            Ok(())
        } else {
            Err(external("login", format!("login rejected: {body}")))
        }
    }

    /// Send a request, re-authenticating once on a `403`.
    async fn send_authenticated(
        &self,
        operation: &'static str,
        build: impl Fn(&Client) -> reqwest::RequestBuilder + Send,
    ) -> CoreResult<reqwest::Response> {
        let response = build(&self.client)
            .send()
            .await
            .map_err(|err| http(operation, err))?;
        if response.status() == StatusCode::FORBIDDEN {
            self.login().await?;
            let retried = build(&self.client)
                .send()
                .await
                .map_err(|err| http(operation, err))?;
            return Ok(retried);
        }
        Ok(response)
    }

    async fn info_rows(&self, hash: Option<&str>) -> CoreResult<Vec<TorrentInfoRow>> {
        let mut url = self.endpoint("api/v2/torrents/info")?;
        if let Some(hash) = hash {
            url.query_pairs_mut().append_pair("hashes", hash);
        }
        let response = self
            .send_authenticated("torrents_info", move |client| client.get(url.clone()))
            .await?;
        response
            .json::<Vec<TorrentInfoRow>>()
            .await
            .map_err(|err| http("torrents_info", err))
    }
}

#[async_trait]
impl TorrentClient for QbitClient {
    async fn list_torrents(&self) -> CoreResult<Vec<TorrentSummary>> {
        let rows = self.info_rows(None).await?;
        Ok(rows.into_iter().map(summary_from_row).collect())
    }

    async fn add_torrent(
        &self,
        url_or_magnet: &str,
        save_path_hint: Option<&str>,
    ) -> CoreResult<String> {
        let before: Vec<String> = self
            .info_rows(None)
            .await?
            .into_iter()
            .map(|row| row.hash)
            .collect();

        let url = self.endpoint("api/v2/torrents/add")?;
        let mut form = vec![("urls".to_owned(), url_or_magnet.to_owned())];
        if let Some(save_path) = save_path_hint {
            form.push(("savepath".to_owned(), save_path.to_owned()));
        }
        let response = self
            .send_authenticated("torrents_add", move |client| {
                client.post(url.clone()).form(&form)
            })
            .await?;
        if !response.status().is_success() {
            return Err(external(
                "torrents_add",
                format!("add rejected with status {}", response.status()),
            ));
        }

        // The add endpoint returns no identifier; the new hash is the row
        // that was not present before submission.
        for _ in 0..10 {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            let rows = self.info_rows(None).await?;
            if let Some(row) = rows.into_iter().find(|row| !before.contains(&row.hash)) {
                return Ok(row.hash);
            }
        }
        Err(external(
            "torrents_add",
            "submitted torrent did not appear in the torrent list",
        ))
    }

    async fn delete_torrent(&self, hash: &str, delete_files: bool) -> CoreResult<()> {
        let url = self.endpoint("api/v2/torrents/delete")?;
        let form = vec![
            ("hashes".to_owned(), hash.to_owned()),
            ("deleteFiles".to_owned(), delete_files.to_string()),
        ];
        let response = self
            .send_authenticated("torrents_delete", move |client| {
                client.post(url.clone()).form(&form)
            })
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(external(
                "torrents_delete",
                format!("delete rejected with status {}", response.status()),
            ))
        }
    }

    async fn get_progress(&self, hash: &str) -> CoreResult<TorrentProgress> {
        let rows = self.info_rows(Some(hash)).await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::not_found("torrent", hash))?;
        let summary = summary_from_row(row);
        Ok(TorrentProgress {
            percent: summary.progress,
            state: summary.state,
            seeders: summary.seeders,
            peers: summary.peers,
            download_bps: summary.download_bps,
            content_path: summary.content_path,
        })
    }

    async fn get_torrent_files(&self, hash: &str) -> CoreResult<Vec<TorrentFileEntry>> {
        let mut url = self.endpoint("api/v2/torrents/files")?;
        url.query_pairs_mut().append_pair("hash", hash);
        let response = self
            .send_authenticated("torrents_files", move |client| client.get(url.clone()))
            .await?;
        let rows = response
            .json::<Vec<TorrentFileRow>>()
            .await
            .map_err(|err| http("torrents_files", err))?;
        Ok(rows
            .into_iter()
            .map(|row| TorrentFileEntry {
                path: row.name,
                size_bytes: row.size,
            })
            .collect())
    }

    async fn get_main_video_file(&self, hash: &str) -> CoreResult<Option<TorrentFileEntry>> {
        let files = self.get_torrent_files(hash).await?;
        Ok(files.into_iter().max_by_key(|entry| entry.size_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qbit_states_map_to_client_states() {
        assert_eq!(map_state("uploading"), TorrentClientState::Completed);
        assert_eq!(map_state("stalledUP"), TorrentClientState::Completed);
        assert_eq!(map_state("downloading"), TorrentClientState::Downloading);
        assert_eq!(map_state("stalledDL"), TorrentClientState::Stalled);
        assert_eq!(map_state("error"), TorrentClientState::Errored);
        assert_eq!(map_state("missingFiles"), TorrentClientState::Errored);
        assert_eq!(map_state("queuedDL"), TorrentClientState::Queued);
    }

    #[test]
    fn summary_scales_progress_to_percent() {
        let row = TorrentInfoRow {
            hash: "h".to_owned(),
            name: "n".to_owned(),
            progress: 0.42,
            state: "downloading".to_owned(),
            save_path: None,
            content_path: None,
            num_seeds: 3,
            num_leechs: 1,
            size: 100,
            dlspeed: 1_000,
        };
        let summary = summary_from_row(row);
        assert!((summary.progress - 42.0).abs() < f64::EPSILON);
        assert_eq!(summary.state, TorrentClientState::Downloading);
    }
}
