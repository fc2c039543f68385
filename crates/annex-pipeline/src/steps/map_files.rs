//! File mapping: after a download completes, extract archives, filter
//! samples and map video files onto processing items.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{info, warn};
use walkdir::WalkDir;

use annex_core::{
    CancelSignal, CoreError, Download, DownloadStatus, ItemKind, ItemStatus, MediaKind,
    ProcessingItem, ProgressSink, StepContext,
};
use annex_events::Event;
use annex_quality::{is_sample, is_video_file, parse_name};

use crate::error::{PipelineError, PipelineResult};
use crate::step::{PipelineDeps, Step, StepOutput};

/// The `map_files` step.
pub struct MapFilesStep {
    deps: Arc<PipelineDeps>,
}

/// A candidate video file with its size.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    size_bytes: u64,
}

fn content_root(download: &Download) -> Option<PathBuf> {
    if let Some(content) = &download.content_path {
        return Some(PathBuf::from(content));
    }
    download
        .save_path
        .as_ref()
        .map(|save| Path::new(save).join(&download.name))
}

fn scan_candidates(root: &Path) -> Vec<Candidate> {
    if root.is_file() {
        let size = std::fs::metadata(root).map(|meta| meta.len()).unwrap_or(0);
        return vec![Candidate {
            path: root.to_path_buf(),
            size_bytes: size,
        }];
    }
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let size = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
            Candidate {
                path: entry.into_path(),
                size_bytes: size,
            }
        })
        .collect()
}

fn find_archive(root: &Path) -> Option<PathBuf> {
    let mut archives: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("rar"))
        })
        .collect();
    archives.sort();
    // Multi-part sets extract from the first part; `part01.rar` sorts ahead
    // of the later parts and a bare `.rar` set has one entry anyway.
    archives.into_iter().find(|path| {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let lower = name.to_lowercase();
        !lower.contains(".part") || lower.contains(".part01.") || lower.contains(".part1.")
    })
}

impl MapFilesStep {
    /// Build the step over the shared dependencies.
    #[must_use]
    pub const fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    /// Extract a RAR set into the content root. Extraction failures are
    /// logged and mapping continues; video files may exist outside the
    /// archive.
    async fn extract_archive(&self, archive: &Path, dest: &Path) {
        info!(archive = %archive.display(), "extracting archive");
        let result = Command::new("unrar")
            .arg("x")
            .arg("-o+")
            .arg("-idq")
            .arg(archive)
            .arg(dest)
            .output()
            .await;
        match result {
            Ok(output) if output.status.success() => {}
            Ok(output) => warn!(
                archive = %archive.display(),
                status = %output.status,
                "archive extraction failed; continuing with loose files"
            ),
            Err(err) => warn!(
                archive = %archive.display(),
                error = %err,
                "unrar unavailable; continuing with loose files"
            ),
        }
    }

    async fn map_item(
        &self,
        item: &ProcessingItem,
        download: &Download,
        source: &Path,
    ) -> PipelineResult<()> {
        let mut context = item.step_context.clone();
        context.set_download(download.id, &download.torrent_hash);
        context.set_source_file_path(&source.to_string_lossy());
        self.deps.store.set_item_context(item.id, &context).await?;
        self.deps
            .store
            .transition_item(
                item.id,
                &[ItemStatus::Downloading, ItemStatus::Pending],
                ItemStatus::Downloaded,
            )
            .await?;
        self.deps.store.set_item_progress(item.id, 100).await?;
        Ok(())
    }
}

#[async_trait]
impl Step for MapFilesStep {
    fn kind(&self) -> &'static str {
        "map_files"
    }

    fn validate_config(&self, config: &Value) -> PipelineResult<()> {
        if config.is_null() || config.as_object().is_some_and(Map::is_empty) {
            Ok(())
        } else {
            Err(PipelineError::InvalidConfig {
                step: "map_files".to_owned(),
                reason: "step takes no configuration".to_owned(),
            })
        }
    }

    async fn execute(
        &self,
        context: &StepContext,
        _config: &Value,
        _progress: &dyn ProgressSink,
        cancel: &CancelSignal,
    ) -> PipelineResult<StepOutput> {
        cancel.ensure_active()?;
        let request_id = context.request_id()?;
        let request = self
            .deps
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CoreError::not_found("request", request_id))?;
        let downloads: Vec<Download> = self
            .deps
            .store
            .downloads_for_request(request_id)
            .await?
            .into_iter()
            .filter(|download| {
                matches!(
                    download.status,
                    DownloadStatus::Completed | DownloadStatus::Importing
                )
            })
            .collect();
        if downloads.is_empty() {
            return Ok(StepOutput::skip());
        }

        let mut data = Map::new();
        let mut mapped_total = 0_usize;
        let mut unmatched_total = 0_usize;

        for download in &downloads {
            cancel.ensure_active()?;
            self.deps
                .store
                .transition_download(
                    download.id,
                    &[DownloadStatus::Completed],
                    DownloadStatus::Importing,
                )
                .await?;

            let Some(root) = content_root(download) else {
                warn!(download_id = %download.id, "download has no content path; skipping");
                continue;
            };

            if let Some(archive) = find_archive(&root) {
                let dest = if root.is_file() {
                    root.parent().unwrap_or(&root).to_path_buf()
                } else {
                    root.clone()
                };
                self.extract_archive(&archive, &dest).await;
            }

            let candidates: Vec<Candidate> = scan_candidates(&root)
                .into_iter()
                .filter(|candidate| is_video_file(&candidate.path))
                .filter(|candidate| !is_sample(&candidate.path, candidate.size_bytes))
                .collect();
            if candidates.is_empty() {
                warn!(download_id = %download.id, root = %root.display(), "no usable video files found");
                continue;
            }

            let items = self.deps.store.items_for_download(download.id).await?;
            match request.kind {
                MediaKind::Movie => {
                    let largest = candidates
                        .iter()
                        .max_by_key(|candidate| candidate.size_bytes)
                        .cloned();
                    if let Some(best) = largest {
                        for item in items
                            .iter()
                            .filter(|item| item.kind == ItemKind::Movie)
                            .filter(|item| !item.status.is_terminal())
                        {
                            if item.step_context.source_file_path().is_some() {
                                continue;
                            }
                            self.map_item(item, download, &best.path).await?;
                            mapped_total += 1;
                        }
                        data.insert(
                            "download".into(),
                            serde_json::json!({
                                "id": download.id,
                                "torrent_hash": download.torrent_hash,
                                "source_file_path": best.path.to_string_lossy(),
                            }),
                        );
                    }
                }
                MediaKind::Tv => {
                    for item in items
                        .iter()
                        .filter(|item| item.kind == ItemKind::Episode)
                        .filter(|item| !item.status.is_terminal())
                    {
                        // Items past the mapping stage are a resume; skip.
                        if item.step_context.source_file_path().is_some() {
                            continue;
                        }
                        let matched = candidates.iter().find(|candidate| {
                            let name = candidate
                                .path
                                .file_name()
                                .and_then(|n| n.to_str())
                                .unwrap_or("");
                            let parsed = parse_name(name);
                            // Multi-episode files stay unmatched in this
                            // pass.
                            !parsed.is_multi_episode()
                                && parsed.season == item.season
                                && parsed.episode == item.episode
                        });
                        if let Some(candidate) = matched {
                            self.map_item(item, download, &candidate.path).await?;
                            mapped_total += 1;
                        } else {
                            self.deps
                                .store
                                .set_item_failed(item.id, "Could not match file to episode")
                                .await?;
                            unmatched_total += 1;
                        }
                    }
                }
            }

            self.deps
                .store
                .transition_download(
                    download.id,
                    &[DownloadStatus::Importing],
                    DownloadStatus::Processed,
                )
                .await?;
            self.deps
                .emit(
                    request_id,
                    Event::FilesMapped {
                        download_id: download.id,
                        mapped: mapped_total,
                        unmatched: unmatched_total,
                    },
                    "files mapped to items",
                )
                .await;
        }

        if mapped_total == 0 && unmatched_total == 0 {
            return Ok(StepOutput::skip());
        }
        Ok(StepOutput::success(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn download_with(content: Option<&str>, save: Option<&str>, name: &str) -> Download {
        Download {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            torrent_hash: "hash".to_string(),
            name: name.to_string(),
            save_path: save.map(ToOwned::to_owned),
            content_path: content.map(ToOwned::to_owned),
            status: DownloadStatus::Completed,
            progress: 100.0,
            seeders: 1,
            peers: 0,
            size_bytes: 0,
            alternatives: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn content_path_wins_over_save_path() {
        let download = download_with(Some("/data/torrents/Movie"), Some("/data/torrents"), "Movie");
        assert_eq!(
            content_root(&download),
            Some(PathBuf::from("/data/torrents/Movie"))
        );

        let download = download_with(None, Some("/data/torrents"), "Movie");
        assert_eq!(
            content_root(&download),
            Some(PathBuf::from("/data/torrents/Movie"))
        );

        let download = download_with(None, None, "Movie");
        assert_eq!(content_root(&download), None);
    }

    #[test]
    fn archive_discovery_prefers_first_part() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("movie.part02.rar"), b"x").expect("write");
        std::fs::write(dir.path().join("movie.part01.rar"), b"x").expect("write");
        let archive = find_archive(dir.path()).expect("archive present");
        assert!(
            archive
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains("part01"))
        );
    }

    #[test]
    fn scan_handles_single_file_roots() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("movie.mkv");
        std::fs::write(&file, b"data").expect("write");
        let candidates = scan_candidates(&file);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].path, file);
    }
}
