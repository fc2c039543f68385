//! Postgres implementation of the [`Store`] trait.
//!
//! # Design
//! - Plain `sqlx::query` calls with positional binds; no compile-time
//!   checked macros, matching the rest of the data layer.
//! - Conditional transitions use `WHERE status = ANY($n)` so concurrent
//!   writers (executor, API, scheduler) cannot clobber each other.
//! - `delete_request` relies on `ON DELETE CASCADE` so the cascade is one
//!   transactional statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use tracing::info;
use uuid::Uuid;

use annex_core::{
    ActivityEntry, AssignmentStatus, CoreError, CoreResult, Download, DownloadStatus,
    EncodeAssignment, EncodeProfile, Execution, ExecutionStatus, ItemStatus, MediaKind,
    PipelineTemplate, ProcessingItem, Release, Request, Resolution, ServerConfig, StepContext,
    Store,
};

use crate::rows::{
    ActivityRow, AssignmentRow, DownloadRow, ExecutionRow, ItemRow, ProfileRow, RequestRow,
    ServerRow, TemplateRow,
};

/// Database-backed store for the pipeline.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

fn db(operation: &'static str) -> impl FnOnce(sqlx::Error) -> CoreError {
    move |err| CoreError::storage(operation, err)
}

fn decode(operation: &'static str) -> impl FnOnce(crate::rows::DecodeError) -> CoreError {
    move |err| CoreError::storage(operation, err)
}

fn to_json<T: serde::Serialize>(operation: &'static str, value: &T) -> CoreResult<Value> {
    serde_json::to_value(value).map_err(|err| CoreError::storage(operation, err))
}

fn item_labels(statuses: &[ItemStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_owned()).collect()
}

fn download_labels(statuses: &[DownloadStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_owned()).collect()
}

fn execution_labels(statuses: &[ExecutionStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_owned()).collect()
}

fn assignment_labels(statuses: &[AssignmentStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_owned()).collect()
}

impl PgStore {
    /// Connect to Postgres and apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error when the database is unreachable or migrations fail.
    pub async fn connect(url: &str) -> CoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await
            .map_err(db("connect"))?;
        Self::new(pool).await
    }

    /// Wrap an existing pool, applying pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error when migrations fail.
    pub async fn new(pool: PgPool) -> CoreResult<Self> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&pool)
            .await
            .map_err(|err| CoreError::storage("migrate", err))?;
        info!("database migrations applied");
        Ok(Self { pool })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_request(&self, request: &Request) -> CoreResult<()> {
        let op = "insert_request";
        sqlx::query(
            r"INSERT INTO annex_request
              (id, kind, tmdb_id, title, year, seasons, episodes, targets,
               selected_release, available_releases, required_resolution,
               subscribed, created_at, updated_at, completed_at)
              VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)",
        )
        .bind(request.id)
        .bind(request.kind.as_str())
        .bind(request.tmdb_id)
        .bind(&request.title)
        .bind(request.year)
        .bind(request.seasons.as_ref().map(|s| Json(s.clone())))
        .bind(request.episodes.as_ref().map(|e| Json(e.clone())))
        .bind(Json(to_json(op, &request.targets)?))
        .bind(
            request
                .selected_release
                .as_ref()
                .map(|r| to_json(op, r).map(Json))
                .transpose()?,
        )
        .bind(Json(to_json(op, &request.available_releases)?))
        .bind(request.required_resolution.map(Resolution::as_str))
        .bind(request.subscribed)
        .bind(request.created_at)
        .bind(request.updated_at)
        .bind(request.completed_at)
        .execute(&self.pool)
        .await
        .map_err(db(op))?;
        Ok(())
    }

    async fn get_request(&self, id: Uuid) -> CoreResult<Option<Request>> {
        let op = "get_request";
        let row = sqlx::query_as::<_, RequestRow>(r"SELECT * FROM annex_request WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db(op))?;
        row.map(Request::try_from).transpose().map_err(decode(op))
    }

    async fn list_requests(&self, limit: i64) -> CoreResult<Vec<Request>> {
        let op = "list_requests";
        let rows = sqlx::query_as::<_, RequestRow>(
            r"SELECT * FROM annex_request ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db(op))?;
        rows.into_iter()
            .map(|row| Request::try_from(row).map_err(decode(op)))
            .collect()
    }

    async fn delete_request(&self, id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query(r"DELETE FROM annex_request WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db("delete_request"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn pin_release(&self, id: Uuid, release: Option<&Release>) -> CoreResult<()> {
        let op = "pin_release";
        sqlx::query(
            r"UPDATE annex_request SET selected_release = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(release.map(|r| to_json(op, r).map(Json)).transpose()?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db(op))?;
        Ok(())
    }

    async fn set_available_releases(&self, id: Uuid, releases: &[Release]) -> CoreResult<()> {
        let op = "set_available_releases";
        sqlx::query(
            r"UPDATE annex_request SET available_releases = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(Json(to_json(op, &releases)?))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db(op))?;
        Ok(())
    }

    async fn set_required_resolution(&self, id: Uuid, resolution: Resolution) -> CoreResult<()> {
        sqlx::query(
            r"UPDATE annex_request SET required_resolution = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(resolution.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("set_required_resolution"))?;
        Ok(())
    }

    async fn touch_request(&self, id: Uuid) -> CoreResult<()> {
        sqlx::query(r"UPDATE annex_request SET updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(db("touch_request"))?;
        Ok(())
    }

    async fn set_request_completed(&self, id: Uuid, at: Option<DateTime<Utc>>) -> CoreResult<()> {
        sqlx::query(r"UPDATE annex_request SET completed_at = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(at)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(db("set_request_completed"))?;
        Ok(())
    }

    async fn subscribed_tv_requests(&self) -> CoreResult<Vec<Request>> {
        let op = "subscribed_tv_requests";
        let rows = sqlx::query_as::<_, RequestRow>(
            r"SELECT * FROM annex_request WHERE kind = 'tv' AND subscribed ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db(op))?;
        rows.into_iter()
            .map(|row| Request::try_from(row).map_err(decode(op)))
            .collect()
    }

    async fn insert_items(&self, items: &[ProcessingItem]) -> CoreResult<()> {
        let op = "insert_items";
        let mut tx = self.pool.begin().await.map_err(db(op))?;
        for item in items {
            sqlx::query(
                r"INSERT INTO annex_processing_item
                  (id, request_id, kind, season, episode, air_date, title, status,
                   current_step, step_context, progress, attempts, max_attempts,
                   last_error, next_retry_at, download_id, encode_job_id,
                   created_at, updated_at)
                  VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)",
            )
            .bind(item.id)
            .bind(item.request_id)
            .bind(item.kind.as_str())
            .bind(item.season)
            .bind(item.episode)
            .bind(item.air_date)
            .bind(&item.title)
            .bind(item.status.as_str())
            .bind(&item.current_step)
            .bind(Json(item.step_context.to_value()))
            .bind(i16::from(item.progress))
            .bind(item.attempts)
            .bind(item.max_attempts)
            .bind(&item.last_error)
            .bind(item.next_retry_at)
            .bind(item.download_id)
            .bind(item.encode_job_id)
            .bind(item.created_at)
            .bind(item.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(db(op))?;
        }
        tx.commit().await.map_err(db(op))?;
        Ok(())
    }

    async fn get_item(&self, id: Uuid) -> CoreResult<Option<ProcessingItem>> {
        let op = "get_item";
        let row =
            sqlx::query_as::<_, ItemRow>(r"SELECT * FROM annex_processing_item WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db(op))?;
        row.map(ProcessingItem::try_from)
            .transpose()
            .map_err(decode(op))
    }

    async fn items_for_request(&self, request_id: Uuid) -> CoreResult<Vec<ProcessingItem>> {
        let op = "items_for_request";
        let rows = sqlx::query_as::<_, ItemRow>(
            r"SELECT * FROM annex_processing_item
              WHERE request_id = $1 ORDER BY season NULLS FIRST, episode NULLS FIRST, created_at",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db(op))?;
        rows.into_iter()
            .map(|row| ProcessingItem::try_from(row).map_err(decode(op)))
            .collect()
    }

    async fn items_for_download(&self, download_id: Uuid) -> CoreResult<Vec<ProcessingItem>> {
        let op = "items_for_download";
        let rows = sqlx::query_as::<_, ItemRow>(
            r"SELECT * FROM annex_processing_item
              WHERE download_id = $1 ORDER BY season NULLS FIRST, episode NULLS FIRST",
        )
        .bind(download_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db(op))?;
        rows.into_iter()
            .map(|row| ProcessingItem::try_from(row).map_err(decode(op)))
            .collect()
    }

    async fn transition_item(
        &self,
        id: Uuid,
        from: &[ItemStatus],
        to: ItemStatus,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            r"UPDATE annex_processing_item
              SET status = $3, updated_at = $4
              WHERE id = $1 AND status = ANY($2)",
        )
        .bind(id)
        .bind(item_labels(from))
        .bind(to.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("transition_item"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_item_failed(&self, id: Uuid, error: &str) -> CoreResult<()> {
        sqlx::query(
            r"UPDATE annex_processing_item
              SET status = 'failed', last_error = $2, attempts = attempts + 1, updated_at = $3
              WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("set_item_failed"))?;
        Ok(())
    }

    async fn set_item_progress(&self, id: Uuid, progress: u8) -> CoreResult<()> {
        sqlx::query(
            r"UPDATE annex_processing_item SET progress = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(i16::from(progress.min(100)))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("set_item_progress"))?;
        Ok(())
    }

    async fn set_item_step(&self, id: Uuid, step: &str) -> CoreResult<()> {
        sqlx::query(
            r"UPDATE annex_processing_item SET current_step = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(step)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("set_item_step"))?;
        Ok(())
    }

    async fn set_item_context(&self, id: Uuid, context: &StepContext) -> CoreResult<()> {
        sqlx::query(
            r"UPDATE annex_processing_item SET step_context = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(Json(context.to_value()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("set_item_context"))?;
        Ok(())
    }

    async fn link_item_download(&self, id: Uuid, download_id: Option<Uuid>) -> CoreResult<()> {
        sqlx::query(
            r"UPDATE annex_processing_item SET download_id = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(download_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("link_item_download"))?;
        Ok(())
    }

    async fn link_item_encode_job(&self, id: Uuid, job_id: Option<Uuid>) -> CoreResult<()> {
        sqlx::query(
            r"UPDATE annex_processing_item SET encode_job_id = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(job_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("link_item_encode_job"))?;
        Ok(())
    }

    async fn set_item_retry_at(&self, id: Uuid, at: Option<DateTime<Utc>>) -> CoreResult<()> {
        sqlx::query(
            r"UPDATE annex_processing_item SET next_retry_at = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("set_item_retry_at"))?;
        Ok(())
    }

    async fn clear_item_errors(&self, request_id: Uuid) -> CoreResult<()> {
        sqlx::query(
            r"UPDATE annex_processing_item SET last_error = NULL, updated_at = $2
              WHERE request_id = $1",
        )
        .bind(request_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("clear_item_errors"))?;
        Ok(())
    }

    async fn reset_item_for_retry(&self, id: Uuid) -> CoreResult<()> {
        sqlx::query(
            r"UPDATE annex_processing_item
              SET status = 'pending', last_error = NULL, next_retry_at = NULL,
                  progress = 0, updated_at = $2
              WHERE id = $1",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("reset_item_for_retry"))?;
        Ok(())
    }

    async fn due_retry_items(&self, now: DateTime<Utc>) -> CoreResult<Vec<ProcessingItem>> {
        let op = "due_retry_items";
        let rows = sqlx::query_as::<_, ItemRow>(
            r"SELECT * FROM annex_processing_item
              WHERE (status IN ('awaiting', 'quality_unavailable')
                     AND (next_retry_at IS NULL OR next_retry_at <= $1))
                 OR (status = 'pending'
                     AND next_retry_at IS NOT NULL AND next_retry_at <= $1)",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db(op))?;
        rows.into_iter()
            .map(|row| ProcessingItem::try_from(row).map_err(decode(op)))
            .collect()
    }

    async fn insert_download(&self, download: &Download) -> CoreResult<()> {
        let op = "insert_download";
        sqlx::query(
            r"INSERT INTO annex_download
              (id, request_id, torrent_hash, name, save_path, content_path, status,
               progress, seeders, peers, size_bytes, alternatives, created_at, updated_at)
              VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)",
        )
        .bind(download.id)
        .bind(download.request_id)
        .bind(&download.torrent_hash)
        .bind(&download.name)
        .bind(&download.save_path)
        .bind(&download.content_path)
        .bind(download.status.as_str())
        .bind(download.progress)
        .bind(download.seeders)
        .bind(download.peers)
        .bind(download.size_bytes)
        .bind(Json(to_json(op, &download.alternatives)?))
        .bind(download.created_at)
        .bind(download.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db(op))?;
        Ok(())
    }

    async fn get_download(&self, id: Uuid) -> CoreResult<Option<Download>> {
        let op = "get_download";
        let row = sqlx::query_as::<_, DownloadRow>(r"SELECT * FROM annex_download WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db(op))?;
        row.map(Download::try_from).transpose().map_err(decode(op))
    }

    async fn get_download_by_hash(&self, hash: &str) -> CoreResult<Option<Download>> {
        let op = "get_download_by_hash";
        let row = sqlx::query_as::<_, DownloadRow>(
            r"SELECT * FROM annex_download WHERE torrent_hash = $1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db(op))?;
        row.map(Download::try_from).transpose().map_err(decode(op))
    }

    async fn downloads_for_request(&self, request_id: Uuid) -> CoreResult<Vec<Download>> {
        let op = "downloads_for_request";
        let rows = sqlx::query_as::<_, DownloadRow>(
            r"SELECT * FROM annex_download WHERE request_id = $1 ORDER BY created_at",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db(op))?;
        rows.into_iter()
            .map(|row| Download::try_from(row).map_err(decode(op)))
            .collect()
    }

    async fn active_downloads(&self) -> CoreResult<Vec<Download>> {
        let op = "active_downloads";
        let rows = sqlx::query_as::<_, DownloadRow>(
            r"SELECT * FROM annex_download WHERE status IN ('pending', 'downloading')",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db(op))?;
        rows.into_iter()
            .map(|row| Download::try_from(row).map_err(decode(op)))
            .collect()
    }

    async fn transition_download(
        &self,
        id: Uuid,
        from: &[DownloadStatus],
        to: DownloadStatus,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            r"UPDATE annex_download
              SET status = $3, updated_at = $4
              WHERE id = $1 AND status = ANY($2)",
        )
        .bind(id)
        .bind(download_labels(from))
        .bind(to.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("transition_download"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_download_transfer(
        &self,
        id: Uuid,
        progress: f64,
        seeders: i32,
        peers: i32,
    ) -> CoreResult<()> {
        sqlx::query(
            r"UPDATE annex_download
              SET progress = $2, seeders = $3, peers = $4, updated_at = $5
              WHERE id = $1",
        )
        .bind(id)
        .bind(progress.clamp(0.0, 100.0))
        .bind(seeders)
        .bind(peers)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("update_download_transfer"))?;
        Ok(())
    }

    async fn set_download_paths(
        &self,
        id: Uuid,
        save_path: Option<&str>,
        content_path: Option<&str>,
    ) -> CoreResult<()> {
        sqlx::query(
            r"UPDATE annex_download
              SET save_path = COALESCE($2, save_path),
                  content_path = COALESCE($3, content_path),
                  updated_at = $4
              WHERE id = $1",
        )
        .bind(id)
        .bind(save_path)
        .bind(content_path)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("set_download_paths"))?;
        Ok(())
    }

    async fn set_download_alternatives(&self, id: Uuid, releases: &[Release]) -> CoreResult<()> {
        let op = "set_download_alternatives";
        sqlx::query(
            r"UPDATE annex_download SET alternatives = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(Json(to_json(op, &releases)?))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db(op))?;
        Ok(())
    }

    async fn replace_download_torrent(
        &self,
        id: Uuid,
        torrent_hash: &str,
        name: &str,
    ) -> CoreResult<()> {
        sqlx::query(
            r"UPDATE annex_download
              SET torrent_hash = $2, name = $3, status = 'pending', progress = 0,
                  seeders = 0, peers = 0, save_path = NULL, content_path = NULL,
                  updated_at = $4
              WHERE id = $1",
        )
        .bind(id)
        .bind(torrent_hash)
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("replace_download_torrent"))?;
        Ok(())
    }

    async fn delete_download(&self, id: Uuid) -> CoreResult<()> {
        sqlx::query(r"DELETE FROM annex_download WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db("delete_download"))?;
        Ok(())
    }

    async fn insert_execution(&self, execution: &Execution) -> CoreResult<()> {
        let op = "insert_execution";
        sqlx::query(
            r"INSERT INTO annex_execution
              (id, request_id, template_id, steps, status, current_step,
               parent_execution_id, episode_item_id, context, pause_reason,
               error, started_at, finished_at)
              VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)",
        )
        .bind(execution.id)
        .bind(execution.request_id)
        .bind(execution.template_id)
        .bind(Json(to_json(op, &execution.steps)?))
        .bind(execution.status.as_str())
        .bind(&execution.current_step)
        .bind(execution.parent_execution_id)
        .bind(execution.episode_item_id)
        .bind(Json(execution.context.to_value()))
        .bind(&execution.pause_reason)
        .bind(&execution.error)
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .execute(&self.pool)
        .await
        .map_err(db(op))?;
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> CoreResult<Option<Execution>> {
        let op = "get_execution";
        let row =
            sqlx::query_as::<_, ExecutionRow>(r"SELECT * FROM annex_execution WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db(op))?;
        row.map(Execution::try_from).transpose().map_err(decode(op))
    }

    async fn latest_execution_for_request(
        &self,
        request_id: Uuid,
    ) -> CoreResult<Option<Execution>> {
        let op = "latest_execution_for_request";
        let row = sqlx::query_as::<_, ExecutionRow>(
            r"SELECT * FROM annex_execution
              WHERE request_id = $1 ORDER BY started_at DESC LIMIT 1",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db(op))?;
        row.map(Execution::try_from).transpose().map_err(decode(op))
    }

    async fn transition_execution(
        &self,
        id: Uuid,
        from: &[ExecutionStatus],
        to: ExecutionStatus,
        note: Option<&str>,
    ) -> CoreResult<bool> {
        let finished = matches!(
            to,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        );
        let pause_reason = (to == ExecutionStatus::Paused).then_some(note).flatten();
        let error = (to == ExecutionStatus::Failed).then_some(note).flatten();
        let result = sqlx::query(
            r"UPDATE annex_execution
              SET status = $3,
                  pause_reason = CASE WHEN $4::text IS NULL THEN pause_reason ELSE $4 END,
                  error = CASE WHEN $5::text IS NULL THEN error ELSE $5 END,
                  finished_at = CASE WHEN $6 THEN $7 ELSE finished_at END
              WHERE id = $1 AND status = ANY($2)",
        )
        .bind(id)
        .bind(execution_labels(from))
        .bind(to.as_str())
        .bind(pause_reason)
        .bind(error)
        .bind(finished)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("transition_execution"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_execution_context(&self, id: Uuid, context: &StepContext) -> CoreResult<bool> {
        let result = sqlx::query(
            r"UPDATE annex_execution SET context = $2
              WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .bind(Json(context.to_value()))
        .execute(&self.pool)
        .await
        .map_err(db("set_execution_context"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_execution_current_step(&self, id: Uuid, step: &str) -> CoreResult<()> {
        sqlx::query(r"UPDATE annex_execution SET current_step = $2 WHERE id = $1")
            .bind(id)
            .bind(step)
            .execute(&self.pool)
            .await
            .map_err(db("set_execution_current_step"))?;
        Ok(())
    }

    async fn delete_executions_for_request(&self, request_id: Uuid) -> CoreResult<()> {
        sqlx::query(r"DELETE FROM annex_execution WHERE request_id = $1")
            .bind(request_id)
            .execute(&self.pool)
            .await
            .map_err(db("delete_executions_for_request"))?;
        Ok(())
    }

    async fn running_executions(&self) -> CoreResult<Vec<Execution>> {
        let op = "running_executions";
        let rows = sqlx::query_as::<_, ExecutionRow>(
            r"SELECT * FROM annex_execution WHERE status = 'running'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db(op))?;
        rows.into_iter()
            .map(|row| Execution::try_from(row).map_err(decode(op)))
            .collect()
    }

    async fn child_executions(&self, parent_id: Uuid) -> CoreResult<Vec<Execution>> {
        let op = "child_executions";
        let rows = sqlx::query_as::<_, ExecutionRow>(
            r"SELECT * FROM annex_execution WHERE parent_execution_id = $1 ORDER BY started_at",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db(op))?;
        rows.into_iter()
            .map(|row| Execution::try_from(row).map_err(decode(op)))
            .collect()
    }

    async fn append_activity(
        &self,
        request_id: Uuid,
        kind: &str,
        message: &str,
        details: Value,
    ) -> CoreResult<()> {
        sqlx::query(
            r"INSERT INTO annex_activity_log (request_id, kind, message, details, at)
              VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(request_id)
        .bind(kind)
        .bind(message)
        .bind(Json(details))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("append_activity"))?;
        Ok(())
    }

    async fn activity_for_request(
        &self,
        request_id: Uuid,
        limit: i64,
    ) -> CoreResult<Vec<ActivityEntry>> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            r"SELECT * FROM annex_activity_log
              WHERE request_id = $1 ORDER BY seq DESC LIMIT $2",
        )
        .bind(request_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db("activity_for_request"))?;
        Ok(rows.into_iter().map(ActivityEntry::from).collect())
    }

    async fn upsert_library_entry(
        &self,
        tmdb_id: i64,
        kind: MediaKind,
        server_id: Uuid,
        path: &str,
    ) -> CoreResult<()> {
        sqlx::query(
            r"INSERT INTO annex_library_cache (tmdb_id, kind, server_id, path, updated_at)
              VALUES ($1, $2, $3, $4, $5)
              ON CONFLICT (tmdb_id, kind, server_id)
              DO UPDATE SET path = EXCLUDED.path, updated_at = EXCLUDED.updated_at",
        )
        .bind(tmdb_id)
        .bind(kind.as_str())
        .bind(server_id)
        .bind(path)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("upsert_library_entry"))?;
        Ok(())
    }

    async fn has_library_entry(
        &self,
        tmdb_id: i64,
        kind: MediaKind,
        server_id: Uuid,
    ) -> CoreResult<bool> {
        let row = sqlx::query(
            r"SELECT 1 AS present FROM annex_library_cache
              WHERE tmdb_id = $1 AND kind = $2 AND server_id = $3",
        )
        .bind(tmdb_id)
        .bind(kind.as_str())
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db("has_library_entry"))?;
        Ok(row.is_some())
    }

    async fn upsert_episode_entry(
        &self,
        tmdb_id: i64,
        season: i32,
        episode: i32,
        server_id: Uuid,
    ) -> CoreResult<()> {
        sqlx::query(
            r"INSERT INTO annex_episode_library (tmdb_id, season, episode, server_id)
              VALUES ($1, $2, $3, $4)
              ON CONFLICT (tmdb_id, season, episode, server_id) DO NOTHING",
        )
        .bind(tmdb_id)
        .bind(season)
        .bind(episode)
        .bind(server_id)
        .execute(&self.pool)
        .await
        .map_err(db("upsert_episode_entry"))?;
        Ok(())
    }

    async fn has_episode_entry(
        &self,
        tmdb_id: i64,
        season: i32,
        episode: i32,
        server_id: Uuid,
    ) -> CoreResult<bool> {
        let row = sqlx::query(
            r"SELECT 1 AS present FROM annex_episode_library
              WHERE tmdb_id = $1 AND season = $2 AND episode = $3 AND server_id = $4",
        )
        .bind(tmdb_id)
        .bind(season)
        .bind(episode)
        .bind(server_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db("has_episode_entry"))?;
        Ok(row.is_some())
    }

    async fn insert_template(&self, template: &PipelineTemplate) -> CoreResult<()> {
        let op = "insert_template";
        sqlx::query(
            r"INSERT INTO annex_pipeline_template
              (id, name, media_kind, version, is_default, steps, created_at, updated_at)
              VALUES ($1,$2,$3,$4,$5,$6,$7,$8)",
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(template.media_kind.as_str())
        .bind(template.version)
        .bind(template.is_default)
        .bind(Json(to_json(op, &template.steps)?))
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db(op))?;
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> CoreResult<Option<PipelineTemplate>> {
        let op = "get_template";
        let row = sqlx::query_as::<_, TemplateRow>(
            r"SELECT * FROM annex_pipeline_template WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db(op))?;
        row.map(PipelineTemplate::try_from)
            .transpose()
            .map_err(decode(op))
    }

    async fn default_template(&self, kind: MediaKind) -> CoreResult<Option<PipelineTemplate>> {
        let op = "default_template";
        let row = sqlx::query_as::<_, TemplateRow>(
            r"SELECT * FROM annex_pipeline_template
              WHERE media_kind = $1 AND is_default
              ORDER BY version DESC LIMIT 1",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db(op))?;
        row.map(PipelineTemplate::try_from)
            .transpose()
            .map_err(decode(op))
    }

    async fn list_templates(&self) -> CoreResult<Vec<PipelineTemplate>> {
        let op = "list_templates";
        let rows = sqlx::query_as::<_, TemplateRow>(
            r"SELECT * FROM annex_pipeline_template ORDER BY media_kind, version DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db(op))?;
        rows.into_iter()
            .map(|row| PipelineTemplate::try_from(row).map_err(decode(op)))
            .collect()
    }

    async fn create_assignment_if_absent(
        &self,
        assignment: &EncodeAssignment,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            r"INSERT INTO annex_encode_assignment
              (job_id, item_id, request_id, profile_id, status, progress,
               output_path, error, updated_at)
              VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
              ON CONFLICT (job_id) DO NOTHING",
        )
        .bind(assignment.job_id)
        .bind(assignment.item_id)
        .bind(assignment.request_id)
        .bind(assignment.profile_id)
        .bind(assignment.status.as_str())
        .bind(assignment.progress)
        .bind(&assignment.output_path)
        .bind(&assignment.error)
        .bind(assignment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db("create_assignment_if_absent"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_assignment(&self, job_id: Uuid) -> CoreResult<Option<EncodeAssignment>> {
        let op = "get_assignment";
        let row = sqlx::query_as::<_, AssignmentRow>(
            r"SELECT * FROM annex_encode_assignment WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db(op))?;
        row.map(EncodeAssignment::try_from)
            .transpose()
            .map_err(decode(op))
    }

    async fn transition_assignment(
        &self,
        job_id: Uuid,
        from: &[AssignmentStatus],
        to: AssignmentStatus,
        error: Option<&str>,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            r"UPDATE annex_encode_assignment
              SET status = $3,
                  error = CASE WHEN $4::text IS NULL THEN error ELSE $4 END,
                  updated_at = $5
              WHERE job_id = $1 AND status = ANY($2)",
        )
        .bind(job_id)
        .bind(assignment_labels(from))
        .bind(to.as_str())
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("transition_assignment"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_assignment_progress(&self, job_id: Uuid, progress: f64) -> CoreResult<()> {
        sqlx::query(
            r"UPDATE annex_encode_assignment
              SET progress = $2, updated_at = $3 WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(progress.clamp(0.0, 100.0))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db("set_assignment_progress"))?;
        Ok(())
    }

    async fn active_assignments_for_request(
        &self,
        request_id: Uuid,
    ) -> CoreResult<Vec<EncodeAssignment>> {
        let op = "active_assignments_for_request";
        let rows = sqlx::query_as::<_, AssignmentRow>(
            r"SELECT * FROM annex_encode_assignment
              WHERE request_id = $1 AND status IN ('pending', 'assigned', 'encoding')",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db(op))?;
        rows.into_iter()
            .map(|row| EncodeAssignment::try_from(row).map_err(decode(op)))
            .collect()
    }

    async fn stale_assignments(
        &self,
        cutoff: DateTime<Utc>,
    ) -> CoreResult<Vec<EncodeAssignment>> {
        let op = "stale_assignments";
        let rows = sqlx::query_as::<_, AssignmentRow>(
            r"SELECT * FROM annex_encode_assignment
              WHERE status IN ('pending', 'assigned', 'encoding') AND updated_at < $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db(op))?;
        rows.into_iter()
            .map(|row| EncodeAssignment::try_from(row).map_err(decode(op)))
            .collect()
    }

    async fn upsert_server(&self, server: &ServerConfig) -> CoreResult<()> {
        sqlx::query(
            r"INSERT INTO annex_server
              (id, name, max_resolution, movie_root, tv_root, transport, endpoint,
               default_profile_id)
              VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
              ON CONFLICT (id) DO UPDATE SET
                  name = EXCLUDED.name,
                  max_resolution = EXCLUDED.max_resolution,
                  movie_root = EXCLUDED.movie_root,
                  tv_root = EXCLUDED.tv_root,
                  transport = EXCLUDED.transport,
                  endpoint = EXCLUDED.endpoint,
                  default_profile_id = EXCLUDED.default_profile_id",
        )
        .bind(server.id)
        .bind(&server.name)
        .bind(server.max_resolution.as_str())
        .bind(&server.movie_root)
        .bind(&server.tv_root)
        .bind(server.transport.as_str())
        .bind(Json(server.endpoint.clone()))
        .bind(server.default_profile_id)
        .execute(&self.pool)
        .await
        .map_err(db("upsert_server"))?;
        Ok(())
    }

    async fn get_server(&self, id: Uuid) -> CoreResult<Option<ServerConfig>> {
        let op = "get_server";
        let row = sqlx::query_as::<_, ServerRow>(r"SELECT * FROM annex_server WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db(op))?;
        row.map(ServerConfig::try_from)
            .transpose()
            .map_err(decode(op))
    }

    async fn list_servers(&self) -> CoreResult<Vec<ServerConfig>> {
        let op = "list_servers";
        let rows = sqlx::query_as::<_, ServerRow>(r"SELECT * FROM annex_server ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(db(op))?;
        rows.into_iter()
            .map(|row| ServerConfig::try_from(row).map_err(decode(op)))
            .collect()
    }

    async fn upsert_profile(&self, profile: &EncodeProfile) -> CoreResult<()> {
        let op = "upsert_profile";
        sqlx::query(
            r"INSERT INTO annex_encode_profile
              (id, name, container, video_codec, args, audio_languages,
               subtitle_languages, is_default)
              VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
              ON CONFLICT (id) DO UPDATE SET
                  name = EXCLUDED.name,
                  container = EXCLUDED.container,
                  video_codec = EXCLUDED.video_codec,
                  args = EXCLUDED.args,
                  audio_languages = EXCLUDED.audio_languages,
                  subtitle_languages = EXCLUDED.subtitle_languages,
                  is_default = EXCLUDED.is_default",
        )
        .bind(profile.id)
        .bind(&profile.name)
        .bind(&profile.container)
        .bind(&profile.video_codec)
        .bind(Json(to_json(op, &profile.args)?))
        .bind(Json(to_json(op, &profile.audio_languages)?))
        .bind(Json(to_json(op, &profile.subtitle_languages)?))
        .bind(profile.is_default)
        .execute(&self.pool)
        .await
        .map_err(db(op))?;
        Ok(())
    }

    async fn get_profile(&self, id: Uuid) -> CoreResult<Option<EncodeProfile>> {
        let row =
            sqlx::query_as::<_, ProfileRow>(r"SELECT * FROM annex_encode_profile WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db("get_profile"))?;
        Ok(row.map(EncodeProfile::from))
    }

    async fn default_profile(&self) -> CoreResult<Option<EncodeProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r"SELECT * FROM annex_encode_profile WHERE is_default LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db("default_profile"))?;
        Ok(row.map(EncodeProfile::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_vectors_match_status_sets() {
        assert_eq!(
            item_labels(&[ItemStatus::Pending, ItemStatus::Awaiting]),
            vec!["pending".to_string(), "awaiting".to_string()]
        );
        assert_eq!(
            execution_labels(&[ExecutionStatus::Running]),
            vec!["running".to_string()]
        );
        assert_eq!(
            download_labels(&[DownloadStatus::Importing]),
            vec!["importing".to_string()]
        );
        assert_eq!(
            assignment_labels(&[AssignmentStatus::Assigned]),
            vec!["assigned".to_string()]
        );
    }
}
