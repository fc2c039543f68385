#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Core event bus for the Annex pipeline.
//!
//! The bus provides a typed event enum, sequential identifiers, and support
//! for replaying recent events when subscribers reconnect. Internally it uses
//! `tokio::broadcast` with a bounded buffer; when the channel overflows, the
//! oldest events are dropped. Every published event is also the source of a
//! user-visible activity-log entry appended by the emitting component.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};
use tracing::error;
use uuid::Uuid;

/// Identifier assigned to each event emitted by the pipeline.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Typed domain events surfaced across the pipeline.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A request was created through the command facade.
    RequestCreated {
        /// Identifier of the new request.
        request_id: Uuid,
        /// Media kind label (`movie` or `tv`).
        media_kind: String,
        /// Requested title.
        title: String,
        /// Number of processing items created with the request.
        items: usize,
    },
    /// A request was cancelled by the user.
    RequestCancelled {
        /// Identifier of the cancelled request.
        request_id: Uuid,
    },
    /// Every item of a request finished and at least one completed.
    RequestCompleted {
        /// Identifier of the completed request.
        request_id: Uuid,
    },
    /// A processing item changed lifecycle status.
    ItemStatusChanged {
        /// Owning request.
        request_id: Uuid,
        /// Item whose status changed.
        item_id: Uuid,
        /// New status label.
        status: String,
    },
    /// A search step selected a primary release.
    ReleaseSelected {
        /// Owning request.
        request_id: Uuid,
        /// Title of the selected release.
        release_title: String,
        /// Number of stored fallback releases.
        alternatives: usize,
    },
    /// A search found only below-quality releases.
    QualityUnavailable {
        /// Owning request.
        request_id: Uuid,
        /// Number of below-quality candidates stored for review.
        below_quality: usize,
    },
    /// A search found nothing; the scheduler will retry.
    SearchEmpty {
        /// Owning request.
        request_id: Uuid,
    },
    /// A download record was created or attached to an existing torrent.
    DownloadAttached {
        /// Owning request.
        request_id: Uuid,
        /// Identifier of the download row.
        download_id: Uuid,
        /// Torrent info hash.
        torrent_hash: String,
        /// Whether a pre-existing torrent was reused.
        reused: bool,
    },
    /// Periodic transfer progress for a download.
    DownloadProgress {
        /// Identifier of the download row.
        download_id: Uuid,
        /// Completion in percent, 0-100.
        percent: f64,
        /// Current download rate in bytes per second.
        download_bps: u64,
    },
    /// A download made no progress for longer than the stall window.
    DownloadStalled {
        /// Identifier of the download row.
        download_id: Uuid,
        /// Torrent info hash of the stalled torrent.
        torrent_hash: String,
    },
    /// The reconciler rotated to the next alternative release.
    AlternativeSelected {
        /// Identifier of the download row.
        download_id: Uuid,
        /// Title of the alternative now downloading.
        release_title: String,
    },
    /// A download finished transferring.
    DownloadCompleted {
        /// Identifier of the download row.
        download_id: Uuid,
    },
    /// A download failed with no alternatives remaining.
    DownloadFailed {
        /// Identifier of the download row.
        download_id: Uuid,
        /// Failure detail.
        message: String,
    },
    /// File mapping finished for a completed download.
    FilesMapped {
        /// Identifier of the download row.
        download_id: Uuid,
        /// Items that received a source file.
        mapped: usize,
        /// Items no file could be matched to.
        unmatched: usize,
    },
    /// An encode job was dispatched to the pool.
    EncodeStarted {
        /// Item the encode belongs to.
        item_id: Uuid,
        /// Encode job identifier.
        job_id: Uuid,
        /// Profile the job encodes to.
        profile_id: Uuid,
    },
    /// Pool-reported encode progress.
    EncodeProgress {
        /// Encode job identifier.
        job_id: Uuid,
        /// Transcode progress in percent, 0-100.
        percent: f64,
    },
    /// An encode job finished successfully.
    EncodeCompleted {
        /// Encode job identifier.
        job_id: Uuid,
        /// Path of the encoded artifact.
        output_path: String,
    },
    /// An encode job failed.
    EncodeFailed {
        /// Encode job identifier.
        job_id: Uuid,
        /// Failure detail.
        message: String,
    },
    /// A transfer to a target server started.
    DeliveryStarted {
        /// Item being delivered.
        item_id: Uuid,
        /// Target server.
        server_id: Uuid,
    },
    /// A transfer to a target server finished.
    DeliveryCompleted {
        /// Item that was delivered.
        item_id: Uuid,
        /// Target server.
        server_id: Uuid,
        /// Remote path the artifact landed at.
        path: String,
    },
    /// A transfer to a target server failed.
    DeliveryFailed {
        /// Item whose delivery failed.
        item_id: Uuid,
        /// Target server.
        server_id: Uuid,
        /// Failure detail.
        message: String,
    },
    /// A media-server library scan was triggered.
    ScanTriggered {
        /// Server whose library is being scanned.
        server_id: Uuid,
        /// Delivered path passed to the scanner.
        path: String,
    },
    /// A pipeline execution was activated for a request.
    ExecutionStarted {
        /// Identifier of the execution.
        execution_id: Uuid,
        /// Request the execution drives.
        request_id: Uuid,
    },
    /// A step paused its execution.
    ExecutionPaused {
        /// Identifier of the paused execution.
        execution_id: Uuid,
        /// Reason supplied by the pausing step.
        reason: String,
    },
    /// An execution ran to completion.
    ExecutionCompleted {
        /// Identifier of the completed execution.
        execution_id: Uuid,
    },
    /// An execution aborted with an error.
    ExecutionFailed {
        /// Identifier of the failed execution.
        execution_id: Uuid,
        /// Failure detail.
        message: String,
    },
    /// An execution was cancelled.
    ExecutionCancelled {
        /// Identifier of the cancelled execution.
        execution_id: Uuid,
    },
    /// The stuck detector reaped an execution with no recent progress.
    StuckExecutionReaped {
        /// Identifier of the reaped execution.
        execution_id: Uuid,
    },
}

impl Event {
    /// Machine-friendly discriminator, also used as the activity-log kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RequestCreated { .. } => "request_created",
            Self::RequestCancelled { .. } => "request_cancelled",
            Self::RequestCompleted { .. } => "request_completed",
            Self::ItemStatusChanged { .. } => "item_status_changed",
            Self::ReleaseSelected { .. } => "release_selected",
            Self::QualityUnavailable { .. } => "quality_unavailable",
            Self::SearchEmpty { .. } => "search_empty",
            Self::DownloadAttached { .. } => "download_attached",
            Self::DownloadProgress { .. } => "download_progress",
            Self::DownloadStalled { .. } => "download_stalled",
            Self::AlternativeSelected { .. } => "alternative_selected",
            Self::DownloadCompleted { .. } => "download_completed",
            Self::DownloadFailed { .. } => "download_failed",
            Self::FilesMapped { .. } => "files_mapped",
            Self::EncodeStarted { .. } => "encode_started",
            Self::EncodeProgress { .. } => "encode_progress",
            Self::EncodeCompleted { .. } => "encode_completed",
            Self::EncodeFailed { .. } => "encode_failed",
            Self::DeliveryStarted { .. } => "delivery_started",
            Self::DeliveryCompleted { .. } => "delivery_completed",
            Self::DeliveryFailed { .. } => "delivery_failed",
            Self::ScanTriggered { .. } => "scan_triggered",
            Self::ExecutionStarted { .. } => "execution_started",
            Self::ExecutionPaused { .. } => "execution_paused",
            Self::ExecutionCompleted { .. } => "execution_completed",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::ExecutionCancelled { .. } => "execution_cancelled",
            Self::StuckExecutionReaped { .. } => "stuck_execution_reaped",
        }
    }

    /// Structured detail payload for the activity log.
    ///
    /// # Panics
    ///
    /// Never panics; event variants always serialise.
    #[must_use]
    pub fn details(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
    replay_capacity: usize,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// The broadcast channel uses the same capacity as the in-memory replay
    /// buffer, ensuring dropped events impact both structures consistently.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.lock_buffer();
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than
    /// `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.lock_buffer();
            for item in buffer.iter() {
                if item.id > since {
                    backlog.push_back(item.clone());
                }
            }
        }

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Returns the last assigned identifier, if any events have been
    /// published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        let buffer = self.lock_buffer();
        buffer.back().map(|event| event.id)
    }

    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        match self.buffer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("event buffer mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from
/// the live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => self.receiver.recv().await.ok(),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_subscribe_round_trip() {
        let bus = EventBus::with_capacity(8);
        let mut stream = bus.subscribe(None);

        let request_id = Uuid::new_v4();
        let id = bus.publish(Event::RequestCreated {
            request_id,
            media_kind: "movie".to_string(),
            title: "Fight Club".to_string(),
            items: 1,
        });

        let envelope = stream.next().await.expect("event should arrive");
        assert_eq!(envelope.id, id);
        assert_eq!(envelope.event.kind(), "request_created");
    }

    #[tokio::test]
    async fn replay_returns_only_newer_events() {
        let bus = EventBus::with_capacity(8);
        let download_id = Uuid::new_v4();
        let first = bus.publish(Event::DownloadCompleted { download_id });
        let _second = bus.publish(Event::DownloadStalled {
            download_id,
            torrent_hash: "abc".to_string(),
        });

        let mut stream = bus.subscribe(Some(first));
        let envelope = stream.next().await.expect("replayed event");
        assert_eq!(envelope.event.kind(), "download_stalled");
    }

    #[test]
    fn replay_ring_drops_oldest() {
        let bus = EventBus::with_capacity(2);
        for _ in 0..3 {
            let _ = bus.publish(Event::SearchEmpty {
                request_id: Uuid::new_v4(),
            });
        }
        assert_eq!(bus.last_event_id(), Some(3));
        let buffer = bus.lock_buffer();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.front().map(|e| e.id), Some(2));
    }

    #[test]
    fn details_serialise_with_tag() {
        let event = Event::QualityUnavailable {
            request_id: Uuid::new_v4(),
            below_quality: 5,
        };
        let details = event.details();
        assert_eq!(details["type"], "quality_unavailable");
        assert_eq!(details["below_quality"], 5);
    }
}
