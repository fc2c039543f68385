//! The accreted step context carried by every processing item.
//!
//! # Design
//! - A thin wrapper over a JSON object map. Steps merge their output into it;
//!   the executor persists it after every successful step.
//! - Core identity fields are written once when the context is built and are
//!   stripped from any step output before merging.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::model::{ProcessingItem, Request};

/// Context keys that identify the request and item. Step output claiming to
/// modify these is stripped before merging.
pub const CORE_CONTEXT_FIELDS: &[&str] = &[
    "request_id",
    "media_type",
    "tmdb_id",
    "title",
    "year",
    "targets",
    "processing_item_id",
];

/// Accreted mapping of step outputs plus immutable core fields. The
/// authoritative resumable state for a processing item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct StepContext {
    map: Map<String, Value>,
}

impl StepContext {
    /// Build an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the initial context for an item of a request, seeding the core
    /// identity fields.
    ///
    /// # Panics
    ///
    /// Never panics; the `json!` literals below always produce an object.
    #[must_use]
    pub fn for_item(request: &Request, item: &ProcessingItem) -> Self {
        let mut map = Map::new();
        map.insert("request_id".into(), json!(request.id));
        map.insert("media_type".into(), json!(request.kind.as_str()));
        map.insert("tmdb_id".into(), json!(request.tmdb_id));
        map.insert("title".into(), json!(request.title));
        map.insert("year".into(), json!(request.year));
        map.insert("targets".into(), json!(request.targets));
        map.insert("processing_item_id".into(), json!(item.id));
        Self { map }
    }

    /// Rebuild this context scoped to a different processing item. Used when
    /// deriving branch-execution contexts; all non-core keys are kept.
    #[must_use]
    pub fn scoped_to_item(&self, item_id: Uuid) -> Self {
        let mut next = self.clone();
        next.map.insert("processing_item_id".into(), json!(item_id));
        next
    }

    /// Read a context value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    /// Insert a non-core value, overwriting any previous value for the key.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if !CORE_CONTEXT_FIELDS.contains(&key.as_str()) {
            self.map.insert(key, value);
        }
    }

    /// Merge a step's output into the context, stripping core fields.
    /// Returns the keys that were stripped so the executor can log them.
    pub fn merge(&mut self, data: Map<String, Value>) -> Vec<String> {
        let mut stripped = Vec::new();
        for (key, value) in data {
            if CORE_CONTEXT_FIELDS.contains(&key.as_str()) {
                stripped.push(key);
            } else {
                self.map.insert(key, value);
            }
        }
        stripped
    }

    /// Overlay another context onto this one, last-writer-wins for non-core
    /// keys. Core fields of `self` are preserved.
    pub fn overlay(&mut self, other: &Self) {
        for (key, value) in &other.map {
            if !CORE_CONTEXT_FIELDS.contains(&key.as_str()) {
                self.map.insert(key.clone(), value.clone());
            }
        }
    }

    /// Remove a non-core key. Used by explicit resets only.
    pub fn clear(&mut self, key: &str) {
        if !CORE_CONTEXT_FIELDS.contains(&key) {
            self.map.remove(key);
        }
    }

    /// Identifier of the owning request.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidInput`] when the field is absent or
    /// malformed.
    pub fn request_id(&self) -> CoreResult<Uuid> {
        self.uuid_field("request_id")
    }

    /// Identifier of the processing item this context is scoped to.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidInput`] when the field is absent or
    /// malformed.
    pub fn processing_item_id(&self) -> CoreResult<Uuid> {
        self.uuid_field("processing_item_id")
    }

    /// Title of the request, as seeded from the core fields.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.map.get("title").and_then(Value::as_str)
    }

    /// Whether a step has recorded the given idempotency marker.
    #[must_use]
    pub fn has_marker(&self, marker: &str) -> bool {
        self.map
            .get("markers")
            .and_then(Value::as_array)
            .is_some_and(|markers| markers.iter().any(|m| m.as_str() == Some(marker)))
    }

    /// Record an idempotency marker (`{step_kind}:{item_id}`) so re-runs
    /// short-circuit.
    pub fn add_marker(&mut self, marker: &str) {
        let markers = self
            .map
            .entry("markers")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = markers
            && !list.iter().any(|m| m.as_str() == Some(marker))
        {
            list.push(Value::String(marker.to_owned()));
        }
    }

    /// Identifier of the download feeding this item, once a reconciler step
    /// recorded one.
    #[must_use]
    pub fn download_id(&self) -> Option<Uuid> {
        self.map
            .get("download")
            .and_then(|download| download.get("id"))
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }

    /// Source video file mapped to this item, once file mapping ran.
    #[must_use]
    pub fn source_file_path(&self) -> Option<&str> {
        self.map
            .get("download")
            .and_then(|download| download.get("source_file_path"))
            .and_then(Value::as_str)
    }

    /// Record the download this item is fed by, preserving other download
    /// facts already present.
    pub fn set_download(&mut self, id: Uuid, torrent_hash: &str) {
        let entry = self
            .map
            .entry("download")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(download) = entry {
            download.insert("id".into(), json!(id));
            download.insert("torrent_hash".into(), json!(torrent_hash));
        }
    }

    /// Record the mapped source video file for this item.
    pub fn set_source_file_path(&mut self, path: &str) {
        let entry = self
            .map
            .entry("download")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(download) = entry {
            download.insert("source_file_path".into(), json!(path));
        }
    }

    /// Encoded artifact path recorded for a profile, once an encode ran.
    #[must_use]
    pub fn encoded_path(&self, profile_id: Uuid) -> Option<&str> {
        self.map
            .get("encoded")
            .and_then(|encoded| encoded.get(profile_id.to_string()))
            .and_then(|entry| entry.get("path"))
            .and_then(Value::as_str)
    }

    /// Record the encoded artifact path for a profile.
    pub fn set_encoded_path(&mut self, profile_id: Uuid, path: &str) {
        let entry = self
            .map
            .entry("encoded")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(encoded) = entry {
            encoded.insert(profile_id.to_string(), json!({ "path": path }));
        }
    }

    /// Access the raw map, for persistence.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.map
    }

    /// Rebuild a context from a persisted JSON value. Non-object values
    /// yield an empty context.
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self { map },
            _ => Self::default(),
        }
    }

    /// Serialise the context to a JSON value for persistence.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.map.clone())
    }

    fn uuid_field(&self, field: &'static str) -> CoreResult<Uuid> {
        self.map
            .get(field)
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or(CoreError::InvalidInput {
                field,
                reason: "missing or malformed core context field",
                value: self.map.get(field).map(ToString::to_string),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemKind, ItemStatus, MediaKind, Target};
    use chrono::Utc;

    fn sample_request() -> Request {
        Request {
            id: Uuid::new_v4(),
            kind: MediaKind::Movie,
            tmdb_id: 550,
            title: "Fight Club".to_string(),
            year: Some(1999),
            seasons: None,
            episodes: None,
            targets: vec![Target {
                server_id: Uuid::new_v4(),
                profile_id: None,
            }],
            selected_release: None,
            available_releases: Vec::new(),
            required_resolution: None,
            subscribed: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    fn sample_item(request: &Request) -> ProcessingItem {
        ProcessingItem {
            id: Uuid::new_v4(),
            request_id: request.id,
            kind: ItemKind::Movie,
            season: None,
            episode: None,
            air_date: None,
            title: None,
            status: ItemStatus::Pending,
            current_step: None,
            step_context: StepContext::new(),
            progress: 0,
            attempts: 0,
            max_attempts: 3,
            last_error: None,
            next_retry_at: None,
            download_id: None,
            encode_job_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn core_fields_survive_merge() {
        let request = sample_request();
        let item = sample_item(&request);
        let mut ctx = StepContext::for_item(&request, &item);

        let mut hostile = Map::new();
        hostile.insert("title".into(), json!("Hijacked"));
        hostile.insert("request_id".into(), json!(Uuid::new_v4()));
        hostile.insert("release".into(), json!({"title": "Fight.Club.1999.1080p"}));
        let stripped = ctx.merge(hostile);

        assert_eq!(stripped.len(), 2);
        assert!(stripped.contains(&"title".to_string()));
        assert_eq!(ctx.title(), Some("Fight Club"));
        assert_eq!(ctx.request_id().expect("request id"), request.id);
        assert!(ctx.get("release").is_some());
    }

    #[test]
    fn overlay_is_last_writer_wins_for_non_core_keys() {
        let request = sample_request();
        let item = sample_item(&request);
        let mut left = StepContext::for_item(&request, &item);
        left.set("shared", json!(1));

        let mut right = StepContext::for_item(&request, &item);
        right.set("shared", json!(2));
        right.set("only_right", json!(true));

        left.overlay(&right);
        assert_eq!(left.get("shared"), Some(&json!(2)));
        assert_eq!(left.get("only_right"), Some(&json!(true)));
        assert_eq!(left.request_id().expect("request id"), request.id);
    }

    #[test]
    fn markers_deduplicate() {
        let mut ctx = StepContext::new();
        assert!(!ctx.has_marker("encode:abc"));
        ctx.add_marker("encode:abc");
        ctx.add_marker("encode:abc");
        assert!(ctx.has_marker("encode:abc"));
        let markers = ctx.get("markers").and_then(Value::as_array).expect("markers");
        assert_eq!(markers.len(), 1);
    }

    #[test]
    fn scoped_context_retains_non_core_keys() {
        let request = sample_request();
        let item = sample_item(&request);
        let mut ctx = StepContext::for_item(&request, &item);
        ctx.set("season", json!(2));

        let other = Uuid::new_v4();
        let scoped = ctx.scoped_to_item(other);
        assert_eq!(scoped.processing_item_id().expect("item id"), other);
        assert_eq!(scoped.get("season"), Some(&json!(2)));
        assert_eq!(ctx.processing_item_id().expect("item id"), item.id);
    }
}
