//! Status aggregation: a request's status and progress are a pure function
//! of its processing items.

use std::collections::HashMap;

use annex_core::{ItemStatus, ProcessingItem, RequestStatus};

/// Aggregated view of a request derived from its items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedStatus {
    /// Derived request status.
    pub status: RequestStatus,
    /// Weighted overall progress, 0-100.
    pub progress: u8,
    /// Step owning the majority of in-flight items.
    pub current_step: Option<String>,
    /// First failure detail, when the request aggregates to failed.
    pub error: Option<String>,
}

/// Percent band an item stage occupies in the overall progress scale.
const fn stage_band(status: ItemStatus) -> (u8, u8) {
    match status {
        ItemStatus::Pending | ItemStatus::Awaiting | ItemStatus::QualityUnavailable => (0, 5),
        ItemStatus::Searching => (5, 15),
        ItemStatus::Downloading | ItemStatus::Downloaded => (15, 50),
        ItemStatus::Encoding | ItemStatus::Encoded => (50, 75),
        ItemStatus::Delivering => (75, 99),
        ItemStatus::Completed => (100, 100),
        ItemStatus::Failed | ItemStatus::Cancelled => (0, 0),
    }
}

/// Request-level stage an in-flight item counts towards.
const fn stage_of(status: ItemStatus) -> Option<RequestStatus> {
    match status {
        ItemStatus::Pending => Some(RequestStatus::Pending),
        ItemStatus::Searching => Some(RequestStatus::Searching),
        ItemStatus::Downloading | ItemStatus::Downloaded => Some(RequestStatus::Downloading),
        ItemStatus::Encoding | ItemStatus::Encoded => Some(RequestStatus::Encoding),
        ItemStatus::Delivering => Some(RequestStatus::Delivering),
        _ => None,
    }
}

fn item_progress(item: &ProcessingItem) -> u32 {
    let (lo, hi) = stage_band(item.status);
    let (lo, hi) = (u32::from(lo), u32::from(hi));
    lo + (hi - lo) * u32::from(item.progress.min(100)) / 100
}

/// Compute the aggregated status of a request from its items.
///
/// Precedence, first match wins: completed, cancelled, failed-with-no-active-
/// siblings, majority in-flight stage, awaiting, quality-unavailable,
/// pending.
#[must_use]
pub fn aggregate(items: &[ProcessingItem]) -> AggregatedStatus {
    if items.is_empty() {
        return AggregatedStatus {
            status: RequestStatus::Pending,
            progress: 0,
            current_step: None,
            error: None,
        };
    }

    let all_done = items
        .iter()
        .all(|item| matches!(item.status, ItemStatus::Completed | ItemStatus::Cancelled));
    let any_completed = items
        .iter()
        .any(|item| item.status == ItemStatus::Completed);
    if all_done && any_completed {
        return AggregatedStatus {
            status: RequestStatus::Completed,
            progress: 100,
            current_step: None,
            error: None,
        };
    }
    if all_done {
        return AggregatedStatus {
            status: RequestStatus::Cancelled,
            progress: 0,
            current_step: None,
            error: None,
        };
    }

    let any_active = items.iter().any(|item| item.status.is_active());
    if let Some(failed) = items.iter().find(|item| item.status == ItemStatus::Failed)
        && !any_active
    {
        return AggregatedStatus {
            status: RequestStatus::Failed,
            progress: weighted_progress(items),
            current_step: failed.current_step.clone(),
            error: failed.last_error.clone(),
        };
    }

    if any_active {
        let mut stage_counts: HashMap<RequestStatus, usize> = HashMap::new();
        let mut step_counts: HashMap<&str, usize> = HashMap::new();
        for item in items {
            if let Some(stage) = stage_of(item.status) {
                *stage_counts.entry(stage).or_default() += 1;
                if let Some(step) = item.current_step.as_deref() {
                    *step_counts.entry(step).or_default() += 1;
                }
            }
        }
        let status = stage_counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map_or(RequestStatus::Pending, |(stage, _)| stage);
        let current_step = step_counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(step, _)| step.to_owned());
        return AggregatedStatus {
            status,
            progress: weighted_progress(items),
            current_step,
            error: None,
        };
    }

    let remaining: Vec<&ProcessingItem> = items
        .iter()
        .filter(|item| !item.status.is_terminal())
        .collect();
    if !remaining.is_empty()
        && remaining
            .iter()
            .all(|item| item.status == ItemStatus::Awaiting)
    {
        return AggregatedStatus {
            status: RequestStatus::Awaiting,
            progress: weighted_progress(items),
            current_step: None,
            error: None,
        };
    }
    if !remaining.is_empty()
        && remaining
            .iter()
            .all(|item| item.status == ItemStatus::QualityUnavailable)
    {
        return AggregatedStatus {
            status: RequestStatus::QualityUnavailable,
            progress: weighted_progress(items),
            current_step: None,
            error: None,
        };
    }

    AggregatedStatus {
        status: RequestStatus::Pending,
        progress: weighted_progress(items),
        current_step: None,
        error: None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn weighted_progress(items: &[ProcessingItem]) -> u8 {
    if items.is_empty() {
        return 0;
    }
    let total: u32 = items.iter().map(item_progress).sum();
    (total / items.len() as u32).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use annex_core::{ItemKind, StepContext};
    use chrono::Utc;
    use uuid::Uuid;

    fn item(status: ItemStatus, progress: u8) -> ProcessingItem {
        ProcessingItem {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            kind: ItemKind::Episode,
            season: Some(1),
            episode: None,
            air_date: None,
            title: None,
            status,
            current_step: None,
            step_context: StepContext::new(),
            progress,
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
    fn empty_item_set_is_pending() {
        let agg = aggregate(&[]);
        assert_eq!(agg.status, RequestStatus::Pending);
        assert_eq!(agg.progress, 0);
    }

    #[test]
    fn completed_needs_at_least_one_completed_item() {
        let agg = aggregate(&[
            item(ItemStatus::Completed, 100),
            item(ItemStatus::Cancelled, 0),
        ]);
        assert_eq!(agg.status, RequestStatus::Completed);
        assert_eq!(agg.progress, 100);

        let agg = aggregate(&[item(ItemStatus::Cancelled, 0), item(ItemStatus::Cancelled, 0)]);
        assert_eq!(agg.status, RequestStatus::Cancelled);
    }

    #[test]
    fn failure_requires_no_active_siblings() {
        let mut failed = item(ItemStatus::Failed, 0);
        failed.last_error = Some("no encoders".to_string());
        let agg = aggregate(&[failed.clone(), item(ItemStatus::Completed, 100)]);
        assert_eq!(agg.status, RequestStatus::Failed);
        assert_eq!(agg.error.as_deref(), Some("no encoders"));

        let agg = aggregate(&[failed, item(ItemStatus::Encoding, 40)]);
        assert_eq!(agg.status, RequestStatus::Encoding);
        assert!(agg.error.is_none());
    }

    #[test]
    fn majority_stage_wins() {
        let agg = aggregate(&[
            item(ItemStatus::Downloading, 50),
            item(ItemStatus::Downloading, 20),
            item(ItemStatus::Searching, 0),
        ]);
        assert_eq!(agg.status, RequestStatus::Downloading);
    }

    #[test]
    fn awaiting_and_quality_unavailable_fall_through() {
        let agg = aggregate(&[
            item(ItemStatus::Awaiting, 0),
            item(ItemStatus::Completed, 100),
        ]);
        assert_eq!(agg.status, RequestStatus::Awaiting);

        let agg = aggregate(&[
            item(ItemStatus::QualityUnavailable, 0),
            item(ItemStatus::QualityUnavailable, 0),
        ]);
        assert_eq!(agg.status, RequestStatus::QualityUnavailable);
    }

    #[test]
    fn progress_weights_stage_bands() {
        // A delivering item at 50% sits inside the 75-99 band.
        let agg = aggregate(&[item(ItemStatus::Delivering, 50)]);
        assert_eq!(agg.status, RequestStatus::Delivering);
        assert_eq!(agg.progress, 87);

        // Mixed: one completed (100) and one downloading at 0% (band floor 15).
        let agg = aggregate(&[
            item(ItemStatus::Completed, 100),
            item(ItemStatus::Downloading, 0),
        ]);
        assert_eq!(agg.progress, 57);
    }

    #[test]
    fn progress_is_monotone_across_stages() {
        let stages = [
            item(ItemStatus::Pending, 0),
            item(ItemStatus::Searching, 50),
            item(ItemStatus::Downloading, 50),
            item(ItemStatus::Encoding, 50),
            item(ItemStatus::Delivering, 50),
            item(ItemStatus::Completed, 100),
        ];
        let values: Vec<u8> = stages
            .iter()
            .map(|it| aggregate(std::slice::from_ref(it)).progress)
            .collect();
        for pair in values.windows(2) {
            assert!(pair[0] <= pair[1], "progress bands must not regress: {values:?}");
        }
    }
}
