//! Built-in default pipeline templates, seeded at bootstrap when absent.

use chrono::Utc;
use uuid::Uuid;

use annex_core::{MediaKind, PipelineTemplate, StepDefinition};

fn chain(mut kinds: Vec<StepDefinition>) -> StepDefinition {
    let mut root = kinds.remove(0);
    let mut cursor = &mut root;
    for step in kinds {
        cursor.children.push(step);
        cursor = cursor
            .children
            .last_mut()
            .unwrap_or_else(|| unreachable!("child was just pushed"));
    }
    root
}

/// The default movie pipeline: a linear chain from search to delivery.
#[must_use]
pub fn default_movie_template() -> PipelineTemplate {
    let steps = vec![chain(vec![
        StepDefinition::of_kind("search"),
        StepDefinition::of_kind("download_start"),
        StepDefinition::of_kind("download_monitor"),
        StepDefinition::of_kind("map_files"),
        StepDefinition::of_kind("encode"),
        StepDefinition::of_kind("deliver"),
    ])];
    PipelineTemplate {
        id: Uuid::new_v4(),
        name: "Movie".to_owned(),
        media_kind: MediaKind::Movie,
        version: 1,
        is_default: true,
        steps,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// The default TV pipeline: season-scoped acquisition, then per-episode
/// branch executions for encode and delivery.
#[must_use]
pub fn default_tv_template() -> PipelineTemplate {
    let branch = StepDefinition::of_kind("branch").with_child(chain(vec![
        StepDefinition::of_kind("encode"),
        StepDefinition::of_kind("deliver"),
    ]));
    let steps = vec![chain(vec![
        StepDefinition::of_kind("search"),
        StepDefinition::of_kind("download_start"),
        StepDefinition::of_kind("download_monitor"),
        StepDefinition::of_kind("map_files"),
        branch,
    ])];
    PipelineTemplate {
        id: Uuid::new_v4(),
        name: "TV".to_owned(),
        media_kind: MediaKind::Tv,
        version: 1,
        is_default: true,
        steps,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(step: &StepDefinition) -> usize {
        1 + step.children.iter().map(depth).max().unwrap_or(0)
    }

    #[test]
    fn movie_template_is_a_linear_chain() {
        let template = default_movie_template();
        assert_eq!(template.steps.len(), 1);
        assert_eq!(depth(&template.steps[0]), 6);
        assert_eq!(template.steps[0].kind, "search");
    }

    #[test]
    fn tv_template_branches_after_mapping() {
        let template = default_tv_template();
        assert_eq!(template.steps.len(), 1);
        let mut cursor = &template.steps[0];
        while !cursor.children.is_empty() && cursor.kind != "map_files" {
            cursor = &cursor.children[0];
        }
        assert_eq!(cursor.kind, "map_files");
        assert_eq!(cursor.children.len(), 1);
        assert_eq!(cursor.children[0].kind, "branch");
        assert_eq!(cursor.children[0].children[0].kind, "encode");
    }
}
