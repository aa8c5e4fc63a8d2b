//! Stage dependency graphs.
//!
//! One static DAG per project kind. Readiness evaluation lives in the
//! planner; this module only answers structural questions and is total
//! for any input.

use aicg_models::{ProjectKind, Stage, TaskError};

/// Stages of the movie pipeline in topological order.
pub const MOVIE_STAGES: &[Stage] = &[
    Stage::ExtractCharacters,
    Stage::ExtractScenes,
    Stage::ExtractShots,
    Stage::GenerateSceneImages,
    Stage::GenerateCharacterAvatars,
    Stage::GenerateKeyframes,
    Stage::CreateTransitions,
    Stage::GenerateTransitionVideos,
    Stage::ComposeVideo,
];

/// Stages of the narrative pipeline in topological order.
pub const NARRATIVE_STAGES: &[Stage] = &[
    Stage::GenerateSentencePrompts,
    Stage::GenerateSentenceImages,
    Stage::SynthesizeSentenceAudio,
    Stage::ComposeVideo,
];

/// Direct upstream stages of a stage within a pipeline.
pub fn upstreams(kind: ProjectKind, stage: Stage) -> &'static [Stage] {
    match kind {
        ProjectKind::Movie => match stage {
            Stage::ExtractCharacters => &[],
            Stage::ExtractScenes => &[Stage::ExtractCharacters],
            Stage::ExtractShots => &[Stage::ExtractScenes],
            Stage::GenerateSceneImages => &[Stage::ExtractScenes],
            Stage::GenerateCharacterAvatars => &[Stage::ExtractCharacters],
            Stage::GenerateKeyframes => &[Stage::ExtractShots, Stage::GenerateCharacterAvatars],
            Stage::CreateTransitions => &[Stage::ExtractShots, Stage::GenerateKeyframes],
            Stage::GenerateTransitionVideos => &[Stage::CreateTransitions],
            Stage::ComposeVideo => &[Stage::GenerateTransitionVideos],
            _ => &[],
        },
        ProjectKind::Narrative => match stage {
            Stage::GenerateSentencePrompts => &[],
            Stage::GenerateSentenceImages => &[Stage::GenerateSentencePrompts],
            Stage::SynthesizeSentenceAudio => &[Stage::GenerateSentencePrompts],
            Stage::ComposeVideo => &[
                Stage::GenerateSentenceImages,
                Stage::SynthesizeSentenceAudio,
            ],
            _ => &[],
        },
    }
}

/// Whether a stage belongs to a pipeline at all.
pub fn contains(kind: ProjectKind, stage: Stage) -> bool {
    pipeline(kind).contains(&stage)
}

fn pipeline(kind: ProjectKind) -> &'static [Stage] {
    match kind {
        ProjectKind::Movie => MOVIE_STAGES,
        ProjectKind::Narrative => NARRATIVE_STAGES,
    }
}

/// The transitive set of stages that must run to reach `target`, in
/// topological order (ending with `target`).
pub fn required_stages(kind: ProjectKind, target: Stage) -> Result<Vec<Stage>, TaskError> {
    if !contains(kind, target) {
        return Err(TaskError::validation(format!(
            "stage {target} is not part of the {} pipeline",
            kind.as_str()
        )));
    }

    let mut needed = std::collections::HashSet::new();
    let mut stack = vec![target];
    while let Some(stage) = stack.pop() {
        if needed.insert(stage) {
            stack.extend(upstreams(kind, stage).iter().copied());
        }
    }

    Ok(pipeline(kind)
        .iter()
        .copied()
        .filter(|s| needed.contains(s))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movie_full_pipeline_closure() {
        let stages = required_stages(ProjectKind::Movie, Stage::ComposeVideo).unwrap();
        assert_eq!(stages, MOVIE_STAGES.to_vec());
    }

    #[test]
    fn movie_partial_targets() {
        let stages = required_stages(ProjectKind::Movie, Stage::GenerateKeyframes).unwrap();
        assert_eq!(
            stages,
            vec![
                Stage::ExtractCharacters,
                Stage::ExtractScenes,
                Stage::ExtractShots,
                Stage::GenerateCharacterAvatars,
                Stage::GenerateKeyframes,
            ]
        );
        // Scene images are not needed for keyframes.
        assert!(!stages.contains(&Stage::GenerateSceneImages));
    }

    #[test]
    fn upstreams_precede_dependents_in_order() {
        for target in MOVIE_STAGES {
            let stages = required_stages(ProjectKind::Movie, *target).unwrap();
            for (i, stage) in stages.iter().enumerate() {
                for up in upstreams(ProjectKind::Movie, *stage) {
                    let up_pos = stages.iter().position(|s| s == up).unwrap();
                    assert!(up_pos < i, "{up} must precede {stage}");
                }
            }
        }
    }

    #[test]
    fn narrative_compose_needs_both_asset_stages() {
        let stages = required_stages(ProjectKind::Narrative, Stage::ComposeVideo).unwrap();
        assert_eq!(stages, NARRATIVE_STAGES.to_vec());
    }

    #[test]
    fn cross_pipeline_target_is_validation_error() {
        let err = required_stages(ProjectKind::Narrative, Stage::GenerateKeyframes).unwrap_err();
        assert_eq!(err.code(), "validation");
        let err = required_stages(ProjectKind::Movie, Stage::GenerateSentencePrompts).unwrap_err();
        assert_eq!(err.code(), "validation");
    }
}
