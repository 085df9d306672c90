//! The two workflows that are always registered, regardless of project
//! configuration (§4.5: "`implementation` and `review_fix` are always
//! available; a config file naming a custom workflow with either name is
//! rejected as invalid input").

use crate::error::RavenResult;

use super::definition::{StepDef, TransitionEvent, WorkflowDefinition, DONE_STEP, FAILED_STEP};

pub const IMPLEMENTATION_WORKFLOW: &str = "implementation";
pub const REVIEW_FIX_WORKFLOW: &str = "review_fix";

/// select -> prompt -> invoke -> detect -> advance, looping back to
/// `select` for the next ready task until the phase (or task list) is
/// exhausted (§4.6).
pub fn implementation_workflow() -> RavenResult<WorkflowDefinition> {
    WorkflowDefinition::new(
        IMPLEMENTATION_WORKFLOW,
        "select a ready task, prompt and invoke an agent, detect the outcome, advance state",
        "select",
        vec![
            StepDef::new("select")
                .on(TransitionEvent::Success, "prompt")
                .on(TransitionEvent::Blocked, DONE_STEP)
                .on(TransitionEvent::Failure, FAILED_STEP),
            StepDef::new("prompt")
                .on(TransitionEvent::Success, "invoke")
                .on(TransitionEvent::Failure, FAILED_STEP),
            StepDef::new("invoke")
                .on(TransitionEvent::Success, "detect")
                .on(TransitionEvent::RateLimited, "invoke")
                .on(TransitionEvent::NeedsHuman, FAILED_STEP)
                .on(TransitionEvent::Failure, FAILED_STEP),
            StepDef::new("detect")
                .on(TransitionEvent::Success, "advance")
                .on(TransitionEvent::Partial, "advance")
                .on(TransitionEvent::Blocked, "advance")
                .on(TransitionEvent::Failure, FAILED_STEP),
            StepDef::new("advance")
                .on(TransitionEvent::Success, "select")
                .on(TransitionEvent::Blocked, DONE_STEP)
                .on(TransitionEvent::Failure, FAILED_STEP),
        ],
    )
}

/// review -> fix -> review (repeat until clean or a cap is hit) -> pr
/// (§4.7). A `review` that comes back clean transitions straight to `pr`;
/// one with actionable findings loops through `fix`.
pub fn review_fix_workflow() -> RavenResult<WorkflowDefinition> {
    WorkflowDefinition::new(
        REVIEW_FIX_WORKFLOW,
        "fan out a review, apply fixes, and re-review until clean or exhausted",
        "review",
        vec![
            StepDef::new("review")
                .on(TransitionEvent::Success, "pr")
                .on(TransitionEvent::Partial, "fix")
                .on(TransitionEvent::NeedsHuman, "fix")
                .on(TransitionEvent::Failure, FAILED_STEP),
            StepDef::new("fix")
                .on(TransitionEvent::Success, "review")
                .on(TransitionEvent::Blocked, FAILED_STEP)
                .on(TransitionEvent::Partial, "pr")
                .on(TransitionEvent::Failure, FAILED_STEP),
            StepDef::new("pr")
                .on(TransitionEvent::Success, DONE_STEP)
                .on(TransitionEvent::Failure, FAILED_STEP),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::validate::validate_definition;

    #[test]
    fn implementation_workflow_is_valid() {
        let def = implementation_workflow().unwrap();
        let report = validate_definition(&def, None);
        assert!(report.is_valid(), "{:?}", report.issues);
    }

    #[test]
    fn review_fix_workflow_is_valid() {
        let def = review_fix_workflow().unwrap();
        let report = validate_definition(&def, None);
        assert!(report.is_valid(), "{:?}", report.issues);
    }

    #[test]
    fn builtin_names_are_reserved() {
        assert_eq!(implementation_workflow().unwrap().name, IMPLEMENTATION_WORKFLOW);
        assert_eq!(review_fix_workflow().unwrap().name, REVIEW_FIX_WORKFLOW);
    }
}
