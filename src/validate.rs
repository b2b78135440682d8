//! Structural validation of proposed parent-child edges.
//!
//! Every candidate edge — persisted metadata or matcher output — goes
//! through the same checks before it enters the forest. Rejection is a
//! routine data condition, reported as an outcome with reasons, never an
//! error.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::skeleton::TaskSkeleton;

/// Why a proposed edge was rejected. Checks run independently; an outcome
/// can carry several reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Candidate and child are the same task.
    SelfReference,
    /// Adding the edge would make the child its own ancestor.
    Cycle,
    /// Candidate was created after the child.
    TemporalOrder,
    /// Both sides declare a workspace and they differ.
    WorkspaceMismatch,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::SelfReference => write!(f, "self-reference"),
            RejectReason::Cycle => write!(f, "cycle"),
            RejectReason::TemporalOrder => write!(f, "temporal order"),
            RejectReason::WorkspaceMismatch => write!(f, "workspace mismatch"),
        }
    }
}

/// Result of validating one proposed edge.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub accepted: bool,
    pub reasons: Vec<RejectReason>,
}

impl ValidationOutcome {
    fn accept() -> Self {
        Self {
            accepted: true,
            reasons: Vec::new(),
        }
    }

    fn reject(reasons: Vec<RejectReason>) -> Self {
        Self {
            accepted: false,
            reasons,
        }
    }
}

/// Current parent edges of the pass, child id -> parent id.
///
/// Updated as the orchestrator accepts or clears edges so later cycle
/// checks see the live state.
#[derive(Debug, Default)]
pub struct ParentGraph {
    parents: HashMap<String, String>,
}

impl ParentGraph {
    /// Build the graph from the persisted parent pointers of a task set.
    pub fn from_skeletons<'a, I>(skeletons: I) -> Self
    where
        I: IntoIterator<Item = &'a TaskSkeleton>,
    {
        let mut parents = HashMap::new();
        for skeleton in skeletons {
            if let Some(parent) = &skeleton.parent_task_id {
                parents.insert(skeleton.task_id.clone(), parent.clone());
            }
        }
        Self { parents }
    }

    pub fn parent_of(&self, task_id: &str) -> Option<&str> {
        self.parents.get(task_id).map(String::as_str)
    }

    pub fn set_parent(&mut self, child_id: &str, parent_id: &str) {
        self.parents
            .insert(child_id.to_string(), parent_id.to_string());
    }

    pub fn clear_parent(&mut self, child_id: &str) {
        self.parents.remove(child_id);
    }

    /// Walk the ancestor chain starting at `start`, checking whether it
    /// reaches `target`. Iterative, with an explicit stack of task ids and
    /// a visited set so pre-corrupted cycles cannot loop forever.
    pub fn reaches(&self, start: &str, target: &str) -> bool {
        let mut stack: Vec<&str> = vec![start];
        let mut visited: HashSet<&str> = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(parent) = self.parent_of(current) {
                stack.push(parent);
            }
        }
        false
    }
}

/// Validate a proposed `candidate -> child` parent edge.
///
/// Checks, each independently sufficient to reject:
/// - self: candidate and child are the same task
/// - cycle: the candidate's ancestor chain (with the edge hypothetically
///   added) must not reach the child
/// - temporal: candidate created after the child; missing timestamps are
///   non-conclusive and do not block
/// - workspace: both declare a workspace and they differ
pub fn validate_relation(
    candidate: &TaskSkeleton,
    child: &TaskSkeleton,
    graph: &ParentGraph,
) -> ValidationOutcome {
    let mut reasons = Vec::new();

    if candidate.task_id == child.task_id {
        reasons.push(RejectReason::SelfReference);
    } else if graph.reaches(&candidate.task_id, &child.task_id) {
        reasons.push(RejectReason::Cycle);
    }

    if let (Some(parent_at), Some(child_at)) = (candidate.created_at, child.created_at) {
        if parent_at > child_at {
            reasons.push(RejectReason::TemporalOrder);
        }
    }

    if let (Some(parent_ws), Some(child_ws)) = (&candidate.workspace, &child.workspace) {
        if parent_ws != child_ws {
            reasons.push(RejectReason::WorkspaceMismatch);
        }
    }

    if reasons.is_empty() {
        ValidationOutcome::accept()
    } else {
        tracing::info!(
            child = %child.task_id,
            candidate = %candidate.task_id,
            reasons = ?reasons,
            "rejected parent edge"
        );
        ValidationOutcome::reject(reasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn skeleton(id: &str) -> TaskSkeleton {
        TaskSkeleton::new(id)
    }

    fn at(mut s: TaskSkeleton, secs: i64) -> TaskSkeleton {
        s.created_at = Some(Utc.timestamp_opt(secs, 0).unwrap());
        s
    }

    fn in_ws(mut s: TaskSkeleton, ws: &str) -> TaskSkeleton {
        s.workspace = Some(ws.to_string());
        s
    }

    #[test]
    fn accepts_clean_edge() {
        let parent = at(in_ws(skeleton("p"), "/w"), 100);
        let child = at(in_ws(skeleton("c"), "/w"), 200);
        let graph = ParentGraph::default();
        let outcome = validate_relation(&parent, &child, &graph);
        assert!(outcome.accepted);
        assert!(outcome.reasons.is_empty());
    }

    #[test]
    fn rejects_self_reference() {
        let task = skeleton("t");
        let graph = ParentGraph::default();
        let outcome = validate_relation(&task, &task, &graph);
        assert!(!outcome.accepted);
        assert_eq!(outcome.reasons, vec![RejectReason::SelfReference]);
    }

    #[test]
    fn rejects_cycle_through_ancestors() {
        // a -> b -> c already in the graph; proposing c as parent of a.
        let mut graph = ParentGraph::default();
        graph.set_parent("b", "a");
        graph.set_parent("c", "b");
        let candidate = skeleton("c");
        let child = skeleton("a");
        let outcome = validate_relation(&candidate, &child, &graph);
        assert!(!outcome.accepted);
        assert_eq!(outcome.reasons, vec![RejectReason::Cycle]);
    }

    #[test]
    fn corrupted_preexisting_cycle_terminates() {
        let mut graph = ParentGraph::default();
        graph.set_parent("x", "y");
        graph.set_parent("y", "x");
        // Walking from x never reaches z and must not loop forever.
        assert!(!graph.reaches("x", "z"));
        assert!(graph.reaches("x", "y"));
    }

    #[test]
    fn rejects_parent_created_after_child() {
        let parent = at(skeleton("p"), 500);
        let child = at(skeleton("c"), 100);
        let graph = ParentGraph::default();
        let outcome = validate_relation(&parent, &child, &graph);
        assert!(!outcome.accepted);
        assert_eq!(outcome.reasons, vec![RejectReason::TemporalOrder]);
    }

    #[test]
    fn missing_timestamps_are_non_conclusive() {
        let parent = skeleton("p");
        let child = at(skeleton("c"), 100);
        let graph = ParentGraph::default();
        assert!(validate_relation(&parent, &child, &graph).accepted);
    }

    #[test]
    fn rejects_workspace_mismatch() {
        let parent = in_ws(skeleton("p"), "/w1");
        let child = in_ws(skeleton("c"), "/w2");
        let graph = ParentGraph::default();
        let outcome = validate_relation(&parent, &child, &graph);
        assert!(!outcome.accepted);
        assert_eq!(outcome.reasons, vec![RejectReason::WorkspaceMismatch]);
    }

    #[test]
    fn one_missing_workspace_does_not_block() {
        let parent = skeleton("p");
        let child = in_ws(skeleton("c"), "/w2");
        let graph = ParentGraph::default();
        assert!(validate_relation(&parent, &child, &graph).accepted);
    }

    #[test]
    fn collects_multiple_reasons() {
        let parent = at(in_ws(skeleton("p"), "/w1"), 500);
        let child = at(in_ws(skeleton("c"), "/w2"), 100);
        let graph = ParentGraph::default();
        let outcome = validate_relation(&parent, &child, &graph);
        assert!(!outcome.accepted);
        assert!(outcome.reasons.contains(&RejectReason::TemporalOrder));
        assert!(outcome.reasons.contains(&RejectReason::WorkspaceMismatch));
    }
}
