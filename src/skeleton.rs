//! Task skeleton data model.
//!
//! A skeleton is the reconstructed summary record for one task,
//! independent of full conversation content. Skeletons are produced by an
//! external loader, handed to the reconstruction pass in full, and
//! returned annotated; this crate never reads storage itself.
//!
//! # Invariants
//! - `task_id` is unique within a supplied set (violations are reported,
//!   not panicked on)
//! - a set `parent_task_id` shares the child's workspace
//! - the parent graph is acyclic
//! - `parent.created_at <= child.created_at`

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::extract::extract_instructions;

/// Summary record for one task.
///
/// Field names serialize in camelCase to match loader-side records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSkeleton {
    /// Unique task identifier. The one hard contract requirement.
    pub task_id: String,

    /// Isolation boundary (path-like). Parent-child edges never cross it.
    #[serde(default)]
    pub workspace: Option<String>,

    /// Creation time. Unparsable loader timestamps become `None`, which is
    /// non-conclusive for validation rather than fatal for the record.
    #[serde(default, deserialize_with = "de_created_at")]
    pub created_at: Option<DateTime<Utc>>,

    /// Parent task, persisted or reconstructed.
    #[serde(default)]
    pub parent_task_id: Option<String>,

    /// Set iff the parent was inferred by matching rather than carried by
    /// persisted metadata.
    #[serde(default)]
    pub reconstructed_parent_id: Option<String>,

    /// Own opening instruction, bounded length.
    #[serde(default)]
    pub truncated_instruction: String,

    /// Ordered instructions this task issued to children.
    #[serde(default)]
    pub child_task_instruction_prefixes: Vec<String>,
}

impl TaskSkeleton {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            workspace: None,
            created_at: None,
            parent_task_id: None,
            reconstructed_parent_id: None,
            truncated_instruction: String::new(),
            child_task_instruction_prefixes: Vec::new(),
        }
    }

    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.truncated_instruction = instruction.into();
        self
    }

    pub fn with_declared_parent(mut self, parent_task_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }

    pub fn with_child_instructions(mut self, instructions: Vec<String>) -> Self {
        self.child_task_instruction_prefixes = instructions;
        self
    }

    /// Run the sub-instruction extractor over a raw transcript and append
    /// the results to `child_task_instruction_prefixes`.
    ///
    /// Loaders call this while building skeletons; the reconstruction pass
    /// itself only consumes the populated list. Returns the number of
    /// instructions appended.
    pub fn extend_child_instructions_from(&mut self, transcript: &str) -> usize {
        let extracted = extract_instructions(transcript);
        let count = extracted.len();
        self.child_task_instruction_prefixes.extend(extracted);
        count
    }

    pub fn has_parent(&self) -> bool {
        self.parent_task_id.is_some()
    }

    /// Whether the current parent was inferred rather than persisted.
    pub fn is_reconstructed(&self) -> bool {
        self.reconstructed_parent_id.is_some()
            && self.reconstructed_parent_id == self.parent_task_id
    }

    /// Drop the parent link entirely, making the task eligible for
    /// re-matching.
    pub fn clear_parent(&mut self) {
        self.parent_task_id = None;
        self.reconstructed_parent_id = None;
    }
}

/// Per-skeleton lifecycle within one reconstruction pass.
///
/// ```text
/// Declared -> {Validated | Invalidated}
/// Invalidated / no declared parent -> OrphanPending
/// OrphanPending -> {MatchedValidated | OrphanFinal}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Arrived with a persisted parent id, not yet validated.
    Declared,
    /// Persisted parent survived validation.
    Validated,
    /// Persisted parent was rejected and cleared.
    Invalidated,
    /// No parent; awaiting a matching attempt.
    OrphanPending,
    /// Parent inferred by matching and validated.
    MatchedValidated,
    /// No valid parent found. A valid terminal state.
    OrphanFinal,
}

impl LinkState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LinkState::Validated | LinkState::MatchedValidated | LinkState::OrphanFinal
        )
    }
}

/// Contract violation by the upstream loader. The one hard error: a
/// malformed skeleton is reported and skipped, and the rest of the set
/// still processes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ContractViolation {
    #[error("skeleton at position {position} has an empty task id")]
    MissingTaskId { position: usize },

    #[error("duplicate task id: {task_id}")]
    DuplicateTaskId { task_id: String },
}

fn de_created_at<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(timestamp_from_value))
}

fn timestamp_from_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => parse_timestamp(s),
        serde_json::Value::Number(n) => n.as_i64().and_then(timestamp_from_epoch),
        _ => None,
    }
}

/// Parse a loader timestamp leniently. RFC 3339 first, then RFC 2822;
/// anything else is `None`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .or_else(|| DateTime::parse_from_rfc2822(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn timestamp_from_epoch(n: i64) -> Option<DateTime<Utc>> {
    // Heuristic: values this large are epoch milliseconds.
    if n.abs() >= 1_000_000_000_000 {
        Utc.timestamp_millis_opt(n).single()
    } else {
        Utc.timestamp_opt(n, 0).single()
    }
}
