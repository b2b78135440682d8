//! # Task Lineage
//!
//! Hierarchy reconstruction engine for AI coding agent task records.
//!
//! Agent platforms spawn sub-tasks whose parent links are often lost:
//! stored in volatile session state, dropped across restarts, or never
//! persisted at all. What survives is textual evidence — the instruction a
//! parent issued is the instruction its child started with. This crate
//! rebuilds the parent-child forest from that evidence.
//!
//! ## Pass Flow
//!
//! ```text
//!  Vec<TaskSkeleton>
//!        │
//!        ▼
//!  identity screening ──► ContractViolation per malformed record
//!        │
//!        ▼
//!  validate persisted links ──► reject & clear (cycle/temporal/workspace)
//!        │
//!        ▼
//!  index declared sub-instructions (prefix trie, pass-scoped)
//!        │
//!        ▼
//!  match & validate orphans, oldest first ──► annotated skeletons
//! ```
//!
//! ## Modules
//! - `extract`: pull declared sub-instructions out of raw transcript text
//! - `index`: pass-scoped prefix index over declared instructions
//! - `matcher`: composite scoring of parent candidates
//! - `validate`: structural checks on proposed parent edges
//! - `reconstruct`: the pass orchestrator
//! - `skeleton`: the task summary record and its lifecycle states
//! - `config`: pass configuration with environment overrides

pub mod config;
pub mod extract;
pub mod index;
pub mod matcher;
pub mod reconstruct;
pub mod skeleton;
pub mod validate;

pub use config::{ConfigError, IndexScope, InferenceMode, ReconstructionConfig, ScoreWeights};
pub use extract::extract_instructions;
pub use index::{InstructionIndex, DEFAULT_MAX_PREFIX_LEN};
pub use matcher::{MatchCandidate, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use reconstruct::{Diagnostic, LinkDecision, PassOutcome, PassStats, Reconstructor};
pub use skeleton::{ContractViolation, LinkState, TaskSkeleton};
pub use validate::{validate_relation, ParentGraph, RejectReason, ValidationOutcome};
