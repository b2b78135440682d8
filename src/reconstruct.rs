//! Reconstruction pass orchestration.
//!
//! One pass takes a full set of task skeletons and returns the same set
//! annotated with parent links, plus a diagnostic trail. The pass owns its
//! index and parent graph; nothing is shared between passes. Steps:
//!
//! 1. screen identity contracts (unique, non-empty task ids)
//! 2. validate persisted parent links, clearing rejected ones
//! 3. index every declared sub-instruction
//! 4. match parentless tasks against the index, oldest first
//!
//! Indexing completes before the first query so match results never depend
//! on iteration order within the set.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use uuid::Uuid;

use crate::config::{IndexScope, InferenceMode, ReconstructionConfig};
use crate::index::InstructionIndex;
use crate::matcher::{CandidateMeta, Matcher};
use crate::skeleton::{ContractViolation, LinkState, TaskSkeleton};
use crate::validate::{validate_relation, ParentGraph};

/// What the pass decided about one task's parent link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDecision {
    /// Persisted parent survived validation.
    DeclaredValidated,
    /// Persisted parent points outside the supplied set; the claim is kept
    /// but nothing could be checked.
    DeclaredUnverifiable,
    /// Persisted parent was rejected and cleared.
    DeclaredRejected,
    /// Parent inferred by matching.
    Matched,
    /// No parent could be established. A normal outcome, not a failure.
    Orphaned,
}

/// One decision record, in processing order.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub task_id: String,
    pub decision: LinkDecision,
    /// Parent candidate the decision concerns, when there was one.
    pub candidate: Option<String>,
    /// Composite score for matched parents.
    pub score: Option<f64>,
    /// Rejection reasons, human-readable.
    pub reasons: Vec<String>,
}

/// Aggregate counters for one pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassStats {
    pub pass_id: Uuid,
    pub total: usize,
    pub screened_out: usize,
    pub declared_validated: usize,
    pub declared_unverifiable: usize,
    pub declared_rejected: usize,
    pub matched: usize,
    pub orphaned: usize,
}

/// Everything one pass produces. `skeletons` preserves input order;
/// malformed records pass through unmodified.
#[derive(Debug)]
pub struct PassOutcome {
    pub skeletons: Vec<TaskSkeleton>,
    pub diagnostics: Vec<Diagnostic>,
    pub states: HashMap<String, LinkState>,
    pub violations: Vec<ContractViolation>,
    pub stats: PassStats,
}

/// Runs reconstruction passes. Holds configuration only; all per-pass
/// state lives and dies inside [`Reconstructor::reconstruct`].
pub struct Reconstructor {
    config: ReconstructionConfig,
}

impl Reconstructor {
    pub fn new(config: ReconstructionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    /// Run one reconstruction pass over `skeletons`.
    ///
    /// # Postconditions
    /// - output skeletons are the input skeletons, same order, with only
    ///   parent fields changed
    /// - every accepted edge passed validation against the live graph, so
    ///   the result is acyclic
    /// - running the pass again over its own output changes nothing
    pub fn reconstruct(&self, mut skeletons: Vec<TaskSkeleton>) -> PassOutcome {
        let pass_id = Uuid::new_v4();
        tracing::info!(
            %pass_id,
            total = skeletons.len(),
            mode = ?self.config.mode,
            "starting reconstruction pass"
        );

        let mut diagnostics = Vec::new();
        let mut states: HashMap<String, LinkState> = HashMap::new();
        let mut stats = PassStats {
            pass_id,
            total: skeletons.len(),
            screened_out: 0,
            declared_validated: 0,
            declared_unverifiable: 0,
            declared_rejected: 0,
            matched: 0,
            orphaned: 0,
        };

        let (valid, violations) = screen_identities(&skeletons);
        stats.screened_out = skeletons.len() - valid.len();

        let id_to_idx: HashMap<String, usize> = valid
            .iter()
            .map(|&i| (skeletons[i].task_id.clone(), i))
            .collect();

        // One live graph over the whole valid set. Persisted edges can
        // cross groups (one side may declare no workspace), so every cycle
        // walk has to see every edge, not just the current group's.
        let mut graph = ParentGraph::from_skeletons(valid.iter().map(|&i| &skeletons[i]));

        for group in self.group_indices(&skeletons, &valid) {
            self.reconstruct_group(
                &group,
                &id_to_idx,
                &mut graph,
                &mut skeletons,
                &mut diagnostics,
                &mut states,
                &mut stats,
            );
        }

        tracing::info!(
            %pass_id,
            validated = stats.declared_validated,
            rejected = stats.declared_rejected,
            matched = stats.matched,
            orphaned = stats.orphaned,
            "reconstruction pass complete"
        );

        PassOutcome {
            skeletons,
            diagnostics,
            states,
            violations,
            stats,
        }
    }

    /// Partition the valid indices per the configured index scope. A
    /// missing workspace groups under the empty key.
    fn group_indices(&self, skeletons: &[TaskSkeleton], valid: &[usize]) -> Vec<Vec<usize>> {
        match self.config.index_scope {
            IndexScope::SharedTagged => vec![valid.to_vec()],
            IndexScope::PerWorkspace => {
                let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
                for &idx in valid {
                    let key = skeletons[idx].workspace.clone().unwrap_or_default();
                    groups.entry(key).or_default().push(idx);
                }
                groups.into_values().collect()
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn reconstruct_group(
        &self,
        group: &[usize],
        id_to_idx: &HashMap<String, usize>,
        graph: &mut ParentGraph,
        skeletons: &mut [TaskSkeleton],
        diagnostics: &mut Vec<Diagnostic>,
        states: &mut HashMap<String, LinkState>,
        stats: &mut PassStats,
    ) {
        // Step 2: validate persisted links against the live graph.
        for &idx in group {
            let Some(parent_id) = skeletons[idx].parent_task_id.clone() else {
                states.insert(skeletons[idx].task_id.clone(), LinkState::OrphanPending);
                continue;
            };
            states.insert(skeletons[idx].task_id.clone(), LinkState::Declared);

            let Some(&parent_idx) = id_to_idx.get(&parent_id) else {
                // Parent outside the supplied set: keep the claim as-is,
                // but do not report it as validated.
                states.insert(skeletons[idx].task_id.clone(), LinkState::Validated);
                stats.declared_unverifiable += 1;
                diagnostics.push(Diagnostic {
                    task_id: skeletons[idx].task_id.clone(),
                    decision: LinkDecision::DeclaredUnverifiable,
                    candidate: Some(parent_id),
                    score: None,
                    reasons: Vec::new(),
                });
                continue;
            };

            let outcome = validate_relation(&skeletons[parent_idx], &skeletons[idx], graph);
            let task_id = skeletons[idx].task_id.clone();
            if outcome.accepted {
                states.insert(task_id.clone(), LinkState::Validated);
                stats.declared_validated += 1;
                diagnostics.push(Diagnostic {
                    task_id,
                    decision: LinkDecision::DeclaredValidated,
                    candidate: Some(parent_id),
                    score: None,
                    reasons: Vec::new(),
                });
            } else {
                skeletons[idx].clear_parent();
                graph.clear_parent(&task_id);
                states.insert(task_id.clone(), LinkState::Invalidated);
                stats.declared_rejected += 1;
                diagnostics.push(Diagnostic {
                    task_id,
                    decision: LinkDecision::DeclaredRejected,
                    candidate: Some(parent_id),
                    score: None,
                    reasons: outcome.reasons.iter().map(|r| r.to_string()).collect(),
                });
            }
        }

        // Step 3: index every declared sub-instruction, strictly before any
        // query runs.
        let mut index = InstructionIndex::new(self.config.max_prefix_length);
        let mut metas: HashMap<String, CandidateMeta> = HashMap::new();
        for &idx in group {
            let skeleton = &skeletons[idx];
            for instruction in &skeleton.child_task_instruction_prefixes {
                index.add(&skeleton.task_id, instruction);
            }
            metas.insert(skeleton.task_id.clone(), CandidateMeta::of(skeleton));
        }

        // Step 4: match parentless tasks, oldest first.
        let mut pending: Vec<usize> = group
            .iter()
            .copied()
            .filter(|&i| !skeletons[i].has_parent())
            .collect();
        pending.sort_by_key(|&i| {
            let skeleton = &skeletons[i];
            let at = match skeleton.created_at {
                Some(t) => (0u8, t.timestamp_millis()),
                None => (1, 0),
            };
            (at, skeleton.task_id.clone())
        });

        let matching = self.config.mode == InferenceMode::MatchingEnabled;
        let matcher = Matcher::new(
            &index,
            &metas,
            self.config.weights,
            self.config.match_threshold,
        );

        for idx in pending {
            let child = skeletons[idx].clone();
            let mut chosen: Option<(String, f64)> = None;
            let mut rejections: Vec<String> = Vec::new();

            if matching {
                for candidate in matcher.find_best_matches(&child) {
                    let Some(&owner_idx) = id_to_idx.get(&candidate.owner_task_id) else {
                        continue;
                    };
                    let outcome = validate_relation(&skeletons[owner_idx], &child, graph);
                    if outcome.accepted {
                        chosen = Some((candidate.owner_task_id, candidate.score));
                        break;
                    }
                    rejections.extend(outcome.reasons.iter().map(|r| r.to_string()));
                }
            }

            match chosen {
                Some((parent_id, score)) => {
                    let skeleton = &mut skeletons[idx];
                    skeleton.parent_task_id = Some(parent_id.clone());
                    skeleton.reconstructed_parent_id = Some(parent_id.clone());
                    graph.set_parent(&skeleton.task_id, &parent_id);
                    states.insert(skeleton.task_id.clone(), LinkState::MatchedValidated);
                    stats.matched += 1;
                    tracing::debug!(
                        child = %skeleton.task_id,
                        parent = %parent_id,
                        score,
                        "reconstructed parent link"
                    );
                    diagnostics.push(Diagnostic {
                        task_id: skeleton.task_id.clone(),
                        decision: LinkDecision::Matched,
                        candidate: Some(parent_id),
                        score: Some(score),
                        reasons: Vec::new(),
                    });
                }
                None => {
                    let task_id = skeletons[idx].task_id.clone();
                    states.insert(task_id.clone(), LinkState::OrphanFinal);
                    stats.orphaned += 1;
                    diagnostics.push(Diagnostic {
                        task_id,
                        decision: LinkDecision::Orphaned,
                        candidate: None,
                        score: None,
                        reasons: rejections,
                    });
                }
            }
        }
    }
}

/// Screen the identity contract: non-empty, unique task ids. Returns the
/// indices of well-formed skeletons and a violation per malformed one.
fn screen_identities(skeletons: &[TaskSkeleton]) -> (Vec<usize>, Vec<ContractViolation>) {
    let mut valid = Vec::with_capacity(skeletons.len());
    let mut violations = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();

    for (position, skeleton) in skeletons.iter().enumerate() {
        if skeleton.task_id.trim().is_empty() {
            tracing::warn!(position, "skeleton with empty task id skipped");
            violations.push(ContractViolation::MissingTaskId { position });
            continue;
        }
        if seen.insert(skeleton.task_id.as_str(), position).is_some() {
            tracing::warn!(task_id = %skeleton.task_id, position, "duplicate task id skipped");
            violations.push(ContractViolation::DuplicateTaskId {
                task_id: skeleton.task_id.clone(),
            });
            continue;
        }
        valid.push(position);
    }

    (valid, violations)
}
