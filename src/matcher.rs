//! Candidate matching and scoring.
//!
//! Ranks indexed instructions against a child task's opening instruction.
//! The composite score blends four signals:
//! - ordered token containment (does the shorter side appear, in order,
//!   inside the longer side)
//! - token-set overlap
//! - rarity-weighted token overlap (a heuristic, not a trained model)
//! - normalized character edit distance
//!
//! The matcher reads candidate workspace/timestamp metadata only to break
//! near-ties; it is otherwise a pure function of index contents.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::config::ScoreWeights;
use crate::index::InstructionIndex;
use crate::skeleton::TaskSkeleton;

/// Default acceptance threshold for composite scores.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.7;

/// Scores within this window of the top score count as near-ties.
const TIE_EPSILON: f64 = 0.02;

/// A scored parent candidate for one query. Never persisted.
#[derive(Debug, Clone)]
pub struct MatchCandidate {
    /// Task that declared the matching instruction.
    pub owner_task_id: String,
    /// Composite score in [0, 1].
    pub score: f64,
    /// Tokens shared between the candidate instruction and the query.
    pub matched_terms: Vec<String>,
}

/// Workspace and timestamp of a candidate owner, for tie-breaking.
#[derive(Debug, Clone, Default)]
pub struct CandidateMeta {
    pub workspace: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl CandidateMeta {
    pub fn of(skeleton: &TaskSkeleton) -> Self {
        Self {
            workspace: skeleton.workspace.clone(),
            created_at: skeleton.created_at,
        }
    }
}

/// Matcher over a built index.
pub struct Matcher<'a> {
    index: &'a InstructionIndex,
    metas: &'a HashMap<String, CandidateMeta>,
    weights: ScoreWeights,
    threshold: f64,
}

impl<'a> Matcher<'a> {
    pub fn new(
        index: &'a InstructionIndex,
        metas: &'a HashMap<String, CandidateMeta>,
        weights: ScoreWeights,
        threshold: f64,
    ) -> Self {
        Self {
            index,
            metas,
            weights,
            threshold,
        }
    }

    /// Find candidate parents for `child`, best first.
    ///
    /// Queries the index with the child's opening instruction, keeps the
    /// best-scoring entry per owner (self-matches excluded), drops scores
    /// below the threshold, sorts descending, and re-ranks near-ties by
    /// workspace then temporal proximity.
    pub fn find_best_matches(&self, child: &TaskSkeleton) -> Vec<MatchCandidate> {
        let query = self.index.normalize_query(&child.truncated_instruction);
        if query.is_empty() {
            return Vec::new();
        }

        let mut best_per_owner: HashMap<&str, MatchCandidate> = HashMap::new();
        for entry in self.index.query_candidates(&child.truncated_instruction) {
            if entry.owner_task_id == child.task_id {
                continue;
            }
            let (score, matched_terms) = self.score_pair(&entry.normalized_prefix, &query);
            if score < self.threshold {
                continue;
            }
            let candidate = MatchCandidate {
                owner_task_id: entry.owner_task_id.clone(),
                score,
                matched_terms,
            };
            match best_per_owner.get(entry.owner_task_id.as_str()) {
                Some(existing) if existing.score >= score => {}
                _ => {
                    best_per_owner.insert(entry.owner_task_id.as_str(), candidate);
                }
            }
        }

        let mut candidates: Vec<MatchCandidate> = best_per_owner.into_values().collect();
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.owner_task_id.cmp(&b.owner_task_id))
        });
        self.break_ties(&mut candidates, child);

        tracing::debug!(
            child = %child.task_id,
            candidates = candidates.len(),
            top_score = candidates.first().map(|c| c.score).unwrap_or(0.0),
            "scored parent candidates"
        );
        candidates
    }

    /// Score a normalized candidate instruction against a normalized query.
    pub fn score_pair(&self, candidate: &str, query: &str) -> (f64, Vec<String>) {
        let cand_tokens: Vec<&str> = candidate.split_whitespace().collect();
        let query_tokens: Vec<&str> = query.split_whitespace().collect();
        if cand_tokens.is_empty() || query_tokens.is_empty() {
            return (0.0, Vec::new());
        }

        let inclusion = inclusion_score(&cand_tokens, &query_tokens);
        let common = common_word_score(&cand_tokens, &query_tokens);
        let lexical = self.lexical_score(&cand_tokens, &query_tokens);
        let edit = edit_similarity(candidate, query);

        let score = (self.weights.inclusion * inclusion
            + self.weights.common_words * common
            + self.weights.lexical * lexical
            + self.weights.edit_distance * edit)
            .clamp(0.0, 1.0);

        let cand_set: HashSet<&str> = cand_tokens.iter().copied().collect();
        let mut matched_terms = Vec::new();
        let mut seen = HashSet::new();
        for token in &query_tokens {
            if cand_set.contains(token) && seen.insert(*token) {
                matched_terms.push(token.to_string());
            }
        }

        (score, matched_terms)
    }

    /// Rarity-weighted token overlap, using document frequencies from the
    /// index corpus.
    fn lexical_score(&self, a: &[&str], b: &[&str]) -> f64 {
        let sa: HashSet<&str> = a.iter().copied().collect();
        let sb: HashSet<&str> = b.iter().copied().collect();
        let union_weight: f64 = sa.union(&sb).map(|t| self.index.token_weight(t)).sum();
        if union_weight <= 0.0 {
            return 0.0;
        }
        let shared_weight: f64 = sa
            .intersection(&sb)
            .map(|t| self.index.token_weight(t))
            .sum();
        shared_weight / union_weight
    }

    /// Re-rank the leading near-tie group: same-workspace candidates first,
    /// then `created_at` closest to (and not after) the child's.
    fn break_ties(&self, candidates: &mut [MatchCandidate], child: &TaskSkeleton) {
        let top = match candidates.first() {
            Some(c) => c.score,
            None => return,
        };
        let tie_len = candidates
            .iter()
            .take_while(|c| top - c.score <= TIE_EPSILON)
            .count();
        if tie_len < 2 {
            return;
        }

        let group = &mut candidates[..tie_len];
        group.sort_by_key(|c| {
            let meta = self.metas.get(&c.owner_task_id).cloned().unwrap_or_default();
            let same_workspace = match (&meta.workspace, &child.workspace) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
            let temporal_rank = temporal_distance_rank(meta.created_at, child.created_at);
            (!same_workspace, temporal_rank, c.owner_task_id.clone())
        });
    }
}

/// Rank candidates by closeness of `candidate_at` to `child_at`, preferring
/// candidates not created after the child. Missing timestamps rank last.
fn temporal_distance_rank(
    candidate_at: Option<DateTime<Utc>>,
    child_at: Option<DateTime<Utc>>,
) -> (u8, i64) {
    match (candidate_at, child_at) {
        (Some(c), Some(ch)) => {
            let delta = ch.signed_duration_since(c).num_milliseconds();
            if delta >= 0 {
                (0, delta)
            } else {
                // Created after the child: worse than any before-child match.
                (1, -delta)
            }
        }
        _ => (2, 0),
    }
}

/// Fraction of the shorter token sequence appearing, in order, inside the
/// longer one (greedy subsequence match).
fn inclusion_score(a: &[&str], b: &[&str]) -> f64 {
    let (needle, hay) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if needle.is_empty() {
        return 0.0;
    }
    let mut matched = 0usize;
    let mut hay_iter = hay.iter();
    for token in needle {
        if hay_iter.any(|h| h == token) {
            matched += 1;
        }
    }
    matched as f64 / needle.len() as f64
}

/// Jaccard overlap of the two token sets.
fn common_word_score(a: &[&str], b: &[&str]) -> f64 {
    let sa: HashSet<&str> = a.iter().copied().collect();
    let sb: HashSet<&str> = b.iter().copied().collect();
    let union = sa.union(&sb).count();
    if union == 0 {
        return 0.0;
    }
    sa.intersection(&sb).count() as f64 / union as f64
}

/// 1 minus the normalized character-level Levenshtein distance.
fn edit_similarity(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let max_len = a_chars.len().max(b_chars.len());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein(&a_chars, &b_chars);
    1.0 - distance as f64 / max_len as f64
}

/// Two-row Levenshtein over char slices.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoreWeights;
    use crate::index::DEFAULT_MAX_PREFIX_LEN;
    use chrono::TimeZone;

    fn child(id: &str, instruction: &str) -> TaskSkeleton {
        let mut s = TaskSkeleton::new(id);
        s.truncated_instruction = instruction.to_string();
        s
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn levenshtein_basics() {
        let a: Vec<char> = "kitten".chars().collect();
        let b: Vec<char> = "sitting".chars().collect();
        assert_eq!(levenshtein(&a, &b), 3);
        assert_eq!(levenshtein(&a, &a), 0);
        assert_eq!(levenshtein(&a, &[]), 6);
    }

    #[test]
    fn inclusion_respects_order() {
        let a = ["build", "module", "x"];
        let b = ["please", "build", "the", "module", "x"];
        assert!((inclusion_score(&a, &b) - 1.0).abs() < 1e-9);

        let scrambled = ["x", "module", "build"];
        assert!(inclusion_score(&scrambled, &b) < 1.0);
    }

    #[test]
    fn near_identical_instruction_scores_above_threshold() {
        let mut index = InstructionIndex::new(DEFAULT_MAX_PREFIX_LEN);
        index.add("parent", "build module x");
        let metas = HashMap::new();
        let matcher = Matcher::new(
            &index,
            &metas,
            ScoreWeights::default(),
            DEFAULT_MATCH_THRESHOLD,
        );

        let matches = matcher.find_best_matches(&child("c1", "build module x please"));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].owner_task_id, "parent");
        assert!(matches[0].score >= DEFAULT_MATCH_THRESHOLD);
        assert!(matches[0]
            .matched_terms
            .contains(&"module".to_string()));
    }

    #[test]
    fn unrelated_instruction_filtered_by_threshold() {
        let mut index = InstructionIndex::new(DEFAULT_MAX_PREFIX_LEN);
        index.add("parent", "build module x carefully");
        let metas = HashMap::new();
        let matcher = Matcher::new(
            &index,
            &metas,
            ScoreWeights::default(),
            DEFAULT_MATCH_THRESHOLD,
        );

        let matches = matcher.find_best_matches(&child("c1", "build something else entirely"));
        assert!(matches.is_empty());
    }

    #[test]
    fn self_matches_excluded() {
        let mut index = InstructionIndex::new(DEFAULT_MAX_PREFIX_LEN);
        index.add("task-1", "build module x");
        let metas = HashMap::new();
        let matcher = Matcher::new(
            &index,
            &metas,
            ScoreWeights::default(),
            DEFAULT_MATCH_THRESHOLD,
        );

        let matches = matcher.find_best_matches(&child("task-1", "build module x"));
        assert!(matches.is_empty());
    }

    #[test]
    fn ties_prefer_same_workspace() {
        let mut index = InstructionIndex::new(DEFAULT_MAX_PREFIX_LEN);
        index.add("far", "build module x");
        index.add("near", "build module x");

        let mut metas = HashMap::new();
        metas.insert(
            "far".to_string(),
            CandidateMeta {
                workspace: Some("/other".to_string()),
                created_at: Some(ts(100)),
            },
        );
        metas.insert(
            "near".to_string(),
            CandidateMeta {
                workspace: Some("/home/project".to_string()),
                created_at: Some(ts(100)),
            },
        );

        let matcher = Matcher::new(
            &index,
            &metas,
            ScoreWeights::default(),
            DEFAULT_MATCH_THRESHOLD,
        );
        let mut c = child("c1", "build module x please");
        c.workspace = Some("/home/project".to_string());
        c.created_at = Some(ts(200));

        let matches = matcher.find_best_matches(&c);
        assert_eq!(matches[0].owner_task_id, "near");
    }

    #[test]
    fn ties_prefer_closest_earlier_creation() {
        let mut index = InstructionIndex::new(DEFAULT_MAX_PREFIX_LEN);
        index.add("old", "build module x");
        index.add("recent", "build module x");
        index.add("later", "build module x");

        let mut metas = HashMap::new();
        metas.insert(
            "old".to_string(),
            CandidateMeta {
                workspace: None,
                created_at: Some(ts(10)),
            },
        );
        metas.insert(
            "recent".to_string(),
            CandidateMeta {
                workspace: None,
                created_at: Some(ts(190)),
            },
        );
        metas.insert(
            "later".to_string(),
            CandidateMeta {
                workspace: None,
                created_at: Some(ts(500)),
            },
        );

        let matcher = Matcher::new(
            &index,
            &metas,
            ScoreWeights::default(),
            DEFAULT_MATCH_THRESHOLD,
        );
        let mut c = child("c1", "build module x please");
        c.created_at = Some(ts(200));

        let matches = matcher.find_best_matches(&c);
        assert_eq!(matches[0].owner_task_id, "recent");
        // Candidate created after the child ranks behind both earlier ones.
        assert_eq!(matches[2].owner_task_id, "later");
    }

    #[test]
    fn best_entry_per_owner_wins() {
        let mut index = InstructionIndex::new(DEFAULT_MAX_PREFIX_LEN);
        index.add("parent", "build module x");
        index.add("parent", "build module x with docs and benchmarks");
        let metas = HashMap::new();
        let matcher = Matcher::new(
            &index,
            &metas,
            ScoreWeights::default(),
            DEFAULT_MATCH_THRESHOLD,
        );

        let matches = matcher.find_best_matches(&child("c1", "build module x"));
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn score_is_bounded() {
        let mut index = InstructionIndex::new(DEFAULT_MAX_PREFIX_LEN);
        index.add("parent", "build module x");
        let metas = HashMap::new();
        let matcher = Matcher::new(&index, &metas, ScoreWeights::default(), 0.0);

        let (score, _) = matcher.score_pair("build module x", "build module x");
        assert!(score <= 1.0 && score >= 0.99);
        let (score, _) = matcher.score_pair("totally different words", "build module x");
        assert!((0.0..=1.0).contains(&score));
    }
}
