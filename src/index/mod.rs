//! In-memory instruction index.
//!
//! Stores every declared sub-instruction of a task corpus, keyed by a
//! normalized bounded prefix, and answers candidate queries for the
//! matcher. The index is pass-scoped: the orchestrator builds one, runs
//! its queries, and drops it. Nothing persists between passes.

mod trie;

pub use trie::{PrefixTrie, TrieHits};

use std::collections::{HashMap, HashSet};

use crate::extract::extract_instructions;

/// Default bound on normalized prefix length, in bytes.
pub const DEFAULT_MAX_PREFIX_LEN: usize = 192;

/// Minimum shared-prefix length for a non-prefix trie hit to qualify.
const MIN_WALK_OVERLAP: usize = 8;

/// One indexed declared instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedInstruction {
    /// Case-folded, whitespace-collapsed, bounded prefix of the instruction.
    pub normalized_prefix: String,
    /// Task that declared (issued) this instruction.
    pub owner_task_id: String,
    /// The instruction as extracted, before normalization.
    pub original_text: String,
}

/// Prefix-searchable index over declared sub-instructions.
pub struct InstructionIndex {
    trie: PrefixTrie,
    entries: Vec<IndexedInstruction>,
    seen: HashSet<(String, String)>,
    token_doc_freq: HashMap<String, usize>,
    max_prefix_len: usize,
}

impl InstructionIndex {
    pub fn new(max_prefix_len: usize) -> Self {
        Self {
            trie: PrefixTrie::new(),
            entries: Vec::new(),
            seen: HashSet::new(),
            token_doc_freq: HashMap::new(),
            max_prefix_len,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add one declared instruction for `owner_task_id`.
    ///
    /// Idempotent per `(owner, normalized_prefix)`: re-adding the same
    /// instruction for the same owner returns `false` and stores nothing.
    pub fn add(&mut self, owner_task_id: &str, raw_instruction: &str) -> bool {
        let normalized = normalize(raw_instruction, self.max_prefix_len);
        if normalized.is_empty() {
            return false;
        }

        let key = (owner_task_id.to_string(), normalized.clone());
        if !self.seen.insert(key) {
            return false;
        }

        let entry_id = self.entries.len();
        for token in distinct_tokens(&normalized) {
            *self.token_doc_freq.entry(token.to_string()).or_insert(0) += 1;
        }
        self.entries.push(IndexedInstruction {
            normalized_prefix: normalized.clone(),
            owner_task_id: owner_task_id.to_string(),
            original_text: raw_instruction.trim().to_string(),
        });
        self.trie.insert(&normalized, entry_id);
        tracing::trace!(owner = owner_task_id, prefix = %normalized, "indexed instruction");
        true
    }

    /// Run the extractor over raw parent text and index every result.
    ///
    /// Returns the number of entries actually inserted (extraction misses
    /// and duplicates both shrink this count; neither is an error).
    pub fn add_all_from_parent_text(&mut self, owner_task_id: &str, parent_text: &str) -> usize {
        extract_instructions(parent_text)
            .iter()
            .filter(|instruction| self.add(owner_task_id, instruction))
            .count()
    }

    /// Return entries in a prefix relationship with `text`, plus tree-walk
    /// overlap hits sharing at least [`MIN_WALK_OVERLAP`] bytes.
    ///
    /// Never fails: an empty index, or text that normalizes to nothing,
    /// yields an empty result.
    pub fn query_candidates(&self, text: &str) -> Vec<&IndexedInstruction> {
        let query = normalize(text, self.max_prefix_len);
        if query.is_empty() || self.entries.is_empty() {
            return Vec::new();
        }

        let hits = self.trie.lookup(&query);
        let mut ids: Vec<usize> = Vec::new();
        let mut picked: HashSet<usize> = HashSet::new();

        for id in hits.path_ids.iter().chain(hits.extension_ids.iter()) {
            if picked.insert(*id) {
                ids.push(*id);
            }
        }
        for &(id, shared) in &hits.overlap {
            if shared >= MIN_WALK_OVERLAP && picked.insert(id) {
                ids.push(id);
            }
        }

        tracing::trace!(
            query = %query,
            candidates = ids.len(),
            matched_len = hits.matched_len,
            "index query"
        );
        ids.into_iter().map(|id| &self.entries[id]).collect()
    }

    /// Rarity weight for a token, derived from document frequency across
    /// all indexed entries. Rare tokens weigh close to 1, ubiquitous ones
    /// approach the floor.
    pub fn token_weight(&self, token: &str) -> f64 {
        let df = self.token_doc_freq.get(token).copied().unwrap_or(0);
        1.0 / (1.0 + df as f64 / 2.0)
    }

    /// Normalize text the way entries were normalized (for callers that
    /// need to compare against `normalized_prefix`).
    pub fn normalize_query(&self, text: &str) -> String {
        normalize(text, self.max_prefix_len)
    }
}

/// Normalize instruction text: case-fold, collapse whitespace, strip
/// unsafe characters, truncate to `max_len` bytes without splitting a word.
///
/// A single word longer than `max_len` is cut on a char boundary instead
/// of producing an empty result.
pub fn normalize(text: &str, max_len: usize) -> String {
    let folded = text.to_lowercase();
    let mut out = String::new();

    for raw in folded.split_whitespace() {
        let cleaned: String = raw.chars().filter(|c| is_safe_char(*c)).collect();
        if cleaned.is_empty() {
            continue;
        }
        let needed = if out.is_empty() {
            cleaned.len()
        } else {
            cleaned.len() + 1
        };
        if out.len() + needed > max_len {
            if out.is_empty() {
                out = truncate_on_char_boundary(&cleaned, max_len);
            }
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&cleaned);
    }

    out
}

fn is_safe_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':')
}

fn truncate_on_char_boundary(s: &str, max_len: usize) -> String {
    let mut end = 0;
    for (i, c) in s.char_indices() {
        if i + c.len_utf8() > max_len {
            break;
        }
        end = i + c.len_utf8();
    }
    s[..end].to_string()
}

fn distinct_tokens(s: &str) -> HashSet<&str> {
    s.split_whitespace().collect()
}
