//! Compressed prefix tree over normalized instruction strings.
//!
//! Edges carry string fragments (radix compression) so the large shared
//! prefixes of near-identical instructions are stored once. Terminal nodes
//! hold entry ids into the index's instruction arena.
//!
//! # Invariants
//! - No node has two children whose labels start with the same character.
//! - Every non-root label is non-empty.

/// Result of walking a query through the trie.
///
/// `path_ids` and `extension_ids` are in a strict prefix relationship with
/// the query. `overlap` holds entries that merely share a leading fragment,
/// each tagged with the shared byte length so the caller can require a
/// minimum overlap.
#[derive(Debug, Default)]
pub struct TrieHits {
    /// Entries whose stored prefix is a prefix of the query (or equals it).
    pub path_ids: Vec<usize>,
    /// Entries for which the query is a strict prefix of the stored prefix.
    pub extension_ids: Vec<usize>,
    /// `(entry_id, shared_bytes)` for entries sharing a leading fragment.
    pub overlap: Vec<(usize, usize)>,
    /// Bytes of the query consumed before the walk stopped.
    pub matched_len: usize,
}

#[derive(Debug, Default)]
struct Node {
    label: String,
    entry_ids: Vec<usize>,
    children: Vec<Node>,
}

/// Radix trie mapping normalized prefixes to entry ids.
#[derive(Debug, Default)]
pub struct PrefixTrie {
    root: Node,
    len: usize,
}

impl PrefixTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of inserted keys (duplicates counted).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert `key` pointing at `entry_id`. Empty keys are ignored.
    pub fn insert(&mut self, key: &str, entry_id: usize) {
        if key.is_empty() {
            return;
        }
        self.len += 1;

        let mut node = &mut self.root;
        let mut rest = key.to_string();
        loop {
            let first = match rest.chars().next() {
                Some(c) => c,
                None => {
                    node.entry_ids.push(entry_id);
                    return;
                }
            };

            let pos = node
                .children
                .iter()
                .position(|c| c.label.chars().next() == Some(first));

            let i = match pos {
                Some(i) => i,
                None => {
                    node.children.push(Node {
                        label: rest,
                        entry_ids: vec![entry_id],
                        children: Vec::new(),
                    });
                    return;
                }
            };

            let common = common_prefix_len(&node.children[i].label, &rest);
            let child = &mut node.children[i];

            if common == child.label.len() {
                if common == rest.len() {
                    // Exact key already present; attach the new entry here.
                    child.entry_ids.push(entry_id);
                    return;
                }
                rest = rest[common..].to_string();
                node = &mut node.children[i];
                continue;
            }

            // Diverged inside the edge: split it.
            let carried = Node {
                label: child.label[common..].to_string(),
                entry_ids: std::mem::take(&mut child.entry_ids),
                children: std::mem::take(&mut child.children),
            };
            child.label.truncate(common);
            child.children.push(carried);

            if common == rest.len() {
                child.entry_ids.push(entry_id);
            } else {
                child.children.push(Node {
                    label: rest[common..].to_string(),
                    entry_ids: vec![entry_id],
                    children: Vec::new(),
                });
            }
            return;
        }
    }

    /// Walk `query` down the trie and classify every nearby entry.
    ///
    /// Sibling branches are reported as overlap only at the deepest matched
    /// node; shallower branches share too little to be worth scoring.
    pub fn lookup(&self, query: &str) -> TrieHits {
        let mut hits = TrieHits::default();
        if query.is_empty() {
            return hits;
        }

        let mut node = &self.root;
        let mut rest = query;
        let mut boundary = 0usize;

        loop {
            let first = match rest.chars().next() {
                Some(c) => c,
                None => break,
            };

            let walked = match node
                .children
                .iter()
                .position(|c| c.label.chars().next() == Some(first))
            {
                Some(i) => i,
                None => {
                    // Dead end at a node boundary: every branch below shares
                    // exactly `boundary` bytes with the query.
                    hits.matched_len = boundary;
                    for child in &node.children {
                        collect_overlap(child, boundary, &mut hits.overlap);
                    }
                    return hits;
                }
            };

            let child = &node.children[walked];
            let common = common_prefix_len(&child.label, rest);

            if common == child.label.len() {
                hits.path_ids.extend(&child.entry_ids);
                boundary += common;
                rest = &rest[common..];
                if rest.is_empty() {
                    hits.matched_len = boundary;
                    for grandchild in &child.children {
                        collect_subtree(grandchild, &mut hits.extension_ids);
                    }
                    for (i, sibling) in node.children.iter().enumerate() {
                        if i != walked {
                            collect_overlap(sibling, boundary - common, &mut hits.overlap);
                        }
                    }
                    return hits;
                }
                node = child;
                continue;
            }

            // Stopped partway down an edge.
            hits.matched_len = boundary + common;
            for (i, sibling) in node.children.iter().enumerate() {
                if i != walked {
                    collect_overlap(sibling, boundary, &mut hits.overlap);
                }
            }
            if common == rest.len() {
                // Query ended inside the edge: the subtree extends it.
                collect_subtree(child, &mut hits.extension_ids);
            } else {
                collect_overlap(child, boundary + common, &mut hits.overlap);
            }
            return hits;
        }

        hits.matched_len = boundary;
        hits
    }
}

/// Collect all entry ids at and below `node`, iteratively.
fn collect_subtree(node: &Node, out: &mut Vec<usize>) {
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        out.extend(&n.entry_ids);
        for child in &n.children {
            stack.push(child);
        }
    }
}

/// Collect `(entry_id, shared)` for every entry at and below `node`.
fn collect_overlap(node: &Node, shared: usize, out: &mut Vec<(usize, usize)>) {
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        out.extend(n.entry_ids.iter().map(|&id| (id, shared)));
        for child in &n.children {
            stack.push(child);
        }
    }
}

/// Byte length of the longest common prefix, on char boundaries.
fn common_prefix_len(a: &str, b: &str) -> usize {
    let mut len = 0;
    let mut ai = a.chars();
    let mut bi = b.chars();
    loop {
        match (ai.next(), bi.next()) {
            (Some(x), Some(y)) if x == y => len += x.len_utf8(),
            _ => return len,
        }
    }
}
