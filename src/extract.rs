//! Sub-instruction extraction from parent task text.
//!
//! Parses the raw text of a parent task to recover the instructions it
//! issued to child tasks. Looks for patterns like:
//! - "Subtask: build the parser module" (spawn directives)
//! - fenced code blocks tagged with a language
//! - bullet / numbered list items
//! - headings and block quotes
//!
//! A fixed-length window of raw text rarely lines up with an instruction
//! boundary, so extraction is structural: each pattern scans the whole
//! text independently and the results are merged in priority order.

use regex::Regex;

/// Instructions shorter than this are discarded as noise.
pub const MIN_INSTRUCTION_LEN: usize = 8;

/// Extract declared sub-task instructions from raw parent text.
///
/// Returns trimmed, non-empty instructions in priority order (spawn
/// directives first), preserving source order within each pattern.
/// Duplicates are allowed; deduplication happens at index time.
/// Text with no structural markup yields an empty vector, never an error.
pub fn extract_instructions(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut instructions = Vec::new();
    instructions.extend(extract_spawn_directives(text));
    instructions.extend(extract_tagged_code_blocks(text));
    instructions.extend(extract_bullet_items(text));
    instructions.extend(extract_numbered_items(text));
    instructions.extend(extract_headings(text));
    instructions.extend(extract_block_quotes(text));

    instructions.retain(|i| i.len() >= MIN_INSTRUCTION_LEN);

    if instructions.is_empty() {
        tracing::debug!("no structured instructions found in {} chars", text.len());
    }

    instructions
}

/// Pattern 1: explicit spawn directives with a message body.
///
/// Matches: "Subtask: ...", "Sub-task 2: ...", "Task: ...",
/// "Spawning subtask: ..."
fn extract_spawn_directives(text: &str) -> Vec<String> {
    let pattern =
        Regex::new(r"(?im)^\s*(?:spawn(?:ing)?\s+)?(?:sub-?)?task(?:\s+\d+)?\s*:\s*(\S.*)$")
            .unwrap();

    pattern
        .captures_iter(text)
        .map(|cap| cap[1].trim().to_string())
        .collect()
}

/// Pattern 2: fenced code blocks tagged with a language.
///
/// A tagged fence is a deliberate payload (a script or snippet the parent
/// handed to a child), so it is re-emitted as `"<language>: <code>"` with
/// the code flattened onto one line.
fn extract_tagged_code_blocks(text: &str) -> Vec<String> {
    let pattern = Regex::new(r"(?s)```([A-Za-z][A-Za-z0-9_+-]*)[ \t]*\n(.*?)```").unwrap();

    pattern
        .captures_iter(text)
        .filter_map(|cap| {
            let language = cap[1].to_lowercase();
            let code = cap[2].split_whitespace().collect::<Vec<_>>().join(" ");
            if code.is_empty() {
                None
            } else {
                Some(format!("{}: {}", language, code))
            }
        })
        .collect()
}

/// Pattern 3: bullet list items (`-`, `*`, `+`).
fn extract_bullet_items(text: &str) -> Vec<String> {
    let pattern = Regex::new(r"(?m)^\s*[-*+]\s+(.+)$").unwrap();
    capture_lines(&pattern, text)
}

/// Pattern 4: numbered list items (`1.` or `1)`).
fn extract_numbered_items(text: &str) -> Vec<String> {
    let pattern = Regex::new(r"(?m)^\s*\d{1,3}[.)]\s+(.+)$").unwrap();
    capture_lines(&pattern, text)
}

/// Pattern 5: headings.
fn extract_headings(text: &str) -> Vec<String> {
    let pattern = Regex::new(r"(?m)^\s*#{1,6}\s+(.+)$").unwrap();
    capture_lines(&pattern, text)
}

/// Pattern 6: block quotes.
fn extract_block_quotes(text: &str) -> Vec<String> {
    let pattern = Regex::new(r"(?m)^\s*>\s+(.+)$").unwrap();
    capture_lines(&pattern, text)
}

fn capture_lines(pattern: &Regex, text: &str) -> Vec<String> {
    pattern
        .captures_iter(text)
        .map(|cap| cap[1].trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}
