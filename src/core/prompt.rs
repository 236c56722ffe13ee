// Shared prompt fragments
use super::types::{truncate_chars, FileIndex, SourceFile};

pub fn is_english(language: &str) -> bool {
    let normalized = language.trim().to_lowercase();
    normalized.is_empty() || normalized == "english" || normalized == "en"
}

/// "French" from "french"
pub fn display_language(language: &str) -> String {
    let trimmed = language.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => "English".to_string(),
    }
}

/// Instruction to write `subject` in the tutorial language, or nothing for English
pub fn language_instruction(language: &str, subject: &str) -> Option<String> {
    if is_english(language) {
        return None;
    }
    Some(format!(
        "IMPORTANT: Write {} in **{}**. Keep indices, file paths, code and YAML keys unchanged.\n",
        subject,
        display_language(language)
    ))
}

/// `--- File: {i} # {path} ---` sections, each truncated to `max_chars`.
/// Indices that don't resolve and repeats are skipped.
pub fn file_excerpts(files: &[SourceFile], indices: &[FileIndex], max_chars: usize) -> String {
    let mut seen = std::collections::HashSet::new();
    let mut out = String::new();
    for &index in indices {
        let Some(file) = files.get(index) else {
            continue;
        };
        if !seen.insert(index) {
            continue;
        }
        let text = file.text();
        let excerpt = truncate_chars(&text, max_chars);
        out.push_str(&format!("--- File: {} # {} ---\n{}\n", index, file.path, excerpt));
        if excerpt.len() < text.len() {
            out.push_str("... (truncated)\n");
        }
        out.push('\n');
    }
    out
}
