//! Companion-document path templating.
//!
//! Templates resolve `{{placeholder}}` tokens against a record and a supplied
//! clock. Every substituted value except `{{folder}}` is sanitized before
//! insertion so record text can never introduce path separators; the final
//! segments are sanitized again to catch literal template text. Unknown
//! placeholders resolve to nothing, and the result always carries the `.md`
//! extension.
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `{{folder}}` | Directory of the primary file |
//! | `{{name}}` | Primary file name without extension |
//! | `{{title}}` | Record title |
//! | `{{author}}` | Record author |
//! | `{{year}}` | Record year |
//! | `{{type}}` | Primary file extension |
//! | `{{key}}` | Identity key |
//! | `{{publisher}}` | Record publisher |
//! | `{{tier}}` | Record tier |
//! | `{{date}}` | Current date, `YYYY-MM-DD` |
//! | `{{time}}` | Current time, `HHMM` |

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::models::Record;
use crate::paths;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{[^{}]*\}\}").unwrap())
}

/// Resolve a companion path template for one record. The result is a
/// sanitized, vault-relative `.md` path.
pub fn render_companion_path(record: &Record, template: &str, now: DateTime<Utc>) -> String {
    let folder = paths::parent(&record.file_path).to_string();
    let date = now.format("%Y-%m-%d").to_string();
    let time = now.format("%H%M").to_string();

    let substitutions: [(&str, String); 11] = [
        ("{{folder}}", folder),
        ("{{name}}", clean(paths::file_stem(&record.file_name))),
        ("{{title}}", clean(&record.title)),
        ("{{author}}", clean(record.author.as_deref().unwrap_or(""))),
        ("{{year}}", clean(record.year.as_deref().unwrap_or(""))),
        ("{{type}}", clean(&record.file_type)),
        ("{{key}}", clean(record.identity_key.as_deref().unwrap_or(""))),
        (
            "{{publisher}}",
            clean(record.publisher.as_deref().unwrap_or("")),
        ),
        ("{{tier}}", clean(record.tier.as_deref().unwrap_or(""))),
        ("{{date}}", date),
        ("{{time}}", time),
    ];

    let mut resolved = template.to_string();
    for (token, value) in &substitutions {
        if resolved.contains(token) {
            resolved = resolved.replace(token, value);
        }
    }
    // Anything left in braces was not a known placeholder.
    let mut resolved = placeholder_re().replace_all(&resolved, "").to_string();

    if !resolved.to_ascii_lowercase().ends_with(".md") {
        resolved.push_str(".md");
    }
    let without_ext = &resolved[..resolved.len() - 3];

    let mut parts: Vec<String> = without_ext
        .split('/')
        .map(paths::sanitize_file_name)
        .collect();
    let mut stem = parts.pop().unwrap_or_default();
    let dirs: Vec<String> = parts.into_iter().filter(|s| !s.is_empty()).collect();

    if stem.is_empty() {
        stem = paths::sanitize_file_name(&record.title);
    }
    if stem.is_empty() {
        stem = record.id.clone();
    }

    let file = format!("{}.md", stem);
    if dirs.is_empty() {
        file
    } else {
        format!("{}/{}", dirs.join("/"), file)
    }
}

fn clean(value: &str) -> String {
    paths::sanitize_file_name(value)
}
