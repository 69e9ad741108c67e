//! Companion-document header format.
//!
//! A companion document is a machine-owned header between a fixed marker
//! pair, followed by a user-owned body between a second marker pair:
//!
//! ```text
//! ---
//! title: A Study of Things
//! author: Doe, J.
//! identity-key: 10.1/ABC
//! file-path: papers/a-study.pdf
//! tags:
//!   - alpha
//! references:
//!   - source: notes/survey.md
//!     name: survey
//!     line: 12
//!     strategy: link
//! citation: |
//!   Doe, J. (2001). A Study of Things.
//! ---
//!
//! # A Study of Things
//!
//! <!-- notes:start -->
//! ...user content, never touched by regeneration...
//! <!-- notes:end -->
//! ```
//!
//! The format stays line-oriented and human-editable; parsing is an explicit
//! state machine over lines so malformed input handling is deterministic.
//! Unknown keys and malformed lines are skipped, never fatal.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::{MatchStrategy, Record, ReferenceEntry};
use crate::paths;

pub const HEADER_MARKER: &str = "---";
pub const BODY_START: &str = "<!-- notes:start -->";
pub const BODY_END: &str = "<!-- notes:end -->";

/// Body emitted for a record that has no preserved user content yet.
pub const DEFAULT_BODY: &str = "## Summary\n\n## Key points\n\n## Quotes\n";

/// Header fields recovered from a companion document. Missing fields mean
/// the document (the source of truth) does not carry them.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParsedHeader {
    pub title: Option<String>,
    pub author: Option<String>,
    pub year: Option<String>,
    pub identity_key: Option<String>,
    pub publisher: Option<String>,
    pub tier: Option<String>,
    pub tags: Vec<String>,
    pub references: Vec<ReferenceEntry>,
    pub citation: Option<String>,
}

/// Render a full companion document: header, display heading, and the body
/// wrapped in its marker pair.
pub fn render_document(record: &Record, body: &str) -> String {
    let mut out = render_header(record);
    out.push('\n');
    out.push_str(&format!("# {}\n", single_line(&record.title)));
    out.push('\n');
    out.push_str(BODY_START);
    out.push('\n');
    if !body.is_empty() {
        out.push_str(body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push_str(BODY_END);
    out.push('\n');
    out
}

/// Render only the delimited header block, trailing newline included.
pub fn render_header(record: &Record) -> String {
    let mut out = String::new();
    out.push_str(HEADER_MARKER);
    out.push('\n');

    push_field(&mut out, "title", Some(&record.title));
    push_field(&mut out, "author", record.author.as_deref());
    push_field(&mut out, "year", record.year.as_deref());
    push_field(&mut out, "identity-key", record.identity_key.as_deref());
    push_field(&mut out, "publisher", record.publisher.as_deref());
    push_field(&mut out, "tier", record.tier.as_deref());
    push_field(&mut out, "file-path", Some(&record.file_path));
    push_field(&mut out, "file-name", Some(&record.file_name));
    push_field(&mut out, "file-type", Some(&record.file_type));
    if let Some(size) = record.file_size {
        out.push_str(&format!("file-size: {}\n", size));
    }
    if let Some(ts) = record.last_synced_at {
        out.push_str(&format!("last-synced: {}\n", format_ts(ts)));
    }
    out.push_str(&format!("reference-count: {}\n", record.reference_count));

    let tags: Vec<&str> = record
        .tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if !tags.is_empty() {
        out.push_str("tags:\n");
        for tag in tags {
            out.push_str(&format!("  - {}\n", single_line(tag)));
        }
    }

    if !record.references.is_empty() {
        out.push_str("references:\n");
        for entry in &record.references {
            out.push_str(&format!("  - source: {}\n", single_line(&entry.source_path)));
            out.push_str(&format!("    name: {}\n", single_line(&entry.source_name)));
            if let Some(line) = entry.line {
                out.push_str(&format!("    line: {}\n", line));
            }
            out.push_str(&format!("    strategy: {}\n", entry.strategy.as_str()));
            if let Some(context) = &entry.context {
                push_field(&mut out, "    context", Some(context));
            }
        }
    }

    if let Some(citation) = record
        .citation_text
        .as_deref()
        .map(str::trim_end)
        .filter(|c| !c.is_empty())
    {
        out.push_str("citation: |\n");
        for line in citation.lines() {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
    }

    out.push_str(HEADER_MARKER);
    out.push('\n');
    out
}

fn push_field(out: &mut String, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        let cleaned = single_line(value);
        if !cleaned.is_empty() {
            out.push_str(&format!("{}: {}\n", key, cleaned));
        }
    }
}

/// Header values are single-line by contract.
fn single_line(value: &str) -> String {
    value.replace(['\n', '\r'], " ").trim().to_string()
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// The user-owned region between the body markers, exclusive. `None` when
/// either marker is missing.
pub fn extract_body(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.iter().position(|l| l.trim() == BODY_START)?;
    let end = lines[start + 1..]
        .iter()
        .position(|l| l.trim() == BODY_END)?
        + start
        + 1;
    Some(lines[start + 1..end].join("\n"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    Header,
    Tags,
    References,
    Citation,
}

#[derive(Default)]
struct RefBuilder {
    source: Option<String>,
    name: Option<String>,
    line: Option<usize>,
    strategy: Option<MatchStrategy>,
    context: Option<String>,
}

impl RefBuilder {
    fn build(self) -> Option<ReferenceEntry> {
        let source = self.source.filter(|s| !s.is_empty())?;
        let strategy = self.strategy?;
        let name = self
            .name
            .unwrap_or_else(|| paths::file_stem(&source).to_string());
        Some(ReferenceEntry {
            source_path: source,
            source_name: name,
            line: self.line,
            context: self.context,
            strategy,
        })
    }
}

/// Parse the delimited header block out of a companion document.
///
/// Tolerant by design: lines that do not fit the expected shape are skipped,
/// entries missing a source or a valid strategy are dropped, and a document
/// without a header yields an empty [`ParsedHeader`].
pub fn parse_header(text: &str) -> ParsedHeader {
    let mut out = ParsedHeader::default();
    let lines: Vec<&str> = text.lines().collect();
    let mut state = State::Preamble;
    let mut current_ref: Option<RefBuilder> = None;
    let mut citation_lines: Vec<String> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        match state {
            State::Preamble => {
                if line.trim() == HEADER_MARKER {
                    state = State::Header;
                }
                i += 1;
            }
            State::Header => {
                let trimmed = line.trim();
                if trimmed == HEADER_MARKER {
                    break;
                }
                if trimmed == "tags:" {
                    state = State::Tags;
                } else if trimmed == "references:" {
                    state = State::References;
                } else if trimmed == "citation: |" {
                    state = State::Citation;
                } else if let Some((key, value)) = split_kv(trimmed) {
                    apply_scalar(&mut out, key, value);
                }
                i += 1;
            }
            State::Tags => {
                if let Some(item) = list_item(line) {
                    if !item.is_empty() {
                        out.tags.push(item.to_string());
                    }
                    i += 1;
                } else {
                    // Not a list item: hand the line back to the header state.
                    state = State::Header;
                }
            }
            State::References => {
                let trimmed = line.trim_start();
                if let Some(rest) = trimmed.strip_prefix("- ") {
                    if let Some(entry) = current_ref.take().and_then(RefBuilder::build) {
                        out.references.push(entry);
                    }
                    let mut builder = RefBuilder::default();
                    if let Some((key, value)) = split_kv(rest.trim()) {
                        apply_ref_field(&mut builder, key, value);
                    }
                    current_ref = Some(builder);
                    i += 1;
                } else if line.starts_with(char::is_whitespace) && !trimmed.is_empty() {
                    if let Some(builder) = current_ref.as_mut() {
                        if let Some((key, value)) = split_kv(trimmed) {
                            apply_ref_field(builder, key, value);
                        }
                    }
                    i += 1;
                } else {
                    if let Some(entry) = current_ref.take().and_then(RefBuilder::build) {
                        out.references.push(entry);
                    }
                    state = State::Header;
                }
            }
            State::Citation => {
                if let Some(stripped) = line.strip_prefix("  ") {
                    citation_lines.push(stripped.to_string());
                    i += 1;
                } else if line.trim().is_empty() {
                    citation_lines.push(String::new());
                    i += 1;
                } else {
                    state = State::Header;
                }
            }
        }
    }

    if let Some(entry) = current_ref.take().and_then(RefBuilder::build) {
        out.references.push(entry);
    }
    while citation_lines.last().is_some_and(|l| l.is_empty()) {
        citation_lines.pop();
    }
    if !citation_lines.is_empty() {
        out.citation = Some(citation_lines.join("\n"));
    }

    out
}

fn split_kv(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

fn list_item(line: &str) -> Option<&str> {
    line.trim_start().strip_prefix("- ").map(str::trim)
}

fn apply_scalar(out: &mut ParsedHeader, key: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    let value = value.to_string();
    match key {
        "title" => out.title = Some(value),
        "author" => out.author = Some(value),
        "year" => out.year = Some(value),
        "identity-key" => out.identity_key = Some(value),
        "publisher" => out.publisher = Some(value),
        "tier" => out.tier = Some(value),
        // Inline citation, for hand-written headers.
        "citation" => {
            if value != "|" {
                out.citation = Some(value);
            }
        }
        // Machine-owned keys (file binding, sync state, counts) and anything
        // unrecognized are skipped.
        _ => {}
    }
}

fn apply_ref_field(builder: &mut RefBuilder, key: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    match key {
        "source" => builder.source = Some(value.to_string()),
        "name" => builder.name = Some(value.to_string()),
        "line" => builder.line = value.parse().ok(),
        "strategy" => builder.strategy = MatchStrategy::parse(value),
        "context" => builder.context = Some(value.to_string()),
        _ => {}
    }
}
