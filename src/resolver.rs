//! Reference resolution: which documents mention which records.
//!
//! Strategies are tried in a fixed order for each record/document pair; the
//! first one that yields at least one match wins and later strategies are
//! not consulted. This exclusive-escalation policy is deliberate and load-
//! bearing for compatibility: a document that both links to a file and
//! repeats its title produces exactly one `link` entry, never two.
//!
//! Within one strategy, multiple matches on the same line collapse to a
//! single entry (line number is the de-duplication key). The full-corpus
//! driver is idempotent: an unchanged corpus yields identical reference
//! lists, ordered by document enumeration order and then by line.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::config::ResolverConfig;
use crate::host::{ContentStore, DocumentIndex, DocumentInfo, IndexedLink};
use crate::models::{MatchStrategy, Record, ReferenceEntry};
use crate::paths;

/// Words too common to identify a title. Words of length <= 3 are dropped
/// before this list applies.
const STOP_WORDS: &[&str] = &[
    "about", "after", "again", "also", "because", "been", "before", "being",
    "between", "from", "have", "into", "more", "most", "other", "over",
    "same", "some", "such", "than", "that", "their", "them", "then", "there",
    "these", "they", "this", "those", "through", "under", "very", "what",
    "when", "where", "which", "will", "with", "your",
];

#[derive(Debug, Default, Clone)]
pub struct RecomputeSummary {
    pub documents_scanned: usize,
    pub documents_skipped: usize,
    pub references_found: usize,
}

pub struct ReferenceResolver {
    content: Arc<dyn ContentStore>,
    index: Arc<dyn DocumentIndex>,
    cfg: ResolverConfig,
}

impl ReferenceResolver {
    pub fn new(
        content: Arc<dyn ContentStore>,
        index: Arc<dyn DocumentIndex>,
        cfg: ResolverConfig,
    ) -> Self {
        Self { content, index, cfg }
    }

    /// Resolve every mention of `record` in one document.
    pub async fn resolve_for_document(
        &self,
        record: &Record,
        doc: &DocumentInfo,
    ) -> Result<Vec<ReferenceEntry>> {
        let text = self.content.read_text(&doc.path).await?;
        let links = self.index.links_in(&doc.path).await?;
        Ok(self.resolve_with(record, doc, &text, &links))
    }

    /// Zero every record's reference fields, then scan the full corpus and
    /// accumulate. A failure on one document skips that document only.
    pub async fn recompute_all(&self, records: &mut [Record]) -> Result<RecomputeSummary> {
        self.recompute_all_with(records, 0, Duration::ZERO).await
    }

    /// [`recompute_all`](Self::recompute_all) with an inter-batch yield so
    /// the host's own background indexing is not starved. A `batch_size` of
    /// zero disables batching.
    pub async fn recompute_all_with(
        &self,
        records: &mut [Record],
        batch_size: usize,
        delay: Duration,
    ) -> Result<RecomputeSummary> {
        for record in records.iter_mut() {
            record.references.clear();
            record.reference_count = 0;
        }

        let docs = self.index.text_documents().await?;
        let mut summary = RecomputeSummary::default();

        for (i, doc) in docs.iter().enumerate() {
            if batch_size > 0 && i > 0 && i % batch_size == 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let text = match self.content.read_text(&doc.path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %doc.path, "skipping unreadable document: {e}");
                    summary.documents_skipped += 1;
                    continue;
                }
            };
            let links = match self.index.links_in(&doc.path).await {
                Ok(links) => links,
                Err(e) => {
                    warn!(path = %doc.path, "skipping unindexable document: {e}");
                    summary.documents_skipped += 1;
                    continue;
                }
            };

            for record in records.iter_mut() {
                let entries = self.resolve_with(record, doc, &text, &links);
                summary.references_found += entries.len();
                record.references.extend(entries);
                record.reference_count = record.references.len();
            }
            summary.documents_scanned += 1;
        }

        Ok(summary)
    }

    /// Strategy cascade over already-loaded document text and links.
    pub fn resolve_with(
        &self,
        record: &Record,
        doc: &DocumentInfo,
        text: &str,
        links: &[IndexedLink],
    ) -> Vec<ReferenceEntry> {
        // A record's own companion embeds its key and title; only *other*
        // documents count as mentions.
        if record.companion_path.as_deref() == Some(doc.path.as_str()) {
            return Vec::new();
        }

        let hits = self.match_links(record, doc, text, links);
        if !hits.is_empty() {
            return hits;
        }
        let hits = self.match_identity_key(record, doc, text);
        if !hits.is_empty() {
            return hits;
        }
        let hits = self.match_file_name(record, doc, text);
        if !hits.is_empty() {
            return hits;
        }
        let hits = self.match_title(record, doc, text);
        if !hits.is_empty() {
            return hits;
        }
        self.match_author(record, doc, text)
    }

    fn match_links(
        &self,
        record: &Record,
        doc: &DocumentInfo,
        text: &str,
        links: &[IndexedLink],
    ) -> Vec<ReferenceEntry> {
        let mut by_line: BTreeMap<usize, ReferenceEntry> = BTreeMap::new();
        for link in links {
            let target = normalize_link_target(&link.target);
            if target.is_empty() {
                continue;
            }
            let matched = target.eq_ignore_ascii_case(&record.file_name)
                || target.eq_ignore_ascii_case(&record.file_path);
            if !matched {
                continue;
            }
            by_line.entry(link.line).or_insert_with(|| ReferenceEntry {
                source_path: doc.path.clone(),
                source_name: doc.name.clone(),
                line: Some(link.line),
                context: self.line_context(text, link.line),
                strategy: MatchStrategy::Link,
            });
        }
        by_line.into_values().collect()
    }

    fn match_identity_key(
        &self,
        record: &Record,
        doc: &DocumentInfo,
        text: &str,
    ) -> Vec<ReferenceEntry> {
        let Some(key) = record
            .identity_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
        else {
            return Vec::new();
        };
        self.scan(doc, text, &regex::escape(key), MatchStrategy::IdentityKey)
    }

    fn match_file_name(
        &self,
        record: &Record,
        doc: &DocumentInfo,
        text: &str,
    ) -> Vec<ReferenceEntry> {
        let stem = paths::file_stem(&record.file_name);
        if stem.is_empty() {
            return Vec::new();
        }
        let pattern = format!(r"\b{}\b", regex::escape(stem));
        self.scan(doc, text, &pattern, MatchStrategy::FileName)
    }

    fn match_title(&self, record: &Record, doc: &DocumentInfo, text: &str) -> Vec<ReferenceEntry> {
        let words: Vec<String> = record
            .title
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| w.chars().count() > 3)
            .filter(|w| !STOP_WORDS.contains(&w.to_lowercase().as_str()))
            .map(regex::escape)
            .collect();
        if words.is_empty() {
            return Vec::new();
        }

        // Union of all keyword matches, deduplicated by line.
        let mut by_line: BTreeMap<usize, usize> = BTreeMap::new();
        for word in &words {
            let pattern = format!(r"\b{}\b", word);
            for offset in self.find_offsets(&pattern, text) {
                let line = line_of(text, offset);
                let slot = by_line.entry(line).or_insert(offset);
                if offset < *slot {
                    *slot = offset;
                }
            }
        }
        self.entries_from_lines(doc, text, by_line, MatchStrategy::Title)
    }

    fn match_author(&self, record: &Record, doc: &DocumentInfo, text: &str) -> Vec<ReferenceEntry> {
        let raw = record.author.as_deref().unwrap_or("");
        let normalized = raw.replace([',', ';', '&', '/'], " ");
        let words: Vec<String> = normalized
            .split_whitespace()
            .map(regex::escape)
            .collect();
        if words.is_empty() {
            return Vec::new();
        }
        let pattern = format!(r"\b{}\b", words.join(r"\s+"));
        self.scan(doc, text, &pattern, MatchStrategy::Author)
    }

    fn scan(
        &self,
        doc: &DocumentInfo,
        text: &str,
        pattern: &str,
        strategy: MatchStrategy,
    ) -> Vec<ReferenceEntry> {
        let mut by_line: BTreeMap<usize, usize> = BTreeMap::new();
        for offset in self.find_offsets(pattern, text) {
            let line = line_of(text, offset);
            by_line.entry(line).or_insert(offset);
        }
        self.entries_from_lines(doc, text, by_line, strategy)
    }

    fn find_offsets(&self, pattern: &str, text: &str) -> Vec<usize> {
        let re = match build_ci(pattern) {
            Some(re) => re,
            None => return Vec::new(),
        };
        re.find_iter(text).map(|m| m.start()).collect()
    }

    fn entries_from_lines(
        &self,
        doc: &DocumentInfo,
        text: &str,
        by_line: BTreeMap<usize, usize>,
        strategy: MatchStrategy,
    ) -> Vec<ReferenceEntry> {
        by_line
            .into_iter()
            .map(|(line, offset)| ReferenceEntry {
                source_path: doc.path.clone(),
                source_name: doc.name.clone(),
                line: Some(line),
                context: self.offset_context(text, offset),
                strategy,
            })
            .collect()
    }

    /// ± N whole lines around a structural link, collapsed and bounded.
    fn line_context(&self, text: &str, line: usize) -> Option<String> {
        let lines: Vec<&str> = text.lines().collect();
        if line == 0 || line > lines.len() {
            return None;
        }
        let radius = self.cfg.link_context_lines;
        let start = (line - 1).saturating_sub(radius);
        let end = (line + radius).min(lines.len());
        let collapsed = collapse_ws(&lines[start..end].join(" "));
        bounded(collapsed, self.cfg.context_radius * 2)
    }

    /// Fixed character radius around a match offset, boundary-snapped,
    /// collapsed.
    fn offset_context(&self, text: &str, offset: usize) -> Option<String> {
        let radius = self.cfg.context_radius;
        let mut start = offset.saturating_sub(radius);
        while start > 0 && !text.is_char_boundary(start) {
            start -= 1;
        }
        let mut end = (offset + radius).min(text.len());
        while end < text.len() && !text.is_char_boundary(end) {
            end += 1;
        }
        let collapsed = collapse_ws(&text[start..end]);
        bounded(collapsed, radius * 2)
    }
}

fn build_ci(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern).case_insensitive(true).build().ok()
}

/// Strip embed/alias/heading decorations so the bare target remains.
fn normalize_link_target(target: &str) -> String {
    let t = target.trim();
    let t = t.split('|').next().unwrap_or(t);
    let t = t.split('#').next().unwrap_or(t);
    t.trim().trim_start_matches("./").to_string()
}

fn line_of(text: &str, offset: usize) -> usize {
    text.as_bytes()[..offset].iter().filter(|&&b| b == b'\n').count() + 1
}

fn collapse_ws(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn bounded(value: String, max_chars: usize) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    if value.chars().count() <= max_chars {
        return Some(value);
    }
    Some(value.chars().take(max_chars).collect())
}
