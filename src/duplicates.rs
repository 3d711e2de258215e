//! Duplicate cleanup and category reorganization.
//!
//! Duplicates are found by pairwise title similarity (word-set overlap)
//! within the same kind and language, grouped transitively. Each group
//! keeps one row; `--apply` archives the rest. Categories are rewritten
//! through the configured alias table and normalized to kebab-case.

use anyhow::Result;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::Config;
use crate::db;
use crate::models::{ContentItem, ContentKind, Status};
use crate::report::RunSummary;
use crate::store::{self, Field, Filter};

/// Words too common to say anything about a title, across the site's
/// main languages.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "in", "on", "to", "for", "with", "your", "how", "what",
    "is", "are", "el", "la", "los", "las", "de", "del", "en", "y", "un", "una", "para", "por",
    "con", "het", "een", "van", "voor", "der", "die", "das", "und", "le", "les", "des", "du",
];

/// Lowercased alphanumeric words, stopwords removed.
pub fn tokenize(title: &str) -> BTreeSet<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// `|A ∩ B| / |A ∪ B|` over title word sets; 0.0 when both are empty.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f64 / union as f64
}

/// Indices of rows grouped as duplicates. Only groups of two or more are
/// returned, each sorted, groups ordered by their first index.
pub fn find_duplicate_groups(items: &[ContentItem], threshold: f64) -> Vec<Vec<usize>> {
    // Union-find over indices
    let mut parent: Vec<usize> = (0..items.len()).collect();
    fn find(parent: &mut [usize], i: usize) -> usize {
        let mut root = i;
        while parent[root] != root {
            root = parent[root];
        }
        let mut cur = i;
        while parent[cur] != root {
            let next = parent[cur];
            parent[cur] = root;
            cur = next;
        }
        root
    }

    let tokens: Vec<BTreeSet<String>> = items.iter().map(|i| tokenize(&i.title)).collect();
    for i in 0..items.len() {
        for j in (i + 1)..items.len() {
            if items[i].kind != items[j].kind || items[i].language != items[j].language {
                continue;
            }
            let union = tokens[i].union(&tokens[j]).count();
            if union == 0 {
                continue;
            }
            let sim = tokens[i].intersection(&tokens[j]).count() as f64 / union as f64;
            if sim >= threshold {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj.max(ri)] = ri.min(rj);
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for i in 0..items.len() {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(i);
    }
    groups.into_values().filter(|g| g.len() > 1).collect()
}

/// Ordering where the preferred row sorts first: published before draft
/// before archived, then having a speakable answer, then the longer body,
/// then the earlier publication date, then the smaller id.
fn preference(a: &ContentItem, b: &ContentItem) -> Ordering {
    a.status
        .cmp(&b.status)
        .then_with(|| b.speakable_answer.is_some().cmp(&a.speakable_answer.is_some()))
        .then_with(|| b.body_words().cmp(&a.body_words()))
        .then_with(|| {
            let pa = a.published_at.unwrap_or(i64::MAX);
            let pb = b.published_at.unwrap_or(i64::MAX);
            pa.cmp(&pb)
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// Index (into `items`) of the row to keep from a duplicate group.
pub fn pick_best(items: &[ContentItem], group: &[usize]) -> Option<usize> {
    group
        .iter()
        .copied()
        .min_by(|&a, &b| preference(&items[a], &items[b]))
}

pub async fn run_dedupe(config: &Config, kinds: &[ContentKind], apply: bool) -> Result<RunSummary> {
    let pool = db::connect(config).await?;
    let items = store::list_kinds(&pool, kinds, &Filter::default()).await?;
    let live: Vec<ContentItem> = items
        .into_iter()
        .filter(|i| i.status != Status::Archived)
        .collect();

    let groups = find_duplicate_groups(&live, config.dedupe.similarity_threshold);
    let mut summary = RunSummary::default();

    println!("dedupe{}", if apply { "" } else { " (report only)" });
    for group in &groups {
        let Some(best) = pick_best(&live, group) else {
            continue;
        };
        let keep = &live[best];
        println!("  keep    {} {} ({}) {}", keep.kind, keep.slug, keep.language, keep.title);

        for &idx in group.iter().filter(|&&i| i != best) {
            let dup = &live[idx];
            summary.processed += 1;
            println!(
                "  archive {} {} ({}) {}  [{:.2}]",
                dup.kind,
                dup.slug,
                dup.language,
                dup.title,
                title_similarity(&keep.title, &dup.title)
            );
            if !apply {
                summary.skipped += 1;
                continue;
            }
            match store::set_field(&pool, dup.kind, &dup.id, Field::Status, Some(Status::Archived.as_str())).await {
                Ok(()) => summary.updated += 1,
                Err(e) => {
                    tracing::warn!(slug = %dup.slug, "failed to archive duplicate: {:#}", e);
                    summary.failed += 1;
                }
            }
        }
    }
    println!("  groups: {}", groups.len());
    summary.print();

    pool.close().await;
    Ok(summary)
}

/// Lowercase kebab-case: alphanumerics kept, every other run collapsed to `-`.
pub fn kebab_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_dash = false;
    for c in s.trim().chars() {
        if c.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Canonical category for a raw value: alias lookup (exact, then by
/// kebab-case key), then kebab-case normalization.
pub fn canonical_category(raw: &str, aliases: &BTreeMap<String, String>) -> String {
    if let Some(target) = aliases.get(raw.trim()) {
        return kebab_case(target);
    }
    let key = kebab_case(raw);
    aliases
        .iter()
        .find(|(alias, _)| kebab_case(alias) == key)
        .map(|(_, target)| kebab_case(target))
        .unwrap_or(key)
}

pub async fn run_categories(config: &Config, kinds: &[ContentKind], apply: bool) -> Result<RunSummary> {
    let pool = db::connect(config).await?;
    let items = store::list_kinds(&pool, kinds, &Filter::default()).await?;
    let mut summary = RunSummary::default();
    let mut totals: BTreeMap<String, usize> = BTreeMap::new();

    println!("categories{}", if apply { "" } else { " (report only)" });
    for item in &items {
        let Some(ref raw) = item.category else {
            continue;
        };
        let canonical = canonical_category(raw, &config.categories.aliases);
        *totals.entry(canonical.clone()).or_default() += 1;
        if canonical == *raw {
            continue;
        }

        summary.processed += 1;
        println!("  {} {} ({}): {} -> {}", item.kind, item.slug, item.language, raw, canonical);
        if !apply {
            summary.skipped += 1;
            continue;
        }
        match store::set_field(&pool, item.kind, &item.id, Field::Category, Some(&canonical)).await {
            Ok(()) => summary.updated += 1,
            Err(e) => {
                tracing::warn!(slug = %item.slug, "failed to update category: {:#}", e);
                summary.failed += 1;
            }
        }
    }

    println!();
    for (category, count) in &totals {
        println!("  {:<32} {:>5}", category, count);
    }
    summary.print();

    pool.close().await;
    Ok(summary)
}
