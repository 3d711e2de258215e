//! External links: authority scoring, markdown link extraction and
//! anchor-based injection.
//!
//! Suggestions come from the LLM as `{anchor, url}` pairs. They are scored
//! against the configured authority table, stored in `external_links`, and
//! later spliced into the body at the first unlinked occurrence of the
//! anchor text.

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::OnceLock;

use crate::config::{Config, LinksConfig};
use crate::db;
use crate::models::{ContentKind, LinkStatus};
use crate::report::RunSummary;
use crate::store::{self, Field, Filter};

fn markdown_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\[([^\]\n]+)\]\(([^)\s]+)(?:\s+"[^"]*")?\)"#).expect("valid link regex")
    })
}

fn code_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```.*?```|`[^`\n]*`").expect("valid code regex"))
}

/// A proposed outbound link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSuggestion {
    pub anchor: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoredSuggestion {
    #[serde(flatten)]
    pub suggestion: LinkSuggestion,
    pub authority: u8,
}

/// Host of an http(s) URL, lowercased, without a leading `www.`.
pub fn host_of(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Authority score in `[0, 100]`.
///
/// The longest configured domain that equals or is a parent of the host
/// wins; otherwise the TLD decides. Non-http(s) URLs score 0.
pub fn authority_score(url: &str, cfg: &LinksConfig) -> u8 {
    let Some(host) = host_of(url) else {
        return 0;
    };

    let configured = cfg
        .authority_domains
        .iter()
        .filter(|(domain, _)| host == **domain || host.ends_with(&format!(".{}", domain)))
        .max_by_key(|(domain, _)| domain.len())
        .map(|(_, weight)| *weight);
    if let Some(weight) = configured {
        return weight;
    }

    const GOVERNMENT: [&str; 4] = [".gov", ".gob.es", ".gov.uk", ".gouv.fr"];
    const ACADEMIC: [&str; 2] = [".edu", ".ac.uk"];
    if GOVERNMENT.iter().any(|s| host.ends_with(s)) {
        90
    } else if ACADEMIC.iter().any(|s| host.ends_with(s)) {
        80
    } else if host.ends_with(".org") {
        50
    } else {
        20
    }
}

/// Every `[text](url)` in a markdown body.
pub fn extract_links(body: &str) -> Vec<(String, String)> {
    markdown_link_re()
        .captures_iter(body)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

/// Links whose host differs from the site's host.
pub fn count_external_links(body: &str, site_base: &str) -> usize {
    let site_host = host_of(site_base);
    extract_links(body)
        .iter()
        .filter(|(_, url)| match host_of(url) {
            Some(h) => Some(h) != site_host,
            None => false,
        })
        .count()
}

/// Root-relative links and absolute links to the site's own host.
pub fn count_internal_links(body: &str, site_base: &str) -> usize {
    let site_host = host_of(site_base);
    extract_links(body)
        .iter()
        .filter(|(_, url)| url.starts_with('/') || (site_host.is_some() && host_of(url) == site_host))
        .count()
}

/// Score, filter and order raw suggestions: drops anything under
/// `min_authority`, duplicate URLs and empty anchors, highest authority
/// first, at most `max_links_per_item`.
pub fn score_suggestions(suggestions: &[LinkSuggestion], cfg: &LinksConfig) -> Vec<ScoredSuggestion> {
    let mut scored: Vec<ScoredSuggestion> = suggestions
        .iter()
        .filter(|s| !s.anchor.trim().is_empty())
        .map(|s| ScoredSuggestion {
            suggestion: LinkSuggestion {
                anchor: s.anchor.trim().to_string(),
                url: s.url.trim().to_string(),
                reason: s.reason.clone(),
            },
            authority: authority_score(s.url.trim(), cfg),
        })
        .filter(|s| s.authority >= cfg.min_authority)
        .collect();
    scored.sort_by(|a, b| b.authority.cmp(&a.authority));
    let mut seen = std::collections::HashSet::new();
    scored.retain(|s| seen.insert(s.suggestion.url.clone()));
    scored.truncate(cfg.max_links_per_item);
    scored
}

/// Result of [`inject_links`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    pub body: String,
    pub injected: Vec<String>,
    pub skipped: Vec<String>,
}

/// Byte ranges that must not receive a link: existing links, code, and
/// heading lines.
fn protected_ranges(body: &str) -> Vec<Range<usize>> {
    let mut ranges: Vec<Range<usize>> = markdown_link_re()
        .find_iter(body)
        .chain(code_span_re().find_iter(body))
        .map(|m| m.range())
        .collect();

    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if line.trim_start().starts_with('#') {
            ranges.push(offset..offset + line.len());
        }
        offset += line.len();
    }
    ranges
}

fn anchor_regex(anchor: &str) -> Option<Regex> {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let first = anchor.chars().next()?;
    let last = anchor.chars().last()?;
    let pattern = format!(
        "(?i){}{}{}",
        if is_word(first) { r"\b" } else { "" },
        regex::escape(anchor),
        if is_word(last) { r"\b" } else { "" },
    );
    Regex::new(&pattern).ok()
}

/// Splice `[anchor](url)` at the first unprotected, case-insensitive,
/// whole-word occurrence of each suggestion's anchor, preserving the
/// original casing. Suggestions whose URL already appears in the body, or
/// whose anchor has no free occurrence, are skipped. Stops after `max`
/// injections.
pub fn inject_links(body: &str, suggestions: &[LinkSuggestion], max: usize) -> Injection {
    let mut body = body.to_string();
    let mut injected = Vec::new();
    let mut skipped = Vec::new();

    for s in suggestions {
        if injected.len() >= max || body.contains(&s.url) {
            skipped.push(s.url.clone());
            continue;
        }
        let Some(re) = anchor_regex(s.anchor.trim()) else {
            skipped.push(s.url.clone());
            continue;
        };

        let protected = protected_ranges(&body);
        let found = re.find_iter(&body).find(|m| {
            !protected
                .iter()
                .any(|r| m.start() < r.end && r.start < m.end())
        });

        match found {
            Some(m) => {
                let range = m.range();
                let replacement = format!("[{}]({})", &body[range.clone()], s.url);
                body.replace_range(range, &replacement);
                injected.push(s.url.clone());
            }
            None => skipped.push(s.url.clone()),
        }
    }

    Injection {
        body,
        injected,
        skipped,
    }
}

/// Apply stored `suggested` links to item bodies.
pub async fn run_inject(config: &Config, kinds: &[ContentKind], dry_run: bool) -> Result<RunSummary> {
    let pool = db::connect(config).await?;
    let items = store::list_kinds(&pool, kinds, &Filter::default()).await?;
    let mut summary = RunSummary::default();

    for item in &items {
        let links = match store::list_external_links(&pool, Some(&item.id), Some(LinkStatus::Suggested)).await {
            Ok(links) => links,
            Err(e) => {
                tracing::warn!(slug = %item.slug, "failed to load suggested links: {:#}", e);
                summary.processed += 1;
                summary.failed += 1;
                continue;
            }
        };
        if links.is_empty() {
            continue;
        }
        summary.processed += 1;

        let existing = count_external_links(&item.body, config.site.base());
        let budget = config.links.max_links_per_item.saturating_sub(existing);
        let suggestions: Vec<LinkSuggestion> = links
            .iter()
            .map(|l| LinkSuggestion {
                anchor: l.anchor.clone(),
                url: l.url.clone(),
                reason: None,
            })
            .collect();
        let result = inject_links(&item.body, &suggestions, budget);

        if result.injected.is_empty() {
            summary.skipped += 1;
            continue;
        }
        if dry_run {
            println!("  {} {}: would inject {}", item.kind, item.slug, result.injected.len());
            summary.updated += 1;
            continue;
        }

        let write = async {
            store::set_field(&pool, item.kind, &item.id, Field::Body, Some(&result.body)).await?;
            for link in links.iter().filter(|l| result.injected.contains(&l.url)) {
                store::set_link_status(&pool, &link.id, LinkStatus::Injected).await?;
            }
            anyhow::Ok(())
        };
        match write.await {
            Ok(()) => summary.updated += 1,
            Err(e) => {
                tracing::warn!(slug = %item.slug, "link injection failed: {:#}", e);
                summary.failed += 1;
            }
        }
    }

    println!("links inject{}", if dry_run { " (dry-run)" } else { "" });
    summary.print();

    pool.close().await;
    Ok(summary)
}

/// Print stored links, optionally filtered by status.
pub async fn run_list(config: &Config, status: Option<LinkStatus>) -> Result<()> {
    let pool = db::connect(config).await?;
    let links = store::list_external_links(&pool, None, status).await?;

    println!("{:<38} {:>4} {:<10} {:<28} URL", "CONTENT", "AUTH", "STATUS", "ANCHOR");
    for link in &links {
        println!(
            "{:<38} {:>4} {:<10} {:<28} {}",
            link.content_id,
            link.authority,
            link.status.as_str(),
            truncate(&link.anchor, 28),
            link.url
        );
    }
    println!("{} links", links.len());

    pool.close().await;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}
