//! Content validation rules.
//!
//! Each rule inspects one row (internal links also need the set of known
//! paths) and yields [`Issue`]s. Errors make `estate validate` exit 1;
//! warnings are reported only.

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::config::{Config, QualityConfig, SiteConfig};
use crate::db;
use crate::links::{extract_links, host_of};
use crate::models::{word_count, ContentItem, ContentKind, Status};
use crate::schema;
use crate::store::{self, Filter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub rule: &'static str,
    /// `<segment>/<language>/<slug>`
    pub item: String,
    pub message: String,
}

fn slug_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9-]+$").expect("valid slug regex"))
}

fn internal_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^/([a-z]{2}(?:-[a-z]{2})?)/(articles|blog|faq)/([^/?#]+)/?(?:[?#].*)?$")
            .expect("valid path regex")
    })
}

pub fn is_valid_slug(slug: &str) -> bool {
    slug_re().is_match(slug)
}

/// The `/<lang>/<segment>/<slug>` part of an internal link, or `None` when
/// the link does not point at a content page.
pub fn content_path(url: &str, site_base: &str) -> Option<String> {
    let path = if url.starts_with('/') {
        url.to_string()
    } else {
        let site_host = host_of(site_base)?;
        if host_of(url)? != site_host {
            return None;
        }
        reqwest::Url::parse(url).ok()?.path().to_string()
    };
    let caps = internal_path_re().captures(&path)?;
    Some(format!("/{}/{}/{}", &caps[1], &caps[2], &caps[3]))
}

fn is_well_formed_external(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => match parsed.scheme() {
            "http" | "https" => parsed.host_str().is_some_and(|h| h.contains('.')),
            "mailto" | "tel" => true,
            _ => false,
        },
        Err(_) => false,
    }
}

/// Every rule applied to one row. `known_paths` holds the paths of all
/// non-archived rows.
pub fn validate_item(
    item: &ContentItem,
    site: &SiteConfig,
    quality: &QualityConfig,
    known_paths: &HashSet<String>,
) -> Vec<Issue> {
    let label = format!("{}/{}/{}", item.kind.segment(), item.language, item.slug);
    let mut issues = Vec::new();
    let mut push = |severity: Severity, rule: &'static str, message: String| {
        issues.push(Issue {
            severity,
            rule,
            item: label.clone(),
            message,
        })
    };

    if !is_valid_slug(&item.slug) {
        push(
            Severity::Error,
            "slug",
            format!("slug '{}' must match ^[a-z0-9-]+$", item.slug),
        );
    }
    if !site.languages.contains(&item.language) {
        push(
            Severity::Error,
            "language",
            format!("language '{}' is not one of {:?}", item.language, site.languages),
        );
    }

    let title_len = item.title.trim().chars().count();
    if title_len == 0 {
        push(Severity::Error, "title", "title is empty".to_string());
    } else if title_len > quality.title_max {
        push(
            Severity::Warning,
            "title",
            format!("title is {} chars (max {})", title_len, quality.title_max),
        );
    }

    match item.meta_description.as_deref().map(|m| m.trim().chars().count()) {
        None | Some(0) if item.is_published() => {
            push(Severity::Warning, "meta_description", "meta description is missing".to_string())
        }
        Some(n) if n > 0 && (n < quality.meta_description_min || n > quality.meta_description_max) => push(
            Severity::Warning,
            "meta_description",
            format!(
                "meta description is {} chars (want {}-{})",
                n, quality.meta_description_min, quality.meta_description_max
            ),
        ),
        _ => {}
    }

    match item.speakable_answer.as_deref() {
        Some(answer) => {
            let words = word_count(answer);
            if words < quality.speakable_min_words || words > quality.speakable_max_words {
                push(
                    Severity::Error,
                    "speakable_answer",
                    format!(
                        "speakable answer is {} words (want {}-{})",
                        words, quality.speakable_min_words, quality.speakable_max_words
                    ),
                );
            }
        }
        None if item.is_published() => push(
            Severity::Warning,
            "speakable_answer",
            "published without a speakable answer".to_string(),
        ),
        None => {}
    }

    if let Some(ref raw) = item.schema_json {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => {
                let missing = schema::missing_keys(&value);
                if !missing.is_empty() {
                    push(
                        Severity::Error,
                        "schema",
                        format!("JSON-LD is missing {}", missing.join(", ")),
                    );
                }
            }
            Err(e) => push(Severity::Error, "schema", format!("JSON-LD does not parse: {}", e)),
        }
    }

    if item.featured_image.is_some()
        && item
            .featured_image_alt
            .as_deref()
            .map_or(true, |a| a.trim().is_empty())
    {
        push(
            Severity::Error,
            "image_alt",
            "featured image has no alt text".to_string(),
        );
    }

    for (_, url) in extract_links(&item.body) {
        if url.starts_with('#') {
            continue;
        }
        if let Some(path) = content_path(&url, site.base()) {
            if !known_paths.contains(&path) {
                push(Severity::Error, "internal_link", format!("broken internal link {}", url));
            }
            continue;
        }
        if url.starts_with('/') {
            // Non-content pages (contact, listings) are not tracked here
            continue;
        }
        if !is_well_formed_external(&url) {
            push(Severity::Error, "external_link", format!("malformed link '{}'", url));
        }
    }

    issues
}

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub checked: usize,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn errors(&self) -> usize {
        self.issues.iter().filter(|i| i.severity == Severity::Error).count()
    }

    pub fn warnings(&self) -> usize {
        self.issues.iter().filter(|i| i.severity == Severity::Warning).count()
    }
}

/// Validate rows; internal links resolve against the non-archived rows
/// in `items`.
pub fn validate_items(items: &[ContentItem], config: &Config) -> ValidationReport {
    let known_paths: HashSet<String> = items
        .iter()
        .filter(|i| i.status != Status::Archived)
        .map(|i| i.path())
        .collect();

    let mut report = ValidationReport::default();
    for item in items {
        report.checked += 1;
        report
            .issues
            .extend(validate_item(item, &config.site, &config.quality, &known_paths));
    }
    report
}

pub async fn run_validate(config: &Config, kinds: &[ContentKind], json: bool) -> Result<ValidationReport> {
    let pool = db::connect(config).await?;
    // Links may point at any kind, so paths come from every table
    let all = store::list_kinds(&pool, &[], &Filter::default()).await?;
    pool.close().await;

    let mut report = validate_items(&all, config);
    if !kinds.is_empty() {
        let wanted: HashSet<String> = kinds.iter().map(|k| k.segment().to_string()).collect();
        report.checked = all.iter().filter(|i| kinds.contains(&i.kind)).count();
        report
            .issues
            .retain(|i| i.item.split('/').next().is_some_and(|s| wanted.contains(s)));
    }
    report.issues.sort_by(|a, b| a.severity.cmp(&b.severity).then_with(|| a.item.cmp(&b.item)));

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for issue in &report.issues {
            let tag = match issue.severity {
                Severity::Error => "error",
                Severity::Warning => "warn ",
            };
            println!("{} {:<40} [{}] {}", tag, issue.item, issue.rule, issue.message);
        }
        println!();
        println!("  checked: {}", report.checked);
        println!("  errors: {}", report.errors());
        println!("  warnings: {}", report.warnings());
        if report.errors() == 0 {
            println!("ok");
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let mut c = Config::minimal();
        c.site.base_url = "https://homes.test".to_string();
        c.site.languages = vec!["en".to_string(), "es".to_string()];
        c
    }

    fn clean_item() -> ContentItem {
        let mut item = ContentItem::new(ContentKind::Article, "en", "buying-guide", "Buying guide", "Plain body.");
        item.status = Status::Published;
        item.meta_description = Some("A practical guide to buying a home on the coast, covering taxes and fees.".into());
        item.speakable_answer = Some("word ".repeat(45).trim().to_string());
        item
    }

    fn rules(issues: &[Issue]) -> Vec<(&'static str, Severity)> {
        issues.iter().map(|i| (i.rule, i.severity)).collect()
    }

    #[test]
    fn slug_format() {
        assert!(is_valid_slug("nie-number-2024"));
        assert!(!is_valid_slug("NIE-number"));
        assert!(!is_valid_slug("nie_number"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("compra-en-málaga"));
    }

    #[test]
    fn clean_item_has_no_issues() {
        let cfg = config();
        let issues = validate_item(&clean_item(), &cfg.site, &cfg.quality, &HashSet::new());
        assert!(issues.is_empty(), "{:?}", issues);
    }

    #[test]
    fn flags_slug_language_and_speakable() {
        let cfg = config();
        let mut item = clean_item();
        item.slug = "Bad Slug".into();
        item.language = "fr".into();
        item.speakable_answer = Some("too short".into());
        let issues = validate_item(&item, &cfg.site, &cfg.quality, &HashSet::new());
        assert_eq!(
            rules(&issues),
            vec![
                ("slug", Severity::Error),
                ("language", Severity::Error),
                ("speakable_answer", Severity::Error),
            ]
        );
    }

    #[test]
    fn missing_speakable_and_meta_warn_only_when_published() {
        let cfg = config();
        let mut item = clean_item();
        item.speakable_answer = None;
        item.meta_description = None;
        let issues = validate_item(&item, &cfg.site, &cfg.quality, &HashSet::new());
        assert_eq!(
            rules(&issues),
            vec![
                ("meta_description", Severity::Warning),
                ("speakable_answer", Severity::Warning),
            ]
        );

        item.status = Status::Draft;
        assert!(validate_item(&item, &cfg.site, &cfg.quality, &HashSet::new()).is_empty());
    }

    #[test]
    fn schema_and_image_alt() {
        let cfg = config();
        let mut item = clean_item();
        item.schema_json = Some(r#"{"@context":"https://schema.org","@type":"FAQPage"}"#.into());
        item.featured_image = Some("/img/a.jpg".into());
        let issues = validate_item(&item, &cfg.site, &cfg.quality, &HashSet::new());
        assert_eq!(
            rules(&issues),
            vec![("schema", Severity::Error), ("image_alt", Severity::Error)]
        );

        item.schema_json = Some("{not json".into());
        item.featured_image_alt = Some("Villa".into());
        let issues = validate_item(&item, &cfg.site, &cfg.quality, &HashSet::new());
        assert_eq!(rules(&issues), vec![("schema", Severity::Error)]);
        assert!(issues[0].message.contains("does not parse"));
    }

    #[test]
    fn internal_and_external_links() {
        let cfg = config();
        let mut item = clean_item();
        item.body = "[ok](/en/faq/nie) [gone](/es/blog/missing) [abs](https://homes.test/en/articles/gone) \
                     [contact](/en/contact) [boe](https://www.boe.es/x) [bad](htps//boe) [anchor](#top)"
            .to_string();
        let known: HashSet<String> = ["/en/faq/nie".to_string()].into_iter().collect();
        let issues = validate_item(&item, &cfg.site, &cfg.quality, &known);
        let messages: Vec<&str> = issues.iter().map(|i| i.message.as_str()).collect();
        assert_eq!(rules(&issues).len(), 3, "{:?}", messages);
        assert!(messages[0].contains("/es/blog/missing"));
        assert!(messages[1].contains("https://homes.test/en/articles/gone"));
        assert!(messages[2].contains("htps//boe"));
    }

    #[test]
    fn content_paths() {
        let base = "https://homes.test";
        assert_eq!(content_path("/en/blog/x", base).as_deref(), Some("/en/blog/x"));
        assert_eq!(content_path("/en/blog/x/#faq", base).as_deref(), Some("/en/blog/x"));
        assert_eq!(
            content_path("https://www.homes.test/es/faq/y?utm=1", base).as_deref(),
            Some("/es/faq/y")
        );
        assert_eq!(content_path("https://other.test/es/faq/y", base), None);
        assert_eq!(content_path("/en/contact", base), None);
    }

    #[test]
    fn report_counts_and_known_paths() {
        let cfg = config();
        let a = clean_item();
        let mut b = clean_item();
        b.slug = "second".into();
        b.body = "[first](/en/articles/buying-guide) [archived](/en/articles/old)".into();
        let mut old = clean_item();
        old.slug = "old".into();
        old.status = Status::Archived;

        let report = validate_items(&[a, b, old], &cfg);
        assert_eq!(report.checked, 3);
        assert_eq!(report.errors(), 1);
        assert_eq!(report.warnings(), 0);
        assert!(report.issues[0].message.contains("/en/articles/old"));
    }
}
