//! Content-quality and "AI optimization" scoring.
//!
//! A score is a weighted sum of boolean signals over a single row, out of
//! 100. Pure: no database access, no state. `estate score` runs it over
//! stored rows; `estate score-file` and the `score` HTTP function run it
//! over a single document.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::config::{Config, QualityConfig};
use crate::db;
use crate::frontmatter;
use crate::links::{count_external_links, count_internal_links};
use crate::models::{word_count, ContentItem, ContentKind};
use crate::schema::faq_entries;
use crate::store::{self, Filter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signal {
    pub name: &'static str,
    pub weight: u8,
    pub earned: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    pub score: u8,
    pub passed: bool,
    pub signals: Vec<Signal>,
}

impl QualityReport {
    /// Names of the signals that were not earned.
    pub fn failing(&self) -> Vec<&'static str> {
        self.signals
            .iter()
            .filter(|s| !s.earned)
            .map(|s| s.name)
            .collect()
    }
}

/// Whether a speakable answer's word count falls within the configured bounds.
pub fn speakable_in_range(answer: &str, cfg: &QualityConfig) -> bool {
    let words = word_count(answer);
    words >= cfg.speakable_min_words && words <= cfg.speakable_max_words
}

/// Top-level `## ` sections; `###` subsections belong to their parent.
fn section_count(body: &str) -> usize {
    body.lines().filter(|l| l.starts_with("## ")).count()
}

/// Score one row. FAQ rows need a quarter of the body word minimum.
pub fn score(item: &ContentItem, cfg: &QualityConfig, site_base: &str) -> QualityReport {
    let words = item.body_words();
    let min_words = match item.kind {
        ContentKind::Faq => cfg.min_body_words / 4,
        _ => cfg.min_body_words,
    };
    let sections = section_count(&item.body);
    let questions = faq_entries(&item.body).len();
    let external = count_external_links(&item.body, site_base);
    let internal = count_internal_links(&item.body, site_base);
    let meta_len = item
        .meta_description
        .as_deref()
        .map(|m| m.trim().chars().count())
        .unwrap_or(0);
    let speakable_words = item.speakable_answer.as_deref().map(word_count);

    let signals = vec![
        Signal {
            name: "body_length",
            weight: 20,
            earned: words >= min_words,
            detail: format!("{} words (min {})", words, min_words),
        },
        Signal {
            name: "sections",
            weight: 15,
            earned: sections >= 3,
            detail: format!("{} sections (min 3)", sections),
        },
        Signal {
            name: "question_headings",
            weight: 10,
            earned: questions >= 1,
            detail: format!("{} question headings", questions),
        },
        Signal {
            name: "speakable_answer",
            weight: 15,
            earned: item
                .speakable_answer
                .as_deref()
                .is_some_and(|a| speakable_in_range(a, cfg)),
            detail: match speakable_words {
                Some(n) => format!(
                    "{} words (want {}-{})",
                    n, cfg.speakable_min_words, cfg.speakable_max_words
                ),
                None => "missing".to_string(),
            },
        },
        Signal {
            name: "meta_description",
            weight: 10,
            earned: meta_len >= cfg.meta_description_min && meta_len <= cfg.meta_description_max,
            detail: format!(
                "{} chars (want {}-{})",
                meta_len, cfg.meta_description_min, cfg.meta_description_max
            ),
        },
        Signal {
            name: "external_links",
            weight: 10,
            earned: external >= cfg.min_external_links,
            detail: format!("{} external links (min {})", external, cfg.min_external_links),
        },
        Signal {
            name: "internal_links",
            weight: 5,
            earned: internal >= 1,
            detail: format!("{} internal links", internal),
        },
        Signal {
            name: "summary",
            weight: 5,
            earned: item.summary.as_deref().is_some_and(|s| !s.trim().is_empty()),
            detail: if item.summary.is_some() { "present" } else { "missing" }.to_string(),
        },
        Signal {
            name: "image_alt",
            weight: 5,
            earned: item.featured_image.is_some()
                && item
                    .featured_image_alt
                    .as_deref()
                    .is_some_and(|a| !a.trim().is_empty()),
            detail: match (&item.featured_image, &item.featured_image_alt) {
                (None, _) => "no featured image".to_string(),
                (Some(_), None) => "alt text missing".to_string(),
                (Some(_), Some(_)) => "present".to_string(),
            },
        },
        Signal {
            name: "authorship",
            weight: 5,
            earned: item.author.is_some() || item.reviewer.is_some(),
            detail: match (&item.author, &item.reviewer) {
                (Some(_), Some(_)) => "author and reviewer",
                (Some(_), None) => "author",
                (None, Some(_)) => "reviewer",
                (None, None) => "missing",
            }
            .to_string(),
        },
    ];

    let score: u32 = signals
        .iter()
        .filter(|s| s.earned)
        .map(|s| s.weight as u32)
        .sum();
    let score = score.min(100) as u8;

    QualityReport {
        score,
        passed: score >= cfg.pass_score,
        signals,
    }
}

/// Score stored rows and print a table. With `below`, only rows scoring
/// under that value are listed.
pub async fn run_score(
    config: &Config,
    kinds: &[ContentKind],
    language: Option<String>,
    below: Option<u8>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let filter = Filter {
        language,
        ..Filter::default()
    };
    let items = store::list_kinds(&pool, kinds, &filter).await?;
    pool.close().await;

    println!(
        "{:<8} {:<5} {:<44} {:>5} {:<6} MISSING",
        "KIND", "LANG", "SLUG", "SCORE", "PASS"
    );

    let mut listed = 0usize;
    let mut passed = 0usize;
    for item in &items {
        let report = score(item, &config.quality, config.site.base());
        if report.passed {
            passed += 1;
        }
        if below.is_some_and(|b| report.score >= b) {
            continue;
        }
        listed += 1;
        println!(
            "{:<8} {:<5} {:<44} {:>5} {:<6} {}",
            item.kind.segment(),
            item.language,
            item.slug,
            report.score,
            if report.passed { "yes" } else { "no" },
            report.failing().join(",")
        );
    }

    println!();
    println!("  scored: {}", items.len());
    println!("  passed: {}", passed);
    if below.is_some() {
        println!("  listed: {}", listed);
    }
    Ok(())
}

/// Build a row from a standalone markdown document. With frontmatter the
/// keys apply as on import; without it the whole text is the body.
pub fn item_from_markdown(kind: ContentKind, default_language: &str, text: &str) -> Result<ContentItem> {
    if text.trim_start_matches('\u{feff}').starts_with("---") {
        let (fm, body) = frontmatter::split(text)?;
        fm.into_item(kind, default_language, "untitled", &body)
    } else {
        Ok(ContentItem::new(kind, default_language, "untitled", "Untitled", text.trim()))
    }
}

/// Score a markdown file that is not (yet) in the database.
pub fn run_score_file(config: &Config, path: &Path, kind: ContentKind) -> Result<QualityReport> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let item = item_from_markdown(kind, &config.site.default_language, &text)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    let report = score(&item, &config.quality, config.site.base());
    print_report(&item, &report);
    Ok(report)
}

/// Print a detailed report for one row.
pub fn print_report(item: &ContentItem, report: &QualityReport) {
    println!("{} {} ({})", item.kind.segment(), item.slug, item.language);
    for s in &report.signals {
        println!(
            "  [{}] {:<18} {:>3}  {}",
            if s.earned { "x" } else { " " },
            s.name,
            s.weight,
            s.detail
        );
    }
    println!(
        "  score: {} / 100 ({})",
        report.score,
        if report.passed { "pass" } else { "fail" }
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strong_article() -> ContentItem {
        let mut body = String::from("Intro paragraph.\n\n");
        for i in 0..3 {
            body.push_str(&format!("## Is section {} useful?\n\n", i));
            body.push_str(&"word ".repeat(300));
            body.push_str("\n\n");
        }
        body.push_str("See [BOE](https://boe.es) and [INE](https://ine.es) and [guide](/en/articles/guide).");

        let mut item = ContentItem::new(ContentKind::Article, "en", "guide", "Guide", &body);
        item.meta_description = Some("A practical guide to buying a home on the coast, covering taxes, fees and timelines.".into());
        item.speakable_answer = Some("word ".repeat(50).trim().to_string());
        item.summary = Some("Short summary.".into());
        item.featured_image = Some("/img/villa.jpg".into());
        item.featured_image_alt = Some("White villa with pool".into());
        item.author = Some(json!({ "name": "Ana" }));
        item
    }

    #[test]
    fn full_marks() {
        let report = score(&strong_article(), &QualityConfig::default(), "https://homes.test");
        assert_eq!(report.score, 100, "{:?}", report.failing());
        assert!(report.passed);
        assert!(report.failing().is_empty());
    }

    #[test]
    fn weights_sum_to_100() {
        let report = score(
            &ContentItem::new(ContentKind::Article, "en", "x", "X", ""),
            &QualityConfig::default(),
            "https://homes.test",
        );
        let total: u32 = report.signals.iter().map(|s| s.weight as u32).sum();
        assert_eq!(total, 100);
        assert_eq!(report.score, 0);
        assert!(!report.passed);
    }

    #[test]
    fn speakable_bounds_are_inclusive() {
        let cfg = QualityConfig::default();
        assert!(speakable_in_range(&"w ".repeat(40), &cfg));
        assert!(speakable_in_range(&"w ".repeat(60), &cfg));
        assert!(!speakable_in_range(&"w ".repeat(39), &cfg));
        assert!(!speakable_in_range(&"w ".repeat(61), &cfg));
    }

    #[test]
    fn long_speakable_loses_weight() {
        let mut item = strong_article();
        item.speakable_answer = Some("word ".repeat(80));
        let report = score(&item, &QualityConfig::default(), "https://homes.test");
        assert_eq!(report.score, 85);
        assert_eq!(report.failing(), vec!["speakable_answer"]);
    }

    #[test]
    fn markdown_with_and_without_frontmatter() {
        let item = item_from_markdown(
            ContentKind::Article,
            "en",
            "---\ntitle: NIE numbers\nspeakable_answer: short\n---\n\n## What is a NIE?\n\nText.",
        )
        .unwrap();
        assert_eq!(item.title, "NIE numbers");
        assert_eq!(item.speakable_answer.as_deref(), Some("short"));
        assert!(item.body.starts_with("## What is a NIE?"));

        let plain = item_from_markdown(ContentKind::Faq, "es", "  just a body  ").unwrap();
        assert_eq!(plain.language, "es");
        assert_eq!(plain.body, "just a body");
    }

    #[test]
    fn subsections_do_not_count_as_sections() {
        assert_eq!(section_count("## Costs\n\n### Tax\n\n### Fees\n\n#### Notary\n"), 1);

        let mut item = strong_article();
        item.body = item.body.replacen("## Is section 1", "### Is section 1", 1);
        let report = score(&item, &QualityConfig::default(), "https://homes.test");
        let sections = report.signals.iter().find(|s| s.name == "sections").unwrap();
        assert!(!sections.earned);
        assert_eq!(sections.detail, "2 sections (min 3)");
    }

    #[test]
    fn faq_uses_lower_word_minimum() {
        let body = "## What is the IBI?\n\n".to_string() + &"word ".repeat(210);
        let item = ContentItem::new(ContentKind::Faq, "en", "ibi", "IBI", &body);
        let report = score(&item, &QualityConfig::default(), "https://homes.test");
        let body_signal = report.signals.iter().find(|s| s.name == "body_length").unwrap();
        assert!(body_signal.earned);
    }
}
