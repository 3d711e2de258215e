//! JSON-LD structured data.
//!
//! Builders return `serde_json::Value` graphs ready to embed in a page's
//! `<script type="application/ld+json">`. [`missing_keys`] checks a graph
//! against the keys each schema.org type must carry; it is used by the
//! validator, the `schema generate` command and the HTTP function.

use anyhow::Result;
use serde_json::{json, Value};

use crate::config::{Config, SiteConfig};
use crate::db;
use crate::frontmatter::format_date;
use crate::models::{ContentItem, ContentKind};
use crate::report::RunSummary;
use crate::store::{self, Field, Filter};

/// CSS selector the front end puts on the speakable answer block.
pub const SPEAKABLE_SELECTOR: &str = ".speakable-answer";

/// Keys each supported schema.org type must carry.
pub fn required_keys(schema_type: &str) -> &'static [&'static str] {
    match schema_type {
        "Article" | "BlogPosting" | "NewsArticle" => {
            &["headline", "datePublished", "author", "publisher", "inLanguage"]
        }
        "FAQPage" => &["mainEntity"],
        "Question" => &["name", "acceptedAnswer"],
        "Answer" => &["text"],
        "BreadcrumbList" => &["itemListElement"],
        "ListItem" => &["position", "name", "item"],
        "Organization" | "RealEstateAgent" => &["name", "url"],
        "Person" => &["name"],
        _ => &[],
    }
}

/// Report every missing required key as `Type.key` (or `@context` /
/// `@type` when those are absent). Accepts a single node, an array of
/// nodes, or an object with `@graph`.
pub fn missing_keys(value: &Value) -> Vec<String> {
    let mut missing = Vec::new();
    match value {
        Value::Array(nodes) => {
            for node in nodes {
                check_top_level(node, &mut missing);
            }
        }
        _ => check_top_level(value, &mut missing),
    }
    missing
}

fn check_top_level(value: &Value, missing: &mut Vec<String>) {
    let Some(obj) = value.as_object() else {
        missing.push("<not an object>".to_string());
        return;
    };
    if !obj.contains_key("@context") {
        missing.push("@context".to_string());
    }
    match obj.get("@graph").and_then(|g| g.as_array()) {
        Some(nodes) => {
            for node in nodes {
                check_node(node, missing);
            }
        }
        None => check_node(value, missing),
    }
}

fn check_node(node: &Value, missing: &mut Vec<String>) {
    let Some(obj) = node.as_object() else {
        return;
    };
    let Some(schema_type) = obj.get("@type").and_then(|t| t.as_str()) else {
        missing.push("@type".to_string());
        return;
    };
    for key in required_keys(schema_type) {
        let present = match obj.get(*key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(_) => true,
        };
        if !present {
            missing.push(format!("{}.{}", schema_type, key));
        }
    }

    // Nested nodes that carry their own requirements
    for key in ["mainEntity", "acceptedAnswer", "itemListElement", "author", "publisher"] {
        match obj.get(key) {
            Some(Value::Array(children)) => children.iter().for_each(|c| check_node(c, missing)),
            Some(child @ Value::Object(_)) => check_node(child, missing),
            _ => {}
        }
    }
}

pub fn organization_schema(site: &SiteConfig) -> Value {
    let mut org = json!({
        "@type": "Organization",
        "name": site.name,
        "url": site.base(),
    });
    if let Some(ref logo) = site.logo_url {
        org["logo"] = json!({ "@type": "ImageObject", "url": logo });
    }
    org
}

fn person(value: &Value) -> Value {
    match value {
        Value::String(name) => json!({ "@type": "Person", "name": name }),
        Value::Object(map) => {
            let mut p = json!({ "@type": "Person" });
            for (k, v) in map {
                let key = match k.as_str() {
                    "credentials" => "jobTitle",
                    "bio" => "description",
                    other => other,
                };
                p[key] = v.clone();
            }
            p
        }
        other => json!({ "@type": "Person", "name": other.to_string() }),
    }
}

/// Article or BlogPosting node, depending on the row's kind.
pub fn article_schema(item: &ContentItem, site: &SiteConfig) -> Value {
    let url = item.url(site.base());
    let published = item.published_at.unwrap_or(item.updated_at);
    let schema_type = match item.kind {
        ContentKind::BlogPost => "BlogPosting",
        _ => "Article",
    };

    let mut node = json!({
        "@type": schema_type,
        "headline": item.title,
        "inLanguage": item.language,
        "datePublished": format_date(published),
        "dateModified": format_date(item.updated_at),
        "mainEntityOfPage": { "@type": "WebPage", "@id": url },
        "publisher": organization_schema(site),
        "author": item
            .author
            .as_ref()
            .map(person)
            .unwrap_or_else(|| organization_schema(site)),
    });
    if let Some(ref desc) = item.meta_description {
        node["description"] = json!(desc);
    }
    if let Some(ref image) = item.featured_image {
        node["image"] = json!(absolute_url(image, site.base()));
    }
    if let Some(ref reviewer) = item.reviewer {
        node["reviewedBy"] = person(reviewer);
    }
    if let Some(ref category) = item.category {
        node["articleSection"] = json!(category);
    }
    if item.speakable_answer.is_some() {
        node["speakable"] = json!({
            "@type": "SpeakableSpecification",
            "cssSelector": [SPEAKABLE_SELECTOR],
        });
    }
    node
}

/// Question/answer pairs from markdown headings that end with `?`.
///
/// The answer is the text between the heading and the next heading.
pub fn faq_entries(body: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            if let Some((q, lines)) = current.take() {
                push_entry(&mut entries, q, &lines);
            }
            let heading = trimmed.trim_start_matches('#').trim();
            if heading.ends_with('?') {
                current = Some((heading.to_string(), Vec::new()));
            }
        } else if let Some((_, ref mut lines)) = current {
            lines.push(trimmed);
        }
    }
    if let Some((q, lines)) = current.take() {
        push_entry(&mut entries, q, &lines);
    }
    entries
}

fn push_entry(entries: &mut Vec<(String, String)>, question: String, lines: &[&str]) {
    let answer = lines
        .iter()
        .filter(|l| !l.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    if !answer.is_empty() {
        entries.push((question, answer));
    }
}

pub fn faq_schema(entries: &[(String, String)]) -> Value {
    let questions: Vec<Value> = entries
        .iter()
        .map(|(q, a)| {
            json!({
                "@type": "Question",
                "name": q,
                "acceptedAnswer": { "@type": "Answer", "text": a },
            })
        })
        .collect();
    json!({ "@type": "FAQPage", "mainEntity": questions })
}

pub fn breadcrumb_schema(item: &ContentItem, site: &SiteConfig) -> Value {
    let base = site.base();
    let crumbs = [
        ("Home".to_string(), format!("{}/{}", base, item.language)),
        (
            section_name(item.kind).to_string(),
            format!("{}/{}/{}", base, item.language, item.kind.segment()),
        ),
        (item.title.clone(), item.url(base)),
    ];
    let elements: Vec<Value> = crumbs
        .iter()
        .enumerate()
        .map(|(i, (name, url))| {
            json!({
                "@type": "ListItem",
                "position": i + 1,
                "name": name,
                "item": url,
            })
        })
        .collect();
    json!({ "@type": "BreadcrumbList", "itemListElement": elements })
}

fn section_name(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::Article => "Articles",
        ContentKind::BlogPost => "Blog",
        ContentKind::Faq => "FAQ",
    }
}

fn absolute_url(url: &str, base: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("{}/{}", base, url.trim_start_matches('/'))
    }
}

/// Full `@graph` for a content page.
///
/// FAQ rows get a FAQPage node built from their question headings, falling
/// back to the title and speakable answer when the body has none. Articles
/// and blog posts get an extra FAQPage node when they contain at least two
/// question headings.
pub fn build_graph(item: &ContentItem, site: &SiteConfig) -> Value {
    let mut graph = Vec::new();
    let entries = faq_entries(&item.body);

    match item.kind {
        ContentKind::Faq => {
            let entries = if entries.is_empty() {
                item.speakable_answer
                    .iter()
                    .map(|a| (item.title.clone(), a.clone()))
                    .collect()
            } else {
                entries
            };
            graph.push(faq_schema(&entries));
        }
        ContentKind::Article | ContentKind::BlogPost => {
            graph.push(article_schema(item, site));
            if entries.len() >= 2 {
                graph.push(faq_schema(&entries));
            }
        }
    }
    graph.push(breadcrumb_schema(item, site));

    json!({ "@context": "https://schema.org", "@graph": graph })
}

/// Build and store JSON-LD for published rows.
pub async fn run_generate(config: &Config, kinds: &[ContentKind], force: bool) -> Result<RunSummary> {
    let pool = db::connect(config).await?;
    let items = store::list_kinds(&pool, kinds, &Filter::published()).await?;

    let mut summary = RunSummary::default();
    for item in &items {
        summary.processed += 1;
        if item.schema_json.is_some() && !force {
            summary.skipped += 1;
            continue;
        }

        let graph = build_graph(item, &config.site);
        let missing = missing_keys(&graph);
        if !missing.is_empty() {
            tracing::warn!(
                slug = %item.slug,
                language = %item.language,
                "generated JSON-LD is incomplete: {}",
                missing.join(", ")
            );
            summary.failed += 1;
            continue;
        }

        let text = serde_json::to_string(&graph)?;
        match store::set_field(&pool, item.kind, &item.id, Field::SchemaJson, Some(&text)).await {
            Ok(()) => summary.updated += 1,
            Err(e) => {
                tracing::warn!(slug = %item.slug, "failed to store JSON-LD: {:#}", e);
                summary.failed += 1;
            }
        }
    }

    println!("schema generate");
    summary.print();

    pool.close().await;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteConfig {
        let mut site = Config::minimal().site;
        site.base_url = "https://homes.test/".into();
        site.name = "Homes".into();
        site
    }

    #[test]
    fn article_graph_is_complete() {
        let mut item = ContentItem::new(
            ContentKind::Article,
            "en",
            "buying-guide",
            "Buying guide",
            "Intro.\n\n## What taxes apply?\n\nTransfer tax.\n\n## Do I need a NIE?\n\nYes, always.",
        );
        item.author = Some(json!({ "name": "Ana", "credentials": "Agent" }));
        item.speakable_answer = Some("Short answer.".into());
        let graph = build_graph(&item, &site());

        assert!(missing_keys(&graph).is_empty(), "{:?}", missing_keys(&graph));
        let nodes = graph["@graph"].as_array().unwrap();
        assert_eq!(nodes[0]["@type"], "Article");
        assert_eq!(nodes[0]["author"]["jobTitle"], "Agent");
        assert_eq!(nodes[0]["speakable"]["cssSelector"][0], SPEAKABLE_SELECTOR);
        assert_eq!(nodes[1]["@type"], "FAQPage");
        assert_eq!(nodes[2]["itemListElement"][2]["item"], "https://homes.test/en/articles/buying-guide");
    }

    #[test]
    fn missing_keys_reports_type_and_key() {
        let value = json!({
            "@context": "https://schema.org",
            "@type": "Article",
            "headline": "",
            "author": { "@type": "Person" },
        });
        let missing = missing_keys(&value);
        assert!(missing.contains(&"Article.headline".to_string()));
        assert!(missing.contains(&"Article.datePublished".to_string()));
        assert!(missing.contains(&"Person.name".to_string()));
        assert!(!missing.contains(&"Article.author".to_string()));
    }

    #[test]
    fn missing_context_and_type() {
        let missing = missing_keys(&json!({ "name": "x" }));
        assert_eq!(missing, vec!["@context".to_string(), "@type".to_string()]);
        assert_eq!(missing_keys(&json!("text")), vec!["<not an object>".to_string()]);
    }

    #[test]
    fn faq_entries_from_headings() {
        let body = "# Costs\n\n## How much is IBI?\n\nAround 0.4%\nof cadastral value.\n\n## Notes\n\nnot a question\n\n### Is there a wealth tax?\n\nIn some regions.";
        let entries = faq_entries(body);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "How much is IBI?");
        assert_eq!(entries[0].1, "Around 0.4% of cadastral value.");
        assert_eq!(entries[1].1, "In some regions.");
    }

    #[test]
    fn faq_row_falls_back_to_speakable() {
        let mut item = ContentItem::new(ContentKind::Faq, "en", "nie", "What is a NIE?", "No headings.");
        item.speakable_answer = Some("A foreigner identification number.".into());
        let graph = build_graph(&item, &site());
        assert!(missing_keys(&graph).is_empty());
        assert_eq!(graph["@graph"][0]["mainEntity"][0]["name"], "What is a NIE?");

        item.speakable_answer = None;
        let graph = build_graph(&item, &site());
        assert_eq!(missing_keys(&graph), vec!["FAQPage.mainEntity".to_string()]);
    }
}
