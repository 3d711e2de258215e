//! YAML frontmatter for markdown content files.
//!
//! A content file is a `---` delimited YAML block followed by the markdown
//! body. Known keys map onto [`ContentItem`] columns. Unknown keys are kept
//! in [`Frontmatter::extra`] across a [`split`]/[`render`] cycle only; they
//! have no column, so they are not stored on import and `export` never
//! writes them back.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{ContentItem, ContentKind, FunnelStage, Status};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funnel_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speakable_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub featured_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub featured_image_alt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_group: Option<String>,
    /// `YYYY-MM-DD` or RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// Split a markdown document into its frontmatter and body.
///
/// The first line must be `---` (a UTF-8 BOM is tolerated); the block ends
/// at the next line that is `---` or `...`.
pub fn split(input: &str) -> Result<(Frontmatter, String)> {
    let input = input.trim_start_matches('\u{feff}');
    let mut lines = input.lines();

    match lines.next() {
        Some(first) if first.trim_end() == "---" => {}
        _ => bail!("missing frontmatter: file must start with '---'"),
    }

    let mut yaml_lines: Vec<&str> = Vec::new();
    let mut closed = false;
    for line in lines.by_ref() {
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            closed = true;
            break;
        }
        yaml_lines.push(line);
    }
    if !closed {
        bail!("unterminated frontmatter: no closing '---'");
    }

    let body = lines.collect::<Vec<_>>().join("\n");
    let yaml = yaml_lines.join("\n");

    let fm: Frontmatter = if yaml.trim().is_empty() {
        Frontmatter::default()
    } else {
        serde_yaml::from_str(&yaml).context("invalid frontmatter YAML")?
    };

    Ok((fm, body.trim().to_string()))
}

/// Render frontmatter and body back into a markdown document.
pub fn render(fm: &Frontmatter, body: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(fm).context("failed to serialize frontmatter")?;
    Ok(format!("---\n{}---\n\n{}\n", yaml, body.trim()))
}

/// Parse `YYYY-MM-DD` or an RFC 3339 timestamp into Unix seconds.
pub fn parse_date(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

pub fn format_date(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ts.to_string())
}

impl Frontmatter {
    /// Map frontmatter keys onto a content row. `language` and `slug`
    /// fall back to the values derived from the file path.
    pub fn into_item(
        self,
        kind: ContentKind,
        path_language: &str,
        path_slug: &str,
        body: &str,
    ) -> Result<ContentItem> {
        let title = match self.title {
            Some(t) if !t.trim().is_empty() => t,
            _ => bail!("frontmatter is missing 'title'"),
        };
        let language = self.language.unwrap_or_else(|| path_language.to_string());
        let slug = self.slug.unwrap_or_else(|| path_slug.to_string());

        let status = match self.status.as_deref() {
            None => Status::Draft,
            Some(s) => Status::parse(s)
                .with_context(|| format!("unknown status '{}'", s))?,
        };
        let funnel_stage = match self.funnel_stage.as_deref() {
            None => None,
            Some(s) => Some(
                FunnelStage::parse(s).with_context(|| format!("unknown funnel_stage '{}'", s))?,
            ),
        };
        let published_at = match self.published_at.as_deref() {
            None => None,
            Some(s) => {
                Some(parse_date(s).with_context(|| format!("invalid published_at '{}'", s))?)
            }
        };

        let mut item = ContentItem::new(kind, &language, &slug, &title, body);
        item.meta_description = self.meta_description;
        item.category = self.category;
        item.funnel_stage = funnel_stage;
        item.status = status;
        item.speakable_answer = self.speakable_answer;
        item.summary = self.summary;
        item.author = self.author;
        item.reviewer = self.reviewer;
        item.featured_image = self.featured_image;
        item.featured_image_alt = self.featured_image_alt;
        item.translation_group = self.translation_group;
        item.published_at = published_at;
        Ok(item)
    }

    pub fn from_item(item: &ContentItem) -> Self {
        Self {
            title: Some(item.title.clone()),
            slug: Some(item.slug.clone()),
            language: Some(item.language.clone()),
            category: item.category.clone(),
            funnel_stage: item.funnel_stage.map(|f| f.as_str().to_string()),
            status: Some(item.status.as_str().to_string()),
            meta_description: item.meta_description.clone(),
            speakable_answer: item.speakable_answer.clone(),
            summary: item.summary.clone(),
            author: item.author.clone(),
            reviewer: item.reviewer.clone(),
            featured_image: item.featured_image.clone(),
            featured_image_alt: item.featured_image_alt.clone(),
            translation_group: item.translation_group.clone(),
            published_at: item.published_at.map(format_date),
            extra: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "---\ntitle: Buying property in Marbella\nslug: buying-marbella\nlanguage: en\nfunnel_stage: tofu\nstatus: published\npublished_at: 2024-03-05\nauthor:\n  name: Ana Ruiz\n  credentials: Licensed agent\nkeywords:\n  - marbella\n  - villas\n---\n\n# Heading\n\nBody text here.\n";

    #[test]
    fn split_parses_known_and_extra_keys() {
        let (fm, body) = split(DOC).unwrap();
        assert_eq!(fm.title.as_deref(), Some("Buying property in Marbella"));
        assert_eq!(fm.funnel_stage.as_deref(), Some("tofu"));
        assert_eq!(fm.author.as_ref().unwrap()["name"], "Ana Ruiz");
        assert!(fm.extra.contains_key("keywords"));
        assert_eq!(body, "# Heading\n\nBody text here.");
    }

    #[test]
    fn bom_tolerated() {
        let doc = format!("\u{feff}{}", DOC);
        let (fm, _) = split(&doc).unwrap();
        assert_eq!(fm.slug.as_deref(), Some("buying-marbella"));
    }

    #[test]
    fn missing_or_unterminated_frontmatter() {
        assert!(split("# Just markdown").is_err());
        assert!(split("---\ntitle: x\nbody without close").is_err());
    }

    #[test]
    fn into_item_uses_path_defaults() {
        let (fm, body) = split("---\ntitle: Hola\n---\nCuerpo").unwrap();
        let item = fm
            .into_item(ContentKind::BlogPost, "es", "hola-mundo", &body)
            .unwrap();
        assert_eq!(item.language, "es");
        assert_eq!(item.slug, "hola-mundo");
        assert_eq!(item.status, Status::Draft);
        assert_eq!(item.body, "Cuerpo");
    }

    #[test]
    fn into_item_rejects_unknown_status() {
        let (fm, body) = split("---\ntitle: X\nstatus: live\n---\n").unwrap();
        assert!(fm.into_item(ContentKind::Article, "en", "x", &body).is_err());
    }

    #[test]
    fn render_round_trip_preserves_fields() {
        let (fm, body) = split(DOC).unwrap();
        let rendered = render(&fm, &body).unwrap();
        let (fm2, body2) = split(&rendered).unwrap();
        assert_eq!(fm, fm2);
        assert_eq!(body, body2);
    }

    #[test]
    fn extra_keys_are_not_stored() {
        let (fm, body) = split(DOC).unwrap();
        let item = fm.into_item(ContentKind::Article, "en", "x", &body).unwrap();
        let exported = Frontmatter::from_item(&item);
        assert!(exported.extra.is_empty());
        assert_eq!(exported.title.as_deref(), Some("Buying property in Marbella"));
    }

    #[test]
    fn dates() {
        assert_eq!(parse_date("1970-01-02"), Some(86_400));
        assert_eq!(parse_date("1970-01-01T00:01:00Z"), Some(60));
        assert_eq!(parse_date("yesterday"), None);
        assert_eq!(format_date(86_400), "1970-01-02");
    }
}
