//! Core data models used throughout the toolkit.
//!
//! Content rows (articles, blog posts, FAQs) share one shape and live in
//! one table per [`ContentKind`]. Links, image metadata and leads are
//! auxiliary rows keyed by content id.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three content tables of the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Article,
    BlogPost,
    Faq,
}

impl ContentKind {
    pub const ALL: [ContentKind; 3] = [ContentKind::Article, ContentKind::BlogPost, ContentKind::Faq];

    pub fn table(self) -> &'static str {
        match self {
            ContentKind::Article => "articles",
            ContentKind::BlogPost => "blog_posts",
            ContentKind::Faq => "faqs",
        }
    }

    /// URL path segment, also the directory name in the markdown tree.
    pub fn segment(self) -> &'static str {
        match self {
            ContentKind::Article => "articles",
            ContentKind::BlogPost => "blog",
            ContentKind::Faq => "faq",
        }
    }

    /// schema.org type used for the page's JSON-LD.
    pub fn schema_type(self) -> &'static str {
        match self {
            ContentKind::Article => "Article",
            ContentKind::BlogPost => "BlogPosting",
            ContentKind::Faq => "FAQPage",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "article" | "articles" => Ok(ContentKind::Article),
            "blog" | "blog_post" | "blog_posts" | "post" => Ok(ContentKind::BlogPost),
            "faq" | "faqs" => Ok(ContentKind::Faq),
            other => bail!("Unknown content kind: '{}'. Use article, blog, or faq.", other),
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        ContentKind::ALL.into_iter().find(|k| k.segment() == segment)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.segment())
    }
}

/// Purchase-journey tag. Display and filtering only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FunnelStage {
    Tofu,
    Mofu,
    Bofu,
}

impl FunnelStage {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tofu" => Some(FunnelStage::Tofu),
            "mofu" => Some(FunnelStage::Mofu),
            "bofu" => Some(FunnelStage::Bofu),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FunnelStage::Tofu => "TOFU",
            FunnelStage::Mofu => "MOFU",
            FunnelStage::Bofu => "BOFU",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Published,
    Draft,
    Archived,
}

impl Status {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "published" => Some(Status::Published),
            "draft" => Some(Status::Draft),
            "archived" => Some(Status::Archived),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Published => "published",
            Status::Draft => "draft",
            Status::Archived => "archived",
        }
    }
}

/// One row of `articles`, `blog_posts` or `faqs`.
#[derive(Debug, Clone, Serialize)]
pub struct ContentItem {
    pub id: String,
    pub kind: ContentKind,
    pub slug: String,
    pub language: String,
    pub title: String,
    pub meta_description: Option<String>,
    pub body: String,
    pub category: Option<String>,
    pub funnel_stage: Option<FunnelStage>,
    pub status: Status,
    pub speakable_answer: Option<String>,
    pub summary: Option<String>,
    /// Free-form author object (name, url, credentials).
    pub author: Option<serde_json::Value>,
    pub reviewer: Option<serde_json::Value>,
    pub featured_image: Option<String>,
    pub featured_image_alt: Option<String>,
    /// Rows sharing a group are translations of each other.
    pub translation_group: Option<String>,
    pub schema_json: Option<String>,
    pub published_at: Option<i64>,
    pub updated_at: i64,
    pub content_hash: String,
}

impl ContentItem {
    /// A draft row with every optional field empty.
    pub fn new(kind: ContentKind, language: &str, slug: &str, title: &str, body: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            slug: slug.to_string(),
            language: language.to_string(),
            title: title.to_string(),
            meta_description: None,
            body: body.to_string(),
            category: None,
            funnel_stage: None,
            status: Status::Draft,
            speakable_answer: None,
            summary: None,
            author: None,
            reviewer: None,
            featured_image: None,
            featured_image_alt: None,
            translation_group: None,
            schema_json: None,
            published_at: None,
            updated_at: chrono::Utc::now().timestamp(),
            content_hash: String::new(),
        }
    }

    /// Site-relative path, e.g. `/es/blog/comprar-casa`.
    pub fn path(&self) -> String {
        format!("/{}/{}/{}", self.language, self.kind.segment(), self.slug)
    }

    pub fn url(&self, base: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), self.path())
    }

    pub fn is_published(&self) -> bool {
        self.status == Status::Published
    }

    pub fn body_words(&self) -> usize {
        word_count(&self.body)
    }
}

/// Whitespace-separated word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Suggested,
    Injected,
    Rejected,
}

impl LinkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkStatus::Suggested => "suggested",
            LinkStatus::Injected => "injected",
            LinkStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "suggested" => Some(LinkStatus::Suggested),
            "injected" => Some(LinkStatus::Injected),
            "rejected" => Some(LinkStatus::Rejected),
            _ => None,
        }
    }
}

/// A suggested or applied outbound link.
#[derive(Debug, Clone, Serialize)]
pub struct ExternalLink {
    pub id: String,
    pub content_id: String,
    pub url: String,
    pub anchor: String,
    pub authority: u8,
    pub status: LinkStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageMetadata {
    pub id: String,
    pub content_id: Option<String>,
    pub url: String,
    pub alt_text: Option<String>,
    pub updated_at: i64,
}

/// Contact-form submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub source_page: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parse_and_segments() {
        assert_eq!(ContentKind::parse("Blog").unwrap(), ContentKind::BlogPost);
        assert_eq!(ContentKind::parse("faqs").unwrap(), ContentKind::Faq);
        assert!(ContentKind::parse("video").is_err());
        assert_eq!(ContentKind::from_segment("blog"), Some(ContentKind::BlogPost));
        assert_eq!(ContentKind::from_segment("posts"), None);
        assert_eq!(ContentKind::Faq.schema_type(), "FAQPage");
    }

    #[test]
    fn funnel_stage_case_insensitive() {
        assert_eq!(FunnelStage::parse("MoFu"), Some(FunnelStage::Mofu));
        assert_eq!(FunnelStage::parse("middle"), None);
        assert_eq!(FunnelStage::Bofu.as_str(), "BOFU");
    }

    #[test]
    fn item_url() {
        let item = ContentItem::new(
            ContentKind::BlogPost,
            "en",
            "buying-a-villa",
            "Buying a villa",
            "one two three",
        );
        assert_eq!(item.url("https://x.test/"), "https://x.test/en/blog/buying-a-villa");
        assert_eq!(item.body_words(), 3);
        assert!(!item.is_published());
    }
}
