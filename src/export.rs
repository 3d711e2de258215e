//! Export published content as JSON for the static front end.
//!
//! Produces one JSON document with every published row, grouped by kind,
//! plus the image alt-text table. The front end reads it at build time in
//! place of querying the database.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::models::{ContentItem, ContentKind, ImageMetadata};
use crate::store::{self, Filter};

#[derive(Serialize)]
pub struct ExportData {
    pub site: String,
    pub generated_at: i64,
    pub articles: Vec<ExportItem>,
    pub blog_posts: Vec<ExportItem>,
    pub faqs: Vec<ExportItem>,
    pub images: Vec<ImageMetadata>,
}

#[derive(Serialize)]
pub struct ExportItem {
    pub slug: String,
    pub language: String,
    pub path: String,
    pub title: String,
    pub meta_description: Option<String>,
    pub category: Option<String>,
    pub funnel_stage: Option<&'static str>,
    pub speakable_answer: Option<String>,
    pub summary: Option<String>,
    pub featured_image: Option<String>,
    pub featured_image_alt: Option<String>,
    pub translation_group: Option<String>,
    pub published_at: Option<i64>,
    pub updated_at: i64,
    pub body: String,
    /// Parsed JSON-LD, so the front end can inline it as-is.
    pub schema: Option<Value>,
}

impl From<ContentItem> for ExportItem {
    fn from(item: ContentItem) -> Self {
        Self {
            path: item.path(),
            schema: item
                .schema_json
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok()),
            funnel_stage: item.funnel_stage.map(|f| f.as_str()),
            slug: item.slug,
            language: item.language,
            title: item.title,
            meta_description: item.meta_description,
            category: item.category,
            speakable_answer: item.speakable_answer,
            summary: item.summary,
            featured_image: item.featured_image,
            featured_image_alt: item.featured_image_alt,
            translation_group: item.translation_group,
            published_at: item.published_at,
            updated_at: item.updated_at,
            body: item.body,
        }
    }
}

/// Collect published rows into an [`ExportData`].
pub async fn build_export(config: &Config) -> Result<ExportData> {
    let pool = db::connect(config).await?;
    let filter = Filter::published();

    let mut data = ExportData {
        site: config.site.base().to_string(),
        generated_at: chrono::Utc::now().timestamp(),
        articles: Vec::new(),
        blog_posts: Vec::new(),
        faqs: Vec::new(),
        images: store::list_image_metadata(&pool).await?,
    };
    for kind in ContentKind::ALL {
        let items: Vec<ExportItem> = store::list_items(&pool, kind, &filter)
            .await?
            .into_iter()
            .map(ExportItem::from)
            .collect();
        match kind {
            ContentKind::Article => data.articles = items,
            ContentKind::BlogPost => data.blog_posts = items,
            ContentKind::Faq => data.faqs = items,
        }
    }

    pool.close().await;
    Ok(data)
}

/// Export published content as JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export_json(config: &Config, output: Option<&Path>) -> Result<()> {
    let data = build_export(config).await?;
    let json = serde_json::to_string_pretty(&data)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} articles, {} blog posts, {} faqs to {}",
                data.articles.len(),
                data.blog_posts.len(),
                data.faqs.len(),
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    Ok(())
}
