//! Content retrieval by kind and slug.
//!
//! Fetches one row with its stored links. Used by the `estate get` command.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::models::{ContentItem, ContentKind, ExternalLink};
use crate::store;

#[derive(Debug, Clone, Serialize)]
pub struct ItemResponse {
    #[serde(flatten)]
    pub item: ContentItem,
    pub url: String,
    pub links: Vec<ExternalLink>,
}

/// Look up `slug` in `language` (the site default when `None`).
pub async fn get_item(
    config: &Config,
    kind: ContentKind,
    slug: &str,
    language: Option<&str>,
) -> Result<ItemResponse> {
    let pool = db::connect(config).await?;
    let language = language.unwrap_or(&config.site.default_language);

    let item = match store::find_by_slug(&pool, kind, language, slug).await? {
        Some(item) => item,
        None => {
            pool.close().await;
            bail!("{} not found: {} ({})", kind, slug, language);
        }
    };
    let links = store::list_external_links(&pool, Some(&item.id), None).await?;
    pool.close().await;

    Ok(ItemResponse {
        url: item.url(config.site.base()),
        item,
        links,
    })
}

/// CLI entry point. With `json`, prints the row as JSON.
pub async fn run_get(
    config: &Config,
    kind: ContentKind,
    slug: &str,
    language: Option<&str>,
    json: bool,
) -> Result<()> {
    let resp = get_item(config, kind, slug, language).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&resp)?);
        return Ok(());
    }

    let item = &resp.item;
    println!("--- {} ---", item.kind.schema_type());
    println!("id:           {}", item.id);
    println!("title:        {}", item.title);
    println!("url:          {}", resp.url);
    println!("status:       {}", item.status.as_str());
    if let Some(ref category) = item.category {
        println!("category:     {}", category);
    }
    if let Some(stage) = item.funnel_stage {
        println!("funnel_stage: {}", stage.as_str());
    }
    if let Some(ts) = item.published_at {
        println!("published_at: {}", format_ts_iso(ts));
    }
    println!("updated_at:   {}", format_ts_iso(item.updated_at));
    println!(
        "meta:         {}",
        item.meta_description.as_deref().unwrap_or("(missing)")
    );
    println!(
        "speakable:    {}",
        item.speakable_answer.as_deref().unwrap_or("(missing)")
    );
    println!("schema:       {}", if item.schema_json.is_some() { "present" } else { "(missing)" });
    println!();

    println!("--- Body ---");
    println!("{}", item.body);
    println!();

    println!("--- Links ({}) ---", resp.links.len());
    for link in &resp.links {
        println!("[{} {}] {} -> {}", link.status.as_str(), link.authority, link.anchor, link.url);
    }

    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
