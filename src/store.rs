//! Row queries for content, links, images and leads.
//!
//! Every write is a single statement issued directly against the pool;
//! the only conflict handling is the `(language, slug)` upsert.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{
    ContentItem, ContentKind, ExternalLink, FunnelStage, ImageMetadata, Lead, LinkStatus, Status,
};

const CONTENT_COLUMNS: &str = "id, slug, language, title, meta_description, body, category, \
    funnel_stage, status, speakable_answer, summary, author_json, reviewer_json, featured_image, \
    featured_image_alt, translation_group, schema_json, published_at, updated_at, content_hash";

/// Row filter shared by list commands.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub language: Option<String>,
    pub status: Option<Status>,
    pub limit: Option<usize>,
}

impl Filter {
    pub fn published() -> Self {
        Self {
            status: Some(Status::Published),
            ..Self::default()
        }
    }
}

/// Single-column updates the enrichment and cleanup commands perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    SpeakableAnswer,
    Summary,
    FeaturedImageAlt,
    SchemaJson,
    Body,
    Category,
    Status,
}

impl Field {
    fn column(self) -> &'static str {
        match self {
            Field::SpeakableAnswer => "speakable_answer",
            Field::Summary => "summary",
            Field::FeaturedImageAlt => "featured_image_alt",
            Field::SchemaJson => "schema_json",
            Field::Body => "body",
            Field::Category => "category",
            Field::Status => "status",
        }
    }
}

fn row_to_item(kind: ContentKind, row: &SqliteRow) -> Result<ContentItem> {
    let status: String = row.try_get("status")?;
    let funnel: Option<String> = row.try_get("funnel_stage")?;
    let author: Option<String> = row.try_get("author_json")?;
    let reviewer: Option<String> = row.try_get("reviewer_json")?;

    Ok(ContentItem {
        id: row.try_get("id")?,
        kind,
        slug: row.try_get("slug")?,
        language: row.try_get("language")?,
        title: row.try_get("title")?,
        meta_description: row.try_get("meta_description")?,
        body: row.try_get("body")?,
        category: row.try_get("category")?,
        funnel_stage: funnel.as_deref().and_then(FunnelStage::parse),
        status: Status::parse(&status).unwrap_or(Status::Draft),
        speakable_answer: row.try_get("speakable_answer")?,
        summary: row.try_get("summary")?,
        author: author.and_then(|s| serde_json::from_str(&s).ok()),
        reviewer: reviewer.and_then(|s| serde_json::from_str(&s).ok()),
        featured_image: row.try_get("featured_image")?,
        featured_image_alt: row.try_get("featured_image_alt")?,
        translation_group: row.try_get("translation_group")?,
        schema_json: row.try_get("schema_json")?,
        published_at: row.try_get("published_at")?,
        updated_at: row.try_get("updated_at")?,
        content_hash: row.try_get("content_hash")?,
    })
}

pub async fn list_items(
    pool: &SqlitePool,
    kind: ContentKind,
    filter: &Filter,
) -> Result<Vec<ContentItem>> {
    let mut sql = format!(
        "SELECT {} FROM {} WHERE 1 = 1",
        CONTENT_COLUMNS,
        kind.table()
    );
    if filter.language.is_some() {
        sql.push_str(" AND language = ?");
    }
    if filter.status.is_some() {
        sql.push_str(" AND status = ?");
    }
    sql.push_str(" ORDER BY language, slug");
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    let mut query = sqlx::query(&sql);
    if let Some(ref lang) = filter.language {
        query = query.bind(lang);
    }
    if let Some(status) = filter.status {
        query = query.bind(status.as_str());
    }

    let rows = query
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to list {}", kind.table()))?;
    rows.iter().map(|row| row_to_item(kind, row)).collect()
}

/// Rows of the given kinds, or of every kind when `kinds` is empty.
pub async fn list_kinds(
    pool: &SqlitePool,
    kinds: &[ContentKind],
    filter: &Filter,
) -> Result<Vec<ContentItem>> {
    let kinds: &[ContentKind] = if kinds.is_empty() {
        &ContentKind::ALL
    } else {
        kinds
    };
    let mut items = Vec::new();
    for kind in kinds {
        items.extend(list_items(pool, *kind, filter).await?);
    }
    Ok(items)
}

pub async fn find_by_slug(
    pool: &SqlitePool,
    kind: ContentKind,
    language: &str,
    slug: &str,
) -> Result<Option<ContentItem>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE language = ? AND slug = ?",
        CONTENT_COLUMNS,
        kind.table()
    );
    let row = sqlx::query(&sql)
        .bind(language)
        .bind(slug)
        .fetch_optional(pool)
        .await?;
    row.map(|r| row_to_item(kind, &r)).transpose()
}

/// SHA-256 over the fields that come from the markdown source.
pub fn content_hash(item: &ContentItem) -> String {
    let mut hasher = Sha256::new();
    for part in [
        item.title.as_str(),
        item.body.as_str(),
        item.meta_description.as_deref().unwrap_or(""),
        item.category.as_deref().unwrap_or(""),
        item.funnel_stage.map(|f| f.as_str()).unwrap_or(""),
        item.status.as_str(),
        item.speakable_answer.as_deref().unwrap_or(""),
        item.summary.as_deref().unwrap_or(""),
        item.featured_image.as_deref().unwrap_or(""),
        item.featured_image_alt.as_deref().unwrap_or(""),
        item.translation_group.as_deref().unwrap_or(""),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    for json in [&item.author, &item.reviewer] {
        if let Some(v) = json {
            hasher.update(v.to_string().as_bytes());
        }
        hasher.update([0u8]);
    }
    hasher.update(item.published_at.unwrap_or(0).to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Insert or update by `(language, slug)`. Returns the stored row id,
/// which is the existing id when the row was already present.
///
/// Generated fields missing from `item` keep their stored values, except
/// `schema_json`, which is dropped when the content hash changes so the
/// next `schema generate` rebuilds it.
pub async fn upsert_item(pool: &SqlitePool, item: &ContentItem) -> Result<String> {
    let table = item.kind.table();

    let existing_id: Option<String> = sqlx::query_scalar(&format!(
        "SELECT id FROM {} WHERE language = ? AND slug = ?",
        table
    ))
    .bind(&item.language)
    .bind(&item.slug)
    .fetch_optional(pool)
    .await?;

    let id = existing_id.unwrap_or_else(|| item.id.clone());
    let author = item.author.as_ref().map(|v| v.to_string());
    let reviewer = item.reviewer.as_ref().map(|v| v.to_string());

    sqlx::query(&format!(
        r#"
        INSERT INTO {table} ({CONTENT_COLUMNS})
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(language, slug) DO UPDATE SET
            title = excluded.title,
            meta_description = excluded.meta_description,
            body = excluded.body,
            category = excluded.category,
            funnel_stage = excluded.funnel_stage,
            status = excluded.status,
            speakable_answer = COALESCE(excluded.speakable_answer, {table}.speakable_answer),
            summary = COALESCE(excluded.summary, {table}.summary),
            author_json = excluded.author_json,
            reviewer_json = excluded.reviewer_json,
            featured_image = excluded.featured_image,
            featured_image_alt = COALESCE(excluded.featured_image_alt, {table}.featured_image_alt),
            translation_group = excluded.translation_group,
            schema_json = CASE
                WHEN {table}.content_hash = excluded.content_hash
                THEN COALESCE(excluded.schema_json, {table}.schema_json)
                ELSE excluded.schema_json
            END,
            published_at = excluded.published_at,
            updated_at = excluded.updated_at,
            content_hash = excluded.content_hash
        "#
    ))
    .bind(&id)
    .bind(&item.slug)
    .bind(&item.language)
    .bind(&item.title)
    .bind(&item.meta_description)
    .bind(&item.body)
    .bind(&item.category)
    .bind(item.funnel_stage.map(|f| f.as_str()))
    .bind(item.status.as_str())
    .bind(&item.speakable_answer)
    .bind(&item.summary)
    .bind(&author)
    .bind(&reviewer)
    .bind(&item.featured_image)
    .bind(&item.featured_image_alt)
    .bind(&item.translation_group)
    .bind(&item.schema_json)
    .bind(item.published_at)
    .bind(item.updated_at)
    .bind(&item.content_hash)
    .execute(pool)
    .await
    .with_context(|| format!("Failed to upsert {}/{}/{}", table, item.language, item.slug))?;

    Ok(id)
}

/// Stored content hash for `(language, slug)`, if the row exists.
pub async fn stored_hash(
    pool: &SqlitePool,
    kind: ContentKind,
    language: &str,
    slug: &str,
) -> Result<Option<String>> {
    let hash = sqlx::query_scalar(&format!(
        "SELECT content_hash FROM {} WHERE language = ? AND slug = ?",
        kind.table()
    ))
    .bind(language)
    .bind(slug)
    .fetch_optional(pool)
    .await?;
    Ok(hash)
}

pub async fn set_field(
    pool: &SqlitePool,
    kind: ContentKind,
    id: &str,
    field: Field,
    value: Option<&str>,
) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET {} = ?, updated_at = ? WHERE id = ?",
        kind.table(),
        field.column()
    );
    sqlx::query(&sql)
        .bind(value)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to update {}.{}", kind.table(), field.column()))?;
    Ok(())
}

// ============ External links ============

fn row_to_link(row: &SqliteRow) -> Result<ExternalLink> {
    let status: String = row.try_get("status")?;
    let authority: i64 = row.try_get("authority")?;
    Ok(ExternalLink {
        id: row.try_get("id")?,
        content_id: row.try_get("content_id")?,
        url: row.try_get("url")?,
        anchor: row.try_get("anchor")?,
        authority: authority.clamp(0, 100) as u8,
        status: LinkStatus::parse(&status).unwrap_or(LinkStatus::Suggested),
        created_at: row.try_get("created_at")?,
    })
}

/// Record a suggestion. Returns false when the same URL is already
/// recorded for the item.
pub async fn insert_external_link(
    pool: &SqlitePool,
    kind: ContentKind,
    content_id: &str,
    url: &str,
    anchor: &str,
    authority: u8,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO external_links (id, content_kind, content_id, url, anchor, authority, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 'suggested', ?)
        ON CONFLICT(content_id, url) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(kind.table())
    .bind(content_id)
    .bind(url)
    .bind(anchor)
    .bind(authority as i64)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_external_links(
    pool: &SqlitePool,
    content_id: Option<&str>,
    status: Option<LinkStatus>,
) -> Result<Vec<ExternalLink>> {
    let mut sql = String::from(
        "SELECT id, content_id, url, anchor, authority, status, created_at FROM external_links WHERE 1 = 1",
    );
    if content_id.is_some() {
        sql.push_str(" AND content_id = ?");
    }
    if status.is_some() {
        sql.push_str(" AND status = ?");
    }
    sql.push_str(" ORDER BY content_id, authority DESC, created_at");

    let mut query = sqlx::query(&sql);
    if let Some(id) = content_id {
        query = query.bind(id);
    }
    if let Some(s) = status {
        query = query.bind(s.as_str());
    }
    let rows = query.fetch_all(pool).await?;
    rows.iter().map(row_to_link).collect()
}

pub async fn set_link_status(pool: &SqlitePool, link_id: &str, status: LinkStatus) -> Result<()> {
    sqlx::query("UPDATE external_links SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(link_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ============ Images ============

pub async fn upsert_image_metadata(
    pool: &SqlitePool,
    content_id: Option<&str>,
    url: &str,
    alt_text: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO image_metadata (id, content_id, url, alt_text, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(url) DO UPDATE SET
            content_id = COALESCE(excluded.content_id, image_metadata.content_id),
            alt_text = excluded.alt_text,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(content_id)
    .bind(url)
    .bind(alt_text)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_image_metadata(pool: &SqlitePool) -> Result<Vec<ImageMetadata>> {
    let rows = sqlx::query(
        "SELECT id, content_id, url, alt_text, updated_at FROM image_metadata ORDER BY url",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(ImageMetadata {
                id: row.try_get("id")?,
                content_id: row.try_get("content_id")?,
                url: row.try_get("url")?,
                alt_text: row.try_get("alt_text")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .collect()
}

// ============ Leads ============

pub async fn insert_lead(pool: &SqlitePool, lead: &Lead) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO leads (id, name, email, phone, message, language, source_page, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&lead.name)
    .bind(&lead.email)
    .bind(&lead.phone)
    .bind(&lead.message)
    .bind(&lead.language)
    .bind(&lead.source_page)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_changes_with_body() {
        let a = ContentItem::new(ContentKind::Article, "en", "a", "Title", "Body one");
        let mut b = a.clone();
        assert_eq!(content_hash(&a), content_hash(&b));
        b.body.push_str(" more");
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_ignores_id_and_timestamp() {
        let a = ContentItem::new(ContentKind::Article, "en", "a", "Title", "Body");
        let mut b = ContentItem::new(ContentKind::Article, "en", "a", "Title", "Body");
        b.updated_at += 100;
        assert_ne!(a.id, b.id);
        assert_eq!(content_hash(&a), content_hash(&b));
    }
}
