use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::models::ContentKind;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // articles, blog_posts and faqs share one column layout
    for kind in ContentKind::ALL {
        let table = kind.table();
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                slug TEXT NOT NULL,
                language TEXT NOT NULL,
                title TEXT NOT NULL,
                meta_description TEXT,
                body TEXT NOT NULL,
                category TEXT,
                funnel_stage TEXT,
                status TEXT NOT NULL DEFAULT 'draft',
                speakable_answer TEXT,
                summary TEXT,
                author_json TEXT,
                reviewer_json TEXT,
                featured_image TEXT,
                featured_image_alt TEXT,
                translation_group TEXT,
                schema_json TEXT,
                published_at INTEGER,
                updated_at INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                UNIQUE(language, slug)
            )
            "#
        ))
        .execute(pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_status ON {table}(status, language)"
        ))
        .execute(pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_translation_group ON {table}(translation_group)"
        ))
        .execute(pool)
        .await?;
    }

    // Outbound link suggestions and applied links
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS external_links (
            id TEXT PRIMARY KEY,
            content_kind TEXT NOT NULL,
            content_id TEXT NOT NULL,
            url TEXT NOT NULL,
            anchor TEXT NOT NULL,
            authority INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'suggested',
            created_at INTEGER NOT NULL,
            UNIQUE(content_id, url)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS image_metadata (
            id TEXT PRIMARY KEY,
            content_id TEXT,
            url TEXT NOT NULL UNIQUE,
            alt_text TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leads (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT,
            message TEXT,
            language TEXT,
            source_page TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_external_links_content ON external_links(content_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_leads_created_at ON leads(created_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
