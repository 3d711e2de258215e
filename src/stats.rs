//! Database statistics and content health overview.
//!
//! Gives a quick summary of what the site holds: rows per kind, language
//! and status, how many still lack a speakable answer or JSON-LD, and link
//! and lead counts. Used by `estate stats` before and after batch runs.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::models::ContentKind;

/// Per-kind, per-language breakdown.
struct LanguageStats {
    kind: ContentKind,
    language: String,
    published: i64,
    draft: i64,
    archived: i64,
    missing_speakable: i64,
    missing_schema: i64,
    last_updated: Option<i64>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let mut rows: Vec<LanguageStats> = Vec::new();
    for kind in ContentKind::ALL {
        let breakdown = sqlx::query(&format!(
            r#"
            SELECT
                language,
                SUM(CASE WHEN status = 'published' THEN 1 ELSE 0 END) AS published,
                SUM(CASE WHEN status = 'draft' THEN 1 ELSE 0 END) AS draft,
                SUM(CASE WHEN status = 'archived' THEN 1 ELSE 0 END) AS archived,
                SUM(CASE WHEN speakable_answer IS NULL AND status != 'archived' THEN 1 ELSE 0 END) AS missing_speakable,
                SUM(CASE WHEN schema_json IS NULL AND status != 'archived' THEN 1 ELSE 0 END) AS missing_schema,
                MAX(updated_at) AS last_updated
            FROM {}
            GROUP BY language
            ORDER BY language
            "#,
            kind.table()
        ))
        .fetch_all(&pool)
        .await?;

        for row in &breakdown {
            rows.push(LanguageStats {
                kind,
                language: row.get("language"),
                published: row.get("published"),
                draft: row.get("draft"),
                archived: row.get("archived"),
                missing_speakable: row.get("missing_speakable"),
                missing_schema: row.get("missing_schema"),
                last_updated: row.get("last_updated"),
            });
        }
    }

    let link_rows = sqlx::query("SELECT status, COUNT(*) AS n FROM external_links GROUP BY status ORDER BY status")
        .fetch_all(&pool)
        .await?;
    let images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image_metadata")
        .fetch_one(&pool)
        .await?;
    let leads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let total: i64 = rows.iter().map(|r| r.published + r.draft + r.archived).sum();

    println!("{}: content stats", config.site.name);
    println!("================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Rows:        {}", total);

    if !rows.is_empty() {
        println!();
        println!(
            "  {:<9} {:<5} {:>9} {:>6} {:>8} {:>10} {:>10}   {}",
            "KIND", "LANG", "PUBLISHED", "DRAFT", "ARCHIVED", "NO SPEAK", "NO SCHEMA", "UPDATED"
        );
        println!("  {}", "-".repeat(84));
        for r in &rows {
            println!(
                "  {:<9} {:<5} {:>9} {:>6} {:>8} {:>10} {:>10}   {}",
                r.kind.segment(),
                r.language,
                r.published,
                r.draft,
                r.archived,
                r.missing_speakable,
                r.missing_schema,
                r.last_updated
                    .map(format_ts_relative)
                    .unwrap_or_else(|| "never".to_string())
            );
        }
    }

    println!();
    println!("  External links:");
    if link_rows.is_empty() {
        println!("    (none)");
    }
    for row in &link_rows {
        let status: String = row.get("status");
        let n: i64 = row.get("n");
        println!("    {:<10} {}", status, n);
    }
    println!("  Images:      {}", images);
    println!("  Leads:       {}", leads);
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        format_ts_iso(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
