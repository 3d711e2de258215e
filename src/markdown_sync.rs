//! Markdown ↔ database sync.
//!
//! The markdown tree is laid out as `<segment>/<language>/<slug>.md`, where
//! `<segment>` is `articles`, `blog` or `faq`. Import walks the tree and
//! upserts one row per file, skipping files whose content hash matches the
//! stored row. Export writes every row back out in the same layout.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::db;
use crate::frontmatter::{self, Frontmatter};
use crate::models::{ContentItem, ContentKind};
use crate::report::RunSummary;
use crate::store::{self, Filter};

/// A markdown file located under the content root.
#[derive(Debug, Clone)]
pub struct MarkdownFile {
    pub path: PathBuf,
    pub kind: ContentKind,
    pub language: String,
    pub slug: String,
}

pub fn scan_content(config: &Config) -> Result<Vec<MarkdownFile>> {
    let root = &config.content.root;
    if !root.exists() {
        bail!("content.root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.content.include_globs)?;
    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/README.md".to_string(),
    ];
    default_excludes.extend(config.content.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match locate(relative) {
            Some((kind, language, slug)) => files.push(MarkdownFile {
                path: path.to_path_buf(),
                kind,
                language,
                slug,
            }),
            None => tracing::debug!(path = %rel_str, "skipping file outside <segment>/<lang>/<slug>.md layout"),
        }
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Derive kind, language and slug from a path relative to the content root.
fn locate(relative: &Path) -> Option<(ContentKind, String, String)> {
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.len() != 3 {
        return None;
    }
    let kind = ContentKind::from_segment(&parts[0])?;
    let slug = parts[2].strip_suffix(".md")?.to_string();
    Some((kind, parts[1].clone(), slug))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Read and parse one markdown file into a content row.
pub fn read_file(file: &MarkdownFile) -> Result<ContentItem> {
    let text = std::fs::read_to_string(&file.path)
        .with_context(|| format!("Failed to read {}", file.path.display()))?;
    let (fm, body) = frontmatter::split(&text)?;
    let mut item = fm.into_item(file.kind, &file.language, &file.slug, &body)?;
    item.content_hash = store::content_hash(&item);
    Ok(item)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Unchanged,
    Upserted,
}

/// Upsert a parsed row unless the stored hash matches.
pub async fn import_item(pool: &SqlitePool, item: &ContentItem) -> Result<ImportOutcome> {
    let stored = store::stored_hash(pool, item.kind, &item.language, &item.slug).await?;
    if stored.as_deref() == Some(item.content_hash.as_str()) {
        return Ok(ImportOutcome::Unchanged);
    }
    store::upsert_item(pool, item).await?;
    Ok(ImportOutcome::Upserted)
}

pub async fn run_import(config: &Config, dry_run: bool) -> Result<RunSummary> {
    let files = scan_content(config)?;

    if dry_run {
        let mut summary = RunSummary::default();
        for file in &files {
            summary.processed += 1;
            if let Err(e) = read_file(file) {
                tracing::warn!(path = %file.path.display(), "parse failed: {:#}", e);
                summary.failed += 1;
            }
        }
        println!("import (dry-run)");
        println!("  files found: {}", files.len());
        println!("  parse errors: {}", summary.failed);
        return Ok(summary);
    }

    let pool = db::connect(config).await?;
    let mut summary = RunSummary::default();

    for file in &files {
        summary.processed += 1;
        let outcome = match read_file(file) {
            Ok(item) => import_item(&pool, &item).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(ImportOutcome::Upserted) => summary.updated += 1,
            Ok(ImportOutcome::Unchanged) => summary.skipped += 1,
            Err(e) => {
                tracing::warn!(path = %file.path.display(), "import failed: {:#}", e);
                summary.failed += 1;
            }
        }
    }

    println!("import {}", config.content.root.display());
    summary.print();

    pool.close().await;
    Ok(summary)
}

/// Parse a file outside the database flow. Kind, language and slug come
/// from the trailing `<segment>/<lang>/<slug>.md` components when present.
fn check_file(config: &Config, path: &Path) -> Result<ContentItem> {
    let components: Vec<&std::ffi::OsStr> = path.iter().collect();
    let tail: PathBuf = components[components.len().saturating_sub(3)..].iter().collect();
    let (kind, language, slug) = locate(&tail).unwrap_or_else(|| {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        (ContentKind::Article, config.site.default_language.clone(), stem)
    });

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let (fm, body) = frontmatter::split(&text)?;
    let item = fm.into_item(kind, &language, &slug, &body)?;

    if !crate::validate::is_valid_slug(&item.slug) {
        bail!("slug '{}' must match ^[a-z0-9-]+$", item.slug);
    }
    if !config.site.languages.contains(&item.language) {
        bail!("language '{}' is not in site.languages", item.language);
    }
    Ok(item)
}

/// Check frontmatter of files or directories without touching the database.
pub fn run_check(config: &Config, paths: &[PathBuf]) -> Result<RunSummary> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path) {
                let entry = entry?;
                if entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|e| e == "md")
                {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    files.sort();

    let mut summary = RunSummary::default();
    for file in &files {
        summary.processed += 1;
        match check_file(config, file) {
            Ok(_) => summary.skipped += 1,
            Err(e) => {
                println!("  error {}: {:#}", file.display(), e);
                summary.failed += 1;
            }
        }
    }

    println!("frontmatter check");
    summary.print();
    Ok(summary)
}

/// Output path of a row inside an export directory.
pub fn export_path(out_dir: &Path, item: &ContentItem) -> PathBuf {
    out_dir
        .join(item.kind.segment())
        .join(&item.language)
        .join(format!("{}.md", item.slug))
}

pub fn write_item(out_dir: &Path, item: &ContentItem) -> Result<PathBuf> {
    let path = export_path(out_dir, item);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = frontmatter::render(&Frontmatter::from_item(item), &item.body)?;
    std::fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

pub async fn run_export(config: &Config, out_dir: Option<&Path>) -> Result<RunSummary> {
    let out_dir = out_dir.unwrap_or(config.content.root.as_path());
    let pool = db::connect(config).await?;
    let items = store::list_kinds(&pool, &[], &Filter::default()).await?;

    let mut summary = RunSummary::default();
    for item in &items {
        summary.processed += 1;
        match write_item(out_dir, item) {
            Ok(_) => summary.updated += 1,
            Err(e) => {
                tracing::warn!(slug = %item.slug, "export failed: {:#}", e);
                summary.failed += 1;
            }
        }
    }

    println!("export {}", out_dir.display());
    summary.print();

    pool.close().await;
    Ok(summary)
}
