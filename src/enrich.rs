//! LLM-backed field generation: speakable answers, summaries, image alt
//! text and external-link suggestions.
//!
//! The `generate_*` functions work on plain inputs so both the batch
//! command (`estate generate`) and the HTTP functions can use them. The
//! batch command selects rows missing the target field, walks them in
//! batches of `llm.batch_size` with `llm.batch_delay_ms` between batches,
//! and writes each result back as soon as it arrives.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::time::Duration;

use crate::config::{Config, LinksConfig, QualityConfig};
use crate::db;
use crate::links::{score_suggestions, LinkSuggestion, ScoredSuggestion};
use crate::llm::{self, ChatModel, LlmError, Message, ResponseFormat};
use crate::models::{word_count, ContentItem, ContentKind};
use crate::report::RunSummary;
use crate::store::{self, Field, Filter};

/// Alt text longer than this is cut at a word boundary.
pub const ALT_TEXT_MAX_CHARS: usize = 125;

/// Body words sent to the model as context.
const EXCERPT_WORDS: usize = 1200;

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("speakable answer has {words} words (want {min}-{max})")]
    OutOfRange { words: usize, min: usize, max: usize },
    #[error("model returned an empty reply")]
    Empty,
}

/// Field produced by `estate generate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Target {
    Speakable,
    Summary,
    AltText,
    Links,
}

impl Target {
    fn label(self) -> &'static str {
        match self {
            Target::Speakable => "speakable",
            Target::Summary => "summary",
            Target::AltText => "alt-text",
            Target::Links => "links",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Empty means every kind.
    pub kinds: Vec<ContentKind>,
    pub language: Option<String>,
    pub limit: Option<usize>,
    /// Regenerate even when the field is already set.
    pub force: bool,
    /// List the rows that would be processed without calling the model.
    pub dry_run: bool,
}

/// Collapse whitespace and strip wrapping quotes.
pub fn normalize_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut s = collapsed.as_str();
    loop {
        let stripped = ['"', '\'', '“', '”', '«', '»', '`']
            .iter()
            .find_map(|q| s.strip_prefix(*q))
            .map(|rest| {
                ['"', '\'', '“', '”', '«', '»', '`']
                    .iter()
                    .find_map(|q| rest.strip_suffix(*q))
                    .unwrap_or(rest)
            });
        match stripped {
            Some(rest) if rest.len() < s.len() => s = rest.trim(),
            _ => break,
        }
    }
    s.to_string()
}

/// First `max_words` words of a body.
fn excerpt(body: &str, max_words: usize) -> String {
    body.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cut to at most [`ALT_TEXT_MAX_CHARS`] characters, preferring the last
/// word boundary.
pub fn cap_alt_text(text: &str) -> String {
    let text = normalize_text(text);
    if text.chars().count() <= ALT_TEXT_MAX_CHARS {
        return text;
    }
    let cut: String = text.chars().take(ALT_TEXT_MAX_CHARS).collect();
    let trimmed = match cut.rfind(' ') {
        Some(pos) if pos > ALT_TEXT_MAX_CHARS / 2 => &cut[..pos],
        _ => cut.as_str(),
    };
    trimmed
        .trim_end_matches(|c: char| c == ',' || c == ';' || c == ':' || c.is_whitespace())
        .to_string()
}

pub async fn generate_speakable(
    model: &dyn ChatModel,
    title: &str,
    body: &str,
    cfg: &QualityConfig,
) -> Result<String, GenerateError> {
    let messages = [
        Message::system(format!(
            "You write speakable answers for voice assistants on a real-estate website. \
             Answer the page's main question directly in {}-{} words, as one plain paragraph. \
             No markdown, no lists, no quotes, no preamble. Reply in the page's language.",
            cfg.speakable_min_words, cfg.speakable_max_words
        )),
        Message::user(format!("Title: {}\n\n{}", title, excerpt(body, EXCERPT_WORDS))),
    ];
    let reply = model.complete(&messages, ResponseFormat::Text).await?;
    let answer = normalize_text(&reply);
    if answer.is_empty() {
        return Err(GenerateError::Empty);
    }

    let words = word_count(&answer);
    if words < cfg.speakable_min_words || words > cfg.speakable_max_words {
        return Err(GenerateError::OutOfRange {
            words,
            min: cfg.speakable_min_words,
            max: cfg.speakable_max_words,
        });
    }
    Ok(answer)
}

pub async fn generate_summary(
    model: &dyn ChatModel,
    title: &str,
    body: &str,
) -> Result<String, GenerateError> {
    let messages = [
        Message::system(
            "Summarize the page in 2-3 sentences for a listing card. Plain text, \
             no markdown, same language as the page.",
        ),
        Message::user(format!("Title: {}\n\n{}", title, excerpt(body, EXCERPT_WORDS))),
    ];
    let reply = model.complete(&messages, ResponseFormat::Text).await?;
    let summary = normalize_text(&reply);
    if summary.is_empty() {
        return Err(GenerateError::Empty);
    }
    Ok(summary)
}

pub async fn generate_alt_text(
    model: &dyn ChatModel,
    image: &str,
    context: &str,
) -> Result<String, GenerateError> {
    let prompt = format!(
        "Write alt text for this image in under {} characters. Describe what is visible, \
         no \"image of\" prefix. Page context: {}",
        ALT_TEXT_MAX_CHARS, context
    );
    let reply = model.describe_image(image, &prompt).await?;
    let alt = cap_alt_text(&reply);
    if alt.is_empty() {
        return Err(GenerateError::Empty);
    }
    Ok(alt)
}

/// Read `{"links": [...]}` or a bare array of `{anchor, url, reason?}`.
/// Entries that do not deserialize are dropped.
pub fn parse_suggestions(value: &serde_json::Value) -> Vec<LinkSuggestion> {
    let list = match value {
        serde_json::Value::Array(items) => items.as_slice(),
        serde_json::Value::Object(map) => match map.get("links") {
            Some(serde_json::Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };
    list.iter()
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect()
}

/// Ask for outbound links, keep those whose anchor text occurs in the
/// body, then score them.
pub async fn suggest_links(
    model: &dyn ChatModel,
    title: &str,
    body: &str,
    cfg: &LinksConfig,
) -> Result<Vec<ScoredSuggestion>, GenerateError> {
    let messages = [
        Message::system(format!(
            "Suggest up to {} authoritative external sources (government, official registries, \
             statistics offices, universities) that support claims in the page. Each anchor must \
             be an exact phrase copied from the page text. Reply with JSON: \
             {{\"links\": [{{\"anchor\": \"...\", \"url\": \"https://...\", \"reason\": \"...\"}}]}}",
            cfg.max_links_per_item
        )),
        Message::user(format!("Title: {}\n\n{}", title, excerpt(body, EXCERPT_WORDS))),
    ];
    let reply = model.complete(&messages, ResponseFormat::Json).await?;
    let value = llm::parse_json_reply(&reply)?;

    let lowered = body.to_lowercase();
    let present: Vec<LinkSuggestion> = parse_suggestions(&value)
        .into_iter()
        .filter(|s| {
            let anchor = s.anchor.trim().to_lowercase();
            !anchor.is_empty() && lowered.contains(&anchor)
        })
        .collect();
    Ok(score_suggestions(&present, cfg))
}

async fn needs_work(pool: &SqlitePool, target: Target, item: &ContentItem, force: bool) -> Result<bool> {
    Ok(match target {
        Target::Speakable => force || item.speakable_answer.is_none(),
        Target::Summary => force || item.summary.is_none(),
        Target::AltText => item.featured_image.is_some() && (force || item.featured_image_alt.is_none()),
        Target::Links => {
            force
                || store::list_external_links(pool, Some(&item.id), None)
                    .await?
                    .is_empty()
        }
    })
}

/// Rows the target applies to, honoring `--force` and `--limit`.
pub async fn select_candidates(
    pool: &SqlitePool,
    target: Target,
    opts: &GenerateOptions,
) -> Result<Vec<ContentItem>> {
    let filter = Filter {
        language: opts.language.clone(),
        ..Filter::default()
    };
    let items = store::list_kinds(pool, &opts.kinds, &filter).await?;

    let mut selected = Vec::new();
    for item in items {
        if opts.limit.is_some_and(|l| selected.len() >= l) {
            break;
        }
        if needs_work(pool, target, &item, opts.force).await? {
            selected.push(item);
        }
    }
    Ok(selected)
}

/// Generate and store the target field for one row. Returns whether
/// anything was written.
async fn process_item(
    pool: &SqlitePool,
    model: &dyn ChatModel,
    config: &Config,
    target: Target,
    item: &ContentItem,
) -> Result<bool> {
    match target {
        Target::Speakable => {
            let answer = generate_speakable(model, &item.title, &item.body, &config.quality).await?;
            store::set_field(pool, item.kind, &item.id, Field::SpeakableAnswer, Some(&answer)).await?;
            Ok(true)
        }
        Target::Summary => {
            let summary = generate_summary(model, &item.title, &item.body).await?;
            store::set_field(pool, item.kind, &item.id, Field::Summary, Some(&summary)).await?;
            Ok(true)
        }
        Target::AltText => {
            let Some(image) = item.featured_image.as_deref() else {
                return Ok(false);
            };
            let alt = generate_alt_text(model, image, &item.title).await?;
            store::set_field(pool, item.kind, &item.id, Field::FeaturedImageAlt, Some(&alt)).await?;
            store::upsert_image_metadata(pool, Some(&item.id), image, Some(&alt)).await?;
            Ok(true)
        }
        Target::Links => {
            let suggestions = suggest_links(model, &item.title, &item.body, &config.links).await?;
            let mut inserted = 0usize;
            for s in &suggestions {
                if store::insert_external_link(
                    pool,
                    item.kind,
                    &item.id,
                    &s.suggestion.url,
                    &s.suggestion.anchor,
                    s.authority,
                )
                .await?
                {
                    inserted += 1;
                }
            }
            tracing::debug!(slug = %item.slug, suggested = suggestions.len(), inserted, "link suggestions");
            Ok(inserted > 0)
        }
    }
}

/// Run one target over the selected rows with an explicit pool and model.
pub async fn enrich(
    pool: &SqlitePool,
    model: &dyn ChatModel,
    config: &Config,
    target: Target,
    opts: &GenerateOptions,
) -> Result<RunSummary> {
    let candidates = select_candidates(pool, target, opts).await?;
    let mut summary = RunSummary::default();
    let batch_size = config.llm.batch_size.max(1);
    let delay = Duration::from_millis(config.llm.batch_delay_ms);

    tracing::info!(
        field = target.label(),
        candidates = candidates.len(),
        model = model.model_name(),
        "generate"
    );

    for (n, batch) in candidates.chunks(batch_size).enumerate() {
        if n > 0 && !opts.dry_run && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        for item in batch {
            summary.processed += 1;
            if opts.dry_run {
                println!("  {} {} ({})", item.kind, item.slug, item.language);
                summary.skipped += 1;
                continue;
            }
            match process_item(pool, model, config, target, item).await {
                Ok(true) => summary.updated += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    tracing::warn!(slug = %item.slug, kind = %item.kind, "{} failed: {:#}", target.label(), e);
                    summary.failed += 1;
                }
            }
        }
    }
    Ok(summary)
}

/// `estate generate <target>`.
pub async fn run_generate(config: &Config, target: Target, opts: &GenerateOptions) -> Result<RunSummary> {
    if !opts.dry_run && !config.llm.is_enabled() {
        bail!("LLM provider is disabled. Set [llm] provider in config to run generate.");
    }
    let model = llm::create_chat_model(&config.llm)?;
    let pool = db::connect(config).await?;

    let summary = enrich(&pool, model.as_ref(), config, target, opts).await?;
    println!(
        "generate {}{}",
        target.label(),
        if opts.dry_run { " (dry-run)" } else { "" }
    );
    summary.print();

    pool.close().await;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replies with canned text, in order.
    struct Scripted(Mutex<Vec<String>>);

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self(Mutex::new(replies.iter().rev().map(|s| s.to_string()).collect()))
        }
        fn next(&self) -> Result<String, LlmError> {
            self.0
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| LlmError::MalformedResponse("script exhausted".into()))
        }
    }

    #[async_trait]
    impl ChatModel for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, _m: &[Message], _f: ResponseFormat) -> Result<String, LlmError> {
            self.next()
        }
        async fn describe_image(&self, _i: &str, _p: &str) -> Result<String, LlmError> {
            self.next()
        }
    }

    #[test]
    fn normalizes_whitespace_and_quotes() {
        assert_eq!(normalize_text("  \"Hello\n\n  world\"  "), "Hello world");
        assert_eq!(normalize_text("“Quoted”"), "Quoted");
        assert_eq!(normalize_text("It's fine"), "It's fine");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn alt_text_capped_at_word_boundary() {
        let long = "White villa with infinity pool overlooking the Mediterranean sea at sunset, \
                    palm trees on both sides, terrace with loungers and a covered dining area";
        let alt = cap_alt_text(long);
        assert!(alt.chars().count() <= ALT_TEXT_MAX_CHARS);
        assert!(long.starts_with(&alt));
        assert!(!alt.ends_with(' ') && !alt.ends_with(','));
        assert_eq!(cap_alt_text("Short alt"), "Short alt");
    }

    #[test]
    fn suggestions_from_object_or_array() {
        let obj = serde_json::json!({ "links": [
            { "anchor": "BOE", "url": "https://boe.es" },
            { "bogus": true }
        ]});
        assert_eq!(parse_suggestions(&obj).len(), 1);
        let arr = serde_json::json!([{ "anchor": "INE", "url": "https://ine.es", "reason": "stats" }]);
        assert_eq!(parse_suggestions(&arr)[0].reason.as_deref(), Some("stats"));
        assert!(parse_suggestions(&serde_json::json!("nope")).is_empty());
    }

    #[tokio::test]
    async fn speakable_in_range_is_accepted() {
        let answer = format!("\"{}\"", "word ".repeat(45).trim());
        let model = Scripted::new(&[&answer]);
        let out = generate_speakable(&model, "T", "body", &QualityConfig::default())
            .await
            .unwrap();
        assert_eq!(word_count(&out), 45);
        assert!(!out.starts_with('"'));
    }

    #[tokio::test]
    async fn speakable_out_of_range_is_rejected() {
        let model = Scripted::new(&["far too short"]);
        let err = generate_speakable(&model, "T", "body", &QualityConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::OutOfRange { words: 3, min: 40, max: 60 }));
    }

    #[tokio::test]
    async fn link_suggestions_need_anchor_in_body() {
        let reply = r#"```json
        {"links": [
            {"anchor": "transfer tax", "url": "https://www.boe.es/itp"},
            {"anchor": "not in body", "url": "https://ine.es"},
            {"anchor": "notary", "url": "https://random-blog.com"}
        ]}
        ```"#;
        let model = Scripted::new(&[reply]);
        let body = "The Transfer Tax is paid at the notary.";
        let scored = suggest_links(&model, "T", body, &LinksConfig::default())
            .await
            .unwrap();
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].suggestion.url, "https://www.boe.es/itp");
        assert_eq!(scored[0].authority, 95);
    }

    #[tokio::test]
    async fn disabled_model_surfaces_llm_error() {
        let err = generate_summary(&crate::llm::DisabledChat, "T", "b")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::Llm(LlmError::Disabled)));
    }
}
