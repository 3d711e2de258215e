//! TOML configuration.
//!
//! One file drives every command: database location, site identity and
//! languages, markdown tree, sitemap output, quality thresholds, the LLM
//! provider and the external-link authority table. Credentials are read
//! from the environment, never from this file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub site: SiteConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub sitemap: SitemapConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub links: LinksConfig,
    #[serde(default)]
    pub dedupe: DedupeConfig,
    #[serde(default)]
    pub categories: CategoriesConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    pub base_url: String,
    #[serde(default = "default_site_name")]
    pub name: String,
    #[serde(default)]
    pub logo_url: Option<String>,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_language")]
    pub default_language: String,
}

fn default_site_name() -> String {
    "Real Estate Guide".to_string()
}
fn default_languages() -> Vec<String> {
    vec!["en".to_string()]
}
fn default_language() -> String {
    "en".to_string()
}

impl SiteConfig {
    /// Base URL without a trailing slash.
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    #[serde(default = "default_content_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            root: default_content_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_content_root() -> PathBuf {
    PathBuf::from("./content")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct SitemapConfig {
    #[serde(default = "default_sitemap_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_max_urls")]
    pub max_urls_per_file: usize,
}

impl Default for SitemapConfig {
    fn default() -> Self {
        Self {
            output_dir: default_sitemap_dir(),
            max_urls_per_file: default_max_urls(),
        }
    }
}

fn default_sitemap_dir() -> PathBuf {
    PathBuf::from("./public")
}
fn default_max_urls() -> usize {
    45_000
}

/// Thresholds shared by the validator and the quality scorer.
#[derive(Debug, Deserialize, Clone)]
pub struct QualityConfig {
    #[serde(default = "default_speakable_min")]
    pub speakable_min_words: usize,
    #[serde(default = "default_speakable_max")]
    pub speakable_max_words: usize,
    #[serde(default = "default_min_body_words")]
    pub min_body_words: usize,
    #[serde(default = "default_min_external_links")]
    pub min_external_links: usize,
    #[serde(default = "default_meta_min")]
    pub meta_description_min: usize,
    #[serde(default = "default_meta_max")]
    pub meta_description_max: usize,
    #[serde(default = "default_title_max")]
    pub title_max: usize,
    #[serde(default = "default_pass_score")]
    pub pass_score: u8,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            speakable_min_words: default_speakable_min(),
            speakable_max_words: default_speakable_max(),
            min_body_words: default_min_body_words(),
            min_external_links: default_min_external_links(),
            meta_description_min: default_meta_min(),
            meta_description_max: default_meta_max(),
            title_max: default_title_max(),
            pass_score: default_pass_score(),
        }
    }
}

fn default_speakable_min() -> usize {
    40
}
fn default_speakable_max() -> usize {
    60
}
fn default_min_body_words() -> usize {
    800
}
fn default_min_external_links() -> usize {
    2
}
fn default_meta_min() -> usize {
    50
}
fn default_meta_max() -> usize {
    160
}
fn default_title_max() -> usize {
    60
}
fn default_pass_score() -> u8 {
    70
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub vision_model: Option<String>,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            vision_model: None,
            base_url: default_llm_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            temperature: default_temperature(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_batch_size() -> usize {
    5
}
fn default_batch_delay_ms() -> u64 {
    1000
}
fn default_temperature() -> f32 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct LinksConfig {
    /// Domain → authority weight (0-100). Parent domains match subdomains.
    #[serde(default = "default_authority_domains")]
    pub authority_domains: BTreeMap<String, u8>,
    #[serde(default = "default_max_links")]
    pub max_links_per_item: usize,
    #[serde(default = "default_min_authority")]
    pub min_authority: u8,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            authority_domains: default_authority_domains(),
            max_links_per_item: default_max_links(),
            min_authority: default_min_authority(),
        }
    }
}

fn default_authority_domains() -> BTreeMap<String, u8> {
    [
        ("agenciatributaria.gob.es", 95),
        ("boe.es", 95),
        ("ine.es", 90),
        ("registradores.org", 85),
        ("notariado.org", 85),
        ("europa.eu", 90),
        ("bde.es", 90),
        ("idealista.com", 60),
        ("fotocasa.es", 55),
        ("wikipedia.org", 50),
    ]
    .into_iter()
    .map(|(d, w)| (d.to_string(), w))
    .collect()
}
fn default_max_links() -> usize {
    5
}
fn default_min_authority() -> u8 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupeConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_similarity_threshold() -> f64 {
    0.8
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CategoriesConfig {
    /// Raw category name → canonical category name.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

impl Config {
    /// Configuration used by file-only commands when no config file exists.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/estate.sqlite"),
            },
            site: SiteConfig {
                base_url: "http://localhost".to_string(),
                name: default_site_name(),
                logo_url: None,
                languages: default_languages(),
                default_language: default_language(),
            },
            content: ContentConfig::default(),
            sitemap: SitemapConfig::default(),
            quality: QualityConfig::default(),
            llm: LlmConfig::default(),
            links: LinksConfig::default(),
            dedupe: DedupeConfig::default(),
            categories: CategoriesConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate site
    if !config.site.base_url.starts_with("http") {
        anyhow::bail!("site.base_url must start with http:// or https://");
    }
    if config.site.languages.is_empty() {
        anyhow::bail!("site.languages must not be empty");
    }
    if !config
        .site
        .languages
        .contains(&config.site.default_language)
    {
        anyhow::bail!(
            "site.default_language '{}' is not listed in site.languages",
            config.site.default_language
        );
    }

    // Validate quality
    let q = &config.quality;
    if q.speakable_min_words > q.speakable_max_words {
        anyhow::bail!("quality.speakable_min_words must be <= quality.speakable_max_words");
    }
    if q.meta_description_min > q.meta_description_max {
        anyhow::bail!("quality.meta_description_min must be <= quality.meta_description_max");
    }
    if q.pass_score > 100 {
        anyhow::bail!("quality.pass_score must be in [0, 100]");
    }

    // Validate sitemap
    if !(1..=50_000).contains(&config.sitemap.max_urls_per_file) {
        anyhow::bail!("sitemap.max_urls_per_file must be in [1, 50000]");
    }

    // Validate dedupe
    let t = config.dedupe.similarity_threshold;
    if !(t > 0.0 && t <= 1.0) {
        anyhow::bail!("dedupe.similarity_threshold must be in (0.0, 1.0]");
    }

    if config.links.authority_domains.values().any(|w| *w > 100) {
        anyhow::bail!("links.authority_domains weights must be in [0, 100]");
    }

    // Validate llm
    if config.llm.batch_size == 0 {
        anyhow::bail!("llm.batch_size must be > 0");
    }
    match config.llm.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.llm.model.is_none() {
                anyhow::bail!("llm.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}
