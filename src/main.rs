//! # estate CLI
//!
//! The `estate` binary runs the content maintenance commands of the site:
//! markdown sync, validation, sitemaps, JSON-LD, quality scoring, cleanup,
//! LLM enrichment and the HTTP functions server.
//!
//! ## Usage
//!
//! ```bash
//! estate --config ./config/estate.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `estate init` | Create the SQLite database and run schema migrations |
//! | `estate import` | Load the markdown tree into the database |
//! | `estate frontmatter check <PATH>...` | Parse markdown files without the database |
//! | `estate export [DIR]` | Write every row back out as markdown |
//! | `estate validate` | Check slugs, links, speakable answers and JSON-LD |
//! | `estate sitemap [DIR]` | Write the sitemap files and index |
//! | `estate schema generate` | Build and store JSON-LD for each row |
//! | `estate score` | Quality score for stored rows |
//! | `estate score-file <FILE>` | Quality score for one markdown file |
//! | `estate dedupe` | Find (and with `--apply`, archive) duplicate rows |
//! | `estate categories` | Normalize categories through the alias table |
//! | `estate links suggest/inject/list` | External-link suggestions |
//! | `estate generate <target>` | LLM field generation |
//! | `estate serve` | Start the HTTP functions server |
//! | `estate stats` / `get` / `export-json` | Reports |
//!
//! Batch commands exit with status 1 when any item failed.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use estate_content::enrich::{self, GenerateOptions, Target};
use estate_content::models::{ContentKind, LinkStatus};
use estate_content::{
    config, duplicates, export, get, links, markdown_sync, migrate, quality, schema, server,
    sitemap, stats, validate,
};

/// Content maintenance toolkit for a multilingual real-estate site.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/estate.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "estate",
    about = "Content maintenance toolkit for a multilingual real-estate site",
    version,
    long_about = "Keeps the site's articles, blog posts and FAQs in shape: syncs the markdown \
    tree with the database, validates content, writes sitemaps and JSON-LD, scores pages for \
    search and voice readiness, and fills missing fields with an LLM."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/estate.toml")]
    config: PathBuf,

    /// Log debug output to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Only log errors.
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Import the markdown tree (`content.root`) into the database.
    Import {
        /// Count what would change without writing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Frontmatter checks that need no database.
    Frontmatter {
        #[command(subcommand)]
        action: FrontmatterAction,
    },

    /// Export every row as markdown with frontmatter.
    Export {
        /// Output directory; defaults to `content.root`.
        dir: Option<PathBuf>,
    },

    /// Validate stored content. Exits 1 when any error is found.
    Validate {
        #[arg(long, value_parser = parse_kind)]
        kind: Vec<ContentKind>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Write sitemap files and the sitemap index.
    Sitemap {
        /// Output directory; defaults to `sitemap.output_dir`.
        dir: Option<PathBuf>,
    },

    /// JSON-LD maintenance.
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// Score stored rows for content quality.
    Score {
        #[arg(long, value_parser = parse_kind)]
        kind: Vec<ContentKind>,

        #[arg(long)]
        lang: Option<String>,

        /// Only list rows scoring below this value.
        #[arg(long)]
        below: Option<u8>,
    },

    /// Score a markdown file. Exits 1 when it does not pass.
    ScoreFile {
        path: PathBuf,

        #[arg(long, value_parser = parse_kind, default_value = "article")]
        kind: ContentKind,
    },

    /// Find duplicate rows by title similarity.
    Dedupe {
        #[arg(long, value_parser = parse_kind)]
        kind: Vec<ContentKind>,

        /// Archive the duplicates instead of only reporting them.
        #[arg(long)]
        apply: bool,
    },

    /// Normalize categories through `[categories].aliases`.
    Categories {
        #[arg(long, value_parser = parse_kind)]
        kind: Vec<ContentKind>,

        /// Write the new categories instead of only reporting them.
        #[arg(long)]
        apply: bool,
    },

    /// External-link suggestions.
    Links {
        #[command(subcommand)]
        action: LinksAction,
    },

    /// Generate a missing field with the configured LLM.
    Generate {
        target: Target,

        #[arg(long, value_parser = parse_kind)]
        kind: Vec<ContentKind>,

        #[arg(long)]
        lang: Option<String>,

        /// Maximum number of rows to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Regenerate rows that already have the field.
        #[arg(long)]
        force: bool,

        /// List the rows that would be processed.
        #[arg(long)]
        dry_run: bool,
    },

    /// Start the HTTP functions server on `[server].bind`.
    Serve,

    /// Row counts, missing fields, links and database size.
    Stats,

    /// Print one row.
    Get {
        #[arg(value_parser = parse_kind)]
        kind: ContentKind,

        slug: String,

        /// Language; defaults to `site.default_language`.
        #[arg(long)]
        lang: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Dump published rows as JSON for the static front end.
    ExportJson {
        /// Output file; stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum FrontmatterAction {
    /// Parse markdown files (or directories of them) and report errors.
    /// Exits 1 when any file fails.
    Check {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
enum SchemaAction {
    /// Build JSON-LD for rows that have none.
    Generate {
        #[arg(long, value_parser = parse_kind)]
        kind: Vec<ContentKind>,

        /// Rebuild rows that already have JSON-LD.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum LinksAction {
    /// Ask the LLM for outbound links and store them as `suggested`.
    Suggest {
        #[arg(long, value_parser = parse_kind)]
        kind: Vec<ContentKind>,

        #[arg(long)]
        lang: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        force: bool,

        #[arg(long)]
        dry_run: bool,
    },

    /// Splice `suggested` links into item bodies.
    Inject {
        #[arg(long, value_parser = parse_kind)]
        kind: Vec<ContentKind>,

        #[arg(long)]
        dry_run: bool,
    },

    /// List stored links.
    List {
        /// `suggested`, `injected` or `rejected`.
        #[arg(long, value_parser = parse_link_status)]
        status: Option<LinkStatus>,
    },
}

fn parse_kind(s: &str) -> Result<ContentKind, String> {
    ContentKind::parse(s).map_err(|e| e.to_string())
}

fn parse_link_status(s: &str) -> Result<LinkStatus, String> {
    LinkStatus::parse(s).ok_or_else(|| format!("unknown link status '{}'", s))
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("ESTATE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

/// Defaults stand in only for an absent config file; a present but
/// unreadable or invalid one is still an error.
fn load_config_or_minimal(path: &Path) -> anyhow::Result<config::Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(config::Config::minimal());
    }
    config::load_config(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    // File-only commands work without a config
    match &cli.command {
        Commands::ScoreFile { path, kind } => {
            let cfg = load_config_or_minimal(&cli.config)?;
            let report = quality::run_score_file(&cfg, path, *kind)?;
            if !report.passed {
                anyhow::bail!(
                    "score {} is below pass score {}",
                    report.score,
                    cfg.quality.pass_score
                );
            }
            return Ok(());
        }
        Commands::Frontmatter {
            action: FrontmatterAction::Check { paths },
        } => {
            let cfg = load_config_or_minimal(&cli.config)?;
            return markdown_sync::run_check(&cfg, paths)?.finish("frontmatter check");
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { dry_run } => {
            markdown_sync::run_import(&cfg, dry_run).await?.finish("import")?;
        }
        Commands::Export { dir } => {
            markdown_sync::run_export(&cfg, dir.as_deref()).await?.finish("export")?;
        }
        Commands::Validate { kind, json } => {
            let report = validate::run_validate(&cfg, &kind, json).await?;
            if report.errors() > 0 {
                anyhow::bail!("validate: {} errors in {} rows", report.errors(), report.checked);
            }
        }
        Commands::Sitemap { dir } => {
            sitemap::run_sitemap(&cfg, dir.as_deref()).await?.finish("sitemap")?;
        }
        Commands::Schema { action } => match action {
            SchemaAction::Generate { kind, force } => {
                schema::run_generate(&cfg, &kind, force).await?.finish("schema generate")?;
            }
        },
        Commands::Score { kind, lang, below } => {
            quality::run_score(&cfg, &kind, lang, below).await?;
        }
        Commands::ScoreFile { .. } | Commands::Frontmatter { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
        Commands::Dedupe { kind, apply } => {
            duplicates::run_dedupe(&cfg, &kind, apply).await?.finish("dedupe")?;
        }
        Commands::Categories { kind, apply } => {
            duplicates::run_categories(&cfg, &kind, apply).await?.finish("categories")?;
        }
        Commands::Links { action } => match action {
            LinksAction::Suggest {
                kind,
                lang,
                limit,
                force,
                dry_run,
            } => {
                let opts = GenerateOptions {
                    kinds: kind,
                    language: lang,
                    limit,
                    force,
                    dry_run,
                };
                enrich::run_generate(&cfg, Target::Links, &opts)
                    .await?
                    .finish("links suggest")?;
            }
            LinksAction::Inject { kind, dry_run } => {
                links::run_inject(&cfg, &kind, dry_run).await?.finish("links inject")?;
            }
            LinksAction::List { status } => {
                links::run_list(&cfg, status).await?;
            }
        },
        Commands::Generate {
            target,
            kind,
            lang,
            limit,
            force,
            dry_run,
        } => {
            let opts = GenerateOptions {
                kinds: kind,
                language: lang,
                limit,
                force,
                dry_run,
            };
            enrich::run_generate(&cfg, target, &opts).await?.finish("generate")?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Get {
            kind,
            slug,
            lang,
            json,
        } => {
            get::run_get(&cfg, kind, &slug, lang.as_deref(), json).await?;
        }
        Commands::ExportJson { output } => {
            export::run_export_json(&cfg, output.as_deref()).await?;
        }
    }

    Ok(())
}
