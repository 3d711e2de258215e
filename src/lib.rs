//! # estate-content
//!
//! Content maintenance toolkit for a multilingual real-estate marketing
//! site: articles, blog posts and FAQs stored in SQLite and mirrored as a
//! markdown tree.
//!
//! Every command is a run-to-completion pass over the content rows: read,
//! transform, write back, report.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Markdown     │◀─▶│ markdown_sync │◀─▶│  SQLite  │
//! │ tree (YAML)  │   │  frontmatter  │   │  store   │
//! └──────────────┘   └──────────────┘   └────┬─────┘
//!                                            │
//!      ┌───────────────┬───────────────┬─────┴─────────┬──────────────┐
//!      ▼               ▼               ▼               ▼              ▼
//! ┌──────────┐  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌──────────┐
//! │ validate │  │ sitemap    │  │ quality    │  │ enrich     │  │ server   │
//! │          │  │ schema     │  │ duplicates │  │ links, llm │  │ (axum)   │
//! └──────────┘  └────────────┘  └────────────┘  └────────────┘  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! estate init                     # create database
//! estate import                   # load content/<kind>/<lang>/<slug>.md
//! estate validate                 # slugs, links, speakable answers, JSON-LD
//! estate generate speakable       # fill missing speakable answers via the LLM
//! estate schema generate          # build JSON-LD
//! estate sitemap                  # write sitemaps
//! estate serve                    # start the HTTP functions
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`db`] / [`migrate`] / [`store`] | Connection, schema and row queries |
//! | [`frontmatter`] / [`markdown_sync`] | Markdown tree ↔ database |
//! | [`validate`] | Content validation rules |
//! | [`schema`] | JSON-LD builders and required-key checks |
//! | [`sitemap`] | Sitemap XML generation |
//! | [`quality`] | Content-quality scoring |
//! | [`duplicates`] | Duplicate cleanup and category normalization |
//! | [`links`] | Link authority scoring and injection |
//! | [`llm`] | Chat-completion client abstraction |
//! | [`enrich`] | LLM-backed field generation |
//! | [`server`] | HTTP functions server |
//! | [`stats`] / [`get`] / [`export`] | Reports |

pub mod config;
pub mod db;
pub mod duplicates;
pub mod enrich;
pub mod export;
pub mod frontmatter;
pub mod get;
pub mod links;
pub mod llm;
pub mod markdown_sync;
pub mod migrate;
pub mod models;
pub mod quality;
pub mod report;
pub mod schema;
pub mod server;
pub mod sitemap;
pub mod stats;
pub mod store;
pub mod validate;
