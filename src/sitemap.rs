//! XML sitemap generation.
//!
//! Published rows are grouped into one sitemap per content kind and
//! language (`sitemap-<segment>-<lang>.xml`), split into numbered parts
//! when a file would exceed `sitemap.max_urls_per_file`. Rows that share a
//! `translation_group` list each other as `hreflang` alternates, with
//! `x-default` pointing at the default-language version. Language home and
//! section pages go into `sitemap-pages.xml`, and `sitemap-index.xml` lists
//! every file.

use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::config::{Config, SiteConfig};
use crate::db;
use crate::frontmatter::format_date;
use crate::models::{ContentItem, ContentKind};
use crate::report::RunSummary;
use crate::store::{self, Filter};

const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";
const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";
pub const INDEX_FILE: &str = "sitemap-index.xml";
pub const PAGES_FILE: &str = "sitemap-pages.xml";

#[derive(Debug, Clone, PartialEq)]
pub struct SitemapUrl {
    pub loc: String,
    pub lastmod: Option<String>,
    /// `(hreflang, href)` pairs, including the URL itself.
    pub alternates: Vec<(String, String)>,
}

/// A rendered sitemap file.
#[derive(Debug, Clone)]
pub struct SitemapFile {
    pub name: String,
    pub url_count: usize,
    pub lastmod: Option<String>,
    pub xml: String,
}

/// Render a `<urlset>` document.
pub fn render_urlset(urls: &[SitemapUrl]) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut urlset = BytesStart::new("urlset");
    urlset.push_attribute(("xmlns", SITEMAP_NS));
    if urls.iter().any(|u| !u.alternates.is_empty()) {
        urlset.push_attribute(("xmlns:xhtml", XHTML_NS));
    }
    writer.write_event(Event::Start(urlset))?;

    for url in urls {
        writer.write_event(Event::Start(BytesStart::new("url")))?;
        write_text_element(&mut writer, "loc", &url.loc)?;
        if let Some(ref lastmod) = url.lastmod {
            write_text_element(&mut writer, "lastmod", lastmod)?;
        }
        for (hreflang, href) in &url.alternates {
            let mut link = BytesStart::new("xhtml:link");
            link.push_attribute(("rel", "alternate"));
            link.push_attribute(("hreflang", hreflang.as_str()));
            link.push_attribute(("href", href.as_str()));
            writer.write_event(Event::Empty(link))?;
        }
        writer.write_event(Event::End(BytesEnd::new("url")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("urlset")))?;
    into_string(writer)
}

/// Render a `<sitemapindex>` document from `(loc, lastmod)` pairs.
pub fn render_index(entries: &[(String, Option<String>)]) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut index = BytesStart::new("sitemapindex");
    index.push_attribute(("xmlns", SITEMAP_NS));
    writer.write_event(Event::Start(index))?;

    for (loc, lastmod) in entries {
        writer.write_event(Event::Start(BytesStart::new("sitemap")))?;
        write_text_element(&mut writer, "loc", loc)?;
        if let Some(lastmod) = lastmod {
            write_text_element(&mut writer, "lastmod", lastmod)?;
        }
        writer.write_event(Event::End(BytesEnd::new("sitemap")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("sitemapindex")))?;
    into_string(writer)
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn into_string(writer: Writer<Vec<u8>>) -> Result<String> {
    let mut xml = String::from_utf8(writer.into_inner()).context("sitemap is not UTF-8")?;
    xml.push('\n');
    Ok(xml)
}

/// Alternates for every row in a translation group with more than one
/// language. Rows without a group (or alone in it) get none.
fn alternates_by_id(items: &[ContentItem], site: &SiteConfig) -> HashMap<String, Vec<(String, String)>> {
    let mut groups: BTreeMap<(ContentKind, &str), Vec<&ContentItem>> = BTreeMap::new();
    for item in items {
        if let Some(ref group) = item.translation_group {
            groups.entry((item.kind, group.as_str())).or_default().push(item);
        }
    }

    let mut result = HashMap::new();
    for members in groups.values() {
        if members.len() < 2 {
            continue;
        }
        let mut links: Vec<(String, String)> = members
            .iter()
            .map(|m| (m.language.clone(), m.url(site.base())))
            .collect();
        links.sort();
        links.dedup_by(|a, b| a.0 == b.0);
        if let Some(default) = members.iter().find(|m| m.language == site.default_language) {
            links.push(("x-default".to_string(), default.url(site.base())));
        }
        for m in members {
            result.insert(m.id.clone(), links.clone());
        }
    }
    result
}

fn page_urls(site: &SiteConfig) -> Vec<SitemapUrl> {
    let base = site.base();
    let mut paths = vec![String::new()];
    paths.extend(ContentKind::ALL.iter().map(|k| format!("/{}", k.segment())));

    let mut urls = Vec::new();
    for path in &paths {
        let alternates: Vec<(String, String)> = if site.languages.len() > 1 {
            let mut alts: Vec<(String, String)> = site
                .languages
                .iter()
                .map(|l| (l.clone(), format!("{}/{}{}", base, l, path)))
                .collect();
            alts.push((
                "x-default".to_string(),
                format!("{}/{}{}", base, site.default_language, path),
            ));
            alts
        } else {
            Vec::new()
        };
        for lang in &site.languages {
            urls.push(SitemapUrl {
                loc: format!("{}/{}{}", base, lang, path),
                lastmod: None,
                alternates: alternates.clone(),
            });
        }
    }
    urls
}

/// Build every sitemap file (index last) from published rows.
pub fn generate(items: &[ContentItem], site: &SiteConfig, max_urls: usize) -> Result<Vec<SitemapFile>> {
    let published: Vec<ContentItem> = items.iter().filter(|i| i.is_published()).cloned().collect();
    let alternates = alternates_by_id(&published, site);

    let mut buckets: BTreeMap<(ContentKind, String), Vec<&ContentItem>> = BTreeMap::new();
    for item in &published {
        buckets
            .entry((item.kind, item.language.clone()))
            .or_default()
            .push(item);
    }

    let mut files = Vec::new();

    let pages = page_urls(site);
    files.push(SitemapFile {
        name: PAGES_FILE.to_string(),
        url_count: pages.len(),
        lastmod: None,
        xml: render_urlset(&pages)?,
    });

    for ((kind, lang), mut rows) in buckets {
        rows.sort_by(|a, b| a.slug.cmp(&b.slug));
        let parts: Vec<&[&ContentItem]> = rows.chunks(max_urls.max(1)).collect();
        let numbered = parts.len() > 1;

        for (i, part) in parts.iter().enumerate() {
            let urls: Vec<SitemapUrl> = part
                .iter()
                .map(|item| SitemapUrl {
                    loc: item.url(site.base()),
                    lastmod: Some(format_date(item.updated_at)),
                    alternates: alternates.get(&item.id).cloned().unwrap_or_default(),
                })
                .collect();
            let lastmod = part.iter().map(|i| i.updated_at).max().map(format_date);
            let name = if numbered {
                format!("sitemap-{}-{}-{}.xml", kind.segment(), lang, i + 1)
            } else {
                format!("sitemap-{}-{}.xml", kind.segment(), lang)
            };
            files.push(SitemapFile {
                name,
                url_count: urls.len(),
                lastmod,
                xml: render_urlset(&urls)?,
            });
        }
    }

    let entries: Vec<(String, Option<String>)> = files
        .iter()
        .map(|f| (format!("{}/{}", site.base(), f.name), f.lastmod.clone()))
        .collect();
    files.push(SitemapFile {
        name: INDEX_FILE.to_string(),
        url_count: entries.len(),
        lastmod: None,
        xml: render_index(&entries)?,
    });

    Ok(files)
}

/// Write all sitemap files to `out_dir` (or `sitemap.output_dir`).
pub async fn run_sitemap(config: &Config, out_dir: Option<&Path>) -> Result<RunSummary> {
    let out_dir = out_dir.unwrap_or(config.sitemap.output_dir.as_path());
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let pool = db::connect(config).await?;
    let items = store::list_kinds(&pool, &[], &Filter::published()).await?;
    pool.close().await;

    let files = generate(&items, &config.site, config.sitemap.max_urls_per_file)?;

    let mut summary = RunSummary::default();
    println!("sitemap {}", out_dir.display());
    for file in &files {
        summary.processed += 1;
        let path = out_dir.join(&file.name);
        match std::fs::write(&path, &file.xml) {
            Ok(()) => {
                summary.updated += 1;
                println!("  {:<36} {:>6} urls", file.name, file.url_count);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to write sitemap: {}", e);
                summary.failed += 1;
            }
        }
    }
    summary.print();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Status;

    fn site() -> SiteConfig {
        let mut site = crate::config::Config::minimal().site;
        site.base_url = "https://homes.test".into();
        site.languages = vec!["en".into(), "es".into()];
        site
    }

    fn published(kind: ContentKind, lang: &str, slug: &str, group: Option<&str>) -> ContentItem {
        let mut item = ContentItem::new(kind, lang, slug, slug, "body");
        item.status = Status::Published;
        item.updated_at = 86_400;
        item.translation_group = group.map(str::to_string);
        item
    }

    #[test]
    fn escapes_loc() {
        let xml = render_urlset(&[SitemapUrl {
            loc: "https://homes.test/en/blog/a&b".into(),
            lastmod: None,
            alternates: vec![],
        }])
        .unwrap();
        assert!(xml.contains("<loc>https://homes.test/en/blog/a&amp;b</loc>"));
        assert!(!xml.contains("xmlns:xhtml"));
    }

    #[test]
    fn one_file_per_kind_and_language_plus_index() {
        let mut draft = published(ContentKind::Article, "en", "draft", None);
        draft.status = Status::Draft;
        let items = vec![
            published(ContentKind::Article, "en", "villa-guide", Some("g1")),
            published(ContentKind::Article, "es", "guia-villa", Some("g1")),
            published(ContentKind::BlogPost, "en", "market-2024", None),
            draft,
        ];
        let files = generate(&items, &site(), 100).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                PAGES_FILE,
                "sitemap-articles-en.xml",
                "sitemap-articles-es.xml",
                "sitemap-blog-en.xml",
                INDEX_FILE
            ]
        );

        let articles_en = &files[1].xml;
        assert!(articles_en.contains("<lastmod>1970-01-02</lastmod>"));
        assert!(articles_en.contains(r#"hreflang="es" href="https://homes.test/es/articles/guia-villa""#));
        assert!(articles_en.contains(r#"hreflang="x-default" href="https://homes.test/en/articles/villa-guide""#));
        assert!(!files[3].xml.contains("hreflang"));
        assert!(!files.iter().any(|f| f.xml.contains("/draft")));

        let index = &files[4].xml;
        assert!(index.contains("<loc>https://homes.test/sitemap-blog-en.xml</loc>"));
        assert_eq!(files[4].url_count, 4);
    }

    #[test]
    fn splits_large_buckets() {
        let items: Vec<ContentItem> = (0..5)
            .map(|i| published(ContentKind::Faq, "en", &format!("q-{}", i), None))
            .collect();
        let files = generate(&items, &site(), 2).unwrap();
        let faq: Vec<&SitemapFile> = files.iter().filter(|f| f.name.starts_with("sitemap-faq")).collect();
        assert_eq!(faq.len(), 3);
        assert_eq!(faq[0].name, "sitemap-faq-en-1.xml");
        assert_eq!(faq[2].url_count, 1);
    }

    #[test]
    fn pages_cover_every_language() {
        let files = generate(&[], &site(), 10).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].url_count, 8);
        assert!(files[0].xml.contains("<loc>https://homes.test/es/faq</loc>"));
    }
}
