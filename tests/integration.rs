use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn estate_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("estate");
    path
}

fn words(n: usize) -> String {
    vec!["answer"; n].join(" ")
}

fn write_content(root: &Path, relative: &str, text: &str) {
    let path = root.join("content").join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    write_content(
        &root,
        "articles/en/buying-guide.md",
        &format!(
            "---\ntitle: Buying a home on the coast\nstatus: published\npublished_at: 2024-03-05\n\
             meta_description: What to budget for when buying a home on the coast, from transfer tax to notary fees.\n\
             speakable_answer: {}\ncategory: Buying & Selling\n---\n\n\
             ## How much is transfer tax?\n\nIt depends on the region. See [what a NIE is](/en/faq/what-is-nie).\n",
            words(45)
        ),
    );
    write_content(
        &root,
        "faq/en/what-is-nie.md",
        &format!(
            "---\ntitle: What is a NIE?\nstatus: published\n\
             meta_description: The foreigner identification number you need before buying property in Spain.\n\
             speakable_answer: {}\n---\n\n## What is a NIE?\n\nA tax identification number for foreigners.\n",
            words(50)
        ),
    );
    write_content(
        &root,
        "blog/es/comprar-casa.md",
        "---\ntitle: Comprar casa en la costa\nstatus: draft\n---\n\nBorrador.\n",
    );

    let config_content = format!(
        r#"[db]
path = "{root}/data/estate.sqlite"

[site]
base_url = "https://homes.test"
name = "Coastal Homes"
languages = ["en", "es"]
default_language = "en"

[content]
root = "{root}/content"

[sitemap]
output_dir = "{root}/public"

[server]
bind = "127.0.0.1:7341"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("estate.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_estate(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = estate_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run estate binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn init_and_import(config_path: &Path) {
    let (_, stderr, success) = run_estate(config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    let (stdout, stderr, success) = run_estate(config_path, &["import"]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
}

fn get_json(config_path: &Path, kind: &str, slug: &str) -> serde_json::Value {
    let (stdout, stderr, success) = run_estate(config_path, &["get", kind, slug, "--json"]);
    assert!(success, "get failed: {}", stderr);
    serde_json::from_str(&stdout).unwrap()
}

fn append_config(config_path: &Path, text: &str) {
    let mut content = fs::read_to_string(config_path).unwrap();
    content.push_str(text);
    fs::write(config_path, content).unwrap();
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_estate(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_estate(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_estate(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_then_reimport_skips_unchanged() {
    let (_tmp, config_path) = setup_test_env();

    run_estate(&config_path, &["init"]);
    let (stdout, stderr, success) = run_estate(&config_path, &["import"]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("updated: 3"), "got: {}", stdout);
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_estate(&config_path, &["import"]);
    assert!(success);
    assert!(stdout.contains("skipped: 3"), "got: {}", stdout);
    assert!(stdout.contains("updated: 0"));
}

#[test]
fn test_import_dry_run() {
    let (_tmp, config_path) = setup_test_env();

    run_estate(&config_path, &["init"]);
    let (stdout, _, success) = run_estate(&config_path, &["import", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("files found: 3"));
}

#[test]
fn test_import_counts_bad_file_and_exits_nonzero() {
    let (tmp, config_path) = setup_test_env();
    write_content(tmp.path(), "articles/en/untitled.md", "---\nstatus: draft\n---\n\nNo title.\n");

    run_estate(&config_path, &["init"]);
    let (stdout, stderr, success) = run_estate(&config_path, &["import"]);
    assert!(!success, "import should fail when a file is invalid");
    assert!(stdout.contains("updated: 3"), "got: {}", stdout);
    assert!(stdout.contains("failed: 1"));
    assert!(stderr.contains("1 of 4"), "stderr: {}", stderr);
}

#[test]
fn test_validate_clean_content() {
    let (_tmp, config_path) = setup_test_env();
    init_and_import(&config_path);

    let (stdout, stderr, success) = run_estate(&config_path, &["validate"]);
    assert!(success, "validate failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("checked: 3"));
    assert!(stdout.contains("errors: 0"));
}

#[test]
fn test_validate_reports_errors() {
    let (tmp, config_path) = setup_test_env();
    write_content(
        tmp.path(),
        "articles/en/broken-page.md",
        "---\ntitle: Broken\nspeakable_answer: far too short\nfeatured_image: /img/x.jpg\n---\n\n\
         See [missing](/en/articles/nowhere) and [bad](htps//example).\n",
    );
    init_and_import(&config_path);

    let (stdout, _, success) = run_estate(&config_path, &["validate"]);
    assert!(!success, "validate should exit 1: {}", stdout);
    assert!(stdout.contains("errors: 4"), "got: {}", stdout);
    assert!(stdout.contains("[speakable_answer]"));
    assert!(stdout.contains("[image_alt]"));
    assert!(stdout.contains("[internal_link]"));
    assert!(stdout.contains("[external_link]"));
}

#[test]
fn test_sitemap_lists_published_only() {
    let (tmp, config_path) = setup_test_env();
    init_and_import(&config_path);

    let (stdout, stderr, success) = run_estate(&config_path, &["sitemap"]);
    assert!(success, "sitemap failed: stdout={}, stderr={}", stdout, stderr);

    let public = tmp.path().join("public");
    let index = fs::read_to_string(public.join("sitemap-index.xml")).unwrap();
    assert!(index.contains("https://homes.test/sitemap-articles-en.xml"));
    assert!(index.contains("https://homes.test/sitemap-faq-en.xml"));
    assert!(!index.contains("sitemap-blog-es.xml"));

    let articles = fs::read_to_string(public.join("sitemap-articles-en.xml")).unwrap();
    assert!(articles.contains("<loc>https://homes.test/en/articles/buying-guide</loc>"));
}

#[test]
fn test_schema_generate_then_validate() {
    let (_tmp, config_path) = setup_test_env();
    init_and_import(&config_path);

    let (stdout, stderr, success) = run_estate(&config_path, &["schema", "generate"]);
    assert!(success, "schema failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("updated: 2"), "got: {}", stdout);

    let (stdout, _, success) = run_estate(&config_path, &["schema", "generate"]);
    assert!(success);
    assert!(stdout.contains("skipped: 2"));

    let (stdout, _, success) = run_estate(&config_path, &["validate"]);
    assert!(success, "validate after schema failed: {}", stdout);
}

#[test]
fn test_reimport_drops_stale_schema() {
    let (tmp, config_path) = setup_test_env();
    init_and_import(&config_path);
    let (_, stderr, success) = run_estate(&config_path, &["schema", "generate"]);
    assert!(success, "schema failed: {}", stderr);

    let before = get_json(&config_path, "article", "buying-guide");
    assert!(before["schema_json"].as_str().unwrap().contains("Buying a home on the coast"));

    write_content(
        tmp.path(),
        "articles/en/buying-guide.md",
        "---\ntitle: Coastal purchase costs explained\nstatus: published\npublished_at: 2024-03-05\n---\n\n\
         ## Transfer tax\n\nIt depends on the region.\n",
    );
    let (stdout, _, success) = run_estate(&config_path, &["import"]);
    assert!(success);
    assert!(stdout.contains("updated: 1"), "got: {}", stdout);
    assert!(get_json(&config_path, "article", "buying-guide")["schema_json"].is_null());

    let (stdout, _, success) = run_estate(&config_path, &["schema", "generate"]);
    assert!(success);
    assert!(stdout.contains("updated: 1"), "got: {}", stdout);
    assert!(stdout.contains("skipped: 1"), "got: {}", stdout);

    let after = get_json(&config_path, "article", "buying-guide");
    let schema = after["schema_json"].as_str().unwrap();
    assert!(schema.contains("Coastal purchase costs explained"), "schema: {}", schema);
    assert!(!schema.contains("Buying a home on the coast"), "schema: {}", schema);

    // Unchanged rows keep their schema across imports
    let faq = get_json(&config_path, "faq", "what-is-nie");
    assert!(faq["schema_json"].as_str().is_some());
}

#[test]
fn test_export_json_has_published_rows() {
    let (tmp, config_path) = setup_test_env();
    init_and_import(&config_path);

    let out = tmp.path().join("site").join("content.json");
    let (_, stderr, success) =
        run_estate(&config_path, &["export-json", "--output", out.to_str().unwrap()]);
    assert!(success, "export-json failed: {}", stderr);

    let data: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(data["articles"].as_array().unwrap().len(), 1);
    assert_eq!(data["faqs"].as_array().unwrap().len(), 1);
    assert!(data["blog_posts"].as_array().unwrap().is_empty());
    assert_eq!(data["articles"][0]["path"], "/en/articles/buying-guide");
}

#[test]
fn test_export_markdown_roundtrip() {
    let (tmp, config_path) = setup_test_env();
    init_and_import(&config_path);

    let out = tmp.path().join("exported");
    let (stdout, _, success) = run_estate(&config_path, &["export", out.to_str().unwrap()]);
    assert!(success);
    assert!(stdout.contains("updated: 3"));

    let text = fs::read_to_string(out.join("blog/es/comprar-casa.md")).unwrap();
    assert!(text.starts_with("---\n"));
    assert!(text.contains("title: Comprar casa en la costa"));
    assert!(text.contains("Borrador."));
}

#[test]
fn test_get_prints_row() {
    let (_tmp, config_path) = setup_test_env();
    init_and_import(&config_path);

    let (stdout, _, success) = run_estate(&config_path, &["get", "faq", "what-is-nie"]);
    assert!(success);
    assert!(stdout.contains("What is a NIE?"));
    assert!(stdout.contains("https://homes.test/en/faq/what-is-nie"));

    let (_, stderr, success) =
        run_estate(&config_path, &["get", "blog", "comprar-casa", "--lang", "en"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_score_and_score_file() {
    let (tmp, config_path) = setup_test_env();
    init_and_import(&config_path);

    let (stdout, _, success) = run_estate(&config_path, &["score", "--kind", "article"]);
    assert!(success);
    assert!(stdout.contains("buying-guide"));
    assert!(stdout.contains("scored: 1"));

    let thin = tmp.path().join("thin.md");
    fs::write(&thin, "---\ntitle: Thin\n---\n\nToo short.\n").unwrap();
    let (stdout, stderr, success) = run_estate(&config_path, &["score-file", thin.to_str().unwrap()]);
    assert!(!success);
    assert!(stdout.contains("score:"), "got: {}", stdout);
    assert!(stderr.contains("below pass score"));
}

#[test]
fn test_score_file_rejects_invalid_config() {
    let (tmp, config_path) = setup_test_env();
    let thin = tmp.path().join("thin.md");
    fs::write(&thin, "---\ntitle: Thin\n---\n\nToo short.\n").unwrap();

    append_config(&config_path, "\n[quality]\npass_score = 120\n");
    let (_, stderr, success) = run_estate(&config_path, &["score-file", thin.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("quality.pass_score"), "stderr: {}", stderr);
    assert!(!stderr.contains("below pass score"), "stderr: {}", stderr);

    let broken = tmp.path().join("config/broken.toml");
    fs::write(&broken, "[site\nbase_url = ").unwrap();
    let (_, stderr, success) = run_estate(&broken, &["score-file", thin.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to parse config file"), "stderr: {}", stderr);

    let content = tmp.path().join("content");
    let (_, stderr, success) =
        run_estate(&broken, &["frontmatter", "check", content.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to parse config file"), "stderr: {}", stderr);

    // No config file at all still falls back to defaults
    let missing = tmp.path().join("config/absent.toml");
    let (stdout, stderr, _) = run_estate(&missing, &["score-file", thin.to_str().unwrap()]);
    assert!(stdout.contains("score:"), "got: {}", stdout);
    assert!(stderr.contains("below pass score 70"), "stderr: {}", stderr);
}

#[test]
fn test_frontmatter_check_without_database() {
    let (tmp, config_path) = setup_test_env();
    let content = tmp.path().join("content");

    let (stdout, stderr, success) =
        run_estate(&config_path, &["frontmatter", "check", content.to_str().unwrap()]);
    assert!(success, "check failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("processed: 3"));
    assert!(!tmp.path().join("data/estate.sqlite").exists());

    write_content(tmp.path(), "faq/de/was-ist-nie.md", "---\ntitle: Was ist eine NIE?\n---\nText\n");
    let (stdout, stderr, success) =
        run_estate(&config_path, &["frontmatter", "check", content.to_str().unwrap()]);
    assert!(!success);
    assert!(stdout.contains("not in site.languages"), "got: {}", stdout);
    assert!(stderr.contains("1 of 4"));
}

#[test]
fn test_categories_report_only() {
    let (_tmp, config_path) = setup_test_env();
    init_and_import(&config_path);

    let (stdout, _, success) = run_estate(&config_path, &["categories"]);
    assert!(success);
    assert!(stdout.contains("Buying & Selling -> buying-selling"), "got: {}", stdout);
    assert!(stdout.contains("skipped: 1"));
}

#[test]
fn test_dedupe_apply_archives_duplicates() {
    let (tmp, config_path) = setup_test_env();
    write_content(
        tmp.path(),
        "articles/en/coast-home-buying.md",
        "---\ntitle: Buying a Home on the Coast!\nstatus: draft\n---\n\nShort copy.\n",
    );
    init_and_import(&config_path);

    let (stdout, _, success) = run_estate(&config_path, &["dedupe"]);
    assert!(success);
    assert!(stdout.contains("keep    articles buying-guide"), "got: {}", stdout);
    assert!(stdout.contains("coast-home-buying"), "got: {}", stdout);
    assert!(stdout.contains("skipped: 1"), "got: {}", stdout);
    assert_eq!(get_json(&config_path, "article", "coast-home-buying")["status"], "draft");

    let (stdout, stderr, success) = run_estate(&config_path, &["dedupe", "--apply"]);
    assert!(success, "dedupe failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("updated: 1"), "got: {}", stdout);
    assert_eq!(get_json(&config_path, "article", "coast-home-buying")["status"], "archived");
    assert_eq!(get_json(&config_path, "article", "buying-guide")["status"], "published");

    let (stdout, _, success) = run_estate(&config_path, &["dedupe"]);
    assert!(success);
    assert!(stdout.contains("groups: 0"), "got: {}", stdout);
}

#[test]
fn test_categories_apply_uses_aliases() {
    let (_tmp, config_path) = setup_test_env();
    append_config(
        &config_path,
        "\n[categories.aliases]\n\"Buying & Selling\" = \"Property Purchase\"\n",
    );
    init_and_import(&config_path);

    let (stdout, stderr, success) = run_estate(&config_path, &["categories", "--apply"]);
    assert!(success, "categories failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Buying & Selling -> property-purchase"), "got: {}", stdout);
    assert!(stdout.contains("updated: 1"), "got: {}", stdout);
    assert_eq!(
        get_json(&config_path, "article", "buying-guide")["category"],
        "property-purchase"
    );

    let (stdout, _, success) = run_estate(&config_path, &["categories"]);
    assert!(success);
    assert!(stdout.contains("processed: 0"), "got: {}", stdout);
}

#[test]
fn test_generate_requires_llm() {
    let (_tmp, config_path) = setup_test_env();
    init_and_import(&config_path);

    let (_, stderr, success) = run_estate(&config_path, &["generate", "summary"]);
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr: {}", stderr);

    let (stdout, _, success) = run_estate(&config_path, &["generate", "summary", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("processed: 3"), "got: {}", stdout);
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = setup_test_env();
    init_and_import(&config_path);

    let (stdout, stderr, success) = run_estate(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Coastal Homes"));
    assert!(stdout.contains("Rows:        3"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");
    let (_, stderr, success) = run_estate(&missing, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
