//! Multi-format ingestion through the `corpus` binary: Office documents,
//! HTML, and PDF failure modes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn corpus_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("corpus");
    path
}

fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, content) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

/// Minimal docx (ZIP) with one `<w:p>` per paragraph.
fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );
    zip_with(&[("word/document.xml", &xml)])
}

/// Minimal pptx with one text run per slide.
fn minimal_pptx(slides: &[&str]) -> Vec<u8> {
    let xml: Vec<(String, String)> = slides
        .iter()
        .enumerate()
        .map(|(i, text)| {
            (
                format!("ppt/slides/slide{}.xml", i + 1),
                format!(
                    "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><p:cSld><p:spTree><p:sp><p:txBody>\
                     <a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
                    text
                ),
            )
        })
        .collect();
    let entries: Vec<(&str, &str)> = xml.iter().map(|(n, x)| (n.as_str(), x.as_str())).collect();
    zip_with(&entries)
}

/// Single-page PDF whose page has an empty content stream.
fn blank_pdf() -> Vec<u8> {
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn setup_file_support_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("files")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/corpus.sqlite"

[index]
dir = "{root}/data/index"

[ocr]
mode = "off"
"#,
        root = root.display()
    );
    let config_path = root.join("config").join("corpus.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_corpus(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = corpus_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run corpus: {}", e));
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn put(tmp: &TempDir, name: &str, bytes: &[u8]) -> String {
    let path = tmp.path().join("files").join(name);
    fs::write(&path, bytes).unwrap();
    path.to_string_lossy().into_owned()
}

fn ingest(config_path: &Path, path: &str) -> (String, String, bool) {
    run_corpus(config_path, &["ingest", path, "--workspace", "files"])
}

fn search(config_path: &Path, query: &str) -> String {
    let (stdout, stderr, success) = run_corpus(
        config_path,
        &["search", query, "--workspace", "files", "--mode", "bm25"],
    );
    assert!(success, "search failed: {}", stderr);
    stdout
}

#[test]
fn file_support_docx_ingest_and_search() {
    let (tmp, config_path) = setup_file_support_env();
    let path = put(
        &tmp,
        "memo.docx",
        &minimal_docx(&["office test phrase", "second paragraph of the memo"]),
    );

    let (stdout, stderr, success) = ingest(&config_path, &path);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("pages: 1"));

    let out = search(&config_path, "office test phrase");
    assert!(out.contains("memo.docx"), "{}", out);
    assert!(out.contains("office test phrase"), "{}", out);
}

#[test]
fn file_support_pptx_one_page_per_slide() {
    let (tmp, config_path) = setup_file_support_env();
    let path = put(
        &tmp,
        "deck.pptx",
        &minimal_pptx(&["quarterly revenue", "hiring plan", "roadmap milestones"]),
    );

    let (stdout, stderr, success) = ingest(&config_path, &path);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("pages: 3"), "{}", stdout);

    let out = search(&config_path, "roadmap");
    assert!(out.contains("deck.pptx"), "{}", out);
}

#[test]
fn file_support_html_main_content() {
    let (tmp, config_path) = setup_file_support_env();
    let html = "<html><head><title>t</title><script>var tracking = 1;</script></head>\
        <body><nav><a>navigation links</a></nav>\
        <main><h1>Field guide</h1><p>Migratory birds cross the strait in spring.</p></main>\
        </body></html>";
    let path = put(&tmp, "guide.html", html.as_bytes());

    let (stdout, stderr, success) = ingest(&config_path, &path);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);

    assert!(search(&config_path, "migratory birds").contains("guide.html"));
    assert!(search(&config_path, "tracking").contains("No results."));
    assert!(search(&config_path, "navigation").contains("No results."));
}

#[test]
fn file_support_corrupt_pdf_fails_without_document() {
    let (tmp, config_path) = setup_file_support_env();
    let path = put(&tmp, "bad.pdf", b"not a valid pdf");

    let (_, stderr, success) = ingest(&config_path, &path);
    assert!(!success);
    assert!(stderr.contains("corrupted file"), "{}", stderr);

    let (status, _, _) = run_corpus(&config_path, &["status", "--workspace", "files"]);
    assert!(status.contains("documents: 0"));
}

#[test]
fn file_support_blank_pdf_without_ocr_has_no_content() {
    let (tmp, config_path) = setup_file_support_env();
    let path = put(&tmp, "scan.pdf", &blank_pdf());

    let (_, stderr, success) = ingest(&config_path, &path);
    assert!(!success);
    assert!(stderr.contains("no chunks"), "{}", stderr);

    let (status, _, _) = run_corpus(&config_path, &["status", "--workspace", "files"]);
    assert!(status.contains("documents: 0"));
}

#[test]
fn file_support_image_requires_ocr() {
    let (tmp, config_path) = setup_file_support_env();
    let path = put(&tmp, "photo.png", &[0x89, b'P', b'N', b'G', 0, 0]);

    let (_, stderr, success) = ingest(&config_path, &path);
    assert!(!success);
    assert!(stderr.contains("OCR required"), "{}", stderr);
}

#[test]
fn file_support_unsupported_extension() {
    let (tmp, config_path) = setup_file_support_env();
    let path = put(&tmp, "archive.rar", b"Rar!");

    let (_, stderr, success) = ingest(&config_path, &path);
    assert!(!success);
    assert!(stderr.contains("unsupported file type: .rar"), "{}", stderr);
}
