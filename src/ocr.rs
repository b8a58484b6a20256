//! OCR port and command-line backends.
//!
//! Text recognition is delegated to external binaries: `tesseract` is the
//! primary backend and `ocrs` the secondary one. PDF pages are rasterized
//! with `pdftoppm` before recognition. Both seams are traits so the
//! extraction policy can be exercised with in-process fakes.
//!
//! An [`OcrEngine`] probes its candidate backends lazily, on first use, and
//! caches the outcome for its own lifetime. Probing spawns processes, so an
//! engine should be built once and shared.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};

use tracing::{debug, info};

use crate::config::{OcrConfig, OcrEngineKind};
use crate::error::OcrError;

/// A text recognizer for a single raster image.
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check that the backend can run. The error is a human-readable reason.
    fn probe(&self) -> Result<(), String>;

    /// Recognize the text in an encoded image (PNG, JPEG, TIFF, ...).
    fn recognize(&self, image: &[u8], language: &str) -> Result<String, OcrError>;
}

/// Renders one PDF page to an encoded image.
pub trait Rasterizer: Send + Sync {
    /// `page_number` is 1-based.
    fn rasterize_page(&self, pdf: &[u8], page_number: u32, dpi: u32) -> Result<Vec<u8>, OcrError>;
}

/// Scratch directory removed on drop.
struct ScratchDir(PathBuf);

impl ScratchDir {
    fn new(prefix: &str) -> Result<Self, OcrError> {
        let dir = std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir)
            .map_err(|e| OcrError::Failed(format!("failed to create temp dir: {}", e)))?;
        Ok(Self(dir))
    }

    fn path(&self) -> &Path {
        &self.0
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, OcrError> {
        let path = self.0.join(name);
        std::fs::write(&path, bytes)
            .map_err(|e| OcrError::Failed(format!("failed to write temp file: {}", e)))?;
        Ok(path)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.0).ok();
    }
}

fn probe_command(program: &str, arg: &str) -> Result<(), String> {
    match Command::new(program).arg(arg).output() {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => Err(format!("`{} {}` exited with {}", program, arg, out.status)),
        Err(e) => Err(format!("`{}` not found: {}", program, e)),
    }
}

fn run_for_stdout(cmd: &mut Command, program: &str) -> Result<String, OcrError> {
    let output = cmd
        .output()
        .map_err(|e| OcrError::Unavailable(format!("failed to run {}: {}", program, e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OcrError::Failed(format!(
            "{} error: {}",
            program,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `tesseract <image> stdout -l <language>`.
#[derive(Debug, Default, Clone)]
pub struct TesseractCli;

impl OcrBackend for TesseractCli {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn probe(&self) -> Result<(), String> {
        probe_command("tesseract", "--version")
    }

    fn recognize(&self, image: &[u8], language: &str) -> Result<String, OcrError> {
        let scratch = ScratchDir::new("corpus-ocr")?;
        let input = scratch.write("input.png", image)?;
        run_for_stdout(
            Command::new("tesseract")
                .arg(&input)
                .arg("stdout")
                .args(["-l", language]),
            "tesseract",
        )
    }
}

/// `ocrs <image>`. Only ships English models, so `language` is ignored.
#[derive(Debug, Default, Clone)]
pub struct OcrsCli;

impl OcrBackend for OcrsCli {
    fn name(&self) -> &'static str {
        "ocrs"
    }

    fn probe(&self) -> Result<(), String> {
        probe_command("ocrs", "--version")
    }

    fn recognize(&self, image: &[u8], _language: &str) -> Result<String, OcrError> {
        let scratch = ScratchDir::new("corpus-ocr")?;
        let input = scratch.write("input.png", image)?;
        run_for_stdout(Command::new("ocrs").arg(&input), "ocrs")
    }
}

/// `pdftoppm -png -r <dpi> -f N -l N -singlefile`.
#[derive(Debug, Default, Clone)]
pub struct PdftoppmRasterizer;

impl Rasterizer for PdftoppmRasterizer {
    fn rasterize_page(&self, pdf: &[u8], page_number: u32, dpi: u32) -> Result<Vec<u8>, OcrError> {
        let scratch = ScratchDir::new("corpus-raster")?;
        let input = scratch.write("input.pdf", pdf)?;
        let prefix = scratch.path().join("page");
        let page = page_number.to_string();

        let output = Command::new("pdftoppm")
            .arg("-png")
            .args(["-r", &dpi.to_string()])
            .args(["-f", &page, "-l", &page])
            .arg("-singlefile")
            .arg(&input)
            .arg(&prefix)
            .output()
            .map_err(|e| OcrError::Unavailable(format!("failed to run pdftoppm: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(format!("pdftoppm error: {}", stderr.trim())));
        }

        std::fs::read(prefix.with_extension("png"))
            .map_err(|e| OcrError::Failed(format!("pdftoppm produced no image: {}", e)))
    }
}

/// Lazily resolved OCR handle.
pub struct OcrEngine {
    candidates: Vec<Arc<dyn OcrBackend>>,
    rasterizer: Arc<dyn Rasterizer>,
    resolved: OnceLock<Result<Arc<dyn OcrBackend>, OcrError>>,
}

impl OcrEngine {
    /// Engine backed by the command-line tools selected in `[ocr] engine`.
    pub fn from_config(config: &OcrConfig) -> Self {
        let candidates: Vec<Arc<dyn OcrBackend>> = match config.engine {
            OcrEngineKind::Auto => vec![Arc::new(TesseractCli), Arc::new(OcrsCli)],
            OcrEngineKind::Tesseract => vec![Arc::new(TesseractCli)],
            OcrEngineKind::Ocrs => vec![Arc::new(OcrsCli)],
        };
        Self::new(candidates, Arc::new(PdftoppmRasterizer))
    }

    /// Backends are tried in order; the first one whose probe succeeds wins.
    pub fn new(candidates: Vec<Arc<dyn OcrBackend>>, rasterizer: Arc<dyn Rasterizer>) -> Self {
        Self {
            candidates,
            rasterizer,
            resolved: OnceLock::new(),
        }
    }

    /// Resolve (once) and return the active backend.
    pub fn backend(&self) -> Result<Arc<dyn OcrBackend>, OcrError> {
        self.resolved
            .get_or_init(|| {
                let mut reasons = Vec::new();
                for backend in &self.candidates {
                    match backend.probe() {
                        Ok(()) => {
                            info!(backend = backend.name(), "OCR backend resolved");
                            return Ok(Arc::clone(backend));
                        }
                        Err(reason) => {
                            debug!(backend = backend.name(), %reason, "OCR backend unavailable");
                            reasons.push(format!("{}: {}", backend.name(), reason));
                        }
                    }
                }
                if reasons.is_empty() {
                    reasons.push("no OCR backend configured".to_string());
                }
                Err(OcrError::Unavailable(reasons.join("; ")))
            })
            .clone()
    }

    /// OCR an encoded image. Whitespace-only output is [`OcrError::NoText`].
    pub fn recognize_image(&self, image: &[u8], language: &str) -> Result<String, OcrError> {
        let backend = self.backend()?;
        let text = backend.recognize(image, language)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(OcrError::NoText);
        }
        Ok(text.to_string())
    }

    /// Rasterize and OCR one PDF page.
    pub fn recognize_pdf_page(
        &self,
        pdf: &[u8],
        page_number: u32,
        dpi: u32,
        language: &str,
    ) -> Result<String, OcrError> {
        // Resolve first so a missing backend does not cost a rasterization.
        self.backend()?;
        let image = self.rasterizer.rasterize_page(pdf, page_number, dpi)?;
        self.recognize_image(&image, language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeBackend {
        name: &'static str,
        available: bool,
        output: String,
        probes: AtomicUsize,
    }

    impl FakeBackend {
        fn new(name: &'static str, available: bool, output: &str) -> Arc<Self> {
            Arc::new(Self {
                name,
                available,
                output: output.to_string(),
                probes: AtomicUsize::new(0),
            })
        }
    }

    impl OcrBackend for FakeBackend {
        fn name(&self) -> &'static str {
            self.name
        }
        fn probe(&self) -> Result<(), String> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.available {
                Ok(())
            } else {
                Err("missing".to_string())
            }
        }
        fn recognize(&self, _image: &[u8], _language: &str) -> Result<String, OcrError> {
            Ok(self.output.clone())
        }
    }

    struct FakeRasterizer;

    impl Rasterizer for FakeRasterizer {
        fn rasterize_page(&self, _pdf: &[u8], _page: u32, _dpi: u32) -> Result<Vec<u8>, OcrError> {
            Ok(vec![0u8; 4])
        }
    }

    #[test]
    fn test_auto_falls_back_to_secondary() {
        let primary = FakeBackend::new("primary", false, "");
        let secondary = FakeBackend::new("secondary", true, "hello");
        let engine = OcrEngine::new(
            vec![primary.clone(), secondary.clone()],
            Arc::new(FakeRasterizer),
        );
        assert_eq!(engine.backend().unwrap().name(), "secondary");
        assert_eq!(engine.recognize_image(b"img", "eng").unwrap(), "hello");
    }

    #[test]
    fn test_resolution_is_cached() {
        let backend = FakeBackend::new("only", true, "x");
        let engine = OcrEngine::new(vec![backend.clone()], Arc::new(FakeRasterizer));
        engine.backend().unwrap();
        engine.backend().unwrap();
        engine.recognize_pdf_page(b"%PDF", 1, 150, "eng").unwrap();
        assert_eq!(backend.probes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unavailable_combines_reasons() {
        let engine = OcrEngine::new(
            vec![
                FakeBackend::new("tesseract", false, ""),
                FakeBackend::new("ocrs", false, ""),
            ],
            Arc::new(FakeRasterizer),
        );
        match engine.backend() {
            Err(OcrError::Unavailable(reason)) => {
                assert!(reason.contains("tesseract: missing"));
                assert!(reason.contains("ocrs: missing"));
            }
            other => panic!("expected Unavailable, got {:?}", other.map(|b| b.name())),
        }
    }

    #[test]
    fn test_blank_output_is_no_text() {
        let engine = OcrEngine::new(
            vec![FakeBackend::new("blank", true, "  \n ")],
            Arc::new(FakeRasterizer),
        );
        assert!(matches!(
            engine.recognize_image(b"img", "eng"),
            Err(OcrError::NoText)
        ));
    }
}
