//! TOML configuration parsing and validation.
//!
//! Only `[db]` and `[index]` are required; every other section falls back
//! to defaults.
//!
//! ```toml
//! [db]
//! path = "./data/corpus.sqlite"
//!
//! [index]
//! dir = "./data/index"
//!
//! [ocr]
//! mode = "auto"
//! threshold = 50
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::retrieve::RetrievalMode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub bm25: Bm25Config,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Root directory; each workspace gets `<dir>/<workspace_id>/`.
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    crate::chunk::CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    crate::chunk::CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    Off,
    #[default]
    Auto,
    On,
}

impl std::str::FromStr for OcrMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "off" => Ok(OcrMode::Off),
            "auto" => Ok(OcrMode::Auto),
            "on" => Ok(OcrMode::On),
            other => bail!("Unknown OCR mode: '{}'. Use off, auto, or on.", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngineKind {
    /// Tesseract first, then ocrs.
    #[default]
    Auto,
    Tesseract,
    Ocrs,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default)]
    pub mode: OcrMode,
    /// In `auto` mode, pages whose extracted text is shorter than this
    /// (in characters) are OCR'd.
    #[serde(default = "default_ocr_threshold")]
    pub threshold: usize,
    #[serde(default = "default_ocr_language")]
    pub language: String,
    #[serde(default)]
    pub engine: OcrEngineKind,
    #[serde(default = "default_ocr_dpi")]
    pub dpi: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            mode: OcrMode::default(),
            threshold: default_ocr_threshold(),
            language: default_ocr_language(),
            engine: OcrEngineKind::default(),
            dpi: default_ocr_dpi(),
        }
    }
}

fn default_ocr_threshold() -> usize {
    50
}
fn default_ocr_language() -> String {
    "eng".to_string()
}
fn default_ocr_dpi() -> u32 {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub default_mode: RetrievalMode,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    /// Every mode fetches `k * overfetch` candidates from each index it
    /// reads, before dangling ids are dropped and the list is cut to `k`.
    #[serde(default = "default_overfetch")]
    pub overfetch: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_mode: RetrievalMode::default(),
            final_limit: default_final_limit(),
            overfetch: default_overfetch(),
        }
    }
}

fn default_final_limit() -> usize {
    8
}
fn default_overfetch() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct Bm25Config {
    #[serde(default = "default_k1")]
    pub k1: f64,
    #[serde(default = "default_b")]
    pub b: f64,
}

impl Default for Bm25Config {
    fn default() -> Self {
        Self {
            k1: default_k1(),
            b: default_b(),
        }
    }
}

fn default_k1() -> f64 {
    1.2
}
fn default_b() -> f64 {
    0.75
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!("chunking.chunk_overlap must be < chunking.chunk_size");
    }

    if config.retrieval.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if config.retrieval.overfetch < 1 {
        bail!("retrieval.overfetch must be >= 1");
    }

    if config.bm25.k1 < 0.0 {
        bail!("bm25.k1 must be >= 0");
    }
    if !(0.0..=1.0).contains(&config.bm25.b) {
        bail!("bm25.b must be in [0.0, 1.0]");
    }

    if config.ocr.dpi == 0 {
        bail!("ocr.dpi must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

/// Workspace ids address on-disk artifacts, so they are restricted to a
/// filename-safe alphabet.
pub fn is_valid_workspace_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    const MINIMAL: &str = r#"
[db]
path = "/tmp/corpus.sqlite"

[index]
dir = "/tmp/index"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.chunking.chunk_size, 900);
        assert_eq!(config.chunking.chunk_overlap, 150);
        assert_eq!(config.ocr.mode, OcrMode::Auto);
        assert_eq!(config.ocr.language, "eng");
        assert_eq!(config.retrieval.default_mode, RetrievalMode::Hybrid);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        let src = format!("{}\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n", MINIMAL);
        assert!(parse(&src).is_err());
    }

    #[test]
    fn enabled_provider_requires_model_and_dims() {
        let src = format!("{}\n[embedding]\nprovider = \"openai\"\n", MINIMAL);
        let err = parse(&src).unwrap_err().to_string();
        assert!(err.contains("embedding.dims"), "{}", err);
    }

    #[test]
    fn unknown_provider_rejected() {
        let src = format!(
            "{}\n[embedding]\nprovider = \"magic\"\nmodel = \"m\"\ndims = 4\n",
            MINIMAL
        );
        assert!(parse(&src).is_err());
    }

    #[test]
    fn ocr_mode_parses_from_toml_and_str() {
        let src = format!("{}\n[ocr]\nmode = \"on\"\nengine = \"ocrs\"\n", MINIMAL);
        let config = parse(&src).unwrap();
        assert_eq!(config.ocr.mode, OcrMode::On);
        assert_eq!(config.ocr.engine, OcrEngineKind::Ocrs);
        assert_eq!("off".parse::<OcrMode>().unwrap(), OcrMode::Off);
        assert!("sometimes".parse::<OcrMode>().is_err());
    }

    #[test]
    fn workspace_ids() {
        assert!(is_valid_workspace_id("thesis_2024-draft"));
        assert!(!is_valid_workspace_id(""));
        assert!(!is_valid_workspace_id("../etc"));
        assert!(!is_valid_workspace_id(&"a".repeat(65)));
    }
}
