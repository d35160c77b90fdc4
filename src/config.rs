//! TOML configuration.
//!
//! Every section has defaults so a minimal file only needs the documents
//! directory. Secrets never live in the file: the completion API key is read
//! from the environment variable named by `completion.api_key_env`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::analyzer::{default_groups, KeywordGroup};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dir: default_documents_dir(),
            include_globs: default_include_globs(),
        }
    }
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("./attached_assets")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.docx".to_string()]
}

/// Scoring parameters for document selection.
#[derive(Debug, Deserialize, Clone)]
pub struct AnalyzerConfig {
    /// The best document must score strictly above this to be selected.
    #[serde(default)]
    pub min_score: f64,
    #[serde(default = "default_title_weight")]
    pub title_weight: f64,
    #[serde(default = "default_heading_weight")]
    pub heading_weight: f64,
    #[serde(default = "default_body_weight")]
    pub body_weight: f64,
    /// Body hits per keyword group are capped so long documents don't win by size alone.
    #[serde(default = "default_body_hit_cap")]
    pub body_hit_cap: usize,
    #[serde(default = "default_groups")]
    pub groups: Vec<KeywordGroup>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            title_weight: default_title_weight(),
            heading_weight: default_heading_weight(),
            body_weight: default_body_weight(),
            body_hit_cap: default_body_hit_cap(),
            groups: default_groups(),
        }
    }
}

fn default_title_weight() -> f64 {
    5.0
}
fn default_heading_weight() -> f64 {
    3.0
}
fn default_body_weight() -> f64 {
    1.0
}
fn default_body_hit_cap() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    /// Prior turns sent along with each question.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_excerpt_max_chars")]
    pub excerpt_max_chars: usize,
    #[serde(default = "default_max_question_chars")]
    pub max_question_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            excerpt_max_chars: default_excerpt_max_chars(),
            max_question_chars: default_max_question_chars(),
        }
    }
}

fn default_history_turns() -> usize {
    3
}
fn default_excerpt_max_chars() -> usize {
    12_000
}
fn default_max_question_chars() -> usize {
    4_000
}

/// OpenAI-compatible chat-completions endpoint settings.
#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Immediate retries after a transient network failure. Never applied to
    /// HTTP error statuses or timeouts.
    #[serde(default = "default_network_retries")]
    pub network_retries: u32,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            network_retries: default_network_retries(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_network_retries() -> u32 {
    1
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

const MAX_NETWORK_RETRIES: u32 = 3;

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
    "127.0.0.1:5000".to_string()
}

impl CompletionConfig {
    /// Reads the API key from the configured environment variable.
    /// Blank values count as missing.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Relative document paths resolve against the config file's directory.
    if config.documents.dir.is_relative() {
        if let Some(parent) = path.parent() {
            config.documents.dir = parent.join(&config.documents.dir);
        }
    }

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.documents.include_globs.is_empty() {
        bail!("documents.include_globs must not be empty");
    }

    let a = &config.analyzer;
    if a.min_score < 0.0 {
        bail!("analyzer.min_score must be >= 0");
    }
    for (name, w) in [
        ("title_weight", a.title_weight),
        ("heading_weight", a.heading_weight),
        ("body_weight", a.body_weight),
    ] {
        if w < 0.0 {
            bail!("analyzer.{} must be >= 0", name);
        }
    }
    if a.groups.is_empty() {
        bail!("analyzer.groups must define at least one keyword group");
    }
    for g in &a.groups {
        if g.terms.iter().all(|t| t.trim().is_empty()) {
            bail!("analyzer group '{}' has no terms", g.name);
        }
        if g.weight <= 0.0 {
            bail!("analyzer group '{}' weight must be > 0", g.name);
        }
    }

    if config.chat.excerpt_max_chars == 0 {
        bail!("chat.excerpt_max_chars must be > 0");
    }
    if config.chat.max_question_chars == 0 {
        bail!("chat.max_question_chars must be > 0");
    }

    let c = &config.completion;
    if !c.base_url.starts_with("http://") && !c.base_url.starts_with("https://") {
        bail!("completion.base_url must start with http:// or https://");
    }
    if c.model.trim().is_empty() {
        bail!("completion.model must not be empty");
    }
    if c.timeout_secs == 0 {
        bail!("completion.timeout_secs must be > 0");
    }
    if c.network_retries > MAX_NETWORK_RETRIES {
        bail!(
            "completion.network_retries must be <= {}",
            MAX_NETWORK_RETRIES
        );
    }
    if !(0.0..=2.0).contains(&c.temperature) {
        bail!("completion.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("datadoc.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[documents]\ndir = \"docs\"\n");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.documents.dir, tmp.path().join("docs"));
        assert_eq!(cfg.documents.include_globs, vec!["**/*.docx"]);
        assert_eq!(cfg.chat.history_turns, 3);
        assert_eq!(cfg.completion.model, "gpt-4o");
        assert_eq!(cfg.completion.network_retries, 1);
        assert!(!cfg.analyzer.groups.is_empty());
    }

    #[test]
    fn custom_groups_replace_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            r#"
[[analyzer.groups]]
name = "inventario"
terms = ["inventario", "inventory"]
weight = 2.0
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.analyzer.groups.len(), 1);
        assert_eq!(cfg.analyzer.groups[0].name, "inventario");
    }

    #[test]
    fn rejects_excessive_retries() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[completion]\nnetwork_retries = 10\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("network_retries"));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[completion]\nbase_url = \"ftp://x\"\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_config(&tmp.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
