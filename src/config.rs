use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::Deserialize;

pub const DEFAULT_CONFIG_NAME: &str = "chapterwise.toml";

const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
const DEEPSEEK_MODEL: &str = "deepseek-chat";
const DEEPSEEK_KEY_ENV: &str = "DEEPSEEK_API_KEY";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";
const OLLAMA_MODEL: &str = "llama3.1:8b";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub extract: ExtractSection,
    #[serde(default)]
    pub translate: TranslateSection,
    #[serde(default)]
    pub filter: FilterSection,
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ExtractSection {
    #[serde(default)]
    pub max_words: Option<usize>,
    #[serde(default)]
    pub ideal_words: Option<usize>,
    #[serde(default)]
    pub min_chars: Option<usize>,
    #[serde(default)]
    pub sentences_per_paragraph: Option<usize>,
    #[serde(default)]
    pub min_chapter_pages: Option<usize>,
    /// Uniform split width for documents with no usable TOC or markers.
    #[serde(default)]
    pub pages_per_chapter: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TranslateSection {
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    /// Character budget per translation request.
    #[serde(default)]
    pub max_chars: Option<usize>,
    #[serde(default)]
    pub context_window: Option<usize>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub target_language: Option<String>,
    /// Subject-matter hint woven into the system prompt.
    #[serde(default)]
    pub domain: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct FilterSection {
    #[serde(default)]
    pub blacklist_file: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Deepseek,
    Ollama,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Environment variable holding the API key; `.env` is consulted too.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct ResolvedBackend {
    pub name: String,
    pub kind: BackendKind,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

pub fn find_file_upwards(start: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = Some(start.to_path_buf());
    for _ in 0..=max_levels {
        let d = dir?;
        let cand = d.join(filename);
        if cand.is_file() {
            return Some(cand);
        }
        dir = d.parent().map(Path::to_path_buf);
    }
    None
}

pub fn find_default_config(workdir: &Path) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, DEFAULT_CONFIG_NAME, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, DEFAULT_CONFIG_NAME, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, DEFAULT_CONFIG_NAME, 10) {
                return Some(p);
            }
        }
    }
    None
}

const DEFAULT_CONFIG_TEXT: &str = r#"# chapterwise configuration

[extract]
max_words = 150
ideal_words = 90
min_chars = 20
sentences_per_paragraph = 8
min_chapter_pages = 2
pages_per_chapter = 30

[translate]
backend = "deepseek"
workers = 3
max_chars = 2500
max_retries = 3
target_language = "Russian"
# domain = "organizational psychology"

[backends.deepseek]
kind = "deepseek"
# api_key_env = "DEEPSEEK_API_KEY"

[backends.ollama]
kind = "ollama"
# model = "llama3.1:8b"
"#;

/// Writes a starter config file; refuses to clobber one unless forced.
pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    let path = dir.join(DEFAULT_CONFIG_NAME);
    if path.exists() && !force {
        return Err(anyhow!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create directory {}", dir.display()))?;
    std::fs::write(&path, DEFAULT_CONFIG_TEXT)
        .with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: AppConfig = toml::from_str(&text).context("parse config toml")?;
    Ok(cfg)
}

/// Parses a `.env`-style file: `KEY=VALUE` lines, `#` comments, optional
/// surrounding quotes on values.
pub fn parse_env_file(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"').trim_matches('\'');
            if !key.is_empty() {
                map.insert(key.to_string(), value.to_string());
            }
        }
    }
    map
}

/// Secret lookup order: process environment, then a `.env` next to the
/// working directory.
fn lookup_secret(name: &str, workdir: &Path) -> Option<String> {
    if let Ok(v) = std::env::var(name) {
        if !v.trim().is_empty() {
            return Some(v);
        }
    }
    let env_path = workdir.join(".env");
    let text = std::fs::read_to_string(env_path).ok()?;
    parse_env_file(&text).remove(name)
}

/// Resolves a named backend to connection parameters, filling defaults per
/// backend kind. Unknown names resolve only when they match a builtin kind.
pub fn resolve_backend(
    cfg: &AppConfig,
    name: &str,
    workdir: &Path,
) -> anyhow::Result<ResolvedBackend> {
    let builtin = match name {
        "deepseek" => Some(BackendKind::Deepseek),
        "ollama" => Some(BackendKind::Ollama),
        _ => None,
    };
    let (kind, backend) = match cfg.backends.get(name) {
        Some(b) => (b.kind, Some(b)),
        None => (
            builtin.ok_or_else(|| anyhow!("backend not configured: {}", name))?,
            None,
        ),
    };

    let (default_url, default_model, default_timeout) = match kind {
        BackendKind::Deepseek => (DEEPSEEK_BASE_URL, DEEPSEEK_MODEL, 600),
        BackendKind::Ollama => (OLLAMA_BASE_URL, OLLAMA_MODEL, 300),
    };

    let base_url = backend
        .and_then(|b| b.base_url.clone())
        .unwrap_or_else(|| default_url.to_string());
    let model = backend
        .and_then(|b| b.model.clone())
        .unwrap_or_else(|| default_model.to_string());
    let temperature = backend.and_then(|b| b.temperature).unwrap_or(0.3);
    let max_tokens = backend.and_then(|b| b.max_tokens).unwrap_or(2000);
    let timeout = Duration::from_secs(
        backend
            .and_then(|b| b.timeout_secs)
            .unwrap_or(default_timeout),
    );

    let api_key = match kind {
        BackendKind::Deepseek => {
            let key_env = backend
                .and_then(|b| b.api_key_env.as_deref())
                .unwrap_or(DEEPSEEK_KEY_ENV);
            let key = lookup_secret(key_env, workdir)
                .ok_or_else(|| anyhow!("API key not found: set {} or add it to .env", key_env))?;
            Some(key)
        }
        BackendKind::Ollama => None,
    };

    Ok(ResolvedBackend {
        name: name.to_string(),
        kind,
        base_url: base_url.trim_end_matches('/').to_string(),
        model,
        api_key,
        temperature,
        max_tokens,
        timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_file_parsing_handles_quotes_and_comments() {
        let text = "# secrets\nDEEPSEEK_API_KEY=\"sk-abc\"\nOLLAMA_MODEL=llama3.1:8b\n\nBROKEN LINE\n";
        let map = parse_env_file(text);
        assert_eq!(map.get("DEEPSEEK_API_KEY").map(String::as_str), Some("sk-abc"));
        assert_eq!(map.get("OLLAMA_MODEL").map(String::as_str), Some("llama3.1:8b"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn ollama_resolves_without_config_or_key() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::default();
        let backend = resolve_backend(&cfg, "ollama", dir.path()).unwrap();
        assert_eq!(backend.kind, BackendKind::Ollama);
        assert_eq!(backend.base_url, OLLAMA_BASE_URL);
        assert!(backend.api_key.is_none());
    }

    #[test]
    fn deepseek_key_comes_from_env_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "DEEPSEEK_API_KEY=sk-test\n").unwrap();
        let cfg = AppConfig::default();
        let backend = resolve_backend(&cfg, "deepseek", dir.path()).unwrap();
        assert!(backend.api_key.is_some());
        assert_eq!(backend.model, DEEPSEEK_MODEL);
    }

    #[test]
    fn unknown_backend_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::default();
        assert!(resolve_backend(&cfg, "mystery", dir.path()).is_err());
    }

    #[test]
    fn default_config_parses_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_default_config(dir.path(), false).unwrap();
        let cfg = load_config(&path).unwrap();
        assert!(cfg.backends.contains_key("deepseek"));
        assert_eq!(cfg.translate.backend.as_deref(), Some("deepseek"));
        assert!(init_default_config(dir.path(), false).is_err());
        assert!(init_default_config(dir.path(), true).is_ok());
    }

    #[test]
    fn config_toml_round_trip() {
        let text = r#"
[translate]
backend = "local"
workers = 4
max_chars = 2500

[backends.local]
kind = "ollama"
model = "qwen2.5:14b"
timeout_secs = 120
"#;
        let cfg: AppConfig = toml::from_str(text).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let backend = resolve_backend(&cfg, "local", dir.path()).unwrap();
        assert_eq!(backend.model, "qwen2.5:14b");
        assert_eq!(backend.timeout, Duration::from_secs(120));
        assert_eq!(cfg.translate.workers, Some(4));
    }
}
