use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Name of the config file looked up inside the project's `memory/` directory.
pub const CONFIG_FILE_NAME: &str = "kex-mem.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding the documents.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// SQLite store file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            db_path: default_db_path(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("memory")
}
fn default_db_path() -> PathBuf {
    PathBuf::from("memory/.kex-mem.db")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

/// Which embedding backend produces vectors.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// On-device model.
    #[default]
    Local,
    /// Hosted OpenAI-compatible embeddings API.
    #[serde(alias = "openai")]
    Remote,
}

/// Output dimension of each on-device model the local provider can load.
pub const LOCAL_MODELS: &[(&str, usize)] = &[
    ("all-minilm-l6-v2", 384),
    ("bge-small-en-v1.5", 384),
    ("bge-base-en-v1.5", 768),
    ("nomic-embed-text-v1.5", 768),
    ("multilingual-e5-small", 384),
];

/// Native output dimension of well-known hosted models. Other remote models
/// need an explicit `dimension`.
const REMOTE_MODELS: &[(&str, usize)] = &[
    ("text-embedding-3-small", 1536),
    ("text-embedding-3-large", 3072),
    ("text-embedding-ada-002", 1536),
];

impl ProviderKind {
    /// Native output dimension of the provider's default model.
    pub fn default_dimension(self) -> usize {
        match self {
            ProviderKind::Local => 384,
            ProviderKind::Remote => 1536,
        }
    }

    /// Native output dimension of `model`, if this provider knows it.
    pub fn model_dimension(self, model: &str) -> Option<usize> {
        let table = match self {
            ProviderKind::Local => LOCAL_MODELS,
            ProviderKind::Remote => REMOTE_MODELS,
        };
        table
            .iter()
            .find(|(name, _)| *name == model)
            .map(|(_, dim)| *dim)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::Remote => "remote",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub provider: ProviderKind,
    /// Overrides the provider's default dimension.
    #[serde(default)]
    pub dimension: Option<usize>,
    #[serde(default)]
    pub model: Option<String>,
    /// API key for the remote provider. Falls back to `OPENAI_API_KEY`.
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: ProviderKind::Local,
            dimension: None,
            model: None,
            credential: None,
            api_base: default_api_base(),
            max_batch_size: default_max_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_batch_size() -> usize {
    512
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

impl VectorConfig {
    /// The dimension every stored vector must have: the explicit
    /// `dimension`, else the configured model's, else the provider default.
    pub fn resolved_dimension(&self) -> usize {
        self.dimension
            .or_else(|| {
                self.model
                    .as_deref()
                    .and_then(|m| self.provider.model_dimension(m))
            })
            .unwrap_or_else(|| self.provider.default_dimension())
    }
}

/// Rank-fusion tuning. The defaults are inherited policy, not derived values,
/// and are expected to be re-tuned against real corpora.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// RRF smoothing constant `k` in `w / (k + rank)`.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    /// Candidates fetched from each index, as a multiple of the result limit.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Body preview length (in characters) for hits found only by vector search.
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            lexical_weight: default_lexical_weight(),
            vector_weight: default_vector_weight(),
            candidate_multiplier: default_candidate_multiplier(),
            default_limit: default_limit(),
            preview_chars: default_preview_chars(),
        }
    }
}

fn default_rrf_k() -> f64 {
    60.0
}
fn default_lexical_weight() -> f64 {
    0.3
}
fn default_vector_weight() -> f64 {
    0.7
}
fn default_candidate_multiplier() -> usize {
    2
}
fn default_limit() -> usize {
    10
}
fn default_preview_chars() -> usize {
    200
}

impl Config {
    /// Default configuration with paths resolved against `project_root`.
    pub fn for_project(project_root: &Path) -> Self {
        let mut config = Config::default();
        config.resolve_paths(project_root);
        config
    }

    /// Make relative `index.root` and `index.db_path` absolute under `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.index.root.is_relative() {
            self.index.root = base.join(&self.index.root);
        }
        if self.index.db_path.is_relative() {
            self.index.db_path = base.join(&self.index.db_path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if r.rrf_k <= 0.0 {
            bail!("retrieval.rrf_k must be > 0");
        }
        if !(0.0..=1.0).contains(&r.lexical_weight) {
            bail!("retrieval.lexical_weight must be in [0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&r.vector_weight) {
            bail!("retrieval.vector_weight must be in [0.0, 1.0]");
        }
        if r.candidate_multiplier < 1 {
            bail!("retrieval.candidate_multiplier must be >= 1");
        }
        if r.default_limit < 1 {
            bail!("retrieval.default_limit must be >= 1");
        }

        let v = &self.vector;
        if v.dimension == Some(0) {
            bail!("vector.dimension must be > 0");
        }
        if v.max_batch_size == 0 {
            bail!("vector.max_batch_size must be >= 1");
        }
        if let Some(model) = &v.model {
            let known = v.provider.model_dimension(model).is_some();
            match v.provider {
                ProviderKind::Local if !known => {
                    let names: Vec<&str> = LOCAL_MODELS.iter().map(|(n, _)| *n).collect();
                    bail!(
                        "vector.model '{}' is not a supported local model ({})",
                        model,
                        names.join(", ")
                    );
                }
                ProviderKind::Remote if !known && v.dimension.is_none() => {
                    bail!("vector.dimension is required for remote model '{}'", model);
                }
                _ => {}
            }
        }

        if self.index.include_globs.is_empty() {
            bail!("index.include_globs must not be empty");
        }

        Ok(())
    }
}

/// Parse and validate a config file. Relative paths inside it resolve
/// against `project_root`.
pub fn load_config(path: &Path, project_root: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.validate()?;
    config.resolve_paths(project_root);
    Ok(config)
}

/// Load `memory/kex-mem.toml` under `project_root` when it exists, defaults otherwise.
pub fn load_or_default(project_root: &Path) -> Result<Config> {
    let path = project_root.join("memory").join(CONFIG_FILE_NAME);
    if path.exists() {
        load_config(&path, project_root)
    } else {
        Ok(Config::for_project(project_root))
    }
}

/// Walk up from `from` to the first directory that looks like a project
/// root (has `.git`, `package.json` or `memory/`). Falls back to `from`.
pub fn find_project_root(from: &Path) -> PathBuf {
    from.ancestors()
        .find(|dir| {
            dir.join(".git").exists()
                || dir.join("package.json").exists()
                || dir.join("memory").is_dir()
        })
        .map(Path::to_path_buf)
        .unwrap_or_else(|| from.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert!(!config.vector.enabled);
        assert_eq!(config.vector.provider, ProviderKind::Local);
        assert_eq!(config.vector.resolved_dimension(), 384);
        assert_eq!(config.retrieval.rrf_k, 60.0);
        assert_eq!(config.retrieval.lexical_weight, 0.3);
        assert_eq!(config.retrieval.vector_weight, 0.7);
        assert_eq!(config.index.include_globs, vec!["**/*.md".to_string()]);
    }

    #[test]
    fn test_remote_provider_dimension() {
        let config: Config = toml::from_str(
            r#"
            [vector]
            enabled = true
            provider = "openai"
            "#,
        )
        .unwrap();
        assert_eq!(config.vector.provider, ProviderKind::Remote);
        assert_eq!(config.vector.resolved_dimension(), 1536);
    }

    #[test]
    fn test_explicit_dimension_wins() {
        let config: Config = toml::from_str("[vector]\ndimension = 768\n").unwrap();
        assert_eq!(config.vector.resolved_dimension(), 768);
    }

    #[test]
    fn test_local_model_sets_dimension() {
        let config: Config = toml::from_str("[vector]\nmodel = \"bge-base-en-v1.5\"\n").unwrap();
        config.validate().unwrap();
        assert_eq!(config.vector.resolved_dimension(), 768);

        let config: Config =
            toml::from_str("[vector]\nmodel = \"nomic-embed-text-v1.5\"\n").unwrap();
        assert_eq!(config.vector.resolved_dimension(), 768);

        let config: Config = toml::from_str("[vector]\nmodel = \"bge-small-en-v1.5\"\n").unwrap();
        assert_eq!(config.vector.resolved_dimension(), 384);
    }

    #[test]
    fn test_remote_model_sets_dimension() {
        let config: Config = toml::from_str(
            "[vector]\nprovider = \"remote\"\nmodel = \"text-embedding-3-large\"\n",
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.vector.resolved_dimension(), 3072);
    }

    #[test]
    fn test_unknown_remote_model_needs_dimension() {
        let config: Config =
            toml::from_str("[vector]\nprovider = \"remote\"\nmodel = \"my-embedder\"\n")
                .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("vector.dimension"), "{}", err);

        let config: Config = toml::from_str(
            "[vector]\nprovider = \"remote\"\nmodel = \"my-embedder\"\ndimension = 1024\n",
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.vector.resolved_dimension(), 1024);
    }

    #[test]
    fn test_unknown_local_model_rejected() {
        let config: Config = toml::from_str("[vector]\nmodel = \"not-a-model\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_weights() {
        let config: Config = toml::from_str("[retrieval]\nvector_weight = 1.5\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_dimension() {
        let config: Config = toml::from_str("[vector]\ndimension = 0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_provider_fails_to_parse() {
        let parsed: Result<Config, _> = toml::from_str("[vector]\nprovider = \"ollama\"\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_paths_resolve_against_project_root() {
        let config = Config::for_project(Path::new("/tmp/project"));
        assert_eq!(config.index.root, PathBuf::from("/tmp/project/memory"));
        assert_eq!(
            config.index.db_path,
            PathBuf::from("/tmp/project/memory/.kex-mem.db")
        );
    }

    #[test]
    fn test_find_project_root_by_memory_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("memory")).unwrap();
        let nested = tmp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_project_root(&nested), tmp.path());
    }
}
