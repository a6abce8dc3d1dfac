use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{LitScoutError, SecretValue, optional_env};

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "LITSCOUT_CONFIG";

/// Configuration shared between the driver, the stages and the `config_manager` tool.
pub type SharedConfig = Arc<RwLock<Config>>;

/// Bibliographic search providers, in the order their results are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAlex,
    Core,
    Orkg,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OpenAlex,
        ProviderKind::Core,
        ProviderKind::Orkg,
    ];

    /// Key used in the `[sources]` table and in configuration commands.
    pub fn key(&self) -> &'static str {
        match self {
            ProviderKind::OpenAlex => "openalex",
            ProviderKind::Core => "core",
            ProviderKind::Orkg => "orkg",
        }
    }

    /// Name the provider's tool is registered under.
    pub fn tool_name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAlex => "openalex_search",
            ProviderKind::Core => "core_search",
            ProviderKind::Orkg => "orkg_search",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.key().eq_ignore_ascii_case(key.trim()))
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAlex => "https://api.openalex.org",
            ProviderKind::Core => "https://api.core.ac.uk/v3",
            ProviderKind::Orkg => "https://api.ask.orkg.org",
        }
    }

    fn default_timeout_secs(&self) -> u64 {
        match self {
            ProviderKind::OpenAlex => 40,
            ProviderKind::Core => 15,
            ProviderKind::Orkg => 60,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sources: SourcesConfig,
    pub web: WebConfig,
    pub defaults: SearchDefaults,
    pub behavior: BehaviorConfig,
    pub analysis: AnalysisConfig,
    pub writing: WritingConfig,
    pub logging: LoggingConfig,
    #[serde(skip)]
    origin: Option<PathBuf>,
}

impl Config {
    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, LitScoutError> {
        let config: Config =
            toml::from_str(raw).map_err(|err| LitScoutError::Configuration(err.to_string()))?;
        ConfigLoader::validate(&config)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, LitScoutError> {
        toml::to_string_pretty(self).map_err(|err| LitScoutError::Configuration(err.to_string()))
    }

    /// File this configuration was loaded from, if any.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `LITSCOUT_CONFIG` environment variable.
    /// 3. `config.toml` in the current working directory.
    ///
    /// A missing file is only an error when it was named explicitly; otherwise
    /// the built-in defaults apply.
    pub fn load(path: Option<PathBuf>) -> Result<Config, LitScoutError> {
        let (candidate, explicit) = resolve_path(path);
        let raw = match fs::read_to_string(&candidate) {
            Ok(raw) => raw,
            Err(err) if !explicit && err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    path = %candidate.display(),
                    "no config file found; using defaults"
                );
                let config = Config::default();
                Self::validate(&config)?;
                return Ok(config);
            }
            Err(err) => return Err(LitScoutError::config_io(candidate, err)),
        };

        let mut config = Config::from_toml_str(&raw)?;
        config.origin = Some(candidate);
        Ok(config)
    }

    /// Write the configuration back to the file it came from.
    ///
    /// Returns `Ok(false)` when the configuration has no backing file.
    pub fn save(config: &Config) -> Result<bool, LitScoutError> {
        let Some(path) = config.origin() else {
            return Ok(false);
        };
        let rendered = config.to_toml_string()?;
        fs::write(path, rendered).map_err(|err| LitScoutError::config_io(path.to_path_buf(), err))?;
        Ok(true)
    }

    pub fn validate(config: &Config) -> Result<(), LitScoutError> {
        for kind in ProviderKind::ALL {
            let settings = config.sources.get(kind);
            if settings.timeout(kind).is_zero() || settings.request_timeout_secs == 0 {
                return Err(LitScoutError::Configuration(format!(
                    "sources.{kind} timeouts must be greater than zero"
                )));
            }
            settings.base_url(kind)?;
            if settings.enabled {
                // Referenced secrets must exist at load time so they never end up inline.
                settings.api_key()?;
            }
        }

        for source in &config.web.sources {
            Url::parse(&source.url).map_err(|err| {
                LitScoutError::Configuration(format!(
                    "web source `{}` has an invalid url: {err}",
                    source.name
                ))
            })?;
        }

        if config.behavior.max_workers == 0 {
            return Err(LitScoutError::Configuration(
                "behavior.max_workers must be at least 1".into(),
            ));
        }
        if config.defaults.max_results == 0 {
            return Err(LitScoutError::Configuration(
                "defaults.max_results must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return (PathBuf::from(from_env), true);
        }
    }

    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub openalex: ProviderSettings,
    pub core: ProviderSettings,
    pub orkg: ProviderSettings,
}

impl SourcesConfig {
    pub fn get(&self, kind: ProviderKind) -> &ProviderSettings {
        match kind {
            ProviderKind::OpenAlex => &self.openalex,
            ProviderKind::Core => &self.core,
            ProviderKind::Orkg => &self.orkg,
        }
    }

    pub fn get_mut(&mut self, kind: ProviderKind) -> &mut ProviderSettings {
        match kind {
            ProviderKind::OpenAlex => &mut self.openalex,
            ProviderKind::Core => &mut self.core,
            ProviderKind::Orkg => &mut self.orkg,
        }
    }

    /// Enabled providers in merge order.
    pub fn enabled(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).enabled)
            .collect()
    }
}

/// Per-provider settings. Unset optional values fall back to provider-specific defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Upper bound for one dispatched call, retries included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Upper bound for a single HTTP attempt.
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mailto: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            timeout_secs: None,
            request_timeout_secs: 15,
            max_retries: 2,
            retry_backoff_ms: 1_000,
            api_key_env: None,
            mailto: None,
        }
    }
}

impl ProviderSettings {
    pub fn base_url(&self, kind: ProviderKind) -> Result<Url, LitScoutError> {
        let raw = self
            .base_url
            .as_deref()
            .unwrap_or_else(|| kind.default_base_url());
        Url::parse(raw.trim_end_matches('/')).map_err(|err| {
            LitScoutError::Configuration(format!("sources.{kind}.base_url is invalid: {err}"))
        })
    }

    pub fn timeout(&self, kind: ProviderKind) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or_else(|| kind.default_timeout_secs()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn api_key(&self) -> Result<Option<SecretValue>, LitScoutError> {
        optional_env(self.api_key_env.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub sources: Vec<WebSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl WebConfig {
    const DEFAULT_TIMEOUT_SECS: u64 = 20;

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(Self::DEFAULT_TIMEOUT_SECS))
    }
}

/// A web page consulted alongside the bibliographic providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSource {
    pub name: String,
    pub url: String,
    /// When set, the query is appended to `url` under this parameter name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_param: Option<String>,
}

impl WebSource {
    /// Build the URL to fetch for a given query.
    pub fn url_for(&self, query: &str) -> Result<Url, LitScoutError> {
        let mut url = Url::parse(&self.url).map_err(|err| {
            LitScoutError::Configuration(format!("web source `{}`: {err}", self.name))
        })?;
        if let Some(param) = &self.query_param {
            url.query_pairs_mut().append_pair(param, query);
        }
        Ok(url)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchDefaults {
    pub max_results: usize,
    pub min_year: i32,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            max_results: 10,
            min_year: 2004,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub max_workers: usize,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self { max_workers: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub min_citations: u64,
    /// Let sources without a reported citation count through the gate.
    pub allow_missing_citations: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_citations: 1,
            allow_missing_citations: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WritingConfig {
    pub highly_cited_threshold: u64,
}

impl Default for WritingConfig {
    fn default() -> Self {
        Self {
            highly_cited_threshold: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for JSONL turn logs; logging is off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_log_dir: Option<PathBuf>,
    pub retention_days: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            session_log_dir: None,
            retention_days: 90,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_provider_conventions() {
        let config = Config::default();
        assert_eq!(config.sources.enabled(), ProviderKind::ALL.to_vec());
        assert_eq!(
            config.sources.orkg.timeout(ProviderKind::Orkg),
            Duration::from_secs(60)
        );
        assert_eq!(
            config.sources.core.timeout(ProviderKind::Core),
            Duration::from_secs(15)
        );
        assert_eq!(config.analysis.min_citations, 1);
        assert_eq!(config.defaults.min_year, 2004);
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn partial_tables_keep_provider_defaults() {
        let config = Config::from_toml_str(
            r#"
            [sources.orkg]
            enabled = false

            [analysis]
            min_citations = 5
            "#,
        )
        .unwrap();

        assert!(!config.sources.orkg.enabled);
        assert_eq!(
            config.sources.orkg.base_url(ProviderKind::Orkg).unwrap().as_str(),
            "https://api.ask.orkg.org/"
        );
        assert_eq!(config.analysis.min_citations, 5);
        assert_eq!(
            config.sources.enabled(),
            vec![ProviderKind::OpenAlex, ProviderKind::Core]
        );
    }

    #[test]
    fn zero_workers_rejected() {
        let err = Config::from_toml_str("[behavior]\nmax_workers = 0\n").unwrap_err();
        assert!(matches!(err, LitScoutError::Configuration(_)));
    }

    #[test]
    fn missing_referenced_secret_rejected() {
        let err = Config::from_toml_str(
            "[sources.core]\napi_key_env = \"LITSCOUT_TEST_CORE_KEY_UNSET\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, LitScoutError::MissingSecret(_)));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = ConfigLoader::load(Some(dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, LitScoutError::ConfigIo { .. }));
    }

    #[test]
    fn save_round_trips_through_origin() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("litscout.toml");
        fs::write(&path, "[sources.core]\nenabled = false\n").unwrap();

        let mut config = ConfigLoader::load(Some(path.clone())).unwrap();
        assert_eq!(config.origin(), Some(path.as_path()));
        config.sources.core.enabled = true;
        config.sources.core.timeout_secs = Some(30);
        assert!(ConfigLoader::save(&config).unwrap());

        let reloaded = ConfigLoader::load(Some(path)).unwrap();
        assert!(reloaded.sources.core.enabled);
        assert_eq!(reloaded.sources.core.timeout_secs, Some(30));
    }

    #[test]
    fn web_source_appends_query_param() {
        let source = WebSource {
            name: "wiki".into(),
            url: "https://en.wikipedia.org/w/index.php".into(),
            query_param: Some("search".into()),
        };
        let url = source.url_for("quantum error correction").unwrap();
        assert_eq!(
            url.as_str(),
            "https://en.wikipedia.org/w/index.php?search=quantum+error+correction"
        );
    }
}
