//! Natural-language configuration commands ("disable orkg", "set core timeout to 30").

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{Config, ConfigLoader, ProviderKind};

static TOGGLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(enable|disable)\s+(?:the\s+)?(\w+)(?:\s+tool)?").expect("invalid toggle regex")
});
static TIMEOUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"set\s+(?:the\s+)?(\w+)?\s*timeout\s+to\s+(\d+)").expect("invalid timeout regex")
});
static RETRIES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"set\s+(?:the\s+)?(\w+)?\s*retries?\s+to\s+(\d+)").expect("invalid retries regex")
});
static ROUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(?:enable|disable)\s+\w+|set\s+.*\b(?:timeout|retries?)\s+to\s+\d+|show\s+config|configure\s+|config\s+|settings\b)")
        .expect("invalid route regex")
});

/// Where a line of user input should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Configuration,
    Research,
}

/// Classifies user input as a configuration command or a research query.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryRouter;

impl QueryRouter {
    pub fn route(&self, input: &str) -> Route {
        if ROUTE.is_match(&input.to_lowercase()) {
            Route::Configuration
        } else {
            Route::Research
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    Toggle { provider: ProviderKind, enable: bool },
    /// `provider: None` applies to every provider.
    SetTimeout { provider: Option<ProviderKind>, secs: u64 },
    SetRetries { provider: Option<ProviderKind>, retries: u32 },
    Show,
}

fn available() -> String {
    ProviderKind::ALL
        .iter()
        .map(ProviderKind::key)
        .collect::<Vec<_>>()
        .join(", ")
}

/// `None` for global targets; `Err` carries the message for an unknown provider.
fn target(word: Option<&str>) -> Result<Option<ProviderKind>, String> {
    match word {
        None | Some("global") | Some("all") | Some("default") => Ok(None),
        Some(word) => ProviderKind::from_key(word)
            .map(Some)
            .ok_or_else(|| format!("Unknown tool: {word}. Available: {}", available())),
    }
}

impl ConfigCommand {
    /// Parse a command; the error is a message meant for the user.
    pub fn parse(input: &str) -> Result<Self, String> {
        let command = input.trim().to_lowercase();

        if let Some(caps) = TOGGLE.captures(&command) {
            let enable = &caps[1] == "enable";
            let word = &caps[2];
            let provider = ProviderKind::from_key(word)
                .ok_or_else(|| format!("Unknown tool: {word}. Available: {}", available()))?;
            return Ok(Self::Toggle { provider, enable });
        }

        if let Some(caps) = TIMEOUT.captures(&command) {
            let provider = target(caps.get(1).map(|m| m.as_str()))?;
            let secs = caps[2]
                .parse()
                .map_err(|_| format!("Invalid timeout: {}", &caps[2]))?;
            return Ok(Self::SetTimeout { provider, secs });
        }

        if let Some(caps) = RETRIES.captures(&command) {
            let provider = target(caps.get(1).map(|m| m.as_str()))?;
            let retries = caps[2]
                .parse()
                .map_err(|_| format!("Invalid retry count: {}", &caps[2]))?;
            return Ok(Self::SetRetries { provider, retries });
        }

        if command.contains("show") && command.contains("config") {
            return Ok(Self::Show);
        }

        Err(format!("Unknown command: {}", input.trim()))
    }

    /// Whether applying the command changes the configuration.
    pub fn mutates(&self) -> bool {
        !matches!(self, Self::Show)
    }

    /// Apply to `config` and describe the result.
    pub fn apply(&self, config: &mut Config) -> String {
        match self {
            Self::Toggle { provider, enable } => {
                config.sources.get_mut(*provider).enabled = *enable;
                let status = if *enable { "enabled" } else { "disabled" };
                format!("{} tool {status}", provider.key().to_uppercase())
            }
            Self::SetTimeout {
                provider: Some(provider),
                secs,
            } => {
                config.sources.get_mut(*provider).timeout_secs = Some(*secs);
                format!(
                    "{} timeout set to {secs} seconds",
                    provider.key().to_uppercase()
                )
            }
            Self::SetTimeout {
                provider: None,
                secs,
            } => {
                for kind in ProviderKind::ALL {
                    config.sources.get_mut(kind).timeout_secs = Some(*secs);
                }
                format!("Global timeout set to {secs} seconds")
            }
            Self::SetRetries {
                provider: Some(provider),
                retries,
            } => {
                config.sources.get_mut(*provider).max_retries = *retries;
                format!(
                    "{} retries set to {retries}",
                    provider.key().to_uppercase()
                )
            }
            Self::SetRetries {
                provider: None,
                retries,
            } => {
                for kind in ProviderKind::ALL {
                    config.sources.get_mut(kind).max_retries = *retries;
                }
                format!("Global retries set to {retries}")
            }
            Self::Show => render(config),
        }
    }
}

fn render(config: &Config) -> String {
    let mut lines = vec!["Current Configuration:".to_string()];
    for kind in ProviderKind::ALL {
        let settings = config.sources.get(kind);
        lines.push(format!(
            "  {}: {}, timeout={}s, retries={}",
            kind.key().to_uppercase(),
            if settings.enabled { "enabled" } else { "disabled" },
            settings.timeout(kind).as_secs(),
            settings.max_retries
        ));
    }
    lines.push(format!(
        "  Citation threshold: {} (missing counts {})",
        config.analysis.min_citations,
        if config.analysis.allow_missing_citations {
            "allowed"
        } else {
            "rejected"
        }
    ));
    lines.join("\n")
}

/// Parse and apply a command against `config`, keeping the previous
/// configuration if the result would not validate.
pub fn execute(config: &mut Config, input: &str) -> String {
    let command = match ConfigCommand::parse(input) {
        Ok(command) => command,
        Err(message) => return message,
    };

    let mut candidate = config.clone();
    let message = command.apply(&mut candidate);
    if let Err(err) = ConfigLoader::validate(&candidate) {
        return format!("Configuration unchanged: {err}");
    }
    *config = candidate;

    if command.mutates() {
        match ConfigLoader::save(config) {
            Ok(true) => tracing::info!(command = %input.trim(), "configuration saved"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(error = %err, "failed to persist configuration");
                return format!("{message} (not saved: {err})");
            }
        }
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_separates_commands_from_questions() {
        let router = QueryRouter;
        assert_eq!(router.route("Disable ORKG tool"), Route::Configuration);
        assert_eq!(router.route("set core timeout to 30"), Route::Configuration);
        assert_eq!(router.route("show config"), Route::Configuration);
        assert_eq!(
            router.route("quantum error correction 2023"),
            Route::Research
        );
        assert_eq!(
            router.route("do antibiotics disable gut flora"),
            Route::Research
        );
    }

    #[test]
    fn parses_provider_and_global_targets() {
        assert_eq!(
            ConfigCommand::parse("enable the openalex tool").unwrap(),
            ConfigCommand::Toggle {
                provider: ProviderKind::OpenAlex,
                enable: true
            }
        );
        assert_eq!(
            ConfigCommand::parse("set timeout to 60").unwrap(),
            ConfigCommand::SetTimeout {
                provider: None,
                secs: 60
            }
        );
        assert_eq!(
            ConfigCommand::parse("set orkg retries to 5").unwrap(),
            ConfigCommand::SetRetries {
                provider: Some(ProviderKind::Orkg),
                retries: 5
            }
        );
        assert_eq!(ConfigCommand::parse("show config").unwrap(), ConfigCommand::Show);
    }

    #[test]
    fn unknown_provider_lists_alternatives() {
        let message = ConfigCommand::parse("disable scopus").unwrap_err();
        assert_eq!(message, "Unknown tool: scopus. Available: openalex, core, orkg");
    }

    #[test]
    fn execute_applies_and_rejects_invalid_values() {
        let mut config = Config::default();
        assert_eq!(execute(&mut config, "disable orkg"), "ORKG tool disabled");
        assert!(!config.sources.orkg.enabled);

        assert_eq!(
            execute(&mut config, "set core timeout to 25"),
            "CORE timeout set to 25 seconds"
        );
        assert_eq!(config.sources.core.timeout_secs, Some(25));

        let message = execute(&mut config, "set timeout to 0");
        assert!(message.starts_with("Configuration unchanged"));
        assert_eq!(config.sources.core.timeout_secs, Some(25));

        let shown = execute(&mut config, "show config");
        assert!(shown.contains("ORKG: disabled"));
        assert!(shown.contains("CORE: enabled, timeout=25s"));
    }
}
