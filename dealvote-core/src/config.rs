use crate::error::{ConfigError, CoreError};
use crate::retry::RetryConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const CLIENT_SECRET_ENV: &str = "DEALVOTE_CLIENT_SECRET";
pub const PASSWORD_ENV: &str = "DEALVOTE_PASSWORD";

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub reddit: RedditCredentials,
    pub bot: BotSettings,
    #[serde(default)]
    pub comment_voting: TriggerLists,
    #[serde(default)]
    pub title_voting: TriggerLists,
    #[serde(default)]
    pub link_parsing: LinkParsing,
}

/// Script-app credentials. The secret and password may be left out of the
/// file and supplied through the environment instead.
#[derive(Clone, Deserialize)]
pub struct RedditCredentials {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub user_agent: String,
}

impl std::fmt::Debug for RedditCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedditCredentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotSettings {
    pub subreddit: String,
    /// Target of the "What is this?" link in every summary.
    pub summary_link: String,
    #[serde(default = "default_scan_limit")]
    pub scan_limit: u32,
    #[serde(default = "default_post_delay_secs")]
    pub post_delay_secs: u64,
    #[serde(default = "default_cycle_delay_secs")]
    pub cycle_delay_secs: u64,
    /// Stop after this many seconds; run forever when absent.
    #[serde(default)]
    pub run_duration_secs: Option<u64>,
    /// `0` retries placeholder expansion until it succeeds.
    #[serde(default = "default_expansion_max_attempts")]
    pub expansion_max_attempts: u32,
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

fn default_scan_limit() -> u32 {
    500
}

fn default_post_delay_secs() -> u64 {
    2
}

fn default_cycle_delay_secs() -> u64 {
    10
}

fn default_expansion_max_attempts() -> u32 {
    8
}

fn default_database_url() -> String {
    "sqlite://dealvote.db".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerLists {
    #[serde(default)]
    pub positive: Vec<String>,
    #[serde(default)]
    pub neutral: Vec<String>,
    #[serde(default)]
    pub negative: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkParsing {
    #[serde(default)]
    pub url_filters: Vec<String>,
}

impl BotConfig {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CoreError::Config(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }),
            _ => CoreError::Io(e),
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(Self::from_toml_str(&raw, |name| std::env::var(name).ok())?)
    }

    pub fn from_toml_str<F>(raw: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: BotConfig = toml::from_str(raw)?;
        config.resolve_secrets(env)?;
        config.validate()?;
        Ok(config)
    }

    fn resolve_secrets<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (value, var_name) in [
            (&mut self.reddit.client_secret, CLIENT_SECRET_ENV),
            (&mut self.reddit.password, PASSWORD_ENV),
        ] {
            if value.is_empty() {
                *value = env(var_name).filter(|v| !v.is_empty()).ok_or_else(|| {
                    ConfigError::MissingEnvironmentVariable {
                        var_name: var_name.to_string(),
                    }
                })?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("reddit.client_id", &self.reddit.client_id),
            ("reddit.username", &self.reddit.username),
            ("reddit.user_agent", &self.reddit.user_agent),
            ("bot.subreddit", &self.bot.subreddit),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: field.to_string(),
                });
            }
        }

        if self.bot.scan_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bot.scan_limit".to_string(),
                value: "0".to_string(),
            });
        }

        // An empty trigger is a substring of every text.
        for (section, lists) in [
            ("comment_voting", &self.comment_voting),
            ("title_voting", &self.title_voting),
        ] {
            for (name, list) in [
                ("positive", &lists.positive),
                ("neutral", &lists.neutral),
                ("negative", &lists.negative),
            ] {
                if list.iter().any(|t| t.trim().is_empty()) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("{section}.{name}"),
                        value: "\"\"".to_string(),
                    });
                }
            }
        }

        if self.link_parsing.url_filters.iter().any(|f| f.is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "link_parsing.url_filters".to_string(),
                value: "\"\"".to_string(),
            });
        }

        Ok(())
    }
}

impl BotSettings {
    pub fn post_delay(&self) -> Duration {
        Duration::from_secs(self.post_delay_secs)
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_secs(self.cycle_delay_secs)
    }

    pub fn run_duration(&self) -> Option<Duration> {
        self.run_duration_secs.map(Duration::from_secs)
    }

    pub fn expansion_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: (self.expansion_max_attempts > 0).then_some(self.expansion_max_attempts),
            ..RetryConfig::reddit()
        }
    }
}
