use crate::cratejoy::{self, CratejoyFeed};
use crate::fetcher::{Credentials, RetryPolicy};
use crate::mailchimp;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("max_connections cannot be 0")]
    NoConnections,

    #[error("timeout_secs cannot be 0")]
    NoTimeout,

    #[error("retry max_attempts cannot be 0")]
    NoAttempts,

    #[error("retry base_delay_ms ({base}) exceeds max_delay_ms ({max})")]
    DelayOrder { base: u64, max: u64 },

    #[error("{0} page size cannot be 0")]
    EmptyPage(&'static str),

    #[error("Cratejoy section enables no feeds")]
    NoCratejoyFeeds,

    #[error("Neither cratejoy nor mailchimp is configured")]
    NothingToSync,

    #[error("Invalid {vendor} base_url {url:?}: {source}")]
    InvalidBaseUrl {
        vendor: &'static str,
        url: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("no Mailchimp list IDs configured and {0} is empty")]
    NoListIds(String),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

fn default_database_url_env() -> String {
    "DATABASE_URL".to_string()
}

fn default_max_connections() -> u32 {
    1
}

/// Where the database lives. A literal `url` wins over `url_env`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_database_url_env")]
    pub url_env: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            url: None,
            url_env: default_database_url_env(),
            max_connections: default_max_connections(),
        }
    }
}

/// Backoff between attempts of one request: `base_delay_ms` doubled per attempt, up
/// to `max_delay_ms`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub retry: RetryConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            timeout_secs: 60,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CratejoyConfig {
    pub base_url: String,
    pub client_env: String,
    pub api_key_env: String,
    pub subscription_page_size: u32,
    pub order_page_size: u32,
    pub order_lookback_days: u32,
    pub feeds: Vec<CratejoyFeed>,
}

impl Default for CratejoyConfig {
    fn default() -> Self {
        CratejoyConfig {
            base_url: cratejoy::DEFAULT_BASE_URL.to_string(),
            client_env: "CRATEJOY_CLIENT".to_string(),
            api_key_env: "CRATEJOY_API_KEY".to_string(),
            subscription_page_size: 500,
            order_page_size: 150,
            order_lookback_days: 5,
            feeds: vec![CratejoyFeed::Orders, CratejoyFeed::Subscriptions],
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct MailchimpConfig {
    pub base_url: String,
    /// Mailchimp ignores the Basic auth username; only the key matters.
    pub username: String,
    pub api_key_env: String,
    /// Takes precedence over `list_ids_env`.
    pub list_ids: Vec<String>,
    /// Holds a comma separated list of IDs.
    pub list_ids_env: String,
    pub page_size: u32,
}

impl Default for MailchimpConfig {
    fn default() -> Self {
        MailchimpConfig {
            base_url: mailchimp::DEFAULT_BASE_URL.to_string(),
            username: "username".to_string(),
            api_key_env: "apiKey".to_string(),
            list_ids: Vec::new(),
            list_ids_env: "listID".to_string(),
            page_size: 1000,
        }
    }
}

/// Sync job configuration. Secrets are never part of the file, only the names of the
/// environment variables holding them.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub cratejoy: Option<CratejoyConfig>,
    pub mailchimp: Option<MailchimpConfig>,
}

/// Configuration with secrets read and URLs parsed.
#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub cratejoy: Option<cratejoy::Settings>,
    pub mailchimp: Option<mailchimp::Settings>,
}

fn parse_base_url(vendor: &'static str, raw: &str) -> Result<Url, ValidationError> {
    // Without the trailing slash, joining a resource would replace the last segment
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|source| ValidationError::InvalidBaseUrl {
        vendor,
        url: raw.to_string(),
        source,
    })
}

fn require<F>(env: &F, name: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    env(name)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::MissingEnv(name.to_string()))
}

impl Config {
    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.database.max_connections == 0 {
            return Err(ValidationError::NoConnections);
        }

        self.http.validate()?;

        if self.cratejoy.is_none() && self.mailchimp.is_none() {
            return Err(ValidationError::NothingToSync);
        }

        if let Some(cratejoy) = &self.cratejoy {
            cratejoy.validate()?;
        }

        if let Some(mailchimp) = &self.mailchimp {
            mailchimp.validate()?;
        }

        Ok(())
    }

    /// Validates, then reads every secret through `env`.
    pub fn resolve<F>(&self, env: F) -> Result<Settings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.validate()?;

        let database_url = match &self.database.url {
            Some(url) => url.clone(),
            None => require(&env, &self.database.url_env)?,
        };

        let cratejoy = self
            .cratejoy
            .as_ref()
            .map(|config| config.resolve(&env))
            .transpose()?;

        let mailchimp = self
            .mailchimp
            .as_ref()
            .map(|config| config.resolve(&env))
            .transpose()?;

        Ok(Settings {
            database_url,
            max_connections: self.database.max_connections,
            timeout: Duration::from_secs(self.http.timeout_secs),
            retry: self.http.retry.policy(),
            cratejoy,
            mailchimp,
        })
    }

    /// Reads secrets from the process environment.
    pub fn resolve_from_env(&self) -> Result<Settings, ConfigError> {
        self.resolve(|name| std::env::var(name).ok())
    }
}

impl HttpConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_secs == 0 {
            return Err(ValidationError::NoTimeout);
        }
        if self.retry.max_attempts == 0 {
            return Err(ValidationError::NoAttempts);
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ValidationError::DelayOrder {
                base: self.retry.base_delay_ms,
                max: self.retry.max_delay_ms,
            });
        }
        Ok(())
    }
}

impl CratejoyConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        parse_base_url("cratejoy", &self.base_url)?;
        if self.subscription_page_size == 0 {
            return Err(ValidationError::EmptyPage("subscription"));
        }
        if self.order_page_size == 0 {
            return Err(ValidationError::EmptyPage("order"));
        }
        if self.feeds.is_empty() {
            return Err(ValidationError::NoCratejoyFeeds);
        }
        Ok(())
    }

    fn resolve<F>(&self, env: &F) -> Result<cratejoy::Settings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(cratejoy::Settings {
            base_url: parse_base_url("cratejoy", &self.base_url)?,
            credentials: Credentials::new(
                require(env, &self.client_env)?,
                require(env, &self.api_key_env)?,
            ),
            subscription_page_size: self.subscription_page_size,
            order_page_size: self.order_page_size,
            order_lookback_days: self.order_lookback_days,
            feeds: self.feeds.clone(),
        })
    }
}

impl MailchimpConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        parse_base_url("mailchimp", &self.base_url)?;
        if self.page_size == 0 {
            return Err(ValidationError::EmptyPage("member"));
        }
        Ok(())
    }

    fn resolve<F>(&self, env: &F) -> Result<mailchimp::Settings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let list_ids = if self.list_ids.is_empty() {
            split_list_ids(&env(&self.list_ids_env).unwrap_or_default())
        } else {
            self.list_ids.clone()
        };
        if list_ids.is_empty() {
            return Err(ConfigError::NoListIds(self.list_ids_env.clone()));
        }

        Ok(mailchimp::Settings {
            base_url: parse_base_url("mailchimp", &self.base_url)?,
            credentials: Credentials::new(&self.username, require(env, &self.api_key_env)?),
            list_ids,
            page_size: self.page_size,
        })
    }
}

fn split_list_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}
