//! Client configuration.
//!
//! # Design
//! A `ClientConfig` is validated once by its builder and then shared
//! read-only (behind an `Arc`) by every call made through a `Client`. Nothing
//! in it changes per call; per-call settings live in `RequestOptions`.

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::Error;
use crate::retry::RetryPolicy;

/// API version sent with every request unless overridden.
pub const DEFAULT_API_VERSION: &str = "2015-07-06";

/// Per-attempt transport timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_ACCESS_TOKEN: &str = "PAYMENTS_ACCESS_TOKEN";
pub const ENV_ENVIRONMENT: &str = "PAYMENTS_ENVIRONMENT";
pub const ENV_BASE_URL: &str = "PAYMENTS_BASE_URL";
pub const ENV_MAX_ATTEMPTS: &str = "PAYMENTS_MAX_ATTEMPTS";

/// Hosted API environments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Live,
    Sandbox,
}

impl Environment {
    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Live => "https://api.payments.example.com",
            Environment::Sandbox => "https://api-sandbox.payments.example.com",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(Environment::Live),
            "sandbox" => Ok(Environment::Sandbox),
            other => Err(Error::Config(format!("unknown environment `{other}`"))),
        }
    }
}

/// Immutable settings shared by every call of a `Client`.
#[derive(Clone)]
pub struct ClientConfig {
    base_url: Url,
    access_token: String,
    api_version: String,
    user_agent: String,
    default_headers: Vec<(String, String)>,
    retry_policy: RetryPolicy,
    timeout: Duration,
    follow_idempotent_conflicts: bool,
}

impl ClientConfig {
    pub fn builder(access_token: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(access_token)
    }

    /// Build a configuration from `PAYMENTS_*` environment variables.
    ///
    /// # Errors
    ///
    /// `Config` if the access token is missing or a value does not parse.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let token = lookup(ENV_ACCESS_TOKEN)
            .ok_or_else(|| Error::Config(format!("{ENV_ACCESS_TOKEN} is not set")))?;
        let mut builder = Self::builder(token);
        if let Some(environment) = lookup(ENV_ENVIRONMENT) {
            builder = builder.environment(environment.parse()?);
        }
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            builder = builder.base_url(base_url);
        }
        if let Some(attempts) = lookup(ENV_MAX_ATTEMPTS) {
            let attempts = attempts
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{ENV_MAX_ATTEMPTS} must be a positive integer")))?;
            builder = builder.retry_policy(RetryPolicy::with_max_attempts(attempts));
        }
        builder.build()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn default_headers(&self) -> &[(String, String)] {
        &self.default_headers
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn follow_idempotent_conflicts(&self) -> bool {
        self.follow_idempotent_conflicts
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url.as_str())
            .field("access_token", &"<redacted>")
            .field("api_version", &self.api_version)
            .field("user_agent", &self.user_agent)
            .field("default_headers", &self.default_headers)
            .field("retry_policy", &self.retry_policy)
            .field("timeout", &self.timeout)
            .field("follow_idempotent_conflicts", &self.follow_idempotent_conflicts)
            .finish()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    access_token: String,
    environment: Environment,
    base_url: Option<String>,
    api_version: String,
    user_agent: String,
    default_headers: Vec<(String, String)>,
    retry_policy: RetryPolicy,
    timeout: Duration,
    follow_idempotent_conflicts: bool,
}

impl ClientConfigBuilder {
    fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            environment: Environment::default(),
            base_url: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            user_agent: default_user_agent(),
            default_headers: Vec::new(),
            retry_policy: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            follow_idempotent_conflicts: true,
        }
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Explicit endpoint; takes precedence over `environment`.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Header added to every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether `Service::create` resolves idempotency conflicts by fetching
    /// the resource the earlier request created.
    pub fn follow_idempotent_conflicts(mut self, follow: bool) -> Self {
        self.follow_idempotent_conflicts = follow;
        self
    }

    /// # Errors
    ///
    /// `Config` for an empty access token or an invalid base URL.
    pub fn build(self) -> Result<ClientConfig, Error> {
        if self.access_token.trim().is_empty() {
            return Err(Error::Config("access token must not be empty".to_string()));
        }
        let raw = self
            .base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.base_url());
        let base_url = Url::parse(raw).map_err(|err| Error::Config(format!("invalid base url `{raw}`: {err}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::Config(format!("base url `{raw}` must use http or https")));
        }
        Ok(ClientConfig {
            base_url,
            access_token: self.access_token,
            api_version: self.api_version,
            user_agent: self.user_agent,
            default_headers: self.default_headers,
            retry_policy: self.retry_policy,
            timeout: self.timeout,
            follow_idempotent_conflicts: self.follow_idempotent_conflicts,
        })
    }
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}
