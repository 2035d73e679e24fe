/*
 * Responsibility
 * - 環境変数や設定の読み込み (DATABASE_URL, ゲート設定, トークン寿命, envelope 設定)
 * - 設定値のバリデーション (不正なら起動失敗)
 * - 共有 prefix (SETTINGS_PREFIX) 付きのキーを解決する
 */
use std::net::SocketAddr;
use std::str::FromStr;

use axum::http::Method;
use regex::Regex;
use thiserror::Error;

use crate::services::auth::lifetime::{TimeUnit, TokenLifetime};

pub const DEFAULT_ALLOWED_PATHS: &[&str] = &["/accounts/signin/"];
// `^api` only matches paths given without a leading `/`
pub const DEFAULT_PROTECTED_PATTERNS: &[&str] = &[r"^(.*)/api", r"^(.*)/admin/(.*)", r"^api"];
pub const DEFAULT_ENVELOPE_PATTERNS: &[&str] = &[r"^api/(.*)"];
pub const DEFAULT_ENVELOPE_EXCLUDED_PATTERNS: &[&str] =
    &[r"^api/docs", r"^api/openapi\.json", r"^api/docs(.*)"];
pub const DEFAULT_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(raw: Option<&str>) -> Self {
        match raw.unwrap_or("development").to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {key} ({reason})")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl ToString) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Where the gate looks for the token before falling back to the JSON body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenTransport {
    /// `token` cookie first, then the body.
    Cookies,
    /// Body only.
    Body,
}

impl FromStr for TokenTransport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "COOKIES" | "COOKIE" => Ok(Self::Cookies),
            "BODY" | "JSON" => Ok(Self::Body),
            other => Err(format!("expected COOKIES or BODY, got {other}")),
        }
    }
}

/// What a rejected token means for a request that is not allowlisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectedPathPolicy {
    /// Every path outside the allowlist needs a valid token.
    Strict,
    /// Only paths matching a protected pattern need a valid token; the rest
    /// continue as anonymous.
    ProtectedOnly,
    /// Protected patterns are let through without a token and every other
    /// non-allowlisted path is blocked.
    Legacy,
}

impl FromStr for ProtectedPathPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "strict" => Ok(Self::Strict),
            "protected_only" => Ok(Self::ProtectedOnly),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!(
                "expected strict, protected_only or legacy, got {other}"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub enforcement_enabled: bool,
    pub enforce_on_methods: Vec<Method>,
    /// Exact path matches that never need a token.
    pub allowed_paths: Vec<String>,
    pub protected_path_patterns: Vec<Regex>,
    pub protected_path_policy: ProtectedPathPolicy,
    pub integrate_with_identity_layer: bool,
    pub token_transport: TokenTransport,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enforcement_enabled: true,
            enforce_on_methods: default_methods(),
            allowed_paths: DEFAULT_ALLOWED_PATHS.iter().map(|s| s.to_string()).collect(),
            protected_path_patterns: default_patterns(DEFAULT_PROTECTED_PATTERNS),
            protected_path_policy: ProtectedPathPolicy::Strict,
            integrate_with_identity_layer: true,
            token_transport: TokenTransport::Cookies,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnvelopeConfig {
    pub enabled: bool,
    /// Matched against the request path with its leading `/` removed.
    pub api_patterns: Vec<Regex>,
    pub excluded_patterns: Vec<Regex>,
    pub methods: Vec<Method>,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_patterns: default_patterns(DEFAULT_ENVELOPE_PATTERNS),
            excluded_patterns: default_patterns(DEFAULT_ENVELOPE_EXCLUDED_PATTERNS),
            methods: default_methods(),
        }
    }
}

fn default_methods() -> Vec<Method> {
    vec![
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
    ]
}

fn default_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("built-in pattern must compile"))
        .collect()
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,

    // None -> in-memory token store
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    pub settings_prefix: String,
    pub token_lifetime: TokenLifetime,
    pub gate: GateConfig,
    pub envelope: EnvelopeConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port: u16 = lookup("PORT")
            .map(|s| s.parse::<u16>().map_err(|e| ConfigError::invalid("PORT", e)))
            .transpose()?
            .unwrap_or(3000);

        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|e| ConfigError::invalid("PORT", e))?;

        let app_env = AppEnv::parse(lookup("APP_ENV").as_deref());

        // The in-memory store loses every token on restart; production must
        // point at a database.
        let database_url = lookup("DATABASE_URL").filter(|s| !s.trim().is_empty());
        if database_url.is_none() && app_env.is_production() {
            return Err(ConfigError::Missing("DATABASE_URL".to_string()));
        }

        let database_max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .map(|s| {
                s.parse::<u32>()
                    .map_err(|e| ConfigError::invalid("DATABASE_MAX_CONNECTIONS", e))
            })
            .transpose()?
            .unwrap_or(10);

        let settings_prefix = lookup("SETTINGS_PREFIX").unwrap_or_default();
        let settings = Settings::new(&settings_prefix, &lookup);

        let token_lifetime = TokenLifetime::bounded(
            settings.parse("TOKEN_TTL", 1u32)?,
            settings.parse("TOKEN_TTL_UNIT", TimeUnit::Hours)?,
        )
        .map_err(|e| ConfigError::invalid(&settings.key("TOKEN_TTL"), e))?;

        let gate = GateConfig {
            enforcement_enabled: settings.flag("ENFORCEMENT_ENABLED", true)?,
            enforce_on_methods: settings.methods("ENFORCED_METHODS")?,
            allowed_paths: settings.list("ALLOWED_PATHS", DEFAULT_ALLOWED_PATHS),
            protected_path_patterns: settings
                .patterns("PROTECTED_PATHS", DEFAULT_PROTECTED_PATTERNS)?,
            protected_path_policy: settings
                .parse("PROTECTED_PATH_POLICY", ProtectedPathPolicy::Strict)?,
            integrate_with_identity_layer: settings.flag("BIND_IDENTITY", true)?,
            token_transport: settings.parse("TOKEN_TRANSPORT", TokenTransport::Cookies)?,
        };

        let envelope = EnvelopeConfig {
            enabled: settings.flag("ENVELOPE_ENABLED", true)?,
            api_patterns: settings.patterns("ENVELOPE_PATHS", DEFAULT_ENVELOPE_PATTERNS)?,
            excluded_patterns: settings.patterns(
                "ENVELOPE_EXCLUDED_PATHS",
                DEFAULT_ENVELOPE_EXCLUDED_PATTERNS,
            )?,
            methods: settings.methods("ENVELOPE_METHODS")?,
        };

        Ok(Self {
            addr,
            app_env,
            database_url,
            database_max_connections,
            settings_prefix,
            token_lifetime,
            gate,
            envelope,
        })
    }
}

/// Prefixed view over a key/value source: `PREFIX_NAME`, or `NAME` when the
/// prefix is empty.
struct Settings<'a, F> {
    prefix: String,
    lookup: &'a F,
}

impl<'a, F> Settings<'a, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn new(prefix: &str, lookup: &'a F) -> Self {
        let prefix = match prefix.trim() {
            "" => String::new(),
            p => format!("{p}_"),
        };
        Self { prefix, lookup }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn raw(&self, name: &str) -> Option<(String, String)> {
        let key = self.key(name);
        (self.lookup)(&key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(|v| (key, v))
    }

    fn parse<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: ToString,
    {
        match self.raw(name) {
            Some((key, v)) => v.parse().map_err(|e| ConfigError::invalid(&key, e)),
            None => Ok(default),
        }
    }

    fn flag(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        match self.raw(name) {
            Some((key, v)) => match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::invalid(&key, "expected a boolean")),
            },
            None => Ok(default),
        }
    }

    // comma-separated
    fn list(&self, name: &str, default: &[&str]) -> Vec<String> {
        match self.raw(name) {
            Some((_, v)) => v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => default.iter().map(|s| s.to_string()).collect(),
        }
    }

    // whitespace-separated, so patterns may contain commas
    fn patterns(&self, name: &str, default: &[&str]) -> Result<Vec<Regex>, ConfigError> {
        let key = self.key(name);
        let sources: Vec<String> = match self.raw(name) {
            Some((_, v)) => v.split_whitespace().map(str::to_string).collect(),
            None => default.iter().map(|s| s.to_string()).collect(),
        };

        sources
            .iter()
            .map(|p| Regex::new(p).map_err(|e| ConfigError::invalid(&key, e)))
            .collect()
    }

    fn methods(&self, name: &str) -> Result<Vec<Method>, ConfigError> {
        let key = self.key(name);
        self.list(name, DEFAULT_METHODS)
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|e| ConfigError::invalid(&key, e))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |k| map.get(k).cloned())
    }

    #[test]
    fn defaults_without_any_settings() {
        let config = from_pairs(&[]).unwrap();

        assert_eq!(config.addr.port(), 3000);
        assert_eq!(config.app_env, AppEnv::Development);
        assert!(config.database_url.is_none());
        assert_eq!(config.token_lifetime, TokenLifetime::default());

        let gate = &config.gate;
        assert!(gate.enforcement_enabled);
        assert!(gate.integrate_with_identity_layer);
        assert_eq!(gate.allowed_paths, vec!["/accounts/signin/".to_string()]);
        assert_eq!(gate.enforce_on_methods.len(), 5);
        assert_eq!(gate.token_transport, TokenTransport::Cookies);
        assert_eq!(gate.protected_path_policy, ProtectedPathPolicy::Strict);
        assert!(gate.protected_path_patterns[0].is_match("/api/v1/me"));
        assert_eq!(gate.protected_path_patterns.len(), 3);
        assert!(gate.protected_path_patterns[2].is_match("api/v1/me"));
        assert!(!gate.protected_path_patterns[2].is_match("/api/v1/me"));

        assert!(config.envelope.enabled);
        assert!(config.envelope.excluded_patterns[1].is_match("api/openapi.json"));
    }

    #[test]
    fn prefixed_keys_are_used() {
        let config = from_pairs(&[
            ("SETTINGS_PREFIX", "SHOP"),
            ("SHOP_TOKEN_TTL", "15"),
            ("SHOP_TOKEN_TTL_UNIT", "minutes"),
            ("SHOP_ALLOWED_PATHS", "/login/, /public/"),
            ("SHOP_ENFORCED_METHODS", "post,delete"),
            ("SHOP_TOKEN_TRANSPORT", "body"),
            ("SHOP_BIND_IDENTITY", "off"),
            ("SHOP_PROTECTED_PATH_POLICY", "protected-only"),
            // unprefixed key is ignored once a prefix is set
            ("TOKEN_TTL", "99"),
        ])
        .unwrap();

        assert_eq!(config.token_lifetime, TokenLifetime::new(15, TimeUnit::Minutes));
        assert_eq!(config.gate.allowed_paths, vec!["/login/", "/public/"]);
        assert_eq!(config.gate.enforce_on_methods, vec![Method::POST, Method::DELETE]);
        assert_eq!(config.gate.token_transport, TokenTransport::Body);
        assert!(!config.gate.integrate_with_identity_layer);
        assert_eq!(
            config.gate.protected_path_policy,
            ProtectedPathPolicy::ProtectedOnly
        );
    }

    #[test]
    fn production_requires_a_database() {
        assert_eq!(
            from_pairs(&[("APP_ENV", "production")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL".to_string())
        );

        let config = from_pairs(&[("APP_ENV", "prod"), ("DATABASE_URL", "postgres://db/app")])
            .unwrap();
        assert!(config.app_env.is_production());
    }

    #[test]
    fn patterns_are_whitespace_separated() {
        let config = from_pairs(&[("PROTECTED_PATHS", r"^/a{1,2}/ ^/admin")]).unwrap();
        let patterns = &config.gate.protected_path_patterns;

        assert_eq!(patterns.len(), 2);
        assert!(patterns[0].is_match("/aa/"));
        assert!(patterns[1].is_match("/admin/users"));
    }

    #[test]
    fn invalid_values_name_the_prefixed_key() {
        let err = from_pairs(&[("SETTINGS_PREFIX", "X"), ("X_TOKEN_TTL_UNIT", "weeks")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "X_TOKEN_TTL_UNIT"));

        let err = from_pairs(&[("ENFORCEMENT_ENABLED", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "ENFORCEMENT_ENABLED"));

        assert!(from_pairs(&[("PROTECTED_PATHS", "(unclosed")]).is_err());
        assert!(from_pairs(&[("TOKEN_TTL", "-1")]).is_err());
        assert!(from_pairs(&[("TOKEN_TRANSPORT", "HEADER")]).is_err());
    }

    #[test]
    fn token_lifetime_past_ten_years_is_rejected() {
        let err = from_pairs(&[("TOKEN_TTL", "100000000"), ("TOKEN_TTL_UNIT", "days")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "TOKEN_TTL"));

        let err = from_pairs(&[
            ("SETTINGS_PREFIX", "X"),
            ("X_TOKEN_TTL", "87601"),
            ("X_TOKEN_TTL_UNIT", "hours"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "X_TOKEN_TTL"));

        let config = from_pairs(&[("TOKEN_TTL", "3650"), ("TOKEN_TTL_UNIT", "days")]).unwrap();
        assert_eq!(config.token_lifetime, TokenLifetime::new(3650, TimeUnit::Days));
    }
}
