use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct AccessConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub store: StoreBackend,
    pub database: DatabaseConfig,
    pub identity_provider: IdentityProviderConfig,
    pub session: SessionConfig,
    pub authorization: AuthorizationConfig,
    pub security: SecurityConfig,
    pub swagger: SwaggerConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

/// Which store implementation backs the service.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    Http,
    Mock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityProviderConfig {
    pub mode: ProviderMode,
    pub url: String,
    pub anon_key: String,
    pub service_key: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub ttl_hours: i64,
    pub cookie_name: String,
    pub cookie_secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationConfig {
    /// Name of the preset administrative role seeded at startup.
    pub admin_role_name: String,
    /// Existing principal granted the administrative role at startup.
    pub bootstrap_admin_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SwaggerMode {
    Public,
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub signup_attempts: u32,
    pub signup_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

impl AccessConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let store: StoreBackend = get_env("STORE_BACKEND", Some("postgres"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let provider_mode: ProviderMode = get_env("IDENTITY_PROVIDER_MODE", Some("http"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let config = AccessConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("access-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            store,
            database: DatabaseConfig {
                url: get_env(
                    "DATABASE_URL",
                    (store == StoreBackend::Memory).then_some(""),
                    is_prod && store == StoreBackend::Postgres,
                )?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            identity_provider: IdentityProviderConfig {
                url: get_env(
                    "IDENTITY_PROVIDER_URL",
                    (provider_mode == ProviderMode::Mock).then_some(""),
                    is_prod,
                )?,
                anon_key: get_env(
                    "IDENTITY_PROVIDER_ANON_KEY",
                    (provider_mode == ProviderMode::Mock).then_some(""),
                    is_prod,
                )?,
                service_key: get_env(
                    "IDENTITY_PROVIDER_SERVICE_KEY",
                    (provider_mode == ProviderMode::Mock).then_some(""),
                    is_prod,
                )?,
                timeout_seconds: parse_env("IDENTITY_PROVIDER_TIMEOUT_SECONDS", "10", is_prod)?,
                mode: provider_mode,
            },
            session: SessionConfig {
                ttl_hours: parse_env("SESSION_TTL_HOURS", "24", is_prod)?,
                cookie_name: get_env("SESSION_COOKIE_NAME", Some("session_id"), is_prod)?,
                cookie_secure: parse_env("SESSION_COOKIE_SECURE", "false", is_prod)?,
            },
            authorization: AuthorizationConfig {
                admin_role_name: get_env("ADMIN_ROLE_NAME", Some("admin"), is_prod)?,
                bootstrap_admin_email: env::var("BOOTSTRAP_ADMIN_EMAIL")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            swagger: SwaggerConfig {
                enabled: get_env("ENABLE_SWAGGER", Some("public"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: parse_env("RATE_LIMIT_LOGIN_ATTEMPTS", "5", is_prod)?,
                login_window_seconds: parse_env("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900", is_prod)?,
                signup_attempts: parse_env("RATE_LIMIT_SIGNUP_ATTEMPTS", "3", is_prod)?,
                signup_window_seconds: parse_env("RATE_LIMIT_SIGNUP_WINDOW_SECONDS", "3600", is_prod)?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "100", is_prod)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    "60",
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.session.ttl_hours <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_TTL_HOURS must be positive"
            )));
        }

        if self.authorization.admin_role_name.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ADMIN_ROLE_NAME must not be empty"
            )));
        }

        if self.store == StoreBackend::Postgres && self.database.url.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_URL is required for the postgres store"
            )));
        }

        if self.identity_provider.mode == ProviderMode::Http && self.identity_provider.url.is_empty()
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "IDENTITY_PROVIDER_URL is required for the http provider"
            )));
        }

        // In production, ensure stricter validation
        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if !self.session.cookie_secure {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "SESSION_COOKIE_SECURE must be true in production"
                )));
            }

            if self.store == StoreBackend::Memory || self.identity_provider.mode == ProviderMode::Mock
            {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "In-memory store and mock identity provider are not allowed in production"
                )));
            }

            if self.swagger.enabled == SwaggerMode::Public {
                tracing::warn!("Swagger is publicly accessible in production");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

impl std::str::FromStr for ProviderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(ProviderMode::Http),
            "mock" => Ok(ProviderMode::Mock),
            _ => Err(format!("Invalid identity provider mode: {}", s)),
        }
    }
}

impl std::str::FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}
