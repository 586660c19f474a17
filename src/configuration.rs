use actix_web::cookie::SameSite;
use config::ConfigError;

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub cookie: CookieSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_cors_origin")]
    pub cors_allowed_origin: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cors_origin() -> String {
    "http://localhost:5173".to_string()
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default)]
    pub require_ssl: bool,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    25
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "{}/{}{}",
            self.connection_string_without_db(),
            self.database_name,
            self.ssl_suffix()
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }

    fn ssl_suffix(&self) -> &'static str {
        if self.require_ssl {
            "?sslmode=require"
        } else {
            ""
        }
    }
}

/// Token signing and lifetime settings
#[derive(serde::Deserialize, Clone, Debug)]
pub struct JwtSettings {
    pub secret: String,
    pub access_token_expiry: i64,   // seconds (e.g., 3600 for 1 hour)
    pub refresh_token_expiry: i64,  // seconds (e.g., 604800 for 7 days)
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

/// Refresh cookie policy
#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CookieSettings {
    pub name: String,
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: String,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            name: "todo_refresh_token".to_string(),
            domain: None,
            path: "/api/auth".to_string(),
            secure: false,
            http_only: true,
            same_site: "lax".to_string(),
        }
    }
}

impl CookieSettings {
    /// Unknown values fall back to `Lax`.
    pub fn same_site_policy(&self) -> SameSite {
        match self.same_site.trim().to_lowercase().as_str() {
            "none" => SameSite::None,
            "strict" => SameSite::Strict,
            _ => SameSite::Lax,
        }
    }
}

/// Loads `configuration.yaml` (if present) and overlays `APP_*` environment
/// variables, e.g. `APP_JWT__SECRET` or `APP_APPLICATION__PORT`.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;
    settings.try_deserialize::<Settings>()
}
