// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Individual modules (DB pool, etc.) may still read their own
// env vars — this module covers the core server settings.

use std::net::SocketAddr;

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// JWT signing secret for registrant access tokens.
    pub jwt_secret: String,
    /// Base URL for WebSocket connections (e.g. `ws://localhost:8080`).
    pub ws_base_url: String,
    /// PostgreSQL connection string. When unset, in-memory stores are used.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `greenroom_server=debug`).
    pub log_filter: String,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `GREENROOM_SERVER_HOST` | `0.0.0.0` |
    /// | `GREENROOM_SERVER_PORT` | `8080` |
    /// | `GREENROOM_SERVER_JWT_SECRET` | dev-only placeholder |
    /// | `GREENROOM_SERVER_WS_BASE_URL` | `ws://{host}:{port}` |
    /// | `GREENROOM_SERVER_DATABASE_URL` | *(none — in-memory stores)* |
    /// | `GREENROOM_SERVER_CORS_ORIGINS` | *(none)* |
    /// | `GREENROOM_SERVER_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("GREENROOM_SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("GREENROOM_SERVER_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("GREENROOM_SERVER_JWT_SECRET").unwrap_or_else(|_| {
            "greenroom_local_development_jwt_secret_must_be_32_chars".into()
        });

        let ws_base_url =
            env("GREENROOM_SERVER_WS_BASE_URL").unwrap_or_else(|_| format!("ws://{listen_addr}"));

        let database_url = env("GREENROOM_SERVER_DATABASE_URL").ok();
        let cors_origins = env("GREENROOM_SERVER_CORS_ORIGINS").ok();

        let log_filter = env("GREENROOM_SERVER_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self { listen_addr, jwt_secret, ws_base_url, database_url, cors_origins, log_filter }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == "greenroom_local_development_jwt_secret_must_be_32_chars"
    }
}
