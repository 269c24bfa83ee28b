use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Upper bound on waiting for a unit's rotation lock.
    pub lock_timeout_ms: u64,
    pub db_max_connections: u32,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst: u32,
    pub request_body_limit_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            url_preview(&config.database_url)
        );
        tracing::debug!("Server Port: {}", config.port);
        tracing::debug!("Rotation lock timeout: {}ms", config.lock_timeout_ms);

        Ok(config)
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DB_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .ok_or_else(|| anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required"))
            .and_then(|url| {
                if url.trim().is_empty() {
                    anyhow::bail!("DB_URL cannot be empty");
                }
                if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                    anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                }
                Ok(url)
            })?;

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?;

        let lock_timeout_ms: u64 = lookup("ROLETA_LOCK_TIMEOUT_MS")
            .unwrap_or_else(|| "5000".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("ROLETA_LOCK_TIMEOUT_MS must be a number of milliseconds"))?;
        if !(1..=60_000).contains(&lock_timeout_ms) {
            anyhow::bail!("ROLETA_LOCK_TIMEOUT_MS must be between 1 and 60000");
        }

        let db_max_connections: u32 = lookup("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a positive number"))?;
        if db_max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be at least 1");
        }

        let rate_limit_per_second: u64 = lookup("RATE_LIMIT_PER_SECOND")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("RATE_LIMIT_PER_SECOND must be a positive number"))?;

        let rate_limit_burst: u32 = lookup("RATE_LIMIT_BURST")
            .unwrap_or_else(|| "20".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("RATE_LIMIT_BURST must be a positive number"))?;

        if rate_limit_per_second == 0 || rate_limit_burst == 0 {
            anyhow::bail!("Rate limit settings must be greater than zero");
        }

        let request_body_limit_bytes = lookup("REQUEST_BODY_LIMIT_BYTES")
            .unwrap_or_else(|| (1024 * 1024).to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("REQUEST_BODY_LIMIT_BYTES must be a number of bytes"))?;

        Ok(Self {
            database_url,
            port,
            lock_timeout_ms,
            db_max_connections,
            rate_limit_per_second,
            rate_limit_burst,
            request_body_limit_bytes,
        })
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// First characters of a connection string, safe to log.
fn url_preview(url: &str) -> String {
    url.chars().take(20).collect()
}
