use std::{net::SocketAddr, num::NonZeroUsize, str::FromStr};

use anyhow::Context;

const DEFAULT_LOG_FILTER: &str = "whisper_relay=info,tower_http=info";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Per-conversation message cap. `None` keeps everything.
    pub history_limit: Option<NonZeroUsize>,
    pub log_filter: String,
}

impl Config {
    /// Reads the environment, after loading `.env` if there is one.
    pub fn from_env() -> anyhow::Result<Config> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let history_limit: usize = parse_with("HISTORY_LIMIT", 0, &lookup)?;

        Ok(Config {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: parse_with("PORT", 3000, &lookup)?,
            history_limit: NonZeroUsize::new(history_limit),
            log_filter: lookup("RUST_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_owned()),
        })
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}

fn parse_with<T>(key: &str, default: T, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("{key}={raw:?} is not valid")),
        None => Ok(default),
    }
}
