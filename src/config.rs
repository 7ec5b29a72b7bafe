use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

const DEFAULT_DATA_DIR: &str = "./gridcheck_data";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Runtime configuration, resolved from the environment (a `.env` file
/// is honored when present).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_url: String,
    pub data_dir: PathBuf,
    pub request_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let server_url = std::env::var("GRIDCHECK_SERVER_URL")
            .map_err(|_| anyhow!("GRIDCHECK_SERVER_URL environment variable is required"))?;

        let data_dir = std::env::var("GRIDCHECK_DATA_DIR")
            .unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string());

        let request_timeout_secs = match std::env::var("GRIDCHECK_HTTP_TIMEOUT_SECS") {
            Ok(raw) => raw.parse::<u64>().map_err(|_| {
                anyhow!("GRIDCHECK_HTTP_TIMEOUT_SECS must be a number of seconds, got {:?}", raw)
            })?,
            Err(_) => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            server_url,
            data_dir: PathBuf::from(data_dir),
            request_timeout_secs,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("gridcheck.db")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
