#[macro_use]
extern crate serde_derive;

pub mod generator;
pub mod toml;

use std::path::PathBuf;

pub const DEFAULT_WORKING_DIR: &str = "data";
pub const DEFAULT_LRU_CACHE_SIZE: usize = 50_000;
pub const DEFAULT_REPORT_URL: &str = "https://api.opi.network/report_block";
pub const DEFAULT_REPORT_RETRIES: u32 = 10;

#[derive(Clone, Debug)]
pub struct Config {
    pub storage: StorageConfig,
    pub network: Network,
    pub upstream: UpstreamConfig,
    pub brc20: Option<Brc20Config>,
    pub bitmap: Option<BitmapConfig>,
    pub sns: Option<SnsConfig>,
    pub report: ReportConfig,
    pub logs: LogConfig,
}

/// Bitcoin network the upstream inscription indexer is tracking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Testnet4,
    Signet,
    Regtest,
}

impl Network {
    pub fn from_str(value: &str) -> Result<Network, String> {
        match value {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            "testnet4" => Ok(Network::Testnet4),
            "signet" => Ok(Network::Signet),
            "regtest" => Ok(Network::Regtest),
            _ => Err(format!("network type not supported: {value}")),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Testnet4 => "testnet4",
            Network::Signet => "signet",
            Network::Regtest => "regtest",
        }
    }
}

/// Read-only connection to the upstream metaprotocol database, plus the
/// optional ord JSON-RPC endpoint used by the bitmap indexer when no direct
/// database access is available.
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub db: Option<PgDatabaseConfig>,
    pub ord_rpc_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Brc20Config {
    pub enabled: bool,
    pub lru_cache_size: usize,
    pub extra_tables: bool,
    pub db: PgDatabaseConfig,
}

#[derive(Clone, Debug)]
pub struct BitmapConfig {
    pub enabled: bool,
    pub db: PgDatabaseConfig,
}

#[derive(Clone, Debug)]
pub struct SnsConfig {
    pub enabled: bool,
    pub db: PgDatabaseConfig,
}

/// A Postgres configuration for a single database.
#[derive(Clone, Debug)]
pub struct PgDatabaseConfig {
    pub dbname: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub search_path: Option<String>,
    pub pool_max_size: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct ReportConfig {
    pub enabled: bool,
    pub url: String,
    pub name: String,
    pub retries: u32,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub working_dir: String,
}

#[derive(Clone, Debug)]
pub struct LogConfig {
    pub indexer_internals: bool,
}

impl Config {
    pub fn from_file_path(file_path: &str) -> Result<Config, String> {
        toml::ConfigToml::config_from_file_path(file_path)
    }

    pub fn expected_cache_path(&self) -> PathBuf {
        let mut destination_path = PathBuf::new();
        destination_path.push(&self.storage.working_dir);
        destination_path
    }

    /// Reporting is force-disabled on regtest regardless of configuration.
    pub fn report_enabled(&self) -> bool {
        self.report.enabled && self.network != Network::Regtest
    }

    pub fn assert_brc20_config(&self) -> Result<&Brc20Config, String> {
        match &self.brc20 {
            Some(brc20) if brc20.enabled => Ok(brc20),
            _ => Err("Config entry for brc20 is missing or disabled".to_string()),
        }
    }

    pub fn assert_bitmap_config(&self) -> Result<&BitmapConfig, String> {
        match &self.bitmap {
            Some(bitmap) if bitmap.enabled => Ok(bitmap),
            _ => Err("Config entry for bitmap is missing or disabled".to_string()),
        }
    }

    pub fn assert_sns_config(&self) -> Result<&SnsConfig, String> {
        match &self.sns {
            Some(sns) if sns.enabled => Ok(sns),
            _ => Err("Config entry for sns is missing or disabled".to_string()),
        }
    }

    pub fn assert_upstream_db_config(&self) -> Result<&PgDatabaseConfig, String> {
        self.upstream
            .db
            .as_ref()
            .ok_or("Config entry for the upstream metaprotocol db is missing".to_string())
    }

    #[cfg(feature = "test-defaults")]
    pub fn test_default() -> Config {
        Config {
            storage: StorageConfig {
                working_dir: "tmp".to_string(),
            },
            network: Network::Regtest,
            upstream: UpstreamConfig {
                db: Some(test_pg_config("metaprotocol")),
                ord_rpc_url: None,
            },
            brc20: Some(Brc20Config {
                enabled: true,
                lru_cache_size: DEFAULT_LRU_CACHE_SIZE,
                extra_tables: true,
                db: test_pg_config("brc20"),
            }),
            bitmap: Some(BitmapConfig {
                enabled: true,
                db: test_pg_config("bitmap"),
            }),
            sns: Some(SnsConfig {
                enabled: true,
                db: test_pg_config("sns"),
            }),
            report: ReportConfig {
                enabled: false,
                url: DEFAULT_REPORT_URL.to_string(),
                name: "test_indexer".to_string(),
                retries: 1,
            },
            logs: LogConfig {
                indexer_internals: true,
            },
        }
    }
}

#[cfg(feature = "test-defaults")]
fn test_pg_config(dbname: &str) -> PgDatabaseConfig {
    PgDatabaseConfig {
        dbname: dbname.to_string(),
        host: "localhost".to_string(),
        port: 5432,
        user: "postgres".to_string(),
        password: Some("postgres".to_string()),
        search_path: None,
        pool_max_size: None,
    }
}
