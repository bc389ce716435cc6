use std::fs::File;
use std::io::{BufReader, Read};

use crate::{
    BitmapConfig, Brc20Config, Config, LogConfig, Network, PgDatabaseConfig, ReportConfig,
    SnsConfig, StorageConfig, UpstreamConfig, DEFAULT_LRU_CACHE_SIZE, DEFAULT_REPORT_RETRIES,
    DEFAULT_REPORT_URL, DEFAULT_WORKING_DIR,
};

#[derive(Deserialize, Clone, Debug)]
pub struct PgDatabaseConfigToml {
    pub database: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub search_path: Option<String>,
    pub pool_max_size: Option<usize>,
}

impl PgDatabaseConfigToml {
    fn to_config(self) -> PgDatabaseConfig {
        PgDatabaseConfig {
            dbname: self.database,
            host: self.host,
            port: self.port,
            user: self.username,
            password: self.password,
            search_path: self.search_path,
            pool_max_size: self.pool_max_size,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct UpstreamConfigToml {
    pub db: Option<PgDatabaseConfigToml>,
    pub ord_rpc_url: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Brc20ConfigToml {
    pub enabled: bool,
    pub lru_cache_size: Option<usize>,
    pub extra_tables: Option<bool>,
    pub db: PgDatabaseConfigToml,
}

#[derive(Deserialize, Clone, Debug)]
pub struct BitmapConfigToml {
    pub enabled: bool,
    pub db: PgDatabaseConfigToml,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SnsConfigToml {
    pub enabled: bool,
    pub db: PgDatabaseConfigToml,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ReportConfigToml {
    pub enabled: bool,
    pub url: Option<String>,
    pub name: String,
    pub retries: Option<u32>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StorageConfigToml {
    pub working_dir: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct NetworkConfigToml {
    pub network: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LogConfigToml {
    pub indexer_internals: Option<bool>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ConfigToml {
    pub storage: Option<StorageConfigToml>,
    pub network: NetworkConfigToml,
    pub upstream: UpstreamConfigToml,
    pub brc20: Option<Brc20ConfigToml>,
    pub bitmap: Option<BitmapConfigToml>,
    pub sns: Option<SnsConfigToml>,
    pub report: Option<ReportConfigToml>,
    pub logs: Option<LogConfigToml>,
}

impl ConfigToml {
    pub fn config_from_file_path(file_path: &str) -> Result<Config, String> {
        let file = File::open(file_path)
            .map_err(|e| format!("unable to read file {}\n{:?}", file_path, e))?;
        let mut file_reader = BufReader::new(file);
        let mut file_buffer = vec![];
        file_reader
            .read_to_end(&mut file_buffer)
            .map_err(|e| format!("unable to read file {}\n{:?}", file_path, e))?;

        let config_file: ConfigToml = match toml::from_slice(&file_buffer) {
            Ok(s) => s,
            Err(e) => {
                return Err(format!("Config file malformatted {}", e));
            }
        };
        ConfigToml::config_from_toml(config_file)
    }

    fn config_from_toml(toml: ConfigToml) -> Result<Config, String> {
        let network = Network::from_str(&toml.network.network)?;
        let brc20 = match toml.brc20 {
            Some(brc20) => Some(Brc20Config {
                enabled: brc20.enabled,
                lru_cache_size: brc20.lru_cache_size.unwrap_or(DEFAULT_LRU_CACHE_SIZE),
                extra_tables: brc20.extra_tables.unwrap_or(false),
                db: brc20.db.to_config(),
            }),
            None => None,
        };
        let bitmap = match toml.bitmap {
            Some(bitmap) => Some(BitmapConfig {
                enabled: bitmap.enabled,
                db: bitmap.db.to_config(),
            }),
            None => None,
        };
        let sns = match toml.sns {
            Some(sns) => Some(SnsConfig {
                enabled: sns.enabled,
                db: sns.db.to_config(),
            }),
            None => None,
        };
        let report = match toml.report {
            Some(report) => ReportConfig {
                enabled: report.enabled,
                url: report.url.unwrap_or(DEFAULT_REPORT_URL.into()),
                name: report.name,
                retries: report.retries.unwrap_or(DEFAULT_REPORT_RETRIES),
            },
            None => ReportConfig {
                enabled: false,
                url: DEFAULT_REPORT_URL.into(),
                name: String::new(),
                retries: DEFAULT_REPORT_RETRIES,
            },
        };
        let config = Config {
            storage: StorageConfig {
                working_dir: toml
                    .storage
                    .and_then(|s| s.working_dir)
                    .unwrap_or(DEFAULT_WORKING_DIR.into()),
            },
            network,
            upstream: UpstreamConfig {
                db: toml.upstream.db.map(|db| db.to_config()),
                ord_rpc_url: toml.upstream.ord_rpc_url,
            },
            brc20,
            bitmap,
            sns,
            report,
            logs: LogConfig {
                indexer_internals: toml.logs.and_then(|l| l.indexer_internals).unwrap_or(true),
            },
        };
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::ConfigToml;

    #[test]
    fn parses_generated_config() {
        let toml_str = crate::generator::generate_toml_config("regtest");
        let toml: ConfigToml = toml::from_str(&toml_str).unwrap();
        let config = ConfigToml::config_from_toml(toml).unwrap();
        assert_eq!(config.network, crate::Network::Regtest);
        assert!(config.brc20.is_some());
        assert!(config.bitmap.is_some());
        assert!(config.sns.is_some());
        assert!(!config.report_enabled());
    }
}
