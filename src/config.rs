use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use log::{info, warn};

use crate::api::caiso::{_api_caiso_core::MarketRun, system_demand::OasisQuery};
use crate::error::InputError;
use crate::interval::date_range::chunk_span;
use crate::utils::lib_retry::RetryPolicy;

/// Longest accepted `rate_limit_delay`, in seconds.
pub const MAX_RATE_LIMIT_DELAY: f64 = 3600.0;

/// Settings for downloading the OASIS system demand forecast.
///
/// Read from a `key=value` file, for example
/// ```text
/// market_run_id=DA
/// output_directory=/tmp/caiso/downloads
/// max_days_per_chunk=30
/// ```
/// Keys that are not set keep their default value.
#[derive(Clone, Debug, PartialEq)]
pub struct CaisoOasisConfig {
    /// In any format [`crate::interval::date_range::parse_timestamp`] accepts
    pub default_start_date: String,
    pub default_end_date: String,
    pub query: OasisQuery,
    pub market_run: MarketRun,
    pub output_directory: String,
    pub data_directory: String,
    /// With `{market_run}`, `{start_date}` and `{end_date}` placeholders
    pub output_filename_format: String,
    pub csv_filename_format: String,
    pub extract_and_parse: bool,
    pub max_days_per_chunk: i64,
    /// Seconds
    pub rate_limit_delay: f64,
    pub max_retries: u32,
    pub exponential_backoff: bool,
}

impl Default for CaisoOasisConfig {
    fn default() -> Self {
        CaisoOasisConfig {
            default_start_date: "20130919T07:00-0000".to_string(),
            default_end_date: "20130920T07:00-0000".to_string(),
            query: OasisQuery::default(),
            market_run: MarketRun::TwoDa,
            output_directory: "./downloads".to_string(),
            data_directory: "./data".to_string(),
            output_filename_format: "system_demand_{market_run}_{start_date}_{end_date}.zip"
                .to_string(),
            csv_filename_format: "system_demand_{market_run}_{start_date}_{end_date}.csv"
                .to_string(),
            extract_and_parse: true,
            max_days_per_chunk: 30,
            rate_limit_delay: 5.0,
            max_retries: 3,
            exponential_backoff: true,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, InputError> {
    value.trim().parse::<T>().map_err(|_| InputError::Config {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, InputError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(InputError::Config {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

impl CaisoOasisConfig {
    /// Load the config file.  If the file doesn't exist, use the defaults.
    pub fn load(path: &Path) -> Result<CaisoOasisConfig, Box<dyn std::error::Error>> {
        if !path.exists() {
            warn!(
                "Config file {} not found. Using default values.",
                path.display()
            );
            return Ok(CaisoOasisConfig::default());
        }
        let mut pairs: Vec<(String, String)> = Vec::new();
        for item in dotenvy::from_path_iter(path)? {
            pairs.push(item?);
        }
        let config = CaisoOasisConfig::from_pairs(pairs)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Apply the recognized `key=value` pairs on top of the defaults.
    /// Unknown keys are ignored with a warning.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<CaisoOasisConfig, InputError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = CaisoOasisConfig::default();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref().trim(), value.as_ref());
            match key.to_lowercase().as_str() {
                "default_start_date" => config.default_start_date = value.to_string(),
                "default_end_date" => config.default_end_date = value.to_string(),
                "base_url" => config.query.base_url = value.to_string(),
                "query_name" => config.query.query_name = value.to_string(),
                "market_run_id" => config.market_run = value.parse()?,
                "version" => config.query.version = value.to_string(),
                "output_directory" => config.output_directory = value.to_string(),
                "data_directory" => config.data_directory = value.to_string(),
                "output_filename_format" => config.output_filename_format = value.to_string(),
                "csv_filename_format" => config.csv_filename_format = value.to_string(),
                "extract_and_parse" => config.extract_and_parse = parse_bool(key, value)?,
                "max_days_per_chunk" => config.max_days_per_chunk = parse_value(key, value)?,
                "rate_limit_delay" => {
                    let delay: f64 = parse_value(key, value)?;
                    if !(0.0..=MAX_RATE_LIMIT_DELAY).contains(&delay) {
                        return Err(InputError::Config {
                            key: key.to_string(),
                            value: value.to_string(),
                        });
                    }
                    config.rate_limit_delay = delay;
                }
                "max_retries" => config.max_retries = parse_value(key, value)?,
                "exponential_backoff" => config.exponential_backoff = parse_bool(key, value)?,
                _ => warn!("Ignoring unknown config key {}", key),
            }
        }
        chunk_span(config.max_days_per_chunk)?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::try_from_secs_f64(self.rate_limit_delay.min(MAX_RATE_LIMIT_DELAY))
                .unwrap_or(Duration::ZERO),
            self.exponential_backoff,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fs;

    #[test]
    fn defaults_when_file_missing() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let config = CaisoOasisConfig::load(&dir.path().join("nope.env"))?;
        assert_eq!(config, CaisoOasisConfig::default());
        assert_eq!(config.query.query_name, "SLD_FCST");
        assert_eq!(config.retry_policy().max_attempts(), 4);
        Ok(())
    }

    #[test]
    fn load_file() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.env");
        fs::write(
            &path,
            "# CAISO OASIS\n\
             market_run_id=7DA\n\
             base_url=https://oasis.caiso.com/oasisapi/SingleZip\n\
             output_directory=/tmp/caiso/zip\n\
             extract_and_parse=false\n\
             max_days_per_chunk=7\n\
             rate_limit_delay=0.5\n\
             max_retries=1\n",
        )?;
        let config = CaisoOasisConfig::load(&path)?;
        assert_eq!(config.market_run, MarketRun::SevenDa);
        assert_eq!(
            config.query.base_url,
            "https://oasis.caiso.com/oasisapi/SingleZip"
        );
        assert_eq!(config.output_directory, "/tmp/caiso/zip");
        assert!(!config.extract_and_parse);
        assert_eq!(config.max_days_per_chunk, 7);
        assert_eq!(config.retry_policy().base_delay, Duration::from_millis(500));
        assert_eq!(config.retry_policy().max_attempts(), 2);
        assert_eq!(config.data_directory, "./data");
        Ok(())
    }

    #[test]
    fn largest_values_accepted() -> Result<(), Box<dyn Error>> {
        let config = CaisoOasisConfig::from_pairs([
            ("max_days_per_chunk", "36500"),
            ("rate_limit_delay", "3600"),
            ("max_retries", "4294967295"),
        ])?;
        let policy = config.retry_policy();
        assert_eq!(policy.base_delay, Duration::from_secs(3600));
        assert_eq!(policy.max_attempts(), u32::MAX);
        assert!(policy.delay(u32::MAX) >= policy.backoff(1));
        let range = crate::interval::date_range::DateRange::parse("2020-01-01", "2024-01-01")?;
        assert_eq!(range.chunks(config.max_days_per_chunk)?.len(), 1);
        Ok(())
    }

    #[test]
    fn bad_values() {
        assert!(CaisoOasisConfig::from_pairs([("max_retries", "three")]).is_err());
        assert!(CaisoOasisConfig::from_pairs([("extract_and_parse", "maybe")]).is_err());
        assert!(CaisoOasisConfig::from_pairs([("rate_limit_delay", "-1")]).is_err());
        assert!(CaisoOasisConfig::from_pairs([("rate_limit_delay", "NaN")]).is_err());
        assert!(CaisoOasisConfig::from_pairs([("rate_limit_delay", "inf")]).is_err());
        assert_eq!(
            CaisoOasisConfig::from_pairs([("rate_limit_delay", "1e30")]),
            Err(InputError::Config {
                key: "rate_limit_delay".to_string(),
                value: "1e30".to_string()
            })
        );
        assert_eq!(
            CaisoOasisConfig::from_pairs([("max_days_per_chunk", "0")]),
            Err(InputError::ChunkSpan(0))
        );
        assert_eq!(
            CaisoOasisConfig::from_pairs([("max_days_per_chunk", "1000000000000000")]),
            Err(InputError::ChunkSpan(1_000_000_000_000_000))
        );
        assert_eq!(
            CaisoOasisConfig::from_pairs([("market_run_id", "RTM")]),
            Err(InputError::MarketRun("RTM".to_string()))
        );
    }
}
