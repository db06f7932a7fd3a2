use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    /// JSON snapshot served by the built-in in-memory mailbox.
    Snapshot { path: PathBuf, writable: bool },
    /// Any other transport; opened by an externally supplied connector.
    External { kind: String, options: toml::Table },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountConfig {
    pub name: String,
    pub address: Option<String>,
    pub backend: BackendConfig,
}

#[derive(Debug)]
pub struct Config {
    pub accounts: Vec<AccountConfig>,
    pub run: RunConfig,
    pub log: LogConfig,
}

#[derive(Debug)]
pub struct RunConfig {
    pub dry_run: bool,
    pub page_size: usize,
    pub filters_file: Option<PathBuf>,
}

#[derive(Debug)]
pub struct LogConfig {
    pub level: String,
    pub stderr: bool,
    /// `None` disables the file sink.
    pub file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    run: RawRunConfig,
    #[serde(default)]
    log: RawLogConfig,
    #[serde(default)]
    account: BTreeMap<String, RawAccountFields>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRunConfig {
    #[serde(default)]
    dry_run: bool,
    #[serde(default = "default_page_size")]
    page_size: usize,
    #[serde(default)]
    filters_file: Option<String>,
}

impl Default for RawRunConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            page_size: default_page_size(),
            filters_file: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLogConfig {
    #[serde(default = "default_log_level")]
    level: String,
    #[serde(default = "default_true")]
    stderr: bool,
    #[serde(default)]
    file: Option<String>,
}

impl Default for RawLogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stderr: default_true(),
            file: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawAccountFields {
    #[serde(default = "default_kind")]
    kind: String,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default = "default_true")]
    writable: bool,
    #[serde(flatten)]
    options: toml::Table,
}

fn default_page_size() -> usize {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_kind() -> String {
    "snapshot".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&contents, base_dir)
    }

    /// Parse config text; relative paths resolve against `base_dir`.
    pub fn parse(contents: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        if raw.run.page_size == 0 {
            return Err(ConfigError::Parse(
                "page_size must be greater than 0 in [run]".to_string(),
            ));
        }

        raw.log.level.parse::<LevelFilter>().map_err(|e| {
            ConfigError::Parse(format!("invalid level '{}' in [log]: {}", raw.log.level, e))
        })?;

        let mut accounts = Vec::new();
        for (name, account) in raw.account {
            let backend = match account.kind.as_str() {
                "snapshot" => {
                    if let Some(key) = account.options.keys().next() {
                        return Err(ConfigError::Parse(format!(
                            "unknown field `{}` in [account.{}]",
                            key, name
                        )));
                    }
                    let path = account.path.ok_or_else(|| {
                        ConfigError::Parse(format!("missing path in [account.{}]", name))
                    })?;
                    BackendConfig::Snapshot {
                        path: resolve(base_dir, &path),
                        writable: account.writable,
                    }
                }
                kind => {
                    let mut options = account.options;
                    if let Some(path) = account.path {
                        options.insert("path".to_string(), toml::Value::String(path));
                    }
                    BackendConfig::External {
                        kind: kind.to_string(),
                        options,
                    }
                }
            };
            accounts.push(AccountConfig {
                name,
                address: account.address,
                backend,
            });
        }

        if accounts.is_empty() {
            return Err(ConfigError::Parse(
                "at least one [account.NAME] section is required".to_string(),
            ));
        }

        let file = match raw.log.file.as_deref() {
            None => Some(crate::log::default_log_path()),
            Some("") => None,
            Some(path) => Some(resolve(base_dir, path)),
        };

        Ok(Config {
            accounts,
            run: RunConfig {
                dry_run: raw.run.dry_run,
                page_size: raw.run.page_size,
                filters_file: raw.run.filters_file.map(|p| resolve(base_dir, &p)),
            },
            log: LogConfig {
                level: raw.log.level,
                stderr: raw.log.stderr,
                file,
            },
        })
    }
}

fn resolve(base_dir: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}
