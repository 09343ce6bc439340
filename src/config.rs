//! Everything related to config handling within the mail merge.
//!
//! The config is a single TOML file, by default at `$XDG_CONFIG_HOME/panorama/mailmerge.toml`.
//! Only the `[credentials]` section is required; everything else has defaults that match a
//! Gmail submission relay.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::delivery::{Credentials, RetryPolicy};
use crate::merge::{MergeOptions, SubstitutionPolicy};

const CONFIG_FILE_NAME: &str = "mailmerge.toml";

/// The top-level config
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    /// How to reach the SMTP relay
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Login for the relay
    pub credentials: Credentials,

    /// How rows become messages
    #[serde(default)]
    pub merge: MergeConfig,

    /// Where log output goes
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Reads and parses the config file at `path`. A leading `~` is expanded.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = expand_path(path);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("could not read config file {:?}", path))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("could not parse config file {:?}", path))?;
        Ok(config)
    }

    /// The config path used when none is given on the command line.
    pub fn default_path() -> Result<PathBuf> {
        let xdg = xdg::BaseDirectories::with_prefix("panorama")?;
        Ok(xdg
            .find_config_file(CONFIG_FILE_NAME)
            .unwrap_or_else(|| xdg.get_config_home().join(CONFIG_FILE_NAME)))
    }

    /// The address messages are sent from: `merge.sender` if set, the login otherwise.
    pub fn sender(&self) -> &str {
        self.merge
            .sender
            .as_deref()
            .unwrap_or(&self.credentials.username)
    }
}

/// Describes how to connect to the relay
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SmtpConfig {
    /// Server to connect to
    pub server: String,

    /// Port to connect to
    pub port: u16,

    /// TLS
    pub tls: TlsMethod,

    /// Upper bound for each network operation, in seconds
    pub timeout_secs: u64,

    /// Name sent in EHLO
    pub hello_name: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        SmtpConfig {
            server: "smtp.gmail.com".to_owned(),
            port: 587,
            tls: TlsMethod::Starttls,
            timeout_secs: 30,
            hello_name: "localhost".to_owned(),
        }
    }
}

impl SmtpConfig {
    /// `timeout_secs` as a duration; 0 means no limit.
    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Describes when to perform the TLS handshake
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TlsMethod {
    /// Perform TLS handshake immediately upon connection
    On,

    /// Perform TLS handshake after issuing the STARTTLS command
    Starttls,

    /// Don't perform TLS handshake at all (unsecured)
    Off,
}

/// Describes how the placeholder table and template become messages
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct MergeConfig {
    /// Subject line, unless one is given on the command line
    pub subject: Option<String>,

    /// From address; defaults to the login username
    pub sender: Option<String>,

    /// Name of the column holding the recipients
    pub recipient_column: String,

    /// Separator between recipients in that column
    pub delimiter: char,

    /// Whether `a@x.com;;b@y.com` loses its empty middle entry
    pub drop_empty_recipients: bool,

    /// What to do when a row doesn't fill every placeholder
    pub policy: SubstitutionPolicy,

    /// How many times a failed connection is retried per message
    pub retries: u32,

    /// Pause before each retry, in milliseconds
    pub retry_backoff_ms: u64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            subject: None,
            sender: None,
            recipient_column: "email".to_owned(),
            delimiter: ';',
            drop_empty_recipients: true,
            policy: SubstitutionPolicy::BestEffort,
            retries: 0,
            retry_backoff_ms: 1000,
        }
    }
}

impl MergeConfig {
    /// The parts of this section the [`Merger`](crate::Merger) needs.
    pub fn options(&self) -> MergeOptions {
        MergeOptions {
            policy: self.policy,
            delimiter: self.delimiter,
            drop_empty_recipients: self.drop_empty_recipients,
        }
    }

    /// Retry settings for [`Retrying`](crate::delivery::Retrying).
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Describes the log output
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LogConfig {
    /// One of `error`, `warn`, `info`, `debug`, `trace`
    pub level: String,

    /// Also append log output to this file
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_owned(),
            file: None,
        }
    }
}

impl LogConfig {
    /// Parses `level`.
    pub fn level_filter(&self) -> Result<log::LevelFilter> {
        self.level
            .parse()
            .map_err(|_| anyhow!("unknown log level {:?}", self.level))
    }
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).into_owned()),
        None => path.to_path_buf(),
    }
}
