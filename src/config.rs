use std::fmt;
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::TransferError;

pub const CONFIG_FILE: &str = "bcm-transfer.json";
pub const DEFAULT_BCM_ADDR: &str = "https://bcm.genialis.com";
pub const DEFAULT_DE_ADDR: &str = "https://dictyexpress.research.bcm.edu";
pub const DEFAULT_DE_TYPE: &str = "data:reads:fastq";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub de_login: LoginSection,
    #[serde(default)]
    pub bcm_login: LoginSection,
    #[serde(default)]
    pub de_data: Option<DeDataSection>,
    #[serde(default)]
    pub storage: Option<String>,
    #[serde(default)]
    pub migration: MigrationDefaults,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoginSection {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pw: Option<String>,
    #[serde(default)]
    pub addr: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DeDataSection {
    pub col: String,
    #[serde(rename = "type", default = "default_de_type")]
    pub data_type: String,
}

/// Annotation values that DictyExpress objects do not carry themselves.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MigrationDefaults {
    pub experiment_type: String,
    pub extract_protocol: String,
    pub library_prep: String,
    pub organism: String,
    pub molecule: String,
}

impl Default for MigrationDefaults {
    fn default() -> Self {
        Self {
            experiment_type: "Chemical mutagenesis".to_string(),
            extract_protocol: "phenol/chloroform".to_string(),
            library_prep: "DNA shearing".to_string(),
            organism: "Dictyostelium discoideum".to_string(),
            molecule: "genomic DNA".to_string(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Values given on the command line; they win over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub bcm_user: Option<String>,
    pub bcm_password: Option<String>,
    pub bcm_addr: Option<String>,
    pub storage: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub de_addr: String,
    pub de_credentials: Credentials,
    pub bcm_addr: String,
    pub bcm_credentials: Credentials,
    pub de_project: String,
    pub de_type: String,
    pub storage: Utf8PathBuf,
    pub migration: MigrationDefaults,
}

pub trait Prompter {
    fn input(&self, label: &str) -> Result<String, TransferError>;
    fn password(&self, label: &str) -> Result<String, TransferError>;
}

/// Asks on the terminal.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn input(&self, label: &str) -> Result<String, TransferError> {
        dialoguer::Input::<String>::new()
            .with_prompt(label)
            .interact_text()
            .map_err(|err| TransferError::MissingCredential(format!("{label}: {err}")))
    }

    fn password(&self, label: &str) -> Result<String, TransferError> {
        dialoguer::Password::new()
            .with_prompt(label)
            .interact()
            .map_err(|err| TransferError::MissingCredential(format!("{label}: {err}")))
    }
}

/// Never asks; used with `--non-interactive`.
pub struct NoPrompt;

impl Prompter for NoPrompt {
    fn input(&self, label: &str) -> Result<String, TransferError> {
        Err(TransferError::MissingCredential(label.to_string()))
    }

    fn password(&self, label: &str) -> Result<String, TransferError> {
        Err(TransferError::MissingCredential(label.to_string()))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `bcm-transfer.json` in the working directory, or
    /// `<config dir>/bcm-transfer/config.json`.
    pub fn load(path: Option<&str>) -> Result<Config, TransferError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => Self::default_path().ok_or(TransferError::MissingConfig)?,
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| TransferError::ConfigRead(config_path.clone()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config, TransferError> {
        serde_json::from_str(content).map_err(|err| TransferError::ConfigParse(err.to_string()))
    }

    fn default_path() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("bcm-transfer").join("config.json"))
            .filter(|path| path.exists())
    }

    /// Applies the precedence command line > config file > prompt, once.
    pub fn resolve(
        config: Config,
        overrides: Overrides,
        prompter: &dyn Prompter,
    ) -> Result<ResolvedConfig, TransferError> {
        let de_data = config
            .de_data
            .ok_or_else(|| TransferError::ConfigParse("missing de_data section".to_string()))?;
        if de_data.col.trim().is_empty() {
            return Err(TransferError::ConfigParse(
                "de_data.col must name a project".to_string(),
            ));
        }
        let storage = overrides
            .storage
            .or_else(|| non_blank(config.storage).map(Utf8PathBuf::from))
            .ok_or_else(|| TransferError::ConfigParse("missing storage path".to_string()))?;

        let de_user = resolve_value(None, config.de_login.user, || {
            prompter.input("DictyExpress username")
        })?;
        let de_password = resolve_value(None, config.de_login.pw, || {
            prompter.password("DictyExpress password")
        })?;
        let bcm_user = resolve_value(overrides.bcm_user, config.bcm_login.user, || {
            prompter.input("BCM username")
        })?;
        let bcm_password = resolve_value(overrides.bcm_password, config.bcm_login.pw, || {
            prompter.password("BCM password")
        })?;

        Ok(ResolvedConfig {
            de_addr: non_blank(config.de_login.addr).unwrap_or_else(|| DEFAULT_DE_ADDR.to_string()),
            de_credentials: Credentials::new(de_user, de_password),
            bcm_addr: non_blank(overrides.bcm_addr)
                .or_else(|| non_blank(config.bcm_login.addr))
                .unwrap_or_else(|| DEFAULT_BCM_ADDR.to_string()),
            bcm_credentials: Credentials::new(bcm_user, bcm_password),
            de_project: de_data.col.trim().to_string(),
            de_type: de_data.data_type,
            storage,
            migration: config.migration,
        })
    }
}

/// First non-blank of `explicit`, `configured`, then whatever `prompt` returns.
pub fn resolve_value<F>(
    explicit: Option<String>,
    configured: Option<String>,
    prompt: F,
) -> Result<String, TransferError>
where
    F: FnOnce() -> Result<String, TransferError>,
{
    if let Some(value) = non_blank(explicit).or_else(|| non_blank(configured)) {
        return Ok(value);
    }
    prompt()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn default_de_type() -> String {
    DEFAULT_DE_TYPE.to_string()
}
