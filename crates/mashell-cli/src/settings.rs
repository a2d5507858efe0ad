//! Config file model and provider settings resolution.
//!
//! Each of provider, url, key and model is resolved on its own: a CLI flag
//! beats the `MASHELL_*` environment variable, which beats the selected
//! profile.

use mashell_agent::PermissionConfig;
use mashell_llm::ProviderFlavor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PROVIDER_ENV: &str = "MASHELL_PROVIDER";
pub const URL_ENV: &str = "MASHELL_URL";
pub const KEY_ENV: &str = "MASHELL_KEY";
pub const MODEL_ENV: &str = "MASHELL_MODEL";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot determine the home directory; pass --config")]
    NoHomeDirectory,
    #[error("config file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },
    #[error("failed reading config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed writing config file '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed encoding config: {0}")]
    Encode(#[from] serde_yaml::Error),
    #[error("profile '{name}' not found in config (available: {available})")]
    ProfileNotFound { name: String, available: String },
    #[error("{field} is required. Use --{field} or set {env}")]
    MissingField {
        field: &'static str,
        env: &'static str,
    },
    #[error("unknown provider '{name}' (supported: {supported})")]
    UnknownProvider { name: String, supported: String },
}

/// Contents of `~/.mashell/config.yaml`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
    #[serde(default)]
    pub permissions: PermissionConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Literal key, or `${VAR}` to read it from the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ConfigFile {
    pub fn profile_names(&self) -> String {
        if self.profiles.is_empty() {
            return "none".to_string();
        }
        self.profiles
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Inserts or replaces a profile. The first profile saved becomes the default.
    pub fn upsert_profile(&mut self, name: impl Into<String>, profile: ProfileConfig) {
        let name = name.into();
        if self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.profiles.insert(name, profile);
    }
}

/// Values given on the command line.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub provider: Option<String>,
    pub url: Option<String>,
    pub key: Option<String>,
    pub model: Option<String>,
    pub profile: Option<String>,
}

impl CliOverrides {
    pub fn is_empty(&self) -> bool {
        self.provider.is_none()
            && self.url.is_none()
            && self.key.is_none()
            && self.model.is_none()
            && self.profile.is_none()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedSettings {
    pub flavor: ProviderFlavor,
    pub url: String,
    pub key: Option<String>,
    pub model: String,
    pub profile: Option<String>,
    pub permissions: PermissionConfig,
}

pub fn default_config_path() -> Result<PathBuf, SettingsError> {
    dirs::home_dir()
        .map(|home| home.join(".mashell").join("config.yaml"))
        .ok_or(SettingsError::NoHomeDirectory)
}

/// `Ok(None)` when the file does not exist.
pub fn load_config_file(path: &Path) -> Result<Option<ConfigFile>, SettingsError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if text.trim().is_empty() {
        return Ok(Some(ConfigFile::default()));
    }
    serde_yaml::from_str(&text)
        .map(Some)
        .map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

pub fn save_config_file(path: &Path, config: &ConfigFile) -> Result<(), SettingsError> {
    let text = serde_yaml::to_string(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, text).map_err(|source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    })
}

pub fn resolve_settings<F>(
    file: Option<&ConfigFile>,
    overrides: &CliOverrides,
    env: F,
) -> Result<ResolvedSettings, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |name: &str| env(name).filter(|value| !value.trim().is_empty());
    let (profile_name, profile) = select_profile(file, overrides.profile.as_deref())?;
    let empty = ProfileConfig::default();
    let profile = profile.unwrap_or(&empty);

    let provider = pick(&overrides.provider, lookup(PROVIDER_ENV), &profile.provider).ok_or(
        SettingsError::MissingField {
            field: "provider",
            env: PROVIDER_ENV,
        },
    )?;
    let flavor = ProviderFlavor::parse(&provider).ok_or_else(|| SettingsError::UnknownProvider {
        name: provider.clone(),
        supported: ProviderFlavor::supported().join(", "),
    })?;
    let model = pick(&overrides.model, lookup(MODEL_ENV), &profile.model).ok_or(
        SettingsError::MissingField {
            field: "model",
            env: MODEL_ENV,
        },
    )?;
    let url = pick(&overrides.url, lookup(URL_ENV), &profile.url)
        .or_else(|| flavor.default_url().map(str::to_string))
        .ok_or(SettingsError::MissingField {
            field: "url",
            env: URL_ENV,
        })?;
    let profile_key = profile
        .key
        .as_deref()
        .and_then(|key| expand_env_reference(key, &lookup));
    let key = pick(&overrides.key, lookup(KEY_ENV), &profile_key);

    Ok(ResolvedSettings {
        flavor,
        url,
        key,
        model,
        profile: profile_name,
        permissions: file
            .map(|file| file.permissions.clone())
            .unwrap_or_default(),
    })
}

fn select_profile<'a>(
    file: Option<&'a ConfigFile>,
    requested: Option<&str>,
) -> Result<(Option<String>, Option<&'a ProfileConfig>), SettingsError> {
    let named = |name: &str| -> Result<(Option<String>, Option<&'a ProfileConfig>), SettingsError> {
        let profile = file
            .and_then(|file| file.profiles.get(name))
            .ok_or_else(|| SettingsError::ProfileNotFound {
                name: name.to_string(),
                available: file.map(ConfigFile::profile_names).unwrap_or_else(|| "none".to_string()),
            })?;
        Ok((Some(name.to_string()), Some(profile)))
    };

    if let Some(name) = requested {
        return named(name);
    }
    let Some(file) = file else {
        return Ok((None, None));
    };
    if let Some(name) = file.default.as_deref() {
        return named(name);
    }
    match file.profiles.iter().next() {
        Some((name, profile)) if file.profiles.len() == 1 => Ok((Some(name.clone()), Some(profile))),
        _ => Ok((None, None)),
    }
}

fn pick(flag: &Option<String>, env: Option<String>, profile: &Option<String>) -> Option<String> {
    let non_empty = |value: &Option<String>| value.clone().filter(|value| !value.trim().is_empty());
    non_empty(flag).or(env).or_else(|| non_empty(profile))
}

/// `${VAR}` reads the variable; anything else is a literal.
fn expand_env_reference<F>(value: &str, env: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    match value
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    {
        Some(name) => env(name),
        None => Some(value.to_string()),
    }
}
