// omectl - CLI for OpenManage Enterprise device inventory
// Copyright (C) 2024 Mathias Uhl <mathiasuhl@gmx.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};
use thiserror::Error;

pub const DEFAULT_USER: &str = "admin";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings as they appear in a `--config` YAML file or on the command line.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub ip: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub verify_tls: Option<bool>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("appliance address is required; pass it with `--ip <address>`")]
    MissingIp,
    #[error("password is required; pass it with `--password <password>`")]
    MissingPassword,
    #[error("`{0}` is not a usable appliance address")]
    InvalidAddress(String),
    #[error("timeout must be at least one second")]
    ZeroTimeout,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Address as the operator typed it; used in log and error messages.
    pub host: String,
    pub base_url: Url,
    pub user: String,
    pub password: String,
    pub verify_tls: bool,
    pub timeout: Duration,
}

pub fn load(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let config = serde_yaml::from_str(&contents).with_context(|| format!("parsing {:?}", path))?;
    Ok(config)
}

/// Layers command-line overrides on top of an optional config file.
pub fn resolve(file: Option<Config>, overrides: Config) -> Result<Settings> {
    let merged = merge(file.unwrap_or_default(), overrides);

    let host = merged
        .ip
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .ok_or(ConfigError::MissingIp)?;
    let password = merged.password.ok_or(ConfigError::MissingPassword)?;
    let timeout_secs = merged.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(ConfigError::ZeroTimeout.into());
    }

    Ok(Settings {
        base_url: base_url_for(&host)?,
        host,
        user: merged.user.unwrap_or_else(|| DEFAULT_USER.to_string()),
        password,
        verify_tls: merged.verify_tls.unwrap_or(true),
        timeout: Duration::from_secs(timeout_secs),
    })
}

/// `10.0.0.5` becomes `https://10.0.0.5/`; anything with a scheme is taken as-is.
/// The path always ends in `/` so API paths join underneath it.
pub fn base_url_for(address: &str) -> Result<Url, ConfigError> {
    let raw = if address.contains("://") {
        address.to_string()
    } else {
        format!("https://{address}")
    };
    let mut url = Url::parse(&raw).map_err(|_| ConfigError::InvalidAddress(address.to_string()))?;
    if url.host_str().is_none() || url.cannot_be_a_base() {
        return Err(ConfigError::InvalidAddress(address.to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Command-line values win over file values, field by field.
pub fn merge(file: Config, cli: Config) -> Config {
    Config {
        ip: cli.ip.or(file.ip),
        user: cli.user.or(file.user),
        password: cli.password.or(file.password),
        verify_tls: cli.verify_tls.or(file.verify_tls),
        timeout_secs: cli.timeout_secs.or(file.timeout_secs),
    }
}
