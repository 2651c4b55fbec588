// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// INI-file configuration loader. Parsing failures are fatal at bootstrap:
// the process exits before any reactor or socket is created.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::crypto::EncryptType;
use crate::error::ConfigError;
use crate::proxy::ProxyMode;

const DEFAULT_SOCKET_BUF_SIZE: usize = 8 * 1024 * 1024;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    File,
    Stderr,
    Both,
}

#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
}

/// Fully validated, typed view of an INI config file's `[general]` and
/// `[remote]` sections.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub mode: ProxyMode,
    pub encrypt_type: EncryptType,
    pub thread_count: usize,
    pub bind_address: IpAddr,
    pub port: u16,
    pub socket_buf_size: usize,
    pub username: String,
    pub password: String,
    pub connect_timeout_secs: u64,
    pub poll_timeout_secs: u64,
    pub log_level: String,
    pub log_type: LogType,
    pub log_path: PathBuf,
    pub log_name: String,
    pub remote: Option<RemoteTarget>,
}

impl ProxyConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let ini = ini::Ini::load_from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let general = ini.section(Some("general"));

        let get = |key: &'static str| -> Option<&str> { general.and_then(|s| s.get(key)) };
        let require = |key: &'static str| -> Result<&str, ConfigError> {
            get(key).ok_or(ConfigError::MissingField { section: "general", key })
        };

        let mode = match require("type")? {
            "0" => ProxyMode::Socks,
            "1" => ProxyMode::Local,
            "2" => ProxyMode::Remote,
            v => {
                return Err(ConfigError::InvalidValue { section: "general", key: "type", value: v.to_string() })
            }
        };

        let encrypt_type = match get("encrypt_type").unwrap_or("0") {
            "0" => EncryptType::None,
            "1" => EncryptType::Aes,
            "2" => EncryptType::Xor,
            v => {
                return Err(ConfigError::InvalidValue {
                    section: "general",
                    key: "encrypt_type",
                    value: v.to_string(),
                })
            }
        };

        let thread_count = match get("thread_count") {
            Some(v) => v.parse::<usize>().map_err(|_| invalid("thread_count", v))?.max(1),
            None => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        };

        let bind_address = match get("bind_address") {
            Some(v) => v.parse::<IpAddr>().map_err(|_| invalid("bind_address", v))?,
            None => IpAddr::from([0, 0, 0, 0]),
        };

        let port_str = require("port")?;
        let port: u16 = port_str.parse().map_err(|_| invalid("port", port_str))?;

        let socket_buf_size = match get("socket_buf_size") {
            Some(v) => v.parse::<usize>().map_err(|_| invalid("socket_buf_size", v))?,
            None => DEFAULT_SOCKET_BUF_SIZE,
        };

        let username = get("username").unwrap_or("").to_string();
        let password = get("password").unwrap_or("").to_string();

        let connect_timeout_secs = match get("connect_timeout") {
            Some(v) => v.parse().map_err(|_| invalid("connect_timeout", v))?,
            None => DEFAULT_CONNECT_TIMEOUT_SECS,
        };
        let poll_timeout_secs = match get("poll_timeout") {
            Some(v) => v.parse().map_err(|_| invalid("poll_timeout", v))?,
            None => DEFAULT_POLL_TIMEOUT_SECS,
        };

        let log_level = get("log_level").unwrap_or("info").to_string();
        let log_type = match get("log_type").unwrap_or("file") {
            "file" => LogType::File,
            "stderr" => LogType::Stderr,
            "both" => LogType::Both,
            v => return Err(invalid("log_type", v)),
        };
        let log_path = PathBuf::from(get("log_path").unwrap_or("./logs"));
        let log_name = get("log_name").unwrap_or("socks").to_string();

        let remote = if mode == ProxyMode::Local {
            let section = ini
                .section(Some("remote"))
                .ok_or(ConfigError::MissingField { section: "remote", key: "host" })?;
            let host = section
                .get("host")
                .ok_or(ConfigError::MissingField { section: "remote", key: "host" })?
                .to_string();
            let port_str = section
                .get("port")
                .ok_or(ConfigError::MissingField { section: "remote", key: "port" })?;
            let port = port_str.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
                section: "remote",
                key: "port",
                value: port_str.to_string(),
            })?;
            Some(RemoteTarget { host, port })
        } else {
            None
        };

        if port == 0 {
            return Err(invalid("port", "0"));
        }

        Ok(Self {
            mode,
            encrypt_type,
            thread_count,
            bind_address,
            port,
            socket_buf_size,
            username,
            password,
            connect_timeout_secs,
            poll_timeout_secs,
            log_level,
            log_type,
            log_path,
            log_name,
            remote,
        })
    }
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue { section: "general", key, value: value.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("pat-config-test-{:?}.ini", std::thread::current().id()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_minimal_socks_config_with_defaults() {
        let path = write_temp("[general]\ntype = 0\nport = 1080\n");
        let cfg = ProxyConfig::load(&path).unwrap();
        assert_eq!(cfg.mode, ProxyMode::Socks);
        assert_eq!(cfg.port, 1080);
        assert_eq!(cfg.socket_buf_size, DEFAULT_SOCKET_BUF_SIZE);
        assert_eq!(cfg.log_type, LogType::File);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn local_mode_requires_remote_section() {
        let path = write_temp("[general]\ntype = 1\nport = 1080\n");
        assert!(ProxyConfig::load(&path).is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn rejects_unknown_encrypt_type() {
        let path = write_temp("[general]\ntype = 0\nport = 1080\nencrypt_type = 9\n");
        assert!(matches!(ProxyConfig::load(&path), Err(ConfigError::InvalidValue { .. })));
        std::fs::remove_file(path).ok();
    }
}
