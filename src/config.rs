// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names, default values and the
//! typed [`AppConfig`] loaded once at startup and passed explicitly to every
//! component.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM certificate and key; both set enables HTTPS | unset |
//! | `SERVER_SALT` | Secret salt for custodial key derivation (>= 16 bytes) | Required for ledger path |
//! | `ALLOW_SIGNATURE_BYPASS` | Honour `bypassSignature` (only in `dev` builds) | `false` |
//! | `LEDGER_RPC_URL` | Ledger JSON-RPC endpoint | `http://127.0.0.1:8545` |
//! | `LEDGER_PROCESSOR_ADDRESS` | Address receiving entity create transactions | `0x...60138453` |
//! | `LEDGER_ENTITY_TTL_SECS` | Entity time-to-live in seconds | `31536000` |
//! | `PINATA_JWT` | Pinning service credential | Required for file uploads |
//! | `PINATA_API_URL` | Pinning service base URL | `https://api.pinata.cloud` |
//! | `RELAY_COMMAND` | Shell command launching the anonymous relay | `xxdk-relay` |
//! | `RELAY_WORKDIR` | Working directory of the relay process | current directory |
//! | `RELAY_TIMEOUT_SECS` | Bounded wait for the relay process | `90` |
//! | `UPLOAD_SPOOL_DIR` | Directory for spooled uploads | system temp dir |
//! | `MAX_UPLOAD_BYTES` | Multipart body limit | `10485760` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::{path::PathBuf, str::FromStr, time::Duration};

use alloy::primitives::{address, Address};

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const SERVER_SALT_ENV: &str = "SERVER_SALT";
pub const ALLOW_SIGNATURE_BYPASS_ENV: &str = "ALLOW_SIGNATURE_BYPASS";
pub const LEDGER_RPC_URL_ENV: &str = "LEDGER_RPC_URL";
pub const LEDGER_PROCESSOR_ADDRESS_ENV: &str = "LEDGER_PROCESSOR_ADDRESS";
pub const LEDGER_ENTITY_TTL_SECS_ENV: &str = "LEDGER_ENTITY_TTL_SECS";
pub const PINATA_JWT_ENV: &str = "PINATA_JWT";
pub const PINATA_API_URL_ENV: &str = "PINATA_API_URL";
pub const RELAY_COMMAND_ENV: &str = "RELAY_COMMAND";
pub const RELAY_WORKDIR_ENV: &str = "RELAY_WORKDIR";
pub const RELAY_TIMEOUT_SECS_ENV: &str = "RELAY_TIMEOUT_SECS";
pub const UPLOAD_SPOOL_DIR_ENV: &str = "UPLOAD_SPOOL_DIR";
pub const MAX_UPLOAD_BYTES_ENV: &str = "MAX_UPLOAD_BYTES";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_LEDGER_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_LEDGER_PROCESSOR_ADDRESS: Address =
    address!("0x0000000000000000000000000000000060138453");
/// One year.
pub const DEFAULT_ENTITY_TTL_SECS: u64 = 365 * 24 * 60 * 60;
pub const DEFAULT_PINATA_API_URL: &str = "https://api.pinata.cloud";
pub const DEFAULT_RELAY_COMMAND: &str = "xxdk-relay";
pub const DEFAULT_RELAY_TIMEOUT_SECS: u64 = 90;
pub const MIN_RELAY_TIMEOUT_SECS: u64 = 5;
pub const MAX_RELAY_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("{0} and {1} must be set together")]
    Incomplete(&'static str, &'static str),
}

/// PEM files for HTTPS.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub processor_address: Address,
    pub entity_ttl_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_LEDGER_RPC_URL.to_string(),
            processor_address: DEFAULT_LEDGER_PROCESSOR_ADDRESS,
            entity_ttl_secs: DEFAULT_ENTITY_TTL_SECS,
        }
    }
}

#[derive(Clone)]
pub struct PinataConfig {
    pub api_url: String,
    pub jwt: String,
}

impl std::fmt::Debug for PinataConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinataConfig")
            .field("api_url", &self.api_url)
            .field("jwt", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub command: String,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_RELAY_COMMAND.to_string(),
            working_dir: None,
            timeout: Duration::from_secs(DEFAULT_RELAY_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub spool_dir: Option<PathBuf>,
    pub max_upload_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            spool_dir: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Everything the server reads from the environment.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,
    /// Raw salt bytes; validated when the dispatcher is built.
    pub server_salt: Option<Vec<u8>>,
    pub allow_signature_bypass: bool,
    pub ledger: LedgerConfig,
    pub pinning: Option<PinataConfig>,
    pub relay: RelayConfig,
    pub upload: UploadConfig,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("server_salt", &self.server_salt.as_ref().map(|_| "<redacted>"))
            .field("allow_signature_bypass", &self.allow_signature_bypass)
            .field("ledger", &self.ledger)
            .field("pinning", &self.pinning)
            .field("relay", &self.relay)
            .field("upload", &self.upload)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: None,
            server_salt: None,
            allow_signature_bypass: false,
            ledger: LedgerConfig::default(),
            pinning: None,
            relay: RelayConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let host = get(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_or(get(PORT_ENV), PORT_ENV, DEFAULT_PORT)?;

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::Incomplete(TLS_CERT_PATH_ENV, TLS_KEY_PATH_ENV)),
        };

        let bypass_requested = parse_or(get(ALLOW_SIGNATURE_BYPASS_ENV), ALLOW_SIGNATURE_BYPASS_ENV, false)?;
        let allow_signature_bypass = bypass_requested && cfg!(feature = "dev");
        if bypass_requested && !allow_signature_bypass {
            tracing::warn!("{ALLOW_SIGNATURE_BYPASS_ENV} ignored: build lacks the `dev` feature");
        }

        let ledger = LedgerConfig {
            rpc_url: match get(LEDGER_RPC_URL_ENV) {
                Some(raw) => {
                    url::Url::parse(&raw).map_err(|e| ConfigError::Invalid {
                        name: LEDGER_RPC_URL_ENV,
                        reason: e.to_string(),
                    })?;
                    raw
                }
                None => DEFAULT_LEDGER_RPC_URL.to_string(),
            },
            processor_address: match get(LEDGER_PROCESSOR_ADDRESS_ENV) {
                Some(raw) => Address::from_str(&raw).map_err(|e| ConfigError::Invalid {
                    name: LEDGER_PROCESSOR_ADDRESS_ENV,
                    reason: e.to_string(),
                })?,
                None => DEFAULT_LEDGER_PROCESSOR_ADDRESS,
            },
            entity_ttl_secs: parse_or(
                get(LEDGER_ENTITY_TTL_SECS_ENV),
                LEDGER_ENTITY_TTL_SECS_ENV,
                DEFAULT_ENTITY_TTL_SECS,
            )?,
        };
        if ledger.entity_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                name: LEDGER_ENTITY_TTL_SECS_ENV,
                reason: "must be positive".to_string(),
            });
        }

        let pinning = get(PINATA_JWT_ENV).map(|jwt| PinataConfig {
            api_url: get(PINATA_API_URL_ENV).unwrap_or_else(|| DEFAULT_PINATA_API_URL.to_string()),
            jwt,
        });

        let timeout_secs = parse_or(
            get(RELAY_TIMEOUT_SECS_ENV),
            RELAY_TIMEOUT_SECS_ENV,
            DEFAULT_RELAY_TIMEOUT_SECS,
        )?
        .clamp(MIN_RELAY_TIMEOUT_SECS, MAX_RELAY_TIMEOUT_SECS);

        let relay = RelayConfig {
            command: get(RELAY_COMMAND_ENV).unwrap_or_else(|| DEFAULT_RELAY_COMMAND.to_string()),
            working_dir: get(RELAY_WORKDIR_ENV).map(PathBuf::from),
            timeout: Duration::from_secs(timeout_secs),
        };

        let upload = UploadConfig {
            spool_dir: get(UPLOAD_SPOOL_DIR_ENV).map(PathBuf::from),
            max_upload_bytes: parse_or(
                get(MAX_UPLOAD_BYTES_ENV),
                MAX_UPLOAD_BYTES_ENV,
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
        };

        Ok(Self {
            host,
            port,
            tls,
            server_salt: lookup(SERVER_SALT_ENV)
                .filter(|v| !v.is_empty())
                .map(String::into_bytes),
            allow_signature_bypass,
            ledger,
            pinning,
            relay,
            upload,
        })
    }
}

fn parse_or<T>(raw: Option<String>, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
