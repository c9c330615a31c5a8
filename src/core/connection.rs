// src/core/connection.rs

//! Parsing, validation, and safe rendering of publisher connection strings.
//!
//! A connection string has the shape
//! `crate://host[:port][,host[:port]]*[?opt=val(&opt=val)*]`. Hosts without an
//! explicit port get the default of the resolved transport mode: 4300 for
//! sniff (cluster-internal peer discovery), 5432 for pg_tunnel (tunneling over
//! the PostgreSQL wire protocol).

use crate::core::errors::ReplicationError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum_macros::{Display, EnumString};
use url::form_urlencoded;

/// Default port for sniff mode.
pub const DEFAULT_SNIFF_PORT: u16 = 4300;
/// Default port for pg_tunnel mode.
pub const DEFAULT_PG_TUNNEL_PORT: u16 = 5432;

const SCHEME_PREFIX: &str = "crate://";

const USER: &str = "user";
const PASSWORD: &str = "password";
const SSLMODE: &str = "sslmode";
const MODE: &str = "mode";

/// The full set of recognized connection options. Anything else is rejected.
const RECOGNIZED_OPTIONS: [&str; 4] = [USER, PASSWORD, SSLMODE, MODE];

/// Transport mode used to reach the publisher cluster.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    #[default]
    Sniff,
    PgTunnel,
}

impl ConnectionMode {
    /// The port assumed for hosts that do not carry an explicit one.
    pub fn default_port(self) -> u16 {
        match self {
            ConnectionMode::Sniff => DEFAULT_SNIFF_PORT,
            ConnectionMode::PgTunnel => DEFAULT_PG_TUNNEL_PORT,
        }
    }
}

/// A parsed and validated publisher connection string.
///
/// Hosts are stored normalized (`host:port`, always with an explicit port);
/// settings keep their declaration order. Structural equality over both fields
/// drives the idempotence of the remote-cluster registry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    hosts: Vec<String>,
    settings: IndexMap<String, String>,
}

impl ConnectionInfo {
    /// The normalized `host:port` list, in declaration order.
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// The resolved transport mode; `sniff` unless configured otherwise.
    pub fn mode(&self) -> ConnectionMode {
        self.settings
            .get(MODE)
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }

    pub fn user(&self) -> Option<&str> {
        self.settings.get(USER).map(String::as_str)
    }

    pub fn password(&self) -> Option<&str> {
        self.settings.get(PASSWORD).map(String::as_str)
    }

    /// The `sslmode` value; only meaningful in pg_tunnel mode.
    pub fn sslmode(&self) -> Option<&str> {
        self.settings.get(SSLMODE).map(String::as_str)
    }

    /// Renders the connection string for logs, error messages, and system
    /// tables: `user` and `password` values are replaced by `*`, ports are
    /// always explicit, the resolved mode is always emitted, and `sslmode` is
    /// stripped in sniff mode (where it is ignored anyway).
    pub fn safe_connection_string(&self) -> String {
        let mode = self.mode();
        let mut params: Vec<String> = Vec::with_capacity(self.settings.len() + 1);
        for (key, value) in &self.settings {
            match key.as_str() {
                USER | PASSWORD => params.push(format!("{key}=*")),
                SSLMODE if mode == ConnectionMode::Sniff => continue,
                MODE => params.push(format!("{MODE}={mode}")),
                _ => params.push(format!("{key}={value}")),
            }
        }
        if !self.settings.contains_key(MODE) {
            params.push(format!("{MODE}={mode}"));
        }
        format!("{SCHEME_PREFIX}{}?{}", self.hosts.join(","), params.join("&"))
    }
}

impl FromStr for ConnectionInfo {
    type Err = ReplicationError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let rest = url.strip_prefix(SCHEME_PREFIX).ok_or_else(|| {
            ReplicationError::InvalidConnectionString(format!(
                "URL must start with '{SCHEME_PREFIX}'"
            ))
        })?;

        let (host_part, query_part) = match rest.split_once('?') {
            Some((hosts, query)) => (hosts, Some(query)),
            None => (rest, None),
        };

        let mut settings: IndexMap<String, String> = IndexMap::new();
        if let Some(query) = query_part {
            for (key, value) in form_urlencoded::parse(query.as_bytes()) {
                if !RECOGNIZED_OPTIONS.contains(&key.as_ref()) {
                    return Err(ReplicationError::InvalidConnectionString(format!(
                        "unrecognized option '{key}'"
                    )));
                }
                settings.insert(key.into_owned(), value.into_owned());
            }
        }

        // The mode decides the default port, so it must be resolved before the
        // hosts are normalized.
        let mode = match settings.get(MODE) {
            Some(value) => value.parse::<ConnectionMode>().map_err(|_| {
                ReplicationError::InvalidConnectionString(format!(
                    "unsupported mode '{value}', expected one of: sniff, pg_tunnel"
                ))
            })?,
            None => ConnectionMode::default(),
        };

        let hosts = host_part
            .split(',')
            .map(|host| normalize_host(host, mode.default_port()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ConnectionInfo { hosts, settings })
    }
}

/// Appends the default port when the host component carries none. An empty
/// host component is legal and materializes as `":<port>"`; it binds later.
fn normalize_host(host: &str, default_port: u16) -> Result<String, ReplicationError> {
    match host.rsplit_once(':') {
        Some((name, port)) => {
            let port: u16 = port.parse().map_err(|_| {
                ReplicationError::InvalidConnectionString(format!("invalid port in host '{host}'"))
            })?;
            Ok(format!("{name}:{port}"))
        }
        None => Ok(format!("{host}:{default_port}")),
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.safe_connection_string())
    }
}

// Raw credentials must never leak through formatting, so Debug renders the
// safe string as well.
impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionInfo({})", self.safe_connection_string())
    }
}
