// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! seamd configuration.
//!
//! Precedence (highest to lowest): environment (`SEAM_*`), TOML config
//! file, built-in defaults. A configuration error aborts startup before any
//! loop begins; nothing here is read again after [`load`] returns.

use ipnet::Ipv4Net;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/seam/seam.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("failed to read config file {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file: {0}")]
	Parse(#[from] toml::de::Error),

	#[error("invalid configuration: {0}")]
	Invalid(String),
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct SeamConfig {
	pub interface: String,
	pub endpoint: String,
	pub keepalive_secs: u16,
	pub data_dir: PathBuf,
	pub client_subnet: Ipv4Net,
	pub client_gateway: Ipv4Addr,
	pub client_dns: Vec<IpAddr>,
	pub set_name: String,
	pub fwmark: u32,
	pub table: u32,
	pub interval: Duration,
	pub backoff: Duration,
	pub domains: Vec<String>,
	pub database_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
	#[serde(default)]
	tunnel: TunnelSection,
	#[serde(default)]
	clients: ClientsSection,
	#[serde(default)]
	routing: RoutingSection,
	#[serde(default)]
	database: DatabaseSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TunnelSection {
	interface: Option<String>,
	endpoint: Option<String>,
	keepalive_secs: Option<u16>,
	data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClientsSection {
	subnet: Option<String>,
	gateway: Option<String>,
	dns: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RoutingSection {
	set_name: Option<String>,
	fwmark: Option<u32>,
	table: Option<u32>,
	interval_secs: Option<u64>,
	backoff_secs: Option<u64>,
	domains: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseSection {
	url: Option<String>,
}

/// Load configuration. With an explicit `path` the file must exist; the
/// default path is optional.
pub fn load(path: Option<&Path>) -> Result<SeamConfig, ConfigError> {
	let raw = match path {
		Some(path) => read_file(path)?,
		None => {
			let default = Path::new(DEFAULT_CONFIG_PATH);
			if default.exists() {
				read_file(default)?
			} else {
				RawConfig::default()
			}
		}
	};

	resolve(raw)
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
	let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
		path: path.to_path_buf(),
		source,
	})?;
	Ok(toml::from_str(&content)?)
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn resolve(raw: RawConfig) -> Result<SeamConfig, ConfigError> {
	let interface = env_var("SEAM_INTERFACE")
		.or(raw.tunnel.interface)
		.unwrap_or_else(|| "wg0".to_string());

	let endpoint = env_var("SEAM_ENDPOINT")
		.or(raw.tunnel.endpoint)
		.ok_or_else(|| {
			ConfigError::Invalid(
				"tunnel endpoint is required (tunnel.endpoint or SEAM_ENDPOINT)".to_string(),
			)
		})?;

	let keepalive_secs = raw.tunnel.keepalive_secs.unwrap_or(25);

	let data_dir = env_var("SEAM_DATA_DIR")
		.map(PathBuf::from)
		.or(raw.tunnel.data_dir)
		.unwrap_or_else(|| PathBuf::from("/var/lib/seam"));

	let client_subnet: Ipv4Net = raw
		.clients
		.subnet
		.as_deref()
		.unwrap_or("10.66.66.0/24")
		.parse()
		.map_err(|e| ConfigError::Invalid(format!("client subnet: {e}")))?;

	let client_gateway: Ipv4Addr = raw
		.clients
		.gateway
		.as_deref()
		.unwrap_or("10.66.66.1")
		.parse()
		.map_err(|e| ConfigError::Invalid(format!("client gateway: {e}")))?;

	if !client_subnet.contains(&client_gateway) {
		return Err(ConfigError::Invalid(format!(
			"client gateway {client_gateway} is outside subnet {client_subnet}"
		)));
	}

	let client_dns = raw
		.clients
		.dns
		.unwrap_or_else(|| vec!["1.1.1.1".to_string(), "1.0.0.1".to_string()])
		.iter()
		.map(|s| {
			s.parse::<IpAddr>()
				.map_err(|e| ConfigError::Invalid(format!("client DNS server `{s}`: {e}")))
		})
		.collect::<Result<Vec<_>, _>>()?;

	let set_name = raw
		.routing
		.set_name
		.unwrap_or_else(|| "seam-split".to_string());
	if set_name.is_empty() {
		return Err(ConfigError::Invalid("routing set name is empty".to_string()));
	}

	let fwmark = raw.routing.fwmark.unwrap_or(51820);
	let table = raw.routing.table.unwrap_or(51820);
	if fwmark == 0 || table == 0 {
		return Err(ConfigError::Invalid(
			"fwmark and routing table must be non-zero".to_string(),
		));
	}

	let interval_secs = raw.routing.interval_secs.unwrap_or(3600);
	let backoff_secs = raw.routing.backoff_secs.unwrap_or(300);
	if interval_secs == 0 || backoff_secs == 0 {
		return Err(ConfigError::Invalid(
			"convergence interval and backoff must be non-zero".to_string(),
		));
	}

	let domains = match env_var("SEAM_DOMAINS") {
		Some(value) => value
			.split(',')
			.map(|s| s.trim().to_string())
			.filter(|s| !s.is_empty())
			.collect(),
		None => raw.routing.domains.unwrap_or_default(),
	};

	let database_url = env_var("SEAM_DATABASE_URL")
		.or(raw.database.url)
		.unwrap_or_else(|| "sqlite:./seam.db".to_string());

	Ok(SeamConfig {
		interface,
		endpoint,
		keepalive_secs,
		data_dir,
		client_subnet,
		client_gateway,
		client_dns,
		set_name,
		fwmark,
		table,
		interval: Duration::from_secs(interval_secs),
		backoff: Duration::from_secs(backoff_secs),
		domains,
		database_url,
	})
}
