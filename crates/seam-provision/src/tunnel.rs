// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tunnel-driver capability.
//!
//! Peer installation, removal and the driver's own activity counters. The
//! registry stays the source of truth; the driver is reconciled against it
//! by the explicit sync step in the provisioning service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use seam_common::{run_command, CommandError, TunnelPublicKey};
use std::net::Ipv4Addr;
use tracing::{instrument, warn};

#[async_trait]
pub trait TunnelDriver: Send + Sync {
	async fn add_peer(
		&self,
		public_key: &TunnelPublicKey,
		address: Ipv4Addr,
	) -> Result<(), CommandError>;

	async fn remove_peer(&self, public_key: &TunnelPublicKey) -> Result<(), CommandError>;

	async fn list_peers(&self) -> Result<Vec<TunnelPublicKey>, CommandError>;

	/// (peer, last handshake). `None` when the peer never completed one.
	async fn latest_handshakes(
		&self,
	) -> Result<Vec<(TunnelPublicKey, Option<DateTime<Utc>>)>, CommandError>;

	/// (peer, rx bytes, tx bytes) as counted by the driver.
	async fn transfer(&self) -> Result<Vec<(TunnelPublicKey, i64, i64)>, CommandError>;
}

/// `wg` command implementation.
pub struct CommandTunnelDriver {
	interface: String,
}

impl CommandTunnelDriver {
	pub fn new(interface: &str) -> Self {
		Self {
			interface: interface.to_string(),
		}
	}
}

#[async_trait]
impl TunnelDriver for CommandTunnelDriver {
	#[instrument(skip(self, public_key), fields(interface = %self.interface, %address))]
	async fn add_peer(
		&self,
		public_key: &TunnelPublicKey,
		address: Ipv4Addr,
	) -> Result<(), CommandError> {
		let key = public_key.to_base64();
		let allowed = format!("{address}/32");
		run_command(
			"wg",
			&[
				"set",
				&self.interface,
				"peer",
				&key,
				"allowed-ips",
				&allowed,
			],
		)
		.await?;
		Ok(())
	}

	#[instrument(skip(self, public_key), fields(interface = %self.interface))]
	async fn remove_peer(&self, public_key: &TunnelPublicKey) -> Result<(), CommandError> {
		let key = public_key.to_base64();
		run_command("wg", &["set", &self.interface, "peer", &key, "remove"]).await?;
		Ok(())
	}

	#[instrument(skip(self), fields(interface = %self.interface))]
	async fn list_peers(&self) -> Result<Vec<TunnelPublicKey>, CommandError> {
		let output = run_command("wg", &["show", &self.interface, "peers"]).await?;
		Ok(parse_peers(&output))
	}

	#[instrument(skip(self), fields(interface = %self.interface))]
	async fn latest_handshakes(
		&self,
	) -> Result<Vec<(TunnelPublicKey, Option<DateTime<Utc>>)>, CommandError> {
		let output = run_command("wg", &["show", &self.interface, "latest-handshakes"]).await?;
		Ok(parse_handshakes(&output))
	}

	#[instrument(skip(self), fields(interface = %self.interface))]
	async fn transfer(&self) -> Result<Vec<(TunnelPublicKey, i64, i64)>, CommandError> {
		let output = run_command("wg", &["show", &self.interface, "transfer"]).await?;
		Ok(parse_transfer(&output))
	}
}

fn parse_peers(output: &str) -> Vec<TunnelPublicKey> {
	output
		.lines()
		.filter(|l| !l.is_empty())
		.filter_map(|line| match TunnelPublicKey::from_base64(line.trim()) {
			Ok(key) => Some(key),
			Err(e) => {
				warn!(error = %e, "skipping unparseable peer line");
				None
			}
		})
		.collect()
}

fn parse_handshakes(output: &str) -> Vec<(TunnelPublicKey, Option<DateTime<Utc>>)> {
	output
		.lines()
		.filter(|l| !l.is_empty())
		.filter_map(|line| {
			let mut fields = line.split_whitespace();
			let key = TunnelPublicKey::from_base64(fields.next()?).ok()?;
			let epoch: i64 = fields.next()?.parse().ok()?;
			let handshake = if epoch == 0 {
				None
			} else {
				DateTime::from_timestamp(epoch, 0)
			};
			Some((key, handshake))
		})
		.collect()
}

fn parse_transfer(output: &str) -> Vec<(TunnelPublicKey, i64, i64)> {
	output
		.lines()
		.filter(|l| !l.is_empty())
		.filter_map(|line| {
			let mut fields = line.split_whitespace();
			let key = TunnelPublicKey::from_base64(fields.next()?).ok()?;
			let rx: i64 = fields.next()?.parse().ok()?;
			let tx: i64 = fields.next()?.parse().ok()?;
			Some((key, rx, tx))
		})
		.collect()
}
