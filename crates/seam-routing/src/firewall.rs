// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Packet-filter capability: kernel address sets and the marking rule.
//!
//! The primitives are idempotent where the tools allow it (`-exist` on set
//! operations); rule presence is a separate query so the controller can do
//! check-then-insert and never duplicate the marking rule across cycles.

use async_trait::async_trait;
use seam_common::{run_command, CommandError};
use std::collections::BTreeSet;
use std::net::IpAddr;
use tracing::instrument;

/// Address family of a kernel set. Sets are per-family, so the policy set
/// is backed by one set of each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetFamily {
	V4,
	V6,
}

impl SetFamily {
	pub fn of(addr: &IpAddr) -> Self {
		match addr {
			IpAddr::V4(_) => SetFamily::V4,
			IpAddr::V6(_) => SetFamily::V6,
		}
	}
}

#[async_trait]
pub trait PacketFilter: Send + Sync {
	/// Create the named set if absent; a no-op when it already exists.
	async fn create_set(&self, name: &str, family: SetFamily) -> Result<(), CommandError>;

	/// Add one address to the named set; a no-op for existing members.
	async fn add_member(&self, name: &str, addr: IpAddr) -> Result<(), CommandError>;

	/// Current members of the named set.
	async fn list_members(
		&self,
		name: &str,
		family: SetFamily,
	) -> Result<BTreeSet<IpAddr>, CommandError>;

	/// Whether the marking rule for (set, mark) is already installed.
	async fn mark_rule_present(&self, set: &str, mark: u32) -> Result<bool, CommandError>;

	/// Append the marking rule for (set, mark).
	async fn install_mark_rule(&self, set: &str, mark: u32) -> Result<(), CommandError>;

	/// Durably save the rule set so it survives a restart of the filtering
	/// subsystem.
	async fn persist(&self) -> Result<(), CommandError>;
}

/// `ipset`/`iptables` implementation.
pub struct CommandPacketFilter;

impl CommandPacketFilter {
	pub fn new() -> Self {
		Self
	}

	fn mark_rule_args<'a>(set: &'a str, mark: &'a str, action: &'a str) -> Vec<&'a str> {
		vec![
			"-t",
			"mangle",
			action,
			"PREROUTING",
			"-m",
			"set",
			"--match-set",
			set,
			"dst",
			"-j",
			"MARK",
			"--set-mark",
			mark,
		]
	}
}

impl Default for CommandPacketFilter {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl PacketFilter for CommandPacketFilter {
	#[instrument(skip(self))]
	async fn create_set(&self, name: &str, family: SetFamily) -> Result<(), CommandError> {
		let family_arg = match family {
			SetFamily::V4 => "inet",
			SetFamily::V6 => "inet6",
		};
		run_command(
			"ipset",
			&["create", name, "hash:ip", "family", family_arg, "-exist"],
		)
		.await?;
		Ok(())
	}

	#[instrument(skip(self), fields(%addr))]
	async fn add_member(&self, name: &str, addr: IpAddr) -> Result<(), CommandError> {
		let addr = addr.to_string();
		run_command("ipset", &["add", name, &addr, "-exist"]).await?;
		Ok(())
	}

	#[instrument(skip(self))]
	async fn list_members(
		&self,
		name: &str,
		_family: SetFamily,
	) -> Result<BTreeSet<IpAddr>, CommandError> {
		let output = run_command("ipset", &["list", name]).await?;

		let mut members = BTreeSet::new();
		let mut in_members = false;
		for line in output.lines() {
			if in_members {
				if let Some(token) = line.split_whitespace().next() {
					if let Ok(addr) = token.parse::<IpAddr>() {
						members.insert(addr);
					}
				}
			} else if line.starts_with("Members:") {
				in_members = true;
			}
		}

		Ok(members)
	}

	#[instrument(skip(self))]
	async fn mark_rule_present(&self, set: &str, mark: u32) -> Result<bool, CommandError> {
		let mark = mark.to_string();
		// `iptables -C` exits non-zero when the rule is absent.
		Ok(
			run_command("iptables", &Self::mark_rule_args(set, &mark, "-C"))
				.await
				.is_ok(),
		)
	}

	#[instrument(skip(self))]
	async fn install_mark_rule(&self, set: &str, mark: u32) -> Result<(), CommandError> {
		let mark = mark.to_string();
		run_command("iptables", &Self::mark_rule_args(set, &mark, "-A")).await?;
		Ok(())
	}

	#[instrument(skip(self))]
	async fn persist(&self) -> Result<(), CommandError> {
		run_command("netfilter-persistent", &["save"]).await?;
		Ok(())
	}
}
