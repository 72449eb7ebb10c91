// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy-routing capability: the fwmark rule and the table's default route.

use async_trait::async_trait;
use seam_common::{run_command, CommandError};
use tracing::instrument;

#[async_trait]
pub trait PolicyRouting: Send + Sync {
	/// Bind `mark` to `table`.
	async fn add_rule(&self, mark: u32, table: u32) -> Result<(), CommandError>;

	/// Remove the (mark, table) binding. Fails when no such rule exists.
	async fn remove_rule(&self, mark: u32, table: u32) -> Result<(), CommandError>;

	/// Point `table`'s default route at `interface`. Replaces any existing
	/// default route in the table.
	async fn set_default_route(&self, table: u32, interface: &str) -> Result<(), CommandError>;
}

/// `ip rule`/`ip route` implementation.
pub struct CommandPolicyRouting;

impl CommandPolicyRouting {
	pub fn new() -> Self {
		Self
	}
}

impl Default for CommandPolicyRouting {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl PolicyRouting for CommandPolicyRouting {
	#[instrument(skip(self))]
	async fn add_rule(&self, mark: u32, table: u32) -> Result<(), CommandError> {
		let mark = mark.to_string();
		let table = table.to_string();
		run_command("ip", &["rule", "add", "fwmark", &mark, "lookup", &table]).await?;
		Ok(())
	}

	#[instrument(skip(self))]
	async fn remove_rule(&self, mark: u32, table: u32) -> Result<(), CommandError> {
		let mark = mark.to_string();
		let table = table.to_string();
		run_command("ip", &["rule", "del", "fwmark", &mark, "lookup", &table]).await?;
		Ok(())
	}

	#[instrument(skip(self))]
	async fn set_default_route(&self, table: u32, interface: &str) -> Result<(), CommandError> {
		let table = table.to_string();
		run_command(
			"ip",
			&[
				"route", "replace", "default", "dev", interface, "table", &table,
			],
		)
		.await?;
		Ok(())
	}
}
