// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The authoritative set of addresses routed through the tunnel.
//!
//! Convergence is diff-based and add-only: addresses that stop resolving
//! stay in the kernel set. Stale members only affect destinations no longer
//! reachable at that address, and leaving them avoids churn against rules
//! that reference the set.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::firewall::{PacketFilter, SetFamily};

pub struct PolicySet {
	name_v4: String,
	name_v6: String,
	filter: Arc<dyn PacketFilter>,
}

impl PolicySet {
	pub fn new(name: &str, filter: Arc<dyn PacketFilter>) -> Self {
		Self {
			name_v4: name.to_string(),
			name_v6: format!("{name}6"),
			filter,
		}
	}

	pub fn name(&self) -> &str {
		&self.name_v4
	}

	/// Create the backing kernel sets. Safe to call when they already exist.
	#[instrument(skip(self))]
	pub async fn initialize(&self) -> Result<()> {
		self.filter.create_set(&self.name_v4, SetFamily::V4).await?;
		self.filter.create_set(&self.name_v6, SetFamily::V6).await?;
		Ok(())
	}

	/// Bring the kernel sets up to a superset of `desired`, applying only
	/// additions. A single failed add is logged and skipped. Returns the
	/// number of newly added addresses.
	#[instrument(skip(self, desired), fields(desired = desired.len()))]
	pub async fn converge(&self, desired: &BTreeSet<IpAddr>) -> Result<usize> {
		let mut current = self
			.filter
			.list_members(&self.name_v4, SetFamily::V4)
			.await?;
		current.extend(
			self
				.filter
				.list_members(&self.name_v6, SetFamily::V6)
				.await?,
		);

		let mut added = 0;
		for addr in desired.difference(&current) {
			let name = match SetFamily::of(addr) {
				SetFamily::V4 => &self.name_v4,
				SetFamily::V6 => &self.name_v6,
			};
			match self.filter.add_member(name, *addr).await {
				Ok(()) => added += 1,
				Err(e) => {
					warn!(%addr, set = %name, error = %e, "failed to add address to policy set");
				}
			}
		}

		debug!(added, "policy set converged");
		Ok(added)
	}
}
