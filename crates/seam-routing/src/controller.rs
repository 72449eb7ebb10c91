// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Installs and verifies the marking rule and the policy-routing rule/table.
//!
//! The marking rule is check-then-insert: repeated convergence cycles must
//! never stack duplicate rules. The routing rule is remove-then-insert,
//! which is cheap and atomic enough at that layer. Partial failures are not
//! rolled back; a superset of marking state is safe.

use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::firewall::PacketFilter;
use crate::policy::RoutingPolicy;
use crate::routes::PolicyRouting;

pub struct RouteController {
	policy: RoutingPolicy,
	filter: Arc<dyn PacketFilter>,
	routing: Arc<dyn PolicyRouting>,
}

impl RouteController {
	pub fn new(
		policy: RoutingPolicy,
		filter: Arc<dyn PacketFilter>,
		routing: Arc<dyn PolicyRouting>,
	) -> Self {
		Self {
			policy,
			filter,
			routing,
		}
	}

	pub fn policy(&self) -> &RoutingPolicy {
		&self.policy
	}

	/// Ensure exactly one marking rule references the policy set.
	#[instrument(skip(self), fields(set = %self.policy.set_name, mark = self.policy.fwmark))]
	pub async fn install_mark_rule(&self) -> Result<()> {
		let present = self
			.filter
			.mark_rule_present(&self.policy.set_name, self.policy.fwmark)
			.await?;

		if present {
			debug!("mark rule already installed");
			return Ok(());
		}

		self
			.filter
			.install_mark_rule(&self.policy.set_name, self.policy.fwmark)
			.await?;
		info!("installed mark rule");
		Ok(())
	}

	/// Ensure the fwmark rule binds to the routing table and the table's
	/// default route points at the tunnel interface.
	#[instrument(skip(self), fields(mark = self.policy.fwmark, table = self.policy.table))]
	pub async fn install_routing_rule(&self) -> Result<()> {
		// The rule may not exist yet; removal failure is expected then.
		if let Err(e) = self
			.routing
			.remove_rule(self.policy.fwmark, self.policy.table)
			.await
		{
			debug!(error = %e, "no existing routing rule to remove");
		}

		self
			.routing
			.add_rule(self.policy.fwmark, self.policy.table)
			.await?;

		self
			.routing
			.set_default_route(self.policy.table, &self.policy.interface)
			.await?;

		debug!(interface = %self.policy.interface, "routing rule installed");
		Ok(())
	}

	/// Durably save the packet-filter rule set.
	#[instrument(skip(self))]
	pub async fn persist(&self) -> Result<()> {
		self.filter.persist().await?;
		Ok(())
	}
}
