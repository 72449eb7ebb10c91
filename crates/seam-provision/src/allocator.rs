// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The client address pool.
//!
//! Allocation is a pure scan over the configured range so the caller can
//! run it against a transactional snapshot of the taken addresses; the
//! repository's constraints catch any race the snapshot missed.

use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use crate::error::{ProvisionError, Result};

#[derive(Debug, Clone)]
pub struct AddressPool {
	range: Ipv4Net,
	gateway: Ipv4Addr,
}

impl AddressPool {
	pub fn new(range: Ipv4Net, gateway: Ipv4Addr) -> Result<Self> {
		if !range.contains(&gateway) {
			return Err(ProvisionError::InvalidAddress(format!(
				"gateway {gateway} is outside the client range {range}"
			)));
		}
		Ok(Self { range, gateway })
	}

	pub fn range(&self) -> Ipv4Net {
		self.range
	}

	pub fn gateway(&self) -> Ipv4Addr {
		self.gateway
	}

	/// First usable address not in `taken`, in ascending numeric order.
	/// Network, broadcast and the gateway address are never handed out.
	pub fn next_free(&self, taken: &BTreeSet<Ipv4Addr>) -> Option<Ipv4Addr> {
		self
			.range
			.hosts()
			.find(|addr| *addr != self.gateway && !taken.contains(addr))
	}

	/// Number of leasable addresses in the range.
	pub fn capacity(&self) -> usize {
		self.range.hosts().filter(|a| *a != self.gateway).count()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pool(range: &str, gateway: &str) -> AddressPool {
		AddressPool::new(range.parse().unwrap(), gateway.parse().unwrap()).unwrap()
	}

	fn taken(addrs: &[&str]) -> BTreeSet<Ipv4Addr> {
		addrs.iter().map(|a| a.parse().unwrap()).collect()
	}

	#[test]
	fn first_free_address_is_dot_two() {
		let pool = pool("10.66.66.0/24", "10.66.66.1");
		assert_eq!(
			pool.next_free(&BTreeSet::new()),
			Some("10.66.66.2".parse().unwrap())
		);
	}

	#[test]
	fn allocation_order_is_ascending() {
		let pool = pool("10.66.66.0/24", "10.66.66.1");
		assert_eq!(
			pool.next_free(&taken(&["10.66.66.2"])),
			Some("10.66.66.3".parse().unwrap())
		);
		assert_eq!(
			pool.next_free(&taken(&["10.66.66.2", "10.66.66.3"])),
			Some("10.66.66.4".parse().unwrap())
		);
	}

	#[test]
	fn freed_address_is_reused_when_lowest() {
		let pool = pool("10.66.66.0/24", "10.66.66.1");
		// .2 was freed while .3 and .4 stay held.
		assert_eq!(
			pool.next_free(&taken(&["10.66.66.3", "10.66.66.4"])),
			Some("10.66.66.2".parse().unwrap())
		);
	}

	#[test]
	fn gateway_is_never_allocated() {
		let pool = pool("10.66.66.0/30", "10.66.66.1");
		// Hosts of a /30 are .1 and .2; the gateway leaves only .2.
		assert_eq!(
			pool.next_free(&BTreeSet::new()),
			Some("10.66.66.2".parse().unwrap())
		);
		assert_eq!(pool.capacity(), 1);
	}

	#[test]
	fn exhausted_pool_returns_none() {
		let pool = pool("10.66.66.0/30", "10.66.66.1");
		assert_eq!(pool.next_free(&taken(&["10.66.66.2"])), None);
	}

	#[test]
	fn network_and_broadcast_are_excluded() {
		let pool = pool("10.66.66.0/24", "10.66.66.1");
		let mut all = BTreeSet::new();
		let mut next = pool.next_free(&all);
		while let Some(addr) = next {
			all.insert(addr);
			next = pool.next_free(&all);
		}
		assert!(!all.contains(&"10.66.66.0".parse().unwrap()));
		assert!(!all.contains(&"10.66.66.255".parse().unwrap()));
		assert!(!all.contains(&"10.66.66.1".parse().unwrap()));
		assert_eq!(all.len(), 253);
	}

	#[test]
	fn gateway_outside_range_is_rejected() {
		let result = AddressPool::new(
			"10.66.66.0/24".parse().unwrap(),
			"10.77.77.1".parse().unwrap(),
		);
		assert!(matches!(result, Err(ProvisionError::InvalidAddress(_))));
	}
}
