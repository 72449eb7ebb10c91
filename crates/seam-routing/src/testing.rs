// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory capability mocks shared by the routing tests.

use async_trait::async_trait;
use seam_common::CommandError;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::firewall::{PacketFilter, SetFamily};
use crate::routes::PolicyRouting;

fn command_failure(program: &str, stderr: &str) -> CommandError {
	CommandError::NonZero {
		program: program.to_string(),
		status: 1,
		stderr: stderr.to_string(),
	}
}

pub struct MockPacketFilter {
	sets: Mutex<HashMap<String, BTreeSet<IpAddr>>>,
	mark_rules: Mutex<Vec<(String, u32)>>,
	install_calls: AtomicUsize,
	persist_calls: AtomicUsize,
	fail_adds: Mutex<BTreeSet<IpAddr>>,
}

impl MockPacketFilter {
	pub fn new() -> Self {
		Self {
			sets: Mutex::new(HashMap::new()),
			mark_rules: Mutex::new(Vec::new()),
			install_calls: AtomicUsize::new(0),
			persist_calls: AtomicUsize::new(0),
			fail_adds: Mutex::new(BTreeSet::new()),
		}
	}

	pub fn set_exists(&self, name: &str) -> bool {
		self.sets.lock().unwrap().contains_key(name)
	}

	pub fn members(&self, name: &str) -> BTreeSet<IpAddr> {
		self
			.sets
			.lock()
			.unwrap()
			.get(name)
			.cloned()
			.unwrap_or_default()
	}

	pub fn fail_add_for(&self, addr: IpAddr) {
		self.fail_adds.lock().unwrap().insert(addr);
	}

	pub fn mark_rule_count(&self) -> usize {
		self.mark_rules.lock().unwrap().len()
	}

	pub fn install_call_count(&self) -> usize {
		self.install_calls.load(Ordering::SeqCst)
	}

	pub fn persist_call_count(&self) -> usize {
		self.persist_calls.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl PacketFilter for MockPacketFilter {
	async fn create_set(&self, name: &str, _family: SetFamily) -> Result<(), CommandError> {
		self
			.sets
			.lock()
			.unwrap()
			.entry(name.to_string())
			.or_default();
		Ok(())
	}

	async fn add_member(&self, name: &str, addr: IpAddr) -> Result<(), CommandError> {
		if self.fail_adds.lock().unwrap().contains(&addr) {
			return Err(command_failure("ipset", "simulated add failure"));
		}
		let mut sets = self.sets.lock().unwrap();
		let members = sets
			.get_mut(name)
			.ok_or_else(|| command_failure("ipset", "The set with the given name does not exist"))?;
		members.insert(addr);
		Ok(())
	}

	async fn list_members(
		&self,
		name: &str,
		_family: SetFamily,
	) -> Result<BTreeSet<IpAddr>, CommandError> {
		self
			.sets
			.lock()
			.unwrap()
			.get(name)
			.cloned()
			.ok_or_else(|| command_failure("ipset", "The set with the given name does not exist"))
	}

	async fn mark_rule_present(&self, set: &str, mark: u32) -> Result<bool, CommandError> {
		Ok(
			self
				.mark_rules
				.lock()
				.unwrap()
				.contains(&(set.to_string(), mark)),
		)
	}

	async fn install_mark_rule(&self, set: &str, mark: u32) -> Result<(), CommandError> {
		self.install_calls.fetch_add(1, Ordering::SeqCst);
		self.mark_rules.lock().unwrap().push((set.to_string(), mark));
		Ok(())
	}

	async fn persist(&self) -> Result<(), CommandError> {
		self.persist_calls.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

pub struct MockPolicyRouting {
	rules: Mutex<Vec<(u32, u32)>>,
	default_routes: Mutex<HashMap<u32, String>>,
}

impl MockPolicyRouting {
	pub fn new() -> Self {
		Self {
			rules: Mutex::new(Vec::new()),
			default_routes: Mutex::new(HashMap::new()),
		}
	}

	pub fn rules(&self) -> Vec<(u32, u32)> {
		self.rules.lock().unwrap().clone()
	}

	pub fn default_route(&self, table: u32) -> Option<String> {
		self.default_routes.lock().unwrap().get(&table).cloned()
	}
}

#[async_trait]
impl PolicyRouting for MockPolicyRouting {
	async fn add_rule(&self, mark: u32, table: u32) -> Result<(), CommandError> {
		self.rules.lock().unwrap().push((mark, table));
		Ok(())
	}

	async fn remove_rule(&self, mark: u32, table: u32) -> Result<(), CommandError> {
		let mut rules = self.rules.lock().unwrap();
		let before = rules.len();
		rules.retain(|r| *r != (mark, table));
		if rules.len() == before {
			return Err(command_failure("ip", "RTNETLINK answers: No such file or directory"));
		}
		Ok(())
	}

	async fn set_default_route(&self, table: u32, interface: &str) -> Result<(), CommandError> {
		self
			.default_routes
			.lock()
			.unwrap()
			.insert(table, interface.to_string());
		Ok(())
	}
}
