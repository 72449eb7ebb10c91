// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The routing daemon: a two-state convergence loop.
//!
//! Idle until the interval elapses (or a manual trigger fires), then run one
//! resolve → policy-set → controller pass. A failed cycle is logged and
//! retried after a shorter back-off; only the shutdown signal is terminal,
//! and it takes effect at tick boundaries so an in-flight pass always runs
//! to completion.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tracing::{info, instrument, warn};

use crate::controller::RouteController;
use crate::error::Result;
use crate::policy_set::PolicySet;
use crate::resolver::{resolve_union, Resolve};

#[derive(Debug, Clone, Copy)]
pub struct CycleOutcome {
	pub resolved: usize,
	pub added: usize,
}

pub struct RoutingDaemon {
	domains: Vec<String>,
	resolver: Arc<dyn Resolve>,
	policy_set: PolicySet,
	controller: RouteController,
	interval: Duration,
	backoff: Duration,
	shutdown_tx: watch::Sender<bool>,
	shutdown_rx: watch::Receiver<bool>,
	trigger: Arc<Notify>,
}

impl RoutingDaemon {
	pub fn new(
		domains: Vec<String>,
		resolver: Arc<dyn Resolve>,
		policy_set: PolicySet,
		controller: RouteController,
		interval: Duration,
		backoff: Duration,
	) -> Self {
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		Self {
			domains,
			resolver,
			policy_set,
			controller,
			interval,
			backoff,
			shutdown_tx,
			shutdown_rx,
			trigger: Arc::new(Notify::new()),
		}
	}

	/// Sender half of the shutdown signal, for the hosting process.
	pub fn shutdown_sender(&self) -> watch::Sender<bool> {
		self.shutdown_tx.clone()
	}

	/// Handle that forces an immediate convergence pass at the next tick.
	pub fn trigger_handle(&self) -> Arc<Notify> {
		Arc::clone(&self.trigger)
	}

	/// One full convergence pass. Initialization is repeated every pass so
	/// the daemon recovers from a flushed kernel state.
	#[instrument(skip(self), fields(domains = self.domains.len()))]
	pub async fn converge_once(&self) -> Result<CycleOutcome> {
		let started = Instant::now();

		self.policy_set.initialize().await?;

		let resolved: BTreeSet<IpAddr> = resolve_union(self.resolver.as_ref(), &self.domains).await;
		let added = self.policy_set.converge(&resolved).await?;

		self.controller.install_mark_rule().await?;
		self.controller.install_routing_rule().await?;
		self.controller.persist().await?;

		info!(
			resolved = resolved.len(),
			added,
			elapsed_ms = started.elapsed().as_millis() as u64,
			"convergence cycle complete"
		);

		Ok(CycleOutcome {
			resolved: resolved.len(),
			added,
		})
	}

	/// Run until shutdown. Never returns early on a cycle failure.
	pub async fn run(&self) {
		let mut shutdown_rx = self.shutdown_rx.clone();

		info!(
			interval_secs = self.interval.as_secs(),
			backoff_secs = self.backoff.as_secs(),
			"routing daemon started"
		);

		loop {
			if *shutdown_rx.borrow() {
				break;
			}

			let wait = match self.converge_once().await {
				Ok(_) => self.interval,
				Err(e) => {
					warn!(
						error = %e,
						backoff_secs = self.backoff.as_secs(),
						"convergence cycle failed, backing off"
					);
					self.backoff
				}
			};

			tokio::select! {
				biased;

				_ = shutdown_rx.changed() => {
					if *shutdown_rx.borrow() {
						info!("shutdown signal received");
						break;
					}
				}

				_ = self.trigger.notified() => {
					info!("manual convergence triggered");
				}

				_ = tokio::time::sleep(wait) => {}
			}
		}

		info!("routing daemon stopped");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::policy::RoutingPolicy;
	use crate::resolver::ResolveError;
	use crate::testing::{MockPacketFilter, MockPolicyRouting};
	use async_trait::async_trait;
	use std::collections::HashMap;

	struct MockResolver {
		answers: HashMap<String, Vec<IpAddr>>,
	}

	#[async_trait]
	impl Resolve for MockResolver {
		async fn lookup(&self, domain: &str) -> std::result::Result<Vec<IpAddr>, ResolveError> {
			self
				.answers
				.get(domain)
				.cloned()
				.ok_or_else(|| ResolveError::Lookup(format!("no records for {domain}")))
		}
	}

	fn policy() -> RoutingPolicy {
		RoutingPolicy {
			set_name: "seam-split".to_string(),
			fwmark: 51820,
			table: 51820,
			interface: "wg0".to_string(),
		}
	}

	fn daemon(
		domains: &[&str],
		answers: HashMap<String, Vec<IpAddr>>,
		filter: Arc<MockPacketFilter>,
		routing: Arc<MockPolicyRouting>,
	) -> RoutingDaemon {
		let resolver = Arc::new(MockResolver { answers });
		let policy_set = PolicySet::new("seam-split", filter.clone());
		let controller = RouteController::new(policy(), filter, routing);
		RoutingDaemon::new(
			domains.iter().map(|s| s.to_string()).collect(),
			resolver,
			policy_set,
			controller,
			Duration::from_secs(3600),
			Duration::from_secs(300),
		)
	}

	#[tokio::test]
	async fn converge_once_resolves_and_installs() {
		let filter = Arc::new(MockPacketFilter::new());
		let routing = Arc::new(MockPolicyRouting::new());
		let mut answers = HashMap::new();
		answers.insert(
			"a.example.com".to_string(),
			vec!["192.0.2.1".parse().unwrap()],
		);

		let daemon = daemon(&["a.example.com"], answers, filter.clone(), routing.clone());
		let outcome = daemon.converge_once().await.unwrap();

		assert_eq!(outcome.resolved, 1);
		assert_eq!(outcome.added, 1);
		assert_eq!(filter.mark_rule_count(), 1);
		assert_eq!(routing.rules(), vec![(51820, 51820)]);
		assert_eq!(routing.default_route(51820).as_deref(), Some("wg0"));
		assert_eq!(filter.persist_call_count(), 1);
	}

	#[tokio::test]
	async fn converging_twice_is_idempotent() {
		let filter = Arc::new(MockPacketFilter::new());
		let routing = Arc::new(MockPolicyRouting::new());
		let mut answers = HashMap::new();
		answers.insert(
			"a.example.com".to_string(),
			vec!["192.0.2.1".parse().unwrap(), "192.0.2.2".parse().unwrap()],
		);

		let daemon = daemon(&["a.example.com"], answers, filter.clone(), routing.clone());

		let first = daemon.converge_once().await.unwrap();
		let second = daemon.converge_once().await.unwrap();

		assert_eq!(first.added, 2);
		assert_eq!(second.added, 0);
		assert_eq!(filter.members("seam-split").len(), 2);
		assert_eq!(filter.mark_rule_count(), 1);
		assert_eq!(routing.rules().len(), 1);
	}

	#[tokio::test]
	async fn failed_domain_still_contributes_the_others() {
		let filter = Arc::new(MockPacketFilter::new());
		let routing = Arc::new(MockPolicyRouting::new());
		let mut answers = HashMap::new();
		answers.insert(
			"good.example.com".to_string(),
			vec!["192.0.2.1".parse().unwrap()],
		);
		// broken.example.com has no answer and fails to resolve.

		let daemon = daemon(
			&["broken.example.com", "good.example.com"],
			answers,
			filter.clone(),
			routing,
		);
		let outcome = daemon.converge_once().await.unwrap();

		assert_eq!(outcome.resolved, 1);
		assert!(filter
			.members("seam-split")
			.contains(&"192.0.2.1".parse::<IpAddr>().unwrap()));
	}

	#[tokio::test]
	async fn run_exits_on_shutdown_signal() {
		let filter = Arc::new(MockPacketFilter::new());
		let routing = Arc::new(MockPolicyRouting::new());
		let daemon = daemon(&[], HashMap::new(), filter, routing);

		let shutdown = daemon.shutdown_sender();
		shutdown.send(true).unwrap();

		// With the signal already set, run() completes after at most one
		// cycle rather than sleeping out the interval.
		tokio::time::timeout(Duration::from_secs(5), daemon.run())
			.await
			.expect("daemon did not stop on shutdown");
	}

	#[tokio::test]
	async fn manual_trigger_forces_an_extra_cycle() {
		let filter = Arc::new(MockPacketFilter::new());
		let routing = Arc::new(MockPolicyRouting::new());
		let mut answers = HashMap::new();
		answers.insert(
			"a.example.com".to_string(),
			vec!["192.0.2.1".parse().unwrap()],
		);

		let daemon = daemon(&["a.example.com"], answers, filter.clone(), routing);
		let trigger = daemon.trigger_handle();
		let shutdown = daemon.shutdown_sender();
		let handle = tokio::spawn(async move { daemon.run().await });

		wait_for(|| filter.persist_call_count() >= 1).await;

		// The interval is an hour out; only the trigger can start another
		// pass this quickly.
		trigger.notify_one();
		wait_for(|| filter.persist_call_count() >= 2).await;

		shutdown.send(true).unwrap();
		handle.await.unwrap();
	}

	async fn wait_for(mut condition: impl FnMut() -> bool) {
		for _ in 0..500 {
			if condition() {
				return;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		panic!("condition not reached in time");
	}

	#[tokio::test]
	async fn cycle_failure_leaves_partial_state_in_place() {
		let filter = Arc::new(MockPacketFilter::new());
		let routing = Arc::new(MockPolicyRouting::new());
		let mut answers = HashMap::new();
		answers.insert(
			"a.example.com".to_string(),
			vec!["192.0.2.1".parse().unwrap(), "192.0.2.9".parse().unwrap()],
		);
		filter.fail_add_for("192.0.2.9".parse().unwrap());

		let daemon = daemon(&["a.example.com"], answers, filter.clone(), routing);
		let outcome = daemon.converge_once().await.unwrap();

		// The failing member is skipped, the rest of the pass completes.
		assert_eq!(outcome.added, 1);
		assert_eq!(filter.mark_rule_count(), 1);
	}
}
