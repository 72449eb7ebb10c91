// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Domain resolution for the tracked domain list.
//!
//! Each convergence cycle re-resolves every domain from scratch. A lookup
//! failure is absorbed at that domain's granularity and never aborts the
//! rest of the cycle.

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::collections::BTreeSet;
use std::net::IpAddr;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::RoutingError;

#[derive(Debug, Error)]
pub enum ResolveError {
	#[error("lookup failed: {0}")]
	Lookup(String),
}

#[async_trait]
pub trait Resolve: Send + Sync {
	/// All A and AAAA addresses currently advertised for `domain`.
	async fn lookup(&self, domain: &str) -> Result<Vec<IpAddr>, ResolveError>;
}

/// DNS-backed resolver over the system configuration.
pub struct DomainResolver {
	resolver: TokioAsyncResolver,
}

impl DomainResolver {
	pub fn from_system_conf() -> Result<Self, RoutingError> {
		let resolver = TokioAsyncResolver::tokio_from_system_conf()
			.map_err(|e| RoutingError::Resolver(e.to_string()))?;
		Ok(Self { resolver })
	}

	pub fn cloudflare() -> Self {
		Self {
			resolver: TokioAsyncResolver::tokio(ResolverConfig::cloudflare(), ResolverOpts::default()),
		}
	}
}

#[async_trait]
impl Resolve for DomainResolver {
	async fn lookup(&self, domain: &str) -> Result<Vec<IpAddr>, ResolveError> {
		let lookup = self
			.resolver
			.lookup_ip(domain)
			.await
			.map_err(|e| ResolveError::Lookup(e.to_string()))?;

		Ok(lookup.iter().collect())
	}
}

/// Resolve every domain and return the deduplicated union of addresses.
/// Per-domain failures are logged and skipped.
pub async fn resolve_union(resolver: &dyn Resolve, domains: &[String]) -> BTreeSet<IpAddr> {
	let mut union = BTreeSet::new();

	for domain in domains {
		match resolver.lookup(domain).await {
			Ok(addresses) => {
				debug!(%domain, count = addresses.len(), "resolved domain");
				union.extend(addresses);
			}
			Err(e) => {
				warn!(%domain, error = %e, "domain resolution failed, skipping");
			}
		}
	}

	union
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	struct MockResolver {
		answers: HashMap<String, Vec<IpAddr>>,
	}

	#[async_trait]
	impl Resolve for MockResolver {
		async fn lookup(&self, domain: &str) -> Result<Vec<IpAddr>, ResolveError> {
			self
				.answers
				.get(domain)
				.cloned()
				.ok_or_else(|| ResolveError::Lookup(format!("no records for {domain}")))
		}
	}

	fn domains(names: &[&str]) -> Vec<String> {
		names.iter().map(|s| s.to_string()).collect()
	}

	#[tokio::test]
	async fn union_is_deduplicated_across_domains() {
		let shared: IpAddr = "192.0.2.1".parse().unwrap();
		let mut answers = HashMap::new();
		answers.insert("a.example.com".to_string(), vec![shared]);
		answers.insert(
			"b.example.com".to_string(),
			vec![shared, "192.0.2.2".parse().unwrap()],
		);
		let resolver = MockResolver { answers };

		let union =
			resolve_union(&resolver, &domains(&["a.example.com", "b.example.com"])).await;
		assert_eq!(union.len(), 2);
	}

	#[tokio::test]
	async fn failed_domain_does_not_affect_others() {
		let mut answers = HashMap::new();
		answers.insert(
			"good.example.com".to_string(),
			vec!["192.0.2.1".parse().unwrap(), "2001:db8::1".parse().unwrap()],
		);
		let resolver = MockResolver { answers };

		let union = resolve_union(
			&resolver,
			&domains(&["broken.example.com", "good.example.com"]),
		)
		.await;

		assert_eq!(union.len(), 2);
		assert!(union.contains(&"192.0.2.1".parse::<IpAddr>().unwrap()));
		assert!(union.contains(&"2001:db8::1".parse::<IpAddr>().unwrap()));
	}

	#[tokio::test]
	async fn all_domains_failing_yields_empty_union() {
		let resolver = MockResolver {
			answers: HashMap::new(),
		};

		let union = resolve_union(&resolver, &domains(&["a.example.com"])).await;
		assert!(union.is_empty());
	}
}
