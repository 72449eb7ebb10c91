// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The provisioning façade consumed by the chat front-end.
//!
//! Combines the registry service, the profile generator and the tunnel
//! driver. Every failure kind the front-end must render (pool exhausted,
//! not found, storage unavailable) surfaces as a distinct
//! [`ProvisionError`] variant, never as an opaque crash.

use chrono::{DateTime, Utc};
use seam_common::TunnelPublicKey;
use serde::Serialize;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::clients::{Client, ClientService};
use crate::error::{ProvisionError, Result};
use crate::profile::ProfileGenerator;
use crate::tunnel::TunnelDriver;

/// Handshakes older than this are reported as offline.
const HANDSHAKE_FRESH_SECS: i64 = 180;

/// The rendered profile and the client facts the front-end shows with it.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileArtifact {
	pub identity: String,
	pub address: Ipv4Addr,
	pub public_key: TunnelPublicKey,
	pub config: String,
	pub qr_svg: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientStats {
	pub identity: String,
	pub address: Ipv4Addr,
	pub created_at: DateTime<Utc>,
	pub last_handshake_at: Option<DateTime<Utc>>,
	pub online: bool,
	pub rx_bytes: i64,
	pub tx_bytes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientSummary {
	pub identity: String,
	pub display_name: Option<String>,
	pub address: Ipv4Addr,
	pub active: bool,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PeerSyncReport {
	pub added: usize,
	pub removed: usize,
}

pub struct ProvisioningService {
	clients: ClientService,
	profiles: ProfileGenerator,
	driver: Arc<dyn TunnelDriver>,
}

impl ProvisioningService {
	pub fn new(
		clients: ClientService,
		profiles: ProfileGenerator,
		driver: Arc<dyn TunnelDriver>,
	) -> Self {
		Self {
			clients,
			profiles,
			driver,
		}
	}

	pub fn clients(&self) -> &ClientService {
		&self.clients
	}

	/// Get-or-create the client and render its profile. The peer is pushed
	/// to the tunnel driver best-effort; on failure the registry still wins
	/// and [`ProvisioningService::sync_tunnel_peers`] repairs the driver.
	#[instrument(skip(self), fields(%identity))]
	pub async fn get_or_create_profile(
		&self,
		identity: &str,
		display_name: Option<&str>,
	) -> Result<ProfileArtifact> {
		let (client, created) = self.clients.create_if_absent(identity, display_name).await?;

		if created {
			if let Err(e) = self.driver.add_peer(&client.public_key, client.address).await {
				warn!(error = %e, "failed to install peer on tunnel driver, will reconcile on next sync");
			}
		}

		let config = self.profiles.render(&client);
		let qr_svg = self.profiles.render_qr_svg(&config)?;

		Ok(ProfileArtifact {
			identity: client.identity,
			address: client.address,
			public_key: client.public_key,
			config,
			qr_svg,
		})
	}

	/// Stats for an active client, or [`ProvisionError::NotFound`].
	#[instrument(skip(self), fields(%identity))]
	pub async fn get_stats(&self, identity: &str) -> Result<ClientStats> {
		let client = self
			.clients
			.get(identity)
			.await?
			.filter(|c| c.active)
			.ok_or(ProvisionError::NotFound)?;

		let online = client
			.last_handshake_at
			.map(|at| (Utc::now() - at).num_seconds() < HANDSHAKE_FRESH_SECS)
			.unwrap_or(false);

		Ok(ClientStats {
			identity: client.identity,
			address: client.address,
			created_at: client.created_at,
			last_handshake_at: client.last_handshake_at,
			online,
			rx_bytes: client.rx_bytes,
			tx_bytes: client.tx_bytes,
		})
	}

	/// Deactivate the client. The live tunnel peer is left in place until
	/// the next [`ProvisioningService::sync_tunnel_peers`]; registry and
	/// driver are briefly inconsistent by design.
	#[instrument(skip(self), fields(%identity))]
	pub async fn revoke(&self, identity: &str) -> Result<()> {
		self.clients.deactivate(identity).await?;
		info!(%identity, "revoked; tunnel peer remains until next sync");
		Ok(())
	}

	/// Administrative listing, newest first.
	#[instrument(skip(self))]
	pub async fn list_all(&self) -> Result<Vec<ClientSummary>> {
		let clients = self.clients.list_all().await?;
		Ok(
			clients
				.into_iter()
				.map(|c| ClientSummary {
					identity: c.identity,
					display_name: c.display_name,
					address: c.address,
					active: c.active,
					created_at: c.created_at,
				})
				.collect(),
		)
	}

	/// Reconcile the driver's peer list with the registry: install peers
	/// for active clients the driver is missing, drop peers whose clients
	/// were revoked.
	#[instrument(skip(self))]
	pub async fn sync_tunnel_peers(&self) -> Result<PeerSyncReport> {
		let live: BTreeSet<TunnelPublicKey> = self.driver.list_peers().await?.into_iter().collect();

		let mut report = PeerSyncReport::default();
		let mut active_keys = BTreeSet::new();

		for client in self.clients.list_active().await? {
			active_keys.insert(client.public_key);
			if !live.contains(&client.public_key) {
				self.driver.add_peer(&client.public_key, client.address).await?;
				report.added += 1;
			}
		}

		for stale in live.difference(&active_keys) {
			self.driver.remove_peer(stale).await?;
			report.removed += 1;
		}

		info!(added = report.added, removed = report.removed, "tunnel peers synced");
		Ok(report)
	}

	/// Pull handshake times and transfer counters from the driver into the
	/// registry. Returns the number of clients with a fresh handshake.
	#[instrument(skip(self))]
	pub async fn sync_stats(&self) -> Result<usize> {
		let repo = self.clients.repository();

		let mut updated = 0;
		for (key, handshake) in self.driver.latest_handshakes().await? {
			if let Some(at) = handshake {
				updated += repo
					.update_handshake(&key.to_base64(), &at.to_rfc3339())
					.await? as usize;
			}
		}

		for (key, rx_bytes, tx_bytes) in self.driver.transfer().await? {
			repo
				.update_transfer(&key.to_base64(), rx_bytes, tx_bytes)
				.await?;
		}

		Ok(updated)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::allocator::AddressPool;
	use async_trait::async_trait;
	use seam_common::{CommandError, ServerIdentity, TunnelKeyPair};
	use seam_db::testing::create_test_pool;
	use seam_db::ClientRepository;
	use std::collections::BTreeMap;
	use std::sync::Mutex;

	#[derive(Default)]
	struct MockTunnelDriver {
		peers: Mutex<BTreeMap<TunnelPublicKey, Ipv4Addr>>,
		handshakes: Mutex<Vec<(TunnelPublicKey, Option<DateTime<Utc>>)>>,
		transfers: Mutex<Vec<(TunnelPublicKey, i64, i64)>>,
		fail_adds: Mutex<bool>,
	}

	impl MockTunnelDriver {
		fn peer_count(&self) -> usize {
			self.peers.lock().unwrap().len()
		}

		fn has_peer(&self, key: &TunnelPublicKey) -> bool {
			self.peers.lock().unwrap().contains_key(key)
		}

		fn fail_adds(&self) {
			*self.fail_adds.lock().unwrap() = true;
		}
	}

	#[async_trait]
	impl TunnelDriver for MockTunnelDriver {
		async fn add_peer(
			&self,
			public_key: &TunnelPublicKey,
			address: Ipv4Addr,
		) -> std::result::Result<(), CommandError> {
			if *self.fail_adds.lock().unwrap() {
				return Err(CommandError::NonZero {
					program: "wg".to_string(),
					status: 1,
					stderr: "simulated failure".to_string(),
				});
			}
			self.peers.lock().unwrap().insert(*public_key, address);
			Ok(())
		}

		async fn remove_peer(&self, public_key: &TunnelPublicKey) -> std::result::Result<(), CommandError> {
			self.peers.lock().unwrap().remove(public_key);
			Ok(())
		}

		async fn list_peers(&self) -> std::result::Result<Vec<TunnelPublicKey>, CommandError> {
			Ok(self.peers.lock().unwrap().keys().copied().collect())
		}

		async fn latest_handshakes(
			&self,
		) -> std::result::Result<Vec<(TunnelPublicKey, Option<DateTime<Utc>>)>, CommandError> {
			Ok(self.handshakes.lock().unwrap().clone())
		}

		async fn transfer(&self) -> std::result::Result<Vec<(TunnelPublicKey, i64, i64)>, CommandError> {
			Ok(self.transfers.lock().unwrap().clone())
		}
	}

	async fn service_with_driver() -> (ProvisioningService, Arc<MockTunnelDriver>) {
		let pool = create_test_pool().await;
		let repo = ClientRepository::new(pool);
		let address_pool = AddressPool::new(
			"10.66.66.0/24".parse().unwrap(),
			"10.66.66.1".parse().unwrap(),
		)
		.unwrap();
		let clients = ClientService::new(repo, address_pool);

		let server_key = TunnelKeyPair::generate();
		let server =
			ServerIdentity::new(*server_key.public_key(), "vpn.example.com:51820").unwrap();
		let profiles = ProfileGenerator::new(server, vec!["1.1.1.1".parse().unwrap()], 25);

		let driver = Arc::new(MockTunnelDriver::default());
		let service = ProvisioningService::new(clients, profiles, driver.clone());
		(service, driver)
	}

	#[tokio::test]
	async fn profile_is_stable_across_requests() {
		let (service, _) = service_with_driver().await;

		let first = service
			.get_or_create_profile("user-42", Some("alice"))
			.await
			.unwrap();
		let second = service
			.get_or_create_profile("user-42", Some("alice"))
			.await
			.unwrap();

		assert_eq!(first.address, second.address);
		assert_eq!(first.public_key, second.public_key);
		assert_eq!(first.config, second.config);
	}

	#[tokio::test]
	async fn provisioning_installs_the_peer() {
		let (service, driver) = service_with_driver().await;

		let artifact = service.get_or_create_profile("user-1", None).await.unwrap();
		assert!(driver.has_peer(&artifact.public_key));
		assert_eq!(driver.peer_count(), 1);

		// The repeated request must not install a second peer.
		service.get_or_create_profile("user-1", None).await.unwrap();
		assert_eq!(driver.peer_count(), 1);
	}

	#[tokio::test]
	async fn driver_failure_does_not_fail_provisioning() {
		let (service, driver) = service_with_driver().await;
		driver.fail_adds();

		let artifact = service.get_or_create_profile("user-1", None).await.unwrap();
		assert_eq!(artifact.address, "10.66.66.2".parse::<Ipv4Addr>().unwrap());
		assert_eq!(driver.peer_count(), 0);
	}

	#[tokio::test]
	async fn stats_for_unknown_identity_is_not_found() {
		let (service, _) = service_with_driver().await;

		let err = service.get_stats("nobody").await.unwrap_err();
		assert!(matches!(err, ProvisionError::NotFound));
	}

	#[tokio::test]
	async fn stats_for_revoked_client_is_not_found() {
		let (service, _) = service_with_driver().await;

		service.get_or_create_profile("user-1", None).await.unwrap();
		service.revoke("user-1").await.unwrap();

		let err = service.get_stats("user-1").await.unwrap_err();
		assert!(matches!(err, ProvisionError::NotFound));
	}

	#[tokio::test]
	async fn revoke_unknown_identity_is_not_found() {
		let (service, _) = service_with_driver().await;

		let err = service.revoke("nobody").await.unwrap_err();
		assert!(matches!(err, ProvisionError::NotFound));
	}

	#[tokio::test]
	async fn sync_removes_revoked_peers_and_installs_missing_ones() {
		let (service, driver) = service_with_driver().await;

		let revoked = service.get_or_create_profile("user-1", None).await.unwrap();
		service.get_or_create_profile("user-2", None).await.unwrap();
		service.revoke("user-1").await.unwrap();

		// Simulate a driver restart that lost user-2's peer.
		let user2 = service.clients().get("user-2").await.unwrap().unwrap();
		driver.remove_peer(&user2.public_key).await.unwrap();

		let report = service.sync_tunnel_peers().await.unwrap();
		assert_eq!(report.added, 1);
		assert_eq!(report.removed, 1);
		assert!(driver.has_peer(&user2.public_key));
		assert!(!driver.has_peer(&revoked.public_key));
	}

	#[tokio::test]
	async fn sync_stats_updates_handshake_and_counters() {
		let (service, driver) = service_with_driver().await;

		let artifact = service.get_or_create_profile("user-1", None).await.unwrap();
		let handshake = DateTime::from_timestamp(1754000000, 0).unwrap();
		driver
			.handshakes
			.lock()
			.unwrap()
			.push((artifact.public_key, Some(handshake)));
		driver
			.transfers
			.lock()
			.unwrap()
			.push((artifact.public_key, 1000, 2000));

		let updated = service.sync_stats().await.unwrap();
		assert_eq!(updated, 1);

		// The handshake is old, so the client reads as offline.
		let stats = service.get_stats("user-1").await.unwrap();
		assert_eq!(stats.last_handshake_at, Some(handshake));
		assert!(!stats.online);
		assert_eq!(stats.rx_bytes, 1000);
		assert_eq!(stats.tx_bytes, 2000);
	}

	#[tokio::test]
	async fn fresh_handshake_reads_online() {
		let (service, driver) = service_with_driver().await;

		let artifact = service.get_or_create_profile("user-1", None).await.unwrap();
		driver
			.handshakes
			.lock()
			.unwrap()
			.push((artifact.public_key, Some(Utc::now())));

		service.sync_stats().await.unwrap();

		let stats = service.get_stats("user-1").await.unwrap();
		assert!(stats.online);
	}
}
