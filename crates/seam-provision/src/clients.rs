// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The client domain model and registry service.
//!
//! `create_if_absent` is the only write path that allocates: the existence
//! check, free-address scan, key generation and insert run inside one
//! transaction, so no partial client is ever written and two concurrent
//! requests for the same identity resolve to one committed row.

use chrono::{DateTime, Utc};
use seam_common::{TunnelKeyPair, TunnelPrivateKey, TunnelPublicKey};
use seam_db::{ClientRepository, ClientRowTuple, NewClientRow};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::allocator::AddressPool;
use crate::error::{ProvisionError, Result};

#[derive(Debug, Clone)]
pub struct Client {
	pub id: Uuid,
	pub identity: String,
	pub display_name: Option<String>,
	pub private_key: TunnelPrivateKey,
	pub public_key: TunnelPublicKey,
	pub address: Ipv4Addr,
	pub active: bool,
	pub created_at: DateTime<Utc>,
	pub last_handshake_at: Option<DateTime<Utc>>,
	pub rx_bytes: i64,
	pub tx_bytes: i64,
}

impl TryFrom<ClientRowTuple> for Client {
	type Error = ProvisionError;

	fn try_from(row: ClientRowTuple) -> Result<Self> {
		let (
			id,
			identity,
			display_name,
			private_key,
			public_key,
			address,
			active,
			created_at,
			last_handshake_at,
			rx_bytes,
			tx_bytes,
		) = row;

		Ok(Client {
			id: id
				.parse()
				.map_err(|_| ProvisionError::Internal("invalid client id".to_string()))?,
			identity,
			display_name,
			private_key: TunnelPrivateKey::from_base64(&private_key)?,
			public_key: TunnelPublicKey::from_base64(&public_key)?,
			address: address
				.parse()
				.map_err(|_| ProvisionError::InvalidAddress(address))?,
			active: active != 0,
			created_at: parse_datetime(&created_at)?,
			last_handshake_at: last_handshake_at
				.as_ref()
				.map(|s| parse_datetime(s))
				.transpose()?,
			rx_bytes,
			tx_bytes,
		})
	}
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(s)
		.map(|dt| dt.with_timezone(&Utc))
		.or_else(|_| {
			chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
				.map(|ndt| ndt.and_utc())
				.map_err(|_| ProvisionError::Internal(format!("invalid datetime: {s}")))
		})
}

/// Registry service: durable CRUD over clients keyed by external identity.
#[derive(Clone)]
pub struct ClientService {
	repo: ClientRepository,
	pool: AddressPool,
}

impl ClientService {
	pub fn new(repo: ClientRepository, pool: AddressPool) -> Self {
		Self { repo, pool }
	}

	/// Get-or-create. Returns the client and whether it was created by this
	/// call. A second call for the same identity returns the existing row
	/// unchanged: same address, same key pair, no second address consumed.
	#[instrument(skip(self), fields(%identity))]
	pub async fn create_if_absent(
		&self,
		identity: &str,
		display_name: Option<&str>,
	) -> Result<(Client, bool)> {
		if let Some(row) = self.repo.get_by_identity(identity).await? {
			return Ok((Client::try_from(row)?, false));
		}

		let keypair = TunnelKeyPair::generate();
		let id = Uuid::new_v4();

		let mut tx = self.repo.begin().await?;

		// Re-check inside the transaction: another request may have
		// committed between the fast path above and here.
		if let Some(row) = ClientRepository::get_by_identity_conn(&mut tx, identity).await? {
			return Ok((Client::try_from(row)?, false));
		}

		let taken: BTreeSet<Ipv4Addr> = ClientRepository::active_addresses_conn(&mut tx)
			.await?
			.iter()
			.filter_map(|s| s.parse().ok())
			.collect();

		let address = self
			.pool
			.next_free(&taken)
			.ok_or(ProvisionError::PoolExhausted)?;

		let private_b64 = keypair.private_key().to_base64();
		let public_b64 = keypair.public_key().to_base64();
		let address_str = address.to_string();

		let insert = ClientRepository::insert_client_conn(
			&mut tx,
			NewClientRow {
				id,
				identity,
				display_name,
				private_key: private_b64.expose(),
				public_key: &public_b64,
				address: &address_str,
			},
		)
		.await;

		match insert {
			Ok(()) => {
				tx.commit().await.map_err(seam_db::DbError::from)?;
			}
			Err(e) if e.is_unique_violation() => {
				// Lost the race to a concurrent request; return the winner's
				// committed row.
				drop(tx);
				let row = self
					.repo
					.get_by_identity(identity)
					.await?
					.ok_or_else(|| ProvisionError::Internal("conflicting row vanished".to_string()))?;
				return Ok((Client::try_from(row)?, false));
			}
			Err(e) => return Err(e.into()),
		}

		info!(%identity, %address, "provisioned new client");

		let row = self
			.repo
			.get_by_identity(identity)
			.await?
			.ok_or_else(|| ProvisionError::Internal("committed row vanished".to_string()))?;
		Ok((Client::try_from(row)?, true))
	}

	#[instrument(skip(self), fields(%identity))]
	pub async fn get(&self, identity: &str) -> Result<Option<Client>> {
		match self.repo.get_by_identity(identity).await? {
			Some(row) => Ok(Some(Client::try_from(row)?)),
			None => Ok(None),
		}
	}

	/// Soft-delete: clears the active flag, keeps the row for audit, frees
	/// the address for reuse.
	#[instrument(skip(self), fields(%identity))]
	pub async fn deactivate(&self, identity: &str) -> Result<()> {
		let affected = self.repo.deactivate(identity).await?;
		if affected == 0 {
			return Err(ProvisionError::NotFound);
		}
		info!(%identity, "client deactivated");
		Ok(())
	}

	pub async fn list_active(&self) -> Result<Vec<Client>> {
		self
			.repo
			.list_active()
			.await?
			.into_iter()
			.map(Client::try_from)
			.collect()
	}

	pub async fn list_all(&self) -> Result<Vec<Client>> {
		self
			.repo
			.list_all()
			.await?
			.into_iter()
			.map(Client::try_from)
			.collect()
	}

	pub fn repository(&self) -> &ClientRepository {
		&self.repo
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use seam_db::testing::create_test_pool;

	async fn service(range: &str) -> ClientService {
		let pool = create_test_pool().await;
		let repo = ClientRepository::new(pool);
		let address_pool =
			AddressPool::new(range.parse().unwrap(), "10.66.66.1".parse().unwrap()).unwrap();
		ClientService::new(repo, address_pool)
	}

	#[tokio::test]
	async fn allocation_order_is_deterministic() {
		let service = service("10.66.66.0/24").await;

		let (first, created) = service.create_if_absent("user-1", None).await.unwrap();
		assert!(created);
		assert_eq!(first.address, "10.66.66.2".parse::<Ipv4Addr>().unwrap());

		let (second, created) = service.create_if_absent("user-2", None).await.unwrap();
		assert!(created);
		assert_eq!(second.address, "10.66.66.3".parse::<Ipv4Addr>().unwrap());
	}

	#[tokio::test]
	async fn create_if_absent_is_idempotent() {
		let service = service("10.66.66.0/24").await;

		let (first, created_first) = service
			.create_if_absent("user-42", Some("alice"))
			.await
			.unwrap();
		let (second, created_second) = service
			.create_if_absent("user-42", Some("alice"))
			.await
			.unwrap();

		assert!(created_first);
		assert!(!created_second);
		assert_eq!(first.address, second.address);
		assert_eq!(first.public_key, second.public_key);

		// No second address was consumed.
		let (third, _) = service.create_if_absent("user-43", None).await.unwrap();
		assert_eq!(third.address, "10.66.66.3".parse::<Ipv4Addr>().unwrap());
	}

	#[tokio::test]
	async fn active_addresses_are_pairwise_disjoint() {
		let service = service("10.66.66.0/24").await;

		let mut addresses = BTreeSet::new();
		for i in 0..5 {
			let (client, _) = service
				.create_if_absent(&format!("user-{i}"), None)
				.await
				.unwrap();
			assert!(addresses.insert(client.address), "duplicate address");
		}
	}

	#[tokio::test]
	async fn exhausted_pool_is_a_typed_error_and_writes_no_row() {
		// /30 with gateway .1 leaves exactly one usable address.
		let service = service("10.66.66.0/30").await;

		let (only, _) = service.create_if_absent("user-1", None).await.unwrap();
		assert_eq!(only.address, "10.66.66.2".parse::<Ipv4Addr>().unwrap());

		let err = service.create_if_absent("user-2", None).await.unwrap_err();
		assert!(matches!(err, ProvisionError::PoolExhausted));

		assert_eq!(service.list_all().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn revocation_frees_the_address_for_reuse() {
		let service = service("10.66.66.0/24").await;

		let (revoked, _) = service.create_if_absent("user-42", None).await.unwrap();
		service.create_if_absent("user-43", None).await.unwrap();

		service.deactivate("user-42").await.unwrap();

		// user-42's former .2 is now the lowest free address.
		let (fresh, _) = service.create_if_absent("user-44", None).await.unwrap();
		assert_eq!(fresh.address, revoked.address);
	}

	#[tokio::test]
	async fn deactivate_unknown_identity_is_not_found() {
		let service = service("10.66.66.0/24").await;

		let err = service.deactivate("nobody").await.unwrap_err();
		assert!(matches!(err, ProvisionError::NotFound));
	}

	#[tokio::test]
	async fn deactivated_row_is_returned_unchanged() {
		let service = service("10.66.66.0/24").await;

		let (before, _) = service.create_if_absent("user-1", None).await.unwrap();
		service.deactivate("user-1").await.unwrap();

		let (after, created) = service.create_if_absent("user-1", None).await.unwrap();
		assert!(!created);
		assert!(!after.active);
		assert_eq!(after.public_key, before.public_key);
	}

	#[tokio::test]
	async fn round_trip_preserves_key_material() {
		let service = service("10.66.66.0/24").await;

		let (client, _) = service.create_if_absent("user-1", None).await.unwrap();
		let reread = service.get("user-1").await.unwrap().unwrap();

		assert_eq!(
			client.private_key.to_base64().expose(),
			reread.private_key.to_base64().expose()
		);
		assert_eq!(client.public_key, reread.public_key);
		assert_eq!(reread.private_key.public_key(), reread.public_key);
	}
}
