// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client registry repository.
//!
//! Rows are returned as tuples; the provisioning crate owns the domain
//! conversion. Allocation-sensitive reads and the insert have
//! connection-level variants so the caller can run the whole
//! scan-then-insert sequence inside one transaction.

use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use uuid::Uuid;

use crate::error::DbError;

pub type ClientRowTuple = (
	String,         // id
	String,         // identity
	Option<String>, // display_name
	String,         // private_key
	String,         // public_key
	String,         // address
	i64,            // active
	String,         // created_at
	Option<String>, // last_handshake_at
	i64,            // rx_bytes
	i64,            // tx_bytes
);

const CLIENT_COLUMNS: &str = "id, identity, display_name, private_key, public_key, address, \
	 active, created_at, last_handshake_at, rx_bytes, tx_bytes";

/// Insert payload for a freshly provisioned client.
#[derive(Debug)]
pub struct NewClientRow<'a> {
	pub id: Uuid,
	pub identity: &'a str,
	pub display_name: Option<&'a str>,
	pub private_key: &'a str,
	pub public_key: &'a str,
	pub address: &'a str,
}

/// Repository for client registry database operations.
#[derive(Clone)]
pub struct ClientRepository {
	pool: SqlitePool,
}

impl ClientRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Begin a write transaction for the allocation sequence.
	pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, DbError> {
		Ok(self.pool.begin().await?)
	}

	#[tracing::instrument(skip(self), fields(%identity))]
	pub async fn get_by_identity(&self, identity: &str) -> Result<Option<ClientRowTuple>, DbError> {
		let row: Option<ClientRowTuple> = sqlx::query_as(&format!(
			"SELECT {CLIENT_COLUMNS} FROM clients WHERE identity = ?"
		))
		.bind(identity)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row)
	}

	pub async fn get_by_identity_conn(
		conn: &mut SqliteConnection,
		identity: &str,
	) -> Result<Option<ClientRowTuple>, DbError> {
		let row: Option<ClientRowTuple> = sqlx::query_as(&format!(
			"SELECT {CLIENT_COLUMNS} FROM clients WHERE identity = ?"
		))
		.bind(identity)
		.fetch_optional(conn)
		.await?;

		Ok(row)
	}

	/// Addresses currently held by active clients. Run on the allocation
	/// transaction's connection so the scan and the insert see one snapshot.
	pub async fn active_addresses_conn(
		conn: &mut SqliteConnection,
	) -> Result<Vec<String>, DbError> {
		let rows: Vec<(String,)> =
			sqlx::query_as("SELECT address FROM clients WHERE active = 1 ORDER BY address")
				.fetch_all(conn)
				.await?;

		Ok(rows.into_iter().map(|(address,)| address).collect())
	}

	pub async fn insert_client_conn(
		conn: &mut SqliteConnection,
		row: NewClientRow<'_>,
	) -> Result<(), DbError> {
		sqlx::query(
			"INSERT INTO clients (id, identity, display_name, private_key, public_key, address, active, created_at)
			 VALUES (?, ?, ?, ?, ?, ?, 1, datetime('now'))",
		)
		.bind(row.id.to_string())
		.bind(row.identity)
		.bind(row.display_name)
		.bind(row.private_key)
		.bind(row.public_key)
		.bind(row.address)
		.execute(conn)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self), fields(%identity))]
	pub async fn deactivate(&self, identity: &str) -> Result<u64, DbError> {
		let result = sqlx::query("UPDATE clients SET active = 0 WHERE identity = ? AND active = 1")
			.bind(identity)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_active(&self) -> Result<Vec<ClientRowTuple>, DbError> {
		let rows: Vec<ClientRowTuple> = sqlx::query_as(&format!(
			"SELECT {CLIENT_COLUMNS} FROM clients WHERE active = 1
			 ORDER BY created_at DESC"
		))
		.fetch_all(&self.pool)
		.await?;

		Ok(rows)
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_all(&self) -> Result<Vec<ClientRowTuple>, DbError> {
		let rows: Vec<ClientRowTuple> = sqlx::query_as(&format!(
			"SELECT {CLIENT_COLUMNS} FROM clients
			 ORDER BY created_at DESC"
		))
		.fetch_all(&self.pool)
		.await?;

		Ok(rows)
	}

	#[tracing::instrument(skip(self, public_key))]
	pub async fn update_handshake(
		&self,
		public_key: &str,
		handshake_at: &str,
	) -> Result<u64, DbError> {
		let result = sqlx::query("UPDATE clients SET last_handshake_at = ? WHERE public_key = ?")
			.bind(handshake_at)
			.bind(public_key)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}

	#[tracing::instrument(skip(self, public_key))]
	pub async fn update_transfer(
		&self,
		public_key: &str,
		rx_bytes: i64,
		tx_bytes: i64,
	) -> Result<u64, DbError> {
		let result = sqlx::query("UPDATE clients SET rx_bytes = ?, tx_bytes = ? WHERE public_key = ?")
			.bind(rx_bytes)
			.bind(tx_bytes)
			.bind(public_key)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}
}
