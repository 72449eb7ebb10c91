// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use seam_common::CommandError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
	#[error("database error: {0}")]
	Database(#[from] seam_db::DbError),

	#[error("address pool exhausted")]
	PoolExhausted,

	#[error("client not found")]
	NotFound,

	#[error("invalid key material: {0}")]
	InvalidKey(String),

	#[error("invalid address: {0}")]
	InvalidAddress(String),

	#[error("tunnel driver error: {0}")]
	Tunnel(#[from] CommandError),

	#[error("QR encoding failed: {0}")]
	Qr(String),

	#[error("internal error: {0}")]
	Internal(String),
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

impl From<seam_common::KeyError> for ProvisionError {
	fn from(e: seam_common::KeyError) -> Self {
		ProvisionError::InvalidKey(e.to_string())
	}
}
