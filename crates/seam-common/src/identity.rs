// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The server's public tunnel identity.
//!
//! Profile generation needs the server's public key and reachable endpoint.
//! Both are supplied here as one validated value constructed at startup from
//! structured configuration, never re-derived by parsing another subsystem's
//! runtime state.

use crate::keys::TunnelPublicKey;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
	#[error("invalid endpoint `{0}`: expected host:port")]
	InvalidEndpoint(String),

	#[error("invalid endpoint port `{0}`")]
	InvalidPort(String),
}

/// Public identity of the tunnel server, as rendered into client profiles.
#[derive(Debug, Clone, Serialize)]
pub struct ServerIdentity {
	public_key: TunnelPublicKey,
	endpoint: String,
}

impl ServerIdentity {
	/// Validate and construct. `endpoint` must be `host:port` with a non-empty
	/// host and a valid port number.
	pub fn new(public_key: TunnelPublicKey, endpoint: &str) -> Result<Self, IdentityError> {
		let (host, port) = endpoint
			.rsplit_once(':')
			.ok_or_else(|| IdentityError::InvalidEndpoint(endpoint.to_string()))?;

		if host.is_empty() {
			return Err(IdentityError::InvalidEndpoint(endpoint.to_string()));
		}

		if port.parse::<u16>().is_err() {
			return Err(IdentityError::InvalidPort(port.to_string()));
		}

		Ok(Self {
			public_key,
			endpoint: endpoint.to_string(),
		})
	}

	pub fn public_key(&self) -> &TunnelPublicKey {
		&self.public_key
	}

	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}
}
