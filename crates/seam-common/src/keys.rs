// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Curve25519 key material for the tunnel protocol.
//!
//! Keys are encoded with padded base64, as the tunnel configuration format
//! dictates. Private keys are redacted in Debug/Display/Serialize and
//! zeroized on drop.

use crate::secret::Secret;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

#[derive(Error, Debug)]
pub enum KeyError {
	#[error("invalid key length: expected 32 bytes, got {0}")]
	InvalidLength(usize),

	#[error("invalid base64 encoding: {0}")]
	InvalidBase64(#[from] base64::DecodeError),

	#[error("invalid hex encoding: {0}")]
	InvalidHex(#[from] hex::FromHexError),
}

pub type Result<T> = std::result::Result<T, KeyError>;

#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct TunnelPrivateKey {
	bytes: [u8; 32],
}

impl TunnelPrivateKey {
	pub fn generate() -> Self {
		let secret = StaticSecret::random_from_rng(OsRng);
		Self {
			bytes: secret.to_bytes(),
		}
	}

	pub fn from_bytes(bytes: [u8; 32]) -> Self {
		Self { bytes }
	}

	pub fn from_base64(s: &str) -> Result<Self> {
		let bytes = STANDARD.decode(s)?;
		if bytes.len() != 32 {
			return Err(KeyError::InvalidLength(bytes.len()));
		}
		let mut arr = [0u8; 32];
		arr.copy_from_slice(&bytes);
		Ok(Self { bytes: arr })
	}

	pub fn to_base64(&self) -> Secret<String> {
		Secret::new(STANDARD.encode(self.bytes))
	}

	pub fn public_key(&self) -> TunnelPublicKey {
		let secret = StaticSecret::from(self.bytes);
		let public = PublicKey::from(&secret);
		TunnelPublicKey {
			bytes: *public.as_bytes(),
		}
	}

	pub fn expose_bytes(&self) -> &[u8; 32] {
		&self.bytes
	}
}

impl fmt::Debug for TunnelPrivateKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TunnelPrivateKey")
			.field("bytes", &"[REDACTED]")
			.finish()
	}
}

impl fmt::Display for TunnelPrivateKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("[REDACTED]")
	}
}

impl Serialize for TunnelPrivateKey {
	fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str("[REDACTED]")
	}
}

impl<'de> Deserialize<'de> for TunnelPrivateKey {
	fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Self::from_base64(&s).map_err(serde::de::Error::custom)
	}
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TunnelPublicKey {
	bytes: [u8; 32],
}

impl TunnelPublicKey {
	pub fn from_bytes(bytes: [u8; 32]) -> Self {
		Self { bytes }
	}

	pub fn from_base64(s: &str) -> Result<Self> {
		let bytes = STANDARD.decode(s)?;
		if bytes.len() != 32 {
			return Err(KeyError::InvalidLength(bytes.len()));
		}
		let mut arr = [0u8; 32];
		arr.copy_from_slice(&bytes);
		Ok(Self { bytes: arr })
	}

	pub fn from_hex(s: &str) -> Result<Self> {
		let bytes = hex::decode(s)?;
		if bytes.len() != 32 {
			return Err(KeyError::InvalidLength(bytes.len()));
		}
		let mut arr = [0u8; 32];
		arr.copy_from_slice(&bytes);
		Ok(Self { bytes: arr })
	}

	pub fn to_base64(&self) -> String {
		STANDARD.encode(self.bytes)
	}

	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.bytes
	}
}

impl fmt::Debug for TunnelPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let b64 = self.to_base64();
		let prefix = if b64.len() >= 8 { &b64[..8] } else { &b64 };
		f.debug_struct("TunnelPublicKey")
			.field("prefix", &format!("{}...", prefix))
			.finish()
	}
}

impl fmt::Display for TunnelPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_base64())
	}
}

impl Serialize for TunnelPublicKey {
	fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.to_base64())
	}
}

impl<'de> Deserialize<'de> for TunnelPublicKey {
	fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Self::from_base64(&s).map_err(serde::de::Error::custom)
	}
}

#[derive(Clone)]
pub struct TunnelKeyPair {
	private: TunnelPrivateKey,
	public: TunnelPublicKey,
}

impl TunnelKeyPair {
	pub fn generate() -> Self {
		let private = TunnelPrivateKey::generate();
		let public = private.public_key();
		Self { private, public }
	}

	pub fn from_private_key(private: TunnelPrivateKey) -> Self {
		let public = private.public_key();
		Self { private, public }
	}

	pub fn from_base64(private_key_base64: &str) -> Result<Self> {
		let private = TunnelPrivateKey::from_base64(private_key_base64)?;
		Ok(Self::from_private_key(private))
	}

	pub fn private_key(&self) -> &TunnelPrivateKey {
		&self.private
	}

	pub fn public_key(&self) -> &TunnelPublicKey {
		&self.public
	}
}

impl fmt::Debug for TunnelKeyPair {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TunnelKeyPair")
			.field("private", &self.private)
			.field("public", &self.public)
			.finish()
	}
}
