// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Common types and utilities shared across the seam gateway crates:
//!
//! - [`Secret<T>`]: a wrapper that prevents accidental logging of sensitive
//!   values
//! - [`TunnelKeyPair`] and friends: Curve25519 key material in the tunnel
//!   protocol's base64 encoding
//! - [`ServerIdentity`]: the validated public identity (key + endpoint)
//!   handed to profile generation
//! - [`command`]: a thin runner for external tools with typed failures

pub mod command;
pub mod identity;
pub mod keys;
pub mod keys_file;
pub mod secret;

pub use command::{run_command, CommandError};
pub use identity::{IdentityError, ServerIdentity};
pub use keys::{KeyError, TunnelKeyPair, TunnelPrivateKey, TunnelPublicKey};
pub use keys_file::{
	get_or_create_server_key, load_key_env, load_key_from_file, save_key_to_file, KeyFileError,
};
pub use secret::{Secret, SecretString, REDACTED};
