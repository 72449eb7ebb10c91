// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::keys::{TunnelKeyPair, TunnelPrivateKey};
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::instrument;

pub const KEY_FILENAME: &str = "server-key";

#[derive(Error, Debug)]
pub enum KeyFileError {
	#[error("failed to read key file: {0}")]
	Read(#[from] std::io::Error),

	#[error("invalid key format: {0}")]
	InvalidFormat(#[from] crate::keys::KeyError),
}

pub type Result<T> = std::result::Result<T, KeyFileError>;

#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub async fn load_key_from_file(path: impl AsRef<Path>) -> Result<TunnelKeyPair> {
	let content = fs::read_to_string(path.as_ref()).await?;
	let private = TunnelPrivateKey::from_base64(content.trim())?;
	Ok(TunnelKeyPair::from_private_key(private))
}

/// Load a key from `var_name`, or from the file named by `var_name_FILE`.
#[instrument(skip(var_name), fields(var = %var_name))]
pub fn load_key_env(var_name: &str) -> Result<Option<TunnelKeyPair>> {
	if let Ok(value) = std::env::var(var_name) {
		let private = TunnelPrivateKey::from_base64(value.trim())?;
		return Ok(Some(TunnelKeyPair::from_private_key(private)));
	}

	let file_var = format!("{}_FILE", var_name);
	if let Ok(path) = std::env::var(&file_var) {
		let content = std::fs::read_to_string(&path)?;
		let private = TunnelPrivateKey::from_base64(content.trim())?;
		return Ok(Some(TunnelKeyPair::from_private_key(private)));
	}

	Ok(None)
}

#[instrument(skip(key), fields(path = %path.as_ref().display()))]
pub async fn save_key_to_file(key: &TunnelKeyPair, path: impl AsRef<Path>) -> Result<()> {
	let path = path.as_ref();

	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).await?;
	}

	let private_b64 = key.private_key().to_base64();
	let content = format!("{}\n", private_b64.expose());

	#[cfg(unix)]
	{
		use tokio::fs::OpenOptions;
		use tokio::io::AsyncWriteExt;

		let mut file = OpenOptions::new()
			.write(true)
			.create(true)
			.truncate(true)
			.mode(0o600)
			.open(path)
			.await?;
		file.write_all(content.as_bytes()).await?;
	}

	#[cfg(not(unix))]
	{
		fs::write(path, content).await?;
	}

	Ok(())
}

/// Load the server key from `data_dir`, generating and saving one on first
/// start.
#[instrument(skip(data_dir))]
pub async fn get_or_create_server_key(data_dir: impl AsRef<Path>) -> Result<TunnelKeyPair> {
	let key_path = data_dir.as_ref().join(KEY_FILENAME);

	if key_path.exists() {
		return load_key_from_file(&key_path).await;
	}

	let keypair = TunnelKeyPair::generate();
	save_key_to_file(&keypair, &key_path).await?;
	Ok(keypair)
}
