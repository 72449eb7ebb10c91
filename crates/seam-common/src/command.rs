// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Runner for external system tools.
//!
//! The kernel-facing capabilities (packet filter, policy routing, tunnel
//! driver) are thin wrappers over command-line tools. Each invocation maps a
//! non-zero exit to a typed [`CommandError`] so the orchestrating component
//! decides per call whether a failure is tolerated.

use thiserror::Error;
use tokio::process::Command;
use tracing::trace;

#[derive(Error, Debug)]
pub enum CommandError {
	#[error("failed to spawn {program}: {source}")]
	Spawn {
		program: String,
		#[source]
		source: std::io::Error,
	},

	#[error("{program} exited with status {status}: {stderr}")]
	NonZero {
		program: String,
		status: i32,
		stderr: String,
	},

	#[error("unexpected output from {program}: {detail}")]
	Parse { program: String, detail: String },
}

pub type Result<T> = std::result::Result<T, CommandError>;

/// Run `program` with `args`, returning trimmed stdout on success.
pub async fn run_command(program: &str, args: &[&str]) -> Result<String> {
	trace!(%program, ?args, "running command");

	let output = Command::new(program)
		.args(args)
		.output()
		.await
		.map_err(|source| CommandError::Spawn {
			program: program.to_string(),
			source,
		})?;

	if !output.status.success() {
		let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
		return Err(CommandError::NonZero {
			program: program.to_string(),
			status: output.status.code().unwrap_or(-1),
			stderr,
		});
	}

	Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
