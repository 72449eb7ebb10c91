// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use seam_common::CommandError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RoutingError {
	#[error("command failed: {0}")]
	Command(#[from] CommandError),

	#[error("resolver initialization failed: {0}")]
	Resolver(String),
}

pub type Result<T> = std::result::Result<T, RoutingError>;
