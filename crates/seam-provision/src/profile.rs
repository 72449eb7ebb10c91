// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Connection profile rendering.
//!
//! The text format is dictated by the tunnel protocol and must be
//! reproduced verbatim for interoperability. Rendering is pure and
//! deterministic: identical inputs always produce byte-identical output,
//! so the profile is regenerable at any time from the client row plus the
//! server identity and is never stored separately.

use qrcode::render::svg;
use qrcode::QrCode;
use seam_common::ServerIdentity;
use std::net::IpAddr;

use crate::clients::Client;
use crate::error::{ProvisionError, Result};

#[derive(Clone)]
pub struct ProfileGenerator {
	server: ServerIdentity,
	dns: Vec<IpAddr>,
	keepalive_secs: u16,
}

impl ProfileGenerator {
	pub fn new(server: ServerIdentity, dns: Vec<IpAddr>, keepalive_secs: u16) -> Self {
		Self {
			server,
			dns,
			keepalive_secs,
		}
	}

	/// Render the client's connection profile text.
	pub fn render(&self, client: &Client) -> String {
		let dns = self
			.dns
			.iter()
			.map(|d| d.to_string())
			.collect::<Vec<_>>()
			.join(", ");

		format!(
			"[Interface]\n\
			 PrivateKey = {private_key}\n\
			 Address = {address}/32\n\
			 DNS = {dns}\n\
			 \n\
			 [Peer]\n\
			 PublicKey = {server_key}\n\
			 Endpoint = {endpoint}\n\
			 AllowedIPs = 0.0.0.0/0, ::/0\n\
			 PersistentKeepalive = {keepalive}\n",
			private_key = client.private_key.to_base64().expose(),
			address = client.address,
			dns = dns,
			server_key = self.server.public_key().to_base64(),
			endpoint = self.server.endpoint(),
			keepalive = self.keepalive_secs,
		)
	}

	/// Render a scannable SVG encoding of the profile text.
	pub fn render_qr_svg(&self, profile: &str) -> Result<String> {
		let code = QrCode::new(profile.as_bytes()).map_err(|e| ProvisionError::Qr(e.to_string()))?;
		Ok(
			code
				.render::<svg::Color>()
				.min_dimensions(256, 256)
				.build(),
		)
	}
}
