// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! seamd - the seam split-tunnel gateway daemon.

mod config;

use clap::{Parser, Subcommand};
use seam_common::{get_or_create_server_key, load_key_env, ServerIdentity};
use seam_db::ClientRepository;
use seam_provision::{
	AddressPool, ClientService, CommandTunnelDriver, ProfileGenerator, ProvisioningService,
};
use seam_routing::{
	CommandPacketFilter, CommandPolicyRouting, DomainResolver, PacketFilter, PolicyRouting,
	PolicySet, RouteController, RoutingDaemon, RoutingPolicy,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::SeamConfig;

const SERVER_KEY_ENV: &str = "SEAM_SERVER_PRIVATE_KEY";

/// seamd - provisions tunnel clients and keeps the routing split converged.
#[derive(Parser, Debug)]
#[command(name = "seamd", about = "Seam split-tunnel gateway daemon", version)]
struct Cli {
	/// Path to the configuration file
	#[arg(long, env = "SEAM_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the routing daemon until interrupted
	Run,
	/// Run one convergence pass and exit
	Converge,
	/// Print the connection profile for an identity, provisioning it if needed
	Profile {
		identity: String,
		/// Display name stored on first provisioning
		#[arg(long)]
		name: Option<String>,
		/// Also print the profile's SVG QR encoding
		#[arg(long)]
		qr: bool,
	},
	/// Show address, handshake and traffic stats for an identity
	Stats { identity: String },
	/// Revoke an identity's client (frees its address, keeps the row)
	Revoke { identity: String },
	/// List all clients, newest first
	List,
	/// Reconcile the tunnel driver's peer list with the registry
	SyncPeers,
	/// Pull handshake and transfer counters from the driver into the registry
	SyncStats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	dotenvy::dotenv().ok();

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
		)
		.init();

	let cli = Cli::parse();

	// A bad configuration aborts here, before any loop or pool exists.
	let config = config::load(cli.config.as_deref())?;

	match cli.command {
		Command::Run => run_daemon(&config).await,
		Command::Converge => {
			let daemon = build_routing_daemon(&config)?;
			let outcome = daemon.converge_once().await?;
			println!(
				"resolved {} addresses, added {} to policy set {}",
				outcome.resolved, outcome.added, config.set_name
			);
			Ok(())
		}
		Command::Profile { identity, name, qr } => {
			let service = build_provisioning(&config).await?;
			let artifact = service
				.get_or_create_profile(&identity, name.as_deref())
				.await?;
			print!("{}", artifact.config);
			if qr {
				println!("{}", artifact.qr_svg);
			}
			Ok(())
		}
		Command::Stats { identity } => {
			let service = build_provisioning(&config).await?;
			let stats = service.get_stats(&identity).await?;
			println!("identity:       {}", stats.identity);
			println!("address:        {}", stats.address);
			println!("created:        {}", stats.created_at.to_rfc3339());
			match stats.last_handshake_at {
				Some(at) => println!(
					"last handshake: {} ({})",
					at.to_rfc3339(),
					if stats.online { "online" } else { "offline" }
				),
				None => println!("last handshake: never"),
			}
			println!("transfer:       {} rx / {} tx bytes", stats.rx_bytes, stats.tx_bytes);
			Ok(())
		}
		Command::Revoke { identity } => {
			let service = build_provisioning(&config).await?;
			service.revoke(&identity).await?;
			println!("revoked {identity}; run `seamd sync-peers` to drop the live peer");
			Ok(())
		}
		Command::List => {
			let service = build_provisioning(&config).await?;
			for client in service.list_all().await? {
				println!(
					"{}\t{}\t{}\t{}\t{}",
					client.identity,
					client.address,
					if client.active { "active" } else { "revoked" },
					client.created_at.to_rfc3339(),
					client.display_name.as_deref().unwrap_or("-"),
				);
			}
			Ok(())
		}
		Command::SyncPeers => {
			let service = build_provisioning(&config).await?;
			let report = service.sync_tunnel_peers().await?;
			println!("peers synced: {} added, {} removed", report.added, report.removed);
			Ok(())
		}
		Command::SyncStats => {
			let service = build_provisioning(&config).await?;
			let updated = service.sync_stats().await?;
			println!("stats synced for {updated} clients");
			Ok(())
		}
	}
}

fn build_routing_daemon(config: &SeamConfig) -> anyhow::Result<RoutingDaemon> {
	let filter: Arc<dyn PacketFilter> = Arc::new(CommandPacketFilter::new());
	let routing: Arc<dyn PolicyRouting> = Arc::new(CommandPolicyRouting::new());

	let policy = RoutingPolicy {
		set_name: config.set_name.clone(),
		fwmark: config.fwmark,
		table: config.table,
		interface: config.interface.clone(),
	};

	let policy_set = PolicySet::new(&config.set_name, Arc::clone(&filter));
	let controller = RouteController::new(policy, filter, routing);
	let resolver = Arc::new(DomainResolver::from_system_conf()?);

	if config.domains.is_empty() {
		warn!("no tracked domains configured; convergence will only maintain rules");
	}

	Ok(RoutingDaemon::new(
		config.domains.clone(),
		resolver,
		policy_set,
		controller,
		config.interval,
		config.backoff,
	))
}

async fn build_provisioning(config: &SeamConfig) -> anyhow::Result<ProvisioningService> {
	let pool = seam_db::create_pool(&config.database_url).await?;
	seam_db::migrate(&pool).await?;
	let repo = ClientRepository::new(pool);

	let address_pool = AddressPool::new(config.client_subnet, config.client_gateway)?;
	let clients = ClientService::new(repo, address_pool);

	let server_key = match load_key_env(SERVER_KEY_ENV)? {
		Some(key) => key,
		None => get_or_create_server_key(&config.data_dir).await?,
	};
	let server = ServerIdentity::new(*server_key.public_key(), &config.endpoint)?;

	let profiles = ProfileGenerator::new(server, config.client_dns.clone(), config.keepalive_secs);
	let driver = Arc::new(CommandTunnelDriver::new(&config.interface));

	Ok(ProvisioningService::new(clients, profiles, driver))
}

async fn run_daemon(config: &SeamConfig) -> anyhow::Result<()> {
	let daemon = build_routing_daemon(config)?;
	let shutdown = daemon.shutdown_sender();

	let handle = tokio::spawn(async move { daemon.run().await });

	tokio::signal::ctrl_c().await?;
	info!("interrupt received, stopping at the next tick boundary");
	let _ = shutdown.send(true);

	handle.await?;
	Ok(())
}
