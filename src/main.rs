use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use dictator::config::{ElectionConfig, NodeConfig};
use dictator::error::DictatorError;
use dictator::mission::{bootstrap_router, BootstrapMission};
use dictator::node::Node;
use dictator::protocol::{new_command_packet, Envelope, Kind, NodeId};
use dictator::shutdown::install_shutdown_handler;
use dictator::transport::{bind_sockets, spawn_inbox, spawn_outbox};

#[derive(Parser, Debug)]
#[command(name = "dictator")]
#[command(version)]
#[command(about = "Transient leader election over UDP broadcast")]
#[command(propagate_version = true)]
struct Args {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a node that bootstraps the cluster once it becomes leader
    Bootstrap(BootstrapArgs),

    /// Broadcast one command and print the responses addressed to it
    #[command(after_help = SEND_PORT_NOTE)]
    Send(SendArgs),
}

const SEND_PORT_NOTE: &str = "\
Responses are broadcast to the cluster port, so `send` listens on that port \
too. A node running on the same host already holds it and the bind fails \
with \"address in use\". Run `send` from another host on the segment, or stop \
the local node first. A different --listen port binds but hears no responses.";

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct NetworkArgs {
    /// Address to listen on for cluster traffic. Only one process per host
    /// can hold the cluster port
    #[arg(long, default_value = "0.0.0.0:43001")]
    listen: SocketAddr,

    /// Broadcast target for outbound packets
    #[arg(long, default_value = "255.255.255.255:43001")]
    broadcast: SocketAddr,

    /// Largest datagram accepted, in bytes
    #[arg(long, default_value = "8192")]
    max_packet_size: usize,
}

impl NetworkArgs {
    fn node_config(&self) -> NodeConfig {
        NodeConfig {
            max_packet_size: self.max_packet_size,
            ..NodeConfig::new(self.listen, self.broadcast)
        }
    }
}

#[derive(Parser, Debug)]
struct BootstrapArgs {
    #[command(flatten)]
    network: NetworkArgs,

    /// Value carried by the AssignIP command
    #[arg(long)]
    address: Option<String>,

    /// How often AssignIP is re-broadcast until acknowledged
    #[arg(long, default_value = "1000")]
    resend_interval_ms: u64,

    /// Lower bound of the election timeout
    #[arg(long, default_value = "500")]
    election_timeout_min_ms: u64,

    /// Upper bound (exclusive) of the election timeout
    #[arg(long, default_value = "1500")]
    election_timeout_max_ms: u64,
}

#[derive(Parser, Debug)]
struct SendArgs {
    /// Command name, e.g. "AssignIP"
    name: String,

    /// Command value as JSON
    #[arg(long)]
    value: Option<String>,

    /// How long to collect responses
    #[arg(long, default_value = "2000")]
    wait_ms: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,

    #[command(flatten)]
    network: NetworkArgs,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct ResponseOutput {
    responder_id: String,
    remote_addr: Option<String>,
    status: i32,
    result: serde_json::Value,
}

#[derive(Serialize)]
struct SendOutput {
    commander_id: String,
    command: String,
    responses: Vec<ResponseOutput>,
}

// =============================================================================
// Bootstrap
// =============================================================================

async fn run_bootstrap(args: BootstrapArgs) -> Result<(), Box<dyn std::error::Error>> {
    let election = ElectionConfig {
        election_timeout_min_ms: args.election_timeout_min_ms,
        election_timeout_max_ms: args.election_timeout_max_ms,
        ..ElectionConfig::default()
    };
    let config = args.network.node_config().with_election(election);

    let mission = BootstrapMission::new(args.address)
        .with_resend_interval(Duration::from_millis(args.resend_interval_ms));

    let node = Node::bind(config, bootstrap_router(), Arc::new(mission)).await?;
    let shutdown = install_shutdown_handler();
    node.run(shutdown).await?;

    Ok(())
}

// =============================================================================
// Send
// =============================================================================

async fn run_send(args: SendArgs) -> Result<(), Box<dyn std::error::Error>> {
    let value: serde_json::Value = match &args.value {
        Some(raw) => serde_json::from_str(raw)?,
        None => serde_json::Value::Null,
    };

    let config = args.network.node_config();
    config.validate()?;
    let (inbound, outbound) = bind_sockets(&config).await?;

    let shutdown = CancellationToken::new();
    let (mut inbox, inbox_task) = spawn_inbox(
        inbound,
        config.max_packet_size,
        config.channel_capacity,
        shutdown.clone(),
    );
    let (outbox, outbox_task) = spawn_outbox(outbound, config.channel_capacity, shutdown.clone());

    let commander = NodeId::generate();
    let packet = new_command_packet(&commander, &args.name, &value)?;
    outbox
        .send(packet)
        .await
        .map_err(|_| DictatorError::ChannelClosed)?;
    tracing::info!(commander = %commander, command = %args.name, "Command broadcast");

    let mut responses = Vec::new();
    let deadline = tokio::time::sleep(Duration::from_millis(args.wait_ms));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            packet = inbox.recv() => {
                let Some(packet) = packet else { break };
                let Ok(envelope) = Envelope::decode(&packet.payload) else {
                    continue;
                };
                if envelope.kind != Kind::CommandResponse || envelope.sender_id != commander {
                    continue;
                }
                match envelope.response_blob() {
                    Ok(blob) => responses.push(ResponseOutput {
                        responder_id: blob.responder_id.to_string(),
                        remote_addr: packet.remote_addr.map(|addr| addr.to_string()),
                        status: blob.status,
                        result: blob.result,
                    }),
                    Err(e) => tracing::warn!(error = %e, "Malformed command response"),
                }
            }
        }
    }

    shutdown.cancel();
    let _ = inbox_task.await;
    let _ = outbox_task.await;

    match args.output {
        OutputFormat::Json => {
            let output = SendOutput {
                commander_id: commander.to_string(),
                command: args.name,
                responses,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if responses.is_empty() {
                println!("No responses within {}ms.", args.wait_ms);
            } else {
                println!("{:<34} {:<22} {:<7} RESULT", "RESPONDER", "ADDRESS", "STATUS");
                println!("{}", "-".repeat(78));
                for response in &responses {
                    println!(
                        "{:<34} {:<22} {:<7} {}",
                        response.responder_id,
                        response.remote_addr.as_deref().unwrap_or("-"),
                        response.status,
                        response.result
                    );
                }
                println!();
                println!("{} response(s) to {}", responses.len(), args.name);
            }
        }
    }

    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    match args.command {
        Commands::Bootstrap(bootstrap_args) => {
            run_bootstrap(bootstrap_args).await?;
        }
        Commands::Send(send_args) => {
            run_send(send_args).await?;
        }
    }

    Ok(())
}
