use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, Level};

use kadnode::{rpc::TcpTransport, Contact, Id, Node};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 6000)]
    port: u16,
    /// Host to listen on, and advertise to peers
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Hex encoded Id of a node to bootstrap off
    #[arg(long, requires = "first_ip")]
    first_id: Option<Id>,
    /// Address of the node to bootstrap off
    #[arg(long, requires = "first_id")]
    first_ip: Option<String>,
    /// Only accept peers on this network
    #[arg(long, default_value = kadnode::rpc::DEFAULT_NETWORK_ID)]
    network_id: String,
    /// More output per occurrence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut builder = Node::builder()
        .port(cli.port)
        .network_id(cli.network_id)
        .transport(std::sync::Arc::new(TcpTransport::new(cli.host)));

    if let (Some(id), Some(address)) = (cli.first_id, cli.first_ip) {
        builder = builder.bootstrap(&[Contact::new(id, address)]);
    }

    let node = match builder.build() {
        Ok(node) => node,
        Err(error) => {
            error!(?error, "Failed to start node");
            return ExitCode::FAILURE;
        }
    };

    info!(
        id = %node.id(),
        local_addr = node.local_addr(),
        routing_table_size = node.info().routing_table_size(),
        "Node is running! Press Ctrl+C to stop."
    );

    let clone = node.clone();
    if let Err(error) = ctrlc::set_handler(move || clone.shutdown()) {
        error!(?error, "Failed to set the Ctrl-C handler");
    }

    match node.block_until_shutdown() {
        Ok(()) => {
            info!("Shut down");
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(?error, "Node stopped serving");
            ExitCode::FAILURE
        }
    }
}
