use anyhow::Result;
use clap::Parser;
use tracing::info;

use canvas_chat_hub::{
    cli::{Cli, Command, NetQuery},
    console, netdiag,
    server::HubServer,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let server = HubServer::bind(args.listen)?;
            let addr = server.local_addr()?;
            info!("hub listening on {}", addr);
            server.run_until_ctrl_c().await;
        }
        Command::Client(args) => console::run(args).await?,
        Command::Net(args) => {
            let report = match args.query {
                NetQuery::Interfaces => netdiag::list_network_interfaces().await,
                NetQuery::ByteOrder { value } => netdiag::demonstrate_byte_order_round_trip(value),
                NetQuery::Ip { literal } => netdiag::round_trip_ip_literal(&literal),
                NetQuery::Dns { domain } => netdiag::resolve_and_reverse_resolve(&domain).await,
                NetQuery::Connections { port } => netdiag::list_connections_for_port(port).await,
            };
            println!("{report}");
        }
    }

    Ok(())
}
