use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the hub, relaying chat and drawing events between TCP clients.
    Serve(ServeArgs),
    /// Connect to a hub and chat or draw from the terminal.
    Client(ClientArgs),
    /// Query host networking facilities.
    Net(NetArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the hub should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:5000")]
    pub listen: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Address of the hub to connect to.
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub server: SocketAddr,

    /// Give up on the connection attempt after this many milliseconds.
    #[arg(long, default_value_t = 5000)]
    pub connect_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct NetArgs {
    #[command(subcommand)]
    pub query: NetQuery,
}

#[derive(Subcommand, Debug, Clone)]
pub enum NetQuery {
    /// List network interfaces.
    Interfaces,
    /// Convert an integer to network byte order and back.
    ByteOrder { value: u32 },
    /// Pack an IP literal into bytes and unpack it again.
    Ip { literal: String },
    /// Resolve a domain and reverse-resolve the resulting address.
    Dns { domain: String },
    /// List TCP connections, optionally only those on one port.
    Connections {
        #[arg(long)]
        port: Option<u16>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_classic_port() {
        let cli = Cli::try_parse_from(["canvas_chat_hub", "serve"]).expect("parse");
        match cli.command {
            Command::Serve(args) => assert_eq!(args.listen.port(), 5000),
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["canvas_chat_hub", "client"]).expect("parse");
        match cli.command {
            Command::Client(args) => {
                assert_eq!(args.server.to_string(), "127.0.0.1:5000");
                assert_eq!(args.connect_timeout_ms, 5000);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_net_queries() {
        let cli = Cli::try_parse_from(["canvas_chat_hub", "net", "connections", "--port", "5000"])
            .expect("parse");
        match cli.command {
            Command::Net(NetArgs {
                query: NetQuery::Connections { port },
            }) => assert_eq!(port, Some(5000)),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
