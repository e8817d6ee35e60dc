use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "huddle-relay",
    author,
    version,
    about = "Signaling relay for Huddle video rooms"
)]
pub struct Cli {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "HUDDLE_RELAY_LISTEN_ADDR", default_value = "0.0.0.0:3000")]
    pub listen_addr: String,

    /// Overrides the port of `--listen-addr`.
    #[arg(long, env = "HUDDLE_RELAY_PORT")]
    pub port: Option<u16>,

    /// Grace period applied after the shutdown signal.
    #[arg(long, env = "HUDDLE_RELAY_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    pub shutdown_grace: Duration,
}

impl TryFrom<Cli> for RelayConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let mut listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        if let Some(port) = cli.port {
            listen_addr.set_port(port);
        }
        Ok(RelayConfig {
            listen_addr,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_on_port_3000() {
        let cli = Cli::parse_from(["huddle-relay"]);
        let config = RelayConfig::try_from(cli).unwrap();
        assert_eq!(config.listen_addr.port(), 3000);
        assert_eq!(config.shutdown_grace, Duration::from_secs(2));
    }

    #[test]
    fn port_flag_overrides_listen_port() {
        let cli = Cli::parse_from(["huddle-relay", "--listen-addr", "127.0.0.1:9000", "--port", "4100"]);
        let config = RelayConfig::try_from(cli).unwrap();
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:4100");
    }

    #[test]
    fn rejects_garbage_address() {
        let cli = Cli::parse_from(["huddle-relay", "--listen-addr", "nowhere"]);
        assert!(RelayConfig::try_from(cli).is_err());
    }
}
