use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use farm_core::interceptor::ServerChain;
use std::path::PathBuf;

/// Runtime configuration for the `farm-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is honored), with defaults suitable for local development.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "farm-server",
    version,
    about = "A gRPC service exposing keyed farm records over unary and streaming calls"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("127.0.0.1:8980"))]
    pub server_addr: String,

    /// JSON record database loaded once at startup.
    ///
    /// A missing or malformed file aborts startup.
    ///
    /// Environment variable: `DATA_FILE`
    #[arg(long, env = "DATA_FILE", default_value = "data/farm_db.json")]
    pub data_file: PathBuf,

    /// Capacity of the response buffer between a producer task and its gRPC
    /// stream.
    ///
    /// Lower values apply backpressure sooner; higher values allow deeper
    /// pipelining.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 16)]
    pub stream_buffer_size: usize,

    /// What the server does with notes received on a chat stream.
    ///
    /// Environment variable: `CHAT_POLICY`
    #[arg(long, env = "CHAT_POLICY", value_enum, default_value_t = ChatPolicy::Sink)]
    pub chat_policy: ChatPolicy,

    /// Seconds to wait for in-flight streams to drain on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,

    /// PEM certificate chain presented by the server. Enables TLS.
    ///
    /// Environment variable: `TLS_CERT_CHAIN`
    #[arg(long, env = "TLS_CERT_CHAIN", requires = "tls_private_key")]
    pub tls_cert_chain: Option<PathBuf>,

    /// PEM private key matching `--tls-cert-chain`.
    ///
    /// Environment variable: `TLS_PRIVATE_KEY`
    #[arg(long, env = "TLS_PRIVATE_KEY", requires = "tls_cert_chain")]
    pub tls_private_key: Option<PathBuf>,

    /// PEM trust collection used to verify client certificates. When set,
    /// clients must authenticate (mutual TLS).
    ///
    /// Environment variable: `TLS_TRUST_CERTS`
    #[arg(long, env = "TLS_TRUST_CERTS")]
    pub tls_trust_certs: Option<PathBuf>,

    /// Serve without the metadata header interceptor.
    #[arg(long, default_value_t = false)]
    pub no_header_interceptor: bool,
}

/// Server-side handling of received chat notes.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChatPolicy {
    /// Log each note and send nothing back.
    #[default]
    Sink,
    /// Log each note and send it back unchanged, in order.
    Echo,
}

/// Transport security of the listening socket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TransportSecurity {
    /// Plaintext HTTP/2.
    #[default]
    None,
    /// TLS; the server authenticates itself.
    ServerAuth {
        cert_chain: PathBuf,
        private_key: PathBuf,
    },
    /// TLS; both sides authenticate. Clients must present a certificate
    /// signed by `trust_certs`.
    MutualAuth {
        cert_chain: PathBuf,
        private_key: PathBuf,
        trust_certs: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub data_file: PathBuf,
    pub stream_buffer_size: usize,
    pub chat_policy: ChatPolicy,
    pub shutdown_timeout: Duration,
    pub security: TransportSecurity,
    /// Interceptors wrapped around the farm service, outermost first.
    pub interceptors: ServerChain,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: String::from("127.0.0.1:8980"),
            data_file: PathBuf::from("data/farm_db.json"),
            stream_buffer_size: 16,
            chat_policy: ChatPolicy::Sink,
            shutdown_timeout: Duration::from_secs(5),
            security: TransportSecurity::None,
            interceptors: ServerChain::headers(),
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        let security = match (args.tls_cert_chain, args.tls_private_key, args.tls_trust_certs) {
            (None, None, None) => TransportSecurity::None,
            (Some(cert_chain), Some(private_key), None) => TransportSecurity::ServerAuth {
                cert_chain,
                private_key,
            },
            (Some(cert_chain), Some(private_key), Some(trust_certs)) => {
                TransportSecurity::MutualAuth {
                    cert_chain,
                    private_key,
                    trust_certs,
                }
            }
            (None, None, Some(_)) => {
                bail!("TLS_TRUST_CERTS requires TLS_CERT_CHAIN and TLS_PRIVATE_KEY")
            }
            _ => bail!("TLS_CERT_CHAIN and TLS_PRIVATE_KEY must be set together"),
        };

        let interceptors = if args.no_header_interceptor {
            ServerChain::new()
        } else {
            ServerChain::headers()
        };

        Ok(Self {
            server_addr: args.server_addr,
            data_file: args.data_file,
            stream_buffer_size: args.stream_buffer_size,
            chat_policy: args.chat_policy,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            security,
            interceptors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let argv = std::iter::once("farm-server").chain(args.iter().copied());
        let args = CliArgs::try_parse_from(argv)?;
        ServerConfig::try_from(args)
    }

    #[test]
    fn defaults_are_plaintext_with_header_interceptor() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.security, TransportSecurity::None);
        assert_eq!(config.chat_policy, ChatPolicy::Sink);
        assert_eq!(config.interceptors.len(), 1);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn cert_and_key_select_server_auth() {
        let config =
            parse(&["--tls-cert-chain", "chain.pem", "--tls-private-key", "key.pem"]).unwrap();
        assert_eq!(
            config.security,
            TransportSecurity::ServerAuth {
                cert_chain: "chain.pem".into(),
                private_key: "key.pem".into(),
            }
        );
    }

    #[test]
    fn trust_collection_selects_mutual_auth() {
        let config = parse(&[
            "--tls-cert-chain",
            "chain.pem",
            "--tls-private-key",
            "key.pem",
            "--tls-trust-certs",
            "ca.crt",
        ])
        .unwrap();
        assert!(matches!(config.security, TransportSecurity::MutualAuth { .. }));
    }

    #[test]
    fn rejects_incomplete_tls_material() {
        assert!(parse(&["--tls-cert-chain", "chain.pem"]).is_err());
        assert!(parse(&["--tls-trust-certs", "ca.crt"]).is_err());
    }

    #[test]
    fn rejects_zero_buffer_and_parses_policy() {
        assert!(parse(&["--stream-buffer-size", "0"]).is_err());
        let config = parse(&["--chat-policy", "echo", "--no-header-interceptor"]).unwrap();
        assert_eq!(config.chat_policy, ChatPolicy::Echo);
        assert!(config.interceptors.is_empty());
    }
}
