use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use farm_core::{Error, Result, interceptor::ClientChain};
use std::path::{Path, PathBuf};
use tonic::transport::{Certificate, ClientTlsConfig, Endpoint, Identity};

/// Runtime configuration for the `farm-client` binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "farm-client", version, about = "Drives every call shape of a farm server")]
pub struct ClientArgs {
    /// Server URL. Use `https://` together with the TLS options.
    ///
    /// Environment variable: `SERVER_URL`
    #[arg(long, env = "SERVER_URL", default_value_t = String::from("http://127.0.0.1:8980"))]
    pub server_url: String,

    /// Record database used to pick the items the demo sends.
    ///
    /// Environment variable: `DATA_FILE`
    #[arg(long, env = "DATA_FILE", default_value = "data/farm_db.json")]
    pub data_file: PathBuf,

    /// PEM trust collection used to verify the server. Enables TLS.
    ///
    /// Environment variable: `TLS_CA_CERT`
    #[arg(long, env = "TLS_CA_CERT")]
    pub tls_ca_cert: Option<PathBuf>,

    /// Overrides the name checked against the server certificate.
    ///
    /// Environment variable: `TLS_DOMAIN`
    #[arg(long, env = "TLS_DOMAIN", requires = "tls_ca_cert")]
    pub tls_domain: Option<String>,

    /// PEM certificate chain presented to the server (mutual TLS).
    ///
    /// Environment variable: `TLS_CERT_CHAIN`
    #[arg(long, env = "TLS_CERT_CHAIN", requires = "tls_private_key")]
    pub tls_cert_chain: Option<PathBuf>,

    /// PEM private key matching `--tls-cert-chain`.
    ///
    /// Environment variable: `TLS_PRIVATE_KEY`
    #[arg(long, env = "TLS_PRIVATE_KEY", requires = "tls_cert_chain")]
    pub tls_private_key: Option<PathBuf>,

    /// Seconds to wait for a chat to complete.
    ///
    /// Environment variable: `CHAT_TIMEOUT`
    #[arg(long, env = "CHAT_TIMEOUT", default_value_t = 60)]
    pub chat_timeout: u64,

    /// Send calls without the metadata header interceptor.
    #[arg(long, default_value_t = false)]
    pub no_header_interceptor: bool,
}

/// Transport security of the client channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClientSecurity {
    #[default]
    None,
    /// Verify the server against `ca_cert`.
    ServerAuth {
        ca_cert: PathBuf,
        domain: Option<String>,
    },
    /// Verify the server and present a client certificate.
    MutualAuth {
        ca_cert: PathBuf,
        domain: Option<String>,
        cert_chain: PathBuf,
        private_key: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub data_file: PathBuf,
    pub security: ClientSecurity,
    pub chat_timeout: Duration,
    /// Interceptors wrapped around every call, outermost first.
    pub interceptors: ClientChain,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: String::from("http://127.0.0.1:8980"),
            data_file: PathBuf::from("data/farm_db.json"),
            security: ClientSecurity::None,
            chat_timeout: Duration::from_secs(60),
            interceptors: ClientChain::headers(),
        }
    }
}

impl ClientConfig {
    /// A plaintext configuration for `server_url` with the default
    /// interceptors.
    pub fn plaintext(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Builds the channel endpoint, loading TLS material if configured.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let endpoint = Endpoint::from_shared(self.server_url.clone())?;
        match self.tls_config()? {
            Some(tls) => Ok(endpoint.tls_config(tls)?),
            None => Ok(endpoint),
        }
    }

    fn tls_config(&self) -> Result<Option<ClientTlsConfig>> {
        let (ca_cert, domain, identity) = match &self.security {
            ClientSecurity::None => return Ok(None),
            ClientSecurity::ServerAuth { ca_cert, domain } => (ca_cert, domain, None),
            ClientSecurity::MutualAuth {
                ca_cert,
                domain,
                cert_chain,
                private_key,
            } => (
                ca_cert,
                domain,
                Some(Identity::from_pem(read_pem(cert_chain)?, read_pem(private_key)?)),
            ),
        };

        let ca = Certificate::from_pem(read_pem(ca_cert)?);
        let mut tls = ClientTlsConfig::new().ca_certificate(ca);
        if let Some(domain) = domain {
            tls = tls.domain_name(domain.clone());
        }
        if let Some(identity) = identity {
            tls = tls.identity(identity);
        }
        Ok(Some(tls))
    }
}

impl TryFrom<ClientArgs> for ClientConfig {
    type Error = anyhow::Error;

    fn try_from(args: ClientArgs) -> core::result::Result<Self, Self::Error> {
        if args.chat_timeout == 0 {
            bail!("CHAT_TIMEOUT must be greater than 0");
        }

        let security = match (args.tls_ca_cert, args.tls_cert_chain, args.tls_private_key) {
            (None, None, None) => ClientSecurity::None,
            (Some(ca_cert), None, None) => ClientSecurity::ServerAuth {
                ca_cert,
                domain: args.tls_domain,
            },
            (Some(ca_cert), Some(cert_chain), Some(private_key)) => ClientSecurity::MutualAuth {
                ca_cert,
                domain: args.tls_domain,
                cert_chain,
                private_key,
            },
            _ => bail!("TLS_CERT_CHAIN and TLS_PRIVATE_KEY require each other and TLS_CA_CERT"),
        };

        let interceptors = if args.no_header_interceptor {
            ClientChain::new()
        } else {
            ClientChain::headers()
        };

        Ok(Self {
            server_url: args.server_url,
            data_file: args.data_file,
            security,
            chat_timeout: Duration::from_secs(args.chat_timeout),
            interceptors,
        })
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| Error::Tls {
        path: path.to_path_buf(),
        source,
    })
}
