//! TLS material loading for the listening socket.

use crate::server::config::TransportSecurity;
use farm_core::{Error, Result};
use std::path::Path;
use tonic::transport::{Certificate, Identity, ServerTlsConfig};

/// Builds the `tonic` TLS configuration for `security`.
///
/// Returns `None` for plaintext. With [`TransportSecurity::MutualAuth`],
/// client certificates are required, not optional.
///
/// # Errors
///
/// Returns [`Error::Tls`] if any PEM file cannot be read.
pub fn server_tls_config(security: &TransportSecurity) -> Result<Option<ServerTlsConfig>> {
    match security {
        TransportSecurity::None => Ok(None),
        TransportSecurity::ServerAuth {
            cert_chain,
            private_key,
        } => {
            let identity = load_identity(cert_chain, private_key)?;
            Ok(Some(ServerTlsConfig::new().identity(identity)))
        }
        TransportSecurity::MutualAuth {
            cert_chain,
            private_key,
            trust_certs,
        } => {
            let identity = load_identity(cert_chain, private_key)?;
            let client_ca = Certificate::from_pem(read_pem(trust_certs)?);
            Ok(Some(
                ServerTlsConfig::new()
                    .identity(identity)
                    .client_ca_root(client_ca)
                    .client_auth_optional(false),
            ))
        }
    }
}

fn load_identity(cert_chain: &Path, private_key: &Path) -> Result<Identity> {
    Ok(Identity::from_pem(
        read_pem(cert_chain)?,
        read_pem(private_key)?,
    ))
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| Error::Tls {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_has_no_tls_config() {
        assert!(server_tls_config(&TransportSecurity::None).unwrap().is_none());
    }

    #[test]
    fn unreadable_material_is_reported_with_its_path() {
        let security = TransportSecurity::ServerAuth {
            cert_chain: "/missing/chain.pem".into(),
            private_key: "/missing/key.pem".into(),
        };
        match server_tls_config(&security) {
            Err(Error::Tls { path, .. }) => assert_eq!(path, Path::new("/missing/chain.pem")),
            other => panic!("expected TLS error, got {other:?}"),
        }
    }
}
