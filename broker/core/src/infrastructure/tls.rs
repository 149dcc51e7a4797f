// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! TLS material loading and client-certificate inspection.
//!
//! Both listeners present the same server certificate. The API endpoint
//! requires a client certificate chaining to the configured root; the open
//! endpoint accepts anonymous clients too, since applications without
//! per-instance certificates are identified by source address instead.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use x509_parser::prelude::*;

use crate::domain::config::CertsConfig;
use crate::domain::error::BrokerError;

/// Builds the rustls server config for one listener.
pub fn server_config(
    certs: &CertsConfig,
    require_client_auth: bool,
) -> Result<Arc<ServerConfig>, BrokerError> {
    let roots = Arc::new(load_root_store(&certs.ca_root_path)?);
    let builder = WebPkiClientVerifier::builder(roots);
    let verifier = if require_client_auth {
        builder
    } else {
        builder.allow_unauthenticated()
    }
    .build()
    .map_err(|e| BrokerError::Config(format!("client verifier: {e}")))?;

    let chain = load_certs(&certs.server_cert_path)?;
    let key = load_key(&certs.server_key_path)?;

    let mut config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)
        .map_err(|e| BrokerError::Config(format!("server certificate: {e}")))?;
    // Websocket upgrades need HTTP/1.1; don't offer h2.
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Subject Common Name of the presented leaf certificate, if parseable.
pub fn leaf_common_name(cert: &CertificateDer<'_>) -> Option<String> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref()).ok()?;
    let cn = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string);
    cn
}

fn load_root_store(path: &Path) -> Result<RootCertStore, BrokerError> {
    let mut store = RootCertStore::empty();
    for cert in load_certs(path)? {
        store
            .add(cert)
            .map_err(|e| BrokerError::Config(format!("invalid CA certificate: {e}")))?;
    }
    if store.is_empty() {
        return Err(BrokerError::Config(format!(
            "no CA certificates in {}",
            path.display()
        )));
    }
    Ok(store)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, BrokerError> {
    let file = File::open(path)
        .map_err(|e| BrokerError::Config(format!("failed to open {}: {e}", path.display())))?;
    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BrokerError::Config(format!("failed to parse {}: {e}", path.display())))
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, BrokerError> {
    let file = File::open(path)
        .map_err(|e| BrokerError::Config(format!("failed to open {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| BrokerError::Config(format!("failed to parse {}: {e}", path.display())))?
        .ok_or_else(|| BrokerError::Config(format!("no private key in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_material_is_a_config_error() {
        let certs = CertsConfig {
            ca_root_path: PathBuf::from("/nonexistent/rootCA.pem"),
            server_cert_path: PathBuf::from("/nonexistent/server.pem"),
            server_key_path: PathBuf::from("/nonexistent/server.key"),
            common_name: "edge.aegis".to_string(),
        };
        let err = server_config(&certs, true).unwrap_err();
        assert!(matches!(err, BrokerError::Config(_)));
    }

    #[test]
    fn garbage_der_has_no_common_name() {
        let cert = CertificateDer::from(vec![0u8; 16]);
        assert!(leaf_common_name(&cert).is_none());
    }
}
