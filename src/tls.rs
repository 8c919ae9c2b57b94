use crate::ca::CaIdentity;
use crate::util::{Result, StasisError};
use rustls::{Certificate, PrivateKey, ServerConfig};
use rustls_pemfile::{certs, pkcs8_private_keys};

/// builds the rustls server configuration for the secure listener from the
/// generated ca identity. actix adds the h2 and http/1.1 alpn protocols when
/// the listener is bound.
pub fn load_rustls_config(identity: &CaIdentity) -> Result<ServerConfig> {
    // load certificate(s) from pem
    let cert_chain: Vec<Certificate> = certs(&mut identity.certificate_pem.as_bytes())
        .map_err(|e| StasisError::TlsConfig(format!("failed to parse certs: {}", e)))?
        .into_iter()
        .map(Certificate)
        .collect();

    if cert_chain.is_empty() {
        return Err(StasisError::TlsConfig("no certificate in ca identity".to_string()));
    }

    // load private key from pem
    let mut keys = pkcs8_private_keys(&mut identity.private_key_pem.as_bytes())
        .map_err(|e| StasisError::TlsConfig(format!("failed to parse private key: {}", e)))?;

    if keys.is_empty() {
        return Err(StasisError::TlsConfig("no private keys found in ca identity".to_string()));
    }

    let private_key = PrivateKey(keys.remove(0));

    // create server config with modern TLS settings
    let server_config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .map_err(|e| StasisError::TlsConfig(format!("tls config error: {}", e)))?;

    Ok(server_config)
}
