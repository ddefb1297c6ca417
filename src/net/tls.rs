//! TLS configuration and certificate loading.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

use crate::config::CredentialsConfig;

/// Load a rustls server config from a subscription's credentials.
pub async fn load_tls_config(credentials: &CredentialsConfig) -> Result<RustlsConfig, std::io::Error> {
    let cert_path = Path::new(&credentials.cert_path);
    let key_path = Path::new(&credentials.key_path);

    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }

    RustlsConfig::from_pem_file(cert_path, key_path).await
}
