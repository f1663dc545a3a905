//! Trust anchors and crypto provider for the HTTPS connector.

use std::sync::{Arc, OnceLock};

use rustls::RootCertStore;
use rustls::crypto::CryptoProvider;
use rustls_pki_types::CertificateDer;

use crate::error::HttpError;

/// Reading the OS store is slow on macOS and Windows; do it once per process.
static OS_ROOTS: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

pub fn os_root_certs() -> &'static [CertificateDer<'static>] {
    OS_ROOTS
        .get_or_init(|| {
            let loaded = rustls_native_certs::load_native_certs();
            for err in &loaded.errors {
                tracing::warn!(error = %err, "skipping unreadable OS root certificate");
            }
            tracing::debug!(count = loaded.certs.len(), "OS root certificates loaded");
            loaded.certs
        })
        .as_slice()
}

/// The installed process default, or aws-lc-rs. Never installs a default.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

fn tls_error(msg: String) -> HttpError {
    HttpError::Tls(msg.into())
}

/// Client config trusting the OS store. An empty or unparsable store fails
/// here, when the client is built, not on the first handshake.
pub fn os_roots_config() -> Result<rustls::ClientConfig, HttpError> {
    let certs = os_root_certs();
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs.iter().cloned());
    if ignored > 0 {
        tracing::warn!(added, ignored, "some OS root certificates failed to parse");
    }
    if added == 0 {
        return Err(tls_error(format!(
            "OS trust store yielded no usable root certificates ({} found)",
            certs.len()
        )));
    }

    Ok(rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error(format!("protocol versions unavailable: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth())
}
