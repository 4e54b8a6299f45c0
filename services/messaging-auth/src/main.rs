use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use common_auth::{AuthenticationService, UserManagementClient};
use common_config::load;
use common_obs::ObsInit;
use messaging_auth::config::{MessagingAuthConfig, TlsConfig};
use messaging_auth::{build_router, AppState, SERVICE_NAME};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig as RustlsServerConfig};
use tokio::fs;
use tokio::net::TcpListener;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn build_sha() -> &'static str {
    option_env!("BUILD_SHA").unwrap_or("unknown")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ObsInit::init(SERVICE_NAME)?;

    let config = load::<MessagingAuthConfig>()?;
    let addr = config.socket_addr()?;
    tracing::info!(
        event = "service_start",
        service = SERVICE_NAME,
        version = VERSION,
        build_sha = build_sha(),
        listen_addr = %addr,
        user_management = %config.user_management.url,
        tls = config.tls.is_some(),
        "starting service"
    );

    let auth: Arc<dyn AuthenticationService> =
        Arc::new(UserManagementClient::new(config.user_management.settings())?);
    let state = Arc::new(AppState::new(auth, config.user_management.timeout()));
    let router = build_router(state);

    match &config.tls {
        Some(tls) => {
            let rustls_config = build_rustls_config(tls).await?;
            axum_server::bind_rustls(addr, rustls_config)
                .serve(router.into_make_service())
                .await?;
        }
        None => {
            let listener = TcpListener::bind(addr).await?;
            axum::serve(listener, router.into_make_service()).await?;
        }
    }

    tracing::info!(event = "service_stop", service = SERVICE_NAME);

    Ok(())
}

async fn build_rustls_config(
    config: &TlsConfig,
) -> Result<RustlsConfig, Box<dyn std::error::Error>> {
    let certs = load_certs(&config.cert_path).await?;
    let key = load_private_key(&config.key_path).await?;

    let builder = RustlsServerConfig::builder();
    let server_config = match &config.client_ca_path {
        Some(client_ca_path) => {
            let client_store = load_client_ca(client_ca_path).await?;
            let verifier = WebPkiClientVerifier::builder(Arc::new(client_store)).build()?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)?
        }
        None => builder.with_no_client_auth().with_single_cert(certs, key)?,
    };

    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}

async fn load_certs(
    path: &std::path::Path,
) -> Result<Vec<CertificateDer<'static>>, Box<dyn std::error::Error>> {
    let bytes = fs::read(path).await?;
    let mut reader = std::io::Cursor::new(bytes);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(format!("no certificate found in {}", path.display()).into());
    }
    Ok(certs)
}

async fn load_private_key(
    path: &std::path::Path,
) -> Result<PrivateKeyDer<'static>, Box<dyn std::error::Error>> {
    let bytes = fs::read(path).await?;
    let mut reader = std::io::Cursor::new(bytes);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| format!("no private key found in {}", path.display()).into())
}

async fn load_client_ca(
    path: &std::path::Path,
) -> Result<RootCertStore, Box<dyn std::error::Error>> {
    let mut store = RootCertStore::empty();
    for cert in load_certs(path).await? {
        store.add(cert)?;
    }
    Ok(store)
}
