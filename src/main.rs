//! local-kms - a wire-compatible local key management service emulator.
//!
//! This binary wires together configuration, the persistent store, identity
//! loading, seed provisioning, and the axum HTTP server.

use std::panic;
use std::sync::Arc;

use local_kms::api::{router, AppState};
use local_kms::auth::identity::{Identity, IdentityManager};
use local_kms::auth::Authenticator;
use local_kms::config::Config;
use local_kms::store::Store;

/// Used when no identity file is configured: an unauthenticated caller acts
/// as an account-wide admin, matching the no-setup-required local dev
/// experience the rest of the service aims for.
fn open_anonymous_admin(config: &Config) -> IdentityManager {
    IdentityManager::new(vec![Identity {
        name: "anonymous".to_string(),
        account_id: config.account_id.clone(),
        credentials: vec![],
        targets: vec!["admin".to_string()],
    }])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("local-kms fatal error:");
        eprintln!("{}", panic_info);
        if let Some(location) = panic_info.location() {
            eprintln!("location: {}:{}:{}", location.file(), location.line(), location.column());
        }
    }));

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("===============================================================");
    log::info!("  local-kms {}", local_kms::VERSION);
    log::info!("===============================================================");

    let config = Config::from_env();
    log::info!("account id: {}, region: {}", config.account_id, config.region);
    log::info!("data path: {}", config.data_path);

    let store = Store::open(std::path::Path::new(&config.data_path))?;

    let identities = match std::fs::read_to_string(identities_path()) {
        Ok(content) => IdentityManager::from_yaml(&content).unwrap_or_else(|e| {
            log::error!("malformed identity file: {e}; falling back to an open anonymous admin identity");
            open_anonymous_admin(&config)
        }),
        Err(_) => {
            log::warn!("no identity file found; all requests will be treated as an anonymous admin");
            open_anonymous_admin(&config)
        }
    };
    let auth = Authenticator::new(identities);

    local_kms::seed::load(&config, &store);

    let state = Arc::new(AppState { store, auth, config: config.clone() });
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    log::info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn identities_path() -> String {
    std::env::var("KMS_IDENTITIES_PATH").unwrap_or_else(|_| "/init/identities.yaml".to_string())
}
