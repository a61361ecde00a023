//! Keymaster Server Binary
//!
//! Loads one config snapshot and serves the issuer API.

use anyhow::Context;
use keymaster_core::{BlobStore, Config, ResourceLoader};
use keymaster_issuer::backends::StsClient;
use keymaster_issuer::KeyWrapper;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use keymaster_server::{create_router, standard_registry, AppState, MemoryNonceStore, ServerSettings};

/// Cloud clients available to this build
#[derive(Default)]
struct CloudServices {
    sts: Option<Arc<dyn StsClient>>,
    wrapper: Option<Arc<dyn KeyWrapper>>,
    blob_store: Option<Arc<dyn BlobStore>>,
}

impl CloudServices {
    #[cfg(feature = "aws")]
    async fn connect(settings: &ServerSettings) -> Self {
        use keymaster_server::aws::{load_sdk_config, AwsKms, AwsSts, S3BlobStore};

        let sdk = load_sdk_config().await;
        Self {
            sts: Some(Arc::new(AwsSts::new(&sdk, settings).await)),
            wrapper: Some(Arc::new(AwsKms::new(&sdk, settings))),
            blob_store: Some(Arc::new(S3BlobStore::new(&sdk, settings))),
        }
    }

    #[cfg(not(feature = "aws"))]
    async fn connect(_settings: &ServerSettings) -> Self {
        tracing::warn!("Built without cloud services; iam_assume_role backends and delivery wrapping are unavailable");
        Self::default()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = ServerSettings::from_env()?;

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(settings.log_level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    let cloud = CloudServices::connect(&settings).await;

    let mut loader = ResourceLoader::new();
    if let Some(store) = cloud.blob_store.clone() {
        loader = loader.with_blob_store(store);
    }

    let document = loader
        .load(&settings.config_uri)
        .await
        .with_context(|| format!("Failed to read config from {}", settings.config_uri))?;
    let config = Config::load(&document, &loader)
        .await
        .context("Failed to load config snapshot")?;

    let registry = standard_registry(cloud.sts);

    info!(
        environment = %config.name,
        version = %config.version,
        backends = ?registry.registered_kinds(),
        port = settings.port,
        "Starting Keymaster server"
    );

    let mut state = AppState::new(config, registry)
        .context("Failed to prepare assertion verification")?
        .with_nonce_store(Arc::new(MemoryNonceStore::new(settings.nonce_ttl)));
    if let Some(wrapper) = cloud.wrapper {
        state = state.with_wrapper(wrapper);
    }

    let app = create_router(Arc::new(state));

    let addr = format!("0.0.0.0:{}", settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(addr = %addr, "Keymaster listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("Server error")?;

    Ok(())
}
