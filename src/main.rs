//! Chat Guard server entry point.

use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use mimalloc::MiMalloc;

use chat_guard::Collaborators;
use chat_guard::config::{AppConfig, StoreProvider};
use chat_guard::llm::GeminiClient;
use chat_guard::persistence::providers::{MemoryStore, RestStore};
use chat_guard::persistence::{AccountStore, ConversationStore};
use chat_guard::security::verifier::JwtVerifier;
use chat_guard::{server, telemetry};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    telemetry::init();

    let config = Arc::new(AppConfig::load().context("Failed to load configuration")?);
    tracing::info!(
        name: "config.loaded",
        store = ?config.store.provider,
        model = %config.generation.model,
        "Configuration loaded"
    );

    let (conversations, accounts) = stores(&config)?;
    let mut verifier = JwtVerifier::hs256(&config.security.jwt_secret);
    if let Some(audience) = config.security.audience() {
        verifier = verifier.with_audience(audience);
    }
    let collaborators = Collaborators {
        verifier: Arc::new(verifier),
        conversations,
        accounts,
        completion: Arc::new(GeminiClient::new(config.generation.gemini_settings())),
    };

    server::start_server(config, collaborators).await
}

type Stores = (Arc<dyn ConversationStore>, Arc<dyn AccountStore>);

fn stores(config: &AppConfig) -> anyhow::Result<Stores> {
    match config.store.provider {
        StoreProvider::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            let store = Arc::new(MemoryStore::new());
            let conversations: Arc<dyn ConversationStore> = store.clone();
            let accounts: Arc<dyn AccountStore> = store;
            Ok((conversations, accounts))
        }
        StoreProvider::Rest => {
            let url = config
                .store
                .url
                .as_deref()
                .context("store.url is required for the rest provider")?;
            let key = config.store.api_key.as_deref().unwrap_or_default();
            let store = Arc::new(
                RestStore::new(url, key, config.store.timeout())
                    .context("Failed to build store client")?,
            );
            let conversations: Arc<dyn ConversationStore> = store.clone();
            let accounts: Arc<dyn AccountStore> = store;
            Ok((conversations, accounts))
        }
    }
}
