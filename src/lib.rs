//! Chat Guard
//!
//! Concurrency and admission control for a multi-session chat backend.
//! Several browser tabs or devices may talk to the same conversation; this
//! service makes sure only one of them drives it at a time, keeps any single
//! caller from flooding the process, and caches the per-user lookups every
//! request needs.
//!
//! # Architecture
//!
//! - **Admission**: per-origin ceiling on concurrent requests, outermost stateful layer
//! - **Single-flight**: at most one in-flight generation per conversation
//! - **Cache**: short-lived read-through cache for profile and settings
//! - **Collaborators**: token verification, durable store, completion API
//!
//! # Modules
//!
//! - [`session`]: conversation single-flight coordinator
//! - [`security`]: admission control and authentication
//! - [`cache`]: TTL cache
//! - [`sweeper`]: cancellable background maintenance
//! - [`service`]: business operations
//! - [`api`]: HTTP handlers
//! - [`persistence`], [`llm`]: outbound collaborators

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod llm;
pub mod persistence;
pub mod security;
pub mod server;
pub mod service;
pub mod session;
pub mod sweeper;
pub mod telemetry;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::TtlCache;
use crate::config::AppConfig;
use crate::llm::CompletionClient;
use crate::persistence::{AccountStore, ConversationStore};
use crate::security::admission::AdmissionController;
use crate::security::verifier::TokenVerifier;
use crate::service::{AccountService, ChatService};
use crate::session::ConversationCoordinator;
use crate::sweeper::Sweepers;

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Global Configuration
    pub config: Arc<AppConfig>,
    /// Per-origin concurrent request limiter
    pub admission: AdmissionController,
    /// Bearer token verification
    pub verifier: Arc<dyn TokenVerifier>,
    pub coordinator: ConversationCoordinator,
    pub chats: Arc<ChatService>,
    pub accounts: Arc<AccountService>,
}

/// Outbound dependencies, chosen by the binary or by a test.
#[derive(Clone, Debug)]
pub struct Collaborators {
    pub verifier: Arc<dyn TokenVerifier>,
    pub conversations: Arc<dyn ConversationStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub completion: Arc<dyn CompletionClient>,
}

impl AppState {
    /// Build the owned runtime components from configuration.
    pub fn new(config: Arc<AppConfig>, collaborators: Collaborators) -> Self {
        let coordinator =
            ConversationCoordinator::with_idle_timeout(config.single_flight.idle_timeout());
        let admission = AdmissionController::new(config.admission.max_in_flight_per_origin);

        let accounts = Arc::new(AccountService::new(
            collaborators.accounts,
            TtlCache::new(config.cache.ttl()),
            TtlCache::new(config.cache.ttl()),
            config.store.timeout(),
        ));
        let chats = Arc::new(ChatService::new(
            collaborators.conversations,
            Arc::clone(&accounts),
            collaborators.completion,
            coordinator.clone(),
            config.store.timeout(),
            config.generation.timeout(),
        ));

        Self {
            config,
            admission,
            verifier: collaborators.verifier,
            coordinator,
            chats,
            accounts,
        }
    }

    /// Start the idle-session and expired-entry sweeps. They stop when `token` is cancelled.
    pub fn spawn_sweepers(&self, token: CancellationToken) -> Sweepers {
        let mut sweepers = Sweepers::new(token);

        let coordinator = self.coordinator.clone();
        sweepers.spawn(
            "single_flight",
            self.config.single_flight.sweep_interval(),
            move |now| coordinator.sweep_idle(now),
        );

        let profiles = self.accounts.profiles().clone();
        let settings = self.accounts.settings_cache().clone();
        sweepers.spawn("cache", self.config.cache.sweep_interval(), move |now| {
            profiles.purge_expired(now) + settings.purge_expired(now)
        });

        sweepers
    }
}
