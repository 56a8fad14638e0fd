use std::sync::Arc;
use std::time::Duration;

use crate::cache::TtlCache;
use crate::error::AppError;
use crate::persistence::{AccountStore, Profile, ProfileUpdate, Settings, SettingsUpdate};

use super::{STORE_SERVICE, bounded};

/// Profile and settings access with a read-through cache per record type.
///
/// Every successful write invalidates the caller's cache entry before returning,
/// so a read issued after the write observes it.
#[derive(Debug)]
pub struct AccountService {
    store: Arc<dyn AccountStore>,
    profiles: TtlCache<String, Profile>,
    settings: TtlCache<String, Settings>,
    store_timeout: Duration,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        profiles: TtlCache<String, Profile>,
        settings: TtlCache<String, Settings>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            profiles,
            settings,
            store_timeout,
        }
    }

    pub fn profiles(&self) -> &TtlCache<String, Profile> {
        &self.profiles
    }

    pub fn settings_cache(&self) -> &TtlCache<String, Settings> {
        &self.settings
    }

    pub async fn profile(&self, user_id: &str) -> Result<Profile, AppError> {
        let key = user_id.to_string();
        if let Some(profile) = self.profiles.get(&key) {
            tracing::debug!(user_id, "Profile cache hit");
            return Ok(profile);
        }

        let profile = bounded(
            STORE_SERVICE,
            self.store_timeout,
            self.store.get_profile(user_id),
        )
        .await?
        .ok_or_else(|| AppError::NotFound("User profile not found".to_string()))?;

        self.profiles.insert(key, profile.clone());
        Ok(profile)
    }

    pub async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<Profile, AppError> {
        let updated = bounded(
            STORE_SERVICE,
            self.store_timeout,
            self.store.update_profile(user_id, update),
        )
        .await?;
        self.profiles.invalidate(&user_id.to_string());

        updated.ok_or_else(|| AppError::NotFound("User profile not found".to_string()))
    }

    /// Settings for the user, created empty on first access.
    pub async fn settings(&self, user_id: &str) -> Result<Settings, AppError> {
        let key = user_id.to_string();
        if let Some(settings) = self.settings.get(&key) {
            tracing::debug!(user_id, "Settings cache hit");
            return Ok(settings);
        }

        let settings = bounded(
            STORE_SERVICE,
            self.store_timeout,
            self.store.get_or_create_settings(user_id),
        )
        .await?;

        self.settings.insert(key, settings.clone());
        Ok(settings)
    }

    pub async fn update_settings(
        &self,
        user_id: &str,
        update: &SettingsUpdate,
    ) -> Result<Settings, AppError> {
        let updated = bounded(
            STORE_SERVICE,
            self.store_timeout,
            self.store.update_settings(user_id, update),
        )
        .await?;
        self.settings.invalidate(&user_id.to_string());
        tracing::debug!(user_id, "Settings updated, cache entry invalidated");
        Ok(updated)
    }

    /// The user's generation API key, read through the settings cache.
    pub async fn generation_credential(&self, user_id: &str) -> Result<String, AppError> {
        self.settings(user_id)
            .await?
            .gemini_api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                AppError::Validation("Gemini API key not found in user settings".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::providers::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts settings reads reaching the store.
    #[derive(Debug, Default)]
    struct CountingStore {
        inner: MemoryStore,
        settings_reads: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AccountStore for CountingStore {
        async fn get_profile(
            &self,
            user_id: &str,
        ) -> Result<Option<Profile>, crate::error::CollaboratorError> {
            self.inner.get_profile(user_id).await
        }

        async fn update_profile(
            &self,
            user_id: &str,
            update: &ProfileUpdate,
        ) -> Result<Option<Profile>, crate::error::CollaboratorError> {
            self.inner.update_profile(user_id, update).await
        }

        async fn get_or_create_settings(
            &self,
            user_id: &str,
        ) -> Result<Settings, crate::error::CollaboratorError> {
            self.settings_reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_or_create_settings(user_id).await
        }

        async fn update_settings(
            &self,
            user_id: &str,
            update: &SettingsUpdate,
        ) -> Result<Settings, crate::error::CollaboratorError> {
            self.inner.update_settings(user_id, update).await
        }
    }

    fn service(store: Arc<CountingStore>) -> AccountService {
        AccountService::new(
            store,
            TtlCache::new(Duration::from_secs(300)),
            TtlCache::new(Duration::from_secs(300)),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_settings_read_through() {
        let store = Arc::new(CountingStore::default());
        let accounts = service(store.clone());

        accounts.settings("alice").await.unwrap();
        accounts.settings("alice").await.unwrap();
        assert_eq!(store.settings_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_settings_write_invalidates() {
        let store = Arc::new(CountingStore::default());
        let accounts = service(store.clone());
        assert!(accounts.settings("alice").await.unwrap().theme.is_none());

        accounts
            .update_settings(
                "alice",
                &SettingsUpdate {
                    theme: Some("dark".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let settings = accounts.settings("alice").await.unwrap();
        assert_eq!(settings.theme.as_deref(), Some("dark"));
        assert_eq!(store.settings_reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_expire_after_ttl() {
        let store = Arc::new(CountingStore::default());
        let accounts = service(store.clone());

        accounts.settings("alice").await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        accounts.settings("alice").await.unwrap();
        assert_eq!(store.settings_reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_credential_is_a_validation_error() {
        let accounts = service(Arc::new(CountingStore::default()));
        let err = accounts.generation_credential("alice").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_profile_cached_and_invalidated() {
        let store = Arc::new(CountingStore::default());
        store.inner.insert_profile(Profile {
            id: "alice".into(),
            email: Some("alice@example.com".into()),
            full_name: None,
            avatar_url: None,
            updated_at: None,
        });
        let accounts = service(store);

        assert!(accounts.profile("alice").await.unwrap().full_name.is_none());
        assert_eq!(accounts.profiles().len(), 1);

        let updated = accounts
            .update_profile(
                "alice",
                &ProfileUpdate {
                    full_name: Some("Alice".into()),
                    avatar_url: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.full_name.as_deref(), Some("Alice"));
        assert!(accounts.profiles().is_empty());
        assert_eq!(
            accounts.profile("alice").await.unwrap().full_name.as_deref(),
            Some("Alice")
        );

        assert!(matches!(
            accounts.profile("ghost").await,
            Err(AppError::NotFound(_))
        ));
    }
}
