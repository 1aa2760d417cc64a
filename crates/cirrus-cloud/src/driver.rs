//! Authenticated driver cache
//!
//! One cached handle per connector, tagged with the fingerprint of the
//! credential entry that produced it. The slot lock is held while
//! authenticating, so concurrent callers wait for the in-flight
//! authentication and reuse its result instead of starting their own.

use crate::credentials::Credential;
use crate::error::Result;
use std::future::Future;
use tokio::sync::Mutex;

struct CachedDriver<D> {
    fingerprint: u64,
    credential_id: Option<String>,
    driver: D,
}

pub struct DriverCache<D> {
    slot: Mutex<Option<CachedDriver<D>>>,
}

impl<D> Default for DriverCache<D> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }
}

impl<D: Clone> DriverCache<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached driver for `credential`, running `connect` when the
    /// cache is empty or was built from a different entry
    pub async fn get_or_connect<F, Fut>(&self, credential: &Credential, connect: F) -> Result<D>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<D>>,
    {
        let fingerprint = credential.fingerprint();
        let mut slot = self.slot.lock().await;

        if let Some(cached) = slot.as_ref() {
            if cached.fingerprint == fingerprint {
                return Ok(cached.driver.clone());
            }
            if cached.credential_id == credential.id {
                tracing::info!(
                    credential = ?credential.id,
                    "Credential changed, authenticating again"
                );
            }
        }

        let driver = connect().await?;
        *slot = Some(CachedDriver {
            fingerprint,
            credential_id: credential.id.clone(),
            driver: driver.clone(),
        });
        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn entry(password: &str) -> Credential {
        Credential {
            password: Some(password.into()),
            ..Credential::new("ost2", "OpenStack")
        }
    }

    #[tokio::test]
    async fn test_reuses_driver_for_unchanged_credential() {
        let cache = DriverCache::new();
        let connects = AtomicU32::new(0);

        for _ in 0..2 {
            let driver = cache
                .get_or_connect(&entry("token"), || async {
                    connects.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CloudError>("driver")
                })
                .await
                .unwrap();
            assert_eq!(driver, "driver");
        }
        assert_eq!(connects.load(Ordering::SeqCst), 1);

        cache
            .get_or_connect(&entry("new_token"), || async {
                connects.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CloudError>("driver2")
            })
            .await
            .unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_cached() {
        let cache: DriverCache<&str> = DriverCache::new();

        let err = cache
            .get_or_connect(&entry("token"), || async {
                Err(CloudError::AuthenticationFailed("401".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::AuthenticationFailed(_)));

        let connects = AtomicU32::new(0);
        let driver = cache
            .get_or_connect(&entry("token"), || async {
                connects.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CloudError>("driver")
            })
            .await
            .unwrap();
        assert_eq!(driver, "driver");
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_authenticate_once() {
        let cache = Arc::new(DriverCache::new());
        let connects = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let connects = connects.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_connect(&entry("token"), || async {
                        connects.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok::<_, CloudError>(7u32)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 7);
        }
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }
}
