// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Identity resolution for inbound connections.
//!
//! Two paths, one connection type:
//!
//! 1. A client certificate whose Common Name is a per-application identity
//!    (anything other than the broker's shared access CN) resolves directly.
//! 2. Otherwise the validation service is asked for the identity bound to the
//!    peer's source address, trusting the orchestrator that assigned it.
//!
//! Neither path succeeding rejects the connection with `IdentityUnresolved`
//! before any API dispatch. Successful IP lookups are cached for a bounded
//! time; any lookup failure invalidates the cached entry for that address.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::error::BrokerError;
use crate::domain::identity::{AppId, ResolvedIdentity};

/// Bounded lifetime of a cached IP-to-identity association.
const LOOKUP_CACHE_TTL: Duration = Duration::from_secs(60);

/// Outbound port to the validation service.
///
/// `Ok(None)` means the service answered but does not know the address.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn lookup_by_address(&self, ip: IpAddr) -> Result<Option<AppId>, BrokerError>;
}

struct CacheEntry {
    app_id: AppId,
    expires_at: Instant,
}

pub struct IdentityResolver {
    lookup: Arc<dyn IdentityLookup>,
    access_common_name: String,
    cache: Mutex<HashMap<IpAddr, CacheEntry>>,
}

impl IdentityResolver {
    pub fn new(lookup: Arc<dyn IdentityLookup>, access_common_name: impl Into<String>) -> Self {
        Self {
            lookup,
            access_common_name: access_common_name.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a connection's identity from its presented Common Name (if
    /// any) and its peer address. Called exactly once per connection.
    pub async fn resolve(
        &self,
        common_name: Option<&str>,
        peer_ip: IpAddr,
    ) -> Result<ResolvedIdentity, BrokerError> {
        if let Some(cn) = common_name {
            if cn != self.access_common_name {
                debug!(common_name = cn, "resolved identity from client certificate");
                return Ok(ResolvedIdentity::Certificate {
                    app_id: AppId::from(cn),
                });
            }
        }

        if let Some(app_id) = self.cached(peer_ip) {
            debug!(%peer_ip, %app_id, "resolved identity from lookup cache");
            return Ok(ResolvedIdentity::IpLookup { app_id });
        }

        match self.lookup.lookup_by_address(peer_ip).await {
            Ok(Some(app_id)) => {
                self.cache.lock().insert(
                    peer_ip,
                    CacheEntry {
                        app_id: app_id.clone(),
                        expires_at: Instant::now() + LOOKUP_CACHE_TTL,
                    },
                );
                debug!(%peer_ip, %app_id, "resolved identity from validation service");
                Ok(ResolvedIdentity::IpLookup { app_id })
            }
            Ok(None) => {
                self.cache.lock().remove(&peer_ip);
                warn!(%peer_ip, "validation service does not know this address");
                Err(BrokerError::IdentityUnresolved(format!(
                    "unknown address {peer_ip}"
                )))
            }
            Err(e) => {
                self.cache.lock().remove(&peer_ip);
                warn!(%peer_ip, error = %e, "validation service lookup failed");
                Err(BrokerError::IdentityUnresolved(format!(
                    "validation lookup for {peer_ip} failed: {e}"
                )))
            }
        }
    }

    fn cached(&self, peer_ip: IpAddr) -> Option<AppId> {
        let mut cache = self.cache.lock();
        match cache.get(&peer_ip) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.app_id.clone()),
            Some(_) => {
                cache.remove(&peer_ip);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubLookup {
        answer: Option<AppId>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubLookup {
        fn answering(app_id: &str) -> Self {
            Self {
                answer: Some(AppId::from(app_id)),
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn unknown() -> Self {
            Self {
                answer: None,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn unreachable() -> Self {
            Self {
                answer: None,
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl IdentityLookup for StubLookup {
        async fn lookup_by_address(&self, _ip: IpAddr) -> Result<Option<AppId>, BrokerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BrokerError::IdentityUnresolved("unreachable".into()));
            }
            Ok(self.answer.clone())
        }
    }

    fn peer() -> IpAddr {
        "10.16.0.5".parse().unwrap()
    }

    #[tokio::test]
    async fn per_application_certificate_skips_lookup() {
        let lookup = Arc::new(StubLookup::answering("other"));
        let resolver = IdentityResolver::new(lookup.clone(), "edge.aegis");

        let identity = resolver.resolve(Some("testapp"), peer()).await.unwrap();
        assert_eq!(identity.app_id(), &AppId::from("testapp"));
        assert!(matches!(identity, ResolvedIdentity::Certificate { .. }));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn access_certificate_falls_through_to_lookup() {
        let lookup = Arc::new(StubLookup::answering("testapp"));
        let resolver = IdentityResolver::new(lookup.clone(), "edge.aegis");

        let identity = resolver.resolve(Some("edge.aegis"), peer()).await.unwrap();
        assert!(matches!(identity, ResolvedIdentity::IpLookup { .. }));
        assert_eq!(identity.app_id(), &AppId::from("testapp"));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_resolution_is_served_from_cache() {
        let lookup = Arc::new(StubLookup::answering("testapp"));
        let resolver = IdentityResolver::new(lookup.clone(), "edge.aegis");

        resolver.resolve(None, peer()).await.unwrap();
        resolver.resolve(None, peer()).await.unwrap();
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_entries_expire() {
        let lookup = Arc::new(StubLookup::answering("testapp"));
        let resolver = IdentityResolver::new(lookup.clone(), "edge.aegis");

        resolver.resolve(None, peer()).await.unwrap();
        tokio::time::advance(LOOKUP_CACHE_TTL + Duration::from_secs(1)).await;
        resolver.resolve(None, peer()).await.unwrap();
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    }

    struct FlakyLookup {
        answers: parking_lot::Mutex<Vec<Result<Option<AppId>, ()>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityLookup for FlakyLookup {
        async fn lookup_by_address(&self, _ip: IpAddr) -> Result<Option<AppId>, BrokerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.answers.lock().remove(0) {
                Ok(answer) => Ok(answer),
                Err(()) => Err(BrokerError::IdentityUnresolved("unreachable".into())),
            }
        }
    }

    #[tokio::test]
    async fn lookup_failure_invalidates_the_cached_entry() {
        let lookup = Arc::new(FlakyLookup {
            answers: parking_lot::Mutex::new(vec![
                Ok(Some(AppId::from("testapp"))),
                Err(()),
                Ok(Some(AppId::from("testapp"))),
            ]),
            calls: AtomicUsize::new(0),
        });
        let resolver = IdentityResolver::new(lookup.clone(), "edge.aegis");

        // First resolution populates the cache
        resolver.resolve(None, peer()).await.unwrap();
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);

        // Expire it, then fail the refresh: the entry must not be reused
        tokio::time::pause();
        tokio::time::advance(LOOKUP_CACHE_TTL + Duration::from_secs(1)).await;
        resolver.resolve(None, peer()).await.unwrap_err();
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);

        // The next attempt goes back to the service, not the cache
        resolver.resolve(None, peer()).await.unwrap();
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unknown_address_is_rejected() {
        let resolver = IdentityResolver::new(Arc::new(StubLookup::unknown()), "edge.aegis");
        let err = resolver.resolve(None, peer()).await.unwrap_err();
        assert!(matches!(err, BrokerError::IdentityUnresolved(_)));
    }

    #[tokio::test]
    async fn unreachable_service_is_rejected() {
        let resolver = IdentityResolver::new(Arc::new(StubLookup::unreachable()), "edge.aegis");
        let err = resolver.resolve(None, peer()).await.unwrap_err();
        assert!(matches!(err, BrokerError::IdentityUnresolved(_)));
    }
}
