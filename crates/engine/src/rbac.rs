// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker-side authorization checks.
//!
//! The role/permission oracle is an external collaborator; this module
//! wraps it with a bounded, short-TTL decision cache. Staleness is
//! acceptable up to the TTL. Every decision is recorded to the audit
//! stream by the caller.

use async_trait::async_trait;
use cdr_core::{ActionClass, AssetId, Clock, TenantId};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::Duration;

/// Decision cache bounds.
const CACHE_CAPACITY: usize = 1024;
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RbacDecision {
    Allowed,
    Denied(String),
}

impl RbacDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RbacDecision::Allowed)
    }
}

/// External role/permission oracle.
#[async_trait]
pub trait RoleOracle: Send + Sync {
    async fn check(
        &self,
        actor_id: &str,
        tenant_id: &TenantId,
        asset_id: &AssetId,
        action_class: ActionClass,
    ) -> RbacDecision;
}

/// Oracle that allows everything. Deployments without a permission
/// service run with this.
pub struct AllowAllOracle;

#[async_trait]
impl RoleOracle for AllowAllOracle {
    async fn check(
        &self,
        _actor_id: &str,
        _tenant_id: &TenantId,
        _asset_id: &AssetId,
        _action_class: ActionClass,
    ) -> RbacDecision {
        RbacDecision::Allowed
    }
}

/// Fixed-rule oracle for tests and static deployments: explicit denies
/// win, everything else is allowed.
#[derive(Default)]
pub struct StaticOracle {
    denies: Vec<(String, String)>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deny `actor` on `asset`.
    pub fn deny(mut self, actor_id: &str, asset_id: &str) -> Self {
        self.denies
            .push((actor_id.to_string(), asset_id.to_string()));
        self
    }
}

#[async_trait]
impl RoleOracle for StaticOracle {
    async fn check(
        &self,
        actor_id: &str,
        _tenant_id: &TenantId,
        asset_id: &AssetId,
        _action_class: ActionClass,
    ) -> RbacDecision {
        let denied = self
            .denies
            .iter()
            .any(|(actor, asset)| actor == actor_id && asset == asset_id.as_str());
        if denied {
            RbacDecision::Denied(format!("{actor_id} may not touch {asset_id}"))
        } else {
            RbacDecision::Allowed
        }
    }
}

type CacheKey = (String, TenantId, AssetId, ActionClass);

struct CacheEntry {
    decision: RbacDecision,
    cached_at_ms: u64,
}

/// Read-through LRU cache in front of a [`RoleOracle`].
pub struct CachingRbacValidator<C: Clock> {
    oracle: Box<dyn RoleOracle>,
    cache: Mutex<LruCache<CacheKey, CacheEntry>>,
    clock: C,
}

impl<C: Clock> CachingRbacValidator<C> {
    pub fn new(oracle: Box<dyn RoleOracle>, clock: C) -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            oracle,
            cache: Mutex::new(LruCache::new(capacity)),
            clock,
        }
    }

    /// Check authorization, serving cached decisions up to the TTL.
    pub async fn check(
        &self,
        actor_id: &str,
        tenant_id: &TenantId,
        asset_id: &AssetId,
        action_class: ActionClass,
    ) -> RbacDecision {
        let key: CacheKey = (
            actor_id.to_string(),
            tenant_id.clone(),
            asset_id.clone(),
            action_class,
        );
        let now_ms = self.clock.epoch_ms();

        {
            let mut cache = self.cache.lock();
            if let Some(entry) = cache.get(&key) {
                if now_ms < entry.cached_at_ms + CACHE_TTL.as_millis() as u64 {
                    return entry.decision.clone();
                }
                cache.pop(&key);
            }
        }

        let decision = self
            .oracle
            .check(actor_id, tenant_id, asset_id, action_class)
            .await;
        self.cache.lock().put(
            key,
            CacheEntry {
                decision: decision.clone(),
                cached_at_ms: now_ms,
            },
        );
        decision
    }
}

#[cfg(test)]
#[path = "rbac_tests.rs"]
mod tests;
