//! Observability hooks for branch lifecycle and cache effectiveness.

use crate::actor::ActorId;
use crate::ids::{EntityId, TenantId};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Receives routing-tree and profile-cache events.
///
/// Implementations must be cheap; hooks run inline on actor and caller
/// threads.
pub trait RoutingObserver: Send + Sync {
  /// A tenant or entity branch was initialised.
  fn on_branch_created(&self, actor_id: &ActorId) {
    let _ = actor_id;
  }

  /// A tenant or entity branch was destroyed.
  fn on_branch_destroyed(&self, actor_id: &ActorId) {
    let _ = actor_id;
  }

  /// A profile lookup found the tenant's cache entry.
  fn on_cache_hit(&self, tenant_id: TenantId, profile_id: &EntityId) {
    let _ = (tenant_id, profile_id);
  }

  /// A profile lookup found nothing for the profile.
  fn on_cache_miss(&self, tenant_id: TenantId, profile_id: &EntityId) {
    let _ = (tenant_id, profile_id);
  }
}

/// Logs every hook at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl RoutingObserver for TracingObserver {
  fn on_branch_created(&self, actor_id: &ActorId) {
    debug!(actor = %actor_id, "Branch created");
  }

  fn on_branch_destroyed(&self, actor_id: &ActorId) {
    debug!(actor = %actor_id, "Branch destroyed");
  }

  fn on_cache_hit(&self, tenant_id: TenantId, profile_id: &EntityId) {
    debug!(tenant = %tenant_id, profile = %profile_id, "Profile cache hit");
  }

  fn on_cache_miss(&self, tenant_id: TenantId, profile_id: &EntityId) {
    debug!(tenant = %tenant_id, profile = %profile_id, "Profile cache miss");
  }
}

/// Keeps atomic counters of every hook.
#[derive(Debug, Default)]
pub struct CountingObserver {
  branches_created: AtomicU64,
  branches_destroyed: AtomicU64,
  cache_hits: AtomicU64,
  cache_misses: AtomicU64,
}

impl CountingObserver {
  /// Creates zeroed counters.
  pub fn new() -> Self {
    Self::default()
  }

  /// Branches created so far.
  pub fn branches_created(&self) -> u64 {
    self.branches_created.load(Ordering::Relaxed)
  }

  /// Branches destroyed so far.
  pub fn branches_destroyed(&self) -> u64 {
    self.branches_destroyed.load(Ordering::Relaxed)
  }

  /// Branches currently alive.
  pub fn live_branches(&self) -> u64 {
    self.branches_created().saturating_sub(self.branches_destroyed())
  }

  /// Cache hits so far.
  pub fn cache_hits(&self) -> u64 {
    self.cache_hits.load(Ordering::Relaxed)
  }

  /// Cache misses so far.
  pub fn cache_misses(&self) -> u64 {
    self.cache_misses.load(Ordering::Relaxed)
  }
}

impl RoutingObserver for CountingObserver {
  fn on_branch_created(&self, _actor_id: &ActorId) {
    self.branches_created.fetch_add(1, Ordering::Relaxed);
  }

  fn on_branch_destroyed(&self, _actor_id: &ActorId) {
    self.branches_destroyed.fetch_add(1, Ordering::Relaxed);
  }

  fn on_cache_hit(&self, _tenant_id: TenantId, _profile_id: &EntityId) {
    self.cache_hits.fetch_add(1, Ordering::Relaxed);
  }

  fn on_cache_miss(&self, _tenant_id: TenantId, _profile_id: &EntityId) {
    self.cache_misses.fetch_add(1, Ordering::Relaxed);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_counting_observer() {
    let observer = CountingObserver::new();
    let actor = ActorId::new("TENANT|x");
    observer.on_branch_created(&actor);
    observer.on_branch_created(&actor);
    observer.on_branch_destroyed(&actor);
    observer.on_cache_miss(TenantId::random(), &EntityId::device_profile());
    assert_eq!(observer.branches_created(), 2);
    assert_eq!(observer.live_branches(), 1);
    assert_eq!(observer.cache_hits(), 0);
    assert_eq!(observer.cache_misses(), 1);
  }
}
