//! # Partition-Aware Entity Profile Cache
//!
//! Per-tenant index from a grouping profile (device profile, asset profile,
//! ...) to its member entities, with a second view restricted to members whose
//! partition this process owns.
//!
//! ## Layout
//!
//! - An outer [`DashMap`] keyed by tenant. Entries are created lazily and never
//!   removed while the process runs.
//! - Inside one tenant, a single [`RwLock`] over the whole index. Mutations
//!   take the write lock; lookups take the read lock and copy out.
//!
//! Members are recorded with their partition, so a topology change only has
//! to rebuild the "mine" view from the full index; nothing is reloaded.
//! Members of partitions that move away stay in the full index and reappear
//! when ownership comes back.

use crate::ids::{EntityId, TenantId};
use crate::observability::RoutingObserver;
use crate::partitioning::{
  MAIN_QUEUE, PartitionChangeEvent, PartitionResolver, ResolveError, ServiceType,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Rejected profile cache mutations.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CacheError {
  /// Leaf entities (devices, assets) cannot group other entities.
  #[error("{profile_id} is a leaf entity and cannot be used as a profile key")]
  LeafProfileKey {
    /// Offending key.
    profile_id: EntityId,
  },
  /// The member's partition could not be resolved.
  #[error(transparent)]
  Resolve(#[from] ResolveError),
}

fn ensure_profile_key(profile_id: &EntityId) -> Result<(), CacheError> {
  if profile_id.entity_type().is_leaf() {
    return Err(CacheError::LeafProfileKey {
      profile_id: *profile_id,
    });
  }
  Ok(())
}

#[derive(Clone, Copy, Debug)]
struct Membership {
  profile_id: EntityId,
  partition: u32,
}

#[derive(Debug, Default)]
struct Index {
  all: HashMap<EntityId, HashMap<u32, HashSet<EntityId>>>,
  mine: HashMap<EntityId, HashSet<EntityId>>,
  members: HashMap<EntityId, Membership>,
  my_partitions: BTreeSet<u32>,
}

impl Index {
  fn insert(&mut self, profile_id: EntityId, entity_id: EntityId, partition: u32, is_mine: bool) {
    self.remove(&entity_id);
    self
      .all
      .entry(profile_id)
      .or_default()
      .entry(partition)
      .or_default()
      .insert(entity_id);
    if is_mine {
      self.mine.entry(profile_id).or_default().insert(entity_id);
    }
    self.members.insert(
      entity_id,
      Membership {
        profile_id,
        partition,
      },
    );
  }

  fn remove(&mut self, entity_id: &EntityId) -> Option<Membership> {
    let membership = self.members.remove(entity_id)?;
    if let Some(partitions) = self.all.get_mut(&membership.profile_id) {
      if let Some(entities) = partitions.get_mut(&membership.partition) {
        entities.remove(entity_id);
        if entities.is_empty() {
          partitions.remove(&membership.partition);
        }
      }
      if partitions.is_empty() {
        self.all.remove(&membership.profile_id);
      }
    }
    if let Some(entities) = self.mine.get_mut(&membership.profile_id) {
      entities.remove(entity_id);
      if entities.is_empty() {
        self.mine.remove(&membership.profile_id);
      }
    }
    Some(membership)
  }

  fn rebuild_mine(&mut self) {
    let my_partitions = &self.my_partitions;
    self.mine = self
      .all
      .iter()
      .filter_map(|(profile_id, partitions)| {
        let entities: HashSet<EntityId> = partitions
          .iter()
          .filter(|(partition, _)| my_partitions.contains(partition))
          .flat_map(|(_, entities)| entities.iter().copied())
          .collect();
        (!entities.is_empty()).then_some((*profile_id, entities))
      })
      .collect();
  }
}

/// Profile index of one tenant.
#[derive(Debug, Default)]
pub struct TenantEntityProfileCache {
  index: RwLock<Index>,
}

impl TenantEntityProfileCache {
  /// Creates an empty index owning `my_partitions`.
  pub fn new(my_partitions: BTreeSet<u32>) -> Self {
    Self {
      index: RwLock::new(Index {
        my_partitions,
        ..Default::default()
      }),
    }
  }

  /// Registers `entity_id` as a member of `profile_id`.
  ///
  /// An entity belongs to at most one profile; registering it again moves it.
  ///
  /// # Errors
  ///
  /// [`CacheError::LeafProfileKey`] when `profile_id` is a device or asset.
  /// The index is left unchanged.
  pub fn add(
    &self,
    profile_id: EntityId,
    entity_id: EntityId,
    partition: u32,
    is_mine: bool,
  ) -> Result<(), CacheError> {
    ensure_profile_key(&profile_id)?;
    self
      .index
      .write()
      .insert(profile_id, entity_id, partition, is_mine);
    Ok(())
  }

  /// Moves `entity_id` from `old_profile_id` to `new_profile_id` under one
  /// write lock. Readers see it under exactly one profile before and after.
  ///
  /// The entity is moved from wherever it currently is; `old_profile_id` is
  /// only used for logging when it disagrees.
  pub fn update(
    &self,
    old_profile_id: Option<&EntityId>,
    new_profile_id: EntityId,
    entity_id: EntityId,
    partition: u32,
    is_mine: bool,
  ) -> Result<(), CacheError> {
    ensure_profile_key(&new_profile_id)?;
    let mut index = self.index.write();
    let current = index.members.get(&entity_id).map(|m| m.profile_id);
    if current.as_ref() != old_profile_id {
      debug!(
        entity = %entity_id,
        expected = ?old_profile_id,
        actual = ?current,
        "Profile update for an entity cached under another profile"
      );
    }
    index.insert(new_profile_id, entity_id, partition, is_mine);
    Ok(())
  }

  /// Removes `entity_id` from its profile. Returns the profile it left.
  pub fn evict(&self, entity_id: &EntityId) -> Option<EntityId> {
    self
      .index
      .write()
      .remove(entity_id)
      .map(|membership| membership.profile_id)
  }

  /// Drops a profile and all of its members. Returns how many were removed.
  pub fn remove_profile(&self, profile_id: &EntityId) -> usize {
    let mut index = self.index.write();
    let Some(partitions) = index.all.remove(profile_id) else {
      return 0;
    };
    index.mine.remove(profile_id);
    let mut removed = 0;
    for entity_id in partitions.values().flatten() {
      index.members.remove(entity_id);
      removed += 1;
    }
    removed
  }

  /// Locally owned members of `profile_id`.
  pub fn get_my_entity_ids_by_profile_id(&self, profile_id: &EntityId) -> HashSet<EntityId> {
    self
      .index
      .read()
      .mine
      .get(profile_id)
      .cloned()
      .unwrap_or_default()
  }

  /// Every cached member of `profile_id`, owned locally or not.
  pub fn get_all_entity_ids_by_profile_id(&self, profile_id: &EntityId) -> HashSet<EntityId> {
    self
      .index
      .read()
      .all
      .get(profile_id)
      .map(|partitions| partitions.values().flatten().copied().collect())
      .unwrap_or_default()
  }

  /// Profile `entity_id` is cached under.
  pub fn profile_of(&self, entity_id: &EntityId) -> Option<EntityId> {
    self
      .index
      .read()
      .members
      .get(entity_id)
      .map(|membership| membership.profile_id)
  }

  /// Replaces the owned partitions wholesale and rebuilds the owned view.
  pub fn set_my_partitions(&self, my_partitions: BTreeSet<u32>) {
    let mut index = self.index.write();
    if index.my_partitions == my_partitions {
      return;
    }
    index.my_partitions = my_partitions;
    index.rebuild_mine();
  }

  /// Partitions currently owned for this tenant.
  pub fn my_partitions(&self) -> BTreeSet<u32> {
    self.index.read().my_partitions.clone()
  }

  /// Number of cached members.
  pub fn len(&self) -> usize {
    self.index.read().members.len()
  }

  /// True when nothing is cached.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Profile caches of every tenant, kept in step with partition ownership of
/// one service type.
pub struct EntityProfileCache {
  service_type: ServiceType,
  queue_name: String,
  resolver: Arc<PartitionResolver>,
  observer: Arc<dyn RoutingObserver>,
  tenants: DashMap<TenantId, Arc<TenantEntityProfileCache>>,
}

impl EntityProfileCache {
  /// Creates a cache tracking the `Main` queue of `service_type`.
  pub fn new(
    service_type: ServiceType,
    resolver: Arc<PartitionResolver>,
    observer: Arc<dyn RoutingObserver>,
  ) -> Self {
    Self {
      service_type,
      queue_name: MAIN_QUEUE.to_string(),
      resolver,
      observer,
      tenants: DashMap::new(),
    }
  }

  /// Tracks `queue_name` instead of `Main`.
  pub fn with_queue(mut self, queue_name: impl Into<String>) -> Self {
    self.queue_name = queue_name.into();
    self
  }

  /// Service type whose ownership this cache follows.
  pub fn service_type(&self) -> ServiceType {
    self.service_type
  }

  /// The tenant's cache, created on first use with its currently owned
  /// partitions.
  pub fn tenant(&self, tenant_id: TenantId) -> Arc<TenantEntityProfileCache> {
    self
      .tenants
      .entry(tenant_id)
      .or_insert_with(|| {
        let owned =
          self
            .resolver
            .my_partitions_for_tenant(self.service_type, &self.queue_name, tenant_id);
        trace!(tenant = %tenant_id, partitions = owned.len(), "Creating tenant profile cache");
        Arc::new(TenantEntityProfileCache::new(owned))
      })
      .value()
      .clone()
  }

  fn locate(&self, tenant_id: TenantId, entity_id: &EntityId) -> Result<(u32, bool), CacheError> {
    let tpi = self
      .resolver
      .resolve(self.service_type, Some(&self.queue_name), tenant_id, entity_id)?;
    Ok((tpi.partition().unwrap_or_default(), tpi.is_my_partition()))
  }

  /// Registers `entity_id` under `profile_id`, resolving its partition.
  pub fn add(
    &self,
    tenant_id: TenantId,
    profile_id: EntityId,
    entity_id: EntityId,
  ) -> Result<(), CacheError> {
    ensure_profile_key(&profile_id)?;
    let (partition, is_mine) = self.locate(tenant_id, &entity_id)?;
    self
      .tenant(tenant_id)
      .add(profile_id, entity_id, partition, is_mine)
  }

  /// Moves `entity_id` to `new_profile_id`.
  pub fn update(
    &self,
    tenant_id: TenantId,
    old_profile_id: Option<&EntityId>,
    new_profile_id: EntityId,
    entity_id: EntityId,
  ) -> Result<(), CacheError> {
    ensure_profile_key(&new_profile_id)?;
    let (partition, is_mine) = self.locate(tenant_id, &entity_id)?;
    self
      .tenant(tenant_id)
      .update(old_profile_id, new_profile_id, entity_id, partition, is_mine)
  }

  /// Removes `entity_id` from its profile. No-op when unknown.
  pub fn evict(&self, tenant_id: TenantId, entity_id: &EntityId) -> Option<EntityId> {
    self
      .tenants
      .get(&tenant_id)
      .and_then(|cache| cache.evict(entity_id))
  }

  /// Drops a profile and its members.
  pub fn remove_profile(&self, tenant_id: TenantId, profile_id: &EntityId) -> usize {
    self
      .tenants
      .get(&tenant_id)
      .map_or(0, |cache| cache.remove_profile(profile_id))
  }

  /// Locally owned members of `profile_id`.
  pub fn get_my_entity_ids_by_profile_id(
    &self,
    tenant_id: TenantId,
    profile_id: &EntityId,
  ) -> HashSet<EntityId> {
    let entities = self
      .tenants
      .get(&tenant_id)
      .map(|cache| cache.get_my_entity_ids_by_profile_id(profile_id))
      .unwrap_or_default();
    if entities.is_empty() {
      self.observer.on_cache_miss(tenant_id, profile_id);
    } else {
      self.observer.on_cache_hit(tenant_id, profile_id);
    }
    entities
  }

  /// Replaces every tenant's owned partitions from `event`.
  ///
  /// A tenant takes its isolated queue's partitions when the event has one,
  /// else the shared queue's. Events of other service types are ignored.
  /// Applying the same event twice changes nothing.
  pub fn on_partition_change(&self, event: &PartitionChangeEvent) {
    if event.service_type() != self.service_type {
      return;
    }
    for entry in self.tenants.iter() {
      let owned = event.partitions_for_tenant(&self.queue_name, *entry.key());
      entry.value().set_my_partitions(owned);
    }
    debug!(
      service_type = %self.service_type,
      tenants = self.tenants.len(),
      "Profile cache ownership refreshed"
    );
  }

  /// Number of tenants with a cache entry.
  pub fn tenant_count(&self) -> usize {
    self.tenants.len()
  }
}
