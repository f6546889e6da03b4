//! Read-only persistence collaborator.
//!
//! The router only asks two questions of the persistence layer: which tenants
//! exist (while pre-warming) and which profile an entity belongs to (when a
//! lifecycle event does not carry it). Both are off the hot path.

use crate::ids::{EntityId, TenantId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Failure of a persistence lookup.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RepositoryError {
  /// The backing store could not be reached.
  #[error("repository unavailable: {0}")]
  Unavailable(String),
}

/// What the router needs to know about a persisted entity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EntityInfo {
  /// The entity.
  pub entity_id: EntityId,
  /// Profile grouping the entity, if it has one.
  pub profile_id: Option<EntityId>,
}

/// Read-only queries against the persistence layer.
pub trait TenantRepository: Send + Sync {
  /// Every known tenant.
  fn list_tenants(&self) -> Result<Vec<TenantId>, RepositoryError>;

  /// Looks up one entity of a tenant.
  fn find_entity(
    &self,
    tenant_id: TenantId,
    entity_id: &EntityId,
  ) -> Result<Option<EntityInfo>, RepositoryError>;
}

/// In-process [`TenantRepository`] for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryTenantRepository {
  tenants: RwLock<BTreeMap<TenantId, HashMap<EntityId, EntityInfo>>>,
}

impl InMemoryTenantRepository {
  /// Creates an empty repository.
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers a tenant.
  pub fn add_tenant(&self, tenant_id: TenantId) {
    self.tenants.write().entry(tenant_id).or_default();
  }

  /// Registers (or replaces) an entity, creating its tenant when missing.
  pub fn add_entity(&self, tenant_id: TenantId, entity_id: EntityId, profile_id: Option<EntityId>) {
    self.tenants.write().entry(tenant_id).or_default().insert(
      entity_id,
      EntityInfo {
        entity_id,
        profile_id,
      },
    );
  }

  /// Forgets a tenant and its entities.
  pub fn remove_tenant(&self, tenant_id: TenantId) {
    self.tenants.write().remove(&tenant_id);
  }
}

impl TenantRepository for InMemoryTenantRepository {
  fn list_tenants(&self) -> Result<Vec<TenantId>, RepositoryError> {
    Ok(self.tenants.read().keys().copied().collect())
  }

  fn find_entity(
    &self,
    tenant_id: TenantId,
    entity_id: &EntityId,
  ) -> Result<Option<EntityInfo>, RepositoryError> {
    Ok(
      self
        .tenants
        .read()
        .get(&tenant_id)
        .and_then(|entities| entities.get(entity_id))
        .copied(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_in_memory_repository() {
    let repo = InMemoryTenantRepository::new();
    let tenant = TenantId::random();
    let device = EntityId::device();
    let profile = EntityId::device_profile();
    repo.add_entity(tenant, device, Some(profile));
    repo.add_tenant(TenantId::random());

    assert_eq!(repo.list_tenants().unwrap().len(), 2);
    let info = repo.find_entity(tenant, &device).unwrap().unwrap();
    assert_eq!(info.profile_id, Some(profile));
    assert_eq!(repo.find_entity(tenant, &EntityId::device()).unwrap(), None);

    repo.remove_tenant(tenant);
    assert_eq!(repo.find_entity(tenant, &device).unwrap(), None);
  }
}
