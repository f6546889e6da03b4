//! Tenant and entity identifiers.
//!
//! Every routable thing on the platform is addressed by an [`EntityId`]: a
//! UUID tagged with its [`EntityType`]. Tenants are the top-level boundary and
//! get their own newtype, [`TenantId`], with a reserved nil value for the
//! system tenant.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of entity an [`EntityId`] refers to.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
  /// A tenant.
  Tenant,
  /// A customer of a tenant.
  Customer,
  /// A device.
  Device,
  /// An asset.
  Asset,
  /// Profile grouping devices.
  DeviceProfile,
  /// Profile grouping assets.
  AssetProfile,
  /// Rule chain.
  RuleChain,
  /// Entity view.
  EntityView,
  /// Edge instance.
  Edge,
  /// User.
  User,
  /// Dashboard.
  Dashboard,
  /// Tenant profile (system scoped).
  TenantProfile,
  /// Queue definition (system scoped).
  Queue,
  /// Api usage state (system scoped).
  ApiUsageState,
  /// Calculated field.
  CalculatedField,
}

impl EntityType {
  /// Leaf types are members of a profile and can never be a profile key.
  pub const fn is_leaf(self) -> bool {
    matches!(self, EntityType::Device | EntityType::Asset)
  }

  /// Types that may legitimately be addressed under [`TenantId::SYS`].
  pub const fn is_system_scoped(self) -> bool {
    matches!(
      self,
      EntityType::TenantProfile | EntityType::Queue | EntityType::ApiUsageState
    )
  }

  /// Upper-case name used in logs and actor ids.
  pub const fn as_str(self) -> &'static str {
    match self {
      EntityType::Tenant => "TENANT",
      EntityType::Customer => "CUSTOMER",
      EntityType::Device => "DEVICE",
      EntityType::Asset => "ASSET",
      EntityType::DeviceProfile => "DEVICE_PROFILE",
      EntityType::AssetProfile => "ASSET_PROFILE",
      EntityType::RuleChain => "RULE_CHAIN",
      EntityType::EntityView => "ENTITY_VIEW",
      EntityType::Edge => "EDGE",
      EntityType::User => "USER",
      EntityType::Dashboard => "DASHBOARD",
      EntityType::TenantProfile => "TENANT_PROFILE",
      EntityType::Queue => "QUEUE",
      EntityType::ApiUsageState => "API_USAGE_STATE",
      EntityType::CalculatedField => "CALCULATED_FIELD",
    }
  }
}

impl fmt::Display for EntityType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Identifier of a tenant.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
  /// The reserved system tenant.
  pub const SYS: TenantId = TenantId(Uuid::nil());

  /// Wraps an existing UUID.
  pub const fn new(id: Uuid) -> Self {
    Self(id)
  }

  /// Generates a fresh random tenant id.
  pub fn random() -> Self {
    Self(Uuid::new_v4())
  }

  /// Returns true for the reserved system tenant.
  pub fn is_sys(&self) -> bool {
    self.0.is_nil()
  }

  /// Returns the underlying UUID.
  pub const fn as_uuid(&self) -> &Uuid {
    &self.0
  }

  /// The tenant expressed as an entity id.
  pub const fn as_entity_id(&self) -> EntityId {
    EntityId::new(EntityType::Tenant, self.0)
  }
}

impl fmt::Display for TenantId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<Uuid> for TenantId {
  fn from(id: Uuid) -> Self {
    Self(id)
  }
}

/// Identifier of any entity: a UUID plus its type.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct EntityId {
  entity_type: EntityType,
  id: Uuid,
}

impl EntityId {
  /// Creates an entity id.
  pub const fn new(entity_type: EntityType, id: Uuid) -> Self {
    Self { entity_type, id }
  }

  /// Generates a fresh random id of the given type.
  pub fn random(entity_type: EntityType) -> Self {
    Self::new(entity_type, Uuid::new_v4())
  }

  /// Shorthand for a random device id.
  pub fn device() -> Self {
    Self::random(EntityType::Device)
  }

  /// Shorthand for a random device profile id.
  pub fn device_profile() -> Self {
    Self::random(EntityType::DeviceProfile)
  }

  /// Returns the entity type.
  pub const fn entity_type(&self) -> EntityType {
    self.entity_type
  }

  /// Returns the raw UUID.
  pub const fn id(&self) -> &Uuid {
    &self.id
  }

  /// When this id names a tenant, returns it as a [`TenantId`].
  pub fn as_tenant_id(&self) -> Option<TenantId> {
    (self.entity_type == EntityType::Tenant).then_some(TenantId(self.id))
  }
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}|{}", self.entity_type, self.id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sys_tenant_is_nil() {
    assert!(TenantId::SYS.is_sys());
    assert!(!TenantId::random().is_sys());
  }

  #[test]
  fn test_leaf_and_system_types() {
    assert!(EntityType::Device.is_leaf());
    assert!(EntityType::Asset.is_leaf());
    assert!(!EntityType::DeviceProfile.is_leaf());
    assert!(EntityType::TenantProfile.is_system_scoped());
    assert!(!EntityType::Device.is_system_scoped());
  }

  #[test]
  fn test_tenant_entity_conversion() {
    let tenant = TenantId::random();
    let entity = tenant.as_entity_id();
    assert_eq!(entity.entity_type(), EntityType::Tenant);
    assert_eq!(entity.as_tenant_id(), Some(tenant));
    assert_eq!(EntityId::device().as_tenant_id(), None);
  }
}
