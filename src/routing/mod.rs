//! # Tenant Routing Tree
//!
//! One root actor per process, one branch per locally owned tenant and one
//! leaf per active entity of that tenant:
//!
//! ```text
//! APP
//!  ├── TENANT|<tenant-a>
//!  │    ├── DEVICE|<device-1>
//!  │    └── ASSET|<asset-7>
//!  └── TENANT|<tenant-b>
//! ```
//!
//! The root decides, with the [`PartitionResolver`], whether a tenant belongs
//! to this process. Messages for tenants owned elsewhere, or deleted, complete
//! with success without creating anything. Topology changes are broadcast down
//! the tree and branches whose tenant or entity moved away stop themselves.

mod app_actor;
mod entity_actor;
mod handler;
mod messages;
mod tenant_actor;


pub use handler::{EntityMessageHandler, HandlerError, NoopHandler};
pub use messages::{BusinessMsg, ComponentLifecycleEvent, ComponentLifecycleMsg, RoutingMsg};

pub(crate) use app_actor::AppActor;

use crate::actor::ActorId;
use crate::config::RoutingConfig;
use crate::ids::{EntityId, TenantId};
use crate::observability::RoutingObserver;
use crate::partitioning::{PartitionResolver, ServiceType};
use crate::persistence::TenantRepository;
use crate::profile_cache::EntityProfileCache;
use std::sync::Arc;

/// Id of the root actor.
pub const APP_ACTOR_ID: &str = "APP";

/// Actor id of a tenant branch.
pub fn tenant_actor_id(tenant_id: TenantId) -> ActorId {
  ActorId::new(tenant_id.as_entity_id().to_string())
}

/// Actor id of an entity leaf.
pub fn entity_actor_id(entity_id: &EntityId) -> ActorId {
  ActorId::new(entity_id.to_string())
}

/// Collaborators shared by every actor of the tree.
pub(crate) struct RoutingContext {
  pub(crate) config: Arc<RoutingConfig>,
  pub(crate) resolver: Arc<PartitionResolver>,
  pub(crate) profile_cache: Arc<EntityProfileCache>,
  pub(crate) repository: Arc<dyn TenantRepository>,
  pub(crate) handler: Arc<dyn EntityMessageHandler>,
  pub(crate) observer: Arc<dyn RoutingObserver>,
}

impl RoutingContext {
  pub(crate) fn service_type(&self) -> ServiceType {
    self.config.service_type
  }
}
