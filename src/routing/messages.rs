//! Messages exchanged by the tenant routing tree.

use crate::actor::{ActorId, ActorMsg};
use crate::callback::Callback;
use crate::ids::{EntityId, TenantId};
use crate::partitioning::PartitionChangeEvent;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Every message kind the routing tree understands.
#[derive(Debug)]
pub enum RoutingMsg {
  /// One-time application init; pre-warms tenant branches.
  AppInit,
  /// Partition ownership changed.
  PartitionChange(Arc<PartitionChangeEvent>),
  /// An entity was created, updated or deleted.
  ComponentLifecycle(ComponentLifecycleMsg),
  /// Tenant-scoped business payload.
  Business(BusinessMsg),
  /// Self-scheduled idle check of an entity actor, tagged with the
  /// generation of the timer that scheduled it.
  IdleCheck(u64),
}

impl ActorMsg for RoutingMsg {
  fn kind(&self) -> &'static str {
    match self {
      RoutingMsg::AppInit => "APP_INIT",
      RoutingMsg::PartitionChange(_) => "PARTITION_CHANGE",
      RoutingMsg::ComponentLifecycle(_) => "COMPONENT_LIFECYCLE",
      RoutingMsg::Business(_) => "BUSINESS",
      RoutingMsg::IdleCheck(_) => "IDLE_CHECK",
    }
  }

  /// The target moved to another process or no longer exists: either way
  /// the message is done here.
  fn on_actor_stopped(self, actor: &ActorId) {
    let kind = self.kind();
    let callback = match self {
      RoutingMsg::ComponentLifecycle(msg) => msg.callback,
      RoutingMsg::Business(msg) => msg.callback,
      _ => return,
    };
    debug!(actor = %actor, kind, "Target actor stopped, completing message");
    callback.on_success();
  }
}

/// What happened to an entity.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentLifecycleEvent {
  /// The entity was created.
  Created,
  /// The entity was updated.
  Updated,
  /// The entity was deleted.
  Deleted,
}

/// Lifecycle notification for one entity.
#[derive(Debug)]
pub struct ComponentLifecycleMsg {
  /// Owning tenant.
  pub tenant_id: TenantId,
  /// Affected entity.
  pub entity_id: EntityId,
  /// What happened.
  pub event: ComponentLifecycleEvent,
  /// Profile of the entity after the event, when known.
  pub profile_id: Option<EntityId>,
  /// Profile of the entity before an update, when known.
  pub old_profile_id: Option<EntityId>,
  /// Completion callback.
  pub callback: Callback,
}

impl ComponentLifecycleMsg {
  /// Creates a notification with an empty callback.
  pub fn new(tenant_id: TenantId, entity_id: EntityId, event: ComponentLifecycleEvent) -> Self {
    Self {
      tenant_id,
      entity_id,
      event,
      profile_id: None,
      old_profile_id: None,
      callback: Callback::empty(),
    }
  }

  /// Sets the profile after the event.
  pub fn with_profile(mut self, profile_id: EntityId) -> Self {
    self.profile_id = Some(profile_id);
    self
  }

  /// Sets the profile before the event.
  pub fn with_old_profile(mut self, profile_id: EntityId) -> Self {
    self.old_profile_id = Some(profile_id);
    self
  }

  /// Replaces the completion callback.
  pub fn with_callback(mut self, callback: Callback) -> Self {
    self.callback = callback;
    self
  }

  /// Copies this notification `parts` times with split callbacks. The
  /// original callback completes once all copies did.
  pub fn split(self, parts: usize) -> Vec<ComponentLifecycleMsg> {
    let Self {
      tenant_id,
      entity_id,
      event,
      profile_id,
      old_profile_id,
      callback,
    } = self;
    callback
      .split(parts)
      .into_iter()
      .map(|callback| ComponentLifecycleMsg {
        tenant_id,
        entity_id,
        event,
        profile_id,
        old_profile_id,
        callback,
      })
      .collect()
  }
}

/// Business payload addressed to a tenant or one of its entities.
#[derive(Debug)]
pub struct BusinessMsg {
  /// Target tenant.
  pub tenant_id: TenantId,
  /// Target entity, or `None` for tenant-level messages.
  pub entity_id: Option<EntityId>,
  /// Queue the message arrived on; `None` means `Main`.
  pub queue_name: Option<String>,
  /// Opaque payload handed to the entity message handler.
  pub payload: serde_json::Value,
  /// Completion callback.
  pub callback: Callback,
}

impl BusinessMsg {
  /// Creates a tenant-level message with an empty callback.
  pub fn new(tenant_id: TenantId, payload: serde_json::Value) -> Self {
    Self {
      tenant_id,
      entity_id: None,
      queue_name: None,
      payload,
      callback: Callback::empty(),
    }
  }

  /// Addresses the message to one entity.
  pub fn for_entity(mut self, entity_id: EntityId) -> Self {
    self.entity_id = Some(entity_id);
    self
  }

  /// Sets the queue the message arrived on.
  pub fn on_queue(mut self, queue_name: impl Into<String>) -> Self {
    self.queue_name = Some(queue_name.into());
    self
  }

  /// Replaces the completion callback.
  pub fn with_callback(mut self, callback: Callback) -> Self {
    self.callback = callback;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ids::EntityType;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn counting_callback() -> (Callback, Arc<AtomicU32>, Arc<AtomicU32>) {
    let ok = Arc::new(AtomicU32::new(0));
    let failed = Arc::new(AtomicU32::new(0));
    let (ok2, failed2) = (ok.clone(), failed.clone());
    let callback = Callback::from_fns(
      move || {
        ok2.fetch_add(1, Ordering::SeqCst);
      },
      move |_| {
        failed2.fetch_add(1, Ordering::SeqCst);
      },
    );
    (callback, ok, failed)
  }

  #[test]
  fn test_stopped_target_completes_with_success() {
    let (callback, ok, failed) = counting_callback();
    let msg = RoutingMsg::Business(
      BusinessMsg::new(TenantId::random(), serde_json::json!({"t": 1})).with_callback(callback),
    );
    msg.on_actor_stopped(&ActorId::new("gone"));
    assert_eq!(ok.load(Ordering::SeqCst), 1);
    assert_eq!(failed.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_lifecycle_split_completes_parent_once() {
    let (callback, ok, _) = counting_callback();
    let msg = ComponentLifecycleMsg::new(
      TenantId::SYS,
      EntityId::random(EntityType::TenantProfile),
      ComponentLifecycleEvent::Updated,
    )
    .with_callback(callback);
    let parts = msg.split(3);
    assert_eq!(parts.len(), 3);
    assert!(parts.iter().all(|p| p.tenant_id.is_sys()));
    for part in parts {
      part.callback.on_success();
    }
    assert_eq!(ok.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_kinds() {
    assert_eq!(RoutingMsg::AppInit.kind(), "APP_INIT");
    assert_eq!(RoutingMsg::IdleCheck(0).kind(), "IDLE_CHECK");
  }
}
