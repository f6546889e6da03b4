//! Tenant branch of the routing tree.

use super::entity_actor::EntityActor;
use super::messages::{BusinessMsg, ComponentLifecycleEvent, ComponentLifecycleMsg, RoutingMsg};
use super::{RoutingContext, entity_actor_id};
use crate::actor::{Actor, ActorCtx, ActorError, ActorMsg, MsgPriority};
use crate::error::RoutingError;
use crate::ids::{EntityId, EntityType, TenantId};
use crate::partitioning::PartitionChangeEvent;
use crate::supervision::{FailureAction, FailureReport};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) struct TenantActor {
  tenant_id: TenantId,
  ctx: Arc<RoutingContext>,
}

impl TenantActor {
  pub(crate) fn new(tenant_id: TenantId, ctx: Arc<RoutingContext>) -> Self {
    Self { tenant_id, ctx }
  }

  fn on_partition_change(&self, actor: &ActorCtx<RoutingMsg>, event: Arc<PartitionChangeEvent>) {
    if event.service_type() != self.ctx.service_type() {
      return;
    }
    match self
      .ctx
      .resolver
      .is_my_tenant(self.ctx.service_type(), self.tenant_id)
    {
      Ok(false) => {
        info!(tenant = %self.tenant_id, "Tenant moved to another instance, stopping branch");
        actor.stop_self();
      }
      Ok(true) => {
        actor.broadcast_to_children(MsgPriority::High, |_| {
          RoutingMsg::PartitionChange(event.clone())
        });
      }
      Err(e) => warn!(tenant = %self.tenant_id, error = %e, "Failed to resolve tenant partition"),
    }
  }

  /// Profile of a leaf entity: from the event, else from the repository.
  fn profile_of(&self, msg: &ComponentLifecycleMsg) -> Result<Option<EntityId>, RoutingError> {
    if msg.profile_id.is_some() {
      return Ok(msg.profile_id);
    }
    Ok(
      self
        .ctx
        .repository
        .find_entity(self.tenant_id, &msg.entity_id)?
        .and_then(|info| info.profile_id),
    )
  }

  fn update_profile_cache(&self, msg: &ComponentLifecycleMsg) -> Result<(), RoutingError> {
    let cache = &self.ctx.profile_cache;
    let entity_id = msg.entity_id;
    match msg.event {
      ComponentLifecycleEvent::Created => {
        if let Some(profile_id) = self.profile_of(msg)? {
          cache.add(self.tenant_id, profile_id, entity_id)?;
        }
      }
      ComponentLifecycleEvent::Updated => match self.profile_of(msg)? {
        Some(profile_id) => {
          cache.update(self.tenant_id, msg.old_profile_id.as_ref(), profile_id, entity_id)?;
        }
        None => {
          cache.evict(self.tenant_id, &entity_id);
        }
      },
      ComponentLifecycleEvent::Deleted => {
        cache.evict(self.tenant_id, &entity_id);
      }
    }
    Ok(())
  }

  fn on_lifecycle(&self, actor: &ActorCtx<RoutingMsg>, msg: ComponentLifecycleMsg) {
    let entity_type = msg.entity_id.entity_type();
    match entity_type {
      EntityType::Device | EntityType::Asset => {
        if let Err(e) = self.update_profile_cache(&msg) {
          warn!(tenant = %self.tenant_id, entity = %msg.entity_id, error = %e, "Failed to update profile cache");
          msg.callback.on_failure(e);
          return;
        }
        let child_id = entity_actor_id(&msg.entity_id);
        if msg.event == ComponentLifecycleEvent::Deleted {
          actor.stop(&child_id);
          msg.callback.on_success();
        } else if let Some(child) = actor.child(&child_id) {
          child.tell_with_high_priority(RoutingMsg::ComponentLifecycle(msg));
        } else {
          msg.callback.on_success();
        }
      }
      EntityType::DeviceProfile | EntityType::AssetProfile
        if msg.event == ComponentLifecycleEvent::Deleted =>
      {
        let removed = self
          .ctx
          .profile_cache
          .remove_profile(self.tenant_id, &msg.entity_id);
        debug!(tenant = %self.tenant_id, profile = %msg.entity_id, removed, "Profile removed");
        msg.callback.on_success();
      }
      EntityType::Tenant if msg.event == ComponentLifecycleEvent::Deleted => {
        actor.stop_self();
        msg.callback.on_success();
      }
      _ => {
        debug!(
          tenant = %self.tenant_id,
          entity = %msg.entity_id,
          event = ?msg.event,
          "Lifecycle event acknowledged"
        );
        msg.callback.on_success();
      }
    }
  }

  fn on_business(&self, actor: &ActorCtx<RoutingMsg>, msg: BusinessMsg) -> Result<(), ActorError> {
    let Some(entity_id) = msg.entity_id else {
      match self.ctx.handler.on_message(self.tenant_id, None, &msg.payload) {
        Ok(()) => msg.callback.on_success(),
        Err(e) => msg.callback.on_failure(RoutingError::Handler(e.to_string())),
      }
      return Ok(());
    };
    let tpi = match self.ctx.resolver.resolve(
      self.ctx.service_type(),
      msg.queue_name.as_deref(),
      self.tenant_id,
      &entity_id,
    ) {
      Ok(tpi) => tpi,
      Err(e) => {
        msg.callback.on_failure(e.into());
        return Ok(());
      }
    };
    if !tpi.is_my_partition() {
      debug!(tenant = %self.tenant_id, entity = %entity_id, "Entity not owned locally, completing message");
      msg.callback.on_success();
      return Ok(());
    }
    let (tenant_id, ctx) = (self.tenant_id, self.ctx.clone());
    let queue_name = msg.queue_name.clone();
    match actor.get_or_create_child(
      entity_actor_id(&entity_id),
      self.ctx.config.supervision.clone(),
      move || EntityActor::new(tenant_id, entity_id, queue_name, ctx),
    ) {
      Ok(child) => child.tell(RoutingMsg::Business(msg)),
      Err(ActorError::Stopped(id)) => RoutingMsg::Business(msg).on_actor_stopped(&id),
      Err(e) => return Err(e),
    }
    Ok(())
  }
}

impl Actor<RoutingMsg> for TenantActor {
  fn init(&mut self, actor: &ActorCtx<RoutingMsg>) -> Result<(), ActorError> {
    debug!(tenant = %self.tenant_id, "Tenant branch started");
    self.ctx.observer.on_branch_created(actor.self_id());
    Ok(())
  }

  fn process(&mut self, actor: &ActorCtx<RoutingMsg>, msg: RoutingMsg) -> Result<bool, ActorError> {
    match msg {
      RoutingMsg::PartitionChange(event) => self.on_partition_change(actor, event),
      RoutingMsg::ComponentLifecycle(msg) => self.on_lifecycle(actor, msg),
      RoutingMsg::Business(msg) => self.on_business(actor, msg)?,
      RoutingMsg::AppInit | RoutingMsg::IdleCheck(_) => return Ok(false),
    }
    Ok(true)
  }

  fn destroy(&mut self, actor: &ActorCtx<RoutingMsg>) {
    debug!(tenant = %self.tenant_id, "Tenant branch stopped");
    self.ctx.observer.on_branch_destroyed(actor.self_id());
  }

  fn on_child_failure(&mut self, _actor: &ActorCtx<RoutingMsg>, report: &FailureReport) -> FailureAction {
    warn!(
      tenant = %self.tenant_id,
      entity = %report.actor_id,
      error = %report.error,
      "Entity actor failed, restarting"
    );
    FailureAction::Restart
  }
}
