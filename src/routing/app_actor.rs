//! Root of the routing tree.

use super::messages::{BusinessMsg, ComponentLifecycleEvent, ComponentLifecycleMsg, RoutingMsg};
use super::tenant_actor::TenantActor;
use super::{RoutingContext, tenant_actor_id};
use crate::actor::{Actor, ActorCtx, ActorError, ActorMsg, ActorRef, MsgPriority};
use crate::error::RoutingError;
use crate::ids::{EntityType, TenantId};
use crate::supervision::{FailureAction, FailureReport};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum AppState {
  Uninitialized,
  /// Routing on demand; pre-warm waits for the init signal.
  AwaitingInit,
  Initialized,
}

/// Creates, forwards to and tombstones tenant branches.
///
/// The deleted-tenant set and the child registry are only touched from this
/// actor's processing context.
pub(crate) struct AppActor {
  ctx: Arc<RoutingContext>,
  state: AppState,
  deleted_tenants: HashSet<TenantId>,
}

impl AppActor {
  pub(crate) fn new(ctx: Arc<RoutingContext>) -> Self {
    Self {
      ctx,
      state: AppState::Uninitialized,
      deleted_tenants: HashSet::new(),
    }
  }

  fn initialize(&mut self, actor: &ActorCtx<RoutingMsg>) {
    self.state = AppState::Initialized;
    if !self.ctx.config.host_tenant_components {
      info!("Tenant components not hosted, skipping pre-warm");
      return;
    }
    let tenants = match self.ctx.repository.list_tenants() {
      Ok(tenants) => tenants,
      Err(e) => {
        error!(error = %e, "Failed to list tenants, branches will be created on demand");
        return;
      }
    };
    let (mut created, mut skipped) = (0usize, 0usize);
    for tenant_id in tenants {
      if tenant_id.is_sys() || self.deleted_tenants.contains(&tenant_id) {
        continue;
      }
      match self
        .ctx
        .resolver
        .is_my_tenant(self.ctx.service_type(), tenant_id)
      {
        Ok(true) => match self.get_or_create_tenant(actor, tenant_id) {
          Ok(_) => created += 1,
          Err(e) => warn!(tenant = %tenant_id, error = %e, "Failed to create tenant branch"),
        },
        Ok(false) => skipped += 1,
        Err(e) => warn!(tenant = %tenant_id, error = %e, "Failed to resolve tenant partition"),
      }
    }
    info!(created, skipped, "Tenant branches pre-warmed");
  }

  fn get_or_create_tenant(
    &self,
    actor: &ActorCtx<RoutingMsg>,
    tenant_id: TenantId,
  ) -> Result<ActorRef<RoutingMsg>, ActorError> {
    let ctx = self.ctx.clone();
    actor.get_or_create_child(
      tenant_actor_id(tenant_id),
      self.ctx.config.supervision.clone(),
      move || TenantActor::new(tenant_id, ctx),
    )
  }

  /// Delivers `msg` to the tenant's branch, creating it on demand. A refusal
  /// because this actor is stopping completes the message like any stopped
  /// target.
  fn forward(
    &self,
    actor: &ActorCtx<RoutingMsg>,
    tenant_id: TenantId,
    msg: RoutingMsg,
    priority: MsgPriority,
  ) -> Result<(), ActorError> {
    match self.get_or_create_tenant(actor, tenant_id) {
      Ok(branch) => branch.tell_with_priority(msg, priority),
      Err(ActorError::Stopped(id)) => msg.on_actor_stopped(&id),
      Err(e) => return Err(e),
    }
    Ok(())
  }

  fn is_my_tenant(&self, tenant_id: TenantId) -> Result<bool, RoutingError> {
    Ok(
      self
        .ctx
        .resolver
        .is_my_tenant(self.ctx.service_type(), tenant_id)?,
    )
  }

  fn on_business(&mut self, actor: &ActorCtx<RoutingMsg>, msg: BusinessMsg) -> Result<(), ActorError> {
    let tenant_id = msg.tenant_id;
    if tenant_id.is_sys() {
      warn!(entity = ?msg.entity_id, "Business message with system tenant id");
      msg.callback.on_failure(RoutingError::SystemTenant {
        kind: "BUSINESS",
        entity_type: msg.entity_id.map(|e| e.entity_type()),
      });
      return Ok(());
    }
    if self.deleted_tenants.contains(&tenant_id) {
      debug!(tenant = %tenant_id, "Tenant deleted, completing message");
      msg.callback.on_success();
      return Ok(());
    }
    match self.is_my_tenant(tenant_id) {
      Ok(true) => self.forward(actor, tenant_id, RoutingMsg::Business(msg), MsgPriority::Normal)?,
      Ok(false) => {
        debug!(tenant = %tenant_id, "Tenant not owned locally, completing message");
        msg.callback.on_success();
      }
      Err(e) => msg.callback.on_failure(e),
    }
    Ok(())
  }

  fn on_lifecycle(
    &mut self,
    actor: &ActorCtx<RoutingMsg>,
    msg: ComponentLifecycleMsg,
  ) -> Result<(), ActorError> {
    let tenant_id = msg.tenant_id;
    let entity_type = msg.entity_id.entity_type();
    if tenant_id.is_sys() {
      if entity_type.is_system_scoped() {
        let children = actor.children();
        debug!(entity = %msg.entity_id, branches = children.len(), "Broadcasting system lifecycle event");
        for (child, part) in children.iter().zip(msg.split(children.len())) {
          actor
            .system()
            .tell_with_high_priority(child, RoutingMsg::ComponentLifecycle(part));
        }
      } else {
        warn!(entity = %msg.entity_id, "Lifecycle event with system tenant id");
        msg.callback.on_failure(RoutingError::SystemTenant {
          kind: "COMPONENT_LIFECYCLE",
          entity_type: Some(entity_type),
        });
      }
      return Ok(());
    }

    if entity_type == EntityType::Tenant && msg.event == ComponentLifecycleEvent::Deleted {
      info!(tenant = %tenant_id, "Tenant deleted, stopping branch");
      self.deleted_tenants.insert(tenant_id);
      actor.stop(&tenant_actor_id(tenant_id));
      msg.callback.on_success();
      return Ok(());
    }
    if self.deleted_tenants.contains(&tenant_id) {
      debug!(tenant = %tenant_id, "Tenant deleted, completing lifecycle event");
      msg.callback.on_success();
      return Ok(());
    }
    match self.is_my_tenant(tenant_id) {
      Ok(true) => self.forward(
        actor,
        tenant_id,
        RoutingMsg::ComponentLifecycle(msg),
        MsgPriority::High,
      )?,
      Ok(false) => {
        debug!(tenant = %tenant_id, "Tenant not owned locally, completing lifecycle event");
        msg.callback.on_success();
      }
      Err(e) => msg.callback.on_failure(e),
    }
    Ok(())
  }

  fn route(&mut self, actor: &ActorCtx<RoutingMsg>, msg: RoutingMsg) -> Result<bool, ActorError> {
    match msg {
      RoutingMsg::PartitionChange(event) => {
        let branches = actor.broadcast_to_children(MsgPriority::High, |_| {
          RoutingMsg::PartitionChange(event.clone())
        });
        debug!(service_type = %event.service_type(), branches, "Partition change broadcast");
        Ok(true)
      }
      RoutingMsg::ComponentLifecycle(msg) => self.on_lifecycle(actor, msg).map(|_| true),
      RoutingMsg::Business(msg) => self.on_business(actor, msg).map(|_| true),
      RoutingMsg::AppInit if self.state == AppState::Initialized => {
        debug!("Application already initialised");
        Ok(true)
      }
      RoutingMsg::AppInit => {
        self.initialize(actor);
        Ok(true)
      }
      RoutingMsg::IdleCheck(_) => Ok(false),
    }
  }
}

impl Actor<RoutingMsg> for AppActor {
  fn init(&mut self, _actor: &ActorCtx<RoutingMsg>) -> Result<(), ActorError> {
    if self.state == AppState::Uninitialized {
      self.state = AppState::AwaitingInit;
    }
    Ok(())
  }

  fn process(&mut self, actor: &ActorCtx<RoutingMsg>, msg: RoutingMsg) -> Result<bool, ActorError> {
    if self.state != AppState::Initialized && !matches!(msg, RoutingMsg::AppInit) {
      debug!(kind = msg.kind(), "Routing on demand before application init");
    }
    self.route(actor, msg)
  }

  fn on_child_failure(&mut self, _actor: &ActorCtx<RoutingMsg>, report: &FailureReport) -> FailureAction {
    warn!(
      branch = %report.actor_id,
      kind = report.msg_kind,
      error = %report.error,
      "Tenant branch failed, restarting"
    );
    FailureAction::Restart
  }
}
