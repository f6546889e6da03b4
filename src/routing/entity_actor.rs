//! Entity leaf of the routing tree.

use super::RoutingContext;
use super::messages::RoutingMsg;
use crate::actor::{Actor, ActorCtx, ActorError};
use crate::error::RoutingError;
use crate::ids::{EntityId, TenantId};
use crate::supervision::FailureAction;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum IdleVerdict {
  /// Scheduled by a chain that a restart has replaced.
  Stale,
  Idle,
  Active,
}

/// Last activity plus the generation of the live idle-check chain.
#[derive(Debug)]
struct IdleTimer {
  generation: u64,
  last_activity: Instant,
}

impl IdleTimer {
  fn new() -> Self {
    Self {
      generation: 0,
      last_activity: Instant::now(),
    }
  }

  /// Starts a new chain. Checks carrying an older generation become stale.
  fn arm(&mut self) -> u64 {
    self.generation += 1;
    self.last_activity = Instant::now();
    self.generation
  }

  fn touch(&mut self) {
    self.last_activity = Instant::now();
  }

  fn check(&self, generation: u64, timeout: Duration) -> IdleVerdict {
    if generation != self.generation {
      IdleVerdict::Stale
    } else if self.last_activity.elapsed() >= timeout {
      IdleVerdict::Idle
    } else {
      IdleVerdict::Active
    }
  }
}

/// Serializes business messages of one entity into the handler.
pub(crate) struct EntityActor {
  tenant_id: TenantId,
  entity_id: EntityId,
  /// Queue the actor was created for; `None` is the main queue.
  queue_name: Option<String>,
  ctx: Arc<RoutingContext>,
  idle: IdleTimer,
}

impl EntityActor {
  pub(crate) fn new(
    tenant_id: TenantId,
    entity_id: EntityId,
    queue_name: Option<String>,
    ctx: Arc<RoutingContext>,
  ) -> Self {
    Self {
      tenant_id,
      entity_id,
      queue_name,
      ctx,
      idle: IdleTimer::new(),
    }
  }

  fn schedule_idle_check(&self, actor: &ActorCtx<RoutingMsg>, generation: u64) {
    if self.ctx.config.entity_idle_timeout().is_some() {
      actor.schedule_once(
        RoutingMsg::IdleCheck(generation),
        self.ctx.config.idle_check_interval(),
      );
    }
  }

  fn on_idle_check(&self, actor: &ActorCtx<RoutingMsg>, generation: u64) {
    let Some(timeout) = self.ctx.config.entity_idle_timeout() else {
      return;
    };
    match self.idle.check(generation, timeout) {
      IdleVerdict::Stale => {}
      IdleVerdict::Idle => {
        debug!(entity = %self.entity_id, "Entity idle, stopping");
        actor.stop_self();
      }
      IdleVerdict::Active => self.schedule_idle_check(actor, generation),
    }
  }

  fn still_mine(&self) -> bool {
    match self.ctx.resolver.resolve(
      self.ctx.service_type(),
      self.queue_name.as_deref(),
      self.tenant_id,
      &self.entity_id,
    ) {
      Ok(tpi) => tpi.is_my_partition(),
      Err(e) => {
        warn!(entity = %self.entity_id, error = %e, "Failed to resolve entity partition");
        true
      }
    }
  }
}

impl Actor<RoutingMsg> for EntityActor {
  fn init(&mut self, actor: &ActorCtx<RoutingMsg>) -> Result<(), ActorError> {
    let generation = self.idle.arm();
    self.ctx.observer.on_branch_created(actor.self_id());
    self.schedule_idle_check(actor, generation);
    Ok(())
  }

  fn process(&mut self, actor: &ActorCtx<RoutingMsg>, msg: RoutingMsg) -> Result<bool, ActorError> {
    match msg {
      RoutingMsg::Business(msg) => {
        self.idle.touch();
        match self
          .ctx
          .handler
          .on_message(self.tenant_id, Some(&self.entity_id), &msg.payload)
        {
          Ok(()) => msg.callback.on_success(),
          Err(e) => {
            let reason = e.to_string();
            msg.callback.on_failure(RoutingError::Handler(reason.clone()));
            return Err(ActorError::Processing(reason));
          }
        }
      }
      RoutingMsg::ComponentLifecycle(msg) => {
        self.idle.touch();
        msg.callback.on_success();
      }
      RoutingMsg::PartitionChange(event) => {
        if event.service_type() == self.ctx.service_type() && !self.still_mine() {
          debug!(entity = %self.entity_id, "Entity moved to another instance, stopping");
          actor.stop_self();
        }
      }
      RoutingMsg::IdleCheck(generation) => self.on_idle_check(actor, generation),
      RoutingMsg::AppInit => return Ok(false),
    }
    Ok(true)
  }

  fn destroy(&mut self, actor: &ActorCtx<RoutingMsg>) {
    self.ctx.observer.on_branch_destroyed(actor.self_id());
  }

  /// Handler rejections only fail their own message; panics go to the tenant.
  fn on_failure(&mut self, msg_kind: &'static str, error: &ActorError) -> FailureAction {
    match error {
      ActorError::Panicked(_) => FailureAction::Escalate,
      _ => {
        debug!(entity = %self.entity_id, kind = msg_kind, error = %error, "Message failed");
        FailureAction::Resume
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_rearming_makes_earlier_checks_stale() {
    let mut idle = IdleTimer::new();
    let first = idle.arm();
    let second = idle.arm();
    assert_ne!(first, second);
    assert_eq!(idle.check(first, Duration::ZERO), IdleVerdict::Stale);
    assert_eq!(idle.check(second, Duration::ZERO), IdleVerdict::Idle);
  }

  #[test]
  fn test_recent_activity_keeps_chain_alive() {
    let mut idle = IdleTimer::new();
    let generation = idle.arm();
    idle.touch();
    assert_eq!(
      idle.check(generation, Duration::from_secs(3600)),
      IdleVerdict::Active
    );
  }
}
