//! Per-actor mailbox: two priority lanes plus the dispatch state machine.
//!
//! A mailbox is bound to at most one worker at a time (`busy`). Producers push
//! under a short lock and try to flip `busy`; the winner submits a batch to the
//! dispatcher. After draining up to `throughput` messages the batch clears
//! `busy` and re-submits itself if anything arrived in the meantime.

use super::context::ActorCtx;
use super::system::{ActorSystem, SystemInner};
use super::{Actor, ActorError, ActorId, ActorMsg, MsgPriority};
use crate::supervision::{FailureAction, FailureReport, SupervisionPolicy};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, warn};

pub(crate) enum Envelope<M> {
  User(M),
  ChildFailed(FailureReport),
  Restart,
}

impl<M: ActorMsg> Envelope<M> {
  fn reject(self, actor: &ActorId) {
    if let Envelope::User(msg) = self {
      msg.on_actor_stopped(actor);
    }
  }
}

struct Lanes<M> {
  queues: [VecDeque<Envelope<M>>; 2],
  closed: bool,
}

impl<M> Lanes<M> {
  fn pop(&mut self) -> Option<Envelope<M>> {
    if self.closed {
      return None;
    }
    self.queues.iter_mut().find_map(VecDeque::pop_front)
  }

  fn has_pending(&self) -> bool {
    !self.closed && self.queues.iter().any(|q| !q.is_empty())
  }
}

pub(crate) struct Mailbox<M: ActorMsg> {
  id: ActorId,
  parent: Option<ActorId>,
  policy: SupervisionPolicy,
  system: Weak<SystemInner<M>>,
  actor: Mutex<Box<dyn Actor<M>>>,
  lanes: Mutex<Lanes<M>>,
  busy: AtomicBool,
  ready: AtomicBool,
  restarts: AtomicU32,
}

impl<M: ActorMsg> Mailbox<M> {
  pub(crate) fn new(
    id: ActorId,
    parent: Option<ActorId>,
    policy: SupervisionPolicy,
    system: Weak<SystemInner<M>>,
    actor: Box<dyn Actor<M>>,
  ) -> Arc<Self> {
    Arc::new(Self {
      id,
      parent,
      policy,
      system,
      actor: Mutex::new(actor),
      lanes: Mutex::new(Lanes {
        queues: [VecDeque::new(), VecDeque::new()],
        closed: false,
      }),
      busy: AtomicBool::new(false),
      ready: AtomicBool::new(false),
      restarts: AtomicU32::new(0),
    })
  }

  pub(crate) fn id(&self) -> &ActorId {
    &self.id
  }

  pub(crate) fn parent(&self) -> Option<&ActorId> {
    self.parent.as_ref()
  }

  pub(crate) fn is_stopped(&self) -> bool {
    self.lanes.lock().closed
  }

  pub(crate) fn enqueue(self: &Arc<Self>, envelope: Envelope<M>, priority: MsgPriority) {
    let rejected = {
      let mut lanes = self.lanes.lock();
      if lanes.closed {
        Some(envelope)
      } else {
        lanes.queues[priority.lane()].push_back(envelope);
        None
      }
    };
    match rejected {
      Some(envelope) => envelope.reject(&self.id),
      None => self.try_schedule(),
    }
  }

  pub(crate) fn schedule_init(self: &Arc<Self>, attempt: u32, delay: Duration) {
    let Some(system) = self.system.upgrade() else {
      return;
    };
    let mailbox = self.clone();
    system
      .dispatcher
      .submit_after(delay, move || mailbox.try_init(attempt));
  }

  /// Closes the mailbox, rejects pending messages and destroys the actor.
  pub(crate) fn destroy(self: &Arc<Self>) {
    let pending: Vec<Envelope<M>> = {
      let mut lanes = self.lanes.lock();
      if lanes.closed {
        return;
      }
      lanes.closed = true;
      lanes.queues.iter_mut().flat_map(|q| q.drain(..)).collect()
    };
    for envelope in pending {
      envelope.reject(&self.id);
    }
    let Some(system) = self.system.upgrade() else {
      return;
    };
    let mailbox = self.clone();
    system.dispatcher.submit(move || mailbox.finish_destroy());
  }

  fn context(self: &Arc<Self>) -> Option<ActorCtx<M>> {
    let system = self.system.upgrade()?;
    Some(ActorCtx::new(ActorSystem::from_inner(system), self.clone()))
  }

  fn try_init(self: &Arc<Self>, attempt: u32) {
    if self.is_stopped() {
      return;
    }
    let Some(ctx) = self.context() else {
      return;
    };
    let result = {
      let mut actor = self.actor.lock();
      let result = guarded(|| actor.init(&ctx));
      if result.is_ok() {
        self.ready.store(true, Ordering::Release);
      }
      result
    };
    match result {
      Ok(()) => {
        debug!(actor = %self.id, attempt, "Actor initialized");
        self.try_schedule();
      }
      Err(error) => {
        let next = attempt + 1;
        if self.policy.allows_restart(next) {
          warn!(actor = %self.id, attempt = next, error = %error, "Actor init failed, retrying");
          self.schedule_init(next, self.policy.restart_backoff);
        } else {
          error!(actor = %self.id, error = %error, "Actor init failed, stopping");
          ctx.system().stop(&self.id);
        }
      }
    }
  }

  fn try_schedule(self: &Arc<Self>) {
    if !self.ready.load(Ordering::Acquire) {
      return;
    }
    if self
      .busy
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      return;
    }
    match self.system.upgrade() {
      Some(system) => {
        let mailbox = self.clone();
        system.dispatcher.submit(move || mailbox.process_batch());
      }
      None => self.busy.store(false, Ordering::Release),
    }
  }

  fn process_batch(self: &Arc<Self>) {
    if let Some(ctx) = self.context() {
      let throughput = ctx.system().settings().throughput.max(1);
      let mut actor = self.actor.lock();
      for _ in 0..throughput {
        if !self.ready.load(Ordering::Acquire) {
          break;
        }
        let next = self.lanes.lock().pop();
        let Some(envelope) = next else {
          break;
        };
        self.handle(actor.as_mut(), &ctx, envelope);
      }
    }
    self.busy.store(false, Ordering::Release);
    if self.lanes.lock().has_pending() {
      self.try_schedule();
    }
  }

  fn handle(self: &Arc<Self>, actor: &mut dyn Actor<M>, ctx: &ActorCtx<M>, envelope: Envelope<M>) {
    match envelope {
      Envelope::User(msg) => {
        let kind = msg.kind();
        match guarded(|| actor.process(ctx, msg)) {
          Ok(true) => {}
          Ok(false) => warn!(actor = %self.id, kind, "Unhandled message"),
          Err(error) => {
            let action = actor.on_failure(kind, &error);
            let report = FailureReport {
              actor_id: self.id.clone(),
              msg_kind: kind,
              error,
            };
            self.apply(actor, ctx, action, report);
          }
        }
      }
      Envelope::ChildFailed(report) => {
        let action = actor.on_child_failure(ctx, &report);
        match action {
          FailureAction::Resume => {
            debug!(actor = %self.id, child = %report.actor_id, "Child resumes after failure")
          }
          FailureAction::Restart => ctx.system().restart(&report.actor_id),
          FailureAction::Stop => ctx.system().stop(&report.actor_id),
          FailureAction::Escalate => {
            let escalated = FailureReport {
              actor_id: self.id.clone(),
              ..report
            };
            self.escalate(ctx, escalated);
          }
        }
      }
      Envelope::Restart => self.restart(actor, ctx),
    }
  }

  fn apply(
    self: &Arc<Self>,
    actor: &mut dyn Actor<M>,
    ctx: &ActorCtx<M>,
    action: FailureAction,
    report: FailureReport,
  ) {
    match action {
      FailureAction::Resume => {
        debug!(actor = %self.id, kind = report.msg_kind, error = %report.error, "Resuming after failure")
      }
      FailureAction::Restart => self.restart(actor, ctx),
      FailureAction::Stop => {
        warn!(actor = %self.id, kind = report.msg_kind, error = %report.error, "Stopping after failure");
        ctx.system().stop(&self.id);
      }
      FailureAction::Escalate => self.escalate(ctx, report),
    }
  }

  fn escalate(&self, ctx: &ActorCtx<M>, report: FailureReport) {
    match &self.parent {
      Some(parent) => ctx
        .system()
        .deliver(parent, Envelope::ChildFailed(report), MsgPriority::High),
      None => error!(
        actor = %report.actor_id,
        kind = report.msg_kind,
        error = %report.error,
        "Unresolved failure escalated to root"
      ),
    }
  }

  fn restart(self: &Arc<Self>, actor: &mut dyn Actor<M>, ctx: &ActorCtx<M>) {
    let attempt = self.restarts.fetch_add(1, Ordering::AcqRel) + 1;
    if !self.policy.allows_restart(attempt) {
      warn!(actor = %self.id, attempt, "Restart limit reached, stopping");
      ctx.system().stop(&self.id);
      return;
    }
    debug!(actor = %self.id, attempt, "Restarting actor");
    actor.destroy(ctx);
    if let Err(error) = guarded(|| actor.init(ctx)) {
      warn!(actor = %self.id, error = %error, "Actor init failed after restart");
      self.ready.store(false, Ordering::Release);
      self.schedule_init(attempt, self.policy.restart_backoff);
    }
  }

  fn finish_destroy(self: &Arc<Self>) {
    let Some(ctx) = self.context() else {
      return;
    };
    let mut actor = self.actor.lock();
    if self.ready.swap(false, Ordering::AcqRel) {
      let result = guarded(|| {
        actor.destroy(&ctx);
        Ok(())
      });
      if let Err(error) = result {
        warn!(actor = %self.id, error = %error, "Actor destroy failed");
      }
    }
    debug!(actor = %self.id, "Actor stopped");
  }
}

fn guarded<T>(f: impl FnOnce() -> Result<T, ActorError>) -> Result<T, ActorError> {
  match panic::catch_unwind(AssertUnwindSafe(f)) {
    Ok(result) => result,
    Err(payload) => Err(ActorError::Panicked(panic_message(payload.as_ref()))),
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_lanes_pop_high_first_fifo_within_class() {
    let mut lanes: Lanes<u32> = Lanes {
      queues: [VecDeque::new(), VecDeque::new()],
      closed: false,
    };
    lanes.queues[MsgPriority::Normal.lane()].push_back(Envelope::User(1));
    lanes.queues[MsgPriority::Normal.lane()].push_back(Envelope::User(2));
    lanes.queues[MsgPriority::High.lane()].push_back(Envelope::User(10));
    lanes.queues[MsgPriority::High.lane()].push_back(Envelope::User(11));

    let order: Vec<u32> = std::iter::from_fn(|| lanes.pop())
      .filter_map(|e| match e {
        Envelope::User(v) => Some(v),
        _ => None,
      })
      .collect();
    assert_eq!(order, vec![10, 11, 1, 2]);
  }

  #[test]
  fn test_closed_lanes_are_empty() {
    let mut lanes: Lanes<u32> = Lanes {
      queues: [VecDeque::new(), VecDeque::new()],
      closed: false,
    };
    lanes.queues[0].push_back(Envelope::User(1));
    assert!(lanes.has_pending());
    lanes.closed = true;
    assert!(!lanes.has_pending());
    assert!(lanes.pop().is_none());
  }

  #[test]
  fn test_guarded_catches_panics() {
    let result: Result<(), ActorError> = guarded(|| panic!("kaboom"));
    assert_eq!(result, Err(ActorError::Panicked("kaboom".to_string())));
  }
}
