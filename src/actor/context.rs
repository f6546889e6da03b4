//! Processing context handed to an actor for each call.

use super::actor_ref::ActorRef;
use super::mailbox::{Envelope, Mailbox};
use super::system::ActorSystem;
use super::{Actor, ActorError, ActorId, ActorMsg, MsgPriority};
use crate::supervision::SupervisionPolicy;
use std::sync::Arc;
use std::time::Duration;

/// The actor's view of itself and the system while it processes a message.
///
/// Child registry mutations made through this context happen on the actor's
/// own single-threaded processing context.
pub struct ActorCtx<M: ActorMsg> {
  system: ActorSystem<M>,
  mailbox: Arc<Mailbox<M>>,
}

impl<M: ActorMsg> ActorCtx<M> {
  pub(crate) fn new(system: ActorSystem<M>, mailbox: Arc<Mailbox<M>>) -> Self {
    Self { system, mailbox }
  }

  /// Identity of the current actor.
  pub fn self_id(&self) -> &ActorId {
    self.mailbox.id()
  }

  /// Reference to the current actor.
  pub fn self_ref(&self) -> ActorRef<M> {
    ActorRef::new(self.mailbox.clone())
  }

  /// Identity of the parent, if any.
  pub fn parent_id(&self) -> Option<&ActorId> {
    self.mailbox.parent()
  }

  /// Reference to the parent, if it is still alive.
  pub fn parent_ref(&self) -> Option<ActorRef<M>> {
    self.parent_id().and_then(|id| self.system.get_actor(id))
  }

  /// The owning actor system.
  pub fn system(&self) -> &ActorSystem<M> {
    &self.system
  }

  /// Enqueues a message to the current actor.
  pub fn tell_self(&self, msg: M) {
    self.mailbox.enqueue(Envelope::User(msg), MsgPriority::Normal);
  }

  /// Delivers `msg` to the current actor after `delay`.
  pub fn schedule_once(&self, msg: M, delay: Duration) {
    let mailbox = self.mailbox.clone();
    self.system.dispatcher().schedule(delay, move || {
      mailbox.enqueue(Envelope::User(msg), MsgPriority::Normal)
    });
  }

  /// Returns the child with `id`, creating it with `factory` when absent.
  pub fn get_or_create_child<A, F>(
    &self,
    id: ActorId,
    policy: SupervisionPolicy,
    factory: F,
  ) -> Result<ActorRef<M>, ActorError>
  where
    A: Actor<M>,
    F: FnOnce() -> A,
  {
    self
      .system
      .create_actor(Some(self.self_id()), id, policy, factory)
  }

  /// Returns a live child of the current actor.
  pub fn child(&self, id: &ActorId) -> Option<ActorRef<M>> {
    if self.system.children(self.self_id()).contains(id) {
      self.system.get_actor(id)
    } else {
      None
    }
  }

  /// Ids of the current actor's live children.
  pub fn children(&self) -> Vec<ActorId> {
    self.system.children(self.self_id())
  }

  /// Sends one message built by `make` to every child. Returns the count.
  pub fn broadcast_to_children<F>(&self, priority: MsgPriority, mut make: F) -> usize
  where
    F: FnMut(&ActorId) -> M,
  {
    let children = self.children();
    for child in &children {
      self.system.tell_with_priority(child, make(child), priority);
    }
    children.len()
  }

  /// Stops a child (or any actor) by id.
  pub fn stop(&self, id: &ActorId) {
    self.system.stop(id);
  }

  /// Stops the current actor and its children.
  pub fn stop_self(&self) {
    self.system.stop(self.self_id());
  }
}
