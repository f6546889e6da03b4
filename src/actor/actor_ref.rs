//! Handle for sending messages to one actor.

use super::mailbox::{Envelope, Mailbox};
use super::{ActorId, ActorMsg, MsgPriority};
use std::fmt;
use std::sync::Arc;

/// Reference to a live (or recently stopped) actor.
///
/// Sending to a stopped actor hands the message back through
/// [`ActorMsg::on_actor_stopped`].
pub struct ActorRef<M: ActorMsg> {
  mailbox: Arc<Mailbox<M>>,
}

impl<M: ActorMsg> Clone for ActorRef<M> {
  fn clone(&self) -> Self {
    Self {
      mailbox: self.mailbox.clone(),
    }
  }
}

impl<M: ActorMsg> ActorRef<M> {
  pub(crate) fn new(mailbox: Arc<Mailbox<M>>) -> Self {
    Self { mailbox }
  }

  /// Identity of the target actor.
  pub fn id(&self) -> &ActorId {
    self.mailbox.id()
  }

  /// Non-blocking enqueue with normal priority.
  pub fn tell(&self, msg: M) {
    self.tell_with_priority(msg, MsgPriority::Normal);
  }

  /// Non-blocking enqueue ahead of queued normal messages.
  pub fn tell_with_high_priority(&self, msg: M) {
    self.tell_with_priority(msg, MsgPriority::High);
  }

  /// Non-blocking enqueue in the given priority class.
  pub fn tell_with_priority(&self, msg: M, priority: MsgPriority) {
    self.mailbox.enqueue(Envelope::User(msg), priority);
  }

  /// True once the actor has been stopped.
  pub fn is_stopped(&self) -> bool {
    self.mailbox.is_stopped()
  }
}

impl<M: ActorMsg> fmt::Debug for ActorRef<M> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ActorRef").field("id", self.id()).finish()
  }
}
