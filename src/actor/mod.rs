//! # Actor Runtime
//!
//! Supervised actors with strictly ordered mailboxes, multiplexed over a
//! bounded worker pool instead of a thread per actor.
//!
//! ## Guarantees
//!
//! - A single actor never processes two messages concurrently; domain code
//!   holds its state in plain fields without locks.
//! - Messages to one actor are processed in send order per [`MsgPriority`]
//!   class. High priority messages overtake queued normal ones but are FIFO
//!   among themselves and never interrupt a message mid-processing.
//! - Child creation is idempotent: asking for an existing id returns the
//!   existing reference.
//! - Errors and panics raised by [`Actor::process`] are caught by the runtime
//!   and resolved through [`Actor::on_failure`], escalating to the parent when
//!   asked to. Nothing is re-thrown to the sender.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tenantweave::actor::{Actor, ActorCtx, ActorError, ActorId, ActorMsg, ActorSystem, ActorSystemSettings};
//! use tenantweave::supervision::SupervisionPolicy;
//!
//! struct Ping;
//!
//! impl ActorMsg for Ping {
//!   fn kind(&self) -> &'static str { "PING" }
//! }
//!
//! struct Counter { seen: u64 }
//!
//! impl Actor<Ping> for Counter {
//!   fn process(&mut self, _ctx: &ActorCtx<Ping>, _msg: Ping) -> Result<bool, ActorError> {
//!     self.seen += 1;
//!     Ok(true)
//!   }
//! }
//!
//! # async fn example() -> Result<(), ActorError> {
//! let system = ActorSystem::new(ActorSystemSettings::default())?;
//! let counter = system.create_root_actor(ActorId::new("counter"), SupervisionPolicy::default(), || Counter { seen: 0 })?;
//! counter.tell(Ping);
//! # Ok(())
//! # }
//! ```

mod actor_ref;
mod context;
mod dispatcher;
mod mailbox;
mod system;


pub use actor_ref::ActorRef;
pub use context::ActorCtx;
pub use system::{ActorSystem, ActorSystemSettings};

use crate::supervision::{FailureAction, FailureReport};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Opaque actor identity, unique within a process.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ActorId(Arc<str>);

impl ActorId {
  /// Creates an id from any string-like value.
  pub fn new(id: impl Into<Arc<str>>) -> Self {
    Self(id.into())
  }

  /// Returns the id as a string slice.
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ActorId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Priority class of an enqueued message. `High` sorts before `Normal`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MsgPriority {
  /// Delivered ahead of every queued normal message.
  High,
  /// Default class.
  Normal,
}

impl MsgPriority {
  /// Every class, in delivery order.
  pub const ALL: [MsgPriority; 2] = [MsgPriority::High, MsgPriority::Normal];

  pub(crate) const fn lane(self) -> usize {
    match self {
      MsgPriority::High => 0,
      MsgPriority::Normal => 1,
    }
  }
}

/// Errors raised by the actor runtime or by actors themselves.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ActorError {
  /// The actor failed to process a message.
  #[error("processing failed: {0}")]
  Processing(String),
  /// The actor panicked.
  #[error("actor panicked: {0}")]
  Panicked(String),
  /// The actor failed to initialise.
  #[error("init failed: {0}")]
  Init(String),
  /// A child was requested under a parent that does not exist.
  #[error("parent actor {0} not found")]
  ParentNotFound(ActorId),
  /// The target actor is stopped.
  #[error("actor {0} is stopped")]
  Stopped(ActorId),
  /// No tokio runtime is available to drive the worker pool.
  #[error("no tokio runtime available")]
  NoRuntime,
}

/// Message accepted by an actor system.
pub trait ActorMsg: Send + 'static {
  /// Short, static name of the message kind, used in logs and failure reports.
  fn kind(&self) -> &'static str;

  /// Called instead of processing when the target actor is stopped or unknown.
  fn on_actor_stopped(self, actor: &ActorId)
  where
    Self: Sized,
  {
    let _ = actor;
  }
}

/// A sequential unit of computation.
///
/// All methods run on the actor's own processing context; the runtime never
/// calls two of them concurrently for the same actor.
pub trait Actor<M: ActorMsg>: Send + 'static {
  /// Called once before the first message and again after each restart.
  fn init(&mut self, ctx: &ActorCtx<M>) -> Result<(), ActorError> {
    let _ = ctx;
    Ok(())
  }

  /// Processes one message. `Ok(false)` means the message kind is unhandled.
  fn process(&mut self, ctx: &ActorCtx<M>, msg: M) -> Result<bool, ActorError>;

  /// Called when the actor stops and before each restart.
  fn destroy(&mut self, ctx: &ActorCtx<M>) {
    let _ = ctx;
  }

  /// Decides how to handle a failure of [`Actor::process`].
  fn on_failure(&mut self, msg_kind: &'static str, error: &ActorError) -> FailureAction {
    let _ = (msg_kind, error);
    FailureAction::Resume
  }

  /// Decides how to handle a failure escalated by a child.
  fn on_child_failure(&mut self, ctx: &ActorCtx<M>, report: &FailureReport) -> FailureAction {
    let _ = (ctx, report);
    FailureAction::Escalate
  }
}
