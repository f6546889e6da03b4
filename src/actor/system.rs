//! Actor system: registry of mailboxes and the parent/child tree.

use super::actor_ref::ActorRef;
use super::dispatcher::Dispatcher;
use super::mailbox::{Envelope, Mailbox};
use super::{Actor, ActorError, ActorId, ActorMsg, MsgPriority};
use crate::supervision::SupervisionPolicy;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

/// Tuning knobs of an [`ActorSystem`].
#[derive(Clone, Debug)]
pub struct ActorSystemSettings {
  /// Maximum number of actors processing at the same time.
  pub worker_pool_size: usize,
  /// Maximum messages one actor drains before yielding its worker.
  pub throughput: usize,
}

impl Default for ActorSystemSettings {
  fn default() -> Self {
    Self {
      worker_pool_size: std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4),
      throughput: 10,
    }
  }
}

pub(crate) struct SystemInner<M: ActorMsg> {
  settings: ActorSystemSettings,
  pub(crate) dispatcher: Dispatcher,
  actors: DashMap<ActorId, Arc<Mailbox<M>>>,
  // A parent's entry is held while one of its children is registered.
  parent_children: DashMap<ActorId, HashSet<ActorId>>,
}

/// Registry and supervisor of actors exchanging messages of type `M`.
///
/// Cheap to clone; clones share the same registry and worker pool.
pub struct ActorSystem<M: ActorMsg> {
  inner: Arc<SystemInner<M>>,
}

impl<M: ActorMsg> Clone for ActorSystem<M> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<M: ActorMsg> ActorSystem<M> {
  /// Creates a system on the current tokio runtime.
  ///
  /// # Errors
  ///
  /// Returns [`ActorError::NoRuntime`] when called outside a tokio runtime.
  pub fn new(settings: ActorSystemSettings) -> Result<Self, ActorError> {
    let handle = Handle::try_current().map_err(|_| ActorError::NoRuntime)?;
    Ok(Self::with_handle(settings, handle))
  }

  /// Creates a system driven by the given runtime handle.
  pub fn with_handle(settings: ActorSystemSettings, handle: Handle) -> Self {
    let dispatcher = Dispatcher::new(handle, settings.worker_pool_size);
    Self {
      inner: Arc::new(SystemInner {
        settings,
        dispatcher,
        actors: DashMap::new(),
        parent_children: DashMap::new(),
      }),
    }
  }

  pub(crate) fn from_inner(inner: Arc<SystemInner<M>>) -> Self {
    Self { inner }
  }

  /// Returns the settings this system was built with.
  pub fn settings(&self) -> &ActorSystemSettings {
    &self.inner.settings
  }

  /// Returns the effective worker pool size.
  pub fn worker_pool_size(&self) -> usize {
    self.inner.dispatcher.pool_size()
  }

  /// Creates a top-level actor, or returns the existing one with that id.
  ///
  /// `factory` runs only when the actor does not exist yet.
  pub fn create_root_actor<A, F>(
    &self,
    id: ActorId,
    policy: SupervisionPolicy,
    factory: F,
  ) -> Result<ActorRef<M>, ActorError>
  where
    A: Actor<M>,
    F: FnOnce() -> A,
  {
    self.create_actor(None, id, policy, factory)
  }

  pub(crate) fn create_actor<A, F>(
    &self,
    parent: Option<&ActorId>,
    id: ActorId,
    policy: SupervisionPolicy,
    factory: F,
  ) -> Result<ActorRef<M>, ActorError>
  where
    A: Actor<M>,
    F: FnOnce() -> A,
  {
    let (mailbox, created) = match parent {
      Some(parent) => self.insert_child(parent, &id, policy, factory)?,
      None => self.insert_mailbox(None, &id, policy, factory),
    };
    if created {
      debug!(actor = %id, parent = ?parent, "Actor created");
      mailbox.schedule_init(0, Duration::ZERO);
    }
    Ok(ActorRef::new(mailbox))
  }

  /// Registers a child while holding the parent's children entry.
  ///
  /// `stop` closes an actor before detaching its children, so a parent seen
  /// open here cannot finish stopping until the child is listed under it.
  fn insert_child<A, F>(
    &self,
    parent: &ActorId,
    id: &ActorId,
    policy: SupervisionPolicy,
    factory: F,
  ) -> Result<(Arc<Mailbox<M>>, bool), ActorError>
  where
    A: Actor<M>,
    F: FnOnce() -> A,
  {
    let parent_mailbox = self
      .inner
      .actors
      .get(parent)
      .map(|entry| entry.value().clone())
      .ok_or_else(|| ActorError::ParentNotFound(parent.clone()))?;
    let mut siblings = self.inner.parent_children.entry(parent.clone()).or_default();
    if parent_mailbox.is_stopped() {
      drop(siblings);
      self
        .inner
        .parent_children
        .remove_if(parent, |_, children| children.is_empty());
      return Err(ActorError::Stopped(parent.clone()));
    }
    let (mailbox, created) = self.insert_mailbox(Some(parent), id, policy, factory);
    if created {
      siblings.insert(id.clone());
    }
    Ok((mailbox, created))
  }

  fn insert_mailbox<A, F>(
    &self,
    parent: Option<&ActorId>,
    id: &ActorId,
    policy: SupervisionPolicy,
    factory: F,
  ) -> (Arc<Mailbox<M>>, bool)
  where
    A: Actor<M>,
    F: FnOnce() -> A,
  {
    match self.inner.actors.entry(id.clone()) {
      Entry::Occupied(entry) => (entry.get().clone(), false),
      Entry::Vacant(entry) => {
        let mailbox = Mailbox::new(
          id.clone(),
          parent.cloned(),
          policy,
          Arc::downgrade(&self.inner),
          Box::new(factory()),
        );
        entry.insert(mailbox.clone());
        (mailbox, true)
      }
    }
  }

  /// Looks up a live actor.
  pub fn get_actor(&self, id: &ActorId) -> Option<ActorRef<M>> {
    self
      .inner
      .actors
      .get(id)
      .map(|entry| ActorRef::new(entry.value().clone()))
  }

  /// Enqueues `msg` for `id` with normal priority.
  pub fn tell(&self, id: &ActorId, msg: M) {
    self.tell_with_priority(id, msg, MsgPriority::Normal);
  }

  /// Enqueues `msg` for `id` ahead of its queued normal messages.
  pub fn tell_with_high_priority(&self, id: &ActorId, msg: M) {
    self.tell_with_priority(id, msg, MsgPriority::High);
  }

  /// Enqueues `msg` for `id` in the given class. Unknown targets reject it.
  pub fn tell_with_priority(&self, id: &ActorId, msg: M, priority: MsgPriority) {
    let mailbox = self.inner.actors.get(id).map(|e| e.value().clone());
    match mailbox {
      Some(mailbox) => mailbox.enqueue(Envelope::User(msg), priority),
      None => msg.on_actor_stopped(id),
    }
  }

  pub(crate) fn deliver(&self, id: &ActorId, envelope: Envelope<M>, priority: MsgPriority) {
    let mailbox = self.inner.actors.get(id).map(|e| e.value().clone());
    if let Some(mailbox) = mailbox {
      mailbox.enqueue(envelope, priority);
    }
  }

  pub(crate) fn restart(&self, id: &ActorId) {
    self.deliver(id, Envelope::Restart, MsgPriority::High);
  }

  /// Stops `id` and, recursively, all of its children.
  ///
  /// The mailbox is closed first: from then on no child can be registered
  /// under `id`.
  pub fn stop(&self, id: &ActorId) {
    let mailbox = self.inner.actors.get(id).map(|entry| entry.value().clone());
    if let Some(mailbox) = &mailbox {
      mailbox.destroy();
    }
    let children = self
      .inner
      .parent_children
      .remove(id)
      .map(|(_, children)| children)
      .unwrap_or_default();
    for child in &children {
      self.stop(child);
    }
    if let Some((_, mailbox)) = self.inner.actors.remove(id) {
      if let Some(parent) = mailbox.parent() {
        if let Some(mut siblings) = self.inner.parent_children.get_mut(parent) {
          siblings.remove(id);
        }
      }
    }
  }

  /// Ids of the live children of `id`.
  pub fn children(&self, id: &ActorId) -> Vec<ActorId> {
    self
      .inner
      .parent_children
      .get(id)
      .map(|children| children.iter().cloned().collect())
      .unwrap_or_default()
  }

  /// Number of live actors.
  pub fn actor_count(&self) -> usize {
    self.inner.actors.len()
  }

  /// Stops every top-level actor and, with them, the whole tree.
  pub fn shutdown(&self) {
    let roots: Vec<ActorId> = self
      .inner
      .actors
      .iter()
      .filter(|entry| entry.value().parent().is_none())
      .map(|entry| entry.key().clone())
      .collect();
    for root in roots {
      self.stop(&root);
    }
  }

  pub(crate) fn dispatcher(&self) -> &Dispatcher {
    &self.inner.dispatcher
  }
}
