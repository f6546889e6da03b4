//! # Routing Errors
//!
//! Failure taxonomy surfaced to producers through a message's completion
//! [`Callback`](crate::callback::Callback).
//!
//! - **Routing faults** (unowned or deleted tenant) are not errors at all: the
//!   router completes the callback with success.
//! - **Validation faults** come from the profile cache ([`CacheError`]) and are
//!   returned synchronously to whoever mutates the cache.
//! - **Processing faults** are handled by the actor runtime's supervision and
//!   never reach the sender's thread.
//! - **Upstream business faults**, such as a business message addressed to the
//!   system tenant, complete the callback with a [`RoutingError`].

use crate::ids::EntityType;
use crate::partitioning::ResolveError;
use crate::persistence::RepositoryError;
use crate::profile_cache::CacheError;
use thiserror::Error;

/// Typed failure delivered to a message's completion callback.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RoutingError {
  /// A business message targeted the reserved system tenant.
  #[error("message of kind {kind} has system tenant id")]
  SystemTenant {
    /// Message kind that was rejected.
    kind: &'static str,
    /// Entity type carried by the message, if any.
    entity_type: Option<EntityType>,
  },
  /// The entity message handler rejected the payload.
  #[error("handler error: {0}")]
  Handler(String),
  /// The profile cache refused a mutation.
  #[error("profile cache error: {0}")]
  Cache(#[from] CacheError),
  /// Partition resolution failed.
  #[error("partition resolution error: {0}")]
  Resolve(#[from] ResolveError),
  /// A persistence lookup failed.
  #[error("repository error: {0}")]
  Repository(#[from] RepositoryError),
  /// The callback was dropped without being completed.
  #[error("callback dropped without completion")]
  CallbackDropped,
}
