//! Business message handler seam.

use crate::ids::{EntityId, TenantId};
use thiserror::Error;

/// Rejection raised by an [`EntityMessageHandler`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum HandlerError {
  /// The payload was rejected.
  #[error("rejected: {0}")]
  Rejected(String),
}

/// Receives business payloads once they reach the owning actor.
///
/// Called from the actor's own processing context, never concurrently for the
/// same entity.
pub trait EntityMessageHandler: Send + Sync {
  /// Handles one payload. `entity_id` is `None` for tenant-level messages.
  fn on_message(
    &self,
    tenant_id: TenantId,
    entity_id: Option<&EntityId>,
    payload: &serde_json::Value,
  ) -> Result<(), HandlerError>;
}

/// Accepts every payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandler;

impl EntityMessageHandler for NoopHandler {
  fn on_message(
    &self,
    _tenant_id: TenantId,
    _entity_id: Option<&EntityId>,
    _payload: &serde_json::Value,
  ) -> Result<(), HandlerError> {
    Ok(())
  }
}
