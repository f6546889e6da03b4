//! Stable partition hashing.

use crate::ids::{EntityId, TenantId};
use sha2::{Digest, Sha256};

/// Partition index of `entity_id` under `tenant_id` in a queue with
/// `partitions` partitions.
///
/// The tenant's own entity hashes by tenant alone, so every queue places a
/// tenant's root entity the same way regardless of its type tag. The result is
/// stable across processes and releases.
pub fn partition_of(tenant_id: TenantId, entity_id: &EntityId, partitions: u32) -> u32 {
  let mut hasher = Sha256::new();
  hasher.update(tenant_id.as_uuid().as_bytes());
  if entity_id.id() != tenant_id.as_uuid() {
    hasher.update(entity_id.id().as_bytes());
  }
  let digest = hasher.finalize();
  let mut prefix = [0u8; 8];
  prefix.copy_from_slice(&digest[..8]);
  (u64::from_be_bytes(prefix) % u64::from(partitions.max(1))) as u32
}
