//! Snapshot-based partition resolver.

use super::{
  MAIN_QUEUE, PartitionChangeEvent, PartitionDescriptor, QueueConfig, QueueKey, ResolveError,
  ServiceType, partition_of,
};
use crate::ids::{EntityId, TenantId};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Immutable view of which partitions this process owns.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TopologySnapshot {
  version: u64,
  assignments: HashMap<QueueKey, BTreeSet<u32>>,
}

impl TopologySnapshot {
  /// Incremented each time an applied event changes ownership.
  pub fn version(&self) -> u64 {
    self.version
  }

  /// Partitions of `key` owned locally.
  pub fn partitions(&self, key: &QueueKey) -> Option<&BTreeSet<u32>> {
    self.assignments.get(key)
  }

  /// True when `partition` of `key` is owned locally.
  pub fn owns(&self, key: &QueueKey, partition: u32) -> bool {
    self
      .assignments
      .get(key)
      .is_some_and(|owned| owned.contains(&partition))
  }
}

/// Deterministic `(service, queue, tenant, entity) -> descriptor` function over
/// the current topology snapshot.
///
/// Readers never block: each resolution loads the snapshot once. Writers
/// serialize on a mutex and publish a whole new snapshot.
pub struct PartitionResolver {
  queues: HashMap<(ServiceType, String), QueueConfig>,
  snapshot: ArcSwap<TopologySnapshot>,
  // Serializes `apply`; readers go through `snapshot` only.
  writer: Mutex<()>,
}

impl PartitionResolver {
  /// Creates a resolver for the given queues. Nothing is owned until the
  /// first [`PartitionChangeEvent`] is applied.
  pub fn new(queues: impl IntoIterator<Item = QueueConfig>) -> Self {
    let queues = queues
      .into_iter()
      .map(|q| ((q.service_type, q.name.clone()), q))
      .collect();
    Self {
      queues,
      snapshot: ArcSwap::from_pointee(TopologySnapshot::default()),
      writer: Mutex::new(()),
    }
  }

  /// Static definition of a queue.
  pub fn queue(&self, service_type: ServiceType, queue_name: &str) -> Option<&QueueConfig> {
    self.queues.get(&(service_type, queue_name.to_string()))
  }

  /// Current snapshot.
  pub fn snapshot(&self) -> Arc<TopologySnapshot> {
    self.snapshot.load_full()
  }

  /// Version of the current snapshot.
  pub fn topology_version(&self) -> u64 {
    self.snapshot.load().version
  }

  /// Replaces the ownership of every queue of the event's service type.
  ///
  /// Returns `false` when the event changes nothing, in which case the
  /// snapshot (and its version) is left untouched.
  pub fn apply(&self, event: &PartitionChangeEvent) -> bool {
    let service_type = event.service_type();
    let _guard = self.writer.lock();
    let current = self.snapshot.load_full();

    let mut assignments: HashMap<QueueKey, BTreeSet<u32>> = current
      .assignments
      .iter()
      .filter(|(key, _)| key.service_type != service_type)
      .map(|(key, owned)| (key.clone(), owned.clone()))
      .collect();
    for (key, owned) in event.iter() {
      if key.service_type != service_type {
        warn!(queue = %key, event_service = %service_type, "Ignoring queue of another service type");
        continue;
      }
      let Some(queue) = self.queue(service_type, &key.queue_name) else {
        warn!(queue = %key, "Ignoring partitions of unknown queue");
        continue;
      };
      let valid: BTreeSet<u32> = owned
        .iter()
        .copied()
        .filter(|p| *p < queue.partitions)
        .collect();
      if valid.len() != owned.len() {
        warn!(queue = %key, partitions = queue.partitions, "Dropping out of range partitions");
      }
      assignments.insert(key.clone(), valid);
    }

    if assignments == current.assignments {
      return false;
    }
    let version = current.version + 1;
    self.snapshot.store(Arc::new(TopologySnapshot {
      version,
      assignments,
    }));
    info!(service_type = %service_type, version, "Partition ownership changed");
    true
  }

  /// Resolves where `entity_id` of `tenant_id` lives on `queue_name`
  /// (default `Main`).
  ///
  /// A tenant-isolated queue is used when the current snapshot has one for
  /// the tenant; otherwise the shared queue.
  ///
  /// # Errors
  ///
  /// [`ResolveError::UnknownQueue`] when the queue is not configured.
  pub fn resolve(
    &self,
    service_type: ServiceType,
    queue_name: Option<&str>,
    tenant_id: TenantId,
    entity_id: &EntityId,
  ) -> Result<PartitionDescriptor, ResolveError> {
    let queue_name = queue_name.unwrap_or(MAIN_QUEUE);
    let queue = self
      .queue(service_type, queue_name)
      .ok_or_else(|| ResolveError::UnknownQueue {
        service_type,
        queue: queue_name.to_string(),
      })?;
    let snapshot = self.snapshot.load();
    let partition = partition_of(tenant_id, entity_id, queue.partitions);

    let shared = queue.key();
    let isolated = shared.clone().with_tenant(tenant_id);
    if !tenant_id.is_sys() && snapshot.partitions(&isolated).is_some() {
      return Ok(PartitionDescriptor::new(
        format!("{}.{}", queue.topic, tenant_id),
        Some(partition),
        Some(tenant_id),
        snapshot.owns(&isolated, partition),
      ));
    }
    Ok(PartitionDescriptor::new(
      queue.topic.clone(),
      Some(partition),
      None,
      snapshot.owns(&shared, partition),
    ))
  }

  /// Partition index only, for diagnostics.
  pub fn get_entity_id_partition(
    &self,
    service_type: ServiceType,
    queue_name: Option<&str>,
    tenant_id: TenantId,
    entity_id: &EntityId,
  ) -> Result<u32, ResolveError> {
    let queue_name = queue_name.unwrap_or(MAIN_QUEUE);
    self
      .queue(service_type, queue_name)
      .map(|queue| partition_of(tenant_id, entity_id, queue.partitions))
      .ok_or_else(|| ResolveError::UnknownQueue {
        service_type,
        queue: queue_name.to_string(),
      })
  }

  /// True when the `Main` queue partition of `entity_id` is owned locally.
  pub fn is_mine(
    &self,
    service_type: ServiceType,
    tenant_id: TenantId,
    entity_id: &EntityId,
  ) -> Result<bool, ResolveError> {
    self
      .resolve(service_type, None, tenant_id, entity_id)
      .map(|tpi| tpi.is_my_partition())
  }

  /// True when the tenant's own branch belongs to this process.
  pub fn is_my_tenant(&self, service_type: ServiceType, tenant_id: TenantId) -> Result<bool, ResolveError> {
    self.is_mine(service_type, tenant_id, &tenant_id.as_entity_id())
  }

  /// Partitions of `key` currently owned locally.
  pub fn my_partitions(&self, key: &QueueKey) -> BTreeSet<u32> {
    self
      .snapshot
      .load()
      .partitions(key)
      .cloned()
      .unwrap_or_default()
  }

  /// Partitions of `queue_name` owned locally for `tenant_id`: the isolated
  /// queue when the tenant has one, else the shared queue.
  pub fn my_partitions_for_tenant(
    &self,
    service_type: ServiceType,
    queue_name: &str,
    tenant_id: TenantId,
  ) -> BTreeSet<u32> {
    let snapshot = self.snapshot.load();
    let shared = QueueKey::new(service_type, queue_name);
    let isolated = shared.clone().with_tenant(tenant_id);
    snapshot
      .partitions(&isolated)
      .or_else(|| snapshot.partitions(&shared))
      .cloned()
      .unwrap_or_default()
  }
}
