//! # Partition Resolver
//!
//! Maps `(service type, queue, tenant, entity)` to a [`PartitionDescriptor`]:
//! the topic, the partition index derived from a stable hash, the owning tenant
//! for tenant-isolated queues, and whether this process currently owns that
//! partition.
//!
//! Ownership comes from [`PartitionChangeEvent`]s delivered by the cluster
//! layer. The resolver keeps them in an immutable [`TopologySnapshot`] that is
//! swapped atomically, so a resolution observes either the old or the new
//! topology and never a mix.
//!
//! ## Usage
//!
//! ```rust
//! use tenantweave::ids::{EntityId, TenantId};
//! use tenantweave::partitioning::{PartitionChangeEvent, PartitionResolver, QueueConfig, QueueKey, ServiceType};
//!
//! let resolver = PartitionResolver::new([QueueConfig::new(ServiceType::Core, "Main", "tb_core", 4)]);
//! resolver.apply(
//!   &PartitionChangeEvent::new(ServiceType::Core)
//!     .with_partitions(QueueKey::main(ServiceType::Core), 0..4),
//! );
//!
//! let tenant = TenantId::random();
//! let tpi = resolver
//!   .resolve(ServiceType::Core, None, tenant, &tenant.as_entity_id())
//!   .unwrap();
//! assert!(tpi.is_my_partition());
//! ```

mod hash;
mod resolver;


pub use hash::partition_of;
pub use resolver::{PartitionResolver, TopologySnapshot};

use crate::ids::TenantId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

/// Name of the default queue of every service type.
pub const MAIN_QUEUE: &str = "Main";

/// Kind of cluster service a queue belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
  /// Core services: device state, tenant actors.
  Core,
  /// Rule engine.
  RuleEngine,
  /// Transport adapters.
  Transport,
}

impl ServiceType {
  /// Upper-case name used in logs.
  pub const fn as_str(self) -> &'static str {
    match self {
      ServiceType::Core => "TB_CORE",
      ServiceType::RuleEngine => "TB_RULE_ENGINE",
      ServiceType::Transport => "TB_TRANSPORT",
    }
  }
}

impl fmt::Display for ServiceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Identity of one logical queue, optionally isolated to a tenant.
///
/// Shared queues use [`TenantId::SYS`] as their tenant.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct QueueKey {
  /// Service type owning the queue.
  pub service_type: ServiceType,
  /// Queue name, e.g. `Main`.
  pub queue_name: String,
  /// Owning tenant, or the system tenant for shared queues.
  pub tenant_id: TenantId,
}

impl QueueKey {
  /// Key of a shared (system) queue.
  pub fn new(service_type: ServiceType, queue_name: impl Into<String>) -> Self {
    Self {
      service_type,
      queue_name: queue_name.into(),
      tenant_id: TenantId::SYS,
    }
  }

  /// Key of the shared `Main` queue of a service type.
  pub fn main(service_type: ServiceType) -> Self {
    Self::new(service_type, MAIN_QUEUE)
  }

  /// Same queue, isolated to `tenant_id`.
  pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
    self.tenant_id = tenant_id;
    self
  }

  /// True for tenant-isolated queues.
  pub fn is_isolated(&self) -> bool {
    !self.tenant_id.is_sys()
  }
}

impl fmt::Display for QueueKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.service_type, self.queue_name)?;
    if self.is_isolated() {
      write!(f, ":{}", self.tenant_id)?;
    }
    Ok(())
  }
}

/// Static definition of a queue: its topic and partition count.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
  /// Service type the queue belongs to.
  pub service_type: ServiceType,
  /// Queue name.
  pub name: String,
  /// Broker topic.
  pub topic: String,
  /// Number of partitions. Must be non-zero.
  pub partitions: u32,
}

impl QueueConfig {
  /// Creates a queue definition.
  pub fn new(
    service_type: ServiceType,
    name: impl Into<String>,
    topic: impl Into<String>,
    partitions: u32,
  ) -> Self {
    Self {
      service_type,
      name: name.into(),
      topic: topic.into(),
      partitions,
    }
  }

  /// Shared key of this queue.
  pub fn key(&self) -> QueueKey {
    QueueKey::new(self.service_type, self.name.clone())
  }
}

/// Result of a partition resolution. Immutable; recomputed on topology change.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PartitionDescriptor {
  topic: String,
  partition: Option<u32>,
  tenant_id: Option<TenantId>,
  my_partition: bool,
}

impl PartitionDescriptor {
  /// Creates a descriptor.
  pub fn new(
    topic: impl Into<String>,
    partition: Option<u32>,
    tenant_id: Option<TenantId>,
    my_partition: bool,
  ) -> Self {
    Self {
      topic: topic.into(),
      partition,
      tenant_id,
      my_partition,
    }
  }

  /// Topic or queue name.
  pub fn topic(&self) -> &str {
    &self.topic
  }

  /// Partition index; `None` for the system partition.
  pub fn partition(&self) -> Option<u32> {
    self.partition
  }

  /// Owning tenant of an isolated queue; `None` when not tenant-scoped.
  pub fn tenant_id(&self) -> Option<TenantId> {
    self.tenant_id
  }

  /// True when this process owns the partition.
  pub fn is_my_partition(&self) -> bool {
    self.my_partition
  }

  /// Topic with the partition suffix, e.g. `tb_core.3`.
  pub fn full_topic_name(&self) -> String {
    match self.partition {
      Some(partition) => format!("{}.{}", self.topic, partition),
      None => self.topic.clone(),
    }
  }
}

/// Partitions now owned locally, per queue of one service type.
///
/// Delivered at least once; applying the same event twice is a no-op.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartitionChangeEvent {
  service_type: ServiceType,
  partitions: HashMap<QueueKey, BTreeSet<u32>>,
}

impl PartitionChangeEvent {
  /// Creates an event in which this process owns nothing of `service_type`.
  pub fn new(service_type: ServiceType) -> Self {
    Self {
      service_type,
      partitions: HashMap::new(),
    }
  }

  /// Adds the locally owned partitions of `key`.
  ///
  /// Keys of another service type are ignored when the event is applied.
  pub fn with_partitions(mut self, key: QueueKey, partitions: impl IntoIterator<Item = u32>) -> Self {
    self.partitions.entry(key).or_default().extend(partitions);
    self
  }

  /// Service type whose ownership changed.
  pub fn service_type(&self) -> ServiceType {
    self.service_type
  }

  /// Owned partitions of `key`, if the event mentions it.
  pub fn partitions(&self, key: &QueueKey) -> Option<&BTreeSet<u32>> {
    self.partitions.get(key)
  }

  /// Every queue the event mentions with its owned partitions.
  pub fn iter(&self) -> impl Iterator<Item = (&QueueKey, &BTreeSet<u32>)> {
    self.partitions.iter()
  }

  /// Owned partitions of `queue_name` for `tenant_id`: the isolated queue
  /// when present, else the shared one, else nothing.
  pub fn partitions_for_tenant(&self, queue_name: &str, tenant_id: TenantId) -> BTreeSet<u32> {
    let shared = QueueKey::new(self.service_type, queue_name);
    let isolated = shared.clone().with_tenant(tenant_id);
    self
      .partitions
      .get(&isolated)
      .or_else(|| self.partitions.get(&shared))
      .cloned()
      .unwrap_or_default()
  }
}

/// Partition resolution errors.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ResolveError {
  /// No queue with this name is configured for the service type.
  #[error("unknown queue {queue} for service type {service_type}")]
  UnknownQueue {
    /// Requested service type.
    service_type: ServiceType,
    /// Requested queue name.
    queue: String,
  },
}
