//! Configuration for the routing platform.
//!
//! Defines the worker pool, mailbox throughput, tenant pre-warming, the queues
//! the resolver knows about, entity idle eviction and the default supervision
//! policy. Every field has a default, so a config file only lists overrides.

use crate::actor::ActorSystemSettings;
use crate::partitioning::{MAIN_QUEUE, QueueConfig, ServiceType};
use crate::supervision::SupervisionPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Failure to load or validate a [`RoutingConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
  /// The config file could not be read.
  #[error("failed to read config: {0}")]
  Io(#[from] std::io::Error),
  /// The config is not valid JSON for [`RoutingConfig`].
  #[error("failed to parse config: {0}")]
  Parse(#[from] serde_json::Error),
  /// The config parsed but is inconsistent.
  #[error("invalid config: {0}")]
  Invalid(String),
}

/// Configuration of a [`RoutingPlatform`](crate::platform::RoutingPlatform).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
  /// Maximum number of actors processing at the same time.
  pub worker_pool_size: usize,
  /// Maximum messages one actor drains per scheduling turn.
  pub mailbox_throughput: usize,
  /// Pre-warm branches of locally owned tenants on application init.
  pub host_tenant_components: bool,
  /// Service type whose ownership drives the tenant tree and profile cache.
  pub service_type: ServiceType,
  /// Queues known to the partition resolver.
  pub queues: Vec<QueueConfig>,
  /// Stop entity actors idle for longer than this. `None` keeps them alive.
  pub entity_idle_timeout_ms: Option<u64>,
  /// How often entity actors check for idleness.
  pub idle_check_interval_ms: u64,
  /// Supervision policy of tenant and entity actors.
  pub supervision: SupervisionPolicy,
}

impl Default for RoutingConfig {
  fn default() -> Self {
    let settings = ActorSystemSettings::default();
    Self {
      worker_pool_size: settings.worker_pool_size,
      mailbox_throughput: settings.throughput,
      host_tenant_components: true,
      service_type: ServiceType::Core,
      queues: vec![
        QueueConfig::new(ServiceType::Core, MAIN_QUEUE, "tb_core", 10),
        QueueConfig::new(ServiceType::RuleEngine, MAIN_QUEUE, "tb_rule_engine.main", 10),
        QueueConfig::new(
          ServiceType::RuleEngine,
          "HighPriority",
          "tb_rule_engine.hp",
          10,
        ),
        QueueConfig::new(
          ServiceType::RuleEngine,
          "SequentialByOriginator",
          "tb_rule_engine.sq",
          10,
        ),
      ],
      entity_idle_timeout_ms: None,
      idle_check_interval_ms: 60_000,
      supervision: SupervisionPolicy::default(),
    }
  }
}

impl RoutingConfig {
  /// Parses and validates a JSON config.
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    let config: RoutingConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
  }

  /// Reads, parses and validates a JSON config file.
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let json = std::fs::read_to_string(path)?;
    Self::from_json_str(&json)
  }

  /// Validates the config: non-zero pool, throughput and partition counts,
  /// unique queues, a `Main` queue for the hosted service type.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.worker_pool_size == 0 {
      return Err(ConfigError::Invalid("worker_pool_size must be > 0".to_string()));
    }
    if self.mailbox_throughput == 0 {
      return Err(ConfigError::Invalid("mailbox_throughput must be > 0".to_string()));
    }
    let mut seen = HashSet::new();
    for queue in &self.queues {
      if queue.partitions == 0 {
        return Err(ConfigError::Invalid(format!(
          "queue {} of {} must have > 0 partitions",
          queue.name, queue.service_type
        )));
      }
      if !seen.insert((queue.service_type, queue.name.as_str())) {
        return Err(ConfigError::Invalid(format!(
          "duplicate queue {} for {}",
          queue.name, queue.service_type
        )));
      }
    }
    if !seen.contains(&(self.service_type, MAIN_QUEUE)) {
      return Err(ConfigError::Invalid(format!(
        "no {} queue configured for {}",
        MAIN_QUEUE, self.service_type
      )));
    }
    if self.entity_idle_timeout_ms.is_some() && self.idle_check_interval_ms == 0 {
      return Err(ConfigError::Invalid(
        "idle_check_interval_ms must be > 0 when entity_idle_timeout_ms is set".to_string(),
      ));
    }
    Ok(())
  }

  /// Actor system settings derived from this config.
  pub fn actor_settings(&self) -> ActorSystemSettings {
    ActorSystemSettings {
      worker_pool_size: self.worker_pool_size,
      throughput: self.mailbox_throughput,
    }
  }

  /// Idle timeout of entity actors, if enabled.
  pub fn entity_idle_timeout(&self) -> Option<Duration> {
    self.entity_idle_timeout_ms.map(Duration::from_millis)
  }

  /// Interval between idle checks.
  pub fn idle_check_interval(&self) -> Duration {
    Duration::from_millis(self.idle_check_interval_ms)
  }
}
