//! Composition root.
//!
//! [`RoutingPlatform`] owns the partition resolver, the profile cache, the
//! actor system and the root of the routing tree. Nothing is global: two
//! platforms in one process (or one test binary) share no state.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tenantweave::config::RoutingConfig;
//! use tenantweave::ids::{EntityId, TenantId};
//! use tenantweave::partitioning::{PartitionChangeEvent, QueueKey, ServiceType};
//! use tenantweave::platform::RoutingPlatform;
//! use tenantweave::routing::BusinessMsg;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let platform = RoutingPlatform::builder(RoutingConfig::default()).start()?;
//! platform.on_partition_change(
//!   PartitionChangeEvent::new(ServiceType::Core)
//!     .with_partitions(QueueKey::main(ServiceType::Core), 0..10),
//! );
//! platform.on_application_init();
//! platform.send(
//!   BusinessMsg::new(TenantId::random(), serde_json::json!({"temperature": 21}))
//!     .for_entity(EntityId::device()),
//! );
//! platform.shutdown();
//! # Ok(())
//! # }
//! ```

use crate::actor::{ActorError, ActorId, ActorRef, ActorSystem};
use crate::config::{ConfigError, RoutingConfig};
use crate::ids::{EntityId, TenantId};
use crate::observability::{RoutingObserver, TracingObserver};
use crate::partitioning::{PartitionChangeEvent, PartitionResolver};
use crate::persistence::{InMemoryTenantRepository, TenantRepository};
use crate::profile_cache::EntityProfileCache;
use crate::routing::{
  APP_ACTOR_ID, AppActor, BusinessMsg, ComponentLifecycleMsg, EntityMessageHandler, NoopHandler,
  RoutingContext, RoutingMsg, entity_actor_id, tenant_actor_id,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Failure to start a [`RoutingPlatform`].
#[derive(Debug, Error)]
pub enum PlatformError {
  /// The config is invalid.
  #[error(transparent)]
  Config(#[from] ConfigError),
  /// The actor system could not start.
  #[error(transparent)]
  Actor(#[from] ActorError),
}

/// Builder for [`RoutingPlatform`].
pub struct RoutingPlatformBuilder {
  config: RoutingConfig,
  repository: Option<Arc<dyn TenantRepository>>,
  handler: Option<Arc<dyn EntityMessageHandler>>,
  observer: Option<Arc<dyn RoutingObserver>>,
}

impl RoutingPlatformBuilder {
  /// Uses `repository` for tenant listing and entity lookups. Defaults to an
  /// empty in-memory repository.
  pub fn with_repository(mut self, repository: Arc<dyn TenantRepository>) -> Self {
    self.repository = Some(repository);
    self
  }

  /// Delivers business payloads to `handler`. Defaults to [`NoopHandler`].
  pub fn with_handler(mut self, handler: Arc<dyn EntityMessageHandler>) -> Self {
    self.handler = Some(handler);
    self
  }

  /// Reports branch and cache events to `observer`. Defaults to
  /// [`TracingObserver`].
  pub fn with_observer(mut self, observer: Arc<dyn RoutingObserver>) -> Self {
    self.observer = Some(observer);
    self
  }

  /// Validates the config and starts the root actor on the current tokio
  /// runtime.
  pub fn start(self) -> Result<RoutingPlatform, PlatformError> {
    self.config.validate()?;
    let config = Arc::new(self.config);
    let observer = self
      .observer
      .unwrap_or_else(|| Arc::new(TracingObserver));
    let resolver = Arc::new(PartitionResolver::new(config.queues.iter().cloned()));
    let profile_cache = Arc::new(EntityProfileCache::new(
      config.service_type,
      resolver.clone(),
      observer.clone(),
    ));
    let context = Arc::new(RoutingContext {
      config: config.clone(),
      resolver,
      profile_cache,
      repository: self
        .repository
        .unwrap_or_else(|| Arc::new(InMemoryTenantRepository::new())),
      handler: self.handler.unwrap_or_else(|| Arc::new(NoopHandler)),
      observer,
    });

    let system = ActorSystem::new(config.actor_settings())?;
    let root_context = context.clone();
    let root = system.create_root_actor(
      ActorId::new(APP_ACTOR_ID),
      config.supervision.clone(),
      move || AppActor::new(root_context),
    )?;
    info!(
      service_type = %config.service_type,
      workers = system.worker_pool_size(),
      "Routing platform started"
    );
    Ok(RoutingPlatform {
      context,
      system,
      root,
    })
  }
}

/// The routing core of one process.
pub struct RoutingPlatform {
  context: Arc<RoutingContext>,
  system: ActorSystem<RoutingMsg>,
  root: ActorRef<RoutingMsg>,
}

impl RoutingPlatform {
  /// Starts building a platform from `config`.
  pub fn builder(config: RoutingConfig) -> RoutingPlatformBuilder {
    RoutingPlatformBuilder {
      config,
      repository: None,
      handler: None,
      observer: None,
    }
  }

  /// One-time application init: pre-warms branches of owned tenants.
  pub fn on_application_init(&self) {
    self.root.tell(RoutingMsg::AppInit);
  }

  /// Applies a topology change: swaps the resolver snapshot, then refreshes
  /// the profile cache and notifies the routing tree independently.
  ///
  /// Re-delivering an already applied event is a no-op.
  pub fn on_partition_change(&self, event: PartitionChangeEvent) {
    let changed = self.context.resolver.apply(&event);
    self.context.profile_cache.on_partition_change(&event);
    if changed {
      self
        .root
        .tell_with_high_priority(RoutingMsg::PartitionChange(Arc::new(event)));
    }
  }

  /// Routes an entity lifecycle notification ahead of queued business
  /// messages.
  pub fn on_component_lifecycle(&self, msg: ComponentLifecycleMsg) {
    self
      .root
      .tell_with_high_priority(RoutingMsg::ComponentLifecycle(msg));
  }

  /// Routes a business message. Its callback completes exactly once.
  pub fn send(&self, msg: BusinessMsg) {
    self.root.tell(RoutingMsg::Business(msg));
  }

  /// The partition resolver.
  pub fn resolver(&self) -> &Arc<PartitionResolver> {
    &self.context.resolver
  }

  /// The profile cache.
  pub fn profile_cache(&self) -> &Arc<EntityProfileCache> {
    &self.context.profile_cache
  }

  /// The effective config.
  pub fn config(&self) -> &RoutingConfig {
    &self.context.config
  }

  /// The underlying actor system.
  pub fn system(&self) -> &ActorSystem<RoutingMsg> {
    &self.system
  }

  /// True while a branch for `tenant_id` is alive.
  pub fn has_tenant_branch(&self, tenant_id: TenantId) -> bool {
    self.system.get_actor(&tenant_actor_id(tenant_id)).is_some()
  }

  /// True while an actor for `entity_id` is alive.
  pub fn has_entity_branch(&self, entity_id: &EntityId) -> bool {
    self.system.get_actor(&entity_actor_id(entity_id)).is_some()
  }

  /// Stops the whole tree. Messages sent afterwards complete with success.
  pub fn shutdown(&self) {
    info!("Routing platform shutting down");
    self.system.shutdown();
  }
}
