//! End-to-end routing behaviour through the public platform API.

use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tenantweave::callback::Callback;
use tenantweave::config::RoutingConfig;
use tenantweave::error::RoutingError;
use tenantweave::ids::{EntityId, EntityType, TenantId};
use tenantweave::observability::CountingObserver;
use tenantweave::partitioning::{PartitionChangeEvent, QueueKey, ServiceType};
use tenantweave::persistence::InMemoryTenantRepository;
use tenantweave::platform::RoutingPlatform;
use tenantweave::profile_cache::CacheError;
use tenantweave::routing::{
  BusinessMsg, ComponentLifecycleEvent, ComponentLifecycleMsg, EntityMessageHandler, HandlerError,
};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

type Outcome = Result<(), RoutingError>;

#[derive(Default)]
struct RecordingHandler {
  seen: Mutex<Vec<(Option<EntityId>, Value)>>,
}

impl EntityMessageHandler for RecordingHandler {
  fn on_message(
    &self,
    _tenant_id: TenantId,
    entity_id: Option<&EntityId>,
    payload: &Value,
  ) -> Result<(), HandlerError> {
    if payload.get("panic").is_some() {
      panic!("handler exploded");
    }
    if let Some(reason) = payload.get("fail").and_then(Value::as_str) {
      return Err(HandlerError::Rejected(reason.to_string()));
    }
    self.seen.lock().push((entity_id.copied(), payload.clone()));
    Ok(())
  }
}

struct Harness {
  platform: RoutingPlatform,
  repository: Arc<InMemoryTenantRepository>,
  handler: Arc<RecordingHandler>,
  observer: Arc<CountingObserver>,
}

impl Harness {
  fn start() -> Self {
    Self::start_with(RoutingConfig {
      worker_pool_size: 4,
      ..RoutingConfig::default()
    })
  }

  fn start_with(config: RoutingConfig) -> Self {
    let repository = Arc::new(InMemoryTenantRepository::new());
    let handler = Arc::new(RecordingHandler::default());
    let observer = Arc::new(CountingObserver::new());
    let platform = RoutingPlatform::builder(config)
      .with_repository(repository.clone())
      .with_handler(handler.clone())
      .with_observer(observer.clone())
      .start()
      .unwrap();
    Self {
      platform,
      repository,
      handler,
      observer,
    }
  }

  fn own_all(&self) {
    self.platform.on_partition_change(
      PartitionChangeEvent::new(ServiceType::Core)
        .with_partitions(QueueKey::main(ServiceType::Core), 0..10),
    );
    self.platform.on_application_init();
  }

  async fn send(&self, msg: BusinessMsg) -> Outcome {
    let (callback, mut rx) = recording();
    self.platform.send(msg.with_callback(callback));
    outcome(&mut rx).await
  }

  async fn lifecycle(&self, msg: ComponentLifecycleMsg) -> Outcome {
    let (callback, mut rx) = recording();
    self
      .platform
      .on_component_lifecycle(msg.with_callback(callback));
    outcome(&mut rx).await
  }
}

fn recording() -> (Callback, UnboundedReceiver<Outcome>) {
  let (tx, rx) = unbounded_channel();
  let failed = tx.clone();
  let callback = Callback::from_fns(
    move || {
      let _ = tx.send(Ok(()));
    },
    move |e| {
      let _ = failed.send(Err(e));
    },
  );
  (callback, rx)
}

async fn outcome(rx: &mut UnboundedReceiver<Outcome>) -> Outcome {
  let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
    .await
    .expect("callback not completed in time")
    .expect("callback channel closed");
  // exactly once: nothing else arrives
  tokio::time::sleep(Duration::from_millis(10)).await;
  assert!(rx.try_recv().is_err(), "callback completed twice");
  first
}

fn device_msg(tenant_id: TenantId, device: EntityId, payload: Value) -> BusinessMsg {
  BusinessMsg::new(tenant_id, payload).for_entity(device)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unowned_tenant_completes_with_success_and_creates_nothing() {
  let harness = Harness::start();
  harness.platform.on_application_init();
  let tenant = TenantId::random();

  for n in 0..3 {
    let msg = device_msg(tenant, EntityId::device(), json!({ "n": n }));
    assert_eq!(harness.send(msg).await, Ok(()));
  }
  assert!(!harness.platform.has_tenant_branch(tenant));
  assert_eq!(harness.observer.branches_created(), 0);
  assert!(harness.handler.seen.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deleted_tenant_messages_succeed_without_branches() {
  let harness = Harness::start();
  harness.own_all();
  let tenant = TenantId::random();
  let device = EntityId::device();
  assert_eq!(harness.send(device_msg(tenant, device, json!({}))).await, Ok(()));

  let deleted =
    ComponentLifecycleMsg::new(tenant, tenant.as_entity_id(), ComponentLifecycleEvent::Deleted);
  assert_eq!(harness.lifecycle(deleted).await, Ok(()));

  let before = harness.handler.seen.lock().len();
  for _ in 0..3 {
    assert_eq!(harness.send(device_msg(tenant, device, json!({}))).await, Ok(()));
    let created =
      ComponentLifecycleMsg::new(tenant, EntityId::device(), ComponentLifecycleEvent::Created);
    assert_eq!(harness.lifecycle(created).await, Ok(()));
  }
  assert!(!harness.platform.has_tenant_branch(tenant));
  assert_eq!(harness.handler.seen.lock().len(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_then_immediate_business_message_succeeds() {
  let harness = Harness::start();
  harness.own_all();
  let tenant = TenantId::random();
  let device = EntityId::device();
  assert_eq!(harness.send(device_msg(tenant, device, json!({}))).await, Ok(()));

  let (delete_cb, mut delete_rx) = recording();
  let (send_cb, mut send_rx) = recording();
  harness.platform.on_component_lifecycle(
    ComponentLifecycleMsg::new(tenant, tenant.as_entity_id(), ComponentLifecycleEvent::Deleted)
      .with_callback(delete_cb),
  );
  harness
    .platform
    .send(device_msg(tenant, device, json!({})).with_callback(send_cb));

  assert_eq!(outcome(&mut delete_rx).await, Ok(()));
  assert_eq!(outcome(&mut send_rx).await, Ok(()));
  assert!(!harness.platform.has_tenant_branch(tenant));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn system_tenant_business_message_fails() {
  let harness = Harness::start();
  harness.own_all();
  let outcome = harness
    .send(device_msg(TenantId::SYS, EntityId::device(), json!({})))
    .await;
  assert_eq!(
    outcome,
    Err(RoutingError::SystemTenant {
      kind: "BUSINESS",
      entity_type: Some(EntityType::Device),
    })
  );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn system_tenant_lifecycle_only_for_system_scoped_types() {
  let harness = Harness::start();
  harness.own_all();
  for _ in 0..3 {
    let tenant = TenantId::random();
    assert_eq!(harness.send(BusinessMsg::new(tenant, json!({}))).await, Ok(()));
  }

  let tenant_profile = ComponentLifecycleMsg::new(
    TenantId::SYS,
    EntityId::random(EntityType::TenantProfile),
    ComponentLifecycleEvent::Updated,
  );
  assert_eq!(harness.lifecycle(tenant_profile).await, Ok(()));

  let device = ComponentLifecycleMsg::new(
    TenantId::SYS,
    EntityId::device(),
    ComponentLifecycleEvent::Created,
  );
  assert!(matches!(
    harness.lifecycle(device).await,
    Err(RoutingError::SystemTenant { .. })
  ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn messages_to_one_entity_are_handled_in_order() {
  let harness = Harness::start();
  harness.own_all();
  let tenant = TenantId::random();
  let device = EntityId::device();

  let mut receivers = Vec::new();
  for n in 0..50 {
    let (callback, rx) = recording();
    harness
      .platform
      .send(device_msg(tenant, device, json!({ "n": n })).with_callback(callback));
    receivers.push(rx);
  }
  for mut rx in receivers {
    assert_eq!(outcome(&mut rx).await, Ok(()));
  }

  let seen: Vec<i64> = harness
    .handler
    .seen
    .lock()
    .iter()
    .map(|(_, payload)| payload["n"].as_i64().unwrap())
    .collect();
  assert_eq!(seen, (0..50).collect::<Vec<i64>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handler_failure_fails_only_that_message() {
  let harness = Harness::start();
  harness.own_all();
  let tenant = TenantId::random();
  let device = EntityId::device();

  let failed = harness
    .send(device_msg(tenant, device, json!({ "fail": "bad reading" })))
    .await;
  assert_eq!(
    failed,
    Err(RoutingError::Handler("rejected: bad reading".to_string()))
  );
  assert_eq!(harness.send(device_msg(tenant, device, json!({}))).await, Ok(()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handler_panic_is_contained() {
  let harness = Harness::start();
  harness.own_all();
  let tenant = TenantId::random();
  let device = EntityId::device();

  let panicked = harness
    .send(device_msg(tenant, device, json!({ "panic": true })))
    .await;
  assert_eq!(panicked, Err(RoutingError::CallbackDropped));
  assert_eq!(harness.send(device_msg(tenant, device, json!({}))).await, Ok(()));
  assert!(harness.platform.has_tenant_branch(tenant));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tenant_level_messages_reach_the_handler() {
  let harness = Harness::start();
  harness.own_all();
  let tenant = TenantId::random();
  assert_eq!(
    harness
      .send(BusinessMsg::new(tenant, json!({ "tenant_wide": true })))
      .await,
    Ok(())
  );
  let seen = harness.handler.seen.lock();
  assert_eq!(seen.len(), 1);
  assert_eq!(seen[0].0, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lifecycle_events_maintain_profile_cache() {
  let harness = Harness::start();
  harness.own_all();
  let tenant = TenantId::random();
  let cache = harness.platform.profile_cache().clone();
  let first = EntityId::device_profile();
  let second = EntityId::device_profile();
  let device = EntityId::device();

  let created = ComponentLifecycleMsg::new(tenant, device, ComponentLifecycleEvent::Created)
    .with_profile(first);
  assert_eq!(harness.lifecycle(created).await, Ok(()));
  assert_eq!(
    cache.get_my_entity_ids_by_profile_id(tenant, &first),
    HashSet::from([device])
  );

  let updated = ComponentLifecycleMsg::new(tenant, device, ComponentLifecycleEvent::Updated)
    .with_old_profile(first)
    .with_profile(second);
  assert_eq!(harness.lifecycle(updated).await, Ok(()));
  assert!(cache.get_my_entity_ids_by_profile_id(tenant, &first).is_empty());
  assert_eq!(
    cache.get_my_entity_ids_by_profile_id(tenant, &second),
    HashSet::from([device])
  );

  assert_eq!(harness.send(device_msg(tenant, device, json!({}))).await, Ok(()));
  assert!(harness.platform.has_entity_branch(&device));

  let deleted = ComponentLifecycleMsg::new(tenant, device, ComponentLifecycleEvent::Deleted);
  assert_eq!(harness.lifecycle(deleted).await, Ok(()));
  assert!(cache.get_my_entity_ids_by_profile_id(tenant, &second).is_empty());
  assert!(!harness.platform.has_entity_branch(&device));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn lifecycle_profile_falls_back_to_repository() {
  let harness = Harness::start();
  harness.own_all();
  let tenant = TenantId::random();
  let profile = EntityId::device_profile();
  let device = EntityId::device();
  harness.repository.add_entity(tenant, device, Some(profile));

  let created = ComponentLifecycleMsg::new(tenant, device, ComponentLifecycleEvent::Created);
  assert_eq!(harness.lifecycle(created).await, Ok(()));
  assert_eq!(
    harness
      .platform
      .profile_cache()
      .get_my_entity_ids_by_profile_id(tenant, &profile),
    HashSet::from([device])
  );

  let profile_deleted =
    ComponentLifecycleMsg::new(tenant, profile, ComponentLifecycleEvent::Deleted);
  assert_eq!(harness.lifecycle(profile_deleted).await, Ok(()));
  assert!(
    harness
      .platform
      .profile_cache()
      .get_my_entity_ids_by_profile_id(tenant, &profile)
      .is_empty()
  );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn leaf_profile_key_fails_the_lifecycle_event() {
  let harness = Harness::start();
  harness.own_all();
  let tenant = TenantId::random();
  let leaf = EntityId::device();
  let created = ComponentLifecycleMsg::new(tenant, EntityId::device(), ComponentLifecycleEvent::Created)
    .with_profile(leaf);
  assert_eq!(
    harness.lifecycle(created).await,
    Err(RoutingError::Cache(CacheError::LeafProfileKey { profile_id: leaf }))
  );
  assert!(harness.platform.profile_cache().tenant(tenant).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_partition_change_is_idempotent() {
  let harness = Harness::start();
  let event = PartitionChangeEvent::new(ServiceType::Core)
    .with_partitions(QueueKey::main(ServiceType::Core), [1, 3, 5]);
  harness.platform.on_partition_change(event.clone());
  let snapshot = harness.platform.resolver().snapshot();
  harness.platform.on_partition_change(event);
  assert_eq!(harness.platform.resolver().snapshot(), snapshot);
  assert_eq!(harness.platform.resolver().topology_version(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn config_is_validated_on_start() {
  let result = RoutingPlatform::builder(RoutingConfig {
    worker_pool_size: 0,
    ..RoutingConfig::default()
  })
  .start();
  assert!(result.is_err());
}
