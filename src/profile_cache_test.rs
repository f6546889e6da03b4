use crate::ids::{EntityId, EntityType, TenantId};
use crate::observability::CountingObserver;
use crate::partitioning::{
  MAIN_QUEUE, PartitionChangeEvent, PartitionResolver, QueueConfig, QueueKey, ResolveError,
  ServiceType,
};
use crate::profile_cache::{CacheError, EntityProfileCache, TenantEntityProfileCache};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const PARTITIONS: u32 = 4;

fn resolver() -> Arc<PartitionResolver> {
  Arc::new(PartitionResolver::new([QueueConfig::new(
    ServiceType::Core,
    MAIN_QUEUE,
    "tb_core",
    PARTITIONS,
  )]))
}

fn own_all() -> PartitionChangeEvent {
  PartitionChangeEvent::new(ServiceType::Core)
    .with_partitions(QueueKey::main(ServiceType::Core), 0..PARTITIONS)
}

fn cache_with(resolver: Arc<PartitionResolver>) -> (EntityProfileCache, Arc<CountingObserver>) {
  let observer = Arc::new(CountingObserver::new());
  let cache = EntityProfileCache::new(ServiceType::Core, resolver, observer.clone());
  (cache, observer)
}

#[test]
fn test_add_then_query_then_evict() {
  let cache = TenantEntityProfileCache::new(BTreeSet::from([0, 1]));
  let profile = EntityId::device_profile();
  let device = EntityId::device();

  cache.add(profile, device, 0, true).unwrap();
  assert_eq!(
    cache.get_my_entity_ids_by_profile_id(&profile),
    HashSet::from([device])
  );

  assert_eq!(cache.evict(&device), Some(profile));
  assert!(cache.get_my_entity_ids_by_profile_id(&profile).is_empty());
  assert!(cache.is_empty());
}

#[test]
fn test_evict_unknown_is_noop() {
  let cache = TenantEntityProfileCache::default();
  assert_eq!(cache.evict(&EntityId::device()), None);
}

#[test]
fn test_leaf_profile_key_rejected_without_side_effects() {
  let cache = TenantEntityProfileCache::new(BTreeSet::from([0]));
  let profile = EntityId::device_profile();
  let device = EntityId::device();
  cache.add(profile, device, 0, true).unwrap();

  for leaf in [EntityId::device(), EntityId::random(EntityType::Asset)] {
    let err = cache.add(leaf, EntityId::device(), 0, true).unwrap_err();
    assert_eq!(err, CacheError::LeafProfileKey { profile_id: leaf });
    let err = cache.update(Some(&profile), leaf, device, 0, true).unwrap_err();
    assert_eq!(err, CacheError::LeafProfileKey { profile_id: leaf });
  }
  assert_eq!(cache.len(), 1);
  assert_eq!(cache.profile_of(&device), Some(profile));
}

#[test]
fn test_unowned_member_is_hidden() {
  let cache = TenantEntityProfileCache::new(BTreeSet::from([0]));
  let profile = EntityId::device_profile();
  let device = EntityId::device();
  cache.add(profile, device, 3, false).unwrap();
  assert!(cache.get_my_entity_ids_by_profile_id(&profile).is_empty());
  assert_eq!(
    cache.get_all_entity_ids_by_profile_id(&profile),
    HashSet::from([device])
  );
}

#[test]
fn test_entity_belongs_to_one_profile() {
  let cache = TenantEntityProfileCache::new(BTreeSet::from([0]));
  let first = EntityId::device_profile();
  let second = EntityId::device_profile();
  let device = EntityId::device();
  cache.add(first, device, 0, true).unwrap();
  cache.add(second, device, 0, true).unwrap();
  assert!(cache.get_my_entity_ids_by_profile_id(&first).is_empty());
  assert_eq!(
    cache.get_my_entity_ids_by_profile_id(&second),
    HashSet::from([device])
  );
}

#[test]
fn test_update_moves_entity() {
  let cache = TenantEntityProfileCache::new(BTreeSet::from([0]));
  let old = EntityId::device_profile();
  let new = EntityId::device_profile();
  let device = EntityId::device();
  cache.add(old, device, 0, true).unwrap();
  cache.update(Some(&old), new, device, 0, true).unwrap();
  assert!(cache.get_my_entity_ids_by_profile_id(&old).is_empty());
  assert_eq!(
    cache.get_my_entity_ids_by_profile_id(&new),
    HashSet::from([device])
  );
  assert_eq!(cache.profile_of(&device), Some(new));
}

#[test]
fn test_update_never_shows_entity_under_both_profiles() {
  let cache = Arc::new(TenantEntityProfileCache::new(BTreeSet::from([0])));
  let a = EntityId::device_profile();
  let b = EntityId::device_profile();
  let device = EntityId::device();
  cache.add(a, device, 0, true).unwrap();

  let done = Arc::new(AtomicBool::new(false));
  let readers: Vec<_> = (0..4)
    .map(|_| {
      let cache = cache.clone();
      let done = done.clone();
      std::thread::spawn(move || {
        while !done.load(Ordering::Acquire) {
          let profile = cache.profile_of(&device);
          assert!(profile == Some(a) || profile == Some(b));
          assert_eq!(cache.len(), 1);
        }
      })
    })
    .collect();

  for round in 0..1000 {
    let (from, to) = if round % 2 == 0 { (a, b) } else { (b, a) };
    cache.update(Some(&from), to, device, 0, true).unwrap();
    let in_from = cache.get_my_entity_ids_by_profile_id(&from).contains(&device);
    let in_to = cache.get_my_entity_ids_by_profile_id(&to).contains(&device);
    assert!(!in_from && in_to);
  }
  done.store(true, Ordering::Release);
  for reader in readers {
    reader.join().unwrap();
  }
  assert_eq!(cache.len(), 1);
}

#[test]
fn test_remove_profile_drops_members() {
  let cache = TenantEntityProfileCache::new(BTreeSet::from([0, 1]));
  let profile = EntityId::device_profile();
  let other = EntityId::device_profile();
  let kept = EntityId::device();
  cache.add(profile, EntityId::device(), 0, true).unwrap();
  cache.add(profile, EntityId::device(), 1, true).unwrap();
  cache.add(other, kept, 0, true).unwrap();

  assert_eq!(cache.remove_profile(&profile), 2);
  assert!(cache.get_my_entity_ids_by_profile_id(&profile).is_empty());
  assert_eq!(cache.len(), 1);
  assert_eq!(cache.remove_profile(&profile), 0);
}

#[test]
fn test_partition_change_rebuilds_owned_view() {
  let cache = TenantEntityProfileCache::new(BTreeSet::from([0, 1]));
  let profile = EntityId::device_profile();
  let d0 = EntityId::device();
  let d1 = EntityId::device();
  cache.add(profile, d0, 0, true).unwrap();
  cache.add(profile, d1, 1, true).unwrap();

  cache.set_my_partitions(BTreeSet::from([1]));
  assert_eq!(
    cache.get_my_entity_ids_by_profile_id(&profile),
    HashSet::from([d1])
  );

  cache.set_my_partitions(BTreeSet::new());
  assert!(cache.get_my_entity_ids_by_profile_id(&profile).is_empty());

  cache.set_my_partitions(BTreeSet::from([0, 1]));
  assert_eq!(
    cache.get_my_entity_ids_by_profile_id(&profile),
    HashSet::from([d0, d1])
  );
}

#[test]
fn test_tenant_reassigned_away_hides_prior_members() {
  let resolver = resolver();
  resolver.apply(&own_all());
  let (cache, _) = cache_with(resolver.clone());
  let tenant = TenantId::random();
  let profile = EntityId::device_profile();
  let device = EntityId::device();

  cache.add(tenant, profile, device).unwrap();
  assert_eq!(
    cache.get_my_entity_ids_by_profile_id(tenant, &profile),
    HashSet::from([device])
  );

  let away = PartitionChangeEvent::new(ServiceType::Core);
  resolver.apply(&away);
  cache.on_partition_change(&away);
  assert!(
    cache
      .get_my_entity_ids_by_profile_id(tenant, &profile)
      .is_empty()
  );
  assert_eq!(cache.tenant(tenant).len(), 1);

  resolver.apply(&own_all());
  cache.on_partition_change(&own_all());
  assert_eq!(
    cache.get_my_entity_ids_by_profile_id(tenant, &profile),
    HashSet::from([device])
  );
}

#[test]
fn test_partition_change_is_idempotent() {
  let resolver = resolver();
  resolver.apply(&own_all());
  let (cache, _) = cache_with(resolver);
  let tenant = TenantId::random();
  let profile = EntityId::device_profile();
  let devices: Vec<EntityId> = (0..20).map(|_| EntityId::device()).collect();
  for device in &devices {
    cache.add(tenant, profile, *device).unwrap();
  }

  let event = PartitionChangeEvent::new(ServiceType::Core)
    .with_partitions(QueueKey::main(ServiceType::Core), [0, 2]);
  cache.on_partition_change(&event);
  let once = cache.get_my_entity_ids_by_profile_id(tenant, &profile);
  cache.on_partition_change(&event);
  assert_eq!(cache.get_my_entity_ids_by_profile_id(tenant, &profile), once);
  assert_eq!(cache.tenant(tenant).my_partitions(), BTreeSet::from([0, 2]));
}

#[test]
fn test_isolated_tenant_takes_its_own_partitions() {
  let resolver = resolver();
  let (cache, _) = cache_with(resolver);
  let isolated = TenantId::random();
  let shared = TenantId::random();
  cache.tenant(isolated);
  cache.tenant(shared);

  cache.on_partition_change(
    &PartitionChangeEvent::new(ServiceType::Core)
      .with_partitions(QueueKey::main(ServiceType::Core), [1])
      .with_partitions(QueueKey::main(ServiceType::Core).with_tenant(isolated), [2, 3]),
  );
  assert_eq!(cache.tenant(isolated).my_partitions(), BTreeSet::from([2, 3]));
  assert_eq!(cache.tenant(shared).my_partitions(), BTreeSet::from([1]));
}

#[test]
fn test_other_service_type_events_ignored() {
  let resolver = resolver();
  resolver.apply(&own_all());
  let (cache, _) = cache_with(resolver);
  let tenant = TenantId::random();
  cache.tenant(tenant);
  cache.on_partition_change(&PartitionChangeEvent::new(ServiceType::RuleEngine));
  assert_eq!(cache.tenant(tenant).my_partitions().len(), PARTITIONS as usize);
}

#[test]
fn test_lazy_tenant_entry_starts_with_current_ownership() {
  let resolver = resolver();
  resolver.apply(
    &PartitionChangeEvent::new(ServiceType::Core)
      .with_partitions(QueueKey::main(ServiceType::Core), [3]),
  );
  let (cache, _) = cache_with(resolver);
  assert_eq!(cache.tenant_count(), 0);
  assert_eq!(cache.tenant(TenantId::random()).my_partitions(), BTreeSet::from([3]));
  assert_eq!(cache.tenant_count(), 1);
}

#[test]
fn test_hits_and_misses_are_observed() {
  let resolver = resolver();
  resolver.apply(&own_all());
  let (cache, observer) = cache_with(resolver);
  let tenant = TenantId::random();
  let profile = EntityId::device_profile();
  cache.get_my_entity_ids_by_profile_id(tenant, &profile);
  cache.add(tenant, profile, EntityId::device()).unwrap();
  cache.get_my_entity_ids_by_profile_id(tenant, &profile);
  assert_eq!(observer.cache_misses(), 1);
  assert_eq!(observer.cache_hits(), 1);
}

#[test]
fn test_add_reports_resolution_failure() {
  let resolver = resolver();
  let observer = Arc::new(CountingObserver::new());
  let cache = EntityProfileCache::new(ServiceType::Core, resolver, observer).with_queue("Missing");
  let err = cache
    .add(TenantId::random(), EntityId::device_profile(), EntityId::device())
    .unwrap_err();
  assert_eq!(
    err,
    CacheError::Resolve(ResolveError::UnknownQueue {
      service_type: ServiceType::Core,
      queue: "Missing".to_string()
    })
  );
  assert_eq!(cache.tenant_count(), 0);
}

#[test]
fn test_leaf_key_rejected_before_tenant_entry_is_created() {
  let (cache, _) = cache_with(resolver());
  let err = cache
    .add(TenantId::random(), EntityId::device(), EntityId::device())
    .unwrap_err();
  assert!(matches!(err, CacheError::LeafProfileKey { .. }));
  assert_eq!(cache.tenant_count(), 0);
}
