//! # TenantWeave
//!
//! Partition-aware routing core for a multi-tenant IoT platform.
//!
//! Every inbound message belongs to a tenant and usually to an entity (a
//! device or an asset). A cluster of identical nodes splits the work by
//! hashing `(tenant, entity)` onto queue partitions; each node only hosts the
//! tenants and entities whose partitions it currently owns.
//!
//! ## Key Pieces
//!
//! - **Actor Runtime** ([`actor`]): supervised actors over a bounded worker
//!   pool, with per-actor FIFO mailboxes and a high priority lane.
//! - **Partition Resolver** ([`partitioning`]): deterministic
//!   `(tenant, entity) -> partition` mapping and an atomically swapped
//!   ownership snapshot.
//! - **Routing Tree** ([`routing`]): an app root, one branch per owned tenant
//!   and one leaf per active entity, rebuilt as ownership moves.
//! - **Profile Cache** ([`profile_cache`]): `profile -> entities` index per
//!   tenant, filtered to locally owned partitions.
//!
//! [`platform::RoutingPlatform`] wires them together.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tenantweave::config::RoutingConfig;
//! use tenantweave::platform::RoutingPlatform;
//!
//! # fn example() -> Result<(), tenantweave::platform::PlatformError> {
//! tenantweave::logging::init_tracing("tenantweave=debug").ok();
//! let platform = RoutingPlatform::builder(RoutingConfig::default()).start()?;
//! platform.on_application_init();
//! # Ok(())
//! # }
//! ```

// Documentation enforcement - treat missing docs as errors
#![deny(missing_docs)]

/// Actor runtime: mailboxes, dispatcher and supervision plumbing.
pub mod actor;
/// One-shot completion callbacks attached to routed messages.
pub mod callback;
/// Platform configuration.
pub mod config;
/// Error types delivered to message callbacks.
pub mod error;
/// Tenant and entity identifiers.
pub mod ids;
/// Tracing subscriber setup.
pub mod logging;
/// Hooks for branch lifecycle and cache hit/miss events.
pub mod observability;
/// Partition hashing, queue topology and ownership snapshots.
pub mod partitioning;
/// Tenant and entity lookups backing the routing tree.
pub mod persistence;
/// Composition root.
pub mod platform;
/// Partition-aware entity profile cache.
pub mod profile_cache;
/// Tenant routing tree.
pub mod routing;
/// Failure policies for supervised actors.
pub mod supervision;

#[cfg(test)]
mod profile_cache_test;

pub use callback::Callback;
pub use config::RoutingConfig;
pub use error::RoutingError;
pub use ids::{EntityId, EntityType, TenantId};
pub use platform::{PlatformError, RoutingPlatform};
