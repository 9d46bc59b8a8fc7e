//! Table provisioning: DDL compilation, lifecycle reconciliation, bootstrap
//! data loading and pointer-map resolution.
//!
//! The entry point is [`TableHandle::provision`] (or [`TableHandle::connect`]
//! for the shipped driver): validate a [`crate::config::TableConfig`], drive
//! the database and table targets to their configured state, and hand back a
//! ready handle.

pub mod ddl;
pub mod loader;
pub mod lock;
pub mod ptr_map;
pub mod reconciler;

pub use ddl::TableDdl;
pub use loader::{DataLoader, ExecutorSink, InsertSink};
pub use lock::ProvisionLock;
pub use ptr_map::{PtrMap, PtrRelation};
pub use reconciler::{TableHandle, TargetState, WaitOptions};
