//! # autosync - Pull-Based ZFS Snapshot Replicator
//!
//! autosync keeps a destination host converging towards the snapshots of
//! a source host. A passive server exposes its datasets over mutually
//! authenticated TLS; a long-running client periodically pulls the
//! snapshot lists, plans a full or incremental transfer per dataset, and
//! pipes the resulting send stream straight into the local receive tool.
//!
//! The filesystem is only ever touched through the
//! [`store::SnapshotStore`] abstraction; [`store::ZfsStore`] is the
//! canonical `zfs`-command-backed implementation.

pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod plan;
pub mod protocol;
pub mod server;
pub mod shaping;
pub mod store;
pub mod tls;

// Re-export commonly used types
pub use config::{Config, Mode};
pub use error::{ConfigError, PlanError, ProtocolError, StoreError, SyncError, TlsError};
pub use store::{SnapshotStore, ZfsStore};
pub use tls::TlsContext;

// vim: ts=4
