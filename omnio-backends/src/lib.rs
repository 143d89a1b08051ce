//! Storage backends for omnio
//!
//! One module per backend family. The revisioned key tree and the object
//! store are generic over thin client seams ([`kv::KvStore`],
//! [`object::ObjectCluster`]) so the commit and watch semantics are shared
//! between real clusters and the in-process stores.

pub mod kv;
pub mod object;

#[cfg(feature = "local")]
pub mod local;

#[cfg(feature = "etcd")]
pub mod etcd;

#[cfg(feature = "memory")]
pub mod memory;

pub use kv::{KvBackend, KvEntry, KvEvent, KvEventKind, KvStore, MAX_VALUE_LEN};
pub use object::{ObjectBackend, ObjectCluster, ObjectPool};

#[cfg(feature = "local")]
pub use local::{LocalBackend, LocalWatcherFactory};

#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;

#[cfg(feature = "memory")]
pub use memory::{MemCluster, MemPool, MemStore};
