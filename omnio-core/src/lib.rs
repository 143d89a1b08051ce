//! omnio core
//!
//! Contract types for the omnio uniform storage interface: the identifier
//! scheme, the six-operation backend capability contract, reader/writer
//! session traits, the watcher lifecycle machinery, and the scheme
//! dispatch registry.

pub mod backend;
pub mod error;
pub mod ident;
pub mod reader;
pub mod registry;
pub mod watcher;

pub use backend::{Backend, Reader, WatchCallback, WatcherFactory, Writer};
pub use error::{OmnioError, OmnioResult};
pub use ident::Identifier;
pub use reader::BytesReader;
pub use registry::Registry;
pub use watcher::{WatchContext, Watcher};
