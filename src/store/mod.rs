//! SQLite Storage
//!
//! Metadata and feature stores behind the registry's capability traits.
//! Both share the lazily-opened connection pool in `pool`.

pub mod features;
pub mod metadata;
pub mod pool;

pub use features::SqliteFeatureProvider;
pub use metadata::SqliteMetadataStore;
pub use pool::{PooledConnection, SqlitePool};
