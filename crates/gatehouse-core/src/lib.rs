//! Gatehouse core library: transport-agnostic admission control.
//!
//! `gatehouse-core` decides whether a caller may proceed. It knows nothing
//! about HTTP; the web crate feeds it request metadata and acts on the answer.
//!
//! # Modules
//!
//! - [`config`]: registry settings ([`RegistryConfig`]) and the key [`Strategy`].
//! - [`identity`]: pure mapping from request metadata to a rate-limit key.
//! - [`bucket`]: the per-client token bucket ([`ClientBucket`]).
//! - [`registry`]: concurrent key → bucket store ([`BucketRegistry`]).
//! - [`evictor`]: background task removing idle buckets.
//! - [`clock`]: overflow-free deadline arithmetic.
//! - [`error`]: [`CoreError`] and [`CoreResult`].

pub mod bucket;
pub mod clock;
pub mod config;
pub mod error;
pub mod evictor;
pub mod identity;
pub mod registry;

pub use bucket::ClientBucket;
pub use clock::deadline_after;
pub use config::{
    AnonymousPolicy, RegistryConfig, Strategy, DEFAULT_SWEEP_INTERVAL, MAX_INTERVAL,
};
pub use error::{CoreError, CoreResult};
pub use evictor::EvictorHandle;
pub use identity::{resolve, ClientMeta, ANONYMOUS_KEY, GLOBAL_KEY};
pub use registry::BucketRegistry;
