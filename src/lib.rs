//! A Kubernetes client whose writes are visible to its own cached reads.
//!
//! Controllers read from a local cache fed by watches and write straight to
//! the API server. Without coordination a reconcile loop can write an object
//! and immediately read the previous version back from the cache.
//! [`BlockingClient`] wraps a direct client and a cache reader and, after
//! every successful write, waits until the cache reflects it.
//!
//! The building blocks are usable on their own:
//!
//! * [`ApiClient`] talks to the API server for every call.
//! * [`Store`] answers reads from memory and [`Cache`] keeps it current by
//!   watching the cluster.
//! * [`Scheme`] maps kinds to their API resource and an empty template object.
//!
//! All of them implement the traits in [`client`], so they can be swapped for
//! one another.

#![deny(missing_docs)]

mod api;
pub mod barrier;
mod blocking;
mod cache;
pub mod client;
pub mod config;
mod error;
pub mod object;
mod scheme;
mod store;

pub use api::{ApiClient, ApiStatusWriter};
pub use blocking::{BlockingClient, BlockingStatusWriter};
pub use cache::{Cache, Watch};
pub use client::{Client, Reader, StatusClient, StatusWriter, Writer};
pub use config::Config;
pub use error::{Error, Result};
pub use object::{Object, ObjectKey};
pub use scheme::{ObjectFactory, Scheme};
pub use store::Store;
