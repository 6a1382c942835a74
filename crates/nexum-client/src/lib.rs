//! Nexum client — the caller side of the remote invocation protocol.
//!
//! A [`Client`] authenticates against a controller with a shared secret,
//! caches the minted session, and issues one fully synchronous request per
//! connection. [`Replicant`] proxies forward single operations; a
//! [`ChainedReplicant`] accumulates an ordered call chain and realizes it in
//! one round trip, with return values threaded between steps on the server.

pub mod client;
pub mod replicant;

pub use client::{Client, ClientError};
pub use replicant::{Chain, ChainedReplicant, Realized, Replicant};
