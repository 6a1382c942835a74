//! Nexum controller — the server side of the remote invocation protocol.
//!
//! A [`Controller`] owns an object registry, a per-peer session store, and a
//! mutable authorization policy. Its accept loop handles every connection on
//! an independent task: handshake, session check, decryption, per-step
//! authorization, dispatch with value threading, and a single framed reply.
//!
//! Hosted objects implement [`ServiceObject`]; a method returns either a
//! plain value or another object for the next chain step to run against.

pub mod controller;
pub mod policy;
pub mod registry;
pub mod sessions;

pub use controller::Controller;
pub use policy::{AuthPolicy, PeerFilter, PolicyScope};
pub use registry::{InvokeError, ObjectRegistry, Outcome, ServiceObject, CONTROLLER_NAME};
pub use sessions::SessionStore;
