//! Nexum wire protocol — remote invocation over TCP.
//!
//! Frames are 4-byte big-endian length prefixes followed by a JSON body.
//! A request carries an ordered sequence of invocations against one
//! registered object; the response carries a status classification and a
//! value or an error.
//!
//! ## Architecture
//!
//! - **message**: envelope and frame types plus the byte-level codec
//! - **frame**: async framed read/write over TCP stream halves
//! - **cipher**: per-peer AES-256-GCM sessions minted at handshake

pub mod cipher;
pub mod frame;
pub mod message;

pub use cipher::{derive_key, CipherSession};
pub use frame::{read_frame, write_frame, WireError, MAX_FRAME_SIZE};
pub use message::{
    ClientFrame, Invocation, NamedArgs, RequestEnvelope, ResponseEnvelope, ServerFrame, Status,
    CONTROLLER_NAME,
};
