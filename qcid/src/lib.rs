//! Connection ID lifecycle management of QUIC.
//!
//! Each connection owns two trackers:
//! - [`cid::RemoteCids`] keeps the connection IDs issued by the peer, hands them
//!   out to the sending path and collects the ones to be retired;
//! - [`cid::LocalCids`] issues connection IDs to the peer, handles the peer's
//!   retirement requests and removes retired IDs after a grace period.
//!
//! Both trackers are plain owned structures driven from the connection's
//! processing context. Timers, routing tables and frame transmission are left
//! to the collaborators they are constructed with.

pub mod cid;
pub mod config;
pub mod error;
pub mod frame;
pub mod time;
pub mod token;
pub mod util;

pub use cid::{ConnectionId, ConnectionIdRecord, LocalCids, RemoteCids};
pub use config::{CidConfig, CidConfigBuilder};
pub use error::{Error, ErrorKind};
