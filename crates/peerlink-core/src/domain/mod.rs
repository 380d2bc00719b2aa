//! Domain module: identities, endpoints, settings, and the protocol state
//! machines.  Nothing here touches a socket or spawns a thread.

pub mod discovery;
pub mod endpoint;
pub mod handshake;
pub mod heartbeat;
pub mod identity;
pub mod session;
pub mod settings;
