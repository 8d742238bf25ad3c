// Core modules for the lodekv key-value server
pub mod hashtable; // HMap: chained hash map with progressive resizing
pub mod avl; // AvlTree: order-statistics AVL tree over a slab arena
pub mod zset; // ZSet: sorted set on AvlTree + HMap
pub mod storage; // Dict + Value types for the keyspace
pub mod error; // ProtocolError / CommandError + reply error codes
pub mod protocol; // frame codec + Cmd parsing + reply encoders
pub mod shard; // Shard::dispatch (command execution)
pub mod conn; // per-connection read/write state machine
pub mod config; // ServerConfig
pub mod net; // bind_listener + Server (event loop)

// Re-export all public items from modules for easier access
pub use avl::*;
pub use config::*;
pub use conn::*;
pub use error::*;
pub use hashtable::*;
pub use net::*;
pub use protocol::*;
pub use shard::*;
pub use storage::*;
pub use zset::*;

// Default server address: all interfaces, port 1234
pub const DEFAULT_ADDR: &str = "0.0.0.0:1234";
