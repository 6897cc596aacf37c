//! lemsearch bridge crate - drives an interactive matching engine.
//!
//! The engine is a separate program that speaks a line protocol on its
//! standard streams. [`QueryBridge`] embeds each query locally, sends it as
//! a JSON line, and collects the engine's response up to the end sentinel.

pub mod channel;
pub mod session;

pub use channel::{ChildProcessChannel, EngineChannel, EngineCommand, PipeChannel};
pub use session::{BridgeOptions, QueryBridge, QueryResult};
