//! The agent-side client pipeline: spec/handle types passed in from language
//! SDKs, the registry wire client, the heartbeat state machine, hash-based
//! differential rewiring, the dependency injector, and tool proxies.

pub mod handle;
pub mod heartbeat;
pub mod injector;
pub mod llm_rewiring;
pub mod proxy;
pub mod registry;
pub mod rewiring;
pub mod runtime;
pub mod spec;
