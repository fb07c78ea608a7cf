//! MCP Mesh: a service registry/discovery plane for a mesh of autonomous
//! agents, plus the agent-side client pipeline that talks to it.
//!
//! This crate is split into the registry's own pieces (`model`, `store`,
//! `resolution`, `health`, `server`) and the agent-side `client` pipeline
//! (heartbeat loop, differential rewiring, dependency injector, tool
//! proxies). `config`, `error`, and `events` are shared by both halves.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod model;
pub mod resolution;
pub mod semver_constraint;
pub mod server;
pub mod store;

pub use error::MeshError;
