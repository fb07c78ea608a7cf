//! The registry's HTTP surface: request routing, metrics, and the watch
//! fanout. Grounded on `FlexNetOS-noa_ark_os/server/api/src/lib.rs` and
//! `.../routes.rs` for the axum bootstrap shape.

pub mod metrics;
pub mod routes;

pub use routes::{build_router, AppState, RegistryConfig};
