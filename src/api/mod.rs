//! HTTP classification service.

pub mod routes;

pub use routes::{TriageRouteState, triage_routes};
