//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the orchestration services and the port
//! interfaces that define how the domain interacts with external
//! systems.

/// Port interfaces for external systems (provisioning, transport) and
/// the synchronization listener capability set.
pub mod ports;

/// Orchestration services: lifecycle, stream supervision, dispatch,
/// trading and the connection facade.
pub mod services;
