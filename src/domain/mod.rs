//! Domain layer - resource keys and port definitions
//!
//! The reconcilers only talk to the outside world through the traits
//! defined here; `controlplane` supplies the Kubernetes and daemon adapters
//! and the tests supply in-memory fakes.

pub mod ports;

pub use ports::*;
