//! `coordinator` crate — the gRPC control plane workers and dispatchers
//! talk to when a run isn't simply executed in-process (spec.md §4.6, §6
//! Coordinator RPC).
//!
//! There's no tonic service anywhere in the grounding workspace to copy
//! from, so this crate follows the plain tonic-build quickstart shape
//! (`build.rs` compiling `proto/coordinator.proto`, a thin service struct
//! wrapping shared state behind an `Arc`) rather than imitating a specific
//! file — see DESIGN.md for the full note.

pub mod client;
mod conv;
pub mod error;
pub mod registry;
pub mod server;

pub mod pb {
    tonic::include_proto!("dagrun.coordinator.v1");
}

pub use client::CoordinatorClient;
pub use error::CoordinatorError;
pub use server::CoordinatorService;
