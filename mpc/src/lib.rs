//! Shamir secret sharing MPC engine for honest-but-curious parties.
//!
//! A fixed set of n parties jointly executes a program of arithmetic and
//! comparison operations over values secret-shared modulo a prime P, such
//! that no coalition of up to t parties learns anything beyond the declared
//! outputs. Multiplication tolerates t < n/2 corruptions: degree reduction
//! needs re-shares from 2t+1 parties.
//!
//! The crate is organized around a per-party [`engine::PartyEngine`] that
//! executes protocol primitives against a uniform identifier namespace,
//! exchanging messages through an abstract [`transport::Transport`]. The
//! [`interpreter`] drives the engine from a parsed instruction stream, and
//! [`cluster::LocalCluster`] wires all parties of a computation into one
//! process for tests and local runs.

pub mod cluster;
pub mod config;
pub mod engine;
pub mod fields;
pub mod interpreter;
pub mod shamir;
pub mod transport;

pub use cluster::LocalCluster;
pub use config::ClusterConfig;
pub use engine::{EngineError, PartyEngine};
pub use fields::PrimeField;
pub use shamir::{SecretShare, SecretSharingScheme, ShamirError};
pub use transport::{ProtocolMessage, Transport};
