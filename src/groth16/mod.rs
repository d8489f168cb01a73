//! Groth16 over BN254: key material, trusted setup, the prover pipeline, and
//! the pairing-check verifier.
//!
//! Notation follows the usual (A, B, C) three-element proof. The prover is
//! generic over the device backend; the verifier runs entirely on the host.

pub mod commitment;
pub mod keys;
pub mod prover;
pub mod quotient;
pub mod setup;
pub mod verifier;


pub use keys::{Proof, ProvingKey, VerifyingKey};
pub use prover::{prove, ProverOptions, RandomnessSource};
pub use setup::setup;
pub use verifier::verify;
