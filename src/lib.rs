//! GPU-accelerated Groth16 prover and verifier over BN254.
//!
//! The prover consumes a solved R1CS witness together with a preprocessed
//! proving key and produces a three-element Groth16 proof (plus an optional
//! Pedersen commitment and its proof of knowledge). The heavy pipeline, i.e.
//! the coset-evaluated quotient polynomial and the G1/G2 multi-scalar
//! multiplications, is dispatched through an abstract device backend
//! ([`gpu::DeviceBackend`]) so the same orchestration runs against CUDA
//! (feature `icicle`), the bundled CPU reference backend, or a mock.

pub mod field;
pub mod gpu;
pub mod groth16;
pub mod msm;
pub mod poly;
pub mod r1cs;
pub mod utils;

pub use groth16::keys::{Proof, ProvingKey, VerifyingKey};
pub use groth16::prover::{prove, ProverOptions, RandomnessSource};
pub use groth16::setup::setup;
pub use groth16::verifier::verify;
pub use utils::errors::Groth16Error;
