use thiserror::Error;

use crate::gpu::DeviceError;

/// Every failure the prover or verifier can surface. Primitive errors abort
/// the current invocation; there are no retries.
#[derive(Error, Debug)]
pub enum Groth16Error {
    #[error("Invalid public witness length, expected {0} but got {1}")]
    InvalidWitnessSize(usize, usize),
    #[error("Proof element is not in the r-order subgroup")]
    SubgroupCheckFailed,
    #[error("Pairing equation does not hold")]
    PairingCheckFailed,
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
    #[error("MSM kernel failed: {0}")]
    Msm(DeviceError),
    #[error("NTT kernel failed: {0}")]
    Ntt(DeviceError),
    #[error("Witness solver failed: {0}")]
    Solver(String),
    #[error("Commitment proof of knowledge does not match the commitment")]
    CommitmentVerificationFailed,
}
