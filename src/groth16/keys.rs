use ark_bn254::{Bn254, G1Affine, G2Affine};
use ark_ec::pairing::PairingOutput;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};

use super::commitment::{CommitmentKey, CommitmentVerifyingKey};
use crate::poly::Domain;

/// A Groth16 proof. `commitment` and `commitment_pok` are present exactly
/// when the circuit declared a committed wire.
#[derive(Debug, Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct Proof {
    pub ar: G1Affine,
    pub bs: G2Affine,
    pub krs: G1Affine,
    pub commitment: Option<G1Affine>,
    pub commitment_pok: Option<G1Affine>,
}

/// G1 half of the proving key. The `a` and `b` basis arrays are stored with
/// their points at infinity already removed; the matching wire indexes are
/// recorded in [`ProvingKey::infinity_a`] / [`ProvingKey::infinity_b`].
#[derive(Debug, Clone)]
pub struct G1ProvingKey {
    pub alpha: G1Affine,
    pub beta: G1Affine,
    pub delta: G1Affine,
    pub a: Vec<G1Affine>,
    pub b: Vec<G1Affine>,
    /// Private-wire bases under delta, committed wires removed.
    pub k: Vec<G1Affine>,
    /// `[tau^i * Z(tau) / delta]`, one point short of the domain.
    pub z: Vec<G1Affine>,
}

#[derive(Debug, Clone)]
pub struct G2ProvingKey {
    pub alpha: G2Affine,
    pub beta: G2Affine,
    pub delta: G2Affine,
    pub b: Vec<G2Affine>,
}

#[derive(Debug, Clone)]
pub struct ProvingKey {
    pub domain: Domain,
    pub g1: G1ProvingKey,
    pub g2: G2ProvingKey,
    pub infinity_a: Vec<bool>,
    pub infinity_b: Vec<bool>,
    pub nb_infinity_a: usize,
    pub nb_infinity_b: usize,
    pub commitment_key: Option<CommitmentKey>,
}

/// Verifying key. `gamma_neg` and `delta_neg` are stored negated, which
/// saves one G2 negation per verification, and `alpha_beta` caches the
/// pairing `e(alpha, beta)`.
#[derive(Debug, Clone)]
pub struct VerifyingKey {
    pub alpha_beta: PairingOutput<Bn254>,
    pub gamma_neg: G2Affine,
    pub delta_neg: G2Affine,
    /// Public-input aggregation bases: the one wire, each public input, and
    /// the commitment wire last when a commitment is configured.
    pub k: Vec<G1Affine>,
    pub commitment: Option<CommitmentVerifyingKey>,
}

impl VerifyingKey {
    /// Length the public witness vector must have: one entry per public
    /// input, the constant-one wire implicit, the commitment wire solved by
    /// the verifier itself.
    pub fn expected_public_len(&self) -> usize {
        self.k.len() - 1 - usize::from(self.commitment.is_some())
    }
}
