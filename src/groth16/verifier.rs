//! Pairing-check verification.
//!
//! Checks `e(Krs, -delta) * e(Ar, Bs) * e(kSum, -gamma) = e(alpha, beta)`
//! where `kSum` aggregates the public inputs (and the commitment, when one is
//! present). The two-point Miller loop runs on its own task while the host
//! aggregates `kSum`; the verifier joins it once, right before the single
//! final exponentiation.

use std::thread;
use std::time::Instant;

use ark_bn254::{Bn254, Fr, G1Projective};
use ark_ec::pairing::Pairing;
use ark_ec::{AffineRepr, CurveGroup};

use super::commitment::{solve_commitment_wire, verify_pok};
use super::keys::{Proof, VerifyingKey};
use crate::field::{combine_miller_loops, g1_in_subgroup, g2_in_subgroup};
use crate::msm;
use crate::utils::errors::Groth16Error;

/// Verifies a proof against the public witness `[public[1..]]` (the constant
/// one wire is implicit and must not be supplied).
#[tracing::instrument(skip_all, name = "groth16::verify")]
pub fn verify(
    proof: &Proof,
    vk: &VerifyingKey,
    public_witness: &[Fr],
) -> Result<(), Groth16Error> {
    let start = Instant::now();

    let expected = vk.expected_public_len();
    if public_witness.len() != expected {
        return Err(Groth16Error::InvalidWitnessSize(
            expected,
            public_witness.len(),
        ));
    }

    if !(g1_in_subgroup(&proof.ar)
        && g1_in_subgroup(&proof.krs)
        && g2_in_subgroup(&proof.bs))
    {
        return Err(Groth16Error::SubgroupCheckFailed);
    }

    thread::scope(|scope| {
        // The heavy two-point Miller loop overlaps the public input
        // aggregation below.
        let double_ml = scope.spawn(|| {
            Bn254::multi_miller_loop(
                [proof.krs, proof.ar],
                [vk.delta_neg, proof.bs],
            )
        });

        // The proof's commitment only ever enters the aggregation when the
        // verifying key declares one; an unexpected commitment would hand the
        // prover a free gamma-basis term.
        let mut public = public_witness.to_vec();
        let mut folded_commitment = None;
        if let Some(cvk) = &vk.commitment {
            let (commitment, pok) = match (&proof.commitment, &proof.commitment_pok) {
                (Some(c), Some(pok)) => (c, pok),
                _ => return Err(Groth16Error::CommitmentVerificationFailed),
            };
            verify_pok(commitment, pok, cvk)?;

            // Mirror the prover's hook: hash the commitment together with the
            // public committed inputs and append the solved wire.
            let public_committed: Vec<Fr> = cvk
                .public_committed
                .iter()
                .map(|&wire| public[wire - 1])
                .collect();
            public.push(solve_commitment_wire(commitment, &public_committed));
            folded_commitment = Some(*commitment);
        }

        let mut k_sum: G1Projective = msm::msm(&vk.k[1..], &public, None)?;
        k_sum += vk.k[0].into_group();
        if let Some(commitment) = folded_commitment {
            k_sum += commitment.into_group();
        }

        let right = Bn254::multi_miller_loop([k_sum.into_affine()], [vk.gamma_neg]);
        let double_ml = double_ml
            .join()
            .map_err(|_| Groth16Error::PairingCheckFailed)?;
        let combined =
            combine_miller_loops(right, double_ml).ok_or(Groth16Error::PairingCheckFailed)?;

        if combined != vk.alpha_beta {
            return Err(Groth16Error::PairingCheckFailed);
        }
        tracing::debug!(took = ?start.elapsed(), "verifier done");
        Ok(())
    })
}
