//! Circuit-specific trusted setup.
//!
//! Samples the toxic waste, evaluates the QAP polynomials of every wire at
//! tau through the domain's Lagrange coefficients, and lays the resulting
//! points out the way the prover consumes them: A/B bases with points at
//! infinity stripped, private K bases with committed wires removed, and the
//! committed wires' K points handed to the Pedersen commitment key.

use ark_bn254::{Bn254, Fr, G1Affine, G1Projective, G2Projective};
use ark_ec::pairing::Pairing;
use ark_ec::{CurveGroup, PrimeGroup};
use ark_ff::{AdditiveGroup, Field, UniformRand, Zero};
use rand_core::RngCore;

use super::commitment::CommitmentKey;
use super::keys::{G1ProvingKey, G2ProvingKey, ProvingKey, VerifyingKey};
use crate::field::CurveId;
use crate::poly::Domain;
use crate::r1cs::R1cs;
use crate::utils::errors::Groth16Error;

fn rand_nonzero<R: RngCore>(rng: &mut R) -> Fr {
    loop {
        let v = Fr::rand(rng);
        if !v.is_zero() {
            return v;
        }
    }
}

/// Produces the proving and verifying keys for one circuit.
#[tracing::instrument(skip_all, name = "groth16::setup")]
pub fn setup<R: RngCore>(
    r1cs: &R1cs,
    rng: &mut R,
) -> Result<(ProvingKey, VerifyingKey), Groth16Error> {
    let domain = Domain::new(CurveId::Bn254, r1cs.constraints.len())?;
    let nb_wires = r1cs.nb_wires();

    let tau = rand_nonzero(rng);
    let alpha = rand_nonzero(rng);
    let beta = rand_nonzero(rng);
    let gamma = rand_nonzero(rng);
    let delta = rand_nonzero(rng);

    // Per-wire QAP evaluations at tau.
    let lagrange = domain.lagrange_coefficients_at(tau);
    let mut u = vec![Fr::ZERO; nb_wires];
    let mut v = vec![Fr::ZERO; nb_wires];
    let mut w = vec![Fr::ZERO; nb_wires];
    for (j, constraint) in r1cs.constraints.iter().enumerate() {
        for (coeff, wire) in &constraint.a.0 {
            u[*wire] += *coeff * lagrange[j];
        }
        for (coeff, wire) in &constraint.b.0 {
            v[*wire] += *coeff * lagrange[j];
        }
        for (coeff, wire) in &constraint.c.0 {
            w[*wire] += *coeff * lagrange[j];
        }
    }

    let gamma_inv = gamma.inverse().expect("gamma is nonzero");
    let delta_inv = delta.inverse().expect("delta is nonzero");
    let k_scalars: Vec<Fr> = (0..nb_wires)
        .map(|i| beta * u[i] + alpha * v[i] + w[i])
        .collect();

    let g1 = G1Projective::generator();
    let g2 = G2Projective::generator();

    // A and B bases with points at infinity stripped out.
    let infinity_a: Vec<bool> = u.iter().map(|x| x.is_zero()).collect();
    let infinity_b: Vec<bool> = v.iter().map(|x| x.is_zero()).collect();
    let nb_infinity_a = infinity_a.iter().filter(|x| **x).count();
    let nb_infinity_b = infinity_b.iter().filter(|x| **x).count();

    let a_points: Vec<G1Projective> = u
        .iter()
        .filter(|x| !x.is_zero())
        .map(|x| g1 * x)
        .collect();
    let b1_points: Vec<G1Projective> = v
        .iter()
        .filter(|x| !x.is_zero())
        .map(|x| g1 * x)
        .collect();
    let b2_points: Vec<G2Projective> = v
        .iter()
        .filter(|x| !x.is_zero())
        .map(|x| g2 * x)
        .collect();

    // Z powers for the quotient term.
    let z_tau = tau.pow([domain.cardinality as u64]) - Fr::ONE;
    let mut z_points = Vec::with_capacity(domain.cardinality - 1);
    let mut acc = z_tau * delta_inv;
    for _ in 0..domain.cardinality - 1 {
        z_points.push(g1 * acc);
        acc *= tau;
    }

    // Wire classification for the K bases.
    let private_to_public = r1cs
        .commitment
        .as_ref()
        .map(|info| info.private_to_public())
        .unwrap_or_default();
    let committed_private: Vec<usize> = r1cs
        .commitment
        .as_ref()
        .map(|info| info.committed_wires[info.nb_public_committed..].to_vec())
        .unwrap_or_default();

    let mut vk_k: Vec<G1Projective> = (0..r1cs.nb_public)
        .map(|i| g1 * (k_scalars[i] * gamma_inv))
        .collect();
    if let Some(info) = &r1cs.commitment {
        vk_k.push(g1 * (k_scalars[info.commitment_wire] * gamma_inv));
    }

    let pk_k: Vec<G1Projective> = (r1cs.nb_public..nb_wires)
        .filter(|i| !private_to_public.contains(i))
        .map(|i| g1 * (k_scalars[i] * delta_inv))
        .collect();

    let (commitment_key, commitment_vk) = match &r1cs.commitment {
        Some(info) => {
            let basis = G1Projective::normalize_batch(
                &committed_private
                    .iter()
                    .map(|&i| g1 * (k_scalars[i] * gamma_inv))
                    .collect::<Vec<_>>(),
            );
            let (ck, mut cvk) = CommitmentKey::setup(basis, rng);
            cvk.public_committed =
                info.committed_wires[..info.nb_public_committed].to_vec();
            (Some(ck), Some(cvk))
        }
        None => (None, None),
    };

    let pk = ProvingKey {
        domain,
        g1: G1ProvingKey {
            alpha: (g1 * alpha).into_affine(),
            beta: (g1 * beta).into_affine(),
            delta: (g1 * delta).into_affine(),
            a: G1Projective::normalize_batch(&a_points),
            b: G1Projective::normalize_batch(&b1_points),
            k: G1Projective::normalize_batch(&pk_k),
            z: G1Projective::normalize_batch(&z_points),
        },
        g2: G2ProvingKey {
            alpha: (g2 * alpha).into_affine(),
            beta: (g2 * beta).into_affine(),
            delta: (g2 * delta).into_affine(),
            b: G2Projective::normalize_batch(&b2_points),
        },
        infinity_a,
        infinity_b,
        nb_infinity_a,
        nb_infinity_b,
        commitment_key,
    };

    let vk = VerifyingKey {
        alpha_beta: Bn254::pairing(g1 * alpha, g2 * beta),
        gamma_neg: (-(g2 * gamma)).into_affine(),
        delta_neg: (-(g2 * delta)).into_affine(),
        k: G1Projective::normalize_batch(&vk_k),
        commitment: commitment_vk,
    };

    Ok((pk, vk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::r1cs::LinearCombination;
    use ark_std::test_rng;

    fn mul_circuit() -> R1cs {
        let mut cs = R1cs::new(1, 2);
        let z_pub = cs.public_wire(0);
        let x = cs.secret_wire(0);
        let y = cs.secret_wire(1);
        cs.enforce(
            LinearCombination::single(x),
            LinearCombination::single(y),
            LinearCombination::single(z_pub),
        );
        cs
    }

    #[test]
    fn key_shapes_match_the_circuit() {
        let mut rng = test_rng();
        let cs = mul_circuit();
        let (pk, vk) = setup(&cs, &mut rng).unwrap();

        assert_eq!(pk.infinity_a.len(), cs.nb_wires());
        assert_eq!(pk.g1.a.len(), cs.nb_wires() - pk.nb_infinity_a);
        assert_eq!(pk.g1.b.len(), cs.nb_wires() - pk.nb_infinity_b);
        assert_eq!(pk.g2.b.len(), pk.g1.b.len());
        assert_eq!(pk.g1.z.len(), pk.domain.cardinality - 1);
        assert_eq!(vk.k.len(), cs.nb_public);
        assert_eq!(pk.g1.k.len(), cs.nb_wires() - cs.nb_public);
        assert_eq!(vk.expected_public_len(), 1);
    }

    #[test]
    fn unused_wires_are_flagged_at_infinity() {
        let mut rng = test_rng();
        let cs = mul_circuit();
        let (pk, _) = setup(&cs, &mut rng).unwrap();

        // Only the x wire shows up on the A side, only y on the B side.
        let x = cs.secret_wire(0);
        let y = cs.secret_wire(1);
        assert!(!pk.infinity_a[x]);
        assert!(pk.infinity_a[y]);
        assert!(!pk.infinity_b[y]);
        assert!(pk.infinity_b[x]);
        assert_eq!(pk.nb_infinity_a, cs.nb_wires() - 1);
        assert_eq!(pk.nb_infinity_b, cs.nb_wires() - 1);
    }
}
