//! Pedersen commitment over the committed-wire basis, with a proof of
//! knowledge, and the hash that turns a commitment into the committed wire's
//! value.
//!
//! The basis points are the committed wires' public-input aggregation points,
//! so the verifier can fold the commitment straight into its K sum. The proof
//! of knowledge is `pok = sum_i v_i * (sigma * basis_i) = sigma * C`, checked
//! with `e(pok, g2) * e(C, -sigma * g2) = 1`.

use ark_bn254::{Bn254, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::pairing::Pairing;
use ark_ec::{CurveGroup, PrimeGroup};
use ark_ff::{BigInteger, One, PrimeField, UniformRand, Zero};
use ark_serialize::CanonicalSerialize;
use rand_core::RngCore;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;

use crate::msm;
use crate::utils::errors::Groth16Error;

const COMMITMENT_DST: &[u8] = b"bsb22-commitment";

/// Prover-side commitment key.
#[derive(Debug, Clone)]
pub struct CommitmentKey {
    pub basis: Vec<G1Affine>,
    pub basis_exp_sigma: Vec<G1Affine>,
}

/// Verifier-side commitment key plus the public committed wire ids the
/// verifier hashes alongside the commitment.
#[derive(Debug, Clone)]
pub struct CommitmentVerifyingKey {
    pub g: G2Affine,
    pub g_sigma_neg: G2Affine,
    pub public_committed: Vec<usize>,
}

impl CommitmentKey {
    /// Samples sigma and derives both halves of the key from the basis.
    pub fn setup<R: RngCore>(
        basis: Vec<G1Affine>,
        rng: &mut R,
    ) -> (Self, CommitmentVerifyingKey) {
        let mut sigma = Fr::rand(rng);
        while sigma.is_zero() {
            sigma = Fr::rand(rng);
        }

        let basis_exp_sigma = G1Projective::normalize_batch(
            &basis.iter().map(|p| *p * sigma).collect::<Vec<_>>(),
        );
        let g = G2Projective::generator();
        let vk = CommitmentVerifyingKey {
            g: g.into_affine(),
            g_sigma_neg: (-(g * sigma)).into_affine(),
            public_committed: Vec::new(),
        };
        (
            Self {
                basis,
                basis_exp_sigma,
            },
            vk,
        )
    }

    /// Commits to the private committed values and proves knowledge of the
    /// opening.
    pub fn commit(&self, values: &[Fr]) -> Result<(G1Affine, G1Affine), Groth16Error> {
        if values.len() != self.basis.len() {
            return Err(Groth16Error::Solver(format!(
                "commitment expects {} values, got {}",
                self.basis.len(),
                values.len()
            )));
        }
        let commitment: G1Projective = msm::msm(&self.basis, values, None)?;
        let pok: G1Projective = msm::msm(&self.basis_exp_sigma, values, None)?;
        Ok((commitment.into_affine(), pok.into_affine()))
    }
}

/// Checks the proof of knowledge against the commitment.
pub fn verify_pok(
    commitment: &G1Affine,
    pok: &G1Affine,
    vk: &CommitmentVerifyingKey,
) -> Result<(), Groth16Error> {
    let ml = Bn254::multi_miller_loop([*pok, *commitment], [vk.g, vk.g_sigma_neg]);
    let out = Bn254::final_exponentiation(ml)
        .ok_or(Groth16Error::CommitmentVerificationFailed)?;
    if out.0.is_one() {
        Ok(())
    } else {
        Err(Groth16Error::CommitmentVerificationFailed)
    }
}

/// Hash-derives the committed wire's value from the commitment point and the
/// public committed inputs. The prover's hook and the verifier both run this.
pub fn solve_commitment_wire(commitment: &G1Affine, public_committed: &[Fr]) -> Fr {
    let mut hasher = Shake256::default();
    hasher.update(COMMITMENT_DST);
    let mut bytes = Vec::new();
    commitment
        .serialize_compressed(&mut bytes)
        .expect("serializing an affine point into a Vec cannot fail");
    hasher.update(&bytes);
    for v in public_committed {
        hasher.update(&v.into_bigint().to_bytes_le());
    }

    let mut reader = hasher.finalize_xof();
    let mut wide = [0u8; 48];
    reader.read(&mut wide);
    Fr::from_le_bytes_mod_order(&wide)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::test_rng;

    fn random_key(n: usize) -> (CommitmentKey, CommitmentVerifyingKey) {
        let mut rng = test_rng();
        let basis: Vec<G1Affine> = (0..n).map(|_| G1Affine::rand(&mut rng)).collect();
        CommitmentKey::setup(basis, &mut rng)
    }

    #[test]
    fn commit_and_verify_roundtrip() {
        let mut rng = test_rng();
        let (ck, vk) = random_key(5);
        let values: Vec<Fr> = (0..5).map(|_| Fr::rand(&mut rng)).collect();
        let (c, pok) = ck.commit(&values).unwrap();
        verify_pok(&c, &pok, &vk).unwrap();
    }

    #[test]
    fn tampered_pok_is_rejected() {
        let mut rng = test_rng();
        let (ck, vk) = random_key(3);
        let values: Vec<Fr> = (0..3).map(|_| Fr::rand(&mut rng)).collect();
        let (c, pok) = ck.commit(&values).unwrap();

        let bad_pok = (pok + G1Affine::rand(&mut rng)).into_affine();
        assert!(matches!(
            verify_pok(&c, &bad_pok, &vk),
            Err(Groth16Error::CommitmentVerificationFailed)
        ));
    }

    #[test]
    fn wire_value_is_deterministic_and_input_sensitive() {
        let mut rng = test_rng();
        let c = G1Affine::rand(&mut rng);
        let inputs = [Fr::from(4u64), Fr::from(5u64)];

        let w1 = solve_commitment_wire(&c, &inputs);
        let w2 = solve_commitment_wire(&c, &inputs);
        assert_eq!(w1, w2);

        let w3 = solve_commitment_wire(&c, &[Fr::from(4u64), Fr::from(6u64)]);
        assert_ne!(w1, w3);
        let other = G1Affine::rand(&mut rng);
        assert_ne!(w1, solve_commitment_wire(&other, &inputs));
    }

    #[test]
    fn wrong_value_count_is_rejected() {
        let (ck, _) = random_key(4);
        assert!(ck.commit(&[Fr::from(1u64); 3]).is_err());
    }
}
