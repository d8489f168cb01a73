//! Field and group contracts the prover relies on, concretized for BN254 on
//! top of the arkworks traits. The curve is selected through a parameter
//! bundle ([`CurveId`]) rather than generics so a new curve is a new variant
//! carrying its own moduli and domain generators.

use ark_bn254::{Bn254, Fr, G1Affine, G1Projective, G2Affine};
use ark_ec::pairing::{MillerLoopOutput, Pairing, PairingOutput};
use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::{FftField, Field};

/// Tagged curve selector. Each variant is a self-contained parameter bundle;
/// the domain builder and the backends read everything curve-specific from
/// here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveId {
    Bn254,
}

impl CurveId {
    /// Largest k such that 2^k divides r - 1, bounding the NTT domain size.
    pub fn two_adicity(&self) -> u32 {
        match self {
            CurveId::Bn254 => <Fr as FftField>::TWO_ADICITY,
        }
    }

    /// 2^log2n-th root of unity of the scalar field.
    pub fn root_of_unity(&self, log2n: u32) -> Option<Fr> {
        match self {
            CurveId::Bn254 => Fr::get_root_of_unity(1u64 << log2n),
        }
    }

    /// Multiplicative generator of the scalar field, used as the coset shift.
    pub fn multiplicative_generator(&self) -> Fr {
        match self {
            CurveId::Bn254 => <Fr as FftField>::GENERATOR,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CurveId::Bn254 => "bn254",
        }
    }
}

/// Computes `[k_1 * base, ..., k_m * base]` with the same double-and-add
/// schedule for every m, normalizing to affine in one batch at the end.
pub fn batch_scalar_mul_g1(base: &G1Affine, scalars: &[Fr]) -> Vec<G1Affine> {
    let projective: Vec<G1Projective> = scalars.iter().map(|k| *base * k).collect();
    G1Projective::normalize_batch(&projective)
}

/// Multiplies two Miller loop outputs and runs a single final exponentiation
/// over the product. Returns `None` on a degenerate pairing input.
pub fn combine_miller_loops(
    a: MillerLoopOutput<Bn254>,
    b: MillerLoopOutput<Bn254>,
) -> Option<PairingOutput<Bn254>> {
    Bn254::final_exponentiation(MillerLoopOutput(a.0 * b.0))
}

/// Subgroup membership for a G1 proof element. The point at infinity is a
/// valid group element.
pub fn g1_in_subgroup(p: &G1Affine) -> bool {
    p.is_zero() || (p.is_on_curve() && p.is_in_correct_subgroup_assuming_on_curve())
}

/// Subgroup membership for a G2 proof element.
pub fn g2_in_subgroup(p: &G2Affine) -> bool {
    p.is_zero() || (p.is_on_curve() && p.is_in_correct_subgroup_assuming_on_curve())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ec::PrimeGroup;
    use ark_std::{test_rng, UniformRand};

    #[test]
    fn batch_scalar_mul_matches_single_muls() {
        let mut rng = test_rng();
        let base = G1Affine::rand(&mut rng);
        let scalars: Vec<Fr> = (0..17).map(|_| Fr::rand(&mut rng)).collect();

        let batched = batch_scalar_mul_g1(&base, &scalars);
        for (k, p) in scalars.iter().zip(&batched) {
            assert_eq!((base * k).into_affine(), *p);
        }
    }

    #[test]
    fn combined_final_exponentiation_matches_pairing_product() {
        let mut rng = test_rng();
        let p1 = G1Affine::rand(&mut rng);
        let q1 = G2Affine::rand(&mut rng);
        let p2 = G1Affine::rand(&mut rng);
        let q2 = G2Affine::rand(&mut rng);

        let a = Bn254::miller_loop(p1, q1);
        let b = Bn254::miller_loop(p2, q2);
        let combined = combine_miller_loops(a, b).unwrap();
        assert_eq!(combined, Bn254::pairing(p1, q1) + Bn254::pairing(p2, q2));
    }

    #[test]
    fn generator_is_in_subgroup() {
        assert!(g1_in_subgroup(&G1Projective::generator().into_affine()));
        assert!(g1_in_subgroup(&G1Affine::identity()));
    }

    #[test]
    fn bn254_domain_parameters() {
        let id = CurveId::Bn254;
        assert_eq!(id.two_adicity(), 28);
        let omega = id.root_of_unity(4).unwrap();
        assert_eq!(omega.pow([16u64]), Fr::ONE);
        assert_ne!(omega.pow([8u64]), Fr::ONE);
    }
}
