//! Host-side multi-scalar multiplication and the point-at-infinity filter.
//!
//! The bucket MSM here is both the CPU reference kernel behind
//! [`crate::gpu::CpuBackend`] and the fallback path for the G2 term when the
//! prover keeps it off the device.

use ark_bn254::Fr;
use ark_ec::CurveGroup;
use ark_ff::{BigInteger, Field, PrimeField, Zero};
use rayon::prelude::*;

use crate::utils::errors::Groth16Error;

/// Pippenger-style bucket MSM over big-integer scalars.
///
/// `window` overrides the bucket window width; when `None` the width follows
/// the usual `ln(n)`-based heuristic. Scalars are consumed in index order and
/// bucket accumulation is associative, so the result is independent of the
/// partitioning.
pub fn msm_bigint<G: CurveGroup>(
    bases: &[G::Affine],
    scalars: &[<G::ScalarField as PrimeField>::BigInt],
    window: Option<usize>,
) -> G {
    if bases.is_empty() || scalars.is_empty() {
        return G::zero();
    }
    let size = bases.len().min(scalars.len());
    let (bases, scalars) = (&bases[..size], &scalars[..size]);

    let c = window.unwrap_or_else(|| {
        if size < 32 {
            3
        } else {
            ln_without_floats(size) + 2
        }
    });
    let num_bits = G::ScalarField::MODULUS_BIT_SIZE as usize;
    let one = G::ScalarField::ONE.into_bigint();
    let zero = G::zero();

    let window_starts: Vec<usize> = (0..num_bits).step_by(c).collect();
    let window_sums: Vec<G> = window_starts
        .into_par_iter()
        .map(|w_start| {
            let mut res = zero;
            // The zero bucket is never touched, so 2^c - 1 buckets suffice.
            let mut buckets = vec![zero; (1 << c) - 1];
            for (&scalar, base) in scalars.iter().zip(bases) {
                if scalar.is_zero() {
                    continue;
                }
                if scalar == one {
                    // Unit scalars are folded in once, in the lowest window.
                    if w_start == 0 {
                        res += base;
                    }
                } else {
                    let mut scalar = scalar;
                    scalar.divn(w_start as u32);
                    let digit = scalar.as_ref()[0] % (1 << c);
                    if digit != 0 {
                        buckets[(digit - 1) as usize] += base;
                    }
                }
            }

            // res += sum_{i} (i+1) * bucket[i], via the running-sum trick.
            let mut running_sum = G::zero();
            for b in buckets.into_iter().rev() {
                running_sum += &b;
                res += &running_sum;
            }
            res
        })
        .collect();

    let lowest = *window_sums.first().unwrap();
    lowest
        + window_sums[1..].iter().rev().fold(zero, |mut total, sum_i| {
            total += sum_i;
            for _ in 0..c {
                total.double_in_place();
            }
            total
        })
}

/// MSM over field-element scalars. Fails when the base and scalar lengths
/// disagree, which in the prover always indicates a broken filter invariant.
pub fn msm<G: CurveGroup<ScalarField = Fr>>(
    bases: &[G::Affine],
    scalars: &[Fr],
    window: Option<usize>,
) -> Result<G, Groth16Error> {
    if bases.len() != scalars.len() {
        return Err(Groth16Error::InvalidWitnessSize(bases.len(), scalars.len()));
    }
    let bigints: Vec<_> = scalars.par_iter().map(|s| s.into_bigint()).collect();
    Ok(msm_bigint(bases, &bigints, window))
}

/// Drops every scalar whose index is flagged in `infinity`, preserving the
/// relative order of the survivors. The proving key stores its A and B bases
/// with the points at infinity already removed; this is the matching scalar
/// filter.
pub fn filter_infinity(values: &[Fr], infinity: &[bool]) -> Vec<Fr> {
    debug_assert_eq!(values.len(), infinity.len());
    values
        .iter()
        .zip(infinity)
        .filter(|(_, &at_infinity)| !at_infinity)
        .map(|(v, _)| *v)
        .collect()
}

/// Removes the values at the given sorted indexes. Mirrors the committed-wire
/// removal the Krs scalars go through when a commitment is configured.
pub fn filter_indexes(values: &[Fr], to_remove: &[usize]) -> Vec<Fr> {
    if to_remove.is_empty() {
        return values.to_vec();
    }
    let mut out = Vec::with_capacity(values.len() - to_remove.len());
    let mut j = 0;
    for (i, v) in values.iter().enumerate() {
        if j < to_remove.len() && i == to_remove[j] {
            j += 1;
            continue;
        }
        out.push(*v);
    }
    out
}

fn ln_without_floats(a: usize) -> usize {
    // log2(a) * ln(2)
    (ark_std::log2(a) * 69 / 100) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_bn254::{G1Affine, G1Projective, G2Affine, G2Projective};
    use ark_ff::AdditiveGroup;
    use ark_std::{test_rng, UniformRand};

    fn naive_msm<G: CurveGroup<ScalarField = Fr>>(bases: &[G::Affine], scalars: &[Fr]) -> G {
        bases
            .iter()
            .zip(scalars)
            .fold(G::zero(), |acc, (b, s)| acc + *b * s)
    }

    #[test]
    fn bucket_msm_matches_naive_g1() {
        let mut rng = test_rng();
        for n in [1usize, 2, 3, 7, 32, 129, 1024] {
            let bases: Vec<G1Affine> = (0..n).map(|_| G1Affine::rand(&mut rng)).collect();
            let scalars: Vec<Fr> = (0..n).map(|_| Fr::rand(&mut rng)).collect();
            let expected: G1Projective = naive_msm(&bases, &scalars);
            let got: G1Projective = msm(&bases, &scalars, None).unwrap();
            assert_eq!(got, expected, "n = {n}");
        }
    }

    #[test]
    fn bucket_msm_matches_naive_g2() {
        let mut rng = test_rng();
        let bases: Vec<G2Affine> = (0..65).map(|_| G2Affine::rand(&mut rng)).collect();
        let scalars: Vec<Fr> = (0..65).map(|_| Fr::rand(&mut rng)).collect();
        let expected: G2Projective = naive_msm(&bases, &scalars);
        let got: G2Projective = msm(&bases, &scalars, None).unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn explicit_window_widths_agree() {
        let mut rng = test_rng();
        let bases: Vec<G1Affine> = (0..200).map(|_| G1Affine::rand(&mut rng)).collect();
        let scalars: Vec<Fr> = (0..200).map(|_| Fr::rand(&mut rng)).collect();
        let default: G1Projective = msm(&bases, &scalars, None).unwrap();
        for c in [1usize, 4, 9, 16] {
            let windowed: G1Projective = msm(&bases, &scalars, Some(c)).unwrap();
            assert_eq!(windowed, default, "window = {c}");
        }
    }

    #[test]
    fn zero_and_unit_scalars() {
        let mut rng = test_rng();
        let bases: Vec<G1Affine> = (0..64).map(|_| G1Affine::rand(&mut rng)).collect();
        let mut scalars = vec![Fr::ZERO; 64];
        scalars[3] = Fr::ONE;
        scalars[40] = Fr::from(2u64);
        let got: G1Projective = msm(&bases, &scalars, None).unwrap();
        assert_eq!(got, bases[3] + bases[40] + bases[40]);
    }

    #[test]
    fn length_mismatch_is_an_error() {
        let mut rng = test_rng();
        let bases: Vec<G1Affine> = (0..4).map(|_| G1Affine::rand(&mut rng)).collect();
        let scalars: Vec<Fr> = (0..5).map(|_| Fr::rand(&mut rng)).collect();
        assert!(msm::<G1Projective>(&bases, &scalars, None).is_err());
    }

    #[test]
    fn infinity_filter_preserves_order_and_drops_flagged() {
        let values: Vec<Fr> = (0..10u64).map(Fr::from).collect();
        let mut infinity = vec![false; 10];
        infinity[0] = true;
        infinity[4] = true;
        infinity[9] = true;

        let filtered = filter_infinity(&values, &infinity);
        assert_eq!(filtered.len(), 7);
        let expected: Vec<Fr> = [1u64, 2, 3, 5, 6, 7, 8].map(Fr::from).to_vec();
        assert_eq!(filtered, expected);
    }

    #[test]
    fn index_filter_removes_sorted_indexes() {
        let values: Vec<Fr> = (0..6u64).map(Fr::from).collect();
        let filtered = filter_indexes(&values, &[1, 4]);
        let expected: Vec<Fr> = [0u64, 2, 3, 5].map(Fr::from).to_vec();
        assert_eq!(filtered, expected);
        assert_eq!(filter_indexes(&values, &[]), values);
    }
}
