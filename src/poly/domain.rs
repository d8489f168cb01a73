use ark_bn254::Fr;
use ark_ff::{batch_inversion, AdditiveGroup, Field};

use crate::field::CurveId;
use crate::utils::errors::Groth16Error;

/// Radix-2 evaluation domain over Fr with the coset tables the quotient
/// pipeline consumes on device.
///
/// `coset_table[i] = g^i` where `g` is the multiplicative generator of Fr, so
/// the coset `g * H` avoids every root of the vanishing polynomial `X^n - 1`.
/// The bit-reversed twins are the same tables permuted for kernels that
/// consume decimated inputs.
#[derive(Debug, Clone)]
pub struct Domain {
    pub cardinality: usize,
    pub log2_cardinality: u32,
    /// n-th root of unity.
    pub generator: Fr,
    pub generator_inv: Fr,
    pub cardinality_inv: Fr,
    /// Coset shift g.
    pub coset_gen: Fr,
    pub coset_table: Vec<Fr>,
    pub coset_table_inv: Vec<Fr>,
    pub coset_table_bitrev: Vec<Fr>,
    pub coset_table_inv_bitrev: Vec<Fr>,
}

impl Domain {
    /// Builds the smallest power-of-two domain holding `min_size` points.
    pub fn new(curve: CurveId, min_size: usize) -> Result<Self, Groth16Error> {
        let cardinality = min_size.max(2).next_power_of_two();
        let log2_cardinality = cardinality.trailing_zeros();
        if log2_cardinality > curve.two_adicity() {
            return Err(Groth16Error::Solver(format!(
                "domain of size {cardinality} exceeds the two-adicity of {}",
                curve.name()
            )));
        }

        let generator = curve.root_of_unity(log2_cardinality).ok_or_else(|| {
            Groth16Error::Solver(format!("no 2^{log2_cardinality} root of unity"))
        })?;
        let generator_inv = generator.inverse().expect("root of unity is nonzero");
        let cardinality_inv = Fr::from(cardinality as u64)
            .inverse()
            .expect("cardinality is nonzero");

        let coset_gen = curve.multiplicative_generator();
        let mut coset_table = Vec::with_capacity(cardinality);
        let mut acc = Fr::ONE;
        for _ in 0..cardinality {
            coset_table.push(acc);
            acc *= coset_gen;
        }
        let mut coset_table_inv = coset_table.clone();
        batch_inversion(&mut coset_table_inv);

        let coset_table_bitrev = bit_reversed(&coset_table);
        let coset_table_inv_bitrev = bit_reversed(&coset_table_inv);

        Ok(Self {
            cardinality,
            log2_cardinality,
            generator,
            generator_inv,
            cardinality_inv,
            coset_gen,
            coset_table,
            coset_table_inv,
            coset_table_bitrev,
            coset_table_inv_bitrev,
        })
    }

    /// `(g^n - 1)^-1`, the constant the coset-evaluated vanishing polynomial
    /// divides out to.
    pub fn coset_vanishing_inverse(&self) -> Fr {
        (self.coset_gen.pow([self.cardinality as u64]) - Fr::ONE)
            .inverse()
            .expect("g^n - 1 is nonzero since g is not a root of unity")
    }

    /// Lagrange coefficients `L_i(tau)` for every point of the domain,
    /// computed as `Z(tau)/n * omega^i / (tau - omega^i)`.
    pub fn lagrange_coefficients_at(&self, tau: Fr) -> Vec<Fr> {
        let n = self.cardinality;
        let z_tau = tau.pow([n as u64]) - Fr::ONE;
        let scale = z_tau * self.cardinality_inv;

        let mut omega_i = Vec::with_capacity(n);
        let mut denoms = Vec::with_capacity(n);
        let mut acc = Fr::ONE;
        for _ in 0..n {
            omega_i.push(acc);
            denoms.push(tau - acc);
            acc *= self.generator;
        }
        batch_inversion(&mut denoms);

        omega_i
            .into_iter()
            .zip(denoms)
            .map(|(w, d)| scale * w * d)
            .collect()
    }
}

fn bit_reversed(values: &[Fr]) -> Vec<Fr> {
    let n = values.len();
    let shift = (n as u64).leading_zeros() + 1;
    (0..n)
        .map(|i| values[((i as u64).reverse_bits() >> shift) as usize])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::{test_rng, UniformRand};

    #[test]
    fn generator_has_exact_order() {
        let domain = Domain::new(CurveId::Bn254, 13).unwrap();
        assert_eq!(domain.cardinality, 16);
        assert_eq!(domain.generator.pow([16u64]), Fr::ONE);
        assert_ne!(domain.generator.pow([8u64]), Fr::ONE);
        assert_eq!(domain.generator * domain.generator_inv, Fr::ONE);
    }

    #[test]
    fn coset_tables_are_powers_of_g() {
        let domain = Domain::new(CurveId::Bn254, 8).unwrap();
        let mut expected = Fr::ONE;
        for i in 0..domain.cardinality {
            assert_eq!(domain.coset_table[i], expected);
            assert_eq!(domain.coset_table[i] * domain.coset_table_inv[i], Fr::ONE);
            expected *= domain.coset_gen;
        }
    }

    #[test]
    fn bit_reversed_tables_permute_correctly() {
        let domain = Domain::new(CurveId::Bn254, 8).unwrap();
        // rev(1) = 4 for a 3-bit index space
        assert_eq!(domain.coset_table_bitrev[1], domain.coset_table[4]);
        assert_eq!(domain.coset_table_bitrev[6], domain.coset_table[3]);
    }

    #[test]
    fn vanishing_constant_matches_direct_evaluation() {
        let domain = Domain::new(CurveId::Bn254, 32).unwrap();
        let g_n = domain.coset_gen.pow([domain.cardinality as u64]);
        assert_eq!((g_n - Fr::ONE) * domain.coset_vanishing_inverse(), Fr::ONE);
    }

    #[test]
    fn lagrange_coefficients_interpolate_low_degree_polynomials() {
        let mut rng = test_rng();
        let domain = Domain::new(CurveId::Bn254, 8).unwrap();
        let tau = Fr::rand(&mut rng);
        let l = domain.lagrange_coefficients_at(tau);

        // f(X) = 1 and f(X) = X reconstruct exactly from their domain
        // evaluations.
        let sum: Fr = l.iter().sum();
        assert_eq!(sum, Fr::ONE);

        let mut omega_i = Fr::ONE;
        let mut weighted = Fr::ZERO;
        for li in &l {
            weighted += *li * omega_i;
            omega_i *= domain.generator;
        }
        assert_eq!(weighted, tau);
    }
}
