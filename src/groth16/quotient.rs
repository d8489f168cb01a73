//! Quotient polynomial pipeline.
//!
//! Computes `H(X) = (A(X) * B(X) - C(X)) / (X^n - 1)` from the solver's
//! evaluation vectors by interpolating each on the domain, re-evaluating on
//! the coset `g * H` where the vanishing polynomial is the constant
//! `g^n - 1`, and dividing pointwise. The three vectors move through the
//! device independently on three host tasks; the returned buffer holds H's
//! coefficients in natural order and is the only allocation that survives
//! the call.

use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use ark_bn254::Fr;
use ark_ff::AdditiveGroup;

use crate::gpu::{DeviceBackend, DeviceBuffer};
use crate::poly::Domain;
use crate::utils::errors::Groth16Error;

/// Uploads one padded evaluation vector and normalizes it to the backend's
/// kernel form.
fn upload<'a, B: DeviceBackend>(
    backend: &'a B,
    values: Vec<Fr>,
) -> Result<DeviceBuffer<'a, B>, Groth16Error> {
    let n = values.len();
    let buf = DeviceBuffer::from_scalars(backend, &values)?;
    backend.from_mont(buf.ptr(), n)?;
    Ok(buf)
}

/// Interpolates on the domain, then evaluates on the coset, in place.
fn to_coset_evaluations<'a, B: DeviceBackend>(
    backend: &'a B,
    buf: DeviceBuffer<'a, B>,
    twiddles: B::Ptr,
    twiddles_inv: B::Ptr,
    coset_powers: B::Ptr,
    n: usize,
) -> Result<DeviceBuffer<'a, B>, Groth16Error> {
    backend
        .reverse_scalars(buf.ptr(), n)
        .map_err(Groth16Error::Ntt)?;
    let coeffs = DeviceBuffer::from_raw(
        backend,
        backend
            .interpolate(buf.ptr(), twiddles_inv, None, n)
            .map_err(Groth16Error::Ntt)?,
    );
    backend
        .evaluate(buf.ptr(), coeffs.ptr(), twiddles, Some(coset_powers), n, n)
        .map_err(Groth16Error::Ntt)?;
    backend
        .reverse_scalars(buf.ptr(), n)
        .map_err(Groth16Error::Ntt)?;
    Ok(buf)
}

/// Runs the full H pipeline and returns the device buffer holding H's
/// coefficient vector (length n, degree at most n - 2). Every other
/// allocation this function makes is released before it returns, on success
/// and on error alike.
#[tracing::instrument(skip_all, name = "compute_h")]
pub(crate) fn compute_h<'a, B: DeviceBackend>(
    backend: &'a B,
    mut a: Vec<Fr>,
    mut b: Vec<Fr>,
    mut c: Vec<Fr>,
    domain: &Domain,
) -> Result<DeviceBuffer<'a, B>, Groth16Error> {
    let n = domain.cardinality;
    a.resize(n, Fr::ZERO);
    b.resize(n, Fr::ZERO);
    c.resize(n, Fr::ZERO);

    backend.init_domain(domain)?;

    let twiddles_inv = DeviceBuffer::from_raw(
        backend,
        backend
            .generate_twiddles(n, domain.log2_cardinality, true)
            .map_err(Groth16Error::Ntt)?,
    );
    let twiddles = DeviceBuffer::from_raw(
        backend,
        backend
            .generate_twiddles(n, domain.log2_cardinality, false)
            .map_err(Groth16Error::Ntt)?,
    );
    let coset_powers = DeviceBuffer::from_scalars(backend, &domain.coset_table)?;
    let coset_powers_inv = DeviceBuffer::from_scalars(backend, &domain.coset_table_inv)?;

    let den = domain.coset_vanishing_inverse();
    let den_d = DeviceBuffer::from_scalars(backend, &vec![den; n])?;

    // Copy a, b, c concurrently, then push each through its
    // interpolate-then-coset-evaluate leg on its own task. Results come back
    // over one-shot channels so an error in one leg still drains the others.
    let copy_start = Instant::now();
    let (tx, rx) = mpsc::channel();
    thread::scope(|s| {
        for (idx, values) in [a, b, c].into_iter().enumerate() {
            let tx = tx.clone();
            s.spawn(move || {
                let _ = tx.send((idx, upload(backend, values)));
            });
        }
    });
    let mut uploaded = collect_three(&rx)?;
    tracing::debug!(took = ?copy_start.elapsed(), "copied a, b, c to device");

    let transform_start = Instant::now();
    let (tx, rx) = mpsc::channel();
    thread::scope(|s| {
        for (idx, buf) in uploaded.drain(..).enumerate() {
            let tx = tx.clone();
            let (tw, tw_inv, coset) = (twiddles.ptr(), twiddles_inv.ptr(), coset_powers.ptr());
            s.spawn(move || {
                let _ = tx.send((idx, to_coset_evaluations(backend, buf, tw, tw_inv, coset, n)));
            });
        }
    });
    let coset_evals = collect_three(&rx)?;
    tracing::debug!(took = ?transform_start.elapsed(), "interpolated and re-evaluated on the coset");

    let [h, b_d, c_d]: [DeviceBuffer<'a, B>; 3] = coset_evals
        .try_into()
        .map_err(|_| Groth16Error::Solver("quotient pipeline lost a buffer".into()))?;

    backend
        .vec_mul(h.ptr(), b_d.ptr(), n)
        .map_err(Groth16Error::Ntt)?;
    backend
        .vec_sub(h.ptr(), c_d.ptr(), n)
        .map_err(Groth16Error::Ntt)?;
    backend
        .vec_mul(h.ptr(), den_d.ptr(), n)
        .map_err(Groth16Error::Ntt)?;
    drop((b_d, c_d, den_d, coset_powers, twiddles));

    // Back to coefficient form, undoing the coset shift per index.
    backend
        .reverse_scalars(h.ptr(), n)
        .map_err(Groth16Error::Ntt)?;
    let coeffs = DeviceBuffer::from_raw(
        backend,
        backend
            .interpolate(h.ptr(), twiddles_inv.ptr(), Some(coset_powers_inv.ptr()), n)
            .map_err(Groth16Error::Ntt)?,
    );
    Ok(coeffs)
}

/// Receives exactly three tagged results, surfacing the first error only
/// after all three tasks have reported (successful buffers drop and free
/// here).
fn collect_three<T>(
    rx: &mpsc::Receiver<(usize, Result<T, Groth16Error>)>,
) -> Result<Vec<T>, Groth16Error> {
    let mut slots: Vec<Option<Result<T, Groth16Error>>> = (0..3).map(|_| None).collect();
    for _ in 0..3 {
        let (idx, result) = rx
            .recv()
            .map_err(|_| Groth16Error::Solver("quotient task disappeared".into()))?;
        slots[idx] = Some(result);
    }
    let mut out = Vec::with_capacity(3);
    for slot in slots {
        out.push(slot.expect("all three tasks reported")?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::CurveId;
    use crate::gpu::CpuBackend;
    use ark_ff::{Field, Zero};
    use ark_std::{test_rng, UniformRand};

    /// O(n^2) inverse DFT used as an independent reference.
    fn naive_interpolate(evals: &[Fr], domain: &Domain) -> Vec<Fr> {
        let n = evals.len();
        let omega_inv = domain.generator_inv;
        (0..n)
            .map(|i| {
                let mut acc = Fr::ZERO;
                for (j, e) in evals.iter().enumerate() {
                    acc += *e * omega_inv.pow([(i * j) as u64]);
                }
                acc * domain.cardinality_inv
            })
            .collect()
    }

    fn eval_poly(coeffs: &[Fr], x: Fr) -> Fr {
        coeffs.iter().rev().fold(Fr::ZERO, |acc, c| acc * x + c)
    }

    #[test]
    fn quotient_satisfies_the_division_law() {
        let mut rng = test_rng();
        let backend = CpuBackend::new();
        let domain = Domain::new(CurveId::Bn254, 16).unwrap();
        let n = domain.cardinality;

        // c = a * b pointwise, so A*B - C vanishes on the domain and the
        // quotient is exact. As polynomials A*B and C still differ (the
        // product has degree up to 2n - 2), so H is nonzero.
        let a: Vec<Fr> = (0..n).map(|_| Fr::rand(&mut rng)).collect();
        let b: Vec<Fr> = (0..n).map(|_| Fr::rand(&mut rng)).collect();
        let c: Vec<Fr> = a.iter().zip(&b).map(|(x, y)| *x * y).collect();

        let h_buf = compute_h(&backend, a.clone(), b.clone(), c.clone(), &domain).unwrap();
        let mut h = vec![Fr::ZERO; n];
        backend.copy_scalars_d2h(&mut h, h_buf.ptr()).unwrap();
        assert!(h.iter().any(|x| !x.is_zero()));

        let a_coeffs = naive_interpolate(&a, &domain);
        let b_coeffs = naive_interpolate(&b, &domain);
        let c_coeffs = naive_interpolate(&c, &domain);

        // H * (X^n - 1) = A * B - C at random off-domain points.
        for _ in 0..8 {
            let x = Fr::rand(&mut rng);
            let z_x = x.pow([n as u64]) - Fr::ONE;
            let lhs = eval_poly(&h, x) * z_x;
            let rhs = eval_poly(&a_coeffs, x) * eval_poly(&b_coeffs, x) - eval_poly(&c_coeffs, x);
            assert_eq!(lhs, rhs);
        }
    }

    #[test]
    fn short_vectors_are_zero_padded() {
        let mut rng = test_rng();
        let backend = CpuBackend::new();
        let domain = Domain::new(CurveId::Bn254, 8).unwrap();
        let n = domain.cardinality;

        // Satisfying vectors shorter than the domain: the implicit padding
        // keeps a * b = c pointwise everywhere.
        let a: Vec<Fr> = (0..3).map(|_| Fr::rand(&mut rng)).collect();
        let b: Vec<Fr> = (0..3).map(|_| Fr::rand(&mut rng)).collect();
        let c: Vec<Fr> = a.iter().zip(&b).map(|(x, y)| *x * y).collect();

        let h_buf = compute_h(&backend, a, b, c, &domain).unwrap();
        let mut h = vec![Fr::ZERO; n];
        backend.copy_scalars_d2h(&mut h, h_buf.ptr()).unwrap();
        // The exact quotient has degree at most n - 2.
        assert!(h[n - 1].is_zero());
    }

    #[test]
    fn every_intermediate_allocation_is_freed() {
        let mut rng = test_rng();
        let backend = crate::gpu::CountingBackend::new(CpuBackend::new());
        let domain = Domain::new(CurveId::Bn254, 8).unwrap();
        let n = domain.cardinality;

        let a: Vec<Fr> = (0..n).map(|_| Fr::rand(&mut rng)).collect();
        let b: Vec<Fr> = (0..n).map(|_| Fr::rand(&mut rng)).collect();
        let c: Vec<Fr> = (0..n).map(|_| Fr::rand(&mut rng)).collect();

        let h_buf = compute_h(&backend, a, b, c, &domain).unwrap();
        assert_eq!(backend.live(), 1, "only the H buffer may survive");
        drop(h_buf);
        assert_eq!(backend.live(), 0);
    }

    #[test]
    fn kernel_failure_frees_everything() {
        let mut rng = test_rng();
        let mut backend = crate::gpu::CountingBackend::new(CpuBackend::new());
        backend.fail_evaluate_on_call = Some(2);
        let domain = Domain::new(CurveId::Bn254, 8).unwrap();
        let n = domain.cardinality;

        let a: Vec<Fr> = (0..n).map(|_| Fr::rand(&mut rng)).collect();
        let b: Vec<Fr> = (0..n).map(|_| Fr::rand(&mut rng)).collect();
        let c: Vec<Fr> = (0..n).map(|_| Fr::rand(&mut rng)).collect();

        let err = compute_h(&backend, a, b, c, &domain).unwrap_err();
        assert!(matches!(err, Groth16Error::Ntt(_)));
        assert_eq!(backend.live(), 0);
    }
}
