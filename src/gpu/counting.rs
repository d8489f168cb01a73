//! Backend decorator that tracks live allocations and injects kernel faults.
//!
//! Wraps any [`DeviceBackend`] without changing its behavior. The live
//! counter covers every allocating primitive (`alloc`, `generate_twiddles`,
//! `interpolate`), so a prover invocation that returns with `live() != 0` has
//! leaked device memory. Fault injection flips a chosen call of `g1_msm`,
//! `g2_msm` or `evaluate` into a nonzero kernel status, which is how the
//! error-path tests drive the draining logic.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use ark_bn254::{Fr, G1Affine, G1Projective, G2Affine, G2Projective};

use super::{DeviceBackend, DeviceError};
use crate::poly::Domain;

#[derive(Debug)]
pub struct CountingBackend<B: DeviceBackend> {
    inner: B,
    live: AtomicI64,
    g1_msm_calls: AtomicUsize,
    evaluate_calls: AtomicUsize,
    /// 1-based call index of `g1_msm` that fails, if any.
    pub fail_g1_msm_on_call: Option<usize>,
    pub fail_g2_msm: bool,
    /// 1-based call index of `evaluate` that fails, if any.
    pub fail_evaluate_on_call: Option<usize>,
    g1_msm_sizes: Mutex<Vec<usize>>,
}

impl<B: DeviceBackend> CountingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            live: AtomicI64::new(0),
            g1_msm_calls: AtomicUsize::new(0),
            evaluate_calls: AtomicUsize::new(0),
            fail_g1_msm_on_call: None,
            fail_g2_msm: false,
            fail_evaluate_on_call: None,
            g1_msm_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Allocations minus frees since construction.
    pub fn live(&self) -> i64 {
        self.live.load(Ordering::SeqCst)
    }

    /// Input sizes of every `g1_msm` launch, in launch order.
    pub fn g1_msm_sizes(&self) -> Vec<usize> {
        self.g1_msm_sizes.lock().unwrap().clone()
    }
}

impl<B: DeviceBackend> DeviceBackend for CountingBackend<B> {
    type Ptr = B::Ptr;

    fn alloc(&self, bytes: usize) -> Result<B::Ptr, DeviceError> {
        let ptr = self.inner.alloc(bytes)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    fn free(&self, ptr: B::Ptr) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.inner.free(ptr);
    }

    fn copy_scalars_h2d(&self, dst: B::Ptr, src: &[Fr]) -> Result<(), DeviceError> {
        self.inner.copy_scalars_h2d(dst, src)
    }

    fn copy_scalars_d2h(&self, dst: &mut [Fr], src: B::Ptr) -> Result<(), DeviceError> {
        self.inner.copy_scalars_d2h(dst, src)
    }

    fn copy_g1_h2d(&self, dst: B::Ptr, src: &[G1Affine]) -> Result<(), DeviceError> {
        self.inner.copy_g1_h2d(dst, src)
    }

    fn copy_g2_h2d(&self, dst: B::Ptr, src: &[G2Affine]) -> Result<(), DeviceError> {
        self.inner.copy_g2_h2d(dst, src)
    }

    fn init_domain(&self, domain: &Domain) -> Result<(), DeviceError> {
        self.inner.init_domain(domain)
    }

    fn to_mont(&self, ptr: B::Ptr, len: usize) -> Result<(), DeviceError> {
        self.inner.to_mont(ptr, len)
    }

    fn from_mont(&self, ptr: B::Ptr, len: usize) -> Result<(), DeviceError> {
        self.inner.from_mont(ptr, len)
    }

    fn reverse_scalars(&self, ptr: B::Ptr, len: usize) -> Result<(), DeviceError> {
        self.inner.reverse_scalars(ptr, len)
    }

    fn generate_twiddles(&self, n: usize, log2n: u32, inverse: bool) -> Result<B::Ptr, DeviceError> {
        let ptr = self.inner.generate_twiddles(n, log2n, inverse)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    fn interpolate(
        &self,
        values: B::Ptr,
        twiddles: B::Ptr,
        coset_powers: Option<B::Ptr>,
        n: usize,
    ) -> Result<B::Ptr, DeviceError> {
        let ptr = self.inner.interpolate(values, twiddles, coset_powers, n)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    fn evaluate(
        &self,
        out: B::Ptr,
        coeffs: B::Ptr,
        twiddles: B::Ptr,
        coset_powers: Option<B::Ptr>,
        n: usize,
        twiddle_len: usize,
    ) -> Result<(), DeviceError> {
        let call = self.evaluate_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_evaluate_on_call == Some(call) {
            return Err(DeviceError::KernelStatus(11));
        }
        self.inner
            .evaluate(out, coeffs, twiddles, coset_powers, n, twiddle_len)
    }

    fn vec_mul(&self, a: B::Ptr, b: B::Ptr, n: usize) -> Result<(), DeviceError> {
        self.inner.vec_mul(a, b, n)
    }

    fn vec_sub(&self, a: B::Ptr, b: B::Ptr, n: usize) -> Result<(), DeviceError> {
        self.inner.vec_sub(a, b, n)
    }

    fn g1_msm(
        &self,
        scalars: B::Ptr,
        points: B::Ptr,
        n: usize,
        bucket_factor: usize,
    ) -> Result<G1Projective, DeviceError> {
        let call = self.g1_msm_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.g1_msm_sizes.lock().unwrap().push(n);
        if self.fail_g1_msm_on_call == Some(call) {
            return Err(DeviceError::KernelStatus(13));
        }
        self.inner.g1_msm(scalars, points, n, bucket_factor)
    }

    fn g2_msm(
        &self,
        scalars: B::Ptr,
        points: B::Ptr,
        n: usize,
        bucket_factor: usize,
    ) -> Result<G2Projective, DeviceError> {
        if self.fail_g2_msm {
            return Err(DeviceError::KernelStatus(14));
        }
        self.inner.g2_msm(scalars, points, n, bucket_factor)
    }
}
