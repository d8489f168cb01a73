//! CPU reference implementation of the device backend.
//!
//! Buffers live in a slab table keyed by opaque handles, so the pointer
//! discipline of the pipeline (allocate, copy, transform, free) is exercised
//! exactly as it would be against a real device. Kernels are radix-2
//! butterflies and the bucket MSM from [`crate::msm`]. The kernel form for
//! scalars is Montgomery, which is the form arkworks elements already carry
//! in memory, so the Montgomery conversions only validate direction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use ark_bn254::{Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ff::{FftField, Field, PrimeField};
use rayon::prelude::*;

use super::{DeviceBackend, DeviceError, SCALAR_BYTES};
use crate::msm::msm_bigint;
use crate::utils::thread::execute;

/// Raw base pointer smuggled into range workers; each worker touches only its
/// own `[start, end)` slice.
#[derive(Clone, Copy)]
struct RangePtr(*mut Fr);
unsafe impl Send for RangePtr {}
unsafe impl Sync for RangePtr {}

/// `values[i] *= scale * table[i]` (or just `scale`), fanned out over
/// contiguous ranges.
fn scale_in_place(values: &mut [Fr], table: Option<&[Fr]>, scale: Fr) {
    let base = RangePtr(values.as_mut_ptr());
    execute(
        values.len(),
        |start, end| {
            let base = base;
            let chunk = unsafe { std::slice::from_raw_parts_mut(base.0.add(start), end - start) };
            match table {
                Some(table) => {
                    for (v, t) in chunk.iter_mut().zip(&table[start..end]) {
                        *v *= scale * t;
                    }
                }
                None => {
                    for v in chunk {
                        *v *= scale;
                    }
                }
            }
        },
        None,
    );
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CpuPtr(u64);

#[derive(Debug)]
enum Slab {
    /// Allocated but not yet typed by a copy.
    Raw(usize),
    Scalars(Vec<Fr>),
    G1(Vec<G1Affine>),
    G2(Vec<G2Affine>),
}

impl Slab {
    fn kind(&self) -> &'static str {
        match self {
            Slab::Raw(_) => "raw bytes",
            Slab::Scalars(_) => "scalars",
            Slab::G1(_) => "g1 points",
            Slab::G2(_) => "g2 points",
        }
    }
}

#[derive(Default, Debug)]
pub struct CpuBackend {
    slabs: Mutex<HashMap<u64, Slab>>,
    next: AtomicU64,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, slab: Slab) -> CpuPtr {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.slabs.lock().unwrap().insert(id, slab);
        CpuPtr(id)
    }

    /// Read-only snapshot of a scalar slab.
    fn clone_scalars(&self, ptr: CpuPtr, min_len: usize) -> Result<Vec<Fr>, DeviceError> {
        let slabs = self.slabs.lock().unwrap();
        match slabs.get(&ptr.0) {
            Some(Slab::Scalars(v)) if v.len() >= min_len => Ok(v.clone()),
            Some(Slab::Scalars(v)) => Err(DeviceError::CopyFailed(format!(
                "scalar buffer holds {} elements, need {min_len}",
                v.len()
            ))),
            Some(other) => Err(DeviceError::TypeMismatch(other.kind(), "scalars")),
            None => Err(DeviceError::InvalidPointer(format!("{ptr:?}"))),
        }
    }

    /// Removes a scalar slab for in-place mutation; reinsert with `put`.
    fn take_scalars(&self, ptr: CpuPtr, min_len: usize) -> Result<Vec<Fr>, DeviceError> {
        let mut slabs = self.slabs.lock().unwrap();
        match slabs.remove(&ptr.0) {
            Some(Slab::Scalars(v)) if v.len() >= min_len => Ok(v),
            Some(slab @ Slab::Scalars(_)) => {
                let len = match &slab {
                    Slab::Scalars(v) => v.len(),
                    _ => unreachable!(),
                };
                slabs.insert(ptr.0, slab);
                Err(DeviceError::CopyFailed(format!(
                    "scalar buffer holds {len} elements, need {min_len}"
                )))
            }
            Some(other) => {
                let kind = other.kind();
                slabs.insert(ptr.0, other);
                Err(DeviceError::TypeMismatch(kind, "scalars"))
            }
            None => Err(DeviceError::InvalidPointer(format!("{ptr:?}"))),
        }
    }

    fn put(&self, ptr: CpuPtr, slab: Slab) {
        self.slabs.lock().unwrap().insert(ptr.0, slab);
    }

    fn store_into(&self, dst: CpuPtr, expected_bytes: usize, slab: Slab) -> Result<(), DeviceError> {
        let mut slabs = self.slabs.lock().unwrap();
        match slabs.get(&dst.0) {
            Some(Slab::Raw(bytes)) if *bytes == expected_bytes => {}
            Some(Slab::Scalars(v)) if v.len() * SCALAR_BYTES == expected_bytes => {}
            Some(Slab::Raw(bytes)) => {
                return Err(DeviceError::CopyFailed(format!(
                    "destination holds {bytes} bytes, writing {expected_bytes}"
                )))
            }
            Some(Slab::Scalars(v)) => {
                return Err(DeviceError::CopyFailed(format!(
                    "destination holds {} scalars, writing {} bytes",
                    v.len(),
                    expected_bytes
                )))
            }
            Some(other) => return Err(DeviceError::TypeMismatch(other.kind(), "scalars")),
            None => return Err(DeviceError::InvalidPointer(format!("{dst:?}"))),
        }
        slabs.insert(dst.0, slab);
        Ok(())
    }

    fn clone_g1(&self, ptr: CpuPtr, min_len: usize) -> Result<Vec<G1Affine>, DeviceError> {
        let slabs = self.slabs.lock().unwrap();
        match slabs.get(&ptr.0) {
            Some(Slab::G1(v)) if v.len() >= min_len => Ok(v.clone()),
            Some(Slab::G1(_)) => Err(DeviceError::CopyFailed("g1 buffer too short".into())),
            Some(other) => Err(DeviceError::TypeMismatch(other.kind(), "g1 points")),
            None => Err(DeviceError::InvalidPointer(format!("{ptr:?}"))),
        }
    }

    fn clone_g2(&self, ptr: CpuPtr, min_len: usize) -> Result<Vec<G2Affine>, DeviceError> {
        let slabs = self.slabs.lock().unwrap();
        match slabs.get(&ptr.0) {
            Some(Slab::G2(v)) if v.len() >= min_len => Ok(v.clone()),
            Some(Slab::G2(_)) => Err(DeviceError::CopyFailed("g2 buffer too short".into())),
            Some(other) => Err(DeviceError::TypeMismatch(other.kind(), "g2 points")),
            None => Err(DeviceError::InvalidPointer(format!("{ptr:?}"))),
        }
    }
}

impl DeviceBackend for CpuBackend {
    type Ptr = CpuPtr;

    fn alloc(&self, bytes: usize) -> Result<CpuPtr, DeviceError> {
        if bytes == 0 {
            return Err(DeviceError::AllocationFailed(0));
        }
        Ok(self.insert(Slab::Raw(bytes)))
    }

    fn free(&self, ptr: CpuPtr) {
        if self.slabs.lock().unwrap().remove(&ptr.0).is_none() {
            tracing::warn!(?ptr, "free of unknown device pointer");
        }
    }

    fn copy_scalars_h2d(&self, dst: CpuPtr, src: &[Fr]) -> Result<(), DeviceError> {
        self.store_into(dst, src.len() * SCALAR_BYTES, Slab::Scalars(src.to_vec()))
    }

    fn copy_scalars_d2h(&self, dst: &mut [Fr], src: CpuPtr) -> Result<(), DeviceError> {
        let values = self.clone_scalars(src, dst.len())?;
        dst.copy_from_slice(&values[..dst.len()]);
        Ok(())
    }

    fn copy_g1_h2d(&self, dst: CpuPtr, src: &[G1Affine]) -> Result<(), DeviceError> {
        let mut slabs = self.slabs.lock().unwrap();
        match slabs.get(&dst.0) {
            Some(Slab::Raw(bytes)) if *bytes == src.len() * super::G1_AFFINE_BYTES => {}
            Some(Slab::G1(v)) if v.len() == src.len() => {}
            Some(_) => return Err(DeviceError::CopyFailed("g1 destination size mismatch".into())),
            None => return Err(DeviceError::InvalidPointer(format!("{dst:?}"))),
        }
        slabs.insert(dst.0, Slab::G1(src.to_vec()));
        Ok(())
    }

    fn copy_g2_h2d(&self, dst: CpuPtr, src: &[G2Affine]) -> Result<(), DeviceError> {
        let mut slabs = self.slabs.lock().unwrap();
        match slabs.get(&dst.0) {
            Some(Slab::Raw(bytes)) if *bytes == src.len() * super::G2_AFFINE_BYTES => {}
            Some(Slab::G2(v)) if v.len() == src.len() => {}
            Some(_) => return Err(DeviceError::CopyFailed("g2 destination size mismatch".into())),
            None => return Err(DeviceError::InvalidPointer(format!("{dst:?}"))),
        }
        slabs.insert(dst.0, Slab::G2(src.to_vec()));
        Ok(())
    }

    fn to_mont(&self, ptr: CpuPtr, len: usize) -> Result<(), DeviceError> {
        // Kernel form is Montgomery and arkworks elements are stored in
        // Montgomery form, so the data is already in kernel form.
        self.clone_scalars(ptr, len).map(|_| ())
    }

    fn from_mont(&self, ptr: CpuPtr, len: usize) -> Result<(), DeviceError> {
        self.clone_scalars(ptr, len).map(|_| ())
    }

    fn reverse_scalars(&self, ptr: CpuPtr, len: usize) -> Result<(), DeviceError> {
        if !len.is_power_of_two() {
            return Err(DeviceError::KernelStatus(-1));
        }
        let mut values = self.take_scalars(ptr, len)?;
        bit_reverse_in_place(&mut values[..len]);
        self.put(ptr, Slab::Scalars(values));
        Ok(())
    }

    fn generate_twiddles(
        &self,
        n: usize,
        log2n: u32,
        inverse: bool,
    ) -> Result<CpuPtr, DeviceError> {
        if n != 1usize << log2n {
            return Err(DeviceError::KernelStatus(-2));
        }
        let mut omega =
            Fr::get_root_of_unity(n as u64).ok_or(DeviceError::KernelStatus(-3))?;
        if inverse {
            omega = omega.inverse().expect("root of unity is invertible");
        }
        let mut table = Vec::with_capacity(n);
        let mut acc = Fr::ONE;
        for _ in 0..n {
            table.push(acc);
            acc *= omega;
        }
        Ok(self.insert(Slab::Scalars(table)))
    }

    fn interpolate(
        &self,
        values: CpuPtr,
        twiddles: CpuPtr,
        coset_powers: Option<CpuPtr>,
        n: usize,
    ) -> Result<CpuPtr, DeviceError> {
        let mut vals = self.clone_scalars(values, n)?;
        vals.truncate(n);
        let tw = self.clone_scalars(twiddles, n / 2)?;
        ntt_dit_in_place(&mut vals, &tw);

        let n_inv = Fr::from(n as u64)
            .inverse()
            .ok_or(DeviceError::KernelStatus(-4))?;
        match coset_powers {
            Some(cp) => {
                let coset = self.clone_scalars(cp, n)?;
                scale_in_place(&mut vals, Some(&coset), n_inv);
            }
            None => scale_in_place(&mut vals, None, n_inv),
        }
        Ok(self.insert(Slab::Scalars(vals)))
    }

    fn evaluate(
        &self,
        out: CpuPtr,
        coeffs: CpuPtr,
        twiddles: CpuPtr,
        coset_powers: Option<CpuPtr>,
        n: usize,
        twiddle_len: usize,
    ) -> Result<(), DeviceError> {
        if twiddle_len < n / 2 {
            return Err(DeviceError::KernelStatus(-5));
        }
        let mut vals = self.clone_scalars(coeffs, n)?;
        vals.truncate(n);
        if let Some(cp) = coset_powers {
            let coset = self.clone_scalars(cp, n)?;
            scale_in_place(&mut vals, Some(&coset), Fr::ONE);
        }
        let tw = self.clone_scalars(twiddles, n / 2)?;
        ntt_dif_in_place(&mut vals, &tw);
        self.store_into(out, n * SCALAR_BYTES, Slab::Scalars(vals))
    }

    fn vec_mul(&self, a: CpuPtr, b: CpuPtr, n: usize) -> Result<(), DeviceError> {
        let rhs = self.clone_scalars(b, n)?;
        let mut lhs = self.take_scalars(a, n)?;
        lhs[..n]
            .par_iter_mut()
            .zip(rhs[..n].par_iter())
            .for_each(|(x, y)| *x *= y);
        self.put(a, Slab::Scalars(lhs));
        Ok(())
    }

    fn vec_sub(&self, a: CpuPtr, b: CpuPtr, n: usize) -> Result<(), DeviceError> {
        let rhs = self.clone_scalars(b, n)?;
        let mut lhs = self.take_scalars(a, n)?;
        lhs[..n]
            .par_iter_mut()
            .zip(rhs[..n].par_iter())
            .for_each(|(x, y)| *x -= y);
        self.put(a, Slab::Scalars(lhs));
        Ok(())
    }

    fn g1_msm(
        &self,
        scalars: CpuPtr,
        points: CpuPtr,
        n: usize,
        bucket_factor: usize,
    ) -> Result<G1Projective, DeviceError> {
        let scalars = self.clone_scalars(scalars, n)?;
        let points = self.clone_g1(points, n)?;
        let bigints: Vec<_> = scalars[..n].par_iter().map(|s| s.into_bigint()).collect();
        let window = (bucket_factor > 0).then_some(bucket_factor);
        Ok(msm_bigint(&points[..n], &bigints, window))
    }

    fn g2_msm(
        &self,
        scalars: CpuPtr,
        points: CpuPtr,
        n: usize,
        bucket_factor: usize,
    ) -> Result<G2Projective, DeviceError> {
        let scalars = self.clone_scalars(scalars, n)?;
        let points = self.clone_g2(points, n)?;
        let bigints: Vec<_> = scalars[..n].par_iter().map(|s| s.into_bigint()).collect();
        let window = (bucket_factor > 0).then_some(bucket_factor);
        Ok(msm_bigint(&points[..n], &bigints, window))
    }
}

fn bit_reverse_in_place(values: &mut [Fr]) {
    let n = values.len();
    let shift = (n as u64).leading_zeros() + 1;
    for i in 0..n {
        let j = ((i as u64).reverse_bits() >> shift) as usize;
        if i < j {
            values.swap(i, j);
        }
    }
}

/// Decimation-in-time butterfly: bit-reversed input, natural-order output.
/// `twiddles[i] = w^i` for the forward transform, `w^-i` for the inverse.
fn ntt_dit_in_place(values: &mut [Fr], twiddles: &[Fr]) {
    let n = values.len();
    let mut m = 1;
    while m < n {
        let stride = n / (2 * m);
        for block in (0..n).step_by(2 * m) {
            for j in 0..m {
                let w = twiddles[j * stride];
                let t = w * values[block + m + j];
                let u = values[block + j];
                values[block + j] = u + t;
                values[block + m + j] = u - t;
            }
        }
        m *= 2;
    }
}

/// Decimation-in-frequency butterfly: natural-order input, bit-reversed
/// output.
fn ntt_dif_in_place(values: &mut [Fr], twiddles: &[Fr]) {
    let n = values.len();
    let mut m = n / 2;
    while m >= 1 {
        let stride = n / (2 * m);
        for block in (0..n).step_by(2 * m) {
            for j in 0..m {
                let w = twiddles[j * stride];
                let u = values[block + j];
                let v = values[block + m + j];
                values[block + j] = u + v;
                values[block + m + j] = (u - v) * w;
            }
        }
        m /= 2;
    }
}
