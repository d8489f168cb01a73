//! Abstract device backend the prover pipeline dispatches to.
//!
//! A backend owns device memory and exposes the primitive set the pipeline is
//! written against: allocation and host/device copies, Montgomery conversion,
//! bit-reversal, NTT/INTT kernels, element-wise vector ops, and bucket MSMs
//! on G1/G2. Implementations are the CUDA adapter (feature `icicle`), the CPU
//! reference backend, and a counting mock for tests.
//!
//! # Byte layout
//!
//! Scalars are 32-byte little-endian Fr elements; G1 affine points are
//! 2 x Fp = 64 bytes, G1 projective 96 bytes; G2 affine 128 bytes, G2
//! projective 192 bytes.
//!
//! # Montgomery convention
//!
//! Device scalar buffers hold elements in the backend's kernel form, which
//! for every bundled backend is Montgomery. [`DeviceBackend::from_mont`] and
//! [`DeviceBackend::to_mont`] are the explicit boundary conversions the
//! quotient pipeline issues after host-to-device copies; a backend whose
//! kernels consume Montgomery natively implements them as a form check. The
//! convention is enforced here and nowhere else.
//!
//! # Transform ordering
//!
//! [`DeviceBackend::evaluate`] consumes natural-order coefficients and
//! produces bit-reversed evaluations (decimation in frequency);
//! [`DeviceBackend::interpolate`] consumes bit-reversed evaluations and
//! produces natural-order values (decimation in time), folding in the n^-1
//! scaling and, when a coset power table is supplied, the per-index coset
//! multiplication. Callers sequence explicit [`DeviceBackend::reverse_scalars`]
//! calls around these to land in the order the next stage expects.

use ark_bn254::{Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use thiserror::Error;

use crate::poly::Domain;

pub mod counting;
pub mod cpu;
#[cfg(feature = "icicle")]
pub mod icicle;

pub use counting::CountingBackend;
pub use cpu::CpuBackend;

pub const SCALAR_BYTES: usize = 32;
pub const G1_AFFINE_BYTES: usize = 64;
pub const G2_AFFINE_BYTES: usize = 128;

/// A failed device primitive. Any of these aborts the invocation that issued
/// the call; the pipeline never retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device allocation of {0} bytes failed")]
    AllocationFailed(usize),
    #[error("host/device copy failed: {0}")]
    CopyFailed(String),
    #[error("unknown or freed device pointer: {0}")]
    InvalidPointer(String),
    #[error("device buffer holds {0}, expected {1}")]
    TypeMismatch(&'static str, &'static str),
    #[error("kernel returned nonzero status {0}")]
    KernelStatus(i32),
}

/// The primitive operations the prover core calls. One backend instance may
/// serve concurrent prover invocations; each invocation owns the buffers it
/// allocates.
pub trait DeviceBackend: Send + Sync {
    type Ptr: Copy + Eq + Send + Sync + std::fmt::Debug;

    fn alloc(&self, bytes: usize) -> Result<Self::Ptr, DeviceError>;

    /// Releasing an unknown pointer is a programming error on the caller's
    /// side; backends log it rather than fail, since `free` runs on drop
    /// paths.
    fn free(&self, ptr: Self::Ptr);

    fn copy_scalars_h2d(&self, dst: Self::Ptr, src: &[Fr]) -> Result<(), DeviceError>;
    fn copy_scalars_d2h(&self, dst: &mut [Fr], src: Self::Ptr) -> Result<(), DeviceError>;
    fn copy_g1_h2d(&self, dst: Self::Ptr, src: &[G1Affine]) -> Result<(), DeviceError>;
    fn copy_g2_h2d(&self, dst: Self::Ptr, src: &[G2Affine]) -> Result<(), DeviceError>;

    /// One-time per-domain setup (twiddle caches, coset generators). Called
    /// before the first transform over `domain`; idempotent.
    fn init_domain(&self, domain: &Domain) -> Result<(), DeviceError> {
        let _ = domain;
        Ok(())
    }

    fn to_mont(&self, ptr: Self::Ptr, len: usize) -> Result<(), DeviceError>;
    fn from_mont(&self, ptr: Self::Ptr, len: usize) -> Result<(), DeviceError>;

    /// In-place bit-reversal permutation of `len` scalars; `len` must be a
    /// power of two.
    fn reverse_scalars(&self, ptr: Self::Ptr, len: usize) -> Result<(), DeviceError>;

    /// Materializes `[w^0, w^1, ...]` (or inverse powers) for the 2^log2n
    /// domain in device memory. The returned buffer is owned by the caller.
    fn generate_twiddles(
        &self,
        n: usize,
        log2n: u32,
        inverse: bool,
    ) -> Result<Self::Ptr, DeviceError>;

    /// Inverse NTT: bit-reversed evaluations in, natural-order values out in
    /// a freshly allocated buffer. When `coset_powers` is supplied the output
    /// is additionally scaled per index (coset interpolation).
    fn interpolate(
        &self,
        values: Self::Ptr,
        twiddles: Self::Ptr,
        coset_powers: Option<Self::Ptr>,
        n: usize,
    ) -> Result<Self::Ptr, DeviceError>;

    /// Forward NTT: natural-order coefficients in, bit-reversed evaluations
    /// written to `out`. When `coset_powers` is supplied the input is scaled
    /// per index first (evaluation on the shifted coset).
    #[allow(clippy::too_many_arguments)]
    fn evaluate(
        &self,
        out: Self::Ptr,
        coeffs: Self::Ptr,
        twiddles: Self::Ptr,
        coset_powers: Option<Self::Ptr>,
        n: usize,
        twiddle_len: usize,
    ) -> Result<(), DeviceError>;

    /// `a[i] *= b[i]` for i in 0..n.
    fn vec_mul(&self, a: Self::Ptr, b: Self::Ptr, n: usize) -> Result<(), DeviceError>;

    /// `a[i] -= b[i]` for i in 0..n.
    fn vec_sub(&self, a: Self::Ptr, b: Self::Ptr, n: usize) -> Result<(), DeviceError>;

    /// Pippenger bucket MSM over the first `n` scalar/point pairs, returning
    /// one Jacobian point. `bucket_factor` is a backend-defined tuning knob;
    /// zero selects the backend default.
    fn g1_msm(
        &self,
        scalars: Self::Ptr,
        points: Self::Ptr,
        n: usize,
        bucket_factor: usize,
    ) -> Result<G1Projective, DeviceError>;

    fn g2_msm(
        &self,
        scalars: Self::Ptr,
        points: Self::Ptr,
        n: usize,
        bucket_factor: usize,
    ) -> Result<G2Projective, DeviceError>;
}

/// Owning handle for one device allocation. Freed on drop, so early returns
/// and error paths cannot leak device memory.
#[derive(Debug)]
pub struct DeviceBuffer<'a, B: DeviceBackend> {
    backend: &'a B,
    ptr: B::Ptr,
}

impl<'a, B: DeviceBackend> DeviceBuffer<'a, B> {
    pub fn alloc(backend: &'a B, bytes: usize) -> Result<Self, DeviceError> {
        let ptr = backend.alloc(bytes)?;
        Ok(Self { backend, ptr })
    }

    /// Wraps a pointer the backend already handed out (e.g. a twiddle table
    /// or an interpolation result), taking over its release.
    pub fn from_raw(backend: &'a B, ptr: B::Ptr) -> Self {
        Self { backend, ptr }
    }

    /// Allocates and uploads a scalar vector.
    pub fn from_scalars(backend: &'a B, scalars: &[Fr]) -> Result<Self, DeviceError> {
        let buf = Self::alloc(backend, scalars.len() * SCALAR_BYTES)?;
        backend.copy_scalars_h2d(buf.ptr, scalars)?;
        Ok(buf)
    }

    /// Allocates and uploads G1 affine bases.
    pub fn from_g1_points(backend: &'a B, points: &[G1Affine]) -> Result<Self, DeviceError> {
        let buf = Self::alloc(backend, points.len() * G1_AFFINE_BYTES)?;
        backend.copy_g1_h2d(buf.ptr, points)?;
        Ok(buf)
    }

    /// Allocates and uploads G2 affine bases.
    pub fn from_g2_points(backend: &'a B, points: &[G2Affine]) -> Result<Self, DeviceError> {
        let buf = Self::alloc(backend, points.len() * G2_AFFINE_BYTES)?;
        backend.copy_g2_h2d(buf.ptr, points)?;
        Ok(buf)
    }

    pub fn ptr(&self) -> B::Ptr {
        self.ptr
    }
}

impl<B: DeviceBackend> Drop for DeviceBuffer<'_, B> {
    fn drop(&mut self) {
        self.backend.free(self.ptr);
    }
}
