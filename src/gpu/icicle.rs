//! CUDA backend over the icicle runtime (cargo feature `icicle`).
//!
//! Buffers are icicle `DeviceVec`s held in a slab table behind opaque
//! handles. Scalars arrive on device as the raw Montgomery limbs of the host
//! elements; `from_mont` then normalizes them to the canonical form the NTT
//! kernels expect, while the MSM launches skip the conversion and declare
//! `are_scalars_montgomery_form` instead. Twiddle tables are owned by the
//! vendor's per-domain cache, so `generate_twiddles` returns a direction
//! marker and `init_domain` performs the real initialization.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use ark_bn254::{Fq, Fq2, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ff::{BigInteger, Field, PrimeField};
use icicle_bn254::curve::{CurveCfg, G2CurveCfg, ScalarField};
use icicle_core::curve::{Affine, Curve, Projective};
use icicle_core::msm::{msm, MSMConfig};
use icicle_core::ntt::{initialize_domain, ntt, NTTConfig, NTTDir, NTTInitDomainConfig, Ordering};
use icicle_core::traits::{FieldImpl, MontgomeryConvertible};
use icicle_core::vec_ops::{bit_reverse_inplace, mul_scalars, sub_scalars, VecOpsConfig};
use icicle_runtime::memory::{DeviceVec, HostSlice};
use icicle_runtime::stream::IcicleStream;

use super::{DeviceBackend, DeviceError};
use crate::poly::Domain;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct IciclePtr(u64);

enum Slab {
    Raw(usize),
    Scalars(DeviceVec<ScalarField>),
    G1(DeviceVec<Affine<CurveCfg>>),
    G2(DeviceVec<Affine<G2CurveCfg>>),
    /// Marker standing in for a vendor-cached twiddle table.
    Twiddles { inverse: bool },
}

pub struct IcicleBackend {
    slabs: Mutex<HashMap<u64, Slab>>,
    next: AtomicU64,
    coset_gen: Mutex<Option<(ScalarField, ScalarField)>>,
}

impl IcicleBackend {
    pub fn new(device_id: i32) -> Result<Self, DeviceError> {
        let device = icicle_runtime::Device::new("CUDA", device_id);
        icicle_runtime::set_device(&device)
            .map_err(|e| DeviceError::CopyFailed(format!("set_device: {e:?}")))?;
        Ok(Self {
            slabs: Mutex::new(HashMap::new()),
            next: AtomicU64::new(1),
            coset_gen: Mutex::new(None),
        })
    }

    fn insert(&self, slab: Slab) -> IciclePtr {
        let id = self.next.fetch_add(1, AtomicOrdering::Relaxed);
        self.slabs.lock().unwrap().insert(id, slab);
        IciclePtr(id)
    }

    fn kernel_err(e: icicle_runtime::errors::eIcicleError) -> DeviceError {
        DeviceError::KernelStatus(e as i32)
    }
}

fn scalar_from_ark(v: &Fr) -> ScalarField {
    // Raw Montgomery limbs, the same bytes the host element carries.
    let limbs = v.0;
    ScalarField::from_bytes_le(&limbs.to_bytes_le())
}

fn scalar_to_ark(v: &ScalarField) -> Fr {
    Fr::from_le_bytes_mod_order(&v.to_bytes_le())
}

fn base_from_ark(v: &Fq) -> <CurveCfg as Curve>::BaseField {
    <CurveCfg as Curve>::BaseField::from_bytes_le(&v.into_bigint().to_bytes_le())
}

fn g1_from_ark(p: &G1Affine) -> Affine<CurveCfg> {
    Affine::<CurveCfg> {
        x: base_from_ark(&p.x),
        y: base_from_ark(&p.y),
    }
}

fn g2_base_from_ark(v: &Fq2) -> <G2CurveCfg as Curve>::BaseField {
    let mut bytes = v.c0.into_bigint().to_bytes_le();
    bytes.extend_from_slice(&v.c1.into_bigint().to_bytes_le());
    <G2CurveCfg as Curve>::BaseField::from_bytes_le(&bytes)
}

fn g2_from_ark(p: &G2Affine) -> Affine<G2CurveCfg> {
    Affine::<G2CurveCfg> {
        x: g2_base_from_ark(&p.x),
        y: g2_base_from_ark(&p.y),
    }
}

fn g1_to_ark(p: &Projective<CurveCfg>) -> G1Projective {
    let x = Fq::from_random_bytes(&p.x.to_bytes_le()).unwrap_or_default();
    let y = Fq::from_random_bytes(&p.y.to_bytes_le()).unwrap_or_default();
    let z = Fq::from_random_bytes(&p.z.to_bytes_le()).unwrap_or_default();
    // Projective to Jacobian: (xz, yz^2, z)
    G1Projective::new_unchecked(x * z, y * z * z, z)
}

fn g2_to_ark(p: &Projective<G2CurveCfg>) -> G2Projective {
    let read = |bytes: &[u8]| {
        let c0 = Fq::from_random_bytes(&bytes[..32]).unwrap_or_default();
        let c1 = Fq::from_random_bytes(&bytes[32..]).unwrap_or_default();
        Fq2::new(c0, c1)
    };
    let x = read(&p.x.to_bytes_le());
    let y = read(&p.y.to_bytes_le());
    let z = read(&p.z.to_bytes_le());
    G2Projective::new_unchecked(x * z, y * z * z, z)
}

impl DeviceBackend for IcicleBackend {
    type Ptr = IciclePtr;

    fn alloc(&self, bytes: usize) -> Result<IciclePtr, DeviceError> {
        if bytes == 0 {
            return Err(DeviceError::AllocationFailed(0));
        }
        Ok(self.insert(Slab::Raw(bytes)))
    }

    fn free(&self, ptr: IciclePtr) {
        if self.slabs.lock().unwrap().remove(&ptr.0).is_none() {
            tracing::warn!(?ptr, "free of unknown device pointer");
        }
    }

    fn copy_scalars_h2d(&self, dst: IciclePtr, src: &[Fr]) -> Result<(), DeviceError> {
        let device: Vec<ScalarField> = src.iter().map(scalar_from_ark).collect();
        let mut vec = DeviceVec::<ScalarField>::device_malloc(src.len())
            .map_err(|_| DeviceError::AllocationFailed(src.len() * 32))?;
        vec.copy_from_host(HostSlice::from_slice(&device))
            .map_err(|e| DeviceError::CopyFailed(format!("{e:?}")))?;
        self.slabs.lock().unwrap().insert(dst.0, Slab::Scalars(vec));
        Ok(())
    }

    fn copy_scalars_d2h(&self, dst: &mut [Fr], src: IciclePtr) -> Result<(), DeviceError> {
        let mut host = vec![ScalarField::zero(); dst.len()];
        {
            let slabs = self.slabs.lock().unwrap();
            let Some(Slab::Scalars(vec)) = slabs.get(&src.0) else {
                return Err(DeviceError::InvalidPointer(format!("{src:?}")));
            };
            vec.copy_to_host(HostSlice::from_mut_slice(&mut host))
                .map_err(|e| DeviceError::CopyFailed(format!("{e:?}")))?;
        }
        for (out, v) in dst.iter_mut().zip(&host) {
            *out = scalar_to_ark(v);
        }
        Ok(())
    }

    fn copy_g1_h2d(&self, dst: IciclePtr, src: &[G1Affine]) -> Result<(), DeviceError> {
        let device: Vec<Affine<CurveCfg>> = src.iter().map(g1_from_ark).collect();
        let mut vec = DeviceVec::<Affine<CurveCfg>>::device_malloc(src.len())
            .map_err(|_| DeviceError::AllocationFailed(src.len() * 64))?;
        vec.copy_from_host(HostSlice::from_slice(&device))
            .map_err(|e| DeviceError::CopyFailed(format!("{e:?}")))?;
        self.slabs.lock().unwrap().insert(dst.0, Slab::G1(vec));
        Ok(())
    }

    fn copy_g2_h2d(&self, dst: IciclePtr, src: &[G2Affine]) -> Result<(), DeviceError> {
        let device: Vec<Affine<G2CurveCfg>> = src.iter().map(g2_from_ark).collect();
        let mut vec = DeviceVec::<Affine<G2CurveCfg>>::device_malloc(src.len())
            .map_err(|_| DeviceError::AllocationFailed(src.len() * 128))?;
        vec.copy_from_host(HostSlice::from_slice(&device))
            .map_err(|e| DeviceError::CopyFailed(format!("{e:?}")))?;
        self.slabs.lock().unwrap().insert(dst.0, Slab::G2(vec));
        Ok(())
    }

    fn init_domain(&self, domain: &Domain) -> Result<(), DeviceError> {
        let root = scalar_from_ark(&domain.generator);
        initialize_domain(root, &NTTInitDomainConfig::default()).map_err(Self::kernel_err)?;
        *self.coset_gen.lock().unwrap() = Some((
            scalar_from_ark(&domain.coset_gen),
            scalar_from_ark(&domain.coset_gen.inverse().expect("coset generator is nonzero")),
        ));
        Ok(())
    }

    fn to_mont(&self, ptr: IciclePtr, _len: usize) -> Result<(), DeviceError> {
        let mut slabs = self.slabs.lock().unwrap();
        let Some(Slab::Scalars(vec)) = slabs.get_mut(&ptr.0) else {
            return Err(DeviceError::InvalidPointer(format!("{ptr:?}")));
        };
        let stream = IcicleStream::default();
        ScalarField::to_mont(vec, &stream).wrap().map_err(Self::kernel_err)
    }

    fn from_mont(&self, ptr: IciclePtr, _len: usize) -> Result<(), DeviceError> {
        let mut slabs = self.slabs.lock().unwrap();
        let Some(Slab::Scalars(vec)) = slabs.get_mut(&ptr.0) else {
            return Err(DeviceError::InvalidPointer(format!("{ptr:?}")));
        };
        let stream = IcicleStream::default();
        ScalarField::from_mont(vec, &stream).wrap().map_err(Self::kernel_err)
    }

    fn reverse_scalars(&self, ptr: IciclePtr, len: usize) -> Result<(), DeviceError> {
        if !len.is_power_of_two() {
            return Err(DeviceError::KernelStatus(-1));
        }
        let mut slabs = self.slabs.lock().unwrap();
        let Some(Slab::Scalars(vec)) = slabs.get_mut(&ptr.0) else {
            return Err(DeviceError::InvalidPointer(format!("{ptr:?}")));
        };
        bit_reverse_inplace(&mut vec[..], &VecOpsConfig::default()).map_err(Self::kernel_err)
    }

    fn generate_twiddles(
        &self,
        _n: usize,
        _log2n: u32,
        inverse: bool,
    ) -> Result<IciclePtr, DeviceError> {
        // The runtime caches twiddles per initialized domain; the handle only
        // records the transform direction.
        Ok(self.insert(Slab::Twiddles { inverse }))
    }

    fn interpolate(
        &self,
        values: IciclePtr,
        twiddles: IciclePtr,
        coset_powers: Option<IciclePtr>,
        n: usize,
    ) -> Result<IciclePtr, DeviceError> {
        let mut slabs = self.slabs.lock().unwrap();
        match slabs.get(&twiddles.0) {
            Some(Slab::Twiddles { inverse: true }) => {}
            Some(_) => return Err(DeviceError::TypeMismatch("twiddles", "inverse twiddles")),
            None => return Err(DeviceError::InvalidPointer(format!("{twiddles:?}"))),
        }
        let Some(Slab::Scalars(input)) = slabs.get(&values.0) else {
            return Err(DeviceError::InvalidPointer(format!("{values:?}")));
        };

        let mut cfg = NTTConfig::<ScalarField>::default();
        cfg.ordering = Ordering::kRN;
        if coset_powers.is_some() {
            let gens = self.coset_gen.lock().unwrap();
            let (_, gen_inv) = gens.ok_or(DeviceError::KernelStatus(-6))?;
            cfg.coset_gen = gen_inv;
        }

        let mut output = DeviceVec::<ScalarField>::device_malloc(n)
            .map_err(|_| DeviceError::AllocationFailed(n * 32))?;
        ntt(&input[..n], NTTDir::kInverse, &cfg, &mut output[..]).map_err(Self::kernel_err)?;
        drop(slabs);
        Ok(self.insert(Slab::Scalars(output)))
    }

    fn evaluate(
        &self,
        out: IciclePtr,
        coeffs: IciclePtr,
        twiddles: IciclePtr,
        coset_powers: Option<IciclePtr>,
        n: usize,
        _twiddle_len: usize,
    ) -> Result<(), DeviceError> {
        let mut slabs = self.slabs.lock().unwrap();
        match slabs.get(&twiddles.0) {
            Some(Slab::Twiddles { inverse: false }) => {}
            Some(_) => return Err(DeviceError::TypeMismatch("twiddles", "forward twiddles")),
            None => return Err(DeviceError::InvalidPointer(format!("{twiddles:?}"))),
        }
        let Some(Slab::Scalars(input)) = slabs.get(&coeffs.0) else {
            return Err(DeviceError::InvalidPointer(format!("{coeffs:?}")));
        };

        let mut cfg = NTTConfig::<ScalarField>::default();
        cfg.ordering = Ordering::kNR;
        if coset_powers.is_some() {
            let gens = self.coset_gen.lock().unwrap();
            let (gen, _) = gens.ok_or(DeviceError::KernelStatus(-6))?;
            cfg.coset_gen = gen;
        }

        let mut output = DeviceVec::<ScalarField>::device_malloc(n)
            .map_err(|_| DeviceError::AllocationFailed(n * 32))?;
        ntt(&input[..n], NTTDir::kForward, &cfg, &mut output[..]).map_err(Self::kernel_err)?;
        slabs.insert(out.0, Slab::Scalars(output));
        Ok(())
    }

    fn vec_mul(&self, a: IciclePtr, b: IciclePtr, n: usize) -> Result<(), DeviceError> {
        let mut slabs = self.slabs.lock().unwrap();
        let mut result = DeviceVec::<ScalarField>::device_malloc(n)
            .map_err(|_| DeviceError::AllocationFailed(n * 32))?;
        {
            let (Some(Slab::Scalars(lhs)), Some(Slab::Scalars(rhs))) =
                (slabs.get(&a.0), slabs.get(&b.0))
            else {
                return Err(DeviceError::InvalidPointer(format!("{a:?} / {b:?}")));
            };
            mul_scalars(&lhs[..n], &rhs[..n], &mut result[..], &VecOpsConfig::default())
                .map_err(Self::kernel_err)?;
        }
        slabs.insert(a.0, Slab::Scalars(result));
        Ok(())
    }

    fn vec_sub(&self, a: IciclePtr, b: IciclePtr, n: usize) -> Result<(), DeviceError> {
        let mut slabs = self.slabs.lock().unwrap();
        let mut result = DeviceVec::<ScalarField>::device_malloc(n)
            .map_err(|_| DeviceError::AllocationFailed(n * 32))?;
        {
            let (Some(Slab::Scalars(lhs)), Some(Slab::Scalars(rhs))) =
                (slabs.get(&a.0), slabs.get(&b.0))
            else {
                return Err(DeviceError::InvalidPointer(format!("{a:?} / {b:?}")));
            };
            sub_scalars(&lhs[..n], &rhs[..n], &mut result[..], &VecOpsConfig::default())
                .map_err(Self::kernel_err)?;
        }
        slabs.insert(a.0, Slab::Scalars(result));
        Ok(())
    }

    fn g1_msm(
        &self,
        scalars: IciclePtr,
        points: IciclePtr,
        n: usize,
        bucket_factor: usize,
    ) -> Result<G1Projective, DeviceError> {
        let slabs = self.slabs.lock().unwrap();
        let (Some(Slab::Scalars(scalars)), Some(Slab::G1(points))) =
            (slabs.get(&scalars.0), slabs.get(&points.0))
        else {
            return Err(DeviceError::InvalidPointer("msm operands".into()));
        };

        let mut stream = IcicleStream::create().map_err(Self::kernel_err)?;
        let mut cfg = MSMConfig::default();
        cfg.stream_handle = (&stream).into();
        cfg.are_scalars_montgomery_form = true;
        cfg.c = bucket_factor as i32;

        let mut result = DeviceVec::<Projective<CurveCfg>>::device_malloc(1)
            .map_err(|_| DeviceError::AllocationFailed(96))?;
        msm(&scalars[..n], &points[..n], &cfg, &mut result[..]).map_err(Self::kernel_err)?;

        let mut host = [Projective::<CurveCfg>::zero(); 1];
        result
            .copy_to_host(HostSlice::from_mut_slice(&mut host))
            .map_err(|e| DeviceError::CopyFailed(format!("{e:?}")))?;
        stream.synchronize().map_err(Self::kernel_err)?;
        stream.destroy().map_err(Self::kernel_err)?;
        Ok(g1_to_ark(&host[0]))
    }

    fn g2_msm(
        &self,
        scalars: IciclePtr,
        points: IciclePtr,
        n: usize,
        bucket_factor: usize,
    ) -> Result<G2Projective, DeviceError> {
        let slabs = self.slabs.lock().unwrap();
        let (Some(Slab::Scalars(scalars)), Some(Slab::G2(points))) =
            (slabs.get(&scalars.0), slabs.get(&points.0))
        else {
            return Err(DeviceError::InvalidPointer("msm operands".into()));
        };

        let mut stream = IcicleStream::create().map_err(Self::kernel_err)?;
        let mut cfg = MSMConfig::default();
        cfg.stream_handle = (&stream).into();
        cfg.are_scalars_montgomery_form = true;
        cfg.c = bucket_factor as i32;

        let mut result = DeviceVec::<Projective<G2CurveCfg>>::device_malloc(1)
            .map_err(|_| DeviceError::AllocationFailed(192))?;
        msm(&scalars[..n], &points[..n], &cfg, &mut result[..]).map_err(Self::kernel_err)?;

        let mut host = [Projective::<G2CurveCfg>::zero(); 1];
        result
            .copy_to_host(HostSlice::from_mut_slice(&mut host))
            .map_err(|e| DeviceError::CopyFailed(format!("{e:?}")))?;
        stream.synchronize().map_err(Self::kernel_err)?;
        stream.destroy().map_err(Self::kernel_err)?;
        Ok(g2_to_ark(&host[0]))
    }
}
