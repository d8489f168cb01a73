//! Prover orchestration: witness solving (with the commitment hook
//! installed), the H pipeline, the wire-value filters, the four MSM launches,
//! and the final blinded combination.
//!
//! The H task and the two filter tasks run concurrently and report over
//! one-shot channels; awaiting the H channel is the single synchronization
//! before the Krs launches. The G1 MSMs run sequentially against the shared
//! device context while the G2 term runs on the host unless configured onto
//! the device. No partial proof is ever emitted: any task error drains the
//! remaining channels and every device buffer is released by its guard.

use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use ark_bn254::{Fr, G1Affine, G1Projective, G2Projective};
use ark_ec::CurveGroup;
use ark_ff::UniformRand;
use ark_std::Zero;
use rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;

use super::commitment::solve_commitment_wire;
use super::keys::{Proof, ProvingKey};
use super::quotient::compute_h;
use crate::field::batch_scalar_mul_g1;
use crate::gpu::{DeviceBackend, DeviceBuffer};
use crate::msm::{self, filter_indexes, filter_infinity};
use crate::r1cs::{R1cs, Solution};
use crate::utils::errors::Groth16Error;

/// Where the blinding scalars r and s come from. `Seeded` exists for tests
/// that need byte-identical proofs; production callers use `Secure`.
#[derive(Debug, Clone, Copy)]
pub enum RandomnessSource {
    Secure,
    Seeded([u8; 32]),
}

#[derive(Debug, Clone)]
pub struct ProverOptions {
    pub randomness: RandomnessSource,
    pub device_id: usize,
    /// Opaque MSM tuning knob, forwarded to the backend untouched.
    pub bucket_factor: usize,
    /// Runs the Bs G2 term through the backend instead of the host MSM.
    pub g2_msm_on_device: bool,
}

impl Default for ProverOptions {
    fn default() -> Self {
        Self {
            randomness: RandomnessSource::Secure,
            device_id: 0,
            bucket_factor: 0,
            g2_msm_on_device: false,
        }
    }
}

fn channel_lost(_: impl std::fmt::Debug) -> Groth16Error {
    Groth16Error::Solver("a prover task stopped without reporting".into())
}

fn g1_msm_launch<B: DeviceBackend>(
    backend: &B,
    label: &str,
    bases: &[G1Affine],
    scalars: &[Fr],
    bucket_factor: usize,
) -> Result<G1Projective, Groth16Error> {
    if bases.len() != scalars.len() {
        return Err(Groth16Error::InvalidWitnessSize(bases.len(), scalars.len()));
    }
    if bases.is_empty() {
        return Ok(G1Projective::zero());
    }
    let points_d = DeviceBuffer::from_g1_points(backend, bases)?;
    let scalars_d = DeviceBuffer::from_scalars(backend, scalars)?;
    let start = Instant::now();
    let result = backend
        .g1_msm(scalars_d.ptr(), points_d.ptr(), scalars.len(), bucket_factor)
        .map_err(Groth16Error::Msm)?;
    tracing::debug!(took = ?start.elapsed(), n = scalars.len(), label, "g1 msm");
    Ok(result)
}

/// Generates a proof for the given solved assignment `[public[1..],
/// secret..]` (canonical Fr values).
#[tracing::instrument(skip_all, name = "groth16::prove", fields(nb_constraints = r1cs.constraints.len()))]
pub fn prove<B: DeviceBackend>(
    r1cs: &R1cs,
    pk: &ProvingKey,
    witness: &[Fr],
    opts: &ProverOptions,
    backend: &B,
) -> Result<Proof, Groth16Error> {
    let start = Instant::now();

    // Solve the witness. When the circuit commits wires, the solver pauses at
    // the committed wire and the hook below commits, stores the commitment
    // for the proof, and hands back the hash-derived wire value. This runs
    // before any MSM is launched.
    let mut commitment_slot: Option<(G1Affine, G1Affine)> = None;
    let solution = match (&r1cs.commitment, &pk.commitment_key) {
        (Some(info), Some(ck)) => {
            let nb_public_committed = info.nb_public_committed;
            let slot = &mut commitment_slot;
            let mut hook = |values: &[Fr]| -> Result<Fr, Groth16Error> {
                let (public_vals, private_vals) = values.split_at(nb_public_committed);
                let (c, pok) = ck.commit(private_vals)?;
                *slot = Some((c, pok));
                Ok(solve_commitment_wire(&c, public_vals))
            };
            r1cs.solve(witness, Some(&mut hook))?
        }
        (Some(_), None) => {
            return Err(Groth16Error::Solver(
                "circuit commits a wire but the proving key has no commitment key".into(),
            ))
        }
        _ => r1cs.solve(witness, None)?,
    };
    let Solution {
        w: wire_values,
        a: a_evals,
        b: b_evals,
        c: c_evals,
    } = solution;

    // Blinding randomness, sampled before the delta batch multiplication.
    let mut rng = match opts.randomness {
        RandomnessSource::Secure => ChaCha20Rng::from_entropy(),
        RandomnessSource::Seeded(seed) => ChaCha20Rng::from_seed(seed),
    };
    let r = Fr::rand(&mut rng);
    let s = Fr::rand(&mut rng);
    let kr = -(r * s);
    let deltas = batch_scalar_mul_g1(&pk.g1.delta, &[r, s, kr]);

    thread::scope(|scope| -> Result<Proof, Groth16Error> {
        // H pipeline on its own task; the channel carries the device buffer.
        let (h_tx, h_rx) = mpsc::channel();
        {
            let domain = &pk.domain;
            scope.spawn(move || {
                let _ = h_tx.send(compute_h(backend, a_evals, b_evals, c_evals, domain));
            });
        }

        // Wire filters, one task each. The B filter feeds both Bs legs.
        let (a_tx, a_rx) = mpsc::channel();
        {
            let (wire_values, infinity_a) = (&wire_values, &pk.infinity_a);
            scope.spawn(move || {
                let _ = a_tx.send(filter_infinity(wire_values, infinity_a));
            });
        }
        let (b_tx, b_rx) = mpsc::channel();
        let (b2_tx, b2_rx) = mpsc::channel();
        {
            let (wire_values, infinity_b) = (&wire_values, &pk.infinity_b);
            scope.spawn(move || {
                let filtered = filter_infinity(wire_values, infinity_b);
                let _ = b2_tx.send(filtered.clone());
                let _ = b_tx.send(filtered);
            });
        }

        // Host-side G2 leg, overlapping the G1 sequence below.
        let bs2_host_rx = if opts.g2_msm_on_device {
            None
        } else {
            let (tx, rx) = mpsc::channel();
            let g2_bases = &pk.g2.b;
            scope.spawn(move || {
                let Ok(values) = b2_rx.recv() else { return };
                let start = Instant::now();
                let result = msm::msm::<G2Projective>(g2_bases, &values, None);
                tracing::debug!(took = ?start.elapsed(), "g2 msm on host");
                let _ = tx.send(result);
            });
            Some(rx)
        };

        // Await the filters and check the filtering invariant.
        let wire_values_a = a_rx.recv().map_err(channel_lost)?;
        if wire_values_a.len() != wire_values.len() - pk.nb_infinity_a {
            return Err(Groth16Error::InvalidWitnessSize(
                wire_values.len() - pk.nb_infinity_a,
                wire_values_a.len(),
            ));
        }
        let wire_values_b = b_rx.recv().map_err(channel_lost)?;
        if wire_values_b.len() != wire_values.len() - pk.nb_infinity_b {
            return Err(Groth16Error::InvalidWitnessSize(
                wire_values.len() - pk.nb_infinity_b,
                wire_values_b.len(),
            ));
        }

        // The single H join, then the sequential G1 launches.
        let h = h_rx.recv().map_err(channel_lost)??;

        let bs1_msm = g1_msm_launch(backend, "bs1", &pk.g1.b, &wire_values_b, opts.bucket_factor)?;
        let ar_msm = g1_msm_launch(backend, "ar1", &pk.g1.a, &wire_values_a, opts.bucket_factor)?;

        // Krs2 consumes the H coefficients already on device; deg(H) = n - 2.
        let size_h = pk.domain.cardinality - 1;
        let krs2 = {
            let z_points = DeviceBuffer::from_g1_points(backend, &pk.g1.z)?;
            let start = Instant::now();
            let result = backend
                .g1_msm(h.ptr(), z_points.ptr(), size_h, opts.bucket_factor)
                .map_err(Groth16Error::Msm)?;
            tracing::debug!(took = ?start.elapsed(), n = size_h, "krs2 msm");
            result
        };
        drop(h);

        // Krs over the private K bases, committed entries removed.
        let to_remove = r1cs
            .commitment
            .as_ref()
            .map(|info| info.private_to_public())
            .unwrap_or_default();
        let krs_wires = filter_indexes(&wire_values, &to_remove);
        let krs_msm = g1_msm_launch(
            backend,
            "krs",
            &pk.g1.k,
            &krs_wires[r1cs.nb_public..],
            opts.bucket_factor,
        )?;

        // Bs on G2.
        let bs2 = match bs2_host_rx {
            Some(rx) => rx.recv().map_err(channel_lost)??,
            None => {
                if pk.g2.b.len() != wire_values_b.len() {
                    return Err(Groth16Error::InvalidWitnessSize(
                        pk.g2.b.len(),
                        wire_values_b.len(),
                    ));
                }
                let points_d = DeviceBuffer::from_g2_points(backend, &pk.g2.b)?;
                let scalars_d = DeviceBuffer::from_scalars(backend, &wire_values_b)?;
                backend
                    .g2_msm(
                        scalars_d.ptr(),
                        points_d.ptr(),
                        wire_values_b.len(),
                        opts.bucket_factor,
                    )
                    .map_err(Groth16Error::Msm)?
            }
        };

        // Final combination.
        let mut ar = ar_msm;
        ar += &pk.g1.alpha;
        ar += &deltas[0];

        let mut bs1 = bs1_msm;
        bs1 += &pk.g1.beta;
        bs1 += &deltas[1];

        let mut bs = bs2;
        bs += pk.g2.delta * s;
        bs += &pk.g2.beta;

        let mut krs = krs_msm;
        krs += &deltas[2];
        krs += krs2;
        krs += ar * s;
        krs += bs1 * r;

        Ok(Proof {
            ar: ar.into_affine(),
            bs: bs.into_affine(),
            krs: krs.into_affine(),
            commitment: commitment_slot.map(|(c, _)| c),
            commitment_pok: commitment_slot.map(|(_, pok)| pok),
        })
    })
    .inspect(|_| tracing::debug!(took = ?start.elapsed(), "prover done"))
}
