use ark_bn254::Fr;
use criterion::{criterion_group, criterion_main, Criterion};
use rand_core::SeedableRng;

use groth16_gpu::gpu::CpuBackend;
use groth16_gpu::r1cs::{LinearCombination, R1cs};
use groth16_gpu::{prove, setup, verify, ProverOptions};

/// Squaring chain with `n - 1` internal constraints and one public binding.
fn chain_circuit(n: usize) -> (R1cs, Vec<Fr>, Fr) {
    let mut cs = R1cs::new(1, 1);
    let out = cs.public_wire(0);
    let x = cs.secret_wire(0);
    let mut prev = x;
    for _ in 0..n - 1 {
        let next = cs.new_internal_wire();
        cs.enforce(
            LinearCombination::single(prev),
            LinearCombination::single(prev),
            LinearCombination::single(next),
        );
        prev = next;
    }
    cs.enforce(
        LinearCombination::single(prev),
        LinearCombination::single(cs.one_wire()),
        LinearCombination::single(out),
    );

    let seed = Fr::from(3u64);
    let mut value = seed;
    for _ in 0..n - 1 {
        value = value * value;
    }
    (cs, vec![value, seed], value)
}

fn bench_prove(c: &mut Criterion) {
    let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(0);
    let backend = CpuBackend::new();

    for log_n in [8u32, 10] {
        let n = 1usize << log_n;
        let (cs, witness, public) = chain_circuit(n);
        let (pk, vk) = setup(&cs, &mut rng).unwrap();

        let proof = prove(&cs, &pk, &witness, &ProverOptions::default(), &backend).unwrap();
        verify(&proof, &vk, &[public]).unwrap();

        c.bench_function(&format!("prove/2^{log_n}"), |b| {
            b.iter(|| prove(&cs, &pk, &witness, &ProverOptions::default(), &backend).unwrap())
        });
        c.bench_function(&format!("verify/2^{log_n}"), |b| {
            b.iter(|| verify(&proof, &vk, &[public]).unwrap())
        });
    }
}

criterion_group!(benches, bench_prove);
criterion_main!(benches);
