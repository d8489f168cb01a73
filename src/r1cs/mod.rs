//! Sparse rank-1 constraint system and its forward witness solver.
//!
//! A constraint enforces `<a, w> * <b, w> = <c, w>` over the wire vector
//! `w = [1, public.., secret.., internal..]`. The solver receives the public
//! and secret assignments, derives each internal wire from the first
//! constraint that determines it, and checks every remaining constraint. A
//! circuit that declares a committed wire installs a hint hook: the solver
//! pauses at that wire and asks the caller (the prover) for its value.

use ark_bn254::Fr;
use ark_ff::{AdditiveGroup, Field};

use crate::utils::errors::Groth16Error;

/// `sum_i coeff_i * w[wire_i]`.
#[derive(Debug, Clone, Default)]
pub struct LinearCombination(pub Vec<(Fr, usize)>);

impl LinearCombination {
    pub fn single(wire: usize) -> Self {
        Self(vec![(Fr::ONE, wire)])
    }

    pub fn terms(terms: &[(u64, usize)]) -> Self {
        Self(terms.iter().map(|&(c, w)| (Fr::from(c), w)).collect())
    }

    fn eval_known(&self, w: &[Option<Fr>]) -> Option<Fr> {
        let mut acc = Fr::ZERO;
        for (coeff, wire) in &self.0 {
            acc += *coeff * w[*wire]?;
        }
        Some(acc)
    }

    /// Splits into the known part and the single unknown term, if exactly one
    /// wire is unsolved.
    fn split_unknown(&self, w: &[Option<Fr>]) -> UnknownSplit {
        let mut known = Fr::ZERO;
        let mut unknown: Option<(Fr, usize)> = None;
        for (coeff, wire) in &self.0 {
            match w[*wire] {
                Some(v) => known += *coeff * v,
                None if unknown.is_some() => return UnknownSplit::Many,
                None => unknown = Some((*coeff, *wire)),
            }
        }
        match unknown {
            None => UnknownSplit::AllKnown(known),
            Some((coeff, wire)) => UnknownSplit::One { known, coeff, wire },
        }
    }
}

enum UnknownSplit {
    AllKnown(Fr),
    One { known: Fr, coeff: Fr, wire: usize },
    Many,
}

#[derive(Debug, Clone)]
pub struct Constraint {
    pub a: LinearCombination,
    pub b: LinearCombination,
    pub c: LinearCombination,
}

/// Which wires feed the Pedersen commitment and which wire carries its
/// hash-derived value.
#[derive(Debug, Clone)]
pub struct CommitmentInfo {
    /// Committed wire ids, public wires first, each strictly increasing.
    pub committed_wires: Vec<usize>,
    pub nb_public_committed: usize,
    /// Internal wire solved by the commitment hook.
    pub commitment_wire: usize,
}

impl CommitmentInfo {
    pub fn nb_committed(&self) -> usize {
        self.committed_wires.len()
    }

    pub fn nb_private_committed(&self) -> usize {
        self.committed_wires.len() - self.nb_public_committed
    }

    /// Wires that leave the private K multi-exp: the committed private wires
    /// (folded into the commitment) and the commitment wire itself (solved by
    /// the verifier). Sorted ascending.
    pub fn private_to_public(&self) -> Vec<usize> {
        let mut wires: Vec<usize> =
            self.committed_wires[self.nb_public_committed..].to_vec();
        wires.push(self.commitment_wire);
        wires.sort_unstable();
        wires
    }
}

#[derive(Debug, Clone)]
pub struct R1cs {
    /// Number of public wires, counting the constant-one wire.
    pub nb_public: usize,
    pub nb_secret: usize,
    pub nb_internal: usize,
    pub constraints: Vec<Constraint>,
    pub commitment: Option<CommitmentInfo>,
}

/// Solver output: the full wire vector and the per-constraint evaluation
/// vectors the quotient pipeline consumes.
#[derive(Debug, Clone)]
pub struct Solution {
    pub w: Vec<Fr>,
    pub a: Vec<Fr>,
    pub b: Vec<Fr>,
    pub c: Vec<Fr>,
}

impl R1cs {
    pub fn new(nb_public_inputs: usize, nb_secret: usize) -> Self {
        Self {
            nb_public: nb_public_inputs + 1,
            nb_secret,
            nb_internal: 0,
            constraints: Vec::new(),
            commitment: None,
        }
    }

    pub fn nb_wires(&self) -> usize {
        self.nb_public + self.nb_secret + self.nb_internal
    }

    /// Wire id of the constant-one wire.
    pub fn one_wire(&self) -> usize {
        0
    }

    pub fn public_wire(&self, i: usize) -> usize {
        1 + i
    }

    pub fn secret_wire(&self, i: usize) -> usize {
        self.nb_public + i
    }

    pub fn new_internal_wire(&mut self) -> usize {
        let wire = self.nb_wires();
        self.nb_internal += 1;
        wire
    }

    pub fn enforce(&mut self, a: LinearCombination, b: LinearCombination, c: LinearCombination) {
        self.constraints.push(Constraint { a, b, c });
    }

    /// Declares `wires` committed and allocates the internal wire the
    /// commitment hook solves. Call before adding constraints that use the
    /// returned wire.
    pub fn declare_commitment(
        &mut self,
        wires: Vec<usize>,
        nb_public_committed: usize,
    ) -> usize {
        let commitment_wire = self.new_internal_wire();
        self.commitment = Some(CommitmentInfo {
            committed_wires: wires,
            nb_public_committed,
            commitment_wire,
        });
        commitment_wire
    }

    /// Solves the system from the public and secret assignment
    /// `[public[1..], secret..]`. The hook is consulted once, at the
    /// committed wire, when a commitment is declared.
    pub fn solve(
        &self,
        witness: &[Fr],
        mut hook: Option<&mut dyn FnMut(&[Fr]) -> Result<Fr, Groth16Error>>,
    ) -> Result<Solution, Groth16Error> {
        let expected = self.nb_public - 1 + self.nb_secret;
        if witness.len() != expected {
            return Err(Groth16Error::Solver(format!(
                "witness holds {} values, circuit needs {expected}",
                witness.len()
            )));
        }

        let mut w: Vec<Option<Fr>> = vec![None; self.nb_wires()];
        w[0] = Some(Fr::ONE);
        for (i, v) in witness.iter().enumerate() {
            w[1 + i] = Some(*v);
        }

        if let Some(info) = &self.commitment {
            let hook = hook.as_mut().ok_or_else(|| {
                Groth16Error::Solver("circuit commits a wire but no hook is installed".into())
            })?;
            let mut committed = Vec::with_capacity(info.nb_committed());
            for &wire in &info.committed_wires {
                committed.push(w[wire].ok_or_else(|| {
                    Groth16Error::Solver(format!("committed wire {wire} is not an input"))
                })?);
            }
            w[info.commitment_wire] = Some(hook(&committed)?);
        }

        let mut a_evals = Vec::with_capacity(self.constraints.len());
        let mut b_evals = Vec::with_capacity(self.constraints.len());
        let mut c_evals = Vec::with_capacity(self.constraints.len());

        for (i, constraint) in self.constraints.iter().enumerate() {
            let (a, b, c) = self.solve_constraint(i, constraint, &mut w)?;
            a_evals.push(a);
            b_evals.push(b);
            c_evals.push(c);
        }

        if let Some(unsolved) = w.iter().position(|v| v.is_none()) {
            return Err(Groth16Error::Solver(format!(
                "wire {unsolved} is not determined by any constraint"
            )));
        }

        Ok(Solution {
            w: w.into_iter().map(|v| v.expect("all wires solved")).collect(),
            a: a_evals,
            b: b_evals,
            c: c_evals,
        })
    }

    fn solve_constraint(
        &self,
        index: usize,
        constraint: &Constraint,
        w: &mut Vec<Option<Fr>>,
    ) -> Result<(Fr, Fr, Fr), Groth16Error> {
        let a = constraint.a.eval_known(w);
        let b = constraint.b.eval_known(w);
        let c = constraint.c.eval_known(w);

        match (a, b, c) {
            (Some(a), Some(b), Some(c)) => {
                if a * b != c {
                    return Err(Groth16Error::Solver(format!(
                        "constraint #{index} is not satisfied"
                    )));
                }
                Ok((a, b, c))
            }
            (Some(a), Some(b), None) => {
                // Solve the single unknown wire on the C side.
                match constraint.c.split_unknown(w) {
                    UnknownSplit::One { known, coeff, wire } => {
                        let inv = coeff.inverse().ok_or_else(|| {
                            Groth16Error::Solver(format!(
                                "constraint #{index} has a zero coefficient on its output wire"
                            ))
                        })?;
                        w[wire] = Some((a * b - known) * inv);
                        Ok((a, b, a * b))
                    }
                    _ => Err(Groth16Error::Solver(format!(
                        "constraint #{index} leaves more than one wire unsolved"
                    ))),
                }
            }
            (None, Some(b), Some(c)) => {
                match constraint.a.split_unknown(w) {
                    UnknownSplit::One { known, coeff, wire } => {
                        let inv = (coeff * b).inverse().ok_or_else(|| {
                            Groth16Error::Solver(format!(
                                "constraint #{index} cannot be solved, b side is zero"
                            ))
                        })?;
                        w[wire] = Some((c - known * b) * inv);
                        let a = constraint.a.eval_known(w).expect("just solved");
                        Ok((a, b, c))
                    }
                    _ => Err(Groth16Error::Solver(format!(
                        "constraint #{index} leaves more than one wire unsolved"
                    ))),
                }
            }
            (Some(a), None, Some(c)) => {
                match constraint.b.split_unknown(w) {
                    UnknownSplit::One { known, coeff, wire } => {
                        let denom = coeff * a;
                        let inv = denom.inverse().ok_or_else(|| {
                            Groth16Error::Solver(format!(
                                "constraint #{index} cannot be solved, a side is zero"
                            ))
                        })?;
                        w[wire] = Some((c - known * a) * inv);
                        let b = constraint
                            .b
                            .eval_known(w)
                            .expect("just solved");
                        Ok((a, b, c))
                    }
                    _ => Err(Groth16Error::Solver(format!(
                        "constraint #{index} leaves more than one wire unsolved"
                    ))),
                }
            }
            _ => Err(Groth16Error::Solver(format!(
                "constraint #{index} leaves more than one side unsolved"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// x * y = z with z derived as an internal wire, then exposed through a
    /// public equality constraint.
    fn mul_circuit() -> R1cs {
        let mut cs = R1cs::new(1, 2);
        let z_pub = cs.public_wire(0);
        let x = cs.secret_wire(0);
        let y = cs.secret_wire(1);
        let z = cs.new_internal_wire();
        cs.enforce(
            LinearCombination::single(x),
            LinearCombination::single(y),
            LinearCombination::single(z),
        );
        cs.enforce(
            LinearCombination::single(z),
            LinearCombination::single(cs.one_wire()),
            LinearCombination::single(z_pub),
        );
        cs
    }

    #[test]
    fn solves_internal_wires_forward() {
        let cs = mul_circuit();
        let witness = [Fr::from(15u64), Fr::from(3u64), Fr::from(5u64)];
        let solution = cs.solve(&witness, None).unwrap();
        assert_eq!(solution.w.len(), cs.nb_wires());
        assert_eq!(solution.w[cs.nb_public + 2], Fr::from(15u64));
        assert_eq!(solution.a.len(), cs.constraints.len());
        for i in 0..cs.constraints.len() {
            assert_eq!(solution.a[i] * solution.b[i], solution.c[i]);
        }
    }

    #[test]
    fn rejects_unsatisfied_constraints() {
        let cs = mul_circuit();
        let witness = [Fr::from(16u64), Fr::from(3u64), Fr::from(5u64)];
        assert!(matches!(
            cs.solve(&witness, None),
            Err(Groth16Error::Solver(_))
        ));
    }

    #[test]
    fn rejects_short_witness() {
        let cs = mul_circuit();
        let witness = [Fr::from(15u64)];
        assert!(matches!(
            cs.solve(&witness, None),
            Err(Groth16Error::Solver(_))
        ));
    }

    #[test]
    fn commitment_hook_fills_the_committed_wire() {
        let mut cs = R1cs::new(0, 2);
        let x = cs.secret_wire(0);
        let y = cs.secret_wire(1);
        let cm = cs.declare_commitment(vec![x, y], 0);
        let out = cs.new_internal_wire();
        cs.enforce(
            LinearCombination::single(cm),
            LinearCombination::single(cs.one_wire()),
            LinearCombination::single(out),
        );

        let witness = [Fr::from(7u64), Fr::from(9u64)];
        let mut seen = Vec::new();
        let mut hook = |values: &[Fr]| {
            seen = values.to_vec();
            Ok(Fr::from(42u64))
        };
        let solution = cs.solve(&witness, Some(&mut hook)).unwrap();
        assert_eq!(seen, vec![Fr::from(7u64), Fr::from(9u64)]);
        assert_eq!(solution.w[cm], Fr::from(42u64));
        assert_eq!(solution.w[out], Fr::from(42u64));
    }

    #[test]
    fn commitment_without_hook_is_an_error() {
        let mut cs = R1cs::new(0, 1);
        let x = cs.secret_wire(0);
        let cm = cs.declare_commitment(vec![x], 0);
        let out = cs.new_internal_wire();
        cs.enforce(
            LinearCombination::single(cm),
            LinearCombination::single(cs.one_wire()),
            LinearCombination::single(out),
        );
        assert!(cs.solve(&[Fr::from(1u64)], None).is_err());
    }
}
