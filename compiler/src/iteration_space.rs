// iteration_space.rs — Per-operation iteration spaces
//
// Maps each operation's logical domain to its named loop ordering. The
// iteration space of an annotated operation lists its named loops first,
// then one trailing position per domain dimension not covered by a loop.
// Operations without a `loop_nest` annotation have no named loops and are
// not fully specified unless their domain is empty.
//
// Preconditions: loop annotations reference in-range domain dimensions
//                (loop fusion reports violations).
// Postconditions: `get` answers for every operation of the program.
// Failure modes: none.
// Side effects: none.

use crate::ir::{OpId, Program};
use crate::mapping::{Mapping, MappingExpr};

// ── Iteration space ─────────────────────────────────────────────────────────

/// An operation's position in the loop structure of the program.
#[derive(Debug, Clone)]
pub struct IterationSpace {
    loop_names: Vec<String>,
    /// Op domain -> iteration space (named loops first, then uncovered
    /// domain dimensions in domain order).
    mapping: Mapping,
    fully_specified: bool,
}

impl IterationSpace {
    pub fn loop_names(&self) -> &[String] {
        &self.loop_names
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn num_loops(&self) -> usize {
        self.loop_names.len()
    }

    /// Whether every domain dimension is covered by a named loop.
    pub fn fully_specified(&self) -> bool {
        self.fully_specified
    }

    /// Number of leading loops shared with `other`, by name and position.
    pub fn num_common_loops(&self, other: &IterationSpace) -> usize {
        self.num_common_loops_with(other.loop_names())
    }

    /// Number of leading loops shared with an explicit loop-name sequence.
    pub fn num_common_loops_with(&self, names: &[String]) -> usize {
        self.loop_names
            .iter()
            .zip(names)
            .take_while(|(a, b)| a == b)
            .count()
    }
}

// ── Analysis ────────────────────────────────────────────────────────────────

/// Iteration spaces for every operation of one program.
#[derive(Debug)]
pub struct IterationSpaceAnalysis {
    spaces: Vec<IterationSpace>,
}

impl IterationSpaceAnalysis {
    pub fn new(program: &Program) -> Self {
        let spaces = program
            .op_ids()
            .map(|op_id| Self::compute(program, op_id))
            .collect();
        Self { spaces }
    }

    fn compute(program: &Program, op_id: OpId) -> IterationSpace {
        let op = program.op(op_id);
        let domain_size = op.domain.len();
        let Some(loop_nest) = &op.loop_nest else {
            return IterationSpace {
                loop_names: Vec::new(),
                mapping: Mapping::identity(domain_size),
                fully_specified: domain_size == 0,
            };
        };

        let mut loop_names = Vec::with_capacity(loop_nest.len());
        let mut exprs = Vec::with_capacity(loop_nest.len());
        let mut steps_per_dim: Vec<Vec<u64>> = vec![Vec::new(); domain_size];
        for attr in loop_nest {
            loop_names.push(attr.name.clone());
            if attr.dimension >= domain_size {
                exprs.push(MappingExpr::None);
                continue;
            }
            let steps = &mut steps_per_dim[attr.dimension];
            steps.push(attr.step);
            if steps.len() == 1 && attr.step == 1 {
                exprs.push(MappingExpr::Dim(attr.dimension));
            } else {
                exprs.push(MappingExpr::Stripe {
                    operand: Box::new(MappingExpr::Dim(attr.dimension)),
                    factors: steps.clone(),
                });
            }
        }

        // Domain dimensions no loop iterates keep trailing positions.
        let covered = Mapping::new(domain_size, exprs.clone()).dependency_mask();
        for (dim, is_covered) in covered.iter().enumerate() {
            if !is_covered {
                exprs.push(MappingExpr::Dim(dim));
            }
        }
        let fully_specified = exprs.len() == loop_names.len();

        IterationSpace {
            loop_names,
            mapping: Mapping::new(domain_size, exprs),
            fully_specified,
        }
    }

    pub fn get(&self, op: OpId) -> &IterationSpace {
        &self.spaces[op.index()]
    }

    /// Re-expresses `mapping` (from `to`'s domain to `from`'s domain) as a
    /// mapping between the two operations' iteration spaces.
    pub fn translate_mapping(&self, from: OpId, to: OpId, mapping: &Mapping) -> Mapping {
        let from_space = self.get(from);
        let to_space = self.get(to);
        to_space
            .mapping
            .inverse()
            .compose(mapping)
            .compose(&from_space.mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ElementType, LoopAttr, OpKind, ProgramBuilder};

    #[test]
    fn annotated_op_is_fully_specified() {
        let mut b = ProgramBuilder::new();
        let d0 = b.static_range(8);
        let v = b
            .op(OpKind::Compute { name: "f".into() })
            .domain(&[d0])
            .loop_nest(vec![LoopAttr::new("i", 0)])
            .results(&[(ElementType::F32, 1)])
            .build()[0];
        let program = b.finish();
        let spaces = IterationSpaceAnalysis::new(&program);

        let space = spaces.get(program.defining_op(v));
        assert!(space.fully_specified());
        assert_eq!(space.loop_names(), &["i".to_string()]);
        assert_eq!(space.mapping(), &Mapping::identity(1));
    }

    #[test]
    fn uncovered_dimensions_trail_the_named_loops() {
        let mut b = ProgramBuilder::new();
        let d0 = b.static_range(8);
        let d1 = b.static_range(4);
        let v = b
            .op(OpKind::Compute { name: "f".into() })
            .domain(&[d0, d1])
            .loop_nest(vec![LoopAttr::new("i", 1)])
            .results(&[(ElementType::F32, 2)])
            .build()[0];
        let program = b.finish();
        let spaces = IterationSpaceAnalysis::new(&program);

        let space = spaces.get(program.defining_op(v));
        assert!(!space.fully_specified());
        assert_eq!(space.num_loops(), 1);
        // Loop "i" iterates d1; d0 keeps the trailing position.
        assert_eq!(
            space.mapping(),
            &Mapping::new(2, vec![MappingExpr::Dim(1), MappingExpr::Dim(0)])
        );
    }

    #[test]
    fn common_loops_match_positionally() {
        let mut b = ProgramBuilder::new();
        let d0 = b.static_range(8);
        let d1 = b.static_range(4);
        let a = b
            .op(OpKind::Compute { name: "a".into() })
            .domain(&[d0, d1])
            .loop_nest(vec![LoopAttr::new("i", 0), LoopAttr::new("j", 1)])
            .results(&[(ElementType::F32, 2)])
            .build()[0];
        let c = b
            .op(OpKind::Compute { name: "b".into() })
            .domain(&[d0])
            .loop_nest(vec![LoopAttr::new("i", 0)])
            .results(&[(ElementType::F32, 1)])
            .build()[0];
        let program = b.finish();
        let spaces = IterationSpaceAnalysis::new(&program);

        let a_space = spaces.get(program.defining_op(a));
        let b_space = spaces.get(program.defining_op(c));
        assert_eq!(a_space.num_common_loops(b_space), 1);
        assert_eq!(b_space.num_common_loops(a_space), 1);
    }

    #[test]
    fn translate_mapping_round_trips_shared_loops() {
        let mut b = ProgramBuilder::new();
        let d0 = b.static_range(8);
        let v = b
            .op(OpKind::Compute { name: "p".into() })
            .domain(&[d0])
            .loop_nest(vec![LoopAttr::new("i", 0)])
            .results(&[(ElementType::F32, 1)])
            .build()[0];
        let u = b
            .op(OpKind::Compute { name: "c".into() })
            .domain(&[d0])
            .loop_nest(vec![LoopAttr::new("i", 0)])
            .operand(v, Mapping::identity(1))
            .results(&[(ElementType::F32, 1)])
            .build()[0];
        let program = b.finish();
        let spaces = IterationSpaceAnalysis::new(&program);

        let translated = spaces.translate_mapping(
            program.defining_op(v),
            program.defining_op(u),
            &Mapping::identity(1),
        );
        assert_eq!(translated, Mapping::identity(1));
    }
}
