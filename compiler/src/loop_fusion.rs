// loop_fusion.rs — Loop fusion analysis
//
// Loops with the same name across operations are fused into one loop. This
// analysis records, per loop name, the dimension value it iterates and its
// stripe step, and answers `get_loop_nest`: the ordered domain a sequence of
// fused loops spans, together with the mapping from that domain to loop
// positions.
//
// Preconditions: the program's `loop_nest` annotations reference in-range
//                domain dimensions.
// Postconditions: every annotated loop name resolves to exactly one
//                 (dimension value, step) pair.
// Failure modes: same-named loops that disagree on dimension or step (E0601).
// Side effects: none.

use std::collections::HashMap;

use crate::diag::{codes, Diagnostic};
use crate::ir::{Program, Span, ValueAccess, ValueId};
use crate::mapping::{Mapping, MappingExpr};

// ── Loop nests ──────────────────────────────────────────────────────────────

/// The domain spanned by an ordered sequence of fused loops.
#[derive(Debug, Clone)]
pub struct LoopNest {
    /// Ordered dimension accesses; mappings are expressed over the loop
    /// positions of the nest.
    pub domain: Vec<ValueAccess>,
    /// Mapping from `domain` to loop positions: one expression per loop.
    pub domain_to_loops: Mapping,
}

// ── Analysis ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct LoopInfo {
    dimension: ValueId,
    rank: usize,
    step: u64,
    span: Span,
}

/// Per-program registry of fused loops.
#[derive(Debug)]
pub struct LoopFusionAnalysis {
    loops: HashMap<String, LoopInfo>,
}

impl LoopFusionAnalysis {
    pub fn new(program: &Program) -> Result<Self, Vec<Diagnostic>> {
        let mut loops: HashMap<String, LoopInfo> = HashMap::new();
        let mut diagnostics = Vec::new();

        for op_id in program.op_ids() {
            let op = program.op(op_id);
            let Some(loop_nest) = &op.loop_nest else {
                continue;
            };
            for attr in loop_nest {
                let Some(&dimension) = op.domain.get(attr.dimension) else {
                    diagnostics.push(Diagnostic::error(
                        codes::E0601,
                        op.span,
                        format!(
                            "loop \"{}\" references dimension {} outside the operation domain",
                            attr.name, attr.dimension
                        ),
                    ));
                    continue;
                };
                let rank = program.value(dimension).rank;
                match loops.get(&attr.name) {
                    None => {
                        loops.insert(
                            attr.name.clone(),
                            LoopInfo {
                                dimension,
                                rank,
                                step: attr.step,
                                span: op.span,
                            },
                        );
                    }
                    Some(existing) => {
                        if existing.dimension != dimension || existing.step != attr.step {
                            diagnostics.push(
                                Diagnostic::error(
                                    codes::E0601,
                                    op.span,
                                    format!(
                                        "loop \"{}\" iterates a different dimension or step \
                                         than its previous occurrence",
                                        attr.name
                                    ),
                                )
                                .with_related(existing.span, "previous occurrence here"),
                            );
                        }
                    }
                }
            }
        }

        if diagnostics.is_empty() {
            Ok(Self { loops })
        } else {
            Err(diagnostics)
        }
    }

    /// The ordered loop-nest domain spanned by `names`. Strip-mined loops on
    /// the same dimension share one domain entry and map through stripe
    /// expressions of increasing depth.
    pub fn get_loop_nest(&self, names: &[String]) -> LoopNest {
        let num_loops = names.len();
        let mut domain: Vec<ValueAccess> = Vec::new();
        let mut dim_index: HashMap<ValueId, usize> = HashMap::new();
        let mut steps_per_dim: HashMap<ValueId, Vec<u64>> = HashMap::new();
        let mut exprs = Vec::with_capacity(num_loops);

        for name in names {
            let info = self
                .loops
                .get(name)
                .unwrap_or_else(|| panic!("unknown loop name \"{name}\""));
            let index = *dim_index.entry(info.dimension).or_insert_with(|| {
                domain.push(ValueAccess {
                    value: info.dimension,
                    mapping: Mapping::new(num_loops, vec![MappingExpr::None; info.rank]),
                });
                domain.len() - 1
            });
            let steps = steps_per_dim.entry(info.dimension).or_default();
            steps.push(info.step);
            if steps.len() == 1 && info.step == 1 {
                exprs.push(MappingExpr::Dim(index));
            } else {
                exprs.push(MappingExpr::Stripe {
                    operand: Box::new(MappingExpr::Dim(index)),
                    factors: steps.clone(),
                });
            }
        }

        LoopNest {
            domain_to_loops: Mapping::new(domain.len(), exprs),
            domain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ElementType, LoopAttr, OpKind, ProgramBuilder};

    #[test]
    fn plain_loops_map_identity() {
        let mut b = ProgramBuilder::new();
        let d0 = b.static_range(8);
        let d1 = b.static_range(4);
        b.op(OpKind::Compute { name: "f".into() })
            .domain(&[d0, d1])
            .loop_nest(vec![LoopAttr::new("i", 0), LoopAttr::new("j", 1)])
            .results(&[(ElementType::F32, 2)])
            .build();
        let program = b.finish();
        let fusion = LoopFusionAnalysis::new(&program).expect("consistent");

        let nest = fusion.get_loop_nest(&["i".into(), "j".into()]);
        assert_eq!(nest.domain.len(), 2);
        assert_eq!(nest.domain[0].value, d0);
        assert_eq!(nest.domain_to_loops, Mapping::identity(2));
    }

    #[test]
    fn strip_mined_loops_share_a_dimension() {
        let mut b = ProgramBuilder::new();
        let d0 = b.static_range(16);
        b.op(OpKind::Compute { name: "f".into() })
            .domain(&[d0])
            .loop_nest(vec![
                LoopAttr::new("io", 0).with_step(4),
                LoopAttr::new("ii", 0),
            ])
            .results(&[(ElementType::F32, 1)])
            .build();
        let program = b.finish();
        let fusion = LoopFusionAnalysis::new(&program).expect("consistent");

        let nest = fusion.get_loop_nest(&["io".into(), "ii".into()]);
        assert_eq!(nest.domain.len(), 1);
        assert_eq!(
            nest.domain_to_loops.exprs()[0],
            MappingExpr::stripe_of_dim(0, &[4], 0)
        );
        assert_eq!(
            nest.domain_to_loops.exprs()[1],
            MappingExpr::stripe_of_dim(0, &[4, 1], 1)
        );
    }

    #[test]
    fn fused_loops_must_agree() {
        let mut b = ProgramBuilder::new();
        let d0 = b.static_range(8);
        let d1 = b.static_range(8);
        b.op(OpKind::Compute { name: "f".into() })
            .domain(&[d0])
            .loop_nest(vec![LoopAttr::new("i", 0)])
            .results(&[(ElementType::F32, 1)])
            .build();
        b.op(OpKind::Compute { name: "g".into() })
            .domain(&[d1])
            .loop_nest(vec![LoopAttr::new("i", 0)])
            .results(&[(ElementType::F32, 1)])
            .build();
        let program = b.finish();

        let diags = LoopFusionAnalysis::new(&program).expect_err("conflict");
        assert_eq!(diags[0].code, Some(codes::E0601));
        assert_eq!(diags[0].related_spans.len(), 1);
    }
}
