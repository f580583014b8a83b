// Snapshot tests: lock the rendered diagnostic output to detect unintended
// wording or formatting changes.
//
// Uses the library API (build program → verify) and snapshots the Display
// output with inline `insta` snapshots. Run `cargo insta review` after
// intentional wording changes to update baselines.

use trc::ir::{BufferRef, ElementType, LoopAttr, MemorySpace, NamedMapping, OpKind, ProgramBuilder};
use trc::mapping::{Mapping, MappingExpr};
use trc::pipeline::Analyses;
use trc::storage::verify_storages;

/// Runs verification and renders every diagnostic, one per paragraph.
fn rendered_diagnostics(program: &trc::ir::Program) -> String {
    let analyses = Analyses::build(program).expect("loop fusion succeeds");
    let diagnostics = verify_storages(&analyses.ctx(program)).expect_err("verification fails");
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

fn identity_ref(name: &str, loop_name: &str) -> BufferRef {
    BufferRef {
        space: MemorySpace::Memory,
        name: Some(name.to_string()),
        layout: Some(NamedMapping {
            names: vec![loop_name.to_string()],
            mapping: Mapping::identity(1),
        }),
    }
}

#[test]
fn element_type_conflict_rendering() {
    let mut b = ProgramBuilder::new();
    let d0 = b.static_range(8);
    b.op(OpKind::Compute { name: "w1".into() })
        .domain(&[d0])
        .loop_nest(vec![LoopAttr::new("i", 0)])
        .storage(vec![Some(identity_ref("B", "i"))])
        .results(&[(ElementType::F32, 1)])
        .build();
    b.op(OpKind::Compute { name: "w2".into() })
        .domain(&[d0])
        .loop_nest(vec![LoopAttr::new("i", 0)])
        .storage(vec![Some(identity_ref("B", "i"))])
        .results(&[(ElementType::I32, 1)])
        .build();
    let program = b.finish();

    insta::assert_snapshot!(rendered_diagnostics(&program), @r###"
    error[E0201]: buffer "B" has a different element type than in its previous occurrence
      note: previous occurrence here
    "###);
}

#[test]
fn conflicting_memory_space_rendering() {
    let mut b = ProgramBuilder::new();
    let d0 = b.static_range(8);
    let producer = b
        .op(OpKind::Compute { name: "p".into() })
        .domain(&[d0])
        .loop_nest(vec![LoopAttr::new("i", 0)])
        .storage(vec![Some(identity_ref("B", "i"))])
        .results(&[(ElementType::F32, 1)])
        .build()[0];
    b.op(OpKind::Reduce { num_inits: 1 })
        .domain(&[d0])
        .loop_nest(vec![LoopAttr::new("i", 0)])
        .operand(producer, Mapping::identity(1))
        .storage(vec![Some(BufferRef::register_0d())])
        .results(&[(ElementType::F32, 1)])
        .build();
    let program = b.finish();

    insta::assert_snapshot!(rendered_diagnostics(&program), @"error[E0301]: conflicting memory spaces: expected register, got memory");
}

#[test]
fn insufficient_storage_coverage_rendering() {
    let mut b = ProgramBuilder::new();
    let d0 = b.static_range(8);
    let produced = b
        .op(OpKind::Compute { name: "p".into() })
        .domain(&[d0])
        .loop_nest(vec![LoopAttr::new("i", 0)])
        .storage(vec![Some(BufferRef::register_0d())])
        .results(&[(ElementType::F32, 1)])
        .build()[0];
    b.op(OpKind::Compute { name: "c".into() })
        .loop_nest(vec![])
        .operand(produced, Mapping::new(0, vec![MappingExpr::None]))
        .results(&[(ElementType::F32, 0)])
        .build();
    let program = b.finish();

    insta::assert_snapshot!(rendered_diagnostics(&program), @r###"
    error[E0501]: operand storage must cover all operand dimensions that are not covered by loops common to both operand and user
      note: value defined here
    "###);
}
