// Property-based tests for storage-analysis invariants.
//
// Three categories:
// 1. Storage merge algebra: idempotence, monotonicity, order-independent
//    conflict detection
// 2. Mapping algebra: identity laws and inversion round trips
// 3. Loop-nest minimization: the result is always a prefix of the input
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use proptest::prelude::*;

use trc::ir::{
    BufferRef, ElementType, LoopAttr, MemorySpace, NamedMapping, OpKind, ProgramBuilder,
};
use trc::mapping::{Mapping, MappingExpr};
use trc::pipeline::Analyses;
use trc::storage::{StorageAnalysis, ValueStorage};

// ── Strategies ──────────────────────────────────────────────────────────────

fn arb_space() -> impl Strategy<Value = Option<MemorySpace>> {
    prop_oneof![
        Just(None),
        Just(Some(MemorySpace::Register)),
        Just(Some(MemorySpace::Memory)),
    ]
}

fn arb_buffer_name() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some("A".to_string())),
        Just(Some("B".to_string())),
    ]
}

fn arb_expr() -> impl Strategy<Value = MappingExpr> {
    prop_oneof![
        (0usize..3).prop_map(MappingExpr::Dim),
        Just(MappingExpr::Unknown),
        Just(MappingExpr::None),
    ]
}

fn arb_layout() -> impl Strategy<Value = Option<Mapping>> {
    prop_oneof![
        Just(None),
        prop::collection::vec(arb_expr(), 0..3).prop_map(|exprs| Some(Mapping::new(3, exprs))),
    ]
}

fn arb_storage() -> impl Strategy<Value = ValueStorage> {
    (arb_space(), arb_buffer_name(), arb_layout())
        .prop_map(|(space, name, layout)| ValueStorage::new(space, name, layout))
}

/// Merges `from` into `to` field-wise; Err on the first conflicting field.
fn merge(to: &ValueStorage, from: &ValueStorage) -> Result<ValueStorage, ()> {
    let mut merged = to.clone();
    merged.merge_space(from.space())?;
    merged.merge_buffer_name(from.buffer_name())?;
    merged.merge_layout(from.layout())?;
    Ok(merged)
}

/// A permutation of 0..n as a fully specified mapping.
fn arb_permutation() -> impl Strategy<Value = Mapping> {
    (1usize..5)
        .prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
        .prop_map(|dims| {
            let n = dims.len();
            Mapping::new(n, dims.into_iter().map(MappingExpr::Dim).collect())
        })
}

// ── Merge algebra ───────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn merge_with_self_is_identity(storage in arb_storage()) {
        let merged = merge(&storage, &storage).expect("self-merge cannot conflict");
        prop_assert_eq!(merged, storage);
    }

    #[test]
    fn merge_conflicts_are_order_independent(a in arb_storage(), b in arb_storage()) {
        prop_assert_eq!(merge(&a, &b).is_err(), merge(&b, &a).is_err());
    }

    #[test]
    fn merge_reaches_a_fixed_point(a in arb_storage(), b in arb_storage()) {
        if let Ok(merged) = merge(&a, &b) {
            // Re-merging either side is a no-op once absorbed.
            prop_assert_eq!(merge(&merged, &b).expect("already absorbed"), merged.clone());
            prop_assert_eq!(merge(&merged, &a).expect("already absorbed"), merged);
        }
    }

    #[test]
    fn distinct_spaces_always_conflict(first_memory in any::<bool>()) {
        let (x, y) = (MemorySpace::Memory, MemorySpace::Register);
        let (x, y) = if first_memory { (x, y) } else { (y, x) };
        let mut storage = ValueStorage::new(Some(x), None, None);
        prop_assert!(storage.merge_space(Some(y)).is_err());
    }
}

// ── Mapping algebra ─────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn identity_is_neutral_for_composition(m in arb_permutation()) {
        let n = m.use_domain_size();
        prop_assert_eq!(Mapping::identity(n).compose(&m), m.clone());
        prop_assert_eq!(m.compose(&Mapping::identity(m.len())), m);
    }

    #[test]
    fn permutations_invert_exactly(m in arb_permutation()) {
        prop_assert_eq!(m.inverse().inverse(), m.clone());
        prop_assert_eq!(m.compose(&m.inverse()), Mapping::identity(m.use_domain_size()));
    }

    #[test]
    fn unify_is_reflexive(exprs in prop::collection::vec(arb_expr(), 0..4)) {
        let m = Mapping::new(3, exprs);
        prop_assert_eq!(m.unify(&m), Some(m.clone()));
        prop_assert_eq!(m.unify_unknown_exprs(&m), Some(m));
    }
}

// ── Minimization ────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever loop the layout picks, the minimized nest is a prefix (by
    /// name, in order) of the declaring operation's loop nest.
    #[test]
    fn minimized_nest_is_a_prefix(layout_loop in 0usize..3) {
        let mut b = ProgramBuilder::new();
        let dims = [b.static_range(4), b.static_range(8), b.static_range(16)];
        let loop_names = ["i", "j", "k"];
        b.op(OpKind::Compute { name: "w".into() })
            .domain(&dims)
            .loop_nest(
                loop_names
                    .iter()
                    .enumerate()
                    .map(|(d, n)| LoopAttr::new(*n, d))
                    .collect(),
            )
            .storage(vec![Some(BufferRef {
                space: MemorySpace::Memory,
                name: Some("B".into()),
                layout: Some(NamedMapping {
                    names: vec![loop_names[layout_loop].to_string()],
                    mapping: Mapping::identity(1),
                }),
            })])
            .results(&[(ElementType::F32, 3)])
            .build();
        let program = b.finish();
        let analyses = Analyses::build(&program).expect("fusion");
        let ctx = analyses.ctx(&program);

        let analysis = StorageAnalysis::create(&ctx).expect("verifies");
        let buffer = analysis.get_buffer("B").expect("declared");
        let full: Vec<String> = loop_names.iter().map(|n| n.to_string()).collect();
        prop_assert!(buffer.loop_nest().len() <= full.len());
        prop_assert_eq!(buffer.loop_nest(), &full[..buffer.loop_nest().len()]);
        // The buffer cannot live inside the loop indexing its layout.
        prop_assert!(buffer.loop_nest().len() <= layout_loop);
    }
}
