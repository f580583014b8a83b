// default_attrs.rs — Default lowering attributes
//
// Fills in the annotations later stages require when the program leaves them
// implicit: every compute operation gets a loop nest iterating its domain in
// order, and 0-dimensional results default to the register space.
//
// Preconditions: none.
// Postconditions: every compute op has a `loop_nest`; every 0-d compute
//                 result has a storage entry.
// Failure modes: none.
// Side effects: mutates the program's annotations.

use std::collections::HashSet;

use crate::ir::{BufferRef, LoopAttr, Program};

/// One fresh plain loop per domain dimension not already covered by a step-1
/// loop of `prefix`, appended after the prefix.
pub fn default_loop_nest(
    used_names: &mut HashSet<String>,
    num_dimensions: usize,
    prefix: &[LoopAttr],
) -> Vec<LoopAttr> {
    let mut loop_nest = prefix.to_vec();
    let mut covered = vec![false; num_dimensions];
    for attr in prefix {
        if attr.step == 1 {
            if let Some(slot) = covered.get_mut(attr.dimension) {
                *slot = true;
            }
        }
    }
    for (dimension, is_covered) in covered.into_iter().enumerate() {
        if is_covered {
            continue;
        }
        let name = gen_loop_name(used_names);
        loop_nest.push(LoopAttr::new(name, dimension));
    }
    loop_nest
}

fn gen_loop_name(used_names: &mut HashSet<String>) -> String {
    let mut counter = used_names.len();
    loop {
        let name = format!("loop_{counter}");
        if used_names.insert(name.clone()) {
            return name;
        }
        counter += 1;
    }
}

/// Assigns the default loop nest to every compute operation that lacks one.
pub fn assign_default_loop_nests(program: &mut Program) {
    let mut used_names: HashSet<String> = HashSet::new();
    for op_id in program.op_ids() {
        if let Some(loop_nest) = &program.op(op_id).loop_nest {
            used_names.extend(loop_nest.iter().map(|attr| attr.name.clone()));
        }
    }

    let op_ids: Vec<_> = program.op_ids().collect();
    for op_id in op_ids {
        let op = program.op(op_id);
        if !op.is_compute() || op.loop_nest.is_some() {
            continue;
        }
        let num_dimensions = op.domain.len();
        let loop_nest = default_loop_nest(&mut used_names, num_dimensions, &[]);
        program.op_mut(op_id).loop_nest = Some(loop_nest);
    }
}

/// Defaults unannotated 0-dimensional compute results to the register space.
/// Multi-dimensional results are left for buffer materialization passes.
pub fn assign_default_storage(program: &mut Program) {
    let op_ids: Vec<_> = program.op_ids().collect();
    for op_id in op_ids {
        let op = program.op(op_id);
        if !op.is_compute() {
            continue;
        }
        let results = op.results.clone();
        let mut storage = match &op.storage {
            Some(storage) => storage.clone(),
            None => vec![None; results.len()],
        };
        if storage.len() != results.len() {
            // Malformed annotation; the verifier reports it.
            continue;
        }
        let mut changed = false;
        for (entry, &result) in storage.iter_mut().zip(&results) {
            if entry.is_none() && program.value(result).rank == 0 {
                *entry = Some(BufferRef::register_0d());
                changed = true;
            }
        }
        if changed || op.storage.is_none() {
            program.op_mut(op_id).storage = Some(storage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ElementType, MemorySpace, OpKind, ProgramBuilder};

    #[test]
    fn default_loop_nest_covers_every_dimension() {
        let mut b = ProgramBuilder::new();
        let d0 = b.static_range(8);
        let d1 = b.static_range(4);
        b.op(OpKind::Compute { name: "f".into() })
            .domain(&[d0, d1])
            .results(&[(ElementType::F32, 2)])
            .build();
        let mut program = b.finish();

        assign_default_loop_nests(&mut program);
        let op_id = program.op_ids().nth(2).expect("compute op");
        let loop_nest = program.op(op_id).loop_nest.as_ref().expect("assigned");
        assert_eq!(loop_nest.len(), 2);
        assert_eq!(loop_nest[0].dimension, 0);
        assert_eq!(loop_nest[1].dimension, 1);
        assert_ne!(loop_nest[0].name, loop_nest[1].name);
    }

    #[test]
    fn default_loop_nest_respects_prefix() {
        let mut used = HashSet::new();
        used.insert("i".to_string());
        let prefix = vec![LoopAttr::new("i", 0)];
        let loop_nest = default_loop_nest(&mut used, 2, &prefix);
        assert_eq!(loop_nest.len(), 2);
        assert_eq!(loop_nest[0].name, "i");
        assert_eq!(loop_nest[1].dimension, 1);
    }

    #[test]
    fn zero_dimensional_results_default_to_register() {
        let mut b = ProgramBuilder::new();
        let d0 = b.static_range(8);
        b.op(OpKind::Compute { name: "scalar".into() })
            .results(&[(ElementType::F32, 0)])
            .build();
        b.op(OpKind::Compute { name: "vector".into() })
            .domain(&[d0])
            .results(&[(ElementType::F32, 1)])
            .build();
        let mut program = b.finish();

        assign_default_storage(&mut program);
        let scalar = program.op_ids().nth(1).expect("scalar op");
        let entry = program.op(scalar).storage_entry(0).expect("defaulted");
        assert_eq!(entry.space, MemorySpace::Register);
        assert!(entry.name.is_none());
        assert!(entry.layout.as_ref().expect("layout").mapping.is_empty());

        // Multi-dimensional results stay unannotated.
        let vector = program.op_ids().nth(2).expect("vector op");
        assert!(program.op(vector).storage_entry(0).is_none());
    }
}
