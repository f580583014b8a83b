// sequence.rs — Program-order analysis
//
// Assigns every operation a dense execution position: explicit `sequence`
// annotations order operations first, definition order breaks ties and
// orders unannotated operations (whose implicit key is their definition
// index).
//
// Preconditions: none.
// Postconditions: `position` is a total order over the program's operations.
// Failure modes: none.
// Side effects: none.

use crate::ir::{OpId, Program};

/// Total execution order over one program's operations.
#[derive(Debug)]
pub struct SequenceAnalysis {
    positions: Vec<usize>,
}

impl SequenceAnalysis {
    pub fn new(program: &Program) -> Self {
        let mut order: Vec<OpId> = program.op_ids().collect();
        order.sort_by_key(|&op_id| {
            let op = program.op(op_id);
            (op.sequence.unwrap_or(op_id.index() as i64), op_id.index())
        });
        let mut positions = vec![0; program.num_ops()];
        for (position, op_id) in order.into_iter().enumerate() {
            positions[op_id.index()] = position;
        }
        Self { positions }
    }

    /// Dense execution position of an operation.
    pub fn position(&self, op: OpId) -> usize {
        self.positions[op.index()]
    }

    pub fn is_before(&self, a: OpId, b: OpId) -> bool {
        self.position(a) < self.position(b)
    }
}
