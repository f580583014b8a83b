// ir.rs — Operation graph for the Trellis dataflow dialect
//
// Programs are arenas of operations producing multidimensional values over
// iteration domains, connected by producer/consumer mappings. Operations and
// values are referenced through stable u32 handles; back-references (uses)
// are handle pairs, never owning pointers.
//
// Preconditions: handles passed to accessors must come from the same Program.
// Postconditions: a built Program's def/use tables are consistent.
// Failure modes: none (builder misuse is a programming error and panics).
// Side effects: none.

use std::fmt;

use crate::mapping::Mapping;

// ── Source locations ────────────────────────────────────────────────────────

/// A byte range into the program description, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

// ── Handles ─────────────────────────────────────────────────────────────────

/// Stable identifier for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u32);

/// Stable identifier for a produced value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl OpId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ── Scalar types and memory spaces ──────────────────────────────────────────

/// Scalar type of a value's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    F64,
    I32,
    I64,
    Index,
    MemRef,
}

impl ElementType {
    /// Index and memref values live in scalars/handles and may never be
    /// placed in an addressable buffer.
    pub fn memory_eligible(self) -> bool {
        !matches!(self, ElementType::Index | ElementType::MemRef)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::Index => "index",
            ElementType::MemRef => "memref",
        };
        write!(f, "{s}")
    }
}

/// The two storage spaces values can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    Register,
    Memory,
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemorySpace::Register => "register",
            MemorySpace::Memory => "memory",
        };
        write!(f, "{s}")
    }
}

// ── Annotations ─────────────────────────────────────────────────────────────

/// One entry of a `loop_nest` annotation: a named loop iterating
/// `domain[dimension]` with stripe step `step` (1 = plain iteration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopAttr {
    pub name: String,
    pub dimension: usize,
    pub step: u64,
    pub unroll: Option<u32>,
}

impl LoopAttr {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            step: 1,
            unroll: None,
        }
    }

    pub fn with_step(mut self, step: u64) -> Self {
        self.step = step;
        self
    }
}

/// A layout expressed over named loops of the annotated operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedMapping {
    pub names: Vec<String>,
    pub mapping: Mapping,
}

/// One entry of a `storage` annotation: where one result is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferRef {
    pub space: MemorySpace,
    pub name: Option<String>,
    pub layout: Option<NamedMapping>,
}

impl BufferRef {
    /// The canonical 0-dimensional register storage.
    pub fn register_0d() -> Self {
        Self {
            space: MemorySpace::Register,
            name: None,
            layout: Some(NamedMapping {
                names: Vec::new(),
                mapping: Mapping::empty(0),
            }),
        }
    }
}

// ── Operands, accesses, shapes ──────────────────────────────────────────────

/// A value consumed by an operation, with the mapping from the consumer's
/// domain to the value's domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueOperand {
    pub value: ValueId,
    pub mapping: Mapping,
}

/// A dimension (or value) access: a value plus the mapping from the
/// surrounding domain to the value's own domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueAccess {
    pub value: ValueId,
    pub mapping: Mapping,
}

/// Shape of one domain dimension: how its extent depends on earlier
/// dimensions. Hyper-rectangular domains have empty dependency mappings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeDim {
    pub dependency_mapping: Mapping,
}

impl ShapeDim {
    pub fn rectangular() -> Self {
        Self {
            dependency_mapping: Mapping::empty(0),
        }
    }
}

// ── Operations ──────────────────────────────────────────────────────────────

/// What an operation is, as far as storage analysis is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    /// Produces a dimension value with a static extent.
    StaticRange { size: u64 },
    /// Produces a dimension value with dynamic bounds (value operands).
    DynRange,
    /// An opaque compute operation.
    Compute { name: String },
    /// A reduction; operands `0..num_inits` are accumulator inits and
    /// propagate storage to/from the matching results.
    Reduce { num_inits: usize },
    /// Feedback ("then") operator: result 0 follows its operands' storage.
    Fby,
    /// Projection keeping any iteration of the projected dimensions.
    ProjAny,
    /// Projection keeping the last iteration of the projected dimensions.
    ProjLast,
    /// Imports a scalar as a 0-dimensional register value.
    FromScalar,
    /// Imports an external memory region as a value read from a named buffer.
    FromMemory {
        buffer_name: String,
        memref: ValueId,
        memory_rank: usize,
    },
    /// Exports a value into an external memory region under a named buffer.
    ToMemory {
        buffer_name: String,
        memref: ValueId,
        memory_rank: usize,
    },
}

/// Storage-propagation role of an operation (closed capability variant, per
/// the dialect's storage semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageRole {
    /// Result 0 must agree with every value operand under re-mapping.
    PassThrough,
    /// Result i must agree with accumulator operand i under re-mapping.
    Reduction { num_inits: usize },
    /// No storage coupling between operands and results.
    Opaque,
}

/// Description of a memory import/export site.
#[derive(Debug, Clone, Copy)]
pub struct MemoryInterface<'a> {
    pub buffer_name: &'a str,
    pub memref: ValueId,
    pub memory_rank: usize,
    pub is_import: bool,
}

/// One operation of a program.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OpKind,
    pub span: Span,
    /// Dimension values the operation iterates over.
    pub domain: Vec<ValueId>,
    /// Per-dimension shape information, parallel to `domain`.
    pub shape: Vec<ShapeDim>,
    /// Value operands with their access mappings.
    pub operands: Vec<ValueOperand>,
    pub results: Vec<ValueId>,
    pub loop_nest: Option<Vec<LoopAttr>>,
    /// One entry per result; `None` entries are unannotated.
    pub storage: Option<Vec<Option<BufferRef>>>,
    pub sequence: Option<i64>,
}

impl Operation {
    /// Compute operations carry loop-nest/storage annotations and count as
    /// buffer reads and writes.
    pub fn is_compute(&self) -> bool {
        matches!(self.kind, OpKind::Compute { .. } | OpKind::Reduce { .. })
    }

    pub fn storage_role(&self) -> StorageRole {
        match self.kind {
            OpKind::Fby | OpKind::ProjAny | OpKind::ProjLast => StorageRole::PassThrough,
            OpKind::Reduce { num_inits } => StorageRole::Reduction { num_inits },
            _ => StorageRole::Opaque,
        }
    }

    pub fn memory_interface(&self) -> Option<MemoryInterface<'_>> {
        match &self.kind {
            OpKind::FromMemory {
                buffer_name,
                memref,
                memory_rank,
            } => Some(MemoryInterface {
                buffer_name,
                memref: *memref,
                memory_rank: *memory_rank,
                is_import: true,
            }),
            OpKind::ToMemory {
                buffer_name,
                memref,
                memory_rank,
            } => Some(MemoryInterface {
                buffer_name,
                memref: *memref,
                memory_rank: *memory_rank,
                is_import: false,
            }),
            _ => None,
        }
    }

    /// For memory import/export ops: leading domain dimensions not mapped to
    /// memory ranks.
    pub fn parallel_domain_size(&self) -> usize {
        match self.memory_interface() {
            Some(interface) => self.domain.len() - interface.memory_rank,
            None => self.domain.len(),
        }
    }

    /// The storage annotation entry for one result, if any.
    pub fn storage_entry(&self, result: usize) -> Option<&BufferRef> {
        self.storage.as_ref()?.get(result)?.as_ref()
    }
}

// ── Values ──────────────────────────────────────────────────────────────────

/// Definition site and type of a produced value.
#[derive(Debug, Clone)]
pub struct ValueDef {
    pub def: OpId,
    pub result: usize,
    pub element_type: ElementType,
    pub rank: usize,
    pub span: Span,
}

// ── Program ─────────────────────────────────────────────────────────────────

/// A complete program: arena of operations and values plus use lists.
/// Operation order is program definition order.
#[derive(Debug, Default)]
pub struct Program {
    ops: Vec<Operation>,
    values: Vec<ValueDef>,
    /// Per value: (consumer op, value-operand position).
    uses: Vec<Vec<(OpId, usize)>>,
}

impl Program {
    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn op(&self, id: OpId) -> &Operation {
        &self.ops[id.index()]
    }

    pub fn op_mut(&mut self, id: OpId) -> &mut Operation {
        &mut self.ops[id.index()]
    }

    pub fn op_ids(&self) -> impl Iterator<Item = OpId> {
        (0..self.ops.len() as u32).map(OpId)
    }

    pub fn value(&self, id: ValueId) -> &ValueDef {
        &self.values[id.index()]
    }

    pub fn value_ids(&self) -> impl Iterator<Item = ValueId> {
        (0..self.values.len() as u32).map(ValueId)
    }

    pub fn defining_op(&self, value: ValueId) -> OpId {
        self.values[value.index()].def
    }

    pub fn uses(&self, value: ValueId) -> &[(OpId, usize)] {
        &self.uses[value.index()]
    }

    /// Definition order: does `a` come before `b` in the program text?
    pub fn is_before(&self, a: OpId, b: OpId) -> bool {
        a.index() < b.index()
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Programmatic construction of programs, used by tests and the description
/// decoder. Spans default to one synthetic byte per operation.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a static dimension value.
    pub fn static_range(&mut self, size: u64) -> ValueId {
        self.op(OpKind::StaticRange { size })
            .results(&[(ElementType::Index, 0)])
            .build()[0]
    }

    pub fn op(&mut self, kind: OpKind) -> OpBuilder<'_> {
        let index = self.program.ops.len() as u32;
        OpBuilder {
            builder: self,
            op: Operation {
                kind,
                span: Span::new(index, index + 1),
                domain: Vec::new(),
                shape: Vec::new(),
                operands: Vec::new(),
                results: Vec::new(),
                loop_nest: None,
                storage: None,
                sequence: None,
            },
            result_types: Vec::new(),
        }
    }

    pub fn finish(self) -> Program {
        self.program
    }
}

/// In-flight operation under construction.
pub struct OpBuilder<'a> {
    builder: &'a mut ProgramBuilder,
    op: Operation,
    result_types: Vec<(ElementType, usize)>,
}

impl OpBuilder<'_> {
    pub fn span(mut self, span: Span) -> Self {
        self.op.span = span;
        self
    }

    /// Sets the iteration domain with a hyper-rectangular shape.
    pub fn domain(mut self, dims: &[ValueId]) -> Self {
        self.op.domain = dims.to_vec();
        self.op.shape = dims.iter().map(|_| ShapeDim::rectangular()).collect();
        self
    }

    /// Overrides the shape dependency of one domain dimension.
    pub fn shape_dependency(mut self, dim: usize, dependency_mapping: Mapping) -> Self {
        self.op.shape[dim] = ShapeDim { dependency_mapping };
        self
    }

    pub fn operand(mut self, value: ValueId, mapping: Mapping) -> Self {
        self.op.operands.push(ValueOperand { value, mapping });
        self
    }

    pub fn loop_nest(mut self, loops: Vec<LoopAttr>) -> Self {
        self.op.loop_nest = Some(loops);
        self
    }

    pub fn storage(mut self, entries: Vec<Option<BufferRef>>) -> Self {
        self.op.storage = Some(entries);
        self
    }

    pub fn sequence(mut self, sequence: i64) -> Self {
        self.op.sequence = Some(sequence);
        self
    }

    /// Declares results as (element type, rank) pairs.
    pub fn results(mut self, results: &[(ElementType, usize)]) -> Self {
        self.result_types = results.to_vec();
        self
    }

    /// Registers the operation and returns its result values.
    pub fn build(self) -> Vec<ValueId> {
        let OpBuilder {
            builder,
            mut op,
            result_types,
        } = self;
        let program = &mut builder.program;
        let op_id = OpId(program.ops.len() as u32);

        let mut results = Vec::with_capacity(result_types.len());
        for (i, (element_type, rank)) in result_types.into_iter().enumerate() {
            let value = ValueId(program.values.len() as u32);
            program.values.push(ValueDef {
                def: op_id,
                result: i,
                element_type,
                rank,
                span: op.span,
            });
            program.uses.push(Vec::new());
            results.push(value);
        }
        op.results = results.clone();

        for (position, operand) in op.operands.iter().enumerate() {
            program.uses[operand.value.index()].push((op_id, position));
        }
        program.ops.push(op);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_wires_defs_and_uses() {
        let mut b = ProgramBuilder::new();
        let d0 = b.static_range(8);
        let produced = b
            .op(OpKind::Compute {
                name: "producer".into(),
            })
            .domain(&[d0])
            .results(&[(ElementType::F32, 1)])
            .build()[0];
        let consumed = b
            .op(OpKind::Compute {
                name: "consumer".into(),
            })
            .domain(&[d0])
            .operand(produced, Mapping::identity(1))
            .results(&[(ElementType::F32, 1)])
            .build()[0];
        let program = b.finish();

        assert_eq!(program.num_ops(), 3);
        assert_eq!(program.num_values(), 3);
        assert_eq!(program.value(produced).rank, 1);
        assert_eq!(program.uses(produced), &[(program.defining_op(consumed), 0)]);
        assert_eq!(program.uses(d0).len(), 0); // domains are not value operands
        assert!(program.is_before(program.defining_op(produced), program.defining_op(consumed)));
    }

    #[test]
    fn storage_roles() {
        let mut b = ProgramBuilder::new();
        let v = b
            .op(OpKind::FromScalar)
            .results(&[(ElementType::F32, 0)])
            .build()[0];
        let fby = b
            .op(OpKind::Fby)
            .operand(v, Mapping::empty(0))
            .results(&[(ElementType::F32, 0)])
            .build()[0];
        let program = b.finish();

        assert_eq!(
            program.op(program.defining_op(fby)).storage_role(),
            StorageRole::PassThrough
        );
        assert_eq!(
            program.op(program.defining_op(v)).storage_role(),
            StorageRole::Opaque
        );
        assert!(!program.op(program.defining_op(v)).is_compute());
    }

    #[test]
    fn memory_interface_exposes_parallel_domain() {
        let mut b = ProgramBuilder::new();
        let memref = b
            .op(OpKind::FromScalar)
            .results(&[(ElementType::MemRef, 0)])
            .build()[0];
        let d0 = b.static_range(4);
        let d1 = b.static_range(16);
        let imported = b
            .op(OpKind::FromMemory {
                buffer_name: "input".into(),
                memref,
                memory_rank: 1,
            })
            .domain(&[d0, d1])
            .results(&[(ElementType::F32, 2)])
            .build()[0];
        let program = b.finish();

        let op = program.op(program.defining_op(imported));
        let interface = op.memory_interface().expect("memory import");
        assert!(interface.is_import);
        assert_eq!(interface.memory_rank, 1);
        assert_eq!(op.parallel_domain_size(), 1);
    }
}
