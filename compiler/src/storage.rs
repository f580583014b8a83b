// storage.rs — Storage analysis for Trellis programs
//
// Assigns every produced value a storage descriptor (memory space, buffer
// name, layout) and every named buffer a shape and a minimal loop nest.
// Buffers are declared from storage annotations and memory import/export
// operations; value storage is seeded from the same sites and propagated to
// a fixed point through pass-through and reduction operations; buffer loop
// nests are then minimized and cross-iteration communication is verified.
//
// Preconditions: the collaborator analyses were built for the same program.
// Postconditions: `create` returns a fully populated, internally consistent
//                 analysis, or no analysis at all.
// Failure modes: conflicting declarations, conflicting storage merges,
//                un-nestable layouts, insufficient communication coverage —
//                every inconsistency is a hard stop reported as a diagnostic.
// Side effects: none outside the analysis instance.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::diag::{codes, Diagnostic};
use crate::ir::{
    ElementType, MemorySpace, OpId, Program, Span, StorageRole, ValueAccess, ValueId, ValueOperand,
};
use crate::iteration_space::{IterationSpace, IterationSpaceAnalysis};
use crate::loop_fusion::{LoopFusionAnalysis, LoopNest};
use crate::mapping::{Mapping, MappingExpr};
use crate::sequence::SequenceAnalysis;
use crate::unify::{resolve_unification_constraint, unification_constraints};

// ── Analysis context ────────────────────────────────────────────────────────

/// The collaborator analyses the storage analysis reads from.
#[derive(Clone, Copy)]
pub struct AnalysisContext<'a> {
    pub program: &'a Program,
    pub fusion: &'a LoopFusionAnalysis,
    pub spaces: &'a IterationSpaceAnalysis,
    pub sequence: &'a SequenceAnalysis,
}

// ── Buffers ─────────────────────────────────────────────────────────────────

/// A named memory region declared by one or more storage annotations or by a
/// memory import/export operation.
#[derive(Debug, Clone)]
pub struct Buffer {
    span: Span,
    element_type: ElementType,
    import_op: Option<OpId>,
    /// Loop names the buffer is nested inside; only ever shrunk, and only to
    /// a prefix.
    loop_nest: Vec<String>,
    /// Ordered dimension accesses; grows by appending, and loses entries only
    /// when `set_loop_nest` drops dimensions no longer referenced.
    domain: Vec<ValueAccess>,
    /// Mapping from `domain` to buffer ranks; absent until characterized.
    layout: Option<Mapping>,
    writes: Vec<(OpId, usize)>,
    reads: Vec<(OpId, usize)>,
    values: Vec<ValueId>,
}

impl Buffer {
    fn new(
        span: Span,
        element_type: ElementType,
        loop_names: &[String],
        loop_nest: &LoopNest,
    ) -> Self {
        let num_loops = loop_names.len();
        Self {
            span,
            element_type,
            import_op: None,
            loop_nest: loop_names.to_vec(),
            domain: loop_nest
                .domain
                .iter()
                .map(|access| ValueAccess {
                    value: access.value,
                    mapping: access.mapping.resize_use_domain(num_loops),
                })
                .collect(),
            layout: None,
            writes: Vec::new(),
            reads: Vec::new(),
            values: Vec::new(),
        }
    }

    fn new_external(
        import_op: OpId,
        span: Span,
        element_type: ElementType,
        loop_names: &[String],
        loop_nest: &LoopNest,
    ) -> Self {
        let mut buffer = Self::new(span, element_type, loop_names, loop_nest);
        buffer.import_op = Some(import_op);
        buffer
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Number of dimensions in the buffer layout, once characterized.
    pub fn rank(&self) -> Option<usize> {
        self.layout.as_ref().map(|layout| layout.len())
    }

    /// Whether the buffer aliases memory declared outside the program.
    pub fn is_external(&self) -> bool {
        self.import_op.is_some()
    }

    /// The import/export operation for external buffers.
    pub fn import_op(&self) -> Option<OpId> {
        self.import_op
    }

    pub fn loop_nest(&self) -> &[String] {
        &self.loop_nest
    }

    pub fn domain(&self) -> &[ValueAccess] {
        &self.domain
    }

    pub fn layout(&self) -> Option<&Mapping> {
        self.layout.as_ref()
    }

    /// Operations writing to the buffer, with the stored result position.
    pub fn writes(&self) -> &[(OpId, usize)] {
        &self.writes
    }

    /// Operations reading from the buffer, with the value-operand position.
    pub fn reads(&self) -> &[(OpId, usize)] {
        &self.reads
    }

    /// Values stored in the buffer.
    pub fn values(&self) -> &[ValueId] {
        &self.values
    }

    /// Registers a value stored in the buffer, recording its defining compute
    /// operation as a write and its compute consumers as reads.
    fn add_value(&mut self, value: ValueId, program: &Program) {
        self.values.push(value);
        let def = program.value(value);
        if program.op(def.def).is_compute() {
            self.writes.push((def.def, def.result));
        }
        for &(user, position) in program.uses(value) {
            if program.op(user).is_compute() {
                self.reads.push((user, position));
            }
        }
    }

    /// Shrinks the loop nest to the prefix described by `loop_nest`, dropping
    /// domain entries only referenced by removed loops and renaming the
    /// layout onto the trimmed domain.
    fn set_loop_nest(&mut self, loop_nest: &LoopNest) {
        let new_size = loop_nest.domain_to_loops.len();
        if new_size == self.loop_nest.len() {
            return;
        }
        debug_assert!(new_size <= self.loop_nest.len());
        self.loop_nest.truncate(new_size);
        if self.domain.is_empty() {
            return;
        }

        let mut preserved = vec![false; self.domain.len()];
        for slot in preserved.iter_mut().take(loop_nest.domain.len()) {
            *slot = true;
        }
        if let Some(layout) = &self.layout {
            for (slot, used) in preserved.iter_mut().zip(layout.dependency_mask()) {
                *slot |= used;
            }
        }

        let old_domain = std::mem::take(&mut self.domain);
        let mut renaming = vec![MappingExpr::None; old_domain.len()];
        for (dim, access) in old_domain.into_iter().enumerate() {
            if !preserved[dim] {
                continue;
            }
            renaming[dim] = MappingExpr::Dim(self.domain.len());
            self.domain.push(ValueAccess {
                value: access.value,
                mapping: access.mapping.resize_use_domain(new_size),
            });
        }

        if let Some(layout) = self.layout.take() {
            let renaming_mapping = Mapping::new(self.domain.len(), renaming);
            self.layout = Some(renaming_mapping.compose(&layout));
        }
    }

    /// Merges a layout over the buffer domain into the current one.
    fn unify_layout(&mut self, layout: Mapping) -> Result<(), ()> {
        match &self.layout {
            None => {
                self.layout = Some(layout);
                Ok(())
            }
            Some(existing) => match existing.unify(&layout) {
                Some(unified) => {
                    self.layout = Some(unified);
                    Ok(())
                }
                None => Err(()),
            },
        }
    }

    /// Prepends `num_new_dims` unresolved columns to the layout.
    fn add_none_prefix_to_layout(&mut self, num_new_dims: usize) {
        let layout = self
            .layout
            .take()
            .expect("cannot extend a buffer without a layout");
        self.layout = Some(layout.add_prefix(vec![MappingExpr::None; num_new_dims]));
    }

    fn append_to_domain(&mut self, new_entries: Vec<ValueAccess>) {
        self.domain.extend(new_entries);
        if let Some(layout) = self.layout.take() {
            self.layout = Some(layout.resize_use_domain(self.domain.len()));
        }
    }
}

/// The buffer layout as a mapping from the buffer domain to the loop-nest
/// positions followed by the buffer ranks.
fn buffer_instance_layout(buffer: &Buffer, fusion: &LoopFusionAnalysis) -> Mapping {
    let layout = buffer
        .layout()
        .expect("instance layout requires a characterized buffer");
    let loop_nest = fusion.get_loop_nest(buffer.loop_nest());
    layout.add_prefix(loop_nest.domain_to_loops.exprs().to_vec())
}

// ── Value storage ───────────────────────────────────────────────────────────

/// How one value is stored. Fields are unset until specified; merges replace
/// unset fields and verify equality otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueStorage {
    space: Option<MemorySpace>,
    buffer_name: Option<String>,
    layout: Option<Mapping>,
}

impl ValueStorage {
    pub fn new(
        space: Option<MemorySpace>,
        buffer_name: Option<String>,
        layout: Option<Mapping>,
    ) -> Self {
        Self {
            space,
            buffer_name,
            layout,
        }
    }

    pub fn space(&self) -> Option<MemorySpace> {
        self.space
    }

    pub fn buffer_name(&self) -> Option<&str> {
        self.buffer_name.as_deref()
    }

    /// Mapping from the value's iteration space to buffer ranks.
    pub fn layout(&self) -> Option<&Mapping> {
        self.layout.as_ref()
    }

    pub fn merge_space(&mut self, new_space: Option<MemorySpace>) -> Result<(), ()> {
        let Some(new_space) = new_space else {
            return Ok(());
        };
        match self.space {
            None => {
                self.space = Some(new_space);
                Ok(())
            }
            Some(existing) if existing == new_space => Ok(()),
            Some(_) => Err(()),
        }
    }

    pub fn merge_buffer_name(&mut self, new_name: Option<&str>) -> Result<(), ()> {
        let Some(new_name) = new_name else {
            return Ok(());
        };
        match &self.buffer_name {
            None => {
                self.buffer_name = Some(new_name.to_string());
                Ok(())
            }
            Some(existing) if existing == new_name => Ok(()),
            Some(_) => Err(()),
        }
    }

    /// Unifies layouts by substituting `?` expressions only.
    pub fn merge_layout(&mut self, new_layout: Option<&Mapping>) -> Result<(), ()> {
        let Some(new_layout) = new_layout else {
            return Ok(());
        };
        match &self.layout {
            None => {
                self.layout = Some(new_layout.clone());
                Ok(())
            }
            Some(existing) => match new_layout.unify_unknown_exprs(existing) {
                Some(unified) => {
                    self.layout = Some(unified);
                    Ok(())
                }
                None => Err(()),
            },
        }
    }

    /// Re-expresses the storage from the domain of `from` into the domain of
    /// `to`, given a mapping from `to`'s domain to `from`'s domain. Space and
    /// buffer name carry over unconditionally; the layout is composed through
    /// the translated mapping and canonicalized.
    pub fn map(&self, from: OpId, to: OpId, mapping: &Mapping, ctx: &AnalysisContext) -> Self {
        let layout = self.layout.as_ref().map(|layout| {
            // Values may have a smaller rank than the operation producing
            // them; resize to full operation domains before translating.
            let domain_mapping = mapping
                .resize(ctx.program.op(from).domain.len())
                .resize_use_domain(ctx.program.op(to).domain.len());
            let iter_space_mapping = ctx.spaces.translate_mapping(from, to, &domain_mapping);
            iter_space_mapping.compose(layout).canonicalize()
        });
        Self {
            space: self.space,
            buffer_name: self.buffer_name.clone(),
            layout,
        }
    }

    /// Re-expresses the storage of an operand's value into the consumer's
    /// domain.
    pub fn map_operand(&self, user: OpId, operand: &ValueOperand, ctx: &AnalysisContext) -> Self {
        self.map(
            ctx.program.defining_op(operand.value),
            user,
            &operand.mapping,
            ctx,
        )
    }

    /// Prepends `?` columns to the layout, matching a buffer extension.
    fn add_unknown_prefix_to_layout(&mut self, num_new_dims: usize) {
        let layout = self
            .layout
            .take()
            .expect("cannot extend an unset value layout");
        self.layout = Some(layout.add_prefix(vec![MappingExpr::Unknown; num_new_dims]));
    }
}

impl fmt::Display for ValueStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{space: {}", display_or_unset(&self.space))?;
        write!(f, ", buffer: {}", display_or_unset(&self.buffer_name))?;
        write!(f, ", layout: {}}}", display_or_unset(&self.layout))
    }
}

fn display_or_unset<T: fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "unset".to_string(),
    }
}

// ── Communication volume ────────────────────────────────────────────────────

/// Mapping from the domain of a value defined in `def_space` to the
/// sub-domain that must be materialized for the value to be used from
/// `use_space`: the portion not reachable through loops common to both.
pub fn communication_volume(
    value_rank: usize,
    def_space: &IterationSpace,
    use_space: &IterationSpace,
) -> Mapping {
    let num_common_loops = def_space.num_common_loops(use_space);

    // Mapping from the value domain to the common loops.
    let domain_to_common_loops = def_space
        .mapping()
        .resize_use_domain(value_rank)
        .resize(num_common_loops);
    // Extend to cover the full value domain, then drop the common loops:
    // what remains is the sub-domain the common loops do not reach.
    domain_to_common_loops
        .inverse()
        .make_surjective()
        .inverse()
        .drop_front(num_common_loops)
}

// ── Shape unification ───────────────────────────────────────────────────────

/// Returns the layout of `buffer_ref` as a mapping from the iteration space
/// of `op` to buffer ranks, resolving the annotation's loop names to loop
/// positions.
fn get_buffer_layout(
    op: OpId,
    buffer_ref: &crate::ir::BufferRef,
    ctx: &AnalysisContext,
) -> Option<Mapping> {
    let named = buffer_ref.layout.as_ref()?;
    let space = ctx.spaces.get(op);
    let mut exprs = vec![MappingExpr::None; named.mapping.use_domain_size()];
    for (i, name) in named.names.iter().enumerate() {
        if let Some(pos) = space.loop_names().iter().position(|n| n == name) {
            exprs[i] = MappingExpr::Dim(pos);
        }
    }
    let loops_to_indexed_loops = Mapping::new(space.mapping().len(), exprs);
    Some(loops_to_indexed_loops.compose(&named.mapping))
}

/// Unifies the shape of `buffer` with a new access whose layout is given
/// over the iteration space of `op`. Dimensions already part of the buffer's
/// loop-nest domain are hard anchors; the rest unify position by position
/// against the established layout, appending newly discovered dimensions to
/// the buffer domain.
fn unify_buffer_shape(
    buffer_name: &str,
    op: OpId,
    layout: &Mapping,
    ctx: &AnalysisContext,
    buffer: &mut Buffer,
) -> Result<(), Diagnostic> {
    let operation = ctx.program.op(op);
    let op_space = ctx.spaces.get(op);
    let op_loop_nest = ctx.fusion.get_loop_nest(op_space.loop_names());
    let buffer_loop_nest = ctx.fusion.get_loop_nest(buffer.loop_nest());

    // Concatenate [op loop-nest domain, op domain dimensions that are not
    // loop dimensions] and express the new layout over that domain.
    let shift = op_loop_nest.domain.len();
    let concat_domain_size = shift + operation.domain.len();
    let mut concat_exprs = op_loop_nest.domain_to_loops.exprs().to_vec();
    let shifted = op_space.mapping().shift_right(shift);
    concat_exprs.extend(
        shifted.exprs()[op_loop_nest.domain_to_loops.len()..]
            .iter()
            .cloned(),
    );
    let concat_domains = Mapping::new(concat_domain_size, concat_exprs);
    let concat_domains_to_layout = concat_domains.compose(layout).canonicalize();

    // Dimensions of the buffer's own loop-nest domain must match exactly.
    let mut constraints = vec![MappingExpr::None; concat_domain_size];
    for (i, slot) in constraints
        .iter_mut()
        .take(buffer_loop_nest.domain.len())
        .enumerate()
    {
        *slot = MappingExpr::Dim(i);
    }
    if let Some(old_layout) = buffer.layout() {
        for (new_expr, old_expr) in concat_domains_to_layout.exprs().iter().zip(old_layout.exprs())
        {
            if unification_constraints(new_expr, old_expr, &mut constraints).is_err() {
                return Err(Diagnostic::error(
                    codes::E0203,
                    operation.span,
                    format!(
                        "buffer \"{buffer_name}\" layout is incompatible with previous occurrences"
                    ),
                )
                .with_related(buffer.span(), "previous occurrence here"));
            }
        }
    }

    // Resolve constraints, appending newly discovered domain dimensions.
    let context_label = format!("buffer \"{buffer_name}\"");
    let indexed_dims = concat_domains_to_layout.dependency_mask();
    let mut new_domain = buffer.domain().to_vec();
    for (dimension, _) in indexed_dims.iter().enumerate().filter(|(_, used)| **used) {
        let mut dim_access = if dimension < shift {
            op_loop_nest.domain[dimension].clone()
        } else {
            let d = dimension - shift;
            let dependency = operation.shape[d]
                .dependency_mapping
                .resize_use_domain(operation.domain.len());
            ValueAccess {
                value: operation.domain[d],
                mapping: op_space.mapping().inverse().compose(&dependency),
            }
        };
        // The dimension may only depend on loops in the buffer loop nest.
        dim_access.mapping = dim_access.mapping.resize_use_domain(buffer.loop_nest().len());
        resolve_unification_constraint(
            operation.span,
            &context_label,
            dim_access,
            &mut constraints[dimension],
            &mut new_domain,
        )?;
    }

    let appended = new_domain[buffer.domain().len()..].to_vec();
    buffer.append_to_domain(appended);

    // Rename the new layout onto the unified domain and merge.
    let renaming = Mapping::new(buffer.domain().len(), constraints);
    if buffer
        .unify_layout(renaming.compose(&concat_domains_to_layout))
        .is_err()
    {
        return Err(Diagnostic::error(
            codes::E0203,
            operation.span,
            format!("buffer \"{buffer_name}\" layout is incompatible with previous occurrences"),
        )
        .with_related(buffer.span(), "previous occurrence here"));
    }
    Ok(())
}

/// Trims `buffer`'s loop nest so the buffer can be accessed from the given
/// iteration space with the given layout: only leading loops common to both
/// survive, capped by the first loop the layout indexes (a buffer cannot be
/// allocated inside a loop that indexes its own layout).
fn trim_buffer_loop_nest_for_access(
    space: &IterationSpace,
    layout: Option<&Mapping>,
    ctx: &AnalysisContext,
    buffer: &mut Buffer,
) {
    let mut max_loop_nest = space.num_common_loops_with(buffer.loop_nest());
    if let Some(layout) = layout {
        let indexed_loops = layout.dependency_mask();
        if let Some(first_indexed) = indexed_loops.iter().position(|&used| used) {
            if first_indexed < max_loop_nest {
                max_loop_nest = first_indexed;
            }
        }
    }
    let new_loop_nest = ctx
        .fusion
        .get_loop_nest(&space.loop_names()[..max_loop_nest]);
    buffer.set_loop_nest(&new_loop_nest);
}

// ── Buffer declaration ──────────────────────────────────────────────────────

/// Declares one storage annotation entry in `buffers`: inserts the buffer on
/// first sight, checks element type and rank against previous declarations,
/// trims the loop nest for this access, and unifies the shape.
fn declare_buffer(
    op: OpId,
    result: usize,
    buffer_ref: &crate::ir::BufferRef,
    ctx: &AnalysisContext,
    buffers: &mut BTreeMap<String, Buffer>,
) -> Result<(), Diagnostic> {
    let Some(name) = &buffer_ref.name else {
        return Ok(());
    };
    let operation = ctx.program.op(op);
    let element_type = ctx.program.value(operation.results[result]).element_type;
    let op_space = ctx.spaces.get(op);
    let loop_nest = ctx.fusion.get_loop_nest(op_space.loop_names());
    let buffer = buffers.entry(name.clone()).or_insert_with(|| {
        Buffer::new(operation.span, element_type, op_space.loop_names(), &loop_nest)
    });

    if buffer.element_type() != element_type {
        return Err(Diagnostic::error(
            codes::E0201,
            operation.span,
            format!("buffer \"{name}\" has a different element type than in its previous occurrence"),
        )
        .with_related(buffer.span(), "previous occurrence here"));
    }

    let layout = get_buffer_layout(op, buffer_ref, ctx);
    if let (Some(rank), Some(layout)) = (buffer.rank(), &layout) {
        if rank != layout.len() {
            return Err(Diagnostic::error(
                codes::E0202,
                operation.span,
                format!("buffer \"{name}\" rank differs from its previous occurrence"),
            )
            .with_related(buffer.span(), "previous occurrence here"));
        }
    }

    trim_buffer_loop_nest_for_access(op_space, layout.as_ref(), ctx, buffer);

    match layout {
        Some(layout) => unify_buffer_shape(name, op, &layout, ctx, buffer),
        None => Ok(()),
    }
}

/// Declares every buffer used by the program: external buffers from memory
/// import/export operations first, then annotated compute results. After all
/// declarations, partially characterized layouts must be fully known.
fn declare_buffers(
    ctx: &AnalysisContext,
    buffers: &mut BTreeMap<String, Buffer>,
) -> Result<(), Diagnostic> {
    for op in ctx.program.op_ids() {
        let operation = ctx.program.op(op);
        let Some(interface) = operation.memory_interface() else {
            continue;
        };
        let element_type = if interface.is_import {
            ctx.program.value(operation.results[0]).element_type
        } else {
            ctx.program.value(operation.operands[0].value).element_type
        };
        let op_space = ctx.spaces.get(op);
        let loop_nest = ctx.fusion.get_loop_nest(op_space.loop_names());
        let name = interface.buffer_name.to_string();
        if buffers.contains_key(&name) {
            return Err(Diagnostic::error(
                codes::E0204,
                operation.span,
                format!("buffer name \"{name}\" is already used"),
            ));
        }
        let buffer = buffers.entry(name.clone()).or_insert_with(|| {
            Buffer::new_external(
                op,
                operation.span,
                element_type,
                op_space.loop_names(),
                &loop_nest,
            )
        });

        let layout = external_buffer_layout(op, ctx);
        unify_buffer_shape(&name, op, &layout, ctx, buffer)?;
    }

    for op in ctx.program.op_ids() {
        let operation = ctx.program.op(op);
        if !operation.is_compute() {
            continue;
        }
        let Some(storage) = &operation.storage else {
            continue;
        };
        for (result, entry) in storage.iter().enumerate() {
            if let Some(buffer_ref) = entry {
                declare_buffer(op, result, buffer_ref, ctx, buffers)?;
            }
        }
    }

    for (name, buffer) in buffers.iter() {
        if let Some(layout) = buffer.layout() {
            if layout.has_none_exprs() {
                return Err(Diagnostic::error(
                    codes::E0205,
                    buffer.span(),
                    format!("buffer \"{name}\" layout is not fully specified"),
                ));
            }
        }
    }

    Ok(())
}

/// Layout of a memory import/export access as a mapping from the operation's
/// iteration space to the memory ranks (the trailing domain dimensions).
fn external_buffer_layout(op: OpId, ctx: &AnalysisContext) -> Mapping {
    let operation = ctx.program.op(op);
    let interface = operation
        .memory_interface()
        .expect("external layout requires a memory interface");
    let domain_to_layout =
        Mapping::identity(interface.memory_rank).shift_right(operation.parallel_domain_size());
    ctx.spaces
        .get(op)
        .mapping()
        .inverse()
        .compose(&domain_to_layout)
}

// ── Storage analysis ────────────────────────────────────────────────────────

/// Buffer metadata and storage information for every value of one program.
#[derive(Debug)]
pub struct StorageAnalysis {
    next_buffer_id: usize,
    buffers: BTreeMap<String, Buffer>,
    value_storages: Vec<ValueStorage>,
}

impl StorageAnalysis {
    /// Creates and populates the analysis. Returns no analysis and the
    /// failing diagnostic if storage information is inconsistent.
    pub fn create(ctx: &AnalysisContext) -> Result<Self, Diagnostic> {
        let mut analysis = Self {
            next_buffer_id: 0,
            buffers: BTreeMap::new(),
            value_storages: vec![ValueStorage::default(); ctx.program.num_values()],
        };
        analysis.init(ctx)?;
        Ok(analysis)
    }

    fn init(&mut self, ctx: &AnalysisContext) -> Result<(), Diagnostic> {
        declare_buffers(ctx, &mut self.buffers)?;
        self.compute_value_storages(ctx)?;
        self.verify_and_minimize_buffer_loop_nests(ctx)?;

        // Writes to external buffers must come after the memory they alias is
        // defined. Reads always come after writes, so writes suffice.
        for (name, buffer) in &self.buffers {
            let Some(import_op) = buffer.import_op() else {
                continue;
            };
            let interface = ctx
                .program
                .op(import_op)
                .memory_interface()
                .expect("external buffers are declared by memory interfaces");
            let memref_def = ctx.program.defining_op(interface.memref);
            for &(write, _) in buffer.writes() {
                if ctx.sequence.is_before(write, memref_def) {
                    return Err(Diagnostic::error(
                        codes::E0402,
                        ctx.program.op(write).span,
                        format!("buffer \"{name}\" is used before it is defined"),
                    )
                    .with_related(ctx.program.op(memref_def).span, "buffer defined here"));
                }
            }
        }
        Ok(())
    }

    /// Retrieves a buffer by name.
    pub fn get_buffer(&self, name: &str) -> Option<&Buffer> {
        self.buffers.get(name)
    }

    /// All buffers, indexed by name.
    pub fn buffers(&self) -> &BTreeMap<String, Buffer> {
        &self.buffers
    }

    /// Retrieves the storage of a value.
    pub fn get_storage(&self, value: ValueId) -> &ValueStorage {
        &self.value_storages[value.index()]
    }

    /// Returns a fresh buffer name. May be called repeatedly without
    /// invalidating the analysis.
    pub fn get_fresh_buffer_name(&mut self) -> String {
        loop {
            let name = format!("buffer_{}", self.next_buffer_id);
            self.next_buffer_id += 1;
            if !self.buffers.contains_key(&name) {
                return name;
            }
        }
    }

    /// Creates a new memory buffer nested in `loop_names`, assigns it to the
    /// value and propagates. Returns the fresh buffer name. This does not
    /// modify the program, only the analysis.
    pub fn create_buffer(
        &mut self,
        value: ValueId,
        loop_names: &[String],
        ctx: &AnalysisContext,
    ) -> String {
        let name = self.get_fresh_buffer_name();
        let def = ctx.program.value(value);
        let loop_nest = ctx.fusion.get_loop_nest(loop_names);
        self.buffers.insert(
            name.clone(),
            Buffer::new(def.span, def.element_type, loop_names, &loop_nest),
        );

        let mut storage = self.get_storage(value).clone();
        let merged = storage
            .merge_buffer_name(Some(&name))
            .and_then(|()| storage.merge_space(Some(MemorySpace::Memory)));
        assert!(merged.is_ok(), "fresh buffer assignment must be compatible");
        self.merge_storage(value, storage, ctx);
        name
    }

    /// Updates the storage of a value with information the caller has already
    /// validated, and propagates. Seeds a zero-rank layout into buffers whose
    /// rank is still unknown so downstream rank checks have a baseline.
    pub fn merge_storage(&mut self, value: ValueId, new_storage: ValueStorage, ctx: &AnalysisContext) {
        if let (Some(name), Some(layout)) = (&new_storage.buffer_name, &new_storage.layout) {
            let buffer = self
                .buffers
                .get_mut(name)
                .unwrap_or_else(|| panic!("merged storage names unknown buffer \"{name}\""));
            match buffer.rank() {
                Some(rank) => assert_eq!(
                    rank,
                    layout.len(),
                    "merged layout rank must match buffer \"{name}\""
                ),
                None => {
                    assert!(layout.is_empty(), "rank-seeding layouts must be empty");
                    let empty = Mapping::empty(buffer.domain().len());
                    let seeded = buffer.unify_layout(empty);
                    debug_assert!(seeded.is_ok());
                }
            }
        }
        let result = self.set_storage(value, new_storage, ctx);
        assert!(
            result.is_ok(),
            "merged storage must be compatible with existing storage"
        );
    }

    /// Extends the layout of a buffer by adding dimensions at the front. The
    /// previous layout must be a suffix of `new_layout`, which is given over
    /// the iteration space of `op`. Every value stored in the buffer receives
    /// a matching `?` prefix.
    pub fn add_dimensions_to_buffer(
        &mut self,
        buffer_name: &str,
        op: OpId,
        new_layout: &Mapping,
        ctx: &AnalysisContext,
    ) {
        let buffer = self
            .buffers
            .get_mut(buffer_name)
            .unwrap_or_else(|| panic!("unknown buffer \"{buffer_name}\""));
        let old_size = buffer
            .rank()
            .expect("cannot extend a buffer without a layout");
        assert!(new_layout.len() >= old_size);
        assert!(!buffer.is_external(), "external buffer shapes are fixed");

        let op_space = ctx.spaces.get(op);
        trim_buffer_loop_nest_for_access(op_space, Some(new_layout), ctx, buffer);
        buffer.add_none_prefix_to_layout(new_layout.len() - old_size);
        let unified = unify_buffer_shape(buffer_name, op, new_layout, ctx, buffer);
        assert!(
            unified.is_ok(),
            "extended layout must unify with buffer \"{buffer_name}\""
        );

        let values = buffer.values().to_vec();
        for value in values {
            self.value_storages[value.index()]
                .add_unknown_prefix_to_layout(new_layout.len() - old_size);
        }
    }

    /// Seeds value storage from annotations and import/export operations.
    fn compute_value_storages(&mut self, ctx: &AnalysisContext) -> Result<(), Diagnostic> {
        // Storage annotations on compute results.
        for op in ctx.program.op_ids() {
            let operation = ctx.program.op(op);
            if !operation.is_compute() {
                continue;
            }
            let Some(storage) = operation.storage.clone() else {
                continue;
            };
            for (result, entry) in storage.iter().enumerate() {
                let Some(buffer_ref) = entry else {
                    continue;
                };
                let layout = get_buffer_layout(op, buffer_ref, ctx);
                let seeded =
                    ValueStorage::new(Some(buffer_ref.space), buffer_ref.name.clone(), layout);
                self.set_storage(ctx.program.op(op).results[result], seeded, ctx)?;
            }
        }

        for op in ctx.program.op_ids() {
            let operation = ctx.program.op(op);
            match &operation.kind {
                crate::ir::OpKind::FromScalar => {
                    let seeded = ValueStorage::new(
                        Some(MemorySpace::Register),
                        None,
                        Some(Mapping::empty(0)),
                    );
                    self.set_storage(operation.results[0], seeded, ctx)?;
                }
                crate::ir::OpKind::FromMemory { buffer_name, .. } => {
                    let layout = external_buffer_layout(op, ctx);
                    let seeded = ValueStorage::new(
                        Some(MemorySpace::Memory),
                        Some(buffer_name.clone()),
                        Some(layout),
                    );
                    self.set_storage(operation.results[0], seeded, ctx)?;
                }
                crate::ir::OpKind::ToMemory { buffer_name, .. } => {
                    let layout = external_buffer_layout(op, ctx);
                    let operand_storage = ValueStorage::new(
                        Some(MemorySpace::Memory),
                        Some(buffer_name.clone()),
                        Some(layout),
                    );
                    let operand = operation.operands[0].clone();
                    let def = ctx.program.defining_op(operand.value);
                    let seeded = operand_storage.map(op, def, &operand.mapping.inverse(), ctx);
                    self.set_storage(operand.value, seeded, ctx)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Merges `storage` into the value's entry and propagates to a fixed
    /// point through pass-through and reduction operations. Conflicting
    /// merges abort with a diagnostic at the value's definition.
    fn set_storage(
        &mut self,
        value: ValueId,
        storage: ValueStorage,
        ctx: &AnalysisContext,
    ) -> Result<(), Diagnostic> {
        let mut work_list: Vec<ValueId> = Vec::new();
        self.update_storage(value, storage, ctx, &mut work_list)?;

        while let Some(value) = work_list.pop() {
            let storage = self.value_storages[value.index()].clone();

            // Forward: consumers whose result storage follows this value.
            for &(user, position) in ctx.program.uses(value) {
                let user_op = ctx.program.op(user);
                let result = match user_op.storage_role() {
                    StorageRole::PassThrough => 0,
                    StorageRole::Reduction { num_inits } => {
                        if position >= num_inits {
                            continue;
                        }
                        position
                    }
                    StorageRole::Opaque => continue,
                };
                let operand = &user_op.operands[position];
                let new_storage = storage.map_operand(user, operand, ctx);
                self.update_storage(user_op.results[result], new_storage, ctx, &mut work_list)?;
            }

            // Backward: the defining operation's operands.
            let def = ctx.program.defining_op(value);
            let def_op = ctx.program.op(def);
            match def_op.storage_role() {
                StorageRole::Reduction { num_inits } => {
                    let position = ctx.program.value(value).result;
                    if position < num_inits {
                        let operand = &def_op.operands[position];
                        let new_storage = storage.map(
                            def,
                            ctx.program.defining_op(operand.value),
                            &operand.mapping.inverse(),
                            ctx,
                        );
                        self.update_storage(operand.value, new_storage, ctx, &mut work_list)?;
                    }
                }
                StorageRole::PassThrough => {
                    for operand in &def_op.operands {
                        let new_storage = storage.map(
                            def,
                            ctx.program.defining_op(operand.value),
                            &operand.mapping.inverse(),
                            ctx,
                        );
                        self.update_storage(operand.value, new_storage, ctx, &mut work_list)?;
                    }
                }
                StorageRole::Opaque => {}
            }
        }
        Ok(())
    }

    /// One merge step: no-op at the fixed point, otherwise merges field-wise,
    /// registers newly named buffer uses, and queues the value.
    fn update_storage(
        &mut self,
        value: ValueId,
        new_storage: ValueStorage,
        ctx: &AnalysisContext,
        work_list: &mut Vec<ValueId>,
    ) -> Result<(), Diagnostic> {
        if new_storage == self.value_storages[value.index()] {
            return Ok(());
        }
        work_list.push(value);

        // A newly attached buffer name registers the value in the buffer and
        // trims the buffer loop nest for the definition and every use site.
        if self.value_storages[value.index()].buffer_name.is_none() {
            if let Some(name) = &new_storage.buffer_name {
                let buffer = self
                    .buffers
                    .get_mut(name)
                    .unwrap_or_else(|| panic!("storage names unknown buffer \"{name}\""));
                buffer.add_value(value, ctx.program);
                let def_space = ctx.spaces.get(ctx.program.defining_op(value));
                trim_buffer_loop_nest_for_access(def_space, None, ctx, buffer);
                for &(user, _) in ctx.program.uses(value) {
                    trim_buffer_loop_nest_for_access(ctx.spaces.get(user), None, ctx, buffer);
                }
            }
        }

        let span = ctx.program.value(value).span;
        let existing = &mut self.value_storages[value.index()];
        if existing.merge_space(new_storage.space).is_err() {
            return Err(Diagnostic::error(
                codes::E0301,
                span,
                format!(
                    "conflicting memory spaces: expected {}, got {}",
                    display_or_unset(&new_storage.space),
                    display_or_unset(&existing.space)
                ),
            ));
        }
        if existing
            .merge_buffer_name(new_storage.buffer_name.as_deref())
            .is_err()
        {
            return Err(Diagnostic::error(
                codes::E0302,
                span,
                format!(
                    "conflicting buffer names: expected {}, got {}",
                    display_or_unset(&new_storage.buffer_name),
                    display_or_unset(&existing.buffer_name)
                ),
            ));
        }
        if existing.merge_layout(new_storage.layout.as_ref()).is_err() {
            return Err(Diagnostic::error(
                codes::E0303,
                span,
                format!(
                    "conflicting layouts: expected {}, got {}",
                    display_or_unset(&new_storage.layout),
                    display_or_unset(&existing.layout)
                ),
            ));
        }
        Ok(())
    }

    /// Verifies that buffer loop nests are valid and shrinks them to the
    /// minimal legal prefix. Automatically run at creation; call manually
    /// after mutating the analysis from later passes.
    pub fn verify_and_minimize_buffer_loop_nests(
        &mut self,
        ctx: &AnalysisContext,
    ) -> Result<(), Diagnostic> {
        let names: Vec<String> = self.buffers.keys().cloned().collect();
        for name in names {
            let buffer = &self.buffers[&name];
            let Some(layout) = buffer.layout().cloned() else {
                continue;
            };
            let mut min_num_loops = 0;

            // Domain dimensions the layout depends on must be reachable from
            // the loop nest.
            let used_dimensions = layout.dependency_mask();
            for (dim, _) in used_dimensions.iter().enumerate().filter(|(_, used)| **used) {
                let dim_mapping = &buffer.domain()[dim].mapping;
                if dim_mapping.has_none_exprs() {
                    return Err(Diagnostic::error(
                        codes::E0401,
                        buffer.span(),
                        format!("buffer \"{name}\" layout depends on loops it cannot be nested in"),
                    ));
                }
                min_num_loops = min_num_loops.max(dim_mapping.min_domain_size());
            }

            // Dependencies across layout and loop-nest dimensions: each
            // layout dimension's accessed shape must be computable within the
            // loop-nest window.
            let instance = buffer_instance_layout(buffer, ctx.fusion);
            let inverse = instance.inverse();
            for expr in layout.exprs() {
                let new_min = Mapping::accessed_min_domain_size(expr, inverse.exprs());
                if new_min > buffer.loop_nest().len() {
                    return Err(Diagnostic::error(
                        codes::E0401,
                        buffer.span(),
                        format!("buffer \"{name}\" layout depends on loops it cannot be nested in"),
                    ));
                }
                min_num_loops = min_num_loops.max(new_min);
            }

            // External buffer loop nests are fixed by the import site.
            if buffer.is_external() {
                continue;
            }

            check_malloc_insertion_point(&name, buffer, &used_dimensions, ctx, &mut min_num_loops)?;

            let new_loop_nest = ctx
                .fusion
                .get_loop_nest(&buffer.loop_nest()[..min_num_loops.min(buffer.loop_nest().len())]);
            self.buffers
                .get_mut(&name)
                .expect("buffer names are stable during minimization")
                .set_loop_nest(&new_loop_nest);
        }
        Ok(())
    }
}

/// Ensures an allocation point exists for the buffer: every dimension its
/// layout depends on must be defined before the first write, and must not
/// require more loops than the buffer is nested in. Raises `min_num_loops`
/// so the allocation can see every dimension argument.
fn check_malloc_insertion_point(
    buffer_name: &str,
    buffer: &Buffer,
    used_dimensions: &[bool],
    ctx: &AnalysisContext,
    min_num_loops: &mut usize,
) -> Result<(), Diagnostic> {
    let Some(&(mut first_write, _)) = buffer.writes().first() else {
        return Ok(());
    };
    for &(write, _) in buffer.writes() {
        if ctx.sequence.is_before(write, first_write) {
            first_write = write;
        }
    }

    let write_loops = ctx.spaces.get(first_write).loop_names();
    for (dim, _) in used_dimensions.iter().enumerate().filter(|(_, used)| **used) {
        let dimension_op = ctx.program.defining_op(buffer.domain()[dim].value);
        if ctx.sequence.is_before(first_write, dimension_op) {
            return Err(Diagnostic::error(
                codes::E0402,
                ctx.program.op(first_write).span,
                format!("buffer \"{buffer_name}\" is used before one of its dimensions is defined"),
            )
            .with_related(ctx.program.op(dimension_op).span, "dimension defined here"));
        }

        for operand in &ctx.program.op(dimension_op).operands {
            let operand_def = ctx.program.defining_op(operand.value);
            let operand_loops = ctx.spaces.get(operand_def).loop_names();
            let new_min = operand_loops
                .iter()
                .zip(write_loops)
                .take_while(|(a, b)| a == b)
                .count();

            if new_min > buffer.loop_nest().len() {
                return Err(Diagnostic::error(
                    codes::E0403,
                    ctx.program.op(first_write).span,
                    format!(
                        "buffer \"{buffer_name}\" depends on a dimension that is defined after \
                         the buffer is allocated"
                    ),
                )
                .with_related(ctx.program.op(dimension_op).span, "dimension defined here"));
            }
            *min_num_loops = (*min_num_loops).max(new_min);
        }
    }
    Ok(())
}

// ── Verification ────────────────────────────────────────────────────────────

/// Structural well-formedness of one operation's storage annotation.
fn verify_storage_attr_well_formed(op: OpId, ctx: &AnalysisContext) -> Vec<Diagnostic> {
    let operation = ctx.program.op(op);
    let Some(storage) = &operation.storage else {
        return Vec::new();
    };
    let mut diagnostics = Vec::new();
    let span = operation.span;

    if storage.len() != operation.results.len() {
        diagnostics.push(Diagnostic::error(
            codes::E0100,
            span,
            "wrong number of storage entries",
        ));
        return diagnostics;
    }

    let loop_names: HashSet<&str> = operation
        .loop_nest
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|attr| attr.name.as_str())
        .collect();

    let mut buffer_names: HashSet<&str> = HashSet::new();
    for (entry, &result) in storage.iter().zip(&operation.results) {
        let Some(buffer_ref) = entry else {
            continue;
        };
        let element_type = ctx.program.value(result).element_type;
        if buffer_ref.space == MemorySpace::Memory && !element_type.memory_eligible() {
            diagnostics.push(Diagnostic::error(
                codes::E0100,
                span,
                "index and memref variables cannot be allocated in memory",
            ));
        }
        if (buffer_ref.space == MemorySpace::Memory) != buffer_ref.name.is_some() {
            diagnostics.push(Diagnostic::error(
                codes::E0100,
                span,
                "buffers must have a name if and only if they are stored in memory",
            ));
        }
        if let Some(name) = &buffer_ref.name {
            if !buffer_names.insert(name) {
                diagnostics.push(Diagnostic::error(
                    codes::E0100,
                    span,
                    "operation cannot store two results in the same buffer",
                ));
            }
        }
        let Some(layout) = &buffer_ref.layout else {
            continue;
        };
        if layout.names.len() != layout.mapping.use_domain_size() {
            diagnostics.push(Diagnostic::error(
                codes::E0100,
                span,
                "layout loop names do not match the mapping use domain",
            ));
        }
        if layout.mapping.has_unknown_exprs() {
            diagnostics.push(Diagnostic::error(
                codes::E0100,
                span,
                "layouts cannot contain `?` expressions",
            ));
        }
        if buffer_ref.space == MemorySpace::Register && !layout.mapping.is_empty() {
            diagnostics.push(Diagnostic::error(
                codes::E0100,
                span,
                "only 0-dimensional values can be stored in registers",
            ));
        }
        for name in &layout.names {
            if !loop_names.contains(name.as_str()) {
                diagnostics.push(Diagnostic::error(
                    codes::E0100,
                    span,
                    format!("unknown loop name \"{name}\""),
                ));
            }
        }
    }
    diagnostics
}

/// Checks one producer→consumer edge: dimensions not shared between the two
/// loop orderings must be materialized by the value's layout. Deferred while
/// either iteration space is unspecified or the value has no layout yet.
fn verify_communication_volume_for_access(
    span: Span,
    use_space: &IterationSpace,
    access: &ValueAccess,
    ctx: &AnalysisContext,
    analysis: &StorageAnalysis,
) -> Result<(), Diagnostic> {
    let def = ctx.program.defining_op(access.value);
    let def_space = ctx.spaces.get(def);
    if !use_space.fully_specified() || !def_space.fully_specified() {
        return Ok(());
    }
    let storage = analysis.get_storage(access.value);
    let Some(layout) = storage.layout() else {
        return Ok(());
    };

    let volume = communication_volume(access.mapping.len(), def_space, use_space);
    let layout_to_operand = def_space.mapping().compose(layout).inverse();
    let layout_to_volume = layout_to_operand.compose(&volume).canonicalize();

    if layout_to_volume.has_none_exprs() {
        return Err(Diagnostic::error(
            codes::E0501,
            span,
            "operand storage must cover all operand dimensions that are not covered by loops \
             common to both operand and user",
        )
        .with_related(ctx.program.value(access.value).span, "value defined here"));
    }
    Ok(())
}

/// Verifies communication volume for every value operand and every
/// inter-dimension value dependency of the program.
fn verify_communication_volume(
    ctx: &AnalysisContext,
    analysis: &StorageAnalysis,
) -> Result<(), Diagnostic> {
    for op in ctx.program.op_ids() {
        let operation = ctx.program.op(op);
        let use_space = ctx.spaces.get(op);

        for operand in &operation.operands {
            let access = ValueAccess {
                value: operand.value,
                mapping: operand.mapping.clone(),
            };
            verify_communication_volume_for_access(operation.span, use_space, &access, ctx, analysis)?;
        }

        // Dimension dependencies: values feeding the definition of a domain
        // dimension are consumed through the dimension's dependency mapping.
        let domain_size = operation.domain.len();
        for (dim, &dimension) in operation.domain.iter().enumerate() {
            let dim_op = ctx.program.defining_op(dimension);
            let dim_mapping = operation.shape[dim]
                .dependency_mapping
                .resize_use_domain(domain_size);
            for operand in &ctx.program.op(dim_op).operands {
                let access = ValueAccess {
                    value: operand.value,
                    mapping: dim_mapping.compose(&operand.mapping),
                };
                verify_communication_volume_for_access(
                    operation.span,
                    use_space,
                    &access,
                    ctx,
                    analysis,
                )?;
            }
        }
    }
    Ok(())
}

/// Verifies that storage annotations in the program are correct: structural
/// well-formedness, declaration/propagation consistency, in-place update
/// layouts, and communication volume. Returns the populated analysis on
/// success.
pub fn verify_storages(ctx: &AnalysisContext) -> Result<StorageAnalysis, Vec<Diagnostic>> {
    let mut diagnostics = Vec::new();
    for op in ctx.program.op_ids() {
        diagnostics.extend(verify_storage_attr_well_formed(op, ctx));
    }
    if !diagnostics.is_empty() {
        return Err(diagnostics);
    }

    let analysis = StorageAnalysis::create(ctx).map_err(|d| vec![d])?;

    // Operations updating a buffer in place must use the same layout for the
    // operand and the result.
    for op in ctx.program.op_ids() {
        let operation = ctx.program.op(op);
        for &result in &operation.results {
            let result_storage = analysis.get_storage(result);
            let Some(result_buffer) = result_storage.buffer_name() else {
                continue;
            };
            for operand in &operation.operands {
                let operand_storage = analysis.get_storage(operand.value);
                if operand_storage.buffer_name() != Some(result_buffer) {
                    continue;
                }
                let mapped = operand_storage.map_operand(op, operand, ctx);
                if mapped.layout() != result_storage.layout() {
                    return Err(vec![Diagnostic::error(
                        codes::E0502,
                        operation.span,
                        format!(
                            "in-place update of buffer \"{result_buffer}\" must use the same \
                             layout in input and output ({} vs {})",
                            display_or_unset(&mapped.layout),
                            display_or_unset(&result_storage.layout)
                        ),
                    )]);
                }
            }
        }
    }

    // TODO: verify that a value stored in a buffer is not overwritten by a
    // later write to the same buffer before its last read.
    verify_communication_volume(ctx, &analysis).map_err(|d| vec![d])?;
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ElementType, LoopAttr, OpKind, ProgramBuilder};
    use crate::pipeline::Analyses;

    fn identity_layout(n: usize) -> Mapping {
        Mapping::identity(n)
    }

    #[test]
    fn merge_is_monotonic_and_idempotent() {
        let mut storage = ValueStorage::default();
        storage.merge_space(Some(MemorySpace::Memory)).expect("unset -> set");
        storage.merge_space(None).expect("none is a no-op");
        storage.merge_space(Some(MemorySpace::Memory)).expect("equal confirms");
        storage.merge_space(Some(MemorySpace::Register)).expect_err("conflict");

        storage.merge_buffer_name(Some("B")).expect("unset -> set");
        storage.merge_buffer_name(Some("B")).expect("equal confirms");
        storage.merge_buffer_name(Some("C")).expect_err("conflict");

        let layout = identity_layout(2);
        storage.merge_layout(Some(&layout)).expect("unset -> set");
        storage.merge_layout(Some(&layout)).expect("equal confirms");
        let swapped = Mapping::new(2, vec![MappingExpr::Dim(1), MappingExpr::Dim(0)]);
        storage.merge_layout(Some(&swapped)).expect_err("conflict");

        let copy = storage.clone();
        let mut merged = storage.clone();
        merged.merge_space(copy.space()).expect("self-merge");
        merged
            .merge_buffer_name(copy.buffer_name())
            .expect("self-merge");
        merged.merge_layout(copy.layout()).expect("self-merge");
        assert_eq!(merged, storage);
    }

    #[test]
    fn merge_layout_substitutes_unknowns_only() {
        let mut storage = ValueStorage::new(
            None,
            None,
            Some(Mapping::new(2, vec![MappingExpr::Unknown, MappingExpr::Dim(1)])),
        );
        let concrete = Mapping::new(2, vec![MappingExpr::Dim(0), MappingExpr::Dim(1)]);
        storage.merge_layout(Some(&concrete)).expect("? resolves");
        assert_eq!(storage.layout(), Some(&concrete));
    }

    #[test]
    fn communication_volume_covers_uncommon_dimensions() {
        let mut b = ProgramBuilder::new();
        let d0 = b.static_range(8);
        let producer = b
            .op(OpKind::Compute { name: "p".into() })
            .domain(&[d0])
            .loop_nest(vec![LoopAttr::new("i", 0)])
            .results(&[(ElementType::F32, 1)])
            .build()[0];
        let consumer = b
            .op(OpKind::Compute { name: "c".into() })
            .operand(producer, Mapping::new(0, vec![MappingExpr::None]))
            .loop_nest(vec![])
            .results(&[(ElementType::F32, 0)])
            .build()[0];
        let program = b.finish();
        let analyses = Analyses::build(&program).expect("analyses");
        let ctx = analyses.ctx(&program);

        let def_space = ctx.spaces.get(program.defining_op(producer));
        let use_space = ctx.spaces.get(program.defining_op(consumer));
        // No common loops: the whole rank-1 domain must be materialized.
        let volume = communication_volume(1, def_space, use_space);
        assert_eq!(volume, Mapping::identity(1));

        // Same producer against itself: everything flows through loop "i".
        let volume = communication_volume(1, def_space, def_space);
        assert_eq!(volume, Mapping::new(1, vec![]));
    }

    #[test]
    fn fresh_buffer_names_skip_collisions() {
        let mut b = ProgramBuilder::new();
        let d0 = b.static_range(8);
        b.op(OpKind::Compute { name: "w".into() })
            .domain(&[d0])
            .loop_nest(vec![LoopAttr::new("i", 0)])
            .storage(vec![Some(crate::ir::BufferRef {
                space: MemorySpace::Memory,
                name: Some("buffer_0".into()),
                layout: Some(crate::ir::NamedMapping {
                    names: vec!["i".into()],
                    mapping: Mapping::identity(1),
                }),
            })])
            .results(&[(ElementType::F32, 1)])
            .build();
        let program = b.finish();
        let analyses = Analyses::build(&program).expect("analyses");
        let ctx = analyses.ctx(&program);

        let mut analysis = StorageAnalysis::create(&ctx).expect("analysis");
        assert_eq!(analysis.get_fresh_buffer_name(), "buffer_1");
        assert_eq!(analysis.get_fresh_buffer_name(), "buffer_2");
    }

    #[test]
    fn minimization_preserves_loop_nest_prefix() {
        // The buffer is written under loops (i, j) but its layout only
        // indexes j, so the nest must shrink to the empty prefix (a buffer
        // cannot live inside the loop indexing it).
        let mut b = ProgramBuilder::new();
        let d0 = b.static_range(4);
        let d1 = b.static_range(8);
        b.op(OpKind::Compute { name: "w".into() })
            .domain(&[d0, d1])
            .loop_nest(vec![LoopAttr::new("i", 0), LoopAttr::new("j", 1)])
            .storage(vec![Some(crate::ir::BufferRef {
                space: MemorySpace::Memory,
                name: Some("B".into()),
                layout: Some(crate::ir::NamedMapping {
                    names: vec!["j".into()],
                    mapping: Mapping::identity(1),
                }),
            })])
            .results(&[(ElementType::F32, 2)])
            .build();
        let program = b.finish();
        let analyses = Analyses::build(&program).expect("analyses");
        let ctx = analyses.ctx(&program);

        let analysis = StorageAnalysis::create(&ctx).expect("analysis");
        let buffer = analysis.get_buffer("B").expect("declared");
        // "j" indexes the layout, so not even "i" survives: the access trim
        // caps the nest at the first indexed loop position.
        assert!(buffer.loop_nest().is_empty());
        assert_eq!(buffer.rank(), Some(1));
    }
}
