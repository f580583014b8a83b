// desc.rs — Serde program descriptions
//
// The structured input format the `trc` driver consumes: a JSON array of
// operations with named results. `build` validates references and symbols
// and lowers the description into an `ir::Program`.
//
// Preconditions: none.
// Postconditions: a returned Program has consistent def/use tables.
// Failure modes: unknown value names, unknown element-type or memory-space
//                symbols, out-of-range dimensions, forward references —
//                all reported as E0001 diagnostics.
// Side effects: none.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::diag::{codes, Diagnostic};
use crate::ir::{
    BufferRef, ElementType, LoopAttr, MemorySpace, NamedMapping, OpKind, Program, ProgramBuilder,
    Span, ValueId,
};
use crate::mapping::{Mapping, MappingExpr};

// ── Description model ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramDesc {
    pub ops: Vec<OpDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpDesc {
    pub kind: OpKindDesc,
    #[serde(default)]
    pub domain: Vec<String>,
    #[serde(default)]
    pub operands: Vec<OperandDesc>,
    #[serde(default)]
    pub results: Vec<ResultDesc>,
    #[serde(default)]
    pub loop_nest: Option<Vec<LoopDesc>>,
    #[serde(default)]
    pub storage: Option<Vec<Option<BufferRefDesc>>>,
    #[serde(default)]
    pub sequence: Option<i64>,
    #[serde(default)]
    pub span: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKindDesc {
    StaticRange {
        size: u64,
    },
    DynRange,
    Compute {
        name: String,
    },
    Reduce {
        num_inits: usize,
    },
    Fby,
    ProjAny,
    ProjLast,
    FromScalar,
    FromMemory {
        buffer_name: String,
        memref: String,
        memory_rank: usize,
    },
    ToMemory {
        buffer_name: String,
        memref: String,
        memory_rank: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperandDesc {
    pub value: String,
    pub mapping: MappingDesc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultDesc {
    pub name: String,
    pub element_type: String,
    #[serde(default)]
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopDesc {
    pub name: String,
    pub dimension: usize,
    #[serde(default = "default_step")]
    pub step: u64,
    #[serde(default)]
    pub unroll: Option<u32>,
}

fn default_step() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferRefDesc {
    pub space: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub layout: Option<NamedMappingDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedMappingDesc {
    pub names: Vec<String>,
    pub mapping: MappingDesc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingDesc {
    pub use_domain: usize,
    pub exprs: Vec<ExprDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprDesc {
    Dim(usize),
    Stripe {
        operand: Box<ExprDesc>,
        factors: Vec<u64>,
    },
    Unstripe {
        operands: Vec<ExprDesc>,
        factors: Vec<u64>,
    },
    Unknown,
    None,
}

// ── Lowering ────────────────────────────────────────────────────────────────

struct Lowering {
    values: HashMap<String, ValueId>,
    diagnostics: Vec<Diagnostic>,
}

impl Lowering {
    fn error(&mut self, span: Span, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(codes::E0001, span, message));
    }

    fn resolve(&mut self, name: &str, span: Span) -> Option<ValueId> {
        match self.values.get(name) {
            Some(&value) => Some(value),
            None => {
                self.error(span, format!("unknown value \"{name}\""));
                None
            }
        }
    }
}

fn lower_expr(expr: &ExprDesc, span: Span, lowering: &mut Lowering) -> MappingExpr {
    match expr {
        ExprDesc::Dim(d) => MappingExpr::Dim(*d),
        ExprDesc::Stripe { operand, factors } => {
            if factors.is_empty() {
                lowering.error(span, "stripe expressions need at least one factor");
                return MappingExpr::None;
            }
            MappingExpr::Stripe {
                operand: Box::new(lower_expr(operand, span, lowering)),
                factors: factors.clone(),
            }
        }
        ExprDesc::Unstripe { operands, factors } => {
            if factors.is_empty() || operands.len() != factors.len() {
                lowering.error(span, "unstripe operands and factors must pair up");
                return MappingExpr::None;
            }
            MappingExpr::UnStripe {
                operands: operands
                    .iter()
                    .map(|operand| lower_expr(operand, span, lowering))
                    .collect(),
                factors: factors.clone(),
            }
        }
        ExprDesc::Unknown => MappingExpr::Unknown,
        ExprDesc::None => MappingExpr::None,
    }
}

fn lower_mapping(mapping: &MappingDesc, span: Span, lowering: &mut Lowering) -> Mapping {
    Mapping::new(
        mapping.use_domain,
        mapping
            .exprs
            .iter()
            .map(|expr| lower_expr(expr, span, lowering))
            .collect(),
    )
}

fn lower_element_type(symbol: &str, span: Span, lowering: &mut Lowering) -> Option<ElementType> {
    match symbol {
        "f32" => Some(ElementType::F32),
        "f64" => Some(ElementType::F64),
        "i32" => Some(ElementType::I32),
        "i64" => Some(ElementType::I64),
        "index" => Some(ElementType::Index),
        "memref" => Some(ElementType::MemRef),
        _ => {
            lowering.error(span, format!("unknown element type \"{symbol}\""));
            None
        }
    }
}

fn lower_space(symbol: &str, span: Span, lowering: &mut Lowering) -> Option<MemorySpace> {
    match symbol {
        "register" => Some(MemorySpace::Register),
        "memory" => Some(MemorySpace::Memory),
        _ => {
            lowering.error(span, format!("unknown memory space \"{symbol}\""));
            None
        }
    }
}

fn lower_buffer_ref(
    desc: &BufferRefDesc,
    span: Span,
    lowering: &mut Lowering,
) -> Option<BufferRef> {
    let space = lower_space(&desc.space, span, lowering)?;
    Some(BufferRef {
        space,
        name: desc.name.clone(),
        layout: desc.layout.as_ref().map(|layout| NamedMapping {
            names: layout.names.clone(),
            mapping: lower_mapping(&layout.mapping, span, lowering),
        }),
    })
}

/// Lowers a description into a program. All reference and symbol errors are
/// collected; any error means no program is produced.
pub fn build(desc: &ProgramDesc) -> Result<Program, Vec<Diagnostic>> {
    let mut builder = ProgramBuilder::new();
    let mut lowering = Lowering {
        values: HashMap::new(),
        diagnostics: Vec::new(),
    };

    for (index, op_desc) in desc.ops.iter().enumerate() {
        let span = match op_desc.span {
            Some((start, end)) => Span::new(start, end),
            None => Span::new(index as u32, index as u32 + 1),
        };

        let kind = match &op_desc.kind {
            OpKindDesc::StaticRange { size } => Some(OpKind::StaticRange { size: *size }),
            OpKindDesc::DynRange => Some(OpKind::DynRange),
            OpKindDesc::Compute { name } => Some(OpKind::Compute { name: name.clone() }),
            OpKindDesc::Reduce { num_inits } => Some(OpKind::Reduce {
                num_inits: *num_inits,
            }),
            OpKindDesc::Fby => Some(OpKind::Fby),
            OpKindDesc::ProjAny => Some(OpKind::ProjAny),
            OpKindDesc::ProjLast => Some(OpKind::ProjLast),
            OpKindDesc::FromScalar => Some(OpKind::FromScalar),
            OpKindDesc::FromMemory {
                buffer_name,
                memref,
                memory_rank,
            } => lowering.resolve(memref, span).map(|memref| OpKind::FromMemory {
                buffer_name: buffer_name.clone(),
                memref,
                memory_rank: *memory_rank,
            }),
            OpKindDesc::ToMemory {
                buffer_name,
                memref,
                memory_rank,
            } => lowering.resolve(memref, span).map(|memref| OpKind::ToMemory {
                buffer_name: buffer_name.clone(),
                memref,
                memory_rank: *memory_rank,
            }),
        };

        let domain: Vec<ValueId> = op_desc
            .domain
            .iter()
            .filter_map(|name| lowering.resolve(name, span))
            .collect();
        if domain.len() != op_desc.domain.len() {
            continue;
        }
        let Some(kind) = kind else {
            continue;
        };

        // Arity invariants the analyses index into.
        let (min_operands, exact_results) = match &op_desc.kind {
            OpKindDesc::StaticRange { .. } | OpKindDesc::DynRange | OpKindDesc::FromScalar => {
                (0, Some(1))
            }
            OpKindDesc::Fby | OpKindDesc::ProjAny | OpKindDesc::ProjLast => (1, Some(1)),
            OpKindDesc::Reduce { num_inits } => (*num_inits, Some(*num_inits)),
            OpKindDesc::FromMemory { .. } => (0, Some(1)),
            OpKindDesc::ToMemory { .. } => (1, Some(0)),
            OpKindDesc::Compute { .. } => (0, None),
        };
        if op_desc.operands.len() < min_operands
            || exact_results.is_some_and(|n| op_desc.results.len() != n)
        {
            lowering.error(span, "operation has the wrong number of operands or results");
            continue;
        }
        if let OpKindDesc::FromMemory { memory_rank, .. } | OpKindDesc::ToMemory { memory_rank, .. } =
            &op_desc.kind
        {
            if *memory_rank > domain.len() {
                lowering.error(span, "memory rank exceeds the operation domain");
                continue;
            }
        }

        let mut operands = Vec::with_capacity(op_desc.operands.len());
        for operand in &op_desc.operands {
            let Some(value) = lowering.resolve(&operand.value, span) else {
                continue;
            };
            operands.push((value, lower_mapping(&operand.mapping, span, &mut lowering)));
        }

        let mut op = builder.op(kind).span(span).domain(&domain);
        for (value, mapping) in operands {
            op = op.operand(value, mapping);
        }
        if let Some(loop_nest) = &op_desc.loop_nest {
            let mut loops = Vec::with_capacity(loop_nest.len());
            for loop_desc in loop_nest {
                if loop_desc.dimension >= domain.len() {
                    lowering.error(
                        span,
                        format!(
                            "loop \"{}\" references dimension {} outside the domain",
                            loop_desc.name, loop_desc.dimension
                        ),
                    );
                    continue;
                }
                let mut attr = LoopAttr::new(loop_desc.name.clone(), loop_desc.dimension)
                    .with_step(loop_desc.step);
                attr.unroll = loop_desc.unroll;
                loops.push(attr);
            }
            op = op.loop_nest(loops);
        }
        if let Some(storage) = &op_desc.storage {
            let entries = storage
                .iter()
                .map(|entry| {
                    entry
                        .as_ref()
                        .and_then(|buffer_ref| lower_buffer_ref(buffer_ref, span, &mut lowering))
                })
                .collect();
            op = op.storage(entries);
        }
        if let Some(sequence) = op_desc.sequence {
            op = op.sequence(sequence);
        }

        let mut result_types = Vec::with_capacity(op_desc.results.len());
        for result in &op_desc.results {
            let Some(element_type) = lower_element_type(&result.element_type, span, &mut lowering)
            else {
                continue;
            };
            result_types.push((element_type, result.rank));
        }
        if result_types.len() != op_desc.results.len() {
            continue;
        }
        let results = op.results(&result_types).build();
        for (result, value) in op_desc.results.iter().zip(results) {
            if lowering.values.insert(result.name.clone(), value).is_some() {
                lowering.error(span, format!("value name \"{}\" is already used", result.name));
            }
        }
    }

    if lowering.diagnostics.is_empty() {
        Ok(builder.finish())
    } else {
        Err(lowering.diagnostics)
    }
}
