// mapping.rs — Mapping-expression algebra
//
// A `Mapping` is a symbolic function from a use domain of dimension indices
// to expressions over a definition domain: one expression per definition
// dimension, each built from use-domain dimensions, stripe/unstripe
// decompositions, the substitutable placeholder `?`, and the unresolved
// marker `none`.
//
// Preconditions: composition requires the outer mapping's use domain to match
//                the inner mapping's definition domain.
// Postconditions: all operations return new mappings; nothing is mutated in
//                 place except through the explicit `&mut` constraint slots
//                 used by `set_inverse`.
// Failure modes: `unify`/`unify_unknown_exprs` return `None` on structural
//                conflicts; `inverse` keeps the first binding for
//                non-injective mappings.
// Side effects: none.

use std::fmt;

// ── Expressions ─────────────────────────────────────────────────────────────

/// One symbolic index expression over a use domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MappingExpr {
    /// A use-domain dimension.
    Dim(usize),
    /// One level of a stripe decomposition of `operand`. `factors` lists the
    /// stripe steps from outermost to this level; the last factor is this
    /// level's step.
    Stripe {
        operand: Box<MappingExpr>,
        factors: Vec<u64>,
    },
    /// Recombines stripe levels into the original dimension. `operands[i]` is
    /// the level with step `factors[i]`, outermost first.
    UnStripe {
        operands: Vec<MappingExpr>,
        factors: Vec<u64>,
    },
    /// The `?` placeholder: unknown, substitutable by unification.
    Unknown,
    /// The `none` marker: unresolved, no information available.
    None,
}

impl MappingExpr {
    /// Builds the `level`-th stripe (0-based, outermost first) of dimension
    /// `dim` decomposed with the given steps.
    pub fn stripe_of_dim(dim: usize, steps: &[u64], level: usize) -> MappingExpr {
        MappingExpr::Stripe {
            operand: Box::new(MappingExpr::Dim(dim)),
            factors: steps[..=level].to_vec(),
        }
    }

    /// Replaces every `Dim(d)` with `exprs[d]`.
    pub fn substitute(&self, exprs: &[MappingExpr]) -> MappingExpr {
        match self {
            MappingExpr::Dim(d) => exprs.get(*d).cloned().unwrap_or(MappingExpr::None),
            MappingExpr::Stripe { operand, factors } => MappingExpr::Stripe {
                operand: Box::new(operand.substitute(exprs)),
                factors: factors.clone(),
            },
            MappingExpr::UnStripe { operands, factors } => MappingExpr::UnStripe {
                operands: operands.iter().map(|e| e.substitute(exprs)).collect(),
                factors: factors.clone(),
            },
            MappingExpr::Unknown => MappingExpr::Unknown,
            MappingExpr::None => MappingExpr::None,
        }
    }

    pub fn has_none(&self) -> bool {
        match self {
            MappingExpr::None => true,
            MappingExpr::Dim(_) | MappingExpr::Unknown => false,
            MappingExpr::Stripe { operand, .. } => operand.has_none(),
            MappingExpr::UnStripe { operands, .. } => operands.iter().any(|e| e.has_none()),
        }
    }

    pub fn has_unknown(&self) -> bool {
        match self {
            MappingExpr::Unknown => true,
            MappingExpr::Dim(_) | MappingExpr::None => false,
            MappingExpr::Stripe { operand, .. } => operand.has_unknown(),
            MappingExpr::UnStripe { operands, .. } => operands.iter().any(|e| e.has_unknown()),
        }
    }

    pub fn is_fully_specified(&self) -> bool {
        !self.has_none() && !self.has_unknown()
    }

    /// Marks every use-domain dimension the expression references.
    pub fn collect_dependencies(&self, mask: &mut [bool]) {
        match self {
            MappingExpr::Dim(d) => {
                if let Some(slot) = mask.get_mut(*d) {
                    *slot = true;
                }
            }
            MappingExpr::Stripe { operand, .. } => operand.collect_dependencies(mask),
            MappingExpr::UnStripe { operands, .. } => {
                for e in operands {
                    e.collect_dependencies(mask);
                }
            }
            MappingExpr::Unknown | MappingExpr::None => {}
        }
    }

    /// Minimal use-domain size the expression is valid in.
    pub fn min_domain_size(&self) -> usize {
        match self {
            MappingExpr::Dim(d) => d + 1,
            MappingExpr::Stripe { operand, .. } => operand.min_domain_size(),
            MappingExpr::UnStripe { operands, .. } => operands
                .iter()
                .map(|e| e.min_domain_size())
                .max()
                .unwrap_or(0),
            MappingExpr::Unknown | MappingExpr::None => 0,
        }
    }

    fn shift_right(&self, shift: usize) -> MappingExpr {
        match self {
            MappingExpr::Dim(d) => MappingExpr::Dim(d + shift),
            MappingExpr::Stripe { operand, factors } => MappingExpr::Stripe {
                operand: Box::new(operand.shift_right(shift)),
                factors: factors.clone(),
            },
            MappingExpr::UnStripe { operands, factors } => MappingExpr::UnStripe {
                operands: operands.iter().map(|e| e.shift_right(shift)).collect(),
                factors: factors.clone(),
            },
            MappingExpr::Unknown => MappingExpr::Unknown,
            MappingExpr::None => MappingExpr::None,
        }
    }

    /// Structural simplification: collapses stripe/unstripe round trips.
    pub fn canonicalize(&self) -> MappingExpr {
        match self {
            MappingExpr::Dim(_) | MappingExpr::Unknown | MappingExpr::None => self.clone(),
            MappingExpr::Stripe { operand, factors } => {
                let operand = operand.canonicalize();
                // stripe(unstripe([e0..en], f), f[..k]) is level k-1 itself.
                if let MappingExpr::UnStripe {
                    operands,
                    factors: un_factors,
                } = &operand
                {
                    if factors.len() <= un_factors.len()
                        && un_factors[..factors.len()] == factors[..]
                    {
                        return operands[factors.len() - 1].clone();
                    }
                }
                MappingExpr::Stripe {
                    operand: Box::new(operand),
                    factors: factors.clone(),
                }
            }
            MappingExpr::UnStripe { operands, factors } => {
                let operands: Vec<_> = operands.iter().map(|e| e.canonicalize()).collect();
                // unstripe of the complete stripe decomposition of one
                // expression is that expression.
                let mut common: Option<&MappingExpr> = Option::None;
                let complete = operands.iter().enumerate().all(|(i, e)| match e {
                    MappingExpr::Stripe {
                        operand,
                        factors: stripe_factors,
                    } if stripe_factors[..] == factors[..=i] => {
                        if let Some(seen) = common {
                            seen == operand.as_ref()
                        } else {
                            common = Some(operand.as_ref());
                            true
                        }
                    }
                    _ => false,
                });
                if complete {
                    if let Some(e) = common {
                        return e.clone();
                    }
                }
                MappingExpr::UnStripe {
                    operands,
                    factors: factors.clone(),
                }
            }
        }
    }

    /// Records the inverse binding of this expression: `context` is what the
    /// expression evaluates to in the inverted mapping's use domain.
    /// Non-injective bindings keep the first resolved form.
    pub fn set_inverse(&self, context: MappingExpr, inverse: &mut [MappingExpr]) {
        match self {
            MappingExpr::Dim(d) => {
                if let Some(slot) = inverse.get_mut(*d) {
                    match unify_exprs(slot, &context, true, true) {
                        Some(merged) => *slot = merged,
                        Option::None => {} // first binding wins
                    }
                }
            }
            MappingExpr::Stripe { operand, factors } => {
                let mut operands = vec![MappingExpr::Unknown; factors.len()];
                operands[factors.len() - 1] = context;
                operand.set_inverse(
                    MappingExpr::UnStripe {
                        operands,
                        factors: factors.clone(),
                    },
                    inverse,
                );
            }
            MappingExpr::UnStripe { operands, factors } => {
                for (i, e) in operands.iter().enumerate() {
                    e.set_inverse(
                        MappingExpr::Stripe {
                            operand: Box::new(context.clone()),
                            factors: factors[..=i].to_vec(),
                        },
                        inverse,
                    );
                }
            }
            MappingExpr::Unknown | MappingExpr::None => {}
        }
    }

    /// Looks this expression up in an inverted mapping's expression list.
    pub fn find_in_inverse(&self, inverse: &[MappingExpr]) -> MappingExpr {
        match self {
            MappingExpr::Dim(d) => inverse.get(*d).cloned().unwrap_or(MappingExpr::None),
            MappingExpr::Stripe { operand, factors } => {
                match operand.find_in_inverse(inverse) {
                    MappingExpr::UnStripe { operands, .. } => operands
                        .get(factors.len() - 1)
                        .cloned()
                        .unwrap_or(MappingExpr::None),
                    _ => MappingExpr::None,
                }
            }
            MappingExpr::UnStripe { operands, .. } => {
                match operands.last().map(|e| e.find_in_inverse(inverse)) {
                    Some(MappingExpr::Stripe { operand, .. }) => *operand,
                    _ => MappingExpr::None,
                }
            }
            MappingExpr::Unknown | MappingExpr::None => MappingExpr::None,
        }
    }
}

/// Pointwise unification of two expressions. `subst_none` / `subst_unknown`
/// select which placeholder kinds may be replaced by the other side.
pub fn unify_exprs(
    a: &MappingExpr,
    b: &MappingExpr,
    subst_none: bool,
    subst_unknown: bool,
) -> Option<MappingExpr> {
    if a == b {
        return Some(a.clone());
    }
    match (a, b) {
        (MappingExpr::None, _) if subst_none => Some(b.clone()),
        (_, MappingExpr::None) if subst_none => Some(a.clone()),
        (MappingExpr::Unknown, _) if subst_unknown => Some(b.clone()),
        (_, MappingExpr::Unknown) if subst_unknown => Some(a.clone()),
        (
            MappingExpr::Stripe {
                operand: a_op,
                factors: a_f,
            },
            MappingExpr::Stripe {
                operand: b_op,
                factors: b_f,
            },
        ) if a_f == b_f => Some(MappingExpr::Stripe {
            operand: Box::new(unify_exprs(a_op, b_op, subst_none, subst_unknown)?),
            factors: a_f.clone(),
        }),
        (
            MappingExpr::UnStripe {
                operands: a_ops,
                factors: a_f,
            },
            MappingExpr::UnStripe {
                operands: b_ops,
                factors: b_f,
            },
        ) => {
            // Decompositions may have been discovered level by level; the
            // shorter factor list must be a prefix of the longer, shared
            // levels unify pointwise, missing trailing levels come from the
            // deeper side.
            let (short_ops, short_f, long_ops, long_f) = if a_f.len() <= b_f.len() {
                (a_ops, a_f, b_ops, b_f)
            } else {
                (b_ops, b_f, a_ops, a_f)
            };
            if long_f[..short_f.len()] != short_f[..] {
                return Option::None;
            }
            let mut operands = short_ops
                .iter()
                .zip(long_ops)
                .map(|(x, y)| unify_exprs(x, y, subst_none, subst_unknown))
                .collect::<Option<Vec<_>>>()?;
            operands.extend(long_ops[short_ops.len()..].iter().cloned());
            Some(MappingExpr::UnStripe {
                operands,
                factors: long_f.clone(),
            })
        }
        _ => Option::None,
    }
}

impl fmt::Display for MappingExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingExpr::Dim(d) => write!(f, "d{d}"),
            MappingExpr::Stripe { operand, factors } => {
                write!(f, "stripe({operand}, [")?;
                for (i, factor) in factors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{factor}")?;
                }
                write!(f, "])")
            }
            MappingExpr::UnStripe { operands, factors } => {
                write!(f, "unstripe([")?;
                for (i, e) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, "], [")?;
                for (i, factor) in factors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{factor}")?;
                }
                write!(f, "])")
            }
            MappingExpr::Unknown => write!(f, "?"),
            MappingExpr::None => write!(f, "none"),
        }
    }
}

// ── Mappings ────────────────────────────────────────────────────────────────

/// A symbolic function from a use domain to a definition domain: one
/// expression per definition dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mapping {
    use_domain_size: usize,
    exprs: Vec<MappingExpr>,
}

impl Mapping {
    pub fn new(use_domain_size: usize, exprs: Vec<MappingExpr>) -> Self {
        Self {
            use_domain_size,
            exprs,
        }
    }

    /// The empty mapping out of a use domain (definition domain of rank 0).
    pub fn empty(use_domain_size: usize) -> Self {
        Self::new(use_domain_size, Vec::new())
    }

    /// The identity over `n` dimensions.
    pub fn identity(n: usize) -> Self {
        Self::new(n, (0..n).map(MappingExpr::Dim).collect())
    }

    pub fn use_domain_size(&self) -> usize {
        self.use_domain_size
    }

    /// Number of definition dimensions.
    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn exprs(&self) -> &[MappingExpr] {
        &self.exprs
    }

    /// Composes `self: A -> B` with `other: B -> C` into `A -> C`. `other`
    /// may use a prefix of B (values can have smaller rank than the
    /// operation producing them).
    pub fn compose(&self, other: &Mapping) -> Mapping {
        debug_assert!(other.use_domain_size <= self.exprs.len() || other.exprs.is_empty());
        Mapping::new(
            self.use_domain_size,
            other.exprs.iter().map(|e| e.substitute(&self.exprs)).collect(),
        )
    }

    /// Structural inversion. Use dimensions not determined by any expression
    /// map to `none`; non-injective mappings keep the first binding.
    pub fn inverse(&self) -> Mapping {
        let mut inverse = vec![MappingExpr::None; self.use_domain_size];
        for (i, e) in self.exprs.iter().enumerate() {
            e.set_inverse(MappingExpr::Dim(i), &mut inverse);
        }
        Mapping::new(self.exprs.len(), inverse)
    }

    /// Adjusts the definition domain: truncates, or pads with `none`.
    pub fn resize(&self, n: usize) -> Mapping {
        let mut exprs = self.exprs.clone();
        exprs.resize(n, MappingExpr::None);
        Mapping::new(self.use_domain_size, exprs)
    }

    /// Adjusts the use domain. Shrinking turns expressions that reference
    /// removed dimensions into `none`.
    pub fn resize_use_domain(&self, n: usize) -> Mapping {
        if n >= self.use_domain_size {
            return Mapping::new(n, self.exprs.clone());
        }
        let exprs = self
            .exprs
            .iter()
            .map(|e| {
                if e.min_domain_size() > n {
                    MappingExpr::None
                } else {
                    e.clone()
                }
            })
            .collect();
        Mapping::new(n, exprs)
    }

    /// Shifts every dimension reference right by `shift`, growing the use
    /// domain accordingly.
    pub fn shift_right(&self, shift: usize) -> Mapping {
        Mapping::new(
            self.use_domain_size + shift,
            self.exprs.iter().map(|e| e.shift_right(shift)).collect(),
        )
    }

    /// Prepends expressions to the definition domain.
    pub fn add_prefix(&self, prefix: Vec<MappingExpr>) -> Mapping {
        let mut exprs = prefix;
        exprs.extend(self.exprs.iter().cloned());
        Mapping::new(self.use_domain_size, exprs)
    }

    /// Drops the first `n` definition dimensions.
    pub fn drop_front(&self, n: usize) -> Mapping {
        Mapping::new(self.use_domain_size, self.exprs[n..].to_vec())
    }

    /// Which use-domain dimensions the mapping references.
    pub fn dependency_mask(&self) -> Vec<bool> {
        let mut mask = vec![false; self.use_domain_size];
        for e in &self.exprs {
            e.collect_dependencies(&mut mask);
        }
        mask
    }

    /// Minimal use-domain size the mapping is valid in.
    pub fn min_domain_size(&self) -> usize {
        self.exprs
            .iter()
            .map(|e| e.min_domain_size())
            .max()
            .unwrap_or(0)
    }

    pub fn has_none_exprs(&self) -> bool {
        self.exprs.iter().any(|e| e.has_none())
    }

    pub fn has_unknown_exprs(&self) -> bool {
        self.exprs.iter().any(|e| e.has_unknown())
    }

    pub fn is_fully_specified(&self) -> bool {
        !self.has_none_exprs() && !self.has_unknown_exprs()
    }

    /// Whether every use dimension is referenced by some expression.
    pub fn is_surjective(&self) -> bool {
        self.dependency_mask().into_iter().all(|used| used)
    }

    /// Replaces top-level `none` expressions by fresh use dimensions appended
    /// at the end of the use domain.
    pub fn make_surjective(&self) -> Mapping {
        let mut next = self.use_domain_size;
        let exprs = self
            .exprs
            .iter()
            .map(|e| {
                if *e == MappingExpr::None {
                    let dim = MappingExpr::Dim(next);
                    next += 1;
                    dim
                } else {
                    e.clone()
                }
            })
            .collect();
        Mapping::new(next, exprs)
    }

    pub fn canonicalize(&self) -> Mapping {
        Mapping::new(
            self.use_domain_size,
            self.exprs.iter().map(|e| e.canonicalize()).collect(),
        )
    }

    /// Pointwise unification where both `none` and `?` are substitutable.
    pub fn unify(&self, other: &Mapping) -> Option<Mapping> {
        if self.exprs.len() != other.exprs.len() {
            return Option::None;
        }
        let exprs = self
            .exprs
            .iter()
            .zip(&other.exprs)
            .map(|(a, b)| unify_exprs(a, b, true, true))
            .collect::<Option<Vec<_>>>()?;
        Some(Mapping::new(
            self.use_domain_size.max(other.use_domain_size),
            exprs,
        ))
    }

    /// Pointwise unification substituting `?` expressions only; `none` must
    /// match `none` exactly.
    pub fn unify_unknown_exprs(&self, other: &Mapping) -> Option<Mapping> {
        if self.exprs.len() != other.exprs.len() {
            return Option::None;
        }
        let exprs = self
            .exprs
            .iter()
            .zip(&other.exprs)
            .map(|(a, b)| unify_exprs(a, b, false, true))
            .collect::<Option<Vec<_>>>()?;
        Some(Mapping::new(
            self.use_domain_size.max(other.use_domain_size),
            exprs,
        ))
    }

    /// Minimal leading-use-domain size required to compute the extent of one
    /// definition dimension, given the inverse of the enclosing mapping. Plain
    /// dimension accesses require nothing; inner stripe levels require every
    /// leading dimension up to the outer stripe they are bounded by.
    pub fn accessed_min_domain_size(expr: &MappingExpr, inverse: &[MappingExpr]) -> usize {
        match expr {
            MappingExpr::Dim(_) | MappingExpr::Unknown | MappingExpr::None => 0,
            MappingExpr::Stripe { operand, factors } => {
                if factors.len() == 1 {
                    Mapping::accessed_min_domain_size(operand, inverse)
                } else {
                    let outer = MappingExpr::Stripe {
                        operand: operand.clone(),
                        factors: factors[..factors.len() - 1].to_vec(),
                    };
                    outer.find_in_inverse(inverse).min_domain_size()
                }
            }
            MappingExpr::UnStripe { operands, .. } => operands
                .iter()
                .map(|e| Mapping::accessed_min_domain_size(e, inverse))
                .max()
                .unwrap_or(0),
        }
    }
}

// The Display format is part of diagnostic output; keep it stable.
impl fmt::Display for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.use_domain_size)?;
        if !self.exprs.is_empty() {
            write!(f, " : ")?;
            for (i, e) in self.exprs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{e}")?;
            }
        }
        write!(f, ">")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(use_size: usize, ds: &[usize]) -> Mapping {
        Mapping::new(use_size, ds.iter().map(|&d| MappingExpr::Dim(d)).collect())
    }

    #[test]
    fn compose_substitutes() {
        // a: 3 -> 2 selecting (d2, d0); b: 2 -> 2 swapping.
        let a = dims(3, &[2, 0]);
        let b = dims(2, &[1, 0]);
        let c = a.compose(&b);
        assert_eq!(c, dims(3, &[0, 2]));
    }

    #[test]
    fn inverse_of_projection_has_none() {
        // 3 -> 2 selecting (d2, d0); d1 is not determined.
        let m = dims(3, &[2, 0]);
        let inv = m.inverse();
        assert_eq!(
            inv,
            Mapping::new(
                2,
                vec![MappingExpr::Dim(1), MappingExpr::None, MappingExpr::Dim(0)]
            )
        );
    }

    #[test]
    fn inverse_round_trips_identity() {
        let m = Mapping::identity(4);
        assert_eq!(m.inverse(), m);
    }

    #[test]
    fn resize_use_domain_drops_out_of_range() {
        let m = dims(3, &[2, 0]);
        let shrunk = m.resize_use_domain(1);
        assert_eq!(
            shrunk,
            Mapping::new(1, vec![MappingExpr::None, MappingExpr::Dim(0)])
        );
    }

    #[test]
    fn make_surjective_appends_fresh_dims() {
        let m = Mapping::new(2, vec![MappingExpr::Dim(1), MappingExpr::None]);
        let s = m.make_surjective();
        assert_eq!(s, Mapping::new(3, vec![MappingExpr::Dim(1), MappingExpr::Dim(2)]));
        assert!(s.is_fully_specified());
    }

    #[test]
    fn unify_substitutes_placeholders() {
        let a = Mapping::new(2, vec![MappingExpr::Unknown, MappingExpr::Dim(1)]);
        let b = Mapping::new(2, vec![MappingExpr::Dim(0), MappingExpr::Unknown]);
        assert_eq!(a.unify_unknown_exprs(&b), Some(dims(2, &[0, 1])));
    }

    #[test]
    fn unify_unknown_keeps_none_strict() {
        let a = Mapping::new(2, vec![MappingExpr::None]);
        let b = Mapping::new(2, vec![MappingExpr::Dim(0)]);
        assert_eq!(a.unify_unknown_exprs(&b), Option::None);
        assert_eq!(a.unify(&b), Some(dims(2, &[0])));
    }

    #[test]
    fn unify_conflict_is_rejected_both_orders() {
        let a = dims(2, &[0]);
        let b = dims(2, &[1]);
        assert_eq!(a.unify(&b), Option::None);
        assert_eq!(b.unify(&a), Option::None);
    }

    #[test]
    fn stripe_inverse_and_canonicalize_round_trip() {
        // One dimension decomposed into two stripe levels with step 4.
        let m = Mapping::new(
            1,
            vec![
                MappingExpr::stripe_of_dim(0, &[4], 0),
                MappingExpr::stripe_of_dim(0, &[4, 1], 1),
            ],
        );
        let inv = m.inverse();
        assert_eq!(inv.len(), 1);
        // d0 rebuilt from both stripe levels.
        assert_eq!(
            inv.exprs()[0],
            MappingExpr::UnStripe {
                operands: vec![MappingExpr::Dim(0), MappingExpr::Dim(1)],
                factors: vec![4, 1],
            }
        );
        // Composing back and canonicalizing recovers the identity.
        let round = inv.compose(&m).canonicalize();
        assert_eq!(round, Mapping::identity(2));
    }

    #[test]
    fn accessed_min_domain_size_requires_outer_stripe() {
        let m = Mapping::new(
            1,
            vec![
                MappingExpr::stripe_of_dim(0, &[4], 0),
                MappingExpr::stripe_of_dim(0, &[4, 1], 1),
            ],
        );
        let inv = m.inverse();
        // The coarse stripe needs nothing; the inner level needs the coarse
        // stripe's position (use dimension 0) to be known.
        assert_eq!(Mapping::accessed_min_domain_size(&m.exprs()[0], inv.exprs()), 0);
        assert_eq!(Mapping::accessed_min_domain_size(&m.exprs()[1], inv.exprs()), 1);
    }

    #[test]
    fn display_format() {
        let m = Mapping::new(3, vec![MappingExpr::Dim(1), MappingExpr::Unknown]);
        assert_eq!(format!("{m}"), "<3 : d1, ?>");
        assert_eq!(format!("{}", Mapping::empty(0)), "<0>");
    }
}
