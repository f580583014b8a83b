// unify.rs — Unification-constraint solver over mapping expressions
//
// Matches a new access's layout expression tree against an established one,
// recording which source dimension instantiates each unknown. Buffer shape
// unification is built on top of this: constraints are indexed by the new
// access's concatenated domain and hold buffer-domain expressions.
//
// Preconditions: `constraints` is sized to the new access's domain.
// Postconditions: on success, every constrained slot holds the buffer-domain
//                 expression the corresponding source dimension must equal.
// Failure modes: structurally incompatible trees; a dimension bound to two
//                distinct buffer-domain entries.
// Side effects: mutates the constraint slots in place.

use crate::diag::{codes, Diagnostic};
use crate::ir::{Span, ValueAccess};
use crate::mapping::{unify_exprs, MappingExpr};

/// Accumulates the constraints required for `new_expr` to match `old_expr`.
/// `?` on either side matches anything without constraining.
pub fn unification_constraints(
    new_expr: &MappingExpr,
    old_expr: &MappingExpr,
    constraints: &mut [MappingExpr],
) -> Result<(), ()> {
    match (new_expr, old_expr) {
        (MappingExpr::Unknown, _) | (_, MappingExpr::Unknown) => Ok(()),
        (MappingExpr::None, MappingExpr::None) => Ok(()),
        (MappingExpr::Dim(d), _) => {
            let slot = constraints.get_mut(*d).ok_or(())?;
            match unify_exprs(slot, old_expr, true, true) {
                Some(merged) => {
                    *slot = merged;
                    Ok(())
                }
                None => Err(()),
            }
        }
        (
            MappingExpr::Stripe {
                operand: new_op,
                factors: new_f,
            },
            MappingExpr::Stripe {
                operand: old_op,
                factors: old_f,
            },
        ) if new_f == old_f => unification_constraints(new_op, old_op, constraints),
        (
            MappingExpr::UnStripe {
                operands: new_ops,
                factors: new_f,
            },
            MappingExpr::UnStripe {
                operands: old_ops,
                factors: old_f,
            },
        ) if new_f == old_f => {
            for (n, o) in new_ops.iter().zip(old_ops) {
                unification_constraints(n, o, constraints)?;
            }
            Ok(())
        }
        _ => Err(()),
    }
}

/// Resolves one constrained dimension into the unified domain: unconstrained
/// dimensions append a fresh domain entry, already-bound dimensions must be
/// accessed identically.
pub fn resolve_unification_constraint(
    span: Span,
    context: &str,
    dim_access: ValueAccess,
    constraint: &mut MappingExpr,
    domain: &mut Vec<ValueAccess>,
) -> Result<(), Diagnostic> {
    match constraint {
        MappingExpr::None | MappingExpr::Unknown => {
            domain.push(dim_access);
            *constraint = MappingExpr::Dim(domain.len() - 1);
            Ok(())
        }
        MappingExpr::Dim(d) => {
            if domain[*d] == dim_access {
                Ok(())
            } else {
                Err(Diagnostic::error(
                    codes::E0203,
                    span,
                    format!("{context} maps a dimension differently than previous occurrences"),
                ))
            }
        }
        _ => Err(Diagnostic::error(
            codes::E0203,
            span,
            format!("{context} cannot unify a dimension with a compound expression"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueId;
    use crate::mapping::Mapping;

    fn access(value: u32) -> ValueAccess {
        ValueAccess {
            value: ValueId(value),
            mapping: Mapping::empty(0),
        }
    }

    #[test]
    fn dim_constraint_binds_old_expr() {
        let mut constraints = vec![MappingExpr::None; 2];
        unification_constraints(&MappingExpr::Dim(1), &MappingExpr::Dim(0), &mut constraints)
            .expect("compatible");
        assert_eq!(constraints[1], MappingExpr::Dim(0));
        assert_eq!(constraints[0], MappingExpr::None);
    }

    #[test]
    fn conflicting_bindings_fail() {
        let mut constraints = vec![MappingExpr::Dim(0)];
        assert!(
            unification_constraints(&MappingExpr::Dim(0), &MappingExpr::Dim(1), &mut constraints)
                .is_err()
        );
    }

    #[test]
    fn unknown_matches_without_constraining() {
        let mut constraints = vec![MappingExpr::None];
        unification_constraints(&MappingExpr::Dim(0), &MappingExpr::Unknown, &mut constraints)
            .expect("unknown matches");
        assert_eq!(constraints[0], MappingExpr::None);
    }

    #[test]
    fn stripes_unify_structurally() {
        let new = MappingExpr::stripe_of_dim(1, &[4], 0);
        let old = MappingExpr::stripe_of_dim(0, &[4], 0);
        let mut constraints = vec![MappingExpr::None; 2];
        unification_constraints(&new, &old, &mut constraints).expect("same factors");
        assert_eq!(constraints[1], MappingExpr::Dim(0));

        let mismatched = MappingExpr::stripe_of_dim(0, &[8], 0);
        let mut constraints = vec![MappingExpr::None; 2];
        assert!(unification_constraints(&new, &mismatched, &mut constraints).is_err());
    }

    #[test]
    fn resolve_appends_then_checks() {
        let span = Span::new(0, 1);
        let mut domain = Vec::new();
        let mut constraint = MappingExpr::None;
        resolve_unification_constraint(span, "buffer \"B\"", access(7), &mut constraint, &mut domain)
            .expect("fresh dimension");
        assert_eq!(constraint, MappingExpr::Dim(0));
        assert_eq!(domain.len(), 1);

        // Same access resolves cleanly; a different one is a conflict.
        resolve_unification_constraint(span, "buffer \"B\"", access(7), &mut constraint, &mut domain)
            .expect("same access");
        let err = resolve_unification_constraint(
            span,
            "buffer \"B\"",
            access(8),
            &mut constraint,
            &mut domain,
        )
        .expect_err("different access");
        assert_eq!(err.code, Some(codes::E0203));
    }
}
