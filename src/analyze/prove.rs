//! A small, sound decision procedure for the boolean queries the optimizer
//! asks: mostly "are these two index expressions always equal". False
//! negatives are fine; a `true` answer is a promise.

use crate::ir::def::{BinOp, ExprArena, ExprId, ExprKind, TypeKind};
use crate::ir::graph::substitute_in_all_lets;
use crate::ir::simplify::simplify;
use rustc_hash::FxHashMap;

/// Decide whether `e` is unconditionally true.
pub fn can_prove(arena: &mut ExprArena, e: ExprId) -> bool {
    let e = substitute_in_all_lets(arena, e);
    let e = simplify(arena, e);
    prove_bool(arena, e)
}

fn prove_bool(arena: &mut ExprArena, e: ExprId) -> bool {
    if arena.is_const_true(e) {
        return true;
    }
    match arena.kind(e).clone() {
        ExprKind::Broadcast { value, .. } => prove_bool(arena, value),
        ExprKind::Binary {
            op: BinOp::And,
            a,
            b,
        } => prove_bool(arena, a) && prove_bool(arena, b),
        ExprKind::Binary { op: BinOp::Eq, a, b } => prove_equal(arena, a, b),
        _ => false,
    }
}

fn prove_equal(arena: &mut ExprArena, a: ExprId, b: ExprId) -> bool {
    if a == b {
        return true;
    }
    if arena.ty(a) != arena.ty(b) {
        return false;
    }
    // Vector equality decomposes elementwise.
    match (arena.kind(a).clone(), arena.kind(b).clone()) {
        (
            ExprKind::Ramp {
                base: ba,
                stride: sa,
                lanes: la,
            },
            ExprKind::Ramp {
                base: bb,
                stride: sb,
                lanes: lb,
            },
        ) => la == lb && prove_equal(arena, ba, bb) && prove_equal(arena, sa, sb),
        (
            ExprKind::Broadcast {
                value: va,
                lanes: la,
            },
            ExprKind::Broadcast {
                value: vb,
                lanes: lb,
            },
        ) => la == lb && prove_equal(arena, va, vb),
        _ => {
            if arena.ty(a).kind != TypeKind::Int || !arena.ty(a).is_scalar() {
                return false;
            }
            affine_form(arena, a) == affine_form(arena, b)
        }
    }
}

/// Normal form of an integer expression as `sum(coeff * atom) + constant`.
/// Anything that is not an add, a subtract, a multiply-by-constant, or an
/// integer literal is treated as an opaque atom keyed by node identity.
#[derive(Debug, PartialEq, Eq)]
struct AffineForm {
    coeffs: FxHashMap<ExprId, i64>,
    constant: i64,
}

fn affine_form(arena: &ExprArena, e: ExprId) -> AffineForm {
    let mut form = AffineForm {
        coeffs: FxHashMap::default(),
        constant: 0,
    };
    accumulate(arena, e, 1, &mut form);
    form.coeffs.retain(|_, c| *c != 0);
    form
}

fn accumulate(arena: &ExprArena, e: ExprId, scale: i64, form: &mut AffineForm) {
    match *arena.kind(e) {
        ExprKind::IntImm(v) => {
            form.constant = form.constant.wrapping_add(v.wrapping_mul(scale));
        }
        ExprKind::Binary {
            op: BinOp::Add,
            a,
            b,
        } => {
            accumulate(arena, a, scale, form);
            accumulate(arena, b, scale, form);
        }
        ExprKind::Binary {
            op: BinOp::Sub,
            a,
            b,
        } => {
            accumulate(arena, a, scale, form);
            accumulate(arena, b, scale.wrapping_neg(), form);
        }
        ExprKind::Binary {
            op: BinOp::Mul,
            a,
            b,
        } => match (arena.as_int(a), arena.as_int(b)) {
            (Some(c), _) => accumulate(arena, b, scale.wrapping_mul(c), form),
            (_, Some(c)) => accumulate(arena, a, scale.wrapping_mul(c), form),
            _ => add_atom(form, e, scale),
        },
        _ => add_atom(form, e, scale),
    }
}

fn add_atom(form: &mut AffineForm, atom: ExprId, scale: i64) {
    *form.coeffs.entry(atom).or_insert(0) += scale;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::def::Type;

    fn x(a: &mut ExprArena) -> ExprId {
        a.var(Type::INT32, "x")
    }

    #[test]
    fn proves_reassociated_sums_equal() {
        let mut a = ExprArena::new();
        let xv = x(&mut a);
        let y = a.var(Type::INT32, "y");
        let one = a.int(1);
        // (x + y) + 1 == (y + 1) + x
        let lhs0 = a.add(xv, y);
        let lhs = a.add(lhs0, one);
        let rhs0 = a.add(y, one);
        let rhs = a.add(rhs0, xv);
        let eq = a.binary(BinOp::Eq, lhs, rhs);
        assert!(can_prove(&mut a, eq));
    }

    #[test]
    fn proves_doubling_equal_to_sum_with_self() {
        let mut a = ExprArena::new();
        let xv = x(&mut a);
        let two = a.int(2);
        let lhs = a.mul(xv, two);
        let rhs = a.add(xv, xv);
        let eq = a.binary(BinOp::Eq, lhs, rhs);
        assert!(can_prove(&mut a, eq));
    }

    #[test]
    fn does_not_prove_distinct_offsets() {
        let mut a = ExprArena::new();
        let xv = x(&mut a);
        let one = a.int(1);
        let xp1 = a.add(xv, one);
        let eq = a.binary(BinOp::Eq, xv, xp1);
        assert!(!can_prove(&mut a, eq));
    }

    #[test]
    fn opaque_atoms_compare_by_identity() {
        let mut a = ExprArena::new();
        let xv = x(&mut a);
        let y = a.var(Type::INT32, "y");
        let dx = a.binary(BinOp::Div, xv, y);
        let one = a.int(1);
        let lhs = a.add(dx, one);
        let rhs0 = a.add(one, dx);
        let eq = a.binary(BinOp::Eq, lhs, rhs0);
        assert!(can_prove(&mut a, eq));

        let dy = a.binary(BinOp::Div, y, xv);
        let eq2 = a.binary(BinOp::Eq, dx, dy);
        assert!(!can_prove(&mut a, eq2));
    }

    #[test]
    fn vector_equality_decomposes() {
        let mut a = ExprArena::new();
        let xv = x(&mut a);
        let eight = a.int(8);
        let one = a.int(1);
        // ramp(x*8, 1, 8) == ramp(8*x, 1, 8)
        let b1 = a.mul(xv, eight);
        let b2 = a.mul(eight, xv);
        let r1 = a.ramp(b1, one, 8);
        let r2 = a.ramp(b2, one, 8);
        let eq = a.binary(BinOp::Eq, r1, r2);
        assert!(can_prove(&mut a, eq));
    }
}
