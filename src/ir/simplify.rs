//! Algebraic canonicalization over the expression DAG. The rewrite set is
//! deliberately small: constant folding, arithmetic identities, and the
//! constant re-association that puts loop indices into `var + const` form.
//! Deeper reasoning (affine equality) belongs to the prover.

use crate::ir::def::{BinOp, ExprArena, ExprId, ExprKind, Type, TypeKind};
use crate::ir::graph::{map_children, subst_var};
use rustc_hash::FxHashMap;

pub fn simplify(arena: &mut ExprArena, e: ExprId) -> ExprId {
    Simplifier::default().mutate(arena, e)
}

#[derive(Default)]
struct Simplifier {
    memo: FxHashMap<ExprId, ExprId>,
}

impl Simplifier {
    fn mutate(&mut self, arena: &mut ExprArena, id: ExprId) -> ExprId {
        if let Some(&r) = self.memo.get(&id) {
            return r;
        }
        let result = match arena.kind(id).clone() {
            ExprKind::Binary { op, a, b } => {
                let a = self.mutate(arena, a);
                let b = self.mutate(arena, b);
                fold_binary(arena, op, a, b)
            }
            ExprKind::Select {
                cond,
                if_true,
                if_false,
            } => {
                let cond = self.mutate(arena, cond);
                let if_true = self.mutate(arena, if_true);
                let if_false = self.mutate(arena, if_false);
                if arena.is_const_true(cond) {
                    if_true
                } else if matches!(arena.kind(cond), ExprKind::IntImm(0)) {
                    if_false
                } else if if_true == if_false {
                    if_true
                } else {
                    arena.select(cond, if_true, if_false)
                }
            }
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            } => {
                let base = self.mutate(arena, base);
                let stride = self.mutate(arena, stride);
                if arena.is_const_zero(stride) {
                    arena.broadcast(base, lanes)
                } else {
                    arena.ramp(base, stride, lanes)
                }
            }
            ExprKind::Let { name, value, body } => {
                let value = self.mutate(arena, value);
                // A binding whose value folded to a literal carries no
                // sharing; inline it.
                if matches!(
                    arena.kind(value),
                    ExprKind::IntImm(_) | ExprKind::FloatImm(_)
                ) {
                    let body = subst_var(arena, &name, value, body);
                    self.mutate(arena, body)
                } else {
                    let body = self.mutate(arena, body);
                    arena.let_expr(&name, value, body)
                }
            }
            _ => map_children(arena, id, &mut |arena, c| self.mutate(arena, c)),
        };
        self.memo.insert(id, result);
        result
    }
}

fn fold_binary(arena: &mut ExprArena, op: BinOp, a: ExprId, b: ExprId) -> ExprId {
    let ta = arena.ty(a);
    let is_int = ta.kind == TypeKind::Int || ta.kind == TypeKind::UInt;

    // Constant folding on scalar integer (and boolean) literals.
    if let (Some(ca), Some(cb)) = (arena.as_int(a), arena.as_int(b)) {
        if let Some(folded) = fold_const(op, ca, cb) {
            let ty = if op.is_comparison() {
                Type::BOOL
            } else {
                arena.ty(a)
            };
            return arena.int_of(ty, folded);
        }
    }

    match op {
        BinOp::Add => {
            if arena.is_const_zero(b) {
                return a;
            }
            if arena.is_const_zero(a) {
                return b;
            }
            // Constant operand on the right.
            if arena.as_int(a).is_some() && arena.as_int(b).is_none() {
                return fold_binary(arena, BinOp::Add, b, a);
            }
            // (x + c1) + c2 -> x + (c1 + c2)
            if let Some(c2) = arena.as_int(b) {
                if let ExprKind::Binary {
                    op: BinOp::Add,
                    a: x,
                    b: c1,
                } = arena.kind(a).clone()
                {
                    if let Some(c1) = arena.as_int(c1) {
                        let c = arena.int_of(arena.ty(b), c1.wrapping_add(c2));
                        return fold_binary(arena, BinOp::Add, x, c);
                    }
                }
            }
            if let Some(r) = fold_vector(arena, op, a, b) {
                return r;
            }
        }
        BinOp::Sub => {
            if arena.is_const_zero(b) {
                return a;
            }
            if a == b && is_int {
                let z = arena.make_zero(ta.element_of());
                return if ta.is_scalar() {
                    z
                } else {
                    arena.broadcast(z, ta.lanes)
                };
            }
            // x - c -> x + (-c), so the Add rules see every constant offset.
            if let Some(c) = arena.as_int(b) {
                let neg = arena.int_of(arena.ty(b), c.wrapping_neg());
                return fold_binary(arena, BinOp::Add, a, neg);
            }
            if let Some(r) = fold_vector(arena, op, a, b) {
                return r;
            }
        }
        BinOp::Mul => {
            if arena.is_const_zero(a) && is_int {
                return a;
            }
            if arena.is_const_zero(b) && is_int {
                return b;
            }
            if arena.is_const_one(a) {
                return b;
            }
            if arena.is_const_one(b) {
                return a;
            }
            if arena.as_int(a).is_some() && arena.as_int(b).is_none() {
                return fold_binary(arena, BinOp::Mul, b, a);
            }
            if let Some(c2) = arena.as_int(b) {
                match arena.kind(a).clone() {
                    // (x * c1) * c2 -> x * (c1 * c2)
                    ExprKind::Binary {
                        op: BinOp::Mul,
                        a: x,
                        b: c1,
                    } if arena.as_int(c1).is_some() => {
                        let c1 = arena.as_int(c1).unwrap();
                        let c = arena.int_of(arena.ty(b), c1.wrapping_mul(c2));
                        return fold_binary(arena, BinOp::Mul, x, c);
                    }
                    // (x + c1) * c2 -> x * c2 + c1 * c2
                    ExprKind::Binary {
                        op: BinOp::Add,
                        a: x,
                        b: c1,
                    } if arena.as_int(c1).is_some() => {
                        let c1 = arena.as_int(c1).unwrap();
                        let lhs = fold_binary(arena, BinOp::Mul, x, b);
                        let rhs = arena.int_of(arena.ty(b), c1.wrapping_mul(c2));
                        return fold_binary(arena, BinOp::Add, lhs, rhs);
                    }
                    _ => {}
                }
            }
        }
        BinOp::Div => {
            if arena.is_const_one(b) {
                return a;
            }
        }
        BinOp::Min | BinOp::Max => {
            if a == b {
                return a;
            }
        }
        BinOp::And => {
            if arena.is_const_true(a) {
                return b;
            }
            if arena.is_const_true(b) {
                return a;
            }
            if arena.is_const_zero(a) {
                return a;
            }
            if arena.is_const_zero(b) {
                return b;
            }
        }
        BinOp::Or => {
            if arena.is_const_true(a) {
                return a;
            }
            if arena.is_const_true(b) {
                return b;
            }
            if arena.is_const_zero(a) {
                return b;
            }
            if arena.is_const_zero(b) {
                return a;
            }
        }
        BinOp::Eq | BinOp::Le | BinOp::Ge => {
            if a == b && is_int {
                return true_of(arena, ta.lanes);
            }
        }
        BinOp::Ne | BinOp::Lt | BinOp::Gt => {
            if a == b && is_int {
                return false_of(arena, ta.lanes);
            }
        }
    }

    arena.binary(op, a, b)
}

// Scalar integer folds. Division only folds for positive divisors, where
// rounding toward negative infinity and euclidean division agree.
fn fold_const(op: BinOp, a: i64, b: i64) -> Option<i64> {
    Some(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b > 0 {
                a.div_euclid(b)
            } else {
                return None;
            }
        }
        BinOp::Min => a.min(b),
        BinOp::Max => a.max(b),
        BinOp::Eq => (a == b) as i64,
        BinOp::Ne => (a != b) as i64,
        BinOp::Lt => (a < b) as i64,
        BinOp::Le => (a <= b) as i64,
        BinOp::Gt => (a > b) as i64,
        BinOp::Ge => (a >= b) as i64,
        BinOp::And => ((a != 0) && (b != 0)) as i64,
        BinOp::Or => ((a != 0) || (b != 0)) as i64,
    })
}

// Lane-wise structure folds: broadcast op broadcast stays a broadcast, and
// a broadcast added to (or subtracted from) a ramp folds into its base.
fn fold_vector(arena: &mut ExprArena, op: BinOp, a: ExprId, b: ExprId) -> Option<ExprId> {
    match (arena.kind(a).clone(), arena.kind(b).clone()) {
        (
            ExprKind::Broadcast {
                value: va,
                lanes: la,
            },
            ExprKind::Broadcast {
                value: vb,
                lanes: lb,
            },
        ) if la == lb => {
            let v = fold_binary(arena, op, va, vb);
            Some(arena.broadcast(v, la))
        }
        (
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            },
            ExprKind::Broadcast {
                value,
                lanes: lb,
            },
        ) if lanes == lb => {
            let nb = fold_binary(arena, op, base, value);
            Some(arena.ramp(nb, stride, lanes))
        }
        (
            ExprKind::Broadcast { value, lanes: lb },
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            },
        ) if lanes == lb && op == BinOp::Add => {
            let nb = fold_binary(arena, BinOp::Add, value, base);
            Some(arena.ramp(nb, stride, lanes))
        }
        _ => None,
    }
}

fn true_of(arena: &mut ExprArena, lanes: u16) -> ExprId {
    arena.const_true(lanes)
}

fn false_of(arena: &mut ExprArena, lanes: u16) -> ExprId {
    let f = arena.int_of(Type::BOOL, 0);
    if lanes == 1 {
        f
    } else {
        arena.broadcast(f, lanes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::def::Type;

    fn int_var(a: &mut ExprArena, name: &str) -> ExprId {
        a.var(Type::INT32, name)
    }

    #[test]
    fn constant_offsets_reassociate() {
        let mut a = ExprArena::new();
        let x = int_var(&mut a, "x");
        let one = a.int(1);
        // (x - 1) + 1 -> x
        let xm1 = a.sub(x, one);
        let e = a.add(xm1, one);
        assert_eq!(simplify(&mut a, e), x);
        // (x + 1) + 1 -> x + 2
        let xp1 = a.add(x, one);
        let e = a.add(xp1, one);
        let two = a.int(2);
        assert_eq!(simplify(&mut a, e), a.add(x, two));
    }

    #[test]
    fn constant_factor_distributes() {
        let mut a = ExprArena::new();
        let x = int_var(&mut a, "x");
        let one = a.int(1);
        let eight = a.int(8);
        // (x + 1) * 8 - 8 -> x * 8
        let xp1 = a.add(x, one);
        let m = a.mul(xp1, eight);
        let e = a.sub(m, eight);
        let expected = a.mul(x, eight);
        assert_eq!(simplify(&mut a, e), expected);
    }

    #[test]
    fn zero_stride_ramp_becomes_broadcast() {
        let mut a = ExprArena::new();
        let x = int_var(&mut a, "x");
        let zero = a.int(0);
        let r = a.ramp(x, zero, 4);
        assert_eq!(simplify(&mut a, r), a.broadcast(x, 4));
    }

    #[test]
    fn select_on_constant_condition_collapses() {
        let mut a = ExprArena::new();
        let t = a.const_true(1);
        let x = int_var(&mut a, "x");
        let y = int_var(&mut a, "y");
        let s = a.select(t, x, y);
        assert_eq!(simplify(&mut a, s), x);
    }

    #[test]
    fn literal_let_inlines() {
        let mut a = ExprArena::new();
        let three = a.int(3);
        let one = a.int(1);
        let folded = a.add(three, one);
        let v = int_var(&mut a, "v");
        let body = a.add(v, one);
        let e = a.let_expr("v", folded, body);
        let five = a.int(5);
        assert_eq!(simplify(&mut a, e), five);
    }
}
