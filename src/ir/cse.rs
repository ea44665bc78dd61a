//! Common-subexpression elimination. Lets are inlined first, so sharing is
//! visible as repeated node ids; every node referenced more than once is
//! hoisted into a `Let`. Statements CSE each of their expressions
//! independently, which keeps load/store ordering intact.

use crate::ir::def::{ExprArena, ExprId, ExprKind, Stmt};
use crate::ir::graph::{expr_children, map_children, substitute_in_all_lets};
use crate::utils::NameGen;
use rustc_hash::FxHashMap;

pub fn cse_expr(arena: &mut ExprArena, e: ExprId, names: &mut NameGen) -> ExprId {
    let e = substitute_in_all_lets(arena, e);
    let mut counter = RefCounter::default();
    counter.expr(arena, e);
    let shared = counter.shared(arena);
    if shared.is_empty() {
        return e;
    }
    let mut builder = LetBuilder::default();
    for s in shared {
        builder.bind(arena, s, names);
    }
    let body = builder.rewrite(arena, e);
    builder.wrap_expr(arena, body)
}

/// Statement-level CSE: every expression in the statement is CSE'd on its
/// own. Sharing is never introduced across statements, so the relative
/// order of loads and stores is preserved.
pub fn cse_stmt(arena: &mut ExprArena, s: Stmt, names: &mut NameGen) -> Stmt {
    match s {
        Stmt::Store {
            buffer,
            index,
            value,
            predicate,
        } => {
            let index = cse_expr(arena, index, names);
            let value = cse_expr(arena, value, names);
            let predicate = cse_expr(arena, predicate, names);
            Stmt::Store {
                buffer,
                index,
                value,
                predicate,
            }
        }
        Stmt::LetStmt { name, value, body } => Stmt::LetStmt {
            name,
            value: cse_expr(arena, value, names),
            body: Box::new(cse_stmt(arena, *body, names)),
        },
        Stmt::Block(stmts) => Stmt::Block(
            stmts
                .into_iter()
                .map(|s| cse_stmt(arena, s, names))
                .collect(),
        ),
        Stmt::For {
            var,
            min,
            extent,
            kind,
            partition,
            device,
            body,
        } => {
            let min = cse_expr(arena, min, names);
            let extent = cse_expr(arena, extent, names);
            let body = Box::new(cse_stmt(arena, *body, names));
            Stmt::For {
                var,
                min,
                extent,
                kind,
                partition,
                device,
                body,
            }
        }
        Stmt::IfThenElse {
            cond,
            then_case,
            else_case,
        } => Stmt::IfThenElse {
            cond: cse_expr(arena, cond, names),
            then_case: Box::new(cse_stmt(arena, *then_case, names)),
            else_case: else_case.map(|s| Box::new(cse_stmt(arena, *s, names))),
        },
        Stmt::ProducerConsumer {
            name,
            is_producer,
            body,
        } => Stmt::ProducerConsumer {
            name,
            is_producer,
            body: Box::new(cse_stmt(arena, *body, names)),
        },
        Stmt::Allocate {
            name,
            ty,
            memory,
            extents,
            condition,
            body,
        } => {
            let extents = extents
                .into_iter()
                .map(|e| cse_expr(arena, e, names))
                .collect();
            let condition = cse_expr(arena, condition, names);
            let body = Box::new(cse_stmt(arena, *body, names));
            Stmt::Allocate {
                name,
                ty,
                memory,
                extents,
                condition,
                body,
            }
        }
    }
}

#[derive(Default)]
struct RefCounter {
    counts: FxHashMap<ExprId, usize>,
    postorder: Vec<ExprId>,
}

impl RefCounter {
    fn expr(&mut self, arena: &ExprArena, id: ExprId) {
        let c = self.counts.entry(id).or_insert(0);
        *c += 1;
        if *c > 1 {
            return;
        }
        for child in expr_children(arena, id) {
            self.expr(arena, child);
        }
        self.postorder.push(id);
    }

    // Shared, extractable nodes in dependency (post) order, so each binding
    // only refers to bindings made before it.
    fn shared(&self, arena: &ExprArena) -> Vec<ExprId> {
        self.postorder
            .iter()
            .copied()
            .filter(|id| self.counts[id] >= 2 && worth_extracting(arena, *id))
            .collect()
    }
}

fn worth_extracting(arena: &ExprArena, id: ExprId) -> bool {
    match arena.kind(id) {
        ExprKind::IntImm(_) | ExprKind::FloatImm(_) | ExprKind::Var(_) => false,
        // Constant vectors are as cheap as constants.
        ExprKind::Broadcast { value, .. } => !matches!(
            arena.kind(*value),
            ExprKind::IntImm(_) | ExprKind::FloatImm(_)
        ),
        ExprKind::Ramp { base, stride, .. } => {
            !(matches!(arena.kind(*base), ExprKind::IntImm(_))
                && matches!(arena.kind(*stride), ExprKind::IntImm(_)))
        }
        ExprKind::Let { .. } => false,
        _ => true,
    }
}

#[derive(Default)]
struct LetBuilder {
    replace: FxHashMap<ExprId, ExprId>,
    bindings: Vec<(String, ExprId)>,
    memo: FxHashMap<ExprId, ExprId>,
}

impl LetBuilder {
    fn bind(&mut self, arena: &mut ExprArena, shared: ExprId, names: &mut NameGen) {
        // Earlier bindings are already in `replace`, so the stored value
        // refers to their variables rather than duplicating their bodies.
        let value = self.rewrite(arena, shared);
        let name = names.fresh("t");
        let var = arena.var(arena.ty(shared), &name);
        self.bindings.push((name, value));
        self.replace.insert(shared, var);
    }

    fn rewrite(&mut self, arena: &mut ExprArena, id: ExprId) -> ExprId {
        if let Some(&v) = self.replace.get(&id) {
            return v;
        }
        if let Some(&r) = self.memo.get(&id) {
            return r;
        }
        let result = map_children(arena, id, &mut |arena, c| self.rewrite(arena, c));
        self.memo.insert(id, result);
        result
    }

    fn wrap_expr(&self, arena: &mut ExprArena, body: ExprId) -> ExprId {
        let mut out = body;
        for (name, value) in self.bindings.iter().rev() {
            out = arena.let_expr(name, *value, out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::def::{BufferOrigin, Type};

    #[test]
    fn shared_subexpression_gets_one_binding() {
        let mut a = ExprArena::new();
        let mut names = NameGen::new();
        let x = a.var(Type::INT32, "x");
        let y = a.var(Type::INT32, "y");
        let prod = a.mul(x, y);
        let one = a.int(1);
        let lhs = a.add(prod, one);
        let two = a.int(2);
        let rhs = a.add(prod, two);
        let e = a.add(lhs, rhs);

        let out = cse_expr(&mut a, e, &mut names);
        match a.kind(out).clone() {
            ExprKind::Let { name, value, body } => {
                assert_eq!(value, prod);
                let v = a.var(Type::INT32, &name);
                let lhs2 = a.add(v, one);
                let rhs2 = a.add(v, two);
                assert_eq!(body, a.add(lhs2, rhs2));
            }
            other => panic!("expected a let around the shared product, got {:?}", other),
        }
    }

    #[test]
    fn nested_shared_nodes_bind_inner_first() {
        let mut a = ExprArena::new();
        let mut names = NameGen::new();
        let x = a.var(Type::INT32, "x");
        let y = a.var(Type::INT32, "y");
        let prod = a.mul(x, y);
        let sum = a.add(prod, x);
        // sum appears twice, and prod appears a third time on its own.
        let e0 = a.add(sum, sum);
        let e = a.add(e0, prod);

        let out = cse_expr(&mut a, e, &mut names);
        // Outermost binding must be the product, since the shared sum
        // refers to it.
        match a.kind(out).clone() {
            ExprKind::Let { value, body, .. } => {
                assert_eq!(value, prod);
                assert!(
                    matches!(a.kind(body), ExprKind::Let { .. }),
                    "expected the shared sum bound inside the product binding"
                );
            }
            other => panic!("expected nested lets, got {:?}", other),
        }
    }

    #[test]
    fn cse_leaves_unshared_exprs_alone() {
        let mut a = ExprArena::new();
        let mut names = NameGen::new();
        let x = a.var(Type::INT32, "x");
        let one = a.int(1);
        let e = a.add(x, one);
        assert_eq!(cse_expr(&mut a, e, &mut names), e);
    }

    #[test]
    fn stmt_cse_works_per_expression() {
        let mut a = ExprArena::new();
        let mut names = NameGen::new();
        let x = a.var(Type::INT32, "x");
        let y = a.var(Type::INT32, "y");
        let idx = a.mul(x, y);
        let t = a.const_true(1);
        let ld = a.load(Type::INT32, "f", idx, t, BufferOrigin::Image);
        let doubled = a.add(ld, ld);
        let s = Stmt::Block(vec![
            Stmt::Store {
                buffer: "out1".to_string(),
                index: x,
                value: doubled,
                predicate: t,
            },
            Stmt::Store {
                buffer: "out2".to_string(),
                index: x,
                value: ld,
                predicate: t,
            },
        ]);
        let out = cse_stmt(&mut a, s, &mut names);
        let stmts = match out {
            Stmt::Block(stmts) => stmts,
            other => panic!("expected the block to survive, got {:?}", other),
        };
        // The store of ld + ld gets a let for the shared load; the second
        // store is untouched. No sharing is introduced across the two.
        match &stmts[0] {
            Stmt::Store { value, .. } => {
                assert!(
                    matches!(a.kind(*value), ExprKind::Let { .. }),
                    "expected a let inside the doubled store value"
                );
            }
            other => panic!("expected a store, got {:?}", other),
        }
        match &stmts[1] {
            Stmt::Store { value, .. } => assert_eq!(*value, ld),
            other => panic!("expected a store, got {:?}", other),
        }
    }
}
