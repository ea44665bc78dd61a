//! Graph-aware rewrites over the expression DAG. Everything here is
//! memoized by `ExprId`; plain structural recursion would blow up
//! exponentially once let-inlining makes sharing implicit.

use crate::ir::def::{ExprArena, ExprId, ExprKind, Stmt};
use crate::utils::Scope;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Inline every `Let` / `LetStmt` binding into its body. The result carries
/// no lets; shared values become shared node ids instead.
pub fn substitute_in_all_lets(arena: &mut ExprArena, e: ExprId) -> ExprId {
    LetInliner::new(arena).expr(e)
}

pub fn substitute_in_all_lets_stmt(arena: &mut ExprArena, s: Stmt) -> Stmt {
    LetInliner::new(arena).stmt(s)
}

struct LetInliner<'a> {
    arena: &'a mut ExprArena,
    // `None` marks a name that is bound but must not be replaced (loop vars).
    env: Scope<Option<ExprId>>,
    // Memo entries are only valid for the environment they were computed
    // under; `gen_stack.last()` names that environment and is restored on
    // pop, so entries survive sibling bindings but not shadowing ones.
    memo: FxHashMap<(ExprId, u32), ExprId>,
    gen_stack: Vec<u32>,
    next_gen: u32,
}

impl<'a> LetInliner<'a> {
    fn new(arena: &'a mut ExprArena) -> Self {
        Self {
            arena,
            env: Scope::new(),
            memo: FxHashMap::default(),
            gen_stack: vec![0],
            next_gen: 1,
        }
    }

    fn cur_gen(&self) -> u32 {
        *self.gen_stack.last().unwrap()
    }

    fn enter(&mut self, name: &str, value: Option<ExprId>) {
        self.env.push(name, value);
        self.gen_stack.push(self.next_gen);
        self.next_gen += 1;
    }

    fn leave(&mut self, name: &str) {
        self.gen_stack.pop();
        self.env.pop(name);
    }

    fn expr(&mut self, id: ExprId) -> ExprId {
        let key = (id, self.cur_gen());
        if let Some(&r) = self.memo.get(&key) {
            return r;
        }
        let node = self.arena.node(id).clone();
        let result = match node.kind {
            ExprKind::IntImm(_) | ExprKind::FloatImm(_) => id,
            ExprKind::Var(ref name) => match self.env.get(name) {
                Some(Some(v)) => *v,
                _ => id,
            },
            ExprKind::Let { ref name, value, body } => {
                let v = self.expr(value);
                self.enter(name, Some(v));
                let b = self.expr(body);
                self.leave(name);
                b
            }
            ExprKind::Binary { op, a, b } => {
                let na = self.expr(a);
                let nb = self.expr(b);
                if na == a && nb == b {
                    id
                } else {
                    self.arena.binary(op, na, nb)
                }
            }
            ExprKind::Select {
                cond,
                if_true,
                if_false,
            } => {
                let nc = self.expr(cond);
                let nt = self.expr(if_true);
                let nf = self.expr(if_false);
                if nc == cond && nt == if_true && nf == if_false {
                    id
                } else {
                    self.arena.select(nc, nt, nf)
                }
            }
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            } => {
                let nb = self.expr(base);
                let ns = self.expr(stride);
                if nb == base && ns == stride {
                    id
                } else {
                    self.arena.ramp(nb, ns, lanes)
                }
            }
            ExprKind::Broadcast { value, lanes } => {
                let nv = self.expr(value);
                if nv == value {
                    id
                } else {
                    self.arena.broadcast(nv, lanes)
                }
            }
            ExprKind::Load {
                ref buffer,
                index,
                predicate,
                origin,
            } => {
                let ni = self.expr(index);
                let np = self.expr(predicate);
                if ni == index && np == predicate {
                    id
                } else {
                    self.arena.load(node.ty, buffer, ni, np, origin)
                }
            }
            ExprKind::Call {
                ref callee,
                ref args,
            } => {
                let nargs: Vec<ExprId> = args.iter().map(|&a| self.expr(a)).collect();
                if nargs == *args {
                    id
                } else {
                    self.arena.call(node.ty, callee, nargs)
                }
            }
        };
        self.memo.insert(key, result);
        result
    }

    fn stmt(&mut self, s: Stmt) -> Stmt {
        match s {
            Stmt::Store {
                buffer,
                index,
                value,
                predicate,
            } => {
                let index = self.expr(index);
                let value = self.expr(value);
                let predicate = self.expr(predicate);
                Stmt::Store {
                    buffer,
                    index,
                    value,
                    predicate,
                }
            }
            Stmt::LetStmt { name, value, body } => {
                let v = self.expr(value);
                self.enter(&name, Some(v));
                let b = self.stmt(*body);
                self.leave(&name);
                b
            }
            Stmt::Block(stmts) => Stmt::Block(stmts.into_iter().map(|s| self.stmt(s)).collect()),
            Stmt::For {
                var,
                min,
                extent,
                kind,
                partition,
                device,
                body,
            } => {
                let min = self.expr(min);
                let extent = self.expr(extent);
                self.enter(&var, None);
                let body = Box::new(self.stmt(*body));
                self.leave(&var);
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
                cond: self.expr(cond),
                then_case: Box::new(self.stmt(*then_case)),
                else_case: else_case.map(|s| Box::new(self.stmt(*s))),
            },
            Stmt::ProducerConsumer {
                name,
                is_producer,
                body,
            } => Stmt::ProducerConsumer {
                name,
                is_producer,
                body: Box::new(self.stmt(*body)),
            },
            Stmt::Allocate {
                name,
                ty,
                memory,
                extents,
                condition,
                body,
            } => {
                let extents = extents.into_iter().map(|e| self.expr(e)).collect();
                let condition = self.expr(condition);
                let body = Box::new(self.stmt(*body));
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
}

/// Replace every occurrence of node `from` with `to`, in one memoized pass.
/// Because the arena interns structurally, this rewrites all sites of a key
/// in lockstep.
pub fn graph_substitute(arena: &mut ExprArena, from: ExprId, to: ExprId, root: ExprId) -> ExprId {
    NodeSubst::new(arena, from, to).expr(root)
}

pub fn graph_substitute_stmt(arena: &mut ExprArena, from: ExprId, to: ExprId, s: Stmt) -> Stmt {
    NodeSubst::new(arena, from, to).stmt(s)
}

struct NodeSubst<'a> {
    arena: &'a mut ExprArena,
    from: ExprId,
    to: ExprId,
    memo: FxHashMap<ExprId, ExprId>,
}

impl<'a> NodeSubst<'a> {
    fn new(arena: &'a mut ExprArena, from: ExprId, to: ExprId) -> Self {
        Self {
            arena,
            from,
            to,
            memo: FxHashMap::default(),
        }
    }

    fn expr(&mut self, id: ExprId) -> ExprId {
        if id == self.from {
            return self.to;
        }
        if let Some(&r) = self.memo.get(&id) {
            return r;
        }
        let node = self.arena.node(id).clone();
        let result = match node.kind {
            ExprKind::IntImm(_) | ExprKind::FloatImm(_) | ExprKind::Var(_) => id,
            ExprKind::Binary { op, a, b } => {
                let na = self.expr(a);
                let nb = self.expr(b);
                if na == a && nb == b {
                    id
                } else {
                    self.arena.binary(op, na, nb)
                }
            }
            ExprKind::Select {
                cond,
                if_true,
                if_false,
            } => {
                let nc = self.expr(cond);
                let nt = self.expr(if_true);
                let nf = self.expr(if_false);
                if nc == cond && nt == if_true && nf == if_false {
                    id
                } else {
                    self.arena.select(nc, nt, nf)
                }
            }
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            } => {
                let nb = self.expr(base);
                let ns = self.expr(stride);
                if nb == base && ns == stride {
                    id
                } else {
                    self.arena.ramp(nb, ns, lanes)
                }
            }
            ExprKind::Broadcast { value, lanes } => {
                let nv = self.expr(value);
                if nv == value {
                    id
                } else {
                    self.arena.broadcast(nv, lanes)
                }
            }
            ExprKind::Load {
                ref buffer,
                index,
                predicate,
                origin,
            } => {
                let ni = self.expr(index);
                let np = self.expr(predicate);
                if ni == index && np == predicate {
                    id
                } else {
                    self.arena.load(node.ty, buffer, ni, np, origin)
                }
            }
            ExprKind::Let { ref name, value, body } => {
                let nv = self.expr(value);
                let nb = self.expr(body);
                if nv == value && nb == body {
                    id
                } else {
                    self.arena.let_expr(name, nv, nb)
                }
            }
            ExprKind::Call {
                ref callee,
                ref args,
            } => {
                let nargs: Vec<ExprId> = args.iter().map(|&a| self.expr(a)).collect();
                if nargs == *args {
                    id
                } else {
                    self.arena.call(node.ty, callee, nargs)
                }
            }
        };
        self.memo.insert(id, result);
        result
    }

    fn stmt(&mut self, s: Stmt) -> Stmt {
        match s {
            Stmt::Store {
                buffer,
                index,
                value,
                predicate,
            } => {
                let index = self.expr(index);
                let value = self.expr(value);
                let predicate = self.expr(predicate);
                Stmt::Store {
                    buffer,
                    index,
                    value,
                    predicate,
                }
            }
            Stmt::LetStmt { name, value, body } => Stmt::LetStmt {
                name,
                value: self.expr(value),
                body: Box::new(self.stmt(*body)),
            },
            Stmt::Block(stmts) => Stmt::Block(stmts.into_iter().map(|s| self.stmt(s)).collect()),
            Stmt::For {
                var,
                min,
                extent,
                kind,
                partition,
                device,
                body,
            } => Stmt::For {
                var,
                min: self.expr(min),
                extent: self.expr(extent),
                kind,
                partition,
                device,
                body: Box::new(self.stmt(*body)),
            },
            Stmt::IfThenElse {
                cond,
                then_case,
                else_case,
            } => Stmt::IfThenElse {
                cond: self.expr(cond),
                then_case: Box::new(self.stmt(*then_case)),
                else_case: else_case.map(|s| Box::new(self.stmt(*s))),
            },
            Stmt::ProducerConsumer {
                name,
                is_producer,
                body,
            } => Stmt::ProducerConsumer {
                name,
                is_producer,
                body: Box::new(self.stmt(*body)),
            },
            Stmt::Allocate {
                name,
                ty,
                memory,
                extents,
                condition,
                body,
            } => Stmt::Allocate {
                name,
                ty,
                memory,
                extents: extents.into_iter().map(|e| self.expr(e)).collect(),
                condition: self.expr(condition),
                body: Box::new(self.stmt(*body)),
            },
        }
    }
}

/// Substitute `value` for every *free* occurrence of variable `name`.
/// Bindings of the same name shadow: their bodies are left untouched.
pub fn subst_var(arena: &mut ExprArena, name: &str, value: ExprId, e: ExprId) -> ExprId {
    VarSubst::new(arena, name, value).expr(e)
}

pub fn subst_var_stmt(arena: &mut ExprArena, name: &str, value: ExprId, s: Stmt) -> Stmt {
    VarSubst::new(arena, name, value).stmt(s)
}

struct VarSubst<'a> {
    arena: &'a mut ExprArena,
    name: String,
    value: ExprId,
    memo: FxHashMap<ExprId, ExprId>,
}

impl<'a> VarSubst<'a> {
    fn new(arena: &'a mut ExprArena, name: &str, value: ExprId) -> Self {
        Self {
            arena,
            name: name.to_string(),
            value,
            memo: FxHashMap::default(),
        }
    }

    fn expr(&mut self, id: ExprId) -> ExprId {
        if let Some(&r) = self.memo.get(&id) {
            return r;
        }
        let node = self.arena.node(id).clone();
        let result = match node.kind {
            ExprKind::Var(ref n) if *n == self.name => self.value,
            ExprKind::IntImm(_) | ExprKind::FloatImm(_) | ExprKind::Var(_) => id,
            ExprKind::Let { ref name, value, body } => {
                let nv = self.expr(value);
                // The binding shadows our name in the body.
                let nb = if *name == self.name { body } else { self.expr(body) };
                if nv == value && nb == body {
                    id
                } else {
                    self.arena.let_expr(name, nv, nb)
                }
            }
            ExprKind::Binary { op, a, b } => {
                let na = self.expr(a);
                let nb = self.expr(b);
                if na == a && nb == b {
                    id
                } else {
                    self.arena.binary(op, na, nb)
                }
            }
            ExprKind::Select {
                cond,
                if_true,
                if_false,
            } => {
                let nc = self.expr(cond);
                let nt = self.expr(if_true);
                let nf = self.expr(if_false);
                if nc == cond && nt == if_true && nf == if_false {
                    id
                } else {
                    self.arena.select(nc, nt, nf)
                }
            }
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            } => {
                let nb = self.expr(base);
                let ns = self.expr(stride);
                if nb == base && ns == stride {
                    id
                } else {
                    self.arena.ramp(nb, ns, lanes)
                }
            }
            ExprKind::Broadcast { value, lanes } => {
                let nv = self.expr(value);
                if nv == value {
                    id
                } else {
                    self.arena.broadcast(nv, lanes)
                }
            }
            ExprKind::Load {
                ref buffer,
                index,
                predicate,
                origin,
            } => {
                let ni = self.expr(index);
                let np = self.expr(predicate);
                if ni == index && np == predicate {
                    id
                } else {
                    self.arena.load(node.ty, buffer, ni, np, origin)
                }
            }
            ExprKind::Call {
                ref callee,
                ref args,
            } => {
                let nargs: Vec<ExprId> = args.iter().map(|&a| self.expr(a)).collect();
                if nargs == *args {
                    id
                } else {
                    self.arena.call(node.ty, callee, nargs)
                }
            }
        };
        self.memo.insert(id, result);
        result
    }

    fn stmt(&mut self, s: Stmt) -> Stmt {
        match s {
            Stmt::Store {
                buffer,
                index,
                value,
                predicate,
            } => {
                let index = self.expr(index);
                let value = self.expr(value);
                let predicate = self.expr(predicate);
                Stmt::Store {
                    buffer,
                    index,
                    value,
                    predicate,
                }
            }
            Stmt::LetStmt { name, value, body } => {
                let nv = self.expr(value);
                let body = if name == self.name {
                    body
                } else {
                    Box::new(self.stmt(*body))
                };
                Stmt::LetStmt {
                    name,
                    value: nv,
                    body,
                }
            }
            Stmt::Block(stmts) => Stmt::Block(stmts.into_iter().map(|s| self.stmt(s)).collect()),
            Stmt::For {
                var,
                min,
                extent,
                kind,
                partition,
                device,
                body,
            } => {
                let min = self.expr(min);
                let extent = self.expr(extent);
                let body = if var == self.name {
                    body
                } else {
                    Box::new(self.stmt(*body))
                };
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
                cond: self.expr(cond),
                then_case: Box::new(self.stmt(*then_case)),
                else_case: else_case.map(|s| Box::new(self.stmt(*s))),
            },
            Stmt::ProducerConsumer {
                name,
                is_producer,
                body,
            } => Stmt::ProducerConsumer {
                name,
                is_producer,
                body: Box::new(self.stmt(*body)),
            },
            Stmt::Allocate {
                name,
                ty,
                memory,
                extents,
                condition,
                body,
            } => Stmt::Allocate {
                name,
                ty,
                memory,
                extents: extents.into_iter().map(|e| self.expr(e)).collect(),
                condition: self.expr(condition),
                body: Box::new(self.stmt(*body)),
            },
        }
    }
}

/// Does `e` contain a free occurrence of `name`?
pub fn expr_uses_var(arena: &ExprArena, e: ExprId, name: &str) -> bool {
    UsesVar::new(arena, name).expr(e)
}

pub fn stmt_uses_var(arena: &ExprArena, s: &Stmt, name: &str) -> bool {
    UsesVar::new(arena, name).stmt(s)
}

struct UsesVar<'a> {
    arena: &'a ExprArena,
    name: &'a str,
    memo: FxHashMap<ExprId, bool>,
}

impl<'a> UsesVar<'a> {
    fn new(arena: &'a ExprArena, name: &'a str) -> Self {
        Self {
            arena,
            name,
            memo: FxHashMap::default(),
        }
    }

    fn expr(&mut self, id: ExprId) -> bool {
        if let Some(&r) = self.memo.get(&id) {
            return r;
        }
        let result = match self.arena.kind(id) {
            ExprKind::Var(n) => n == self.name,
            ExprKind::IntImm(_) | ExprKind::FloatImm(_) => false,
            ExprKind::Let { name, value, body } => {
                let (value, body, shadows) = (*value, *body, name == self.name);
                self.expr(value) || (!shadows && self.expr(body))
            }
            ExprKind::Binary { a, b, .. } => {
                let (a, b) = (*a, *b);
                self.expr(a) || self.expr(b)
            }
            ExprKind::Select {
                cond,
                if_true,
                if_false,
            } => {
                let (c, t, f) = (*cond, *if_true, *if_false);
                self.expr(c) || self.expr(t) || self.expr(f)
            }
            ExprKind::Ramp { base, stride, .. } => {
                let (base, stride) = (*base, *stride);
                self.expr(base) || self.expr(stride)
            }
            ExprKind::Broadcast { value, .. } => {
                let value = *value;
                self.expr(value)
            }
            ExprKind::Load {
                index, predicate, ..
            } => {
                let (index, predicate) = (*index, *predicate);
                self.expr(index) || self.expr(predicate)
            }
            ExprKind::Call { args, .. } => {
                let args = args.clone();
                args.into_iter().any(|a| self.expr(a))
            }
        };
        self.memo.insert(id, result);
        result
    }


    fn stmt(&mut self, s: &Stmt) -> bool {
        match s {
            Stmt::Store {
                index,
                value,
                predicate,
                ..
            } => self.expr(*index) || self.expr(*value) || self.expr(*predicate),
            Stmt::LetStmt { name, value, body } => {
                self.expr(*value) || (name != self.name && self.stmt(body))
            }
            Stmt::Block(stmts) => stmts.iter().any(|s| self.stmt(s)),
            Stmt::For {
                var,
                min,
                extent,
                body,
                ..
            } => {
                self.expr(*min)
                    || self.expr(*extent)
                    || (var != self.name && self.stmt(body))
            }
            Stmt::IfThenElse {
                cond,
                then_case,
                else_case,
            } => {
                self.expr(*cond)
                    || self.stmt(then_case)
                    || else_case.as_deref().is_some_and(|s| self.stmt(s))
            }
            Stmt::ProducerConsumer { body, .. } => self.stmt(body),
            Stmt::Allocate {
                extents,
                condition,
                body,
                ..
            } => {
                extents.iter().any(|e| self.expr(*e)) || self.expr(*condition) || self.stmt(body)
            }
        }
    }
}

/// Direct child expressions of a node, in syntactic order.
pub(crate) fn expr_children(arena: &ExprArena, id: ExprId) -> SmallVec<[ExprId; 4]> {
    let mut out = SmallVec::new();
    match arena.kind(id) {
        ExprKind::IntImm(_) | ExprKind::FloatImm(_) | ExprKind::Var(_) => {}
        ExprKind::Binary { a, b, .. } => {
            out.push(*a);
            out.push(*b);
        }
        ExprKind::Select {
            cond,
            if_true,
            if_false,
        } => {
            out.push(*cond);
            out.push(*if_true);
            out.push(*if_false);
        }
        ExprKind::Ramp { base, stride, .. } => {
            out.push(*base);
            out.push(*stride);
        }
        ExprKind::Broadcast { value, .. } => out.push(*value),
        ExprKind::Load {
            index, predicate, ..
        } => {
            out.push(*index);
            out.push(*predicate);
        }
        ExprKind::Let { value, body, .. } => {
            out.push(*value);
            out.push(*body);
        }
        ExprKind::Call { args, .. } => out.extend(args.iter().copied()),
    }
    out
}

/// Rebuild `id` with `f` applied to each direct child, reusing the original
/// node when nothing changed. `Let` children are both mapped; callers that
/// need binding-aware treatment must intercept `Let` before delegating here.
pub fn map_children(
    arena: &mut ExprArena,
    id: ExprId,
    f: &mut dyn FnMut(&mut ExprArena, ExprId) -> ExprId,
) -> ExprId {
    let node = arena.node(id).clone();
    match node.kind {
        ExprKind::IntImm(_) | ExprKind::FloatImm(_) | ExprKind::Var(_) => id,
        ExprKind::Binary { op, a, b } => {
            let na = f(arena, a);
            let nb = f(arena, b);
            if na == a && nb == b {
                id
            } else {
                arena.binary(op, na, nb)
            }
        }
        ExprKind::Select {
            cond,
            if_true,
            if_false,
        } => {
            let nc = f(arena, cond);
            let nt = f(arena, if_true);
            let nf = f(arena, if_false);
            if nc == cond && nt == if_true && nf == if_false {
                id
            } else {
                arena.select(nc, nt, nf)
            }
        }
        ExprKind::Ramp {
            base,
            stride,
            lanes,
        } => {
            let nb = f(arena, base);
            let ns = f(arena, stride);
            if nb == base && ns == stride {
                id
            } else {
                arena.ramp(nb, ns, lanes)
            }
        }
        ExprKind::Broadcast { value, lanes } => {
            let nv = f(arena, value);
            if nv == value {
                id
            } else {
                arena.broadcast(nv, lanes)
            }
        }
        ExprKind::Load {
            ref buffer,
            index,
            predicate,
            origin,
        } => {
            let ni = f(arena, index);
            let np = f(arena, predicate);
            if ni == index && np == predicate {
                id
            } else {
                arena.load(node.ty, buffer, ni, np, origin)
            }
        }
        ExprKind::Let { ref name, value, body } => {
            let nv = f(arena, value);
            let nb = f(arena, body);
            if nv == value && nb == body {
                id
            } else {
                arena.let_expr(name, nv, nb)
            }
        }
        ExprKind::Call {
            ref callee,
            ref args,
        } => {
            let nargs: Vec<ExprId> = args.iter().map(|&a| f(arena, a)).collect();
            if nargs == *args {
                id
            } else {
                arena.call(node.ty, callee, nargs)
            }
        }
    }
}
