//! Loop-carry optimization. Inside a serial loop, a load whose address this
//! iteration equals another load's address on the previous iteration can be
//! kept in a small stack scratch buffer instead of being re-fetched from
//! memory. The pass finds chains of such loads, replaces their sites with
//! scratch reads, fetches only the leading edge each iteration, and slides
//! the scratch contents down at the end of the iteration. The first
//! iteration's values are preloaded in a preamble pinned to the loop min.

use crate::analyze::prove::can_prove;
use crate::ir::cse::{cse_expr, cse_stmt};
use crate::ir::def::{
    BinOp, BufferOrigin, ExprArena, ExprId, ExprKind, ForKind, MemoryKind, Stmt, Type,
};
use crate::ir::graph::{
    expr_children, graph_substitute_stmt, map_children, stmt_uses_var, subst_var_stmt,
    substitute_in_all_lets, substitute_in_all_lets_stmt,
};
use crate::ir::printer::{print_expr, print_stmt};
use crate::ir::simplify::simplify;
use crate::utils::{NameGen, Scope};
use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::smallvec;

/// Rewrite `stmt` so that every serial loop re-fetches at most one new value
/// per carried chain per iteration, keeping at most `max_carried_values`
/// scratch slots live per loop. Deterministic: equal inputs produce
/// identical IR, names included.
pub fn loop_carry(stmt: Stmt, max_carried_values: usize, arena: &mut ExprArena) -> Stmt {
    let mut pass = LoopCarry {
        arena,
        names: NameGen::new(),
        max_carried_values,
        in_consume: Scope::new(),
    };
    pass.mutate(stmt)
}

/// Per-iteration delta of a 32-bit integer expression with respect to the
/// loop variable, or `None` when the expression is not affine in the
/// variables of `linear`. A variable missing from the scope is an outer
/// constant; a variable recorded as `None` poisons the result.
fn is_linear(
    arena: &mut ExprArena,
    e: ExprId,
    linear: &Scope<Option<ExprId>>,
) -> Option<ExprId> {
    if !arena.ty(e).is_int32() {
        return None;
    }
    match arena.kind(e).clone() {
        ExprKind::Var(name) => match linear.get(&name) {
            Some(step) => *step,
            None => Some(arena.int(0)),
        },
        ExprKind::IntImm(_) => Some(arena.int(0)),
        ExprKind::Binary {
            op: BinOp::Add,
            a,
            b,
        } => {
            let la = is_linear(arena, a, linear);
            let lb = is_linear(arena, b, linear);
            if lb.is_some_and(|l| arena.is_const_zero(l)) {
                la
            } else if la.is_some_and(|l| arena.is_const_zero(l)) {
                lb
            } else if let (Some(la), Some(lb)) = (la, lb) {
                Some(arena.add(la, lb))
            } else {
                None
            }
        }
        ExprKind::Binary {
            op: BinOp::Sub,
            a,
            b,
        } => {
            let la = is_linear(arena, a, linear);
            let lb = is_linear(arena, b, linear);
            if lb.is_some_and(|l| arena.is_const_zero(l)) {
                la
            } else if let (Some(la), Some(lb)) = (la, lb) {
                Some(arena.sub(la, lb))
            } else {
                None
            }
        }
        ExprKind::Binary {
            op: BinOp::Mul,
            a,
            b,
        } => {
            let la = is_linear(arena, a, linear);
            let lb = is_linear(arena, b, linear);
            let za = la.is_some_and(|l| arena.is_const_zero(l));
            let zb = lb.is_some_and(|l| arena.is_const_zero(l));
            if za && zb {
                la
            } else if za && lb.is_some() {
                Some(arena.mul(a, lb.unwrap()))
            } else if la.is_some() && zb {
                Some(arena.mul(la.unwrap(), b))
            } else {
                None
            }
        }
        ExprKind::Ramp { base, stride, .. } => {
            let la = is_linear(arena, base, linear);
            let lb = is_linear(arena, stride, linear);
            if lb.is_some_and(|l| arena.is_const_zero(l)) {
                la
            } else {
                None
            }
        }
        ExprKind::Broadcast { value, .. } => is_linear(arena, value, linear),
        _ => None,
    }
}

/// Rewrites an expression to what it will be one loop iteration later:
/// every linear variable `v` becomes `v + delta(v)`. A non-linear variable
/// in the scope poisons the whole rewrite.
struct StepForwards<'a> {
    linear: &'a Scope<Option<ExprId>>,
    success: bool,
    memo: FxHashMap<ExprId, ExprId>,
}

impl StepForwards<'_> {
    fn mutate(&mut self, arena: &mut ExprArena, id: ExprId) -> ExprId {
        if let Some(&r) = self.memo.get(&id) {
            return r;
        }
        let result = match arena.kind(id).clone() {
            ExprKind::Var(name) => match self.linear.get(&name) {
                Some(None) => {
                    self.success = false;
                    id
                }
                Some(Some(step)) => {
                    let step = *step;
                    if arena.is_const_zero(step) {
                        id
                    } else {
                        arena.add(id, step)
                    }
                }
                None => id,
            },
            _ => map_children(arena, id, &mut |arena, c| self.mutate(arena, c)),
        };
        self.memo.insert(id, result);
        result
    }
}

fn step_forwards(
    arena: &mut ExprArena,
    e: ExprId,
    linear: &Scope<Option<ExprId>>,
    names: &mut NameGen,
) -> Option<ExprId> {
    let mut step = StepForwards {
        linear,
        success: true,
        memo: FxHashMap::default(),
    };
    let e = step.mutate(arena, e);
    if !step.success {
        return None;
    }
    // Reduce to a canonical form so symbolic comparisons can use node
    // identity: share, simplify, then make the sharing implicit again.
    let e = cse_expr(arena, e, names);
    let e = simplify(arena, e);
    Some(substitute_in_all_lets(arena, e))
}

/// Collects the distinct loads of a statement in first-encounter order.
/// Loads nested inside another load's index or predicate are not collected.
#[derive(Default)]
struct FindLoads {
    seen: FxHashSet<ExprId>,
    result: Vec<ExprId>,
}

impl FindLoads {
    fn expr(&mut self, arena: &ExprArena, id: ExprId) {
        if !self.seen.insert(id) {
            return;
        }
        if matches!(arena.kind(id), ExprKind::Load { .. }) {
            self.result.push(id);
            return;
        }
        for child in expr_children(arena, id) {
            self.expr(arena, child);
        }
    }

    fn stmt(&mut self, arena: &ExprArena, s: &Stmt) {
        match s {
            Stmt::Store {
                index,
                value,
                predicate,
                ..
            } => {
                self.expr(arena, *index);
                self.expr(arena, *value);
                self.expr(arena, *predicate);
            }
            Stmt::LetStmt { value, body, .. } => {
                self.expr(arena, *value);
                self.stmt(arena, body);
            }
            Stmt::Block(stmts) => {
                for s in stmts {
                    self.stmt(arena, s);
                }
            }
            Stmt::For {
                min, extent, body, ..
            } => {
                self.expr(arena, *min);
                self.expr(arena, *extent);
                self.stmt(arena, body);
            }
            Stmt::IfThenElse {
                cond,
                then_case,
                else_case,
            } => {
                self.expr(arena, *cond);
                self.stmt(arena, then_case);
                if let Some(e) = else_case {
                    self.stmt(arena, e);
                }
            }
            Stmt::ProducerConsumer { body, .. } => self.stmt(arena, body),
            Stmt::Allocate {
                extents,
                condition,
                body,
                ..
            } => {
                for e in extents.iter() {
                    self.expr(arena, *e);
                }
                self.expr(arena, *condition);
                self.stmt(arena, body);
            }
        }
    }
}

fn flatten_block(s: Stmt, out: &mut Vec<Stmt>) {
    match s {
        Stmt::Block(stmts) => {
            for s in stmts {
                flatten_block(s, out);
            }
        }
        other => out.push(other),
    }
}

/// Scalar loads tile the scratch buffer one element per chain position;
/// vector loads take one lane-group each.
fn scratch_index(arena: &mut ExprArena, i: usize, t: Type) -> ExprId {
    if t.is_scalar() {
        arena.int(i as i64)
    } else {
        let base = arena.int(i as i64 * t.lanes as i64);
        let one = arena.int(1);
        arena.ramp(base, one, t.lanes)
    }
}

/// One load key: a distinct (buffer, index, predicate, type) load site, with
/// its next-iteration forms and the CSE'd copies the prover works on.
struct CarriedKey {
    load: ExprId,
    buffer: String,
    index: ExprId,
    next_index: Option<ExprId>,
    predicate: ExprId,
    next_predicate: Option<ExprId>,
    index_csed: ExprId,
    next_index_csed: Option<ExprId>,
    predicate_csed: ExprId,
    next_predicate_csed: Option<ExprId>,
}

struct ScratchAllocation {
    name: String,
    ty: Type,
    size: i64,
    initial_stores: Stmt,
}

/// Carries loads over a single serial loop body.
struct CarryOverLoop<'a> {
    arena: &'a mut ExprArena,
    names: &'a mut NameGen,
    in_consume: &'a Scope<()>,
    max_carried_values: usize,
    // Vars that step linearly with loop iterations.
    linear: Scope<Option<ExprId>>,
    containing_lets: Vec<(String, ExprId)>,
    allocs: Vec<ScratchAllocation>,
}

impl<'a> CarryOverLoop<'a> {
    fn new(
        var: &str,
        arena: &'a mut ExprArena,
        names: &'a mut NameGen,
        in_consume: &'a Scope<()>,
        max_carried_values: usize,
    ) -> Self {
        let mut linear = Scope::new();
        let one = arena.int(1);
        linear.push(var, Some(one));
        Self {
            arena,
            names,
            in_consume,
            max_carried_values,
            linear,
            containing_lets: Vec::new(),
            allocs: Vec::new(),
        }
    }

    fn mutate(&mut self, s: Stmt) -> Stmt {
        match s {
            Stmt::LetStmt { name, value, body } => {
                let step = is_linear(self.arena, value, &self.linear);
                self.linear.push(&name, step);
                self.containing_lets.push((name.clone(), value));
                let body = self.mutate(*body);
                self.containing_lets.pop();
                self.linear.pop(&name);
                Stmt::LetStmt {
                    name,
                    value,
                    body: Box::new(body),
                }
            }
            s @ Stmt::Store { .. } => self.lift_carried_values(s),
            s @ Stmt::Block(_) => {
                let mut flat = Vec::new();
                flatten_block(s, &mut flat);

                let mut result = Vec::new();
                let mut stores = Vec::new();
                for stmt in flat {
                    if matches!(stmt, Stmt::Store { .. }) {
                        stores.push(stmt);
                    } else {
                        if !stores.is_empty() {
                            let group = Stmt::block(std::mem::take(&mut stores));
                            result.push(self.lift_carried_values(group));
                        }
                        result.push(self.mutate(stmt));
                    }
                }
                if !stores.is_empty() {
                    result.push(self.lift_carried_values(Stmt::block(stores)));
                }
                Stmt::block(result)
            }
            // Don't lift loads out of code that might not run.
            s @ Stmt::For { .. } | s @ Stmt::IfThenElse { .. } => s,
            Stmt::ProducerConsumer {
                name,
                is_producer,
                body,
            } => Stmt::ProducerConsumer {
                name,
                is_producer,
                body: Box::new(self.mutate(*body)),
            },
            Stmt::Allocate {
                name,
                ty,
                memory,
                extents,
                condition,
                body,
            } => {
                let body = Box::new(self.mutate(*body));
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

    fn safe_to_lift(&self, load: ExprId) -> bool {
        match self.arena.kind(load) {
            ExprKind::Load { buffer, origin, .. } => match origin {
                BufferOrigin::Image | BufferOrigin::Param => true,
                BufferOrigin::Internal => self.in_consume.contains(buffer),
            },
            _ => false,
        }
    }

    fn lift_carried_values(&mut self, orig_stmt: Stmt) -> Stmt {
        // From here on the statement is a graph with lets inlined; only
        // graph-aware (id-memoized) operations may touch it.
        let graph_stmt = substitute_in_all_lets_stmt(self.arena, orig_stmt.clone());

        let mut find = FindLoads::default();
        find.stmt(self.arena, &graph_stmt);
        trace!("found {} distinct loads in store group", find.result.len());

        let safe: Vec<ExprId> = find
            .result
            .into_iter()
            .filter(|&l| self.safe_to_lift(l))
            .collect();
        let keys: Vec<CarriedKey> = safe.into_iter().map(|l| self.make_key(l)).collect();

        // Loads done this iteration that some other load re-does next
        // iteration. `[j, i]` reads: key i's value today is key j's value
        // tomorrow.
        let mut chains: Vec<Vec<usize>> = Vec::new();
        for i in 0..keys.len() {
            for j in 0..keys.len() {
                // A key chained to itself would be a loop invariant, not
                // a carried value.
                if i == j {
                    continue;
                }
                if self.chains_to(&keys[i], &keys[j]) {
                    trace!(
                        "carried value: {} feeds {}",
                        print_expr(self.arena, keys[j].load),
                        print_expr(self.arena, keys[i].load)
                    );
                    chains.push(vec![j, i]);
                }
            }
        }
        if chains.is_empty() {
            return orig_stmt;
        }

        agglomerate_chains(&mut chains);

        // Longest chains first: they get the most reuse per scratch slot.
        // The sort must be stable so equal inputs give identical IR.
        chains.sort_by(|c1, c2| c2.len().cmp(&c1.len()));

        let chains = trim_chains(chains, self.max_carried_values);
        if chains.is_empty() {
            return orig_stmt;
        }
        for c in &chains {
            debug!(
                "carrying chain of {} values on buffer {}",
                c.len(),
                keys[c[0]].buffer
            );
        }

        // A chain f[x] <- f[x+1] <- ... <- f[x+N-1] holds N values, N-1 of
        // which were already loaded on the previous iteration. Slot N-1
        // takes the one new load per iteration (the leading edge); after
        // the core runs, every slot slides down one so the layout is right
        // for the next iteration. The first iteration instead preloads
        // slots 0..N-1 via the initial stores, which the loop driver pins
        // to the loop min.
        let mut leading_stores = Vec::new();
        let mut scratch_shuffles = Vec::new();
        let mut core = graph_stmt;

        for c in &chains {
            let scratch = self.names.fresh("c");
            let mut initial_values = Vec::new();

            for (pos, &k) in c.iter().enumerate() {
                let orig_load = keys[k].load;
                let load_ty = self.arena.ty(orig_load);
                let slot = scratch_index(self.arena, pos, load_ty);
                let pred = self.arena.const_true(load_ty.lanes);
                // The scratch read is at a compile-time-constant address;
                // no alignment bookkeeping is needed.
                let from_scratch =
                    self.arena
                        .load(load_ty, &scratch, slot, pred, BufferOrigin::Internal);
                core = graph_substitute_stmt(self.arena, orig_load, from_scratch, core);

                if pos == c.len() - 1 {
                    leading_stores.push(Stmt::Store {
                        buffer: scratch.clone(),
                        index: slot,
                        value: orig_load,
                        predicate: pred,
                    });
                } else {
                    initial_values.push(orig_load);
                }
                if pos > 0 {
                    let below = scratch_index(self.arena, pos - 1, load_ty);
                    scratch_shuffles.push(Stmt::Store {
                        buffer: scratch.clone(),
                        index: below,
                        value: from_scratch,
                        predicate: pred,
                    });
                }
            }

            let initial_stores = self.build_initial_stores(&scratch, initial_values);
            let front_ty = self.arena.ty(keys[c[0]].load);
            self.allocs.push(ScratchAllocation {
                name: scratch,
                ty: front_ty.element_of(),
                size: c.len() as i64 * front_ty.lanes as i64,
                initial_stores,
            });
        }

        let mut stmts = leading_stores;
        flatten_block(core, &mut stmts);
        stmts.extend(scratch_shuffles);
        let s = Stmt::Block(stmts);
        cse_stmt(self.arena, s, self.names)
    }

    fn make_key(&mut self, load: ExprId) -> CarriedKey {
        let (buffer, index, predicate) = match self.arena.kind(load).clone() {
            ExprKind::Load {
                buffer,
                index,
                predicate,
                ..
            } => (buffer, index, predicate),
            _ => panic!("internal error: load key is not a load"),
        };
        let next_index = step_forwards(self.arena, index, &self.linear, self.names);
        let next_predicate = step_forwards(self.arena, predicate, &self.linear, self.names);
        // The prover is only sound on CSE'd forms.
        let index_csed = cse_expr(self.arena, index, self.names);
        let next_index_csed = next_index.map(|e| cse_expr(self.arena, e, self.names));
        let predicate_csed = cse_expr(self.arena, predicate, self.names);
        let next_predicate_csed = next_predicate.map(|e| cse_expr(self.arena, e, self.names));
        CarriedKey {
            load,
            buffer,
            index,
            next_index,
            predicate,
            next_predicate,
            index_csed,
            next_index_csed,
            predicate_csed,
            next_predicate_csed,
        }
    }

    /// Will key `j`'s load on the next iteration produce exactly what key
    /// `i` loads on this one? Node identity is the fast path; the prover
    /// handles indices that are equal but not syntactically identical.
    fn chains_to(&mut self, ki: &CarriedKey, kj: &CarriedKey) -> bool {
        if ki.buffer != kj.buffer {
            return false;
        }
        let (Some(next_index), Some(next_predicate)) = (kj.next_index, kj.next_predicate) else {
            return false;
        };
        let index_match = ki.index == next_index
            || (self.arena.ty(ki.index) == self.arena.ty(next_index) && {
                let eq = self
                    .arena
                    .binary(BinOp::Eq, ki.index_csed, kj.next_index_csed.unwrap());
                can_prove(self.arena, eq)
            });
        if !index_match {
            return false;
        }
        ki.predicate == next_predicate
            || (self.arena.ty(ki.predicate) == self.arena.ty(next_predicate) && {
                let eq = self.arena.binary(
                    BinOp::Eq,
                    ki.predicate_csed,
                    kj.next_predicate_csed.unwrap(),
                );
                can_prove(self.arena, eq)
            })
    }

    /// Joint CSE over a chain's initial values: pack them as arguments of a
    /// synthetic pure call, canonicalize the whole call at once, then peel
    /// the shared lets back off. They originated in one expression, so
    /// sharing across them is common.
    fn build_initial_stores(&mut self, scratch: &str, initial_values: Vec<ExprId>) -> Stmt {
        let packer = self.names.fresh("b");
        let call = self.arena.call(Type::INT32, &packer, initial_values);
        let call = cse_expr(self.arena, call, self.names);
        let mut cur = simplify(self.arena, call);

        let mut initial_lets = Vec::new();
        while let ExprKind::Let { name, value, body } = self.arena.kind(cur).clone() {
            initial_lets.push((name, value));
            cur = body;
        }
        let initial_values = match self.arena.kind(cur) {
            ExprKind::Call { callee, args } if *callee == packer => args.clone(),
            _ => panic!("internal error: initial scratch values lost their packing call"),
        };

        let mut stores = Vec::new();
        for (pos, &v) in initial_values.iter().enumerate() {
            let vty = self.arena.ty(v);
            let slot = scratch_index(self.arena, pos, vty);
            let pred = self.arena.const_true(vty.lanes);
            stores.push(Stmt::Store {
                buffer: scratch.to_string(),
                index: slot,
                value: v,
                predicate: pred,
            });
        }
        let mut initial_stores = Stmt::block(stores);
        for (name, value) in initial_lets.iter().rev() {
            initial_stores = Stmt::LetStmt {
                name: name.clone(),
                value: *value,
                body: Box::new(initial_stores),
            };
        }
        // The initial stores float out of the loop body, so rewrap them in
        // whichever enclosing lets they still mention, innermost binding
        // first.
        for (name, value) in self.containing_lets.iter().rev() {
            if stmt_uses_var(self.arena, &initial_stores, name) {
                initial_stores = Stmt::LetStmt {
                    name: name.clone(),
                    value: *value,
                    body: Box::new(initial_stores),
                };
            }
        }
        initial_stores
    }
}

/// Merge chains end-to-end until nothing joins: `[.., x]` + `[x, ..]`
/// becomes `[.., x, ..]`.
fn agglomerate_chains(chains: &mut Vec<Vec<usize>>) {
    let mut done = false;
    while !done {
        done = true;
        for i in 0..chains.len() {
            if chains[i].is_empty() {
                continue;
            }
            for j in 0..chains.len() {
                if i == j || chains[j].is_empty() {
                    continue;
                }
                if chains[i].last() == chains[j].first() {
                    let tail: Vec<usize> = chains[j][1..].to_vec();
                    chains[i].extend(tail);
                    chains[j].clear();
                    done = false;
                }
            }
        }
        let mut i = 0;
        while i < chains.len() {
            if chains[i].is_empty() {
                chains.swap_remove(i);
            } else {
                i += 1;
            }
        }
    }
}

/// Keep whole chains while they fit in the slot budget; when the next chain
/// would overflow and at least two slots remain, keep a prefix of it.
fn trim_chains(chains: Vec<Vec<usize>>, max_carried_values: usize) -> Vec<Vec<usize>> {
    let mut trimmed = Vec::new();
    let mut total = 0usize;
    for c in chains {
        if total + c.len() > max_carried_values {
            if total < max_carried_values.saturating_sub(1) {
                trimmed.push(c[..max_carried_values - total].to_vec());
            }
            break;
        }
        total += c.len();
        trimmed.push(c);
    }
    trimmed
}

/// The driver: walks the whole statement, tracks which producers are in
/// their consume phase, and rewrites each serial loop body.
struct LoopCarry<'a> {
    arena: &'a mut ExprArena,
    names: NameGen,
    max_carried_values: usize,
    in_consume: Scope<()>,
}

impl LoopCarry<'_> {
    fn mutate(&mut self, s: Stmt) -> Stmt {
        match s {
            Stmt::ProducerConsumer {
                name,
                is_producer,
                body,
            } => {
                if is_producer {
                    Stmt::ProducerConsumer {
                        name,
                        is_producer,
                        body: Box::new(self.mutate(*body)),
                    }
                } else {
                    // The producer has finished writing; its buffer is
                    // immutable for this whole region.
                    self.in_consume.push(&name, ());
                    let body = self.mutate(*body);
                    self.in_consume.pop(&name);
                    Stmt::ProducerConsumer {
                        name,
                        is_producer,
                        body: Box::new(body),
                    }
                }
            }
            Stmt::For {
                var,
                min,
                extent,
                kind,
                partition,
                device,
                body,
            } if kind == ForKind::Serial && !self.arena.is_const_one(extent) => {
                let body = self.mutate(*body);
                let (body, allocs) = {
                    let mut carry = CarryOverLoop::new(
                        &var,
                        self.arena,
                        &mut self.names,
                        &self.in_consume,
                        self.max_carried_values,
                    );
                    let body = carry.mutate(body);
                    (body, carry.allocs)
                };
                let mut stmt = Stmt::For {
                    var: var.clone(),
                    min,
                    extent,
                    kind,
                    partition,
                    device,
                    body: Box::new(body),
                };
                for alloc in &allocs {
                    debug!(
                        "injecting scratch buffer '{}' ({} elements)",
                        alloc.name, alloc.size
                    );
                    trace!(
                        "scratch preamble:\n{}",
                        print_stmt(self.arena, &alloc.initial_stores)
                    );
                    // The preamble runs what the first iteration would
                    // have loaded, so pin the loop variable to the min.
                    let preamble =
                        subst_var_stmt(self.arena, &var, min, alloc.initial_stores.clone());
                    let size = self.arena.int(alloc.size);
                    let cond = self.arena.const_true(1);
                    stmt = Stmt::Allocate {
                        name: alloc.name.clone(),
                        ty: alloc.ty,
                        memory: MemoryKind::Stack,
                        extents: smallvec![size],
                        condition: cond,
                        body: Box::new(Stmt::Block(vec![preamble, stmt])),
                    };
                }
                if !allocs.is_empty() {
                    // The preamble must not run for loops of zero or
                    // negative extent.
                    let zero = self.arena.int(0);
                    let cond = self.arena.binary(BinOp::Gt, extent, zero);
                    stmt = Stmt::IfThenElse {
                        cond,
                        then_case: Box::new(stmt),
                        else_case: None,
                    };
                }
                stmt
            }
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
                min,
                extent,
                kind,
                partition,
                device,
                body: Box::new(self.mutate(*body)),
            },
            Stmt::LetStmt { name, value, body } => Stmt::LetStmt {
                name,
                value,
                body: Box::new(self.mutate(*body)),
            },
            Stmt::Block(stmts) => {
                Stmt::Block(stmts.into_iter().map(|s| self.mutate(s)).collect())
            }
            Stmt::IfThenElse {
                cond,
                then_case,
                else_case,
            } => Stmt::IfThenElse {
                cond,
                then_case: Box::new(self.mutate(*then_case)),
                else_case: else_case.map(|s| Box::new(self.mutate(*s))),
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
                extents,
                condition,
                body: Box::new(self.mutate(*body)),
            },
            s @ Stmt::Store { .. } => s,
        }
    }
}
