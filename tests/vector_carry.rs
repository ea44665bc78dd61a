//! Vector loads carry whole lane-groups: the scratch buffer is tiled one
//! lane-group per chain position and the slot indices are ramps.

use loft::ir::eval::{run_stmt, Buffer, BufferStore};
use loft::ir::printer::print_stmt;
use loft::{loop_carry, BufferOrigin, ExprArena, ExprKind, Stmt, Type};

const LANES: u16 = 8;

fn vector_shift_add(a: &mut ExprArena) -> Stmt {
    // out[x*8 .. x*8+8) = f[x*8-8 .. x*8) + f[x*8 .. x*8+8)
    let x = a.var(Type::INT32, "x");
    let eight = a.int(8);
    let one = a.int(1);
    let t = a.const_true(LANES);
    let x8 = a.mul(x, eight);
    let x8m8 = a.sub(x8, eight);
    let prev = a.ramp(x8m8, one, LANES);
    let cur = a.ramp(x8, one, LANES);
    let vty = Type::INT32.with_lanes(LANES);
    let l_prev = a.load(vty, "f", prev, t, BufferOrigin::Image);
    let l_cur = a.load(vty, "f", cur, t, BufferOrigin::Image);
    let sum = a.add(l_prev, l_cur);
    let body = Stmt::Store {
        buffer: "out".to_string(),
        index: cur,
        value: sum,
        predicate: t,
    };
    let zero = a.int(0);
    let n = a.int(4);
    Stmt::serial_for("x", zero, n, body)
}

#[test]
fn vector_chain_uses_lane_group_slots() {
    let mut a = ExprArena::new();
    let s = vector_shift_add(&mut a);
    let out = loop_carry(s, 2, &mut a);

    // Scratch of 2 positions * 8 lanes.
    let the_loop_body = match out {
        Stmt::IfThenElse { then_case, .. } => match *then_case {
            Stmt::Allocate {
                ty, extents, body, ..
            } => {
                assert_eq!(ty, Type::INT32, "scratch stores the element type");
                assert_eq!(a.as_int(extents[0]), Some(16));
                body
            }
            other => panic!("expected a scratch allocation, got {:?}", other),
        },
        other => panic!("expected a guarded rewrite, got {:?}", other),
    };

    // Slot indices are ramps over the lane-groups: ramp(0,1,8) and
    // ramp(8,1,8) both appear in the loop body.
    let text = print_stmt(&a, &the_loop_body);
    assert!(
        text.contains("ramp(0, 1, 8)") && text.contains("ramp(8, 1, 8)"),
        "lane-group slot indices missing:\n{}",
        text
    );

    // Exactly one f load survives per iteration.
    let for_text = match &*the_loop_body {
        Stmt::Block(stmts) => print_stmt(&a, &stmts[1]),
        other => panic!("expected preamble + loop, got {:?}", other),
    };
    assert_eq!(
        for_text.matches("f[").count(),
        1,
        "one vector load per iteration:\n{}",
        for_text
    );
}

#[test]
fn vector_chain_semantics_are_preserved() {
    let mut a = ExprArena::new();
    let s = vector_shift_add(&mut a);
    let out = loop_carry(s.clone(), 2, &mut a);

    // x in 0..4 reads f[-8 .. 32).
    let f: Vec<i64> = (0..40).map(|i| (i * 7) % 13).collect();
    let mut before = BufferStore::default();
    before.insert("f".to_string(), Buffer::from_ints(-8, &f));
    before.insert("out".to_string(), Buffer::from_ints(0, &[0; 32]));
    let mut after = before.clone();
    run_stmt(&a, &s, &mut before);
    run_stmt(&a, &out, &mut after);
    assert_eq!(before["out"], after["out"]);
}

#[test]
fn scratch_loads_drop_the_source_tags() {
    // Loads inserted against the scratch buffer are internal, with an
    // all-true predicate of the right width.
    let mut a = ExprArena::new();
    let s = vector_shift_add(&mut a);
    let out = loop_carry(s, 2, &mut a);

    fn scan(a: &ExprArena, s: &Stmt, hits: &mut usize) {
        if let Stmt::Store { value, .. } = s {
            scan_expr(a, *value, hits);
        }
        match s {
            Stmt::Block(v) => v.iter().for_each(|s| scan(a, s, hits)),
            Stmt::For { body, .. }
            | Stmt::Allocate { body, .. }
            | Stmt::LetStmt { body, .. }
            | Stmt::ProducerConsumer { body, .. } => scan(a, body, hits),
            Stmt::IfThenElse {
                then_case,
                else_case,
                ..
            } => {
                scan(a, then_case, hits);
                if let Some(e) = else_case {
                    scan(a, e, hits);
                }
            }
            Stmt::Store { .. } => {}
        }
    }
    fn scan_expr(a: &ExprArena, e: loft::ExprId, hits: &mut usize) {
        match a.kind(e) {
            ExprKind::Load {
                buffer,
                predicate,
                origin,
                ..
            } => {
                if buffer.starts_with("c.") {
                    assert_eq!(*origin, BufferOrigin::Internal);
                    assert!(a.is_const_true(*predicate));
                    assert_eq!(a.ty(*predicate).lanes, LANES);
                    *hits += 1;
                }
            }
            ExprKind::Binary { a: l, b: r, .. } => {
                scan_expr(a, *l, hits);
                scan_expr(a, *r, hits);
            }
            _ => {}
        }
    }

    let mut hits = 0;
    scan(&a, &out, &mut hits);
    assert!(hits > 0, "expected scratch loads in the rewritten loop");
}
