//! Stable text form for expressions and statements. Tests compare printed
//! output across runs, so everything here must be deterministic.

use crate::ir::def::{
    BinOp, ExprArena, ExprId, ExprKind, ForKind, MemoryKind, Stmt, Type, TypeKind,
};
use std::fmt::Write;

pub fn print_expr(arena: &ExprArena, e: ExprId) -> String {
    let mut out = String::new();
    expr(arena, e, &mut out);
    out
}

pub fn print_stmt(arena: &ExprArena, s: &Stmt) -> String {
    let mut out = String::new();
    stmt(arena, s, 0, &mut out);
    out
}

pub fn print_type(ty: Type) -> String {
    let prefix = match ty.kind {
        TypeKind::Int => "i",
        TypeKind::UInt => "u",
        TypeKind::Float => "f",
    };
    if ty.lanes == 1 {
        format!("{}{}", prefix, ty.bits)
    } else {
        format!("{}{}x{}", prefix, ty.bits, ty.lanes)
    }
}

fn op_str(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Min => "min",
        BinOp::Max => "max",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::And => "&&",
        BinOp::Or => "||",
    }
}

fn expr(arena: &ExprArena, e: ExprId, out: &mut String) {
    match arena.kind(e) {
        ExprKind::IntImm(v) => {
            if arena.ty(e).is_bool() {
                let _ = write!(out, "{}", if *v != 0 { "true" } else { "false" });
            } else {
                let _ = write!(out, "{}", v);
            }
        }
        ExprKind::FloatImm(v) => {
            let _ = write!(out, "{:?}f", v);
        }
        ExprKind::Var(name) => out.push_str(name),
        ExprKind::Binary { op, a, b } => match op {
            BinOp::Min | BinOp::Max => {
                let _ = write!(out, "{}(", op_str(*op));
                expr(arena, *a, out);
                out.push_str(", ");
                expr(arena, *b, out);
                out.push(')');
            }
            _ => {
                out.push('(');
                expr(arena, *a, out);
                let _ = write!(out, " {} ", op_str(*op));
                expr(arena, *b, out);
                out.push(')');
            }
        },
        ExprKind::Select {
            cond,
            if_true,
            if_false,
        } => {
            out.push_str("select(");
            expr(arena, *cond, out);
            out.push_str(", ");
            expr(arena, *if_true, out);
            out.push_str(", ");
            expr(arena, *if_false, out);
            out.push(')');
        }
        ExprKind::Ramp {
            base,
            stride,
            lanes,
        } => {
            out.push_str("ramp(");
            expr(arena, *base, out);
            out.push_str(", ");
            expr(arena, *stride, out);
            let _ = write!(out, ", {})", lanes);
        }
        ExprKind::Broadcast { value, lanes } => {
            let _ = write!(out, "x{}(", lanes);
            expr(arena, *value, out);
            out.push(')');
        }
        ExprKind::Load {
            buffer,
            index,
            predicate,
            ..
        } => {
            out.push_str(buffer);
            out.push('[');
            expr(arena, *index, out);
            out.push(']');
            if !arena.is_const_true(*predicate) {
                out.push_str(" if ");
                expr(arena, *predicate, out);
            }
        }
        ExprKind::Let { name, value, body } => {
            let _ = write!(out, "(let {} = ", name);
            expr(arena, *value, out);
            out.push_str(" in ");
            expr(arena, *body, out);
            out.push(')');
        }
        ExprKind::Call { callee, args } => {
            out.push_str(callee);
            out.push('(');
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                expr(arena, *a, out);
            }
            out.push(')');
        }
    }
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn stmt(arena: &ExprArena, s: &Stmt, depth: usize, out: &mut String) {
    match s {
        Stmt::Store {
            buffer,
            index,
            value,
            predicate,
        } => {
            indent(depth, out);
            out.push_str(buffer);
            out.push('[');
            expr(arena, *index, out);
            out.push_str("] = ");
            expr(arena, *value, out);
            if !arena.is_const_true(*predicate) {
                out.push_str(" if ");
                expr(arena, *predicate, out);
            }
            out.push('\n');
        }
        Stmt::LetStmt { name, value, body } => {
            indent(depth, out);
            let _ = write!(out, "let {} = ", name);
            expr(arena, *value, out);
            out.push('\n');
            stmt(arena, body, depth, out);
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                stmt(arena, s, depth, out);
            }
        }
        Stmt::For {
            var,
            min,
            extent,
            kind,
            body,
            ..
        } => {
            indent(depth, out);
            let prefix = match kind {
                ForKind::Serial => "for",
                ForKind::Parallel => "parallel for",
                ForKind::Vectorized => "vectorized for",
                ForKind::Unrolled => "unrolled for",
            };
            let _ = write!(out, "{} ({}, ", prefix, var);
            expr(arena, *min, out);
            out.push_str(", ");
            expr(arena, *extent, out);
            out.push_str(") {\n");
            stmt(arena, body, depth + 1, out);
            indent(depth, out);
            out.push_str("}\n");
        }
        Stmt::IfThenElse {
            cond,
            then_case,
            else_case,
        } => {
            indent(depth, out);
            out.push_str("if (");
            expr(arena, *cond, out);
            out.push_str(") {\n");
            stmt(arena, then_case, depth + 1, out);
            if let Some(e) = else_case {
                indent(depth, out);
                out.push_str("} else {\n");
                stmt(arena, e, depth + 1, out);
            }
            indent(depth, out);
            out.push_str("}\n");
        }
        Stmt::ProducerConsumer {
            name,
            is_producer,
            body,
        } => {
            indent(depth, out);
            let _ = write!(
                out,
                "{} {} {{\n",
                if *is_producer { "produce" } else { "consume" },
                name
            );
            stmt(arena, body, depth + 1, out);
            indent(depth, out);
            out.push_str("}\n");
        }
        Stmt::Allocate {
            name,
            ty,
            memory,
            extents,
            condition,
            body,
        } => {
            indent(depth, out);
            let _ = write!(out, "allocate {}[{}", name, print_type(*ty));
            for e in extents.iter() {
                out.push_str(" * ");
                expr(arena, *e, out);
            }
            out.push(']');
            let mem = match memory {
                MemoryKind::Stack => "stack",
                MemoryKind::Heap => "heap",
                MemoryKind::Auto => "auto",
            };
            let _ = write!(out, " in {}", mem);
            if !arena.is_const_true(*condition) {
                out.push_str(" if ");
                expr(arena, *condition, out);
            }
            out.push_str(" {\n");
            stmt(arena, body, depth + 1, out);
            indent(depth, out);
            out.push_str("}\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::def::BufferOrigin;

    #[test]
    fn prints_a_store_loop() {
        let mut a = ExprArena::new();
        let x = a.var(Type::INT32, "x");
        let one = a.int(1);
        let xp1 = a.add(x, one);
        let t = a.const_true(1);
        let ld = a.load(Type::FLOAT32, "f", xp1, t, BufferOrigin::Image);
        let body = Stmt::Store {
            buffer: "out".to_string(),
            index: x,
            value: ld,
            predicate: t,
        };
        let zero = a.int(0);
        let n = a.var(Type::INT32, "n");
        let s = Stmt::serial_for("x", zero, n, body);
        let text = print_stmt(&a, &s);
        assert_eq!(text, "for (x, 0, n) {\n  out[x] = f[(x + 1)]\n}\n");
    }
}
