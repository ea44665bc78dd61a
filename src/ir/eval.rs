//! A reference interpreter over concrete buffers. It exists so tests can
//! treat evaluation as an oracle: run a statement before and after an
//! optimization and require identical buffer contents. Nothing in the
//! compile pipeline calls this.

use crate::ir::def::{BinOp, ExprArena, ExprId, ExprKind, Stmt, Type, TypeKind};
use crate::utils::Scope;
use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// One value per lane.
pub type Value = SmallVec<[Scalar; 8]>;

/// A linear buffer addressed by logical index; `base` is the lowest valid
/// index, so stencil tests can populate negative positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    pub base: i64,
    pub data: Vec<Scalar>,
}

impl Buffer {
    pub fn zeroed(ty: Type, len: usize) -> Self {
        Buffer {
            base: 0,
            data: vec![zero_scalar(ty); len],
        }
    }

    pub fn from_ints(base: i64, vals: &[i64]) -> Self {
        Buffer {
            base,
            data: vals.iter().map(|&v| Scalar::Int(v)).collect(),
        }
    }

    pub fn from_floats(base: i64, vals: &[f64]) -> Self {
        Buffer {
            base,
            data: vals.iter().map(|&v| Scalar::Float(v)).collect(),
        }
    }

    pub fn from_bools(base: i64, vals: &[bool]) -> Self {
        Buffer {
            base,
            data: vals.iter().map(|&v| Scalar::Bool(v)).collect(),
        }
    }

    pub fn get(&self, i: i64) -> Scalar {
        let off = i - self.base;
        if off < 0 || off as usize >= self.data.len() {
            panic!("buffer read out of range: index {} (base {})", i, self.base);
        }
        self.data[off as usize]
    }

    pub fn set(&mut self, i: i64, v: Scalar) {
        let off = i - self.base;
        if off < 0 || off as usize >= self.data.len() {
            panic!("buffer write out of range: index {} (base {})", i, self.base);
        }
        self.data[off as usize] = v;
    }
}

pub type BufferStore = FxHashMap<String, Buffer>;

pub fn run_stmt(arena: &ExprArena, stmt: &Stmt, store: &mut BufferStore) {
    let mut ev = Evaluator {
        arena,
        env: Scope::new(),
    };
    ev.exec(stmt, store);
}

fn zero_scalar(ty: Type) -> Scalar {
    match ty.kind {
        TypeKind::Float => Scalar::Float(0.0),
        TypeKind::UInt if ty.bits == 1 => Scalar::Bool(false),
        _ => Scalar::Int(0),
    }
}

struct Evaluator<'a> {
    arena: &'a ExprArena,
    env: Scope<Value>,
}

impl Evaluator<'_> {
    fn eval(&mut self, e: ExprId, store: &BufferStore) -> Value {
        let node = self.arena.node(e).clone();
        match node.kind {
            ExprKind::IntImm(v) => {
                let s = if node.ty.is_bool() {
                    Scalar::Bool(v != 0)
                } else {
                    Scalar::Int(v)
                };
                smallvec![s; node.ty.lanes as usize]
            }
            ExprKind::FloatImm(v) => smallvec![Scalar::Float(v); node.ty.lanes as usize],
            ExprKind::Var(ref name) => self
                .env
                .get(name)
                .unwrap_or_else(|| panic!("evaluating unbound variable '{}'", name))
                .clone(),
            ExprKind::Binary { op, a, b } => {
                let va = self.eval(a, store);
                let vb = self.eval(b, store);
                let lanes = va.len().max(vb.len());
                let va = widen(va, lanes);
                let vb = widen(vb, lanes);
                va.into_iter()
                    .zip(vb)
                    .map(|(x, y)| scalar_binop(op, x, y))
                    .collect()
            }
            ExprKind::Select {
                cond,
                if_true,
                if_false,
            } => {
                let vc = self.eval(cond, store);
                let vt = self.eval(if_true, store);
                let vf = self.eval(if_false, store);
                let lanes = vc.len().max(vt.len()).max(vf.len());
                let vc = widen(vc, lanes);
                let vt = widen(vt, lanes);
                let vf = widen(vf, lanes);
                vc.into_iter()
                    .zip(vt.into_iter().zip(vf))
                    .map(|(c, (t, f))| if as_bool(c) { t } else { f })
                    .collect()
            }
            ExprKind::Ramp {
                base,
                stride,
                lanes,
            } => {
                let b = as_int(&self.eval(base, store));
                let s = as_int(&self.eval(stride, store));
                (0..lanes as i64).map(|k| Scalar::Int(b + k * s)).collect()
            }
            ExprKind::Broadcast { value, lanes } => {
                let v = self.eval(value, store);
                widen(v, lanes as usize)
            }
            ExprKind::Load {
                ref buffer,
                index,
                predicate,
                ..
            } => {
                let idx = self.eval(index, store);
                let pred = widen(self.eval(predicate, store), idx.len());
                let buf = store
                    .get(buffer)
                    .unwrap_or_else(|| panic!("load from unknown buffer '{}'", buffer));
                idx.into_iter()
                    .zip(pred)
                    .map(|(i, p)| {
                        if as_bool(p) {
                            buf.get(scalar_int(i))
                        } else {
                            zero_scalar(node.ty.element_of())
                        }
                    })
                    .collect()
            }
            ExprKind::Let {
                ref name,
                value,
                body,
            } => {
                let v = self.eval(value, store);
                self.env.push(name, v);
                let b = self.eval(body, store);
                self.env.pop(name);
                b
            }
            ExprKind::Call { ref callee, .. } => {
                panic!("cannot evaluate synthetic call '{}'", callee)
            }
        }
    }

    fn exec(&mut self, s: &Stmt, store: &mut BufferStore) {
        match s {
            Stmt::Store {
                buffer,
                index,
                value,
                predicate,
            } => {
                let idx = self.eval(*index, store);
                let val = widen(self.eval(*value, store), idx.len());
                let pred = widen(self.eval(*predicate, store), idx.len());
                let buf = store
                    .get_mut(buffer)
                    .unwrap_or_else(|| panic!("store to unknown buffer '{}'", buffer));
                for ((i, v), p) in idx.into_iter().zip(val).zip(pred) {
                    if as_bool(p) {
                        buf.set(scalar_int(i), v);
                    }
                }
            }
            Stmt::LetStmt { name, value, body } => {
                let v = self.eval(*value, store);
                self.env.push(name, v);
                self.exec(body, store);
                self.env.pop(name);
            }
            Stmt::Block(stmts) => {
                for s in stmts {
                    self.exec(s, store);
                }
            }
            // Every loop kind runs serially here; the interpreter is a
            // semantics oracle, not a performance model.
            Stmt::For {
                var,
                min,
                extent,
                body,
                ..
            } => {
                let mn = as_int(&self.eval(*min, store));
                let ext = as_int(&self.eval(*extent, store));
                for i in mn..mn + ext.max(0) {
                    self.env.push(var, smallvec![Scalar::Int(i)]);
                    self.exec(body, store);
                    self.env.pop(var);
                }
            }
            Stmt::IfThenElse {
                cond,
                then_case,
                else_case,
            } => {
                let c = self.eval(*cond, store);
                if as_bool(c[0]) {
                    self.exec(then_case, store);
                } else if let Some(e) = else_case {
                    self.exec(e, store);
                }
            }
            Stmt::ProducerConsumer { body, .. } => self.exec(body, store),
            Stmt::Allocate {
                name,
                ty,
                extents,
                condition,
                body,
                ..
            } => {
                let c = self.eval(*condition, store);
                let live = as_bool(c[0]);
                if live {
                    let mut len = 1i64;
                    for &e in extents.iter() {
                        len *= as_int(&self.eval(e, store));
                    }
                    store.insert(name.clone(), Buffer::zeroed(*ty, len.max(0) as usize));
                }
                self.exec(body, store);
                if live {
                    store.remove(name);
                }
            }
        }
    }
}

fn widen(v: Value, lanes: usize) -> Value {
    if v.len() == lanes {
        v
    } else if v.len() == 1 {
        smallvec![v[0]; lanes]
    } else {
        panic!("lane mismatch: {} vs {}", v.len(), lanes)
    }
}

fn as_int(v: &Value) -> i64 {
    scalar_int(v[0])
}

fn scalar_int(s: Scalar) -> i64 {
    match s {
        Scalar::Int(i) => i,
        other => panic!("expected integer scalar, got {:?}", other),
    }
}

fn as_bool(s: Scalar) -> bool {
    match s {
        Scalar::Bool(b) => b,
        Scalar::Int(i) => i != 0,
        Scalar::Float(_) => panic!("float used as condition"),
    }
}

fn scalar_binop(op: BinOp, a: Scalar, b: Scalar) -> Scalar {
    use Scalar::*;
    match (a, b) {
        (Int(x), Int(y)) => match op {
            BinOp::Add => Int(x.wrapping_add(y)),
            BinOp::Sub => Int(x.wrapping_sub(y)),
            BinOp::Mul => Int(x.wrapping_mul(y)),
            BinOp::Div => Int(x.div_euclid(y)),
            BinOp::Min => Int(x.min(y)),
            BinOp::Max => Int(x.max(y)),
            BinOp::Eq => Bool(x == y),
            BinOp::Ne => Bool(x != y),
            BinOp::Lt => Bool(x < y),
            BinOp::Le => Bool(x <= y),
            BinOp::Gt => Bool(x > y),
            BinOp::Ge => Bool(x >= y),
            BinOp::And => Bool(x != 0 && y != 0),
            BinOp::Or => Bool(x != 0 || y != 0),
        },
        (Float(x), Float(y)) => match op {
            BinOp::Add => Float(x + y),
            BinOp::Sub => Float(x - y),
            BinOp::Mul => Float(x * y),
            BinOp::Div => Float(x / y),
            BinOp::Min => Float(x.min(y)),
            BinOp::Max => Float(x.max(y)),
            BinOp::Eq => Bool(x == y),
            BinOp::Ne => Bool(x != y),
            BinOp::Lt => Bool(x < y),
            BinOp::Le => Bool(x <= y),
            BinOp::Gt => Bool(x > y),
            BinOp::Ge => Bool(x >= y),
            _ => panic!("boolean op on float operands"),
        },
        (Bool(x), Bool(y)) => match op {
            BinOp::And => Bool(x && y),
            BinOp::Or => Bool(x || y),
            BinOp::Eq => Bool(x == y),
            BinOp::Ne => Bool(x != y),
            _ => panic!("arithmetic on boolean operands"),
        },
        (a, b) => panic!("mixed scalar kinds in binary op: {:?} vs {:?}", a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::def::BufferOrigin;

    #[test]
    fn runs_a_simple_copy_loop() {
        let mut a = ExprArena::new();
        let x = a.var(Type::INT32, "x");
        let t = a.const_true(1);
        let ld = a.load(Type::INT32, "f", x, t, BufferOrigin::Image);
        let body = Stmt::Store {
            buffer: "out".to_string(),
            index: x,
            value: ld,
            predicate: t,
        };
        let zero = a.int(0);
        let four = a.int(4);
        let s = Stmt::serial_for("x", zero, four, body);

        let mut store = BufferStore::default();
        store.insert("f".to_string(), Buffer::from_ints(0, &[3, 1, 4, 1]));
        store.insert("out".to_string(), Buffer::from_ints(0, &[0; 4]));
        run_stmt(&a, &s, &mut store);
        assert_eq!(store["out"], Buffer::from_ints(0, &[3, 1, 4, 1]));
    }

    #[test]
    fn vector_store_through_ramp() {
        let mut a = ExprArena::new();
        let zero = a.int(0);
        let one = a.int(1);
        let r = a.ramp(zero, one, 4);
        let t4 = a.const_true(4);
        let ld = a.load(Type::INT32.with_lanes(4), "f", r, t4, BufferOrigin::Image);
        let s = Stmt::Store {
            buffer: "out".to_string(),
            index: r,
            value: ld,
            predicate: t4,
        };
        let mut store = BufferStore::default();
        store.insert("f".to_string(), Buffer::from_ints(0, &[9, 8, 7, 6]));
        store.insert("out".to_string(), Buffer::from_ints(0, &[0; 4]));
        run_stmt(&a, &s, &mut store);
        assert_eq!(store["out"], Buffer::from_ints(0, &[9, 8, 7, 6]));
    }

    #[test]
    fn predicated_store_skips_lanes() {
        let mut a = ExprArena::new();
        let x = a.var(Type::INT32, "x");
        let five = a.int(5);
        let p = a.binary(BinOp::Lt, x, five);
        let x2 = a.mul(x, x);
        let body = Stmt::Store {
            buffer: "out".to_string(),
            index: x,
            value: x2,
            predicate: p,
        };
        let zero = a.int(0);
        let ten = a.int(10);
        let s = Stmt::serial_for("x", zero, ten, body);
        let mut store = BufferStore::default();
        store.insert("out".to_string(), Buffer::from_ints(0, &[-1; 10]));
        run_stmt(&a, &s, &mut store);
        assert_eq!(
            store["out"],
            Buffer::from_ints(0, &[0, 1, 4, 9, 16, -1, -1, -1, -1, -1])
        );
    }
}
