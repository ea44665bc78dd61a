//! `loft` is a mid-end optimizer for a small array/tensor IR: typed
//! expressions interned in a hash-consing arena, structured statements
//! (loops, blocks, producer/consumer regions, stack allocations), and the
//! passes that rewrite them.
//!
//! The headline pass is [`opt::loop_carry::loop_carry`]: loads inside a
//! serial loop whose address this iteration matches another load's address
//! on the previous iteration are kept in a small scratch buffer across
//! iterations, so each value is fetched from memory once instead of once
//! per iteration.

pub mod analyze;
pub mod ir;
pub mod opt;
pub mod utils;

pub use ir::def::{
    BinOp, BufferOrigin, DeviceApi, Expr, ExprArena, ExprId, ExprKind, ForKind, LoopPartition,
    MemoryKind, Stmt, Type, TypeKind,
};
pub use opt::loop_carry::loop_carry;
