pub mod cse;
pub mod def;
pub mod eval;
pub mod graph;
pub mod printer;
pub mod simplify;

pub use def::*;
