//! Basalt - an optimizing middle-end for a strict functional IR
//!
//! The pipeline is normalization by evaluation: terms are interpreted into
//! a semantic domain (`eval`), reified back into IR at fresh de Bruijn
//! levels (`quote`) through smart constructors that perform algebraic
//! rewrites (`builder`), and the eval/quote pass repeats until no rewrite
//! fires (`optimize`). A final `freeze` flattens the transient rewrite
//! nodes into plain IR for the code generator.

pub mod analysis;
pub mod builder;
pub mod eval;
pub mod externs;
pub mod optimize;
pub mod quote;
pub mod semantics;
pub mod syntax;
pub mod test_support;

pub use analysis::{analyze, ArgShape, BackendAnalysis, Complexity, Usage};
pub use builder::{build, should_inline_extern_app, should_inline_let};
pub use eval::{eval, eval_app};
pub use externs::{EvalRef, ExternImpl, ExternTable, InlineDirective, NoExterns};
pub use optimize::{freeze, optimize, optimize_module, thaw, Module, OptimizeError, OptimizedModule};
pub use quote::{quote, Ctx};
pub use semantics::{Env, Externs, ExternSpine, Neutral, Semantics, Thunk};
pub use syntax::{
    Accessor, BackendExpr, BackendSyntax, Guard, Ident, Level, Literal, ModuleName, NeutralExpr,
    Prop, Qualified,
};
