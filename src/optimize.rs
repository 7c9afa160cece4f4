//! Fixed-point driver and freeze
//!
//! One optimization pass is `quote . eval`. A pass that created transient
//! rewrite nodes (`Inline`, `LetAssoc`) leaves the rewrite flag set on the
//! top analysis; the driver then re-runs the pass so the rewrites take
//! effect, until the flag clears or the iteration cap trips. `freeze`
//! flattens whatever rewrite nodes remain into plain lets, producing the
//! neutral IR handed to the code generator.

use std::rc::Rc;

use thiserror::Error;

use crate::analysis::{analyze, BackendAnalysis};
use crate::eval::eval;
use crate::quote::{quote, Ctx};
use crate::semantics::{Env, Externs};
use crate::syntax::{
    map_syntax, BackendExpr, BackendExprKind, BackendRewrite, BackendSyntax, Ident, ModuleName,
    NeutralExpr,
};

/// Hard cap on optimization passes. The heuristics are monotone, so the
/// loop converges long before this in practice.
pub const MAX_PASSES: usize = 24;

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("optimizer did not converge after {passes} passes")]
    DidNotConverge { passes: usize },
}

/// Runs eval/quote passes to a fixed point.
pub fn optimize(ctx: &Ctx, env: &Env, expr: BackendExpr) -> Result<BackendExpr, OptimizeError> {
    let mut expr = expr;
    for _ in 0..MAX_PASSES {
        expr = quote(ctx, eval(env, &expr));
        if let BackendExprKind::Syntax(analysis, _) = expr.kind() {
            if !analysis.rewrite {
                return Ok(expr);
            }
        }
    }
    Err(OptimizeError::DidNotConverge { passes: MAX_PASSES })
}

/// Flattens rewrite nodes into plain IR, returning the top analysis
/// unchanged alongside the frozen tree.
pub fn freeze(expr: &BackendExpr) -> (BackendAnalysis, NeutralExpr) {
    (expr.analysis().clone(), freeze_expr(expr))
}

fn freeze_expr(expr: &BackendExpr) -> NeutralExpr {
    match expr.kind() {
        BackendExprKind::Syntax(_, syntax) => {
            NeutralExpr::new(map_syntax(syntax, &mut freeze_expr))
        }
        BackendExprKind::Rewrite(_, BackendRewrite::Inline(ident, level, binding, body)) => {
            NeutralExpr::new(BackendSyntax::Let(
                ident.clone(),
                *level,
                freeze_expr(binding),
                freeze_expr(body),
            ))
        }
        BackendExprKind::Rewrite(_, BackendRewrite::LetAssoc(bindings, body)) => bindings
            .iter()
            .rev()
            .fold(freeze_expr(body), |inner, binding| {
                NeutralExpr::new(BackendSyntax::Let(
                    binding.ident.clone(),
                    binding.level,
                    freeze_expr(&binding.expr),
                    inner,
                ))
            }),
    }
}

/// Re-decorates frozen IR bottom-up, so one module's output can feed
/// another module's extern table.
pub fn thaw(externs: &Rc<dyn Externs>, expr: &NeutralExpr) -> BackendExpr {
    let syntax = map_syntax(expr.syntax(), &mut |child| thaw(externs, child));
    let lookup = Rc::clone(externs);
    BackendExpr::syntax(
        analyze(move |qual| lookup.extern_analysis(qual), &syntax),
        syntax,
    )
}

/// One module's worth of optimizer input: already parsed, desugared, and
/// name-resolved bindings.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: ModuleName,
    pub bindings: Vec<(Ident, BackendExpr)>,
}

/// Optimized output: per binding, the final analysis and the frozen IR.
#[derive(Debug, Clone)]
pub struct OptimizedModule {
    pub name: ModuleName,
    pub bindings: Vec<(Ident, BackendAnalysis, NeutralExpr)>,
}

/// Optimizes and freezes every binding of a module.
pub fn optimize_module(
    externs: Rc<dyn Externs>,
    module: Module,
) -> Result<OptimizedModule, OptimizeError> {
    let env = Env::new(module.name.clone(), Rc::clone(&externs));
    let ctx = Ctx::new(externs);
    let mut bindings = Vec::with_capacity(module.bindings.len());
    for (name, expr) in module.bindings {
        let optimized = optimize(&ctx, &env, expr)?;
        let (analysis, frozen) = freeze(&optimized);
        bindings.push((name, analysis, frozen));
    }
    Ok(OptimizedModule {
        name: module.name,
        bindings,
    })
}
