//! Smart constructors
//!
//! Every IR node produced during quoting flows through [`build`], which
//! applies algebraic simplifications on the way out: application and lambda
//! chains merge, lets nested in binding position flatten into an
//! association chain, single-argument eta redexes contract, branches with
//! empty or nested defaults collapse, and lets whose bindings pass the
//! inlining heuristic become transient `Inline` nodes.
//!
//! Only the two transient rewrite forms (`Inline`, `LetAssoc`) mark their
//! analysis with the rewrite flag: they are the ones the fixed-point driver
//! must re-evaluate. The remaining rows are plain normalizations of freshly
//! quoted syntax.

use crate::analysis::{analyze, BackendAnalysis, Complexity};
use crate::quote::Ctx;
use crate::syntax::{
    BackendExpr, BackendExprKind, BackendRewrite, BackendSyntax, Ident, LetBinding, Level,
};

/// Builds a decorated node, applying the rewrite table.
pub fn build(ctx: &Ctx, syntax: BackendSyntax<BackendExpr>) -> BackendExpr {
    match syntax {
        BackendSyntax::App(head, args) => {
            if let Some(BackendSyntax::App(inner_head, inner_args)) = head.as_syntax() {
                let mut all = inner_args.clone();
                all.extend(args);
                return build(ctx, BackendSyntax::App(inner_head.clone(), all));
            }
            build_default(ctx, BackendSyntax::App(head, args))
        }
        BackendSyntax::Abs(params, body) => {
            if let Some(BackendSyntax::Abs(inner_params, inner_body)) = body.as_syntax() {
                let mut all = params;
                all.extend(inner_params.iter().cloned());
                return build(ctx, BackendSyntax::Abs(all, inner_body.clone()));
            }
            if let Some(head) = eta_contract(&params, &body) {
                return head;
            }
            build_default(ctx, BackendSyntax::Abs(params, body))
        }
        BackendSyntax::Let(ident, level, binding, body) => {
            match binding.kind() {
                BackendExprKind::Syntax(_, BackendSyntax::Let(i2, l2, b2, body2)) => {
                    let bindings = vec![
                        LetBinding {
                            ident: i2.clone(),
                            level: *l2,
                            expr: b2.clone(),
                        },
                        LetBinding {
                            ident,
                            level,
                            expr: body2.clone(),
                        },
                    ];
                    return build_let_assoc(bindings, body);
                }
                BackendExprKind::Rewrite(_, BackendRewrite::LetAssoc(inner, inner_body)) => {
                    let mut bindings = inner.clone();
                    bindings.push(LetBinding {
                        ident,
                        level,
                        expr: inner_body.clone(),
                    });
                    return build_let_assoc(bindings, body);
                }
                _ => {}
            }
            if should_inline_let(level, &binding, &body) {
                return build_inline(ident, level, binding, body);
            }
            build_default(ctx, BackendSyntax::Let(ident, level, binding, body))
        }
        BackendSyntax::Branch(branches, default) => {
            if branches.is_empty() {
                if let Some(def) = default {
                    return def;
                }
                return build_default(ctx, BackendSyntax::Branch(branches, None));
            }
            if let Some(def) = &default {
                if let Some(BackendSyntax::Branch(inner, inner_def)) = def.as_syntax() {
                    let mut all = branches;
                    all.extend(inner.iter().cloned());
                    return build(ctx, BackendSyntax::Branch(all, inner_def.clone()));
                }
            }
            build_default(ctx, BackendSyntax::Branch(branches, default))
        }
        other => build_default(ctx, other),
    }
}

fn build_default(ctx: &Ctx, syntax: BackendSyntax<BackendExpr>) -> BackendExpr {
    let externs = ctx.externs.clone();
    let analysis = analyze(move |qual| externs.extern_analysis(qual), &syntax);
    BackendExpr::syntax(analysis, syntax)
}

/// `\x -> f x` contracts to `f` when `f` is a reference that cannot mention
/// `x`. Single-argument only.
fn eta_contract(
    params: &[(Option<Ident>, Level)],
    body: &BackendExpr,
) -> Option<BackendExpr> {
    let param_level = match params {
        [(_, level)] => *level,
        _ => return None,
    };
    match body.as_syntax() {
        Some(BackendSyntax::App(head, args)) => match args.as_slice() {
            [arg] => match arg.as_syntax() {
                Some(BackendSyntax::Local(_, arg_level))
                    if *arg_level == param_level && is_reference(head, param_level) =>
                {
                    Some(head.clone())
                }
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

fn is_reference(expr: &BackendExpr, bound: Level) -> bool {
    match expr.as_syntax() {
        Some(BackendSyntax::Var(_)) => true,
        Some(BackendSyntax::Local(_, level)) => *level != bound,
        _ => false,
    }
}

fn build_inline(
    ident: Option<Ident>,
    level: Level,
    binding: BackendExpr,
    body: BackendExpr,
) -> BackendExpr {
    let count = body
        .analysis()
        .usages
        .get(&level)
        .map(|u| u.count)
        .unwrap_or(0);
    // Simulated cost of the expansion: the binding is paid for once per
    // surviving use site.
    let analysis = body
        .analysis()
        .clone()
        .combine(&binding.analysis().clone().scale(count))
        .bound(level)
        .with_rewrite();
    BackendExpr::rewrite(analysis, BackendRewrite::Inline(ident, level, binding, body))
}

fn build_let_assoc(bindings: Vec<LetBinding>, body: BackendExpr) -> BackendExpr {
    let body_args = body.analysis().args.clone();
    let mut analysis = body.analysis().clone();
    for binding in bindings.iter().rev() {
        analysis = binding
            .expr
            .analysis()
            .clone()
            .combine(&analysis.bound(binding.level))
            .bump();
    }
    let analysis = analysis
        .with_complexity(Complexity::NonTrivial)
        .with_args(body_args)
        .with_rewrite();
    BackendExpr::rewrite(analysis, BackendRewrite::LetAssoc(bindings, body))
}

/// Decides whether a let binding is expanded at its use sites.
pub fn should_inline_let(level: Level, binding: &BackendExpr, body: &BackendExpr) -> bool {
    let a = binding.analysis();
    match body.analysis().usages.get(&level) {
        // Dead let.
        None => true,
        Some(usage) => {
            (a.complexity == Complexity::Trivial && a.size < 5)
                || (!usage.captured
                    && (usage.count == 1
                        || (a.complexity <= Complexity::Deref && a.size < 5)))
                || (binding.is_abs() && (a.usages.is_empty() || a.size < 128))
        }
    }
}

/// Decides whether an imported definition is expanded at a saturated call
/// site, given its stored analysis and the number of applied arguments.
pub fn should_inline_extern_app(analysis: &BackendAnalysis, applied: usize) -> bool {
    (analysis.complexity == Complexity::Trivial && analysis.size < 5)
        || (analysis.complexity <= Complexity::Deref && analysis.size < 5)
        || (analysis.args.len() <= applied && analysis.size < 128)
}
