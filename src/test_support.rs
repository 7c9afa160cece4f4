//! Test support: IR construction helpers
//!
//! Shared by the unit tests and the integration suite. Terms built here are
//! decorated with a freshly computed analysis (no externs), so they satisfy
//! the bottom-up consistency invariant without going through the builder's
//! rewrite table; tests control the exact input shape.

use std::rc::Rc;

use crate::analysis::analyze;
use crate::externs::NoExterns;
use crate::optimize::{freeze, optimize};
use crate::quote::Ctx;
use crate::semantics::{Env, Externs};
use crate::syntax::{
    Accessor, BackendExpr, BackendSyntax, Guard, Ident, Level, Literal, ModuleName, NeutralExpr,
    Pair, Prop, Qualified,
};

pub fn no_externs() -> Rc<dyn Externs> {
    Rc::new(NoExterns)
}

pub fn test_env() -> Env {
    Env::new(ModuleName("Main".into()), no_externs())
}

pub fn test_ctx() -> Ctx {
    Ctx::new(no_externs())
}

/// Decorates a raw syntax layer without applying builder rewrites.
pub fn expr(syntax: BackendSyntax<BackendExpr>) -> BackendExpr {
    BackendExpr::syntax(analyze(|_| None, &syntax), syntax)
}

pub fn qual(module: &str, name: &str) -> Qualified {
    Qualified::new(module, name)
}

pub fn int(n: i64) -> BackendExpr {
    expr(BackendSyntax::Lit(Literal::Int(n)))
}

pub fn number(x: f64) -> BackendExpr {
    expr(BackendSyntax::Lit(Literal::Number(x)))
}

pub fn string(s: &str) -> BackendExpr {
    expr(BackendSyntax::Lit(Literal::String(s.into())))
}

pub fn boolean(b: bool) -> BackendExpr {
    expr(BackendSyntax::Lit(Literal::Boolean(b)))
}

pub fn array(items: impl IntoIterator<Item = BackendExpr>) -> BackendExpr {
    expr(BackendSyntax::Lit(Literal::Array(
        items.into_iter().collect(),
    )))
}

pub fn record<'a>(props: impl IntoIterator<Item = (&'a str, BackendExpr)>) -> BackendExpr {
    expr(BackendSyntax::Lit(Literal::Record(
        props
            .into_iter()
            .map(|(name, value)| Prop::new(name, value))
            .collect(),
    )))
}

pub fn var(module: &str, name: &str) -> BackendExpr {
    expr(BackendSyntax::Var(qual(module, name)))
}

pub fn local(name: &str, level: Level) -> BackendExpr {
    expr(BackendSyntax::Local(Some(Ident::new(name)), level))
}

pub fn local_anon(level: Level) -> BackendExpr {
    expr(BackendSyntax::Local(None, level))
}

pub fn app(head: BackendExpr, args: impl IntoIterator<Item = BackendExpr>) -> BackendExpr {
    expr(BackendSyntax::App(head, args.into_iter().collect()))
}

pub fn abs<'a>(
    params: impl IntoIterator<Item = (Option<&'a str>, Level)>,
    body: BackendExpr,
) -> BackendExpr {
    expr(BackendSyntax::Abs(
        params
            .into_iter()
            .map(|(name, level)| (name.map(Ident::new), level))
            .collect(),
        body,
    ))
}

pub fn let_(
    name: Option<&str>,
    level: Level,
    binding: BackendExpr,
    body: BackendExpr,
) -> BackendExpr {
    expr(BackendSyntax::Let(
        name.map(Ident::new),
        level,
        binding,
        body,
    ))
}

pub fn letrec<'a>(
    level: Level,
    bindings: impl IntoIterator<Item = (&'a str, BackendExpr)>,
    body: BackendExpr,
) -> BackendExpr {
    expr(BackendSyntax::LetRec(
        level,
        bindings
            .into_iter()
            .map(|(name, b)| (Ident::new(name), b))
            .collect(),
        body,
    ))
}

pub fn effect_bind(
    name: Option<&str>,
    level: Level,
    binding: BackendExpr,
    body: BackendExpr,
) -> BackendExpr {
    expr(BackendSyntax::EffectBind(
        name.map(Ident::new),
        level,
        binding,
        body,
    ))
}

pub fn effect_pure(value: BackendExpr) -> BackendExpr {
    expr(BackendSyntax::EffectPure(value))
}

pub fn accessor(lhs: BackendExpr, acc: Accessor) -> BackendExpr {
    expr(BackendSyntax::Accessor(lhs, acc))
}

pub fn update<'a>(
    lhs: BackendExpr,
    props: impl IntoIterator<Item = (&'a str, BackendExpr)>,
) -> BackendExpr {
    expr(BackendSyntax::Update(
        lhs,
        props
            .into_iter()
            .map(|(name, value)| Prop::new(name, value))
            .collect(),
    ))
}

pub fn branch(
    alternatives: impl IntoIterator<Item = (BackendExpr, BackendExpr)>,
    default: Option<BackendExpr>,
) -> BackendExpr {
    expr(BackendSyntax::Branch(
        alternatives
            .into_iter()
            .map(|(pred, body)| Pair::new(pred, body))
            .collect(),
        default,
    ))
}

pub fn test(lhs: BackendExpr, guard: Guard) -> BackendExpr {
    expr(BackendSyntax::Test(lhs, guard))
}

pub fn ctor_saturated<'a>(
    qual: Qualified,
    tag: &str,
    fields: impl IntoIterator<Item = (&'a str, BackendExpr)>,
) -> BackendExpr {
    expr(BackendSyntax::CtorSaturated(
        qual,
        Ident::new(tag),
        fields
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
    ))
}

pub fn fail(message: &str) -> BackendExpr {
    expr(BackendSyntax::Fail(message.into()))
}

/// Optimizes under an empty environment with no externs and freezes.
pub fn optimize_neutral(input: BackendExpr) -> NeutralExpr {
    optimize_neutral_with(test_env(), input)
}

/// Optimizes under the given environment (levels start after its bindings)
/// and freezes.
pub fn optimize_neutral_with(env: Env, input: BackendExpr) -> NeutralExpr {
    let ctx = Ctx::from_env(&env);
    let optimized = optimize(&ctx, &env, input).expect("optimizer should converge");
    freeze(&optimized).1
}

/// Optimizes and pretty-prints, for output-shape assertions.
pub fn optimize_pretty(input: BackendExpr) -> String {
    optimize_neutral(input).to_string()
}
