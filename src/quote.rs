//! Quoter
//!
//! Reifies semantic values back into IR, allocating a fresh level for every
//! binder it opens. Levels are binder depths: the value of a let is quoted
//! at the let's own level (the binder is not in scope there), bodies one
//! level deeper.
//!
//! The only non-local machinery here is branch resumption: a committed
//! branch body carries the still-pending sibling alternatives in the
//! context, and a defaultless branch encountered in result position absorbs
//! them as its reconstructed default. Operand positions and lambda bodies
//! clear the pending set; a lambda body runs in a different control context
//! than the match that produced it.

use std::rc::Rc;

use crate::builder::build;
use crate::eval::{eval, eval_branches};
use crate::semantics::{
    Env, EnvBinding, Externs, ExternSpine, Neutral, SemBranch, Semantics, Thunk,
};
use crate::syntax::{BackendExpr, BackendSyntax, Level, Literal, Pair, Prop, Qualified};

/// Quoting context: the next free level, the pending sibling branches of a
/// committed match arm, and the extern seam used for analysis lookups.
#[derive(Clone)]
pub struct Ctx {
    pub level: Level,
    pub resume: Option<ResumeBranches>,
    pub externs: Rc<dyn Externs>,
}

/// Sibling alternatives (and default) still pending behind a committed
/// branch body.
#[derive(Clone)]
pub struct ResumeBranches {
    pub branches: Vec<SemBranch>,
    pub default: Option<Thunk>,
}

impl Ctx {
    pub fn new(externs: Rc<dyn Externs>) -> Ctx {
        Ctx {
            level: Level(0),
            resume: None,
            externs,
        }
    }

    /// A context starting after the environment's existing bindings.
    pub fn from_env(env: &Env) -> Ctx {
        Ctx {
            level: Level(env.len()),
            resume: None,
            externs: Rc::clone(&env.externs),
        }
    }

    /// One binder deeper; pending branches flow through.
    fn deeper(&self) -> Ctx {
        Ctx {
            level: self.level.next(),
            resume: self.resume.clone(),
            externs: Rc::clone(&self.externs),
        }
    }

    /// The same level with pending branches cleared, for operand positions.
    fn without_resume(&self) -> Ctx {
        Ctx {
            level: self.level,
            resume: None,
            externs: Rc::clone(&self.externs),
        }
    }

    /// Extends the pending set for a committed branch body: two defaultless
    /// sets concatenate, anything else overwrites.
    fn with_resume(&self, branches: Vec<SemBranch>, default: Option<Thunk>) -> Ctx {
        let concat = default.is_none()
            && matches!(&self.resume, Some(existing) if existing.default.is_none());
        let resume = if concat {
            let mut all = match &self.resume {
                Some(existing) => existing.branches.clone(),
                None => Vec::new(),
            };
            all.extend(branches);
            ResumeBranches {
                branches: all,
                default: None,
            }
        } else {
            ResumeBranches { branches, default }
        };
        Ctx {
            level: self.level,
            resume: Some(resume),
            externs: Rc::clone(&self.externs),
        }
    }
}

/// Reifies a semantic value into IR under the given context.
pub fn quote(ctx: &Ctx, sem: Semantics) -> BackendExpr {
    match sem {
        Semantics::Extern(qual, spine) => quote_extern(ctx, qual, spine),
        Semantics::Lam(closure) => {
            let level = ctx.level;
            let ident = closure.ident();
            let arg = Semantics::local(ident.clone(), level);
            let body = quote(&ctx.deeper().without_resume(), closure.apply(arg));
            build(ctx, BackendSyntax::Abs(vec![(ident, level)], body))
        }
        Semantics::Let(ident, value, cont) => {
            let level = ctx.level;
            let binding = quote(&ctx.without_resume(), value.as_ref().clone());
            let body_sem = cont.call(Semantics::local(ident.clone(), level));
            let body = quote(&ctx.deeper(), body_sem);
            build(ctx, BackendSyntax::Let(ident, level, binding, body))
        }
        Semantics::LetRec(group, body) => {
            let level = ctx.level;
            let names = Rc::new(group.names());
            let opened = group
                .env
                .push(EnvBinding::RecOpen(level, Rc::clone(&names)));
            let inner = ctx.deeper();
            let bindings = group
                .bindings
                .iter()
                .map(|(ident, expr)| {
                    (
                        ident.clone(),
                        quote(&inner.without_resume(), eval(&opened, expr)),
                    )
                })
                .collect();
            let body = quote(&inner, eval(&opened, &body));
            build(ctx, BackendSyntax::LetRec(level, bindings, body))
        }
        Semantics::EffectBind(ident, value, cont) => {
            let level = ctx.level;
            let binding = quote(&ctx.without_resume(), value.as_ref().clone());
            let body_sem = cont.call(Semantics::local(ident.clone(), level));
            let body = quote(&ctx.deeper(), body_sem);
            build(ctx, BackendSyntax::EffectBind(ident, level, binding, body))
        }
        Semantics::EffectPure(value) => {
            let value = quote(ctx, value.as_ref().clone());
            build(ctx, BackendSyntax::EffectPure(value))
        }
        Semantics::Branch(branches, default) => quote_branch(ctx, branches, default),
        Semantics::BranchTry(body, branches, default) => {
            let extended = ctx.with_resume(branches, default);
            quote(&extended, body.as_ref().clone())
        }
        Semantics::Accessor(lhs, acc) => {
            let lhs = quote(&ctx.without_resume(), lhs.as_ref().clone());
            build(ctx, BackendSyntax::Accessor(lhs, acc))
        }
        Semantics::Update(lhs, props) => {
            let inner = ctx.without_resume();
            let lhs = quote(&inner, lhs.as_ref().clone());
            let props = props
                .into_iter()
                .map(|p| Prop::new(p.name, quote(&inner, p.value)))
                .collect();
            build(ctx, BackendSyntax::Update(lhs, props))
        }
        Semantics::Neutral(neutral) => quote_neutral(ctx, neutral),
    }
}

fn quote_branch(
    ctx: &Ctx,
    branches: Vec<SemBranch>,
    default: Option<Thunk>,
) -> BackendExpr {
    let inner = ctx.without_resume();
    let pairs = branches
        .iter()
        .map(|branch| {
            Pair::new(
                quote(&inner, branch.pred.force()),
                quote(&inner, branch.body.force()),
            )
        })
        .collect();
    let default = match default {
        Some(d) => Some(quote(&inner, d.force())),
        // A partial match in result position absorbs the pending siblings.
        None => ctx.resume.as_ref().map(|resume| {
            let sem = eval_branches(resume.branches.clone(), resume.default.clone());
            quote(&inner, sem)
        }),
    };
    build(ctx, BackendSyntax::Branch(pairs, default))
}

/// An unresolved extern quotes as its neutral replay: the variable with the
/// logged spine applied back onto it.
fn quote_extern(ctx: &Ctx, qual: Qualified, spine: Vec<ExternSpine>) -> BackendExpr {
    let inner = ctx.without_resume();
    let mut expr = build(&inner, BackendSyntax::Var(qual));
    for entry in spine {
        expr = match entry {
            ExternSpine::App(args) => {
                let args = args.iter().map(|arg| quote(&inner, arg.force())).collect();
                build(&inner, BackendSyntax::App(expr, args))
            }
            ExternSpine::Acc(acc) => build(&inner, BackendSyntax::Accessor(expr, acc)),
        };
    }
    expr
}

fn quote_neutral(ctx: &Ctx, neutral: Neutral) -> BackendExpr {
    let inner = ctx.without_resume();
    match neutral {
        Neutral::Local(ident, level) => build(ctx, BackendSyntax::Local(ident, level)),
        Neutral::Var(qual) => build(ctx, BackendSyntax::Var(qual)),
        // A constructor of arity zero is its own canonical reference.
        Neutral::Data(qual, _, fields) if fields.is_empty() => {
            build(ctx, BackendSyntax::Var(qual))
        }
        Neutral::Data(qual, tag, fields) => {
            let fields = fields
                .into_iter()
                .map(|(name, field)| (name, quote(&inner, field.force())))
                .collect();
            build(ctx, BackendSyntax::CtorSaturated(qual, tag, fields))
        }
        Neutral::CtorDef(tag, fields) => build(ctx, BackendSyntax::CtorDef(tag, fields)),
        Neutral::App(head, args) if args.is_empty() => quote(ctx, head.as_ref().clone()),
        Neutral::App(head, args) => {
            let head = quote(&inner, head.as_ref().clone());
            let args = args.iter().map(|arg| quote(&inner, arg.force())).collect();
            build(ctx, BackendSyntax::App(head, args))
        }
        Neutral::Accessor(lhs, acc) => {
            let lhs = quote(&inner, lhs.as_ref().clone());
            build(ctx, BackendSyntax::Accessor(lhs, acc))
        }
        Neutral::Update(lhs, props) => {
            let lhs = quote(&inner, lhs.as_ref().clone());
            let props = props
                .into_iter()
                .map(|p| Prop::new(p.name, quote(&inner, p.value)))
                .collect();
            build(ctx, BackendSyntax::Update(lhs, props))
        }
        Neutral::Test(lhs, guard) => {
            let lhs = quote(&inner, lhs.as_ref().clone());
            build(ctx, BackendSyntax::Test(lhs, guard))
        }
        Neutral::Lit(lit) => {
            let lit = quote_literal(&inner, lit);
            build(ctx, BackendSyntax::Lit(lit))
        }
        Neutral::Fail(message) => build(ctx, BackendSyntax::Fail(message)),
    }
}

fn quote_literal(ctx: &Ctx, lit: Literal<Semantics>) -> Literal<BackendExpr> {
    match lit {
        Literal::Int(n) => Literal::Int(n),
        Literal::Number(x) => Literal::Number(x),
        Literal::String(s) => Literal::String(s),
        Literal::Char(c) => Literal::Char(c),
        Literal::Boolean(b) => Literal::Boolean(b),
        Literal::Array(xs) => {
            Literal::Array(xs.into_iter().map(|x| quote(ctx, x)).collect())
        }
        Literal::Record(props) => Literal::Record(
            props
                .into_iter()
                .map(|p| Prop::new(p.name, quote(ctx, p.value)))
                .collect(),
        ),
    }
}
