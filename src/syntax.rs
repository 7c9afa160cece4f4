//! Core intermediate representation
//!
//! The IR consumed and produced by the optimizer: a strict, pure functional
//! form with lambdas, saturated applications, linear and recursive lets,
//! record/array literals, accessors, multi-way branches, guard tests, data
//! constructors, and an explicit failure carrier.
//!
//! Binders are identified by de Bruijn *levels*: a `Level` is the binder's
//! depth counted from the outermost binder, and doubles as the index of the
//! binding in the evaluation environment. Substitution is never performed on
//! IR; all binder manipulation is environmental.

use std::fmt;
use std::rc::Rc;

use crate::analysis::BackendAnalysis;

/// Unqualified identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(pub String);

impl Ident {
    pub fn new(name: impl Into<String>) -> Self {
        Ident(name.into())
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque module name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleName(pub String);

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Module-qualified identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Qualified {
    pub module: ModuleName,
    pub name: Ident,
}

impl Qualified {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Qualified {
            module: ModuleName(module.into()),
            name: Ident::new(name),
        }
    }
}

impl fmt::Display for Qualified {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

/// A binder's position counted from the outermost binder. Equality is
/// identity; a level is also the index of the binding in the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Level(pub usize);

impl Level {
    pub fn next(self) -> Level {
        Level(self.0 + 1)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Literal values, generic in the subterm type so the same shape serves the
/// IR (subterms are expressions) and the semantic domain (subterms are
/// values).
#[derive(Debug, Clone, PartialEq)]
pub enum Literal<T> {
    Int(i64),
    Number(f64),
    String(String),
    Char(char),
    Boolean(bool),
    Array(Vec<T>),
    Record(Vec<Prop<T>>),
}

impl<T> Literal<T> {
    /// Scalar literals carry no subterms and are free to duplicate.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Literal::Array(_) | Literal::Record(_))
    }
}

/// A named record field.
#[derive(Debug, Clone, PartialEq)]
pub struct Prop<T> {
    pub name: String,
    pub value: T,
}

impl<T> Prop<T> {
    pub fn new(name: impl Into<String>, value: T) -> Self {
        Prop {
            name: name.into(),
            value,
        }
    }
}

/// Projection out of a record, array, or data constructor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Accessor {
    /// Record field by key.
    GetProp(String),
    /// Array element by position.
    GetIndex(usize),
    /// Constructor field by declaration-order position.
    GetOffset(usize),
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accessor::GetProp(p) => write!(f, ".{}", p),
            Accessor::GetIndex(n) => write!(f, "[{}]", n),
            Accessor::GetOffset(n) => write!(f, "#{}", n),
        }
    }
}

/// Scrutinee guards for `Test` nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    Int(i64),
    Number(f64),
    String(String),
    Char(char),
    Boolean(bool),
    /// Constructor tag check.
    Tag(Ident),
    /// Array length check.
    ArrayLength(usize),
}

/// One predicate/body alternative of a multi-way branch.
#[derive(Debug, Clone, PartialEq)]
pub struct Pair<T> {
    pub pred: T,
    pub body: T,
}

impl<T> Pair<T> {
    pub fn new(pred: T, body: T) -> Self {
        Pair { pred, body }
    }
}

/// IR syntax, one layer, recursive through `T`.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendSyntax<T> {
    /// Reference to a top-level definition, possibly in another module.
    Var(Qualified),
    /// Reference to a binder by level. The identifier is a name hint.
    Local(Option<Ident>, Level),
    Lit(Literal<T>),
    /// Application; `args` is non-empty.
    App(T, Vec<T>),
    /// Lambda; `params` is non-empty.
    Abs(Vec<(Option<Ident>, Level)>, T),
    Let(Option<Ident>, Level, T, T),
    /// Mutually recursive group bound at a single level; members are
    /// distinguished by identifier.
    LetRec(Level, Vec<(Ident, T)>, T),
    /// Monadic bind. Mirrors `Let` but is opaque to reordering.
    EffectBind(Option<Ident>, Level, T, T),
    /// Monadic return.
    EffectPure(T),
    Accessor(T, Accessor),
    /// Record update; `props` win over the subject's fields.
    Update(T, Vec<Prop<T>>),
    /// Multi-way conditional with optional default.
    Branch(Vec<Pair<T>>, Option<T>),
    Test(T, Guard),
    /// Constructor definition: tag and field names.
    CtorDef(Ident, Vec<String>),
    /// Fully applied constructor.
    CtorSaturated(Qualified, Ident, Vec<(String, T)>),
    /// Runtime failure of the compiled program; survives optimization.
    Fail(String),
}

// ============================================================================
// Decorated terms
// ============================================================================

/// A decorated IR term. Cheap to clone; subterms are shared.
///
/// The analysis stored in a node is always the analysis computed from its
/// current children.
#[derive(Debug, Clone)]
pub struct BackendExpr(pub Rc<BackendExprKind>);

#[derive(Debug)]
pub enum BackendExprKind {
    Syntax(BackendAnalysis, BackendSyntax<BackendExpr>),
    /// Transient node produced by the builder; the fixed-point driver
    /// re-evaluates whenever one is created, and `freeze` removes them.
    Rewrite(BackendAnalysis, BackendRewrite),
}

#[derive(Debug)]
pub enum BackendRewrite {
    /// A let whose binding will be expanded at its use sites on the next
    /// evaluation pass.
    Inline(Option<Ident>, Level, BackendExpr, BackendExpr),
    /// A flattened chain of lets: each binding is evaluated under the
    /// previous one, all at the same level.
    LetAssoc(Vec<LetBinding>, BackendExpr),
}

#[derive(Debug, Clone)]
pub struct LetBinding {
    pub ident: Option<Ident>,
    pub level: Level,
    pub expr: BackendExpr,
}

impl BackendExpr {
    pub fn syntax(analysis: BackendAnalysis, syntax: BackendSyntax<BackendExpr>) -> Self {
        BackendExpr(Rc::new(BackendExprKind::Syntax(analysis, syntax)))
    }

    pub fn rewrite(analysis: BackendAnalysis, rewrite: BackendRewrite) -> Self {
        BackendExpr(Rc::new(BackendExprKind::Rewrite(analysis, rewrite)))
    }

    pub fn kind(&self) -> &BackendExprKind {
        &self.0
    }

    pub fn analysis(&self) -> &BackendAnalysis {
        match self.kind() {
            BackendExprKind::Syntax(a, _) => a,
            BackendExprKind::Rewrite(a, _) => a,
        }
    }

    /// The syntax layer, when this node is not a rewrite.
    pub fn as_syntax(&self) -> Option<&BackendSyntax<BackendExpr>> {
        match self.kind() {
            BackendExprKind::Syntax(_, s) => Some(s),
            BackendExprKind::Rewrite(..) => None,
        }
    }

    pub fn is_abs(&self) -> bool {
        matches!(self.as_syntax(), Some(BackendSyntax::Abs(..)))
    }
}

// ============================================================================
// Frozen IR
// ============================================================================

/// Rewrite-free IR handed to consumers: `BackendSyntax` closed over itself,
/// with no analyses attached. Structural equality is derived.
#[derive(Debug, Clone, PartialEq)]
pub struct NeutralExpr(pub Rc<BackendSyntax<NeutralExpr>>);

impl NeutralExpr {
    pub fn new(syntax: BackendSyntax<NeutralExpr>) -> Self {
        NeutralExpr(Rc::new(syntax))
    }

    pub fn syntax(&self) -> &BackendSyntax<NeutralExpr> {
        &self.0
    }
}

/// Rebuilds one syntax layer with every child mapped through `f`.
pub fn map_syntax<T, U>(syntax: &BackendSyntax<T>, f: &mut impl FnMut(&T) -> U) -> BackendSyntax<U> {
    match syntax {
        BackendSyntax::Var(q) => BackendSyntax::Var(q.clone()),
        BackendSyntax::Local(i, l) => BackendSyntax::Local(i.clone(), *l),
        BackendSyntax::Lit(lit) => BackendSyntax::Lit(match lit {
            Literal::Int(n) => Literal::Int(*n),
            Literal::Number(x) => Literal::Number(*x),
            Literal::String(s) => Literal::String(s.clone()),
            Literal::Char(c) => Literal::Char(*c),
            Literal::Boolean(b) => Literal::Boolean(*b),
            Literal::Array(xs) => Literal::Array(xs.iter().map(&mut *f).collect()),
            Literal::Record(props) => Literal::Record(
                props
                    .iter()
                    .map(|p| Prop::new(p.name.clone(), f(&p.value)))
                    .collect(),
            ),
        }),
        BackendSyntax::App(head, args) => {
            BackendSyntax::App(f(head), args.iter().map(&mut *f).collect())
        }
        BackendSyntax::Abs(params, body) => BackendSyntax::Abs(params.clone(), f(body)),
        BackendSyntax::Let(i, l, binding, body) => {
            BackendSyntax::Let(i.clone(), *l, f(binding), f(body))
        }
        BackendSyntax::LetRec(l, bindings, body) => BackendSyntax::LetRec(
            *l,
            bindings
                .iter()
                .map(|(ident, b)| (ident.clone(), f(b)))
                .collect(),
            f(body),
        ),
        BackendSyntax::EffectBind(i, l, binding, body) => {
            BackendSyntax::EffectBind(i.clone(), *l, f(binding), f(body))
        }
        BackendSyntax::EffectPure(v) => BackendSyntax::EffectPure(f(v)),
        BackendSyntax::Accessor(lhs, acc) => BackendSyntax::Accessor(f(lhs), acc.clone()),
        BackendSyntax::Update(lhs, props) => BackendSyntax::Update(
            f(lhs),
            props
                .iter()
                .map(|p| Prop::new(p.name.clone(), f(&p.value)))
                .collect(),
        ),
        BackendSyntax::Branch(branches, default) => BackendSyntax::Branch(
            branches
                .iter()
                .map(|pair| Pair::new(f(&pair.pred), f(&pair.body)))
                .collect(),
            default.as_ref().map(&mut *f),
        ),
        BackendSyntax::Test(lhs, guard) => BackendSyntax::Test(f(lhs), guard.clone()),
        BackendSyntax::CtorDef(tag, fields) => {
            BackendSyntax::CtorDef(tag.clone(), fields.clone())
        }
        BackendSyntax::CtorSaturated(qual, tag, fields) => BackendSyntax::CtorSaturated(
            qual.clone(),
            tag.clone(),
            fields
                .iter()
                .map(|(name, v)| (name.clone(), f(v)))
                .collect(),
        ),
        BackendSyntax::Fail(msg) => BackendSyntax::Fail(msg.clone()),
    }
}

// ============================================================================
// Pretty printing
// ============================================================================

fn fmt_lit<T: fmt::Display>(f: &mut fmt::Formatter<'_>, lit: &Literal<T>) -> fmt::Result {
    match lit {
        Literal::Int(n) => write!(f, "{}", n),
        Literal::Number(x) => write!(f, "{:?}", x),
        Literal::String(s) => write!(f, "{:?}", s),
        Literal::Char(c) => write!(f, "{:?}", c),
        Literal::Boolean(b) => write!(f, "{}", b),
        Literal::Array(xs) => {
            write!(f, "[")?;
            for (i, x) in xs.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", x)?;
            }
            write!(f, "]")
        }
        Literal::Record(props) => {
            write!(f, "{{")?;
            for (i, p) in props.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", p.name, p.value)?;
            }
            write!(f, "}}")
        }
    }
}

fn fmt_binder(f: &mut fmt::Formatter<'_>, ident: &Option<Ident>, level: Level) -> fmt::Result {
    match ident {
        Some(i) => write!(f, "{}@{}", i, level),
        None => write!(f, "_@{}", level),
    }
}

fn fmt_syntax<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    syntax: &BackendSyntax<T>,
) -> fmt::Result {
    match syntax {
        BackendSyntax::Var(q) => write!(f, "{}", q),
        BackendSyntax::Local(i, l) => fmt_binder(f, i, *l),
        BackendSyntax::Lit(lit) => fmt_lit(f, lit),
        BackendSyntax::App(hd, args) => {
            write!(f, "({}", hd)?;
            for a in args {
                write!(f, " {}", a)?;
            }
            write!(f, ")")
        }
        BackendSyntax::Abs(params, body) => {
            write!(f, "(\\")?;
            for (i, (ident, level)) in params.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                fmt_binder(f, ident, *level)?;
            }
            write!(f, " -> {})", body)
        }
        BackendSyntax::Let(i, l, b, body) => {
            write!(f, "(let ")?;
            fmt_binder(f, i, *l)?;
            write!(f, " = {} in {})", b, body)
        }
        BackendSyntax::LetRec(l, bindings, body) => {
            write!(f, "(letrec@{}", l)?;
            for (ident, b) in bindings {
                write!(f, " {} = {};", ident, b)?;
            }
            write!(f, " in {})", body)
        }
        BackendSyntax::EffectBind(i, l, b, body) => {
            write!(f, "(bind ")?;
            fmt_binder(f, i, *l)?;
            write!(f, " <- {} in {})", b, body)
        }
        BackendSyntax::EffectPure(v) => write!(f, "(pure {})", v),
        BackendSyntax::Accessor(lhs, acc) => write!(f, "{}{}", lhs, acc),
        BackendSyntax::Update(lhs, props) => {
            write!(f, "{}{{", lhs)?;
            for (i, p) in props.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} = {}", p.name, p.value)?;
            }
            write!(f, "}}")
        }
        BackendSyntax::Branch(branches, default) => {
            write!(f, "(branch")?;
            for pair in branches {
                write!(f, " | {} -> {}", pair.pred, pair.body)?;
            }
            if let Some(d) = default {
                write!(f, " | else {}", d)?;
            }
            write!(f, ")")
        }
        BackendSyntax::Test(lhs, guard) => {
            write!(f, "(test {} ", lhs)?;
            match guard {
                Guard::Int(n) => write!(f, "= {}", n)?,
                Guard::Number(x) => write!(f, "= {:?}", x)?,
                Guard::String(s) => write!(f, "= {:?}", s)?,
                Guard::Char(c) => write!(f, "= {:?}", c)?,
                Guard::Boolean(b) => write!(f, "= {}", b)?,
                Guard::Tag(t) => write!(f, "is {}", t)?,
                Guard::ArrayLength(n) => write!(f, "len {}", n)?,
            }
            write!(f, ")")
        }
        BackendSyntax::CtorDef(tag, fields) => {
            write!(f, "(ctor {}/{})", tag, fields.len())
        }
        BackendSyntax::CtorSaturated(q, tag, fields) => {
            write!(f, "({}#{}", q, tag)?;
            for (name, v) in fields {
                write!(f, " {}={}", name, v)?;
            }
            write!(f, ")")
        }
        BackendSyntax::Fail(msg) => write!(f, "(fail {:?})", msg),
    }
}

impl fmt::Display for NeutralExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_syntax(f, self.syntax())
    }
}

impl fmt::Display for BackendExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            BackendExprKind::Syntax(_, s) => fmt_syntax(f, s),
            BackendExprKind::Rewrite(_, BackendRewrite::Inline(i, l, b, body)) => {
                write!(f, "(inline ")?;
                fmt_binder(f, i, *l)?;
                write!(f, " = {} in {})", b, body)
            }
            BackendExprKind::Rewrite(_, BackendRewrite::LetAssoc(bindings, body)) => {
                write!(f, "(letchain")?;
                for b in bindings {
                    write!(f, " ")?;
                    fmt_binder(f, &b.ident, b.level)?;
                    write!(f, " = {};", b.expr)?;
                }
                write!(f, " in {})", body)
            }
        }
    }
}
