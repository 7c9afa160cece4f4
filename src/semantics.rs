//! Semantic domain
//!
//! The evaluation target of the optimizer: a second algebra whose values
//! carry captured environments and lazily-forced thunks. Values are created
//! during evaluation and discarded after quoting; the IR they came from is
//! never mutated.
//!
//! Closures are represented as an environment plus the IR body (an
//! environment machine), and the let-floating conversions use an explicit
//! continuation enum instead of host closures. Forcing, application, and
//! continuation invocation live in `crate::eval`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::analysis::BackendAnalysis;
use crate::syntax::{
    Accessor, BackendExpr, Guard, Ident, Level, Literal, ModuleName, Prop, Qualified,
};

/// Resolution seam for imported definitions, consulted during evaluation
/// and (for arity hints) during analysis.
pub trait Externs {
    /// The stored analysis of an imported definition, if known.
    fn extern_analysis(&self, qual: &Qualified) -> Option<BackendAnalysis>;

    /// Returns the semantic value of `qual` under the given spine, or
    /// `None` to leave the reference unresolved.
    fn eval_extern(&self, env: &Env, qual: &Qualified, spine: &[ExternSpine])
        -> Option<Semantics>;
}

// ============================================================================
// Thunks
// ============================================================================

/// A single-slot memoized cell: forces at most once.
#[derive(Debug, Clone)]
pub struct Thunk(pub(crate) Rc<RefCell<ThunkState>>);

#[derive(Debug)]
pub(crate) enum ThunkState {
    Deferred(Env, BackendExpr),
    /// Transient marker while the deferred expression runs; observing it
    /// means the IR producer built a self-referential strict binding.
    Forcing,
    Forced(Semantics),
}

impl Thunk {
    pub fn defer(env: &Env, expr: &BackendExpr) -> Thunk {
        Thunk(Rc::new(RefCell::new(ThunkState::Deferred(
            env.clone(),
            expr.clone(),
        ))))
    }

    /// An already-forced thunk.
    pub fn from_sem(sem: Semantics) -> Thunk {
        Thunk(Rc::new(RefCell::new(ThunkState::Forced(sem))))
    }
}

// ============================================================================
// Values
// ============================================================================

/// Semantic values. Cloning is shallow: recursive positions are `Rc`-shared.
#[derive(Debug, Clone)]
pub enum Semantics {
    /// An unresolved imported reference with the spine of operations
    /// applied to it so far. Its neutral reification is derived from the
    /// name and spine when quoted.
    Extern(Qualified, Vec<ExternSpine>),
    Lam(Closure),
    /// A named value with a pending continuation; kept first-class so lets
    /// can float outward through applications and projections.
    Let(Option<Ident>, Rc<Semantics>, SemCont),
    LetRec(Rc<RecGroup>, BackendExpr),
    /// Monadic bind; shaped like `Let` but opaque to the floating rules.
    EffectBind(Option<Ident>, Rc<Semantics>, SemCont),
    EffectPure(Rc<Semantics>),
    /// A stuck multi-way test: scrutinees evaluated, outcome unknown.
    Branch(Vec<SemBranch>, Option<Thunk>),
    /// A resolved branch body packaged with the still-pending sibling
    /// branches, so quoting can let the body absorb them if it turns out
    /// to be a partial match.
    BranchTry(Rc<Semantics>, Vec<SemBranch>, Option<Thunk>),
    Accessor(Rc<Semantics>, Accessor),
    Update(Rc<Semantics>, Vec<Prop<Semantics>>),
    Neutral(Neutral),
}

/// A value stuck on an unknown; preserved verbatim into the output.
#[derive(Debug, Clone)]
pub enum Neutral {
    Local(Option<Ident>, Level),
    Var(Qualified),
    /// Constructed data with lazily-forced fields.
    Data(Qualified, Ident, Vec<(String, Thunk)>),
    CtorDef(Ident, Vec<String>),
    App(Rc<Semantics>, Vec<Thunk>),
    Accessor(Rc<Semantics>, Accessor),
    Update(Rc<Semantics>, Vec<Prop<Semantics>>),
    Test(Rc<Semantics>, Guard),
    Lit(Literal<Semantics>),
    Fail(String),
}

/// One alternative of a stuck branch; both sides stay lazy.
#[derive(Debug, Clone)]
pub struct SemBranch {
    pub pred: Thunk,
    pub body: Thunk,
}

impl Semantics {
    pub fn local(ident: Option<Ident>, level: Level) -> Semantics {
        Semantics::Neutral(Neutral::Local(ident, level))
    }

    pub fn boolean(b: bool) -> Semantics {
        Semantics::Neutral(Neutral::Lit(Literal::Boolean(b)))
    }
}

// ============================================================================
// Closures and continuations
// ============================================================================

/// A lambda chain: captured environment, remaining parameters (non-empty),
/// and the IR body. Applying one argument peels one parameter.
#[derive(Debug, Clone)]
pub struct Closure {
    pub env: Env,
    pub params: Vec<Option<Ident>>,
    pub body: BackendExpr,
}

impl Closure {
    pub fn ident(&self) -> Option<Ident> {
        self.params.first().cloned().flatten()
    }
}

/// The continuation of a `Let`-shaped value: what happens to the bound
/// value once it is named.
#[derive(Debug, Clone)]
pub enum SemCont {
    /// Evaluate `body` under the environment extended with the value.
    Body(Env, BackendExpr),
    /// Continue a flattened let chain: every binding lives at the same
    /// level, so each one extends the *base* environment.
    Chain(Env, Vec<(Option<Ident>, BackendExpr)>, BackendExpr),
    /// Run the inner continuation, then feed its result through a pending
    /// operation under a fresh anonymous binding. This is the let-floating
    /// commuting conversion.
    Then(Rc<SemCont>, Rc<PendingOp>),
    /// Apply the pending operation directly.
    Op(Rc<PendingOp>),
    /// Resume an interrupted application: apply the closure to the value,
    /// then keep applying the remaining arguments.
    ApplyLam(Env, Closure, Vec<Thunk>),
}

/// An operation waiting for a let-bound head to be named.
#[derive(Debug, Clone)]
pub enum PendingOp {
    Apply(Env, Vec<Thunk>),
    Access(Env, Accessor),
    Update(Env, Vec<Prop<Semantics>>),
    Test(Env, Guard),
}

/// A mutually recursive group: the environment at its definition site plus
/// the member bindings. Member lookup re-extends the environment with the
/// group itself, so the knot is tied structurally rather than by
/// backpatching.
#[derive(Debug)]
pub struct RecGroup {
    pub env: Env,
    pub bindings: Vec<(Ident, BackendExpr)>,
}

impl RecGroup {
    pub fn names(&self) -> Vec<Ident> {
        self.bindings.iter().map(|(i, _)| i.clone()).collect()
    }
}

// ============================================================================
// Extern spines
// ============================================================================

/// Ordered log of operations applied to an unresolved extern. Consecutive
/// applications coalesce into a single `App` entry.
#[derive(Debug, Clone)]
pub enum ExternSpine {
    App(Vec<Thunk>),
    Acc(Accessor),
}

/// Appends an application to a spine, merging with a trailing `App`.
pub fn spine_push_app(spine: &mut Vec<ExternSpine>, args: Vec<Thunk>) {
    match spine.last_mut() {
        Some(ExternSpine::App(prev)) => prev.extend(args),
        _ => spine.push(ExternSpine::App(args)),
    }
}

// ============================================================================
// Environments
// ============================================================================

/// Evaluation environment: module name, extern resolver, and the ordered
/// local bindings. A binding's `Level` is its index.
#[derive(Clone)]
pub struct Env {
    pub module: ModuleName,
    pub externs: Rc<dyn Externs>,
    locals: Vec<EnvBinding>,
}

#[derive(Clone)]
pub enum EnvBinding {
    One(Rc<Semantics>),
    Rec(Rc<RecGroup>),
    /// A recursive group opened at a fresh level during quoting; members
    /// resolve to stuck locals.
    RecOpen(Level, Rc<Vec<Ident>>),
}

impl Env {
    pub fn new(module: ModuleName, externs: Rc<dyn Externs>) -> Env {
        Env {
            module,
            externs,
            locals: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.locals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    pub fn push(&self, binding: EnvBinding) -> Env {
        let mut env = self.clone();
        env.locals.push(binding);
        env
    }

    pub fn push_value(&self, value: Semantics) -> Env {
        self.push(EnvBinding::One(Rc::new(value)))
    }

    pub fn local(&self, level: Level) -> Option<&EnvBinding> {
        self.locals.get(level.0)
    }

    /// The same module and resolver with no local bindings; extern
    /// implementations are closed terms and evaluate under this.
    pub fn top(&self) -> Env {
        Env {
            module: self.module.clone(),
            externs: Rc::clone(&self.externs),
            locals: Vec::new(),
        }
    }

    pub fn eval_extern(&self, qual: &Qualified, spine: &[ExternSpine]) -> Option<Semantics> {
        self.externs.eval_extern(self, qual, spine)
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("module", &self.module)
            .field("locals", &self.locals.len())
            .finish()
    }
}

impl fmt::Debug for EnvBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvBinding::One(_) => write!(f, "One"),
            EnvBinding::Rec(group) => write!(f, "Rec({})", group.bindings.len()),
            EnvBinding::RecOpen(level, names) => {
                write!(f, "RecOpen({}, {})", level, names.len())
            }
        }
    }
}
