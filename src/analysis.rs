//! Usage and size analysis
//!
//! Every IR node carries a `BackendAnalysis` summarizing its subtree:
//! per-level usage counts (with a capture flag), a size, a complexity
//! ordering, the shapes of leading parameters, and a flag recording whether
//! a transient rewrite is pending below the node. Analyses combine
//! monoidally and are computed one syntax layer at a time; children are
//! assumed to be already decorated.

use std::collections::BTreeMap;

use crate::syntax::{BackendExpr, BackendSyntax, Level, Literal, Qualified};

/// How often a level is referenced, and whether any reference sits under a
/// delaying construct (lambda or branch).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub count: usize,
    pub captured: bool,
}

impl Usage {
    fn combine(self, other: Usage) -> Usage {
        Usage {
            count: self.count + other.count,
            captured: self.captured || other.captured,
        }
    }
}

/// Cost of duplicating a term, coarsely ordered.
///
/// `Trivial` terms compile to a name or a scalar constant. `Deref` terms
/// are projection chains off something cheap. `KnownSize` terms are
/// structures whose shape is statically known, so projections through them
/// still resolve. Everything else is `NonTrivial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Complexity {
    Trivial,
    Deref,
    KnownSize,
    NonTrivial,
}

/// Shape of one leading parameter, derived from how the body uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    Unused,
    Linear,
    Shared,
}

/// Bottom-up metadata for one subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendAnalysis {
    pub usages: BTreeMap<Level, Usage>,
    pub size: usize,
    pub complexity: Complexity,
    pub args: Vec<ArgShape>,
    pub rewrite: bool,
}

impl Default for BackendAnalysis {
    fn default() -> Self {
        BackendAnalysis {
            usages: BTreeMap::new(),
            size: 0,
            complexity: Complexity::Trivial,
            args: Vec::new(),
            rewrite: false,
        }
    }
}

impl BackendAnalysis {
    /// A single reference to `level`.
    pub fn used(level: Level) -> Self {
        let mut usages = BTreeMap::new();
        usages.insert(
            level,
            Usage {
                count: 1,
                captured: false,
            },
        );
        BackendAnalysis {
            usages,
            ..Default::default()
        }
    }

    /// Monoidal combination: usages sum, sizes sum, complexity maxes, arg
    /// shapes concatenate, rewrite flags or.
    pub fn combine(mut self, other: &BackendAnalysis) -> Self {
        for (level, usage) in &other.usages {
            self.usages
                .entry(*level)
                .and_modify(|u| *u = u.combine(*usage))
                .or_insert(*usage);
        }
        self.size += other.size;
        self.complexity = self.complexity.max(other.complexity);
        self.args.extend(other.args.iter().copied());
        self.rewrite |= other.rewrite;
        self
    }

    /// Models the cost of inlining a binding at `n` use sites: size and
    /// usage counts multiply, everything else is unchanged.
    pub fn scale(mut self, n: usize) -> Self {
        self.size *= n;
        for usage in self.usages.values_mut() {
            usage.count *= n;
        }
        self
    }

    /// Closes `level`: the binder is no longer free for outer contexts.
    pub fn bound(mut self, level: Level) -> Self {
        self.usages.remove(&level);
        self
    }

    /// Marks every usage as captured.
    pub fn captured(mut self) -> Self {
        for usage in self.usages.values_mut() {
            usage.captured = true;
        }
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Raises complexity to at least `complexity`.
    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = self.complexity.max(complexity);
        self
    }

    pub fn with_args(mut self, args: Vec<ArgShape>) -> Self {
        self.args = args;
        self
    }

    pub fn with_rewrite(mut self) -> Self {
        self.rewrite = true;
        self
    }

    fn shape_of(&self, level: Level) -> ArgShape {
        match self.usages.get(&level) {
            None => ArgShape::Unused,
            Some(u) if u.count == 1 && !u.captured => ArgShape::Linear,
            Some(_) => ArgShape::Shared,
        }
    }
}

fn combine_all<'a>(children: impl IntoIterator<Item = &'a BackendExpr>) -> BackendAnalysis {
    children
        .into_iter()
        .fold(BackendAnalysis::default(), |acc, child| {
            acc.combine(child.analysis())
        })
}

/// Computes the analysis of one syntax layer from its decorated children.
/// `lookup` supplies the analyses of imported definitions so references to
/// them carry an arity hint.
pub fn analyze(
    lookup: impl Fn(&Qualified) -> Option<BackendAnalysis>,
    syntax: &BackendSyntax<BackendExpr>,
) -> BackendAnalysis {
    match syntax {
        BackendSyntax::Var(qual) => {
            let args = lookup(qual).map(|a| a.args).unwrap_or_default();
            BackendAnalysis::default().with_size(1).with_args(args)
        }
        BackendSyntax::Local(_, level) => BackendAnalysis::used(*level)
            .with_size(1)
            .with_complexity(Complexity::NonTrivial),
        BackendSyntax::Lit(lit) => match lit {
            Literal::Array(xs) => combine_all(xs)
                .with_complexity(Complexity::KnownSize)
                .bump(),
            Literal::Record(props) => combine_all(props.iter().map(|p| &p.value))
                .with_complexity(Complexity::KnownSize)
                .bump(),
            _ => BackendAnalysis::default().with_size(1),
        },
        BackendSyntax::App(head, args) => {
            let applied = args.len();
            let head_args = head.analysis().args.clone();
            combine_all(std::iter::once(head).chain(args.iter()))
                .with_complexity(Complexity::NonTrivial)
                .with_args(head_args.into_iter().skip(applied).collect())
                .bump()
        }
        BackendSyntax::Abs(params, body) => {
            let inner = body.analysis().clone();
            let mut shapes: Vec<ArgShape> =
                params.iter().map(|(_, l)| inner.shape_of(*l)).collect();
            shapes.extend(inner.args.iter().copied());
            let mut analysis = inner.captured();
            for (_, level) in params {
                analysis = analysis.bound(*level);
            }
            analysis
                .with_complexity(Complexity::NonTrivial)
                .with_args(shapes)
                .bump()
        }
        BackendSyntax::Let(_, level, binding, body) => {
            let body_args = body.analysis().args.clone();
            combine_all([binding, body])
                .bound(*level)
                .with_complexity(Complexity::NonTrivial)
                .with_args(body_args)
                .bump()
        }
        BackendSyntax::LetRec(level, bindings, body) => {
            let body_args = body.analysis().args.clone();
            combine_all(bindings.iter().map(|(_, b)| b).chain([body]))
                .bound(*level)
                .with_complexity(Complexity::NonTrivial)
                .with_args(body_args)
                .bump()
        }
        BackendSyntax::EffectBind(_, level, binding, body) => combine_all([binding, body])
            .bound(*level)
            .with_complexity(Complexity::NonTrivial)
            .with_args(Vec::new())
            .bump(),
        BackendSyntax::EffectPure(value) => combine_all([value])
            .with_complexity(Complexity::NonTrivial)
            .with_args(Vec::new())
            .bump(),
        BackendSyntax::Accessor(lhs, _) => combine_all([lhs])
            .with_complexity(Complexity::Deref)
            .with_args(Vec::new())
            .bump(),
        BackendSyntax::Update(lhs, props) => {
            combine_all(std::iter::once(lhs).chain(props.iter().map(|p| &p.value)))
                .with_complexity(Complexity::NonTrivial)
                .with_args(Vec::new())
                .bump()
        }
        BackendSyntax::Branch(branches, default) => {
            let children = branches
                .iter()
                .flat_map(|pair| [&pair.pred, &pair.body])
                .chain(default.iter());
            combine_all(children)
                .captured()
                .with_complexity(Complexity::NonTrivial)
                .with_args(Vec::new())
                .bump()
        }
        BackendSyntax::Test(lhs, _) => combine_all([lhs])
            .with_complexity(Complexity::Deref)
            .with_args(Vec::new())
            .bump(),
        BackendSyntax::CtorDef(_, fields) => BackendAnalysis::default()
            .with_size(1)
            .with_args(fields.iter().map(|_| ArgShape::Linear).collect()),
        BackendSyntax::CtorSaturated(_, _, fields) => {
            combine_all(fields.iter().map(|(_, v)| v))
                .with_complexity(Complexity::KnownSize)
                .with_args(Vec::new())
                .bump()
        }
        BackendSyntax::Fail(_) => BackendAnalysis::default()
            .with_size(1)
            .with_complexity(Complexity::NonTrivial),
    }
}

impl BackendAnalysis {
    /// One node's own contribution to size.
    pub(crate) fn bump(mut self) -> Self {
        self.size += 1;
        self
    }
}
