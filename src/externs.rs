//! Extern resolution
//!
//! Imported definitions reach the optimizer as implementations paired with
//! their analyses. During evaluation, an unresolved reference accumulates a
//! spine of applications and projections; the table inspects the spine and
//! either produces a semantic value (alias chase, constructor saturation,
//! heuristic or directive-approved inlining) or declines, leaving the
//! reference to be emitted as a neutral.
//!
//! Directive precedence is resolved by the caller; the table receives the
//! final `EvalRef -> InlineDirective` map.

use std::collections::HashMap;
use std::rc::Rc;

use crate::analysis::BackendAnalysis;
use crate::builder::should_inline_extern_app;
use crate::eval::{eval, eval_app};
use crate::semantics::{Env, Externs, ExternSpine, Neutral, Semantics};
use crate::syntax::{Accessor, BackendExpr, BackendSyntax, Ident, Literal, Qualified};

/// An imported definition's implementation, as furnished by the driver.
#[derive(Debug, Clone)]
pub enum ExternImpl {
    /// An ordinary top-level term (a closed expression).
    Expr(BackendExpr),
    /// A data constructor: tag and field names.
    Ctor(Ident, Vec<String>),
    /// A dictionary of named members, each with its own analysis.
    Dict(Vec<(String, (BackendAnalysis, BackendExpr))>),
    /// A member of a recursive top-level group; never inlined.
    Rec,
}

/// Identifies a top-level binding or a named accessor path into one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EvalRef {
    Binding(Qualified),
    Accessor(Qualified, String),
}

/// A user-supplied inlining decision for one `EvalRef`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InlineDirective {
    #[default]
    Default,
    Never,
    Always,
    /// Inline once at least this many arguments are applied.
    Arity(usize),
}

/// A resolver that knows nothing: every reference stays neutral.
pub struct NoExterns;

impl Externs for NoExterns {
    fn extern_analysis(&self, _qual: &Qualified) -> Option<BackendAnalysis> {
        None
    }

    fn eval_extern(
        &self,
        _env: &Env,
        _qual: &Qualified,
        _spine: &[ExternSpine],
    ) -> Option<Semantics> {
        None
    }
}

/// Concrete resolver over an implementation map and a directive map.
#[derive(Default)]
pub struct ExternTable {
    impls: HashMap<Qualified, (BackendAnalysis, ExternImpl)>,
    directives: HashMap<EvalRef, InlineDirective>,
}

impl ExternTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, qual: Qualified, analysis: BackendAnalysis, impl_: ExternImpl) {
        self.impls.insert(qual, (analysis, impl_));
    }

    /// Registers an ordinary definition, taking the analysis off the term.
    pub fn insert_expr(&mut self, qual: Qualified, expr: BackendExpr) {
        let analysis = expr.analysis().clone();
        self.impls.insert(qual, (analysis, ExternImpl::Expr(expr)));
    }

    pub fn insert_directive(&mut self, eval_ref: EvalRef, directive: InlineDirective) {
        self.directives.insert(eval_ref, directive);
    }

    pub fn into_rc(self) -> Rc<dyn Externs> {
        Rc::new(self)
    }

    fn directive(&self, eval_ref: &EvalRef) -> InlineDirective {
        self.directives.get(eval_ref).copied().unwrap_or_default()
    }

    /// Whether the directive (or, for `Default`, the size heuristic)
    /// approves expanding `eval_ref` at a call site with `applied` args.
    fn approves(&self, eval_ref: &EvalRef, analysis: &BackendAnalysis, applied: usize) -> bool {
        match self.directive(eval_ref) {
            InlineDirective::Never => false,
            InlineDirective::Always => true,
            InlineDirective::Arity(n) => applied >= n,
            InlineDirective::Default => should_inline_extern_app(analysis, applied),
        }
    }
}

impl Externs for ExternTable {
    fn extern_analysis(&self, qual: &Qualified) -> Option<BackendAnalysis> {
        self.impls.get(qual).map(|(analysis, _)| analysis.clone())
    }

    fn eval_extern(
        &self,
        env: &Env,
        qual: &Qualified,
        spine: &[ExternSpine],
    ) -> Option<Semantics> {
        let (analysis, impl_) = self.impls.get(qual)?;
        eval_extern_from_impl(self, env, qual, analysis, impl_, spine)
    }
}

/// Decides whether an implementation resolves under a spine. Declining is
/// always safe; the reference is then emitted verbatim.
pub fn eval_extern_from_impl(
    table: &ExternTable,
    env: &Env,
    qual: &Qualified,
    analysis: &BackendAnalysis,
    impl_: &ExternImpl,
    spine: &[ExternSpine],
) -> Option<Semantics> {
    // Implementations are closed top-level terms.
    let top = env.top();
    match impl_ {
        ExternImpl::Expr(expr) => {
            if table.directive(&EvalRef::Binding(qual.clone())) == InlineDirective::Never {
                return None;
            }
            match spine {
                // Alias of another definition: chase it.
                [] => match expr.as_syntax() {
                    Some(BackendSyntax::Var(_)) => Some(eval(&top, expr)),
                    _ => None,
                },
                // Projection out of a record of definitions.
                [ExternSpine::Acc(Accessor::GetProp(name))] => match expr.as_syntax() {
                    Some(BackendSyntax::Lit(Literal::Record(props))) => props
                        .iter()
                        .find(|prop| &prop.name == name)
                        .map(|prop| eval(&top, &prop.value)),
                    _ => None,
                },
                [ExternSpine::App(args)] => {
                    if table.approves(&EvalRef::Binding(qual.clone()), analysis, args.len()) {
                        Some(eval_app(&top, eval(&top, expr), args.clone()))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        }
        ExternImpl::Ctor(tag, fields) => match spine {
            [] if fields.is_empty() => {
                Some(Semantics::Neutral(Neutral::Data(qual.clone(), tag.clone(), Vec::new())))
            }
            [ExternSpine::App(args)] if fields.len() == args.len() => {
                let fields = fields.iter().cloned().zip(args.iter().cloned()).collect();
                Some(Semantics::Neutral(Neutral::Data(
                    qual.clone(),
                    tag.clone(),
                    fields,
                )))
            }
            _ => None,
        },
        ExternImpl::Dict(props) => match spine {
            [ExternSpine::Acc(Accessor::GetProp(name)), ExternSpine::App(args)] => {
                let (member_analysis, member) =
                    &props.iter().find(|(prop, _)| prop == name)?.1;
                let eval_ref = EvalRef::Accessor(qual.clone(), name.clone());
                if table.approves(&eval_ref, member_analysis, args.len()) {
                    Some(eval_app(&top, eval(&top, member), args.clone()))
                } else {
                    None
                }
            }
            _ => None,
        },
        ExternImpl::Rec => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use crate::syntax::{Guard, Level};

    fn table_env(table: ExternTable) -> Env {
        Env::new(crate::syntax::ModuleName("Main".into()), table.into_rc())
    }

    #[test]
    fn test_alias_chases_to_target() {
        let mut table = ExternTable::new();
        table.insert_expr(qual("A", "alias"), var("B", "target"));
        let env = table_env(table);
        match eval(&env, &var("A", "alias")) {
            Semantics::Extern(target, spine) => {
                assert_eq!(target, qual("B", "target"));
                assert!(spine.is_empty());
            }
            other => panic!("expected the chased target, got {:?}", other),
        }
    }

    #[test]
    fn test_record_member_projects() {
        let mut table = ExternTable::new();
        table.insert_expr(
            qual("A", "exports"),
            record([("one", int(1)), ("two", int(2))]),
        );
        let env = table_env(table);
        let expr = accessor(var("A", "exports"), Accessor::GetProp("two".into()));
        match eval(&env, &expr) {
            Semantics::Neutral(Neutral::Lit(Literal::Int(2))) => {}
            other => panic!("expected the projected member, got {:?}", other),
        }
    }

    #[test]
    fn test_saturated_application_inlines_small_function() {
        let mut table = ExternTable::new();
        let id = abs([(Some("x"), Level(0))], local("x", Level(0)));
        table.insert_expr(qual("A", "identity"), id);
        let env = table_env(table);
        let expr = app(var("A", "identity"), [int(5)]);
        match eval(&env, &expr) {
            Semantics::Let(None, value, _) => {
                assert!(matches!(
                    value.as_ref(),
                    Semantics::Neutral(Neutral::Lit(Literal::Int(5)))
                ));
            }
            other => panic!("expected the inlined body, got {:?}", other),
        }
    }

    #[test]
    fn test_undersaturated_application_declines() {
        let mut table = ExternTable::new();
        // A two-argument function big enough that only saturation justifies
        // expansion.
        let body = branch(
            [(
                test(local("x", Level(0)), Guard::Int(0)),
                app(var("B", "g"), vec![local("y", Level(1)); 8]),
            )],
            Some(local("y", Level(1))),
        );
        let f = abs([(Some("x"), Level(0)), (Some("y"), Level(1))], body);
        table.insert_expr(qual("A", "f"), f);
        let env = table_env(table);
        let expr = app(var("A", "f"), [int(1)]);
        assert!(matches!(eval(&env, &expr), Semantics::Extern(..)));
    }

    #[test]
    fn test_ctor_saturates_to_data() {
        let mut table = ExternTable::new();
        table.insert(
            qual("M", "Just"),
            BackendAnalysis::default(),
            ExternImpl::Ctor(Ident::new("Just"), vec!["value0".into()]),
        );
        let env = table_env(table);
        match eval(&env, &app(var("M", "Just"), [int(3)])) {
            Semantics::Neutral(Neutral::Data(_, tag, fields)) => {
                assert_eq!(tag, Ident::new("Just"));
                assert_eq!(fields.len(), 1);
            }
            other => panic!("expected saturated data, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_arity_ctor_resolves_bare() {
        let mut table = ExternTable::new();
        table.insert(
            qual("M", "Nothing"),
            BackendAnalysis::default(),
            ExternImpl::Ctor(Ident::new("Nothing"), vec![]),
        );
        let env = table_env(table);
        match eval(&env, &var("M", "Nothing")) {
            Semantics::Neutral(Neutral::Data(_, _, fields)) => assert!(fields.is_empty()),
            other => panic!("expected bare data, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_ctor_application_declines() {
        let mut table = ExternTable::new();
        table.insert(
            qual("M", "Pair"),
            BackendAnalysis::default(),
            ExternImpl::Ctor(Ident::new("Pair"), vec!["a".into(), "b".into()]),
        );
        let env = table_env(table);
        assert!(matches!(
            eval(&env, &app(var("M", "Pair"), [int(1)])),
            Semantics::Extern(..)
        ));
    }

    #[test]
    fn test_dict_member_inlines() {
        let mut table = ExternTable::new();
        let member = abs([(Some("x"), Level(0))], local("x", Level(0)));
        let member_analysis = member.analysis().clone();
        table.insert(
            qual("M", "showInt"),
            BackendAnalysis::default(),
            ExternImpl::Dict(vec![("show".into(), (member_analysis, member))]),
        );
        let env = table_env(table);
        let expr = app(
            accessor(var("M", "showInt"), Accessor::GetProp("show".into())),
            [int(4)],
        );
        assert!(matches!(eval(&env, &expr), Semantics::Let(..)));
    }

    #[test]
    fn test_never_directive_blocks_resolution() {
        let mut table = ExternTable::new();
        table.insert_expr(
            qual("A", "f"),
            abs([(Some("x"), Level(0))], local("x", Level(0))),
        );
        table.insert_directive(
            EvalRef::Binding(qual("A", "f")),
            InlineDirective::Never,
        );
        let env = table_env(table);
        assert!(matches!(
            eval(&env, &app(var("A", "f"), [int(1)])),
            Semantics::Extern(..)
        ));
    }

    #[test]
    fn test_arity_directive_gates_on_argument_count() {
        let mut table = ExternTable::new();
        let body = app(
            var("B", "combine"),
            vec![local("x", Level(0)); 40],
        );
        let f = abs([(Some("x"), Level(0)), (Some("y"), Level(1))], body);
        table.insert_expr(qual("A", "big"), f);
        table.insert_directive(
            EvalRef::Binding(qual("A", "big")),
            InlineDirective::Arity(2),
        );
        let env = table_env(table);
        assert!(matches!(
            eval(&env, &app(var("A", "big"), [int(1)])),
            Semantics::Extern(..)
        ));
        assert!(matches!(
            eval(&env, &app(var("A", "big"), [int(1), int(2)])),
            Semantics::Let(..)
        ));
    }

    #[test]
    fn test_always_directive_forces_inlining() {
        let mut table = ExternTable::new();
        let body = app(
            var("B", "combine"),
            vec![local("x", Level(0)); 40],
        );
        let f = abs([(Some("x"), Level(0))], body);
        table.insert_expr(qual("A", "big"), f);
        table.insert_directive(
            EvalRef::Binding(qual("A", "big")),
            InlineDirective::Always,
        );
        let env = table_env(table);
        assert!(matches!(
            eval(&env, &app(var("A", "big"), [int(1)])),
            Semantics::Let(..)
        ));
    }

    #[test]
    fn test_rec_member_never_resolves() {
        let mut table = ExternTable::new();
        table.insert(
            qual("A", "loop"),
            BackendAnalysis::default(),
            ExternImpl::Rec,
        );
        let env = table_env(table);
        assert!(matches!(
            eval(&env, &app(var("A", "loop"), [int(1)])),
            Semantics::Extern(..)
        ));
    }
}
