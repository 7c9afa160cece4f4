//! Evaluator
//!
//! Interprets IR terms into the semantic domain. Deterministic and total on
//! well-formed IR; an unbound level or a missing recursive-group member is a
//! bug in the IR producer and aborts.
//!
//! Application and projection float `Let`-shaped heads outward (a commuting
//! conversion that keeps bindings in source order while exposing redexes),
//! accumulate operations on unresolved externs into spines, and reduce
//! known projections and tests on the spot. `EffectBind`/`EffectPure` are
//! deliberately opaque to all of this: observable effect ordering is
//! preserved by never floating or inlining them.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::semantics::{
    spine_push_app, Closure, Env, EnvBinding, ExternSpine, Neutral, PendingOp, RecGroup,
    SemBranch, SemCont, Semantics, Thunk, ThunkState,
};
use crate::syntax::{
    Accessor, BackendExpr, BackendExprKind, BackendRewrite, BackendSyntax, Guard, Ident, Level,
    Literal, Prop,
};

/// Evaluates a term under an environment.
pub fn eval(env: &Env, expr: &BackendExpr) -> Semantics {
    match expr.kind() {
        BackendExprKind::Syntax(_, syntax) => eval_syntax(env, syntax),
        BackendExprKind::Rewrite(_, BackendRewrite::Inline(_, _, binding, body)) => {
            // Expansion happens here: the binding goes into the environment
            // without a residual let, so quoting copies it to each use site.
            let value = eval(env, binding);
            eval(&env.push_value(value), body)
        }
        BackendExprKind::Rewrite(_, BackendRewrite::LetAssoc(bindings, body)) => {
            match bindings.split_first() {
                None => eval(env, body),
                Some((first, rest)) => {
                    let value = eval(env, &first.expr);
                    let chain = SemCont::Chain(
                        env.clone(),
                        rest.iter()
                            .map(|b| (b.ident.clone(), b.expr.clone()))
                            .collect(),
                        body.clone(),
                    );
                    Semantics::Let(first.ident.clone(), Rc::new(value), chain)
                }
            }
        }
    }
}

fn eval_syntax(env: &Env, syntax: &BackendSyntax<BackendExpr>) -> Semantics {
    match syntax {
        BackendSyntax::Var(qual) => env
            .eval_extern(qual, &[])
            .unwrap_or_else(|| Semantics::Extern(qual.clone(), Vec::new())),
        BackendSyntax::Local(ident, level) => eval_local(env, ident, *level),
        BackendSyntax::Lit(lit) => Semantics::Neutral(Neutral::Lit(eval_literal(env, lit))),
        BackendSyntax::App(head, args) => {
            let head = eval(env, head);
            let args = args.iter().map(|arg| Thunk::defer(env, arg)).collect();
            eval_app(env, head, args)
        }
        BackendSyntax::Abs(params, body) => Semantics::Lam(Closure {
            env: env.clone(),
            params: params.iter().map(|(ident, _)| ident.clone()).collect(),
            body: body.clone(),
        }),
        BackendSyntax::Let(ident, _, binding, body) => Semantics::Let(
            ident.clone(),
            Rc::new(eval(env, binding)),
            SemCont::Body(env.clone(), body.clone()),
        ),
        BackendSyntax::LetRec(_, bindings, body) => Semantics::LetRec(
            Rc::new(RecGroup {
                env: env.clone(),
                bindings: bindings.clone(),
            }),
            body.clone(),
        ),
        BackendSyntax::EffectBind(ident, _, binding, body) => Semantics::EffectBind(
            ident.clone(),
            Rc::new(eval(env, binding)),
            SemCont::Body(env.clone(), body.clone()),
        ),
        BackendSyntax::EffectPure(value) => Semantics::EffectPure(Rc::new(eval(env, value))),
        BackendSyntax::Accessor(lhs, acc) => {
            let lhs = eval(env, lhs);
            eval_accessor(env, lhs, acc.clone())
        }
        BackendSyntax::Update(lhs, props) => {
            let lhs = eval(env, lhs);
            let props = props
                .iter()
                .map(|p| Prop::new(p.name.clone(), eval(env, &p.value)))
                .collect();
            eval_update(env, lhs, props)
        }
        BackendSyntax::Branch(branches, default) => {
            let branches = branches
                .iter()
                .map(|pair| SemBranch {
                    pred: Thunk::defer(env, &pair.pred),
                    body: Thunk::defer(env, &pair.body),
                })
                .collect();
            let default = default.as_ref().map(|d| Thunk::defer(env, d));
            eval_branches(branches, default)
        }
        BackendSyntax::Test(lhs, guard) => {
            let lhs = eval(env, lhs);
            eval_test(env, lhs, guard.clone())
        }
        BackendSyntax::CtorDef(tag, fields) => {
            Semantics::Neutral(Neutral::CtorDef(tag.clone(), fields.clone()))
        }
        BackendSyntax::CtorSaturated(qual, tag, fields) => Semantics::Neutral(Neutral::Data(
            qual.clone(),
            tag.clone(),
            fields
                .iter()
                .map(|(name, value)| (name.clone(), Thunk::defer(env, value)))
                .collect(),
        )),
        BackendSyntax::Fail(message) => Semantics::Neutral(Neutral::Fail(message.clone())),
    }
}

fn eval_local(env: &Env, ident: &Option<Ident>, level: Level) -> Semantics {
    match env.local(level) {
        Some(EnvBinding::One(sem)) => sem.as_ref().clone(),
        Some(EnvBinding::Rec(group)) => {
            let group = Rc::clone(group);
            let ident = match ident {
                Some(ident) => ident,
                None => panic!("recursive group reference at {} has no identifier", level),
            };
            rec_member(&group, ident)
        }
        Some(EnvBinding::RecOpen(group_level, names)) => {
            let group_level = *group_level;
            let ident = match ident {
                Some(ident) => ident.clone(),
                None => panic!("recursive group reference at {} has no identifier", level),
            };
            if !names.contains(&ident) {
                panic!("identifier {} absent from its recursive group", ident);
            }
            Semantics::local(Some(ident), group_level)
        }
        None => panic!(
            "unbound local at {} (environment has {} bindings)",
            level,
            env.len()
        ),
    }
}

/// Evaluates one member of a recursive group, re-tying the knot by pushing
/// the group back onto its own defining environment.
pub(crate) fn rec_member(group: &Rc<RecGroup>, ident: &Ident) -> Semantics {
    match group.bindings.iter().find(|(name, _)| name == ident) {
        Some((_, expr)) => {
            let env = group.env.push(EnvBinding::Rec(Rc::clone(group)));
            eval(&env, expr)
        }
        None => panic!("identifier {} absent from its recursive group", ident),
    }
}

fn eval_literal(env: &Env, lit: &Literal<BackendExpr>) -> Literal<Semantics> {
    match lit {
        Literal::Int(n) => Literal::Int(*n),
        Literal::Number(x) => Literal::Number(*x),
        Literal::String(s) => Literal::String(s.clone()),
        Literal::Char(c) => Literal::Char(*c),
        Literal::Boolean(b) => Literal::Boolean(*b),
        Literal::Array(xs) => Literal::Array(xs.iter().map(|x| eval(env, x)).collect()),
        Literal::Record(props) => Literal::Record(
            props
                .iter()
                .map(|p| Prop::new(p.name.clone(), eval(env, &p.value)))
                .collect(),
        ),
    }
}

/// Applies a head to already-thunked arguments, walking left to right.
pub fn eval_app(env: &Env, head: Semantics, args: Vec<Thunk>) -> Semantics {
    if args.is_empty() {
        return match head {
            Semantics::Neutral(Neutral::App(inner, inner_args)) if inner_args.is_empty() => {
                inner.as_ref().clone()
            }
            other => other,
        };
    }
    match head {
        Semantics::Lam(closure) => {
            // Name the argument before it enters the closure.
            let mut rest = args;
            let first = rest.remove(0);
            Semantics::Let(
                None,
                Rc::new(first.force()),
                SemCont::ApplyLam(env.clone(), closure, rest),
            )
        }
        Semantics::Extern(qual, mut spine) => {
            spine_push_app(&mut spine, args);
            match env.eval_extern(&qual, &spine) {
                Some(value) => value,
                None => Semantics::Extern(qual, spine),
            }
        }
        Semantics::Let(ident, value, cont) => Semantics::Let(
            ident,
            value,
            SemCont::Then(Rc::new(cont), Rc::new(PendingOp::Apply(env.clone(), args))),
        ),
        Semantics::Neutral(Neutral::App(inner, mut inner_args)) => {
            inner_args.extend(args);
            Semantics::Neutral(Neutral::App(inner, inner_args))
        }
        other => Semantics::Neutral(Neutral::App(Rc::new(other), args)),
    }
}

/// Applies a projection to an evaluated subject.
pub fn eval_accessor(env: &Env, lhs: Semantics, acc: Accessor) -> Semantics {
    match lhs {
        Semantics::Extern(qual, mut spine) => {
            spine.push(ExternSpine::Acc(acc));
            match env.eval_extern(&qual, &spine) {
                Some(value) => value,
                None => Semantics::Extern(qual, spine),
            }
        }
        Semantics::Let(ident, value, cont) => Semantics::Let(
            ident,
            value,
            SemCont::Then(Rc::new(cont), Rc::new(PendingOp::Access(env.clone(), acc))),
        ),
        Semantics::Neutral(neutral) => eval_accessor_neutral(neutral, acc),
        other => Semantics::Neutral(Neutral::Accessor(Rc::new(other), acc)),
    }
}

fn eval_accessor_neutral(neutral: Neutral, acc: Accessor) -> Semantics {
    match (&neutral, &acc) {
        (Neutral::Lit(Literal::Record(props)), Accessor::GetProp(name)) => {
            if let Some(prop) = props.iter().find(|prop| &prop.name == name) {
                return prop.value.clone();
            }
        }
        (Neutral::Lit(Literal::Array(xs)), Accessor::GetIndex(index)) => {
            if let Some(x) = xs.get(*index) {
                return x.clone();
            }
        }
        (Neutral::Data(_, _, fields), Accessor::GetOffset(offset)) => {
            if let Some((_, field)) = fields.get(*offset) {
                return field.force();
            }
        }
        _ => {}
    }
    Semantics::Neutral(Neutral::Accessor(Rc::new(Semantics::Neutral(neutral)), acc))
}

/// Merges a record update into a literal record, or leaves it stuck.
pub fn eval_update(env: &Env, lhs: Semantics, props: Vec<Prop<Semantics>>) -> Semantics {
    match lhs {
        Semantics::Neutral(Neutral::Lit(Literal::Record(old))) => {
            // New fields win; order is canonicalized by key.
            let mut merged: Vec<Prop<Semantics>> = props.into_iter().chain(old).collect();
            merged.sort_by(|a, b| a.name.cmp(&b.name));
            merged.dedup_by(|next, prev| next.name == prev.name);
            Semantics::Neutral(Neutral::Lit(Literal::Record(merged)))
        }
        Semantics::Let(ident, value, cont) => Semantics::Let(
            ident,
            value,
            SemCont::Then(
                Rc::new(cont),
                Rc::new(PendingOp::Update(env.clone(), props)),
            ),
        ),
        other => Semantics::Neutral(Neutral::Update(Rc::new(other), props)),
    }
}

/// Scans branch alternatives in order, dropping refuted ones, committing on
/// a proven one, and leaving the rest stuck.
pub fn eval_branches(branches: Vec<SemBranch>, default: Option<Thunk>) -> Semantics {
    let init = branches.clone();
    let mut acc: Vec<SemBranch> = Vec::new();
    let mut def = default;
    let mut queue: VecDeque<SemBranch> = branches.into();
    while let Some(branch) = queue.pop_front() {
        match branch.pred.force() {
            Semantics::Neutral(Neutral::Lit(Literal::Boolean(true))) => {
                match branch.body.force() {
                    // A fully determined inner branch replaces everything
                    // still pending.
                    Semantics::Branch(inner, Some(inner_def)) => {
                        queue = inner.into();
                        def = Some(inner_def);
                    }
                    // A partial inner branch falls through to the pending
                    // siblings.
                    Semantics::Branch(inner, None) => {
                        queue.extend(inner);
                    }
                    resolved => {
                        let tail: Vec<SemBranch> = queue.into_iter().collect();
                        let resume = Semantics::BranchTry(Rc::new(resolved), tail, def);
                        return Semantics::Branch(acc, Some(Thunk::from_sem(resume)));
                    }
                }
            }
            Semantics::Neutral(Neutral::Lit(Literal::Boolean(false))) => {}
            _ => acc.push(branch),
        }
    }
    if acc.is_empty() {
        match def {
            Some(d) => d.force(),
            // Every alternative was refuted and there is nothing to fall
            // back on: keep the original partial match intact.
            None => Semantics::Branch(init, None),
        }
    } else {
        Semantics::Branch(acc, def)
    }
}

/// Decides a guard against an evaluated scrutinee, or leaves it stuck.
pub fn eval_test(env: &Env, lhs: Semantics, guard: Guard) -> Semantics {
    match lhs {
        Semantics::Let(ident, value, cont) => Semantics::Let(
            ident,
            value,
            SemCont::Then(Rc::new(cont), Rc::new(PendingOp::Test(env.clone(), guard))),
        ),
        Semantics::Neutral(neutral) => eval_test_neutral(neutral, guard),
        other => Semantics::Neutral(Neutral::Test(Rc::new(other), guard)),
    }
}

fn eval_test_neutral(neutral: Neutral, guard: Guard) -> Semantics {
    let decided = match (&neutral, &guard) {
        (Neutral::Lit(Literal::Int(a)), Guard::Int(b)) => Some(a == b),
        (Neutral::Lit(Literal::Number(a)), Guard::Number(b)) => Some(a == b),
        (Neutral::Lit(Literal::String(a)), Guard::String(b)) => Some(a == b),
        (Neutral::Lit(Literal::Char(a)), Guard::Char(b)) => Some(a == b),
        (Neutral::Lit(Literal::Boolean(a)), Guard::Boolean(b)) => Some(a == b),
        (Neutral::Lit(Literal::Array(xs)), Guard::ArrayLength(n)) => Some(xs.len() == *n),
        (Neutral::Data(_, tag, _), Guard::Tag(t)) => Some(tag == t),
        _ => None,
    };
    match decided {
        Some(result) => Semantics::boolean(result),
        None => Semantics::Neutral(Neutral::Test(Rc::new(Semantics::Neutral(neutral)), guard)),
    }
}

// ============================================================================
// Forcing and application
// ============================================================================

impl Thunk {
    /// Forces the thunk, memoizing the result.
    pub fn force(&self) -> Semantics {
        let (env, expr) = {
            let mut state = self.0.borrow_mut();
            match &*state {
                ThunkState::Forced(sem) => return sem.clone(),
                ThunkState::Forcing => panic!("re-entrant force of a strict binding"),
                ThunkState::Deferred(..) => {
                    match std::mem::replace(&mut *state, ThunkState::Forcing) {
                        ThunkState::Deferred(env, expr) => (env, expr),
                        _ => unreachable!(),
                    }
                }
            }
        };
        let sem = eval(&env, &expr);
        *self.0.borrow_mut() = ThunkState::Forced(sem.clone());
        sem
    }
}

impl Closure {
    /// Applies one argument: peels one parameter, evaluating the body once
    /// the chain is exhausted.
    pub fn apply(&self, arg: Semantics) -> Semantics {
        let env = self.env.push_value(arg);
        if self.params.len() == 1 {
            eval(&env, &self.body)
        } else {
            Semantics::Lam(Closure {
                env,
                params: self.params[1..].to_vec(),
                body: self.body.clone(),
            })
        }
    }
}

impl SemCont {
    /// Feeds the named value into the continuation.
    pub fn call(&self, value: Semantics) -> Semantics {
        match self {
            SemCont::Body(env, body) => eval(&env.push_value(value), body),
            SemCont::Chain(env, rest, body) => {
                let extended = env.push_value(value);
                match rest.split_first() {
                    None => eval(&extended, body),
                    Some(((ident, expr), tail)) => {
                        let bound = eval(&extended, expr);
                        Semantics::Let(
                            ident.clone(),
                            Rc::new(bound),
                            SemCont::Chain(env.clone(), tail.to_vec(), body.clone()),
                        )
                    }
                }
            }
            SemCont::Then(first, op) => Semantics::Let(
                None,
                Rc::new(first.call(value)),
                SemCont::Op(Rc::clone(op)),
            ),
            SemCont::Op(op) => op.apply_to(value),
            SemCont::ApplyLam(env, closure, rest) => {
                eval_app(env, closure.apply(value), rest.clone())
            }
        }
    }
}

impl PendingOp {
    fn apply_to(&self, value: Semantics) -> Semantics {
        match self {
            PendingOp::Apply(env, args) => eval_app(env, value, args.clone()),
            PendingOp::Access(env, acc) => eval_accessor(env, value, acc.clone()),
            PendingOp::Update(env, props) => eval_update(env, value, props.clone()),
            PendingOp::Test(env, guard) => eval_test(env, value, guard.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn sem_int(sem: &Semantics) -> Option<i64> {
        match sem {
            Semantics::Neutral(Neutral::Lit(Literal::Int(n))) => Some(*n),
            _ => None,
        }
    }

    #[test]
    fn test_record_projection_resolves() {
        let env = test_env();
        let record = record([("foo", int(1)), ("bar", int(2))]);
        let expr = accessor(record, Accessor::GetProp("foo".into()));
        let sem = eval(&env, &expr);
        assert_eq!(sem_int(&sem), Some(1));
    }

    #[test]
    fn test_record_projection_missing_key_stays_stuck() {
        let env = test_env();
        let record = record([("foo", int(1))]);
        let expr = accessor(record, Accessor::GetProp("baz".into()));
        let sem = eval(&env, &expr);
        assert!(matches!(sem, Semantics::Neutral(Neutral::Accessor(..))));
    }

    #[test]
    fn test_array_index_resolves() {
        let env = test_env();
        let expr = accessor(array([int(10), int(20)]), Accessor::GetIndex(1));
        assert_eq!(sem_int(&eval(&env, &expr)), Some(20));
    }

    #[test]
    fn test_array_index_out_of_range_stays_stuck() {
        let env = test_env();
        let expr = accessor(array([int(10)]), Accessor::GetIndex(3));
        assert!(matches!(
            eval(&env, &expr),
            Semantics::Neutral(Neutral::Accessor(..))
        ));
    }

    #[test]
    fn test_ctor_offset_resolves() {
        let env = test_env();
        let just = ctor_saturated(qual("Data.Maybe", "Just"), "Just", [("value0", int(7))]);
        let expr = accessor(just, Accessor::GetOffset(0));
        assert_eq!(sem_int(&eval(&env, &expr)), Some(7));
    }

    #[test]
    fn test_update_merges_new_over_old() {
        let env = test_env();
        let expr = update(
            record([("a", int(1)), ("b", int(2))]),
            [("b", int(9)), ("c", int(3))],
        );
        match eval(&env, &expr) {
            Semantics::Neutral(Neutral::Lit(Literal::Record(props))) => {
                let fields: Vec<(String, Option<i64>)> = props
                    .iter()
                    .map(|p| (p.name.clone(), sem_int(&p.value)))
                    .collect();
                assert_eq!(
                    fields,
                    vec![
                        ("a".to_string(), Some(1)),
                        ("b".to_string(), Some(9)),
                        ("c".to_string(), Some(3)),
                    ]
                );
            }
            other => panic!("expected a record literal, got {:?}", other),
        }
    }

    #[test]
    fn test_guard_decides_on_literals() {
        let env = test_env();
        let yes = test(int(3), Guard::Int(3));
        let no = test(int(3), Guard::Int(4));
        assert!(matches!(
            eval(&env, &yes),
            Semantics::Neutral(Neutral::Lit(Literal::Boolean(true)))
        ));
        assert!(matches!(
            eval(&env, &no),
            Semantics::Neutral(Neutral::Lit(Literal::Boolean(false)))
        ));
    }

    #[test]
    fn test_guard_array_length_and_tag() {
        let env = test_env();
        let len = test(array([int(1), int(2)]), Guard::ArrayLength(2));
        assert!(matches!(
            eval(&env, &len),
            Semantics::Neutral(Neutral::Lit(Literal::Boolean(true)))
        ));
        let just = ctor_saturated(qual("M", "Just"), "Just", [("value0", int(1))]);
        let tag = test(just, Guard::Tag(Ident::new("Just")));
        assert!(matches!(
            eval(&env, &tag),
            Semantics::Neutral(Neutral::Lit(Literal::Boolean(true)))
        ));
    }

    #[test]
    fn test_guard_stuck_on_unknown() {
        let env = test_env();
        let expr = test(var("Other", "x"), Guard::Int(1));
        assert!(matches!(
            eval(&env, &expr),
            Semantics::Neutral(Neutral::Test(..))
        ));
    }

    #[test]
    fn test_beta_redex_names_argument() {
        // (\x -> x) y evaluates to a let naming the argument before the body
        // runs; quoting decides whether the let survives.
        let env = test_env().push_value(Semantics::local(None, Level(0)));
        let lam = abs([(Some("x"), Level(1))], local("x", Level(1)));
        let expr = app(lam, [local("y", Level(0))]);
        match eval(&env, &expr) {
            Semantics::Let(None, value, _) => {
                assert!(matches!(
                    value.as_ref(),
                    Semantics::Neutral(Neutral::Local(_, Level(0)))
                ));
            }
            other => panic!("expected a floated let, got {:?}", other),
        }
    }

    #[test]
    fn test_extern_application_accumulates_spine() {
        let env = test_env();
        let expr = app(app(var("M", "f"), [int(1)]), [int(2)]);
        match eval(&env, &expr) {
            Semantics::Extern(qual, spine) => {
                assert_eq!(qual.name, Ident::new("f"));
                assert_eq!(spine.len(), 1);
                match &spine[0] {
                    ExternSpine::App(args) => assert_eq!(args.len(), 2),
                    _ => panic!("expected a coalesced application spine"),
                }
            }
            other => panic!("expected an unresolved extern, got {:?}", other),
        }
    }

    #[test]
    fn test_branch_eliminates_refuted_alternatives() {
        let env = test_env();
        let expr = branch(
            [(boolean(false), int(1)), (boolean(true), int(2))],
            Some(int(3)),
        );
        match eval(&env, &expr) {
            Semantics::Branch(acc, Some(resume)) => {
                assert!(acc.is_empty());
                match resume.force() {
                    Semantics::BranchTry(body, tail, _) => {
                        assert_eq!(sem_int(&body), Some(2));
                        assert!(tail.is_empty());
                    }
                    other => panic!("expected a branch-try resume, got {:?}", other),
                }
            }
            other => panic!("expected a committed branch, got {:?}", other),
        }
    }

    #[test]
    fn test_branch_all_refuted_takes_default() {
        let env = test_env();
        let expr = branch([(boolean(false), int(1))], Some(int(9)));
        assert_eq!(sem_int(&eval(&env, &expr)), Some(9));
    }

    #[test]
    fn test_branch_stuck_predicate_accumulates() {
        let env = test_env();
        let expr = branch([(var("M", "p"), int(1))], Some(int(2)));
        match eval(&env, &expr) {
            Semantics::Branch(acc, Some(_)) => assert_eq!(acc.len(), 1),
            other => panic!("expected a stuck branch, got {:?}", other),
        }
    }

    #[test]
    #[should_panic(expected = "unbound local")]
    fn test_unbound_local_is_fatal() {
        let env = test_env();
        let expr = local("ghost", Level(4));
        eval(&env, &expr);
    }

    #[test]
    fn test_thunk_forces_once() {
        let env = test_env();
        let thunk = Thunk::defer(&env, &int(5));
        assert_eq!(sem_int(&thunk.force()), Some(5));
        assert_eq!(sem_int(&thunk.force()), Some(5));
        assert!(matches!(&*thunk.0.borrow(), ThunkState::Forced(_)));
    }

    #[test]
    fn test_letrec_member_sees_its_group() {
        // letrec f = \x -> g x; g = \y -> y in f
        let f_body = abs(
            [(Some("x"), Level(1))],
            app(local("g", Level(0)), [local("x", Level(1))]),
        );
        let g_body = abs([(Some("y"), Level(1))], local("y", Level(1)));
        let expr = letrec(
            Level(0),
            [("f", f_body), ("g", g_body)],
            local("f", Level(0)),
        );
        let env = test_env();
        match eval(&env, &expr) {
            Semantics::LetRec(group, _) => {
                assert_eq!(group.names(), vec![Ident::new("f"), Ident::new("g")]);
                let member = rec_member(&group, &Ident::new("f"));
                assert!(matches!(member, Semantics::Lam(_)));
            }
            other => panic!("expected a recursive group, got {:?}", other),
        }
    }
}
