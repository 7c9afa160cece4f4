//! Cross-module inlining through the extern table
//!
//! These tests exercise the full pipeline with a populated extern table:
//! alias chasing, record-of-definitions projection, saturated constructor
//! recovery, dictionary member expansion, and directive gating.

use std::rc::Rc;

use basalt::externs::{EvalRef, ExternImpl, ExternTable, InlineDirective};
use basalt::optimize::{freeze, optimize, thaw};
use basalt::quote::Ctx;
use basalt::semantics::{Env, Externs};
use basalt::syntax::{Accessor, Ident, Level, ModuleName};
use basalt::test_support::*;

fn run(table: ExternTable, input: basalt::BackendExpr) -> String {
    let externs: Rc<dyn Externs> = table.into_rc();
    let env = Env::new(ModuleName("Main".into()), Rc::clone(&externs));
    let ctx = Ctx::from_env(&env);
    let optimized = optimize(&ctx, &env, input).expect("optimizer should converge");
    freeze(&optimized).1.to_string()
}

#[test]
fn small_known_function_inlines_at_saturated_call() {
    let mut table = ExternTable::new();
    table.insert_expr(
        qual("Util", "identity"),
        abs([(Some("x"), Level(0))], local("x", Level(0))),
    );
    let input = app(var("Util", "identity"), [var("Data", "z")]);
    assert_eq!(run(table, input), "Data.z");
}

#[test]
fn alias_chain_chases_to_the_target() {
    let mut table = ExternTable::new();
    table.insert_expr(qual("A", "alias"), var("B", "target"));
    assert_eq!(run(table, var("A", "alias")), "B.target");
}

#[test]
fn record_of_definitions_projects_members() {
    let mut table = ExternTable::new();
    table.insert_expr(
        qual("A", "exports"),
        record([("one", int(1)), ("two", int(2))]),
    );
    let input = accessor(var("A", "exports"), Accessor::GetProp("two".into()));
    assert_eq!(run(table, input), "2");
}

#[test]
fn saturated_constructor_projects_through_case_offset() {
    let mut table = ExternTable::new();
    table.insert(
        qual("Data.Maybe", "Just"),
        Default::default(),
        ExternImpl::Ctor(Ident::new("Just"), vec!["value0".into()]),
    );
    let input = accessor(
        app(var("Data.Maybe", "Just"), [var("M", "x")]),
        Accessor::GetOffset(0),
    );
    assert_eq!(run(table, input), "M.x");
}

#[test]
fn dictionary_member_expands_at_call_site() {
    let mut table = ExternTable::new();
    let member = abs([(Some("x"), Level(0))], local("x", Level(0)));
    let member_analysis = member.analysis().clone();
    table.insert(
        qual("Data.Show", "showInt"),
        Default::default(),
        ExternImpl::Dict(vec![("show".into(), (member_analysis, member))]),
    );
    let input = app(
        accessor(var("Data.Show", "showInt"), Accessor::GetProp("show".into())),
        [int(5)],
    );
    assert_eq!(run(table, input), "5");
}

#[test]
fn never_directive_keeps_the_call_site() {
    let mut table = ExternTable::new();
    table.insert_expr(
        qual("Util", "identity"),
        abs([(Some("x"), Level(0))], local("x", Level(0))),
    );
    table.insert_directive(
        EvalRef::Binding(qual("Util", "identity")),
        InlineDirective::Never,
    );
    let input = app(var("Util", "identity"), [var("Data", "z")]);
    assert_eq!(run(table, input), "(Util.identity Data.z)");
}

#[test]
fn always_directive_forces_a_large_expansion() {
    let mut table = ExternTable::new();
    let big_body = app(
        var("P", "combine"),
        std::iter::repeat(local("x", Level(0)))
            .take(40)
            .collect::<Vec<_>>(),
    );
    table.insert_expr(
        qual("Util", "big"),
        abs([(Some("x"), Level(0))], big_body),
    );
    table.insert_directive(
        EvalRef::Binding(qual("Util", "big")),
        InlineDirective::Always,
    );
    let input = app(var("Util", "big"), [int(1)]);
    let output = run(table, input);
    assert!(output.starts_with("(P.combine 1 1"));
    assert!(!output.contains("Util.big"));
}

#[test]
fn arity_directive_waits_for_saturation() {
    let double = |level: Level| {
        app(
            var("P", "add"),
            [local("x", level), local("x", level)],
        )
    };
    let mk_table = || {
        let mut table = ExternTable::new();
        table.insert_expr(
            qual("Util", "double"),
            abs([(Some("x"), Level(0))], double(Level(0))),
        );
        table.insert_directive(
            EvalRef::Binding(qual("Util", "double")),
            InlineDirective::Arity(1),
        );
        table
    };
    assert_eq!(run(mk_table(), var("Util", "double")), "Util.double");
    assert_eq!(
        run(mk_table(), app(var("Util", "double"), [int(3)])),
        "(P.add 3 3)"
    );
}

#[test]
fn frozen_output_feeds_the_next_module() {
    // Optimize module A, thaw its output into the table, use it from B.
    let a_double = abs(
        [(Some("x"), Level(0))],
        app(var("P", "add"), [local("x", Level(0)), local("x", Level(0))]),
    );
    let none = no_externs();
    let env = Env::new(ModuleName("A".into()), Rc::clone(&none));
    let ctx = Ctx::new(Rc::clone(&none));
    let optimized = optimize(&ctx, &env, a_double).expect("converges");
    let (_, frozen) = freeze(&optimized);

    let mut table = ExternTable::new();
    table.insert_expr(qual("A", "double"), thaw(&none, &frozen));
    let input = app(var("A", "double"), [int(2)]);
    assert_eq!(run(table, input), "(P.add 2 2)");
}

#[test]
fn recursive_definitions_are_never_expanded() {
    let mut table = ExternTable::new();
    table.insert(qual("A", "loop"), Default::default(), ExternImpl::Rec);
    let input = app(var("A", "loop"), [int(1)]);
    assert_eq!(run(table, input), "(A.loop 1)");
}
