//! Expression typing against a `run` record.

mod common;

use common::{messages, ty, type_of};
use olive_syntax::build::*;
use olive_syntax::{BinaryOp, FieldBinding, MatchBindings, UnaryOp};
use olive_typeck::{CompileError, Type};

fn ok(node: olive_syntax::ExprNode) -> Type {
    let (ty, errors) = type_of(node);
    assert!(errors.is_empty(), "{:?}", messages(&errors));
    ty
}

fn first_error(node: olive_syntax::ExprNode) -> String {
    let (ty, errors) = type_of(node);
    assert_eq!(ty, Type::Bad, "a failed expression is bad");
    assert!(!errors.is_empty(), "expected an error");
    errors[0].to_string()
}

// ── Objects and tuples ─────────────────────────────────────────────────

#[test]
fn test_object_field_access() {
    let obj = || object(vec![("a", int(1)), ("b", string("x"))]);
    assert_eq!(ok(field(obj(), "a")), Type::Integer);
    assert_eq!(first_error(field(obj(), "c")), "Field “c” is not in object");
}

#[test]
fn test_missing_field_position() {
    let (_, errors) = type_of(field(object(vec![("a", int(1))]), "c").at(3, 14));
    assert_eq!(errors[0].to_diagnostic().line, 3);
    assert_eq!(errors[0].to_diagnostic().column, 14);
}

#[test]
fn test_duplicate_object_field() {
    assert_eq!(
        first_error(object(vec![("a", int(1)), ("a", int(2))])),
        "Field “a” is given more than once"
    );
}

#[test]
fn test_tuple_index() {
    let t = || tuple(vec![int(1), string("x")]);
    assert_eq!(ok(tuple_get(t(), 1)), Type::String);
    assert_eq!(
        first_error(tuple_get(t(), 2)),
        "Tuple has 2 elements, but element 2 was requested"
    );
}

// ── Collections ────────────────────────────────────────────────────────

#[test]
fn test_list_elements_unify() {
    assert_eq!(ok(list(vec![])), Type::list(Type::Nothing));
    assert_eq!(ok(list(vec![var("lane"), int(2)])), Type::list(Type::Integer));
    let (ty, errors) = type_of(list(vec![int(1), string("x")]));
    assert_eq!(ty, Type::Bad);
    assert_eq!(messages(&errors), ["Cannot combine integer and string"]);
}

#[test]
fn test_dictionary_lookup_is_optional() {
    let d = dict(vec![(string("a"), int(1))]);
    assert_eq!(ok(dict_get(d, string("a"))), Type::optional(Type::Integer));
}

// ── Operators ──────────────────────────────────────────────────────────

#[test]
fn test_arithmetic_rules() {
    assert_eq!(ok(binary(BinaryOp::Add, var("size"), var("limit"))), Type::Integer);
    assert_eq!(ok(binary(BinaryOp::Add, var("name"), string("!"))), Type::String);
    assert_eq!(ok(binary(BinaryOp::Add, var("started"), int(60))), Type::Date);
    assert_eq!(
        ok(binary(BinaryOp::Subtract, var("started"), date(0))),
        Type::Integer
    );
    assert_eq!(
        first_error(binary(BinaryOp::Add, int(1), string("x"))),
        "No operator + for integer and string"
    );
    assert_eq!(
        first_error(binary(BinaryOp::Modulo, float(1.0), float(2.0))),
        "No operator % for float and float"
    );
}

#[test]
fn test_comparisons() {
    assert_eq!(ok(binary(BinaryOp::Less, var("size"), int(3))), Type::Boolean);
    assert_eq!(ok(binary(BinaryOp::Equal, var("status"), tag("DONE"))), Type::Boolean);
    assert_eq!(
        first_error(binary(BinaryOp::Less, var("tags"), var("tags"))),
        "No operator < for [string] and [string]"
    );
    assert_eq!(
        first_error(unary(UnaryOp::Not, int(1))),
        "No operator ! for integer"
    );
}

#[test]
fn test_bad_operand_reports_once() {
    let (_, errors) = type_of(binary(
        BinaryOp::And,
        binary(BinaryOp::Add, var("missing"), int(1)),
        boolean(true),
    ));
    assert_eq!(messages(&errors), ["Undefined variable “missing”"]);
}

// ── Switch and Match ───────────────────────────────────────────────────

#[test]
fn test_switch_with_else() {
    let e = switch(
        var("lane"),
        vec![(int(1), string("one")), (int(2), string("two"))],
        Some(string("many")),
    );
    assert_eq!(ok(e), Type::String);
}

#[test]
fn test_switch_over_integer_needs_else() {
    let e = switch(var("lane"), vec![(int(1), string("one"))], None);
    assert_eq!(first_error(e), "Switch over integer requires an Else");
}

#[test]
fn test_switch_covering_every_variant() {
    let e = switch(
        var("status"),
        vec![
            (tag("DONE"), int(0)),
            (tag("FAILED"), int(1)),
            (tag("RUNNING"), int(2)),
        ],
        None,
    );
    assert_eq!(ok(e), Type::Integer);
}

#[test]
fn test_switch_missing_variant() {
    let e = switch(var("status"), vec![(tag("DONE"), int(0))], None);
    assert_eq!(
        first_error(e),
        "Match does not handle FAILED, RUNNING; add the missing cases or a Remainder"
    );
}

#[test]
fn test_match_binds_payload() {
    let e = match_expr(
        var("result"),
        vec![
            match_arm(
                "SOME",
                MatchBindings::Tuple {
                    names: vec!["x".to_string()],
                },
                binary(BinaryOp::Add, var("x"), int(1)),
            ),
            match_arm("NONE", MatchBindings::Empty, int(0)),
        ],
        None,
    );
    assert_eq!(ok(e), Type::Integer);
}

#[test]
fn test_match_requires_remainder() {
    let arms = || {
        vec![match_arm(
            "SOME",
            MatchBindings::Tuple {
                names: vec!["x".to_string()],
            },
            var("x"),
        )]
    };
    assert_eq!(
        first_error(match_expr(var("result"), arms(), None)),
        "Match does not handle NONE; add the missing cases or a Remainder"
    );
    assert_eq!(
        ok(match_expr(var("result"), arms(), Some((None, int(0))))),
        Type::Integer
    );
}

#[test]
fn test_match_unknown_variant_and_field() {
    let e = match_expr(
        var("result"),
        vec![match_arm("MAYBE", MatchBindings::Empty, int(0))],
        Some((None, int(1))),
    );
    assert_eq!(first_error(e), "NONE | SOME {integer} has no variant “MAYBE”");

    let e = match_expr(
        tag_object("POINT", vec![("x", int(1))]),
        vec![match_arm(
            "POINT",
            MatchBindings::Object {
                fields: vec![FieldBinding {
                    field: "y".to_string(),
                    name: "y".to_string(),
                }],
            },
            var("y"),
        )],
        None,
    );
    assert_eq!(first_error(e), "Field “y” is not in object");
}

#[test]
fn test_algebraic_names_are_upper_case() {
    assert_eq!(ok(tag("OK_2")), Type::tag("OK_2"));
    assert_eq!(
        first_error(tag("Ok")),
        "Algebraic name “Ok” must be upper case"
    );
}

// ── Optionals ──────────────────────────────────────────────────────────

#[test]
fn test_optional_block_lifts_uses() {
    let lookup = || dict_get(dict(vec![(string("a"), int(1))]), var("name"));
    let e = optional_of(binary(BinaryOp::Add, optional_use(lookup()), var("size")));
    assert_eq!(ok(e), Type::optional(Type::Integer));
    let nested = optional_of(optional_use(lookup()));
    assert_eq!(ok(nested), Type::optional(Type::Integer));
}

#[test]
fn test_optional_use_outside_block() {
    let e = optional_use(dict_get(dict(vec![(int(1), int(2))]), int(1)));
    assert_eq!(
        first_error(e),
        "“?” can only be used inside an optional block"
    );
}

#[test]
fn test_optional_use_of_block_local() {
    let e = optional_of(for_each(
        "x",
        list(vec![optional_of(int(1))]),
        collect_list(optional_use(var("x"))),
    ));
    let (_, errors) = type_of(e);
    assert!(matches!(errors[0], CompileError::LiftedLocal { ref name, .. } if name == "x"));
}

#[test]
fn test_default_unwraps() {
    let e = default(dict_get(dict(vec![(int(1), string("a"))]), var("lane")), string("-"));
    assert_eq!(ok(e), Type::String);
    assert_eq!(ok(default(optional_empty(), int(3))), Type::Integer);
}

// ── Calls and loops ────────────────────────────────────────────────────

#[test]
fn test_registry_call() {
    assert_eq!(ok(call("string_length", vec![var("name")])), Type::Integer);
    assert_eq!(
        first_error(call("string_length", vec![])),
        "“string_length” takes 1 argument(s), but 0 were given"
    );
    assert_eq!(
        first_error(call("string_length", vec![int(3)])),
        "Expected string, but got integer"
    );
    assert_eq!(first_error(call("nope", vec![])), "Unknown function “nope”");
}

#[test]
fn test_for_collectors() {
    assert_eq!(
        ok(for_each("t", var("tags"), collect_list(var("t")))),
        Type::list(Type::String)
    );
    assert_eq!(
        ok(for_each("f", var("files"), collect_max(field(var("f"), "bytes"), None))),
        Type::optional(Type::Integer)
    );
    assert_eq!(
        ok(for_each(
            "f",
            var("files"),
            collect_where(
                binary(BinaryOp::Greater, field(var("f"), "bytes"), var("limit")),
                collect_sum(field(var("f"), "bytes")),
            ),
        )),
        Type::Integer
    );
    assert_eq!(
        ok(for_each("t", var("tags"), collect_first(var("t"), Some(string("none"))))),
        Type::String
    );
}

#[test]
fn test_max_needs_orderable() {
    let e = for_each("t", var("files"), collect_max(var("t"), None));
    assert_eq!(
        first_error(e),
        "{ bytes = integer, path = path } values cannot be ordered"
    );
}

#[test]
fn test_loop_variable_cannot_shadow_stream() {
    let e = for_each("name", var("tags"), collect_list(var("name")));
    let (_, errors) = type_of(e);
    assert_eq!(
        messages(&errors)[0],
        "“name” would shadow the signable stream variable of the same name"
    );
}

#[test]
fn test_descriptor_fixture_types() {
    assert_eq!(ty("u2NONE$t0SOME$t1i").to_string(), "NONE | SOME {integer}");
}

// ── Tables, patterns and interpolation ─────────────────────────────────

#[test]
fn test_tabulate_builds_string_keyed_columns() {
    let table = tabulate(vec![
        ("id", vec![int(1), int(2)]),
        ("label", vec![string("a"), string("b")]),
    ]);
    assert_eq!(
        ok(table),
        Type::Object(
            [
                ("id".to_string(), Type::map(Type::String, Type::Integer)),
                ("label".to_string(), Type::map(Type::String, Type::String)),
            ]
            .into_iter()
            .collect()
        )
    );
}

#[test]
fn test_tabulate_rejects_ragged_and_repeated_columns() {
    assert_eq!(
        first_error(tabulate(vec![("a", vec![int(1), int(2)]), ("b", vec![int(3)])])),
        "Inconsistent number of items between columns: 1, 2"
    );
    assert_eq!(
        first_error(tabulate(vec![("a", vec![int(1)]), ("a", vec![int(2)])])),
        "Field “a” is given more than once"
    );
}

#[test]
fn test_regex_binding_yields_optional_groups() {
    assert_eq!(
        ok(regex_bind(var("name"), "([a-z]+)-(\\d+)")),
        ty("qt2qsqs")
    );
    assert_eq!(first_error(regex_bind(var("name"), "[a-z]+")), "No capture groups found");
    assert!(first_error(regex_bind(var("name"), "(unclosed")).starts_with("Bad regular expression: "));
    assert_eq!(
        first_error(regex_bind(var("lane"), "(\\d+)")),
        "Expected a string, but got integer"
    );
}

#[test]
fn test_interpolation_converts_printable_values() {
    let text = interpolate(vec![
        Ok("lane "),
        Err(var("lane")),
        Ok(" started "),
        Err(var("started")),
        Ok(" as "),
        Err(var("name")),
    ]);
    assert_eq!(ok(text), Type::String);
    assert_eq!(ok(interpolate(vec![])), Type::String);
    assert_eq!(
        first_error(interpolate(vec![Ok("tags "), Err(var("tags"))])),
        "Cannot convert [string] to string in interpolation"
    );
}
