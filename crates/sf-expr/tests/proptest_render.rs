//! Property-based tests for rendering.
//!
//! Canonical text must read back into a structurally equal tree and render
//! to the same text again, whatever parentheses the original text used.

use proptest::prelude::*;
use sf_expr::{deep_equals, parse_expr, to_expression_string};

fn atom() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z][a-z0-9_]{0,6}".prop_filter("keywords are not names", |name| {
            !matches!(name.as_str(), "and" | "or" | "not" | "true" | "false" | "null")
        }),
        "[a-z]{1,3}\\.[a-z]{1,3}".prop_filter("keywords are not names", |name| {
            name.split('.')
                .all(|part| !matches!(part, "and" | "or" | "not"))
        }),
        prop::sample::select(vec!["`unit price`", "`Or`", "*", "s.*", "true", "NULL"])
            .prop_map(str::to_owned),
        any::<i32>().prop_map(|v| v.to_string()),
        (-1000.0f64..1000.0).prop_map(|v| format!("{v:.3}")),
        "[a-z' \\\\]{0,6}".prop_map(|s| format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))),
    ]
}

fn expression() -> impl Strategy<Value = String> {
    atom().prop_recursive(5, 32, 3, |inner| {
        let binary = prop::sample::select(vec![
            "+", "-", "*", "/", "%", "=", "<>", "<=", ">", "and", "or",
        ]);
        prop_oneof![
            (inner.clone(), binary, inner.clone()).prop_map(|(l, op, r)| format!("({l} {op} {r})")),
            inner.clone().prop_map(|e| format!("not ({e})")),
            prop::collection::vec(inner.clone(), 0..3)
                .prop_map(|args| format!("fn_{}({})", args.len(), args.join(", "))),
            prop::collection::vec(inner, 3..5).prop_map(|items| items.join(" and ")),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// The parser must never panic on arbitrary input.
    #[test]
    fn parser_never_panics(source in "\\PC{0,64}") {
        let _ = parse_expr(&source);
    }

    #[test]
    fn canonical_text_round_trips(text in expression()) {
        let first = parse_expr(&text).map_err(|err| TestCaseError::fail(format!("{text}: {err}")))?;
        let canonical = to_expression_string(&*first);
        let second = parse_expr(&canonical)
            .map_err(|err| TestCaseError::fail(format!("{canonical}: {err}")))?;
        prop_assert!(
            deep_equals(&*first, &*second, false),
            "{} re-read from {} differs",
            canonical,
            text
        );
        prop_assert_eq!(to_expression_string(&*second), canonical);
    }
}

#[test]
fn redundant_parentheses_are_dropped() {
    for (text, canonical) in [
        ("((a + b)) * c", "(a + b) * c"),
        ("(a * b) + c", "a * b + c"),
        ("a - (b - c)", "a - (b - c)"),
        ("(a - b) - c", "a - b - c"),
        ("not (a = b)", "not a = b"),
        ("(not a) = b", "(not a) = b"),
        ("a or (b and c)", "a or b and c"),
        ("(a or b) and c", "(a or b) and c"),
        ("f((a), 'x')", "f(a, 'x')"),
    ] {
        let node = parse_expr(text).expect("parse");
        assert_eq!(to_expression_string(&*node), canonical, "{text}");
    }
}

#[test]
fn stream_prefix_can_be_ignored_when_comparing() {
    let qualified = parse_expr("s.price * 2").expect("parse");
    let bare = parse_expr("price * 2").expect("parse");
    assert!(!deep_equals(&*qualified, &*bare, false));
    assert!(deep_equals(&*qualified, &*bare, true));
}
