#![no_main]
use libfuzzer_sys::fuzz_target;
use sf_expr::{deep_equals, parse_expr, to_expression_string};

fuzz_target!(|data: &[u8]| {
    if data.len() > 4096 {
        return;
    }
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(first) = parse_expr(source) else {
        return;
    };
    let canonical = to_expression_string(&*first);
    let second = parse_expr(&canonical).expect("canonical text must parse");
    assert!(deep_equals(&*first, &*second, false), "{source:?} -> {canonical:?}");
    assert_eq!(to_expression_string(&*second), canonical);
});
