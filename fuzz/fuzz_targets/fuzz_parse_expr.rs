#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Long operator chains nest one node per operand.
    if data.len() > 4096 {
        return;
    }
    if let Ok(source) = std::str::from_utf8(data) {
        let _ = sf_expr::parse_expr(source);
    }
});
