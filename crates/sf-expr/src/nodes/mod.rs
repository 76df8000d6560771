//! Node kinds. Each kind has an unvalidated type produced by construction or
//! parsing and a validated type produced by [`crate::ExprNode::validate`].

use std::fmt;

use crate::node::{ExprNode, ValidatedNode};

pub mod constant;
pub mod ident;
pub mod logical;
pub mod math;
pub mod plugin;
pub mod relational;
pub mod stream_underlying;

pub(crate) const KEYWORDS: [&str; 6] = ["and", "or", "not", "true", "false", "null"];

pub(crate) fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let starts_well = chars
        .next()
        .is_some_and(|first| first.is_alphabetic() || first == '_');
    starts_well
        && chars.all(|c| c.is_alphanumeric() || c == '_')
        && !KEYWORDS.contains(&name.to_ascii_lowercase().as_str())
}

pub(crate) fn syntax(node: &dyn ExprNode) -> &dyn ExprNode {
    node
}

pub(crate) fn validated_syntax(node: &dyn ValidatedNode) -> &dyn ExprNode {
    node.as_node()
}

/// Writes a stream or property name, quoting it with backticks when it would
/// not read back as a single identifier. Backticks inside are doubled.
pub(crate) fn write_identifier(writer: &mut dyn fmt::Write, name: &str) -> fmt::Result {
    if is_plain_identifier(name) {
        return writer.write_str(name);
    }
    writer.write_char('`')?;
    for part in name.split_inclusive('`') {
        writer.write_str(part)?;
        if part.ends_with('`') {
            writer.write_char('`')?;
        }
    }
    writer.write_char('`')
}
