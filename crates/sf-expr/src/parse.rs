//! Reads canonical expression text back into unvalidated nodes.
//!
//! Grammar (lowest to highest precedence):
//!   or_expr    → and_expr ( "or" and_expr )*
//!   and_expr   → not_expr ( "and" not_expr )*
//!   not_expr   → "not" not_expr | equality
//!   equality   → relational ( ("=" | "==" | "!=" | "<>") relational )?
//!   relational → additive ( ("<" | "<=" | ">" | ">=") additive )?
//!   additive   → multiply ( ("+" | "-") multiply )*
//!   multiply   → atom ( ("*" | "/" | "%") atom )*
//!   atom       → NUMBER | STRING | "true" | "false" | "null" | "*"
//!              | NAME "." "*" | NAME "." NAME | NAME "(" args? ")" | NAME
//!              | "(" or_expr ")"
//!
//! Keywords are case-insensitive. Names that clash with a keyword or contain
//! other characters are quoted with backticks.

use sf_types::{ArithmeticOp, RelationalOp, Value};

use crate::error::ExprError;
use crate::node::ExprNode;
use crate::nodes::constant::ExprConstantNode;
use crate::nodes::ident::ExprIdentNode;
use crate::nodes::logical::{ExprLogicalNode, ExprNotNode, LogicalOp};
use crate::nodes::math::ExprMathNode;
use crate::nodes::plugin::ExprPlugInSingleRowNode;
use crate::nodes::relational::ExprRelationalOpNode;
use crate::nodes::stream_underlying::ExprStreamUnderlyingNode;

type ParseResult = Result<Box<dyn ExprNode>, ExprError>;

/// Deepest combined nesting of parentheses and `not` prefixes accepted.
const MAX_NESTING: usize = 256;

/// Parses `input` into an unvalidated expression tree.
pub fn parse_expr(input: &str) -> ParseResult {
    let tokens = tokenize(input)?;
    check_nesting(&tokens)?;
    let mut pos = 0;
    let result = parse_or(&tokens, &mut pos)?;
    if pos < tokens.len() {
        return Err(ExprError::ParseError(format!(
            "unexpected token at position {pos}: {:?}",
            tokens[pos]
        )));
    }
    Ok(result)
}

/// Tracks the `not` prefixes still open in each parenthesis group. A prefix
/// stays open until `and`, `or` or `,` ends its operand or its group closes.
fn check_nesting(tokens: &[Token]) -> Result<(), ExprError> {
    let mut groups: Vec<usize> = vec![0];
    let mut open_nots = 0usize;
    for token in tokens {
        match token {
            Token::LParen => groups.push(0),
            Token::RParen if groups.len() > 1 => {
                open_nots -= groups.pop().unwrap_or(0);
            }
            Token::Not => {
                if let Some(nots) = groups.last_mut() {
                    *nots += 1;
                }
                open_nots += 1;
            }
            Token::And | Token::Or | Token::Comma => {
                if let Some(nots) = groups.last_mut() {
                    open_nots -= *nots;
                    *nots = 0;
                }
            }
            _ => {}
        }
        if groups.len() - 1 + open_nots > MAX_NESTING {
            return Err(ExprError::ParseError(format!(
                "expression nests deeper than {MAX_NESTING} levels"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Null,
    // Comparison
    Eq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    // Punctuation
    LParen,
    RParen,
    Comma,
    Dot,
    // Logical
    And,
    Or,
    Not,
}

impl Token {
    /// A `-` directly after one of these starts a negative literal.
    fn expects_operand(&self) -> bool {
        matches!(
            self,
            Self::LParen
                | Self::Comma
                | Self::Eq
                | Self::NotEq
                | Self::Gt
                | Self::Ge
                | Self::Lt
                | Self::Le
                | Self::Plus
                | Self::Minus
                | Self::Star
                | Self::Slash
                | Self::Percent
                | Self::And
                | Self::Or
                | Self::Not
        )
    }
}

fn number_token(text: &str) -> Result<Token, ExprError> {
    if text.contains('.') {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| ExprError::ParseError(format!("invalid float: {text}")))
    } else {
        text.parse::<i64>()
            .map(Token::Int)
            .map_err(|_| ExprError::ParseError(format!("invalid integer: {text}")))
    }
}

fn keyword_or_name(word: String) -> Token {
    match word.to_ascii_lowercase().as_str() {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        _ => Token::Name(word),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let next = chars.get(i + 1).copied();
        match c {
            '-' if next.is_some_and(|n| n.is_ascii_digit())
                && tokens.last().is_none_or(Token::expects_operand) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(number_token(&text)?);
            }
            '+' | '-' | '*' | '/' | '%' | '(' | ')' | ',' | '.' => {
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    _ => Token::Dot,
                });
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += if next == Some('=') { 2 } else { 1 };
            }
            '!' => {
                if next == Some('=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    return Err(ExprError::ParseError(
                        "expected '!=' but found single '!'".into(),
                    ));
                }
            }
            '<' => match next {
                Some('=') => {
                    tokens.push(Token::Le);
                    i += 2;
                }
                Some('>') => {
                    tokens.push(Token::NotEq);
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            },
            '>' => {
                if next == Some('=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '\'' => {
                i += 1;
                let mut text = String::new();
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(ExprError::ParseError(
                                "unterminated string literal".into(),
                            ));
                        }
                        Some('\'') => break,
                        Some('\\') => {
                            let escaped = chars.get(i + 1).ok_or_else(|| {
                                ExprError::ParseError("unterminated string literal".into())
                            })?;
                            text.push(*escaped);
                            i += 2;
                        }
                        Some(other) => {
                            text.push(*other);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
                i += 1; // closing quote
            }
            '`' => {
                i += 1;
                let mut name = String::new();
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(ExprError::ParseError("unterminated quoted name".into()));
                        }
                        // A doubled backtick stands for one inside the name.
                        Some('`') if chars.get(i + 1) != Some(&'`') => break,
                        Some('`') => {
                            name.push('`');
                            i += 2;
                        }
                        Some(other) => {
                            name.push(*other);
                            i += 1;
                        }
                    }
                }
                if name.is_empty() {
                    return Err(ExprError::ParseError("empty quoted name".into()));
                }
                tokens.push(Token::Name(name));
                i += 1;
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(number_token(&text)?);
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(keyword_or_name(chars[start..i].iter().collect()));
            }
            _ => {
                return Err(ExprError::ParseError(format!(
                    "unexpected character: '{c}'"
                )));
            }
        }
    }
    Ok(tokens)
}

fn peek<'t>(tokens: &'t [Token], pos: &usize) -> Option<&'t Token> {
    tokens.get(*pos)
}

fn expect(tokens: &[Token], pos: &mut usize, token: &Token, what: &str) -> Result<(), ExprError> {
    if peek(tokens, pos) == Some(token) {
        *pos += 1;
        Ok(())
    } else {
        Err(ExprError::ParseError(format!("expected {what}")))
    }
}

fn parse_logical(
    tokens: &[Token],
    pos: &mut usize,
    op: LogicalOp,
    separator: &Token,
    operand: fn(&[Token], &mut usize) -> ParseResult,
) -> ParseResult {
    let first = operand(tokens, pos)?;
    if peek(tokens, pos) != Some(separator) {
        return Ok(first);
    }
    let mut children = vec![first];
    while peek(tokens, pos) == Some(separator) {
        *pos += 1;
        children.push(operand(tokens, pos)?);
    }
    Ok(Box::new(ExprLogicalNode::new(op, children)?))
}

fn parse_or(tokens: &[Token], pos: &mut usize) -> ParseResult {
    parse_logical(tokens, pos, LogicalOp::Or, &Token::Or, parse_and)
}

fn parse_and(tokens: &[Token], pos: &mut usize) -> ParseResult {
    parse_logical(tokens, pos, LogicalOp::And, &Token::And, parse_not)
}

fn parse_not(tokens: &[Token], pos: &mut usize) -> ParseResult {
    if peek(tokens, pos) == Some(&Token::Not) {
        *pos += 1;
        let inner = parse_not(tokens, pos)?;
        return Ok(Box::new(ExprNotNode::new(inner)));
    }
    parse_equality(tokens, pos)
}

fn parse_equality(tokens: &[Token], pos: &mut usize) -> ParseResult {
    let left = parse_relational(tokens, pos)?;
    let op = match peek(tokens, pos) {
        Some(Token::Eq) => RelationalOp::Eq,
        Some(Token::NotEq) => RelationalOp::Ne,
        _ => return Ok(left),
    };
    *pos += 1;
    let right = parse_relational(tokens, pos)?;
    Ok(Box::new(ExprRelationalOpNode::new(op, left, right)))
}

fn parse_relational(tokens: &[Token], pos: &mut usize) -> ParseResult {
    let left = parse_additive(tokens, pos)?;
    let op = match peek(tokens, pos) {
        Some(Token::Lt) => RelationalOp::Lt,
        Some(Token::Le) => RelationalOp::Le,
        Some(Token::Gt) => RelationalOp::Gt,
        Some(Token::Ge) => RelationalOp::Ge,
        _ => return Ok(left),
    };
    *pos += 1;
    let right = parse_additive(tokens, pos)?;
    Ok(Box::new(ExprRelationalOpNode::new(op, left, right)))
}

fn parse_additive(tokens: &[Token], pos: &mut usize) -> ParseResult {
    let mut left = parse_multiply(tokens, pos)?;
    loop {
        let op = match peek(tokens, pos) {
            Some(Token::Plus) => ArithmeticOp::Add,
            Some(Token::Minus) => ArithmeticOp::Sub,
            _ => break,
        };
        *pos += 1;
        let right = parse_multiply(tokens, pos)?;
        left = Box::new(ExprMathNode::new(op, left, right));
    }
    Ok(left)
}

fn parse_multiply(tokens: &[Token], pos: &mut usize) -> ParseResult {
    let mut left = parse_atom(tokens, pos)?;
    loop {
        let op = match peek(tokens, pos) {
            Some(Token::Star) => ArithmeticOp::Mul,
            Some(Token::Slash) => ArithmeticOp::Div,
            Some(Token::Percent) => ArithmeticOp::Mod,
            _ => break,
        };
        *pos += 1;
        let right = parse_atom(tokens, pos)?;
        left = Box::new(ExprMathNode::new(op, left, right));
    }
    Ok(left)
}

fn literal(value: Value) -> ParseResult {
    Ok(Box::new(ExprConstantNode::new(value)?))
}

fn parse_atom(tokens: &[Token], pos: &mut usize) -> ParseResult {
    let Some(token) = peek(tokens, pos) else {
        return Err(ExprError::ParseError(
            "unexpected end of expression".into(),
        ));
    };
    *pos += 1;
    match token {
        Token::Int(n) => literal(Value::Int64(*n)),
        Token::Float(f) => literal(Value::Float64(*f)),
        Token::Str(s) => literal(Value::Utf8(s.clone())),
        Token::True => literal(Value::Bool(true)),
        Token::False => literal(Value::Bool(false)),
        Token::Null => literal(Value::Null),
        Token::Star => Ok(Box::new(ExprStreamUnderlyingNode::wildcard())),
        Token::Name(name) => parse_name(name, tokens, pos),
        Token::LParen => {
            let inner = parse_or(tokens, pos)?;
            expect(tokens, pos, &Token::RParen, "closing ')'")?;
            Ok(inner)
        }
        other => Err(ExprError::ParseError(format!(
            "unexpected token: {other:?}"
        ))),
    }
}

/// Continues an atom that started with `name`: a call, a qualified property,
/// a stream wildcard or a bare identifier.
fn parse_name(name: &str, tokens: &[Token], pos: &mut usize) -> ParseResult {
    match peek(tokens, pos) {
        Some(Token::LParen) => {
            *pos += 1;
            let mut args = Vec::new();
            if peek(tokens, pos) != Some(&Token::RParen) {
                args.push(parse_or(tokens, pos)?);
                while peek(tokens, pos) == Some(&Token::Comma) {
                    *pos += 1;
                    args.push(parse_or(tokens, pos)?);
                }
            }
            expect(tokens, pos, &Token::RParen, "closing ')' after function arguments")?;
            Ok(Box::new(ExprPlugInSingleRowNode::new(name, args)?))
        }
        Some(Token::Dot) => {
            *pos += 1;
            match peek(tokens, pos) {
                Some(Token::Star) => {
                    *pos += 1;
                    Ok(Box::new(ExprStreamUnderlyingNode::stream_wildcard(name)))
                }
                Some(Token::Name(property)) => {
                    *pos += 1;
                    Ok(Box::new(ExprIdentNode::new(Some(name), property)?))
                }
                _ => Err(ExprError::ParseError(format!(
                    "expected property name or '*' after '{name}.'"
                ))),
            }
        }
        _ => Ok(Box::new(ExprIdentNode::new(None, name)?)),
    }
}

#[cfg(test)]
mod tests {
    use sf_types::{ArithmeticOp, Value};

    use super::parse_expr;
    use crate::error::ExprError;
    use crate::node::{ExprNode, to_expression_string};
    use crate::nodes::constant::ExprConstantNode;
    use crate::nodes::ident::ExprIdentNode;
    use crate::nodes::logical::{ExprLogicalNode, LogicalOp};
    use crate::nodes::math::ExprMathNode;
    use crate::nodes::stream_underlying::ExprStreamUnderlyingNode;

    fn canonical(text: &str) -> String {
        to_expression_string(&*parse_expr(text).expect("parse"))
    }

    #[test]
    fn arithmetic_binds_tighter_than_comparison() {
        let node = parse_expr("a + 2 * 3 >= 7").expect("parse");
        assert_eq!(to_expression_string(&*node), "a + 2 * 3 >= 7");
        assert_eq!(node.kind(), "Relational");
    }

    #[test]
    fn left_associative_chain() {
        let node = parse_expr("1 - 2 - 3").expect("parse");
        let math = node.as_any().downcast_ref::<ExprMathNode>().expect("math");
        assert_eq!(math.op(), ArithmeticOp::Sub);
        let left = node.child_nodes()[0];
        assert!(left.as_any().downcast_ref::<ExprMathNode>().is_some());
    }

    #[test]
    fn logical_chains_flatten() {
        let node = parse_expr("a and b and c").expect("parse");
        let and = node
            .as_any()
            .downcast_ref::<ExprLogicalNode>()
            .expect("and");
        assert_eq!(and.op(), LogicalOp::And);
        assert_eq!(node.child_nodes().len(), 3);
        assert_eq!(canonical("(a and b) and c"), "(a and b) and c");
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(canonical("NOT a OR TRUE"), "not a or true");
        assert_eq!(canonical("`and` = NULL"), "`and` = null");
    }

    #[test]
    fn stream_selectors() {
        let star = parse_expr("*").expect("parse");
        let wildcard = star
            .as_any()
            .downcast_ref::<ExprStreamUnderlyingNode>()
            .expect("wildcard");
        assert!(wildcard.is_wildcard());
        assert_eq!(wildcard.stream_name(), None);
        assert_eq!(canonical("s1.*"), "s1.*");
        assert_eq!(canonical("s1.price * 2"), "s1.price * 2");
    }

    #[test]
    fn literals_and_calls() {
        assert_eq!(canonical("abs(-2, 'it\\'s')"), "abs(-2, 'it\\'s')");
        assert_eq!(canonical("now()"), "now()");
        assert_eq!(canonical("x <> 1.5"), "x != 1.5");
        assert_eq!(canonical("3 - -2"), "3 - -2");
        let node = parse_expr("-7").expect("parse");
        let constant = node
            .as_any()
            .downcast_ref::<ExprConstantNode>()
            .expect("constant");
        assert_eq!(constant.value(), &Value::Int64(-7));
    }

    #[test]
    fn backticks_inside_quoted_names() {
        let node = parse_expr("`a``b`.`c d`").expect("parse");
        let ident = node
            .as_any()
            .downcast_ref::<ExprIdentNode>()
            .expect("ident");
        assert_eq!(ident.stream_name(), Some("a`b"));
        assert_eq!(ident.property(), "c d");
        assert_eq!(to_expression_string(&*node), "`a``b`.`c d`");
        assert_eq!(canonical("```x`"), "```x`");
    }

    #[test]
    fn malformed_text_is_rejected() {
        for text in ["", "a +", "(a", "a b", "'open", "s.", "f(a,", "a !b"] {
            assert!(
                matches!(parse_expr(text), Err(ExprError::ParseError(_))),
                "{text:?} should not parse"
            );
        }
    }

    #[test]
    fn runaway_nesting_is_rejected() {
        let deep = format!("{}1{}", "(".repeat(300), ")".repeat(300));
        assert!(matches!(parse_expr(&deep), Err(ExprError::ParseError(_))));
        let nots = format!("{}true", "not ".repeat(300));
        assert!(matches!(parse_expr(&nots), Err(ExprError::ParseError(_))));
        let staircase: String = (0..255)
            .map(|depth| format!("{}(", "not ".repeat(255 - depth)))
            .chain(std::iter::once("true".to_owned()))
            .chain(std::iter::repeat_n(")".to_owned(), 255))
            .collect();
        assert!(matches!(
            parse_expr(&staircase),
            Err(ExprError::ParseError(_))
        ));

        let fine = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(canonical(&fine), "1");
        let siblings = ["not a"; 400].join(" and ");
        assert!(parse_expr(&siblings).is_ok());
    }
}
