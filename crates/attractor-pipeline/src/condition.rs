//! Condition expression language: parser and evaluator.
//!
//! Grammar:
//! ```text
//! ConditionExpr  ::= Clause ( ( '&&' | whitespace ) Clause )*
//! Clause         ::= Key Operator Value
//! Key            ::= identifier ( '.' identifier )*
//! Operator       ::= '=' | '!=' | '<=' | '>=' | '<' | '>' | 'matches'
//! Value          ::= QuotedString | 'context.' Key | 'graph.' Key | BareWord
//! ```
//!
//! `key` resolves against a composite lookup space: the reserved names
//! `outcome`, `status`, `label`, `notes`; `context.<k>` reading the pipeline
//! context; `graph.<k>` reading graph attributes; a bare identifier checks
//! those in that same order. A clause's right-hand side is a literal unless
//! it itself names a `context.<k>`/`graph.<k>` reference, in which case it is
//! resolved the same way as a key.

use attractor_types::AttractorError;

/// A parsed condition expression consisting of one or more clauses
/// implicitly joined by `&&` (conjunction — all must match).
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionExpr {
    pub clauses: Vec<Clause>,
}

/// A single comparison clause: `key op value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub key: String,
    pub operator: Operator,
    pub value: Value,
}

/// The right-hand side of a clause: either a literal or a reference that
/// must be resolved the same way a key is.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Literal(String),
    Reference(String),
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Matches,
}

/// Parse a condition string into a [`ConditionExpr`].
///
/// An empty or whitespace-only input produces an expression with zero
/// clauses, which [`evaluate_condition`] treats as always true. Clauses may
/// be separated by `&&` or by bare whitespace.
pub fn parse_condition(input: &str) -> Result<ConditionExpr, AttractorError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(ConditionExpr {
            clauses: Vec::new(),
        });
    }

    let mut clauses = Vec::new();
    for part in split_clauses(trimmed) {
        let clause = parse_clause(part.trim())?;
        clauses.push(clause);
    }

    Ok(ConditionExpr { clauses })
}

/// Split on `&&` first; if that yields a single part, fall back to
/// splitting on whitespace runs (so `a=1 b=2` is also a valid conjunction).
fn split_clauses(input: &str) -> Vec<&str> {
    let by_and: Vec<&str> = input.split("&&").collect();
    if by_and.len() > 1 {
        return by_and;
    }
    input.split_whitespace().collect()
}

fn parse_clause(input: &str) -> Result<Clause, AttractorError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(make_error("empty clause"));
    }

    let (key_end, operator, op_len) = find_operator(input)?;

    let key = input[..key_end].trim().to_string();
    validate_key(&key)?;

    let raw_value = input[key_end + op_len..].trim();
    if raw_value.is_empty() {
        return Err(make_error(&format!("missing value after operator in '{input}'")));
    }

    let value = parse_value(raw_value);

    Ok(Clause {
        key,
        operator,
        value,
    })
}

fn validate_key(key: &str) -> Result<(), AttractorError> {
    if key.is_empty() {
        return Err(make_error("missing key before operator"));
    }
    for seg in key.split('.') {
        if seg.is_empty() || !seg.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(make_error(&format!("invalid key segment: '{seg}'")));
        }
    }
    Ok(())
}

/// Unquoted `context.<k>` / `graph.<k>` tokens are references; everything
/// else (quoted strings, bare words, numbers) is a literal.
fn parse_value(raw: &str) -> Value {
    let is_quoted = raw.len() >= 2
        && ((raw.as_bytes()[0] == b'"' && raw.as_bytes()[raw.len() - 1] == b'"')
            || (raw.as_bytes()[0] == b'\'' && raw.as_bytes()[raw.len() - 1] == b'\''));
    if !is_quoted && (raw.starts_with("context.") || raw.starts_with("graph.")) {
        return Value::Reference(raw.to_string());
    }
    Value::Literal(strip_quotes(raw))
}

fn find_operator(input: &str) -> Result<(usize, Operator, usize), AttractorError> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                i += 1;
            }
            b'!' if i + 1 < bytes.len() && bytes[i + 1] == b'=' => {
                return Ok((i, Operator::NotEq, 2));
            }
            b'<' if i + 1 < bytes.len() && bytes[i + 1] == b'=' => {
                return Ok((i, Operator::Le, 2));
            }
            b'>' if i + 1 < bytes.len() && bytes[i + 1] == b'=' => {
                return Ok((i, Operator::Ge, 2));
            }
            b'<' => return Ok((i, Operator::Lt, 1)),
            b'>' => return Ok((i, Operator::Gt, 1)),
            b'=' => return Ok((i, Operator::Eq, 1)),
            _ => {
                // `matches` is a word-operator rather than a symbol: look for
                // ` matches ` as a whole word, case-sensitive.
                if bytes[i..].starts_with(b"matches")
                    && (i == 0 || bytes[i - 1] == b' ')
                    && input[i + "matches".len()..].starts_with(' ')
                {
                    return Ok((i, Operator::Matches, "matches".len()));
                }
                i += 1;
            }
        }
    }
    Err(make_error(&format!("no operator found in '{input}'")))
}

fn strip_quotes(s: &str) -> String {
    if s.len() >= 2 {
        let bytes = s.as_bytes();
        if (bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\'')
        {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn make_error(msg: &str) -> AttractorError {
    AttractorError::ValidationError(format!("condition parse error: {msg}"))
}

/// Evaluate a condition expression against values provided by a resolver
/// function. `resolve` maps a key (e.g. `"outcome"`, `"context.env"`,
/// `"graph.goal"`) to its string value; keys not found resolve to `""`.
///
/// Malformed clauses (e.g. an unparseable `matches` regex) evaluate to
/// `false` rather than propagating an error, per the condition-evaluation
/// error contract: edge selection never raises.
pub fn evaluate_condition(expr: &ConditionExpr, resolve: &dyn Fn(&str) -> String) -> bool {
    if expr.clauses.is_empty() {
        return true;
    }

    expr.clauses.iter().all(|clause| {
        let actual = resolve(&clause.key);
        let expected = match &clause.value {
            Value::Literal(s) => s.clone(),
            Value::Reference(key) => resolve(key),
        };
        evaluate_clause(clause.operator, &actual, &expected)
    })
}

fn evaluate_clause(op: Operator, actual: &str, expected: &str) -> bool {
    if op == Operator::Matches {
        return regex::Regex::new(expected)
            .map(|re| re.is_match(actual))
            .unwrap_or(false);
    }

    if let (Ok(a), Ok(b)) = (actual.parse::<f64>(), expected.parse::<f64>()) {
        return match op {
            Operator::Eq => a == b,
            Operator::NotEq => a != b,
            Operator::Lt => a < b,
            Operator::Le => a <= b,
            Operator::Gt => a > b,
            Operator::Ge => a >= b,
            Operator::Matches => unreachable!(),
        };
    }

    match op {
        Operator::Eq => actual == expected,
        Operator::NotEq => actual != expected,
        Operator::Lt => actual < expected,
        Operator::Le => actual <= expected,
        Operator::Gt => actual > expected,
        Operator::Ge => actual >= expected,
        Operator::Matches => unreachable!(),
    }
}
