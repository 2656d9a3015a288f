//! Find/Filter criteria and Sort specifications
//!
//! Criteria follow the legacy recordset dialect:
//!
//! ```text
//! Name = 'Smith' AND (Age >= 21 OR [Is Member] = true)
//! HireDate < #2020-01-01#
//! Name LIKE 'Sm*'
//! Manager IS NULL
//! ```
//!
//! Sort specifications are comma-separated field names with an optional
//! `ASC`/`DESC` suffix: `"LastName ASC, Age DESC"`.

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>` or `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `LIKE` with `*`/`%` wildcards
    Like,
    /// `NOT LIKE`
    NotLike,
}

/// One `field op value` test
#[derive(Debug, Clone)]
pub struct Comparison {
    /// Field name as written
    pub field: String,
    /// Operator
    pub op: CompareOp,
    /// Right-hand literal
    pub value: Value,
    pattern: Option<Regex>,
}

impl Comparison {
    fn matches(&self, row: &Row) -> bool {
        let Some(actual) = row.get_by_name(&self.field) else {
            return false;
        };

        match (self.op, &self.value) {
            (CompareOp::Eq, Value::Null) => return actual.is_null(),
            (CompareOp::Ne, Value::Null) => return !actual.is_null(),
            _ => {}
        }
        if actual.is_null() {
            return false;
        }

        if let Some(pattern) = &self.pattern {
            let hit = actual
                .as_string()
                .map(|s| pattern.is_match(&s))
                .unwrap_or(false);
            return if self.op == CompareOp::NotLike { !hit } else { hit };
        }

        let Some(ord) = actual.compare(&self.value) else {
            return false;
        };
        match self.op {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
            CompareOp::Like | CompareOp::NotLike => false,
        }
    }
}

/// Parsed criteria expression
#[derive(Debug, Clone)]
pub enum Criteria {
    /// Single comparison
    Compare(Comparison),
    /// All must hold
    And(Vec<Criteria>),
    /// Any must hold
    Or(Vec<Criteria>),
}

impl Criteria {
    /// Parse a criteria string
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(Error::validation("criteria is empty"));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let criteria = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(Error::validation(format!(
                "unexpected {} in criteria '{}'",
                tok.describe(),
                input
            )));
        }
        Ok(criteria)
    }

    /// Evaluate against a row
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::Compare(cmp) => cmp.matches(row),
            Self::And(all) => all.iter().all(|c| c.matches(row)),
            Self::Or(any) => any.iter().any(|c| c.matches(row)),
        }
    }

    /// Every field name referenced
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Compare(cmp) => out.push(&cmp.field),
            Self::And(list) | Self::Or(list) => list.iter().for_each(|c| c.collect_fields(out)),
        }
    }

    /// Fail with NotFound if a referenced field is not among `columns`
    pub fn validate(&self, columns: &[String]) -> Result<()> {
        for field in self.fields() {
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(field)) {
                return Err(Error::not_found("field", field));
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for Criteria {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Field(String),
    Literal(Value),
    Op(&'static str),
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Word(w) | Self::Field(w) => format!("'{}'", w),
            Self::Literal(v) => format!("literal {}", v.as_string().unwrap_or_default()),
            Self::Op(op) => format!("'{}'", op),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Self::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

fn parse_date_literal(raw: &str) -> Result<Value> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(Value::DateTime(dt));
        }
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return Ok(Value::Date(d));
        }
    }
    Err(Error::validation(format!("invalid date literal #{}#", raw)))
}

fn parse_number(raw: &str) -> Result<Value> {
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(Value::Int64(n));
    }
    raw.parse::<f64>()
        .map(Value::Float64)
        .map_err(|_| Error::validation(format!("invalid number '{}'", raw)))
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let read_until = |start: usize, end: char| -> Result<(String, usize)> {
        let mut j = start;
        while j < chars.len() && chars[j] != end {
            j += 1;
        }
        if j == chars.len() {
            return Err(Error::validation(format!(
                "missing closing '{}' in criteria '{}'",
                end, input
            )));
        }
        Ok((chars[start..j].iter().collect(), j + 1))
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                let (name, next) = read_until(i + 1, ']')?;
                tokens.push(Token::Field(name));
                i = next;
            }
            '#' => {
                let (raw, next) = read_until(i + 1, '#')?;
                tokens.push(Token::Literal(parse_date_literal(&raw)?));
                i = next;
            }
            '\'' => {
                let mut s = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => {
                            return Err(Error::validation(format!(
                                "unterminated string in criteria '{}'",
                                input
                            )))
                        }
                        Some('\'') if chars.get(j + 1) == Some(&'\'') => {
                            s.push('\'');
                            j += 2;
                        }
                        Some('\'') => break,
                        Some(&ch) => {
                            s.push(ch);
                            j += 1;
                        }
                    }
                }
                tokens.push(Token::Literal(Value::String(s)));
                i = j + 1;
            }
            '<' | '>' | '=' | '!' => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                let (op, len) = match two.as_str() {
                    "<>" => ("<>", 2),
                    "!=" => ("<>", 2),
                    "<=" => ("<=", 2),
                    ">=" => (">=", 2),
                    _ => match c {
                        '<' => ("<", 1),
                        '>' => (">", 1),
                        '=' => ("=", 1),
                        _ => {
                            return Err(Error::validation(format!(
                                "unexpected '!' in criteria '{}'",
                                input
                            )))
                        }
                    },
                };
                tokens.push(Token::Op(op));
                i += len;
            }
            c if c.is_ascii_digit()
                || ((c == '-' || c == '+' || c == '.')
                    && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                tokens.push(Token::Literal(parse_number(&raw)?));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '$'))
                {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::validation(format!(
                    "unexpected character '{}' in criteria '{}'",
                    other, input
                )))
            }
        }
    }
    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().map_or(false, |t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Criteria> {
        let mut terms = vec![self.parse_and()?];
        while self.eat_keyword("or") {
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Criteria::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Criteria> {
        let mut terms = vec![self.parse_primary()?];
        while self.eat_keyword("and") {
            terms.push(self.parse_primary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Criteria::And(terms)
        })
    }

    fn parse_primary(&mut self) -> Result<Criteria> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            return match self.next() {
                Some(Token::RParen) => Ok(inner),
                _ => Err(Error::validation("missing ')' in criteria")),
            };
        }
        self.parse_comparison().map(Criteria::Compare)
    }

    fn parse_comparison(&mut self) -> Result<Comparison> {
        let field = match self.next() {
            Some(Token::Field(name)) | Some(Token::Word(name)) => name,
            Some(other) => {
                return Err(Error::validation(format!(
                    "expected a field name, found {}",
                    other.describe()
                )))
            }
            None => return Err(Error::validation("expected a field name")),
        };

        let op = match self.next() {
            Some(Token::Op("=")) => CompareOp::Eq,
            Some(Token::Op("<>")) => CompareOp::Ne,
            Some(Token::Op("<")) => CompareOp::Lt,
            Some(Token::Op("<=")) => CompareOp::Le,
            Some(Token::Op(">")) => CompareOp::Gt,
            Some(Token::Op(">=")) => CompareOp::Ge,
            Some(t) if t.is_keyword("like") => CompareOp::Like,
            Some(t) if t.is_keyword("not") => {
                if !self.eat_keyword("like") {
                    return Err(Error::validation("expected LIKE after NOT"));
                }
                CompareOp::NotLike
            }
            Some(t) if t.is_keyword("is") => {
                let op = if self.eat_keyword("not") {
                    CompareOp::Ne
                } else {
                    CompareOp::Eq
                };
                if !self.eat_keyword("null") {
                    return Err(Error::validation("expected NULL after IS"));
                }
                return Ok(Comparison {
                    field,
                    op,
                    value: Value::Null,
                    pattern: None,
                });
            }
            Some(other) => {
                return Err(Error::validation(format!(
                    "expected an operator after '{}', found {}",
                    field,
                    other.describe()
                )))
            }
            None => {
                return Err(Error::validation(format!(
                    "expected an operator after '{}'",
                    field
                )))
            }
        };

        let value = match self.next() {
            Some(Token::Literal(v)) => v,
            Some(t) if t.is_keyword("null") => Value::Null,
            Some(t) if t.is_keyword("true") => Value::Bool(true),
            Some(t) if t.is_keyword("false") => Value::Bool(false),
            Some(other) => {
                return Err(Error::validation(format!(
                    "expected a value after '{}', found {}",
                    field,
                    other.describe()
                )))
            }
            None => {
                return Err(Error::validation(format!(
                    "expected a value after '{}'",
                    field
                )))
            }
        };

        let pattern = match op {
            CompareOp::Like | CompareOp::NotLike => {
                let Value::String(glob) = &value else {
                    return Err(Error::validation(format!(
                        "LIKE on '{}' needs a string pattern",
                        field
                    )));
                };
                Some(like_to_regex(glob)?)
            }
            _ => None,
        };

        Ok(Comparison {
            field,
            op,
            value,
            pattern,
        })
    }
}

/// `*` and `%` match any run of characters; matching ignores case
fn like_to_regex(glob: &str) -> Result<Regex> {
    let mut re = String::from("(?is)^");
    let mut buf = [0u8; 4];
    for ch in glob.chars() {
        match ch {
            '*' | '%' => re.push_str(".*"),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| Error::validation(format!("invalid LIKE pattern '{}': {}", glob, e)))
}

// ============================================================================
// Sort
// ============================================================================

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Field name
    pub field: String,
    /// Descending order
    pub descending: bool,
}

impl SortKey {
    /// Parse `"Name ASC, Age DESC"`
    pub fn parse_list(spec: &str) -> Result<Vec<SortKey>> {
        let keys = spec
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Self::parse_one)
            .collect::<Result<Vec<_>>>()?;
        if keys.is_empty() {
            return Err(Error::validation("sort specification is empty"));
        }
        Ok(keys)
    }

    fn parse_one(part: &str) -> Result<SortKey> {
        let (name, descending) = match part.rsplit_once(char::is_whitespace) {
            Some((name, dir)) if dir.eq_ignore_ascii_case("desc") => (name.trim(), true),
            Some((name, dir)) if dir.eq_ignore_ascii_case("asc") => (name.trim(), false),
            _ => (part, false),
        };
        let name = name
            .strip_prefix('[')
            .and_then(|n| n.strip_suffix(']'))
            .unwrap_or(name);
        if name.is_empty() {
            return Err(Error::validation(format!("sort key '{}' has no field", part)));
        }
        Ok(SortKey {
            field: name.to_string(),
            descending,
        })
    }

    /// Order two rows by a key list; NULLs sort first ascending
    pub fn compare_rows(keys: &[SortKey], a: &Row, b: &Row) -> Ordering {
        for key in keys {
            let left = a.get_by_name(&key.field).unwrap_or(&Value::Null);
            let right = b.get_by_name(&key.field).unwrap_or(&Value::Null);
            let ord = left.sort_cmp(right);
            let ord = if key.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, age: i32, member: bool) -> Row {
        Row::new(
            vec!["Name".into(), "Age".into(), "Is Member".into(), "Manager".into()],
            vec![name.into(), age.into(), member.into(), Value::Null],
        )
    }

    #[test]
    fn test_simple_comparisons() {
        let r = row("Smith", 30, true);
        assert!(Criteria::parse("Name = 'smith'").unwrap().matches(&r));
        assert!(Criteria::parse("Age >= 30").unwrap().matches(&r));
        assert!(!Criteria::parse("Age > 30").unwrap().matches(&r));
        assert!(Criteria::parse("Age <> 31").unwrap().matches(&r));
        assert!(Criteria::parse("[Is Member] = true").unwrap().matches(&r));
        assert!(Criteria::parse("Manager IS NULL").unwrap().matches(&r));
        assert!(Criteria::parse("Manager = NULL").unwrap().matches(&r));
        assert!(!Criteria::parse("Manager > 1").unwrap().matches(&r));
    }

    #[test]
    fn test_like() {
        let r = row("Smithers", 30, true);
        assert!(Criteria::parse("Name LIKE 'sm*'").unwrap().matches(&r));
        assert!(Criteria::parse("Name LIKE '%THERS'").unwrap().matches(&r));
        assert!(!Criteria::parse("Name LIKE 'Jo*'").unwrap().matches(&r));
        assert!(Criteria::parse("Name NOT LIKE 'Jo*'").unwrap().matches(&r));
        assert!(Criteria::parse("Name LIKE 5").is_err());
    }

    #[test]
    fn test_and_or_precedence() {
        let r = row("Smith", 15, false);
        // AND binds tighter than OR
        let c = Criteria::parse("Name = 'Jones' AND Age > 10 OR Age < 20").unwrap();
        assert!(c.matches(&r));
        let c = Criteria::parse("Name = 'Jones' AND (Age > 10 OR Age < 20)").unwrap();
        assert!(!c.matches(&r));
    }

    #[test]
    fn test_date_literal() {
        let r = Row::new(
            vec!["Hired".into()],
            vec![Value::Date(NaiveDate::from_ymd_opt(2019, 6, 1).unwrap())],
        );
        assert!(Criteria::parse("Hired < #2020-01-01#").unwrap().matches(&r));
        assert!(Criteria::parse("Hired = #06/01/2019#").unwrap().matches(&r));
        assert!(Criteria::parse("Hired < #not a date#").is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(Criteria::parse("").is_err());
        assert!(Criteria::parse("Name =").is_err());
        assert!(Criteria::parse("Name 'x'").is_err());
        assert!(Criteria::parse("Name = 'x").is_err());
        assert!(Criteria::parse("(Age > 1").is_err());
        assert!(Criteria::parse("Age > 1 Name").is_err());
    }

    #[test]
    fn test_validate_fields() {
        let c = Criteria::parse("Name = 'a' OR Salary > 1").unwrap();
        let err = c
            .validate(&["name".to_string(), "age".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("Salary"));
    }

    #[test]
    fn test_sort_keys() {
        let keys = SortKey::parse_list("Name ASC, Age DESC, [Is Member]").unwrap();
        assert_eq!(keys.len(), 3);
        assert!(!keys[0].descending);
        assert!(keys[1].descending);
        assert_eq!(keys[2].field, "Is Member");
        assert!(SortKey::parse_list(" , ").is_err());

        let a = row("Smith", 30, true);
        let b = row("smith", 40, true);
        assert_eq!(SortKey::compare_rows(&keys, &a, &b), Ordering::Greater);
    }
}
