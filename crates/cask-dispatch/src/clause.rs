//! Dispatch clauses: `path<op>value` predicates over a property value.

use std::fmt;

use regex::Regex;

use cask_types::PropertyValue;

use crate::error::{DispatchError, Result};

/// Characters that start an operator inside a clause token.
const OPERATOR_CHARS: &[char] = &['=', '!', '<', '>', '~', '^'];

/// Comparison operator of a [`Clause`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `=`: string representations are equal.
    Eq,
    /// `!=`: string representations differ.
    Neq,
    /// `<`: integer less-than.
    Lt,
    /// `>`: integer greater-than.
    Gt,
    /// `~`: anchored glob with `*` and `?`.
    Glob,
    /// `^`: full-match regular expression.
    Regex,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Glob => "~",
            Self::Regex => "^",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// The compiled right-hand side of a clause.
#[derive(Clone, Debug)]
pub enum Operand {
    Text(String),
    Integer(i64),
    Pattern(Regex),
}

/// A single predicate: `path <operator> value`.
#[derive(Clone, Debug)]
pub struct Clause {
    path: String,
    operator: Operator,
    value: String,
    operand: Operand,
}

impl Clause {
    /// Build a clause from its parts, compiling the operand.
    pub fn new(path: impl Into<String>, operator: Operator, value: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let value = value.into();
        let source = format!("{path}{operator}{value}");
        if path.is_empty() {
            return Err(DispatchError::malformed(&source, "missing property path"));
        }
        let operand = match operator {
            Operator::Eq | Operator::Neq => Operand::Text(value.clone()),
            Operator::Lt | Operator::Gt => value
                .trim()
                .parse()
                .map(Operand::Integer)
                .map_err(|_| DispatchError::malformed(&source, "operand must be an integer"))?,
            Operator::Glob => Operand::Pattern(compile(&source, &glob_to_regex(&value))?),
            Operator::Regex => Operand::Pattern(compile(&source, &format!("^(?:{value})$"))?),
        };
        Ok(Self {
            path,
            operator,
            value,
            operand,
        })
    }

    /// Parse one `path<op>value` token. The operator is the first operator
    /// character in the token; `!` must be followed by `=`.
    pub fn parse(token: &str) -> Result<Self> {
        let token = token.trim();
        let Some(at) = token.find(OPERATOR_CHARS) else {
            return Err(DispatchError::malformed(token, "no operator"));
        };
        let path = token[..at].trim();
        let rest = &token[at..];
        let (operator, value) = match rest.as_bytes()[0] {
            b'=' => (Operator::Eq, &rest[1..]),
            b'!' if rest[1..].starts_with('=') => (Operator::Neq, &rest[2..]),
            b'!' => return Err(DispatchError::malformed(token, "'!' must be followed by '='")),
            b'<' => (Operator::Lt, &rest[1..]),
            b'>' => (Operator::Gt, &rest[1..]),
            b'~' => (Operator::Glob, &rest[1..]),
            _ => (Operator::Regex, &rest[1..]),
        };
        Self::new(path, operator, value.trim())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// The operand as written.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn operand(&self) -> &Operand {
        &self.operand
    }

    /// Evaluate against the value found at [`path`](Self::path).
    ///
    /// `None` means the path did not resolve, which never matches. Lists
    /// match when any element matches, except `!=` which requires every
    /// element to differ.
    pub fn matches(&self, value: Option<&PropertyValue>) -> bool {
        match value {
            None => false,
            Some(PropertyValue::List(items)) => match self.operator {
                Operator::Neq => items.iter().all(|item| self.matches(Some(item))),
                _ => items.iter().any(|item| self.matches(Some(item))),
            },
            Some(scalar) => self.matches_scalar(scalar),
        }
    }

    fn matches_scalar(&self, value: &PropertyValue) -> bool {
        match &self.operand {
            Operand::Text(expected) => {
                let equal = value.to_string() == *expected;
                match self.operator {
                    Operator::Neq => !equal,
                    _ => equal,
                }
            }
            Operand::Integer(bound) => {
                // A property that exists without a value compares as zero.
                let actual = match value {
                    PropertyValue::Null => Some(0),
                    other => other.as_integer(),
                };
                match (actual, self.operator) {
                    (Some(n), Operator::Lt) => n < *bound,
                    (Some(n), Operator::Gt) => n > *bound,
                    _ => false,
                }
            }
            Operand::Pattern(pattern) => pattern.is_match(&value.to_string()),
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.path, self.operator, self.value)
    }
}

/// Parse a comma-joined list of clause tokens.
pub fn parse_clauses(clauses: &str) -> Result<Vec<Clause>> {
    clauses
        .split(',')
        .map(|token| {
            if token.trim().is_empty() {
                Err(DispatchError::malformed(clauses, "empty clause"))
            } else {
                Clause::parse(token)
            }
        })
        .collect()
}

fn glob_to_regex(glob: &str) -> String {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push_str("(?s)^");
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');
    pattern
}

fn compile(source: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| DispatchError::malformed(source, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn text(s: &str) -> PropertyValue {
        PropertyValue::from(s)
    }

    #[test]
    fn parse_each_operator() {
        let cases = [
            ("dc:format=video", Operator::Eq, "video"),
            ("dc:format!=video", Operator::Neq, "video"),
            ("blob:length<100", Operator::Lt, "100"),
            ("blob:length>100", Operator::Gt, "100"),
            ("blob:mime-type~video/*", Operator::Glob, "video/*"),
            ("blob:name^.*\\.pdf", Operator::Regex, ".*\\.pdf"),
        ];
        for (token, op, value) in cases {
            let clause = Clause::parse(token).unwrap();
            assert_eq!(clause.operator(), op, "{token}");
            assert_eq!(clause.value(), value, "{token}");
            assert_eq!(clause.to_string(), token);
        }
    }

    #[test]
    fn path_keeps_namespace_colon() {
        let clause = Clause::parse("ecm:repositoryName=default").unwrap();
        assert_eq!(clause.path(), "ecm:repositoryName");
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for token in ["noop", "=value", "a!b", "a<ten", "a>1.5", "a^(unclosed"] {
            assert!(
                matches!(Clause::parse(token), Err(DispatchError::MalformedClause { .. })),
                "{token}"
            );
        }
    }

    #[test]
    fn empty_token_in_list_is_rejected() {
        assert!(parse_clauses("a=1,,b=2").is_err());
        assert_eq!(parse_clauses("a=1, b=2").unwrap().len(), 2);
    }

    #[test]
    fn eq_and_neq_compare_strings() {
        let eq = Clause::parse("dc:count=3").unwrap();
        assert!(eq.matches(Some(&PropertyValue::Integer(3))));
        assert!(eq.matches(Some(&text("3"))));
        assert!(!eq.matches(Some(&text("03"))));

        let neq = Clause::parse("dc:format!=video").unwrap();
        assert!(neq.matches(Some(&text("audio"))));
        assert!(!neq.matches(Some(&text("video"))));
    }

    #[test]
    fn unresolved_path_never_matches() {
        for token in ["a=x", "a!=x", "a<5", "a>5", "a~*", "a^.*"] {
            assert!(!Clause::parse(token).unwrap().matches(None), "{token}");
        }
    }

    #[test]
    fn integer_comparisons() {
        let lt = Clause::parse("blob:length<100").unwrap();
        assert!(lt.matches(Some(&PropertyValue::Integer(99))));
        assert!(!lt.matches(Some(&PropertyValue::Integer(100))));
        assert!(lt.matches(Some(&text(" 42 "))));
        assert!(!lt.matches(Some(&text("lots"))));

        let gt = Clause::parse("blob:length>-1").unwrap();
        assert!(gt.matches(Some(&PropertyValue::Integer(0))));
        assert!(!gt.matches(Some(&PropertyValue::Integer(-1))));
    }

    #[test]
    fn empty_value_compares_as_zero() {
        assert!(Clause::parse("x<1").unwrap().matches(Some(&PropertyValue::Null)));
        assert!(!Clause::parse("x>0").unwrap().matches(Some(&PropertyValue::Null)));
    }

    #[test]
    fn glob_is_anchored() {
        let glob = Clause::parse("blob:mime-type~video/*").unwrap();
        assert!(glob.matches(Some(&text("video/mp4"))));
        assert!(glob.matches(Some(&text("video/"))));
        assert!(!glob.matches(Some(&text("x-video/mp4"))));

        let single = Clause::parse("blob:name~report-?.pdf").unwrap();
        assert!(single.matches(Some(&text("report-1.pdf"))));
        assert!(!single.matches(Some(&text("report-10.pdf"))));
        assert!(!single.matches(Some(&text("report-1xpdf"))));
    }

    #[test]
    fn regex_must_match_whole_value() {
        let re = Clause::parse("blob:name^[a-z]+|[0-9]+").unwrap();
        assert!(re.matches(Some(&text("abc"))));
        assert!(re.matches(Some(&text("123"))));
        assert!(!re.matches(Some(&text("abc123"))));
    }

    #[test]
    fn list_values() {
        let list = PropertyValue::List(vec![text("draft"), text("approved")]);
        assert!(Clause::parse("dc:tags=approved").unwrap().matches(Some(&list)));
        assert!(Clause::parse("dc:tags~appr*").unwrap().matches(Some(&list)));
        assert!(!Clause::parse("dc:tags!=approved").unwrap().matches(Some(&list)));
        assert!(Clause::parse("dc:tags!=archived").unwrap().matches(Some(&list)));

        let empty = PropertyValue::List(Vec::new());
        assert!(!Clause::parse("dc:tags=x").unwrap().matches(Some(&empty)));
        assert!(Clause::parse("dc:tags!=x").unwrap().matches(Some(&empty)));
    }

    proptest! {
        #[test]
        fn literal_glob_matches_only_itself(s in "[ -~]{0,24}") {
            let literal: String = s.chars().filter(|c| *c != '*' && *c != '?' && *c != ',').collect();
            let clause = Clause::new("p", Operator::Glob, literal.clone()).unwrap();
            prop_assert!(clause.matches(Some(&text(&literal))));
            let longer = format!("{literal}x");
            prop_assert!(!clause.matches(Some(&text(&longer))));
        }

        #[test]
        fn star_suffix_matches_any_extension(prefix in "[a-z/]{0,12}", tail in "\\PC{0,12}") {
            let clause = Clause::new("p", Operator::Glob, format!("{prefix}*")).unwrap();
            let value = format!("{prefix}{tail}");
            prop_assert!(clause.matches(Some(&text(&value))));
        }
    }
}
