//! The result-value matcher grammar used to filter trace events by their
//! return value: `"*"` (match anything), `"!=x"` (inverse-exact), or an
//! exact literal.

use context::Value;

/// A parsed result matcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResultMatcher {
    /// Matches any return value, including none.
    Any,
    /// Matches a return value that renders to exactly this string.
    Equals(String),
    /// Matches a return value that does not render to this string.
    NotEquals(String),
}

impl ResultMatcher {
    /// Parses the matcher grammar described in spec.md §4.B.
    pub fn parse(raw: &str) -> Self {
        if raw == "*" {
            ResultMatcher::Any
        } else if let Some(rest) = raw.strip_prefix("!=") {
            ResultMatcher::NotEquals(rest.to_string())
        } else {
            ResultMatcher::Equals(raw.to_string())
        }
    }

    /// Whether `value` satisfies this matcher.
    pub fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            ResultMatcher::Any => true,
            ResultMatcher::Equals(expected) => render(value) == *expected,
            ResultMatcher::NotEquals(expected) => render(value) != *expected,
        }
    }
}

fn render(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(value) => String::try_from(value.clone()).unwrap_or_default(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wildcard_matches_anything() {
        let matcher = ResultMatcher::parse("*");
        assert!(matcher.matches(None));
        assert!(matcher.matches(Some(&Value::Bool(true))));
    }

    #[test]
    fn exact_matches_only_equal_value() {
        let matcher = ResultMatcher::parse("true");
        assert!(matcher.matches(Some(&Value::Bool(true))));
        assert!(!matcher.matches(Some(&Value::Bool(false))));
    }

    #[test]
    fn negated_matches_inverse() {
        let matcher = ResultMatcher::parse("!=true");
        assert!(!matcher.matches(Some(&Value::Bool(true))));
        assert!(matcher.matches(Some(&Value::Bool(false))));
    }
}
