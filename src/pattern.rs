//! Glob patterns for the `matches_pattern` operator.
//!
//! Supported syntax, always matched against the whole value:
//!
//! | Syntax | Matches |
//! |--------|---------|
//! | `*` | any run of characters, including none |
//! | `?` | exactly one character |
//! | `[abc]` | one of the listed characters |
//! | `[a-z]` | one character in the range |
//! | `[!abc]` | one character not listed |
//! | `\x` | the literal character `x` |
//!
//! Patterns are parsed with `nom` and compiled once into a `regex`
//! automaton with a bounded size, so matching time is linear in the length
//! of the value whatever the pattern.

use nom::branch::alt;
use nom::character::complete::{anychar, char, none_of};
use nom::combinator::{all_consuming, map, opt, value};
use nom::multi::{many0, many1};
use nom::sequence::{delimited, pair, preceded, separated_pair};
use nom::IResult;
use regex::{Regex, RegexBuilder};

/// Upper bound on the compiled automaton, in bytes.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    AnyRun,
    AnyChar,
    Literal(char),
    Class { negated: bool, items: Vec<ClassItem> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassItem {
    Single(char),
    Range(char, char),
}

fn escaped(input: &str) -> IResult<&str, char> {
    preceded(char('\\'), anychar)(input)
}

fn class_char(input: &str) -> IResult<&str, char> {
    alt((escaped, none_of("]\\")))(input)
}

fn class_item(input: &str) -> IResult<&str, ClassItem> {
    alt((
        map(separated_pair(class_char, char('-'), class_char), |(lo, hi)| {
            ClassItem::Range(lo, hi)
        }),
        map(class_char, ClassItem::Single),
    ))(input)
}

fn class(input: &str) -> IResult<&str, Token> {
    map(
        delimited(char('['), pair(opt(char('!')), many1(class_item)), char(']')),
        |(negated, items)| Token::Class {
            negated: negated.is_some(),
            items,
        },
    )(input)
}

fn token(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::AnyRun, char('*')),
        value(Token::AnyChar, char('?')),
        class,
        map(escaped, Token::Literal),
        map(none_of("*?[\\"), Token::Literal),
    ))(input)
}

fn parse_tokens(pattern: &str) -> Result<Vec<Token>, String> {
    match all_consuming(many0(token))(pattern) {
        Ok((_, tokens)) => Ok(tokens),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => {
            let offset = pattern.len() - e.input.len();
            Err(format!(
                "invalid glob pattern {pattern:?} at offset {offset}: expected a literal, \
                 '*', '?', a closed '[...]' class or an escaped character"
            ))
        },
        Err(nom::Err::Incomplete(_)) => Err(format!("incomplete glob pattern {pattern:?}")),
    }
}

fn class_escape(c: char) -> String {
    format!("\\x{{{:X}}}", u32::from(c))
}

fn to_regex_source(tokens: &[Token]) -> Result<String, String> {
    let mut source = String::from("^(?:");
    for token in tokens {
        match token {
            Token::AnyRun => source.push_str(".*"),
            Token::AnyChar => source.push('.'),
            Token::Literal(c) => source.push_str(&regex::escape(&c.to_string())),
            Token::Class { negated, items } => {
                source.push('[');
                if *negated {
                    source.push('^');
                }
                for item in items {
                    match *item {
                        ClassItem::Single(c) => source.push_str(&class_escape(c)),
                        ClassItem::Range(lo, hi) => {
                            if lo > hi {
                                return Err(format!("reversed range {lo}-{hi} in glob class"));
                            }
                            source.push_str(&class_escape(lo));
                            source.push('-');
                            source.push_str(&class_escape(hi));
                        },
                    }
                }
                source.push(']');
            },
        }
    }
    source.push_str(")$");
    Ok(source)
}

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    /// Parse and compile `pattern`.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the pattern is malformed
    /// (for example an unclosed `[` or a trailing `\`) or compiles to an
    /// automaton over the size limit.
    ///
    /// # Examples
    ///
    /// ```
    /// use marcsift::GlobPattern;
    ///
    /// let pattern = GlobPattern::new("QA76.[0-9]*", false).unwrap();
    /// assert!(pattern.is_match("QA76.9 .D3"));
    /// assert!(!pattern.is_match("QA76.X"));
    /// assert!(GlobPattern::new("[abc", false).is_err());
    /// ```
    pub fn new(pattern: &str, case_insensitive: bool) -> Result<Self, String> {
        let tokens = parse_tokens(pattern)?;
        let source = to_regex_source(&tokens)?;
        let regex = RegexBuilder::new(&source)
            .case_insensitive(case_insensitive)
            .dot_matches_new_line(true)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| format!("glob pattern {pattern:?} cannot be compiled: {e}"))?;
        Ok(GlobPattern {
            source: pattern.to_string(),
            regex,
        })
    }

    /// True if the whole of `value` matches.
    #[must_use]
    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(p: &str) -> GlobPattern {
        GlobPattern::new(p, false).unwrap()
    }

    #[test]
    fn test_wildcards() {
        assert!(glob("*").is_match(""));
        assert!(glob("Comp*").is_match("Computer science"));
        assert!(!glob("Comp*").is_match("A Computer"));
        assert!(glob("*science").is_match("Computer science"));
        assert!(glob("19??").is_match("1994"));
        assert!(!glob("19??").is_match("199"));
        assert!(glob("a*b*c").is_match("a--b--c"));
    }

    #[test]
    fn test_whole_value_only() {
        assert!(!glob("cat").is_match("cats"));
        assert!(!glob("cat").is_match("a cat"));
        assert!(glob("cat").is_match("cat"));
    }

    #[test]
    fn test_classes() {
        assert!(glob("[abc]x").is_match("bx"));
        assert!(!glob("[abc]x").is_match("dx"));
        assert!(glob("[a-z]1").is_match("q1"));
        assert!(!glob("[!a-z]1").is_match("q1"));
        assert!(glob("[!a-z]1").is_match("Q1"));
        assert!(glob("[a-]").is_match("-"));
        assert!(glob("[\\]]").is_match("]"));
    }

    #[test]
    fn test_escapes_and_regex_metacharacters() {
        assert!(glob("\\*").is_match("*"));
        assert!(!glob("\\*").is_match("x"));
        assert!(glob("a.b").is_match("a.b"));
        assert!(!glob("a.b").is_match("axb"));
        assert!(glob("(x)+{2}|^$").is_match("(x)+{2}|^$"));
    }

    #[test]
    fn test_case_insensitive() {
        let pattern = GlobPattern::new("comp*", true).unwrap();
        assert!(pattern.is_match("COMPUTERS"));
        assert!(!glob("comp*").is_match("COMPUTERS"));
    }

    #[test]
    fn test_malformed_patterns() {
        assert!(GlobPattern::new("[abc", false).is_err());
        assert!(GlobPattern::new("[]", false).is_err());
        assert!(GlobPattern::new("abc\\", false).is_err());
        let err = GlobPattern::new("[z-a]", false).unwrap_err();
        assert!(err.contains("reversed range"), "got: {err}");
    }
}
