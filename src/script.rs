//! Calls carried by fixture links.
//!
//! Fixture pages wire their links to helper functions through `javascript:`
//! hrefs such as `javascript:result('delayed_link')`. [`FixtureCall`] is the
//! parsed form; [`crate::mutator::DeferredUiMutator::activate`] executes it.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

const JAVASCRIPT_SCHEME: &str = "javascript:";

/// A helper invocation a fixture link can trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixtureCall {
    /// `result(value)`: show `value` in the result node.
    Result(String),
    /// `reset()`: restore the default result message.
    Reset,
    /// `recreateElement(id)`
    RecreateElement(String),
    /// `makeElementStale(id[, timeout_ms])`
    MakeElementStale {
        element_id: String,
        timeout: Option<Duration>,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("no function call in '{0}'")]
    MissingCall(String),
    #[error("unknown fixture function '{0}'")]
    UnknownFunction(String),
    #[error("{function} expects {expected} argument(s), got {actual}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        actual: usize,
    },
    #[error("invalid argument '{0}'")]
    InvalidArgument(String),
    #[error("unterminated string literal in '{0}'")]
    Unterminated(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Str(String),
    Int(u64),
}

impl FixtureCall {
    /// Parse an href or bare call expression.
    pub fn parse_href(href: &str) -> Result<Self, ScriptError> {
        let trimmed = href.trim();
        let body = trimmed
            .strip_prefix(JAVASCRIPT_SCHEME)
            .unwrap_or(trimmed)
            .trim();
        let body = body.strip_suffix(';').unwrap_or(body).trim_end();

        let open = body
            .find('(')
            .ok_or_else(|| ScriptError::MissingCall(href.to_string()))?;
        let args_src = body[open + 1..]
            .strip_suffix(')')
            .ok_or_else(|| ScriptError::MissingCall(href.to_string()))?;
        let name = body[..open].trim();
        let args = parse_args(args_src)?;

        match name {
            "result" => {
                let [value] = expect_args::<1>("result", args)?;
                Ok(FixtureCall::Result(arg_string(value)))
            }
            "reset" => {
                expect_args::<0>("reset", args)?;
                Ok(FixtureCall::Reset)
            }
            "recreateElement" => {
                let [id] = expect_args::<1>("recreateElement", args)?;
                Ok(FixtureCall::RecreateElement(arg_string(id)))
            }
            "makeElementStale" => {
                let actual = args.len();
                let mut args = args.into_iter();
                let (Some(id), timeout, None) = (args.next(), args.next(), args.next()) else {
                    return Err(ScriptError::Arity {
                        function: "makeElementStale",
                        expected: "1 or 2",
                        actual,
                    });
                };
                let timeout = match timeout {
                    None => None,
                    Some(Arg::Int(ms)) => Some(Duration::from_millis(ms)),
                    Some(Arg::Str(other)) => return Err(ScriptError::InvalidArgument(other)),
                };
                Ok(FixtureCall::MakeElementStale {
                    element_id: arg_string(id),
                    timeout,
                })
            }
            other => Err(ScriptError::UnknownFunction(other.to_string())),
        }
    }

    /// Canonical `javascript:` href for this call.
    pub fn to_href(&self) -> String {
        format!("{JAVASCRIPT_SCHEME}{self}")
    }
}

impl fmt::Display for FixtureCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixtureCall::Result(value) => write!(f, "result('{}')", escape(value)),
            FixtureCall::Reset => f.write_str("reset()"),
            FixtureCall::RecreateElement(id) => write!(f, "recreateElement('{}')", escape(id)),
            FixtureCall::MakeElementStale {
                element_id,
                timeout: None,
            } => write!(f, "makeElementStale('{}')", escape(element_id)),
            FixtureCall::MakeElementStale {
                element_id,
                timeout: Some(timeout),
            } => write!(
                f,
                "makeElementStale('{}', {})",
                escape(element_id),
                timeout.as_millis()
            ),
        }
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn arg_string(arg: Arg) -> String {
    match arg {
        Arg::Str(value) => value,
        Arg::Int(value) => value.to_string(),
    }
}

fn expect_args<const N: usize>(function: &'static str, args: Vec<Arg>) -> Result<[Arg; N], ScriptError> {
    let actual = args.len();
    args.try_into().map_err(|_| ScriptError::Arity {
        function,
        expected: match N {
            0 => "0",
            1 => "1",
            _ => "several",
        },
        actual,
    })
}

fn parse_args(src: &str) -> Result<Vec<Arg>, ScriptError> {
    let mut args = Vec::new();
    let mut chars = src.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&first) = chars.peek() else { break };

        let arg = match first {
            '\'' | '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some(escaped) => value.push(escaped),
                            None => break,
                        },
                        c if c == first => {
                            closed = true;
                            break;
                        }
                        c => value.push(c),
                    }
                }
                if !closed {
                    return Err(ScriptError::Unterminated(src.to_string()));
                }
                Arg::Str(value)
            }
            _ => {
                let mut raw = String::new();
                while let Some(c) = chars.next_if(|c| *c != ',') {
                    raw.push(c);
                }
                let raw = raw.trim();
                let value = raw
                    .parse::<u64>()
                    .map_err(|_| ScriptError::InvalidArgument(raw.to_string()))?;
                Arg::Int(value)
            }
        };
        args.push(arg);

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(other) => return Err(ScriptError::InvalidArgument(other.to_string())),
        }
    }

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delayed_link_href() {
        let call = FixtureCall::parse_href("javascript:result('delayed_link')").unwrap();
        assert_eq!(call, FixtureCall::Result("delayed_link".into()));
        assert_eq!(call.to_href(), "javascript:result('delayed_link')");
    }

    #[test]
    fn parses_calls_without_scheme_and_with_semicolon() {
        assert_eq!(FixtureCall::parse_href(" reset(); ").unwrap(), FixtureCall::Reset);
        assert_eq!(
            FixtureCall::parse_href("recreateElement(\"menu\")").unwrap(),
            FixtureCall::RecreateElement("menu".into())
        );
    }

    #[test]
    fn parses_make_element_stale_with_optional_timeout() {
        assert_eq!(
            FixtureCall::parse_href("javascript:makeElementStale('btn')").unwrap(),
            FixtureCall::MakeElementStale {
                element_id: "btn".into(),
                timeout: None,
            }
        );
        let call = FixtureCall::parse_href("javascript:makeElementStale('btn', 100)").unwrap();
        assert_eq!(
            call,
            FixtureCall::MakeElementStale {
                element_id: "btn".into(),
                timeout: Some(Duration::from_millis(100)),
            }
        );
        assert_eq!(call.to_href(), "javascript:makeElementStale('btn', 100)");
    }

    #[test]
    fn keeps_escaped_quotes() {
        let call = FixtureCall::parse_href(r"javascript:result('it\'s')").unwrap();
        assert_eq!(call, FixtureCall::Result("it's".into()));
        assert_eq!(call.to_href(), r"javascript:result('it\'s')");
    }

    #[test]
    fn rejects_malformed_calls() {
        assert!(matches!(
            FixtureCall::parse_href("javascript:void"),
            Err(ScriptError::MissingCall(_))
        ));
        assert_eq!(
            FixtureCall::parse_href("alert('x')"),
            Err(ScriptError::UnknownFunction("alert".into()))
        );
        assert_eq!(
            FixtureCall::parse_href("reset('x')"),
            Err(ScriptError::Arity {
                function: "reset",
                expected: "0",
                actual: 1
            })
        );
        assert!(matches!(
            FixtureCall::parse_href("result('open)"),
            Err(ScriptError::Unterminated(_))
        ));
        assert_eq!(
            FixtureCall::parse_href("makeElementStale('a', 'b')"),
            Err(ScriptError::InvalidArgument("b".into()))
        );
        assert!(matches!(
            FixtureCall::parse_href("makeElementStale('a', 1, 2)"),
            Err(ScriptError::Arity { actual: 3, .. })
        ));
    }
}
