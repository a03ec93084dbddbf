//! URL matching for route registration.
//!
//! Globs follow the driver's rules: `*` matches within one path segment,
//! `**` matches across segments and `?` matches one character. `{a,b}` is
//! alternation and `[...]` a character class.

use std::fmt;
use std::sync::Arc;

use pwire_protocol::InterceptionPattern;
use pwire_runtime::{Error, Result};
use regex::Regex;

/// Characters escaped when copied into the generated regex.
const REGEX_SPECIAL: &[char] = &['$', '^', '+', '.', '*', '(', ')', '|', '\\', '?', '{', '}', '[', ']'];

/// Predicate form of a matcher.
pub type UrlPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// What a route (or websocket route) registration matches against.
#[derive(Clone)]
pub enum UrlMatcher {
	/// Every URL.
	Any,
	Glob { glob: String, regex: Regex },
	Regex(Regex),
	Predicate(UrlPredicate),
}

impl UrlMatcher {
	/// Compiles a glob pattern.
	pub fn glob(glob: &str) -> Result<Self> {
		let regex = glob_to_regex(glob)?;
		Ok(Self::Glob {
			glob: glob.to_string(),
			regex,
		})
	}

	/// Compiles a regular expression.
	pub fn regex(pattern: &str) -> Result<Self> {
		Regex::new(pattern)
			.map(Self::Regex)
			.map_err(|e| Error::InvalidArgument(format!("Invalid URL regex {pattern:?}: {e}")))
	}

	pub fn predicate<F>(predicate: F) -> Self
	where
		F: Fn(&str) -> bool + Send + Sync + 'static,
	{
		Self::Predicate(Arc::new(predicate))
	}

	pub fn is_match(&self, url: &str) -> bool {
		match self {
			Self::Any => true,
			Self::Glob { regex, .. } | Self::Regex(regex) => regex.is_match(url),
			Self::Predicate(predicate) => predicate(url),
		}
	}

	/// Whether `other` names the same registration target, as used by `unroute`.
	///
	/// Globs and regexes compare by source; predicates by identity.
	pub fn same_as(&self, other: &UrlMatcher) -> bool {
		match (self, other) {
			(Self::Any, Self::Any) => true,
			(Self::Glob { glob: a, .. }, Self::Glob { glob: b, .. }) => a == b,
			(Self::Regex(a), Self::Regex(b)) => a.as_str() == b.as_str(),
			(Self::Predicate(a), Self::Predicate(b)) => Arc::ptr_eq(a, b),
			_ => false,
		}
	}

	/// The pattern reported to the driver. `None` means "intercept everything".
	fn interception_pattern(&self) -> Option<InterceptionPattern> {
		match self {
			Self::Glob { glob, .. } => Some(InterceptionPattern::Glob { glob: glob.clone() }),
			Self::Regex(regex) => Some(InterceptionPattern::Regex {
				regex_source: regex.as_str().to_string(),
				regex_flags: String::new(),
			}),
			Self::Any | Self::Predicate(_) => None,
		}
	}
}

impl From<Regex> for UrlMatcher {
	fn from(regex: Regex) -> Self {
		Self::Regex(regex)
	}
}

impl fmt::Debug for UrlMatcher {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Any => f.write_str("Any"),
			Self::Glob { glob, .. } => f.debug_tuple("Glob").field(glob).finish(),
			Self::Regex(regex) => f.debug_tuple("Regex").field(&regex.as_str()).finish(),
			Self::Predicate(_) => f.write_str("Predicate"),
		}
	}
}

/// Interception patterns for a set of matchers.
///
/// A single match-all pattern replaces the list when any matcher cannot be
/// expressed to the driver.
pub fn interception_patterns<'a>(matchers: impl IntoIterator<Item = &'a UrlMatcher>) -> Vec<InterceptionPattern> {
	let mut patterns = Vec::new();
	for matcher in matchers {
		match matcher.interception_pattern() {
			Some(pattern) => patterns.push(pattern),
			None => return vec![InterceptionPattern::Glob { glob: "**/*".to_string() }],
		}
	}
	patterns
}

/// Translates a URL glob into an anchored regex.
pub fn glob_to_regex(glob: &str) -> Result<Regex> {
	let chars: Vec<char> = glob.chars().collect();
	let mut out = String::from("^");
	let mut in_group = false;
	let mut in_class = false;
	let mut i = 0;

	while i < chars.len() {
		let c = chars[i];
		if in_class {
			if c == ']' {
				in_class = false;
			}
			if c == '\\' && i + 1 < chars.len() {
				out.push('\\');
				out.push(chars[i + 1]);
				i += 2;
				continue;
			}
			out.push(c);
			i += 1;
			continue;
		}
		match c {
			'\\' if i + 1 < chars.len() => {
				push_literal(&mut out, chars[i + 1]);
				i += 1;
			}
			'*' => {
				let before = if i > 0 { Some(chars[i - 1]) } else { None };
				let mut stars = 1;
				while i + 1 < chars.len() && chars[i + 1] == '*' {
					stars += 1;
					i += 1;
				}
				let after = chars.get(i + 1).copied();
				let deep = stars > 1 && matches!(before, None | Some('/')) && matches!(after, None | Some('/'));
				if deep {
					out.push_str("((?:[^/]*(?:/|$))*)");
					// the trailing '/' is consumed by the group
					i += 1;
				} else {
					out.push_str("([^/]*)");
				}
			}
			'?' => out.push('.'),
			'{' => {
				in_group = true;
				out.push('(');
			}
			'}' if in_group => {
				in_group = false;
				out.push(')');
			}
			',' if in_group => out.push('|'),
			'[' => {
				in_class = true;
				out.push('[');
			}
			other => push_literal(&mut out, other),
		}
		i += 1;
	}
	out.push('$');

	Regex::new(&out).map_err(|e| Error::InvalidArgument(format!("Invalid URL glob {glob:?}: {e}")))
}

fn push_literal(out: &mut String, c: char) {
	if REGEX_SPECIAL.contains(&c) {
		out.push('\\');
	}
	out.push(c);
}
