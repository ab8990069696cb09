//! Ordered include/exclude dataset filter
//!
//! Rules are evaluated first-match-wins with path-glob semantics: `*` does
//! not cross `/` boundaries, except that a whole-pattern `*` matches every
//! name outright. An implicit trailing `include *` accepts anything no
//! earlier rule claimed, so an empty filter passes all datasets through.

use globset::{GlobBuilder, GlobMatcher};
use std::error::Error;
use std::fmt;

/// Errors raised while building filter rules
#[derive(Debug)]
pub enum FilterError {
	/// Patterns must be a single token
	EmbeddedSpace(String),

	/// Pattern did not compile as a glob
	BadPattern { pattern: String, message: String },
}

impl fmt::Display for FilterError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FilterError::EmbeddedSpace(pattern) => {
				write!(f, "spaces not allowed in pattern '{}'", pattern)
			}
			FilterError::BadPattern { pattern, message } => {
				write!(f, "pattern '{}' is malformed: {}", pattern, message)
			}
		}
	}
}

impl Error for FilterError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
	Include,
	Exclude,
}

#[derive(Debug, Clone)]
struct Rule {
	kind: RuleKind,
	pattern: String,
	// None for the whole-pattern "*", which needs no glob machinery
	matcher: Option<GlobMatcher>,
}

/// Ordered dataset name filter
#[derive(Debug, Clone, Default)]
pub struct DatasetFilter {
	rules: Vec<Rule>,
}

impl DatasetFilter {
	pub fn new() -> Self {
		DatasetFilter { rules: Vec::new() }
	}

	/// Append an include rule
	pub fn include(&mut self, pattern: &str) -> Result<(), FilterError> {
		self.push(RuleKind::Include, pattern)
	}

	/// Append an exclude rule
	pub fn exclude(&mut self, pattern: &str) -> Result<(), FilterError> {
		self.push(RuleKind::Exclude, pattern)
	}

	fn push(&mut self, kind: RuleKind, pattern: &str) -> Result<(), FilterError> {
		if pattern.contains(' ') {
			return Err(FilterError::EmbeddedSpace(pattern.to_string()));
		}
		let matcher = if pattern == "*" {
			None
		} else {
			let glob = GlobBuilder::new(pattern)
				.literal_separator(true)
				.build()
				.map_err(|e| FilterError::BadPattern {
					pattern: pattern.to_string(),
					message: e.to_string(),
				})?;
			Some(glob.compile_matcher())
		};
		self.rules.push(Rule { kind, pattern: pattern.to_string(), matcher });
		Ok(())
	}

	/// Whether a dataset passes the filter (first match wins, implicit
	/// trailing `include *`)
	pub fn included(&self, dataset: &str) -> bool {
		for rule in &self.rules {
			let matched = match &rule.matcher {
				None => true, // whole-pattern "*" claims everything
				Some(matcher) => matcher.is_match(dataset),
			};
			if matched {
				return rule.kind == RuleKind::Include;
			}
		}
		true
	}

	/// Keep the included datasets and sort them lexicographically
	pub fn filter_sorted(&self, datasets: Vec<String>) -> Vec<String> {
		let mut result: Vec<String> =
			datasets.into_iter().filter(|d| self.included(d)).collect();
		result.sort();
		result
	}

	/// Number of explicit rules (the implicit tail is not counted)
	pub fn len(&self) -> usize {
		self.rules.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rules.is_empty()
	}
}


// vim: ts=4
