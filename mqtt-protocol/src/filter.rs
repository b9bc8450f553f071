use crate::Topic;
use core::{borrow, fmt, ops};

const LEVEL_SEPARATOR: char = '/';
const SINGLE_LEVEL_WILDCARD: char = '+';
const SINGLE_LEVEL_WILDCARD_STR: &str = "+";
const MULTI_LEVEL_WILDCARD: char = '#';
const MULTI_LEVEL_WILDCARD_STR: &str = "#";
const WILDCARDS: [char; 2] = [SINGLE_LEVEL_WILDCARD, MULTI_LEVEL_WILDCARD];

/// An MQTT topic filter.
///
/// Internally this is just an `&str`. For the owned variant see [`FilterBuf`].
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Filter(str);

/// How a topic was matched by a [`Filter`], level by level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Matches {
	pub exact: usize,
	pub wildcard: usize,
	pub multi_wildcard: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidFilter {
	#[error("filter cannot be empty")]
	Empty,
	#[error("filter cannot exceed maximum length for an MQTT string (65,535 bytes)")]
	TooLong,
	#[error("filter levels cannot contain both wildcard and non-wildcard characters")]
	InvalidLevel,
	#[error("multi-level wildcard can only appear in final filter level")]
	NonTerminalMultiLevelWildcard,
}

impl Filter {
	/// Validates `filter` and borrows it as a `Filter`.
	///
	/// A level containing `+` or `#` must consist of only that wildcard, and
	/// `#` may only appear as the final level.
	pub fn new<S: AsRef<str> + ?Sized>(filter: &S) -> Result<&Filter, InvalidFilter> {
		let filter = filter.as_ref();

		if filter.is_empty() {
			return Err(InvalidFilter::Empty);
		}

		if filter.len() > u16::MAX as usize {
			return Err(InvalidFilter::TooLong);
		}

		let mut levels = filter.split(LEVEL_SEPARATOR).peekable();
		while let Some(level) = levels.next() {
			if level.contains(&WILDCARDS[..]) && level.len() > 1 {
				return Err(InvalidFilter::InvalidLevel);
			}

			if level == MULTI_LEVEL_WILDCARD_STR && levels.peek().is_some() {
				return Err(InvalidFilter::NonTerminalMultiLevelWildcard);
			}
		}

		Ok(Self::from_str(filter))
	}

	/// Checks `topic` to determine if it would be matched by the `Filter`.
	///
	/// Returns `None` if the topic does not match, otherwise the number of
	/// levels matched exactly and by each kind of wildcard. A trailing `#`
	/// also matches the parent level, so `a/#` matches `a`. Topics beginning
	/// with `$` are only matched by filters that name their first level
	/// explicitly.
	pub fn matches_topic(&self, topic: &Topic) -> Option<Matches> {
		if topic.is_reserved() && self.0.starts_with(&WILDCARDS[..]) {
			return None;
		}

		let mut topic_levels = topic.levels();
		let mut result = Matches::default();

		for filter_level in self.levels() {
			match filter_level {
				MULTI_LEVEL_WILDCARD_STR => {
					result.multi_wildcard = topic_levels.by_ref().count();
					return Some(result);
				}
				SINGLE_LEVEL_WILDCARD_STR => {
					topic_levels.next()?;
					result.wildcard += 1;
				}
				exact_match => {
					if topic_levels.next()? != exact_match {
						return None;
					}
					result.exact += 1;
				}
			}
		}

		// Every level of the topic must have been consumed.
		topic_levels.next().is_none().then_some(result)
	}

	/// Shorthand for `matches_topic(topic).is_some()`.
	#[inline]
	pub fn matches(&self, topic: &Topic) -> bool {
		self.matches_topic(topic).is_some()
	}

	#[inline]
	pub const fn len(&self) -> usize {
		self.0.len()
	}

	#[inline]
	pub const fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	#[inline]
	pub const fn as_str(&self) -> &str {
		&self.0
	}

	#[inline]
	pub fn to_filter_buf(&self) -> FilterBuf {
		FilterBuf(String::from(&self.0))
	}

	/// Returns an iterator over the levels of the filter.
	///
	/// # Example
	/// ```
	/// # use mqtt_protocol::Filter;
	/// let mut levels = Filter::new("a/+/c").unwrap().levels();
	/// assert_eq!(levels.next(), Some("a"));
	/// assert_eq!(levels.next(), Some("+"));
	/// assert_eq!(levels.next(), Some("c"));
	/// assert_eq!(levels.next(), None);
	/// ```
	#[inline]
	pub fn levels(&self) -> impl Iterator<Item = &str> {
		self.0.split(LEVEL_SEPARATOR)
	}

	/// Creates a Filter from an `&'static str`. The validity of the filter is
	/// *not* checked.
	#[inline]
	pub const fn from_static(filter: &'static str) -> &'static Filter {
		Self::from_str(filter)
	}

	const fn from_str(s: &str) -> &Self {
		// SAFETY: Filter is a transparent wrapper around str.
		unsafe { &*(s as *const str as *const Filter) }
	}
}

impl Matches {
	/// Ranks a match; more specific filters score higher.
	#[inline]
	pub fn score(&self) -> usize {
		self.exact * 100 + self.wildcard * 10 + self.multi_wildcard
	}
}

impl AsRef<str> for Filter {
	#[inline]
	fn as_ref(&self) -> &str {
		self.as_str()
	}
}

impl AsRef<Filter> for Filter {
	#[inline]
	fn as_ref(&self) -> &Filter {
		self
	}
}

impl ToOwned for Filter {
	type Owned = FilterBuf;
	#[inline]
	fn to_owned(&self) -> Self::Owned {
		self.to_filter_buf()
	}
}

impl fmt::Display for Filter {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// An owned MQTT topic Filter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterBuf(String);

impl FilterBuf {
	#[inline]
	pub fn new(filter: impl Into<String>) -> Result<Self, InvalidFilter> {
		let filter = filter.into();
		Filter::new(&filter)?;
		Ok(Self(filter))
	}

	#[inline]
	pub fn into_inner(self) -> String {
		self.0
	}
}

impl ops::Deref for FilterBuf {
	type Target = Filter;
	#[inline]
	fn deref(&self) -> &Self::Target {
		Filter::from_str(&self.0)
	}
}

impl borrow::Borrow<Filter> for FilterBuf {
	#[inline]
	fn borrow(&self) -> &Filter {
		self
	}
}

impl From<&Filter> for FilterBuf {
	#[inline]
	fn from(value: &Filter) -> Self {
		value.to_filter_buf()
	}
}

impl AsRef<Filter> for FilterBuf {
	#[inline]
	fn as_ref(&self) -> &Filter {
		self
	}
}

impl AsRef<str> for FilterBuf {
	#[inline]
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl TryFrom<&str> for FilterBuf {
	type Error = InvalidFilter;
	#[inline]
	fn try_from(value: &str) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl TryFrom<String> for FilterBuf {
	type Error = InvalidFilter;
	#[inline]
	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl fmt::Display for FilterBuf {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

#[cfg(test)]
mod tests {
	use super::{Filter, Matches};
	use crate::Topic;

	fn matches(filter: &'static str, topic: &'static str) -> bool {
		Filter::from_static(filter).matches(Topic::from_static(topic))
	}

	#[test]
	fn parses_filters() {
		for filter in [
			"a", "/", "//", "#", "+", "a/", "/b", "a/b", "+/b", "a/+", "+/+", "+/#", "/#", "a/#",
			"+/a/#", "a/+/b", "a/b/c/#", "$SYS/#",
		] {
			assert!(Filter::new(filter).is_ok(), "{filter} should be valid");
		}

		for filter in ["", "a/b+", "a/+b", "a+", "a/b#", "a/#b", "a/b/#/c", "#/", "##"] {
			assert!(Filter::new(filter).is_err(), "{filter} should be invalid");
		}
	}

	#[test]
	fn matches_topics() {
		assert!(matches("a", "a"));
		assert!(!matches("a", "b"));
		assert!(matches("#", "a/b"));
		assert!(!matches("#", "$SYS/x"));
		assert!(!matches("+", "a/b"));
		assert!(matches("+", "a"));
		assert!(matches("a/+", "a/"));
		assert!(!matches("a/+", "a/b/c"));
		assert!(matches("a/#", "a"));
	}

	#[test]
	fn matches_empty_levels() {
		assert!(matches("/#", "/"));
		assert!(matches("+/+", "/a"));
		assert!(matches("+/+", "a/"));
		assert!(!matches("+", "a/"));
		assert!(!matches("+", "/a"));
		assert!(matches("a//+/", "a///"));
		assert!(!matches("a/b/c", "a/b"));
		assert!(!matches("a/b", "a/b/c"));
	}

	#[test]
	fn matches_reserved_topics() {
		assert!(!matches("+", "$SYS"));
		assert!(!matches("+/uptime", "$SYS/uptime"));
		assert!(matches("$SYS/#", "$SYS/uptime"));
		assert!(matches("$SYS/+", "$SYS/uptime"));
	}

	#[test]
	fn scores_matches() {
		let filter = Filter::from_static("a/b/#");
		assert_eq!(
			filter.matches_topic(Topic::from_static("a/b/c/d")),
			Some(Matches {
				exact: 2,
				wildcard: 0,
				multi_wildcard: 2
			})
		);

		let filter = Filter::from_static("+/+/c/#");
		assert_eq!(filter.matches_topic(Topic::from_static("a/b/cd/e")), None);
		assert_eq!(
			filter.matches_topic(Topic::from_static("//c//")),
			Some(Matches {
				exact: 1,
				wildcard: 2,
				multi_wildcard: 2
			})
		);

		let exact = Filter::from_static("a/b").matches_topic(Topic::from_static("a/b"));
		let wildcard = Filter::from_static("a/+").matches_topic(Topic::from_static("a/b"));
		assert!(exact.unwrap().score() > wildcard.unwrap().score());
	}
}
