use core::{borrow, fmt, ops};

const LEVEL_SEPARATOR: char = '/';
const WILDCARDS: [char; 2] = ['+', '#'];

/// A topic name, as carried by Publish packets.
///
/// Unlike a [`Filter`](crate::Filter), a topic may not contain wildcards.
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Topic(str);

/// An owned topic name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicBuf(String);

#[derive(Debug, thiserror::Error)]
pub enum InvalidTopic {
	#[error("topic cannot be empty")]
	Empty,
	#[error("topic cannot exceed maximum length for an MQTT string (65,535 bytes)")]
	TooLong,
	#[error("topic cannot contain wildcard '{1}' (at {0})")]
	InvalidCharacter(usize, char),
}

impl Topic {
	/// Validates `topic` and borrows it as a `Topic`.
	pub fn new<S: AsRef<str> + ?Sized>(topic: &S) -> Result<&Topic, InvalidTopic> {
		let topic = topic.as_ref();

		if topic.is_empty() {
			return Err(InvalidTopic::Empty);
		}

		if topic.len() > u16::MAX as usize {
			return Err(InvalidTopic::TooLong);
		}

		if let Some((position, character)) = topic.char_indices().find(|(_, c)| WILDCARDS.contains(c)) {
			return Err(InvalidTopic::InvalidCharacter(position, character));
		}

		Ok(Self::from_str(topic))
	}

	/// Creates a Topic from an `&'static str` without validating it.
	#[inline]
	pub const fn from_static(topic: &'static str) -> &'static Topic {
		Self::from_str(topic)
	}

	#[inline]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Always `false` for a validated topic.
	#[inline]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	#[inline]
	pub const fn as_str(&self) -> &str {
		&self.0
	}

	/// Returns an iterator over the `/` separated levels of the topic.
	#[inline]
	pub fn levels(&self) -> impl Iterator<Item = &str> {
		self.0.split(LEVEL_SEPARATOR)
	}

	/// Topics beginning with `$` are reserved for broker use and are hidden
	/// from filters starting with a wildcard.
	#[inline]
	pub fn is_reserved(&self) -> bool {
		self.0.starts_with('$')
	}

	#[inline]
	pub fn to_topic_buf(&self) -> TopicBuf {
		TopicBuf(String::from(&self.0))
	}

	const fn from_str(s: &str) -> &Self {
		// SAFETY: Topic is a transparent wrapper around str.
		unsafe { &*(s as *const str as *const Topic) }
	}
}

impl TopicBuf {
	pub fn new(topic: impl Into<String>) -> Result<Self, InvalidTopic> {
		let topic = topic.into();
		Topic::new(&topic)?;
		Ok(Self(topic))
	}

	#[inline]
	pub fn into_inner(self) -> String {
		self.0
	}
}

impl AsRef<str> for Topic {
	#[inline]
	fn as_ref(&self) -> &str {
		self.as_str()
	}
}

impl AsRef<Topic> for Topic {
	#[inline]
	fn as_ref(&self) -> &Topic {
		self
	}
}

impl ToOwned for Topic {
	type Owned = TopicBuf;
	#[inline]
	fn to_owned(&self) -> Self::Owned {
		self.to_topic_buf()
	}
}

impl fmt::Display for Topic {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

impl ops::Deref for TopicBuf {
	type Target = Topic;
	#[inline]
	fn deref(&self) -> &Self::Target {
		Topic::from_str(&self.0)
	}
}

impl borrow::Borrow<Topic> for TopicBuf {
	#[inline]
	fn borrow(&self) -> &Topic {
		self
	}
}

impl AsRef<Topic> for TopicBuf {
	#[inline]
	fn as_ref(&self) -> &Topic {
		self
	}
}

impl AsRef<str> for TopicBuf {
	#[inline]
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl From<&Topic> for TopicBuf {
	#[inline]
	fn from(value: &Topic) -> Self {
		value.to_topic_buf()
	}
}

impl TryFrom<&str> for TopicBuf {
	type Error = InvalidTopic;
	#[inline]
	fn try_from(value: &str) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl TryFrom<&String> for TopicBuf {
	type Error = InvalidTopic;
	#[inline]
	fn try_from(value: &String) -> Result<Self, Self::Error> {
		Self::new(value.as_str())
	}
}

impl TryFrom<String> for TopicBuf {
	type Error = InvalidTopic;
	#[inline]
	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}

impl fmt::Display for TopicBuf {
	#[inline]
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

#[cfg(test)]
mod tests {
	use super::{InvalidTopic, Topic};

	#[test]
	fn parses_topics() {
		for topic in ["a", "/", "a/", "/b", "a//b", "$SYS/uptime"] {
			Topic::new(topic).unwrap();
		}

		assert!(matches!(Topic::new(""), Err(InvalidTopic::Empty)));
		assert!(matches!(
			Topic::new("a/+/c"),
			Err(InvalidTopic::InvalidCharacter(2, '+'))
		));
		assert!(matches!(
			Topic::new("a/#"),
			Err(InvalidTopic::InvalidCharacter(2, '#'))
		));
	}

	#[test]
	fn splits_levels() {
		let levels: Vec<_> = Topic::from_static("a//c/").levels().collect();
		assert_eq!(levels, ["a", "", "c", ""]);
	}
}
