//! Topic names.
//!
//! The broker treats topics as opaque exact-match keys. The HTTP layer
//! composes them from an application name and a stream name as
//! `"<app>/<stream>"`, validating each segment before touching the broker.

use thiserror::Error;

/// Maximum length of one `app` or `stream` segment in bytes.
pub const MAX_SEGMENT_LENGTH: usize = 128;

/// Separator between the application and stream segments.
pub const SEPARATOR: char = '/';

/// Topic validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    /// Segment is empty.
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// Segment is too long.
    #[error("{0} too long: {1} bytes")]
    TooLong(&'static str, usize),

    /// Contains control or non-ASCII characters.
    #[error("{0} contains invalid characters")]
    InvalidCharacters(&'static str),

    /// A segment contains the separator.
    #[error("{0} cannot contain '/'")]
    ContainsSeparator(&'static str),
}

fn check(kind: &'static str, value: &str, max: usize) -> Result<(), TopicError> {
    if value.is_empty() {
        return Err(TopicError::Empty(kind));
    }
    if value.len() > max {
        return Err(TopicError::TooLong(kind, value.len()));
    }
    if !value.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err(TopicError::InvalidCharacters(kind));
    }
    Ok(())
}

/// Compose the topic for a stream of an application.
///
/// # Errors
///
/// Returns an error if either segment is invalid.
pub fn stream_topic(app: &str, stream: &str) -> Result<String, TopicError> {
    for (kind, segment) in [("app", app), ("stream", stream)] {
        check(kind, segment, MAX_SEGMENT_LENGTH)?;
        if segment.contains(SEPARATOR) {
            return Err(TopicError::ContainsSeparator(kind));
        }
    }
    Ok(format!("{app}{SEPARATOR}{stream}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_topic() {
        assert_eq!(stream_topic("live", "cam1").unwrap(), "live/cam1");
    }

    #[test]
    fn test_stream_topic_rejects_bad_segments() {
        assert_eq!(stream_topic("", "cam1"), Err(TopicError::Empty("app")));
        assert_eq!(
            stream_topic("live", "a/b"),
            Err(TopicError::ContainsSeparator("stream"))
        );
        assert_eq!(
            stream_topic("live", "tab\there"),
            Err(TopicError::InvalidCharacters("stream"))
        );

        let long = "a".repeat(MAX_SEGMENT_LENGTH + 1);
        assert!(matches!(
            stream_topic(&long, "cam1"),
            Err(TopicError::TooLong("app", _))
        ));
    }

    #[test]
    fn test_stream_topic_accepts_longest_segments() {
        let longest = "a".repeat(MAX_SEGMENT_LENGTH);
        let topic = stream_topic(&longest, &longest).unwrap();
        assert_eq!(topic.len(), MAX_SEGMENT_LENGTH * 2 + 1);
        assert_eq!(topic.split(SEPARATOR).count(), 2);
    }

    #[test]
    fn test_stream_topic_rejects_non_ascii() {
        assert_eq!(
            stream_topic("live", "caméra"),
            Err(TopicError::InvalidCharacters("stream"))
        );
    }
}
