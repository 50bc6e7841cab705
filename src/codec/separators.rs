//! Separator configuration shared by a `ReadResult` and all of its tags

use super::{CodecError, CodecResult};

/// Escape character prefixed to separator characters occurring inside fields
pub const ESCAPE: char = '\\';

/// Time, field and value separators of the reading stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Separators {
    time: String,
    field: String,
    value: String,
}

impl Separators {
    /// Validate and build a separator set
    ///
    /// Separators must be non-empty, pairwise distinct and free of the escape
    /// character and of the characters numbers start with; none may be a
    /// prefix of another.
    pub fn new(
        time: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> CodecResult<Self> {
        let seps = Self {
            time: time.into(),
            field: field.into(),
            value: value.into(),
        };

        let all = [
            ("time", &seps.time),
            ("field", &seps.field),
            ("value", &seps.value),
        ];

        for (name, sep) in all.iter() {
            if sep.is_empty() {
                return Err(CodecError::InvalidSeparators(format!(
                    "{} separator is empty",
                    name
                )));
            }
            if sep.contains(ESCAPE) {
                return Err(CodecError::InvalidSeparators(format!(
                    "{} separator contains the escape character",
                    name
                )));
            }
            if let Some(c) = sep.chars().find(|c| is_number_start(*c)) {
                return Err(CodecError::InvalidSeparators(format!(
                    "{} separator contains '{}', which can start a number",
                    name, c
                )));
            }
        }

        for (i, (a_name, a)) in all.iter().enumerate() {
            for (b_name, b) in all.iter().skip(i + 1) {
                if a.starts_with(b.as_str()) || b.starts_with(a.as_str()) {
                    return Err(CodecError::InvalidSeparators(format!(
                        "{} separator '{}' clashes with {} separator '{}'",
                        a_name, a, b_name, b
                    )));
                }
            }
        }

        Ok(seps)
    }

    pub fn time(&self) -> &str {
        &self.time
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// True if `c` must be escaped inside a field
    pub(crate) fn is_reserved(&self, c: char) -> bool {
        c == ESCAPE || self.time.contains(c) || self.field.contains(c) || self.value.contains(c)
    }
}

fn is_number_start(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '+' | '-' | '.')
}

impl Default for Separators {
    fn default() -> Self {
        Self {
            time: ":".to_string(),
            field: "|".to_string(),
            value: ",".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_separators() {
        let seps = Separators::default();
        assert_eq!(seps.time(), ":");
        assert_eq!(seps.field(), "|");
        assert_eq!(seps.value(), ",");
    }

    #[test]
    fn test_multi_char_separators() {
        let seps = Separators::new("=>", "||", ";;").unwrap();
        assert!(seps.is_reserved('='));
        assert!(seps.is_reserved(';'));
        assert!(seps.is_reserved('\\'));
        assert!(!seps.is_reserved('a'));
    }

    #[test]
    fn test_invalid_separators() {
        assert!(Separators::new("", "|", ",").is_err());
        assert!(Separators::new(":", ":", ",").is_err());
        assert!(Separators::new(":", "::", ",").is_err());
        assert!(Separators::new("\\", "|", ",").is_err());
    }

    #[test]
    fn test_number_characters_are_rejected() {
        assert!(Separators::new("-", "|", ",").is_err());
        assert!(Separators::new(":", ".", ",").is_err());
        assert!(Separators::new(":", "|", "0").is_err());
        assert!(Separators::new(":", "|", "+;").is_err());
    }
}
