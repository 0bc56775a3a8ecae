//! The diagnostics text handed back with every build.

use std::fmt::{self, Display};

/// The capacity of a [`BuildReport`] in bytes.
pub const REPORT_CAPACITY: usize = 128;

/// Human readable diagnostics of a build, bounded to [`REPORT_CAPACITY`] bytes.
///
/// Entries are joined with `"; "`. Once the capacity is reached further entries are dropped and
/// [`BuildReport::is_truncated`] returns `true`. Errors and the final summary are placed in front
/// of the collected warnings so that they survive truncation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BuildReport {
    text: String,
    truncated: bool,
    warning_count: usize,
}

impl BuildReport {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// The report text.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether entries were cut off to stay within [`REPORT_CAPACITY`].
    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Number of warnings recorded, including those that no longer fit into the text.
    #[inline]
    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    /// Records a non-fatal condition.
    pub fn warn(&mut self, message: impl Display) {
        self.warning_count += 1;
        self.append(&format!("warning: {message}"));
    }

    /// Records the failure of a build.
    pub fn error(&mut self, message: impl Display) {
        self.prepend(&format!("error: {message}"));
    }

    /// Records the outcome of a successful build.
    pub fn summary(&mut self, message: impl Display) {
        self.prepend(&message.to_string());
    }

    fn append(&mut self, entry: &str) {
        if self.truncated {
            return;
        }
        if !self.text.is_empty() {
            self.text.push_str("; ");
        }
        self.text.push_str(entry);
        self.clamp();
    }

    fn prepend(&mut self, entry: &str) {
        let mut text = entry.to_owned();
        if !self.text.is_empty() {
            text.push_str("; ");
            text.push_str(&self.text);
        }
        self.text = text;
        self.clamp();
    }

    fn clamp(&mut self) {
        if self.text.len() <= REPORT_CAPACITY {
            return;
        }
        let mut end = REPORT_CAPACITY;
        while !self.text.is_char_boundary(end) {
            end -= 1;
        }
        self.text.truncate(end);
        self.truncated = true;
    }
}

impl Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for BuildReport {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_joined() {
        let mut report = BuildReport::new();
        report.warn("first");
        report.warn("second");
        assert_eq!(report.as_str(), "warning: first; warning: second");
        assert_eq!(report.warning_count(), 2);
        assert!(!report.is_truncated());
    }

    #[test]
    fn text_is_capped_at_the_capacity() {
        let mut report = BuildReport::new();
        for i in 0..20 {
            report.warn(format_args!("region {i} merged"));
        }
        assert!(report.as_str().len() <= REPORT_CAPACITY);
        assert!(report.is_truncated());
        assert_eq!(report.warning_count(), 20);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut report = BuildReport::new();
        report.warn("ü".repeat(100));
        assert!(report.as_str().len() <= REPORT_CAPACITY);
        assert!(report.as_str().ends_with('ü'));
    }

    #[test]
    fn errors_survive_a_full_report() {
        let mut report = BuildReport::new();
        for _ in 0..20 {
            report.warn("filler");
        }
        report.error("invalid geometry");
        assert!(report.as_str().starts_with("error: invalid geometry"));
        assert!(report.as_str().len() <= REPORT_CAPACITY);
    }
}
