//! String cleanup helpers and lambda-style extension trait.

/// Cleans an optional string: trims whitespace and turns an empty result into `None`.
///
/// # Example
/// ```ignore
/// let host = clean_optional_string(req.fe_host.as_ref());
/// // equivalent to:
/// // req.fe_host.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
/// ```
#[inline]
pub fn clean_optional_string(s: Option<&String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Trims leading and trailing whitespace, returning an owned `String`.
#[inline]
pub fn trim_string(s: &str) -> String {
    s.trim().to_string()
}

pub trait StringExt {
    /// Trims and returns `None` for an empty result.
    fn clean(&self) -> Option<String>;

    /// Trims and returns the cleaned string, empty if absent.
    fn trimmed(&self) -> String;
}

impl StringExt for str {
    #[inline]
    fn clean(&self) -> Option<String> {
        let trimmed = self.trim();
        if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
    }

    #[inline]
    fn trimmed(&self) -> String {
        self.trim().to_string()
    }
}

impl StringExt for String {
    #[inline]
    fn clean(&self) -> Option<String> {
        self.as_str().clean()
    }

    #[inline]
    fn trimmed(&self) -> String {
        self.as_str().trimmed()
    }
}

impl<T: AsRef<str>> StringExt for Option<T> {
    #[inline]
    fn clean(&self) -> Option<String> {
        self.as_ref().and_then(|s| s.as_ref().clean())
    }

    #[inline]
    fn trimmed(&self) -> String {
        self.as_ref().map(|s| s.as_ref().trim().to_string()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_drops_empty_and_whitespace_only() {
        assert_eq!("  ".clean(), None);
        assert_eq!("  hi  ".clean(), Some("hi".to_string()));
    }
}
