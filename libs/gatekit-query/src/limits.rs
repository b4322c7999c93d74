//! Page size limits.

use crate::Error;

/// Page size applied when a request does not ask for one.
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Largest page size a request may ask for.
pub const MAX_PAGE_SIZE: u64 = 100;

/// Limits applied to the requested page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_size: u64,
    pub max_size: u64,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_size: DEFAULT_PAGE_SIZE,
            max_size: MAX_PAGE_SIZE,
        }
    }
}

impl PageLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_default_size(mut self, size: u64) -> Self {
        self.default_size = size;
        self
    }

    #[must_use]
    pub fn with_max_size(mut self, size: u64) -> Self {
        self.max_size = size;
        self
    }

    /// Resolve the requested page size. Absent (or zero) falls back to the
    /// default; a request above the maximum is rejected rather than clamped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCount`] when the request exceeds `max_size`.
    pub fn resolve(&self, requested: Option<u64>) -> Result<u64, Error> {
        match requested {
            None | Some(0) => Ok(self.default_size),
            Some(count) if count > self.max_size => Err(Error::InvalidCount(format!(
                "{count} exceeds the maximum of {}",
                self.max_size
            ))),
            Some(count) => Ok(count),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_absent_count_uses_default() {
        let limits = PageLimits::new();
        assert_eq!(limits.resolve(None).unwrap(), 20);
        assert_eq!(limits.resolve(Some(0)).unwrap(), 20);
    }

    #[test]
    fn test_explicit_count_passes() {
        assert_eq!(PageLimits::new().resolve(Some(100)).unwrap(), 100);
    }

    #[test]
    fn test_over_max_is_rejected_not_clamped() {
        let err = PageLimits::new().resolve(Some(150)).unwrap_err();
        assert!(matches!(err, Error::InvalidCount(m) if m.contains("150")));
    }

    #[test]
    fn test_limits_are_tunable() {
        let limits = PageLimits::new().with_default_size(5).with_max_size(10);
        assert_eq!(limits.resolve(None).unwrap(), 5);
        assert!(limits.resolve(Some(11)).is_err());
    }
}
