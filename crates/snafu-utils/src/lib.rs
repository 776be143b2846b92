//! Helpers shared by the snafu error types of this workspace.
//!
//! [`Location`] is captured implicitly by every error variant
//! (`#[snafu(implicit)]`), and [`Report`] renders an error together with its
//! `source()` chain for the fatal-error path of the boot stub.

#![cfg_attr(not(test), no_std)]

use core::{error::Error, fmt};

use ansi_term::{Color, WithFg};
use snafu::GenerateImplicitData;

/// Source location at which an error was constructed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(&'static core::panic::Location<'static>);

impl Location {
    #[must_use]
    pub fn file(&self) -> &'static str {
        self.0.file()
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.0.line()
    }
}

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(core::panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Renders an error and every error in its `source()` chain.
pub struct Report<E> {
    error: E,
}

impl<E> Report<E> {
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E> fmt::Debug for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<E> fmt::Display for Report<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", WithFg::new(Color::Red, &self.error))?;
        let mut source = self.error.source();
        if source.is_some() {
            writeln!(f)?;
            writeln!(f, "Caused by:")?;
        }
        let mut index = 0;
        while let Some(s) = source {
            writeln!(f, "{index:4}: {}", WithFg::new(Color::Red, s))?;
            source = s.source();
            index += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use snafu::{ResultExt as _, Snafu};

    use super::*;

    #[derive(Debug, Snafu)]
    #[snafu(display("node not found"))]
    struct InnerError {
        #[snafu(implicit)]
        location: Location,
    }

    #[derive(Debug, Snafu)]
    #[snafu(display("failed to load component"))]
    struct OuterError {
        #[snafu(source)]
        source: InnerError,
        #[snafu(implicit)]
        location: Location,
    }

    fn fail() -> Result<(), OuterError> {
        Err(InnerSnafu.build()).context(OuterSnafu)
    }

    #[test]
    fn test_location_points_at_this_file() {
        let err = InnerSnafu.build();
        assert!(err.location.file().ends_with("lib.rs"));
        assert!(err.location.line() > 0);
    }

    #[test]
    fn test_report_lists_source_chain() {
        let err = fail().unwrap_err();
        let report = Report::new(err).to_string();
        assert!(report.starts_with("Error: "));
        assert!(report.contains("failed to load component"));
        assert!(report.contains("Caused by:"));
        assert!(report.contains("   0: "));
        assert!(report.contains("node not found"));
    }

    #[test]
    fn test_report_without_source() {
        let report = Report::new(InnerSnafu.build()).to_string();
        assert!(!report.contains("Caused by:"));
    }
}
