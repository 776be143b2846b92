use ansi_term::{Color, WithFg};
use snafu_utils::Report;

/// Prints `err` with its chain of causes and stops the boot.
#[track_caller]
pub fn report<E>(err: E) -> !
where
    E: core::error::Error,
{
    let panic_message = WithFg::new(Color::Red, "Boot failed");
    let report = Report::new(err);
    panic!("{panic_message}\n\n{report}");
}
