//! ANSI foreground colours for serial console output.

#![cfg_attr(not(test), no_std)]

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    DarkGray,
    Default,
}

impl Color {
    fn sgr(self) -> u8 {
        match self {
            Self::Black => 30,
            Self::Red => 31,
            Self::Green => 32,
            Self::Yellow => 33,
            Self::Blue => 34,
            Self::Magenta => 35,
            Self::Cyan => 36,
            Self::White => 37,
            Self::DarkGray => 90,
            Self::Default => 39,
        }
    }
}

/// Displays a value in bold with the given foreground colour.
pub struct WithFg<T>(Color, T);

impl<T> WithFg<T> {
    pub fn new(color: Color, value: T) -> Self {
        Self(color, value)
    }
}

impl<T> fmt::Display for WithFg<T>
where
    T: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1B[{};1m{}\x1B[0m", self.0.sgr(), self.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_fg_wraps_value() {
        let s = format!("{}", WithFg::new(Color::Red, "halt"));
        assert_eq!(s, "\x1B[31;1mhalt\x1B[0m");
    }

    #[test]
    fn test_dark_gray_uses_bright_code() {
        let s = format!("{}", WithFg::new(Color::DarkGray, 7));
        assert_eq!(s, "\x1B[90;1m7\x1B[0m");
    }
}
