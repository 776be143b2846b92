//! Devicetree property values.
//!
//! Property values are raw byte strings whose interpretation depends on the
//! property. The helpers here cover the encodings the boot path reads:
//!
//! - `<u32>` and `<u64>`: big-endian integers
//! - `<cells>`: one or two big-endian 32-bit cells (e.g. `linux,initrd-start`)
//! - `<string>`: a nul-terminated UTF-8 string
//! - `<stringlist>`: nul-terminated strings concatenated (e.g. `compatible`)

use core::{fmt, iter::FusedIterator, str::Utf8Error};

use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};
use snafu_utils::Location;

#[derive(Debug, Snafu)]
pub enum ParsePropertyValueError {
    #[snafu(display("empty value"))]
    EmptyValue {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("missing nul in <string>"))]
    MissingNulInString {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid <string>: {source}"))]
    Utf8 {
        #[snafu(source)]
        source: Utf8Error,
    },
    #[snafu(display("invalid value length. expected: {expected}, actual: {actual}"))]
    InvalidValueLength { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Property<'a> {
    name: &'a str,
    value: &'a [u8],
}

impl<'a> Property<'a> {
    #[must_use]
    pub fn new(name: &'a str, value: &'a [u8]) -> Self {
        Self { name, value }
    }

    #[must_use]
    pub fn name(&self) -> &'a str {
        self.name
    }

    #[must_use]
    pub fn raw_value(&self) -> &'a [u8] {
        self.value
    }

    /// Fails with [`ParsePropertyValueError::EmptyValue`] if the value has no
    /// bytes.
    pub fn non_empty_value(&self) -> Result<&'a [u8], ParsePropertyValueError> {
        ensure!(!self.value.is_empty(), EmptyValueSnafu);
        Ok(self.value)
    }

    /// Parses the property value as a fixed-size byte array.
    pub fn value_as_array<const N: usize>(&self) -> Result<[u8; N], ParsePropertyValueError> {
        self.value.try_into().map_or_else(
            |_| {
                Err(InvalidValueLengthSnafu {
                    expected: N,
                    actual: self.value.len(),
                }
                .build())
            },
            Ok,
        )
    }

    /// Parses the property value as a 32-bit big-endian integer.
    pub fn value_as_u32(&self) -> Result<u32, ParsePropertyValueError> {
        Ok(u32::from_be_bytes(self.value_as_array()?))
    }

    /// Parses the property value as a 64-bit big-endian integer.
    pub fn value_as_u64(&self) -> Result<u64, ParsePropertyValueError> {
        Ok(u64::from_be_bytes(self.value_as_array()?))
    }

    /// Parses the property value as one or two 32-bit cells, most significant
    /// cell first.
    pub fn value_as_cells(&self) -> Result<u64, ParsePropertyValueError> {
        ensure!(
            matches!(self.value.len(), 4 | 8),
            InvalidValueLengthSnafu {
                expected: 8_usize,
                actual: self.value.len(),
            }
        );
        endian::read_cells(self.value).context(InvalidValueLengthSnafu {
            expected: 8_usize,
            actual: self.value.len(),
        })
    }

    /// Parses the property value as a null-terminated string.
    pub fn value_as_string(&self) -> Result<&'a str, ParsePropertyValueError> {
        let end = self
            .value
            .iter()
            .position(|b| *b == b'\0')
            .context(MissingNulInStringSnafu)?;
        let bytes = &self.value[..end];
        let s = str::from_utf8(bytes).context(Utf8Snafu)?;
        Ok(s)
    }

    /// Parses the property value as a list of null-terminated strings.
    pub fn value_as_string_list(&self) -> Result<StringList<'a>, ParsePropertyValueError> {
        let end = self
            .value
            .iter()
            .rposition(|b| *b == b'\0')
            .context(MissingNulInStringSnafu)?;
        let bytes = &self.value[..=end];
        let s = str::from_utf8(bytes).context(Utf8Snafu)?;
        Ok(StringList { value: s })
    }
}

/// A list of null-terminated strings from a Devicetree property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringList<'a> {
    value: &'a str,
}

impl<'a> StringList<'a> {
    #[must_use]
    pub fn iter(&self) -> StringListIter<'a> {
        StringListIter { value: self.value }
    }
}

impl<'a> IntoIterator for StringList<'a> {
    type Item = &'a str;

    type IntoIter = StringListIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for &StringList<'a> {
    type Item = &'a str;

    type IntoIter = StringListIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for StringList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.iter();
        if let Some(s) = iter.next() {
            write!(f, "{s:?}")?;
        }
        for s in iter {
            write!(f, ", {s:?}")?;
        }
        Ok(())
    }
}

/// Iterator over individual strings in a [`StringList`].
#[derive(Debug, Clone)]
pub struct StringListIter<'a> {
    value: &'a str,
}

impl<'a> Iterator for StringListIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        // `value` always ends with a nul, so `split_once` only fails when empty.
        let (s, rest) = self.value.split_once('\0')?;
        self.value = rest;
        Some(s)
    }
}

impl FusedIterator for StringListIter<'_> {}
