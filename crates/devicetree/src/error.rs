use arrayvec::ArrayString;
use snafu::Snafu;
use snafu_utils::Location;

use crate::{
    layout::HeaderValidationError, property::ParsePropertyValueError,
    struct_lexer::StructLexerError,
};

/// Maximum number of bytes of a node path or property name kept in an error.
pub const NAME_CAPACITY: usize = 64;

/// Node path or property name carried by an error, truncated to
/// [`NAME_CAPACITY`] bytes.
pub type Name = ArrayString<NAME_CAPACITY>;

/// Copies `s` into a [`Name`], dropping whatever does not fit.
#[must_use]
pub fn truncated(s: &str) -> Name {
    let mut end = s.len().min(NAME_CAPACITY);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut name = Name::new();
    name.push_str(&s[..end]);
    name
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DevicetreeError {
    #[snafu(display("invalid devicetree header"))]
    InvalidHeader {
        #[snafu(source)]
        source: HeaderValidationError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("insufficient bytes for devicetree: needed={needed}, actual={actual}"))]
    InsufficientBytes {
        needed: usize,
        actual: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("memory reservation block is not terminated"))]
    UnterminatedMemRsvmap {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid structure block"))]
    InvalidStruct {
        #[snafu(source)]
        source: StructLexerError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("malformed node at structure offset {offset:#x}"))]
    MalformedNode {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid node path: {path:?}"))]
    InvalidPath {
        path: Name,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid node name: {name:?}"))]
    InvalidNodeName {
        name: Name,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("node not found: {path:?}"))]
    NodeNotFound {
        path: Name,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid property name: {name:?}"))]
    InvalidPropertyName {
        name: Name,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("node already exists: {name:?}"))]
    AlreadyExists {
        name: Name,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("property not found: {name:?}"))]
    PropertyMissing {
        name: Name,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("malformed property: {name:?}"))]
    PropertyMalformed {
        name: Name,
        #[snafu(source)]
        source: ParsePropertyValueError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("insufficient devicetree capacity: needed={needed:#x}, available={available:#x}"))]
    InsufficientCapacity {
        needed: usize,
        available: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_truncates_on_char_boundary() {
        assert_eq!(truncated("/images/fdt@1").as_str(), "/images/fdt@1");

        let long = "a".repeat(NAME_CAPACITY - 1) + "é";
        let name = truncated(&long);
        assert_eq!(name.len(), NAME_CAPACITY - 1);
        assert!(name.chars().all(|c| c == 'a'));
    }
}
