//! Devicetree structure block lexer.
//!
//! The structure block is a sequence of 4-byte aligned big-endian tokens:
//! `BEGIN_NODE` followed by the nul-terminated unit name, `PROP` followed by a
//! [`PropHeader`] and the value, `END_NODE`, `NOP` and a final `END`. Property
//! names live in the strings block and are referenced by offset.
//!
//! [`StructLexer`] walks the tokens of a structure block while tracking the
//! offset of the next token, which is what node handles and in-place edits are
//! built on.

use core::{iter::FusedIterator, str::Utf8Error};

use dataview::{DataView, Pod};
use platform_cast::CastFrom as _;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use snafu_utils::Location;

use crate::{
    layout::{PropHeader, StructToken, token_aligned},
    property::Property,
};

/// Errors that can occur while tokenizing a structure block.
#[derive(Debug, Clone, Snafu)]
#[snafu(module)]
pub enum StructLexerError {
    #[snafu(display("invalid token: {token:#x} at offset {offset}"))]
    InvalidToken {
        token: u32,
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid string in structure block at offset {offset}"))]
    InvalidStringInStructBlock {
        offset: usize,
        #[snafu(source)]
        source: Utf8Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid string in strings block at offset {offset}"))]
    InvalidStringInStringsBlock {
        offset: usize,
        #[snafu(source)]
        source: Utf8Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("missing prop header at offset {offset}"))]
    MissingPropHeader {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("unexpected end of struct block at offset {offset}"))]
    UnexpectedEndOfStructBlock {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("unexpected end of strings block at offset {offset}"))]
    UnexpectedEndOfStringsBlock {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// A token of the structure block together with its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructTokenWithData<'fdt> {
    /// Start of a node (name and optional unit address)
    BeginNode {
        name: &'fdt str,
        address: Option<&'fdt str>,
    },
    EndNode,
    Prop(Property<'fdt>),
    Nop,
    /// End of the structure block
    End,
}

/// Iterator over the tokens of a structure block.
#[derive(Debug, Clone)]
pub struct StructLexer<'fdt> {
    struct_block: &'fdt [u8],
    strings_block: &'fdt [u8],
    offset: usize,
}

impl<'fdt> StructLexer<'fdt> {
    #[must_use]
    pub(crate) fn new(struct_block: &'fdt [u8], strings_block: &'fdt [u8], offset: usize) -> Self {
        Self {
            struct_block,
            strings_block,
            offset,
        }
    }

    /// Offset of the next token, relative to the start of the structure block.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'fdt> Iterator for StructLexer<'fdt> {
    type Item = Result<StructTokenWithData<'fdt>, StructLexerError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_token_and_data().transpose()
    }
}

impl FusedIterator for StructLexer<'_> {}

impl<'fdt> StructLexer<'fdt> {
    fn read_token_and_data(
        &mut self,
    ) -> Result<Option<StructTokenWithData<'fdt>>, StructLexerError> {
        #[expect(clippy::wildcard_imports)]
        use self::struct_lexer_error::*;

        let token_offset = self.offset;
        let Some(token) = self.read_ty::<StructToken>() else {
            return Ok(None);
        };

        let entry = match token.value() {
            StructToken::BEGIN_NODE => {
                let unit_name = self.read_null_terminated_string()?;
                self.skip_token_padding();
                let (name, address) = unit_name
                    .split_once('@')
                    .map_or((unit_name, None), |(name, address)| (name, Some(address)));
                StructTokenWithData::BeginNode { name, address }
            }
            StructToken::END_NODE => StructTokenWithData::EndNode,
            StructToken::PROP => {
                let prop_header = self.read_prop_header()?;
                let name = self.read_name(usize::cast_from(prop_header.nameoff.read()))?;
                let value = self.read_bytes(usize::cast_from(prop_header.len.read()))?;
                self.skip_token_padding();
                StructTokenWithData::Prop(Property::new(name, value))
            }
            StructToken::NOP => StructTokenWithData::Nop,
            StructToken::END => StructTokenWithData::End,
            token => {
                return InvalidTokenSnafu {
                    token,
                    offset: token_offset,
                }
                .fail();
            }
        };

        Ok(Some(entry))
    }

    fn read_ty<T>(&mut self) -> Option<T>
    where
        T: Pod,
    {
        let value = DataView::from(self.struct_block).try_read::<T>(self.offset)?;
        self.offset += size_of::<T>();
        Some(value)
    }

    fn read_prop_header(&mut self) -> Result<PropHeader, StructLexerError> {
        #[expect(clippy::wildcard_imports)]
        use self::struct_lexer_error::*;

        let offset = self.offset;
        self.read_ty().context(MissingPropHeaderSnafu { offset })
    }

    fn read_null_terminated_string(&mut self) -> Result<&'fdt str, StructLexerError> {
        #[expect(clippy::wildcard_imports)]
        use self::struct_lexer_error::*;

        let offset = self.offset;
        let bytes = self
            .struct_block
            .get(offset..)
            .and_then(|rest| rest.iter().position(|&b| b == 0).map(|len| &rest[..len]))
            .context(UnexpectedEndOfStructBlockSnafu { offset })?;
        self.offset += bytes.len() + 1;
        str::from_utf8(bytes).context(InvalidStringInStructBlockSnafu { offset })
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'fdt [u8], StructLexerError> {
        #[expect(clippy::wildcard_imports)]
        use self::struct_lexer_error::*;

        let offset = self.offset;
        let bytes = offset
            .checked_add(len)
            .and_then(|end| self.struct_block.get(offset..end))
            .context(UnexpectedEndOfStructBlockSnafu { offset })?;
        self.offset += len;
        Ok(bytes)
    }

    fn read_name(&self, nameoff: usize) -> Result<&'fdt str, StructLexerError> {
        #[expect(clippy::wildcard_imports)]
        use self::struct_lexer_error::*;

        let bytes = self
            .strings_block
            .get(nameoff..)
            .and_then(|rest| rest.iter().position(|&b| b == 0).map(|len| &rest[..len]))
            .context(UnexpectedEndOfStringsBlockSnafu { offset: nameoff })?;
        str::from_utf8(bytes).context(InvalidStringInStringsBlockSnafu { offset: nameoff })
    }

    fn skip_token_padding(&mut self) {
        self.offset = token_aligned(self.offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(value: u32) -> [u8; 4] {
        value.to_be_bytes()
    }

    #[test]
    fn test_lexes_node_and_property() {
        let strings = b"compatible\0";
        let mut block = vec![];
        block.extend(token(StructToken::BEGIN_NODE));
        block.extend(b"uart@9000000\0\0\0\0");
        block.extend(token(StructToken::PROP));
        block.extend(3_u32.to_be_bytes());
        block.extend(0_u32.to_be_bytes());
        block.extend(b"ns\0\0");
        block.extend(token(StructToken::NOP));
        block.extend(token(StructToken::END_NODE));
        block.extend(token(StructToken::END));

        let mut lexer = StructLexer::new(&block, strings, 0);
        assert_eq!(
            lexer.next().unwrap().unwrap(),
            StructTokenWithData::BeginNode {
                name: "uart",
                address: Some("9000000"),
            }
        );
        assert_eq!(lexer.offset(), 20);
        assert_eq!(
            lexer.next().unwrap().unwrap(),
            StructTokenWithData::Prop(Property::new("compatible", b"ns\0"))
        );
        assert_eq!(lexer.offset(), 36);
        assert_eq!(lexer.next().unwrap().unwrap(), StructTokenWithData::Nop);
        assert_eq!(lexer.next().unwrap().unwrap(), StructTokenWithData::EndNode);
        assert_eq!(lexer.next().unwrap().unwrap(), StructTokenWithData::End);
        assert!(lexer.next().is_none());
    }

    #[test]
    fn test_invalid_token() {
        let block = token(0x42);
        let mut lexer = StructLexer::new(&block, &[], 0);
        let err = lexer.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            StructLexerError::InvalidToken {
                token: 0x42,
                offset: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_property_value_past_block_end() {
        let mut block = vec![];
        block.extend(token(StructToken::PROP));
        block.extend(64_u32.to_be_bytes());
        block.extend(0_u32.to_be_bytes());
        let mut lexer = StructLexer::new(&block, b"reg\0", 0);
        let err = lexer.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            StructLexerError::UnexpectedEndOfStructBlock { offset: 12, .. }
        ));
    }

    #[test]
    fn test_name_offset_past_strings_block() {
        let mut block = vec![];
        block.extend(token(StructToken::PROP));
        block.extend(0_u32.to_be_bytes());
        block.extend(10_u32.to_be_bytes());
        let mut lexer = StructLexer::new(&block, b"reg\0", 0);
        let err = lexer.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            StructLexerError::UnexpectedEndOfStringsBlock { offset: 10, .. }
        ));
    }

    #[test]
    fn test_unterminated_node_name() {
        let mut block = vec![];
        block.extend(token(StructToken::BEGIN_NODE));
        block.extend(b"memory");
        let mut lexer = StructLexer::new(&block, &[], 0);
        assert!(matches!(
            lexer.next().unwrap().unwrap_err(),
            StructLexerError::UnexpectedEndOfStructBlock { offset: 4, .. }
        ));
    }
}
