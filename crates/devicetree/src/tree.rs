//! Read-only view of a flattened devicetree blob.

use core::{iter::FusedIterator, ops::Range};

use dataview::DataView;
use snafu::{OptionExt as _, ResultExt as _, ensure};

use crate::{
    error::{
        DevicetreeError, InsufficientBytesSnafu, InvalidPathSnafu, InvalidStructSnafu,
        MalformedNodeSnafu, NodeNotFoundSnafu, PropertyMalformedSnafu, PropertyMissingSnafu,
        UnterminatedMemRsvmapSnafu, truncated,
    },
    layout::{self, Header, ReserveEntry},
    property::{Property, StringList},
    struct_lexer::{StructLexer, StructTokenWithData},
};

/// Handle to a node of a [`Devicetree`].
///
/// A handle stays valid until the tree is edited in front of the node. Edits
/// through [`DevicetreeMut`](crate::DevicetreeMut) only insert or resize data
/// inside a node, so the handles of the edited node and of its ancestors
/// survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

/// A validated flattened devicetree borrowed from memory.
///
/// The view covers exactly `totalsize` bytes of the blob. Lookups walk the
/// structure block on demand; nothing is copied or cached.
#[derive(custom_debug_derive::Debug, Clone, Copy)]
pub struct Devicetree<'fdt> {
    header: Header,
    #[debug(skip)]
    blob: &'fdt [u8],
}

impl<'fdt> Devicetree<'fdt> {
    /// Validates the blob at the start of `bytes`.
    ///
    /// `bytes` may extend past the blob; the view is truncated to the
    /// header's `totalsize`.
    pub fn from_bytes(bytes: &'fdt [u8]) -> Result<Self, DevicetreeError> {
        let header = layout::checked_header(bytes)?;
        let totalsize = header.total_size();
        ensure!(
            bytes.len() >= totalsize,
            InsufficientBytesSnafu {
                needed: totalsize,
                actual: bytes.len(),
            }
        );
        let blob = &bytes[..totalsize];
        layout::mem_rsvmap_len(blob, header.mem_rsvmap_offset(), header.struct_offset())
            .context(UnterminatedMemRsvmapSnafu)?;
        Ok(Self { header, blob })
    }

    /// Creates a view over a blob whose header has already been validated.
    pub(crate) fn from_validated(header: Header, blob: &'fdt [u8]) -> Self {
        Self { header, blob }
    }

    #[must_use]
    pub fn header(&self) -> Header {
        self.header
    }

    #[must_use]
    pub fn total_size(&self) -> usize {
        self.blob.len()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &'fdt [u8] {
        self.blob
    }

    /// Returns the offset of `bytes` within the blob, if `bytes` is a
    /// subslice of it.
    #[must_use]
    pub fn offset_of(&self, bytes: &[u8]) -> Option<usize> {
        let start = self.blob.as_ptr().addr();
        let offset = bytes.as_ptr().addr().checked_sub(start)?;
        (offset.checked_add(bytes.len())? <= self.blob.len()).then_some(offset)
    }

    /// Returns the memory reservation entries, excluding the terminator.
    #[must_use]
    pub fn mem_rsvmap(&self) -> MemRsvmapIter<'fdt> {
        MemRsvmapIter {
            block: self.mem_rsvmap_bytes(),
            offset: 0,
        }
    }

    /// Bytes of the memory reservation block, including the terminator.
    pub(crate) fn mem_rsvmap_bytes(&self) -> &'fdt [u8] {
        let start = self.header.mem_rsvmap_offset();
        let len = layout::mem_rsvmap_len(self.blob, start, self.header.struct_offset())
            .unwrap_or_default();
        &self.blob[start..][..len]
    }

    pub(crate) fn struct_block(&self) -> &'fdt [u8] {
        &self.blob[block_range(self.header.struct_offset(), self.header.struct_size())]
    }

    pub(crate) fn strings_block(&self) -> &'fdt [u8] {
        &self.blob[block_range(self.header.strings_offset(), self.header.strings_size())]
    }

    /// Returns an iterator over the tokens of the structure block.
    #[must_use]
    pub fn struct_lexer(&self) -> StructLexer<'fdt> {
        self.lexer_at(0)
    }

    fn lexer_at(&self, offset: usize) -> StructLexer<'fdt> {
        StructLexer::new(self.struct_block(), self.strings_block(), offset)
    }

    /// Returns the root node.
    pub fn root(&self) -> Result<NodeId, DevicetreeError> {
        let root = NodeId(0);
        self.open_node(root)?;
        Ok(root)
    }

    /// Returns the unit name (`name@address`) parts of `node`.
    pub fn node_name(
        &self,
        node: NodeId,
    ) -> Result<(&'fdt str, Option<&'fdt str>), DevicetreeError> {
        let mut lexer = self.lexer_at(node.0);
        match lexer.next().transpose().context(InvalidStructSnafu)? {
            Some(StructTokenWithData::BeginNode { name, address }) => Ok((name, address)),
            _ => MalformedNodeSnafu { offset: node.0 }.fail(),
        }
    }

    /// Returns a lexer positioned right after the `BEGIN_NODE` token of
    /// `node`.
    fn open_node(&self, node: NodeId) -> Result<StructLexer<'fdt>, DevicetreeError> {
        let mut lexer = self.lexer_at(node.0);
        match lexer.next().transpose().context(InvalidStructSnafu)? {
            Some(StructTokenWithData::BeginNode { .. }) => Ok(lexer),
            _ => MalformedNodeSnafu { offset: node.0 }.fail(),
        }
    }

    /// Looks up the direct child of `parent` named `name`.
    ///
    /// A name without a unit address matches the first child with that name
    /// regardless of its unit address.
    pub fn subnode(&self, parent: NodeId, name: &str) -> Result<Option<NodeId>, DevicetreeError> {
        let mut lexer = self.open_node(parent)?;
        let mut depth = 0_usize;
        loop {
            let offset = lexer.offset();
            let token = lexer
                .next()
                .transpose()
                .context(InvalidStructSnafu)?
                .context(MalformedNodeSnafu { offset: parent.0 })?;
            match token {
                StructTokenWithData::BeginNode {
                    name: node_name,
                    address,
                } => {
                    if depth == 0 && unit_name_matches(name, node_name, address) {
                        return Ok(Some(NodeId(offset)));
                    }
                    depth += 1;
                }
                StructTokenWithData::EndNode => {
                    if depth == 0 {
                        return Ok(None);
                    }
                    depth -= 1;
                }
                StructTokenWithData::Prop(_) | StructTokenWithData::Nop => {}
                StructTokenWithData::End => {
                    return MalformedNodeSnafu { offset: parent.0 }.fail();
                }
            }
        }
    }

    /// Resolves an absolute path such as `/images/fdt@1`.
    pub fn find_node(&self, path: &str) -> Result<NodeId, DevicetreeError> {
        ensure!(
            path.starts_with('/'),
            InvalidPathSnafu {
                path: truncated(path)
            }
        );
        let mut node = self.root()?;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            node = self
                .subnode(node, component)?
                .context(NodeNotFoundSnafu {
                    path: truncated(path),
                })?;
        }
        Ok(node)
    }

    /// Finds property `name` of `node` together with the offset of its `PROP`
    /// token.
    pub(crate) fn locate_property(
        &self,
        node: NodeId,
        name: &str,
    ) -> Result<Option<(usize, Property<'fdt>)>, DevicetreeError> {
        let mut lexer = self.open_node(node)?;
        loop {
            let offset = lexer.offset();
            match lexer.next().transpose().context(InvalidStructSnafu)? {
                Some(StructTokenWithData::Prop(prop)) if prop.name() == name => {
                    return Ok(Some((offset, prop)));
                }
                Some(StructTokenWithData::Prop(_) | StructTokenWithData::Nop) => {}
                _ => return Ok(None),
            }
        }
    }

    /// Offset of the first token after the properties of `node`.
    pub(crate) fn properties_end(&self, node: NodeId) -> Result<usize, DevicetreeError> {
        let mut lexer = self.open_node(node)?;
        loop {
            let offset = lexer.offset();
            match lexer.next().transpose().context(InvalidStructSnafu)? {
                Some(StructTokenWithData::Prop(_) | StructTokenWithData::Nop) => {}
                Some(StructTokenWithData::BeginNode { .. } | StructTokenWithData::EndNode) => {
                    return Ok(offset);
                }
                Some(StructTokenWithData::End) | None => {
                    return MalformedNodeSnafu { offset: node.0 }.fail();
                }
            }
        }
    }

    /// Looks up property `name` of `node`, which may have an empty value.
    pub fn find_property(
        &self,
        node: NodeId,
        name: &str,
    ) -> Result<Option<Property<'fdt>>, DevicetreeError> {
        Ok(self.locate_property(node, name)?.map(|(_, prop)| prop))
    }

    /// Returns property `name` of `node`.
    ///
    /// Fails if the property is absent or its value is empty.
    pub fn property(&self, node: NodeId, name: &str) -> Result<Property<'fdt>, DevicetreeError> {
        let prop = self
            .find_property(node, name)?
            .context(PropertyMissingSnafu {
                name: truncated(name),
            })?;
        prop.non_empty_value().context(PropertyMalformedSnafu {
            name: truncated(name),
        })?;
        Ok(prop)
    }

    pub fn property_u32(&self, node: NodeId, name: &str) -> Result<u32, DevicetreeError> {
        self.property(node, name)?
            .value_as_u32()
            .context(PropertyMalformedSnafu {
                name: truncated(name),
            })
    }

    pub fn property_u64(&self, node: NodeId, name: &str) -> Result<u64, DevicetreeError> {
        self.property(node, name)?
            .value_as_u64()
            .context(PropertyMalformedSnafu {
                name: truncated(name),
            })
    }

    /// Reads a one- or two-cell integer property.
    pub fn property_cells(&self, node: NodeId, name: &str) -> Result<u64, DevicetreeError> {
        self.property(node, name)?
            .value_as_cells()
            .context(PropertyMalformedSnafu {
                name: truncated(name),
            })
    }

    pub fn property_str(&self, node: NodeId, name: &str) -> Result<&'fdt str, DevicetreeError> {
        self.property(node, name)?
            .value_as_string()
            .context(PropertyMalformedSnafu {
                name: truncated(name),
            })
    }

    pub fn property_str_list(
        &self,
        node: NodeId,
        name: &str,
    ) -> Result<StringList<'fdt>, DevicetreeError> {
        self.property(node, name)?
            .value_as_string_list()
            .context(PropertyMalformedSnafu {
                name: truncated(name),
            })
    }
}

fn block_range(offset: usize, size: usize) -> Range<usize> {
    offset..offset + size
}

fn unit_name_matches(query: &str, name: &str, address: Option<&str>) -> bool {
    match query.split_once('@') {
        Some((query_name, query_address)) => name == query_name && address == Some(query_address),
        None => name == query,
    }
}

/// Iterator over the memory reservation entries of a [`Devicetree`].
#[derive(Debug, Clone)]
pub struct MemRsvmapIter<'fdt> {
    block: &'fdt [u8],
    offset: usize,
}

impl Iterator for MemRsvmapIter<'_> {
    type Item = ReserveEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = DataView::from(self.block).try_read::<ReserveEntry>(self.offset)?;
        if entry.is_terminator() {
            return None;
        }
        self.offset += size_of::<ReserveEntry>();
        Some(entry)
    }
}

impl FusedIterator for MemRsvmapIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{layout::HeaderValidationError, testing::TreeBuilder};

    fn sample() -> Vec<u8> {
        let mut builder = TreeBuilder::new();
        builder
            .reserve(0x4000_0000, 0x1000)
            .begin_node("")
            .prop_str("model", "virt")
            .prop_u32("#address-cells", 2)
            .begin_node("chosen")
            .prop_u32("linux,initrd-start", 0x4800_0000)
            .prop("empty", &[])
            .end_node()
            .begin_node("memory@40000000")
            .prop_str("device_type", "memory")
            .end_node()
            .begin_node("images")
            .begin_node("fdt@1")
            .nop()
            .prop("data", &[0xd0, 0x0d, 0xfe, 0xed])
            .end_node()
            .begin_node("fdt@2")
            .end_node()
            .end_node()
            .end_node();
        builder.build()
    }

    #[test]
    fn test_from_bytes_truncates_to_total_size() {
        let mut blob = sample();
        let size = blob.len();
        blob.extend([0xff; 32]);
        let tree = Devicetree::from_bytes(&blob).unwrap();
        assert_eq!(tree.total_size(), size);
        assert_eq!(tree.header().version(), 17);
    }

    #[test]
    fn test_from_bytes_rejects_bad_magic() {
        let mut builder = TreeBuilder::new();
        builder.magic(0x1234_5678).begin_node("").end_node();
        let blob = builder.build();
        let err = Devicetree::from_bytes(&blob).unwrap_err();
        assert!(matches!(
            err,
            DevicetreeError::InvalidHeader {
                source: HeaderValidationError::InvalidMagic { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_from_bytes_rejects_short_buffers() {
        let blob = sample();
        assert!(matches!(
            Devicetree::from_bytes(&blob[..20]).unwrap_err(),
            DevicetreeError::InsufficientBytes { needed: 40, .. }
        ));
        assert!(matches!(
            Devicetree::from_bytes(&blob[..blob.len() - 1]).unwrap_err(),
            DevicetreeError::InsufficientBytes { .. }
        ));
    }

    #[test]
    fn test_mem_rsvmap() {
        let blob = sample();
        let tree = Devicetree::from_bytes(&blob).unwrap();
        let entries = tree.mem_rsvmap().collect::<Vec<_>>();
        assert_eq!(entries, [ReserveEntry::new(0x4000_0000, 0x1000)]);
        assert_eq!(tree.mem_rsvmap_bytes().len(), 32);
    }

    #[test]
    fn test_find_node() {
        let blob = sample();
        let tree = Devicetree::from_bytes(&blob).unwrap();
        let root = tree.root().unwrap();
        assert_eq!(tree.find_node("/").unwrap(), root);

        let fdt = tree.find_node("/images/fdt@1").unwrap();
        assert_eq!(tree.node_name(fdt).unwrap(), ("fdt", Some("1")));
        let fdt2 = tree.find_node("/images/fdt@2/").unwrap();
        assert_ne!(fdt, fdt2);

        let memory = tree.find_node("/memory").unwrap();
        assert_eq!(tree.node_name(memory).unwrap(), ("memory", Some("40000000")));
        assert_eq!(tree.find_node("/memory@40000000").unwrap(), memory);
    }

    #[test]
    fn test_find_node_errors() {
        let blob = sample();
        let tree = Devicetree::from_bytes(&blob).unwrap();
        assert!(matches!(
            tree.find_node("images").unwrap_err(),
            DevicetreeError::InvalidPath { .. }
        ));
        let err = tree.find_node("/images/xen@1").unwrap_err();
        let DevicetreeError::NodeNotFound { path, .. } = err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(path.as_str(), "/images/xen@1");
        assert!(matches!(
            tree.find_node("/memory@0").unwrap_err(),
            DevicetreeError::NodeNotFound { .. }
        ));
        assert!(tree.subnode(tree.root().unwrap(), "fdt@1").unwrap().is_none());
    }

    #[test]
    fn test_typed_properties() {
        let blob = sample();
        let tree = Devicetree::from_bytes(&blob).unwrap();
        let root = tree.root().unwrap();
        let chosen = tree.find_node("/chosen").unwrap();
        assert_eq!(tree.property_str(root, "model").unwrap(), "virt");
        assert_eq!(tree.property_u32(root, "#address-cells").unwrap(), 2);
        assert_eq!(
            tree.property_cells(chosen, "linux,initrd-start").unwrap(),
            0x4800_0000
        );
        assert!(matches!(
            tree.property_u64(chosen, "linux,initrd-start").unwrap_err(),
            DevicetreeError::PropertyMalformed { .. }
        ));
        let memory = tree.find_node("/memory").unwrap();
        let list = tree.property_str_list(memory, "device_type").unwrap();
        assert_eq!(list.iter().collect::<Vec<_>>(), ["memory"]);
    }

    #[test]
    fn test_missing_and_empty_properties() {
        let blob = sample();
        let tree = Devicetree::from_bytes(&blob).unwrap();
        let chosen = tree.find_node("/chosen").unwrap();
        assert!(matches!(
            tree.property(chosen, "bootargs").unwrap_err(),
            DevicetreeError::PropertyMissing { .. }
        ));
        assert!(matches!(
            tree.property(chosen, "empty").unwrap_err(),
            DevicetreeError::PropertyMalformed { .. }
        ));
        assert!(tree.find_property(chosen, "empty").unwrap().is_some());
        // properties of children are not properties of the parent
        let root = tree.root().unwrap();
        assert!(tree.find_property(root, "device_type").unwrap().is_none());
    }

    #[test]
    fn test_offset_of_property_value() {
        let blob = sample();
        let tree = Devicetree::from_bytes(&blob).unwrap();
        let fdt = tree.find_node("/images/fdt@1").unwrap();
        let data = tree.property(fdt, "data").unwrap().raw_value();
        let offset = tree.offset_of(data).unwrap();
        assert_eq!(&blob[offset..][..4], [0xd0, 0x0d, 0xfe, 0xed]);
        assert_eq!(tree.offset_of(&[0_u8; 4]), None);
    }

    #[test]
    fn test_unit_name_matches() {
        assert!(unit_name_matches("memory", "memory", Some("0")));
        assert!(unit_name_matches("memory", "memory", None));
        assert!(unit_name_matches("fdt@1", "fdt", Some("1")));
        assert!(!unit_name_matches("fdt@1", "fdt", Some("2")));
        assert!(!unit_name_matches("fdt@1", "fdt", None));
    }
}
