//! In-place editing of a flattened devicetree.
//!
//! A [`DevicetreeMut`] owns a mutable buffer whose length is the capacity of
//! the tree: the header's `totalsize` always equals the buffer length, and the
//! bytes between the end of the strings block and `totalsize` are free space.
//! Every edit first checks that the result fits, so a failed edit leaves the
//! tree untouched.

use core::mem;

use dataview::{DataView, PodMethods as _};
use endian::Be;
use platform_cast::CastFrom as _;
use snafu::{OptionExt as _, ensure};

use crate::{
    error::{
        AlreadyExistsSnafu, DevicetreeError, InsufficientBytesSnafu, InsufficientCapacitySnafu,
        InvalidNodeNameSnafu, InvalidPropertyNameSnafu, truncated,
    },
    layout::{HEADER_SIZE, Header, PropHeader, StructToken, token_aligned},
    tree::{Devicetree, NodeId},
};

/// Offset of a property value from its `PROP` token.
const PROP_VALUE_OFFSET: usize = size_of::<StructToken>() + size_of::<PropHeader>();
/// Offset of the `len` field from a `PROP` token.
const PROP_LEN_OFFSET: usize = size_of::<StructToken>();

/// A devicetree that can be edited in place.
#[derive(custom_debug_derive::Debug)]
pub struct DevicetreeMut<'fdt> {
    header: Header,
    #[debug(skip)]
    buf: &'fdt mut [u8],
}

impl<'fdt> DevicetreeMut<'fdt> {
    /// Opens the tree at the start of `buf` for editing without moving its
    /// blocks.
    ///
    /// The capacity is the tree's current `totalsize`.
    pub fn open(buf: &'fdt mut [u8]) -> Result<Self, DevicetreeError> {
        let header = Devicetree::from_bytes(buf)?.header();
        let buf = &mut buf[..header.total_size()];
        Ok(Self { header, buf })
    }

    /// Opens the tree at the start of `buf` for editing, using the whole
    /// buffer as capacity.
    ///
    /// The blocks are compacted to the canonical order (reservation map,
    /// structure, strings) and `totalsize` is set to the buffer length, capped
    /// at `u32::MAX`. The tree is rewritten as version 17.
    pub fn open_in_place(buf: &'fdt mut [u8]) -> Result<Self, DevicetreeError> {
        let (old, mem_rsvmap_len) = {
            let tree = Devicetree::from_bytes(buf)?;
            (tree.header(), tree.mem_rsvmap_bytes().len())
        };
        let capacity = buf.len().min(usize::cast_from(u32::MAX));
        let buf = &mut buf[..capacity];
        let header = compact_header(
            old,
            mem_rsvmap_len,
            old.struct_size(),
            old.strings_size(),
            capacity,
        )?;

        // Every block moves towards the start of the buffer, and never past
        // the start of the next block.
        buf.copy_within(
            old.mem_rsvmap_offset()..old.mem_rsvmap_offset() + mem_rsvmap_len,
            header.mem_rsvmap_offset(),
        );
        buf.copy_within(
            old.struct_offset()..old.struct_offset() + old.struct_size(),
            header.struct_offset(),
        );
        buf.copy_within(
            old.strings_offset()..old.strings_end(),
            header.strings_offset(),
        );

        let mut this = Self { header, buf };
        this.commit_header()?;
        Ok(this)
    }

    /// Returns a read-only view of the tree.
    #[must_use]
    pub fn as_devicetree(&self) -> Devicetree<'_> {
        Devicetree::from_validated(self.header, &*self.buf)
    }

    /// Consumes the editor, returning a read-only view of the tree.
    #[must_use]
    pub fn into_devicetree(self) -> Devicetree<'fdt> {
        Devicetree::from_validated(self.header, self.buf)
    }

    #[must_use]
    pub fn header(&self) -> Header {
        self.header
    }

    #[must_use]
    pub fn total_size(&self) -> usize {
        self.buf.len()
    }

    /// Number of bytes still available for edits.
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.buf.len() - self.header.strings_end()
    }

    pub fn find_node(&self, path: &str) -> Result<NodeId, DevicetreeError> {
        self.as_devicetree().find_node(path)
    }

    /// Adds an empty child node named `name` to `parent`.
    ///
    /// The new node is placed after the properties of `parent`, before its
    /// existing children. Fails with [`DevicetreeError::AlreadyExists`] if a
    /// child with that name exists.
    pub fn add_subnode(&mut self, parent: NodeId, name: &str) -> Result<NodeId, DevicetreeError> {
        ensure!(
            !name.is_empty() && !name.contains(['/', '\0']),
            InvalidNodeNameSnafu {
                name: truncated(name)
            }
        );
        let tree = self.as_devicetree();
        ensure!(
            tree.subnode(parent, name)?.is_none(),
            AlreadyExistsSnafu {
                name: truncated(name)
            }
        );
        let offset = tree.properties_end(parent)?;

        let name_len = token_aligned(name.len() + 1);
        let node_len = size_of::<StructToken>() + name_len + size_of::<StructToken>();
        self.ensure_free(node_len)?;
        self.splice_struct(offset, 0, node_len);

        let bytes = self.struct_bytes_mut(offset, node_len);
        let (begin, rest) = bytes.split_at_mut(size_of::<StructToken>());
        let (name_bytes, end) = rest.split_at_mut(name_len);
        begin.copy_from_slice(StructToken::new(StructToken::BEGIN_NODE).as_bytes());
        name_bytes[..name.len()].copy_from_slice(name.as_bytes());
        name_bytes[name.len()..].fill(0);
        end.copy_from_slice(StructToken::new(StructToken::END_NODE).as_bytes());

        self.commit_header()?;
        Ok(NodeId(offset))
    }

    /// Sets property `name` of `node` to `value`, creating the property if it
    /// does not exist.
    pub fn set_property(
        &mut self,
        node: NodeId,
        name: &str,
        value: &[u8],
    ) -> Result<(), DevicetreeError> {
        self.set_property_parts(node, name, &[value])
    }

    /// Sets property `name` of `node` to the nul-terminated string `value`.
    pub fn set_property_string(
        &mut self,
        node: NodeId,
        name: &str,
        value: &str,
    ) -> Result<(), DevicetreeError> {
        self.set_property_parts(node, name, &[value.as_bytes(), b"\0"])
    }

    pub fn set_property_u32(
        &mut self,
        node: NodeId,
        name: &str,
        value: u32,
    ) -> Result<(), DevicetreeError> {
        self.set_property_parts(node, name, &[&value.to_be_bytes()])
    }

    pub fn set_property_u64(
        &mut self,
        node: NodeId,
        name: &str,
        value: u64,
    ) -> Result<(), DevicetreeError> {
        self.set_property_parts(node, name, &[&value.to_be_bytes()])
    }

    /// Appends `value` to property `name` of `node`, creating the property if
    /// it does not exist.
    pub fn append_property(
        &mut self,
        node: NodeId,
        name: &str,
        value: &[u8],
    ) -> Result<(), DevicetreeError> {
        self.append_property_parts(node, name, &[value])
    }

    /// Appends the nul-terminated string `value` to property `name` of `node`,
    /// building a string list.
    pub fn append_property_string(
        &mut self,
        node: NodeId,
        name: &str,
        value: &str,
    ) -> Result<(), DevicetreeError> {
        self.append_property_parts(node, name, &[value.as_bytes(), b"\0"])
    }

    pub fn append_property_u64(
        &mut self,
        node: NodeId,
        name: &str,
        value: u64,
    ) -> Result<(), DevicetreeError> {
        self.append_property_parts(node, name, &[&value.to_be_bytes()])
    }

    fn set_property_parts(
        &mut self,
        node: NodeId,
        name: &str,
        parts: &[&[u8]],
    ) -> Result<(), DevicetreeError> {
        ensure_property_name(name)?;
        let len = parts_len(parts);
        let existing = self
            .as_devicetree()
            .locate_property(node, name)?
            .map(|(offset, prop)| (offset, prop.raw_value().len()));

        match existing {
            Some((prop_offset, old_len)) => {
                let value_offset = prop_offset + PROP_VALUE_OFFSET;
                let old_padded = token_aligned(old_len);
                let new_padded = token_aligned(len);
                self.ensure_free(new_padded.saturating_sub(old_padded))?;
                self.splice_struct(value_offset, old_padded, new_padded);
                self.write_parts(value_offset, parts, new_padded);
                self.write_prop_len(prop_offset, len);
            }
            None => self.insert_property(node, name, parts, len)?,
        }
        self.commit_header()
    }

    fn append_property_parts(
        &mut self,
        node: NodeId,
        name: &str,
        parts: &[&[u8]],
    ) -> Result<(), DevicetreeError> {
        ensure_property_name(name)?;
        let existing = self
            .as_devicetree()
            .locate_property(node, name)?
            .map(|(offset, prop)| (offset, prop.raw_value().len()));
        let Some((prop_offset, old_len)) = existing else {
            return self.set_property_parts(node, name, parts);
        };

        let new_len = old_len + parts_len(parts);
        let value_offset = prop_offset + PROP_VALUE_OFFSET;
        let old_padded = token_aligned(old_len);
        let new_padded = token_aligned(new_len);
        self.ensure_free(new_padded - old_padded)?;
        self.splice_struct(value_offset, old_padded, new_padded);
        self.write_parts(value_offset + old_len, parts, new_padded - old_len);
        self.write_prop_len(prop_offset, new_len);
        self.commit_header()
    }

    fn insert_property(
        &mut self,
        node: NodeId,
        name: &str,
        parts: &[&[u8]],
        len: usize,
    ) -> Result<(), DevicetreeError> {
        let tree = self.as_devicetree();
        let offset = tree.properties_end(node)?;
        let existing_name = find_string(tree.strings_block(), name);

        let prop_len = PROP_VALUE_OFFSET + token_aligned(len);
        let name_len = if existing_name.is_some() {
            0
        } else {
            name.len() + 1
        };
        self.ensure_free(prop_len + name_len)?;

        self.splice_struct(offset, 0, prop_len);
        let nameoff = match existing_name {
            Some(nameoff) => nameoff,
            None => self.append_string(name),
        };

        let data = DataView::from_mut(self.struct_bytes_mut(offset, PROP_VALUE_OFFSET));
        data.write(0, &StructToken::new(StructToken::PROP));
        data.write(
            size_of::<StructToken>(),
            &PropHeader::new(u32_field(len), u32_field(nameoff)),
        );
        self.write_parts(offset + PROP_VALUE_OFFSET, parts, token_aligned(len));
        Ok(())
    }

    fn ensure_free(&self, additional: usize) -> Result<(), DevicetreeError> {
        let needed = self.header.strings_end() + additional;
        ensure!(
            needed <= self.buf.len(),
            InsufficientCapacitySnafu {
                needed,
                available: self.buf.len(),
            }
        );
        Ok(())
    }

    /// Resizes `old_len` bytes at `offset` of the structure block to
    /// `new_len`, moving everything behind them. The caller checks capacity.
    fn splice_struct(&mut self, offset: usize, old_len: usize, new_len: usize) {
        let at = self.header.struct_offset() + offset;
        let end = self.header.strings_end();
        self.buf.copy_within(at + old_len..end, at + new_len);

        let struct_size = self.header.struct_size() + new_len - old_len;
        let strings_offset = self.header.strings_offset() + new_len - old_len;
        self.header.size_dt_struct = Be::new(u32_field(struct_size));
        self.header.off_dt_strings = Be::new(u32_field(strings_offset));
    }

    /// Appends `name` to the strings block and returns its offset. The caller
    /// checks capacity.
    fn append_string(&mut self, name: &str) -> usize {
        let nameoff = self.header.strings_size();
        let at = self.header.strings_end();
        self.buf[at..][..name.len()].copy_from_slice(name.as_bytes());
        self.buf[at + name.len()] = 0;
        self.header.size_dt_strings = Be::new(u32_field(nameoff + name.len() + 1));
        nameoff
    }

    fn struct_bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        let at = self.header.struct_offset() + offset;
        &mut self.buf[at..][..len]
    }

    /// Writes the concatenation of `parts` at `offset` of the structure block,
    /// zero-filling up to `padded_len` bytes.
    fn write_parts(&mut self, offset: usize, parts: &[&[u8]], padded_len: usize) {
        let mut dst = self.struct_bytes_mut(offset, padded_len);
        for part in parts {
            let (head, tail) = mem::take(&mut dst).split_at_mut(part.len());
            head.copy_from_slice(part);
            dst = tail;
        }
        dst.fill(0);
    }

    fn write_prop_len(&mut self, prop_offset: usize, len: usize) {
        let bytes = self.struct_bytes_mut(prop_offset + PROP_LEN_OFFSET, size_of::<u32>());
        bytes.copy_from_slice(&u32_field(len).to_be_bytes());
    }

    fn commit_header(&mut self) -> Result<(), DevicetreeError> {
        let actual = self.buf.len();
        self.header.write(self.buf).context(InsufficientBytesSnafu {
            needed: HEADER_SIZE,
            actual,
        })
    }
}

impl Devicetree<'_> {
    /// Copies the tree into `dst` in compact form and opens the copy for
    /// editing, using the whole of `dst` as capacity.
    pub fn unpack_into<'dst>(
        &self,
        dst: &'dst mut [u8],
    ) -> Result<DevicetreeMut<'dst>, DevicetreeError> {
        let capacity = dst.len().min(usize::cast_from(u32::MAX));
        let dst = &mut dst[..capacity];
        let mem_rsvmap = self.mem_rsvmap_bytes();
        let struct_block = self.struct_block();
        let strings_block = self.strings_block();
        let header = compact_header(
            self.header(),
            mem_rsvmap.len(),
            struct_block.len(),
            strings_block.len(),
            capacity,
        )?;

        dst[header.mem_rsvmap_offset()..][..mem_rsvmap.len()].copy_from_slice(mem_rsvmap);
        dst[header.struct_offset()..][..struct_block.len()].copy_from_slice(struct_block);
        dst[header.strings_offset()..][..strings_block.len()].copy_from_slice(strings_block);

        let mut tree = DevicetreeMut { header, buf: dst };
        tree.commit_header()?;
        Ok(tree)
    }
}

fn compact_header(
    old: Header,
    mem_rsvmap_len: usize,
    struct_size: usize,
    strings_size: usize,
    capacity: usize,
) -> Result<Header, DevicetreeError> {
    Header::compact(
        old.boot_cpuid_phys(),
        mem_rsvmap_len,
        struct_size,
        strings_size,
        capacity,
    )
    .context(InsufficientCapacitySnafu {
        needed: HEADER_SIZE + mem_rsvmap_len + struct_size + strings_size,
        available: capacity,
    })
}

fn ensure_property_name(name: &str) -> Result<(), DevicetreeError> {
    ensure!(
        !name.is_empty() && !name.contains('\0'),
        InvalidPropertyNameSnafu {
            name: truncated(name)
        }
    );
    Ok(())
}

fn parts_len(parts: &[&[u8]]) -> usize {
    parts.iter().map(|part| part.len()).sum()
}

/// Offset of `name` in a strings block, if it is already stored there.
fn find_string(strings_block: &[u8], name: &str) -> Option<usize> {
    let mut offset = 0;
    for s in strings_block.split(|&b| b == 0) {
        if s == name.as_bytes() {
            // a trailing fragment without nul is not a stored string
            return (offset + s.len() < strings_block.len()).then_some(offset);
        }
        offset += s.len() + 1;
    }
    None
}

/// Converts a size or offset inside the tree to a header field.
///
/// Every tree buffer is capped at `u32::MAX` bytes and edits never grow past
/// the buffer, so sizes and offsets within it always fit.
#[expect(clippy::cast_possible_truncation)]
fn u32_field(value: usize) -> u32 {
    value as u32
}
