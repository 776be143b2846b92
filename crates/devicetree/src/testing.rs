//! Builder for devicetree blobs used in tests.

use alloc::{collections::btree_map::BTreeMap, string::String, vec::Vec};
use core::iter;

use dataview::{DataView, PodMethods as _};
use endian::Be;

use crate::layout::{
    HEADER_SIZE, Header, LAST_COMP_VERSION, MAGIC, PropHeader, ReserveEntry, SPEC_VERSION,
    StructToken,
};

/// Builds a devicetree blob token by token.
///
/// `build` appends the final `END` token and lays the blob out as header,
/// reservation map, structure block and strings block, optionally separated by
/// gaps and followed by free space.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    magic: u32,
    version: u32,
    last_comp_version: u32,
    boot_cpuid_phys: u32,
    mem_rsvmap: Vec<ReserveEntry>,
    struct_block: Vec<u8>,
    strings_block: Vec<u8>,
    name_offset: BTreeMap<String, u32>,
    block_gap: usize,
    headroom: usize,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            magic: MAGIC,
            version: SPEC_VERSION,
            last_comp_version: LAST_COMP_VERSION,
            boot_cpuid_phys: 0,
            mem_rsvmap: Vec::new(),
            struct_block: Vec::new(),
            strings_block: Vec::new(),
            name_offset: BTreeMap::new(),
            block_gap: 0,
            headroom: 0,
        }
    }

    pub fn magic(&mut self, magic: u32) -> &mut Self {
        self.magic = magic;
        self
    }

    pub fn version(&mut self, version: u32) -> &mut Self {
        self.version = version;
        self
    }

    pub fn last_comp_version(&mut self, last_comp_version: u32) -> &mut Self {
        self.last_comp_version = last_comp_version;
        self
    }

    pub fn boot_cpuid_phys(&mut self, boot_cpuid_phys: u32) -> &mut Self {
        self.boot_cpuid_phys = boot_cpuid_phys;
        self
    }

    pub fn reserve(&mut self, address: u64, size: u64) -> &mut Self {
        self.mem_rsvmap.push(ReserveEntry::new(address, size));
        self
    }

    /// Leaves `gap` unused bytes (rounded up to 8) before the structure block
    /// and before the strings block.
    pub fn block_gap(&mut self, gap: usize) -> &mut Self {
        self.block_gap = gap.next_multiple_of(8);
        self
    }

    /// Leaves `headroom` free bytes after the strings block.
    pub fn headroom(&mut self, headroom: usize) -> &mut Self {
        self.headroom = headroom;
        self
    }

    fn token(&mut self, token: u32) -> &mut Self {
        let rem = self.struct_block.len() % size_of::<StructToken>();
        if rem != 0 {
            self.struct_block
                .extend(iter::repeat_n(0, size_of::<StructToken>() - rem));
        }
        self.struct_block
            .extend_from_slice(StructToken::new(token).as_bytes());
        self
    }

    pub fn begin_node(&mut self, name: &str) -> &mut Self {
        self.token(StructToken::BEGIN_NODE);
        self.struct_block.extend_from_slice(name.as_bytes());
        self.struct_block.push(0);
        self
    }

    pub fn end_node(&mut self) -> &mut Self {
        self.token(StructToken::END_NODE)
    }

    pub fn nop(&mut self) -> &mut Self {
        self.token(StructToken::NOP)
    }

    pub fn prop(&mut self, name: &str, value: &[u8]) -> &mut Self {
        let name_offset = match self.name_offset.get(name) {
            Some(&offset) => offset,
            None => {
                #[expect(clippy::missing_panics_doc)]
                let offset = u32::try_from(self.strings_block.len()).unwrap();
                self.strings_block.extend_from_slice(name.as_bytes());
                self.strings_block.push(0);
                self.name_offset.insert(name.into(), offset);
                offset
            }
        };
        #[expect(clippy::missing_panics_doc)]
        let len = u32::try_from(value.len()).unwrap();
        self.token(StructToken::PROP);
        self.struct_block
            .extend_from_slice(PropHeader::new(len, name_offset).as_bytes());
        self.struct_block.extend_from_slice(value);
        self
    }

    pub fn prop_u32(&mut self, name: &str, value: u32) -> &mut Self {
        self.prop(name, &value.to_be_bytes())
    }

    pub fn prop_u64(&mut self, name: &str, value: u64) -> &mut Self {
        self.prop(name, &value.to_be_bytes())
    }

    pub fn prop_str(&mut self, name: &str, value: &str) -> &mut Self {
        self.prop_str_list(name, &[value])
    }

    pub fn prop_str_list(&mut self, name: &str, values: &[&str]) -> &mut Self {
        let mut value = Vec::new();
        for s in values {
            value.extend_from_slice(s.as_bytes());
            value.push(0);
        }
        self.prop(name, &value)
    }

    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut struct_block = self.clone();
        struct_block.token(StructToken::END);
        let struct_block = struct_block.struct_block;

        let mem_rsvmap_offset = HEADER_SIZE.next_multiple_of(8);
        let mem_rsvmap_len = (self.mem_rsvmap.len() + 1) * size_of::<ReserveEntry>();
        let struct_offset = mem_rsvmap_offset + mem_rsvmap_len + self.block_gap;
        let strings_offset = struct_offset + struct_block.len() + self.block_gap;
        let totalsize = strings_offset + self.strings_block.len() + self.headroom;

        #[expect(clippy::missing_panics_doc)]
        let field = |value: usize| -> Be<u32> { Be::new(u32::try_from(value).unwrap()) };
        let header = Header {
            magic: self.magic.into(),
            totalsize: field(totalsize),
            off_dt_struct: field(struct_offset),
            off_dt_strings: field(strings_offset),
            off_mem_rsvmap: field(mem_rsvmap_offset),
            version: self.version.into(),
            last_comp_version: self.last_comp_version.into(),
            boot_cpuid_phys: self.boot_cpuid_phys.into(),
            size_dt_strings: field(self.strings_block.len()),
            size_dt_struct: field(struct_block.len()),
        };

        let mut blob = alloc::vec![0; totalsize];
        let data = DataView::from_mut(&mut blob[..]);
        data.write(0, &header);
        for (i, entry) in self.mem_rsvmap.iter().enumerate() {
            data.write(mem_rsvmap_offset + i * size_of::<ReserveEntry>(), entry);
        }
        blob[struct_offset..][..struct_block.len()].copy_from_slice(&struct_block);
        blob[strings_offset..][..self.strings_block.len()].copy_from_slice(&self.strings_block);
        blob
    }
}
