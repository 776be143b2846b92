//! Where a FIT image component lives and where it wants to go.
//!
//! A component is an `/images/<name>` node. Its `data` property holds the
//! component bytes, and its destination is given either by `load`, a single
//! 32-bit cell, or by the first `(address, size)` pair of `reg`, each a 64-bit
//! value written as two big-endian cells.

use devicetree::{Devicetree, DevicetreeError, NodeId, property::ParsePropertyValueError};
use phys::{PhysAddr, PhysRange};
use platform_cast::CastFrom as _;
use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};
use snafu_utils::Location;

pub const DATA: &str = "data";
pub const LOAD: &str = "load";
pub const REG: &str = "reg";
pub const EXTRA_SPACE: &str = "extra-space";

/// Size of one `(address, size)` pair of `reg`.
const REG_PAIR_SIZE: usize = 16;

/// How a component's destination is encoded.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The `load` property, one 32-bit cell.
    ///
    /// Destinations at or above 4 GiB cannot be expressed.
    #[default]
    LoadCell,
    /// The first `(address, size)` pair of `reg`. The component data must fit
    /// in the region.
    RegPair,
}

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum ExtentError {
    #[snafu(display("cannot read component node"))]
    Node {
        #[snafu(source)]
        source: DevicetreeError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("component data does not lie inside the FIT image"))]
    DataOutsideImage {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("`reg` holds {len} bytes, one address and size pair needs 16"))]
    RegTooShort {
        len: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("component data of {data_len:#x} bytes exceeds its region of {region_len:#x} bytes"))]
    DataExceedsRegion {
        data_len: usize,
        region_len: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("malformed `extra-space`"))]
    ExtraSpace {
        #[snafu(source)]
        source: ParsePropertyValueError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// A FIT image mapped at a physical address.
#[derive(Debug, Clone, Copy)]
pub struct FitImage<'fit> {
    tree: Devicetree<'fit>,
    base: PhysAddr,
}

impl<'fit> FitImage<'fit> {
    #[must_use]
    pub fn new(tree: Devicetree<'fit>, base: PhysAddr) -> Self {
        Self { tree, base }
    }

    #[must_use]
    pub fn tree(&self) -> &Devicetree<'fit> {
        &self.tree
    }

    #[must_use]
    pub fn base(&self) -> PhysAddr {
        self.base
    }

    /// Physical address of `bytes`, which must be a subslice of the image.
    #[must_use]
    pub fn address_of(&self, bytes: &[u8]) -> Option<PhysAddr> {
        self.base.checked_add(self.tree.offset_of(bytes)?)
    }
}

/// Source and destination of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub load: PhysAddr,
    pub data: PhysRange,
    pub node: NodeId,
}

/// Physical range of the `data` property of `node`.
pub fn data_range(fit: &FitImage<'_>, node: NodeId) -> Result<PhysRange, ExtentError> {
    #[expect(clippy::wildcard_imports)]
    use self::extent_error::*;

    let data = fit.tree().property(node, DATA).context(NodeSnafu)?.raw_value();
    let start = fit.address_of(data).context(DataOutsideImageSnafu)?;
    Ok(PhysRange::new(start, data.len()))
}

/// Resolves a component placed by its `load` cell.
pub fn resolve_extents(fit: &FitImage<'_>, node: NodeId) -> Result<Extent, ExtentError> {
    #[expect(clippy::wildcard_imports)]
    use self::extent_error::*;

    let data = data_range(fit, node)?;
    let load = fit.tree().property_u32(node, LOAD).context(NodeSnafu)?;
    Ok(Extent {
        load: PhysAddr::new(u64::from(load)),
        data,
        node,
    })
}

/// Reads the first `(address, size)` pair of the `reg` property of `node`.
pub fn resolve_extent_pair(fit: &FitImage<'_>, node: NodeId) -> Result<(PhysAddr, u64), ExtentError> {
    #[expect(clippy::wildcard_imports)]
    use self::extent_error::*;

    let reg = fit.tree().property(node, REG).context(NodeSnafu)?.raw_value();
    let len = reg.len();
    ensure!(len >= REG_PAIR_SIZE, RegTooShortSnafu { len });
    let (address, size) = reg[..REG_PAIR_SIZE].split_at(REG_PAIR_SIZE / 2);
    let address = endian::read_cells(address).context(RegTooShortSnafu { len })?;
    let size = endian::read_cells(size).context(RegTooShortSnafu { len })?;
    Ok((PhysAddr::new(address), size))
}

/// Looks up the component at `path` and resolves it with `placement`.
pub fn resolve_component(
    fit: &FitImage<'_>,
    path: &str,
    placement: Placement,
) -> Result<Extent, ExtentError> {
    #[expect(clippy::wildcard_imports)]
    use self::extent_error::*;

    let node = fit.tree().find_node(path).context(NodeSnafu)?;
    match placement {
        Placement::LoadCell => resolve_extents(fit, node),
        Placement::RegPair => {
            let data = data_range(fit, node)?;
            let (load, region_len) = resolve_extent_pair(fit, node)?;
            ensure!(
                u64::cast_from(data.len()) <= region_len,
                DataExceedsRegionSnafu {
                    data_len: data.len(),
                    region_len,
                }
            );
            Ok(Extent { load, data, node })
        }
    }
}

/// Bytes of free space requested for a devicetree component.
///
/// A missing `extra-space` property requests none.
pub fn extra_space(fit: &FitImage<'_>, node: NodeId) -> Result<usize, ExtentError> {
    #[expect(clippy::wildcard_imports)]
    use self::extent_error::*;

    let Some(prop) = fit.tree().find_property(node, EXTRA_SPACE).context(NodeSnafu)? else {
        return Ok(0);
    };
    let extra = prop.value_as_u32().context(ExtraSpaceSnafu)?;
    Ok(usize::cast_from(extra))
}
