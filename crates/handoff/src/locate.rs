//! Discovery of the FIT image through the boot devicetree.

use devicetree::{Devicetree, DevicetreeError};
use phys::{MemoryError, PhysAddr, PhysMemory, PhysRange};
use snafu::{ResultExt as _, Snafu};
use snafu_utils::Location;

use crate::coherence::{self, CoherenceError};

/// Node holding the FIT image pointer.
pub const CHOSEN_PATH: &str = "/chosen";
/// Property of [`CHOSEN_PATH`] holding the FIT image address.
pub const INITRD_START: &str = "linux,initrd-start";

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum LocateError {
    #[snafu(display("boot devicetree at {range} is not accessible"))]
    AccessBootTree {
        range: PhysRange,
        #[snafu(source)]
        source: MemoryError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("cannot read boot devicetree at {range}"))]
    ReadBootTree {
        range: PhysRange,
        #[snafu(source)]
        source: DevicetreeError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("FIT image at {addr} is not usable"))]
    FitImage {
        addr: PhysAddr,
        #[snafu(source)]
        source: CoherenceError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Reads the FIT image address from `/chosen/linux,initrd-start`.
///
/// The property holds one or two big-endian cells. Returns `None` if the node
/// or the property is missing, or if the property has any other length.
pub fn subimage_pointer(tree: &Devicetree<'_>) -> Result<Option<PhysAddr>, DevicetreeError> {
    let chosen = match tree.find_node(CHOSEN_PATH) {
        Ok(node) => node,
        Err(DevicetreeError::NodeNotFound { .. }) => return Ok(None),
        Err(err) => return Err(err),
    };
    match tree.property_cells(chosen, INITRD_START) {
        Ok(addr) => Ok(Some(PhysAddr::new(addr))),
        Err(DevicetreeError::PropertyMissing { .. } | DevicetreeError::PropertyMalformed { .. }) => {
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Locates the FIT image described by the boot devicetree at `boot_tree`.
///
/// `boot_tree` must already be coherent. Falls back to the boot tree itself
/// when it holds no usable FIT image pointer. A FIT image found elsewhere is
/// made coherent and its header validated before its range is returned.
pub fn locate_subimage<M>(mem: &mut M, boot_tree: PhysRange) -> Result<PhysRange, LocateError>
where
    M: PhysMemory + ?Sized,
{
    #[expect(clippy::wildcard_imports)]
    use self::locate_error::*;

    let pointer = {
        let bytes = mem
            .bytes(boot_tree)
            .context(AccessBootTreeSnafu { range: boot_tree })?;
        let tree = Devicetree::from_bytes(bytes).context(ReadBootTreeSnafu { range: boot_tree })?;
        subimage_pointer(&tree).context(ReadBootTreeSnafu { range: boot_tree })?
    };

    match pointer {
        Some(addr) if addr != boot_tree.start() => {
            coherence::make_tree_coherent(mem, addr).context(FitImageSnafu { addr })
        }
        _ => Ok(boot_tree),
    }
}
