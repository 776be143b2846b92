//! Edits made to the target devicetree before it is handed over.
//!
//! Edits are applied one property at a time. When an edit fails, the ones
//! before it stay in place.

use devicetree::{Devicetree, DevicetreeError, DevicetreeMut, Name, NodeId, error::truncated};
use phys::PhysRange;
use platform_cast::CastFrom as _;
use snafu::{ResultExt as _, Snafu};
use snafu_utils::Location;

/// Second entry of the `compatible` list of every module node.
pub const MODULE_COMPATIBLE: &str = "multiboot,module";
pub const MEMORY_NODE: &str = "memory";
const COMPATIBLE: &str = "compatible";
const REG: &str = "reg";

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum PatchError {
    #[snafu(display("cannot create module node {node:?}"))]
    ModuleNode {
        node: Name,
        #[snafu(source)]
        source: DevicetreeError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("cannot write `{property}` of module node {node:?}"))]
    ModuleProperty {
        node: Name,
        property: &'static str,
        #[snafu(source)]
        source: DevicetreeError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("cannot read memory topology of the boot devicetree"))]
    SourceMemory {
        #[snafu(source)]
        source: DevicetreeError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("cannot write memory topology of the target devicetree"))]
    TargetMemory {
        #[snafu(source)]
        source: DevicetreeError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Returns the child of the root named `name`, creating it if there is none.
fn root_child(target: &mut DevicetreeMut<'_>, name: &str) -> Result<NodeId, DevicetreeError> {
    let tree = target.as_devicetree();
    let root = tree.root()?;
    if let Some(node) = tree.subnode(root, name)? {
        return Ok(node);
    }
    target.add_subnode(root, name)
}

/// Describes the module loaded at `module` in the root-level node
/// `node_name`, creating the node if needed.
///
/// The node gets `compatible = role, "multiboot,module"` and
/// `reg = <address size>` with both values as 64-bit numbers. Existing values
/// are replaced, so describing a module twice leaves one node reflecting the
/// last call. A leading `/` in `node_name` is ignored.
pub fn add_module(
    target: &mut DevicetreeMut<'_>,
    module: PhysRange,
    role: &str,
    node_name: &str,
) -> Result<NodeId, PatchError> {
    #[expect(clippy::wildcard_imports)]
    use self::patch_error::*;

    let name = node_name.strip_prefix('/').unwrap_or(node_name);
    let node = root_child(target, name).context(ModuleNodeSnafu {
        node: truncated(node_name),
    })?;

    let compatible = ModulePropertySnafu {
        node: truncated(node_name),
        property: COMPATIBLE,
    };
    target
        .set_property_string(node, COMPATIBLE, role)
        .context(compatible)?;
    target
        .append_property_string(node, COMPATIBLE, MODULE_COMPATIBLE)
        .context(compatible)?;

    let reg = ModulePropertySnafu {
        node: truncated(node_name),
        property: REG,
    };
    target
        .set_property_u64(node, REG, module.start().value())
        .context(reg)?;
    target
        .append_property_u64(node, REG, u64::cast_from(module.len()))
        .context(reg)?;
    Ok(node)
}

/// Replaces the `reg` of the target's `/memory` node with the `reg` of the
/// boot devicetree's `/memory` node.
///
/// The value is copied byte for byte, so both trees must use the same
/// `#address-cells` and `#size-cells` at the root. Fails without touching the
/// target if the boot devicetree has no usable `/memory` node.
pub fn sync_memory_topology(
    target: &mut DevicetreeMut<'_>,
    source: &Devicetree<'_>,
) -> Result<(), PatchError> {
    #[expect(clippy::wildcard_imports)]
    use self::patch_error::*;

    let source_node = source
        .find_node("/memory")
        .context(SourceMemorySnafu)?;
    let reg = source
        .property(source_node, REG)
        .context(SourceMemorySnafu)?
        .raw_value();

    let node = root_child(target, MEMORY_NODE).context(TargetMemorySnafu)?;
    target
        .set_property(node, REG, reg)
        .context(TargetMemorySnafu)?;
    Ok(())
}
