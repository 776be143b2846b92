//! Copying of FIT image components to their load addresses.
//!
//! The loader does not detect conflicts between components. A component whose
//! source overlaps its own destination is still copied correctly, but loading
//! one component over the data of another that is loaded later destroys the
//! later one. The caller orders the components to avoid that.

use devicetree::{Devicetree, DevicetreeError, DevicetreeMut, Name, error::truncated};
use phys::{MemoryError, PhysAddr, PhysMemory, PhysRange};
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use snafu_utils::Location;

use crate::{
    coherence,
    extent::{self, Extent, ExtentError, FitImage, Placement},
};

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum LoadError {
    #[snafu(display("FIT image at {fit} is not accessible"))]
    AccessFit {
        fit: PhysRange,
        #[snafu(source)]
        source: MemoryError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("cannot read FIT image at {fit}"))]
    ReadFit {
        fit: PhysRange,
        #[snafu(source)]
        source: DevicetreeError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("cannot resolve component {path:?}"))]
    Resolve {
        path: Name,
        #[snafu(source)]
        source: ExtentError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("component {path:?} does not hold a valid devicetree"))]
    InvalidTree {
        path: Name,
        #[snafu(source)]
        source: DevicetreeError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("component size {size:#x} plus extra space {extra_space:#x} overflows"))]
    SizeOverflow {
        size: usize,
        extra_space: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("cannot write component to {dest}"))]
    Write {
        dest: PhysRange,
        #[snafu(source)]
        source: MemoryError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("cannot lay out devicetree at {dest}"))]
    Unpack {
        dest: PhysRange,
        #[snafu(source)]
        source: DevicetreeError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// A component copied to its load address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedComponent {
    pub addr: PhysAddr,
    pub size: usize,
}

impl LoadedComponent {
    #[must_use]
    pub fn range(&self) -> PhysRange {
        PhysRange::new(self.addr, self.size)
    }
}

fn open_fit<M>(mem: &M, fit: PhysRange) -> Result<FitImage<'_>, LoadError>
where
    M: PhysMemory + ?Sized,
{
    #[expect(clippy::wildcard_imports)]
    use self::load_error::*;

    let bytes = mem.bytes(fit).context(AccessFitSnafu { fit })?;
    let tree = Devicetree::from_bytes(bytes).context(ReadFitSnafu { fit })?;
    Ok(FitImage::new(tree, fit.start()))
}

/// Copies the component at `path` of the FIT image at `fit` to its load
/// address.
///
/// The destination lines are invalidated before the copy, so no stale line
/// can later be written back over the component.
pub fn load_opaque_component<M>(
    mem: &mut M,
    fit: PhysRange,
    path: &str,
    placement: Placement,
) -> Result<LoadedComponent, LoadError>
where
    M: PhysMemory + ?Sized,
{
    #[expect(clippy::wildcard_imports)]
    use self::load_error::*;

    let Extent { load, data, .. } = {
        let image = open_fit(mem, fit)?;
        extent::resolve_component(&image, path, placement).context(ResolveSnafu {
            path: truncated(path),
        })?
    };

    let dest = PhysRange::new(load, data.len());
    coherence::make_range_coherent(mem, dest).context(WriteSnafu { dest })?;
    mem.copy(load, data.start(), data.len())
        .context(WriteSnafu { dest })?;
    Ok(LoadedComponent {
        addr: load,
        size: data.len(),
    })
}

/// Copies the devicetree component at `path` of the FIT image at `fit` to its
/// load address, and lays it out so that the free space requested by its
/// `extra-space` property follows the strings block.
///
/// The returned size is the capacity of the loaded tree, which its header
/// records as `totalsize`.
pub fn load_tree_component<M>(
    mem: &mut M,
    fit: PhysRange,
    path: &str,
    placement: Placement,
) -> Result<LoadedComponent, LoadError>
where
    M: PhysMemory + ?Sized,
{
    #[expect(clippy::wildcard_imports)]
    use self::load_error::*;

    let (Extent { load, data, .. }, extra_space) = {
        let image = open_fit(mem, fit)?;
        let extent = extent::resolve_component(&image, path, placement).context(ResolveSnafu {
            path: truncated(path),
        })?;
        let extra_space = extent::extra_space(&image, extent.node).context(ResolveSnafu {
            path: truncated(path),
        })?;
        let donor = mem.bytes(extent.data).context(AccessFitSnafu { fit })?;
        Devicetree::from_bytes(donor).context(InvalidTreeSnafu {
            path: truncated(path),
        })?;
        (extent, extra_space)
    };

    let size = data.len().checked_add(extra_space).context(SizeOverflowSnafu {
        size: data.len(),
        extra_space,
    })?;
    let dest = PhysRange::new(load, size);
    coherence::make_range_coherent(mem, dest).context(WriteSnafu { dest })?;

    let tree = if data.overlaps(&dest) {
        mem.copy(load, data.start(), data.len())
            .context(WriteSnafu { dest })?;
        let buf = mem.bytes_mut(dest).context(WriteSnafu { dest })?;
        DevicetreeMut::open_in_place(buf).context(UnpackSnafu { dest })?
    } else {
        let (donor, buf) = mem.split_disjoint(data, dest).context(WriteSnafu { dest })?;
        Devicetree::from_bytes(donor)
            .and_then(|donor| donor.unpack_into(buf))
            .context(UnpackSnafu { dest })?
    };

    Ok(LoadedComponent {
        addr: load,
        size: tree.total_size(),
    })
}

#[cfg(test)]
mod tests {
    use devicetree::testing::TreeBuilder;
    use phys::testing::MemoryWindow;

    use super::*;

    const FIT_ADDR: PhysAddr = PhysAddr::new(0x8000);

    fn donor_tree() -> Vec<u8> {
        let mut builder = TreeBuilder::new();
        builder
            .reserve(0x4000_0000, 0x1000)
            .begin_node("")
            .prop_str("compatible", "linux,dummy-virt")
            .begin_node("chosen")
            .end_node()
            .end_node();
        builder.build()
    }

    struct Image<'a> {
        name: &'a str,
        data: &'a [u8],
        props: &'a [(&'a str, u32)],
    }

    fn fit_blob(images: &[Image<'_>]) -> Vec<u8> {
        let mut builder = TreeBuilder::new();
        builder.begin_node("").begin_node("images");
        for image in images {
            builder.begin_node(image.name).prop("data", image.data);
            for &(prop, value) in image.props {
                builder.prop_u32(prop, value);
            }
            builder.end_node();
        }
        builder.end_node().end_node();
        builder.build()
    }

    fn memory_with_fit(fit: &[u8]) -> (MemoryWindow, PhysRange) {
        let mut memory = MemoryWindow::new(PhysAddr::new(0), 0x2_0000);
        memory.write(FIT_ADDR, fit);
        (memory, PhysRange::new(FIT_ADDR, fit.len()))
    }

    #[test]
    fn test_load_opaque_component() {
        let payload: Vec<u8> = (0..=255).collect();
        let fit = fit_blob(&[Image {
            name: "kernel@1",
            data: &payload,
            props: &[("load", 0x1000)],
        }]);
        let (mut memory, fit_range) = memory_with_fit(&fit);

        let loaded =
            load_opaque_component(&mut memory, fit_range, "/images/kernel@1", Placement::LoadCell)
                .unwrap();
        assert_eq!(loaded.addr, PhysAddr::new(0x1000));
        assert_eq!(loaded.size, 256);
        assert_eq!(memory.read(loaded.addr, 256), &payload[..]);
        assert_eq!(memory.read(PhysAddr::new(0x1100), 1), [0]);
        assert!(memory.is_invalidated(loaded.range()));
    }

    #[test]
    fn test_load_opaque_component_over_its_own_data() {
        let payload: Vec<u8> = (0..64).collect();
        let fit = fit_blob(&[Image {
            name: "kernel@1",
            data: &payload,
            props: &[("load", 0x8000)],
        }]);
        let (mut memory, fit_range) = memory_with_fit(&fit);

        let loaded =
            load_opaque_component(&mut memory, fit_range, "/images/kernel@1", Placement::LoadCell)
                .unwrap();
        assert_eq!(memory.read(PhysAddr::new(0x8000), 64), &payload[..]);
        assert_eq!(loaded.size, 64);
    }

    #[test]
    fn test_load_outside_memory() {
        let fit = fit_blob(&[Image {
            name: "kernel@1",
            data: &[1; 16],
            props: &[("load", 0x10_0000)],
        }]);
        let (mut memory, fit_range) = memory_with_fit(&fit);
        let err =
            load_opaque_component(&mut memory, fit_range, "/images/kernel@1", Placement::LoadCell)
                .unwrap_err();
        assert!(matches!(err, LoadError::Write { .. }));
        assert!(memory.invalidated().is_empty());
    }

    #[test]
    fn test_missing_component() {
        let fit = fit_blob(&[]);
        let (mut memory, fit_range) = memory_with_fit(&fit);
        let err =
            load_opaque_component(&mut memory, fit_range, "/images/kernel@1", Placement::LoadCell)
                .unwrap_err();
        assert!(matches!(
            err,
            LoadError::Resolve {
                source: ExtentError::Node {
                    source: DevicetreeError::NodeNotFound { .. },
                    ..
                },
                ..
            }
        ));
    }

    #[test]
    fn test_load_tree_component_with_extra_space() {
        let donor = donor_tree();
        let fit = fit_blob(&[Image {
            name: "fdt@1",
            data: &donor,
            props: &[("load", 0x1000), ("extra-space", 0x400)],
        }]);
        let (mut memory, fit_range) = memory_with_fit(&fit);

        let loaded =
            load_tree_component(&mut memory, fit_range, "/images/fdt@1", Placement::LoadCell)
                .unwrap();
        assert_eq!(loaded.addr, PhysAddr::new(0x1000));
        assert_eq!(loaded.size, donor.len() + 0x400);

        let tree = Devicetree::from_bytes(memory.read(loaded.addr, loaded.size)).unwrap();
        assert_eq!(tree.total_size(), loaded.size);
        assert_eq!(tree.mem_rsvmap().count(), 1);
        let root = tree.root().unwrap();
        assert_eq!(tree.property_str(root, "compatible").unwrap(), "linux,dummy-virt");
        tree.find_node("/chosen").unwrap();
        assert!(memory.is_invalidated(loaded.range()));
    }

    #[test]
    fn test_load_tree_component_over_its_own_data() {
        let donor = donor_tree();
        let fit = fit_blob(&[Image {
            name: "fdt@1",
            data: &donor,
            props: &[("load", 0x8000), ("extra-space", 0x100)],
        }]);
        let (mut memory, fit_range) = memory_with_fit(&fit);

        let loaded =
            load_tree_component(&mut memory, fit_range, "/images/fdt@1", Placement::LoadCell)
                .unwrap();
        let mut buf = memory.read(loaded.addr, loaded.size).to_vec();
        let mut tree = DevicetreeMut::open(&mut buf).unwrap();
        assert!(tree.free_space() >= 0x100);
        let root = tree.find_node("/").unwrap();
        tree.add_subnode(root, "module@0").unwrap();
    }

    #[test]
    fn test_load_tree_component_just_after_its_data() {
        let donor = donor_tree();
        let image = |load| {
            fit_blob(&[Image {
                name: "fdt@1",
                data: &donor,
                props: &[("load", load), ("extra-space", 0x100)],
            }])
        };
        let data_addr = {
            let fit = image(0);
            let tree = Devicetree::from_bytes(&fit).unwrap();
            let node = tree.find_node("/images/fdt@1").unwrap();
            let data = tree.property(node, "data").unwrap().raw_value();
            FIT_ADDR.checked_add(tree.offset_of(data).unwrap()).unwrap()
        };
        let dest = data_addr.checked_add(8).unwrap();
        let fit = image(u32::try_from(dest.value()).unwrap());
        let (mut memory, fit_range) = memory_with_fit(&fit);

        let loaded =
            load_tree_component(&mut memory, fit_range, "/images/fdt@1", Placement::LoadCell)
                .unwrap();
        assert_eq!(loaded.addr, dest);
        assert_eq!(loaded.size, donor.len() + 0x100);

        let tree = Devicetree::from_bytes(memory.read(loaded.addr, loaded.size)).unwrap();
        assert_eq!(tree.total_size(), loaded.size);
        assert_eq!(tree.mem_rsvmap().count(), 1);
        let root = tree.root().unwrap();
        assert_eq!(tree.property_str(root, "compatible").unwrap(), "linux,dummy-virt");
        tree.find_node("/chosen").unwrap();
    }

    #[test]
    fn test_load_tree_component_rejects_opaque_data() {
        let fit = fit_blob(&[Image {
            name: "fdt@1",
            data: &[0; 64],
            props: &[("load", 0x1000)],
        }]);
        let (mut memory, fit_range) = memory_with_fit(&fit);
        let err = load_tree_component(&mut memory, fit_range, "/images/fdt@1", Placement::LoadCell)
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidTree { .. }));
        assert!(memory.invalidated().is_empty());
    }
}
