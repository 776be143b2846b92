//! The boot sequence from the boot devicetree to the handoff.

use arrayvec::ArrayVec;
use devicetree::{Devicetree, DevicetreeError, DevicetreeMut, layout::Header};
use phys::{MemoryError, PhysAddr, PhysMemory, PhysRange};
use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};
use snafu_utils::Location;

use crate::{
    coherence::{self, CoherenceError},
    extent::Placement,
    loader::{self, LoadError, LoadedComponent},
    locate::{self, LocateError},
    patch::{self, PatchError},
};

/// Maximum number of components in a [`BootPlan`].
pub const MAX_COMPONENTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    /// Copied byte for byte.
    Opaque,
    /// A devicetree, reopened with the free space it asks for. Exactly one
    /// component of a plan is a tree; it becomes the target devicetree.
    Tree,
}

/// Module description added to the target devicetree for a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleSpec {
    /// First `compatible` entry, such as `multiboot,kernel`.
    pub role: &'static str,
    /// Root-level node name, such as `module@0`.
    pub node: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentSpec {
    /// Path of the component node in the FIT image.
    pub path: &'static str,
    pub kind: ComponentKind,
    pub placement: Placement,
    pub module: Option<ModuleSpec>,
}

impl ComponentSpec {
    #[must_use]
    pub const fn opaque(path: &'static str) -> Self {
        Self {
            path,
            kind: ComponentKind::Opaque,
            placement: Placement::LoadCell,
            module: None,
        }
    }

    #[must_use]
    pub const fn tree(path: &'static str) -> Self {
        Self {
            path,
            kind: ComponentKind::Tree,
            placement: Placement::LoadCell,
            module: None,
        }
    }

    #[must_use]
    pub const fn placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    #[must_use]
    pub const fn module(mut self, role: &'static str, node: &'static str) -> Self {
        self.module = Some(ModuleSpec { role, node });
        self
    }
}

/// Components to load, in load order.
///
/// The first component is the entry point of the next stage and must be
/// opaque. Components are loaded strictly in order, so a component whose
/// destination covers the data of another must come after it.
#[derive(Debug, Clone, Copy)]
pub struct BootPlan<'a> {
    components: &'a [ComponentSpec],
}

impl<'a> BootPlan<'a> {
    #[must_use]
    pub const fn new(components: &'a [ComponentSpec]) -> Self {
        Self { components }
    }

    #[must_use]
    pub fn components(&self) -> &'a [ComponentSpec] {
        self.components
    }

    /// Checks the shape of the plan and returns the index of the tree
    /// component.
    pub fn validate(&self) -> Result<usize, BootError> {
        #[expect(clippy::wildcard_imports)]
        use self::boot_error::*;

        let count = self.components.len();
        ensure!(count <= MAX_COMPONENTS, TooManyComponentsSnafu { count });
        let entry = self.components.first().context(EmptyPlanSnafu)?;
        ensure!(
            entry.kind == ComponentKind::Opaque,
            EntryNotOpaqueSnafu { path: entry.path }
        );
        let mut trees = self
            .components
            .iter()
            .enumerate()
            .filter(|(_, spec)| spec.kind == ComponentKind::Tree)
            .map(|(index, _)| index);
        let tree = trees.next().context(NoTreeSnafu)?;
        ensure!(trees.next().is_none(), MultipleTreesSnafu);
        Ok(tree)
    }
}

/// What the next stage is started with.
#[derive(Debug, Clone)]
pub struct Handoff {
    /// Address of the first component.
    pub entry: PhysAddr,
    /// The patched target devicetree.
    pub tree: PhysRange,
    /// Every component, in plan order.
    pub loaded: ArrayVec<LoadedComponent, MAX_COMPONENTS>,
}

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum BootError {
    #[snafu(display("boot plan is empty"))]
    EmptyPlan {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("boot plan has {count} components, at most {max} are supported", max = MAX_COMPONENTS))]
    TooManyComponents {
        count: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("first component {path:?} of the boot plan is a devicetree"))]
    EntryNotOpaque {
        path: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("boot plan has no devicetree component"))]
    NoTree {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("boot plan has more than one devicetree component"))]
    MultipleTrees {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("boot devicetree is not usable"))]
    BootTree {
        #[snafu(source)]
        source: CoherenceError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("cannot locate the FIT image"))]
    Locate {
        #[snafu(source)]
        source: LocateError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("cannot load component {path:?}"))]
    Load {
        path: &'static str,
        #[snafu(source)]
        source: LoadError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("target devicetree at {range} is not accessible"))]
    AccessTarget {
        range: PhysRange,
        #[snafu(source)]
        source: MemoryError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("cannot open devicetree at {range}"))]
    OpenTree {
        range: PhysRange,
        #[snafu(source)]
        source: DevicetreeError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("cannot describe component {path:?} in the target devicetree"))]
    Module {
        path: &'static str,
        #[snafu(source)]
        source: PatchError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("cannot copy the memory topology into the target devicetree"))]
    MemoryTopology {
        #[snafu(source)]
        source: PatchError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Runs the boot sequence for the boot devicetree at `boot_tree`.
///
/// 1. Makes the boot devicetree coherent and validates it.
/// 2. Locates the FIT image, falling back to the boot devicetree.
/// 3. Loads every component of `plan`, in order.
/// 4. Adds a module description to the target devicetree for every component
///    that asks for one.
/// 5. Copies the boot devicetree's memory topology into the target devicetree,
///    unless the components came from the boot devicetree itself.
///
/// Any failure leaves memory partially updated. The caller is expected to
/// stop rather than retry.
pub fn prepare<M>(mem: &mut M, boot_tree: PhysAddr, plan: &BootPlan<'_>) -> Result<Handoff, BootError>
where
    M: PhysMemory + ?Sized,
{
    #[expect(clippy::wildcard_imports)]
    use self::boot_error::*;

    let tree_index = plan.validate()?;

    let boot = coherence::make_tree_coherent(mem, boot_tree).context(BootTreeSnafu)?;
    if let Some(header) = mem.bytes(boot).ok().and_then(Header::read) {
        log::info!(
            "boot devicetree: {boot} (magic {:#010x}, version {}, {} bytes)",
            header.magic(),
            header.version(),
            header.total_size()
        );
    }

    let fit = locate::locate_subimage(mem, boot).context(LocateSnafu)?;
    let fit_is_boot_tree = fit.start() == boot.start();
    if fit_is_boot_tree {
        log::warn!("no FIT image in /chosen, loading components from the boot devicetree");
    } else {
        log::info!("FIT image: {fit}");
    }

    let mut loaded = ArrayVec::<LoadedComponent, MAX_COMPONENTS>::new();
    for spec in plan.components() {
        let path = spec.path;
        log::debug!("loading {path} ({:?}, {:?})", spec.kind, spec.placement);
        let component = match spec.kind {
            ComponentKind::Opaque => {
                loader::load_opaque_component(mem, fit, path, spec.placement)
            }
            ComponentKind::Tree => loader::load_tree_component(mem, fit, path, spec.placement),
        }
        .context(LoadSnafu { path })?;
        log::info!("loaded {path}: {}", component.range());
        loaded.try_push(component).ok().context(TooManyComponentsSnafu {
            count: plan.components().len(),
        })?;
    }

    let entry = loaded.first().context(EmptyPlanSnafu)?.addr;
    let target = loaded.get(tree_index).context(NoTreeSnafu)?.range();

    {
        let buf = mem
            .bytes_mut(target)
            .context(AccessTargetSnafu { range: target })?;
        let mut tree = DevicetreeMut::open(buf).context(OpenTreeSnafu { range: target })?;
        for (spec, component) in plan.components().iter().zip(&loaded) {
            let Some(module) = spec.module else {
                continue;
            };
            patch::add_module(&mut tree, component.range(), module.role, module.node)
                .context(ModuleSnafu { path: spec.path })?;
            log::debug!("{} described as {} ({})", spec.path, module.node, module.role);
        }
    }

    if fit_is_boot_tree {
        log::debug!("memory topology left as is");
    } else {
        let (source, buf) = mem
            .split_disjoint(boot, target)
            .context(AccessTargetSnafu { range: target })?;
        let source = Devicetree::from_bytes(source).context(OpenTreeSnafu { range: boot })?;
        let mut tree = DevicetreeMut::open(buf).context(OpenTreeSnafu { range: target })?;
        patch::sync_memory_topology(&mut tree, &source).context(MemoryTopologySnafu)?;
        log::debug!("memory topology copied from the boot devicetree");
    }

    Ok(Handoff {
        entry,
        tree: target,
        loaded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KERNEL: ComponentSpec =
        ComponentSpec::opaque("/images/kernel@1").module("multiboot,kernel", "module@0");
    const FDT: ComponentSpec = ComponentSpec::tree("/images/fdt@1");

    #[test]
    fn test_validate_plan() {
        assert_eq!(BootPlan::new(&[KERNEL, FDT]).validate().unwrap(), 1);

        let ramdisk = ComponentSpec::opaque("/images/ramdisk@1")
            .placement(Placement::RegPair)
            .module("multiboot,ramdisk", "module@1");
        assert_eq!(BootPlan::new(&[KERNEL, FDT, ramdisk]).validate().unwrap(), 1);
    }

    #[test]
    fn test_reject_malformed_plans() {
        assert!(matches!(
            BootPlan::new(&[]).validate().unwrap_err(),
            BootError::EmptyPlan { .. }
        ));
        assert!(matches!(
            BootPlan::new(&[FDT, KERNEL]).validate().unwrap_err(),
            BootError::EntryNotOpaque {
                path: "/images/fdt@1",
                ..
            }
        ));
        assert!(matches!(
            BootPlan::new(&[KERNEL]).validate().unwrap_err(),
            BootError::NoTree { .. }
        ));
        assert!(matches!(
            BootPlan::new(&[KERNEL, FDT, FDT]).validate().unwrap_err(),
            BootError::MultipleTrees { .. }
        ));
        assert!(matches!(
            BootPlan::new(&[KERNEL; MAX_COMPONENTS + 1]).validate().unwrap_err(),
            BootError::TooManyComponents { count: 9, .. }
        ));
    }

    #[test]
    fn test_component_spec_builders() {
        assert_eq!(KERNEL.kind, ComponentKind::Opaque);
        assert_eq!(KERNEL.placement, Placement::LoadCell);
        assert_eq!(
            KERNEL.module,
            Some(ModuleSpec {
                role: "multiboot,kernel",
                node: "module@0"
            })
        );
        assert_eq!(FDT.kind, ComponentKind::Tree);
        assert_eq!(FDT.module, None);
    }
}
