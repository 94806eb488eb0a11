//! Host-wide listing of VMs, grouped by run state.

use crate::hypervisor::{Hypervisor, HypervisorFault};
use crate::vm_state::{RunState, VirtualMachineHandle};

/// A state group the hypervisor failed to enumerate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupFailure {
    pub state: RunState,
    pub fault: HypervisorFault,
}

/// Result of a listing. Entries are ordered by group (Running, Paused,
/// Shutoff) and, within a group, as the hypervisor returned them. Each
/// entry's `state` is the group it was listed under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub entries: Vec<VirtualMachineHandle>,
    pub failures: Vec<GroupFailure>,
}

impl Listing {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct RegistryView<H> {
    hypervisor: H,
}

impl<H: Hypervisor> RegistryView<H> {
    pub fn new(hypervisor: H) -> Self {
        Self { hypervisor }
    }

    /// Enumerate every tracked state group. A group that fails to list is
    /// skipped and recorded in [`Listing::failures`]; the others are still
    /// returned.
    pub fn list_all(&self) -> Listing {
        let mut listing = Listing::default();
        for group in RunState::TRACKED {
            match self.hypervisor.list_by_state(group) {
                Ok(handles) => {
                    tracing::debug!(state = %group, count = handles.len(), "listed group");
                    listing
                        .entries
                        .extend(handles.into_iter().map(|h| VirtualMachineHandle {
                            state: group,
                            ..h
                        }));
                }
                Err(fault) => {
                    tracing::warn!(state = %group, "failed to list VMs: {fault}");
                    listing.failures.push(GroupFailure {
                        state: group,
                        fault,
                    });
                }
            }
        }
        listing
    }
}
