//! The hypervisor client seam.
//!
//! The core never talks to libvirt directly; it drives a [`Hypervisor`],
//! re-resolving every VM by name before acting on it.

pub mod libvirt;
pub mod memory;

use std::sync::Arc;

use thiserror::Error;

use crate::vm_state::{RunState, VirtualMachineHandle};

/// A failure reported by the hypervisor for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HypervisorFault {
    message: String,
}

impl HypervisorFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// One address reported on a guest interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub addr: String,
    pub prefix: u32,
}

/// A guest interface with the addresses the hypervisor knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub hwaddr: Option<String>,
    pub addrs: Vec<InterfaceAddress>,
}

/// Where the hypervisor learns guest addresses from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressSource {
    /// DHCP leases of the host-side virtual network.
    #[default]
    Lease,
    /// The QEMU guest agent running inside the VM.
    Agent,
    /// The host's ARP table.
    Arp,
}

impl AddressSource {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lease" => Some(AddressSource::Lease),
            "agent" => Some(AddressSource::Agent),
            "arp" => Some(AddressSource::Arp),
            _ => None,
        }
    }
}

/// Primitives the lifecycle core consumes from a hypervisor session.
///
/// `Domain` is the hypervisor's own reference to a VM. Callers obtain one
/// from [`Hypervisor::lookup`] at the start of each operation and drop it at
/// the end; it is never cached across operations.
pub trait Hypervisor {
    type Domain;

    fn define_from_description(&self, description: &str) -> Result<Self::Domain, HypervisorFault>;

    /// `Ok(None)` when no VM with this name exists.
    fn lookup(&self, name: &str) -> Result<Option<Self::Domain>, HypervisorFault>;

    fn info(&self, domain: &Self::Domain) -> Result<VirtualMachineHandle, HypervisorFault>;

    fn activate(&self, domain: &Self::Domain) -> Result<(), HypervisorFault>;

    fn undefine(&self, domain: &Self::Domain) -> Result<(), HypervisorFault>;

    fn destroy(&self, domain: &Self::Domain) -> Result<(), HypervisorFault>;

    /// Enumerate VMs in one of [`RunState::TRACKED`].
    fn list_by_state(&self, state: RunState) -> Result<Vec<VirtualMachineHandle>, HypervisorFault>;

    fn interface_addresses(&self, domain: &Self::Domain) -> Result<Vec<Interface>, HypervisorFault>;
}

impl<H: Hypervisor + ?Sized> Hypervisor for &H {
    type Domain = H::Domain;

    fn define_from_description(&self, description: &str) -> Result<Self::Domain, HypervisorFault> {
        (**self).define_from_description(description)
    }

    fn lookup(&self, name: &str) -> Result<Option<Self::Domain>, HypervisorFault> {
        (**self).lookup(name)
    }

    fn info(&self, domain: &Self::Domain) -> Result<VirtualMachineHandle, HypervisorFault> {
        (**self).info(domain)
    }

    fn activate(&self, domain: &Self::Domain) -> Result<(), HypervisorFault> {
        (**self).activate(domain)
    }

    fn undefine(&self, domain: &Self::Domain) -> Result<(), HypervisorFault> {
        (**self).undefine(domain)
    }

    fn destroy(&self, domain: &Self::Domain) -> Result<(), HypervisorFault> {
        (**self).destroy(domain)
    }

    fn list_by_state(&self, state: RunState) -> Result<Vec<VirtualMachineHandle>, HypervisorFault> {
        (**self).list_by_state(state)
    }

    fn interface_addresses(&self, domain: &Self::Domain) -> Result<Vec<Interface>, HypervisorFault> {
        (**self).interface_addresses(domain)
    }
}

impl<H: Hypervisor + ?Sized> Hypervisor for Arc<H> {
    type Domain = H::Domain;

    fn define_from_description(&self, description: &str) -> Result<Self::Domain, HypervisorFault> {
        (**self).define_from_description(description)
    }

    fn lookup(&self, name: &str) -> Result<Option<Self::Domain>, HypervisorFault> {
        (**self).lookup(name)
    }

    fn info(&self, domain: &Self::Domain) -> Result<VirtualMachineHandle, HypervisorFault> {
        (**self).info(domain)
    }

    fn activate(&self, domain: &Self::Domain) -> Result<(), HypervisorFault> {
        (**self).activate(domain)
    }

    fn undefine(&self, domain: &Self::Domain) -> Result<(), HypervisorFault> {
        (**self).undefine(domain)
    }

    fn destroy(&self, domain: &Self::Domain) -> Result<(), HypervisorFault> {
        (**self).destroy(domain)
    }

    fn list_by_state(&self, state: RunState) -> Result<Vec<VirtualMachineHandle>, HypervisorFault> {
        (**self).list_by_state(state)
    }

    fn interface_addresses(&self, domain: &Self::Domain) -> Result<Vec<Interface>, HypervisorFault> {
        (**self).interface_addresses(domain)
    }
}
