use virt::connect::Connect;
use virt::domain::Domain;
use virt::error::{self as virt_error, ErrorNumber};
use virt::sys;

use super::{AddressSource, Hypervisor, HypervisorFault, Interface, InterfaceAddress};
use crate::error::VmError;
use crate::vm_state::{RunState, VirtualMachineHandle};

struct ConnGuard(Connect);

impl std::ops::Deref for ConnGuard {
    type Target = Connect;
    fn deref(&self) -> &Connect {
        &self.0
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.0.close().ok();
    }
}

impl From<virt_error::Error> for HypervisorFault {
    fn from(e: virt_error::Error) -> Self {
        HypervisorFault::new(e.to_string())
    }
}

/// A libvirt session. The connection is closed on drop.
pub struct LibvirtHypervisor {
    conn: ConnGuard,
    address_source: AddressSource,
}

impl LibvirtHypervisor {
    pub fn connect(uri: &str, address_source: AddressSource) -> Result<Self, VmError> {
        // Suppress libvirt's default error handler that prints to stderr;
        // errors are only surfaced through Result values.
        virt_error::clear_error_callback();

        let conn = Connect::open(Some(uri))
            .map(ConnGuard)
            .map_err(|e| VmError::HypervisorUnavailable {
                uri: uri.to_string(),
                source: e.into(),
            })?;
        tracing::debug!(uri, "connected to libvirt");

        Ok(Self {
            conn,
            address_source,
        })
    }

    fn snapshot(dom: &Domain) -> Result<VirtualMachineHandle, virt_error::Error> {
        let (state, reason) = dom.get_state()?;
        Ok(VirtualMachineHandle {
            id: dom.get_id(),
            name: dom.get_name()?,
            uuid: dom.get_uuid_string()?,
            state: run_state_from(state, reason),
            persistent: dom.is_persistent()?,
        })
    }
}

/// Gather one listing group. Domains that vanished between the listing and
/// their per-domain queries are skipped; any other failure fails the group.
fn collect_group<E: std::fmt::Display>(
    results: impl IntoIterator<Item = Result<VirtualMachineHandle, E>>,
    vanished: impl Fn(&E) -> bool,
) -> Result<Vec<VirtualMachineHandle>, E> {
    let mut handles = Vec::new();
    for result in results {
        match result {
            Ok(handle) => handles.push(handle),
            Err(e) if vanished(&e) => {
                tracing::debug!("skipping domain that vanished during listing: {e}");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(handles)
}

/// Map libvirt's (state, reason) pair onto [`RunState`].
///
/// A domain that has never run since it was defined reports `SHUTOFF` with
/// reason `UNKNOWN`; every other shut-off reason means it ran before.
fn run_state_from(state: sys::virDomainState, reason: i32) -> RunState {
    match state {
        sys::VIR_DOMAIN_RUNNING | sys::VIR_DOMAIN_BLOCKED => RunState::Running,
        sys::VIR_DOMAIN_PAUSED | sys::VIR_DOMAIN_PMSUSPENDED => RunState::Paused,
        sys::VIR_DOMAIN_SHUTOFF if reason == sys::VIR_DOMAIN_SHUTOFF_UNKNOWN as i32 => {
            RunState::Defined
        }
        _ => RunState::Shutoff,
    }
}

fn list_flags(state: RunState) -> Option<sys::virConnectListAllDomainsFlags> {
    match state {
        RunState::Running => Some(sys::VIR_CONNECT_LIST_DOMAINS_RUNNING),
        RunState::Paused => Some(sys::VIR_CONNECT_LIST_DOMAINS_PAUSED),
        RunState::Shutoff => Some(sys::VIR_CONNECT_LIST_DOMAINS_SHUTOFF),
        RunState::Defined | RunState::Undefined => None,
    }
}

fn address_source_flag(source: AddressSource) -> sys::virDomainInterfaceAddressesSource {
    match source {
        AddressSource::Lease => sys::VIR_DOMAIN_INTERFACE_ADDRESSES_SRC_LEASE,
        AddressSource::Agent => sys::VIR_DOMAIN_INTERFACE_ADDRESSES_SRC_AGENT,
        AddressSource::Arp => sys::VIR_DOMAIN_INTERFACE_ADDRESSES_SRC_ARP,
    }
}

impl Hypervisor for LibvirtHypervisor {
    type Domain = Domain;

    fn define_from_description(&self, description: &str) -> Result<Domain, HypervisorFault> {
        Ok(Domain::define_xml(&self.conn, description)?)
    }

    fn lookup(&self, name: &str) -> Result<Option<Domain>, HypervisorFault> {
        match Domain::lookup_by_name(&self.conn, name) {
            Ok(dom) => Ok(Some(dom)),
            Err(e) if matches!(e.code(), ErrorNumber::NoDomain) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn info(&self, dom: &Domain) -> Result<VirtualMachineHandle, HypervisorFault> {
        Ok(Self::snapshot(dom)?)
    }

    fn activate(&self, dom: &Domain) -> Result<(), HypervisorFault> {
        dom.create()?;
        Ok(())
    }

    fn undefine(&self, dom: &Domain) -> Result<(), HypervisorFault> {
        Ok(dom.undefine()?)
    }

    fn destroy(&self, dom: &Domain) -> Result<(), HypervisorFault> {
        Ok(dom.destroy()?)
    }

    fn list_by_state(&self, state: RunState) -> Result<Vec<VirtualMachineHandle>, HypervisorFault> {
        let flags = list_flags(state)
            .ok_or_else(|| HypervisorFault::new(format!("cannot list VMs by state {state}")))?;
        let domains = self.conn.list_all_domains(flags)?;
        let handles = collect_group(domains.iter().map(Self::snapshot), |e: &virt_error::Error| {
            matches!(e.code(), ErrorNumber::NoDomain)
        })?;
        Ok(handles)
    }

    fn interface_addresses(&self, dom: &Domain) -> Result<Vec<Interface>, HypervisorFault> {
        let ifaces = dom.interface_addresses(address_source_flag(self.address_source), 0)?;
        Ok(ifaces
            .into_iter()
            .map(|iface| Interface {
                name: iface.name,
                hwaddr: Some(iface.hwaddr).filter(|h| !h.is_empty()),
                addrs: iface
                    .addrs
                    .into_iter()
                    .map(|a| InterfaceAddress {
                        addr: a.addr,
                        prefix: a.prefix as u32,
                    })
                    .collect(),
            })
            .collect())
    }
}
