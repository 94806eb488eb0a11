//! In-memory hypervisor following libvirt's rules for persistent and
//! transient domains:
//!
//! - defining an existing name is rejected,
//! - starting an active domain is rejected,
//! - undefining an active domain makes it transient (it keeps running),
//!   undefining a transient domain is rejected,
//! - destroying a transient domain removes it, destroying a persistent one
//!   shuts it off, destroying an inactive one is rejected,
//! - interface addresses can only be queried while the domain is active.
//!
//! Faults can be injected per call kind, and every mutating call is
//! recorded so callers can check what was attempted.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Hypervisor, HypervisorFault, Interface, InterfaceAddress};
use crate::vm_state::{RunState, VirtualMachineHandle};

/// Kinds of hypervisor calls, for fault injection and the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Define,
    Lookup,
    Info,
    Activate,
    Undefine,
    Destroy,
    List(RunState),
    InterfaceAddresses,
}

/// Reference to a domain by UUID. Goes stale once the domain is removed,
/// even if another domain is later defined under the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDomain {
    uuid: String,
}

#[derive(Debug)]
struct Record {
    uuid: String,
    name: String,
    id: Option<u32>,
    state: RunState,
    persistent: bool,
    interfaces: Vec<Interface>,
    description: String,
}

impl Record {
    fn handle(&self) -> VirtualMachineHandle {
        VirtualMachineHandle {
            id: self.id,
            name: self.name.clone(),
            uuid: self.uuid.clone(),
            state: self.state,
            persistent: self.persistent,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    records: Vec<Record>,
    next_id: u32,
    next_uuid: u64,
    faults: HashMap<Call, HypervisorFault>,
    calls: Vec<(Call, String)>,
}

impl Inner {
    fn fault(&self, call: Call) -> Result<(), HypervisorFault> {
        match self.faults.get(&call) {
            Some(fault) => Err(fault.clone()),
            None => Ok(()),
        }
    }

    fn position(&self, domain: &MemoryDomain) -> Result<usize, HypervisorFault> {
        self.records
            .iter()
            .position(|r| r.uuid == domain.uuid)
            .ok_or_else(|| {
                HypervisorFault::new(format!(
                    "Domain not found: no domain with matching uuid '{}'",
                    domain.uuid
                ))
            })
    }

    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn name_of(&self, domain: &MemoryDomain) -> String {
        self.records
            .iter()
            .find(|r| r.uuid == domain.uuid)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| domain.uuid.clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryHypervisor {
    inner: Mutex<Inner>,
}

impl MemoryHypervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Every mutation finishes before the guard drops, so a panicking
        // holder leaves the records consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent call of this kind fail with `message`.
    pub fn fail(&self, call: Call, message: &str) {
        self.lock().faults.insert(call, HypervisorFault::new(message));
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Replace the interfaces reported for a VM. Returns false if no VM has
    /// this name.
    pub fn set_interfaces(&self, name: &str, interfaces: Vec<Interface>) -> bool {
        let mut inner = self.lock();
        match inner.records.iter_mut().find(|r| r.name == name) {
            Some(record) => {
                record.interfaces = interfaces;
                true
            }
            None => false,
        }
    }

    /// Change a VM's state out-of-band, the way an operator running `virsh`
    /// directly would. Returns false if no VM has this name.
    pub fn set_state(&self, name: &str, state: RunState) -> bool {
        let mut inner = self.lock();
        let Some(idx) = inner.records.iter().position(|r| r.name == name) else {
            return false;
        };
        let id = match (state.is_active(), inner.records[idx].id) {
            (true, Some(id)) => Some(id),
            (true, None) => Some(inner.allocate_id()),
            (false, _) => None,
        };
        let record = &mut inner.records[idx];
        record.state = state;
        record.id = id;
        true
    }

    /// Mutating calls attempted so far, with the VM name they targeted.
    pub fn calls(&self) -> Vec<(Call, String)> {
        self.lock().calls.clone()
    }

    /// The description a VM was defined from.
    pub fn description(&self, name: &str) -> Option<String> {
        self.lock()
            .records
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.description.clone())
    }
}

/// Build an interface record the way a DHCP lease source reports it.
pub fn interface(name: &str, addrs: &[(&str, u32)]) -> Interface {
    Interface {
        name: name.to_string(),
        hwaddr: None,
        addrs: addrs
            .iter()
            .map(|(addr, prefix)| InterfaceAddress {
                addr: (*addr).to_string(),
                prefix: *prefix,
            })
            .collect(),
    }
}

fn extract_name(description: &str) -> Option<&str> {
    let start = description.find("<name>")? + "<name>".len();
    let len = description[start..].find("</name>")?;
    let name = description[start..start + len].trim();
    (!name.is_empty()).then_some(name)
}

impl Hypervisor for MemoryHypervisor {
    type Domain = MemoryDomain;

    fn define_from_description(&self, description: &str) -> Result<MemoryDomain, HypervisorFault> {
        let mut inner = self.lock();
        let name = extract_name(description)
            .ok_or_else(|| HypervisorFault::new("XML error: missing <name> element"))?
            .to_string();
        inner.calls.push((Call::Define, name.clone()));
        inner.fault(Call::Define)?;

        if let Some(existing) = inner.records.iter().find(|r| r.name == name) {
            return Err(HypervisorFault::new(format!(
                "operation failed: domain '{name}' already exists with uuid {}",
                existing.uuid
            )));
        }

        inner.next_uuid += 1;
        let uuid = format!("6d1f8a3c-0000-4000-8000-{:012x}", inner.next_uuid);
        inner.records.push(Record {
            uuid: uuid.clone(),
            name,
            id: None,
            state: RunState::Defined,
            persistent: true,
            interfaces: Vec::new(),
            description: description.to_string(),
        });
        Ok(MemoryDomain { uuid })
    }

    fn lookup(&self, name: &str) -> Result<Option<MemoryDomain>, HypervisorFault> {
        let inner = self.lock();
        inner.fault(Call::Lookup)?;
        Ok(inner
            .records
            .iter()
            .find(|r| r.name == name)
            .map(|r| MemoryDomain {
                uuid: r.uuid.clone(),
            }))
    }

    fn info(&self, domain: &MemoryDomain) -> Result<VirtualMachineHandle, HypervisorFault> {
        let inner = self.lock();
        inner.fault(Call::Info)?;
        let idx = inner.position(domain)?;
        Ok(inner.records[idx].handle())
    }

    fn activate(&self, domain: &MemoryDomain) -> Result<(), HypervisorFault> {
        let mut inner = self.lock();
        let name = inner.name_of(domain);
        inner.calls.push((Call::Activate, name));
        inner.fault(Call::Activate)?;
        let idx = inner.position(domain)?;
        if inner.records[idx].state.is_active() {
            return Err(HypervisorFault::new(
                "Requested operation is not valid: domain is already running",
            ));
        }
        let id = inner.allocate_id();
        let record = &mut inner.records[idx];
        record.state = RunState::Running;
        record.id = Some(id);
        Ok(())
    }

    fn undefine(&self, domain: &MemoryDomain) -> Result<(), HypervisorFault> {
        let mut inner = self.lock();
        let name = inner.name_of(domain);
        inner.calls.push((Call::Undefine, name));
        inner.fault(Call::Undefine)?;
        let idx = inner.position(domain)?;
        if !inner.records[idx].persistent {
            return Err(HypervisorFault::new(
                "Requested operation is not valid: cannot undefine transient domain",
            ));
        }
        if inner.records[idx].state.is_active() {
            inner.records[idx].persistent = false;
        } else {
            inner.records.remove(idx);
        }
        Ok(())
    }

    fn destroy(&self, domain: &MemoryDomain) -> Result<(), HypervisorFault> {
        let mut inner = self.lock();
        let name = inner.name_of(domain);
        inner.calls.push((Call::Destroy, name));
        inner.fault(Call::Destroy)?;
        let idx = inner.position(domain)?;
        if !inner.records[idx].state.is_active() {
            return Err(HypervisorFault::new(
                "Requested operation is not valid: domain is not running",
            ));
        }
        if inner.records[idx].persistent {
            let record = &mut inner.records[idx];
            record.state = RunState::Shutoff;
            record.id = None;
        } else {
            inner.records.remove(idx);
        }
        Ok(())
    }

    fn list_by_state(&self, state: RunState) -> Result<Vec<VirtualMachineHandle>, HypervisorFault> {
        let inner = self.lock();
        inner.fault(Call::List(state))?;
        if !RunState::TRACKED.contains(&state) {
            return Err(HypervisorFault::new(format!("cannot list VMs by state {state}")));
        }
        let handles: Vec<VirtualMachineHandle> = inner
            .records
            .iter()
            .filter(|r| r.state.listed_under(state))
            .map(Record::handle)
            .collect();
        // Each listed domain is queried for its details, like libvirt does.
        if !handles.is_empty() {
            inner.fault(Call::Info)?;
        }
        Ok(handles)
    }

    fn interface_addresses(&self, domain: &MemoryDomain) -> Result<Vec<Interface>, HypervisorFault> {
        let inner = self.lock();
        inner.fault(Call::InterfaceAddresses)?;
        let idx = inner.position(domain)?;
        let record = &inner.records[idx];
        if !record.state.is_active() {
            return Err(HypervisorFault::new(
                "Requested operation is not valid: domain is not running",
            ));
        }
        Ok(record.interfaces.clone())
    }
}
