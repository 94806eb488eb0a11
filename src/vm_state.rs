//! Shared vocabulary for VM lifecycle state.
//!
//! The hypervisor is the single source of truth: every value here is a
//! snapshot taken at lookup time and is re-fetched by name before each
//! lifecycle operation.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Where a VM is in its lifecycle, as seen by the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// No hypervisor record. Inferred when lookup finds nothing.
    Undefined,

    /// Defined and never started since definition.
    Defined,

    Running,

    Paused,

    /// Defined and stopped after having run.
    Shutoff,
}

impl RunState {
    /// States enumerated by the registry view, in listing order.
    pub const TRACKED: [RunState; 3] = [RunState::Running, RunState::Paused, RunState::Shutoff];

    /// Display label used in listings.
    pub fn label(self) -> &'static str {
        match self {
            RunState::Undefined => "Undefined",
            RunState::Defined => "Defined",
            RunState::Running => "Running",
            RunState::Paused => "Paused",
            RunState::Shutoff => "Shutoff",
        }
    }

    /// Active VMs hold kernel-level resources (a QEMU process) and must be
    /// destroyed to release them.
    pub fn is_active(self) -> bool {
        matches!(self, RunState::Running | RunState::Paused)
    }

    /// Whether a VM in this state appears in the given registry group.
    /// The `Shutoff` group covers every inactive definition.
    pub fn listed_under(self, group: RunState) -> bool {
        match group {
            RunState::Shutoff => matches!(self, RunState::Defined | RunState::Shutoff),
            other => self == other,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A live view of one VM at the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachineHandle {
    /// Hypervisor-assigned id, only present while the VM is active.
    pub id: Option<u32>,
    pub name: String,
    pub uuid: String,
    pub state: RunState,
    /// False once an active VM has been undefined; it disappears on stop.
    pub persistent: bool,
}

/// A reachable address of a running VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAddress {
    pub interface: String,
    pub ip: IpAddr,
    pub prefix: u32,
}

impl NetworkAddress {
    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.ip, port)
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix)
    }
}
