use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain_xml::RenderError;
use crate::hypervisor::HypervisorFault;
use crate::vm_state::RunState;

/// The operation a failure happened in, so every error is actionable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Define,
    Activate,
    Deactivate,
    Inspect,
    ResolveAddress,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Define => "define",
            Operation::Activate => "activate",
            Operation::Deactivate => "deactivate",
            Operation::Inspect => "inspect",
            Operation::ResolveAddress => "resolve address",
        })
    }
}

#[derive(Debug, Error)]
pub enum DefinitionFailure {
    #[error("invalid machine spec: {0}")]
    InvalidSpec(String),

    #[error("a VM with this name is already defined")]
    NameTaken,

    #[error("failed to render the domain description")]
    Render(#[source] RenderError),

    #[error("hypervisor rejected the domain description")]
    Rejected(#[source] HypervisorFault),
}

/// Which teardown step(s) failed. Both steps are always attempted.
#[derive(Debug, Error)]
pub enum TeardownFailure {
    #[error("undefine failed")]
    Undefine(#[source] HypervisorFault),

    #[error("destroy failed")]
    Destroy(#[source] HypervisorFault),

    #[error("undefine failed ({undefine}) and destroy failed")]
    Both {
        undefine: HypervisorFault,
        #[source]
        destroy: HypervisorFault,
    },
}

#[derive(Debug, Error, Diagnostic)]
pub enum VmError {
    #[error("failed to load config from {path}")]
    #[diagnostic(code(mykube::config))]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    #[diagnostic(code(mykube::config))]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    #[diagnostic(code(mykube::validation))]
    Validation { message: String },

    #[error("failed to connect to hypervisor at {uri}")]
    #[diagnostic(
        code(mykube::hypervisor),
        help("ensure libvirtd is running and you have access to the URI")
    )]
    HypervisorUnavailable {
        uri: String,
        #[source]
        source: HypervisorFault,
    },

    #[error("failed to define VM '{name}'")]
    #[diagnostic(
        code(mykube::define),
        help("fix the machine spec or template, or pick an unused name")
    )]
    Definition {
        name: String,
        #[source]
        cause: DefinitionFailure,
    },

    #[error("VM '{name}' is not defined (during {operation})")]
    #[diagnostic(code(mykube::not_found), help("run `mykube list` to see defined VMs"))]
    NotFound { name: String, operation: Operation },

    #[error("cannot {operation} VM '{name}' while it is {state}")]
    #[diagnostic(code(mykube::invalid_state))]
    InvalidState {
        name: String,
        operation: Operation,
        state: RunState,
    },

    #[error("failed to activate VM '{name}'")]
    #[diagnostic(
        code(mykube::activate),
        help("check host resources and `virsh start` output for details")
    )]
    Activation {
        name: String,
        #[source]
        source: HypervisorFault,
    },

    #[error("failed to deactivate VM '{name}'")]
    #[diagnostic(
        code(mykube::teardown),
        help("inspect the VM with `virsh list --all`; it may still hold resources")
    )]
    Teardown {
        name: String,
        #[source]
        failure: TeardownFailure,
    },

    #[error("VM '{name}' has no network interface")]
    #[diagnostic(code(mykube::no_address))]
    NoAddress { name: String },

    #[error("VM '{name}' has not been assigned an address yet")]
    #[diagnostic(code(mykube::address_pending))]
    AddressPending { name: String },

    #[error("failed to {operation} for VM '{name}'")]
    #[diagnostic(code(mykube::query))]
    Query {
        name: String,
        operation: Operation,
        #[source]
        source: HypervisorFault,
    },

    #[error("VM '{name}' reported no address within {timeout:?}")]
    #[diagnostic(code(mykube::address_timeout))]
    AddressTimeout {
        name: String,
        timeout: Duration,
        #[source]
        last: Box<VmError>,
    },

    #[error("failed to connect to {address}: {message}")]
    #[diagnostic(code(mykube::connection))]
    Connection { address: SocketAddr, message: String },

    #[error("{address} rejected public-key authentication for user '{user}'")]
    #[diagnostic(
        code(mykube::authentication),
        help("make sure the key is in the guest's authorized_keys (cloud-init)")
    )]
    Authentication { address: SocketAddr, user: String },

    #[error("host key presented by {address} does not satisfy the configured policy")]
    #[diagnostic(code(mykube::host_key))]
    HostKeyMismatch { address: SocketAddr },

    #[error("failed to load private key {path}: {message}")]
    #[diagnostic(code(mykube::credentials))]
    Credentials { path: String, message: String },
}

impl VmError {
    /// Whether retrying the same call unchanged can succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VmError::Query { .. }
                | VmError::AddressPending { .. }
                | VmError::AddressTimeout { .. }
                | VmError::Connection { .. }
                | VmError::HypervisorUnavailable { .. }
        )
    }
}
