#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

//! Virtual machine lifecycle management on a single libvirt host: define a VM
//! from an image and a cloud-init seed, start it, find its address, open an
//! SSH session to it and tear it down again.

pub mod address;
pub mod cli;
pub mod config;
pub mod domain_xml;
pub mod error;
pub mod hypervisor;
pub mod lifecycle;
pub mod machine;
pub mod paths;
pub mod progress;
pub mod registry;
pub mod remote;
pub mod util;
pub mod vm_state;

pub use address::{AddressResolver, WaitPolicy};
pub use error::{Operation, VmError};
pub use hypervisor::Hypervisor;
pub use lifecycle::LifecycleManager;
pub use machine::VirtualMachineSpec;
pub use registry::{Listing, RegistryView};
pub use remote::{HostKeyPolicy, RemoteSession, SessionConfig, open_session};
pub use vm_state::{NetworkAddress, RunState, VirtualMachineHandle};
