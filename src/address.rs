//! Address discovery for running VMs.
//!
//! [`AddressResolver::resolve`] is a single attempt. Guests get their
//! address asynchronously after activation (DHCP, guest agent), so callers
//! that want to block until one shows up use
//! [`AddressResolver::wait_for_address`], which layers bounded exponential
//! backoff on top of single attempts.

use std::net::IpAddr;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Operation, VmError};
use crate::hypervisor::{Hypervisor, HypervisorFault, Interface};
use crate::lifecycle::require;
use crate::vm_state::{NetworkAddress, RunState};

/// Polling policy for [`AddressResolver::wait_for_address`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Keep polling when the VM reports no interfaces at all. Lease-based
    /// sources report nothing until the guest's DHCP client has run.
    pub retry_no_address: bool,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            retry_no_address: true,
        }
    }
}

impl WaitPolicy {
    fn should_retry(&self, err: &VmError) -> bool {
        match err {
            VmError::Query { .. } | VmError::AddressPending { .. } => true,
            VmError::NoAddress { .. } => self.retry_no_address,
            _ => false,
        }
    }
}

pub struct AddressResolver<H> {
    hypervisor: H,
}

impl<H: Hypervisor> AddressResolver<H> {
    pub fn new(hypervisor: H) -> Self {
        Self { hypervisor }
    }

    /// Query the VM's address once.
    pub fn resolve(&self, name: &str) -> Result<NetworkAddress, VmError> {
        let (dom, handle) = require(&self.hypervisor, name, Operation::ResolveAddress)?;
        let query_err = |source: HypervisorFault| VmError::Query {
            name: name.to_string(),
            operation: Operation::ResolveAddress,
            source,
        };

        if handle.state != RunState::Running {
            return Err(query_err(HypervisorFault::new(format!(
                "VM is {}, not running",
                handle.state
            ))));
        }

        let ifaces = self
            .hypervisor
            .interface_addresses(&dom)
            .map_err(query_err)?;
        first_address(name, &ifaces)
    }

    /// Poll [`resolve`](Self::resolve) until an address appears, a
    /// non-retryable error occurs, or the policy's timeout elapses.
    ///
    /// Dropping the returned future cancels the wait at the next sleep.
    pub async fn wait_for_address(
        &self,
        name: &str,
        policy: &WaitPolicy,
    ) -> Result<NetworkAddress, VmError> {
        // A timeout past the clock's range means no deadline.
        let deadline = Instant::now().checked_add(policy.timeout);
        let mut backoff = policy.initial_backoff.max(Duration::from_millis(1));
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let err = match self.resolve(name) {
                Ok(addr) => {
                    tracing::info!(name, %addr, attempt, "address resolved");
                    return Ok(addr);
                }
                Err(e) => e,
            };

            if !policy.should_retry(&err) {
                return Err(err);
            }

            let delay = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::warn!(name, attempt, "gave up waiting for address");
                        return Err(VmError::AddressTimeout {
                            name: name.to_string(),
                            timeout: policy.timeout,
                            last: Box::new(err),
                        });
                    }
                    backoff.min(deadline - now)
                }
                None => backoff,
            };
            tracing::debug!(name, attempt, ?delay, "address not ready: {err}");
            tokio::time::sleep(delay).await;
            backoff = backoff.saturating_mul(2).min(policy.max_backoff);
        }
    }
}

/// Pick the primary address: the first non-loopback address on the first
/// interface that has one.
fn first_address(name: &str, ifaces: &[Interface]) -> Result<NetworkAddress, VmError> {
    if ifaces.is_empty() {
        return Err(VmError::NoAddress {
            name: name.to_string(),
        });
    }

    for iface in ifaces {
        for addr in &iface.addrs {
            match addr.addr.parse::<IpAddr>() {
                Ok(ip) if ip.is_loopback() => {}
                Ok(ip) => {
                    return Ok(NetworkAddress {
                        interface: iface.name.clone(),
                        ip,
                        prefix: addr.prefix,
                    });
                }
                Err(_) => {
                    tracing::warn!(name, iface = %iface.name, addr = %addr.addr, "ignoring unparsable address");
                }
            }
        }
    }

    Err(VmError::AddressPending {
        name: name.to_string(),
    })
}
