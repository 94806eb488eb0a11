//! VM lifecycle: define → activate → deactivate (undefine + destroy).
//!
//! [`plan`] is the pure transition table mapping `(Operation, RunState)` to
//! the expected post-state and the hypervisor steps to issue. The
//! [`LifecycleManager`] re-resolves the VM by name, asks the table what to
//! do, and executes the steps. It holds no state of its own between calls.

use crate::domain_xml::{SpecRenderer, TemplateId, TemplateRenderer};
use crate::error::{DefinitionFailure, Operation, TeardownFailure, VmError};
use crate::hypervisor::{Hypervisor, HypervisorFault};
use crate::machine::VirtualMachineSpec;
use crate::vm_state::{RunState, VirtualMachineHandle};

/// A single hypervisor primitive issued by a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Define,
    Activate,
    Undefine,
    Destroy,
}

/// Why the transition table refused an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NameTaken,
    NotDefined,
    AlreadyActive,
}

/// Pure transition: given an operation and the VM's current state, return
/// the state the VM should end up in and the steps to get there.
pub fn plan(operation: Operation, state: RunState) -> Result<(RunState, Vec<Step>), Rejection> {
    match (operation, state) {
        (Operation::Define, RunState::Undefined) => Ok((RunState::Defined, vec![Step::Define])),
        (Operation::Define, _) => Err(Rejection::NameTaken),

        (_, RunState::Undefined) => Err(Rejection::NotDefined),

        (Operation::Activate, RunState::Defined | RunState::Shutoff) => {
            Ok((RunState::Running, vec![Step::Activate]))
        }
        (Operation::Activate, RunState::Running | RunState::Paused) => {
            Err(Rejection::AlreadyActive)
        }

        // An undefined active domain turns transient; the destroy releases it.
        (Operation::Deactivate, RunState::Running | RunState::Paused) => {
            Ok((RunState::Undefined, vec![Step::Undefine, Step::Destroy]))
        }
        (Operation::Deactivate, RunState::Defined | RunState::Shutoff) => {
            Ok((RunState::Undefined, vec![Step::Undefine]))
        }

        (Operation::Inspect | Operation::ResolveAddress, state) => Ok((state, vec![])),
    }
}

/// Look a VM up by name and snapshot it. `Ok(None)` when it does not exist.
pub(crate) fn resolve<H: Hypervisor>(
    hypervisor: &H,
    name: &str,
    operation: Operation,
) -> Result<Option<(H::Domain, VirtualMachineHandle)>, VmError> {
    let query_err = |source: HypervisorFault| VmError::Query {
        name: name.to_string(),
        operation,
        source,
    };
    let Some(dom) = hypervisor.lookup(name).map_err(query_err)? else {
        return Ok(None);
    };
    let handle = hypervisor.info(&dom).map_err(query_err)?;
    tracing::debug!(name, state = %handle.state, %operation, "resolved VM");
    Ok(Some((dom, handle)))
}

/// Like [`resolve`], but a missing VM is a hard `NotFound` failure.
pub(crate) fn require<H: Hypervisor>(
    hypervisor: &H,
    name: &str,
    operation: Operation,
) -> Result<(H::Domain, VirtualMachineHandle), VmError> {
    resolve(hypervisor, name, operation)?.ok_or_else(|| VmError::NotFound {
        name: name.to_string(),
        operation,
    })
}

fn rejected(name: &str, operation: Operation, state: RunState, rejection: Rejection) -> VmError {
    let name = name.to_string();
    match rejection {
        Rejection::NameTaken => VmError::Definition {
            name,
            cause: DefinitionFailure::NameTaken,
        },
        Rejection::NotDefined => VmError::NotFound { name, operation },
        Rejection::AlreadyActive => VmError::InvalidState {
            name,
            operation,
            state,
        },
    }
}

pub struct LifecycleManager<H, R = TemplateRenderer> {
    hypervisor: H,
    renderer: R,
    template: TemplateId,
}

impl<H: Hypervisor> LifecycleManager<H, TemplateRenderer> {
    /// Manager rendering descriptions from the built-in template.
    pub fn new(hypervisor: H) -> Self {
        Self::with_renderer(hypervisor, TemplateRenderer, TemplateId::Builtin)
    }
}

impl<H: Hypervisor, R: SpecRenderer> LifecycleManager<H, R> {
    pub fn with_renderer(hypervisor: H, renderer: R, template: TemplateId) -> Self {
        Self {
            hypervisor,
            renderer,
            template,
        }
    }

    pub fn with_template(mut self, template: TemplateId) -> Self {
        self.template = template;
        self
    }

    /// Render the description for `spec` and define it. Redefining an
    /// existing name is an error, not a no-op.
    pub fn define(&self, spec: &VirtualMachineSpec) -> Result<VirtualMachineHandle, VmError> {
        let name = spec.name();
        let state = resolve(&self.hypervisor, name, Operation::Define)?
            .map_or(RunState::Undefined, |(_, handle)| handle.state);
        plan(Operation::Define, state)
            .map_err(|r| rejected(name, Operation::Define, state, r))?;

        let description = self
            .renderer
            .render(&self.template, spec)
            .map_err(|e| VmError::Definition {
                name: name.to_string(),
                cause: DefinitionFailure::Render(e),
            })?;

        tracing::debug!(name, template = %self.template, "submitting domain description");
        let dom = self
            .hypervisor
            .define_from_description(&description)
            .map_err(|e| VmError::Definition {
                name: name.to_string(),
                cause: DefinitionFailure::Rejected(e),
            })?;

        let handle = self.hypervisor.info(&dom).map_err(|source| VmError::Query {
            name: name.to_string(),
            operation: Operation::Define,
            source,
        })?;
        tracing::info!(name, uuid = %handle.uuid, "domain defined");
        Ok(handle)
    }

    /// Start a defined VM.
    pub fn activate(&self, name: &str) -> Result<(), VmError> {
        let (dom, handle) = require(&self.hypervisor, name, Operation::Activate)?;
        plan(Operation::Activate, handle.state)
            .map_err(|r| rejected(name, Operation::Activate, handle.state, r))?;

        self.hypervisor
            .activate(&dom)
            .map_err(|source| VmError::Activation {
                name: name.to_string(),
                source,
            })?;
        tracing::info!(name, "VM started");
        Ok(())
    }

    /// Remove the definition and stop the running instance. Both steps are
    /// attempted; any failure is reported.
    pub fn deactivate(&self, name: &str) -> Result<(), VmError> {
        let (dom, handle) = require(&self.hypervisor, name, Operation::Deactivate)?;
        let (_, steps) = plan(Operation::Deactivate, handle.state)
            .map_err(|r| rejected(name, Operation::Deactivate, handle.state, r))?;

        // A transient VM has no definition left; only the destroy applies.
        let steps = steps
            .into_iter()
            .filter(|step| handle.persistent || *step != Step::Undefine);

        let mut undefine_fault = None;
        let mut destroy_fault = None;
        for step in steps {
            match step {
                Step::Undefine => {
                    if let Err(e) = self.hypervisor.undefine(&dom) {
                        tracing::warn!(name, "undefine failed: {e}");
                        undefine_fault = Some(e);
                    } else {
                        tracing::info!(name, "domain undefined");
                    }
                }
                Step::Destroy => {
                    if let Err(e) = self.hypervisor.destroy(&dom) {
                        tracing::warn!(name, "destroy failed: {e}");
                        destroy_fault = Some(e);
                    } else {
                        tracing::info!(name, "VM destroyed");
                    }
                }
                Step::Define | Step::Activate => {}
            }
        }

        let failure = match (undefine_fault, destroy_fault) {
            (None, None) => return Ok(()),
            (Some(undefine), None) => TeardownFailure::Undefine(undefine),
            (None, Some(destroy)) => TeardownFailure::Destroy(destroy),
            (Some(undefine), Some(destroy)) => TeardownFailure::Both { undefine, destroy },
        };
        Err(VmError::Teardown {
            name: name.to_string(),
            failure,
        })
    }

    /// Current snapshot of a VM.
    pub fn inspect(&self, name: &str) -> Result<VirtualMachineHandle, VmError> {
        require(&self.hypervisor, name, Operation::Inspect).map(|(_, handle)| handle)
    }
}
