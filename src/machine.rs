use std::path::{Path, PathBuf};

use crate::error::{DefinitionFailure, VmError};

/// Parameters a VM is defined from. Validated on construction and immutable
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachineSpec {
    name: String,
    image_path: PathBuf,
    cloud_init_path: PathBuf,
    vcpus: u32,
    memory_kib: u64,
}

impl VirtualMachineSpec {
    /// `memory_kib` is in KiB, libvirt's base unit.
    pub fn new(
        name: impl Into<String>,
        image_path: impl Into<PathBuf>,
        cloud_init_path: impl Into<PathBuf>,
        vcpus: u32,
        memory_kib: u64,
    ) -> Result<Self, VmError> {
        let spec = Self {
            name: name.into(),
            image_path: image_path.into(),
            cloud_init_path: cloud_init_path.into(),
            vcpus,
            memory_kib,
        };
        spec.validate().map_err(|message| VmError::Definition {
            name: spec.name.clone(),
            cause: DefinitionFailure::InvalidSpec(message),
        })?;
        Ok(spec)
    }

    fn validate(&self) -> Result<(), String> {
        validate_name(&self.name)?;
        if self.image_path.as_os_str().is_empty() {
            return Err("image path must not be empty".into());
        }
        if self.cloud_init_path.as_os_str().is_empty() {
            return Err("cloud-init path must not be empty".into());
        }
        if self.vcpus < 1 {
            return Err("vcpus must be at least 1".into());
        }
        if self.memory_kib < 1 {
            return Err("memory must be at least 1 KiB".into());
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub fn cloud_init_path(&self) -> &Path {
        &self.cloud_init_path
    }

    pub fn vcpus(&self) -> u32 {
        self.vcpus
    }

    pub fn memory_kib(&self) -> u64 {
        self.memory_kib
    }
}

/// VM names end up in domain XML and on the command line, so keep them to a
/// conservative character set.
pub(crate) fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".into());
    }
    let valid = name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    if !valid {
        return Err(format!(
            "name must match [a-zA-Z0-9][a-zA-Z0-9._-]* (got '{name}')"
        ));
    }
    Ok(())
}
