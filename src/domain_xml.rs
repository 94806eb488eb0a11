//! Rendering a libvirt domain description from a template.
//!
//! Templates are plain domain XML with `{{placeholder}}` markers. Supported
//! placeholders: `name`, `image_path`, `cloud_init_path`, `vcpus`,
//! `memory_kib`. Every substituted value is XML-escaped.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::machine::VirtualMachineSpec;

/// Domain template shipped with the crate: a KVM guest booting the image
/// as a virtio disk, cloud-init seed as a read-only CD-ROM, NAT networking
/// on libvirt's default network and a serial console.
pub const BUILTIN_TEMPLATE: &str = r#"<domain type='kvm'>
  <name>{{name}}</name>
  <memory unit='KiB'>{{memory_kib}}</memory>
  <vcpu>{{vcpus}}</vcpu>
  <os>
    <type arch='x86_64' machine='q35'>hvm</type>
    <boot dev='hd'/>
  </os>
  <features>
    <acpi/>
    <apic/>
  </features>
  <devices>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='{{image_path}}'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <driver name='qemu' type='raw'/>
      <source file='{{cloud_init_path}}'/>
      <target dev='sda' bus='sata'/>
      <readonly/>
    </disk>
    <interface type='network'>
      <source network='default'/>
      <model type='virtio'/>
    </interface>
    <serial type='pty'>
      <target port='0'/>
    </serial>
    <console type='pty'>
      <target type='serial' port='0'/>
    </console>
  </devices>
</domain>
"#;

/// Which template a description is rendered from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TemplateId {
    #[default]
    Builtin,
    File(PathBuf),
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateId::Builtin => f.write_str("<builtin>"),
            TemplateId::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to read template {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("template {template} has no {{{{name}}}} placeholder")]
    MissingName { template: String },

    #[error("template {template} uses unknown placeholder '{placeholder}'")]
    UnknownPlaceholder {
        template: String,
        placeholder: String,
    },

    #[error("template {template} has an unterminated placeholder")]
    Unterminated { template: String },
}

/// Produces a ready-to-submit hardware description for a VM.
pub trait SpecRenderer {
    fn render(&self, template: &TemplateId, spec: &VirtualMachineSpec) -> Result<String, RenderError>;
}

/// Renders `{{placeholder}}` templates from a file or the built-in template.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl SpecRenderer for TemplateRenderer {
    fn render(&self, template: &TemplateId, spec: &VirtualMachineSpec) -> Result<String, RenderError> {
        let source = match template {
            TemplateId::Builtin => BUILTIN_TEMPLATE.to_string(),
            TemplateId::File(path) => {
                std::fs::read_to_string(path).map_err(|source| RenderError::Read {
                    path: path.display().to_string(),
                    source,
                })?
            }
        };
        substitute(&source, &template.to_string(), spec)
    }
}

fn substitute(source: &str, template: &str, spec: &VirtualMachineSpec) -> Result<String, RenderError> {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    let mut saw_name = false;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| RenderError::Unterminated {
            template: template.to_string(),
        })?;
        let key = after[..end].trim();
        let value = match key {
            "name" => {
                saw_name = true;
                spec.name().to_string()
            }
            "image_path" => spec.image_path().display().to_string(),
            "cloud_init_path" => spec.cloud_init_path().display().to_string(),
            "vcpus" => spec.vcpus().to_string(),
            "memory_kib" => spec.memory_kib().to_string(),
            other => {
                return Err(RenderError::UnknownPlaceholder {
                    template: template.to_string(),
                    placeholder: other.to_string(),
                });
            }
        };
        out.push_str(&xml_escape(&value));
        rest = &after[end + 2..];
    }
    out.push_str(rest);

    if !saw_name {
        return Err(RenderError::MissingName {
            template: template.to_string(),
        });
    }
    Ok(out)
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_spec() -> VirtualMachineSpec {
        VirtualMachineSpec::new("test-vm", "/tmp/overlay.qcow2", "/tmp/seed.iso", 2, 2048 * 1024)
            .unwrap()
    }

    fn render_builtin() -> String {
        TemplateRenderer
            .render(&TemplateId::Builtin, &test_spec())
            .unwrap()
    }

    #[test]
    fn xml_contains_vm_name() {
        assert!(render_builtin().contains("<name>test-vm</name>"));
    }

    #[test]
    fn xml_contains_resources() {
        let xml = render_builtin();
        assert!(xml.contains("<memory unit='KiB'>2097152</memory>"));
        assert!(xml.contains("<vcpu>2</vcpu>"));
    }

    #[test]
    fn xml_contains_image_and_seed() {
        let xml = render_builtin();
        assert!(xml.contains("<source file='/tmp/overlay.qcow2'/>"));
        assert!(xml.contains("<source file='/tmp/seed.iso'/>"));
    }

    #[test]
    fn xml_contains_devices() {
        let xml = render_builtin();
        assert!(xml.contains("bus='virtio'"));
        assert!(xml.contains("bus='sata'"));
        assert!(xml.contains("<source network='default'/>"));
        assert!(xml.contains("<serial type='pty'>"));
    }

    #[test]
    fn builtin_template_has_no_leftover_placeholders() {
        assert!(!render_builtin().contains("{{"));
    }

    #[test]
    fn file_template_is_rendered() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "<domain><name>{{{{ name }}}}</name><vcpu>{{{{vcpus}}}}</vcpu></domain>").unwrap();
        let template = TemplateId::File(f.path().to_path_buf());
        let xml = TemplateRenderer.render(&template, &test_spec()).unwrap();
        assert_eq!(xml, "<domain><name>test-vm</name><vcpu>2</vcpu></domain>");
    }

    #[test]
    fn missing_template_file_is_a_read_error() {
        let template = TemplateId::File(PathBuf::from("/nonexistent/vmTemplate.xml"));
        let err = TemplateRenderer.render(&template, &test_spec()).unwrap_err();
        assert!(matches!(err, RenderError::Read { .. }));
    }

    #[test]
    fn template_without_name_is_rejected() {
        let err = substitute("<domain/>", "t.xml", &test_spec()).unwrap_err();
        assert!(matches!(err, RenderError::MissingName { .. }));
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        let err = substitute("<name>{{name}}</name>{{disk}}", "t.xml", &test_spec()).unwrap_err();
        match err {
            RenderError::UnknownPlaceholder { placeholder, .. } => assert_eq!(placeholder, "disk"),
            other => panic!("expected UnknownPlaceholder, got {other:?}"),
        }
    }

    #[test]
    fn unterminated_placeholder_is_rejected() {
        let err = substitute("<name>{{name</name>", "t.xml", &test_spec()).unwrap_err();
        assert!(matches!(err, RenderError::Unterminated { .. }));
    }

    #[test]
    fn substituted_paths_are_escaped() {
        let spec =
            VirtualMachineSpec::new("vm1", "/images/a&b's.qcow2", "/tmp/seed.iso", 1, 1024).unwrap();
        let xml = substitute("<name>{{name}}</name><source file='{{image_path}}'/>", "t", &spec)
            .unwrap();
        assert!(xml.contains("/images/a&amp;b&apos;s.qcow2"));
    }
}
