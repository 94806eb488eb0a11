//! End-to-end lifecycle scenarios against the in-memory hypervisor.

use std::sync::Arc;
use std::time::Duration;

use mykube::error::TeardownFailure;
use mykube::hypervisor::memory::{Call, MemoryHypervisor, interface};
use mykube::{
    AddressResolver, LifecycleManager, Operation, RegistryView, RunState, VirtualMachineSpec,
    VmError, WaitPolicy,
};

fn vm1_spec() -> VirtualMachineSpec {
    VirtualMachineSpec::new(
        "vm1",
        "/var/lib/libvirt/images/ubuntu-24.04.qcow2",
        "/var/lib/libvirt/images/vm1-seed.iso",
        2,
        2048 * 1024,
    )
    .unwrap()
}

fn spec(name: &str) -> VirtualMachineSpec {
    VirtualMachineSpec::new(name, "/images/base.qcow2", "/images/seed.iso", 1, 1024 * 1024).unwrap()
}

#[test]
fn define_then_lookup_is_defined() {
    let hv = MemoryHypervisor::new();
    let manager = LifecycleManager::new(&hv);
    manager.define(&vm1_spec()).unwrap();

    let handle = manager.inspect("vm1").unwrap();
    assert_eq!(handle.state, RunState::Defined);
    assert_eq!(handle.id, None);
    assert!(!handle.uuid.is_empty());
    assert!(handle.persistent);
}

#[test]
fn activate_never_defined_is_not_found() {
    let hv = MemoryHypervisor::new();
    let err = LifecycleManager::new(&hv).activate("nope").unwrap_err();
    assert!(matches!(
        err,
        VmError::NotFound {
            operation: Operation::Activate,
            ..
        }
    ));
}

#[test]
fn activate_then_deactivate_removes_vm() {
    let hv = MemoryHypervisor::new();
    let manager = LifecycleManager::new(&hv);
    manager.define(&vm1_spec()).unwrap();
    manager.activate("vm1").unwrap();
    assert_eq!(manager.inspect("vm1").unwrap().state, RunState::Running);

    manager.deactivate("vm1").unwrap();

    assert!(matches!(
        manager.inspect("vm1"),
        Err(VmError::NotFound { .. })
    ));
    let calls = hv.calls();
    assert!(calls.contains(&(Call::Undefine, "vm1".to_string())));
    assert!(calls.contains(&(Call::Destroy, "vm1".to_string())));
    assert!(RegistryView::new(&hv).list_all().entries.is_empty());
}

#[test]
fn resolve_address_on_defined_vm_is_query_error() {
    let hv = MemoryHypervisor::new();
    LifecycleManager::new(&hv).define(&vm1_spec()).unwrap();
    let err = AddressResolver::new(&hv).resolve("vm1").unwrap_err();
    assert!(matches!(
        err,
        VmError::Query {
            operation: Operation::ResolveAddress,
            ..
        }
    ));
}

#[test]
fn list_all_orders_by_state() {
    let hv = MemoryHypervisor::new();
    let manager = LifecycleManager::new(&hv);
    for name in ["stopped", "paused", "running"] {
        manager.define(&spec(name)).unwrap();
    }
    manager.activate("running").unwrap();
    manager.activate("paused").unwrap();
    hv.set_state("paused", RunState::Paused);
    manager.activate("stopped").unwrap();
    hv.set_state("stopped", RunState::Shutoff);

    let listing = RegistryView::new(&hv).list_all();
    let seen: Vec<(&str, RunState)> = listing
        .entries
        .iter()
        .map(|h| (h.name.as_str(), h.state))
        .collect();
    assert_eq!(
        seen,
        vec![
            ("running", RunState::Running),
            ("paused", RunState::Paused),
            ("stopped", RunState::Shutoff),
        ]
    );
}

#[test]
fn vm1_address_scenario() {
    let hv = MemoryHypervisor::new();
    let manager = LifecycleManager::new(&hv);
    let resolver = AddressResolver::new(&hv);

    manager.define(&vm1_spec()).unwrap();
    assert!(matches!(
        resolver.resolve("vm1"),
        Err(VmError::Query { .. })
    ));

    manager.activate("vm1").unwrap();
    assert!(matches!(
        resolver.resolve("vm1"),
        Err(VmError::NoAddress { .. })
    ));

    hv.set_interfaces("vm1", vec![interface("vnet0", &[("192.168.122.45", 24)])]);
    let address = resolver.resolve("vm1").unwrap();
    assert_eq!(address.ip.to_string(), "192.168.122.45");
    assert_eq!(address.socket_addr(22).to_string(), "192.168.122.45:22");

    let xml = hv.description("vm1").unwrap();
    assert!(xml.contains("<vcpu>2</vcpu>"));
    assert!(xml.contains("<memory unit='KiB'>2097152</memory>"));
}

#[test]
fn destroy_failure_after_undefine_is_teardown_error() {
    let hv = MemoryHypervisor::new();
    let manager = LifecycleManager::new(&hv);
    manager.define(&vm1_spec()).unwrap();
    manager.activate("vm1").unwrap();
    hv.fail(Call::Destroy, "Failed to terminate process: Device or resource busy");

    let err = manager.deactivate("vm1").unwrap_err();
    match err {
        VmError::Teardown {
            ref name,
            failure: TeardownFailure::Destroy(ref fault),
        } => {
            assert_eq!(name, "vm1");
            assert!(fault.message().contains("resource busy"));
        }
        ref other => panic!("expected destroy teardown failure, got {other:?}"),
    }
    assert!(!err.is_retryable());

    // The definition is gone but the transient instance keeps running.
    let handle = manager.inspect("vm1").unwrap();
    assert_eq!(handle.state, RunState::Running);
    assert!(!handle.persistent);

    // Retrying must not try to undefine the transient domain again.
    hv.clear_faults();
    manager.deactivate("vm1").unwrap();
    assert!(matches!(
        manager.inspect("vm1"),
        Err(VmError::NotFound { .. })
    ));
    let undefines = hv
        .calls()
        .into_iter()
        .filter(|(call, _)| *call == Call::Undefine)
        .count();
    assert_eq!(undefines, 1);
    assert_eq!(
        hv.calls().last(),
        Some(&(Call::Destroy, "vm1".to_string()))
    );
}

#[test]
fn redefine_after_delete_succeeds() {
    let hv = MemoryHypervisor::new();
    let manager = LifecycleManager::new(&hv);
    let first = manager.define(&vm1_spec()).unwrap();
    manager.deactivate("vm1").unwrap();
    let second = manager.define(&vm1_spec()).unwrap();
    assert_ne!(first.uuid, second.uuid);
}

#[test]
fn components_share_one_connection() {
    let hv = Arc::new(MemoryHypervisor::new());
    let manager = LifecycleManager::new(Arc::clone(&hv));
    let registry = RegistryView::new(Arc::clone(&hv));

    manager.define(&spec("a")).unwrap();
    manager.define(&spec("b")).unwrap();
    manager.activate("b").unwrap();

    let names: Vec<String> = registry
        .list_all()
        .entries
        .into_iter()
        .map(|h| h.name)
        .collect();
    assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn wait_for_address_after_boot() {
    let hv = Arc::new(MemoryHypervisor::new());
    let manager = LifecycleManager::new(Arc::clone(&hv));
    manager.define(&vm1_spec()).unwrap();
    manager.activate("vm1").unwrap();

    let dhcp = {
        let hv = Arc::clone(&hv);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            hv.set_interfaces("vm1", vec![interface("vnet0", &[])]);
            tokio::time::sleep(Duration::from_secs(4)).await;
            hv.set_interfaces("vm1", vec![interface("vnet0", &[("192.168.122.45", 24)])]);
        })
    };

    let address = AddressResolver::new(Arc::clone(&hv))
        .wait_for_address("vm1", &WaitPolicy::default())
        .await
        .unwrap();
    assert_eq!(address.ip.to_string(), "192.168.122.45");
    dhcp.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn wait_for_address_on_deleted_vm_stops() {
    let hv = MemoryHypervisor::new();
    let policy = WaitPolicy {
        timeout: Duration::from_secs(5),
        ..WaitPolicy::default()
    };
    let err = AddressResolver::new(&hv)
        .wait_for_address("vm1", &policy)
        .await
        .unwrap_err();
    assert!(matches!(err, VmError::NotFound { .. }));
}
