use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mykube::address::AddressResolver;
use mykube::cli::{Cli, Command};
use mykube::config::{self, Config};
use mykube::domain_xml::TemplateId;
use mykube::error::VmError;
use mykube::hypervisor::libvirt::LibvirtHypervisor;
use mykube::lifecycle::LifecycleManager;
use mykube::machine::VirtualMachineSpec;
use mykube::progress::{self, OutputMode};
use mykube::registry::{Listing, RegistryView};
use mykube::remote;
use mykube::util;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let mode = OutputMode::detect(cli.verbose);

    // Keep info logs out of the way of the spinner unless asked for.
    let filter = if cli.verbose {
        EnvFilter::new("mykube=debug")
    } else {
        let default = match mode {
            OutputMode::Interactive => "mykube=warn",
            OutputMode::Plain => "mykube=info",
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut config = config::load(cli.config.as_deref())?;
    if let Some(uri) = cli.uri {
        config.libvirt.uri = uri;
    }

    match cli.command {
        Command::Define {
            name,
            image,
            cloud_init,
            vcpus,
            memory,
            template,
        } => {
            let memory_kib = util::parse_memory_kib(&memory)?;
            let spec = VirtualMachineSpec::new(name, image, cloud_init, vcpus, memory_kib)?;
            let template = template
                .map(TemplateId::File)
                .unwrap_or_else(|| config.template());
            let hv = connect(&config)?;
            let handle = LifecycleManager::new(&hv)
                .with_template(template)
                .define(&spec)?;
            println!("Defined VM '{}' ({})", handle.name, handle.uuid);
        }
        Command::Start { name } => {
            let hv = connect(&config)?;
            LifecycleManager::new(&hv).activate(&name)?;
            println!("Started VM '{name}'");
        }
        Command::Delete { name } => {
            let hv = connect(&config)?;
            LifecycleManager::new(&hv).deactivate(&name)?;
            println!("Deleted VM '{name}'");
        }
        Command::Status { name } => {
            let hv = connect(&config)?;
            let handle = LifecycleManager::new(&hv).inspect(&name)?;
            println!("VM '{}': {}", handle.name, handle.state);
            println!("  UUID: {}", handle.uuid);
            if let Some(id) = handle.id {
                println!("  ID: {id}");
            }
        }
        Command::List { json } => {
            let hv = connect(&config)?;
            let listing = RegistryView::new(&hv).list_all();
            for failure in &listing.failures {
                eprintln!(
                    "warning: could not list {} VMs: {}",
                    failure.state, failure.fault
                );
            }
            if json {
                println!(
                    "{}",
                    facet_json::to_string(&ListJson::from(&listing)).expect("JSON serialization")
                );
            } else {
                print_table(&listing);
            }
        }
        Command::Ip {
            name,
            wait,
            timeout,
        } => {
            let hv = connect(&config)?;
            let resolver = AddressResolver::new(&hv);
            let address = if wait {
                let mut policy = config.wait_policy();
                if let Some(secs) = timeout {
                    policy.timeout = Duration::from_secs(secs);
                }
                progress::run_step(
                    mode,
                    &format!("Waiting for an address on '{name}'"),
                    resolver.wait_for_address(&name, &policy),
                    |addr| format!("{name}: {addr}"),
                )
                .await?
            } else {
                resolver.resolve(&name)?
            };
            println!("{}", address.ip);
        }
        Command::Connect {
            name,
            user,
            key,
            host_key,
        } => {
            if let Some(user) = user {
                config.ssh.user = user;
            }
            if let Some(key) = key {
                config.ssh.private_key = key.display().to_string();
            }
            if let Some(host_key) = host_key {
                config.ssh.host_key = host_key;
            }
            let session_config = config.session_config()?;

            let hv = connect(&config)?;
            let resolver = AddressResolver::new(&hv);
            let address = progress::run_step(
                mode,
                &format!("Waiting for an address on '{name}'"),
                resolver.wait_for_address(&name, &config.wait_policy()),
                |addr| format!("{name}: {addr}"),
            )
            .await?;

            let session = progress::run_step(
                mode,
                &format!("Opening SSH session to {}", address.ip),
                remote::open_session(&address, &session_config),
                |s| format!("Authenticated as {} on {}", s.user(), s.peer()),
            )
            .await?;
            println!("Connected to VM '{name}' at {}", session.peer());
            session.close().await?;
        }
    }

    Ok(())
}

fn connect(config: &Config) -> Result<LibvirtHypervisor, VmError> {
    LibvirtHypervisor::connect(&config.libvirt.uri, config.address_source())
}

fn print_table(listing: &Listing) {
    println!("ID\tNAME\tUUID\tSTATE");
    for entry in &listing.entries {
        let id = entry.id.map_or_else(|| "-".to_string(), |id| id.to_string());
        println!("{id}\t{}\t{}\t{}", entry.name, entry.uuid, entry.state);
    }
}

// ── JSON output structs ─────────────────────────────────────────────

#[derive(facet::Facet)]
struct ListJson {
    vms: Vec<VmJson>,
    failed_states: Vec<String>,
}

#[derive(facet::Facet)]
struct VmJson {
    id: Option<u32>,
    name: String,
    uuid: String,
    state: String,
}

impl From<&Listing> for ListJson {
    fn from(listing: &Listing) -> Self {
        Self {
            vms: listing
                .entries
                .iter()
                .map(|h| VmJson {
                    id: h.id,
                    name: h.name.clone(),
                    uuid: h.uuid.clone(),
                    state: h.state.label().to_string(),
                })
                .collect(),
            failed_states: listing
                .failures
                .iter()
                .map(|f| f.state.label().to_string())
                .collect(),
        }
    }
}
