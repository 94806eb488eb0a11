use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::MAX_ADDRESS_TIMEOUT_S;

#[derive(Parser, Debug)]
#[command(
    name = "mykube",
    version,
    about = "Virtual machine lifecycle management on a single libvirt host"
)]
pub struct Cli {
    /// Path to config file (default: ~/.config/mykube/config.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// libvirt connection URI (overrides config)
    #[arg(long, global = true)]
    pub uri: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Define a VM from a disk image and a cloud-init seed
    Define {
        /// VM name
        name: String,

        /// Boot disk image (qcow2)
        #[arg(long)]
        image: PathBuf,

        /// cloud-init seed ISO
        #[arg(long)]
        cloud_init: PathBuf,

        /// Number of virtual CPUs
        #[arg(long, default_value_t = 2)]
        vcpus: u32,

        /// Memory size, e.g. 2G or 512M (a bare number is MiB)
        #[arg(long, default_value = "2G")]
        memory: String,

        /// Domain XML template (overrides config)
        #[arg(long)]
        template: Option<PathBuf>,
    },

    /// Start a defined VM
    Start { name: String },

    /// Undefine a VM and stop it if it is running
    Delete { name: String },

    /// Show a VM's current state
    Status { name: String },

    /// List VMs grouped by state
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print a running VM's address
    Ip {
        name: String,

        /// Poll until an address is assigned
        #[arg(long)]
        wait: bool,

        /// Give up waiting after this many seconds (overrides config)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_ADDRESS_TIMEOUT_S))]
        timeout: Option<u64>,
    },

    /// Open a key-authenticated SSH session to a running VM
    Connect {
        name: String,

        /// Remote user (overrides config)
        #[arg(long)]
        user: Option<String>,

        /// Private key file (overrides config)
        #[arg(long)]
        key: Option<PathBuf>,

        /// Expected host key: SHA256 fingerprint or OpenSSH public key
        #[arg(long)]
        host_key: Option<String>,
    },
}
