//! CLI argument definitions using clap derive

use crate::metadata::model::DEFAULT_EXTENT_SIZE;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// lvcache - attach and detach dm-cache pools on logical volumes
///
/// Keeps volume group metadata on disk and drives device-mapper through
/// dmsetup (or a simulator) while caches are created and removed.
#[derive(Parser, Debug)]
#[command(name = "lvcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "LVCACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage volume groups
    Vg(VgArgs),

    /// Manage logical volumes
    Lv(LvArgs),

    /// Show the logical volumes of a volume group
    Show(ShowArgs),

    /// Attach or detach cache pools
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the vg command
#[derive(Parser, Debug)]
pub struct VgArgs {
    #[command(subcommand)]
    pub action: VgAction,
}

/// Volume group subcommands
#[derive(Subcommand, Debug)]
pub enum VgAction {
    /// Create an empty volume group
    Create {
        /// Volume group name
        name: String,

        /// Extent size in 512-byte sectors
        #[arg(long, default_value_t = DEFAULT_EXTENT_SIZE)]
        extent_size: u64,
    },

    /// List volume groups
    List,
}

/// Kind of logical volume to create
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LvType {
    /// Plain linear LV
    Linear,
    /// Cache pool with hidden data and metadata sub-LVs
    CachePool,
}

/// Arguments for the lv command
#[derive(Parser, Debug)]
pub struct LvArgs {
    #[command(subcommand)]
    pub action: LvAction,
}

/// Logical volume subcommands
#[derive(Subcommand, Debug)]
pub enum LvAction {
    /// Create a logical volume
    Create {
        /// Volume group name
        vg: String,

        /// Logical volume name
        name: String,

        /// Size in extents (data extents for a cache pool)
        #[arg(short = 'l', long)]
        extents: u32,

        /// Physical volume to allocate from
        #[arg(long)]
        pv: String,

        /// LV type
        #[arg(long = "type", value_enum, default_value = "linear")]
        lv_type: LvType,

        /// Metadata extents for a cache pool
        #[arg(long, default_value_t = 1)]
        metadata_extents: u32,

        /// Default cache policy for a cache pool
        #[arg(long, default_value = "smq")]
        policy: String,
    },

    /// Remove an unused logical volume
    Remove {
        /// Volume group name
        vg: String,

        /// Logical volume name
        name: String,
    },
}

/// Arguments for the show command
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Volume group name
    pub vg: String,

    /// Include hidden LVs
    #[arg(short, long)]
    pub all: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Output format for show and vg list
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Put a cache pool in front of an LV
    Create {
        /// Volume group name
        vg: String,

        /// Cache pool LV
        #[arg(long)]
        pool: String,

        /// LV to cache
        #[arg(long)]
        origin: String,
    },

    /// Flush and detach the cache pool from an LV
    Remove {
        /// Volume group name
        vg: String,

        /// Cache LV
        lv: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}
