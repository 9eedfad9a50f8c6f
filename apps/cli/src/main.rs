use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use gbfw_core::protocol::constants::{
    ES2_DDBL1_MFR_ID, ES2_DDBL1_PROD_ID, GB_FIRMWARE_BOOT_STAGE_ONE,
};
use gbfw_core::{
    BootPolicy, DirectoryStore, FirmwareSession, InterfaceIdentity, SessionConfig,
    SessionOutcome, firmware_name,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Greybus firmware download server", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait for the ES2 bridge and serve firmware to its bootrom
    Serve {
        /// TOML session configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Firmware search directory (repeatable, overrides the config)
        #[arg(short = 'd', long = "firmware-dir")]
        firmware_dirs: Vec<PathBuf>,

        /// CPort of the firmware connection
        #[arg(long)]
        cport: Option<u16>,

        /// Reject images the bootrom reports as insecure
        #[arg(long)]
        require_secure: bool,

        /// Stop after this many requests
        #[arg(long)]
        max_requests: Option<usize>,

        #[command(flatten)]
        identity: IdentityArgs,
    },
    /// Print the firmware file name for an interface and boot stage
    Name {
        #[command(flatten)]
        identity: IdentityArgs,

        /// Boot stage
        #[arg(short, long, default_value_t = GB_FIRMWARE_BOOT_STAGE_ONE)]
        stage: u8,
    },
    /// Look a firmware image up in the search directories
    Check {
        /// Firmware search directory (repeatable)
        #[arg(short = 'd', long = "firmware-dir")]
        firmware_dirs: Vec<PathBuf>,

        #[command(flatten)]
        identity: IdentityArgs,

        /// Boot stage
        #[arg(short, long, default_value_t = GB_FIRMWARE_BOOT_STAGE_ONE)]
        stage: u8,
    },
    /// Print a default configuration, or write it to a file
    Config {
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Interface ids; all default to an ES2 bridge that has not reported its
/// VID/PID.
#[derive(ClapArgs, Debug)]
struct IdentityArgs {
    /// DDBL1 manufacturer id (hex)
    #[arg(long, value_parser = parse_hex)]
    mfr: Option<u32>,

    /// DDBL1 product id (hex)
    #[arg(long, value_parser = parse_hex)]
    prod: Option<u32>,

    /// Vendor id (hex)
    #[arg(long, value_parser = parse_hex)]
    vid: Option<u32>,

    /// Product id (hex)
    #[arg(long, value_parser = parse_hex)]
    pid: Option<u32>,
}

impl IdentityArgs {
    fn is_empty(&self) -> bool {
        self.mfr.is_none() && self.prod.is_none() && self.vid.is_none() && self.pid.is_none()
    }

    fn to_identity(&self) -> InterfaceIdentity {
        InterfaceIdentity::new(
            self.mfr.unwrap_or(ES2_DDBL1_MFR_ID),
            self.prod.unwrap_or(ES2_DDBL1_PROD_ID),
            self.vid.unwrap_or(0),
            self.pid.unwrap_or(0),
        )
    }
}

fn parse_hex(s: &str) -> Result<u32, std::num::ParseIntError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16)
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args.command) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Serve {
            config,
            firmware_dirs,
            cport,
            require_secure,
            max_requests,
            identity,
        } => {
            let mut config = match config {
                Some(path) => SessionConfig::load_from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => SessionConfig::default(),
            };
            if !firmware_dirs.is_empty() {
                config.firmware_dirs = firmware_dirs;
            }
            if let Some(cport) = cport {
                config.cport_id = cport;
            }
            if require_secure {
                config.boot_policy = BootPolicy::RequireSecure;
            }
            if max_requests.is_some() {
                config.max_requests = max_requests;
            }
            if !identity.is_empty() {
                config.identity = Some(identity.to_identity());
            }

            info!("Starting gbfw (nusb backend)...");
            match FirmwareSession::new(config).run()? {
                SessionOutcome::Booted(status) => info!(status = %status, "Module is booting"),
                SessionOutcome::Disconnected => info!("Module went away before booting"),
                SessionOutcome::RequestLimit => info!("Stopped at request limit"),
            }
        }
        Command::Name { identity, stage } => {
            println!("{}", firmware_name(&identity.to_identity(), stage));
        }
        Command::Check {
            firmware_dirs,
            identity,
            stage,
        } => {
            let store = if firmware_dirs.is_empty() {
                DirectoryStore::default()
            } else {
                DirectoryStore::new(firmware_dirs)
            };
            let name = firmware_name(&identity.to_identity(), stage);
            let path = store.locate(&name)?;
            let size = std::fs::metadata(&path)
                .with_context(|| format!("reading {}", path.display()))?
                .len();
            println!("{} ({} bytes)", path.display(), size);
        }
        Command::Config { output } => {
            let config = SessionConfig::default();
            match output {
                Some(path) => {
                    config.save_to_file(&path)?;
                    info!(path = %path.display(), "Configuration written");
                }
                None => print!("{}", config.to_toml()?),
            }
        }
    }
    Ok(())
}
