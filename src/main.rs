use clap::{Parser, Subcommand};
use log::debug;
use openframe_bl::{
    BacklightError, BlankState, ChipsetConfig, DevMemMapper, OpenframeBacklight, SysfsPciBus,
    map_register,
};
use std::path::PathBuf;

/// Read or set the Openframe LCD backlight.
#[derive(Debug, Parser)]
#[command(name = "openframe-bl", version)]
struct Cli {
    /// PCI devices directory
    #[arg(long, default_value = "/sys/bus/pci/devices")]
    sysfs_root: PathBuf,

    /// Physical memory device
    #[arg(long, default_value = "/dev/mem")]
    mem: PathBuf,

    /// More logging (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the current brightness
    Get,
    /// Set the brightness
    Set {
        /// New brightness (0 to max)
        value: u32,
    },
    /// Turn the backlight off
    Blank,
    /// Turn the backlight on at a brightness (max if omitted)
    Unblank {
        /// New brightness (0 to max, defaults to max)
        value: Option<u32>,
    },
    /// Print device, register, and brightness details
    Info,
}

fn check_range(chip: &ChipsetConfig, value: u32) -> Result<u32, BacklightError> {
    if value > chip.max_brightness {
        return Err(BacklightError::InvalidBrightness {
            name: openframe_bl::DRIVER_NAME.to_string(),
            value,
            max: chip.max_brightness,
        });
    }
    Ok(value)
}

fn main() -> Result<(), BacklightError> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let chip = ChipsetConfig::POULSBO;
    let (device, window) = map_register(
        &chip,
        &SysfsPciBus::with_root(&cli.sysfs_root),
        &DevMemMapper::with_path(&cli.mem),
    )?;
    let backlight = OpenframeBacklight::new(chip, window);
    debug!("using {} at {:#x}", device.address(), backlight.phys_addr());

    match cli.command {
        Command::Get => println!("{}", backlight.get_intensity()),
        Command::Set { value } => {
            let value = check_range(&chip, value)?;
            backlight.set_intensity(value, BlankState::Unblank, BlankState::Unblank);
        }
        Command::Blank => {
            backlight.set_intensity(0, BlankState::Powerdown, BlankState::Unblank);
        }
        Command::Unblank { value } => {
            let value = check_range(&chip, value.unwrap_or(chip.max_brightness))?;
            backlight.set_intensity(value, BlankState::Unblank, BlankState::Unblank);
        }
        Command::Info => {
            let raw = backlight.read_raw();
            println!("device:     {}", device.address());
            println!("register:   {:#x}", backlight.phys_addr());
            println!("raw:        {:#010x}", raw);
            println!("brightness: {}", chip.decode(raw));
            println!("max:        {}", chip.max_brightness);
        }
    }

    Ok(())
}
