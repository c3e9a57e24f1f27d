//! mxtctl - maXTouch touch controller utility
//!
//! Talks to Atmel/Microchip maXTouch controllers over I2C through the
//! `mxt-core` protocol engine: reads the object directory, monitors
//! messages, applies `OBP_RAW` configuration files and flashes firmware
//! through the bootloader.
//!
//! Every command opens the bus named by `--bus` (or by the `--profile`
//! file), initializes a session and runs against it.

mod buses;
mod cli;
mod commands;
mod profile;

use clap::Parser;
use cli::{Cli, Commands};
use profile::Profile;

fn main() {
    let cli = Cli::parse();

    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Set log level based on verbosity
    if cli.quiet {
        log::set_max_level(log::LevelFilter::Warn);
    } else {
        match cli.verbose {
            0 => {} // default (info)
            1 => log::set_max_level(log::LevelFilter::Debug),
            _ => log::set_max_level(log::LevelFilter::Trace),
        }
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let profile = match &cli.profile {
        Some(path) => {
            let profile = Profile::from_file(path)?;
            log::info!("Loaded profile {}", path.display());
            profile
        }
        None => Profile::default(),
    };
    let engine = profile.engine_config()?;

    match cli.command {
        Commands::Info { bus } => {
            let mut ctl = commands::connect(&bus, &profile, engine)?;
            commands::info::run_info(&mut ctl)
        }
        Commands::Objects { bus, dump } => {
            let mut ctl = commands::connect(&bus, &profile, engine)?;
            commands::objects::run_objects(&mut ctl, dump)
        }
        Commands::Read {
            bus,
            target,
            instance,
            len,
        } => {
            let mut ctl = commands::connect(&bus, &profile, engine)?;
            commands::objects::run_read(&mut ctl, &target, instance, len)
        }
        Commands::Write {
            bus,
            target,
            instance,
            offset,
            data,
        } => {
            let mut ctl = commands::connect(&bus, &profile, engine)?;
            commands::objects::run_write(&mut ctl, &target, instance, offset, &data)
        }
        Commands::Messages {
            bus,
            count,
            timeout,
            raw,
        } => {
            let mut ctl = commands::connect(&bus, &profile, engine)?;
            commands::messages::run_messages(&mut ctl, count, timeout, raw)
        }
        Commands::ApplyConfig { bus, input } => {
            let mut ctl = commands::connect(&bus, &profile, engine)?;
            commands::config::run_apply_config(&mut ctl, &input)
        }
        Commands::ClearConfig { bus } => {
            let mut ctl = commands::connect(&bus, &profile, engine)?;
            commands::config::run_clear_config(&mut ctl)
        }
        Commands::Flash { bus, input } => {
            let mut ctl = commands::connect(&bus, &profile, engine)?;
            commands::firmware::run_flash(&mut ctl, &input)
        }
        Commands::Reset { bus } => {
            let mut ctl = commands::connect(&bus, &profile, engine)?;
            commands::control::run_reset(&mut ctl)
        }
        Commands::Calibrate { bus } => {
            let mut ctl = commands::connect(&bus, &profile, engine)?;
            commands::control::run_calibrate(&mut ctl)
        }
        Commands::Backup { bus } => {
            let mut ctl = commands::connect(&bus, &profile, engine)?;
            commands::control::run_backup(&mut ctl)
        }
        Commands::Resync { bus } => {
            let mut ctl = commands::connect(&bus, &profile, engine)?;
            commands::control::run_resync(&mut ctl)
        }
        Commands::Seq { bus, set } => {
            let mut ctl = commands::connect(&bus, &profile, engine)?;
            commands::control::run_seq(&mut ctl, set)
        }
        Commands::ListBuses => {
            commands::list_buses();
            Ok(())
        }
    }
}
