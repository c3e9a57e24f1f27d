//! Configuration apply and clear commands

use super::Device;
use indicatif::{ProgressBar, ProgressStyle};
use mxt_core::config::ApplyOutcome;
use std::path::Path;
use std::time::Duration;

/// Create a spinner progress bar style
fn create_spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?)
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(create_spinner_style().unwrap_or_else(|_| ProgressStyle::default_spinner()));
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Apply an `OBP_RAW` file
pub fn run_apply_config(ctl: &mut Device, input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(input)
        .map_err(|e| format!("Failed to read {}: {}", input.display(), e))?;

    let pb = spinner(format!("Applying {}...", input.display()));
    let result = ctl.apply_config(&text);
    pb.finish_and_clear();

    match result? {
        ApplyOutcome::Skipped(reason) => {
            println!("Configuration not written: {}", reason);
        }
        ApplyOutcome::Applied(report) => {
            println!(
                "Wrote {} object(s), {} bytes; {} record(s) skipped",
                report.objects_written, report.bytes_written, report.objects_skipped
            );
            match report.calculated_crc {
                Some(crc) if report.crc_matches => {
                    println!("Config CRC 0x{:06X} matches the file", crc)
                }
                Some(crc) => println!(
                    "Warning: calculated config CRC 0x{:06X} differs from the file",
                    crc
                ),
                None => println!("Warning: config CRC could not be calculated"),
            }
            println!("Device config CRC now 0x{:06X}", ctl.config_crc());
        }
    }
    Ok(())
}

/// Zero the configuration and back it up
pub fn run_clear_config(ctl: &mut Device) -> Result<(), Box<dyn std::error::Error>> {
    let pb = spinner("Clearing configuration...".to_string());
    let result = ctl.clear_config();
    pb.finish_and_clear();
    result?;
    println!("Configuration cleared; reset the device to run with it");
    Ok(())
}
