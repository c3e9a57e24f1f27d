//! Command processor and sequence number commands

use super::Device;

/// Soft reset the controller
pub fn run_reset(ctl: &mut Device) -> Result<(), Box<dyn std::error::Error>> {
    ctl.soft_reset()?;
    println!("Device reset");
    Ok(())
}

/// Force a recalibration
pub fn run_calibrate(ctl: &mut Device) -> Result<(), Box<dyn std::error::Error>> {
    ctl.calibrate()?;
    println!("Calibration requested");
    Ok(())
}

/// Back up the running configuration
pub fn run_backup(ctl: &mut Device) -> Result<(), Box<dyn std::error::Error>> {
    ctl.backup()?;
    println!("Configuration backed up (config CRC 0x{:06X})", ctl.config_crc());
    Ok(())
}

/// Re-establish CRC framing
pub fn run_resync(ctl: &mut Device) -> Result<(), Box<dyn std::error::Error>> {
    if !ctl.state().is_crc_framed() {
        println!("Device uses plain framing, nothing to resync");
        return Ok(());
    }
    let attempts = ctl.resync()?;
    println!("Resynchronized after {} attempt(s), tx_seq {}", attempts, ctl.tx_seq());
    Ok(())
}

/// Show or overwrite the transmit sequence number
pub fn run_seq(ctl: &mut Device, set: Option<u8>) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(seq) = set {
        ctl.set_tx_seq(seq);
    }
    println!("tx_seq {}", ctl.tx_seq());
    Ok(())
}
