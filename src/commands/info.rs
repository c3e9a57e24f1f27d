//! Info command implementation

use super::Device;
use mxt_core::SessionState;

/// Print the info block and session state
pub fn run_info(ctl: &mut Device) -> Result<(), Box<dyn std::error::Error>> {
    match ctl.state() {
        SessionState::Bootloader => {
            println!("Device is in bootloader mode");
            if let Some(addr) = ctl.bootloader_address() {
                println!("Bootloader address: 0x{:02x}", addr);
            }
            println!("Flash a firmware image to recover it");
            return Ok(());
        }
        SessionState::NotReady => return Err("Device is not ready".into()),
        _ => {}
    }

    let dir = ctl.directory().ok_or("Device has no object directory")?;
    let info = dir.info();

    println!("Family ID:      0x{:02X}", info.family_id);
    println!("Variant ID:     0x{:02X}", info.variant_id);
    println!("Firmware:       V{}", info.firmware());
    println!("Matrix:         {} x {}", info.matrix_x, info.matrix_y);
    println!("Objects:        {}", info.object_count);
    println!("Max report ID:  {}", dir.max_report_id());
    println!("Info CRC:       0x{:06X}", dir.info_crc());
    println!(
        "Framing:        {}",
        if ctl.state().is_crc_framed() {
            "CRC8 with sequence numbers"
        } else {
            "plain"
        }
    );
    println!("Config CRC:     0x{:06X}", ctl.config_crc());

    let status = ctl.t6_status();
    if !status.is_empty() {
        println!("Last status:    {:?}", status);
    }
    Ok(())
}
