//! Object table and register access commands

use super::{hex_bytes, Device};
use crate::cli::Target;
use mxt_core::protocol::object_name;

/// Bytes printed per line when dumping
const DUMP_WIDTH: usize = 16;

/// Print the object table, optionally with each readable object's contents
pub fn run_objects(ctl: &mut Device, dump: bool) -> Result<(), Box<dyn std::error::Error>> {
    let dir = ctl.directory().ok_or("Device has no object directory")?;

    println!(
        "{:<6} {:<36} {:>7} {:>5} {:>9} {:>11}",
        "Type", "Name", "Address", "Size", "Instances", "Report IDs"
    );
    println!("{}", "-".repeat(79));

    for obj in dir.objects() {
        let ids = obj
            .report_id_range
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "T{:<5} {:<36} {:>#7x} {:>5} {:>9} {:>11}",
            obj.object_type,
            object_name(obj.object_type).unwrap_or("unknown"),
            obj.start_address,
            obj.size(),
            obj.instances(),
            ids
        );
    }

    if !dump {
        return Ok(());
    }

    for d in ctl.dump_objects()? {
        println!();
        println!(
            "T{} {} instance {} @ 0x{:04X}:",
            d.object_type,
            object_name(d.object_type).unwrap_or("unknown"),
            d.instance,
            d.address
        );
        for (i, line) in d.data.chunks(DUMP_WIDTH).enumerate() {
            println!("  {:3}: {}", i * DUMP_WIDTH, hex_bytes(line));
        }
    }
    Ok(())
}

/// Read an object instance or `len` raw register bytes
pub fn run_read(
    ctl: &mut Device,
    target: &Target,
    instance: usize,
    len: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = match (target.object, target.register) {
        (Some(object_type), _) => ctl.read_object(object_type, instance)?,
        (None, Some(reg)) => ctl.read_register(reg, len)?,
        (None, None) => return Err("Select an object (-T) or a register (-r)".into()),
    };
    println!("{}", hex_bytes(&data));
    Ok(())
}

/// Write bytes into an object instance or raw registers
pub fn run_write(
    ctl: &mut Device,
    target: &Target,
    instance: usize,
    offset: usize,
    data: &[u8],
) -> Result<(), Box<dyn std::error::Error>> {
    match (target.object, target.register) {
        (Some(object_type), _) => {
            ctl.write_object(object_type, instance, offset, data)?;
            println!(
                "Wrote {} byte(s) to T{} instance {} at offset {}",
                data.len(),
                object_type,
                instance,
                offset
            );
        }
        (None, Some(reg)) => {
            ctl.write_register(reg, data)?;
            println!("Wrote {} byte(s) at 0x{:04X}", data.len(), reg);
        }
        (None, None) => return Err("Select an object (-T) or a register (-r)".into()),
    }
    Ok(())
}
