//! List commands implementation

use crate::buses;

/// List all supported buses
pub fn list_buses() {
    println!("Supported buses:");
    println!();
    for b in buses::available_buses() {
        if b.aliases.is_empty() {
            println!("  {:10} - {}", b.name, b.description);
        } else {
            println!(
                "  {:10} - {} (aliases: {})",
                b.name,
                b.description,
                b.aliases.join(", ")
            );
        }
    }
}
