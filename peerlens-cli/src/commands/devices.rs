//! Devices command - list capture devices

use anyhow::Result;
use peerlens_core::capture::{select_device, CaptureBackend, TestPatternBackend};
use peerlens_core::config::{CaptureProfile, ConfigFile};

/// List the devices a session can capture from
pub async fn devices() -> Result<()> {
    let config = ConfigFile::load_or_default();
    let backend = TestPatternBackend::new(&config.capture.pattern_devices);
    let devices = backend.devices();

    println!("Peerlens - Capture Devices ({} backend)\n", backend.name());

    if devices.is_empty() {
        println!("No devices configured.");
        println!("\nAdd facings to [capture] pattern_devices in the config file.");
        return Ok(());
    }

    let selected = select_device(&devices, Some(config.session.facing)).ok();

    println!("{:<12} {:<28} {:<10}", "ID", "Name", "Facing");
    println!("{}", "-".repeat(52));

    for device in &devices {
        let marker = if selected.as_ref() == Some(device) { " *" } else { "" };
        println!(
            "{:<12} {:<28} {:<10}{}",
            device.id, device.name, device.facing, marker
        );
    }

    println!(
        "\n* used by 'peerlens start' (preferred facing: {})",
        config.session.facing
    );
    println!("Capture profile: {}", CaptureProfile::STANDARD);

    Ok(())
}
