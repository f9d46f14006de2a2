//! Simple CLI tool to query a USB4000 spectrometer.
//!
//! Prints the serial number, bench configuration, bus speed, PCB temperature
//! and the wavelength calibration stored in the device EEPROM.
//!
//! NOTE: on Linux the device node must be accessible to the current user
//! (udev rule for VID 0x2457 / PID 0x1022).

use rs_usb4000::{DeviceProfile, Usb4000};
use std::process;

fn main() {
    tracing_subscriber::fmt::init();

    match run() {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("\nTroubleshooting:");
            eprintln!("- Check that the spectrometer is plugged in (lsusb | grep 2457:1022)");
            eprintln!("- Check device permissions");
            process::exit(1);
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let profile = DeviceProfile::usb4000();
    println!(
        "Opening {} (VID {:#06x}, PID {:#06x})...\n",
        profile.name, profile.vendor_id, profile.product_id
    );

    let mut device = Usb4000::open(profile)?;
    device.initialize()?;

    let info = device.device_info()?;
    println!("Serial Num:   {}", info.serial_number);
    println!("Grating:      {}", info.bench.grating);
    println!("Filter:       {}", info.bench.filter);
    println!("Slit size:    {} \u{00B5}m", info.bench.slit);
    println!("Pixel Count:  {}", info.pixel_count);
    println!();
    println!("Firmware cfg: {}", info.firmware_config);
    println!("USB Speed:    {}", info.bus_speed());
    println!("PCB Temp:     {:.2} \u{00B0}C", info.pcb_temperature_c);
    println!();
    for (order, c) in info.calibration.to_array().iter().enumerate() {
        println!("Cal Coeff {}:  {:e}", order, c);
    }

    Ok(())
}
