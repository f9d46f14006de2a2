//! USB transport layer for USB4000 devices.
//!
//! The protocol code only ever talks to a [`Transport`]: a blocking
//! "send bytes to an endpoint" / "receive bytes from an endpoint" pair.
//! [`UsbTransport`] backs it with a real `rusb` handle (requires the `usb`
//! feature); [`crate::sim::SimulatedDevice`] backs it with an in-memory
//! emulator.

use crate::error::Result;
use crate::profile::Endpoint;

/// Blocking bulk-transfer capability.
///
/// Implementations are used from one thread at a time and carry at most one
/// in-flight request. Timeouts are owned by the implementation and surface as
/// [`crate::Error::Timeout`].
pub trait Transport {
    /// Write `data` to an OUT endpoint.
    fn send(&mut self, endpoint: Endpoint, data: &[u8]) -> Result<()>;

    /// Read one bulk transfer of at most `length` bytes from an IN endpoint.
    ///
    /// A short packet ends the transfer early, so the returned buffer may be
    /// shorter than `length`. Callers that need exact sizes check them.
    fn receive(&mut self, endpoint: Endpoint, length: usize) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, endpoint: Endpoint, data: &[u8]) -> Result<()> {
        (**self).send(endpoint, data)
    }

    fn receive(&mut self, endpoint: Endpoint, length: usize) -> Result<Vec<u8>> {
        (**self).receive(endpoint, length)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, endpoint: Endpoint, data: &[u8]) -> Result<()> {
        (**self).send(endpoint, data)
    }

    fn receive(&mut self, endpoint: Endpoint, length: usize) -> Result<Vec<u8>> {
        (**self).receive(endpoint, length)
    }
}

#[cfg(feature = "usb")]
pub use usb::UsbTransport;

#[cfg(feature = "usb")]
mod usb {
    use super::Transport;
    use crate::error::{Error, Result};
    use crate::profile::{DeviceProfile, Endpoint};
    use rusb::{Context, DeviceHandle, UsbContext};
    use std::time::Duration;

    /// `rusb`-backed transport bound to one claimed interface.
    pub struct UsbTransport {
        handle: DeviceHandle<Context>,
        interface: u8,
        timeout: Duration,
    }

    impl UsbTransport {
        /// Open the device described by `profile`.
        ///
        /// This follows the usual libusb initialization sequence:
        /// 1. Open the device by vendor/product ID
        /// 2. Detach kernel driver (Linux only)
        /// 3. Set configuration to 1
        /// 4. Claim the profile's interface
        ///
        /// # Returns
        ///
        /// - `Ok(UsbTransport)` if a device was found and claimed
        /// - `Err(Error::DeviceNotFound)` if no matching device is connected
        pub fn open(profile: &DeviceProfile) -> Result<Self> {
            let context = Context::new()?;
            let handle = context
                .open_device_with_vid_pid(profile.vendor_id, profile.product_id)
                .ok_or(Error::DeviceNotFound {
                    vendor_id: profile.vendor_id,
                    product_id: profile.product_id,
                })?;
            let interface = profile.interface;

            #[cfg(target_os = "linux")]
            {
                if handle.kernel_driver_active(interface).unwrap_or(false) {
                    tracing::debug!("Detaching kernel driver from interface {}", interface);
                    if let Err(e) = handle.detach_kernel_driver(interface) {
                        tracing::warn!("Failed to detach kernel driver: {}", e);
                    }
                }
            }

            if let Err(e) = handle.set_active_configuration(1) {
                tracing::debug!("Failed to set configuration (may already be set): {}", e);
            }

            handle.claim_interface(interface)?;
            tracing::debug!(
                "Opened {} (VID {:#06x}, PID {:#06x})",
                profile.name,
                profile.vendor_id,
                profile.product_id
            );

            Ok(UsbTransport {
                handle,
                interface,
                timeout: profile.timeout,
            })
        }
    }

    fn map_usb_error(e: rusb::Error) -> Error {
        match e {
            rusb::Error::Timeout => Error::Timeout,
            rusb::Error::NoDevice => Error::Disconnected,
            other => Error::Usb(other),
        }
    }

    impl Transport for UsbTransport {
        fn send(&mut self, endpoint: Endpoint, data: &[u8]) -> Result<()> {
            let n = self
                .handle
                .write_bulk(endpoint.address(), data, self.timeout)
                .map_err(|e| {
                    tracing::debug!("Bulk OUT transfer failed: ep={}, error={}", endpoint, e);
                    map_usb_error(e)
                })?;
            if n != data.len() {
                return Err(Error::ShortWrite {
                    endpoint: endpoint.address(),
                    expected: data.len(),
                    actual: n,
                });
            }
            Ok(())
        }

        fn receive(&mut self, endpoint: Endpoint, length: usize) -> Result<Vec<u8>> {
            let mut buffer = vec![0u8; length];
            let n = self
                .handle
                .read_bulk(endpoint.address(), &mut buffer, self.timeout)
                .map_err(|e| {
                    tracing::debug!(
                        "Bulk IN transfer failed: ep={}, len={}, error={}",
                        endpoint,
                        length,
                        e
                    );
                    map_usb_error(e)
                })?;
            buffer.truncate(n);
            tracing::trace!("Bulk IN ep={} got {} bytes", endpoint, n);
            Ok(buffer)
        }
    }

    impl Drop for UsbTransport {
        fn drop(&mut self) {
            // Without releasing the interface the device stays claimed until
            // it is replugged.
            if let Err(e) = self.handle.release_interface(self.interface) {
                tracing::warn!("Failed to release USB interface: {}", e);
            }
            tracing::debug!("USB4000 transport closed");
        }
    }
}
