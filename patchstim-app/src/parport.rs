//! Parallel-port trigger output through the Linux ppdev interface.

use patchstim_core::{NullTrigger, TriggerDevice};
use std::path::Path;

#[cfg(target_os = "linux")]
mod ppdev {
    use patchstim_core::{Result, StimError, TriggerDevice};
    use std::fs::{File, OpenOptions};
    use std::os::fd::AsRawFd;
    use std::path::Path;

    const PPCLAIM: u32 = 0x708b;
    const PPRELEASE: u32 = 0x708c;
    const PPWDATA: u32 = 0x4001_7086;

    /// Claimed `/dev/parportN`; each data pin is one trigger line.
    pub struct ParallelPortTrigger {
        file: File,
    }

    impl ParallelPortTrigger {
        pub fn open(path: &Path) -> std::io::Result<Self> {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            // SAFETY: PPCLAIM takes no argument and the fd is open for the call.
            if unsafe { libc::ioctl(file.as_raw_fd(), PPCLAIM as _) } != 0 {
                return Err(std::io::Error::last_os_error());
            }
            let mut port = Self { file };
            port.write(0).map_err(std::io::Error::other)?;
            Ok(port)
        }

        fn write(&mut self, mut byte: u8) -> Result<()> {
            // SAFETY: PPWDATA reads one byte through the pointer.
            let rc =
                unsafe { libc::ioctl(self.file.as_raw_fd(), PPWDATA as _, &mut byte as *mut u8) };
            if rc != 0 {
                return Err(StimError::Trigger(std::io::Error::last_os_error().to_string()));
            }
            Ok(())
        }
    }

    impl TriggerDevice for ParallelPortTrigger {
        fn pulse(&mut self, line: u8) -> Result<()> {
            if line > 7 {
                return Err(StimError::Trigger(format!("no data pin for line {line}")));
            }
            self.write(1 << line)?;
            self.write(0)
        }
    }

    impl Drop for ParallelPortTrigger {
        fn drop(&mut self) {
            let _ = self.write(0);
            // SAFETY: releases the claim taken in `open`.
            unsafe {
                libc::ioctl(self.file.as_raw_fd(), PPRELEASE as _);
            }
        }
    }
}

#[cfg(target_os = "linux")]
pub use ppdev::ParallelPortTrigger;

#[cfg(target_os = "linux")]
fn open_port(path: &Path) -> Option<Box<dyn TriggerDevice>> {
    match ParallelPortTrigger::open(path) {
        Ok(port) => {
            log::info!("trigger output on {}", path.display());
            Some(Box::new(port))
        }
        Err(e) => {
            log::warn!("cannot open {}: {e}", path.display());
            None
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn open_port(path: &Path) -> Option<Box<dyn TriggerDevice>> {
    log::warn!("parallel port {} is only supported on linux", path.display());
    None
}

/// The port at `path`, or a no-op device when there is none.
pub fn open_trigger(path: Option<&Path>) -> Box<dyn TriggerDevice> {
    path.and_then(open_port)
        .unwrap_or_else(|| Box::new(NullTrigger::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_ports_fall_back_to_a_null_device() {
        let mut device = open_trigger(Some(Path::new("/dev/patchstim-no-such-port")));
        assert!(!device.is_available());
        device.pulse(0).unwrap();
        assert!(!open_trigger(None).is_available());
    }
}
