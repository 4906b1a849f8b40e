// Copyright 2025-2026 CEMAXECUTER LLC

pub mod buffer;
pub mod config;
pub mod file;
pub mod test_source;

pub use buffer::SampleBuffer;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::{ConfigMap, Outcome};

/// Device types accepted on the command line. The first four are hardware
/// backends provided by external driver crates; `test` and `file` are built
/// in.
pub const DEVICE_TYPES: &[&str] = &["rtlsdr", "hackrf", "airspy", "bladerf", "test", "file"];

/// Which side of the sample buffer a device drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    /// Receive: the device fills the buffer from the ADC.
    Producer,
    /// Transmit: the device drains the buffer into the DAC.
    Consumer,
}

/// Common contract for all radio front-ends.
///
/// `start` launches the device's own streaming thread and returns; `stop`
/// signals it and joins. Configuration may be applied while streaming.
pub trait Device: Send {
    /// Apply device-level keys. Returns an outcome for every key the device
    /// recognizes; unrecognized keys are simply absent from the result.
    fn configure(&mut self, cfg: &ConfigMap) -> Vec<(String, Outcome)>;

    /// Tuned frequency in Hz.
    fn get_frequency(&self) -> u64;

    /// Device sample rate in Hz.
    fn get_sample_rate(&self) -> u32;

    /// Native sample size as (bytes per component, effective bits).
    fn get_device_sample_size(&self) -> (u8, u8);

    /// Begin streaming against `buffer` until `stop` is raised.
    fn start(
        &mut self,
        role: StreamRole,
        buffer: Arc<SampleBuffer>,
        stop: Arc<AtomicBool>,
    ) -> Result<(), String>;

    /// Signal the streaming thread and join it.
    fn stop(&mut self);

    /// Streaming failure, if one occurred since `start`.
    fn error(&self) -> Option<String> {
        None
    }

    /// Log device-specific settings (advisory).
    fn print_specific_parms(&self) {}
}

/// Enumerate devices of the given type.
pub fn list_devices(devtype: &str) -> Result<Vec<String>, String> {
    match devtype {
        "test" => Ok(vec!["synthetic tone generator".to_string()]),
        "file" => Ok(vec!["raw IQ file".to_string()]),
        "rtlsdr" | "hackrf" | "airspy" | "bladerf" => Err(format!(
            "{} support is not built into this binary",
            devtype
        )),
        other => Err(format!(
            "unknown device type '{}' (expected one of {})",
            other,
            DEVICE_TYPES.join(", ")
        )),
    }
}

/// Open a device by type and index.
pub fn open(devtype: &str, index: usize) -> Result<Box<dyn Device>, String> {
    let names = list_devices(devtype)?;
    if index >= names.len() {
        return Err(format!(
            "invalid device index {} ({} {} device(s) found)",
            index,
            names.len(),
            devtype
        ));
    }
    match devtype {
        "test" => Ok(Box::new(test_source::TestSource::new())),
        "file" => Ok(Box::new(file::FileDevice::new())),
        _ => unreachable!("list_devices already rejected '{}'", devtype),
    }
}
