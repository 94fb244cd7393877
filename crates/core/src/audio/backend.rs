//! Capture backend for the system audio host.

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, Stream, StreamConfig,
};
use tracing::{debug, warn};

use super::{BlockCallback, CaptureBackend, Device, DeviceId, ErrorCallback};
use crate::{CaptureConfig, CurrentsError, Result};

/// Opens input streams on the platform's default audio host.
pub struct CpalBackend {
    host: cpal::Host,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    fn find(&self, id: &DeviceId) -> Result<cpal::Device> {
        let mut devices = self
            .host
            .input_devices()
            .map_err(|e| CurrentsError::Backend(e.to_string()))?;
        devices
            .find(|d| d.name().is_ok_and(|name| name == id.as_str()))
            .ok_or_else(|| {
                CurrentsError::Backend(format!("capture device {:?} is gone", id.as_str()))
            })
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CpalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalBackend")
            .field("host", &self.host.id().name())
            .finish()
    }
}

impl CaptureBackend for CpalBackend {
    type Stream = Stream;

    fn devices(&self) -> Result<Vec<Device>> {
        let devices = self
            .host
            .input_devices()
            .map_err(|e| CurrentsError::Backend(e.to_string()))?;

        let mut result = Vec::new();
        for device in devices {
            match device.name() {
                Ok(name) => result.push(Device::new(name.clone(), DeviceId::new(name))),
                Err(e) => warn!("skipping unreadable capture device: {e}"),
            }
        }
        debug!(count = result.len(), "enumerated capture devices");
        Ok(result)
    }

    fn open(
        &self,
        device: &Device,
        config: &CaptureConfig,
        mut on_block: BlockCallback,
        mut on_error: ErrorCallback,
    ) -> Result<Stream> {
        let handle = self.find(&device.id)?;
        let unsupported = || CurrentsError::UnsupportedFormat {
            channels: config.channels,
            sample_rate: config.sample_rate,
        };

        let supported = handle
            .supported_input_configs()
            .map_err(|e| CurrentsError::Backend(e.to_string()))?
            .any(|c| {
                c.sample_format() == SampleFormat::F32
                    && u32::from(c.channels()) == config.channels
                    && c.min_sample_rate().0 <= config.sample_rate
                    && c.max_sample_rate().0 >= config.sample_rate
            });
        if !supported {
            return Err(unsupported());
        }

        let stream_config = StreamConfig {
            channels: u16::try_from(config.channels).map_err(|_| unsupported())?,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let mut scratch = Vec::new();
        let stream = handle
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    scratch.clear();
                    scratch.extend(data.iter().flat_map(|s| s.to_le_bytes()));
                    on_block(&scratch);
                },
                move |err| on_error(CurrentsError::Backend(err.to_string())),
                None,
            )
            .map_err(|e| CurrentsError::Backend(e.to_string()))?;

        stream
            .play()
            .map_err(|e| CurrentsError::Backend(e.to_string()))?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "needs audio hardware"]
    fn lists_input_devices() {
        let backend = CpalBackend::new();
        let devices = backend.devices().unwrap();
        assert!(devices.iter().all(|d| !d.name.is_empty()));
    }

    #[test]
    #[ignore = "needs audio hardware"]
    fn opens_the_default_input() {
        let backend = CpalBackend::new();
        let Some(device) = backend.devices().unwrap().into_iter().next() else {
            return;
        };
        let result = backend.open(
            &device,
            &CaptureConfig::default(),
            Box::new(|_| {}),
            Box::new(|_| {}),
        );
        assert!(
            matches!(result, Ok(_) | Err(CurrentsError::UnsupportedFormat { .. })),
            "unexpected error opening {device}"
        );
    }
}
