// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::fmt;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, span, Level};

use super::{
    thread_priority::{configure_render_thread_priority, render_thread_priority, rt_audio_enabled},
    AudioError, DeviceInfo, Mixer, OutputInfo, OutputSettings, RunningOutput,
};
use crate::config::audio::DEFAULT_DEVICE;

/// An output that renders the mixer from a cpal stream callback.
pub struct Output {
    /// The name of the device, or "default" for the host's default output.
    name: String,
}

impl Output {
    /// Creates an output for the named device. The device is resolved when the
    /// output starts.
    pub fn new(name: &str) -> Output {
        Output {
            name: name.to_string(),
        }
    }

    /// Lists cpal output devices.
    pub fn list() -> Result<Vec<DeviceInfo>, AudioError> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout().map_err(|e| AudioError::Device(e.to_string()))?;
        let _shh_stderr = shh::stderr().map_err(|e| AudioError::Device(e.to_string()))?;

        let mut devices = Vec::new();
        for host_id in cpal::available_hosts() {
            let host = cpal::host_from_id(host_id).map_err(|e| AudioError::Device(e.to_string()))?;
            let host_devices = match host.output_devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(output_configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = output_configs.map(|c| c.channels()).max().unwrap_or(0);
                if max_channels == 0 {
                    continue;
                }

                #[allow(deprecated)]
                let Ok(name) = device.name() else {
                    continue;
                };
                devices.push(DeviceInfo {
                    name,
                    host: host_id.name().to_string(),
                    max_channels,
                });
            }
        }

        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    /// Finds the cpal device this output refers to.
    fn find_device(&self) -> Result<cpal::Device, String> {
        let host = cpal::default_host();
        if self.name == DEFAULT_DEVICE {
            return host
                .default_output_device()
                .ok_or_else(|| "no default output device".to_string());
        }

        let devices = host.output_devices().map_err(|e| e.to_string())?;
        for device in devices {
            #[allow(deprecated)]
            let matches = device
                .name()
                .map(|name| name.trim() == self.name)
                .unwrap_or(false);
            if matches {
                return Ok(device);
            }
        }
        Err(format!("no output device named {}", self.name))
    }
}

impl super::Output for Output {
    fn start(&self, mixer: Mixer, settings: &OutputSettings) -> Result<RunningOutput, AudioError> {
        let device = self.find_device().map_err(AudioError::Device)?;
        let settings = settings.clone();
        let name = self.name.clone();

        RunningOutput::spawn("cpal-audio", settings.startup_timeout, move |ready_tx, stop_rx| {
            let span = span!(Level::INFO, "cpal output");
            let _enter = span.enter();

            let stream = match build_stream(&device, mixer, &settings) {
                Ok(stream) => stream,
                Err(e) => {
                    error!(device = name, err = e, "Failed to create cpal stream");
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(e.to_string()));
                return;
            }

            let info = OutputInfo::new(settings.sample_rate, settings.buffer_size, settings.channels);
            if ready_tx.send(Ok(info)).is_err() {
                return;
            }
            info!(device = name, "cpal output running");

            // The stream lives until the stop channel closes.
            let _ = stop_rx.recv();
            drop(stream);
            info!(device = name, "cpal output stopped");
        })
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (cpal)", self.name)
    }
}

/// Builds an output stream in the device's default sample format.
fn build_stream(
    device: &cpal::Device,
    mixer: Mixer,
    settings: &OutputSettings,
) -> Result<cpal::Stream, String> {
    let default_config = device.default_output_config().map_err(|e| e.to_string())?;
    let config = cpal::StreamConfig {
        channels: settings.channels,
        sample_rate: settings.sample_rate,
        buffer_size: cpal::BufferSize::Fixed(settings.buffer_size as u32),
    };

    let priority = render_thread_priority();
    let rt_audio = rt_audio_enabled(settings.realtime_priority);
    let scratch_len = settings.buffer_size * settings.channels as usize;

    match default_config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_typed_stream::<f32>(device, &config, mixer, priority, rt_audio, scratch_len)
        }
        cpal::SampleFormat::I16 => {
            build_typed_stream::<i16>(device, &config, mixer, priority, rt_audio, scratch_len)
        }
        cpal::SampleFormat::I32 => {
            build_typed_stream::<i32>(device, &config, mixer, priority, rt_audio, scratch_len)
        }
        format => Err(format!("unsupported sample format {format}")),
    }
}

fn build_typed_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: Mixer,
    priority: Option<thread_priority::ThreadPriorityValue>,
    rt_audio: bool,
    scratch_len: usize,
) -> Result<cpal::Stream, String>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch = vec![0.0f32; scratch_len];
    let mut priority_set = false;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                configure_render_thread_priority(priority, rt_audio, &mut priority_set);

                // Hosts may ignore the fixed buffer size; grow once if they do.
                if scratch.len() < data.len() {
                    scratch.resize(data.len(), 0.0);
                }
                let block = &mut scratch[..data.len()];
                mixer.render(block);
                for (dst, &src) in data.iter_mut().zip(block.iter()) {
                    *dst = T::from_sample(src);
                }
            },
            |e| error!(err = e.to_string(), "cpal stream error"),
            None,
        )
        .map_err(|e| e.to_string())
}
