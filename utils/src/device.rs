use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig, SupportedStreamConfigRange};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

fn find_by_name(mut devices: impl Iterator<Item = Device>, target: &str) -> Option<Device> {
    devices.find(|device| device.name().is_ok_and(|name| name == target))
}

pub fn get_or_default_input(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        Some(target) => find_by_name(host.input_devices()?, &target)
            .ok_or_else(|| anyhow::anyhow!("No input device named {:?}", target)),
        None => host
            .default_input_device()
            .context("No default input device"),
    }
}

pub fn get_or_default_output(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        Some(target) => find_by_name(host.output_devices()?, &target)
            .ok_or_else(|| anyhow::anyhow!("No output device named {:?}", target)),
        None => host
            .default_output_device()
            .context("No default output device"),
    }
}

/// Picks an `f32` stream config running at exactly `sample_rate`, preferring
/// mono.
///
/// Audio is never resampled, so a device that cannot run at the requested
/// rate is rejected. Streams are always built for `f32` samples.
fn pick_config(
    configs: impl Iterator<Item = SupportedStreamConfigRange>,
    sample_rate: u32,
) -> anyhow::Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    configs
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .min_by_key(|c| c.channels())
        .map(|c| c.with_sample_rate(rate).config())
        .ok_or_else(|| anyhow::anyhow!("No f32 config supports {}hz", sample_rate))
}

pub fn input_config(device: &Device, sample_rate: u32) -> anyhow::Result<StreamConfig> {
    pick_config(device.supported_input_configs()?, sample_rate)
}

pub fn output_config(device: &Device, sample_rate: u32) -> anyhow::Result<StreamConfig> {
    pick_config(device.supported_output_configs()?, sample_rate)
}

fn describe(device: &Device, default_name: &str, input: bool) -> Option<String> {
    let d_name = device.name().ok()?;
    let d_cfg = if input {
        device.default_input_config().ok()?
    } else {
        device.default_output_config().ok()?
    };
    let mut d = format!(
        " * {}({}ch, {}hz)",
        d_name,
        d_cfg.channels(),
        d_cfg.sample_rate().0
    );
    if d_name == default_name {
        d.push_str(" [default]");
    }
    Some(d)
}

pub fn get_available_inputs() -> anyhow::Result<String> {
    for host in cpal::available_hosts() {
        tracing::debug!("Available host: {:?}", host);
    }

    let host = get_host();
    let default_device = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();
    let device_names: Vec<String> = host
        .input_devices()
        .context("No input devices found")?
        .filter_map(|d| describe(&d, &default_device, true))
        .collect();
    Ok(device_names.join("\n"))
}

pub fn get_available_outputs() -> anyhow::Result<String> {
    for host in cpal::available_hosts() {
        tracing::debug!("Available host: {:?}", host);
    }

    let host = get_host();
    let default_device = host
        .default_output_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();
    let device_names: Vec<String> = host
        .output_devices()
        .context("No output devices found")?
        .filter_map(|d| describe(&d, &default_device, false))
        .collect();
    Ok(device_names.join("\n"))
}
