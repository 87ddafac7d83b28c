use anyhow::{Context, anyhow};
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// Finds the input device named `device_name`, or the host's default input.
pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());

    let Some(target) = device_name else {
        return host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default input device"));
    };

    host.input_devices()
        .context("Failed to enumerate input devices")?
        .find(|device| device.name().is_ok_and(|name| name == target))
        .ok_or_else(|| anyhow!("Input device '{}' not found", target))
}

/// One line per input device with its default channel count and sample rate.
pub fn available_inputs() -> anyhow::Result<String> {
    for host in cpal::available_hosts() {
        tracing::debug!("Available host: {:?}", host);
    }

    let host = get_host();
    let default_name = host
        .default_input_device()
        .and_then(|device| device.name().ok());

    let mut device_names: Vec<String> = Vec::new();
    for device in host.input_devices().context("No input devices found")? {
        let Ok(name) = device.name() else {
            continue;
        };
        let mut line = match device.default_input_config() {
            Ok(cfg) => format!(" * {}({}ch, {}hz)", name, cfg.channels(), cfg.sample_rate().0),
            Err(_) => format!(" * {}(no default config)", name),
        };
        if default_name.as_deref() == Some(name.as_str()) {
            line.push_str(" [default]");
        }
        device_names.push(line);
    }
    Ok(device_names.join("\n"))
}
