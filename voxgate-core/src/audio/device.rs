//! Input device enumeration and selection.

use serde::Serialize;

/// Metadata about an audio input device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Name reported by the OS.
    pub name: String,
    pub is_default: bool,
    /// Name looks like a USB microphone.
    pub is_usb: bool,
    /// Name looks like a loopback / monitor of an output device.
    pub is_loopback_like: bool,
    /// The device [`select_input_index`] would pick with no preference.
    pub is_recommended: bool,
}

const USB_MIC_KEYWORDS: &[&str] = &["usb audio device", "usb microphone", "usb pnp", "usb mic"];

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "what u hear",
    "loopback",
    "monitor of",
    "speakers (",
];

pub fn is_usb_microphone_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    USB_MIC_KEYWORDS.iter().any(|k| lowered.contains(k))
}

pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Pick an input device from `names`.
///
/// Order: exact `preferred` match, first USB microphone, the system default,
/// the first non-loopback device, the first device.
pub fn select_input_index(
    names: &[String],
    default_name: Option<&str>,
    preferred: Option<&str>,
) -> Option<usize> {
    if names.is_empty() {
        return None;
    }
    if let Some(preferred) = preferred {
        if let Some(idx) = names.iter().position(|n| n == preferred) {
            return Some(idx);
        }
        tracing::warn!(preferred, "preferred input device not found, falling back");
    }
    names
        .iter()
        .position(|n| is_usb_microphone_name(n))
        .or_else(|| default_name.and_then(|d| names.iter().position(|n| n == d)))
        .or_else(|| names.iter().position(|n| !is_loopback_like_name(n)))
        .or(Some(0))
}

/// List available input devices, recommended one first.
///
/// Empty when no devices exist or cpal support is compiled out.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let names: Vec<String> = match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(idx, device)| {
                device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {}", idx + 1))
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            default_name.iter().cloned().collect()
        }
    };
    describe_devices(&names, default_name.as_deref())
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

fn describe_devices(names: &[String], default_name: Option<&str>) -> Vec<DeviceInfo> {
    let recommended = select_input_index(names, default_name, None);
    let mut list: Vec<DeviceInfo> = names
        .iter()
        .enumerate()
        .map(|(idx, name)| DeviceInfo {
            name: name.clone(),
            is_default: default_name == Some(name.as_str()),
            is_usb: is_usb_microphone_name(name),
            is_loopback_like: is_loopback_like_name(name),
            is_recommended: recommended == Some(idx),
        })
        .collect();
    list.sort_by_key(|d| (!d.is_recommended, d.is_loopback_like, !d.is_default));
    list
}
