//! Serial port discovery for `--list-ports`

use serde::Serialize;
use serialport::{SerialPortInfo, SerialPortType};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortListing {
    pub name: String,
    pub kind: String,
}

/// Available serial ports, deduplicated and ordered USB/ACM first.
pub fn available_ports() -> Vec<PortListing> {
    let raw = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(err) => {
            log::warn!("Port enumeration failed: {err}");
            Vec::new()
        }
    };
    sort_and_dedup_ports(raw)
        .into_iter()
        .map(|p| PortListing {
            kind: describe(&p.port_type),
            name: p.port_name,
        })
        .collect()
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(info) => format!("usb {:04x}:{:04x}", info.vid, info.pid),
        SerialPortType::PciPort => "pci".to_string(),
        SerialPortType::BluetoothPort => "bluetooth".to_string(),
        _ => "unknown".to_string(),
    }
}

pub(crate) fn sort_and_dedup_ports(raw_ports: Vec<SerialPortInfo>) -> Vec<SerialPortInfo> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ports: Vec<SerialPortInfo> = raw_ports
        .into_iter()
        .filter(|p| seen.insert(p.port_name.to_lowercase()))
        .collect();

    // USB/ACM adapters first, then built-in ttys, then anything else
    fn priority(name: &str) -> i32 {
        let n = name.to_lowercase();
        if n.contains("ttyusb") || n.contains("usb") {
            0
        } else if n.contains("acm") {
            1
        } else if n.contains("ttys") || n.contains("serial") || n.starts_with("com") {
            2
        } else {
            10
        }
    }

    // COM10 after COM9
    fn numeric_suffix(name: &str) -> Option<u32> {
        let digits: String = name
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        digits.parse().ok()
    }

    ports.sort_by(|a, b| {
        let pa = priority(&a.port_name);
        let pb = priority(&b.port_name);
        pa.cmp(&pb).then_with(|| {
            let stem_a = a.port_name.trim_end_matches(|c: char| c.is_ascii_digit());
            let stem_b = b.port_name.trim_end_matches(|c: char| c.is_ascii_digit());
            stem_a
                .cmp(stem_b)
                .then_with(|| numeric_suffix(&a.port_name).cmp(&numeric_suffix(&b.port_name)))
        })
    });

    ports
}
