use crate::engine::SnapshotProvider;
use crate::snapshot::{Component, Snapshot, NOT_AVAILABLE};
use serde_json::{json, Value};
use std::process::Command;
use sysinfo::{CpuExt, DiskExt, DiskKind, System, SystemExt};
use tracing::debug;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Probes the local machine through `sysinfo` and `nvidia-smi`.
pub struct SysinfoProvider {
    system: System,
}

impl SysinfoProvider {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotProvider for SysinfoProvider {
    fn collect(&mut self) -> Snapshot {
        let system = &mut self.system;
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_disks_list();
        system.refresh_disks();

        Snapshot::new()
            .with(Component::Cpu, collect_cpu(system))
            .with(Component::Ssd, collect_disks(system))
            .with(Component::Gpu, collect_gpus())
            .with(Component::Ram, collect_ram(system))
    }
}

fn collect_cpu(system: &System) -> Value {
    let model_name = system
        .cpus()
        .first()
        .map(|c| c.brand().trim().to_string())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());
    let physical_cores: Value = match system.physical_core_count() {
        Some(n) => n.into(),
        None => NOT_AVAILABLE.into(),
    };

    json!({
        "model_name": model_name,
        "physical_cores": physical_cores,
        "total_cores": system.cpus().len(),
    })
}

fn collect_disks(system: &System) -> Value {
    let mut disks: Vec<(String, String, Value)> = Vec::new();
    for disk in system.disks() {
        let file_system = String::from_utf8_lossy(disk.file_system()).to_string();
        let device = disk.name().to_string_lossy().to_string();
        let mount = disk.mount_point().to_string_lossy().to_string();
        if file_system.trim().is_empty() {
            continue;
        }
        // Volumes we could not stat report no capacity.
        if disk.total_space() == 0 {
            debug!(device = %device, mount = %mount, "skipping unreadable disk");
            continue;
        }
        disks.push((
            device.clone(),
            mount.clone(),
            json!({
                "device": device,
                "mount": mount,
                "total": disk.total_space(),
                "type": disk_kind_label(disk.kind()),
                "file_system": file_system,
            }),
        ));
    }
    disks.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    Value::Array(disks.into_iter().map(|(_, _, v)| v).collect())
}

fn disk_kind_label(kind: DiskKind) -> &'static str {
    match kind {
        DiskKind::SSD => "SSD",
        DiskKind::HDD => "HDD",
        DiskKind::Unknown(_) => "Unknown",
    }
}

fn collect_gpus() -> Value {
    let names = run_nvidia_smi(&["--query-gpu=name", "--format=csv,noheader"])
        .filter(|output| output.status.success())
        .map(|output| parse_gpu_names(&decode_cmd_stdout(&output.stdout)))
        .unwrap_or_default();
    if names.is_empty() {
        debug!("no GPU reported by nvidia-smi");
        return json!([NOT_AVAILABLE]);
    }
    json!(names)
}

fn parse_gpu_names(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn collect_ram(system: &System) -> Value {
    let total = system.total_memory();
    if total == 0 {
        return NOT_AVAILABLE.into();
    }
    format_ram(total).into()
}

fn format_ram(total_bytes: u64) -> String {
    format!("{:.2} GB", total_bytes as f64 / GIB)
}

fn run_nvidia_smi(args: &[&str]) -> Option<std::process::Output> {
    if let Ok(output) = Command::new("nvidia-smi").args(args).output() {
        return Some(output);
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(output) = Command::new(r"C:\Windows\System32\nvidia-smi.exe")
            .args(args)
            .output()
        {
            return Some(output);
        }
    }

    None
}

/// Windows consoles can hand back UTF-16LE; spot it by a BOM or by the zero
/// high bytes ASCII text leaves at odd offsets.
fn decode_cmd_stdout(bytes: &[u8]) -> String {
    let body = bytes.strip_prefix(&[0xff, 0xfe]);
    let looks_utf16 = body.is_some()
        || (bytes.len() >= 2
            && bytes.len() % 2 == 0
            && bytes.iter().skip(1).step_by(2).all(|&b| b == 0));

    if looks_utf16 {
        let body = body.unwrap_or(bytes);
        if body.len() % 2 == 0 {
            let u16buf: Vec<u16> = body
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            if let Ok(s) = String::from_utf16(&u16buf) {
                return s;
            }
        }
    }

    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_is_formatted_in_gib() {
        assert_eq!(format_ram(16 * 1024 * 1024 * 1024), "16.00 GB");
        assert_eq!(format_ram(17_179_869_184 + 536_870_912), "16.50 GB");
    }

    #[test]
    fn gpu_names_skip_blank_lines() {
        let names = parse_gpu_names("NVIDIA GeForce RTX 3060\r\n\nNVIDIA T400 \n");
        assert_eq!(names, vec!["NVIDIA GeForce RTX 3060", "NVIDIA T400"]);
    }

    #[test]
    fn utf16_output_is_decoded() {
        let bytes: Vec<u8> = "GPU".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(decode_cmd_stdout(&bytes), "GPU");

        let mut with_bom = vec![0xff, 0xfe];
        with_bom.extend("RTX 3060\n".encode_utf16().flat_map(|u| u.to_le_bytes()));
        assert_eq!(decode_cmd_stdout(&with_bom), "RTX 3060\n");
    }

    #[test]
    fn utf8_output_passes_through() {
        assert_eq!(decode_cmd_stdout(b"plain"), "plain");
        assert_eq!(decode_cmd_stdout(b"T4"), "T4");
        assert_eq!(decode_cmd_stdout("Quadro \u{2013} P".as_bytes()), "Quadro \u{2013} P");
    }

    #[test]
    fn live_snapshot_covers_every_component() {
        let mut provider = SysinfoProvider::new();
        let snapshot = provider.collect();
        for component in Component::ALL {
            assert!(snapshot.get(component).is_some(), "missing {component}");
        }
        assert!(snapshot.get(Component::Ssd).unwrap().is_array());
        assert!(snapshot.get(Component::Gpu).unwrap().is_array());
    }
}
