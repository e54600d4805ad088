//! Hardware tree read from a running LibreHardwareMonitor (or OpenHardwareMonitor) through WMI.

#[cfg(target_os = "windows")]
use crate::collectors::decode_cmd_stdout;
use crate::collectors::{
    parse_f64_loose, HardwareKind, HardwareNode, RawSensor, SensorKind, SensorSource,
    SourceError,
};
#[cfg(target_os = "windows")]
use std::process::Command;
use tracing::debug;

/// Deepest sub-hardware nesting followed when rebuilding the tree.
const MAX_DEPTH: usize = 4;

#[cfg(target_os = "windows")]
const QUERY_SCRIPT: &str = "$n=@('root/LibreHardwareMonitor','root/OpenHardwareMonitor'); foreach($ns in $n){ try { $h=Get-CimInstance -Namespace $ns -ClassName Hardware -ErrorAction Stop; $s=Get-CimInstance -Namespace $ns -ClassName Sensor -ErrorAction Stop } catch { continue }; if($h){ $h | ForEach-Object { \"H|$($_.HardwareType)|$($_.Name)|$($_.Identifier)|$($_.Parent)\" }; $s | ForEach-Object { \"S|$($_.SensorType)|$($_.Name)|$($_.Value)|$($_.Identifier)|$($_.Parent)\" }; break } }";

#[derive(Debug, Default)]
pub struct LhmSource {
    hardware: Vec<HardwareNode>,
}

impl LhmSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SensorSource for LhmSource {
    fn refresh(&mut self) -> Result<(), SourceError> {
        let text = query_inventory()?;
        let hardware = parse_inventory(&text);
        if hardware.is_empty() {
            return Err(SourceError::Unavailable(
                "no hardware in the LibreHardwareMonitor WMI namespace; is it running?"
                    .to_string(),
            ));
        }
        self.hardware = hardware;
        Ok(())
    }

    fn hardware(&self) -> &[HardwareNode] {
        &self.hardware
    }
}

#[cfg(target_os = "windows")]
fn query_inventory() -> Result<String, SourceError> {
    let output = run_powershell(QUERY_SCRIPT)
        .ok_or_else(|| SourceError::Query("failed to start powershell".to_string()))?;
    if !output.status.success() {
        return Err(SourceError::Query(format!(
            "powershell exited with {}: {}",
            output.status,
            decode_cmd_stdout(&output.stderr).trim()
        )));
    }
    Ok(decode_cmd_stdout(&output.stdout))
}

#[cfg(not(target_os = "windows"))]
fn query_inventory() -> Result<String, SourceError> {
    Err(SourceError::Unsupported(
        "LibreHardwareMonitor WMI is only available on Windows",
    ))
}

#[cfg(target_os = "windows")]
fn run_powershell(script: &str) -> Option<std::process::Output> {
    let wrapped_script = format!(
        "[Console]::OutputEncoding=[System.Text.UTF8Encoding]::new($false); $OutputEncoding=[System.Text.UTF8Encoding]::new($false); chcp 65001 > $null; {script}"
    );
    if let Ok(output) = Command::new("powershell")
        .args(["-NoProfile", "-Command", &wrapped_script])
        .output()
    {
        return Some(output);
    }

    Command::new(r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe")
        .args(["-NoProfile", "-Command", &wrapped_script])
        .output()
        .ok()
}

struct FlatHardware {
    kind: HardwareKind,
    name: String,
    identifier: String,
    parent: String,
}

struct FlatSensor {
    parent: String,
    sensor: RawSensor,
}

/// Rebuilds the hardware tree from `H|type|name|identifier|parent` and
/// `S|type|name|value|identifier|parent` lines, keeping the order they were reported in.
pub fn parse_inventory(text: &str) -> Vec<HardwareNode> {
    let mut hardware = Vec::new();
    let mut sensors = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("H|") {
            if let Some(h) = parse_hardware_line(rest) {
                hardware.push(h);
            }
        } else if let Some(rest) = line.strip_prefix("S|") {
            if let Some(s) = parse_sensor_line(rest) {
                sensors.push(s);
            }
        }
    }

    hardware
        .iter()
        .filter(|h| h.parent.is_empty() || !hardware.iter().any(|p| p.identifier == h.parent))
        .map(|h| assemble(h, &hardware, &sensors, 0))
        .collect()
}

fn parse_hardware_line(rest: &str) -> Option<FlatHardware> {
    // Names may contain '|', so the trailing fields are taken from the right.
    let mut tail = rest.rsplitn(3, '|');
    let parent = tail.next()?.trim().to_string();
    let identifier = tail.next()?.trim().to_string();
    let (kind_raw, name) = tail.next()?.split_once('|')?;

    let Some(kind) = HardwareKind::parse(kind_raw) else {
        debug!(kind = kind_raw, hardware = name, "unknown hardware type ignored");
        return None;
    };
    if identifier.is_empty() {
        return None;
    }

    Some(FlatHardware {
        kind,
        name: name.trim().to_string(),
        identifier,
        parent,
    })
}

fn parse_sensor_line(rest: &str) -> Option<FlatSensor> {
    let mut tail = rest.rsplitn(4, '|');
    let parent = tail.next()?.trim().to_string();
    let _identifier = tail.next()?;
    let value_raw = tail.next()?;
    let (kind_raw, name) = tail.next()?.split_once('|')?;

    let Some(kind) = SensorKind::parse(kind_raw) else {
        debug!(kind = kind_raw, sensor = name, "unknown sensor type ignored");
        return None;
    };

    Some(FlatSensor {
        parent,
        sensor: RawSensor {
            kind,
            name: name.trim().to_string(),
            value: parse_f64_loose(value_raw),
        },
    })
}

fn assemble(
    flat: &FlatHardware,
    hardware: &[FlatHardware],
    sensors: &[FlatSensor],
    depth: usize,
) -> HardwareNode {
    let mut node = HardwareNode::new(flat.kind, flat.name.clone());
    node.sensors = sensors
        .iter()
        .filter(|s| s.parent == flat.identifier)
        .map(|s| s.sensor.clone())
        .collect();

    if depth < MAX_DEPTH {
        node.sub_hardware = hardware
            .iter()
            .filter(|h| h.parent == flat.identifier)
            .map(|h| assemble(h, hardware, sensors, depth + 1))
            .collect();
    }

    node
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
H|Motherboard|ASUS ROG STRIX B650E-F GAMING WIFI|/motherboard|
H|SuperIO|Nuvoton NCT6799D|/lpc/nct6799d/0|/motherboard
H|Cpu|AMD Ryzen 7 7800X3D|/amdcpu/0|
H|GpuNvidia|NVIDIA GeForce RTX 4070|/gpu-nvidia/0|
H|Memory|Generic Memory|/ram|
H|Storage|Samsung SSD 990 PRO 2TB|/nvme/0|
H|Toaster|Kitchen|/toaster/0|
S|Temperature|Core (Tctl/Tdie)|71,25|/amdcpu/0/temperature/2|/amdcpu/0
S|Load|CPU Total|12.5|/amdcpu/0/load/0|/amdcpu/0
S|Fan|Fan #1|823|/lpc/nct6799d/0/fan/0|/lpc/nct6799d/0
S|Load|D3D 3D|40|/gpu-nvidia/0/load/5|/gpu-nvidia/0
S|Temperature|GPU Core||/gpu-nvidia/0/temperature/0|/gpu-nvidia/0
S|Energy|Package Energy|5|/amdcpu/0/energy/0|/amdcpu/0
S|Wobble|Odd|1|/ram/wobble/0|/ram
S|Data|Memory Used|15.2|/ram/data/0|/ram
";

    #[test]
    fn rebuilds_tree_from_wmi_lines() {
        let tree = parse_inventory(SAMPLE);
        let kinds: Vec<HardwareKind> = tree.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                HardwareKind::Motherboard,
                HardwareKind::Cpu,
                HardwareKind::GpuNvidia,
                HardwareKind::Memory,
                HardwareKind::Storage,
            ]
        );

        let board = &tree[0];
        assert_eq!(board.children().len(), 1);
        assert_eq!(board.children()[0].kind, HardwareKind::SuperIo);
        assert_eq!(board.children()[0].sensors()[0].value, Some(823.0));

        let cpu = &tree[1];
        assert_eq!(cpu.sensors().len(), 3);
        assert_eq!(cpu.sensors()[0].value, Some(71.25));
        assert_eq!(cpu.sensors()[2].kind, SensorKind::Energy);

        let gpu = &tree[2];
        assert_eq!(gpu.sensors()[1].value, None);

        let ram = &tree[3];
        assert_eq!(ram.sensors().len(), 1);
    }

    #[test]
    fn names_with_separators_survive() {
        let tree = parse_inventory("H|Cpu|Weird|Name|/cpu/0|\nS|Load|Core|Total|7|/cpu/0/load/0|/cpu/0\n");
        assert_eq!(tree[0].name, "Weird|Name");
        assert_eq!(tree[0].sensors()[0].name, "Core|Total");
        assert_eq!(tree[0].sensors()[0].value, Some(7.0));
    }

    #[test]
    fn orphaned_parent_becomes_top_level() {
        let tree = parse_inventory("H|SuperIO|ITE IT8689E|/lpc/it8689e/0|/missing\n");
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].kind, HardwareKind::SuperIo);
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn refresh_is_unsupported_off_windows() {
        let mut source = LhmSource::new();
        assert!(matches!(source.refresh(), Err(SourceError::Unsupported(_))));
        assert!(source.hardware().is_empty());
    }
}
