use crate::collectors::{
    decode_cmd_stdout, parse_f64_loose, HardwareKind, HardwareNode, SensorKind, SensorSource,
    SourceError,
};
use crate::snapshot::OperatingSystemInfo;
#[cfg(target_os = "linux")]
use std::fs;
#[cfg(target_os = "linux")]
use std::path::Path;
use std::process::Command;
use sysinfo::{ComponentExt, CpuExt, System, SystemExt};
use tracing::debug;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const NVIDIA_QUERY: &str = "--query-gpu=index,name,utilization.gpu,utilization.memory,temperature.gpu,power.draw,clocks.gr,clocks.mem,memory.used,memory.total";
const GPU_MARKERS: [&str; 5] = ["gpu", "nvidia", "amdgpu", "radeon", "nouveau"];

/// Hardware tree assembled from sysinfo, Linux sysfs and `nvidia-smi`.
pub struct SystemSource {
    system: System,
    hardware: Vec<HardwareNode>,
    nvidia_smi_available: bool,
}

impl SystemSource {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_components_list();
        Self {
            system,
            hardware: Vec::new(),
            nvidia_smi_available: true,
        }
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for SystemSource {
    fn refresh(&mut self) -> Result<(), SourceError> {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.system.refresh_components();

        if self.system.cpus().is_empty() {
            return Err(SourceError::Unavailable(
                "sysinfo reported no CPUs".to_string(),
            ));
        }

        let mut hardware = vec![motherboard_node(&self.system), cpu_node(&self.system)];
        hardware.push(memory_node(&self.system));

        let mut gpus = if self.nvidia_smi_available {
            match run_nvidia_smi(&[NVIDIA_QUERY, "--format=csv,noheader,nounits"]) {
                Some(output) if output.status.success() => {
                    parse_nvidia_smi(&decode_cmd_stdout(&output.stdout))
                }
                Some(output) => {
                    debug!(status = %output.status, "nvidia-smi failed");
                    Vec::new()
                }
                None => {
                    debug!("nvidia-smi not found, NVIDIA GPUs will not be reported");
                    self.nvidia_smi_available = false;
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        if let Some(amd) = amdgpu_node(&self.system) {
            gpus.push(amd);
        }
        hardware.extend(gpus);

        self.hardware = hardware;
        Ok(())
    }

    fn hardware(&self) -> &[HardwareNode] {
        &self.hardware
    }
}

/// OS description for the snapshot header; captured once per process.
pub fn operating_system_info() -> OperatingSystemInfo {
    let system = System::new();
    let os_name = system
        .long_os_version()
        .or_else(|| system.name())
        .unwrap_or_else(|| std::env::consts::OS.to_string());
    let os_version = system
        .os_version()
        .or_else(|| system.kernel_version())
        .unwrap_or_default();
    OperatingSystemInfo::new(os_name, os_version, os_is_64_bit())
}

/// Bitness of the OS, which can be 64-bit under a 32-bit build of this binary.
fn os_is_64_bit() -> bool {
    if cfg!(target_pointer_width = "64") {
        return true;
    }
    os_machine().is_some_and(|machine| machine_is_64_bit(&machine))
}

/// WOW64 exposes the native architecture in `PROCESSOR_ARCHITEW6432`.
#[cfg(target_os = "windows")]
fn os_machine() -> Option<String> {
    std::env::var("PROCESSOR_ARCHITEW6432")
        .or_else(|_| std::env::var("PROCESSOR_ARCHITECTURE"))
        .ok()
}

#[cfg(not(target_os = "windows"))]
fn os_machine() -> Option<String> {
    let output = Command::new("uname").arg("-m").output().ok()?;
    output
        .status
        .success()
        .then(|| decode_cmd_stdout(&output.stdout).trim().to_string())
}

fn machine_is_64_bit(machine: &str) -> bool {
    let machine = machine.to_ascii_lowercase();
    machine.contains("64") || machine == "s390x"
}

fn cpu_node(system: &System) -> HardwareNode {
    let cpus = system.cpus();
    let brand = cpus
        .first()
        .map(|c| c.brand().trim().to_string())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| "CPU".to_string());
    let vendor = cpus
        .first()
        .map(|c| c.vendor_id().to_string())
        .unwrap_or_default();

    let mut node = HardwareNode::new(HardwareKind::Cpu, brand).with_properties(vendor);
    node.push_sensor(
        SensorKind::Load,
        "CPU Total",
        Some(system.global_cpu_info().cpu_usage() as f64),
    );
    for (i, cpu) in cpus.iter().enumerate() {
        node.push_sensor(
            SensorKind::Load,
            format!("CPU Core #{}", i + 1),
            Some(cpu.cpu_usage() as f64),
        );
    }
    for (i, cpu) in cpus.iter().enumerate() {
        let mhz = cpu.frequency();
        node.push_sensor(
            SensorKind::Clock,
            format!("Core #{}", i + 1),
            (mhz > 0).then_some(mhz as f64),
        );
    }
    for component in system.components() {
        if is_cpu_temp_label(component.label()) {
            node.push_sensor(
                SensorKind::Temperature,
                component.label(),
                Some(component.temperature() as f64),
            );
        }
    }

    node
}

fn memory_node(system: &System) -> HardwareNode {
    let mut node = HardwareNode::new(HardwareKind::Memory, "Generic Memory");

    let total = system.total_memory();
    let used = system.used_memory();
    let load = (total > 0).then(|| used as f64 / total as f64 * 100.0);
    node.push_sensor(SensorKind::Load, "Memory", load);
    node.push_sensor(
        SensorKind::Data,
        "Memory Used",
        (total > 0).then(|| used as f64 / BYTES_PER_GB),
    );
    node.push_sensor(
        SensorKind::Data,
        "Memory Available",
        (total > 0).then(|| system.available_memory() as f64 / BYTES_PER_GB),
    );

    let swap_total = system.total_swap();
    if swap_total > 0 {
        let swap_used = system.used_swap();
        node.push_sensor(
            SensorKind::Load,
            "Virtual Memory",
            Some(swap_used as f64 / swap_total as f64 * 100.0),
        );
        node.push_sensor(
            SensorKind::Data,
            "Virtual Memory Used",
            Some(swap_used as f64 / BYTES_PER_GB),
        );
    }

    node
}

fn motherboard_node(system: &System) -> HardwareNode {
    let (name, vendor) = board_identity();
    let mut node = HardwareNode::new(HardwareKind::Motherboard, name).with_properties(vendor);

    for component in system.components() {
        let label = component.label();
        if is_cpu_temp_label(label) || has_gpu_marker(label) {
            continue;
        }
        node.push_sensor(
            SensorKind::Temperature,
            label,
            Some(component.temperature() as f64),
        );
    }
    for (zone, celsius) in linux_thermal_zones() {
        node.push_sensor(SensorKind::Temperature, zone, Some(celsius));
    }
    node.sub_hardware = linux_hwmon_chips();

    node
}

/// Thermal components on the GPU (currently amdgpu) when no vendor tool reports the card.
fn amdgpu_node(system: &System) -> Option<HardwareNode> {
    let mut node = HardwareNode::new(HardwareKind::GpuAmd, "AMD GPU");
    for component in system.components() {
        if component.label().to_lowercase().contains("amdgpu") {
            node.push_sensor(
                SensorKind::Temperature,
                component.label(),
                Some(component.temperature() as f64),
            );
        }
    }
    (!node.sensors.is_empty()).then_some(node)
}

pub fn parse_nvidia_smi(text: &str) -> Vec<HardwareNode> {
    text.lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(',').map(str::trim).collect();
            if parts.len() < 10 {
                return None;
            }

            let mut node = HardwareNode::new(HardwareKind::GpuNvidia, parts[1])
                .with_properties(format!("nvidia-smi index {}", parts[0]));
            node.push_sensor(SensorKind::Load, "GPU Core", parse_f64_loose(parts[2]));
            node.push_sensor(
                SensorKind::Load,
                "GPU Memory Controller",
                parse_f64_loose(parts[3]),
            );
            node.push_sensor(
                SensorKind::Temperature,
                "GPU Core",
                parse_f64_loose(parts[4]),
            );
            node.push_sensor(SensorKind::Power, "GPU Package", parse_f64_loose(parts[5]));
            node.push_sensor(SensorKind::Clock, "GPU Core", parse_f64_loose(parts[6]));
            node.push_sensor(SensorKind::Clock, "GPU Memory", parse_f64_loose(parts[7]));

            let used_mib = parse_f64_loose(parts[8]);
            let total_mib = parse_f64_loose(parts[9]);
            node.push_sensor(
                SensorKind::Data,
                "GPU Memory Used",
                used_mib.map(|v| v / 1024.0),
            );
            node.push_sensor(
                SensorKind::Data,
                "GPU Memory Total",
                total_mib.map(|v| v / 1024.0),
            );
            let memory_load = match (used_mib, total_mib) {
                (Some(used), Some(total)) if total > 0.0 => Some(used / total * 100.0),
                _ => None,
            };
            node.push_sensor(SensorKind::Load, "GPU Memory", memory_load);

            Some(node)
        })
        .collect()
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

fn is_cpu_temp_label(label: &str) -> bool {
    let s = label.to_lowercase();
    if has_gpu_marker(&s) {
        return false;
    }
    ["coretemp", "k10temp", "zenpower", "cpu", "package", "tctl", "tdie", "ccd"]
        .iter()
        .any(|m| s.contains(m))
}

fn has_gpu_marker(label: &str) -> bool {
    let s = label.to_lowercase();
    GPU_MARKERS.iter().any(|m| s.contains(m))
}

#[cfg(target_os = "linux")]
fn board_identity() -> (String, String) {
    let read = |field: &str| {
        fs::read_to_string(Path::new("/sys/class/dmi/id").join(field))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    (
        read("board_name").unwrap_or_else(|| "Motherboard".to_string()),
        read("board_vendor").unwrap_or_default(),
    )
}

#[cfg(not(target_os = "linux"))]
fn board_identity() -> (String, String) {
    ("Motherboard".to_string(), String::new())
}

#[cfg(target_os = "linux")]
fn linux_thermal_zones() -> Vec<(String, f64)> {
    let Ok(entries) = fs::read_dir("/sys/class/thermal") else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|v| v.to_str()) else {
            continue;
        };
        if !name.starts_with("thermal_zone") {
            continue;
        }

        let typ = fs::read_to_string(path.join("type"))
            .ok()
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| name.to_string());
        if is_cpu_temp_label(&typ) || has_gpu_marker(&typ) {
            continue;
        }
        let Some(raw) = read_sysfs_number(&path.join("temp")) else {
            continue;
        };
        let celsius = if raw > 1000.0 { raw / 1000.0 } else { raw };
        if celsius > 0.0 {
            out.push((format!("Thermal Zone {typ}"), celsius));
        }
    }

    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

#[cfg(not(target_os = "linux"))]
fn linux_thermal_zones() -> Vec<(String, f64)> {
    Vec::new()
}

/// One SuperIO sub-node per hwmon chip exposing fans or voltages.
#[cfg(target_os = "linux")]
fn linux_hwmon_chips() -> Vec<HardwareNode> {
    let Ok(entries) = fs::read_dir("/sys/class/hwmon") else {
        return Vec::new();
    };

    let mut chips: Vec<HardwareNode> = Vec::new();
    for entry in entries.flatten() {
        let dir = entry.path();
        let chip = fs::read_to_string(dir.join("name"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if chip.is_empty() || has_gpu_marker(&chip) {
            continue;
        }

        let mut node = HardwareNode::new(HardwareKind::SuperIo, chip);
        for index in 1..=16 {
            let input = dir.join(format!("fan{index}_input"));
            if let Some(rpm) = read_sysfs_number(&input) {
                let label = read_sysfs_label(&dir.join(format!("fan{index}_label")))
                    .unwrap_or_else(|| format!("Fan #{index}"));
                node.push_sensor(SensorKind::Fan, label, Some(rpm));
            }
        }
        for index in 0..=16 {
            let input = dir.join(format!("in{index}_input"));
            if let Some(millivolts) = read_sysfs_number(&input) {
                let label = read_sysfs_label(&dir.join(format!("in{index}_label")))
                    .unwrap_or_else(|| format!("Voltage #{index}"));
                node.push_sensor(SensorKind::Voltage, label, Some(millivolts / 1000.0));
            }
        }

        if !node.sensors.is_empty() {
            chips.push(node);
        }
    }

    chips.sort_by(|a, b| a.name.cmp(&b.name));
    chips
}

#[cfg(not(target_os = "linux"))]
fn linux_hwmon_chips() -> Vec<HardwareNode> {
    Vec::new()
}

#[cfg(target_os = "linux")]
fn read_sysfs_number(path: &Path) -> Option<f64> {
    fs::read_to_string(path).ok()?.trim().parse::<f64>().ok()
}

#[cfg(target_os = "linux")]
fn read_sysfs_label(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
