//! Normalizes a refreshed hardware tree into the categorized [`Snapshot`] schema.

use crate::collectors::{HardwareKind, HardwareNode, RawSensor, SensorKind};
use crate::snapshot::{
    CpuDevice, DeviceBlock, DeviceHeader, Devices, GenericDevice, GpuDevice, MotherboardDevice,
    OperatingSystemInfo, ReadingGroup, SensorReading, Snapshot,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Raw sensor kind to reading group. Whether the group exists is up to the device block.
const GROUP_TABLE: &[(SensorKind, ReadingGroup)] = &[
    (SensorKind::Temperature, ReadingGroup::Temperature),
    (SensorKind::Power, ReadingGroup::Power),
    (SensorKind::Voltage, ReadingGroup::Voltage),
    (SensorKind::Clock, ReadingGroup::Frequency),
    (SensorKind::Frequency, ReadingGroup::Frequency),
    (SensorKind::Load, ReadingGroup::Load),
    (SensorKind::Fan, ReadingGroup::Fan),
    (SensorKind::SmallData, ReadingGroup::Memory),
    (SensorKind::Data, ReadingGroup::Memory),
    (SensorKind::Throughput, ReadingGroup::Memory),
];

const UNIT_TABLE: &[(SensorKind, &str)] = &[
    (SensorKind::Temperature, "C"),
    (SensorKind::Load, "%"),
    (SensorKind::Clock, "MHz"),
    (SensorKind::Frequency, "MHz"),
    (SensorKind::Voltage, "Volts"),
    (SensorKind::Power, "Watts"),
    (SensorKind::Fan, "RPM"),
    (SensorKind::Data, "GB"),
    (SensorKind::Throughput, "MB/s"),
];

const TYPE_LABELS: &[(HardwareKind, &str)] = &[
    (HardwareKind::Cpu, "CPU"),
    (HardwareKind::GpuNvidia, "GPU-NVIDIA"),
    (HardwareKind::GpuAmd, "GPU-AMD"),
    (HardwareKind::GpuIntel, "GPU-INTEL"),
    (HardwareKind::Memory, "Memory"),
    (HardwareKind::Motherboard, "Motherboard"),
    (HardwareKind::Storage, "Storage"),
    (HardwareKind::Network, "Network"),
];

/// Marker a reading name carries when it is a Direct3D-internal counter.
const NOISE_MARKER: &str = "D3D";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{0} hardware node has no name")]
    Unnamed(&'static str),
}

pub fn group_for(kind: SensorKind) -> Option<ReadingGroup> {
    GROUP_TABLE
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, group)| *group)
}

/// Unit label for a sensor kind; kinds outside the table are labelled with their own name.
pub fn unit_for(kind: SensorKind) -> &'static str {
    UNIT_TABLE
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, unit)| *unit)
        .unwrap_or_else(|| kind.as_str())
}

pub fn type_label(kind: HardwareKind) -> &'static str {
    TYPE_LABELS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, label)| *label)
        .unwrap_or_else(|| kind.as_str())
}

pub fn gpu_description(kind: HardwareKind, name: &str) -> &'static str {
    if kind == HardwareKind::GpuIntel {
        return "Integrated GPU";
    }

    let name_lower = name.to_lowercase();
    let integrated = name_lower.contains("integrated")
        || name_lower.contains("radeon(tm) graphics")
        || (name_lower.contains("vega") && name_lower.contains("graphics"));
    if integrated {
        "Integrated GPU"
    } else {
        "Dedicated GPU"
    }
}

/// Validated reading, or `None` when the sensor has no usable value or is noise.
pub fn normalize_reading(sensor: &RawSensor) -> Option<SensorReading> {
    if sensor.name.contains(NOISE_MARKER) {
        return None;
    }
    let value = sensor.value?;
    if !value.is_finite() {
        return None;
    }
    let value = value as f32;
    if !value.is_finite() {
        return None;
    }

    Some(SensorReading {
        name: sensor.name.clone(),
        value,
        unit: unit_for(sensor.kind).to_string(),
    })
}

pub fn build_snapshot(os_info: OperatingSystemInfo, hardware: &[HardwareNode]) -> Snapshot {
    let mut devices = Devices::default();
    for node in hardware {
        if let Err(err) = absorb_node(&mut devices, node) {
            warn!(error = %err, kind = node.kind.as_str(), "hardware node skipped");
        }
    }

    Snapshot {
        operating_system_info: os_info,
        devices,
    }
}

fn absorb_node(devices: &mut Devices, node: &HardwareNode) -> Result<(), BuildError> {
    if node.name.trim().is_empty() {
        return Err(BuildError::Unnamed(node.kind.as_str()));
    }

    match node.kind {
        HardwareKind::Cpu => {
            devices.cpu = Some(build_device::<CpuDevice>(node, node.properties.clone()));
        }
        kind if kind.is_gpu() => {
            let description = gpu_description(node.kind, &node.name).to_string();
            devices.gpu.push(build_device::<GpuDevice>(node, description));
        }
        HardwareKind::Motherboard => {
            devices.motherboard = Some(build_device::<MotherboardDevice>(
                node,
                node.properties.clone(),
            ));
        }
        HardwareKind::Memory => {
            let ram = build_device::<GenericDevice>(node, node.properties.clone());
            if ram.reading_count() > 0 {
                devices.ram = Some(ram);
            } else {
                debug!(hardware = %node.name, "memory node has no readings");
            }
        }
        _ => {}
    }

    Ok(())
}

/// Sensors of the node and its direct sub-hardware are merged into one block.
fn build_device<D: DeviceBlock>(node: &HardwareNode, description: String) -> D {
    let mut device = D::default();
    *device.header_mut() = DeviceHeader {
        name: node.name.clone(),
        kind: type_label(node.kind).to_string(),
        description,
    };

    absorb_sensors(&mut device, node);
    for child in node.children() {
        absorb_sensors(&mut device, child);
    }

    device
}

fn absorb_sensors<D: DeviceBlock>(device: &mut D, node: &HardwareNode) {
    for sensor in node.sensors() {
        let Some(reading) = normalize_reading(sensor) else {
            continue;
        };
        if let Some(list) = device.readings_mut(group_for(sensor.kind)) {
            list.push(reading);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os() -> OperatingSystemInfo {
        OperatingSystemInfo::new("TestOS".to_string(), "1.0".to_string(), true)
    }

    fn sensor(kind: SensorKind, name: &str, value: Option<f64>) -> RawSensor {
        RawSensor {
            kind,
            name: name.to_string(),
            value,
        }
    }

    fn node_with(kind: HardwareKind, name: &str, sensors: Vec<RawSensor>) -> HardwareNode {
        let mut node = HardwareNode::new(kind, name);
        node.sensors = sensors;
        node
    }

    #[test]
    fn rejects_invalid_and_noise_readings() {
        assert!(normalize_reading(&sensor(SensorKind::Load, "D3D Usage", Some(42.0))).is_none());
        assert!(normalize_reading(&sensor(SensorKind::Load, "GPU Core", None)).is_none());
        assert!(normalize_reading(&sensor(SensorKind::Load, "GPU Core", Some(f64::NAN))).is_none());
        assert!(
            normalize_reading(&sensor(SensorKind::Load, "GPU Core", Some(f64::INFINITY))).is_none()
        );
        assert!(normalize_reading(&sensor(SensorKind::Load, "GPU Core", Some(1e300))).is_none());

        let kept = normalize_reading(&sensor(SensorKind::Load, "GPU Core", Some(55.2))).unwrap();
        assert_eq!(kept.name, "GPU Core");
        assert_eq!(kept.value, 55.2_f32);
        assert_eq!(kept.unit, "%");
    }

    #[test]
    fn gpu_readings_land_in_documented_groups() {
        let gpu = node_with(
            HardwareKind::GpuNvidia,
            "NVIDIA GeForce RTX 4060",
            vec![
                sensor(SensorKind::Temperature, "GPU Core", Some(61.0)),
                sensor(SensorKind::Power, "GPU Package", Some(115.0)),
                sensor(SensorKind::Voltage, "GPU Core", Some(0.9)),
                sensor(SensorKind::Clock, "GPU Core", Some(2505.0)),
                sensor(SensorKind::Frequency, "GPU Video", Some(1800.0)),
                sensor(SensorKind::Load, "GPU Core", Some(97.0)),
                sensor(SensorKind::Fan, "GPU Fan 1", Some(1650.0)),
                sensor(SensorKind::SmallData, "GPU Memory Used", Some(5.1)),
                sensor(SensorKind::Data, "GPU Memory Total", Some(8.0)),
                sensor(SensorKind::Throughput, "GPU PCIe Rx", Some(850.0)),
                sensor(SensorKind::Control, "GPU Fan", Some(45.0)),
            ],
        );

        let snapshot = build_snapshot(os(), &[gpu]);
        let gpu = &snapshot.devices.gpu[0];
        assert_eq!(gpu.header.kind, "GPU-NVIDIA");
        assert_eq!(gpu.header.description, "Dedicated GPU");
        assert_eq!(gpu.temperature[0].unit, "C");
        assert_eq!(gpu.power[0].unit, "Watts");
        assert_eq!(gpu.voltage[0].unit, "Volts");
        assert_eq!(gpu.frequency.len(), 2);
        assert!(gpu.frequency.iter().all(|r| r.unit == "MHz"));
        assert_eq!(gpu.load[0].unit, "%");
        assert_eq!(gpu.fan[0].unit, "RPM");
        let memory_units: Vec<&str> = gpu.memory.iter().map(|r| r.unit.as_str()).collect();
        assert_eq!(memory_units, vec!["SmallData", "GB", "MB/s"]);
        assert_eq!(gpu.reading_count(), 10);
    }

    #[test]
    fn cpu_and_motherboard_drop_groups_they_lack() {
        let sensors = vec![
            sensor(SensorKind::Temperature, "Core (Tctl/Tdie)", Some(71.5)),
            sensor(SensorKind::Power, "Package", Some(35.0)),
            sensor(SensorKind::Voltage, "Core (SVI2 TFN)", Some(1.1)),
            sensor(SensorKind::Clock, "Core #1", Some(4200.0)),
            sensor(SensorKind::Load, "CPU Total", Some(12.0)),
            sensor(SensorKind::Fan, "Fan #1", Some(900.0)),
            sensor(SensorKind::Data, "Cache", Some(1.0)),
        ];
        let cpu = node_with(HardwareKind::Cpu, "AMD Ryzen 7 7840HS", sensors.clone());
        let board = node_with(HardwareKind::Motherboard, "B650", sensors);

        let snapshot = build_snapshot(os(), &[cpu, board]);
        let cpu = snapshot.devices.cpu.unwrap();
        assert_eq!(cpu.header.kind, "CPU");
        assert_eq!(cpu.temperature.len(), 1);
        assert_eq!(cpu.power.len(), 1);
        assert_eq!(cpu.voltage.len(), 1);
        assert_eq!(cpu.frequency.len(), 1);
        assert_eq!(cpu.load.len(), 1);
        assert_eq!(cpu.reading_count(), 5);

        let board = snapshot.devices.motherboard.unwrap();
        assert_eq!(board.header.kind, "Motherboard");
        assert_eq!(board.temperature.len(), 1);
        assert_eq!(board.power.len(), 1);
        assert_eq!(board.voltage.len(), 1);
        assert_eq!(board.fan.len(), 1);
        assert_eq!(board.fan[0].unit, "RPM");
        assert_eq!(board.reading_count(), 4);
    }

    #[test]
    fn gpu_description_heuristic() {
        assert_eq!(
            gpu_description(HardwareKind::GpuIntel, "Intel(R) Arc(TM) A770"),
            "Integrated GPU"
        );
        assert_eq!(
            gpu_description(HardwareKind::GpuNvidia, "NVIDIA GeForce RTX 4060"),
            "Dedicated GPU"
        );
        assert_eq!(
            gpu_description(HardwareKind::GpuAmd, "AMD Radeon(TM) Graphics"),
            "Integrated GPU"
        );
        assert_eq!(
            gpu_description(HardwareKind::GpuAmd, "AMD Radeon Vega 8 Graphics"),
            "Integrated GPU"
        );
        assert_eq!(
            gpu_description(HardwareKind::GpuAmd, "AMD Radeon RX 7800 XT"),
            "Dedicated GPU"
        );
    }

    #[test]
    fn empty_memory_block_is_omitted() {
        let ram = node_with(
            HardwareKind::Memory,
            "Generic Memory",
            vec![
                sensor(SensorKind::Load, "Memory", None),
                sensor(SensorKind::Data, "Memory Used", Some(f64::NAN)),
            ],
        );
        let snapshot = build_snapshot(os(), &[ram]);
        assert!(snapshot.devices.ram.is_none());

        let json: serde_json::Value = serde_json::to_value(&snapshot).unwrap();
        assert!(json["devices"]["ram"].is_null());
    }

    #[test]
    fn memory_block_keeps_ungrouped_kinds() {
        let ram = node_with(
            HardwareKind::Memory,
            "Generic Memory",
            vec![
                sensor(SensorKind::Load, "Memory", Some(48.0)),
                sensor(SensorKind::Data, "Memory Used", Some(15.3)),
                sensor(SensorKind::Level, "Wear", Some(3.0)),
            ],
        );
        let snapshot = build_snapshot(os(), &[ram]);
        let ram = snapshot.devices.ram.unwrap();
        assert_eq!(ram.header.kind, "Memory");
        let units: Vec<&str> = ram.sensors.iter().map(|r| r.unit.as_str()).collect();
        assert_eq!(units, vec!["%", "GB", "Level"]);
    }

    #[test]
    fn empty_cpu_block_is_still_reported() {
        let snapshot = build_snapshot(os(), &[HardwareNode::new(HardwareKind::Cpu, "Unknown CPU")]);
        assert_eq!(snapshot.devices.cpu.unwrap().reading_count(), 0);
    }

    #[test]
    fn sub_hardware_is_merged_one_level_deep() {
        let mut superio = node_with(
            HardwareKind::SuperIo,
            "Nuvoton NCT6799D",
            vec![
                sensor(SensorKind::Fan, "Fan #1", Some(820.0)),
                sensor(SensorKind::Voltage, "Vcore", Some(1.2)),
            ],
        );
        superio.sub_hardware.push(node_with(
            HardwareKind::SuperIo,
            "nested",
            vec![sensor(SensorKind::Fan, "Fan #9", Some(1.0))],
        ));
        let mut board = node_with(
            HardwareKind::Motherboard,
            "ASUS ROG STRIX B650E-F",
            vec![sensor(SensorKind::Temperature, "System", Some(33.0))],
        )
        .with_properties("ASUSTeK COMPUTER INC.");
        board.sub_hardware.push(superio);

        let snapshot = build_snapshot(os(), &[board]);
        let board = snapshot.devices.motherboard.unwrap();
        assert_eq!(board.header.description, "ASUSTeK COMPUTER INC.");
        assert_eq!(board.temperature.len(), 1);
        assert_eq!(board.fan.len(), 1);
        assert_eq!(board.fan[0].name, "Fan #1");
        assert_eq!(board.voltage.len(), 1);
    }

    #[test]
    fn singletons_overwrite_and_gpus_append_in_order() {
        let hardware = vec![
            HardwareNode::new(HardwareKind::Cpu, "first cpu"),
            HardwareNode::new(HardwareKind::GpuIntel, "Intel UHD Graphics 770"),
            HardwareNode::new(HardwareKind::Cpu, "second cpu"),
            HardwareNode::new(HardwareKind::GpuNvidia, "NVIDIA GeForce RTX 4060"),
            HardwareNode::new(HardwareKind::Storage, "Samsung SSD 990 PRO"),
        ];
        let snapshot = build_snapshot(os(), &hardware);
        assert_eq!(snapshot.devices.cpu.unwrap().header.name, "second cpu");
        let names: Vec<&str> = snapshot
            .devices
            .gpu
            .iter()
            .map(|g| g.header.name.as_str())
            .collect();
        assert_eq!(names, vec!["Intel UHD Graphics 770", "NVIDIA GeForce RTX 4060"]);
        assert_eq!(snapshot.devices.gpu[0].header.kind, "GPU-INTEL");
        assert_eq!(snapshot.devices.gpu[0].header.description, "Integrated GPU");
    }

    #[test]
    fn failing_node_does_not_abort_the_rest() {
        let hardware = vec![
            HardwareNode::new(HardwareKind::Cpu, "  "),
            node_with(
                HardwareKind::GpuAmd,
                "AMD Radeon RX 7800 XT",
                vec![sensor(SensorKind::Load, "GPU Core", Some(3.0))],
            ),
        ];
        let snapshot = build_snapshot(os(), &hardware);
        assert!(snapshot.devices.cpu.is_none());
        assert_eq!(snapshot.devices.gpu.len(), 1);
    }

    #[test]
    fn type_labels_fall_back_to_kind_name() {
        assert_eq!(type_label(HardwareKind::GpuAmd), "GPU-AMD");
        assert_eq!(type_label(HardwareKind::Storage), "Storage");
        assert_eq!(type_label(HardwareKind::Psu), "Psu");
        assert_eq!(unit_for(SensorKind::Current), "Current");
    }

    #[test]
    fn small_data_is_labelled_with_its_kind_name() {
        assert_eq!(unit_for(SensorKind::SmallData), "SmallData");
        assert_eq!(unit_for(SensorKind::Data), "GB");

        let reading =
            normalize_reading(&sensor(SensorKind::SmallData, "GPU Memory Used", Some(2048.0)))
                .unwrap();
        assert_eq!(reading.unit, "SmallData");
        assert_eq!(reading.value, 2048.0);
    }
}
