use serde::Serialize;

/// Wire document published once per sampling cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub operating_system_info: OperatingSystemInfo,
    pub devices: Devices,
}

impl Snapshot {
    /// Placeholder served before the first cycle completes.
    pub fn empty(operating_system_info: OperatingSystemInfo) -> Self {
        Self {
            operating_system_info,
            devices: Devices::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatingSystemInfo {
    pub os_name: String,
    pub os_version: String,
    #[serde(rename = "is64Bit")]
    pub is_64_bit: String,
}

impl OperatingSystemInfo {
    pub fn new(os_name: String, os_version: String, is_64_bit: bool) -> Self {
        Self {
            os_name,
            os_version,
            is_64_bit: if is_64_bit { "Yes" } else { "No" }.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Devices {
    pub cpu: Option<CpuDevice>,
    pub gpu: Vec<GpuDevice>,
    pub motherboard: Option<MotherboardDevice>,
    pub ram: Option<GenericDevice>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceHeader {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub name: String,
    pub value: f32,
    pub unit: String,
}

/// Named reading groups a device block can expose on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadingGroup {
    Frequency,
    Power,
    Temperature,
    Voltage,
    Load,
    Memory,
    Fan,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CpuDevice {
    #[serde(flatten)]
    pub header: DeviceHeader,
    pub frequency: Vec<SensorReading>,
    pub power: Vec<SensorReading>,
    pub temperature: Vec<SensorReading>,
    pub voltage: Vec<SensorReading>,
    pub load: Vec<SensorReading>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GpuDevice {
    #[serde(flatten)]
    pub header: DeviceHeader,
    pub frequency: Vec<SensorReading>,
    pub power: Vec<SensorReading>,
    pub temperature: Vec<SensorReading>,
    pub voltage: Vec<SensorReading>,
    pub load: Vec<SensorReading>,
    pub memory: Vec<SensorReading>,
    pub fan: Vec<SensorReading>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MotherboardDevice {
    #[serde(flatten)]
    pub header: DeviceHeader,
    pub power: Vec<SensorReading>,
    pub temperature: Vec<SensorReading>,
    pub voltage: Vec<SensorReading>,
    pub fan: Vec<SensorReading>,
}

/// Ungrouped device (RAM): every accepted reading lands in one list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenericDevice {
    #[serde(flatten)]
    pub header: DeviceHeader,
    pub sensors: Vec<SensorReading>,
}

/// A device block that readings can be sorted into.
pub trait DeviceBlock: Default {
    fn header_mut(&mut self) -> &mut DeviceHeader;

    /// The list a reading belongs to. `group` is `None` for sensor kinds outside the
    /// grouping table; grouped devices drop those, the generic device keeps them.
    fn readings_mut(&mut self, group: Option<ReadingGroup>) -> Option<&mut Vec<SensorReading>>;

    fn reading_count(&self) -> usize;
}

impl DeviceBlock for CpuDevice {
    fn header_mut(&mut self) -> &mut DeviceHeader {
        &mut self.header
    }

    fn readings_mut(&mut self, group: Option<ReadingGroup>) -> Option<&mut Vec<SensorReading>> {
        match group? {
            ReadingGroup::Frequency => Some(&mut self.frequency),
            ReadingGroup::Power => Some(&mut self.power),
            ReadingGroup::Temperature => Some(&mut self.temperature),
            ReadingGroup::Voltage => Some(&mut self.voltage),
            ReadingGroup::Load => Some(&mut self.load),
            ReadingGroup::Memory | ReadingGroup::Fan => None,
        }
    }

    fn reading_count(&self) -> usize {
        self.frequency.len()
            + self.power.len()
            + self.temperature.len()
            + self.voltage.len()
            + self.load.len()
    }
}

impl DeviceBlock for GpuDevice {
    fn header_mut(&mut self) -> &mut DeviceHeader {
        &mut self.header
    }

    fn readings_mut(&mut self, group: Option<ReadingGroup>) -> Option<&mut Vec<SensorReading>> {
        Some(match group? {
            ReadingGroup::Frequency => &mut self.frequency,
            ReadingGroup::Power => &mut self.power,
            ReadingGroup::Temperature => &mut self.temperature,
            ReadingGroup::Voltage => &mut self.voltage,
            ReadingGroup::Load => &mut self.load,
            ReadingGroup::Memory => &mut self.memory,
            ReadingGroup::Fan => &mut self.fan,
        })
    }

    fn reading_count(&self) -> usize {
        self.frequency.len()
            + self.power.len()
            + self.temperature.len()
            + self.voltage.len()
            + self.load.len()
            + self.memory.len()
            + self.fan.len()
    }
}

impl DeviceBlock for MotherboardDevice {
    fn header_mut(&mut self) -> &mut DeviceHeader {
        &mut self.header
    }

    fn readings_mut(&mut self, group: Option<ReadingGroup>) -> Option<&mut Vec<SensorReading>> {
        match group? {
            ReadingGroup::Power => Some(&mut self.power),
            ReadingGroup::Temperature => Some(&mut self.temperature),
            ReadingGroup::Voltage => Some(&mut self.voltage),
            ReadingGroup::Fan => Some(&mut self.fan),
            ReadingGroup::Frequency | ReadingGroup::Load | ReadingGroup::Memory => None,
        }
    }

    fn reading_count(&self) -> usize {
        self.power.len() + self.temperature.len() + self.voltage.len() + self.fan.len()
    }
}

impl DeviceBlock for GenericDevice {
    fn header_mut(&mut self) -> &mut DeviceHeader {
        &mut self.header
    }

    fn readings_mut(&mut self, _group: Option<ReadingGroup>) -> Option<&mut Vec<SensorReading>> {
        Some(&mut self.sensors)
    }

    fn reading_count(&self) -> usize {
        self.sensors.len()
    }
}
