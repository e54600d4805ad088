pub mod lhm;
pub mod system;

use thiserror::Error;

/// Something that can enumerate the host's hardware tree and refresh its sensors in place.
pub trait SensorSource: Send {
    fn refresh(&mut self) -> Result<(), SourceError>;

    /// Top-level hardware nodes as of the last successful refresh.
    fn hardware(&self) -> &[HardwareNode];
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("sensor source is not supported on this platform: {0}")]
    Unsupported(&'static str),
    #[error("sensor query failed: {0}")]
    Query(String),
    #[error("sensor source reported no hardware: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareKind {
    Motherboard,
    SuperIo,
    Cpu,
    Memory,
    GpuNvidia,
    GpuAmd,
    GpuIntel,
    Storage,
    Network,
    Cooler,
    EmbeddedController,
    Psu,
    Battery,
}

impl HardwareKind {
    /// Accepts both the current LibreHardwareMonitor names and the older OpenHardwareMonitor ones.
    pub fn parse(raw: &str) -> Option<Self> {
        let kind = match raw.trim().to_ascii_lowercase().as_str() {
            "motherboard" | "mainboard" => Self::Motherboard,
            "superio" => Self::SuperIo,
            "cpu" => Self::Cpu,
            "memory" | "ram" => Self::Memory,
            "gpunvidia" => Self::GpuNvidia,
            "gpuamd" | "gpuati" => Self::GpuAmd,
            "gpuintel" => Self::GpuIntel,
            "storage" | "hdd" => Self::Storage,
            "network" => Self::Network,
            "cooler" => Self::Cooler,
            "embeddedcontroller" => Self::EmbeddedController,
            "psu" => Self::Psu,
            "battery" => Self::Battery,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Motherboard => "Motherboard",
            Self::SuperIo => "SuperIO",
            Self::Cpu => "Cpu",
            Self::Memory => "Memory",
            Self::GpuNvidia => "GpuNvidia",
            Self::GpuAmd => "GpuAmd",
            Self::GpuIntel => "GpuIntel",
            Self::Storage => "Storage",
            Self::Network => "Network",
            Self::Cooler => "Cooler",
            Self::EmbeddedController => "EmbeddedController",
            Self::Psu => "Psu",
            Self::Battery => "Battery",
        }
    }

    pub fn is_gpu(self) -> bool {
        matches!(self, Self::GpuNvidia | Self::GpuAmd | Self::GpuIntel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Voltage,
    Current,
    Power,
    Clock,
    Temperature,
    Load,
    Frequency,
    Fan,
    Flow,
    Control,
    Level,
    Factor,
    Data,
    SmallData,
    Throughput,
    TimeSpan,
    Energy,
    Noise,
    Humidity,
}

impl SensorKind {
    pub fn parse(raw: &str) -> Option<Self> {
        let kind = match raw.trim().to_ascii_lowercase().as_str() {
            "voltage" => Self::Voltage,
            "current" => Self::Current,
            "power" => Self::Power,
            "clock" => Self::Clock,
            "temperature" => Self::Temperature,
            "load" => Self::Load,
            "frequency" => Self::Frequency,
            "fan" => Self::Fan,
            "flow" => Self::Flow,
            "control" => Self::Control,
            "level" => Self::Level,
            "factor" => Self::Factor,
            "data" => Self::Data,
            "smalldata" => Self::SmallData,
            "throughput" => Self::Throughput,
            "timespan" => Self::TimeSpan,
            "energy" => Self::Energy,
            "noise" => Self::Noise,
            "humidity" => Self::Humidity,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Voltage => "Voltage",
            Self::Current => "Current",
            Self::Power => "Power",
            Self::Clock => "Clock",
            Self::Temperature => "Temperature",
            Self::Load => "Load",
            Self::Frequency => "Frequency",
            Self::Fan => "Fan",
            Self::Flow => "Flow",
            Self::Control => "Control",
            Self::Level => "Level",
            Self::Factor => "Factor",
            Self::Data => "Data",
            Self::SmallData => "SmallData",
            Self::Throughput => "Throughput",
            Self::TimeSpan => "TimeSpan",
            Self::Energy => "Energy",
            Self::Noise => "Noise",
            Self::Humidity => "Humidity",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HardwareNode {
    pub kind: HardwareKind,
    pub name: String,
    /// Vendor/property text, passed through as the device description.
    pub properties: String,
    pub sub_hardware: Vec<HardwareNode>,
    pub sensors: Vec<RawSensor>,
}

impl HardwareNode {
    pub fn new(kind: HardwareKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            properties: String::new(),
            sub_hardware: Vec::new(),
            sensors: Vec::new(),
        }
    }

    pub fn with_properties(mut self, properties: impl Into<String>) -> Self {
        self.properties = properties.into();
        self
    }

    pub fn push_sensor(&mut self, kind: SensorKind, name: impl Into<String>, value: Option<f64>) {
        self.sensors.push(RawSensor {
            kind,
            name: name.into(),
            value,
        });
    }

    pub fn children(&self) -> &[HardwareNode] {
        &self.sub_hardware
    }

    pub fn sensors(&self) -> &[RawSensor] {
        &self.sensors
    }
}

/// A sensor as reported by the source. `value` is `None` when the source had no reading.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSensor {
    pub kind: SensorKind,
    pub name: String,
    pub value: Option<f64>,
}

pub(crate) fn parse_f64_loose(input: &str) -> Option<f64> {
    let trimmed = input.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    if let Ok(v) = trimmed.replace(',', ".").parse::<f64>() {
        return Some(v);
    }

    let filtered: String = trimmed
        .chars()
        .filter(|c| {
            c.is_ascii_digit()
                || *c == '.'
                || *c == ','
                || *c == 'e'
                || *c == 'E'
                || *c == '-'
                || *c == '+'
        })
        .collect();
    if filtered.is_empty() {
        return None;
    }

    filtered.replace(',', ".").parse::<f64>().ok()
}

pub(crate) fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        return utf8.to_string();
    }

    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let u16buf: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&u16buf) {
            return s;
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_kind_accepts_legacy_names() {
        assert_eq!(HardwareKind::parse("GpuAti"), Some(HardwareKind::GpuAmd));
        assert_eq!(HardwareKind::parse("RAM"), Some(HardwareKind::Memory));
        assert_eq!(HardwareKind::parse("CPU"), Some(HardwareKind::Cpu));
        assert_eq!(HardwareKind::parse("Toaster"), None);
    }

    #[test]
    fn loose_parse_handles_locale_and_placeholders() {
        assert_eq!(parse_f64_loose("42,5"), Some(42.5));
        assert_eq!(parse_f64_loose(" 115.25 W"), Some(115.25));
        assert_eq!(parse_f64_loose("[N/A]"), None);
        assert_eq!(parse_f64_loose(""), None);
    }

    #[test]
    fn decodes_utf16_output() {
        let bytes: Vec<u8> = "45°C".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(decode_cmd_stdout(&bytes), "45°C");
        assert_eq!(decode_cmd_stdout("plain".as_bytes()), "plain");
    }
}
