use crate::snapshot::{SensorReading, Snapshot};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub hwmon_cycles_total: Counter,
    pub hwmon_cycle_errors_total: CounterVec,
    pub hwmon_cycle_duration_seconds: Gauge,
    pub hwmon_last_publish_timestamp_seconds: Gauge,
    pub hwmon_subscribers: Gauge,
    pub hwmon_messages_sent_total: Counter,
    pub hwmon_subscribers_evicted_total: Counter,
    pub hwmon_poll_requests_total: Counter,
    pub hwmon_scrape_count_total: Counter,
    pub hwmon_gpu_count: Gauge,
    pub hwmon_sensor_count: Gauge,
    pub hwmon_sensor_value: GaugeVec,
    pub hwmon_uptime_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let hwmon_cycles_total = Counter::with_opts(opts!(
            "hwmon_cycles_total",
            "Sampling cycles that published a snapshot"
        ))?;
        let hwmon_cycle_errors_total = CounterVec::new(
            opts!(
                "hwmon_cycle_errors_total",
                "Sampling cycles that failed, by stage"
            ),
            &["stage"],
        )?;
        let hwmon_cycle_duration_seconds = Gauge::with_opts(opts!(
            "hwmon_cycle_duration_seconds",
            "Duration of the last sampling cycle, refresh through broadcast"
        ))?;
        let hwmon_last_publish_timestamp_seconds = Gauge::with_opts(opts!(
            "hwmon_last_publish_timestamp_seconds",
            "Unix time of the last published snapshot"
        ))?;
        let hwmon_subscribers = Gauge::with_opts(opts!(
            "hwmon_subscribers",
            "Currently connected streaming subscribers"
        ))?;
        let hwmon_messages_sent_total = Counter::with_opts(opts!(
            "hwmon_messages_sent_total",
            "Snapshots queued to streaming subscribers"
        ))?;
        let hwmon_subscribers_evicted_total = Counter::with_opts(opts!(
            "hwmon_subscribers_evicted_total",
            "Subscribers dropped because a send failed or timed out"
        ))?;
        let hwmon_poll_requests_total = Counter::with_opts(opts!(
            "hwmon_poll_requests_total",
            "Snapshots served by the poll endpoint"
        ))?;
        let hwmon_scrape_count_total = Counter::with_opts(opts!(
            "hwmon_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let hwmon_gpu_count =
            Gauge::with_opts(opts!("hwmon_gpu_count", "GPUs in the last snapshot"))?;
        let hwmon_sensor_count = Gauge::with_opts(opts!(
            "hwmon_sensor_count",
            "Readings in the last snapshot"
        ))?;
        let hwmon_sensor_value = GaugeVec::new(
            opts!("hwmon_sensor_value", "Last value of each reading"),
            &["device", "group", "sensor", "unit"],
        )?;
        let hwmon_uptime_seconds =
            Gauge::with_opts(opts!("hwmon_uptime_seconds", "Service uptime in seconds"))?;

        register(&registry, &hwmon_cycles_total)?;
        register(&registry, &hwmon_cycle_errors_total)?;
        register(&registry, &hwmon_cycle_duration_seconds)?;
        register(&registry, &hwmon_last_publish_timestamp_seconds)?;
        register(&registry, &hwmon_subscribers)?;
        register(&registry, &hwmon_messages_sent_total)?;
        register(&registry, &hwmon_subscribers_evicted_total)?;
        register(&registry, &hwmon_poll_requests_total)?;
        register(&registry, &hwmon_scrape_count_total)?;
        register(&registry, &hwmon_gpu_count)?;
        register(&registry, &hwmon_sensor_count)?;
        register(&registry, &hwmon_sensor_value)?;
        register(&registry, &hwmon_uptime_seconds)?;

        Ok(Arc::new(Self {
            registry,
            started_at_unix: now_unix(),
            hwmon_cycles_total,
            hwmon_cycle_errors_total,
            hwmon_cycle_duration_seconds,
            hwmon_last_publish_timestamp_seconds,
            hwmon_subscribers,
            hwmon_messages_sent_total,
            hwmon_subscribers_evicted_total,
            hwmon_poll_requests_total,
            hwmon_scrape_count_total,
            hwmon_gpu_count,
            hwmon_sensor_count,
            hwmon_sensor_value,
            hwmon_uptime_seconds,
        }))
    }

    pub fn observe_publish(&self, snapshot: &Snapshot, published_at_unix: i64, took: Duration) {
        self.hwmon_cycles_total.inc();
        self.hwmon_cycle_duration_seconds.set(took.as_secs_f64());
        self.hwmon_last_publish_timestamp_seconds
            .set(published_at_unix as f64);

        // Devices can disappear between cycles; stale label sets must not linger.
        self.hwmon_sensor_value.reset();
        let mut count = 0_usize;
        let mut record = |device: &str, group: &str, readings: &[SensorReading]| {
            for r in readings {
                self.hwmon_sensor_value
                    .with_label_values(&[device, group, r.name.as_str(), r.unit.as_str()])
                    .set(r.value as f64);
                count += 1;
            }
        };

        let devices = &snapshot.devices;
        if let Some(cpu) = &devices.cpu {
            let name = cpu.header.name.as_str();
            record(name, "frequency", &cpu.frequency);
            record(name, "power", &cpu.power);
            record(name, "temperature", &cpu.temperature);
            record(name, "voltage", &cpu.voltage);
            record(name, "load", &cpu.load);
        }
        for gpu in &devices.gpu {
            let name = gpu.header.name.as_str();
            record(name, "frequency", &gpu.frequency);
            record(name, "power", &gpu.power);
            record(name, "temperature", &gpu.temperature);
            record(name, "voltage", &gpu.voltage);
            record(name, "load", &gpu.load);
            record(name, "memory", &gpu.memory);
            record(name, "fan", &gpu.fan);
        }
        if let Some(board) = &devices.motherboard {
            let name = board.header.name.as_str();
            record(name, "power", &board.power);
            record(name, "temperature", &board.temperature);
            record(name, "voltage", &board.voltage);
            record(name, "fan", &board.fan);
        }
        if let Some(ram) = &devices.ram {
            record(ram.header.name.as_str(), "sensors", &ram.sensors);
        }

        self.hwmon_sensor_count.set(count as f64);
        self.hwmon_gpu_count.set(devices.gpu.len() as f64);
    }

    pub fn inc_cycle_error(&self, stage: &str) {
        self.hwmon_cycle_errors_total
            .with_label_values(&[stage])
            .inc();
    }

    pub fn observe_broadcast(&self, delivered: usize, evicted: usize, subscribers: usize) {
        self.hwmon_messages_sent_total.inc_by(delivered as f64);
        self.hwmon_subscribers_evicted_total.inc_by(evicted as f64);
        self.hwmon_subscribers.set(subscribers as f64);
    }

    pub fn inc_poll_request(&self) {
        self.hwmon_poll_requests_total.inc();
    }

    pub fn inc_scrape_count(&self) {
        self.hwmon_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.hwmon_uptime_seconds
            .set(now_unix().saturating_sub(self.started_at_unix) as f64);

        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{GpuDevice, OperatingSystemInfo};

    #[test]
    fn publish_exports_sensor_values() {
        let metrics = Metrics::new().expect("metrics registry");
        let mut snapshot = Snapshot::empty(OperatingSystemInfo::new(
            "TestOS".to_string(),
            "1".to_string(),
            true,
        ));
        let mut gpu = GpuDevice::default();
        gpu.header.name = "NVIDIA GeForce RTX 4060".to_string();
        gpu.temperature.push(SensorReading {
            name: "GPU Core".to_string(),
            value: 61.0,
            unit: "C".to_string(),
        });
        snapshot.devices.gpu.push(gpu);

        metrics.observe_publish(&snapshot, 1_700_000_000, Duration::from_millis(40));
        metrics.observe_broadcast(3, 1, 2);

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("hwmon_gpu_count 1"));
        assert!(text.contains("hwmon_sensor_count 1"));
        assert!(text.contains("sensor=\"GPU Core\""));
        assert!(text.contains("hwmon_subscribers 2"));
        assert!(text.contains("hwmon_subscribers_evicted_total 1"));
        assert!(text.contains(
            "# HELP hwmon_cycle_duration_seconds Duration of the last sampling cycle, refresh through broadcast"
        ));
        assert!(text.contains("hwmon_cycle_duration_seconds 0.04"));
    }
}
