use prometheus::{Encoder, GaugeVec, IntGauge, IntGaugeVec, TextEncoder};
use pvs_rs::{CycleReport, Error, Snapshot, SupportedFeatures};

lazy_static! {
    static ref INVERTER_POWER_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("pvs_inverter_power_kw", "AC power reported by inverter (in kW)"),
        &["serial_number", "model"],
    )
    .unwrap();
    static ref INVERTER_VOLTAGE_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("pvs_inverter_voltage_v", "AC voltage reported by inverter"),
        &["serial_number", "model"],
    )
    .unwrap();
    static ref INVERTER_CURRENT_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("pvs_inverter_current_a", "AC current reported by inverter"),
        &["serial_number", "model"],
    )
    .unwrap();
    static ref INVERTER_FREQUENCY_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("pvs_inverter_frequency_hz", "AC frequency reported by inverter"),
        &["serial_number", "model"],
    )
    .unwrap();
    static ref INVERTER_TEMPERATURE_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("pvs_inverter_temperature_c", "heatsink temperature reported by inverter"),
        &["serial_number", "model"],
    )
    .unwrap();
    static ref INVERTER_LIFETIME_ENERGY_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "pvs_inverter_lifetime_energy_kwh",
            "total energy produced by inverter (in kWh)",
        ),
        &["serial_number", "model"],
    )
    .unwrap();
    static ref INVERTER_LAST_REPORT_GAUGE: GaugeVec = register_gauge_vec!(
        opts!(
            "pvs_inverter_last_report_timestamp_seconds",
            "time of the last inverter measurement",
        ),
        &["serial_number", "model"],
    )
    .unwrap();
    static ref METER_POWER_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("pvs_meter_power_kw", "three-phase power seen by meter (in kW)"),
        &["serial_number", "model"],
    )
    .unwrap();
    static ref METER_NET_ENERGY_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("pvs_meter_net_energy_kwh", "net lifetime energy seen by meter (in kWh)"),
        &["serial_number", "model"],
    )
    .unwrap();
    static ref GATEWAY_UPTIME_GAUGE: GaugeVec = register_gauge_vec!(
        opts!("pvs_gateway_uptime_seconds", "uptime reported by PVS"),
        &["serial_number"],
    )
    .unwrap();
    static ref SUPPORTED_FEATURES_GAUGE: IntGauge = register_int_gauge!(
        "pvs_supported_features",
        "bitmask of subsystems discovered on PVS"
    )
    .unwrap();
    static ref FEATURE_FAILURE_GAUGE: IntGaugeVec = register_int_gauge_vec!(
        opts!("pvs_feature_update_failed", "1 if last update of feature failed"),
        &["feature"]
    )
    .unwrap();
    static ref MAPPING_FAILURES_GAUGE: IntGauge = register_int_gauge!(
        "pvs_mapping_failures",
        "records skipped in last update because they could not be mapped"
    )
    .unwrap();
}

/// Replace all device gauges with the values of `snapshot`. Devices missing from the
/// snapshot disappear from the output.
fn process_snapshot(snapshot: &Snapshot) {
    for gauge in [
        &*INVERTER_POWER_GAUGE,
        &*INVERTER_VOLTAGE_GAUGE,
        &*INVERTER_CURRENT_GAUGE,
        &*INVERTER_FREQUENCY_GAUGE,
        &*INVERTER_TEMPERATURE_GAUGE,
        &*INVERTER_LIFETIME_ENERGY_GAUGE,
        &*INVERTER_LAST_REPORT_GAUGE,
        &*METER_POWER_GAUGE,
        &*METER_NET_ENERGY_GAUGE,
        &*GATEWAY_UPTIME_GAUGE,
    ] {
        gauge.reset();
    }

    for inverter in snapshot.inverters() {
        let labels = [inverter.serial_number.as_str(), inverter.model.as_str()];
        INVERTER_POWER_GAUGE
            .with_label_values(&labels)
            .set(inverter.last_report_kw);
        INVERTER_VOLTAGE_GAUGE
            .with_label_values(&labels)
            .set(inverter.last_report_voltage_v);
        INVERTER_CURRENT_GAUGE
            .with_label_values(&labels)
            .set(inverter.last_report_current_a);
        INVERTER_FREQUENCY_GAUGE
            .with_label_values(&labels)
            .set(inverter.last_report_frequency_hz);
        INVERTER_TEMPERATURE_GAUGE
            .with_label_values(&labels)
            .set(inverter.last_report_temperature_c);
        INVERTER_LIFETIME_ENERGY_GAUGE
            .with_label_values(&labels)
            .set(inverter.lte_kwh);
        INVERTER_LAST_REPORT_GAUGE
            .with_label_values(&labels)
            .set(inverter.last_report_date as f64);
    }

    for meter in snapshot.meters() {
        let labels = [meter.serial_number.as_str(), meter.model.as_str()];
        METER_POWER_GAUGE
            .with_label_values(&labels)
            .set(meter.power_3ph_kw);
        if let Some(net_energy) = meter.net_lte_3ph_kwh {
            METER_NET_ENERGY_GAUGE
                .with_label_values(&labels)
                .set(net_energy);
        }
    }

    if let Some(gateway) = snapshot.gateway() {
        if let Some(uptime) = gateway.uptime_s {
            GATEWAY_UPTIME_GAUGE
                .with_label_values(&[gateway.serial_number.as_str()])
                .set(uptime);
        }
    }
}

/// Feed one update cycle into the Prometheus registry.
pub fn process(snapshot: &Snapshot, report: &CycleReport, supported: Option<SupportedFeatures>) {
    process_snapshot(snapshot);

    SUPPORTED_FEATURES_GAUGE.set(supported.map(|s| i64::from(s.bits())).unwrap_or(0));
    FEATURE_FAILURE_GAUGE.reset();
    for feature in &report.updated {
        FEATURE_FAILURE_GAUGE
            .with_label_values(&[feature.name()])
            .set(0);
    }
    for failure in &report.failures {
        FEATURE_FAILURE_GAUGE
            .with_label_values(&[failure.feature.name()])
            .set(1);
    }
    MAPPING_FAILURES_GAUGE.set(report.mapping_failures.len() as i64);
}

/// Read metrics from Prometheus exporter registry.
pub async fn read() -> Result<String, Error> {
    // Gather the metrics.
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .or(Err(Error::FormatError))?;
    String::from_utf8(buffer).or(Err(Error::FormatError))
}
