//! Conversion of raw varserver records into typed entities.
//!
//! Required fields fail the mapping when missing; optional fields map to `None`.
//! Numbers are accepted either as JSON numbers or as numeric strings, which is how most
//! firmware revisions report them.

use crate::api::error::Error;
use crate::api::response::RawRecord;
use crate::model::{Entity, PvsGateway, PvsInverter, PvsMeter};
use chrono::NaiveDateTime;
use serde_json::Value;

/// Format of `msmtEps`, e.g. `2024-09-30T16:15:00Z`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Turns one raw record into exactly one entity.
pub trait FieldMapper: Send + Sync {
    fn map(&self, record: &RawRecord) -> Result<Entity, Error>;
}

impl<F> FieldMapper for F
where
    F: Fn(&RawRecord) -> Result<Entity, Error> + Send + Sync,
{
    fn map(&self, record: &RawRecord) -> Result<Entity, Error> {
        self(record)
    }
}

/// Field accessors bound to the entity kind, for error reporting.
struct Fields<'a> {
    entity: &'static str,
    record: &'a RawRecord,
}

impl<'a> Fields<'a> {
    fn new(entity: &'static str, record: &'a RawRecord) -> Self {
        Fields { entity, record }
    }

    fn error(&self, field: &str, message: String) -> Error {
        Error::Mapping {
            entity: self.entity,
            field: field.to_owned(),
            message,
        }
    }

    fn required(&self, field: &str) -> Result<&'a Value, Error> {
        match self.record.get(field) {
            Some(Value::Null) | None => Err(self.error(field, "missing required field".into())),
            Some(value) => Ok(value),
        }
    }

    fn string(&self, field: &str) -> Result<String, Error> {
        let value = self.required(field)?;
        self.as_string(field, value)
    }

    fn opt_string(&self, field: &str) -> Result<Option<String>, Error> {
        match self.record.get(field) {
            Some(Value::Null) | None => Ok(None),
            Some(value) => self.as_string(field, value).map(Some),
        }
    }

    fn as_string(&self, field: &str, value: &Value) -> Result<String, Error> {
        match value {
            Value::String(s) => Ok(s.to_owned()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(self.error(field, format!("expected a string, got {}", other))),
        }
    }

    fn number(&self, field: &str) -> Result<f64, Error> {
        let value = self.required(field)?;
        self.as_number(field, value)
    }

    fn opt_number(&self, field: &str) -> Result<Option<f64>, Error> {
        match self.record.get(field) {
            Some(Value::Null) | None => Ok(None),
            Some(value) => self.as_number(field, value).map(Some),
        }
    }

    fn as_number(&self, field: &str, value: &Value) -> Result<f64, Error> {
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        number
            .filter(|n| n.is_finite())
            .ok_or_else(|| self.error(field, format!("expected a number, got {}", value)))
    }

    fn timestamp(&self, field: &str) -> Result<i64, Error> {
        match self.required(field)? {
            Value::String(s) => {
                parse_timestamp(s).map_err(|message| self.error(field, message))
            }
            other => Err(self.error(
                field,
                format!("expected a `{}` timestamp, got {}", TIMESTAMP_FORMAT, other),
            )),
        }
    }
}

/// Normalize a `%Y-%m-%dT%H:%M:%SZ` date-time to epoch seconds UTC.
pub fn parse_timestamp(s: &str) -> Result<i64, String> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map(|dt| dt.and_utc().timestamp())
        .map_err(|e| format!("malformed timestamp `{}`: {}", s, e))
}

/// Maps `/sys/info` variables.
pub fn gateway(record: &RawRecord) -> Result<Entity, Error> {
    let f = Fields::new("gateway", record);
    Ok(Entity::Gateway(PvsGateway {
        serial_number: f.string("serialnum")?,
        model: f.opt_string("model")?,
        software_version: f.opt_string("sw_rev")?,
        hardware_version: f.opt_string("hwrev")?,
        uptime_s: f.opt_number("uptime")?,
    }))
}

/// Maps `/sys/devices/inverter/*/*` variables.
pub fn inverter(record: &RawRecord) -> Result<Entity, Error> {
    let f = Fields::new("inverter", record);
    Ok(Entity::Inverter(PvsInverter {
        serial_number: f.string("sn")?,
        model: f.string("prodMdlNm")?,
        last_report_date: f.timestamp("msmtEps")?,
        last_report_kw: f.number("p3phsumKw")?,
        last_report_voltage_v: f.number("vln3phavgV")?,
        last_report_current_a: f.number("i3phsumA")?,
        last_report_frequency_hz: f.number("freqHz")?,
        last_report_temperature_c: f.number("tHtsnkDegc")?,
        lte_kwh: f.number("ltea3phsumKwh")?,
        last_mppt_voltage_v: f.opt_number("vMppt1V")?,
        last_mppt_current_a: f.opt_number("iMppt1A")?,
        last_mppt_power_kw: f.opt_number("pMppt1Kw")?,
    }))
}

/// Maps `/sys/devices/meter/*/*` variables.
pub fn meter(record: &RawRecord) -> Result<Entity, Error> {
    let f = Fields::new("meter", record);
    Ok(Entity::Meter(PvsMeter {
        serial_number: f.string("sn")?,
        model: f.string("prodMdlNm")?,
        last_report_date: f.timestamp("msmtEps")?,
        power_3ph_kw: f.number("p3phsumKw")?,
        frequency_hz: f.opt_number("freqHz")?,
        ct_scale_factor: f.opt_number("ctSclFctr")?,
        net_lte_3ph_kwh: f.opt_number("netLtea3phsumKwh")?,
        pos_lte_3ph_kwh: f.opt_number("posLtea3phsumKwh")?,
        neg_lte_3ph_kwh: f.opt_number("negLtea3phsumKwh")?,
        q_3ph_kvar: f.opt_number("q3phsumKvar")?,
        s_3ph_kva: f.opt_number("s3phsumKva")?,
        total_pf_ratio: f.opt_number("totPfRto")?,
        i1_a: f.opt_number("i1A")?,
        i2_a: f.opt_number("i2A")?,
        v1n_v: f.opt_number("v1nV")?,
        v2n_v: f.opt_number("v2nV")?,
        p1_kw: f.opt_number("p1Kw")?,
        p2_kw: f.opt_number("p2Kw")?,
    }))
}
