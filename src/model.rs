use crate::api::endpoint::{self, VarPath};
use crate::api::error::Error;
use crate::api::response::RawRecord;
use num_derive::FromPrimitive;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

type Kw = f64;
type KWh = f64;

pub const DEFAULT_USERNAME: &str = "ssm_owner";
const PASSWORD_LEN: usize = 5;

/// Basic-auth identity for the varserver.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: String, password: String) -> Self {
        Credentials { username, password }
    }

    /// The PVS password is the last five characters of its serial number.
    pub fn for_serial(username: &str, serial: &str) -> Result<Self, Error> {
        let serial = serial.trim();
        let chars: Vec<char> = serial.chars().collect();
        if chars.len() < PASSWORD_LEN {
            return Err(Error::Config(format!(
                "serial number `{}` is shorter than {} characters",
                serial, PASSWORD_LEN
            )));
        }
        let password = chars[chars.len() - PASSWORD_LEN..].iter().collect();
        Ok(Credentials::new(username.to_owned(), password))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_owned()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_interval() -> u64 {
    60
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PvsConfig {
    pub host: String,
    pub serial: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Minimum number of seconds between two update cycles.
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Comma separated feature names; empty means every known feature.
    #[serde(default)]
    pub features: String,
}

impl PvsConfig {
    pub fn credentials(&self) -> Result<Credentials, Error> {
        Credentials::for_serial(&self.username, &self.serial)
    }

    pub fn feature_list(&self) -> Result<Vec<Feature>, Error> {
        let features = self
            .features
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(Feature::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        if features.is_empty() {
            Ok(Feature::ALL.to_vec())
        } else {
            Ok(features)
        }
    }
}

/// Optional PVS subsystems. Discriminants are the bits in `SupportedFeatures`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// The PVS itself is the gateway
    Gateway = 1,
    /// PVS reports inverters
    Inverters = 2,
    /// PVS reports an active production meter
    Metering = 4,
}

impl Feature {
    /// Declared probe order.
    pub const ALL: [Feature; 3] = [Feature::Gateway, Feature::Inverters, Feature::Metering];

    pub fn var_path(self) -> &'static VarPath {
        match self {
            Feature::Gateway => endpoint::VARS_MATCH_INFO,
            Feature::Inverters => endpoint::VARS_MATCH_INVERTERS,
            Feature::Metering => endpoint::VARS_MATCH_METERS,
        }
    }

    pub fn flag(self) -> SupportedFeatures {
        SupportedFeatures(self as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            Feature::Gateway => "gateway",
            Feature::Inverters => "inverters",
            Feature::Metering => "metering",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .iter()
            .copied()
            .find(|feature| feature.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown feature `{}`", s)))
    }
}

/// Bitmask of detected features. Only ever grows: there is no operation that clears a bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct SupportedFeatures(u8);

impl SupportedFeatures {
    pub const EMPTY: SupportedFeatures = SupportedFeatures(0);
    pub const GATEWAY: SupportedFeatures = SupportedFeatures(Feature::Gateway as u8);
    pub const INVERTERS: SupportedFeatures = SupportedFeatures(Feature::Inverters as u8);
    pub const METERING: SupportedFeatures = SupportedFeatures(Feature::Metering as u8);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: SupportedFeatures) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn has(self, feature: Feature) -> bool {
        self.contains(feature.flag())
    }

    /// Set features, lowest bit first.
    pub fn features(self) -> impl Iterator<Item = Feature> {
        (0..8u8)
            .map(|shift| 1u8 << shift)
            .filter(move |bit| self.0 & bit != 0)
            .filter_map(<Feature as num::FromPrimitive>::from_u8)
    }
}

impl BitOr for SupportedFeatures {
    type Output = SupportedFeatures;

    fn bitor(self, rhs: SupportedFeatures) -> SupportedFeatures {
        SupportedFeatures(self.0 | rhs.0)
    }
}

impl BitOrAssign for SupportedFeatures {
    fn bitor_assign(&mut self, rhs: SupportedFeatures) {
        self.0 |= rhs.0;
    }
}

impl From<Feature> for SupportedFeatures {
    fn from(feature: Feature) -> Self {
        feature.flag()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PvsGateway {
    pub serial_number: String,
    pub model: Option<String>,
    pub software_version: Option<String>,
    pub hardware_version: Option<String>,
    pub uptime_s: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PvsInverter {
    pub serial_number: String,
    pub model: String,
    /// Epoch seconds, UTC.
    pub last_report_date: i64,
    pub last_report_kw: Kw,
    pub last_report_voltage_v: f64,
    pub last_report_current_a: f64,
    pub last_report_frequency_hz: f64,
    pub last_report_temperature_c: f64,
    pub lte_kwh: KWh,
    pub last_mppt_voltage_v: Option<f64>,
    pub last_mppt_current_a: Option<f64>,
    pub last_mppt_power_kw: Option<Kw>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PvsMeter {
    pub serial_number: String,
    pub model: String,
    /// Epoch seconds, UTC.
    pub last_report_date: i64,
    pub power_3ph_kw: Kw,
    pub frequency_hz: Option<f64>,
    pub ct_scale_factor: Option<f64>,
    pub net_lte_3ph_kwh: Option<KWh>,
    pub pos_lte_3ph_kwh: Option<KWh>,
    pub neg_lte_3ph_kwh: Option<KWh>,
    pub q_3ph_kvar: Option<f64>,
    pub s_3ph_kva: Option<f64>,
    pub total_pf_ratio: Option<f64>,
    pub i1_a: Option<f64>,
    pub i2_a: Option<f64>,
    pub v1n_v: Option<f64>,
    pub v2n_v: Option<f64>,
    pub p1_kw: Option<Kw>,
    pub p2_kw: Option<Kw>,
}

/// A typed record mapped from one raw varserver record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Gateway(PvsGateway),
    Inverter(PvsInverter),
    Meter(PvsMeter),
}

impl Entity {
    /// Natural identity of the device: its serial number.
    pub fn identity(&self) -> &str {
        match self {
            Entity::Gateway(g) => &g.serial_number,
            Entity::Inverter(i) => &i.serial_number,
            Entity::Meter(m) => &m.serial_number,
        }
    }
}

/// Output of one update cycle. Created by the caller, filled by the updater.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    /// Raw records per variable path, instance paths dropped.
    pub raw: BTreeMap<String, Vec<RawRecord>>,
    /// Typed entities by serial number.
    pub entities: BTreeMap<String, Entity>,
}

impl Snapshot {
    pub fn new() -> Self {
        Snapshot::default()
    }

    pub fn gateway(&self) -> Option<&PvsGateway> {
        self.entities.values().find_map(|e| match e {
            Entity::Gateway(g) => Some(g),
            _ => None,
        })
    }

    pub fn inverters(&self) -> impl Iterator<Item = &PvsInverter> {
        self.entities.values().filter_map(|e| match e {
            Entity::Inverter(i) => Some(i),
            _ => None,
        })
    }

    pub fn meters(&self) -> impl Iterator<Item = &PvsMeter> {
        self.entities.values().filter_map(|e| match e {
            Entity::Meter(m) => Some(m),
            _ => None,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn password_is_serial_suffix() {
        let credentials = Credentials::for_serial(DEFAULT_USERNAME, "ZT192585000549A1072").unwrap();
        assert_eq!("ssm_owner", credentials.username);
        assert_eq!("A1072", credentials.password);
        assert!(!format!("{:?}", credentials).contains("A1072"));
    }

    #[test]
    fn short_serial_is_rejected() {
        assert!(matches!(
            Credentials::for_serial(DEFAULT_USERNAME, "1072"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn or_never_clears_bits() {
        for bits in 0..8u8 {
            let mask = SupportedFeatures(bits);
            for feature in Feature::ALL {
                let updated = mask | feature.flag();
                assert!(updated.contains(mask));
                assert!(updated.has(feature));
            }
        }
    }

    #[test]
    fn features_iterate_in_bit_order() {
        let mask = SupportedFeatures::METERING | SupportedFeatures::GATEWAY;
        assert_eq!(
            vec![Feature::Gateway, Feature::Metering],
            mask.features().collect::<Vec<_>>()
        );
        assert!(SupportedFeatures::EMPTY.features().next().is_none());
    }

    #[test]
    fn feature_list_from_config() {
        let mut config = PvsConfig {
            host: "192.168.1.10".into(),
            serial: "ZT192585000549A1072".into(),
            username: default_username(),
            timeout_secs: default_timeout_secs(),
            interval: default_interval(),
            features: String::new(),
        };
        assert_eq!(Feature::ALL.to_vec(), config.feature_list().unwrap());

        config.features = "Inverters, metering".into();
        assert_eq!(
            vec![Feature::Inverters, Feature::Metering],
            config.feature_list().unwrap()
        );

        config.features = "batteries".into();
        assert!(matches!(config.feature_list(), Err(Error::Config(_))));
    }
}
