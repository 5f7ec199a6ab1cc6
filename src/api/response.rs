use crate::api::endpoint::VarPath;
use crate::api::error::Error;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Variables of one device instance, keyed by leaf name (`sn`, `p3phsumKw`, ...).
pub type RawRecord = Map<String, Value>;

/// Records of a subtree keyed by instance path (`/sys/devices/inverter/0`).
pub type InstanceRecords = BTreeMap<String, RawRecord>;

const NOT_LOGGED_IN_MARKER: &str = "not logged in";
/// Full texts (lowercase) the varserver answers with for a path it does not serve.
const UNKNOWN_PATH_MESSAGES: [&str; 2] = ["unknown variable or path", "unknown path"];

/* Varserver error */
#[derive(Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Deserialize)]
pub struct Var {
    pub name: String,
    pub value: Value,
}

/* {"count": 2, "values": [{"name": "/sys/info/uptime", "value": "1234"}, ...]} */
#[derive(Deserialize)]
pub struct VarList {
    pub count: Option<u64>,
    pub values: Vec<Var>,
}

/* Valid response types */
#[derive(Deserialize)]
#[serde(untagged)]
pub enum VarserverResponse {
    Error(ErrorResponse),
    List(VarList),
    /// Either `fmt=obj` (instance path -> object) or flat (full path -> value).
    Object(Map<String, Value>),
}

pub fn parse_body(body: &str) -> Result<Value, Error> {
    serde_json::from_str(body).map_err(|e| Error::Decoding {
        message: e.to_string(),
        body: body.to_owned(),
    })
}

/// Whether a 2xx payload is the varserver telling us the session is gone.
pub fn is_not_logged_in(value: &Value) -> bool {
    value
        .get("error")
        .and_then(Value::as_str)
        .map(|message| message.to_lowercase().contains(NOT_LOGGED_IN_MARKER))
        .unwrap_or(false)
}

fn decode(value: Value) -> Result<VarserverResponse, Error> {
    VarserverResponse::deserialize(&value).map_err(|e| Error::Decoding {
        message: e.to_string(),
        body: value.to_string(),
    })
}

fn classify_error(path: &VarPath, message: String) -> Error {
    let lowered = message.trim().to_lowercase();
    if UNKNOWN_PATH_MESSAGES.contains(&lowered.as_str()) {
        Error::UnknownPath {
            path: path.to_owned(),
            message,
        }
    } else {
        Error::Varserver {
            path: path.to_owned(),
            message,
        }
    }
}

/// `/sys/devices/inverter/0/sn` -> (`/sys/devices/inverter/0`, `sn`)
fn split_var_name(name: &str) -> (&str, &str) {
    let trimmed = name.trim_end_matches('/');
    trimmed.rsplit_once('/').unwrap_or(("", trimmed))
}

fn group<I>(vars: I) -> InstanceRecords
where
    I: IntoIterator<Item = (String, Value)>,
{
    let mut records = InstanceRecords::new();
    for (name, value) in vars {
        match value {
            Value::Object(fields) => records.entry(name).or_default().extend(fields),
            value => {
                let (instance, field) = split_var_name(&name);
                records
                    .entry(instance.to_owned())
                    .or_default()
                    .insert(field.to_owned(), value);
            }
        }
    }
    records
}

/// Decode the answer to a `match` query into per-instance records.
pub fn instance_records(path: &VarPath, value: Value) -> Result<InstanceRecords, Error> {
    let records = match decode(value)? {
        VarserverResponse::Error(e) => return Err(classify_error(path, e.error)),
        VarserverResponse::List(list) => group(list.values.into_iter().map(|v| (v.name, v.value))),
        VarserverResponse::Object(map) => group(map),
    };

    if records.is_empty() {
        Err(Error::NoMatch(path.to_owned()))
    } else {
        Ok(records)
    }
}

/// Decode the answer to a `name` query into the value of that variable.
pub fn single_value(name: &VarPath, value: Value) -> Result<Value, Error> {
    let found = match decode(value)? {
        VarserverResponse::Error(e) => return Err(classify_error(name, e.error)),
        VarserverResponse::List(list) => list
            .values
            .into_iter()
            .find(|v| v.name == name)
            .map(|v| v.value),
        VarserverResponse::Object(mut map) => map.remove(name),
    };

    found.ok_or_else(|| Error::NoMatch(name.to_owned()))
}
