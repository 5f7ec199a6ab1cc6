pub type Endpoint = str;

/// Variable path (or prefix) in the varserver namespace. Sent verbatim, the firmware does
/// literal prefix matching.
pub type VarPath = str;

pub const LOGIN: &Endpoint = "/auth?login";
pub const LOGOUT: &Endpoint = "/auth?logout";
pub const VARS: &Endpoint = "/vars";

pub const VARS_MATCH_INFO: &VarPath = "/sys/info";
pub const VARS_MATCH_INVERTERS: &VarPath = "/sys/devices/inverter/";
pub const VARS_MATCH_METERS: &VarPath = "/sys/devices/meter/";
pub const VAR_UPTIME: &VarPath = "/sys/info/uptime";
