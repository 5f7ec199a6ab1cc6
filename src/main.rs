#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prometheus;
#[macro_use]
extern crate rocket;

use config::Config;
use pvs_rs::api::endpoint;
use pvs_rs::{Error, PvsClient, PvsConfig, Snapshot, Updater};
use rocket::{Build, Rocket, State};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

mod metrics;

/// Updater together with the time its last cycle completed.
struct Poller {
    updater: Updater,
    last_cycle: Option<Instant>,
}

/// Structure containing state for API handlers.
pub struct StateData {
    /// Held for the whole cycle: one cycle at a time per PVS session.
    poller: tokio::sync::Mutex<Poller>,
    interval: Duration,
    snapshot: tokio::sync::RwLock<Snapshot>,
    /// Set when a cycle reported failing features; the next cycle probes again first.
    reprobe: AtomicBool,
}

pub fn read_settings() -> Result<PvsConfig, config::ConfigError> {
    let mut settings = Config::default();
    settings.merge(config::Environment::with_prefix("PVS"))?;

    settings.try_into()
}

/// Run an update cycle unless the last one is more recent than `interval`.
async fn refresh(state: &StateData) -> Result<(), Error> {
    let mut poller = state.poller.lock().await;

    if let Some(last) = poller.last_cycle {
        if last.elapsed() <= state.interval {
            log::info!("interval time not yet elapsed since last run; returning cached result");
            return Ok(());
        }
    }

    let updater = &mut poller.updater;
    if state.reprobe.swap(false, Ordering::SeqCst) {
        updater.run_discovery().await?;
    }

    let (snapshot, report) = updater.update().await?;
    metrics::process(&snapshot, &report, updater.supported_features());
    if !report.failures.is_empty() {
        state.reprobe.store(true, Ordering::SeqCst);
    }

    *state.snapshot.write().await = snapshot;
    poller.last_cycle = Some(Instant::now());
    Ok(())
}

#[get("/metrics")]
async fn metrics_route(state: &State<StateData>) -> Result<String, Error> {
    refresh(state).await?;
    metrics::read().await
}

#[get("/snapshot")]
async fn snapshot_route(state: &State<StateData>) -> Result<String, Error> {
    refresh(state).await?;
    let snapshot = state.snapshot.read().await;
    serde_json::to_string_pretty(&*snapshot).or(Err(Error::FormatError))
}

/// Liveness of the PVS itself: its uptime in seconds.
#[get("/uptime")]
async fn uptime_route(state: &State<StateData>) -> Result<String, Error> {
    let poller = state.poller.lock().await;
    let uptime = poller.updater.client().get_var(endpoint::VAR_UPTIME).await?;

    Ok(match uptime {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

#[launch]
fn rocket() -> Rocket<Build> {
    env_logger::init();

    let settings = read_settings().expect("Configuration error");
    let features = settings.feature_list().expect("Configuration error");
    let client = PvsClient::from_config(&settings).expect("Configuration error");
    let state = StateData {
        poller: tokio::sync::Mutex::new(Poller {
            updater: Updater::new(client).with_features(&features),
            last_cycle: None,
        }),
        interval: Duration::from_secs(settings.interval),
        snapshot: tokio::sync::RwLock::new(Snapshot::new()),
        reprobe: AtomicBool::new(false),
    };

    rocket::build()
        .manage(state)
        .mount("/", routes![metrics_route, snapshot_route, uptime_route])
}
