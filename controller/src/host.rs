use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use aircomfort_common::{
    aggregate_consumption, comfort, date_range, ActionLogEntry, ActionSource, Bill, ChartPeriod,
    ControlAction, ControlEngine, ControlMode, ControlState, DecisionOutput, DeviceConfig,
    DeviceState, FanLevel, OperationMode, OverrideEvent, OverrideLog, RuntimeConfig,
    SensorSnapshot, TrackedPeriod, Verdict, WeatherInfo, TOPIC_TELE_WILDCARD,
};

use crate::{
    baseline::{compute_consumption, BaselineEngine, EndValueWriter},
    collab::{DeviceChannel, HistorySource, RecordStore, ValueCache},
    device::{spawn_mqtt_ingest, LiveValues, MqttChannel},
    history::HistoryApiClient,
    store::JsonStore,
};

const CONTROL_TICK: Duration = Duration::from_secs(5);

/// Per-device mutable runtime: the control engine, the override history the
/// learner reads, the optimistic command echo, and cached consumption.
struct DeviceRuntime {
    control: Mutex<ControlEngine>,
    overrides: Mutex<OverrideLog>,
    optimistic: Mutex<Optimistic>,
    consumption: Mutex<ConsumptionStats>,
}

#[derive(Debug, Clone, Copy)]
struct Optimistic {
    state: DeviceState,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ConsumptionStats {
    today_kwh: Option<f64>,
    month_kwh: Option<f64>,
}

#[derive(Clone)]
struct AppState {
    config: Arc<Mutex<RuntimeConfig>>,
    store: Arc<JsonStore>,
    live: Arc<LiveValues>,
    channel: Arc<dyn DeviceChannel>,
    engine: Arc<BaselineEngine>,
    end_writer: Arc<EndValueWriter>,
    history: Arc<dyn HistorySource>,
    devices: Arc<HashMap<String, Arc<DeviceRuntime>>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct DeviceStatusView {
    id: String,
    name: String,
    #[serde(rename = "roomName")]
    room_name: String,
    #[serde(rename = "controlMode")]
    control_mode: ControlMode,
    #[serde(rename = "controlState")]
    control_state: ControlState,
    #[serde(flatten)]
    device: DeviceState,
    sensors: SensorSnapshot,
    #[serde(rename = "sensorsLive")]
    sensors_live: bool,
    #[serde(rename = "todayKwh")]
    today_kwh: Option<f64>,
    #[serde(rename = "monthKwh")]
    month_kwh: Option<f64>,
    #[serde(rename = "learnedOffset")]
    learned_offset: f64,
}

#[derive(Debug, Serialize)]
struct DecisionView {
    #[serde(rename = "controlState")]
    control_state: ControlState,
    #[serde(rename = "learnedOffset")]
    learned_offset: f64,
    decision: DecisionOutput,
    #[serde(rename = "rationaleText")]
    rationale_text: String,
}

fn default_is_before() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct NewBill {
    month: String,
    kwh: f64,
    amount: f64,
    #[serde(rename = "isBefore", default = "default_is_before")]
    is_before: bool,
}

#[derive(Debug, Serialize)]
struct BillsView {
    bills: Vec<Bill>,
    comparison: aircomfort_common::BillComparison,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = Arc::new(JsonStore::from_env());
    let mut config = store.load_config().await.unwrap_or_else(|err| {
        warn!("failed to load config from store: {err:#}");
        RuntimeConfig::default()
    });
    config.sanitize();
    if config.devices.is_empty() {
        warn!("no devices configured; api will serve an empty fleet");
    }

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or_else(|_| config.mqtt.host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(config.mqtt.port);
    let mut mqtt_options = MqttOptions::new("aircomfort-controller", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or_else(|_| config.mqtt.user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or_else(|_| config.mqtt.pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    mqtt.subscribe(TOPIC_TELE_WILDCARD, QoS::AtMostOnce)
        .await
        .context("failed to subscribe to telemetry")?;

    let live = Arc::new(LiveValues::new());
    spawn_mqtt_ingest(eventloop, Arc::clone(&live));

    let cache: Arc<dyn ValueCache> = Arc::new(crate::collab::MemoryCache::new());
    let history: Arc<dyn HistorySource> = match &config.history {
        Some(api) => Arc::new(HistoryApiClient::new(api)),
        None => {
            warn!("no history api configured; baseline resolution will rely on live readings");
            Arc::new(NullHistory)
        }
    };
    let record_store: Arc<dyn RecordStore> = Arc::clone(&store) as Arc<dyn RecordStore>;
    let engine = Arc::new(BaselineEngine::new(
        cache,
        Arc::clone(&record_store),
        Arc::clone(&history),
    ));
    let end_writer = Arc::new(EndValueWriter::new(
        record_store,
        Duration::from_millis(config.comfort.end_value_debounce_ms),
    ));

    let mut devices = HashMap::new();
    for device in &config.devices {
        let overrides = store
            .load_overrides(&device.id)
            .await
            .map(OverrideLog::from_events)
            .unwrap_or_else(|err| {
                warn!("failed to load override log for {}: {err:#}", device.id);
                OverrideLog::new()
            });
        devices.insert(
            device.id.clone(),
            Arc::new(DeviceRuntime {
                control: Mutex::new(ControlEngine::new(
                    config.comfort.action_cooldown_ms,
                    config.comfort.evaluate_interval_ms,
                )),
                overrides: Mutex::new(overrides),
                optimistic: Mutex::new(Optimistic {
                    state: DeviceState::default(),
                    at: DateTime::<Utc>::UNIX_EPOCH,
                }),
                consumption: Mutex::new(ConsumptionStats::default()),
            }),
        );
    }

    let app_state = AppState {
        config: Arc::new(Mutex::new(config)),
        store,
        live,
        channel: Arc::new(MqttChannel::new(mqtt)),
        engine,
        end_writer,
        history,
        devices: Arc::new(devices),
    };

    spawn_control_loops(app_state.clone());
    spawn_consumption_loop(app_state.clone());

    let web_root = format!("{}/web", env!("CARGO_MANIFEST_DIR"));
    let app = Router::new()
        .route("/api/devices", get(handle_list_devices))
        .route("/api/devices/{id}/status", get(handle_device_status))
        .route("/api/devices/{id}/target", post(handle_set_target))
        .route("/api/devices/{id}/power", post(handle_set_power))
        .route("/api/devices/{id}/mode", post(handle_set_mode))
        .route("/api/devices/{id}/fan", post(handle_set_fan))
        .route(
            "/api/devices/{id}/control-mode",
            post(handle_set_control_mode),
        )
        .route("/api/devices/{id}/energy", get(handle_energy_series))
        .route("/api/devices/{id}/decision", get(handle_decision_preview))
        .route("/api/devices/{id}/log", get(handle_action_log))
        .route("/api/bills", get(handle_list_bills).post(handle_add_bill))
        .route("/api/bills/{id}", delete(handle_delete_bill))
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state);

    let port = std::env::var("AIRCOMFORT_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8086);
    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .context("invalid listen address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// History stand-in when no API endpoint is configured; every window is
/// empty, pushing resolution onto the live-reading fallback.
struct NullHistory;

#[async_trait::async_trait]
impl HistorySource for NullHistory {
    async fn fetch_history(
        &self,
        _series_id: &str,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> crate::error::Result<Vec<aircomfort_common::EnergyReading>> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Background loops
// ---------------------------------------------------------------------------

fn spawn_control_loops(state: AppState) {
    for (device_id, runtime) in state.devices.iter() {
        let state = state.clone();
        let device_id = device_id.clone();
        let runtime = Arc::clone(runtime);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CONTROL_TICK);
            loop {
                interval.tick().await;
                control_cycle(&state, &device_id, &runtime).await;
            }
        });
    }
}

async fn control_cycle(state: &AppState, device_id: &str, runtime: &DeviceRuntime) {
    let now_ms = monotonic_ms();
    let Some(device_cfg) = state.config.lock().await.device(device_id).cloned() else {
        return;
    };

    let suspended = waiting_for_telemetry(state, &device_cfg).await;
    let due = {
        let mut control = runtime.control.lock().await;
        control.observe_mode(device_cfg.control_mode, now_ms);
        control.set_suspended(suspended);
        control.due(now_ms)
    };
    if !due {
        return;
    }

    let snapshot = sensor_snapshot(state, &device_cfg).await;
    let weather = outdoor_weather(state, &device_cfg).await;
    let offset = learned_offset_now(state, runtime).await;
    let decision = comfort::decide(snapshot, &device_cfg.profile, weather, offset);
    let device_state = effective_state(state, &device_cfg, runtime).await;

    let verdict = {
        let mut control = runtime.control.lock().await;
        control.consider(&decision, &device_state, now_ms)
    };
    let actions = match verdict {
        Verdict::Apply(actions) => actions,
        Verdict::Unchanged | Verdict::CoolingDown | Verdict::Inactive => return,
    };

    info!(
        "applying automatic settings to {device_id}: {}C {} {} ({})",
        decision.target_temp,
        decision.fan_level.as_str(),
        decision.mode.as_str(),
        if decision.is_standard() {
            "standard operation, no adjustment".to_string()
        } else {
            decision.rationale_text()
        }
    );

    // Optimistic update first; a lost command is reconciled by the next
    // reported reading, not rolled back.
    let old_target = device_state.target_temp;
    {
        let mut optimistic = runtime.optimistic.lock().await;
        optimistic.state = DeviceState {
            power_on: true,
            target_temp: Some(decision.target_temp),
            mode: Some(decision.mode),
            fan_level: Some(decision.fan_level),
        };
        optimistic.at = Utc::now();
    }
    for action in actions {
        if !state.channel.send_command(device_id, action).await {
            warn!("command dispatch failed for {device_id}: {action:?}");
        }
    }

    let entry = ActionLogEntry {
        timestamp: Utc::now(),
        source: ActionSource::Automatic,
        old_temp: old_target,
        new_temp: decision.target_temp,
        rationale: decision.rationale_text(),
    };
    if let Err(err) = state.store.append_action(device_id, entry).await {
        warn!("failed to append action log for {device_id}: {err:#}");
    }
}

fn spawn_consumption_loop(state: AppState) {
    tokio::spawn(async move {
        let poll = {
            let config = state.config.lock().await;
            Duration::from_millis(config.comfort.consumption_poll_ms)
        };
        let mut interval = tokio::time::interval(poll);
        loop {
            interval.tick().await;
            consumption_cycle(&state).await;
        }
    });
}

async fn consumption_cycle(state: &AppState) {
    let (devices, offset) = {
        let config = state.config.lock().await;
        (config.devices.clone(), display_offset(&config))
    };
    let today = Utc::now().with_timezone(&offset).date_naive();

    for device_cfg in devices {
        let Some(runtime) = state.devices.get(&device_cfg.id) else {
            continue;
        };
        let Some(series_id) = device_cfg.attributes.energy.as_deref() else {
            continue;
        };
        let Some(current) = state.live.value(series_id).await else {
            continue;
        };

        let day_window = TrackedPeriod::Day.window(today, offset);
        let month_window = TrackedPeriod::Month.window(today, offset);

        let day_baseline = state
            .engine
            .resolve_baseline(&device_cfg.id, Some(series_id), &day_window, Some(current))
            .await;
        let month_baseline = state
            .engine
            .resolve_baseline(&device_cfg.id, Some(series_id), &month_window, Some(current))
            .await;

        {
            let mut stats = runtime.consumption.lock().await;
            stats.today_kwh = compute_consumption(current, day_baseline);
            stats.month_kwh = compute_consumption(current, month_baseline);
        }

        state
            .end_writer
            .submit(&device_cfg.id, &day_window.key, current)
            .await;
    }
}

// ---------------------------------------------------------------------------
// Shared lookups
// ---------------------------------------------------------------------------

/// A device is parked while telemetry it is configured for has not arrived
/// at all. A device with no mappings whatsoever cannot be observed either.
async fn waiting_for_telemetry(state: &AppState, device_cfg: &DeviceConfig) -> bool {
    if device_cfg.attributes.is_empty() {
        return true;
    }
    if let Some(series) = &device_cfg.attributes.temperature {
        return state.live.reading(series).await.is_none();
    }
    false
}

async fn sensor_snapshot(state: &AppState, device_cfg: &DeviceConfig) -> SensorSnapshot {
    let mut snapshot = SensorSnapshot::fallback();
    if let Some(series) = &device_cfg.attributes.temperature {
        if let Some(value) = state.live.value(series).await {
            snapshot.temperature_c = value;
        }
    }
    if let Some(series) = &device_cfg.attributes.humidity {
        if let Some(value) = state.live.value(series).await {
            snapshot.humidity_pct = value;
        }
    }
    snapshot
}

async fn outdoor_weather(state: &AppState, device_cfg: &DeviceConfig) -> Option<WeatherInfo> {
    let series = device_cfg.attributes.outdoor_temperature.as_ref()?;
    let value = state.live.value(series).await?;
    Some(WeatherInfo {
        outdoor_temp_c: value,
    })
}

async fn learned_offset_now(state: &AppState, runtime: &DeviceRuntime) -> f64 {
    let (days, hours) = {
        let config = state.config.lock().await;
        (
            config.comfort.override_window_days,
            config.comfort.override_window_hours,
        )
    };
    runtime
        .overrides
        .lock()
        .await
        .learned_offset(Utc::now(), days, hours)
}

/// Merge the optimistic command echo with reported telemetry. Anything the
/// device reported after the last command wins over the echo.
async fn effective_state(
    state: &AppState,
    device_cfg: &DeviceConfig,
    runtime: &DeviceRuntime,
) -> DeviceState {
    let optimistic = *runtime.optimistic.lock().await;
    let mut result = optimistic.state;
    let attrs = &device_cfg.attributes;

    if let Some(series) = &attrs.target_temperature {
        if let Some(reading) = state.live.reading(series).await {
            if reading.at >= optimistic.at {
                result.target_temp = Some(reading.value.round() as i32);
            }
        }
    }
    if let Some(series) = &attrs.power {
        if let Some(reading) = state.live.reading(series).await {
            if reading.at >= optimistic.at {
                result.power_on = reading.value != 0.0;
            }
        }
    }
    if let Some(series) = &attrs.mode {
        if let Some(reading) = state.live.reading(series).await {
            if reading.at >= optimistic.at {
                if let Some(mode) = OperationMode::from_wire_level(reading.value as u8) {
                    result.mode = Some(mode);
                }
            }
        }
    }
    if let Some(series) = &attrs.fan {
        if let Some(reading) = state.live.reading(series).await {
            if reading.at >= optimistic.at {
                if let Some(level) = FanLevel::from_wire_level(reading.value as u8) {
                    result.fan_level = Some(level);
                }
            }
        }
    }

    result
}

fn display_offset(config: &RuntimeConfig) -> FixedOffset {
    let tz: Option<Tz> = config.timezone.parse().ok();
    match tz {
        Some(tz) => Utc::now().with_timezone(&tz).offset().fix(),
        None => {
            warn!("invalid timezone {:?}, using UTC", config.timezone);
            FixedOffset::east_opt(0).unwrap_or(Utc.fix())
        }
    }
}

async fn device_status_view(
    state: &AppState,
    device_cfg: &DeviceConfig,
    runtime: &DeviceRuntime,
) -> DeviceStatusView {
    let control_state = runtime.control.lock().await.state();
    let stats = *runtime.consumption.lock().await;
    let sensors_live = !waiting_for_telemetry(state, device_cfg).await;

    DeviceStatusView {
        id: device_cfg.id.clone(),
        name: device_cfg.name.clone(),
        room_name: device_cfg.room_name.clone(),
        control_mode: device_cfg.control_mode,
        control_state,
        device: effective_state(state, device_cfg, runtime).await,
        sensors: sensor_snapshot(state, device_cfg).await,
        sensors_live,
        today_kwh: stats.today_kwh,
        month_kwh: stats.month_kwh,
        learned_offset: learned_offset_now(state, runtime).await,
    }
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

async fn handle_list_devices(State(state): State<AppState>) -> impl IntoResponse {
    let devices = state.config.lock().await.devices.clone();
    let mut views = Vec::with_capacity(devices.len());
    for device_cfg in &devices {
        if let Some(runtime) = state.devices.get(&device_cfg.id) {
            views.push(device_status_view(&state, device_cfg, runtime).await);
        }
    }
    Json(views).into_response()
}

async fn handle_device_status(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> axum::response::Response {
    let Some((device_cfg, runtime)) = lookup(&state, &device_id).await else {
        return error_response(StatusCode::NOT_FOUND, "Unknown device");
    };
    Json(device_status_view(&state, &device_cfg, &runtime).await).into_response()
}

async fn handle_set_target(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some((device_cfg, runtime)) = lookup(&state, &device_id).await else {
        return error_response(StatusCode::NOT_FOUND, "Unknown device");
    };
    let Some(target) = params.get("value").and_then(|value| value.parse::<i32>().ok()) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing or invalid 'value'");
    };
    if !(comfort::MIN_TARGET_C..=comfort::MAX_TARGET_C).contains(&target) {
        return error_response(StatusCode::BAD_REQUEST, "Temperature out of range (16-30)");
    }

    let old_target = effective_state(&state, &device_cfg, &runtime).await.target_temp;

    // A manual change while automatic control is active is a training signal
    // and goes to the diagnostics log under its own source tag.
    if device_cfg.control_mode == ControlMode::Automatic {
        let event = OverrideEvent {
            timestamp: Utc::now(),
            old_temp: old_target.unwrap_or(comfort::BASE_TARGET_C as i32),
            new_temp: target,
        };
        runtime.overrides.lock().await.push(event);
        if let Err(err) = state.store.append_override(&device_id, event).await {
            warn!("failed to persist override for {device_id}: {err:#}");
        }
        let entry = ActionLogEntry {
            timestamp: Utc::now(),
            source: ActionSource::UserOverride,
            old_temp: old_target,
            new_temp: target,
            rationale: String::new(),
        };
        if let Err(err) = state.store.append_action(&device_id, entry).await {
            warn!("failed to append action log for {device_id}: {err:#}");
        }
    }

    apply_manual(&state, &device_id, &runtime, ControlAction::SetTarget(target)).await;
    handle_device_status(State(state), Path(device_id)).await
}

async fn handle_set_power(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some((_, runtime)) = lookup(&state, &device_id).await else {
        return error_response(StatusCode::NOT_FOUND, "Unknown device");
    };
    let on = match params.get("value").map(|value| value.to_ascii_lowercase()) {
        Some(ref value) if value == "on" => true,
        Some(ref value) if value == "off" => false,
        _ => return error_response(StatusCode::BAD_REQUEST, "Use value=on or value=off"),
    };

    apply_manual(&state, &device_id, &runtime, ControlAction::Power(on)).await;
    handle_device_status(State(state), Path(device_id)).await
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some((_, runtime)) = lookup(&state, &device_id).await else {
        return error_response(StatusCode::NOT_FOUND, "Unknown device");
    };
    let Some(mode) = params.get("value").and_then(|value| OperationMode::parse(value)) else {
        return error_response(StatusCode::BAD_REQUEST, "Use value=cool|dry|auto|fan");
    };

    apply_manual(&state, &device_id, &runtime, ControlAction::SetMode(mode)).await;
    handle_device_status(State(state), Path(device_id)).await
}

async fn handle_set_fan(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some((_, runtime)) = lookup(&state, &device_id).await else {
        return error_response(StatusCode::NOT_FOUND, "Unknown device");
    };
    let Some(level) = params.get("value").and_then(|value| FanLevel::parse(value)) else {
        return error_response(StatusCode::BAD_REQUEST, "Use value=auto|low|medium|high");
    };

    apply_manual(&state, &device_id, &runtime, ControlAction::SetFan(level)).await;
    handle_device_status(State(state), Path(device_id)).await
}

async fn handle_set_control_mode(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some(mode) = params.get("value").and_then(|value| ControlMode::parse(value)) else {
        return error_response(StatusCode::BAD_REQUEST, "Use value=manual or value=automatic");
    };

    let updated = {
        let mut config = state.config.lock().await;
        match config.device_mut(&device_id) {
            Some(device) => {
                device.control_mode = mode;
                Some(config.clone())
            }
            None => None,
        }
    };
    let Some(config) = updated else {
        return error_response(StatusCode::NOT_FOUND, "Unknown device");
    };
    if let Err(err) = state.store.save_config(&config).await {
        warn!("failed to persist control mode for {device_id}: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist control mode",
        );
    }

    handle_device_status(State(state), Path(device_id)).await
}

async fn handle_energy_series(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some((device_cfg, _)) = lookup(&state, &device_id).await else {
        return error_response(StatusCode::NOT_FOUND, "Unknown device");
    };
    let period = params
        .get("period")
        .and_then(|value| ChartPeriod::parse(value))
        .unwrap_or(ChartPeriod::Day);

    let offset = {
        let config = state.config.lock().await;
        display_offset(&config)
    };
    let now = Utc::now().with_timezone(&offset);
    let range = date_range(period, now, now);

    let readings = match device_cfg.attributes.energy.as_deref() {
        Some(series_id) => state
            .history
            .fetch_history(series_id, range.from.with_timezone(&Utc), range.to.with_timezone(&Utc))
            .await
            .unwrap_or_else(|err| {
                warn!("energy history fetch failed for {device_id}: {err}");
                Vec::new()
            }),
        // No counter mapped: serve an empty, gap-filled series.
        None => Vec::new(),
    };

    Json(aggregate_consumption(&readings, period, range)).into_response()
}

async fn handle_decision_preview(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> axum::response::Response {
    let Some((device_cfg, runtime)) = lookup(&state, &device_id).await else {
        return error_response(StatusCode::NOT_FOUND, "Unknown device");
    };

    let snapshot = sensor_snapshot(&state, &device_cfg).await;
    let weather = outdoor_weather(&state, &device_cfg).await;
    let learned_offset = learned_offset_now(&state, &runtime).await;
    let decision = comfort::decide(snapshot, &device_cfg.profile, weather, learned_offset);
    let rationale_text = if decision.is_standard() {
        "standard operation, no adjustment".to_string()
    } else {
        decision.rationale_text()
    };

    let control_state = runtime.control.lock().await.state();
    Json(DecisionView {
        control_state,
        learned_offset,
        decision,
        rationale_text,
    })
    .into_response()
}

async fn handle_action_log(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> axum::response::Response {
    if !state.devices.contains_key(&device_id) {
        return error_response(StatusCode::NOT_FOUND, "Unknown device");
    }
    match state.store.load_actions(&device_id).await {
        Ok(mut entries) => {
            entries.reverse(); // newest first
            Json(entries).into_response()
        }
        Err(err) => {
            warn!("failed to load action log for {device_id}: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load log")
        }
    }
}

async fn handle_list_bills(State(state): State<AppState>) -> axum::response::Response {
    let price = state.config.lock().await.price_per_kwh;
    match state.store.load_bills().await {
        Ok(bills) => {
            let comparison = aircomfort_common::savings::compare_bills(&bills, price);
            Json(BillsView { bills, comparison }).into_response()
        }
        Err(err) => {
            warn!("failed to load bills: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load bills")
        }
    }
}

async fn handle_add_bill(
    State(state): State<AppState>,
    Json(new_bill): Json<NewBill>,
) -> axum::response::Response {
    if new_bill.month.len() != 7 || !new_bill.kwh.is_finite() || new_bill.kwh < 0.0 {
        return error_response(StatusCode::BAD_REQUEST, "Invalid bill payload");
    }

    let now = Utc::now();
    let bill = Bill {
        id: format!("bill-{}", now.timestamp_millis()),
        month: new_bill.month,
        kwh: new_bill.kwh,
        amount: new_bill.amount,
        is_before: new_bill.is_before,
        created_at: now,
    };
    if let Err(err) = state.store.add_bill(bill).await {
        warn!("failed to save bill: {err:#}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save bill");
    }
    handle_list_bills(State(state)).await
}

async fn handle_delete_bill(
    State(state): State<AppState>,
    Path(bill_id): Path<String>,
) -> axum::response::Response {
    match state.store.delete_bill(&bill_id).await {
        Ok(true) => handle_list_bills(State(state)).await,
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Unknown bill"),
        Err(err) => {
            warn!("failed to delete bill {bill_id}: {err:#}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to delete bill")
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn lookup(state: &AppState, device_id: &str) -> Option<(DeviceConfig, Arc<DeviceRuntime>)> {
    let device_cfg = state.config.lock().await.device(device_id).cloned()?;
    let runtime = state.devices.get(device_id)?;
    Some((device_cfg, Arc::clone(runtime)))
}

/// Manual command path: optimistic echo plus fire-and-forget dispatch. The
/// echo is deliberately not rolled back on failure; the next reported
/// reading reconciles.
async fn apply_manual(
    state: &AppState,
    device_id: &str,
    runtime: &DeviceRuntime,
    action: ControlAction,
) {
    {
        let mut optimistic = runtime.optimistic.lock().await;
        match action {
            ControlAction::SetTarget(temp) => optimistic.state.target_temp = Some(temp),
            ControlAction::Power(on) => optimistic.state.power_on = on,
            ControlAction::SetMode(mode) => optimistic.state.mode = Some(mode),
            ControlAction::SetFan(level) => optimistic.state.fan_level = Some(level),
        }
        optimistic.at = Utc::now();
    }
    if !state.channel.send_command(device_id, action).await {
        warn!("manual command dispatch failed for {device_id}: {action:?}");
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
