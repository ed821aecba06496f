use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use irrigation_dashboard::db::Db;
use irrigation_dashboard::mqtt::{ingest, TELEMETRY_TOPIC};
use irrigation_dashboard::schedule::{shared_board, ScheduleBoard, Scheduler};
use irrigation_dashboard::state::SystemState;
use irrigation_dashboard::web::{self, AppState};
use irrigation_dashboard::{config, now_millis};

fn env_port(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let mqtt_port = env_port("MQTT_PORT", 1883);
    let web_port = env_port("WEB_PORT", 8080);
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:irrigation.db?mode=rwc".to_string());

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (seed thresholds, profiles, zones) ───────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    match config::load_optional(&config_path)? {
        Some(cfg) => config::apply(&cfg, &db).await?,
        None => info!(path = %config_path, "no config file, skipping seed"),
    }

    let zones = db.load_zones().await?;
    if zones.is_empty() {
        warn!("no zones in the database");
    }
    info!(zones = zones.len(), "db ready");

    // ── Shared state (ephemeral, for the API) ────────────────────────
    let shared = SystemState::shared();
    shared.write().await.record_system("dashboard started".to_string());

    // ── Schedule ────────────────────────────────────────────────────
    // Seeded once from the zones present at startup.
    let mut board = ScheduleBoard::new();
    let seeded = board.seed(ScheduleBoard::plan_initial(&zones, now_millis()));
    let mut scheduler = Scheduler::new(shared_board(board), Arc::clone(&shared));
    scheduler.start();
    info!(cards = seeded, "schedule seeded");

    // ── Web server ──────────────────────────────────────────────────
    let app_state = AppState {
        db: db.clone(),
        board: Arc::clone(scheduler.board()),
        system: Arc::clone(&shared),
    };
    tokio::spawn(async move {
        if let Err(e) = web::serve(app_state, web_port).await {
            error!("web: {e:#}");
        }
    });

    // ── MQTT ────────────────────────────────────────────────────────
    let mut mqttoptions = MqttOptions::new("irrigation-dashboard", broker, mqtt_port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);
    client.subscribe(TELEMETRY_TOPIC, QoS::AtLeastOnce).await?;
    info!(topic = TELEMETRY_TOPIC, "subscribed");

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                // Outcomes are logged and recorded inside `ingest`.
                let _ = ingest(&db, &shared, &p.topic, &p.payload).await;
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                let mut st = shared.write().await;
                st.mqtt_connected = true;
                st.record_system("mqtt connected".to_string());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_system("mqtt disconnected".to_string());
            }
            Ok(_) => {}
            Err(e) => {
                error!("mqtt error: {e}. reconnecting...");
                let mut st = shared.write().await;
                st.mqtt_connected = false;
                st.record_error(format!("mqtt error: {e}"));
                drop(st);

                sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
