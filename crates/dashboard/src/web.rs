use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::analysis::{
    analyze_status, analyze_trend, count_crossings, evaluate_risk, fetch_thresholds,
    generate_suggestions, CrossingReport, RiskResult, StatusResult, Suggestion, TrendResult,
};
use crate::db::{Db, Zone, ZoneInput, ZoneNameTaken};
use crate::schedule::{CardKey, CardView, Category, ScheduleView, SharedBoard};
use crate::state::{SharedState, StatusResponse};

/// Trend window when the request does not give one.
const DEFAULT_TREND_HOURS: f64 = 24.0;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub board: SharedBoard,
    pub system: SharedState,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        if let Some(taken) = e.downcast_ref::<ZoneNameTaken>() {
            return AppError::Conflict(taken.to_string());
        }
        AppError::Internal(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Internal(e) => {
                error!("web: request failed: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/users/{owner}/zones", get(list_zones).post(save_zone))
        .route("/api/users/{owner}/suggestions", get(suggestions))
        .route("/api/users/{owner}/summary", get(summary))
        .route("/api/zones/{id}/status", get(zone_status))
        .route("/api/zones/{id}/trend", get(zone_trend))
        .route("/api/zones/{id}/crossings", get(zone_crossings))
        .route("/api/zones/{id}/risk", get(zone_risk))
        .route("/api/schedule", get(schedule_view))
        .route("/api/schedule/zones/{zone}", get(schedule_zone_view))
        .route("/api/schedule/move", post(schedule_move))
        .route("/api/schedule/watered", post(schedule_watered))
        .route("/api/schedule/halt", post(schedule_halt))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let st = state.system.read().await;
    Json(st.to_status())
}

// -- Zones / users -------------------------------------------------------------

async fn list_zones(State(state): State<AppState>, Path(owner): Path<String>) -> ApiResult<Vec<Zone>> {
    Ok(Json(state.db.zones_for_owner(&owner).await?))
}

async fn save_zone(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Json(input): Json<ZoneInput>,
) -> ApiResult<Zone> {
    if input.name.trim().is_empty() || input.crop_type.trim().is_empty() {
        return Err(AppError::BadRequest("name and crop_type are required".into()));
    }
    if !(input.watering_amount_l >= 0.0) || !(input.soil_inches >= 0.0) {
        return Err(AppError::BadRequest(
            "watering_amount_l and soil_inches must not be negative".into(),
        ));
    }

    match state.db.save_zone(&owner, &input).await? {
        Some(zone) => {
            info!(owner = %owner, zone = zone.id, "zone saved");
            Ok(Json(zone))
        }
        None => Err(AppError::NotFound(format!(
            "zone {} not found for {owner}",
            input.id.unwrap_or_default()
        ))),
    }
}

async fn suggestions(State(state): State<AppState>, Path(owner): Path<String>) -> Json<Vec<Suggestion>> {
    Json(generate_suggestions(&state.db, &owner).await)
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub owner: String,
    pub display_name: String,
    pub zone_count: usize,
    pub inches_saved: f64,
}

async fn summary(State(state): State<AppState>, Path(owner): Path<String>) -> ApiResult<Summary> {
    let profile = state.db.get_profile(&owner).await?;
    let zones = state.db.zones_for_owner(&owner).await?;
    let inches_saved = state.db.inches_saved_for_owner(&owner).await?;

    Ok(Json(Summary {
        display_name: profile.map(|p| p.display_name).unwrap_or_else(|| owner.clone()),
        owner,
        zone_count: zones.len(),
        inches_saved,
    }))
}

// -- Per-zone analysis ---------------------------------------------------------

async fn load_zone(db: &Db, id: i64) -> Result<Zone, AppError> {
    db.get_zone(id)
        .await
        .with_context(|| format!("failed to load zone {id}"))?
        .ok_or_else(|| AppError::NotFound(format!("zone {id} not found")))
}

async fn zone_status(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusResult> {
    let zone = load_zone(&state.db, id).await?;
    Ok(Json(
        analyze_status(&state.db, zone.id, &zone.name, &zone.crop_type).await,
    ))
}

#[derive(Debug, Deserialize)]
struct TrendQuery {
    hours: Option<f64>,
    target: Option<f64>,
}

/// Without an explicit `target` the prediction aims at the crop minimum.
async fn zone_trend(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<TrendQuery>,
) -> ApiResult<TrendResult> {
    let hours = q.hours.unwrap_or(DEFAULT_TREND_HOURS);
    if !(hours.is_finite() && hours > 0.0) {
        return Err(AppError::BadRequest(format!("hours must be positive, got {hours}")));
    }
    let zone = load_zone(&state.db, id).await?;

    let trend = analyze_trend(&state.db, zone.id, hours).await;
    let target = match q.target {
        Some(t) => Some(t),
        None => fetch_thresholds(&state.db)
            .await
            .lookup(&zone.crop_type)
            .map(|t| t.min_moisture),
    };

    Ok(Json(match target {
        Some(t) => trend.with_prediction(t),
        None => trend,
    }))
}

async fn zone_crossings(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<CrossingReport> {
    let zone = load_zone(&state.db, id).await?;
    Ok(Json(count_crossings(&state.db, zone.id, &zone.crop_type).await))
}

async fn zone_risk(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<RiskResult> {
    let zone = load_zone(&state.db, id).await?;
    Ok(Json(evaluate_risk(&state.db, zone.id, &zone.crop_type).await))
}

// -- Schedule ------------------------------------------------------------------

async fn schedule_view(State(state): State<AppState>) -> Json<ScheduleView> {
    Json(state.board.read().await.view())
}

async fn schedule_zone_view(State(state): State<AppState>, Path(zone): Path<String>) -> Json<Vec<CardView>> {
    Json(state.board.read().await.zone_view(&zone))
}

#[derive(Debug, Deserialize)]
struct MoveRequest {
    #[serde(flatten)]
    card: CardKey,
    category: Category,
}

#[derive(Debug, Serialize)]
struct MoveResponse {
    moved: bool,
}

async fn schedule_move(State(state): State<AppState>, Json(req): Json<MoveRequest>) -> Json<MoveResponse> {
    let moved = state.board.write().await.move_card(&req.card, req.category);
    if moved {
        state.system.write().await.record_schedule(format!(
            "zone {} card at {} moved to {}",
            req.card.zone,
            req.card.scheduled_time,
            req.category.as_str()
        ));
    }
    Json(MoveResponse { moved })
}

#[derive(Debug, Deserialize)]
struct WateredRequest {
    cards: Vec<CardKey>,
}

#[derive(Debug, Serialize)]
struct WateredResponse {
    removed: usize,
}

async fn schedule_watered(
    State(state): State<AppState>,
    Json(req): Json<WateredRequest>,
) -> Json<WateredResponse> {
    let removed = state.board.write().await.mark_watered(&req.cards);
    if removed > 0 {
        state
            .system
            .write()
            .await
            .record_schedule(format!("{removed} card(s) marked watered"));
    }
    Json(WateredResponse { removed })
}

#[derive(Debug, Deserialize)]
struct HaltRequest {
    halted: bool,
}

async fn schedule_halt(State(state): State<AppState>, Json(req): Json<HaltRequest>) -> Json<ScheduleView> {
    let view = {
        let mut board = state.board.write().await;
        board.set_halted(req.halted);
        board.view()
    };
    let detail = if req.halted { "schedule halted" } else { "schedule resumed" };
    info!("{detail}");
    state.system.write().await.record_schedule(detail.to_string());
    Json(view)
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("api listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{test_db, zone_input};
    use crate::db::{Profile, Threshold};
    use crate::now_millis;
    use crate::schedule::{shared_board, ScheduleBoard, ScheduleCard};
    use crate::state::SystemState;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt; // for oneshot

    async fn test_state() -> AppState {
        AppState {
            db: test_db().await,
            board: shared_board(ScheduleBoard::new()),
            system: SystemState::shared(),
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Value) {
        let resp = router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn seed_tomato(state: &AppState) -> Zone {
        state
            .db
            .upsert_threshold(&Threshold {
                crop_name: "Tomato".into(),
                min_moisture: 30.0,
                max_moisture: 60.0,
                moderate_risk: Some(2.0),
                high_risk: Some(4.0),
            })
            .await
            .unwrap();
        state
            .db
            .save_zone("alice", &zone_input("Beds", "tomato"))
            .await
            .unwrap()
            .unwrap()
    }

    // -- status / zones -----------------------------------------------------

    #[tokio::test]
    async fn status_reports_events() {
        let state = test_state().await;
        state.system.write().await.record_system("hub started".into());

        let (code, body) = send(&state, get("/api/status")).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["mqtt_connected"], false);
        assert_eq!(body["events"][0]["detail"], "hub started");
    }

    #[tokio::test]
    async fn save_then_list_zones() {
        let state = test_state().await;
        let (code, saved) = send(
            &state,
            post(
                "/api/users/alice/zones",
                json!({"name": "Beds", "crop_type": "tomato", "soil_inches": 6.0, "auto_irrigation_enabled": true}),
            ),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(saved["owner"], "alice");

        // Same name again updates the existing zone.
        let (_, again) = send(
            &state,
            post("/api/users/alice/zones", json!({"name": "Beds", "crop_type": "lettuce"})),
        )
        .await;
        assert_eq!(again["id"], saved["id"]);

        let (code, list) = send(&state, get("/api/users/alice/zones")).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["crop_type"], "lettuce");
    }

    #[tokio::test]
    async fn save_zone_of_other_owner_is_not_found() {
        let state = test_state().await;
        let zone = seed_tomato(&state).await;
        let (code, body) = send(
            &state,
            post(
                "/api/users/mallory/zones",
                json!({"id": zone.id, "name": "Mine", "crop_type": "tomato"}),
            ),
        )
        .await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn rename_onto_taken_name_is_conflict() {
        let state = test_state().await;
        let beds = seed_tomato(&state).await;
        let lawn = state
            .db
            .save_zone("alice", &zone_input("Lawn", "grass"))
            .await
            .unwrap()
            .unwrap();

        let (code, body) = send(
            &state,
            post(
                "/api/users/alice/zones",
                json!({"id": lawn.id, "name": beds.name, "crop_type": "tomato"}),
            ),
        )
        .await;
        assert_eq!(code, StatusCode::CONFLICT);
        let msg = body["error"].as_str().unwrap();
        assert!(msg.contains("already has a zone named"), "error: {msg}");
        assert!(!msg.contains("UNIQUE"), "error: {msg}");

        let (_, zones) = send(&state, get("/api/users/alice/zones")).await;
        let names: Vec<&str> = zones
            .as_array()
            .unwrap()
            .iter()
            .map(|z| z["name"].as_str().unwrap())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"Lawn"));
    }

    #[tokio::test]
    async fn save_zone_requires_name() {
        let state = test_state().await;
        let (code, _) = send(
            &state,
            post("/api/users/alice/zones", json!({"name": " ", "crop_type": "tomato"})),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn summary_falls_back_to_owner_name() {
        let state = test_state().await;
        let zone = seed_tomato(&state).await;
        state.db.insert_watering_activity(zone.id, 1, 0.75).await.unwrap();

        let (_, body) = send(&state, get("/api/users/alice/summary")).await;
        assert_eq!(body["display_name"], "alice");
        assert_eq!(body["zone_count"], 1);
        assert_eq!(body["inches_saved"], 0.75);

        state
            .db
            .upsert_profile(&Profile {
                id: "alice".into(),
                display_name: "Alice A.".into(),
            })
            .await
            .unwrap();
        let (_, body) = send(&state, get("/api/users/alice/summary")).await;
        assert_eq!(body["display_name"], "Alice A.");
    }

    // -- per-zone analysis ----------------------------------------------------

    #[tokio::test]
    async fn unknown_zone_is_404() {
        let state = test_state().await;
        for path in ["status", "trend", "crossings", "risk"] {
            let (code, _) = send(&state, get(&format!("/api/zones/4242/{path}"))).await;
            assert_eq!(code, StatusCode::NOT_FOUND, "{path}");
        }
    }

    #[tokio::test]
    async fn zone_status_and_suggestions() {
        let state = test_state().await;
        let zone = seed_tomato(&state).await;
        state.db.insert_reading(zone.id, 10, Some(20.0), None).await.unwrap();

        let (code, status) = send(&state, get(&format!("/api/zones/{}/status", zone.id))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(status["status"], "critical");
        assert_eq!(status["urgency"], "high");

        let (_, list) = send(&state, get("/api/users/alice/suggestions")).await;
        assert_eq!(list[0]["zone_name"], "Beds");
    }

    #[tokio::test]
    async fn zone_trend_predicts_crossing_of_crop_minimum() {
        let state = test_state().await;
        let zone = seed_tomato(&state).await;
        let now = crate::now_unix();
        state.db.insert_reading(zone.id, now - 7200, Some(50.0), None).await.unwrap();
        state.db.insert_reading(zone.id, now - 3600, Some(40.0), None).await.unwrap();

        let (code, body) = send(&state, get(&format!("/api/zones/{}/trend?hours=3", zone.id))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["trend"], "declining_fast");
        assert_eq!(body["predicted_crossing"]["target_moisture"], 30.0);
        assert_eq!(body["predicted_crossing"]["hours_until_crossing"], 1.0);

        let (code, _) = send(&state, get(&format!("/api/zones/{}/trend?hours=-1", zone.id))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn zone_risk_and_crossings() {
        let state = test_state().await;
        let zone = seed_tomato(&state).await;
        for (i, m) in [70.0, 70.0, 50.0, 70.0, 50.0, 70.0].iter().enumerate() {
            let ts = 1_700_000_000 + i as i64 * 3600;
            state.db.insert_reading(zone.id, ts, Some(*m), None).await.unwrap();
        }

        let (_, crossings) = send(&state, get(&format!("/api/zones/{}/crossings", zone.id))).await;
        assert_eq!(crossings["crossings_above_max"], 3);
        assert_eq!(crossings["has_error"], true);
        assert_eq!(crossings["error_type"], "above_max");

        let (_, risk) = send(&state, get(&format!("/api/zones/{}/risk", zone.id))).await;
        assert_eq!(risk["hours_above_max"], 1.0);
        assert_eq!(risk["risk"], "none");
    }

    #[tokio::test]
    async fn db_failure_is_500() {
        let state = test_state().await;
        state.db.pool().close().await;
        let (code, body) = send(&state, get("/api/users/alice/zones")).await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
    }

    // -- schedule ---------------------------------------------------------------

    #[tokio::test]
    async fn watered_with_unknown_cards_records_nothing() {
        let state = test_state().await;
        let now = now_millis();
        state
            .board
            .write()
            .await
            .seed([ScheduleCard::new("1", now + 60_000, true)]);

        let (code, body) = send(
            &state,
            post(
                "/api/schedule/watered",
                json!({"cards": [{"zone": "9", "scheduled_time": now}]}),
            ),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["removed"], 0);
        assert!(state.system.read().await.events.is_empty());

        let (_, body) = send(
            &state,
            post("/api/schedule/watered", json!({"cards": []})),
        )
        .await;
        assert_eq!(body["removed"], 0);
        assert!(state.system.read().await.events.is_empty());
    }

    #[tokio::test]
    async fn schedule_move_watered_and_halt() {
        let state = test_state().await;
        let now = now_millis();
        let t1 = now + 2 * 60_000;
        let t2 = now + 30 * 60_000;
        {
            let mut board = state.board.write().await;
            board.seed([ScheduleCard::new("1", t1, true), ScheduleCard::new("2", t2, true)]);
            board.categorize(now);
        }

        let (_, view) = send(&state, get("/api/schedule")).await;
        assert_eq!(view["imminent"][0]["data-zone"], "1");
        assert_eq!(view["upcoming"][0]["data-scheduled-time"], t2);

        let (_, moved) = send(
            &state,
            post(
                "/api/schedule/move",
                json!({"zone": "2", "scheduled_time": t2, "category": "upcoming"}),
            ),
        )
        .await;
        assert_eq!(moved["moved"], false);

        let (_, moved) = send(
            &state,
            post(
                "/api/schedule/move",
                json!({"zone": "2", "scheduled_time": t2, "category": "delayed"}),
            ),
        )
        .await;
        assert_eq!(moved["moved"], true);

        let (_, removed) = send(
            &state,
            post(
                "/api/schedule/watered",
                json!({"cards": [{"zone": "1", "scheduled_time": t1}]}),
            ),
        )
        .await;
        assert_eq!(removed["removed"], 1);

        state.board.write().await.categorize(now_millis());
        let (_, zone_view) = send(&state, get("/api/schedule/zones/1")).await;
        assert!(zone_view.as_array().unwrap().is_empty());

        let (_, view) = send(&state, post("/api/schedule/halt", json!({"halted": true}))).await;
        assert_eq!(view["halted"], true);
        assert_eq!(view["delayed"][0]["data-zone"], "2");
    }
}
