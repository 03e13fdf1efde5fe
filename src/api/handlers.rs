//! Route handlers

use axum::{
    body::Bytes,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Form, Query, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::ApiError;
use super::pages::{LISTEN_PAGE, STATUS_PAGE};
use super::server::AppState;
use super::transport::{serve_socket, stream_response};
use crate::bus::{BusEvent, EventBus, Message, Topic};
use crate::collaborators::{BatchRequest, Executor, ProcessInfo, QueryResult, TimeQuantum};
use crate::error::PilosaError;

/// Timestamp sent by clients that have no real event time
pub const DEFAULT_TIMESTAMP: &str = "2014-01-01 00:00:00";

const TIMESTAMP_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";
const TIMESTAMP_LAYOUT_T: &str = "%Y-%m-%dT%H:%M:%S";

type Params = HashMap<String, String>;

fn required<'a>(params: &'a Params, key: &str, missing: &str) -> Result<&'a str, ApiError> {
    match params.get(key).map(String::as_str) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ApiError::not_found(missing)),
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &str) -> Result<T, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid {}: {:?}", field, value)))
}

/// POST /message
pub async fn post_message(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let message: Message =
        serde_json::from_slice(&body).map_err(|_| ApiError::bad_request("Invalid JSON"))?;

    debug!("Received message {}", message.id);
    state.bus.publish(BusEvent::Inbound(message)).await;
    Ok(StatusCode::OK)
}

/// POST /batch
pub async fn batch(
    State(state): State<AppState>,
    Form(params): Form<Params>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let db = required(&params, "db", "Provide a database (db)")?;
    let bitmap_id = required(&params, "id", "Provide a bitmap id (id)")?;
    let slice = required(&params, "slice", "Provide a slice (slice)")?;
    let frame = required(&params, "frame", "Provide a frame (frame)")?;
    let bitmap = required(&params, "bitmap", "Provide a compressed base64 bitmap (bitmap)")?;

    let filter = match params.get("filter").map(String::as_str) {
        Some(value) if !value.is_empty() => parse_number(value, "filter")?,
        _ => 0,
    };

    let request = BatchRequest {
        db: db.to_string(),
        frame: frame.to_string(),
        bitmap: bitmap.to_string(),
        bitmap_id: parse_number(bitmap_id, "id")?,
        slice: parse_number(slice, "slice")?,
        filter,
    };

    let result = state.collaborators.executor.batch(request).await.map_err(|e| {
        warn!("Batch import into {} failed: {}", db, e);
        ApiError::from(e)
    })?;
    Ok(Json(result))
}

/// POST /query
pub async fn query(
    State(state): State<AppState>,
    Form(params): Form<Params>,
) -> Result<Json<QueryResult>, ApiError> {
    let db = params
        .get("db")
        .filter(|db| !db.is_empty())
        .unwrap_or(&state.config.default_db);
    if db.is_empty() {
        return Err(ApiError::not_found("Provide a database (db)"));
    }
    let pql = required(&params, "pql", "Provide a valid query string (pql)")?;

    let result = state
        .collaborators
        .executor
        .run_pql(db, pql)
        .await
        .map_err(|e| ApiError::internal(format!("Error running query: {}", e)))?;

    if result.is_empty() {
        debug!("Empty results for query on {}", db);
    }
    Ok(Json(result))
}

/// One bit to set
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SetBitArgs {
    pub db: String,
    pub frame: String,
    pub profile_id: u64,
    pub filter: i64,
    pub bitmap_id: u64,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, alias = "time_granulatrity")]
    pub time_granularity: Option<String>,
}

/// Map a granularity code to a quantum; anything unknown means hourly
pub fn parse_quantum(granularity: Option<&str>) -> TimeQuantum {
    match granularity {
        Some("Y") => TimeQuantum::Y,
        Some("M") => TimeQuantum::YM,
        Some("D") => TimeQuantum::YMD,
        _ => TimeQuantum::YMDH,
    }
}

/// Parse `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DDTHH:MM:SS`
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, PilosaError> {
    let layout = if value.contains('T') {
        TIMESTAMP_LAYOUT_T
    } else {
        TIMESTAMP_LAYOUT
    };
    NaiveDateTime::parse_from_str(value, layout)
        .map_err(|e| PilosaError::InvalidRequest(format!("invalid timestamp {:?}: {}", value, e)))
}

/// Bitmap ids a single set-bit entry expands to.
///
/// Only time-quantum frames (`*.t`) carrying a real timestamp expand;
/// everything else uses the base id.
pub fn bitmap_ids(executor: &dyn Executor, args: &SetBitArgs) -> Result<Vec<u64>, PilosaError> {
    if !args.frame.ends_with(".t") {
        return Ok(vec![args.bitmap_id]);
    }

    match args.timestamp.as_deref() {
        None | Some(DEFAULT_TIMESTAMP) => Ok(vec![args.bitmap_id]),
        Some(timestamp) => {
            let time = parse_timestamp(timestamp)?;
            let quantum = parse_quantum(args.time_granularity.as_deref());
            Ok(executor.time_ids(args.bitmap_id, time, quantum))
        }
    }
}

/// POST /set_bits
pub async fn set_bits(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Vec<QueryResult>>, ApiError> {
    let entries: Vec<SetBitArgs> =
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let executor = state.collaborators.executor.as_ref();
    let mut results = Vec::new();

    for args in &entries {
        for id in bitmap_ids(executor, args)? {
            let pql = format!("set({}, {}, {}, {})", id, args.frame, args.filter, args.profile_id);
            let result = executor
                .run_pql(&args.db, &pql)
                .await
                .map_err(|e| ApiError::internal(e.to_string()))?;
            results.push(result);
        }
    }

    debug!("Set {} bits from {} entries", results.len(), entries.len());
    Ok(Json(results))
}

/// Archive queue occupancy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveQueueStats {
    pub running: bool,
    pub capacity: usize,
    pub available: usize,
}

/// Listener subscriptions per topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberStats {
    pub inbound: usize,
    pub outbound: usize,
}

/// GET /stats response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub id: String,
    pub version: String,
    pub uptime_secs: u64,
    pub archive: ArchiveQueueStats,
    pub subscribers: SubscriberStats,
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        id: state.config.id.clone(),
        version: state.config.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        archive: ArchiveQueueStats {
            running: state.archive.is_running(),
            capacity: state.archive.queue_capacity(),
            available: state.archive.queue_available(),
        },
        subscribers: SubscriberStats {
            inbound: state.bus.subscriber_count(Topic::Inbound),
            outbound: state.bus.subscriber_count(Topic::Outbound),
        },
    })
}

/// GET /status
pub async fn status() -> Html<&'static str> {
    Html(STATUS_PAGE)
}

/// GET /info
pub async fn info(State(state): State<AppState>) -> String {
    format!("{:#?}\n", state.collaborators.processes.metadata())
}

/// GET /processes
pub async fn processes(State(state): State<AppState>) -> Json<BTreeMap<Uuid, ProcessInfo>> {
    Json(state.collaborators.processes.metadata())
}

/// GET /ping response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    /// Round trip in seconds
    pub duration: f64,
}

/// GET /ping
pub async fn ping(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> Result<Json<PingResponse>, ApiError> {
    let raw = params.get("process").map(String::as_str).unwrap_or_default();
    let id = Uuid::parse_str(raw).map_err(PilosaError::from)?;

    let registry = &state.collaborators.processes;
    registry.get_process(&id)?;

    let duration = registry
        .ping(&id)
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_GATEWAY, e.to_string()))?;

    Ok(Json(PingResponse {
        duration: duration.as_secs_f64(),
    }))
}

/// GET /listen
pub async fn listen() -> Html<&'static str> {
    Html(LISTEN_PAGE)
}

/// GET /listen/ws
pub async fn listen_ws(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!("Rejected listener: {}", rejection);
            return (StatusCode::BAD_REQUEST, "Not a websocket handshake").into_response();
        }
    };

    let bus = state.bus.clone();
    let close = state.shutdown.child_token();
    upgrade.on_upgrade(move |socket| serve_socket(socket, bus, close))
}

/// GET /listen/stream
pub async fn listen_stream(State(state): State<AppState>) -> Response {
    stream_response(state.bus.clone(), state.shutdown.child_token())
}

/// GET /test
pub async fn test_messages(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    info!("Pushing test messages");
    let transport = &state.collaborators.transport;
    transport.push(Message::new("mystring")).await?;
    transport.push(Message::new(789i64)).await?;
    Ok(StatusCode::OK)
}

/// GET /version
pub async fn version(State(state): State<AppState>) -> String {
    format!("Pilosa v.({})\n", state.config.version)
}

/// Any method on /flush
pub async fn flush(State(state): State<AppState>) -> StatusCode {
    state.archive.flush();
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::DetachedExecutor;

    fn args(frame: &str, timestamp: Option<&str>, granularity: Option<&str>) -> SetBitArgs {
        SetBitArgs {
            db: "3".to_string(),
            frame: frame.to_string(),
            profile_id: 122,
            filter: 0,
            bitmap_id: 123,
            timestamp: timestamp.map(str::to_string),
            time_granularity: granularity.map(str::to_string),
        }
    }

    /// Returns one id per quantum level so expansion is visible
    struct LevelExecutor;

    #[async_trait::async_trait]
    impl Executor for LevelExecutor {
        async fn run_pql(&self, _db: &str, _pql: &str) -> crate::error::Result<QueryResult> {
            Ok(QueryResult::Value(serde_json::Value::Bool(true)))
        }

        async fn batch(&self, _request: BatchRequest) -> crate::error::Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        fn time_ids(&self, base_id: u64, _time: NaiveDateTime, quantum: TimeQuantum) -> Vec<u64> {
            let levels = match quantum {
                TimeQuantum::Y => 1,
                TimeQuantum::YM => 2,
                TimeQuantum::YMD => 3,
                TimeQuantum::YMDH => 4,
            };
            (0..levels).map(|level| base_id * 10 + level).collect()
        }
    }

    #[test]
    fn test_parse_quantum() {
        assert_eq!(parse_quantum(Some("Y")), TimeQuantum::Y);
        assert_eq!(parse_quantum(Some("M")), TimeQuantum::YM);
        assert_eq!(parse_quantum(Some("D")), TimeQuantum::YMD);
        assert_eq!(parse_quantum(Some("H")), TimeQuantum::YMDH);
        assert_eq!(parse_quantum(None), TimeQuantum::YMDH);
    }

    #[test]
    fn test_parse_timestamp_layouts() {
        let spaced = parse_timestamp("2014-04-03 13:01:04").unwrap();
        let t_form = parse_timestamp("2014-04-03T13:01:04").unwrap();
        assert_eq!(spaced, t_form);

        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(PilosaError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_plain_frame_uses_base_id() {
        let request = args("b.n", Some("2014-04-03 13:01:04"), None);
        let ids = bitmap_ids(&LevelExecutor, &request).unwrap();
        assert_eq!(ids, vec![123]);
    }

    #[test]
    fn test_default_timestamp_is_skipped() {
        let request = args("t.t", Some(DEFAULT_TIMESTAMP), None);
        let ids = bitmap_ids(&LevelExecutor, &request).unwrap();
        assert_eq!(ids, vec![123]);
    }

    #[test]
    fn test_time_frame_expands_ids() {
        let hourly = args("t.t", Some("2014-04-03 13:01:04"), None);
        let ids = bitmap_ids(&LevelExecutor, &hourly).unwrap();
        assert_eq!(ids.len(), 4);

        let monthly = args("t.t", Some("2014-04-03T13:01:04"), Some("M"));
        let ids = bitmap_ids(&LevelExecutor, &monthly).unwrap();
        assert_eq!(ids, vec![1230, 1231]);
    }

    #[test]
    fn test_bad_timestamp_is_rejected() {
        let result = bitmap_ids(&DetachedExecutor, &args("t.t", Some("04/03/2014"), None));
        assert!(result.is_err());
    }

    #[test]
    fn test_set_bit_args_accepts_legacy_granularity_key() {
        let entries: Vec<SetBitArgs> = serde_json::from_str(
            r#"[{"db":"3","frame":"t.t","profile_id":122,"filter":2,"bitmap_id":124,
                 "timestamp":"2014-04-03 13:01:04","time_granulatrity":"D"}]"#,
        )
        .unwrap();
        assert_eq!(entries[0].time_granularity.as_deref(), Some("D"));

        let missing: std::result::Result<Vec<SetBitArgs>, _> =
            serde_json::from_str(r#"[{"db":"3","frame":"b.n","filter":0,"bitmap_id":123}]"#);
        assert!(missing.is_err());
    }
}
