//! `/api/*` JSON routes.
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | `POST` | `/api/boom/on`, `/api/boom/off` | – |
//! | `POST` | `/api/trolley/on`, `/api/trolley/off` | – |
//! | `POST` | `/api/trolley/level` | `{level254}` |
//! | `POST` | `/api/light` | `{level254}` |
//! | `POST` | `/api/trolley/speed` | `{speed}` |
//! | `POST` | `/api/trolley/reset` | – |
//! | `POST` | `/api/mode` | `{mode}` |
//! | `POST` | `/api/dali/on`, `/api/dali/off` | `{address}` |
//! | `POST` | `/api/dali/level` | `{address, level254}` |
//! | `GET` | `/api/state` | – |
//! | `GET` | `/api/health` | – |
//!
//! Bodies that are not a JSON object, and validation failures, map to 400.
//! Transport failures map to 500. Unknown paths and wrong methods are 404.
//! Every error carries `{ok:false, error}`.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::handler::Handler;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get, post};
use axum::{Json, Router};
use crane_middleware::CommandPublisher;
use crane_types::{CommandResponse, CraneError};
use serde_json::{Map, Value};
use tracing::debug;

use crate::query::QueryFacade;

/// What the API handlers need.
#[derive(Clone)]
pub struct ApiContext {
    pub publisher: CommandPublisher,
    pub query: QueryFacade,
}

/// The `/api` router with its state applied.
pub fn router(api: ApiContext) -> Router {
    Router::new()
        .route("/api/state", read(state))
        .route("/api/health", read(health))
        .route("/api/boom/on", command(boom_on))
        .route("/api/boom/off", command(boom_off))
        .route("/api/trolley/on", command(trolley_on))
        .route("/api/trolley/off", command(trolley_off))
        .route("/api/trolley/reset", command(trolley_reset))
        .route("/api/trolley/level", command(trolley_level))
        .route("/api/light", command(light_level))
        .route("/api/trolley/speed", command(trolley_speed))
        .route("/api/mode", command(control_mode))
        .route("/api/dali/on", command(dali_on))
        .route("/api/dali/off", command(dali_off))
        .route("/api/dali/level", command(dali_level))
        .fallback(not_found)
        .with_state(api)
}

fn command<H, T>(handler: H) -> MethodRouter<ApiContext>
where
    H: Handler<T, ApiContext>,
    T: 'static,
{
    post(handler).fallback(not_found)
}

fn read<H, T>(handler: H) -> MethodRouter<ApiContext>
where
    H: Handler<T, ApiContext>,
    T: 'static,
{
    get(handler).fallback(not_found)
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// A [`CraneError`] rendered as `{ok:false, error}`.
#[derive(Debug)]
pub struct ApiError(CraneError);

impl From<CraneError> for ApiError {
    fn from(error: CraneError) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(CraneError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_validation() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let message = match self.0 {
            CraneError::Validation(m) | CraneError::Transport(m) => m,
            other => other.to_string(),
        };
        (status, Json(CommandResponse::failure(message))).into_response()
    }
}

type ApiResult = Result<Json<CommandResponse>, ApiError>;

/// A request body that must be a JSON object.
type Fields = Result<Json<Map<String, Value>>, JsonRejection>;

async fn not_found(method: Method, uri: Uri) -> Response {
    debug!(%method, %uri, "no such route");
    let body = CommandResponse::failure(format!("no route for {method} {}", uri.path()));
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

// ────────────────────────────────────────────────────────────────────────────
// Queries
// ────────────────────────────────────────────────────────────────────────────

async fn state(State(api): State<ApiContext>) -> Response {
    let snapshot = api.query.get_state();
    Json(&*snapshot).into_response()
}

async fn health(State(api): State<ApiContext>) -> Response {
    Json(api.query.get_health()).into_response()
}

// ────────────────────────────────────────────────────────────────────────────
// Commands
// ────────────────────────────────────────────────────────────────────────────

async fn boom_on(State(api): State<ApiContext>) -> ApiResult {
    Ok(Json(api.publisher.boom_on().await?))
}

async fn boom_off(State(api): State<ApiContext>) -> ApiResult {
    Ok(Json(api.publisher.boom_off().await?))
}

async fn trolley_on(State(api): State<ApiContext>) -> ApiResult {
    Ok(Json(api.publisher.trolley_on().await?))
}

async fn trolley_off(State(api): State<ApiContext>) -> ApiResult {
    Ok(Json(api.publisher.trolley_off().await?))
}

async fn trolley_reset(State(api): State<ApiContext>) -> ApiResult {
    Ok(Json(api.publisher.trolley_reset().await?))
}

async fn trolley_level(State(api): State<ApiContext>, body: Fields) -> ApiResult {
    let Json(fields) = body?;
    let level = int_field(&fields, "level254")?;
    Ok(Json(api.publisher.set_trolley_level(level).await?))
}

async fn light_level(State(api): State<ApiContext>, body: Fields) -> ApiResult {
    let Json(fields) = body?;
    let level = int_field(&fields, "level254")?;
    Ok(Json(api.publisher.set_light_level(level).await?))
}

async fn trolley_speed(State(api): State<ApiContext>, body: Fields) -> ApiResult {
    let Json(fields) = body?;
    let speed = str_field(&fields, "speed")?;
    Ok(Json(api.publisher.set_trolley_speed(speed).await?))
}

async fn control_mode(State(api): State<ApiContext>, body: Fields) -> ApiResult {
    let Json(fields) = body?;
    let mode = str_field(&fields, "mode")?;
    Ok(Json(api.publisher.set_control_mode(mode).await?))
}

async fn dali_on(State(api): State<ApiContext>, body: Fields) -> ApiResult {
    let Json(fields) = body?;
    let address = int_field(&fields, "address")?;
    Ok(Json(api.publisher.address_on(address).await?))
}

async fn dali_off(State(api): State<ApiContext>, body: Fields) -> ApiResult {
    let Json(fields) = body?;
    let address = int_field(&fields, "address")?;
    Ok(Json(api.publisher.address_off(address).await?))
}

async fn dali_level(State(api): State<ApiContext>, body: Fields) -> ApiResult {
    let Json(fields) = body?;
    let address = int_field(&fields, "address")?;
    let level = int_field(&fields, "level254")?;
    Ok(Json(api.publisher.set_address_level(address, level).await?))
}

fn int_field(fields: &Map<String, Value>, name: &str) -> Result<i64, CraneError> {
    match fields.get(name) {
        Some(value) => value
            .as_i64()
            .ok_or_else(|| CraneError::Validation(format!("{name} must be an integer, got {value}"))),
        None => Err(CraneError::Validation(format!("{name} is required"))),
    }
}

fn str_field<'f>(fields: &'f Map<String, Value>, name: &str) -> Result<&'f str, CraneError> {
    match fields.get(name) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(CraneError::Validation(format!("{name} must be a string, got {other}"))),
        None => Err(CraneError::Validation(format!("{name} is required"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, header};
    use crane_middleware::{LoopbackBus, TopicSubscriber};
    use crane_twin::DigitalTwinStore;
    use serde_json::json;
    use tower::ServiceExt;

    struct Harness {
        api: ApiContext,
        bus: Arc<LoopbackBus>,
        store: Arc<DigitalTwinStore>,
        commands: TopicSubscriber,
    }

    fn harness() -> Harness {
        let bus = Arc::new(LoopbackBus::default());
        let store = Arc::new(DigitalTwinStore::new());
        let commands = bus.subscribe_topic("lights/cmd");
        let api = ApiContext {
            publisher: CommandPublisher::new(bus.clone(), "lights/cmd"),
            query: QueryFacade::new(Arc::clone(&store), bus.clone()),
        };
        Harness {
            api,
            bus,
            store,
            commands,
        }
    }

    /// Send one request; a non-empty body goes out as `application/json`.
    async fn call(
        h: &Harness,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<(StatusCode, Value), Box<dyn std::error::Error>> {
        let mut request = Request::builder().method(method).uri(path);
        if !body.is_empty() {
            request = request.header(header::CONTENT_TYPE, "application/json");
        }
        let response = router(h.api.clone())
            .oneshot(request.body(Body::from(body.to_string()))?)
            .await?;

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, json))
    }

    fn last_command(h: &mut Harness) -> Value {
        let message = h.commands.try_recv().expect("a command was published");
        serde_json::from_slice(&message.payload).expect("JSON command")
    }

    #[tokio::test]
    async fn power_routes() -> Result<(), Box<dyn std::error::Error>> {
        let mut h = harness();
        for (path, expected) in [
            ("/api/boom/on", json!({"cmd": "on"})),
            ("/api/boom/off", json!({"cmd": "off"})),
            ("/api/trolley/on", json!({"trolley": "on"})),
            ("/api/trolley/off", json!({"trolley": "off"})),
        ] {
            let (status, body) = call(&h, "POST", path, "").await?;
            assert_eq!(status, StatusCode::OK, "{path}");
            assert_eq!(body, json!({"ok": true}));
            assert_eq!(last_command(&mut h), expected);
        }
        Ok(())
    }

    #[tokio::test]
    async fn level_routes_echo() -> Result<(), Box<dyn std::error::Error>> {
        let mut h = harness();

        let (status, body) = call(&h, "POST", "/api/light", r#"{"level254": 254}"#).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true, "lightLevel254": 254}));
        assert_eq!(last_command(&mut h), json!({"lightLevel254": 254}));

        let (_, body) = call(&h, "POST", "/api/trolley/level", r#"{"level254": 3}"#).await?;
        assert_eq!(body, json!({"ok": true, "trolleyLevel254": 3}));
        assert_eq!(last_command(&mut h), json!({"trolleyLevel254": 3}));
        Ok(())
    }

    #[tokio::test]
    async fn speed_mode_and_reset_routes() -> Result<(), Box<dyn std::error::Error>> {
        let mut h = harness();

        let (_, body) = call(&h, "POST", "/api/trolley/speed", r#"{"speed":"fast"}"#).await?;
        assert_eq!(body, json!({"ok": true, "trolleySpeed": "fast"}));
        assert_eq!(last_command(&mut h), json!({"trolleySpeed": "fast"}));

        let (_, body) = call(&h, "POST", "/api/mode", r#"{"mode":"manual"}"#).await?;
        assert_eq!(body, json!({"ok": true, "controlMode": "manual"}));

        let (_, body) = call(&h, "POST", "/api/trolley/reset", "").await?;
        assert_eq!(
            body,
            json!({"ok": true, "trolleyReset": true, "trolleySpeed": "slow", "trolleyLevel254": 0})
        );
        Ok(())
    }

    #[tokio::test]
    async fn dali_routes() -> Result<(), Box<dyn std::error::Error>> {
        let mut h = harness();

        let (_, body) = call(&h, "POST", "/api/dali/on", r#"{"address": 5}"#).await?;
        assert_eq!(body, json!({"ok": true, "address": 5}));
        assert_eq!(last_command(&mut h), json!({"address": 5, "cmd": "on"}));

        let (_, body) = call(&h, "POST", "/api/dali/level", r#"{"address": 7, "level254": 90}"#).await?;
        assert_eq!(body, json!({"ok": true, "address": 7, "val": 90}));

        let (status, body) = call(&h, "POST", "/api/dali/level", r#"{"address": 70, "level254": 10}"#).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], json!(false));
        assert!(h.commands.try_recv().is_none(), "nothing published for address 70");
        Ok(())
    }

    #[tokio::test]
    async fn bad_input_is_400_and_never_published() -> Result<(), Box<dyn std::error::Error>> {
        let h = harness();
        let cases = [
            ("/api/light", r#"{"level254": 255}"#),
            ("/api/light", r#"{"level254": "128"}"#),
            ("/api/light", r#"{"level254": 12.5}"#),
            ("/api/light", "{not json"),
            ("/api/trolley/level", ""),
            ("/api/trolley/level", "{}"),
            ("/api/trolley/speed", r#"{"speed":"turbo"}"#),
            ("/api/mode", r#"["quay"]"#),
            ("/api/dali/on", "[5]"),
        ];
        for (path, body) in cases {
            let (status, json) = call(&h, "POST", path, body).await?;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{path} {body:?}");
            assert_eq!(json["ok"], json!(false));
            assert!(json["error"].is_string());
        }
        assert_eq!(h.bus.publish_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_field_names_the_field() -> Result<(), Box<dyn std::error::Error>> {
        let h = harness();
        let (status, body) = call(&h, "POST", "/api/dali/level", r#"{"address": 3}"#).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"ok": false, "error": "level254 is required"}));
        Ok(())
    }

    #[tokio::test]
    async fn transport_failure_is_500() -> Result<(), Box<dyn std::error::Error>> {
        let h = harness();
        h.bus.set_connected(false);

        let (status, body) = call(&h, "POST", "/api/boom/on", "").await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["ok"], json!(false));
        assert!(body["error"].is_string());
        Ok(())
    }

    #[tokio::test]
    async fn state_and_health() -> Result<(), Box<dyn std::error::Error>> {
        let h = harness();
        let record = json!({"boom": "on", "lightLevel254": 17}).as_object().cloned().unwrap();
        h.store.apply_update(record);

        let (status, state) = call(&h, "GET", "/api/state", "").await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state["boom"], json!("on"));
        assert_eq!(state["lightLevel254"], json!(17));

        let (_, health) = call(&h, "GET", "/api/health", "").await?;
        assert_eq!(
            health,
            json!({"ok": true, "busConnected": true, "busUrl": "loopback://local"})
        );
        Ok(())
    }

    #[tokio::test]
    async fn unknown_routes_and_wrong_methods_are_404() -> Result<(), Box<dyn std::error::Error>> {
        let h = harness();
        for (method, path) in [
            ("GET", "/api/boom/on"),
            ("POST", "/api/state"),
            ("POST", "/api/nope"),
            ("GET", "/"),
        ] {
            let (status, body) = call(&h, method, path, "").await?;
            assert_eq!(status, StatusCode::NOT_FOUND, "{method} {path}");
            assert_eq!(body["ok"], json!(false));
        }
        let (_, body) = call(&h, "GET", "/api/boom/on", "").await?;
        assert_eq!(body["error"], json!("no route for GET /api/boom/on"));
        assert_eq!(h.bus.publish_count(), 0);
        Ok(())
    }
}
