use crate::error::SourceError;
use crate::relay::RelayStatus;
use crate::source::{CommandSource, DriveIntent};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tank_protocol::Command;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Speed setpoint used until the operator sends a `speed` action.
pub const DEFAULT_SETPOINT: (u8, u8) = (255, 255);

/// A parsed operator action from the local endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorAction {
    /// Drive with the current setpoint.
    Drive(Command),
    /// Change the setpoint; `None` keeps that side's current value.
    Speed {
        /// New left magnitude.
        left: Option<u8>,
        /// New right magnitude.
        right: Option<u8>,
    },
    /// Halt.
    Stop,
}

impl OperatorAction {
    /// Parses the `action` field (case-insensitive) and, for `speed`, the
    /// optional `left`/`right` fields. Numbers are clamped to 0..=255.
    /// Unknown actions resolve to [`OperatorAction::Stop`].
    ///
    /// # Errors
    ///
    /// Returns a message if a speed value is present but not an integer.
    pub fn parse(action: &str, left: Option<&str>, right: Option<&str>) -> Result<Self, String> {
        let action = action.trim().to_ascii_lowercase();
        Ok(match action.as_str() {
            "forward" => Self::Drive(Command::Forward),
            "backward" => Self::Drive(Command::Backward),
            "left" => Self::Drive(Command::Left),
            "right" => Self::Drive(Command::Right),
            "speed" => Self::Speed {
                left: left.map(parse_speed).transpose()?,
                right: right.map(parse_speed).transpose()?,
            },
            "stop" => Self::Stop,
            other => {
                debug!(action = other, "unrecognized operator action, stopping");
                Self::Stop
            }
        })
    }
}

fn parse_speed(raw: &str) -> Result<u8, String> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("invalid speed value: {raw:?}"))?;
    Ok(u8::try_from(value.clamp(0, 255)).unwrap_or(u8::MAX))
}

#[derive(Debug)]
struct OperatorState {
    intent: DriveIntent,
    setpoint: (u8, u8),
    last_seen: Option<Instant>,
}

/// Local-operator command source.
///
/// The HTTP handler writes the latest intent; the relay loop reads it once
/// per tick. Only the most recent action is kept.
#[derive(Clone)]
pub struct LocalOperator {
    shared: Arc<Mutex<OperatorState>>,
    idle_timeout: Option<Duration>,
}

impl LocalOperator {
    /// Creates an operator source that starts stopped with the default
    /// setpoint. With `idle_timeout`, silence longer than that window makes
    /// the source report unreachable.
    #[must_use]
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(OperatorState {
                intent: DriveIntent::stop(),
                setpoint: DEFAULT_SETPOINT,
                last_seen: None,
            })),
            idle_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, OperatorState> {
        match self.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("operator lock poisoned, using recovered state");
                poisoned.into_inner()
            }
        }
    }

    /// Records an operator action and returns the resulting command.
    pub fn apply(&self, action: OperatorAction) -> Command {
        let mut state = self.lock();
        state.last_seen = Some(Instant::now());
        let (left, right) = state.setpoint;
        let intent = match action {
            OperatorAction::Drive(cmd) => DriveIntent::new(cmd, left, right),
            OperatorAction::Speed {
                left: new_left,
                right: new_right,
            } => {
                let setpoint = (new_left.unwrap_or(left), new_right.unwrap_or(right));
                state.setpoint = setpoint;
                DriveIntent::new(Command::SetSpeed, setpoint.0, setpoint.1)
            }
            OperatorAction::Stop => DriveIntent::stop(),
        };
        state.intent = intent;
        intent.command()
    }

    /// Current speed setpoint.
    #[must_use]
    pub fn setpoint(&self) -> (u8, u8) {
        self.lock().setpoint
    }

    fn current(&self) -> Result<DriveIntent, SourceError> {
        let state = self.lock();
        if let Some(limit) = self.idle_timeout {
            let fresh = state.last_seen.is_some_and(|seen| seen.elapsed() <= limit);
            if !fresh {
                return Err(SourceError::Unreachable(format!(
                    "no operator input for {}ms",
                    limit.as_millis()
                )));
            }
        }
        Ok(state.intent)
    }
}

impl CommandSource for LocalOperator {
    async fn poll(&mut self) -> Result<DriveIntent, SourceError> {
        self.current()
    }
}

#[derive(Debug, Deserialize)]
struct CmdForm {
    action: Option<String>,
    left: Option<String>,
    right: Option<String>,
}

/// Shared state behind the local HTTP API.
#[derive(Clone)]
pub struct LocalApi {
    operator: Option<LocalOperator>,
    status_rx: watch::Receiver<RelayStatus>,
}

impl LocalApi {
    /// `operator` is `None` when the relay polls a remote source; the
    /// status and health routes are served either way.
    #[must_use]
    pub const fn new(operator: Option<LocalOperator>, status_rx: watch::Receiver<RelayStatus>) -> Self {
        Self {
            operator,
            status_rx,
        }
    }
}

fn error_body(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "error": message.into() }))
}

async fn handle_command(
    State(api): State<LocalApi>,
    form: Option<Form<CmdForm>>,
) -> (StatusCode, Json<Value>) {
    let Some(operator) = api.operator.as_ref() else {
        return (StatusCode::CONFLICT, error_body("local control disabled"));
    };
    let Some(Form(form)) = form else {
        return (StatusCode::BAD_REQUEST, error_body("missing action"));
    };
    let Some(action) = form.action.as_deref() else {
        return (StatusCode::BAD_REQUEST, error_body("missing action"));
    };

    match OperatorAction::parse(action, form.left.as_deref(), form.right.as_deref()) {
        Ok(parsed) => {
            let cmd = operator.apply(parsed);
            info!(action, state = cmd.label(), "operator command");
            let mut body = json!({ "state": cmd.label() });
            // the radio answers on the relay tick, so report the last failure
            if let Some(err) = api.status_rx.borrow().last_radio_error.clone() {
                body["last_error"] = Value::String(err);
            }
            (StatusCode::OK, Json(body))
        }
        Err(e) => (StatusCode::BAD_REQUEST, error_body(e)),
    }
}

async fn handle_status(State(api): State<LocalApi>) -> Json<RelayStatus> {
    Json(api.status_rx.borrow().clone())
}

async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn handle_not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, error_body("not found"))
}

/// Builds the local API routes: `POST /cmd`, `GET /status`, `GET /health`.
pub fn router(api: LocalApi) -> Router {
    Router::new()
        .route("/cmd", post(handle_command))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .fallback(handle_not_found)
        .with_state(api)
}

/// Serves the local API on an already-bound listener until it fails.
///
/// # Errors
///
/// Returns an error if the HTTP server stops with an I/O error.
pub async fn serve(listener: TcpListener, api: LocalApi) -> anyhow::Result<()> {
    info!("local API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(api)).await?;
    Ok(())
}
