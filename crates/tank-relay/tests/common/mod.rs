#![allow(dead_code)]

use axum::http::StatusCode;
use axum::routing::get;
use ed25519_dalek::SigningKey;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tank_protocol::{EncodedFrame, Frame, FrameAuthenticator, FrameVerifier};
use tank_relay::error::{RadioError, SourceError};
use tank_relay::local_api::{self, LocalApi};
use tank_relay::radio::Radio;
use tank_relay::relay::{RelayLoop, RelaySettings, RelayStatus};
use tank_relay::source::{CommandSource, DriveIntent};
use tokio::net::TcpListener;

pub fn test_key() -> SigningKey {
    SigningKey::from_bytes(&[42; 32])
}

pub fn settings() -> RelaySettings {
    RelaySettings {
        poll_interval: Duration::from_millis(500),
        poll_timeout: Duration::from_millis(800),
        safety_interval: Duration::from_secs(1),
    }
}

/// Source whose answer the test can change while the loop owns it.
#[derive(Clone)]
pub struct MockSource {
    reply: Arc<Mutex<Result<DriveIntent, SourceError>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MockSource {
    pub fn new(reply: Result<DriveIntent, SourceError>) -> Self {
        Self {
            reply: Arc::new(Mutex::new(reply)),
            delay: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set(&self, reply: Result<DriveIntent, SourceError>) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn go_dark(&self) {
        self.set(Err(SourceError::Unreachable("link down".to_string())));
    }

    /// Every poll sleeps this long before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }
}

impl CommandSource for MockSource {
    async fn poll(&mut self) -> Result<DriveIntent, SourceError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        self.reply.lock().unwrap().clone()
    }
}

/// Radio that keeps every frame it is handed.
#[derive(Clone, Default)]
pub struct RecordingRadio {
    frames: Arc<Mutex<Vec<EncodedFrame>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingRadio {
    pub fn frames(&self) -> Vec<EncodedFrame> {
        self.frames.lock().unwrap().clone()
    }

    /// While set, transmits fail and nothing is recorded.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    /// Verifies and decodes everything recorded so far, in order.
    pub fn decoded(&self) -> Vec<Frame> {
        decode_all(&self.frames())
    }
}

impl Radio for RecordingRadio {
    async fn transmit(&mut self, frame: &EncodedFrame) -> Result<(), RadioError> {
        if *self.fail.lock().unwrap() {
            return Err(RadioError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "modem unplugged",
            )));
        }
        self.frames.lock().unwrap().push(frame.clone());
        Ok(())
    }
}

pub fn decode_all(frames: &[EncodedFrame]) -> Vec<Frame> {
    let mut verifier = FrameVerifier::new(test_key().verifying_key());
    frames
        .iter()
        .map(|f| verifier.verify(f.as_bytes()).expect("relay frame must verify"))
        .collect()
}

pub fn build_loop<S: CommandSource>(
    source: S,
    radio: RecordingRadio,
) -> RelayLoop<S, FrameAuthenticator, RecordingRadio> {
    RelayLoop::new(
        source,
        FrameAuthenticator::new(test_key()),
        radio,
        settings(),
        RelayStatus::new("mock", "recording"),
    )
}

/// What the fixture command server answers on `GET /command`.
#[derive(Clone)]
pub struct FixtureReply {
    inner: Arc<Mutex<(StatusCode, String, Duration)>>,
}

impl FixtureReply {
    pub fn new(body: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new((StatusCode::OK, body.to_string(), Duration::ZERO))),
        }
    }

    pub fn set(&self, status: StatusCode, body: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.0 = status;
        inner.1 = body.to_string();
    }

    pub fn set_delay(&self, delay: Duration) {
        self.inner.lock().unwrap().2 = delay;
    }
}

/// Starts an operator command server stand-in; returns its `/command` URL.
pub async fn start_command_server(reply: FixtureReply) -> String {
    let app = axum::Router::new().route(
        "/command",
        get(move || {
            let reply = reply.clone();
            async move {
                let (status, body, delay) = reply.inner.lock().unwrap().clone();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                (status, body)
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/command")
}

/// A loopback address nothing listens on.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/command")
}

pub async fn start_local_api(api: LocalApi) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        local_api::serve(listener, api).await.unwrap();
    });
    addr
}
