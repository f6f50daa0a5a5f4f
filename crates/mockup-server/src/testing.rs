//! In-process harness for router tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use chrono::Utc;
use mockup_shared::constants::USER_ID_HEADER;
use mockup_shared::types::{DeviceMode, FrameId};
use mockup_store::{Database, Frame};
use tower::ServiceExt;
use uuid::Uuid;

use crate::api::{build_router, AppState};
use crate::config::ServerConfig;
use crate::gemini::{ChunkStream, Content, GenerationChunk, GenerationError, TextGenerator};
use crate::ledger::CreditLedger;

type Script = Vec<Result<GenerationChunk, GenerationError>>;

/// Replays a fixed chunk sequence for every generation.
pub struct ScriptedGenerator {
    chunks: Script,
    open_error: Option<GenerationError>,
    calls: AtomicUsize,
    last: Mutex<Option<Vec<Content>>>,
}

impl ScriptedGenerator {
    pub fn new(chunks: Script) -> Arc<Self> {
        Arc::new(Self {
            chunks,
            open_error: None,
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    pub fn failing(error: GenerationError) -> Arc<Self> {
        Arc::new(Self {
            chunks: Vec::new(),
            open_error: Some(error),
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_conversation(&self) -> Option<Vec<Content>> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn open(&self, conversation: Vec<Content>) -> Result<ChunkStream, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(conversation);
        if let Some(e) = &self.open_error {
            return Err(e.clone());
        }
        Ok(Box::pin(futures::stream::iter(self.chunks.clone())))
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub async fn new(generator: Arc<ScriptedGenerator>) -> Self {
        Self::from_state(Self::state(generator))
    }

    /// Like [`TestApp::new`], but charges through `ledger`.
    pub async fn with_ledger(generator: Arc<ScriptedGenerator>, ledger: CreditLedger) -> Self {
        let mut state = Self::state(generator);
        state.ledger = Arc::new(ledger);
        Self::from_state(state)
    }

    fn state(generator: Arc<ScriptedGenerator>) -> AppState {
        let generator: Arc<dyn TextGenerator> = generator;
        let db = Database::open_in_memory().unwrap();
        AppState::new(db, generator, Vec::new(), ServerConfig::default())
    }

    fn from_state(state: AppState) -> Self {
        let router = build_router(state.clone());
        Self { state, router }
    }

    pub async fn call(&self, req: Request<Body>) -> (StatusCode, Bytes) {
        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }

    /// A user holding `credits` with one empty project.
    pub async fn user_with_project(&self, credits: i64) -> (Uuid, Uuid) {
        let user = Uuid::new_v4();
        let db = self.state.db.lock().await;
        db.ensure_profile(user, credits).unwrap();
        let project = db.create_project(user, "App 1").unwrap();
        (user, project.id)
    }

    pub async fn seed_frame(&self, project: Uuid, id: &str, content: &str) -> Frame {
        let db = self.state.db.lock().await;
        db.upsert_frame(&Frame {
            id: FrameId::from(id),
            project_id: project,
            content: content.to_string(),
            device: DeviceMode::Mobile,
            created_at: Utc::now(),
        })
        .unwrap();
        db.get_frame(&FrameId::from(id)).unwrap()
    }
}

pub fn json_request(
    method: &str,
    uri: &str,
    user: Option<Uuid>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn empty_request(method: &str, uri: &str, user: Option<Uuid>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

pub fn body_text(body: Bytes) -> String {
    String::from_utf8(body.to_vec()).unwrap()
}

pub fn body_json(body: Bytes) -> serde_json::Value {
    serde_json::from_slice(&body).unwrap()
}
