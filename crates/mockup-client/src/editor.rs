//! Editor session: one open project as a front end sees it.
//!
//! The session owns the project's frames, the frame selected for editing,
//! undo/redo history, the transcript and a cached credit balance. A
//! generation is driven through [`EditorSession::send`], which feeds the
//! service's byte stream through a [`GenerationContext`] so frames update
//! while the model is still writing.

use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use mockup_shared::constants::MIN_CREDITS_TO_GENERATE;
use mockup_shared::cost::apply_deduction;
use mockup_shared::protocol::{reply_summary, ChatRequest, FrameDraft};
use mockup_shared::splitter::{FrameContent, GenerationContext, Mode, SplitEvent};
use mockup_shared::types::{DeviceMode, FrameId, FrameSeed, MessageKind, Role, Tier};
use mockup_store::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{Backend, ByteStream, StudioClient};
use crate::error::{ClientError, Result};
use crate::history::FrameHistory;
use crate::stream::Utf8Decoder;

pub const GENERATING_STATUS: &str = "Generating Request";
pub const INSUFFICIENT_CREDITS: &str = "Insufficient credits, upgrade to get more credits";
pub const CONNECT_FAILED: &str = "Could not connect to AI service. (Timeout or Network Issue)";

#[derive(Debug, Clone)]
pub struct EditorConfig {
    pub base_url: String,
    pub user_id: Uuid,
    /// Drop the placeholder frames of a generation that could not reach
    /// the service.
    pub cleanup_on_failure: bool,
    /// Local balance below which `send` refuses to start a generation.
    pub min_credits: i64,
}

impl EditorConfig {
    pub fn new(base_url: impl Into<String>, user_id: Uuid) -> Self {
        Self {
            base_url: base_url.into(),
            user_id,
            cleanup_on_failure: false,
            min_credits: MIN_CREDITS_TO_GENERATE,
        }
    }
}

/// One transcript line as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub role: Role,
    pub content: String,
    pub image: Option<String>,
    pub kind: MessageKind,
}

impl Entry {
    fn user(content: &str, image: Option<String>) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
            image,
            kind: MessageKind::Normal,
        }
    }

    fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            image: None,
            kind: MessageKind::Normal,
        }
    }

    fn status(content: &str) -> Self {
        Self {
            role: Role::System,
            content: content.to_string(),
            image: None,
            kind: MessageKind::Status,
        }
    }

    fn is_generating_status(&self) -> bool {
        self.role == Role::System && self.content == GENERATING_STATUS
    }
}

impl From<Message> for Entry {
    fn from(message: Message) -> Self {
        Self {
            role: message.role,
            content: message.content,
            image: message.image,
            kind: message.kind,
        }
    }
}

/// How a call to [`EditorSession::send`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Frames written by the generation, in order.
    Completed(Vec<FrameId>),
    /// Refused locally or by the service; the upgrade prompt is raised.
    InsufficientCredits,
    Failed(String),
}

enum StreamEnd {
    Finished(Vec<FrameContent>),
    /// The service reported an error marker.
    Halted(String),
    /// Reading the body failed.
    Broken(ClientError),
}

pub struct EditorSession<B = StudioClient> {
    backend: B,
    config: EditorConfig,
    project_id: Uuid,
    device: DeviceMode,
    frames: Vec<FrameDraft>,
    selected: Option<FrameId>,
    history: FrameHistory,
    transcript: Vec<Entry>,
    credits: i64,
    tier: Tier,
    upgrade_prompt: bool,
}

impl EditorSession<StudioClient> {
    /// Connect to the service, open the most recent project and fetch the
    /// balance.
    pub async fn connect(config: EditorConfig) -> Result<Self> {
        let client = StudioClient::new(config.base_url.clone(), config.user_id)?;
        let project = client
            .list_projects()
            .await?
            .into_iter()
            .next()
            .ok_or(ClientError::NotFound("Project"))?;

        let mut session = Self::new(client, config, project.id);
        session.open(project.id).await?;
        session.refresh_balance().await?;
        Ok(session)
    }
}

impl<B: Backend> EditorSession<B> {
    pub fn new(backend: B, config: EditorConfig, project_id: Uuid) -> Self {
        Self {
            backend,
            config,
            project_id,
            device: DeviceMode::default(),
            frames: Vec::new(),
            selected: None,
            history: FrameHistory::new(),
            transcript: Vec::new(),
            credits: 0,
            tier: Tier::default(),
            upgrade_prompt: false,
        }
    }

    /// Load a project's frames and transcript, discarding local history.
    pub async fn open(&mut self, project_id: Uuid) -> Result<()> {
        let snapshot = self.backend.project(project_id).await?;
        self.project_id = project_id;
        self.frames = snapshot.frames.into_iter().map(FrameDraft::from).collect();
        self.transcript = snapshot.messages.into_iter().map(Entry::from).collect();
        self.selected = None;
        self.history.clear();
        info!(project = %project_id, frames = self.frames.len(), "project opened");
        Ok(())
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub fn frames(&self) -> &[FrameDraft] {
        &self.frames
    }

    pub fn transcript(&self) -> &[Entry] {
        &self.transcript
    }

    pub fn credits(&self) -> i64 {
        self.credits
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn selected(&self) -> Option<&FrameId> {
        self.selected.as_ref()
    }

    pub fn device_mode(&self) -> DeviceMode {
        self.device
    }

    pub fn set_device_mode(&mut self, device: DeviceMode) {
        self.device = device;
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Pick the frame the next message edits. Unknown ids are ignored.
    pub fn select(&mut self, id: Option<FrameId>) -> bool {
        match id {
            Some(id) if self.frames.iter().any(|f| f.id == id) => {
                self.selected = Some(id);
                true
            }
            Some(_) => false,
            None => {
                self.selected = None;
                true
            }
        }
    }

    pub fn upgrade_prompt_open(&self) -> bool {
        self.upgrade_prompt
    }

    pub fn dismiss_upgrade_prompt(&mut self) {
        self.upgrade_prompt = false;
    }

    pub async fn refresh_balance(&mut self) -> Result<i64> {
        let profile = self.backend.profile().await?;
        self.credits = profile.credits;
        self.tier = profile.tier;
        debug!(credits = self.credits, tier = %self.tier, "balance refreshed");
        Ok(self.credits)
    }

    /// Run one generation: a new flow, or a rewrite of the selected frame.
    pub async fn send(&mut self, message: &str, image: Option<String>) -> Outcome {
        if self.credits < self.config.min_credits {
            self.transcript.push(Entry::user(message, image));
            self.transcript.push(Entry::assistant(INSUFFICIENT_CREDITS));
            self.upgrade_prompt = true;
            return Outcome::InsufficientCredits;
        }

        let before = self.frames.clone();
        self.transcript.push(Entry::user(message, image.clone()));
        self.transcript.push(Entry::status(GENERATING_STATUS));

        let mode = match &self.selected {
            Some(id) => Mode::Edit(id.clone()),
            None => Mode::Create,
        };
        let started_at = Utc::now();
        let seed = FrameSeed::new(started_at.timestamp_millis());
        let mut ctx = GenerationContext::new(mode.clone(), seed);
        if mode == Mode::Create {
            let placeholders: Vec<_> = ctx
                .frame_ids()
                .iter()
                .map(|id| FrameContent {
                    id: id.clone(),
                    content: String::new(),
                })
                .collect();
            self.apply_frames(placeholders, started_at);
        }

        let request = ChatRequest {
            project_id: self.project_id,
            message: message.to_string(),
            image,
            device_mode: self.device,
            edit_frame_id: self.selected.clone(),
        };

        let stream = match self.backend.chat(&request).await {
            Ok(stream) => stream,
            Err(ClientError::InsufficientCredits) => {
                self.transcript.retain(|e| !e.is_generating_status());
                self.transcript.push(Entry::assistant(INSUFFICIENT_CREDITS));
                self.upgrade_prompt = true;
                if mode == Mode::Create {
                    self.remove_frames(ctx.frame_ids());
                }
                return Outcome::InsufficientCredits;
            }
            Err(e) => return self.fail(&ctx, e),
        };

        match self.apply_stream(&mut ctx, stream, started_at).await {
            StreamEnd::Finished(frames) => {
                let ids: Vec<FrameId> = frames.iter().map(|f| f.id.clone()).collect();
                self.apply_frames(frames, started_at);
                self.history.record(before);
                self.selected = None;
                self.transcript.push(Entry::assistant(reply_summary(message)));
                if mode == Mode::Create {
                    self.resync().await;
                }
                Outcome::Completed(ids)
            }
            StreamEnd::Halted(msg) => {
                warn!(project = %self.project_id, error = %msg, "generation reported an error");
                self.transcript.push(Entry::assistant(format!("AI Error: {msg}")));
                Outcome::Failed(msg)
            }
            StreamEnd::Broken(e) => self.fail(&ctx, e),
        }
    }

    async fn apply_stream(
        &mut self,
        ctx: &mut GenerationContext,
        mut stream: ByteStream,
        created_at: DateTime<Utc>,
    ) -> StreamEnd {
        let mut decoder = Utf8Decoder::new();

        while let Some(item) = stream.next().await {
            let bytes = match item {
                Ok(bytes) => bytes,
                Err(e) => return StreamEnd::Broken(e),
            };
            let text = decoder.push(&bytes);
            if let Some(end) = self.apply_events(ctx.push(&text, Instant::now()), created_at) {
                return end;
            }
        }

        if let Some(rest) = decoder.finish() {
            if let Some(end) = self.apply_events(ctx.push(&rest, Instant::now()), created_at) {
                return end;
            }
        }
        StreamEnd::Finished(ctx.finish())
    }

    fn apply_events(
        &mut self,
        events: Vec<SplitEvent>,
        created_at: DateTime<Utc>,
    ) -> Option<StreamEnd> {
        for event in events {
            match event {
                SplitEvent::Started => debug!("generation started"),
                SplitEvent::FramesUpdated(frames) => self.apply_frames(frames, created_at),
                SplitEvent::CreditsDeducted(n) => {
                    self.credits = apply_deduction(self.credits, n);
                    debug!(deducted = n, balance = self.credits, "credits deducted");
                }
                SplitEvent::Failed(msg) => return Some(StreamEnd::Halted(msg)),
            }
        }
        None
    }

    fn apply_frames(&mut self, frames: Vec<FrameContent>, created_at: DateTime<Utc>) {
        for frame in frames {
            match self.frames.iter_mut().find(|f| f.id == frame.id) {
                Some(existing) => {
                    existing.content = frame.content;
                    existing.device = self.device;
                }
                None => self.frames.push(FrameDraft {
                    id: frame.id,
                    content: frame.content,
                    device: self.device,
                    created_at,
                }),
            }
        }
    }

    fn remove_frames(&mut self, ids: &[FrameId]) {
        self.frames.retain(|f| !ids.contains(&f.id));
    }

    fn fail(&mut self, ctx: &GenerationContext, error: ClientError) -> Outcome {
        warn!(project = %self.project_id, error = %error, "generation failed");
        self.transcript.push(Entry::assistant(CONNECT_FAILED));
        if self.config.cleanup_on_failure && *ctx.mode() == Mode::Create {
            self.remove_frames(ctx.frame_ids());
        }
        Outcome::Failed(error.to_string())
    }

    /// Take the service's copy of the frames; it assigned its own ids to
    /// the frames of a new flow.
    async fn resync(&mut self) {
        match self.backend.project(self.project_id).await {
            Ok(snapshot) => {
                self.frames = snapshot.frames.into_iter().map(FrameDraft::from).collect();
            }
            Err(e) => warn!(project = %self.project_id, error = %e, "could not reload frames"),
        }
    }

    /// Restore the frames from before the last generation and store them.
    /// Returns `false` when there is nothing to undo.
    pub async fn undo(&mut self) -> Result<bool> {
        let Some(previous) = self.history.undo(self.frames.clone()) else {
            return Ok(false);
        };
        self.restore(previous).await?;
        Ok(true)
    }

    pub async fn redo(&mut self) -> Result<bool> {
        let Some(next) = self.history.redo(self.frames.clone()) else {
            return Ok(false);
        };
        self.restore(next).await?;
        Ok(true)
    }

    async fn restore(&mut self, frames: Vec<FrameDraft>) -> Result<()> {
        self.frames = frames;
        if let Some(id) = &self.selected {
            if !self.frames.iter().any(|f| &f.id == id) {
                self.selected = None;
            }
        }

        match self.backend.replace_frames(self.project_id, &self.frames).await {
            Ok(res) => {
                debug!(kept = res.kept, removed = res.removed, "frames synced");
                Ok(())
            }
            Err(e) => {
                warn!(project = %self.project_id, error = %e, "failed to sync frames");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;
    use mockup_shared::markers::Marker;
    use mockup_shared::protocol::ReplaceFramesResponse;
    use mockup_store::{Frame, Profile, Project, ProjectSnapshot};

    use super::*;

    enum Script {
        Chunks(Vec<Vec<u8>>),
        BrokenAfter(Vec<Vec<u8>>),
        Reject402,
        Unreachable,
    }

    struct FakeBackend {
        credits: i64,
        script: Mutex<Option<Script>>,
        snapshot: Mutex<Option<ProjectSnapshot>>,
        requests: Mutex<Vec<ChatRequest>>,
        replaced: Mutex<Vec<Vec<FrameDraft>>>,
    }

    impl FakeBackend {
        fn new(credits: i64, script: Script) -> Self {
            Self {
                credits,
                script: Mutex::new(Some(script)),
                snapshot: Mutex::new(None),
                requests: Mutex::new(Vec::new()),
                replaced: Mutex::new(Vec::new()),
            }
        }

        fn with_snapshot(self, snapshot: ProjectSnapshot) -> Self {
            *self.snapshot.lock().unwrap() = Some(snapshot);
            self
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn profile(&self) -> Result<Profile> {
            Ok(Profile {
                id: Uuid::nil(),
                email: None,
                tier: Tier::Pro,
                credits: self.credits,
                created_at: Utc::now(),
            })
        }

        async fn project(&self, _id: Uuid) -> Result<ProjectSnapshot> {
            self.snapshot
                .lock()
                .unwrap()
                .clone()
                .ok_or(ClientError::NotFound("Project"))
        }

        async fn chat(&self, request: &ChatRequest) -> Result<ByteStream> {
            self.requests.lock().unwrap().push(request.clone());
            let script = self.script.lock().unwrap().take();
            let items: Vec<Result<Bytes>> = match script {
                Some(Script::Chunks(chunks)) => chunks.into_iter().map(|c| Ok(c.into())).collect(),
                Some(Script::BrokenAfter(chunks)) => chunks
                    .into_iter()
                    .map(|c| Ok(c.into()))
                    .chain(std::iter::once(Err(ClientError::Stream("reset".into()))))
                    .collect(),
                Some(Script::Reject402) => return Err(ClientError::InsufficientCredits),
                Some(Script::Unreachable) | None => {
                    return Err(ClientError::Status {
                        status: 502,
                        message: "bad gateway".into(),
                    })
                }
            };
            Ok(Box::pin(futures::stream::iter(items)))
        }

        async fn replace_frames(
            &self,
            _project_id: Uuid,
            frames: &[FrameDraft],
        ) -> Result<ReplaceFramesResponse> {
            self.replaced.lock().unwrap().push(frames.to_vec());
            Ok(ReplaceFramesResponse {
                kept: frames.len(),
                removed: 0,
            })
        }
    }

    fn chunks(parts: &[&str]) -> Vec<Vec<u8>> {
        parts.iter().map(|p| p.as_bytes().to_vec()).collect()
    }

    async fn session(backend: FakeBackend) -> EditorSession<FakeBackend> {
        let mut session =
            EditorSession::new(backend, EditorConfig::new("http://test", Uuid::nil()), Uuid::nil());
        session.refresh_balance().await.unwrap();
        session
    }

    fn snapshot_with_frame(id: &str, content: &str) -> ProjectSnapshot {
        let project_id = Uuid::new_v4();
        ProjectSnapshot {
            project: Project {
                id: project_id,
                user_id: Uuid::nil(),
                name: "App".into(),
                created_at: Utc::now(),
            },
            messages: vec![],
            frames: vec![Frame {
                id: FrameId::from(id),
                project_id,
                content: content.into(),
                device: DeviceMode::Mobile,
                created_at: Utc::now(),
            }],
        }
    }

    #[tokio::test]
    async fn test_low_balance_is_refused_locally() {
        let mut session = session(FakeBackend::new(3, Script::Unreachable)).await;

        let outcome = session.send("travel app", None).await;

        assert_eq!(outcome, Outcome::InsufficientCredits);
        assert!(session.backend.requests.lock().unwrap().is_empty());
        assert!(session.upgrade_prompt_open());
        assert!(session.frames().is_empty());
        assert_eq!(session.transcript().last().unwrap().content, INSUFFICIENT_CREDITS);
    }

    #[tokio::test]
    async fn test_creation_fills_frames_and_deducts_credits() {
        let start = Marker::Start.encode();
        let credits = Marker::CreditsDeducted(2).encode();
        let mut bytes = chunks(&[
            start.as_str(),
            "```html\n<!-- Screen: Login -->\n```\n```html\n<p>caf",
        ]);
        // "é" split across two chunks.
        bytes.push(vec![0xC3]);
        let mut tail = vec![0xA9u8];
        tail.extend_from_slice(b"</p>\n```");
        bytes.push(tail);
        bytes.push(credits.into_bytes());

        let mut session = session(FakeBackend::new(20, Script::Chunks(bytes))).await;
        let outcome = session.send("travel app", None).await;

        let Outcome::Completed(ids) = outcome else {
            panic!("unexpected outcome: {outcome:?}");
        };
        assert_eq!(ids.len(), 2);
        let contents: Vec<_> = session.frames().iter().map(|f| f.content.as_str()).collect();
        assert_eq!(contents, vec!["<!-- Screen: Login -->", "<p>café</p>"]);
        assert_eq!(session.credits(), 18);
        assert!(session.can_undo());
        assert_eq!(session.transcript().last().unwrap().content, reply_summary("travel app"));

        let requests = session.backend.requests.lock().unwrap();
        assert_eq!(requests[0].edit_frame_id, None);
    }

    #[tokio::test]
    async fn test_edit_rewrites_selected_frame() {
        let backend = FakeBackend::new(20, Script::Chunks(chunks(&["<div>B</div>"])))
            .with_snapshot(snapshot_with_frame("f1", "<div>A</div>"));
        let mut session = session(backend).await;
        session.open(Uuid::nil()).await.unwrap();
        assert!(session.select(Some(FrameId::from("f1"))));

        let outcome = session.send("make it blue", None).await;

        assert_eq!(outcome, Outcome::Completed(vec![FrameId::from("f1")]));
        assert_eq!(session.frames().len(), 1);
        assert_eq!(session.frames()[0].content, "<div>B</div>");
        assert!(session.selected().is_none());
        let requests = session.backend.requests.lock().unwrap();
        assert_eq!(requests[0].edit_frame_id, Some(FrameId::from("f1")));
    }

    #[tokio::test]
    async fn test_payment_required_clears_status_and_placeholders() {
        let mut session = session(FakeBackend::new(20, Script::Reject402)).await;

        let outcome = session.send("travel app", None).await;

        assert_eq!(outcome, Outcome::InsufficientCredits);
        assert!(session.frames().is_empty());
        assert!(session.upgrade_prompt_open());
        assert!(!session.transcript().iter().any(|e| e.content == GENERATING_STATUS));
    }

    #[tokio::test]
    async fn test_connection_failure_keeps_placeholder_by_default() {
        let mut session = session(FakeBackend::new(20, Script::Unreachable)).await;

        let outcome = session.send("travel app", None).await;

        assert!(matches!(outcome, Outcome::Failed(_)));
        assert_eq!(session.frames().len(), 1);
        assert!(session.frames()[0].content.is_empty());
        assert_eq!(session.transcript().last().unwrap().content, CONNECT_FAILED);
    }

    #[tokio::test]
    async fn test_cleanup_on_failure_drops_placeholders() {
        let backend = FakeBackend::new(20, Script::BrokenAfter(chunks(&["```html\n<div>x"])));
        let mut session = session(backend).await;
        session.config.cleanup_on_failure = true;

        let outcome = session.send("travel app", None).await;

        assert!(matches!(outcome, Outcome::Failed(_)));
        assert!(session.frames().is_empty());
        assert!(!session.can_undo());
    }

    #[tokio::test]
    async fn test_error_marker_stops_without_retracting() {
        let error = Marker::error("model overloaded").encode();
        let backend = FakeBackend::new(
            20,
            Script::Chunks(chunks(&[
                "```html\n<div>partial",
                error.as_str(),
                "```html\n<p>later</p>```",
            ])),
        );
        let mut session = session(backend).await;

        let outcome = session.send("travel app", None).await;

        assert_eq!(outcome, Outcome::Failed("model overloaded".into()));
        assert_eq!(session.frames().len(), 1);
        assert_eq!(session.frames()[0].content, "<div>partial");
        assert_eq!(
            session.transcript().last().unwrap().content,
            "AI Error: model overloaded"
        );
    }

    #[tokio::test]
    async fn test_undo_and_redo_sync_frames() {
        let backend = FakeBackend::new(
            20,
            Script::Chunks(chunks(&["```html\n<div>one</div>\n```"])),
        );
        let mut session = session(backend).await;
        session.send("travel app", None).await;
        let generated = session.frames().to_vec();
        assert_eq!(generated.len(), 1);

        assert!(session.undo().await.unwrap());
        assert!(session.frames().is_empty());
        assert!(!session.undo().await.unwrap());

        assert!(session.redo().await.unwrap());
        assert_eq!(session.frames(), generated.as_slice());

        let replaced = session.backend.replaced.lock().unwrap();
        assert_eq!(replaced.len(), 2);
        assert!(replaced[0].is_empty());
        assert_eq!(replaced[1], generated);
    }

    #[tokio::test]
    async fn test_refresh_balance() {
        let mut session = session(FakeBackend::new(42, Script::Unreachable)).await;
        assert_eq!(session.credits(), 42);
        assert_eq!(session.tier(), Tier::Pro);
    }
}
