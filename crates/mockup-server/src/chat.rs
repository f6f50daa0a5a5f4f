//! `POST /chat`: one streamed generation.
//!
//! The handler validates the request, checks the balance and records the
//! user's turn, then answers at once with a chunked text body. A spawned
//! task opens the upstream stream and forwards every text chunk, with
//! marker look-alikes escaped, while feeding it to a [`GenerationContext`]. When the upstream finishes cleanly
//! the task charges the user, announces the deduction and saves the reply
//! and the frames. The task runs to completion even if the client goes
//! away.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use futures::StreamExt;
use mockup_shared::cost::TokenUsage;
use mockup_shared::markers::{Marker, MarkerEscaper};
use mockup_shared::protocol::{reply_summary, ChatRequest};
use mockup_shared::splitter::{FrameContent, GenerationContext, Mode};
use mockup_shared::types::{DeviceMode, FrameSeed, InlineImage, MessageKind, Role};
use mockup_store::{Frame, Message};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::ServerError;
use crate::gemini::{Content, GenerationChunk};
use crate::prompt::{build_conversation, PromptContext};

/// Chunks buffered between the generation task and the response body.
const STREAM_BUFFER: usize = 32;

/// What the background task needs once the response has been returned.
struct Generation {
    user: Uuid,
    project_id: Uuid,
    prompt: String,
    device: DeviceMode,
    mode: Mode,
    /// Creation time of the edited frame, kept on save.
    edit_created_at: Option<DateTime<Utc>>,
    started_at: DateTime<Utc>,
}

pub async fn chat(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ServerError> {
    let prompt = req.message.trim();
    if prompt.is_empty() {
        return Err(ServerError::BadRequest("message is required".into()));
    }
    if let Some(image) = &req.image {
        InlineImage::from_data_url(image).map_err(|e| ServerError::BadRequest(e.to_string()))?;
    }

    let (history, edit_frame) = {
        let db = state.db.lock().await;
        db.get_owned_project(req.project_id, user.id())
            .map_err(ServerError::missing("Project"))?;

        let edit_frame = match &req.edit_frame_id {
            Some(id) => {
                let frame = db.get_frame(id).map_err(ServerError::missing("Frame"))?;
                if frame.project_id != req.project_id {
                    return Err(ServerError::NotFound("Frame"));
                }
                Some(frame)
            }
            None => None,
        };

        (db.list_messages_for_project(req.project_id)?, edit_frame)
    };

    let balance = state.ledger.balance(user.id()).await?;
    if balance < state.config.min_credits {
        warn!(user = %user.id(), balance, "generation refused: insufficient credits");
        return Err(ServerError::InsufficientCredits);
    }

    let turn = Message::new(req.project_id, Role::User, prompt).with_image(req.image.clone());
    state.db.lock().await.insert_message(&turn)?;

    let conversation = build_conversation(
        &PromptContext {
            device: req.device_mode,
            tier: user.0.tier,
            current_design: edit_frame.as_ref().map(|f| f.content.as_str()),
            references: &state.references,
        },
        &history,
        prompt,
        req.image.as_deref(),
    );

    let job = Generation {
        user: user.id(),
        project_id: req.project_id,
        prompt: prompt.to_string(),
        device: req.device_mode,
        mode: match &edit_frame {
            Some(frame) => Mode::Edit(frame.id.clone()),
            None => Mode::Create,
        },
        edit_created_at: edit_frame.map(|f| f.created_at),
        started_at: Utc::now().trunc_subsecs(6),
    };

    info!(
        user = %job.user,
        project = %job.project_id,
        device = %job.device,
        editing = matches!(job.mode, Mode::Edit(_)),
        "starting generation"
    );

    let (tx, rx) = mpsc::channel::<String>(STREAM_BUFFER);
    tokio::spawn(run_generation(state, job, conversation, tx));

    let body = Body::from_stream(
        ReceiverStream::new(rx).map(|text| Ok::<_, Infallible>(Bytes::from(text))),
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

/// Response side of the pipe. Sends stop once the client is gone; the
/// generation itself carries on.
struct Downstream {
    tx: mpsc::Sender<String>,
    connected: bool,
}

impl Downstream {
    async fn send(&mut self, text: String) {
        if self.connected && self.tx.send(text).await.is_err() {
            self.connected = false;
            debug!("client disconnected, generation continues");
        }
    }
}

async fn run_generation(
    state: AppState,
    job: Generation,
    conversation: Vec<Content>,
    tx: mpsc::Sender<String>,
) {
    let mut out = Downstream {
        tx,
        connected: true,
    };
    out.send(Marker::Start.encode()).await;

    let mut stream = match state.generator.open(conversation).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(user = %job.user, error = %e, "failed to open text stream");
            out.send(Marker::error(e.to_string()).encode()).await;
            return;
        }
    };

    let seed = FrameSeed::new(job.started_at.timestamp_millis());
    let mut ctx = GenerationContext::new(job.mode.clone(), seed);
    let mut escaper = MarkerEscaper::new();
    let mut usage = TokenUsage::default();

    while let Some(item) = stream.next().await {
        match item {
            Ok(GenerationChunk::Text(text)) => {
                let text = escaper.push(&text);
                if !text.is_empty() {
                    ctx.absorb(&text);
                    out.send(text).await;
                }
            }
            Ok(GenerationChunk::Usage(reported)) => usage = reported,
            Err(e) => {
                warn!(user = %job.user, error = %e, "text stream failed");
                if let Some(rest) = escaper.finish() {
                    out.send(rest).await;
                }
                out.send(Marker::error(e.to_string()).encode()).await;
                return;
            }
        }
    }

    if let Some(rest) = escaper.finish() {
        ctx.absorb(&rest);
        out.send(rest).await;
    }

    if let Some(charge) = state.ledger.charge(job.user, usage).await {
        out.send(Marker::CreditsDeducted(charge.cost).encode()).await;
    }

    persist(&state, &job, ctx.finish()).await;
}

/// Save the reply and every frame. A failed write is logged and noted in
/// the transcript; later frames are still attempted.
async fn persist(state: &AppState, job: &Generation, frames: Vec<FrameContent>) {
    let db = state.db.lock().await;

    let note_failure = |what: String| {
        let note = Message::new(job.project_id, Role::System, what).with_kind(MessageKind::Status);
        if let Err(e) = db.insert_message(&note) {
            error!(project = %job.project_id, error = %e, "failed to record save failure");
        }
    };

    let reply = Message::new(job.project_id, Role::Assistant, reply_summary(&job.prompt));
    if let Err(e) = db.insert_message(&reply) {
        error!(project = %job.project_id, error = %e, "failed to save assistant message");
        note_failure(format!("Failed to save the assistant reply: {e}"));
    }

    let created_at = job.edit_created_at.unwrap_or(job.started_at);
    let mut saved = 0;
    for frame in frames {
        let row = Frame {
            id: frame.id,
            project_id: job.project_id,
            content: frame.content,
            device: job.device,
            created_at,
        };
        match db.upsert_frame(&row) {
            Ok(()) => saved += 1,
            Err(e) => {
                error!(frame = %row.id, error = %e, "failed to save frame");
                note_failure(format!("Failed to save frame {}: {e}", row.id));
            }
        }
    }

    info!(project = %job.project_id, frames = saved, "generation saved");
}
