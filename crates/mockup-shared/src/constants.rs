/// Application name
pub const APP_NAME: &str = "Mockup Studio";

/// Minimum balance a user must hold before a generation may start
pub const MIN_CREDITS_TO_GENERATE: i64 = 5;

/// Input token price, in micro-credits per token (0.35 credits / 1k tokens)
pub const INPUT_MICROCREDITS_PER_TOKEN: u64 = 350;

/// Output token price, in micro-credits per token (1.05 credits / 1k tokens)
pub const OUTPUT_MICROCREDITS_PER_TOKEN: u64 = 1_050;

/// Micro-credits per credit
pub const MICROCREDITS_PER_CREDIT: u64 = 1_000_000;

/// Minimum interval between frame-content emissions to the presentation layer
pub const EMIT_THROTTLE_MS: u64 = 50;

/// Markup start tokens that let unfenced output count as a single frame
pub const MARKUP_START_TOKENS: [&str; 3] = ["<html", "<!DOCTYPE", "<div"];

/// Length of the prefix of a user prompt echoed back in the assistant reply
pub const PROMPT_ECHO_CHARS: usize = 50;

/// Name of the project created for users that have none
pub const DEFAULT_PROJECT_NAME: &str = "My First App";

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Header carrying the authenticated user id, set by the auth proxy
pub const USER_ID_HEADER: &str = "x-user-id";
