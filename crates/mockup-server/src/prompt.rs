//! Conversation assembly for a generation.
//!
//! The instructions travel as the first user turn, followed by a canned
//! model acknowledgement, the project's transcript and finally the new
//! prompt. Reference design images ride along with the instructions.

use std::path::Path;

use base64::Engine;
use mockup_shared::types::{DeviceMode, InlineImage, Role, Tier};
use mockup_store::Message;
use tracing::{info, warn};

use crate::gemini::{Content, Part};

/// A reference image loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDesign {
    pub name: String,
    pub mime_type: &'static str,
    /// Base64 payload.
    pub data: String,
}

fn image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Load every png/jpeg/webp file in `dir`, sorted by file name. A missing
/// directory or unreadable file is logged and skipped.
pub async fn load_reference_designs(dir: &Path) -> Vec<ReferenceDesign> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            info!(dir = %dir.display(), error = %e, "no reference designs loaded");
            return Vec::new();
        }
    };

    let mut designs = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "failed to list reference designs");
                break;
            }
        };
        let path = entry.path();
        let Some(mime_type) = image_mime(&path) else {
            continue;
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => designs.push(ReferenceDesign {
                name: entry.file_name().to_string_lossy().into_owned(),
                mime_type,
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            }),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable reference design"),
        }
    }

    designs.sort_by(|a, b| a.name.cmp(&b.name));
    info!(count = designs.len(), "loaded reference designs");
    designs
}

/// Everything the instructions depend on.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub device: DeviceMode,
    pub tier: Tier,
    /// Markup of the frame being edited.
    pub current_design: Option<&'a str>,
    pub references: &'a [ReferenceDesign],
}

const REFERENCE_RULES: &str = "\
**You have been provided with reference design images that represent HIGH-QUALITY UI examples.**

Study them in detail (exact colour palette, typography and font weights, spacing, \
border radius, card and button styles, visual hierarchy) and match their quality and \
style in everything you generate. The references are your blueprint for quality.
";

const IMAGE_RULES: &str = "\
**IMAGES:**
Use only CSS gradients (preferred), Unsplash URLs of the form \
https://images.unsplash.com/photo-1506905925346-21bda4d32df4?w=800&q=80, emoji or solid \
colours. Never use placeholder services or relative paths.
Reliable Unsplash ids: abstract photo-1550684848-fac1c5b4e853, tech \
photo-1519389950473-47ba0277781c, nature photo-1470071459604-3b5ec3a7fe05, people \
photo-1438761681033-6461ffad8d80, food photo-1546069901-ba9599a7e63c.
";

/// The instruction block sent as the first user turn.
pub fn system_prompt(ctx: &PromptContext<'_>) -> String {
    let screens = ctx.tier.screens_per_flow();
    let flow = if ctx.tier == Tier::Free {
        "Include key screens like: Onboarding/Login, Home Dashboard, and Details/Settings."
    } else {
        "Include comprehensive screens like: Splash/Onboarding, Login, Home Dashboard, \
         Feature Screen 1, Feature Screen 2, and Profile/Settings."
    };

    let mut prompt = String::from(
        "You are an expert UI/UX designer and developer. You help users create beautiful, \
         modern and functional user interfaces for apps and software.\n\n",
    );

    if !ctx.references.is_empty() {
        prompt.push_str(REFERENCE_RULES);
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "**RESPONSE FORMAT:**\n\
         1. If editing (a design is provided below): respond with EXACTLY ONE ```html code block \
         containing the modified design.\n\
         2. If creating: generate a complete app flow of {screens} screens. {flow} Output each \
         screen as its own ```html code block, one after another, starting immediately with the \
         first block.\n\n\
         Each block is a complete document:\n\
         ```html\n<!-- Screen: Login -->\n<!DOCTYPE html>\n...\n```\n\n\
         **RULES:** responsive layouts (375px mobile, 1280px desktop), modern CSS, realistic \
         content, end every block with ```, no text outside the code blocks.\n\n"
    ));

    prompt.push_str(IMAGE_RULES);

    prompt.push_str(&format!(
        "\n**CURRENT CONTEXT:**\nThe user has selected **{}** mode. Prioritise that viewport \
         while keeping the design responsive.\n",
        ctx.device
    ));

    if let Some(design) = ctx.current_design {
        prompt.push_str(&format!(
            "\n**USER IS EDITING THE FOLLOWING DESIGN:**\n```html\n{design}\n```\n\
             Apply the user's request to this code, keep everything that was not asked to \
             change, and return the fully updated document.\n"
        ));
    }

    prompt
}

/// Device-specific instruction prepended to the user's prompt.
pub fn device_instruction(device: DeviceMode, editing: bool) -> String {
    let mut text = match device {
        DeviceMode::Desktop => "IMPORTANT: The user wants a DESKTOP application design (1280px+ \
             width). Create a wide layout with sidebars, headers, and data tables appropriate \
             for a large screen."
            .to_string(),
        DeviceMode::Mobile => "IMPORTANT: The user wants a MOBILE app design (375px width). \
             Create a narrow, touch-friendly layout suitable for a phone screen."
            .to_string(),
    };
    if editing {
        text.push_str(
            "\n\n**IMPORTANT: The user is EDITING the currently selected design. Apply changes \
             to the provided HTML code.**",
        );
    }
    text
}

fn acknowledgement(references: usize) -> String {
    if references > 0 {
        format!(
            "Understood! I've analyzed {references} reference design(s) and will generate HTML \
             that matches their style, colours, layouts and quality."
        )
    } else {
        "Understood! I will generate HTML code for beautiful, modern UI designs.".to_string()
    }
}

/// Attach a `data:` URL as an inline image part, skipping malformed ones.
fn push_image(parts: &mut Vec<Part>, url: Option<&str>) {
    let Some(url) = url else {
        return;
    };
    match InlineImage::from_data_url(url) {
        Ok(img) => parts.push(Part::image(img.mime_type, img.data)),
        Err(e) => warn!(error = %e, "ignoring malformed image attachment"),
    }
}

/// Build the full conversation for one generation. `history` is the
/// project's transcript before this turn; system entries are dropped.
pub fn build_conversation(
    ctx: &PromptContext<'_>,
    history: &[Message],
    prompt: &str,
    image: Option<&str>,
) -> Vec<Content> {
    let mut instructions = vec![Part::text(system_prompt(ctx))];
    instructions.extend(
        ctx.references
            .iter()
            .map(|r| Part::image(r.mime_type, r.data.clone())),
    );

    let mut contents = vec![
        Content::user(instructions),
        Content::model(acknowledgement(ctx.references.len())),
    ];

    for message in history {
        let mut parts = vec![Part::text(message.content.clone())];
        match message.role {
            Role::User => {
                push_image(&mut parts, message.image.as_deref());
                contents.push(Content::user(parts));
            }
            Role::Assistant => contents.push(Content {
                role: "model",
                parts,
            }),
            Role::System => {}
        }
    }

    let mut parts = vec![Part::text(format!(
        "{}\n\n{}",
        device_instruction(ctx.device, ctx.current_design.is_some()),
        prompt
    ))];
    push_image(&mut parts, image);
    contents.push(Content::user(parts));

    contents
}
