//! Billing provider webhook.
//!
//! Only `subscription.created` tops up a balance: the provider also sends
//! `updated` and `active` events for the same subscription, and acting on
//! those would credit the user several times. Signature verification
//! happens in front of this service.

use axum::extract::State;
use axum::Json;
use mockup_shared::types::Tier;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::ServerError;

const SUBSCRIPTION_CREATED: &str = "subscription.created";

/// Tier and credit grant bought by one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub tier: Tier,
    pub credits: u64,
}

const PLANS: &[(&str, Plan)] = &[
    // Starter: monthly, annual
    ("40ff680b-f37e-4cf3-b8a0-685d9de81ee1", Plan { tier: Tier::Starter, credits: 300 }),
    ("5e2abe25-9930-4f51-a205-c903bb215e52", Plan { tier: Tier::Starter, credits: 3_600 }),
    // Pro
    ("9f0c9f0c-82fb-4d58-b251-3c55fb829fab", Plan { tier: Tier::Pro, credits: 1_000 }),
    ("da212809-224c-4fd4-be12-427e128bc8b2", Plan { tier: Tier::Pro, credits: 12_000 }),
    // Ultimate
    ("3231f237-ba27-4773-b87c-cfa7189a12e5", Plan { tier: Tier::Ultimate, credits: 2_500 }),
    ("760a85ce-a8bd-4d32-ade5-7beec1f2a95e", Plan { tier: Tier::Ultimate, credits: 30_000 }),
];

pub fn plan_for(product_id: &str) -> Option<Plan> {
    PLANS
        .iter()
        .find(|(id, _)| *id == product_id)
        .map(|(_, plan)| *plan)
}

#[derive(Debug, Deserialize)]
pub struct BillingEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Subscription,
}

#[derive(Debug, Default, Deserialize)]
pub struct Subscription {
    pub product_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub user: Option<Contact>,
    pub customer: Option<Contact>,
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Metadata {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Contact {
    pub email: Option<String>,
}

impl Subscription {
    fn email(&self) -> Option<&str> {
        self.user
            .as_ref()
            .and_then(|c| c.email.as_deref())
            .or_else(|| self.customer.as_ref().and_then(|c| c.email.as_deref()))
            .or(self.email.as_deref())
    }
}

pub async fn billing(
    State(state): State<AppState>,
    Json(event): Json<BillingEvent>,
) -> Result<Json<Value>, ServerError> {
    info!(kind = %event.kind, "billing event received");
    if event.kind != SUBSCRIPTION_CREATED {
        return Ok(Json(json!({ "received": true })));
    }

    let sub = event.data;
    let db = state.db.lock().await;

    let mut user = sub
        .metadata
        .user_id
        .as_deref()
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok());
    if user.is_none() {
        if let Some(email) = sub.email() {
            user = db.find_profile_by_email(email)?.map(|p| p.id);
        }
    }
    let Some(user) = user else {
        warn!(product = ?sub.product_id, "could not identify the subscriber");
        return Err(ServerError::BadRequest("User identification failed".into()));
    };

    let product = sub.product_id.as_deref().unwrap_or_default();
    let Some(plan) = plan_for(product) else {
        // Acknowledge so the provider stops retrying.
        warn!(product, user = %user, "unknown product, no credits granted");
        return Ok(Json(json!({ "received": true, "warning": "Unknown product" })));
    };

    let balance = db
        .top_up(user, plan.credits, plan.tier)
        .map_err(ServerError::missing("User"))?;

    info!(user = %user, tier = %plan.tier, granted = plan.credits, balance, "subscription credited");
    Ok(Json(json!({ "success": true })))
}
