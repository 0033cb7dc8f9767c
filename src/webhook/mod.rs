//! Inbound payment-provider webhooks.
//!
//! Provider payloads are verified and projected onto [`PaymentEvent`] before
//! anything touches the payment service.

pub mod stripe;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Paid,
    Failed,
    Expired,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub provider_event_id: String,
    pub pay_id: Uuid,
    pub provider_status: ProviderStatus,
    pub method: Option<String>,
    pub pay_date: Option<DateTime<Utc>>,
}
