//! Outbound email with provider fallback.
//!
//! Delivery is best-effort everywhere: callers get a `Delivery` report and never an error.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::model::Reservation;
use crate::observability;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
    /// Structured copy of what the template rendered, kept for audit and the simulator.
    pub context: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub success: bool,
    pub provider: String,
}

#[derive(Debug)]
pub enum MailError {
    Http(reqwest::Error),
    Rejected { status: u16, body: String },
}

impl fmt::Display for MailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailError::Http(e) => write!(f, "mail transport error: {e}"),
            MailError::Rejected { status, body } => {
                write!(f, "mail provider rejected message ({status}): {body}")
            }
        }
    }
}

impl std::error::Error for MailError {}

impl From<reqwest::Error> for MailError {
    fn from(e: reqwest::Error) -> Self {
        MailError::Http(e)
    }
}

/// One way of getting a message out.
#[async_trait]
pub trait MailProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, from: &str, email: &Email) -> Result<(), MailError>;
}

/// What the reaper and admin surface talk to.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Delivery;
}

/// JSON mail API behind a bearer key: `POST {from, to: [..], subject, html}`.
pub struct HttpMailProvider {
    name: String,
    url: String,
    api_key: String,
    client: Client,
}

impl HttpMailProvider {
    pub fn new(name: impl Into<String>, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            name: name.into(),
            url: url.into(),
            api_key: api_key.into(),
            client,
        }
    }
}

#[async_trait]
impl MailProvider for HttpMailProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, from: &str, email: &Email) -> Result<(), MailError> {
        let res = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": from,
                "to": [email.to],
                "subject": email.subject,
                "html": email.html,
            }))
            .send()
            .await?;
        if res.status().is_success() {
            return Ok(());
        }
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Err(MailError::Rejected { status, body })
    }
}

/// Last resort: keeps the message in memory and logs it. Always succeeds.
/// Only the most recent `SIMULATED_OUTBOX_LEN` messages are kept.
#[derive(Default)]
pub struct SimulatedMailProvider {
    outbox: Mutex<VecDeque<Email>>,
}

pub const SIMULATED_OUTBOX_LEN: usize = 100;

impl SimulatedMailProvider {
    pub fn sent(&self) -> Vec<Email> {
        self.outbox
            .lock()
            .map(|outbox| outbox.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MailProvider for SimulatedMailProvider {
    fn name(&self) -> &str {
        "simulation"
    }

    async fn deliver(&self, _from: &str, email: &Email) -> Result<(), MailError> {
        tracing::info!(to = %email.to, subject = %email.subject, "simulated email delivery");
        if let Ok(mut outbox) = self.outbox.lock() {
            if outbox.len() == SIMULATED_OUTBOX_LEN {
                outbox.pop_front();
            }
            outbox.push_back(email.clone());
        }
        Ok(())
    }
}

/// Try each provider in order and report the first that accepted the message.
pub struct FallbackMailer {
    from: String,
    providers: Vec<Arc<dyn MailProvider>>,
}

impl FallbackMailer {
    pub fn new(from: impl Into<String>, providers: Vec<Arc<dyn MailProvider>>) -> Self {
        Self {
            from: from.into(),
            providers,
        }
    }
}

#[async_trait]
impl Mailer for FallbackMailer {
    async fn send(&self, email: Email) -> Delivery {
        for provider in &self.providers {
            match provider.deliver(&self.from, &email).await {
                Ok(()) => {
                    metrics::counter!(
                        observability::MAIL_DELIVERIES_TOTAL,
                        "provider" => provider.name().to_string(),
                        "status" => "ok"
                    )
                    .increment(1);
                    return Delivery {
                        success: true,
                        provider: provider.name().to_string(),
                    };
                }
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "email provider failed");
                    metrics::counter!(
                        observability::MAIL_DELIVERIES_TOTAL,
                        "provider" => provider.name().to_string(),
                        "status" => "error"
                    )
                    .increment(1);
                }
            }
        }
        Delivery {
            success: false,
            provider: "none".to_string(),
        }
    }
}

/// Bilingual (French, then English) notice sent when an unpaid cash reservation is
/// cancelled.
pub fn cancellation_email(r: &Reservation, grace_days: i64) -> Email {
    let name = escape_html(&r.contact.full_name);
    let subject = format!(
        "Réservation annulée / Reservation cancelled ({} {} → {})",
        r.space_type, r.start_date, r.end_date
    );
    let html = format!(
        "<p>Bonjour {name},</p>\
         <p>Votre réservation <strong>{space}</strong> du {start} au {end} a été annulée \
         car le paiement en espèces n'a pas été reçu dans les {grace_days} jours suivant la \
         réservation.</p>\
         <p>Montant : {amount}</p>\
         <hr/>\
         <p>Hello {name},</p>\
         <p>Your <strong>{space}</strong> reservation from {start} to {end} has been cancelled \
         because the cash payment was not received within {grace_days} days of booking.</p>\
         <p>Amount: {amount}</p>\
         <p>Ref: {id}</p>",
        space = r.space_type,
        start = r.start_date,
        end = r.end_date,
        amount = r.amount,
        id = r.id,
    );
    Email {
        to: r.contact.email.clone(),
        subject,
        html,
        context: serde_json::json!({
            "reservation_id": r.id.to_string(),
            "space_type": r.space_type.as_str(),
            "start_date": r.start_date.to_string(),
            "end_date": r.end_date.to_string(),
            "amount": r.amount,
            "reason": "cash_payment_timeout",
        }),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
