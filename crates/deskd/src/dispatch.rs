//! Notification delivery.
//!
//! Drains the engine's notification channel on its own task. Each event is
//! delivered once; failures are logged and counted, never retried. Ledger
//! events also feed the bundle-grant counter.

use crate::config::NotifyConfig;
use crate::metrics::DeskMetrics;
use anyhow::{Context, Result};
use desk_common::{Envelope, Notification, Requester};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where delivered events go
pub enum Delivery {
    /// Write to the daemon log only
    Log,
    Webhook { client: reqwest::Client, url: String },
}

impl Delivery {
    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        match &config.webhook_url {
            None => Ok(Delivery::Log),
            Some(url) => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(config.timeout_secs))
                    .build()
                    .context("building notification client")?;
                Ok(Delivery::Webhook {
                    client,
                    url: url.clone(),
                })
            }
        }
    }
}

/// Payload POSTed to the webhook
#[derive(Debug, Serialize)]
pub struct OutboundMessage<'a> {
    pub recipients: Vec<String>,
    pub summary: String,
    #[serde(flatten)]
    pub envelope: &'a Envelope,
}

/// Audience of an event, as addressable groups for the mailer.
pub fn recipients(notification: &Notification) -> Vec<String> {
    match notification {
        Notification::BundleAdded {
            company,
            account_manager,
            ..
        } => {
            let mut to = Vec::with_capacity(2);
            if let Some(am) = account_manager {
                to.push(format!("account_manager:{}", am));
            }
            to.push(format!("customers:{}", company));
            to
        }
        Notification::CarryForwarded { company, .. }
        | Notification::GraceConsumed { company, .. } => vec![format!("customers:{}", company)],
        Notification::ServiceRequestCreated {
            company, requester, ..
        }
        | Notification::FaultTicketCreated {
            company, requester, ..
        } => vec![requester_address(company, requester), "role:engineer".to_string()],
        Notification::TicketAssigned {
            company,
            requester,
            engineer,
            ..
        } => vec![
            requester_address(company, requester),
            format!("engineer:{}", engineer),
        ],
        Notification::TicketClosed {
            company, requester, ..
        } => vec![requester_address(company, requester)],
    }
}

/// Mail address when the ticket carried one, else the user within the company.
fn requester_address(company: &str, requester: &Requester) -> String {
    match &requester.email {
        Some(email) => format!("email:{}", email),
        None => format!("user:{}/{}", company, requester.name),
    }
}

pub fn spawn(
    rx: UnboundedReceiver<Envelope>,
    delivery: Delivery,
    metrics: DeskMetrics,
) -> JoinHandle<()> {
    tokio::spawn(run(rx, delivery, metrics))
}

async fn run(mut rx: UnboundedReceiver<Envelope>, delivery: Delivery, metrics: DeskMetrics) {
    debug!("Notification dispatcher started");
    while let Some(envelope) = rx.recv().await {
        if let Some(source) = envelope.notification.grant_source() {
            metrics.record_bundle(source.as_str());
        }
        match deliver(&delivery, &envelope).await {
            Ok(result) => metrics.record_notification(result),
            Err(e) => {
                warn!(
                    "Notification {} ({}) not delivered: {:#}",
                    envelope.id,
                    envelope.notification.summary(),
                    e
                );
                metrics.record_notification("failed");
            }
        }
    }
    debug!("Notification channel closed, dispatcher exiting");
}

async fn deliver(delivery: &Delivery, envelope: &Envelope) -> Result<&'static str> {
    let message = OutboundMessage {
        recipients: recipients(&envelope.notification),
        summary: envelope.notification.summary(),
        envelope,
    };
    match delivery {
        Delivery::Log => {
            info!(
                "[Notify] {} -> {}",
                message.summary,
                message.recipients.join(", ")
            );
            Ok("logged")
        }
        Delivery::Webhook { client, url } => {
            client
                .post(url)
                .json(&message)
                .send()
                .await
                .with_context(|| format!("POST {}", url))?
                .error_for_status()?;
            debug!("Notification {} delivered to {}", envelope.id, url);
            Ok("delivered")
        }
    }
}
