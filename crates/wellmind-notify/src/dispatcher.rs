use crate::catalog::{interpolate, TemplateCatalog};
use crate::error::NotifyError;
use crate::gateway::{is_valid_token, PushGateway, PushMessage, TicketStatus};
use crate::Context;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use wellmind_common::types::NotificationRecord;
use wellmind_storage::{DeviceStore, NotificationStore, UserStore};

/// The outcome of one logical send (one user, one template, any
/// number of devices).
#[derive(Debug, Clone, Default)]
pub struct DeliveryReport {
    pub success: bool,
    pub sent: u32,
    pub failed: u32,
    pub error: Option<String>,
}

impl DeliveryReport {
    fn failure(error: String) -> Self {
        Self {
            success: false,
            sent: 0,
            failed: 0,
            error: Some(error),
        }
    }
}

/// Renders templates, batches messages to the push gateway, reconciles
/// per-message tickets, and persists exactly one notification record
/// per logical send. Sole writer of `NotificationRecord.sent_at`.
pub struct Dispatcher {
    users: Arc<dyn UserStore>,
    devices: Arc<dyn DeviceStore>,
    history: Arc<dyn NotificationStore>,
    gateway: Arc<dyn PushGateway>,
    catalog: Arc<TemplateCatalog>,
}

impl Dispatcher {
    pub fn new(
        users: Arc<dyn UserStore>,
        devices: Arc<dyn DeviceStore>,
        history: Arc<dyn NotificationStore>,
        gateway: Arc<dyn PushGateway>,
        catalog: Arc<TemplateCatalog>,
    ) -> Self {
        Self {
            users,
            devices,
            history,
            gateway,
            catalog,
        }
    }

    /// Sends one template to every active device of a user.
    ///
    /// Persistence or lookup failures come back as `success = false`
    /// with an error string; they never escape as panics or cross a
    /// job tick boundary as errors.
    pub async fn send_to_user(
        &self,
        user_id: &str,
        template_id: &str,
        context: &Context,
    ) -> DeliveryReport {
        match self.try_send(user_id, template_id, context).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(user_id, template_id, error = %e, "Send failed");
                DeliveryReport::failure(e.to_string())
            }
        }
    }

    async fn try_send(
        &self,
        user_id: &str,
        template_id: &str,
        context: &Context,
    ) -> Result<DeliveryReport> {
        let Some(template) = self.catalog.get(template_id) else {
            // Configuration error: no record is written.
            return Ok(DeliveryReport::failure(
                NotifyError::UnknownTemplate(template_id.to_string()).to_string(),
            ));
        };

        let devices = self.devices.list_active(user_id)?;
        if devices.is_empty() {
            // Nothing to deliver to is not a failure, and it leaves no
            // record behind.
            return Ok(DeliveryReport {
                success: true,
                ..Default::default()
            });
        }

        let display_name = self
            .users
            .get(user_id)?
            .map(|u| u.display_name)
            .unwrap_or_else(|| "there".to_string());

        // The caller's context wins over the resolved display name.
        let mut render_ctx = context.clone();
        render_ctx
            .entry("userName".to_string())
            .or_insert_with(|| serde_json::Value::String(display_name));

        let title = interpolate(&template.title, &render_ctx);
        let body = interpolate(&template.body, &render_ctx);

        let messages: Vec<PushMessage> = devices
            .iter()
            .filter(|d| {
                let valid = is_valid_token(&d.token);
                if !valid {
                    tracing::warn!(user_id, token = %d.token, "Skipping malformed device token");
                }
                valid
            })
            .map(|d| PushMessage {
                to: d.token.clone(),
                title: title.clone(),
                body: body.clone(),
                data: template.data.clone(),
                sound: template.sound.clone(),
                priority: template.priority,
            })
            .collect();

        let (sent, failed) = self.deliver_chunks(user_id, &messages).await;

        let now = Utc::now();
        let record = NotificationRecord {
            id: wellmind_common::id::next_id(),
            user_id: user_id.to_string(),
            title,
            body,
            notification_type: template.id.clone(),
            sent_at: (sent > 0).then_some(now),
            read_at: None,
            created_at: now,
        };
        self.history.create(&record)?;

        Ok(DeliveryReport {
            success: true,
            sent,
            failed,
            error: None,
        })
    }

    /// Partitions messages into gateway-sized chunks and reconciles
    /// the returned tickets. A chunk-level transport failure fails
    /// every message in that chunk without aborting the rest.
    async fn deliver_chunks(&self, user_id: &str, messages: &[PushMessage]) -> (u32, u32) {
        let chunk_size = self.gateway.max_batch_size().max(1);
        let mut sent = 0u32;
        let mut failed = 0u32;

        for chunk in messages.chunks(chunk_size) {
            match self.gateway.send_batch(chunk).await {
                Ok(tickets) => {
                    for (message, ticket) in chunk.iter().zip(&tickets) {
                        match ticket.status {
                            TicketStatus::Ok => sent += 1,
                            TicketStatus::Error => {
                                failed += 1;
                                tracing::warn!(
                                    user_id,
                                    token = %message.to,
                                    error = ticket.message.as_deref().unwrap_or("unknown"),
                                    "Push ticket reported an error"
                                );
                            }
                        }
                    }
                    // A gateway that returns fewer tickets than
                    // messages leaves the tail unaccounted; those
                    // messages count as failed, not lost.
                    if tickets.len() < chunk.len() {
                        let missing = (chunk.len() - tickets.len()) as u32;
                        failed += missing;
                        tracing::warn!(
                            user_id,
                            missing,
                            "Gateway returned fewer tickets than messages"
                        );
                    }
                }
                Err(e) => {
                    failed += chunk.len() as u32;
                    tracing::warn!(
                        user_id,
                        chunk_len = chunk.len(),
                        error = %e,
                        "Push gateway chunk failed"
                    );
                }
            }
        }

        (sent, failed)
    }

    /// Fans out `send_to_user` over many users, aggregating totals.
    /// Sequential for now; the fan-out is independent per user and
    /// could be parallelized behind a concurrency limit.
    pub async fn send_to_users(
        &self,
        user_ids: &[String],
        template_id: &str,
        context: &Context,
    ) -> DeliveryReport {
        let mut total = DeliveryReport {
            success: true,
            ..Default::default()
        };
        for user_id in user_ids {
            let report = self.send_to_user(user_id, template_id, context).await;
            total.sent += report.sent;
            total.failed += report.failed;
            if !report.success {
                total.success = false;
                if total.error.is_none() {
                    total.error = report.error;
                }
            }
        }
        total
    }
}
