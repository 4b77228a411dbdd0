//! Fire-and-forget notifications.
//!
//! The core hands a `Notification` to a `NotificationQueue` and moves on.
//! `enqueue` is synchronous and never waits on I/O; delivery, timeouts and
//! retries belong to whatever drains the queue.
//!
//! `OutboxQueue` pushes onto an unbounded channel read by a spawned writer
//! that inserts rows into `notification_outbox` with status `pending`. An
//! external worker picks them up from there.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{error, info, Instrument};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Welcome,
    WelcomeBack,
    PasswordChanged,
    /// Carries a reset token.
    PasswordResetRequested,
    PasswordReset,
    /// Carries a verification token.
    VerifyEmail,
}

impl NotificationKind {
    /// Template name stored in the outbox row.
    #[must_use]
    pub const fn template(self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::WelcomeBack => "welcome_back",
            Self::PasswordChanged => "password_changed",
            Self::PasswordResetRequested => "password_reset_requested",
            Self::PasswordReset => "password_reset",
            Self::VerifyEmail => "verify_email",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub to_email: String,
    pub first_name: String,
    /// Single-use token the recipient has to present back.
    pub token: Option<String>,
}

impl Notification {
    #[must_use]
    pub fn new(kind: NotificationKind, to_email: &str, first_name: &str) -> Self {
        Self {
            kind,
            to_email: to_email.to_string(),
            first_name: first_name.to_string(),
            token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: String) -> Self {
        self.token = Some(token);
        self
    }

    fn payload(&self) -> serde_json::Value {
        let mut payload = json!({
            "first_name": self.first_name,
            "kind": self.kind,
        });
        if let Some(token) = &self.token {
            payload["token"] = json!(token);
        }
        payload
    }
}

pub trait NotificationQueue: Send + Sync {
    /// Hand off a notification. Must not block.
    fn enqueue(&self, notification: Notification);
}

/// Logs notifications instead of queueing them.
#[derive(Clone, Debug, Default)]
pub struct LogQueue;

impl NotificationQueue for LogQueue {
    fn enqueue(&self, notification: Notification) {
        info!(
            to_email = %notification.to_email,
            template = notification.kind.template(),
            "notification enqueue stub"
        );
    }
}

#[derive(Clone, Debug)]
pub struct OutboxQueue {
    tx: mpsc::UnboundedSender<Notification>,
}

impl OutboxQueue {
    /// Start the outbox writer and return the queue handle feeding it.
    /// The writer stops once every handle is dropped.
    #[must_use]
    pub fn spawn(pool: PgPool) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_outbox_writer(pool, rx));
        (Self { tx }, handle)
    }
}

impl NotificationQueue for OutboxQueue {
    fn enqueue(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            error!("notification outbox writer is gone, dropping notification");
        }
    }
}

async fn run_outbox_writer(pool: PgPool, mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        if let Err(err) = insert_outbox_row(&pool, &notification).await {
            error!(
                template = notification.kind.template(),
                "failed to write notification outbox row: {err:#}"
            );
        }
    }
    info!("notification outbox writer stopped");
}

async fn insert_outbox_row(pool: &PgPool, notification: &Notification) -> Result<()> {
    let query = r"
        INSERT INTO notification_outbox
            (id, to_email, template, payload_json)
        VALUES ($1, $2, $3, $4)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(Uuid::now_v7())
        .bind(&notification.to_email)
        .bind(notification.kind.template())
        .bind(notification.payload())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert notification outbox row")?;
    Ok(())
}
