//! Moderation actions and the collaborators that carry them out.
//!
//! The rule engine only decides; bans and notifications are delivered by an
//! [`Enforcer`]. Delivery failures are logged by the caller and never stop
//! the pipeline.

use crate::security::Violation;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum EnforcementError {
    #[error("Ban list I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Who an alert is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Operators,
    Account(String),
    Group(String),
    /// The general public feed
    Public,
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Operators => f.write_str("operators"),
            Recipient::Account(id) => write!(f, "account:{id}"),
            Recipient::Group(id) => write!(f, "group:{id}"),
            Recipient::Public => f.write_str("public"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModerationAction {
    Ban {
        identity: String,
        reason: String,
        violation: Violation,
    },
    Alert {
        recipient: Recipient,
        message: String,
    },
}

impl ModerationAction {
    pub fn alert(recipient: Recipient, message: impl Into<String>) -> Self {
        ModerationAction::Alert {
            recipient,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Enforcer: Send + Sync {
    async fn enforce_ban(&self, identity: &str, reason: &str) -> Result<(), EnforcementError>;

    async fn notify(&self, recipient: &Recipient, message: &str) -> Result<(), EnforcementError>;
}

/// Delivers an action, logging rather than propagating failures.
pub async fn deliver(enforcer: &dyn Enforcer, action: &ModerationAction) {
    let result = match action {
        ModerationAction::Ban { identity, reason, .. } => enforcer.enforce_ban(identity, reason).await,
        ModerationAction::Alert { recipient, message } => enforcer.notify(recipient, message).await,
    };
    if let Err(err) = result {
        warn!("❌ Failed to deliver moderation action {:?}: {}", action, err);
    }
}

/// Writes every action to the log and nothing else.
#[derive(Debug, Default)]
pub struct LogEnforcer;

#[async_trait]
impl Enforcer for LogEnforcer {
    async fn enforce_ban(&self, identity: &str, reason: &str) -> Result<(), EnforcementError> {
        warn!("🔨 BAN {identity}: {reason}");
        Ok(())
    }

    async fn notify(&self, recipient: &Recipient, message: &str) -> Result<(), EnforcementError> {
        info!("📣 [{recipient}] {message}");
        Ok(())
    }
}

/// Appends bans to a server ban list as `identity // reason` lines.
/// Identities already on the list are left alone.
#[derive(Debug)]
pub struct BanListEnforcer {
    path: PathBuf,
    // Serializes read-check-append cycles
    lock: Mutex<()>,
}

impl BanListEnforcer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn is_listed(&self, identity: &str) -> Result<bool, EnforcementError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        Ok(content.lines().any(|line| {
            line.split("//")
                .next()
                .map(str::trim)
                .is_some_and(|listed| listed.eq_ignore_ascii_case(identity))
        }))
    }
}

#[async_trait]
impl Enforcer for BanListEnforcer {
    async fn enforce_ban(&self, identity: &str, reason: &str) -> Result<(), EnforcementError> {
        let _guard = self.lock.lock().await;
        if self.is_listed(identity).await? {
            info!("🔨 {identity} is already on the ban list");
            return Ok(());
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{identity} // {reason}\n").as_bytes()).await?;
        file.flush().await?;
        warn!("🔨 Banned {identity}: {reason}");
        Ok(())
    }

    async fn notify(&self, recipient: &Recipient, message: &str) -> Result<(), EnforcementError> {
        info!("📣 [{recipient}] {message}");
        Ok(())
    }
}

/// Keeps every delivered action in memory.
#[derive(Debug, Default)]
pub struct RecordingEnforcer {
    bans: Mutex<Vec<(String, String)>>,
    alerts: Mutex<Vec<(Recipient, String)>>,
}

impl RecordingEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bans(&self) -> Vec<(String, String)> {
        self.bans.lock().await.clone()
    }

    pub async fn alerts(&self) -> Vec<(Recipient, String)> {
        self.alerts.lock().await.clone()
    }
}

#[async_trait]
impl Enforcer for RecordingEnforcer {
    async fn enforce_ban(&self, identity: &str, reason: &str) -> Result<(), EnforcementError> {
        self.bans
            .lock()
            .await
            .push((identity.to_string(), reason.to_string()));
        Ok(())
    }

    async fn notify(&self, recipient: &Recipient, message: &str) -> Result<(), EnforcementError> {
        self.alerts
            .lock()
            .await
            .push((recipient.clone(), message.to_string()));
        Ok(())
    }
}
