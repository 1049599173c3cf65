use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use tradein_core::flows::EntityKind;

/// Payload handed to the notification service when a quote or bulk quote is paid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidNotice {
    pub entity: EntityKind,
    pub entity_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub correlation_id: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait PaidNotifier: Send + Sync {
    async fn notify_paid(&self, notice: &PaidNotice) -> Result<(), NotifyError>;
}

/// Default notifier: records the notice as a structured log event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl PaidNotifier for TracingNotifier {
    async fn notify_paid(&self, notice: &PaidNotice) -> Result<(), NotifyError> {
        info!(
            event_name = "notification.paid",
            correlation_id = %notice.correlation_id,
            entity = notice.entity.as_str(),
            entity_id = %notice.entity_id,
            amount = %notice.amount,
            currency = %notice.currency,
            "paid notification dispatched"
        );
        Ok(())
    }
}

/// Keeps every notice in memory; can be switched to fail for error-path tests.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<PaidNotice>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self { notices: Arc::default(), failing: Arc::new(Mutex::new(true)) }
    }

    pub fn notices(&self) -> Vec<PaidNotice> {
        match self.notices.lock() {
            Ok(notices) => notices.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn is_failing(&self) -> bool {
        match self.failing.lock() {
            Ok(failing) => *failing,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl PaidNotifier for RecordingNotifier {
    async fn notify_paid(&self, notice: &PaidNotice) -> Result<(), NotifyError> {
        if self.is_failing() {
            return Err(NotifyError("notification endpoint unreachable".to_string()));
        }
        match self.notices.lock() {
            Ok(mut notices) => notices.push(notice.clone()),
            Err(poisoned) => poisoned.into_inner().push(notice.clone()),
        }
        Ok(())
    }
}
