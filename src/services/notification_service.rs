use serde_json::Value as JsonValue;
use tracing::{error, info};
use uuid::Uuid;

/// What a notification is about, used by clients to pick templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    PaymentSucceeded,
    PaymentFailed,
    EscrowFunded,
    EscrowReleased,
    EscrowRefunded,
    RefundIssued,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PaymentSucceeded => "payment_succeeded",
            NotificationKind::PaymentFailed => "payment_failed",
            NotificationKind::EscrowFunded => "escrow_funded",
            NotificationKind::EscrowReleased => "escrow_released",
            NotificationKind::EscrowRefunded => "escrow_refunded",
            NotificationKind::RefundIssued => "refund_issued",
        }
    }
}

/// Structured-log notification sink.
///
/// Delivery (email, push) is owned by the wider marketplace; this service
/// emits one structured event per notification and an ops channel for
/// failures a human should look at. Best-effort: callers never fail a
/// payment flow because a notification did.
#[derive(Debug, Clone, Default)]
pub struct NotificationService;

impl NotificationService {
    pub fn new() -> Self {
        Self
    }

    pub fn notify(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        title: &str,
        content: &str,
        data: Option<JsonValue>,
    ) {
        info!(
            target: "notifications",
            user_id = %user_id,
            kind = kind.as_str(),
            title = title,
            content = content,
            data = %data.unwrap_or(JsonValue::Null),
            "user notification"
        );
    }

    /// Operational alert, not tied to a user
    pub fn notify_ops(&self, subject: &str, detail: &str) {
        error!(
            target: "notifications",
            subject = subject,
            detail = detail,
            "operational alert"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_have_stable_names() {
        assert_eq!(NotificationKind::PaymentSucceeded.as_str(), "payment_succeeded");
        assert_eq!(NotificationKind::EscrowReleased.as_str(), "escrow_released");
        assert_eq!(NotificationKind::RefundIssued.as_str(), "refund_issued");
    }
}
