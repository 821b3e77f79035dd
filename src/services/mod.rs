pub mod escrow_service;
pub mod notification_service;
pub mod payment_orchestrator;
pub mod webhook_processor;

pub use escrow_service::{Actor, ActorRole, EscrowManager};
pub use notification_service::NotificationService;
pub use payment_orchestrator::PaymentOrchestrator;
pub use webhook_processor::{WebhookProcessor, WebhookProcessorError};
