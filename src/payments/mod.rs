pub mod error;
pub mod factory;
pub mod gateway;
pub mod http;
pub mod providers;
pub mod types;

pub use error::{PaymentError, PaymentResult};
pub use factory::GatewayFactory;
pub use gateway::PaymentGateway;
pub use types::{Currency, PaymentMethod, PaymentStatus, ProviderName};
