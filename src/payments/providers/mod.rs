pub mod mobilepay;
pub mod stripe;
pub mod swish;
pub mod vipps;

pub use mobilepay::MobilePayGateway;
pub use stripe::StripeGateway;
pub use swish::SwishGateway;
pub use vipps::VippsGateway;
