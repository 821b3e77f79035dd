use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::providers::{MobilePayGateway, StripeGateway, SwishGateway, VippsGateway};
use crate::payments::types::{PaymentMethod, ProviderName};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct GatewayFactoryConfig {
    pub enabled_providers: Vec<ProviderName>,
}

impl GatewayFactoryConfig {
    pub fn from_env() -> Self {
        let raw = std::env::var("ENABLED_PAYMENT_PROVIDERS")
            .unwrap_or_else(|_| "stripe,swish,mobilepay,vipps".to_string());
        let enabled_providers = raw
            .split(',')
            .filter_map(|name| {
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                match name.parse::<ProviderName>() {
                    Ok(provider) => Some(provider),
                    Err(_) => {
                        warn!(provider = name, "unknown payment provider in config, skipping");
                        None
                    }
                }
            })
            .collect();
        Self { enabled_providers }
    }
}

/// Builds and holds one gateway per enabled provider. Providers whose
/// credentials are missing at startup are skipped with a warning rather
/// than failing the whole service.
pub struct GatewayFactory {
    gateways: HashMap<ProviderName, Arc<dyn PaymentGateway>>,
}

impl GatewayFactory {
    pub fn from_env() -> Self {
        Self::with_config(GatewayFactoryConfig::from_env())
    }

    pub fn with_config(config: GatewayFactoryConfig) -> Self {
        let mut gateways: HashMap<ProviderName, Arc<dyn PaymentGateway>> = HashMap::new();

        for provider in &config.enabled_providers {
            let built: PaymentResult<Arc<dyn PaymentGateway>> = match provider {
                ProviderName::Stripe => {
                    StripeGateway::from_env().map(|g| Arc::new(g) as Arc<dyn PaymentGateway>)
                }
                ProviderName::Swish => {
                    SwishGateway::from_env().map(|g| Arc::new(g) as Arc<dyn PaymentGateway>)
                }
                ProviderName::MobilePay => {
                    MobilePayGateway::from_env().map(|g| Arc::new(g) as Arc<dyn PaymentGateway>)
                }
                ProviderName::Vipps => {
                    VippsGateway::from_env().map(|g| Arc::new(g) as Arc<dyn PaymentGateway>)
                }
            };

            match built {
                Ok(gateway) => {
                    info!(provider = %provider, "payment gateway initialized");
                    gateways.insert(*provider, gateway);
                }
                Err(e) => {
                    warn!(provider = %provider, error = %e, "payment gateway not available");
                }
            }
        }

        Self { gateways }
    }

    #[cfg(test)]
    pub fn with_gateways(gateways: HashMap<ProviderName, Arc<dyn PaymentGateway>>) -> Self {
        Self { gateways }
    }

    pub fn get(&self, provider: ProviderName) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or(PaymentError::ValidationError {
                message: format!("payment provider {} is not available", provider),
                field: Some("provider".to_string()),
            })
    }

    /// Which provider handles a given payment method. Cards and SEPA go
    /// through Stripe; each wallet is its own rail.
    pub fn provider_for_method(method: PaymentMethod) -> ProviderName {
        match method {
            PaymentMethod::Card | PaymentMethod::Sepa => ProviderName::Stripe,
            PaymentMethod::Swish => ProviderName::Swish,
            PaymentMethod::MobilePay => ProviderName::MobilePay,
            PaymentMethod::Vipps => ProviderName::Vipps,
        }
    }

    pub fn get_for_method(&self, method: PaymentMethod) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.get(Self::provider_for_method(method))
    }

    pub fn list_available(&self) -> Vec<ProviderName> {
        let mut providers: Vec<ProviderName> = self.gateways.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_route_to_the_expected_provider() {
        assert_eq!(
            GatewayFactory::provider_for_method(PaymentMethod::Card),
            ProviderName::Stripe
        );
        assert_eq!(
            GatewayFactory::provider_for_method(PaymentMethod::Sepa),
            ProviderName::Stripe
        );
        assert_eq!(
            GatewayFactory::provider_for_method(PaymentMethod::Swish),
            ProviderName::Swish
        );
        assert_eq!(
            GatewayFactory::provider_for_method(PaymentMethod::MobilePay),
            ProviderName::MobilePay
        );
        assert_eq!(
            GatewayFactory::provider_for_method(PaymentMethod::Vipps),
            ProviderName::Vipps
        );
    }

    #[test]
    fn missing_provider_is_a_validation_error() {
        let factory = GatewayFactory::with_gateways(HashMap::new());
        let err = factory.get(ProviderName::Stripe).unwrap_err();
        assert!(matches!(err, PaymentError::ValidationError { .. }));
    }

    #[test]
    fn config_parses_provider_list() {
        std::env::set_var("ENABLED_PAYMENT_PROVIDERS", "swish, vipps,bogus");
        let config = GatewayFactoryConfig::from_env();
        std::env::remove_var("ENABLED_PAYMENT_PROVIDERS");
        assert_eq!(
            config.enabled_providers,
            vec![ProviderName::Swish, ProviderName::Vipps]
        );
    }
}
