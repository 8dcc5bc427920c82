//! Payment channels and their configuration.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::Payment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentChannel {
    WeChat,
    Alipay,
    Balance,
}

impl PaymentChannel {
    pub const ALL: [PaymentChannel; 3] = [
        PaymentChannel::WeChat,
        PaymentChannel::Alipay,
        PaymentChannel::Balance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentChannel::WeChat => "wechat",
            PaymentChannel::Alipay => "alipay",
            PaymentChannel::Balance => "balance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for PaymentChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Sandbox => "sandbox",
            Environment::Production => "production",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sandbox" => Some(Environment::Sandbox),
            "production" => Some(Environment::Production),
            _ => None,
        }
    }
}

/// Merchant configuration for one channel in one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub channel: PaymentChannel,
    pub name: String,
    pub app_id: String,
    pub notify_url: String,
    pub return_url: String,
    pub environment: Environment,
    pub enabled: bool,
}

/// What the client needs to hand the user over to the channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayParams {
    pub pay_url: Option<String>,
    pub qr_code: Option<String>,
    pub params: BTreeMap<String, String>,
}

/// Channel configurations for the active environment.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    environment: Environment,
    configs: HashMap<PaymentChannel, ChannelConfig>,
}

impl ChannelRegistry {
    /// Every channel enabled with placeholder merchant ids.
    pub fn with_defaults(environment: Environment, notify_url: &str) -> Self {
        let configs = PaymentChannel::ALL
            .into_iter()
            .map(|channel| {
                let config = ChannelConfig {
                    channel,
                    name: channel.as_str().to_string(),
                    app_id: format!("{}-{}-app", channel.as_str(), environment.as_str()),
                    notify_url: notify_url.to_string(),
                    return_url: String::new(),
                    environment,
                    enabled: true,
                };
                (channel, config)
            })
            .collect();
        Self {
            environment,
            configs,
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Replaces a channel's configuration.
    pub fn with_config(mut self, config: ChannelConfig) -> Self {
        self.configs.insert(config.channel, config);
        self
    }

    /// The enabled configuration for `channel` in this environment.
    pub fn get(&self, channel: PaymentChannel) -> Option<&ChannelConfig> {
        self.configs
            .get(&channel)
            .filter(|c| c.enabled && c.environment == self.environment)
    }
}

/// Synthesizes the client-side parameters for a new payment.
///
/// Real gateways sign these server-side; sandbox values are placeholders.
pub fn pay_params(payment: &Payment, config: &ChannelConfig) -> PayParams {
    let no = &payment.payment_no;
    let amount = payment.amount.to_string();
    match config.channel {
        PaymentChannel::WeChat => PayParams {
            pay_url: Some(format!(
                "https://pay.weixin.qq.com/{}?payment_no={no}&amount={amount}&order_no={}",
                config.environment.as_str(),
                payment.order_no
            )),
            qr_code: Some(format!("weixin://wxpay/bizpayurl?pr={no}")),
            params: BTreeMap::from([
                ("appId".to_string(), config.app_id.clone()),
                ("timeStamp".to_string(), payment.created_at.timestamp().to_string()),
                ("nonceStr".to_string(), payment.id.to_string()),
                ("package".to_string(), format!("prepay_id={no}")),
                ("signType".to_string(), "RSA".to_string()),
            ]),
        },
        PaymentChannel::Alipay => PayParams {
            pay_url: Some(format!(
                "https://openapi.alipay.com/gateway.do?env={}&payment_no={no}&amount={amount}&order_no={}",
                config.environment.as_str(),
                payment.order_no
            )),
            qr_code: Some(format!("https://qr.alipay.com/{no}")),
            params: BTreeMap::from([
                ("app_id".to_string(), config.app_id.clone()),
                ("method".to_string(), "alipay.trade.app.pay".to_string()),
                ("charset".to_string(), "utf-8".to_string()),
                ("sign_type".to_string(), "RSA2".to_string()),
                ("version".to_string(), "1.0".to_string()),
                (
                    "biz_content".to_string(),
                    serde_json::json!({
                        "out_trade_no": no,
                        "total_amount": amount,
                        "subject": format!("Order {}", payment.order_no),
                    })
                    .to_string(),
                ),
            ]),
        },
        PaymentChannel::Balance => PayParams {
            pay_url: None,
            qr_code: None,
            params: BTreeMap::from([
                ("payment_no".to_string(), no.clone()),
                ("amount".to_string(), amount),
                ("channel".to_string(), "balance".to_string()),
            ]),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        for channel in PaymentChannel::ALL {
            assert_eq!(PaymentChannel::parse(channel.as_str()), Some(channel));
        }
        assert_eq!(PaymentChannel::parse("paypal"), None);
        assert_eq!(
            serde_json::to_string(&PaymentChannel::WeChat).unwrap(),
            "\"wechat\""
        );
    }

    #[test]
    fn test_registry_hides_disabled_and_foreign_environment() {
        let registry = ChannelRegistry::with_defaults(Environment::Sandbox, "http://cb")
            .with_config(ChannelConfig {
                channel: PaymentChannel::Balance,
                name: "balance".into(),
                app_id: String::new(),
                notify_url: String::new(),
                return_url: String::new(),
                environment: Environment::Sandbox,
                enabled: false,
            })
            .with_config(ChannelConfig {
                channel: PaymentChannel::Alipay,
                name: "alipay".into(),
                app_id: "prod".into(),
                notify_url: String::new(),
                return_url: String::new(),
                environment: Environment::Production,
                enabled: true,
            });

        assert!(registry.get(PaymentChannel::WeChat).is_some());
        assert!(registry.get(PaymentChannel::Balance).is_none());
        assert!(registry.get(PaymentChannel::Alipay).is_none());
    }
}
