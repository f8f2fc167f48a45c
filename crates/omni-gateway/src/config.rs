//! Per-channel adapter configs aggregated into one `GatewayConfig`, loaded
//! from the process environment. Mirrors `GatewayConfig.from_env()` in the
//! source one env var at a time, the same style `fc-config::loader`
//! applies overrides on top of a `Default::default()` base.

use omni_adapters::{DiscordConfig, EmailConfig, SlackConfig, TelegramConfig, WebhookConfig, WhatsAppConfig};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub max_retries: u32,
    pub retry_delay_secs: f64,
    pub template_dir: Option<String>,
    pub db_path: String,

    pub telegram: TelegramConfig,
    pub whatsapp: WhatsAppConfig,
    pub discord: DiscordConfig,
    pub slack: SlackConfig,
    pub email: EmailConfig,
    pub webhook: WebhookConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            api_key: "change-me".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8900,
            debug: false,
            max_retries: 3,
            retry_delay_secs: 1.0,
            template_dir: None,
            db_path: "omni.db".to_string(),
            telegram: TelegramConfig {
                token: String::new(),
                parse_mode: "Markdown".to_string(),
                disable_preview: true,
            },
            whatsapp: WhatsAppConfig {
                token: String::new(),
                phone_id: String::new(),
                api_version: "v19.0".to_string(),
            },
            discord: DiscordConfig::default(),
            slack: SlackConfig::default(),
            email: EmailConfig {
                smtp_host: String::new(),
                smtp_port: 587,
                smtp_user: String::new(),
                smtp_pass: String::new(),
                smtp_from: String::new(),
                use_tls: true,
            },
            webhook: WebhookConfig { secret: String::new(), timeout_secs: 30 },
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let mut config = GatewayConfig::default();

        if let Ok(v) = std::env::var("OMNI_API_KEY") {
            config.api_key = v;
        }
        if let Ok(v) = std::env::var("OMNI_HOST") {
            config.host = v;
        }
        if let Ok(v) = std::env::var("OMNI_PORT") {
            if let Ok(port) = v.parse() {
                config.port = port;
            }
        }
        if let Ok(v) = std::env::var("OMNI_DEBUG") {
            config.debug = v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("OMNI_MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                config.max_retries = n;
            }
        }
        if let Ok(v) = std::env::var("OMNI_RETRY_DELAY") {
            if let Ok(n) = v.parse() {
                config.retry_delay_secs = n;
            }
        }
        if let Ok(v) = std::env::var("OMNI_TEMPLATE_DIR") {
            config.template_dir = Some(v);
        }
        if let Ok(v) = std::env::var("OMNI_DB_PATH") {
            config.db_path = v;
        }

        if let Ok(v) = std::env::var("TELEGRAM_TOKEN") {
            config.telegram.token = v;
        }
        if let Ok(v) = std::env::var("TELEGRAM_PARSE_MODE") {
            config.telegram.parse_mode = v;
        }
        if let Ok(v) = std::env::var("TELEGRAM_DISABLE_PREVIEW") {
            config.telegram.disable_preview = v.eq_ignore_ascii_case("true");
        }

        if let Ok(v) = std::env::var("WHATSAPP_TOKEN") {
            config.whatsapp.token = v;
        }
        if let Ok(v) = std::env::var("WHATSAPP_PHONE_ID") {
            config.whatsapp.phone_id = v;
        }
        if let Ok(v) = std::env::var("WHATSAPP_API_VERSION") {
            config.whatsapp.api_version = v;
        }

        if let Ok(v) = std::env::var("DISCORD_WEBHOOK") {
            config.discord.webhook_url = v;
        }
        if let Ok(v) = std::env::var("SLACK_WEBHOOK") {
            config.slack.webhook_url = v;
        }

        if let Ok(v) = std::env::var("SMTP_HOST") {
            config.email.smtp_host = v;
        }
        if let Ok(v) = std::env::var("SMTP_PORT") {
            if let Ok(n) = v.parse() {
                config.email.smtp_port = n;
            }
        }
        if let Ok(v) = std::env::var("SMTP_USER") {
            config.email.smtp_user = v;
        }
        if let Ok(v) = std::env::var("SMTP_PASS") {
            config.email.smtp_pass = v;
        }
        if let Ok(v) = std::env::var("SMTP_FROM") {
            config.email.smtp_from = v;
        }
        if let Ok(v) = std::env::var("SMTP_USE_TLS") {
            config.email.use_tls = v.eq_ignore_ascii_case("true");
        }

        if let Ok(v) = std::env::var("WEBHOOK_SECRET") {
            config.webhook.secret = v;
        }
        if let Ok(v) = std::env::var("WEBHOOK_TIMEOUT") {
            if let Ok(n) = v.parse() {
                config.webhook.timeout_secs = n;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_source_constants() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 8900);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_secs, 1.0);
        assert_eq!(config.api_key, "change-me");
    }
}
