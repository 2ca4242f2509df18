mod schema;

pub use schema::{
    ChatConfig, Config, CrmConfig, GatewayConfig, QueueConfig, SecurityConfig, WebhookConfig,
};
