//! Feature flags applied to every support account

use std::collections::BTreeMap;

pub const FEATURES: &[(&str, bool)] = &[
    ("agent_bots", true),
    ("agent_management", true),
    ("audit_logs", true),
    ("auto_resolve_conversations", true),
    ("automations", true),
    ("campaigns", true),
    ("canned_responses", true),
    ("captain_integration", false),
    ("channel_email", true),
    ("channel_facebook", true),
    ("channel_instagram", true),
    ("channel_website", true),
    ("chatwoot_v4", true),
    ("crm", true),
    ("crm_integration", true),
    ("custom_attributes", true),
    ("custom_reply_domain", true),
    ("custom_reply_email", true),
    ("custom_roles", true),
    ("disable_branding", true),
    ("email_continuity_on_api_channel", true),
    ("help_center", true),
    ("inbound_emails", true),
    ("inbox_management", true),
    ("integrations", true),
    ("ip_lookup", true),
    ("labels", true),
    ("linear_integration", true),
    ("macros", true),
    ("notion_integration", true),
    ("reports", true),
    ("sla", true),
    ("team_management", true),
    ("voice_recorder", true),
    ("whatsapp_campaign", true),
    ("whatsapp_embedded_signup", true),
];

/// Only the enabled flags, as sent to the platform
pub fn enabled_features() -> BTreeMap<String, bool> {
    FEATURES
        .iter()
        .filter(|(_, enabled)| *enabled)
        .map(|(name, _)| (name.to_string(), true))
        .collect()
}
