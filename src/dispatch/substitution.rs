//! Placeholder substitution for channel templates.
//!
//! Replaces `[TOKEN]` occurrences with contact or campaign values. Keys are
//! case-insensitive and spaces count as underscores, so `[Your Name]` and
//! `[YOUR_NAME]` resolve alike. Unknown or empty keys are left verbatim.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::campaign::{Campaign, ChannelTemplate, Contact};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]").expect("placeholder pattern is valid"));

/// Values available to one contact's substitution.
pub struct Substitution<'a> {
    pub contact_email: &'a str,
    /// Contact store record, when one exists.
    pub contact: Option<&'a Contact>,
    pub campaign: &'a Campaign,
    pub sender_name: &'a str,
}

impl<'a> Substitution<'a> {
    pub fn new(
        contact_email: &'a str,
        contact: Option<&'a Contact>,
        campaign: &'a Campaign,
        sender_name: &'a str,
    ) -> Self {
        Self {
            contact_email,
            contact,
            campaign,
            sender_name,
        }
    }

    /// Value for a normalized key, if known and non-empty.
    fn lookup(&self, key: &str) -> Option<String> {
        let contact = self.contact;
        let text = |v: Option<&String>| v.filter(|s| !s.trim().is_empty()).cloned();
        let rate = |v: Option<f64>| v.map(|r| r.to_string());

        let value = match key {
            "contact_name" | "name" => text(contact.and_then(|c| c.name.as_ref())),
            "contact_role" | "role" => text(contact.and_then(|c| c.role.as_ref())),
            "contact_company" | "company" => text(contact.and_then(|c| c.company.as_ref())),
            "email" | "contact_email" => Some(self.contact_email.to_string()),
            "phone" => text(contact.and_then(|c| c.phone.as_ref())),
            "location" => text(contact.and_then(|c| c.location.as_ref())),
            "preferred_time" => text(contact.and_then(|c| c.preferred_time.as_ref())),
            "email_click_rate" => rate(contact.and_then(|c| c.email_click_rate)),
            "linkedin_click_rate" => rate(contact.and_then(|c| c.linkedin_click_rate)),
            "call_answer_rate" => rate(contact.and_then(|c| c.call_answer_rate)),

            "product_link" | "cta_link" | "destination_link" => text(self.campaign.product_link.as_ref()),
            "your_name" | "sender" | "from_name" | "sender_name" => Some(self.sender_name.to_string()),
            "campaign_name" => Some(self.campaign.name.clone()),
            "campaign_company" | "sender_company" => text(self.campaign.company.as_ref()),
            _ => None,
        };
        value.filter(|v| !v.is_empty())
    }

    pub fn apply_str(&self, text: &str) -> String {
        PLACEHOLDER
            .replace_all(text, |caps: &Captures| {
                let key = caps[1].trim().to_lowercase().replace(' ', "_");
                self.lookup(&key).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Deep-copy a JSON value, substituting inside every string.
    pub fn apply(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.apply_str(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.apply(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.apply(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn apply_template(&self, template: &ChannelTemplate) -> ChannelTemplate {
        match self.apply(&template.to_value()) {
            Value::Object(map) => ChannelTemplate::from(map),
            _ => template.clone(),
        }
    }
}
