//! Engagement analytics read back from the outbound ledger.

use serde::Serialize;
use uuid::Uuid;

use crate::campaign::Channel;

/// Engagement event types counted as a delivery.
pub const DELIVERED_EVENTS: &[&str] = &["DELIVERED", "ANSWERED"];
pub const OPENED_EVENTS: &[&str] = &["OPENED", "OPEN"];
pub const CLICKED_EVENTS: &[&str] = &["CLICKED", "CLICK"];
/// Anything that means the message never reached a person.
pub const BOUNCED_EVENTS: &[&str] = &[
    "BOUNCED", "BOUNCE", "DROPPED", "FAILED", "BUSY", "NO_ANSWER", "CANCELED",
];
/// Ledger bookkeeping, not engagement.
pub const DISPATCH_EVENTS: &[&str] = &["SENT", "SKIPPED"];

/// Distinct-contact counts for one channel. Only successfully sent
/// messages are counted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelBreakdown {
    pub channel: Channel,
    pub sent: u64,
    pub delivered: u64,
    pub opened: u64,
    pub clicked: u64,
    pub answered: u64,
    pub bounced: u64,
    pub busy: u64,
    pub no_answer: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourlyActivity {
    /// UTC hour, `YYYY-MM-DDTHH:00:00`.
    pub hour: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopContact {
    pub email: String,
    pub events: u64,
    pub latest_event_type: Option<String>,
}

/// Raw aggregates as the store computes them.
#[derive(Debug, Clone, Default)]
pub struct LedgerStats {
    pub breakdown: Vec<ChannelBreakdown>,
    /// Distinct contacts with any outbound row, whatever its status.
    pub total_contacts: u64,
    pub avg_call_duration_seconds: Option<f64>,
    pub hourly_activity: Vec<HourlyActivity>,
    pub top_engaged_contacts: Vec<TopContact>,
}

/// Campaign-level analytics, totals plus percentage rates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignAnalytics {
    pub campaign_id: Uuid,
    pub total_contacts: u64,
    pub sent: u64,
    pub delivered: u64,
    pub opened: u64,
    pub clicked: u64,
    pub answered: u64,
    pub bounced: u64,
    pub busy: u64,
    pub no_answer: u64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub delivery_rate: f64,
    /// Answered calls over calls sent.
    pub answer_rate: f64,
    /// Delivered over every contacted address.
    pub reach_rate: f64,
    pub click_to_open_rate: f64,
    pub avg_call_duration_seconds: f64,
    pub hourly_activity: Vec<HourlyActivity>,
    pub top_engaged_contacts: Vec<TopContact>,
    pub breakdown_by_channel: Vec<ChannelBreakdown>,
}

impl CampaignAnalytics {
    pub fn from_ledger(campaign_id: Uuid, stats: LedgerStats) -> Self {
        let sum = |f: fn(&ChannelBreakdown) -> u64| stats.breakdown.iter().map(f).sum::<u64>();
        let sent = sum(|b| b.sent);
        let delivered = sum(|b| b.delivered);
        let opened = sum(|b| b.opened);
        let clicked = sum(|b| b.clicked);
        let answered = sum(|b| b.answered);
        let calls_sent = stats
            .breakdown
            .iter()
            .filter(|b| b.channel == Channel::Call)
            .map(|b| b.sent)
            .sum();

        Self {
            campaign_id,
            total_contacts: stats.total_contacts,
            sent,
            delivered,
            opened,
            clicked,
            answered,
            bounced: sum(|b| b.bounced),
            busy: sum(|b| b.busy),
            no_answer: sum(|b| b.no_answer),
            open_rate: pct(opened, sent),
            click_rate: pct(clicked, sent),
            delivery_rate: pct(delivered, sent),
            answer_rate: pct(answered, calls_sent),
            reach_rate: pct(delivered, stats.total_contacts),
            click_to_open_rate: pct(clicked, opened),
            avg_call_duration_seconds: stats
                .avg_call_duration_seconds
                .map(|d| (d * 10.0).round() / 10.0)
                .unwrap_or(0.0),
            hourly_activity: stats.hourly_activity,
            top_engaged_contacts: stats.top_engaged_contacts,
            breakdown_by_channel: stats.breakdown,
        }
    }
}

/// Percentage to two decimals; zero when there is nothing to divide by.
fn pct(num: u64, denom: u64) -> f64 {
    if denom == 0 {
        return 0.0;
    }
    (num as f64 / denom as f64 * 10_000.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pct_rounds_and_guards_zero() {
        assert_eq!(pct(1, 3), 33.33);
        assert_eq!(pct(2, 2), 100.0);
        assert_eq!(pct(5, 0), 0.0);
    }

    #[test]
    fn totals_and_rates_span_channels() {
        let stats = LedgerStats {
            breakdown: vec![
                ChannelBreakdown {
                    channel: Channel::Email,
                    sent: 4,
                    delivered: 3,
                    opened: 2,
                    clicked: 1,
                    bounced: 1,
                    ..Default::default()
                },
                ChannelBreakdown {
                    channel: Channel::Call,
                    sent: 2,
                    delivered: 1,
                    answered: 1,
                    bounced: 1,
                    busy: 1,
                    ..Default::default()
                },
            ],
            total_contacts: 8,
            avg_call_duration_seconds: Some(42.26),
            ..Default::default()
        };

        let analytics = CampaignAnalytics::from_ledger(Uuid::nil(), stats);
        assert_eq!(analytics.sent, 6);
        assert_eq!(analytics.delivered, 4);
        assert_eq!(analytics.bounced, 2);
        assert_eq!(analytics.open_rate, 33.33);
        assert_eq!(analytics.delivery_rate, 66.67);
        assert_eq!(analytics.answer_rate, 50.0);
        assert_eq!(analytics.reach_rate, 50.0);
        assert_eq!(analytics.click_to_open_rate, 50.0);
        assert_eq!(analytics.avg_call_duration_seconds, 42.3);
        assert_eq!(analytics.breakdown_by_channel.len(), 2);
    }

    #[test]
    fn empty_ledger_is_all_zero() {
        let analytics = CampaignAnalytics::from_ledger(Uuid::nil(), LedgerStats::default());
        assert_eq!(analytics.sent, 0);
        assert_eq!(analytics.open_rate, 0.0);
        assert_eq!(analytics.avg_call_duration_seconds, 0.0);
        assert!(analytics.breakdown_by_channel.is_empty());
    }
}
