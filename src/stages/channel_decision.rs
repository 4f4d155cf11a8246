//! Channel decision: one channel per contact from engagement scores.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::info;

use super::{Stage, StageOutput, StageResult};
use crate::campaign::{Campaign, Channel, Contact, PipelineRun, PipelineState, StageName};
use crate::error::PipelineError;

/// Highest score wins, ties go to the earlier channel in
/// [`Channel::ALL`], and a contact with no scores gets email. NaN scores
/// count as absent.
pub fn decide_channel(contact: &Contact) -> Channel {
    let scores = [
        (Channel::Email, contact.email_click_rate),
        (Channel::ProfessionalNetwork, contact.linkedin_click_rate),
        (Channel::Call, contact.call_answer_rate),
    ];

    let mut best: Option<(Channel, f64)> = None;
    for (channel, score) in scores {
        let Some(score) = score.filter(|s| !s.is_nan()) else {
            continue;
        };
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((channel, score)),
        }
    }
    best.map(|(channel, _)| channel).unwrap_or(Channel::Email)
}

/// Map each addressable contact to its channel.
pub fn decide_channels(contacts: &[Contact]) -> BTreeMap<String, Channel> {
    contacts
        .iter()
        .filter(|c| !c.email.trim().is_empty())
        .map(|c| (c.email.clone(), decide_channel(c)))
        .collect()
}

pub struct ChannelDecisionStage;

#[async_trait]
impl Stage for ChannelDecisionStage {
    fn name(&self) -> StageName {
        StageName::ChannelDecision
    }

    async fn execute(&self, campaign: &Campaign, run: &PipelineRun) -> Result<StageResult, PipelineError> {
        let contacts = run.contacts.as_deref().unwrap_or_default();
        let map = decide_channels(contacts);

        let mut counts: BTreeMap<Channel, usize> = BTreeMap::new();
        for channel in map.values() {
            *counts.entry(*channel).or_default() += 1;
        }
        info!(campaign_id = %campaign.id, contacts = map.len(), ?counts, "Channels decided");

        Ok(StageResult::advance(StageOutput::ChannelMap(map), PipelineState::ChannelDecided))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(email: Option<f64>, linkedin: Option<f64>, call: Option<f64>) -> Contact {
        Contact::new("x@y.io").with_scores(email, linkedin, call)
    }

    #[test]
    fn tie_is_broken_by_priority() {
        assert_eq!(decide_channel(&scored(Some(0.8), Some(0.8), None)), Channel::Email);
        assert_eq!(
            decide_channel(&scored(None, Some(0.5), Some(0.5))),
            Channel::ProfessionalNetwork
        );
    }

    #[test]
    fn all_null_defaults_to_email() {
        assert_eq!(decide_channel(&scored(None, None, None)), Channel::Email);
        assert_eq!(decide_channel(&scored(Some(f64::NAN), None, None)), Channel::Email);
    }

    #[test]
    fn highest_score_wins() {
        assert_eq!(
            decide_channel(&scored(Some(0.3), Some(0.9), Some(0.1))),
            Channel::ProfessionalNetwork
        );
        assert_eq!(decide_channel(&scored(None, None, Some(0.6))), Channel::Call);
        assert_eq!(decide_channel(&scored(Some(0.0), None, Some(0.01))), Channel::Call);
    }

    #[test]
    fn map_covers_every_addressable_contact() {
        let contacts = vec![
            Contact::new("a@x.io").with_scores(Some(0.9), None, None),
            Contact::new("b@x.io").with_scores(None, None, Some(0.6)),
            Contact::new("c@x.io"),
            Contact::new("  "),
        ];
        let map = decide_channels(&contacts);
        assert_eq!(map.len(), 3);
        assert_eq!(map["a@x.io"], Channel::Email);
        assert_eq!(map["b@x.io"], Channel::Call);
        assert_eq!(map["c@x.io"], Channel::Email);
    }
}
