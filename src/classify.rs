//! Online vs manual classification of opportunities.
//!
//! There is no single field that says whether a lead came from the online
//! storefront or the physical counter, so the split is driven by ordered,
//! configurable rules. Each rule matches a case-insensitive regex against one
//! field of the record. The first matching rule decides the bucket; records
//! that match rules from both buckets are flagged as overlapping so the
//! dashboard can surface them instead of silently picking a side.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Opportunity;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("Invalid classification pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Bucket {
    Online,
    Manual,
}

impl Bucket {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "online" => Some(Bucket::Online),
            "manual" => Some(Bucket::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Bucket::Online => "Online",
            Bucket::Manual => "Manual",
        })
    }
}

/// Which part of the record a rule looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleField {
    /// Display label of the acquisition source.
    Source,
    /// Display label of the sales channel.
    Channel,
    Notes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRule {
    pub bucket: Bucket,
    pub field: RuleField,
    pub pattern: String,
}

impl ClassificationRule {
    fn new(bucket: Bucket, field: RuleField, pattern: &str) -> Self {
        Self {
            bucket,
            field,
            pattern: pattern.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationConfig {
    #[serde(default = "default_rules")]
    pub rules: Vec<ClassificationRule>,
    #[serde(default = "default_bucket")]
    pub default_bucket: Bucket,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
            default_bucket: default_bucket(),
        }
    }
}

fn default_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule::new(
            Bucket::Online,
            RuleField::Source,
            "redes sociais|google|olx|marketplace|whatsapp",
        ),
        ClassificationRule::new(Bucket::Online, RuleField::Channel, "loja online|whatsapp"),
        ClassificationRule::new(Bucket::Manual, RuleField::Source, "passante"),
        ClassificationRule::new(Bucket::Manual, RuleField::Channel, "balcão|telefone"),
    ]
}

fn default_bucket() -> Bucket {
    Bucket::Manual
}

/// Result of classifying one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub bucket: Bucket,
    /// Rules from both buckets matched.
    pub overlapping: bool,
}

/// Per-bucket totals for a set of records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub online_count: usize,
    pub online_sales_cents: i64,
    pub manual_count: usize,
    pub manual_sales_cents: i64,
    pub overlapping_ids: Vec<String>,
}

/// Compiled rule set.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<(Bucket, RuleField, Regex)>,
    default_bucket: Bucket,
}

impl Classifier {
    pub fn new(config: &ClassificationConfig) -> Result<Self, ClassifyError> {
        let rules = config
            .rules
            .iter()
            .map(|rule| {
                RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (rule.bucket, rule.field, re))
                    .map_err(|e| ClassifyError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            rules,
            default_bucket: config.default_bucket,
        })
    }

    pub fn classify(&self, opp: &Opportunity) -> Classification {
        let mut matched = self
            .rules
            .iter()
            .filter(|(_, field, re)| field_text(opp, *field).is_some_and(|text| re.is_match(text)))
            .map(|(bucket, _, _)| *bucket);

        let Some(first) = matched.next() else {
            return Classification {
                bucket: self.default_bucket,
                overlapping: false,
            };
        };
        let overlapping = matched.any(|bucket| bucket != first);
        Classification {
            bucket: first,
            overlapping,
        }
    }

    pub fn bucket_of(&self, opp: &Opportunity) -> Bucket {
        self.classify(opp).bucket
    }

    pub fn partition(&self, records: &[Opportunity]) -> Partition {
        let mut partition = Partition::default();
        for opp in records {
            let class = self.classify(opp);
            let amount = opp.outcome.sale_amount_cents().unwrap_or(0);
            match class.bucket {
                Bucket::Online => {
                    partition.online_count += 1;
                    partition.online_sales_cents = partition.online_sales_cents.saturating_add(amount);
                }
                Bucket::Manual => {
                    partition.manual_count += 1;
                    partition.manual_sales_cents = partition.manual_sales_cents.saturating_add(amount);
                }
            }
            if class.overlapping {
                partition.overlapping_ids.push(opp.id.clone());
            }
        }
        partition
    }
}

fn field_text(opp: &Opportunity, field: RuleField) -> Option<&str> {
    match field {
        RuleField::Source => opp.source.map(|s| s.label()),
        RuleField::Channel => opp.channel.map(|c| c.label()),
        RuleField::Notes => Some(opp.notes.as_str()).filter(|n| !n.trim().is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::form::test_drafts::{author, loss_draft, sale_draft};
    use crate::types::{Outcome, SalesChannel, Source};

    fn record(source: Option<Source>, channel: Option<SalesChannel>, notes: &str) -> Opportunity {
        let new = sale_draft("Cliente", "51999990000", "100,00")
            .into_new_opportunity(author("ana@kobber.com.br"))
            .unwrap();
        Opportunity {
            id: format!("{:?}-{:?}", source, channel),
            customer: new.customer,
            customer_type: new.customer_type,
            shop: new.shop,
            part_sought: new.part_sought,
            vehicle_model: new.vehicle_model,
            source,
            outcome: new.outcome,
            notes: notes.to_string(),
            channel,
            salesperson_email: new.author.email,
            salesperson_id: new.author.user_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn defaults() -> Classifier {
        Classifier::new(&ClassificationConfig::default()).unwrap()
    }

    #[test]
    fn test_default_rules() {
        let c = defaults();
        assert_eq!(c.bucket_of(&record(Some(Source::SocialMedia), None, "")), Bucket::Online);
        assert_eq!(c.bucket_of(&record(Some(Source::WalkIn), None, "")), Bucket::Manual);
        assert_eq!(
            c.bucket_of(&record(None, Some(SalesChannel::OnlineStore), "")),
            Bucket::Online
        );
        // Nothing matches: default bucket
        assert_eq!(c.bucket_of(&record(Some(Source::Referral), None, "")), Bucket::Manual);
    }

    #[test]
    fn test_first_match_wins_and_overlap_is_flagged() {
        let c = defaults();
        let class = c.classify(&record(Some(Source::WhatsApp), Some(SalesChannel::Counter), ""));
        assert_eq!(class.bucket, Bucket::Online);
        assert!(class.overlapping);

        let class = c.classify(&record(Some(Source::GoogleMaps), Some(SalesChannel::WhatsApp), ""));
        assert!(!class.overlapping);
    }

    #[test]
    fn test_notes_rule_is_case_insensitive() {
        let config = ClassificationConfig {
            rules: vec![ClassificationRule::new(Bucket::Online, RuleField::Notes, "mercado livre")],
            default_bucket: Bucket::Manual,
        };
        let c = Classifier::new(&config).unwrap();
        assert_eq!(
            c.bucket_of(&record(None, None, "Veio pelo MERCADO LIVRE")),
            Bucket::Online
        );
        assert_eq!(c.bucket_of(&record(None, None, "")), Bucket::Manual);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let config = ClassificationConfig {
            rules: vec![ClassificationRule::new(Bucket::Online, RuleField::Notes, "(unclosed")],
            default_bucket: Bucket::Manual,
        };
        let err = Classifier::new(&config).unwrap_err();
        assert!(matches!(err, ClassifyError::InvalidPattern { ref pattern, .. } if pattern == "(unclosed"));
    }

    #[test]
    fn test_partition_totals() {
        let c = defaults();
        let mut lost = record(Some(Source::WalkIn), None, "");
        lost.outcome = loss_draft("X", "", "price")
            .into_new_opportunity(author("ana@kobber.com.br"))
            .unwrap()
            .outcome;
        let records = vec![
            record(Some(Source::SocialMedia), None, ""),
            record(Some(Source::WhatsApp), Some(SalesChannel::Counter), ""),
            lost,
        ];
        let p = c.partition(&records);
        assert_eq!(p.online_count, 2);
        assert_eq!(p.online_sales_cents, 20_000);
        assert_eq!(p.manual_count, 1);
        assert_eq!(p.manual_sales_cents, 0);
        assert_eq!(p.overlapping_ids, vec![records[1].id.clone()]);
    }

    #[test]
    fn test_partition_sums_saturate() {
        let mut records = vec![
            record(Some(Source::WalkIn), None, ""),
            record(Some(Source::WalkIn), Some(SalesChannel::Counter), ""),
        ];
        for opp in &mut records {
            opp.outcome = Outcome::Sale {
                amount_cents: i64::MAX,
                payment_method: None,
            };
        }
        let p = defaults().partition(&records);
        assert_eq!(p.manual_count, 2);
        assert_eq!(p.manual_sales_cents, i64::MAX);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: ClassificationConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ClassificationConfig::default());

        let config: ClassificationConfig = serde_json::from_str(
            r#"{"rules":[{"bucket":"online","field":"channel","pattern":"loja"}],"defaultBucket":"online"}"#,
        )
        .unwrap();
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.default_bucket, Bucket::Online);
    }
}
