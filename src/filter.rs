//! Record selection for the admin table and the exports.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::classify::{Bucket, Classifier};
use crate::stats::MonthKey;
use crate::types::Opportunity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeFilter {
    Sale,
    Loss,
}

impl OutcomeFilter {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "sale" | "venda" => Some(OutcomeFilter::Sale),
            "loss" | "perda" => Some(OutcomeFilter::Loss),
            _ => None,
        }
    }
}

/// Every field is optional; an empty filter selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpportunityFilter {
    pub month: Option<MonthKey>,
    /// Salesperson email, case-insensitive.
    pub salesperson: Option<String>,
    pub outcome: Option<OutcomeFilter>,
    pub bucket: Option<Bucket>,
}

impl OpportunityFilter {
    pub fn for_month(month: MonthKey) -> Self {
        Self {
            month: Some(month),
            ..Self::default()
        }
    }

    pub fn matches(&self, opp: &Opportunity, tz: Tz, classifier: &Classifier) -> bool {
        if let Some(month) = self.month {
            if !month.contains(&opp.created_at, tz) {
                return false;
            }
        }
        if let Some(seller) = &self.salesperson {
            if !opp.salesperson_email.eq_ignore_ascii_case(seller.trim()) {
                return false;
            }
        }
        match self.outcome {
            Some(OutcomeFilter::Sale) if !opp.outcome.is_sale() => return false,
            Some(OutcomeFilter::Loss) if opp.outcome.is_sale() => return false,
            _ => {}
        }
        if let Some(bucket) = self.bucket {
            if classifier.bucket_of(opp) != bucket {
                return false;
            }
        }
        true
    }

    /// Keep the matching records, preserving their order.
    pub fn apply(
        &self,
        records: Vec<Opportunity>,
        tz: Tz,
        classifier: &Classifier,
    ) -> Vec<Opportunity> {
        records
            .into_iter()
            .filter(|opp| self.matches(opp, tz, classifier))
            .collect()
    }
}
