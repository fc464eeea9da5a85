//! Monthly dashboard aggregation.
//!
//! Records are bucketed by the calendar month of their creation time in the
//! store's local zone, not UTC: a sale at 22:00 on the last day of the month
//! in São Paulo belongs to that month even though it is already the 1st in UTC.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::types::{LossReason, Opportunity, Outcome, Source};

/// A calendar month, written `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    /// Month of `ts` as seen in `tz`.
    pub fn of(ts: &DateTime<Utc>, tz: Tz) -> Self {
        let local = ts.with_timezone(&tz);
        Self {
            year: local.year(),
            month: local.month(),
        }
    }

    pub fn current(tz: Tz) -> Self {
        Self::of(&Utc::now(), tz)
    }

    pub fn contains(&self, ts: &DateTime<Utc>, tz: Tz) -> bool {
        Self::of(ts, tz) == *self
    }

    /// Portuguese month name and year, e.g. `março de 2026`.
    pub fn label(&self) -> String {
        const NAMES: [&str; 12] = [
            "janeiro", "fevereiro", "março", "abril", "maio", "junho", "julho", "agosto",
            "setembro", "outubro", "novembro", "dezembro",
        ];
        let name = NAMES.get(self.month as usize - 1).copied().unwrap_or("?");
        format!("{} de {}", name, self.year)
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("Invalid month '{}', expected YYYY-MM", s);
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

impl TryFrom<String> for MonthKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MonthKey> for String {
    fn from(key: MonthKey) -> Self {
        key.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalespersonTotal {
    pub email: String,
    pub sale_count: usize,
    pub total_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LossReasonCount {
    pub reason: LossReason,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCount {
    /// `None` for records saved without a source.
    pub source: Option<Source>,
    pub sales: usize,
    pub losses: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySummary {
    pub month: MonthKey,
    pub total_sales_cents: i64,
    pub sale_count: usize,
    pub loss_count: usize,
    /// Sales over all outcomes, 0.0 to 1.0.
    pub conversion_rate: f64,
    pub average_ticket_cents: i64,
    pub by_salesperson: Vec<SalespersonTotal>,
    pub loss_reasons: Vec<LossReasonCount>,
    pub by_source: Vec<SourceCount>,
    /// Distinct parts customers asked for that were out of stock.
    pub missing_parts: Vec<String>,
}

impl MonthlySummary {
    pub fn conversion_percent(&self) -> f64 {
        self.conversion_rate * 100.0
    }
}

/// Aggregate the records created in `month` (in `tz`). Records from other
/// months are ignored, so the full history can be passed in.
pub fn summarize_month(records: &[Opportunity], month: MonthKey, tz: Tz) -> MonthlySummary {
    let mut total_sales_cents = 0i64;
    let mut sale_count = 0usize;
    let mut loss_count = 0usize;
    let mut sellers: HashMap<&str, (usize, i64)> = HashMap::new();
    let mut reasons: BTreeMap<LossReason, usize> = BTreeMap::new();
    let mut sources: BTreeMap<Option<Source>, (usize, usize)> = BTreeMap::new();
    let mut missing_parts: BTreeSet<String> = BTreeSet::new();

    for opp in records.iter().filter(|o| month.contains(&o.created_at, tz)) {
        let source = sources.entry(opp.source).or_default();
        match &opp.outcome {
            Outcome::Sale { amount_cents, .. } => {
                total_sales_cents = total_sales_cents.saturating_add(*amount_cents);
                sale_count += 1;
                source.0 += 1;
                let seller = sellers.entry(opp.salesperson_email.as_str()).or_default();
                seller.0 += 1;
                seller.1 = seller.1.saturating_add(*amount_cents);
            }
            Outcome::Loss {
                reason,
                missing_part,
            } => {
                loss_count += 1;
                source.1 += 1;
                *reasons.entry(*reason).or_default() += 1;
                if let Some(part) = missing_part.as_deref().map(str::trim) {
                    if !part.is_empty() {
                        missing_parts.insert(part.to_string());
                    }
                }
            }
        }
    }

    let decided = sale_count + loss_count;
    let conversion_rate = if decided == 0 {
        0.0
    } else {
        sale_count as f64 / decided as f64
    };
    let average_ticket_cents = if sale_count == 0 {
        0
    } else {
        total_sales_cents / sale_count as i64
    };

    let mut by_salesperson: Vec<SalespersonTotal> = sellers
        .into_iter()
        .map(|(email, (sale_count, total_cents))| SalespersonTotal {
            email: email.to_string(),
            sale_count,
            total_cents,
        })
        .collect();
    by_salesperson.sort_by(|a, b| {
        b.total_cents
            .cmp(&a.total_cents)
            .then_with(|| a.email.cmp(&b.email))
    });

    // BTreeMap iteration is enum order; a stable sort keeps it for ties
    let mut loss_reasons: Vec<LossReasonCount> = reasons
        .into_iter()
        .map(|(reason, count)| LossReasonCount { reason, count })
        .collect();
    loss_reasons.sort_by(|a, b| b.count.cmp(&a.count));

    let by_source = sources
        .into_iter()
        .map(|(source, (sales, losses))| SourceCount {
            source,
            sales,
            losses,
        })
        .collect();

    MonthlySummary {
        month,
        total_sales_cents,
        sale_count,
        loss_count,
        conversion_rate,
        average_ticket_cents,
        by_salesperson,
        loss_reasons,
        by_source,
        missing_parts: missing_parts.into_iter().collect(),
    }
}

/// Months that have at least one record, newest first.
pub fn available_months(records: &[Opportunity], tz: Tz) -> Vec<MonthKey> {
    let months: BTreeSet<MonthKey> = records
        .iter()
        .map(|o| MonthKey::of(&o.created_at, tz))
        .collect();
    months.into_iter().rev().collect()
}

#[cfg(test)]
pub mod test_records {
    use chrono::{DateTime, Utc};

    use crate::form::test_drafts::{author, loss_draft, sale_draft};
    use crate::form::OpportunityDraft;
    use crate::types::Opportunity;

    /// Build an in-memory record without touching the store.
    pub fn record(draft: OpportunityDraft, seller: &str, created_at: &str) -> Opportunity {
        let new = draft.into_new_opportunity(author(seller)).expect("valid draft");
        let created_at: DateTime<Utc> = created_at.parse().expect("RFC3339 timestamp");
        Opportunity {
            id: format!("{}-{}", seller, created_at.timestamp_micros()),
            customer: new.customer,
            customer_type: new.customer_type,
            shop: new.shop,
            part_sought: new.part_sought,
            vehicle_model: new.vehicle_model,
            source: new.source,
            outcome: new.outcome,
            notes: new.notes,
            channel: new.channel,
            salesperson_email: new.author.email,
            salesperson_id: new.author.user_id,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn sale(seller: &str, amount: &str, created_at: &str) -> Opportunity {
        record(sale_draft("Cliente", "", amount), seller, created_at)
    }

    pub fn loss(seller: &str, reason: &str, created_at: &str) -> Opportunity {
        record(loss_draft("Cliente", "", reason), seller, created_at)
    }
}

#[cfg(test)]
mod tests {
    use chrono_tz::America::Sao_Paulo;

    use super::test_records::*;
    use super::*;

    fn march() -> MonthKey {
        MonthKey::new(2026, 3).unwrap()
    }

    #[test]
    fn test_month_key_parse_and_display() {
        let key: MonthKey = "2026-03".parse().unwrap();
        assert_eq!(key, march());
        assert_eq!(key.to_string(), "2026-03");
        assert_eq!(key.label(), "março de 2026");
        assert!("2026-13".parse::<MonthKey>().is_err());
        assert!("2026-3".parse::<MonthKey>().is_err());
        assert!("março".parse::<MonthKey>().is_err());
        assert_eq!(serde_json::to_value(key).unwrap(), "2026-03");
    }

    #[test]
    fn test_month_boundary_uses_local_zone() {
        // 23:30 on 31 March in São Paulo is already April in UTC
        let late = "2026-04-01T02:30:00Z".parse().unwrap();
        assert_eq!(MonthKey::of(&late, Sao_Paulo), march());
        assert_eq!(MonthKey::of(&late, chrono_tz::UTC), MonthKey::new(2026, 4).unwrap());
    }

    #[test]
    fn test_summary_totals() {
        let records = vec![
            sale("ana@kobber.com.br", "100,00", "2026-03-02T13:00:00Z"),
            sale("bia@kobber.com.br", "250,00", "2026-03-05T13:00:00Z"),
            sale("ana@kobber.com.br", "50,00", "2026-03-09T13:00:00Z"),
            loss("ana@kobber.com.br", "price", "2026-03-10T13:00:00Z"),
            // Different month, ignored
            sale("bia@kobber.com.br", "999,00", "2026-02-27T13:00:00Z"),
        ];
        let summary = summarize_month(&records, march(), Sao_Paulo);

        assert_eq!(summary.total_sales_cents, 40_000);
        assert_eq!(summary.sale_count, 3);
        assert_eq!(summary.loss_count, 1);
        assert!((summary.conversion_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(summary.average_ticket_cents, 13_333);

        let sellers: Vec<(&str, i64)> = summary
            .by_salesperson
            .iter()
            .map(|s| (s.email.as_str(), s.total_cents))
            .collect();
        assert_eq!(
            sellers,
            vec![("bia@kobber.com.br", 25_000), ("ana@kobber.com.br", 15_000)]
        );
    }

    #[test]
    fn test_huge_stored_amounts_saturate() {
        let mut records = vec![
            sale("ana@kobber.com.br", "1,00", "2026-03-02T13:00:00Z"),
            sale("ana@kobber.com.br", "1,00", "2026-03-03T13:00:00Z"),
        ];
        for opp in &mut records {
            opp.outcome = Outcome::Sale {
                amount_cents: i64::MAX - 1,
                payment_method: None,
            };
        }
        let summary = summarize_month(&records, march(), Sao_Paulo);
        assert_eq!(summary.total_sales_cents, i64::MAX);
        assert_eq!(summary.by_salesperson[0].total_cents, i64::MAX);
        assert_eq!(summary.average_ticket_cents, i64::MAX / 2);
    }

    #[test]
    fn test_empty_month_has_zero_rates() {
        let summary = summarize_month(&[], march(), Sao_Paulo);
        assert_eq!(summary.conversion_rate, 0.0);
        assert_eq!(summary.average_ticket_cents, 0);
        assert!(summary.by_salesperson.is_empty());
    }

    #[test]
    fn test_salesperson_ties_sorted_by_email() {
        let records = vec![
            sale("zeca@kobber.com.br", "10,00", "2026-03-02T13:00:00Z"),
            sale("ana@kobber.com.br", "10,00", "2026-03-03T13:00:00Z"),
        ];
        let summary = summarize_month(&records, march(), Sao_Paulo);
        assert_eq!(summary.by_salesperson[0].email, "ana@kobber.com.br");
    }

    #[test]
    fn test_loss_reasons_and_missing_parts() {
        let mut stockout = loss("ana@kobber.com.br", "out_of_stock", "2026-03-02T13:00:00Z");
        stockout.outcome = Outcome::Loss {
            reason: LossReason::OutOfStock,
            missing_part: Some("  Pastilha Cobreq ".into()),
        };
        let records = vec![
            loss("ana@kobber.com.br", "price", "2026-03-02T13:00:00Z"),
            loss("ana@kobber.com.br", "will_think", "2026-03-03T13:00:00Z"),
            loss("ana@kobber.com.br", "price", "2026-03-04T13:00:00Z"),
            stockout,
        ];
        let summary = summarize_month(&records, march(), Sao_Paulo);
        let reasons: Vec<(LossReason, usize)> = summary
            .loss_reasons
            .iter()
            .map(|r| (r.reason, r.count))
            .collect();
        assert_eq!(
            reasons,
            vec![
                (LossReason::Price, 2),
                (LossReason::OutOfStock, 1),
                (LossReason::WillThink, 1),
            ]
        );
        assert_eq!(summary.missing_parts, vec!["Pastilha Cobreq"]);
        assert_eq!(summary.by_source.len(), 1);
        assert_eq!(summary.by_source[0].losses, 4);
    }

    #[test]
    fn test_available_months_newest_first() {
        let records = vec![
            sale("ana@kobber.com.br", "1,00", "2026-01-15T13:00:00Z"),
            sale("ana@kobber.com.br", "1,00", "2026-03-15T13:00:00Z"),
            sale("ana@kobber.com.br", "1,00", "2026-01-20T13:00:00Z"),
        ];
        let months: Vec<String> = available_months(&records, Sao_Paulo)
            .iter()
            .map(|m| m.to_string())
            .collect();
        assert_eq!(months, vec!["2026-03", "2026-01"]);
    }
}
