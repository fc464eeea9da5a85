//! The opportunity form: loosely-typed draft in, validated record out.
//!
//! The draft keeps every field as the user typed it so a half-filled form can
//! round-trip through the front end. `into_new_opportunity` is the only way a
//! draft becomes something the store will accept.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money;
use crate::types::{
    Author, Customer, CustomerType, LossReason, NewOpportunity, Opportunity, Outcome,
    PaymentMethod, RepairShop, SalesChannel, Source, StateCode,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormError {
    #[error("Customer name is required")]
    MissingCustomerName,

    #[error("Select whether the sale happened")]
    MissingOutcome,

    #[error("Sale amount is required")]
    MissingSaleAmount,

    #[error("Invalid sale amount: {0}")]
    InvalidSaleAmount(String),

    #[error("Loss reason is required")]
    MissingLossReason,

    #[error("Invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Form state as typed. Empty strings mean "not filled".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpportunityDraft {
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: String,
    pub customer_city: String,
    pub customer_state: String,
    pub customer_type: String,
    pub shop_name: String,
    pub shop_focus: String,
    pub part_sought: String,
    pub vehicle_model: String,
    pub source: String,
    pub is_sale: Option<bool>,
    pub sale_amount: String,
    pub payment_method: String,
    pub loss_reason: String,
    pub missing_part: String,
    pub notes: String,
    pub channel: String,
}

impl OpportunityDraft {
    /// Check the required fields without building the record.
    pub fn validate(&self) -> Result<(), FormError> {
        if self.customer_name.trim().is_empty() {
            return Err(FormError::MissingCustomerName);
        }
        if self.is_sale.is_none() {
            return Err(FormError::MissingOutcome);
        }
        Ok(())
    }

    /// Validate and convert into a storable record. Fields that do not apply
    /// (shop details for end consumers, missing part for other loss reasons)
    /// are dropped here.
    pub fn into_new_opportunity(self, author: Author) -> Result<NewOpportunity, FormError> {
        self.validate()?;

        let state = parse_optional(&self.customer_state, "customerState", StateCode::parse)?
            .unwrap_or_default();
        let customer_type = parse_optional(&self.customer_type, "customerType", CustomerType::parse)?
            .unwrap_or_default();
        let source = parse_optional(&self.source, "source", Source::parse)?;
        let channel = parse_optional(&self.channel, "channel", SalesChannel::parse)?;

        let outcome = if self.is_sale == Some(true) {
            let raw = self.sale_amount.trim();
            if raw.is_empty() {
                return Err(FormError::MissingSaleAmount);
            }
            let amount_cents = money::parse_brl(raw)
                .map_err(|_| FormError::InvalidSaleAmount(raw.to_string()))?;
            if amount_cents <= 0 || amount_cents > money::MAX_AMOUNT_CENTS {
                return Err(FormError::InvalidSaleAmount(raw.to_string()));
            }
            let payment_method =
                parse_optional(&self.payment_method, "paymentMethod", PaymentMethod::parse)?;
            Outcome::Sale {
                amount_cents,
                payment_method,
            }
        } else {
            let reason = parse_optional(&self.loss_reason, "lossReason", LossReason::parse)?
                .ok_or(FormError::MissingLossReason)?;
            let missing_part = match reason {
                LossReason::OutOfStock => non_empty(&self.missing_part),
                _ => None,
            };
            Outcome::Loss {
                reason,
                missing_part,
            }
        };

        let shop = match customer_type {
            CustomerType::RepairShop => Some(RepairShop {
                name: self.shop_name.trim().to_string(),
                focus: self.shop_focus.trim().to_string(),
            }),
            CustomerType::EndConsumer => None,
        };

        Ok(NewOpportunity {
            customer: Customer {
                name: self.customer_name.trim().to_string(),
                phone: self.customer_phone.trim().to_string(),
                email: self.customer_email.trim().to_string(),
                city: self.customer_city.trim().to_string(),
                state,
            },
            customer_type,
            shop,
            part_sought: self.part_sought.trim().to_string(),
            vehicle_model: self.vehicle_model.trim().to_string(),
            source,
            outcome,
            notes: self.notes.trim().to_string(),
            channel,
            author,
        })
    }

    /// Pre-fill the form from a stored record (edit in place).
    pub fn from_opportunity(opp: &Opportunity) -> Self {
        let mut draft = OpportunityDraft {
            customer_name: opp.customer.name.clone(),
            customer_phone: opp.customer.phone.clone(),
            customer_email: opp.customer.email.clone(),
            customer_city: opp.customer.city.clone(),
            customer_state: opp.customer.state.as_str().to_string(),
            customer_type: opp.customer_type.as_str().to_string(),
            part_sought: opp.part_sought.clone(),
            vehicle_model: opp.vehicle_model.clone(),
            source: opp.source.map(|s| s.as_str().to_string()).unwrap_or_default(),
            is_sale: Some(opp.outcome.is_sale()),
            notes: opp.notes.clone(),
            channel: opp.channel.map(|c| c.as_str().to_string()).unwrap_or_default(),
            ..Default::default()
        };
        if let Some(shop) = &opp.shop {
            draft.shop_name = shop.name.clone();
            draft.shop_focus = shop.focus.clone();
        }
        match &opp.outcome {
            Outcome::Sale {
                amount_cents,
                payment_method,
            } => {
                draft.sale_amount = money::format_brl(*amount_cents);
                draft.payment_method = payment_method
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_default();
            }
            Outcome::Loss {
                reason,
                missing_part,
            } => {
                draft.loss_reason = reason.as_str().to_string();
                draft.missing_part = missing_part.clone().unwrap_or_default();
            }
        }
        draft
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_optional<T>(
    value: &str,
    field: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<Option<T>, FormError> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    parse(value).map(Some).ok_or_else(|| FormError::InvalidField {
        field,
        value: value.trim().to_string(),
    })
}

#[cfg(test)]
pub mod test_drafts {
    use super::OpportunityDraft;
    use crate::types::Author;

    pub fn author(email: &str) -> Author {
        Author {
            user_id: format!("uid-{}", email.split('@').next().unwrap_or(email)),
            email: email.to_string(),
        }
    }

    pub fn sale_draft(name: &str, phone: &str, amount: &str) -> OpportunityDraft {
        OpportunityDraft {
            customer_name: name.to_string(),
            customer_phone: phone.to_string(),
            part_sought: "Amortecedor dianteiro".to_string(),
            vehicle_model: "Gol G5 2012".to_string(),
            source: "google_maps".to_string(),
            is_sale: Some(true),
            sale_amount: amount.to_string(),
            payment_method: "pix".to_string(),
            channel: "counter".to_string(),
            ..Default::default()
        }
    }

    pub fn loss_draft(name: &str, phone: &str, reason: &str) -> OpportunityDraft {
        OpportunityDraft {
            customer_name: name.to_string(),
            customer_phone: phone.to_string(),
            part_sought: "Kit embreagem".to_string(),
            vehicle_model: "Onix 2019".to_string(),
            source: "whatsapp".to_string(),
            is_sale: Some(false),
            loss_reason: reason.to_string(),
            ..Default::default()
        }
    }
}
