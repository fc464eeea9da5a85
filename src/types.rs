//! Domain types for opportunities (customer inquiries) and their enumerations.
//!
//! Every enumeration carries two strings: a stable storage id (what lands in
//! SQLite and JSON) and the display label the sales counter sees on screen and
//! in exports. Labels may be reworded; ids never change.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declare a closed enumeration with a storage id and a display label per
/// variant. Generates `ALL`, `as_str`, `label`, `parse` and `Display`.
macro_rules! labeled_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $variant:ident => ($id:literal, $label:literal) ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $( #[serde(rename = $id)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Stable identifier used for storage.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $id ),+
                }
            }

            /// Human-facing label.
            pub fn label(self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }

            /// Accepts either the storage id or the display label, ignoring case.
            pub fn parse(value: &str) -> Option<Self> {
                let value = value.trim();
                Self::ALL.iter().copied().find(|candidate| {
                    candidate.as_str().eq_ignore_ascii_case(value)
                        || candidate.label().to_lowercase() == value.to_lowercase()
                })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

labeled_enum! {
    /// States the store focuses on; everything else is `Other`.
    StateCode {
        Rs => ("RS", "RS"),
        Sc => ("SC", "SC"),
        Pr => ("PR", "PR"),
        Sp => ("SP", "SP"),
        Other => ("other", "Outro"),
    }
}

impl Default for StateCode {
    fn default() -> Self {
        StateCode::Rs
    }
}

labeled_enum! {
    CustomerType {
        EndConsumer => ("end_consumer", "Consumidor Final"),
        RepairShop => ("repair_shop", "Oficina"),
    }
}

impl Default for CustomerType {
    fn default() -> Self {
        CustomerType::EndConsumer
    }
}

labeled_enum! {
    /// How the customer found the store.
    Source {
        SocialMedia => ("social_media", "Redes Sociais (Insta/Face)"),
        GoogleSearch => ("google_search", "Google (Pesquisa)"),
        GoogleMaps => ("google_maps", "Google Maps (Meu Negócio)"),
        Marketplace => ("marketplace", "OLX / Marketplace"),
        Referral => ("referral", "Indicação"),
        ExistingCustomer => ("existing_customer", "Já era cliente"),
        WalkIn => ("walk_in", "Passante (Frente loja)"),
        WhatsApp => ("whatsapp", "WhatsApp"),
    }
}

labeled_enum! {
    LossReason {
        OutOfStock => ("out_of_stock", "Falta de Estoque"),
        Price => ("price", "Preço (Concorrência)"),
        LeadTime => ("lead_time", "Prazo/Frete"),
        JustBrowsing => ("just_browsing", "Só pesquisando/Curioso"),
        WillThink => ("will_think", "Cliente vai pensar"),
    }
}

labeled_enum! {
    PaymentMethod {
        Pix => ("pix", "Pix"),
        Cash => ("cash", "Dinheiro"),
        CreditCard => ("credit_card", "Cartão de Crédito"),
        DebitCard => ("debit_card", "Cartão de Débito"),
        BankSlip => ("bank_slip", "Boleto"),
    }
}

labeled_enum! {
    /// Where the sale was closed.
    SalesChannel {
        Counter => ("counter", "Balcão"),
        Phone => ("phone", "Telefone"),
        WhatsApp => ("whatsapp", "WhatsApp"),
        OnlineStore => ("online_store", "Loja Online"),
    }
}

/// Contact details captured on the form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub city: String,
    pub state: StateCode,
}

/// Extra details kept only for repair-shop customers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairShop {
    pub name: String,
    pub focus: String,
}

/// Sale or loss. Exactly one of the two paths is ever populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum Outcome {
    #[serde(rename_all = "camelCase")]
    Sale {
        amount_cents: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payment_method: Option<PaymentMethod>,
    },
    #[serde(rename_all = "camelCase")]
    Loss {
        reason: LossReason,
        /// Only meaningful when `reason` is `OutOfStock`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        missing_part: Option<String>,
    },
}

impl Outcome {
    pub fn is_sale(&self) -> bool {
        matches!(self, Outcome::Sale { .. })
    }

    pub fn sale_amount_cents(&self) -> Option<i64> {
        match self {
            Outcome::Sale { amount_cents, .. } => Some(*amount_cents),
            Outcome::Loss { .. } => None,
        }
    }

    pub fn loss_reason(&self) -> Option<LossReason> {
        match self {
            Outcome::Loss { reason, .. } => Some(*reason),
            Outcome::Sale { .. } => None,
        }
    }
}

/// Who recorded an opportunity. Taken from the signed-in session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub user_id: String,
    pub email: String,
}

/// A validated opportunity that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOpportunity {
    pub customer: Customer,
    pub customer_type: CustomerType,
    pub shop: Option<RepairShop>,
    pub part_sought: String,
    pub vehicle_model: String,
    pub source: Option<Source>,
    pub outcome: Outcome,
    pub notes: String,
    pub channel: Option<SalesChannel>,
    pub author: Author,
}

/// A stored opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: String,
    pub customer: Customer,
    pub customer_type: CustomerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop: Option<RepairShop>,
    pub part_sought: String,
    pub vehicle_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub outcome: Outcome,
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<SalesChannel>,
    pub salesperson_email: String,
    pub salesperson_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Opportunity {
    /// Part of the salesperson email before the `@`, as shown in headers.
    pub fn salesperson_handle(&self) -> &str {
        self.salesperson_email
            .split('@')
            .next()
            .unwrap_or(&self.salesperson_email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_id_and_label() {
        assert_eq!(Source::parse("walk_in"), Some(Source::WalkIn));
        assert_eq!(Source::parse("Passante (Frente loja)"), Some(Source::WalkIn));
        assert_eq!(Source::parse("  WHATSAPP "), Some(Source::WhatsApp));
        assert_eq!(LossReason::parse("falta de estoque"), Some(LossReason::OutOfStock));
        assert_eq!(Source::parse("carrier pigeon"), None);
    }

    #[test]
    fn test_state_code_other_label() {
        assert_eq!(StateCode::Other.label(), "Outro");
        assert_eq!(StateCode::parse("outro"), Some(StateCode::Other));
        assert_eq!(StateCode::default(), StateCode::Rs);
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let sale = Outcome::Sale {
            amount_cents: 15000,
            payment_method: Some(PaymentMethod::Pix),
        };
        let json = serde_json::to_value(&sale).unwrap();
        assert_eq!(json["result"], "sale");
        assert_eq!(json["amountCents"], 15000);
        assert_eq!(json["paymentMethod"], "pix");

        let loss: Outcome = serde_json::from_value(serde_json::json!({
            "result": "loss",
            "reason": "out_of_stock",
            "missingPart": "pastilha dianteira"
        }))
        .unwrap();
        assert_eq!(loss.loss_reason(), Some(LossReason::OutOfStock));
        assert_eq!(loss.sale_amount_cents(), None);
        assert!(!loss.is_sale());
    }
}
