use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::*;
use crate::phone;
use crate::types::{
    Customer, CustomerType, LossReason, NewOpportunity, Opportunity, Outcome, PaymentMethod,
    RepairShop, SalesChannel, Source, StateCode,
};

const OPPORTUNITY_COLUMNS: &str = "id, customer_name, customer_phone, customer_email,
    customer_city, customer_state, customer_type, shop_name, shop_focus, part_sought,
    vehicle_model, source, is_sale, sale_amount_cents, payment_method, loss_reason,
    missing_part, notes, sales_channel, salesperson_email, salesperson_id, created_at,
    updated_at";

/// Column values for the outcome, flattened the way the table stores them.
struct OutcomeColumns {
    is_sale: bool,
    sale_amount_cents: Option<i64>,
    payment_method: Option<&'static str>,
    loss_reason: Option<&'static str>,
    missing_part: Option<String>,
}

impl OutcomeColumns {
    fn from_outcome(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Sale {
                amount_cents,
                payment_method,
            } => Self {
                is_sale: true,
                sale_amount_cents: Some(*amount_cents),
                payment_method: payment_method.map(PaymentMethod::as_str),
                loss_reason: None,
                missing_part: None,
            },
            Outcome::Loss {
                reason,
                missing_part,
            } => Self {
                is_sale: false,
                sale_amount_cents: None,
                payment_method: None,
                loss_reason: Some(reason.as_str()),
                missing_part: missing_part.clone(),
            },
        }
    }
}

impl LeadDb {
    // =========================================================================
    // Opportunities
    // =========================================================================

    /// Store a new opportunity and return it with its generated id.
    pub fn insert_opportunity(
        &self,
        new: &NewOpportunity,
        now: DateTime<Utc>,
    ) -> Result<Opportunity, DbError> {
        let id = Uuid::new_v4().to_string();
        let ts = format_ts(&now);
        let outcome = OutcomeColumns::from_outcome(&new.outcome);
        let shop = new.shop.as_ref();

        self.conn.execute(
            "INSERT INTO opportunities (
                id, customer_name, customer_phone, phone_digits, customer_email,
                customer_city, customer_state, customer_type, shop_name, shop_focus,
                part_sought, vehicle_model, source, is_sale, sale_amount_cents,
                payment_method, loss_reason, missing_part, notes, sales_channel,
                salesperson_email, salesperson_id, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                       ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?23)",
            params![
                id,
                new.customer.name,
                new.customer.phone,
                phone::digits(&new.customer.phone),
                new.customer.email,
                new.customer.city,
                new.customer.state.as_str(),
                new.customer_type.as_str(),
                shop.map(|s| s.name.as_str()),
                shop.map(|s| s.focus.as_str()),
                new.part_sought,
                new.vehicle_model,
                new.source.map(Source::as_str),
                outcome.is_sale,
                outcome.sale_amount_cents,
                outcome.payment_method,
                outcome.loss_reason,
                outcome.missing_part,
                new.notes,
                new.channel.map(SalesChannel::as_str),
                new.author.email,
                new.author.user_id,
                ts,
            ],
        )?;

        self.get_opportunity(&id)?
            .ok_or_else(|| DbError::NotFound(id.clone()))
    }

    /// Overwrite an existing opportunity in place. The id, creation time and
    /// original salesperson are kept; everything else is replaced.
    pub fn update_opportunity(
        &self,
        id: &str,
        new: &NewOpportunity,
        now: DateTime<Utc>,
    ) -> Result<Opportunity, DbError> {
        let outcome = OutcomeColumns::from_outcome(&new.outcome);
        let shop = new.shop.as_ref();

        let changed = self.conn.execute(
            "UPDATE opportunities SET
                customer_name = ?2, customer_phone = ?3, phone_digits = ?4,
                customer_email = ?5, customer_city = ?6, customer_state = ?7,
                customer_type = ?8, shop_name = ?9, shop_focus = ?10, part_sought = ?11,
                vehicle_model = ?12, source = ?13, is_sale = ?14, sale_amount_cents = ?15,
                payment_method = ?16, loss_reason = ?17, missing_part = ?18, notes = ?19,
                sales_channel = ?20, updated_at = ?21
             WHERE id = ?1",
            params![
                id,
                new.customer.name,
                new.customer.phone,
                phone::digits(&new.customer.phone),
                new.customer.email,
                new.customer.city,
                new.customer.state.as_str(),
                new.customer_type.as_str(),
                shop.map(|s| s.name.as_str()),
                shop.map(|s| s.focus.as_str()),
                new.part_sought,
                new.vehicle_model,
                new.source.map(Source::as_str),
                outcome.is_sale,
                outcome.sale_amount_cents,
                outcome.payment_method,
                outcome.loss_reason,
                outcome.missing_part,
                new.notes,
                new.channel.map(SalesChannel::as_str),
                format_ts(&now),
            ],
        )?;

        if changed == 0 {
            return Err(DbError::NotFound(id.to_string()));
        }

        self.get_opportunity(id)?
            .ok_or_else(|| DbError::NotFound(id.to_string()))
    }

    /// Delete an opportunity. Returns false when the id was unknown.
    pub fn delete_opportunity(&self, id: &str) -> Result<bool, DbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM opportunities WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    pub fn get_opportunity(&self, id: &str) -> Result<Option<Opportunity>, DbError> {
        let sql = format!("SELECT {} FROM opportunities WHERE id = ?1", OPPORTUNITY_COLUMNS);
        let opp = self
            .conn
            .query_row(&sql, params![id], Self::map_opportunity_row)
            .optional()?;
        Ok(opp)
    }

    /// List opportunities newest first, optionally capped and/or restricted
    /// to an exact phone-digit match.
    pub fn list_opportunities(&self, query: &ListQuery) -> Result<Vec<Opportunity>, DbError> {
        let limit: i64 = query
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let mut sql = format!("SELECT {} FROM opportunities", OPPORTUNITY_COLUMNS);
        if query.phone_digits.is_some() {
            sql.push_str(" WHERE phone_digits = ?2");
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC LIMIT ?1");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match &query.phone_digits {
            Some(digits) => stmt.query_map(params![limit, digits], Self::map_opportunity_row)?,
            None => stmt.query_map(params![limit], Self::map_opportunity_row)?,
        };

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    /// Most recent opportunity whose phone digits match exactly.
    pub fn latest_by_phone(&self, digits: &str) -> Result<Option<Opportunity>, DbError> {
        if digits.is_empty() {
            return Ok(None);
        }
        let mut query = ListQuery::by_phone(digits);
        query.limit = Some(1);
        Ok(self.list_opportunities(&query)?.into_iter().next())
    }

    pub fn count_opportunities(&self) -> Result<usize, DbError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM opportunities", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn map_opportunity_row(row: &Row<'_>) -> rusqlite::Result<Opportunity> {
        let state: String = row.get(5)?;
        let customer_type: String = row.get(6)?;
        let shop_name: Option<String> = row.get(7)?;
        let shop_focus: Option<String> = row.get(8)?;
        let source: Option<String> = row.get(11)?;
        let is_sale: bool = row.get(12)?;
        let payment_method: Option<String> = row.get(14)?;
        let loss_reason: Option<String> = row.get(15)?;
        let channel: Option<String> = row.get(18)?;
        let created_at: String = row.get(21)?;
        let updated_at: String = row.get(22)?;

        let customer_type = parse_enum(6, &customer_type, CustomerType::parse)?;
        let shop = match customer_type {
            CustomerType::RepairShop => Some(RepairShop {
                name: shop_name.unwrap_or_default(),
                focus: shop_focus.unwrap_or_default(),
            }),
            CustomerType::EndConsumer => None,
        };

        let outcome = if is_sale {
            Outcome::Sale {
                amount_cents: row.get::<_, Option<i64>>(13)?.unwrap_or(0),
                payment_method: payment_method
                    .map(|p| parse_enum(14, &p, PaymentMethod::parse))
                    .transpose()?,
            }
        } else {
            let reason = loss_reason.unwrap_or_default();
            Outcome::Loss {
                reason: parse_enum(15, &reason, LossReason::parse)?,
                missing_part: row.get(16)?,
            }
        };

        Ok(Opportunity {
            id: row.get(0)?,
            customer: Customer {
                name: row.get(1)?,
                phone: row.get(2)?,
                email: row.get(3)?,
                city: row.get(4)?,
                state: parse_enum(5, &state, StateCode::parse)?,
            },
            customer_type,
            shop,
            part_sought: row.get(9)?,
            vehicle_model: row.get(10)?,
            source: source
                .map(|s| parse_enum(11, &s, Source::parse))
                .transpose()?,
            outcome,
            notes: row.get(17)?,
            channel: channel
                .map(|c| parse_enum(18, &c, SalesChannel::parse))
                .transpose()?,
            salesperson_email: row.get(19)?,
            salesperson_id: row.get(20)?,
            created_at: parse_ts(21, &created_at)?,
            updated_at: parse_ts(22, &updated_at)?,
        })
    }
}
