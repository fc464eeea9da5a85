//! Lead history as CSV, one line per record.

use chrono_tz::Tz;

use crate::money;
use crate::types::{Opportunity, Outcome};

pub const HEADER: &str = "Data,Vendedor,Cliente,Telefone,Email,Cidade,UF,Tipo,Oficina,Foco,\
Veiculo,Peca,Origem,Venda?,Valor,Motivo,Peca Faltante,Obs,Pagamento,Canal";

fn should_neutralize_csv(value: &str) -> bool {
    matches!(value.chars().next(), Some('=' | '+' | '-' | '@'))
}

/// Quote a free-text cell. Empty stays empty; line breaks fold to spaces so
/// every record stays on one physical line.
fn clean(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        return String::new();
    }
    let folded: String = value
        .split(['\r', '\n'])
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let safe = if should_neutralize_csv(&folded) {
        format!("'{}", folded)
    } else {
        folded
    };
    format!("\"{}\"", safe.replace('"', "\"\""))
}

fn row(opp: &Opportunity, tz: Tz) -> String {
    let date = opp.created_at.with_timezone(&tz).format("%d/%m/%Y").to_string();
    let (shop_name, shop_focus) = opp
        .shop
        .as_ref()
        .map(|s| (s.name.as_str(), s.focus.as_str()))
        .unwrap_or_default();
    let (sold, amount, reason, missing, payment) = match &opp.outcome {
        Outcome::Sale {
            amount_cents,
            payment_method,
        } => (
            "SIM",
            money::format_brl(*amount_cents),
            "",
            "",
            payment_method.map(|p| p.label()).unwrap_or_default(),
        ),
        Outcome::Loss {
            reason,
            missing_part,
        } => (
            "NÃO",
            String::new(),
            reason.label(),
            missing_part.as_deref().unwrap_or_default(),
            "",
        ),
    };

    [
        date,
        clean(&opp.salesperson_email),
        clean(&opp.customer.name),
        clean(&opp.customer.phone),
        clean(&opp.customer.email),
        clean(&opp.customer.city),
        clean(opp.customer.state.label()),
        clean(opp.customer_type.label()),
        clean(shop_name),
        clean(shop_focus),
        clean(&opp.vehicle_model),
        clean(&opp.part_sought),
        clean(opp.source.map(|s| s.label()).unwrap_or_default()),
        sold.to_string(),
        clean(&amount),
        clean(reason),
        clean(missing),
        clean(&opp.notes),
        clean(payment),
        clean(opp.channel.map(|c| c.label()).unwrap_or_default()),
    ]
    .join(",")
}

/// Render the header and one line per record, in the order given.
pub fn render_csv(records: &[Opportunity], tz: Tz) -> String {
    let mut out = String::with_capacity(HEADER.len() + records.len() * 160);
    out.push_str(HEADER);
    out.push('\n');
    for opp in records {
        out.push_str(&row(opp, tz));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono_tz::America::Sao_Paulo;

    use super::*;
    use crate::stats::test_records::{loss, record, sale};
    use crate::form::test_drafts::sale_draft;

    #[test]
    fn test_header_and_line_count() {
        let records = vec![
            sale("ana@kobber.com.br", "1.234,56", "2026-03-02T13:00:00Z"),
            loss("bia@kobber.com.br", "price", "2026-03-03T13:00:00Z"),
        ];
        let csv = render_csv(&records, Sao_Paulo);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert_eq!(HEADER.split(',').count(), 20);
    }

    #[test]
    fn test_sale_row_columns() {
        let opp = sale("ana@kobber.com.br", "1.234,56", "2026-03-02T13:00:00Z");
        let line = row(&opp, Sao_Paulo);
        assert!(line.starts_with("02/03/2026,\"ana@kobber.com.br\",\"Cliente\","));
        assert!(line.contains(",SIM,\"1.234,56\",,,,\"Pix\",\"Balcão\""));
    }

    #[test]
    fn test_loss_row_columns() {
        let opp = loss("bia@kobber.com.br", "price", "2026-03-03T13:00:00Z");
        let line = row(&opp, Sao_Paulo);
        assert!(line.contains(",NÃO,,\"Preço (Concorrência)\","));
        assert!(line.contains("\"WhatsApp\""));
    }

    #[test]
    fn test_date_uses_local_zone() {
        // 01:00 UTC on 1 April is still 31 March in São Paulo
        let opp = sale("ana@kobber.com.br", "10,00", "2026-04-01T01:00:00Z");
        assert!(row(&opp, Sao_Paulo).starts_with("31/03/2026,"));
    }

    #[test]
    fn test_quotes_newlines_and_formulas() {
        let mut draft = sale_draft("Maria \"Tia\" Silva", "", "10,00");
        draft.notes = "=HYPERLINK(\"x\")\nsegunda linha".to_string();
        let opp = record(draft, "ana@kobber.com.br", "2026-03-02T13:00:00Z");

        let csv = render_csv(&[opp], Sao_Paulo);
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.contains("\"Maria \"\"Tia\"\" Silva\""));
        assert!(csv.contains("\"'=HYPERLINK(\"\"x\"\") segunda linha\""));
    }

    #[test]
    fn test_empty_cells_stay_unquoted() {
        assert_eq!(clean(""), "");
        assert_eq!(clean("   "), "");
        assert_eq!(clean("-5"), "\"'-5\"");
    }
}
