//! Monthly report as a minimal PDF.
//!
//! The document uses only the standard Helvetica fonts with WinAnsi encoding,
//! so no font files are embedded and every PDF reader can display it. Layout
//! is fixed: a summary block on the first page, then a table that continues
//! on as many pages as the rows need.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::money;
use crate::stats::{MonthKey, MonthlySummary};
use crate::types::{Opportunity, Outcome};

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 40.0;
const ROW_HEIGHT: f32 = 14.0;
const TABLE_FONT_SIZE: f32 = 9.0;

/// Column x offset and the number of characters that fit.
const COLUMNS: [(&str, f32, usize); 6] = [
    ("Data", MARGIN, 10),
    ("Cliente", 100.0, 24),
    ("Vendedor", 225.0, 18),
    ("Peça", 320.0, 26),
    ("Resultado", 455.0, 10),
    ("Valor", 505.0, 14),
];

pub struct PdfReport<'a> {
    pub company_name: &'a str,
    pub month: MonthKey,
    pub summary: &'a MonthlySummary,
    /// Records of the month, in display order.
    pub records: &'a [Opportunity],
    pub tz: Tz,
    pub generated_at: DateTime<Utc>,
}

/// Page content as a list of text draws.
#[derive(Default)]
struct Page {
    ops: Vec<u8>,
}

impl Page {
    fn text(&mut self, font: &str, size: f32, x: f32, y: f32, value: &str) {
        self.ops
            .extend_from_slice(format!("BT /{} {} Tf {:.1} {:.1} Td (", font, size, x, y).as_bytes());
        self.ops.extend_from_slice(&encode_text(value));
        self.ops.extend_from_slice(b") Tj ET\n");
    }

    fn rule(&mut self, y: f32) {
        self.ops.extend_from_slice(
            format!(
                "0.5 w {:.1} {:.1} m {:.1} {:.1} l S\n",
                MARGIN,
                y,
                PAGE_WIDTH - MARGIN,
                y
            )
            .as_bytes(),
        );
    }
}

/// Encode as a WinAnsi PDF string body. Latin-1 characters map to themselves;
/// anything else becomes `?`.
fn encode_text(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for ch in value.chars() {
        let byte = match ch as u32 {
            0x20..=0x7E | 0xA0..=0xFF => ch as u32 as u8,
            _ if ch.is_whitespace() => b' ',
            _ => b'?',
        };
        if matches!(byte, b'(' | b')' | b'\\') {
            out.push(b'\\');
        }
        out.push(byte);
    }
    out
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut cut: String = value.chars().take(max_chars.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0).replace('.', ",")
}

fn table_header(page: &mut Page, y: f32) {
    for (title, x, _) in COLUMNS {
        page.text("F2", TABLE_FONT_SIZE, x, y, title);
    }
    page.rule(y - 4.0);
}

fn table_row(page: &mut Page, y: f32, opp: &Opportunity, tz: Tz) {
    let date = opp.created_at.with_timezone(&tz).format("%d/%m/%Y").to_string();
    let (result, value) = match &opp.outcome {
        Outcome::Sale { amount_cents, .. } => ("Venda", money::format_brl_symbol(*amount_cents)),
        Outcome::Loss { reason, .. } => ("Perda", reason.label().to_string()),
    };
    let cells = [
        date,
        opp.customer.name.clone(),
        opp.salesperson_handle().to_string(),
        opp.part_sought.clone(),
        result.to_string(),
        value,
    ];
    for ((_, x, width), cell) in COLUMNS.iter().zip(cells.iter()) {
        page.text("F1", TABLE_FONT_SIZE, *x, y, &truncate(cell, *width));
    }
}

fn summary_block(page: &mut Page, report: &PdfReport<'_>) -> f32 {
    let s = report.summary;
    let mut y = PAGE_HEIGHT - MARGIN - 12.0;
    page.text(
        "F2",
        16.0,
        MARGIN,
        y,
        &format!("{} - Relatório de Oportunidades", report.company_name),
    );
    y -= 20.0;
    page.text(
        "F1",
        10.0,
        MARGIN,
        y,
        &format!(
            "Período: {} ({})   Gerado em {}",
            report.month.label(),
            report.month,
            report
                .generated_at
                .with_timezone(&report.tz)
                .format("%d/%m/%Y %H:%M")
        ),
    );
    y -= 28.0;

    let lines = [
        ("Total vendido", money::format_brl_symbol(s.total_sales_cents)),
        ("Vendas fechadas", s.sale_count.to_string()),
        ("Oportunidades perdidas", s.loss_count.to_string()),
        ("Conversão", percent(s.conversion_rate)),
        ("Ticket médio", money::format_brl_symbol(s.average_ticket_cents)),
    ];
    for (label, value) in lines {
        page.text("F2", 11.0, MARGIN, y, &format!("{}:", label));
        page.text("F1", 11.0, MARGIN + 150.0, y, &value);
        y -= 16.0;
    }
    y - 12.0
}

/// Lay the report out into pages.
fn layout(report: &PdfReport<'_>) -> Vec<Page> {
    let mut pages = Vec::new();
    let mut page = Page::default();
    let mut y = summary_block(&mut page, report);

    table_header(&mut page, y);
    y -= ROW_HEIGHT + 4.0;

    if report.records.is_empty() {
        page.text("F1", 10.0, MARGIN, y, "Nenhuma oportunidade registrada neste mês.");
    }

    for opp in report.records {
        if y < MARGIN + ROW_HEIGHT {
            pages.push(std::mem::take(&mut page));
            y = PAGE_HEIGHT - MARGIN - 12.0;
            table_header(&mut page, y);
            y -= ROW_HEIGHT + 4.0;
        }
        table_row(&mut page, y, opp, report.tz);
        y -= ROW_HEIGHT;
    }
    pages.push(page);

    let total = pages.len();
    for (i, page) in pages.iter_mut().enumerate() {
        page.text(
            "F1",
            8.0,
            PAGE_WIDTH - MARGIN - 60.0,
            MARGIN / 2.0,
            &format!("Página {} de {}", i + 1, total),
        );
    }
    pages
}

/// Serialize pages into a PDF byte stream with a valid cross-reference table.
fn assemble(pages: &[Page]) -> Vec<u8> {
    // Object numbering: 1 catalog, 2 page tree, 3-4 fonts, then page/content pairs
    let page_ids: Vec<usize> = (0..pages.len()).map(|i| 5 + i * 2).collect();
    let mut objects: Vec<Vec<u8>> = Vec::with_capacity(4 + pages.len() * 2);

    objects.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());
    let kids: Vec<String> = page_ids.iter().map(|id| format!("{} 0 R", id)).collect();
    objects.push(
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} >>",
            kids.join(" "),
            pages.len()
        )
        .into_bytes(),
    );
    for base in ["Helvetica", "Helvetica-Bold"] {
        objects.push(
            format!(
                "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
                base
            )
            .into_bytes(),
        );
    }
    for (page, id) in pages.iter().zip(&page_ids) {
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] \
                 /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {} 0 R >>",
                PAGE_WIDTH,
                PAGE_HEIGHT,
                id + 1
            )
            .into_bytes(),
        );
        let mut stream = format!("<< /Length {} >>\nstream\n", page.ops.len()).into_bytes();
        stream.extend_from_slice(&page.ops);
        stream.extend_from_slice(b"\nendstream");
        objects.push(stream);
    }

    let mut out: Vec<u8> = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_at = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_at
        )
        .as_bytes(),
    );
    out
}

pub fn render_pdf(report: &PdfReport<'_>) -> Vec<u8> {
    assemble(&layout(report))
}

#[cfg(test)]
mod tests {
    use chrono_tz::America::Sao_Paulo;

    use super::*;
    use crate::stats::summarize_month;
    use crate::stats::test_records::{loss, sale};

    fn march() -> MonthKey {
        MonthKey::new(2026, 3).unwrap()
    }

    fn render(records: &[Opportunity]) -> Vec<u8> {
        let summary = summarize_month(records, march(), Sao_Paulo);
        render_pdf(&PdfReport {
            company_name: "Kobber Autopeças",
            month: march(),
            summary: &summary,
            records,
            tz: Sao_Paulo,
            generated_at: "2026-04-01T12:00:00Z".parse().unwrap(),
        })
    }

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    fn startxref(pdf: &[u8]) -> usize {
        let text = String::from_utf8_lossy(pdf);
        let tail = text.rsplit("startxref\n").next().unwrap();
        tail.lines().next().unwrap().parse().unwrap()
    }

    #[test]
    fn test_single_page_structure() {
        let records = vec![
            sale("ana@kobber.com.br", "100,00", "2026-03-02T13:00:00Z"),
            loss("bia@kobber.com.br", "price", "2026-03-03T13:00:00Z"),
        ];
        let pdf = render(&records);
        assert!(pdf.starts_with(b"%PDF-1.4"));
        assert!(pdf.ends_with(b"%%EOF\n"));
        assert_eq!(count(&pdf, b"/Type /Page "), 1);
        assert_eq!(&pdf[startxref(&pdf)..startxref(&pdf) + 4], b"xref");
        assert_eq!(count(&pdf, b"(Venda)"), 1);
        assert_eq!(count(&pdf, b"(Perda)"), 1);
    }

    #[test]
    fn test_rows_overflow_onto_more_pages() {
        let records: Vec<Opportunity> = (0..120)
            .map(|i| {
                sale(
                    "ana@kobber.com.br",
                    "10,00",
                    &format!("2026-03-{:02}T13:{:02}:00Z", 1 + i % 28, i % 60),
                )
            })
            .collect();
        let pdf = render(&records);
        let pages = count(&pdf, b"/Type /Page ");
        assert!(pages >= 3, "expected several pages, got {}", pages);
        assert_eq!(count(&pdf, b"(Data)"), pages);
        assert_eq!(count(&pdf, b"(Venda)"), 120);
    }

    #[test]
    fn test_text_is_winansi_and_escaped() {
        assert_eq!(encode_text("Peça (nova)"), b"Pe\xE7a \\(nova\\)".to_vec());
        assert_eq!(encode_text("R$ 10 €"), b"R$ 10 ?".to_vec());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("curto", 10), "curto");
        assert_eq!(truncate("Amortecedor dianteiro", 10), "Amortec...");
    }
}
