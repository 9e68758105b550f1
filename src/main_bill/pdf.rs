//! Main bill invoice rendering.
//!
//! Every figure printed here comes from the preview's `Decimal` totals; the only
//! rounding is the two-place formatting at print time.

use std::io::BufWriter;

use printpdf::{BuiltinFont, IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference, PdfLayerReference, Point};
use tracing::info;

use crate::aggregation::Totals;
use crate::config::Letterhead;
use crate::error::{BillingError, BillingResult};
use crate::money::{format_fixed, format_km, format_money};

use super::compose::MainBillPreview;

const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const MARGIN_X: f32 = 12.0;
const MARGIN_TOP: f32 = 14.0;
const MARGIN_BOTTOM: f32 = 16.0;
const LINE_H: f32 = 4.6;
const BODY_SIZE: f32 = 8.5;
const PT_TO_MM: f32 = 25.4 / 72.0;

const LEFT: f32 = MARGIN_X;
const RIGHT: f32 = PAGE_W - MARGIN_X;

// Right edges of the numeric columns.
const COL_BAGS: f32 = 112.0;
const COL_MT: f32 = 130.0;
const COL_KM: f32 = 146.0;
const COL_MTK: f32 = 165.0;
const COL_AMOUNT: f32 = RIGHT - 1.0;
const NAME_MAX_CHARS: usize = 52;

fn push_line(layer: &PdfLayerReference, font: &IndirectFontRef, text: &str, font_size: f32, x: f32, y: f32) {
    layer.use_text(text, font_size, Mm(x), Mm(y), font);
}

fn push_line_right(layer: &PdfLayerReference, font: &IndirectFontRef, text: &str, font_size: f32, x_right: f32, y: f32) {
    // Built-in fonts carry no metrics through printpdf; Helvetica digits are ~0.556 em.
    let width_est = (text.chars().count() as f32) * font_size * 0.556 * PT_TO_MM;
    let x = (x_right - width_est).max(0.0);
    push_line(layer, font, text, font_size, x, y);
}

fn push_line_centered(layer: &PdfLayerReference, font: &IndirectFontRef, text: &str, font_size: f32, y: f32) {
    let width_est = (text.chars().count() as f32) * font_size * 0.55 * PT_TO_MM;
    let x = ((PAGE_W - width_est) / 2.0).max(LEFT);
    push_line(layer, font, text, font_size, x, y);
}

fn draw_rule_with_thickness(layer: &PdfLayerReference, x1: f32, x2: f32, y: f32, thickness: f32) {
    layer.set_outline_thickness(thickness);
    layer.add_line(Line {
        points: vec![
            (Point::new(Mm(x1), Mm(y)), false),
            (Point::new(Mm(x2), Mm(y)), false),
        ],
        is_closed: false,
    });
}

fn wrap_text_lines(input: &str, max_chars: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();

    for word in input.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }

        if current.len() + 1 + word.len() <= max_chars {
            current.push(' ');
            current.push_str(word);
        } else {
            out.push(current);
            current = word.to_string();
        }
    }

    if !current.is_empty() {
        out.push(current);
    }

    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max.saturating_sub(1)).collect();
        t.push('.');
        t
    }
}

/// Flowing cursor over the pages of one document.
struct Writer<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    font: IndirectFontRef,
    bold: IndirectFontRef,
    y: f32,
    pages: usize,
    /// Repeat the column header on new pages while the table is still open.
    in_table: bool,
    table_headers: usize,
}

impl Writer<'_> {
    /// Starts a new page when fewer than `needed` mm remain above the margin.
    fn ensure(&mut self, needed: f32) {
        if self.y - needed >= MARGIN_BOTTOM {
            return;
        }
        let (page, layer) = self.doc.add_page(Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.pages += 1;
        self.y = PAGE_H - MARGIN_TOP;
        if self.in_table {
            self.table_header();
        }
    }

    fn text(&self, text: &str, size: f32, x: f32) {
        push_line(&self.layer, &self.font, text, size, x, self.y);
    }

    fn bold(&self, text: &str, size: f32, x: f32) {
        push_line(&self.layer, &self.bold, text, size, x, self.y);
    }

    fn right(&self, text: &str, x_right: f32, bold: bool) {
        let font = if bold { &self.bold } else { &self.font };
        push_line_right(&self.layer, font, text, BODY_SIZE, x_right, self.y);
    }

    fn rule(&self, thickness: f32) {
        draw_rule_with_thickness(&self.layer, LEFT, RIGHT, self.y, thickness);
    }

    fn table_header(&mut self) {
        self.bold("Destination / Dealer", BODY_SIZE, LEFT + 1.0);
        self.right("Bags", COL_BAGS, true);
        self.right("MT", COL_MT, true);
        self.right("KM", COL_KM, true);
        self.right("MTK", COL_MTK, true);
        self.right("Amount", COL_AMOUNT, true);
        self.y -= 1.8;
        self.rule(0.6);
        self.y -= LINE_H;
        self.table_headers += 1;
    }

    fn totals_row(&mut self, label: &str, t: &Totals) {
        self.ensure(LINE_H * 2.0);
        self.bold(label, BODY_SIZE, LEFT + 1.0);
        self.right(&t.total_bags.to_string(), COL_BAGS, true);
        self.right(&format_fixed(t.total_mt), COL_MT, true);
        self.right(&format_fixed(t.total_mtk), COL_MTK, true);
        self.right(&format_money(t.total_amount), COL_AMOUNT, true);
        self.y -= LINE_H;
    }
}

struct Rendered {
    bytes: Vec<u8>,
    pages: usize,
    table_headers: usize,
}

pub fn render_main_bill_pdf(preview: &MainBillPreview, letterhead: &Letterhead) -> BillingResult<Vec<u8>> {
    let rendered = render(preview, letterhead)?;
    info!(
        bill_number = %preview.header.bill_number,
        pages = rendered.pages,
        size = rendered.bytes.len(),
        "main bill pdf rendered"
    );
    Ok(rendered.bytes)
}

fn render(preview: &MainBillPreview, letterhead: &Letterhead) -> BillingResult<Rendered> {
    let header = &preview.header;
    let title = format!("Main Bill {}", header.bill_number);
    let (doc, page1, layer1) = PdfDocument::new(&title, Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| BillingError::Pdf(e.to_string()))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| BillingError::Pdf(e.to_string()))?;

    let mut w = Writer {
        doc: &doc,
        layer: doc.get_page(page1).get_layer(layer1),
        font,
        bold,
        y: PAGE_H - MARGIN_TOP,
        pages: 1,
        in_table: false,
        table_headers: 0,
    };

    // Letterhead
    push_line_centered(&w.layer, &w.bold, &letterhead.firm_name, 15.0, w.y);
    w.y -= 6.0;
    if !letterhead.tagline.trim().is_empty() {
        push_line_centered(&w.layer, &w.font, &letterhead.tagline, 9.5, w.y);
        w.y -= LINE_H;
    }
    for line in &letterhead.address_lines {
        push_line_centered(&w.layer, &w.font, line, BODY_SIZE, w.y);
        w.y -= LINE_H;
    }
    w.y -= 1.0;
    draw_rule_with_thickness(&w.layer, LEFT, RIGHT, w.y, 0.9);
    w.y -= LINE_H + 1.0;

    if !letterhead.gstin.trim().is_empty() {
        w.text(&format!("GSTIN: {}", letterhead.gstin), BODY_SIZE, LEFT);
    }
    w.right(&format!("Bill No: {}", header.bill_number), RIGHT, true);
    w.y -= LINE_H;
    if !letterhead.rail_head.trim().is_empty() {
        w.text(&format!("Rail Head: {}", letterhead.rail_head), BODY_SIZE, LEFT);
    }
    w.right(&format!("Date of Clearing: {}", header.date_of_clearing), RIGHT, false);
    w.y -= LINE_H * 1.5;

    if !header.to_address.trim().is_empty() {
        w.bold("To,", BODY_SIZE, LEFT);
        w.y -= LINE_H;
        for line in header.to_address.lines().filter(|l| !l.trim().is_empty()) {
            w.text(line.trim(), BODY_SIZE, LEFT + 4.0);
            w.y -= LINE_H;
        }
        w.y -= 1.0;
    }
    for line in wrap_text_lines(&header.letter_note, 110) {
        w.text(&line, BODY_SIZE, LEFT);
        w.y -= LINE_H;
    }

    let mut facts = vec![format!("Product: {}", header.product)];
    if !header.hsn_sac_code.trim().is_empty() {
        facts.push(format!("HSN/SAC: {}", header.hsn_sac_code));
    }
    if !header.fact_gst_number.trim().is_empty() {
        facts.push(format!("FACT GST No: {}", header.fact_gst_number));
    }
    if !header.year.trim().is_empty() {
        facts.push(format!("Year: {}", header.year));
    }
    w.text(&facts.join("    "), BODY_SIZE, LEFT);
    w.y -= LINE_H;
    if !preview.entry_bill_numbers.is_empty() {
        for line in wrap_text_lines(&format!("Bills: {}", preview.entry_bill_numbers.join(", ")), 110) {
            w.text(&line, BODY_SIZE, LEFT);
            w.y -= LINE_H;
        }
    }
    w.y -= 2.0;

    w.rule(0.6);
    w.y -= LINE_H;
    w.table_header();
    w.in_table = true;

    for section in &preview.sections {
        w.ensure(LINE_H * 4.0);
        w.bold(&section.slab.label(), 9.0, LEFT + 1.0);
        w.y -= LINE_H;

        for group in &section.destinations {
            w.ensure(LINE_H * 3.0);
            w.bold(&group.destination_name, BODY_SIZE, LEFT + 3.0);
            w.y -= LINE_H;

            for line in &group.lines {
                w.ensure(LINE_H * 2.0);
                let name = truncate_chars(&format!("{} - {}", line.dealer_code, line.dealer_name), NAME_MAX_CHARS);
                w.text(&name, BODY_SIZE, LEFT + 6.0);
                w.right(&line.no_bags.to_string(), COL_BAGS, false);
                w.right(&format_fixed(line.mt), COL_MT, false);
                w.right(&format_km(line.km), COL_KM, false);
                w.right(&format_fixed(line.mtk), COL_MTK, false);
                w.right(&format_money(line.amount), COL_AMOUNT, false);
                w.y -= LINE_H;
            }
            let label = format!("Total {}", truncate_chars(&group.destination_name, 40));
            w.totals_row(&label, &group.subtotal);
        }

        w.y -= 0.8;
        w.rule(0.3);
        w.y -= LINE_H;
        w.totals_row("Slab Total", &section.subtotal);
        w.y -= 1.5;
    }

    w.ensure(LINE_H * 3.0);
    w.rule(0.9);
    w.y -= LINE_H;
    w.totals_row("GRAND TOTAL", &preview.grand_total);
    w.y -= LINE_H;
    w.in_table = false;

    let claim = preview.claim_line();
    let claim_lines = wrap_text_lines(&claim, 105);
    w.ensure(LINE_H * (claim_lines.len() as f32 + 8.0));
    for line in &claim_lines {
        w.text(line, 9.0, LEFT);
        w.y -= LINE_H + 0.4;
    }

    w.y -= LINE_H * 3.0;
    w.text("Received by", BODY_SIZE, LEFT);
    w.right(&letterhead.signature_label, RIGHT, true);
    w.y -= LINE_H * 3.0;
    w.right("Authorised Signatory", RIGHT, false);

    let pages = w.pages;
    let table_headers = w.table_headers;
    drop(w);

    let mut writer = BufWriter::new(Vec::<u8>::new());
    doc.save(&mut writer)
        .map_err(|e| BillingError::Pdf(e.to_string()))?;
    let bytes = writer
        .into_inner()
        .map_err(|e| BillingError::Pdf(e.to_string()))?;
    Ok(Rendered {
        bytes,
        pages,
        table_headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{grand_total, group_by_slab, BillLine, SlabKey};
    use crate::main_bill::MainBillHeader;
    use rust_decimal::Decimal;

    fn preview_with_lines(n: u32) -> MainBillPreview {
        let slab = SlabKey {
            from_km: Decimal::ZERO,
            to_km: Decimal::TEN,
            rate: Decimal::ONE_HUNDRED,
            is_mtk: false,
        };
        let lines = (1..=n)
            .map(|i| BillLine {
                entry_id: 1,
                entry_bill_number: "K-01".to_string(),
                destination_id: 1,
                destination_name: "Kannur".to_string(),
                slab: slab.clone(),
                dealer_id: i64::from(i),
                dealer_code: format!("D{i:03}"),
                dealer_name: "Dealer".to_string(),
                despatched_to: String::new(),
                km: Decimal::from(5),
                no_bags: 20,
                mt: Decimal::ONE,
                mtk: Decimal::from(5),
                amount: Decimal::ONE_HUNDRED,
                mda_number: String::new(),
                date: "2024-04-01".to_string(),
            })
            .collect();
        let sections = group_by_slab(lines);
        let grand_total = grand_total(&sections);
        MainBillPreview {
            header: MainBillHeader {
                bill_number: "MB-1".to_string(),
                ..MainBillHeader::default()
            },
            entry_ids: vec![1],
            entry_bill_numbers: vec!["K-01".to_string()],
            sections,
            grand_total,
            amount_in_words: "Rupees One Hundred Only".to_string(),
        }
    }

    #[test]
    fn wraps_on_word_boundaries() {
        let lines = wrap_text_lines("We are claiming for Rs. 750.00 (Rupees Seven Hundred Fifty Only)", 24);
        assert!(lines.iter().all(|l| l.len() <= 24));
        assert_eq!(lines.join(" "), "We are claiming for Rs. 750.00 (Rupees Seven Hundred Fifty Only)");
    }

    #[test]
    fn long_names_are_cut() {
        assert_eq!(truncate_chars("abcdef", 4), "abc.");
        assert_eq!(truncate_chars("abc", 4), "abc");
    }

    #[test]
    fn claim_block_page_has_no_column_header() {
        let letterhead = Letterhead::default();
        let mut claim_spilled = false;
        for n in 1..=120 {
            let r = render(&preview_with_lines(n), &letterhead).unwrap();
            assert!(r.bytes.starts_with(b"%PDF"));
            assert!(r.table_headers == r.pages || r.table_headers + 1 == r.pages);
            claim_spilled |= r.table_headers + 1 == r.pages;
        }
        assert!(claim_spilled);
    }
}
