//! Table rendering.
//!
//! The [`Renderer`] trait is the seam to the PDF library: it appends body
//! rows to one growing document and serializes it on demand. [`PdfRenderer`]
//! is the printpdf-backed implementation used by default.

use crate::{
    config::{Render, Sanitize},
    protocol::Artifact,
    report::Row,
    sanitize,
};
use anyhow::{Result, anyhow};
use printpdf::path::PaintMode;
use printpdf::*;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::debug;

const MM_TO_PT: f32 = 72.0 / 25.4;
// Average Helvetica advance as a fraction of the font size.
const AVG_GLYPH_WIDTH: f32 = 0.52;
const CELL_PADDING_MM: f32 = 1.5;

pub trait Renderer {
    /// Opens the table. Called once per job before any rows.
    fn start(&mut self, header: &[String], footer: &[String]) -> Result<()>;
    /// Appends one batch of body rows, in arrival order.
    fn append_table(&mut self, header: &[String], rows: &[Row], footer: &[String]) -> Result<()>;
    /// Serializes everything appended so far.
    fn finalize(&mut self) -> Result<Artifact>;
    /// Drops the current document and starts a fresh one.
    fn reset(&mut self) -> Result<()>;
}

/// Builds renderers inside the execution unit that will own them.
pub trait RendererFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Renderer>>;
}

#[derive(Debug, Clone, Default)]
pub struct PdfRendererFactory {
    render: Render,
    sanitize: Sanitize,
}

impl PdfRendererFactory {
    pub fn new(render: &Render, sanitize: &Sanitize) -> Self {
        Self {
            render: render.clone(),
            sanitize: sanitize.clone(),
        }
    }
}

impl RendererFactory for PdfRendererFactory {
    fn create(&self) -> Result<Box<dyn Renderer>> {
        Ok(Box::new(PdfRenderer::new(&self.render, &self.sanitize)?))
    }
}

struct Page {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    font: IndirectFontRef,
    bold: IndirectFontRef,
}

pub struct PdfRenderer {
    cfg: Render,
    sanitize: Sanitize,
    page: Option<Page>,
    header: Vec<String>,
    footer: Vec<String>,
    cursor_y_mm: f32,
    pages: usize,
    body_rows: usize,
    started: bool,
    finalized: bool,
}

impl PdfRenderer {
    pub fn new(cfg: &Render, sanitize: &Sanitize) -> Result<Self> {
        if cfg.font_size <= 0.0 || cfg.row_height_mm <= 0.0 {
            return Err(anyhow!("font_size and row_height_mm must be positive"));
        }
        if cfg.page_height_mm <= cfg.margin_mm * 2.0 + cfg.row_height_mm * 3.0 {
            return Err(anyhow!("page is too short for a header, a row and a footer"));
        }
        let mut r = Self {
            cfg: cfg.clone(),
            sanitize: sanitize.clone(),
            page: None,
            header: Vec::new(),
            footer: Vec::new(),
            cursor_y_mm: 0.0,
            pages: 0,
            body_rows: 0,
            started: false,
            finalized: false,
        };
        r.open_document()?;
        Ok(r)
    }

    fn open_document(&mut self) -> Result<()> {
        let (doc, page_idx, layer_idx) = PdfDocument::new(
            self.cfg.title.as_str(),
            Mm(self.cfg.page_width_mm),
            Mm(self.cfg.page_height_mm),
            "Layer 1",
        );
        let font = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| anyhow!("adding font: {e:?}"))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| anyhow!("adding font: {e:?}"))?;
        let layer = doc.get_page(page_idx).get_layer(layer_idx);

        self.page = Some(Page {
            doc,
            layer,
            font,
            bold,
        });
        self.header.clear();
        self.footer.clear();
        self.cursor_y_mm = self.cfg.page_height_mm - self.cfg.margin_mm;
        self.pages = 1;
        self.body_rows = 0;
        self.started = false;
        self.finalized = false;
        self.draw_title()
    }

    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| anyhow!("document already finalized"))
    }

    fn columns(&self) -> usize {
        self.header.len().max(1)
    }

    fn column_width_mm(&self) -> f32 {
        (self.cfg.page_width_mm - self.cfg.margin_mm * 2.0) / self.columns() as f32
    }

    fn max_chars(&self) -> usize {
        let usable_pt = (self.column_width_mm() - CELL_PADDING_MM * 2.0) * MM_TO_PT;
        ((usable_pt / (self.cfg.font_size * AVG_GLYPH_WIDTH)).floor() as usize).max(1)
    }

    fn draw_title(&mut self) -> Result<()> {
        let mut line = self.cfg.title.clone();
        if self.cfg.show_generated_at {
            let now = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string());
            line = format!("{line}  -  generated {now}");
        }
        if line.is_empty() {
            return Ok(());
        }
        let size = self.cfg.font_size * 1.4;
        let baseline = self.cursor_y_mm - size / MM_TO_PT;
        let text = sanitize::cell_text(&self.sanitize, &line);
        let page = self.page()?;
        page.layer.set_fill_color(rgb([0, 0, 0]));
        page.layer
            .use_text(text, size, Mm(self.cfg.margin_mm), Mm(baseline), &page.bold);
        self.cursor_y_mm = baseline - self.cfg.row_height_mm * 0.5;
        Ok(())
    }

    fn new_page(&mut self) -> Result<()> {
        let page = self.page.as_mut().ok_or_else(|| anyhow!("document already finalized"))?;
        let (page_idx, layer_idx) = page.doc.add_page(
            Mm(self.cfg.page_width_mm),
            Mm(self.cfg.page_height_mm),
            format!("Page {}", self.pages + 1),
        );
        page.layer = page.doc.get_page(page_idx).get_layer(layer_idx);
        self.pages += 1;
        self.cursor_y_mm = self.cfg.page_height_mm - self.cfg.margin_mm;
        debug!(page = self.pages, "renderer opened page");
        Ok(())
    }

    fn fits(&self, rows: usize) -> bool {
        self.cursor_y_mm - self.cfg.row_height_mm * rows as f32 >= self.cfg.margin_mm
    }

    /// Makes room for `rows` more rows, repeating the header on a new page.
    fn ensure_room(&mut self, rows: usize) -> Result<()> {
        if self.fits(rows) {
            return Ok(());
        }
        self.new_page()?;
        self.draw_header()
    }

    fn draw_header(&mut self) -> Result<()> {
        if self.header.is_empty() {
            return Ok(());
        }
        let cells = self.header.clone();
        self.draw_row(&cells, Some(self.cfg.header_fill), [255, 255, 255], true)
    }

    fn draw_row(
        &mut self,
        cells: &[String],
        fill: Option<[u8; 3]>,
        text_color: [u8; 3],
        bold: bool,
    ) -> Result<()> {
        let row_h = self.cfg.row_height_mm;
        let top = self.cursor_y_mm;
        let left = self.cfg.margin_mm;
        let right = self.cfg.page_width_mm - self.cfg.margin_mm;
        let col_w = self.column_width_mm();
        let max_chars = self.max_chars();
        let columns = self.columns();
        let font_size = self.cfg.font_size;
        let baseline = top - row_h + (row_h - font_size / MM_TO_PT) / 2.0;

        let texts: Vec<String> = (0..columns)
            .map(|i| {
                let raw = cells.get(i).map(String::as_str).unwrap_or("");
                sanitize::truncate(&sanitize::cell_text(&self.sanitize, raw), max_chars)
            })
            .collect();

        let page = self.page()?;
        if let Some(color) = fill {
            page.layer.set_fill_color(rgb(color));
            page.layer.add_rect(
                Rect::new(Mm(left), Mm(top - row_h), Mm(right), Mm(top)).with_mode(PaintMode::Fill),
            );
        }
        page.layer.set_fill_color(rgb(text_color));
        let font = if bold { &page.bold } else { &page.font };
        for (i, text) in texts.into_iter().enumerate() {
            if text.is_empty() {
                continue;
            }
            let x = left + col_w * i as f32 + CELL_PADDING_MM;
            page.layer.use_text(text, font_size, Mm(x), Mm(baseline), font);
        }

        self.cursor_y_mm = top - row_h;
        Ok(())
    }
}

impl Renderer for PdfRenderer {
    fn start(&mut self, header: &[String], footer: &[String]) -> Result<()> {
        if self.finalized {
            return Err(anyhow!("document already finalized"));
        }
        if self.started {
            return Err(anyhow!("table already started"));
        }
        self.header = header.to_vec();
        self.footer = footer.to_vec();
        self.started = true;
        // Header plus at least one row must fit below the title.
        self.ensure_room(2)?;
        self.draw_header()
    }

    fn append_table(&mut self, header: &[String], rows: &[Row], footer: &[String]) -> Result<()> {
        if !self.started {
            self.start(header, footer)?;
        }
        for row in rows {
            self.ensure_room(1)?;
            let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
            let striped = (self.body_rows % 2 == 0) == self.cfg.stripe_even_rows;
            let fill = striped.then_some(self.cfg.stripe_fill);
            self.draw_row(&cells, fill, [0, 0, 0], false)?;
            self.body_rows += 1;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<Artifact> {
        if !self.started {
            return Err(anyhow!("finalize called before the table was started"));
        }
        if !self.footer.is_empty() {
            self.ensure_room(1)?;
            let footer = self.footer.clone();
            self.draw_row(&footer, Some(self.cfg.header_fill), [255, 255, 255], true)?;
        }

        let page = self
            .page
            .take()
            .ok_or_else(|| anyhow!("document already finalized"))?;
        let bytes = page
            .doc
            .save_to_bytes()
            .map_err(|e| anyhow!("serializing PDF: {e:?}"))?;
        self.finalized = true;

        debug!(
            pages = self.pages,
            rows = self.body_rows,
            bytes = bytes.len(),
            "renderer finalized document"
        );
        Ok(Artifact {
            bytes,
            body_rows: self.body_rows,
            pages: self.pages,
        })
    }

    fn reset(&mut self) -> Result<()> {
        self.open_document()
    }
}

fn rgb(c: [u8; 3]) -> Color {
    Color::Rgb(Rgb::new(
        c[0] as f32 / 255.0,
        c[1] as f32 / 255.0,
        c[2] as f32 / 255.0,
        None,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> PdfRenderer {
        PdfRenderer::new(&Render::default(), &Sanitize::default()).unwrap()
    }

    fn header() -> Vec<String> {
        vec!["A".into(), "B".into()]
    }

    #[test]
    fn finalize_produces_pdf_bytes() {
        let mut r = renderer();
        r.start(&header(), &["sum".into(), "-".into()]).unwrap();
        r.append_table(&header(), &[vec![1i64.into(), "x".into()]], &[])
            .unwrap();
        let artifact = r.finalize().unwrap();
        assert!(artifact.bytes.starts_with(b"%PDF"));
        assert_eq!(artifact.body_rows, 1);
        assert_eq!(artifact.pages, 1);
    }

    #[test]
    fn long_bodies_paginate() {
        let mut r = renderer();
        r.start(&header(), &[]).unwrap();
        let rows: Vec<Row> = (0..200i64).map(|i| vec![i.into(), "row".into()]).collect();
        r.append_table(&header(), &rows, &[]).unwrap();
        let artifact = r.finalize().unwrap();
        assert_eq!(artifact.body_rows, 200);
        assert!(artifact.pages > 1);
    }

    #[test]
    fn finalize_twice_fails_until_reset() {
        let mut r = renderer();
        r.start(&header(), &[]).unwrap();
        r.finalize().unwrap();
        assert!(r.finalize().is_err());
        r.reset().unwrap();
        r.start(&header(), &[]).unwrap();
        assert_eq!(r.finalize().unwrap().body_rows, 0);
    }

    #[test]
    fn rejects_degenerate_geometry() {
        let cfg = Render {
            row_height_mm: 0.0,
            ..Render::default()
        };
        assert!(PdfRenderer::new(&cfg, &Sanitize::default()).is_err());
    }
}
