//! Drawing verdict cells. Renderers produce a handle that owns the drawing;
//! a [`GridContainer`] keeps at most one handle alive.

use anyhow::{Context, Result};
use image::{Rgba as Pixel, RgbaImage};
use std::fmt::Write as _;
use std::io;
use std::path::Path;

use crate::verdict::{Rgba, VerdictCell};

pub type ColorFn<'a> = &'a dyn Fn(&VerdictCell) -> Rgba;
pub type TooltipFn<'a> = &'a dyn Fn(&VerdictCell) -> String;

pub trait GridHandle {
    /// Free the drawing. Safe to call more than once.
    fn destroy(&mut self);

    fn is_destroyed(&self) -> bool;

    fn tooltip(&self, row: usize, column: usize) -> Option<&str>;

    /// Show the drawing on a terminal-like output.
    fn present(&self, out: &mut dyn io::Write) -> io::Result<()>;
}

pub trait GridRenderer {
    type Handle: GridHandle;

    fn render(&mut self, cells: &[VerdictCell], color: ColorFn, tooltip: TooltipFn) -> Result<Self::Handle>;
}

/// Per-cell tooltips keyed by position.
#[derive(Debug, Clone, Default)]
struct Tooltips {
    columns: usize,
    text: Vec<Option<String>>,
}

impl Tooltips {
    fn collect(cells: &[VerdictCell], tooltip: TooltipFn) -> Self {
        let (rows, columns) = dimensions(cells);
        let mut text = vec![None; rows * columns];
        for cell in cells {
            text[cell.row * columns + cell.column] = Some(tooltip(cell));
        }
        Self { columns, text }
    }

    fn get(&self, row: usize, column: usize) -> Option<&str> {
        if column >= self.columns {
            return None;
        }
        self.text.get(row * self.columns + column)?.as_deref()
    }

    fn clear(&mut self) {
        self.text.clear();
        self.columns = 0;
    }
}

fn dimensions(cells: &[VerdictCell]) -> (usize, usize) {
    let rows = cells.iter().map(|c| c.row + 1).max().unwrap_or(0);
    let columns = cells.iter().map(|c| c.column + 1).max().unwrap_or(0);
    (rows, columns)
}

/// Truecolor terminal swatch, two characters per cell.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiGridRenderer;

#[derive(Debug, Clone)]
pub struct AnsiGrid {
    text: String,
    tooltips: Tooltips,
    destroyed: bool,
}

impl AnsiGrid {
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl GridHandle for AnsiGrid {
    fn destroy(&mut self) {
        self.text.clear();
        self.tooltips.clear();
        self.destroyed = true;
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn tooltip(&self, row: usize, column: usize) -> Option<&str> {
        self.tooltips.get(row, column)
    }

    fn present(&self, out: &mut dyn io::Write) -> io::Result<()> {
        out.write_all(self.text.as_bytes())
    }
}

impl GridRenderer for AnsiGridRenderer {
    type Handle = AnsiGrid;

    fn render(&mut self, cells: &[VerdictCell], color: ColorFn, tooltip: TooltipFn) -> Result<AnsiGrid> {
        let (rows, columns) = dimensions(cells);
        let mut colors = vec![None; rows * columns];
        for cell in cells {
            colors[cell.row * columns + cell.column] = Some(color(cell));
        }

        let mut text = String::new();
        for row in 0..rows {
            for column in 0..columns {
                match colors[row * columns + column] {
                    Some(c) => write!(text, "\x1b[48;2;{};{};{}m  \x1b[0m", c.r, c.g, c.b)?,
                    None => text.push_str("  "),
                }
            }
            text.push('\n');
        }

        Ok(AnsiGrid {
            text,
            tooltips: Tooltips::collect(cells, tooltip),
            destroyed: false,
        })
    }
}

/// Raster swatch with a gap between cells, saved as PNG.
#[derive(Debug, Clone, Copy)]
pub struct ImageGridRenderer {
    pub cell_px: u32,
    pub gap_px: u32,
}

impl Default for ImageGridRenderer {
    fn default() -> Self {
        Self {
            cell_px: 30,
            gap_px: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageGrid {
    image: Option<RgbaImage>,
    tooltips: Tooltips,
}

impl ImageGrid {
    pub fn image(&self) -> Option<&RgbaImage> {
        self.image.as_ref()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("grid was destroyed"))?;
        image
            .save(path)
            .with_context(|| format!("writing grid to {}", path.display()))
    }
}

impl GridHandle for ImageGrid {
    fn destroy(&mut self) {
        self.image = None;
        self.tooltips.clear();
    }

    fn is_destroyed(&self) -> bool {
        self.image.is_none()
    }

    fn tooltip(&self, row: usize, column: usize) -> Option<&str> {
        self.tooltips.get(row, column)
    }

    fn present(&self, out: &mut dyn io::Write) -> io::Result<()> {
        match &self.image {
            Some(image) => writeln!(out, "[grid {}x{} px]", image.width(), image.height()),
            None => Ok(()),
        }
    }
}

impl GridRenderer for ImageGridRenderer {
    type Handle = ImageGrid;

    fn render(&mut self, cells: &[VerdictCell], color: ColorFn, tooltip: TooltipFn) -> Result<ImageGrid> {
        let (rows, columns) = dimensions(cells);
        if rows == 0 || self.cell_px == 0 {
            anyhow::bail!("nothing to draw");
        }
        let pitch = self.cell_px + self.gap_px;
        let width = columns as u32 * pitch + self.gap_px;
        let height = rows as u32 * pitch + self.gap_px;
        let mut image = RgbaImage::new(width, height);

        for cell in cells {
            let px = Pixel(color(cell).to_bytes());
            let x0 = self.gap_px + cell.column as u32 * pitch;
            let y0 = self.gap_px + cell.row as u32 * pitch;
            for y in y0..y0 + self.cell_px {
                for x in x0..x0 + self.cell_px {
                    image.put_pixel(x, y, px);
                }
            }
        }

        Ok(ImageGrid {
            image: Some(image),
            tooltips: Tooltips::collect(cells, tooltip),
        })
    }
}

/// A display region that destroys its previous drawing before each render.
pub struct GridContainer<R: GridRenderer> {
    renderer: R,
    current: Option<R::Handle>,
    visible: bool,
}

impl<R: GridRenderer> GridContainer<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            renderer,
            current: None,
            visible: false,
        }
    }

    pub fn render(&mut self, cells: &[VerdictCell], color: ColorFn, tooltip: TooltipFn) -> Result<&R::Handle> {
        self.clear();
        let handle = self.renderer.render(cells, color, tooltip)?;
        self.visible = true;
        Ok(self.current.insert(handle))
    }

    /// Destroy the current drawing and hide the region.
    pub fn clear(&mut self) {
        if let Some(mut old) = self.current.take() {
            old.destroy();
        }
        self.visible = false;
    }

    pub fn current(&self) -> Option<&R::Handle> {
        self.current.as_ref()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }
}

impl<R: GridRenderer> Drop for GridContainer<R> {
    fn drop(&mut self) {
        self.clear();
    }
}
