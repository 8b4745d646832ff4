//! Canvas renderer.
//!
//! Draws the source image and the visible detections onto a raqote
//! `DrawTarget`. Every call starts from a cleared canvas; there is no
//! incremental state. Pan and zoom only change the draw transform, never the
//! detection coordinates. Label text is rasterized with the bundled DejaVu
//! Sans face after the vector pass.

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use raqote::{
    DrawOptions, DrawTarget, LineCap, LineJoin, PathBuilder, SolidSource, Source, StrokeStyle,
    Transform,
};
use serde::Serialize;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::classes::{color_for, Rgb};
use crate::config::RenderSettings;
use crate::detect::{BoundingBox, Detection};
use crate::SimError;

pub const MIN_ZOOM: f32 = 0.1;
pub const MAX_ZOOM: f32 = 10.0;

const BACKGROUND: Rgb = Rgb {
    r: 0x1e,
    g: 0x1e,
    b: 0x1e,
};
const HIGHLIGHT: Rgb = Rgb {
    r: 0xff,
    g: 0xff,
    b: 0xff,
};

/// Label chip metrics, in screen pixels.
const CHIP_HEIGHT: f32 = 16.0;
const CHIP_PADDING: f32 = 4.0;
const LABEL_TEXT_SCALE: f32 = 12.0;

const LABEL_FONT_DATA: &[u8] = include_bytes!("../assets/DejaVuSans.ttf");

static LABEL_FONT: OnceLock<Option<FontArc>> = OnceLock::new();

fn label_font() -> Result<&'static FontArc> {
    LABEL_FONT
        .get_or_init(|| FontArc::try_from_slice(LABEL_FONT_DATA).ok())
        .as_ref()
        .ok_or_else(|| anyhow!("bundled label font could not be parsed"))
}

const SEGMENT_FILL_ALPHA: u8 = 90;
const GRID_ALPHA: u8 = 60;
const SELECTION_MARGIN: f32 = 3.0;

// ----------------------------------------------------------------------------
// View transform
// ----------------------------------------------------------------------------

/// Pan offset (canvas pixels) and zoom factor applied to the whole scene.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ViewTransform {
    pub pan_x: f32,
    pub pan_y: f32,
    pub zoom: f32,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            pan_x: 0.0,
            pan_y: 0.0,
            zoom: 1.0,
        }
    }
}

impl ViewTransform {
    pub fn pan_by(&mut self, dx: f32, dy: f32) {
        self.pan_x += dx;
        self.pan_y += dy;
    }

    /// Multiply zoom by `factor`, clamped to `[MIN_ZOOM, MAX_ZOOM]`.
    pub fn zoom_by(&mut self, factor: f32) {
        if factor.is_finite() && factor > 0.0 {
            self.zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        }
    }

    /// Zoom while keeping canvas point (`cx`, `cy`) over the same image point.
    pub fn zoom_about(&mut self, factor: f32, cx: f32, cy: f32) {
        let (ix, iy) = self.to_image(cx, cy);
        self.zoom_by(factor);
        self.pan_x = cx - ix * self.zoom;
        self.pan_y = cy - iy * self.zoom;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn to_canvas(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.zoom + self.pan_x, y * self.zoom + self.pan_y)
    }

    pub fn to_image(&self, cx: f32, cy: f32) -> (f32, f32) {
        ((cx - self.pan_x) / self.zoom, (cy - self.pan_y) / self.zoom)
    }

    fn matrix(&self) -> Transform {
        Transform::new(self.zoom, 0.0, 0.0, self.zoom, self.pan_x, self.pan_y)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationMode {
    /// Box outline plus label chip.
    #[default]
    Standard,
    /// Thin outline with emphasised corners.
    Wireframe,
    /// Translucent filled box.
    Segmentation,
    /// Confidence-weighted intensity layer, no per-box drawing.
    Heatmap,
}

impl FromStr for VisualizationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "standard" | "box" => Ok(Self::Standard),
            "wireframe" => Ok(Self::Wireframe),
            "segmentation" | "segment" => Ok(Self::Segmentation),
            "heatmap" => Ok(Self::Heatmap),
            other => Err(SimError::not_found("visualization mode", other).into()),
        }
    }
}

// ----------------------------------------------------------------------------
// Output
// ----------------------------------------------------------------------------

/// A drawn label chip: `text` starts at the chip's top-left corner
/// (`x`, `y`), in canvas space.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LabelAnnotation {
    pub detection_id: String,
    pub text: String,
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Debug)]
pub struct RenderedFrame {
    pub image: RgbaImage,
    pub labels: Vec<LabelAnnotation>,
}

impl RenderedFrame {
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.image
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| anyhow!("failed to write {}: {}", path.display(), e))
    }
}

/// Everything one frame depends on.
#[derive(Clone, Copy, Debug)]
pub struct RenderInput<'a> {
    pub image: &'a RgbaImage,
    pub detections: &'a [Detection],
    pub selected: Option<&'a str>,
    pub view: ViewTransform,
    pub mode: VisualizationMode,
    pub show_grid: bool,
}

// ----------------------------------------------------------------------------
// Renderer
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct CanvasRenderer {
    settings: RenderSettings,
}

impl CanvasRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Clear the canvas and draw `input` from scratch. The canvas has the
    /// source image's dimensions.
    pub fn render(&self, input: &RenderInput<'_>) -> Result<RenderedFrame> {
        let (width, height) = input.image.dimensions();
        if width == 0 || height == 0 {
            return Err(SimError::InvalidImageDimensions { width, height }.into());
        }

        let font = label_font()?;
        let mut dt = DrawTarget::new(width as i32, height as i32);
        dt.clear(solid(BACKGROUND, 0xff));
        dt.set_transform(&input.view.matrix());

        draw_source_image(&mut dt, input.image);
        if input.show_grid {
            self.draw_grid(&mut dt, width, height, input.view.zoom);
        }

        let mut chips = Vec::new();
        if input.mode == VisualizationMode::Heatmap {
            self.draw_heatmap(&mut dt, input.detections, width, height);
        } else {
            for det in input.detections {
                let color = color_for(det.class());
                match input.mode {
                    VisualizationMode::Standard => {
                        self.draw_standard(&mut dt, det.bbox(), color, input.view.zoom)
                    }
                    VisualizationMode::Wireframe => {
                        self.draw_wireframe(&mut dt, det.bbox(), color, input.view.zoom)
                    }
                    VisualizationMode::Segmentation => {
                        self.draw_segmentation(&mut dt, det.bbox(), color, input.view.zoom)
                    }
                    VisualizationMode::Heatmap => {}
                }
                chips.push(draw_label_chip(&mut dt, det, color, &input.view, font));
            }
        }

        if let Some(selected) = input
            .selected
            .and_then(|id| input.detections.iter().find(|det| det.id() == id))
        {
            self.draw_selection(&mut dt, selected.bbox(), input.view.zoom);
        }

        let mut image = canvas_to_image(&dt)?;
        let scale = PxScale::from(LABEL_TEXT_SCALE);
        let mut labels = Vec::with_capacity(chips.len());
        for (label, ink) in chips {
            let (_, text_h) = text_size(scale, font, &label.text);
            let text_y = label.y + (CHIP_HEIGHT - text_h as f32).max(0.0) / 2.0;
            draw_text_mut(
                &mut image,
                ink,
                (label.x + CHIP_PADDING).round() as i32,
                text_y.round() as i32,
                scale,
                font,
                &label.text,
            );
            labels.push(label);
        }

        Ok(RenderedFrame { image, labels })
    }

    fn stroke_style(&self, scale: f32, zoom: f32) -> StrokeStyle {
        StrokeStyle {
            width: self.settings.line_width * scale / zoom,
            cap: LineCap::Square,
            join: LineJoin::Miter,
            ..StrokeStyle::default()
        }
    }

    fn draw_standard(&self, dt: &mut DrawTarget, bbox: BoundingBox, color: Rgb, zoom: f32) {
        stroke_rect(dt, bbox, solid(color, 0xff), &self.stroke_style(1.0, zoom));
    }

    fn draw_wireframe(&self, dt: &mut DrawTarget, bbox: BoundingBox, color: Rgb, zoom: f32) {
        stroke_rect(dt, bbox, solid(color, 0xc0), &self.stroke_style(0.5, zoom));

        let len = bbox.width.min(bbox.height) * 0.2;
        let (l, t, r, b) = (bbox.x, bbox.y, bbox.right(), bbox.bottom());
        let mut pb = PathBuilder::new();
        for (cx, cy, dx, dy) in [
            (l, t, len, len),
            (r, t, -len, len),
            (l, b, len, -len),
            (r, b, -len, -len),
        ] {
            pb.move_to(cx + dx, cy);
            pb.line_to(cx, cy);
            pb.line_to(cx, cy + dy);
        }
        let path = pb.finish();
        dt.stroke(
            &path,
            &Source::Solid(solid(color, 0xff)),
            &self.stroke_style(1.5, zoom),
            &DrawOptions::new(),
        );
    }

    fn draw_segmentation(&self, dt: &mut DrawTarget, bbox: BoundingBox, color: Rgb, zoom: f32) {
        dt.fill_rect(
            bbox.x,
            bbox.y,
            bbox.width,
            bbox.height,
            &Source::Solid(solid(color, SEGMENT_FILL_ALPHA)),
            &DrawOptions::new(),
        );
        stroke_rect(dt, bbox, solid(color, 0xff), &self.stroke_style(0.5, zoom));
    }

    /// Sum confidence per cell over every box covering the cell centre, then
    /// paint cells on a blue-to-red ramp normalised to the hottest cell.
    fn draw_heatmap(&self, dt: &mut DrawTarget, detections: &[Detection], width: u32, height: u32) {
        let cell = self.settings.heatmap_cell;
        let cols = width.div_ceil(cell) as usize;
        let rows = height.div_ceil(cell) as usize;
        let mut intensity = vec![0.0f32; cols * rows];

        for det in detections {
            let bbox = det.bbox();
            for row in 0..rows {
                let cy = (row as u32 * cell) as f32 + cell as f32 / 2.0;
                if cy < bbox.y || cy > bbox.bottom() {
                    continue;
                }
                for col in 0..cols {
                    let cx = (col as u32 * cell) as f32 + cell as f32 / 2.0;
                    if cx >= bbox.x && cx <= bbox.right() {
                        intensity[row * cols + col] += det.confidence();
                    }
                }
            }
        }

        let max = intensity.iter().copied().fold(0.0f32, f32::max);
        if max <= 0.0 {
            return;
        }
        for (index, value) in intensity.iter().enumerate() {
            if *value <= 0.0 {
                continue;
            }
            let norm = value / max;
            let color = Rgb {
                r: (255.0 * norm) as u8,
                g: (64.0 * (1.0 - norm)) as u8,
                b: (255.0 * (1.0 - norm)) as u8,
            };
            let alpha = (40.0 + 140.0 * norm) as u8;
            let (col, row) = ((index % cols) as u32, (index / cols) as u32);
            dt.fill_rect(
                (col * cell) as f32,
                (row * cell) as f32,
                cell as f32,
                cell as f32,
                &Source::Solid(solid(color, alpha)),
                &DrawOptions::new(),
            );
        }
    }

    fn draw_grid(&self, dt: &mut DrawTarget, width: u32, height: u32, zoom: f32) {
        let spacing = self.settings.grid_spacing;
        let mut pb = PathBuilder::new();
        for x in (0..=width).step_by(spacing as usize) {
            pb.move_to(x as f32, 0.0);
            pb.line_to(x as f32, height as f32);
        }
        for y in (0..=height).step_by(spacing as usize) {
            pb.move_to(0.0, y as f32);
            pb.line_to(width as f32, y as f32);
        }
        let path = pb.finish();
        let style = StrokeStyle {
            width: 1.0 / zoom,
            ..StrokeStyle::default()
        };
        dt.stroke(
            &path,
            &Source::Solid(solid(HIGHLIGHT, GRID_ALPHA)),
            &style,
            &DrawOptions::new(),
        );
    }

    fn draw_selection(&self, dt: &mut DrawTarget, bbox: BoundingBox, zoom: f32) {
        let style = StrokeStyle {
            dash_array: vec![6.0 / zoom, 4.0 / zoom],
            dash_offset: 0.0,
            ..self.stroke_style(1.0, zoom)
        };
        stroke_rect(
            dt,
            bbox.inflate(SELECTION_MARGIN / zoom),
            solid(HIGHLIGHT, 0xff),
            &style,
        );
    }
}

/// Chip above the box (inside it when there is no room above). Sized in
/// screen pixels so it reads the same at any zoom. Returns the annotation and
/// the ink color for its text.
fn draw_label_chip(
    dt: &mut DrawTarget,
    det: &Detection,
    color: Rgb,
    view: &ViewTransform,
    font: &FontArc,
) -> (LabelAnnotation, Rgba<u8>) {
    let text = det.label();
    let bbox = det.bbox();
    let (text_w, _) = text_size(PxScale::from(LABEL_TEXT_SCALE), font, &text);
    let chip_h = CHIP_HEIGHT / view.zoom;
    let chip_w = (text_w as f32 + 2.0 * CHIP_PADDING) / view.zoom;
    let chip_y = if bbox.y >= chip_h { bbox.y - chip_h } else { bbox.y };
    dt.fill_rect(
        bbox.x,
        chip_y,
        chip_w,
        chip_h,
        &Source::Solid(solid(color, 0xe0)),
        &DrawOptions::new(),
    );
    let (x, y) = view.to_canvas(bbox.x, chip_y);
    let annotation = LabelAnnotation {
        detection_id: det.id().to_string(),
        text,
        x,
        y,
    };
    (annotation, label_ink(color))
}

/// Dark text on light chips, white otherwise.
fn label_ink(chip: Rgb) -> Rgba<u8> {
    let luma = 0.299 * chip.r as f32 + 0.587 * chip.g as f32 + 0.114 * chip.b as f32;
    if luma > 150.0 {
        Rgba([20, 20, 20, 255])
    } else {
        Rgba([255, 255, 255, 255])
    }
}

fn stroke_rect(dt: &mut DrawTarget, bbox: BoundingBox, color: SolidSource, style: &StrokeStyle) {
    let mut pb = PathBuilder::new();
    pb.rect(bbox.x, bbox.y, bbox.width, bbox.height);
    let path = pb.finish();
    dt.stroke(&path, &Source::Solid(color), style, &DrawOptions::new());
}

fn solid(color: Rgb, alpha: u8) -> SolidSource {
    SolidSource::from_unpremultiplied_argb(alpha, color.r, color.g, color.b)
}

/// RGBA8 -> premultiplied ARGB32 as raqote expects.
fn draw_source_image(dt: &mut DrawTarget, image: &RgbaImage) {
    let data: Vec<u32> = image
        .pixels()
        .map(|pixel| {
            let [r, g, b, a] = pixel.0;
            let premultiply = |c: u8| (c as u32 * a as u32 + 127) / 255;
            (a as u32) << 24 | premultiply(r) << 16 | premultiply(g) << 8 | premultiply(b)
        })
        .collect();
    let img = raqote::Image {
        width: image.width() as i32,
        height: image.height() as i32,
        data: &data,
    };
    dt.draw_image_at(0.0, 0.0, &img, &DrawOptions::new());
}

/// Premultiplied ARGB32 canvas -> straight RGBA8 image.
fn canvas_to_image(dt: &DrawTarget) -> Result<RgbaImage> {
    let (width, height) = (dt.width() as u32, dt.height() as u32);
    let mut bytes = Vec::with_capacity(dt.get_data().len() * 4);
    for &pixel in dt.get_data() {
        let a = (pixel >> 24) & 0xff;
        let unpremultiply = |c: u32| {
            if a == 0 {
                0
            } else {
                ((c * 255 + a / 2) / a).min(255) as u8
            }
        };
        bytes.push(unpremultiply((pixel >> 16) & 0xff));
        bytes.push(unpremultiply((pixel >> 8) & 0xff));
        bytes.push(unpremultiply(pixel & 0xff));
        bytes.push(a as u8);
    }
    RgbaImage::from_raw(width, height, bytes).ok_or_else(|| anyhow!("canvas buffer size mismatch"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_transform_inverts() {
        let mut view = ViewTransform::default();
        view.pan_by(12.0, -4.0);
        view.zoom_by(2.5);
        let (cx, cy) = view.to_canvas(10.0, 20.0);
        let (ix, iy) = view.to_image(cx, cy);
        assert!((ix - 10.0).abs() < 1e-4 && (iy - 20.0).abs() < 1e-4);
    }

    #[test]
    fn zoom_is_clamped() {
        let mut view = ViewTransform::default();
        view.zoom_by(1000.0);
        assert_eq!(view.zoom, MAX_ZOOM);
        view.zoom_by(0.000_001);
        assert_eq!(view.zoom, MIN_ZOOM);
        view.zoom_by(-3.0);
        assert_eq!(view.zoom, MIN_ZOOM);
        view.reset();
        assert_eq!(view, ViewTransform::default());
    }

    #[test]
    fn zoom_about_keeps_anchor_fixed() {
        let mut view = ViewTransform::default();
        let before = view.to_image(50.0, 40.0);
        view.zoom_about(2.0, 50.0, 40.0);
        let after = view.to_image(50.0, 40.0);
        assert!((before.0 - after.0).abs() < 1e-4 && (before.1 - after.1).abs() < 1e-4);
    }

    #[test]
    fn bundled_font_loads() {
        let font = label_font().unwrap();
        let (w, h) = text_size(PxScale::from(LABEL_TEXT_SCALE), font, "person 91%");
        assert!(w > 0 && h > 0);
    }

    #[test]
    fn label_ink_contrasts_with_chip() {
        assert_eq!(label_ink(Rgb { r: 230, g: 230, b: 200 }), Rgba([20, 20, 20, 255]));
        assert_eq!(label_ink(Rgb { r: 40, g: 60, b: 120 }), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn parses_visualization_modes() {
        assert_eq!("Heatmap".parse::<VisualizationMode>().unwrap(), VisualizationMode::Heatmap);
        assert_eq!("segment".parse::<VisualizationMode>().unwrap(), VisualizationMode::Segmentation);
        assert!("xray".parse::<VisualizationMode>().is_err());
    }
}
