use crate::{labels::LabelTable, pipeline::DetectedObject};
use ab_glyph::{FontVec, PxScale};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageResult, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
    rect::Rect,
};
use std::{fs, io, path::Path, sync::Arc};

const FALLBACK_COLOR: [u8; 3] = [0, 255, 0];
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: u32 = 2;
const LABEL_PADDING: i32 = 2;

/// Draws detection boxes (and, when a font is configured, their labels) onto frames.
pub struct Annotator {
    labels: Arc<LabelTable>,
    font: Option<FontVec>,
    font_scale: PxScale,
}

impl Annotator {
    pub fn new(labels: Arc<LabelTable>, font_path: Option<&Path>) -> io::Result<Self> {
        let font = match font_path {
            Some(path) => {
                let data = fs::read(path)?;
                let font = FontVec::try_from_vec(data).map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Invalid font {:?}: {}", path, e),
                    )
                })?;
                Some(font)
            }
            None => None,
        };

        Ok(Self {
            labels,
            font,
            font_scale: PxScale::from(16.0),
        })
    }

    pub fn render(&self, image: &DynamicImage, detections: &[DetectedObject]) -> RgbImage {
        let mut canvas = image.to_rgb8();
        let (width, height) = (canvas.width() as f32, canvas.height() as f32);
        if width == 0. || height == 0. {
            return canvas;
        }

        for detection in detections {
            let color = Rgb(self
                .labels
                .get(detection.class_index)
                .map(|label| label.color)
                .unwrap_or(FALLBACK_COLOR));

            let x = (detection.bbox.left * width).round() as i32;
            let y = (detection.bbox.top * height).round() as i32;
            let box_width = ((detection.bbox.width * width).round() as u32).max(1);
            let box_height = ((detection.bbox.height * height).round() as u32).max(1);

            for inset in 0..BOX_THICKNESS {
                let shrink = 2 * inset;
                if box_width <= shrink || box_height <= shrink {
                    break;
                }
                draw_hollow_rect_mut(
                    &mut canvas,
                    Rect::at(x + inset as i32, y + inset as i32)
                        .of_size(box_width - shrink, box_height - shrink),
                    color,
                );
            }

            if let Some(font) = &self.font {
                let text = format!("{}: {:.2}", detection.label, detection.confidence);
                let (text_width, text_height) = text_size(self.font_scale, font, &text);
                let bar_height = text_height as i32 + 2 * LABEL_PADDING;
                let bar_y = (y - bar_height).max(0);

                draw_filled_rect_mut(
                    &mut canvas,
                    Rect::at(x, bar_y).of_size(
                        text_width + 2 * LABEL_PADDING as u32,
                        bar_height as u32,
                    ),
                    color,
                );
                draw_text_mut(
                    &mut canvas,
                    TEXT_COLOR,
                    x + LABEL_PADDING,
                    bar_y + LABEL_PADDING,
                    self.font_scale,
                    font,
                    &text,
                );
            }
        }

        canvas
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> ImageResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder.encode_image(image)?;
    Ok(buffer)
}
