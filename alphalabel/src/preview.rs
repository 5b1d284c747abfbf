//! Annotation preview: draw label boxes over corpus images.
//!
//! Reads `images/<split>` and the matching `labels/<split>` files and writes
//! `visualization/viz_<name>` with one 3 px box per label line.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use log::{debug, info, warn};

use crate::annotation::{parse_label_file, AnnotationRecord};
use crate::color_utils::symbols;
use crate::config::PreviewConfig;
use crate::image_input::find_images_in_directory;
use crate::manifest::CorpusManifest;
use crate::output_manager::{image_extension, CorpusLayout};

const BOX_THICKNESS: i32 = 3;

const PALETTE: [[u8; 4]; 6] = [
    [220, 40, 40, 255],  // red
    [34, 139, 34, 255],  // forest green
    [0, 100, 255, 255],  // blue
    [255, 165, 0, 255],  // orange
    [148, 0, 211, 255],  // violet
    [0, 190, 190, 255],  // teal
];

/// Box color for a class index
pub fn class_color(class_index: usize) -> Rgba<u8> {
    Rgba(PALETTE[class_index % PALETTE.len()])
}

/// Draw every record over the image as a thick hollow rectangle
pub fn draw_annotations(img: &mut RgbaImage, records: &[AnnotationRecord]) {
    let (width, height) = img.dimensions();
    for record in records {
        let (x1, y1, x2, y2) = record.region.to_pixel_corners(width, height);
        let x1 = x1.max(0.0) as i32;
        let y1 = y1.max(0.0) as i32;
        let x2 = (x2.min(width as f32) as i32).max(x1 + 1);
        let y2 = (y2.min(height as f32) as i32).max(y1 + 1);
        let color = class_color(record.class_index);

        // Grow inward so the box stays inside the image at the borders
        for offset in 0..BOX_THICKNESS {
            let w = x2 - x1 - 2 * offset;
            let h = y2 - y1 - 2 * offset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(x1 + offset, y1 + offset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(img, rect, color);
        }
    }
}

/// Outcome of a preview run
#[derive(Debug, Default)]
pub struct PreviewReport {
    pub written: Vec<PathBuf>,
    /// Images without a readable label file
    pub skipped: usize,
}

fn render_one(image_path: &Path, label_path: &Path, output_path: &Path) -> Result<()> {
    let contents = fs::read_to_string(label_path)?;
    let records = parse_label_file(&contents)
        .with_context(|| format!("Invalid label file {}", label_path.display()))?;

    let mut img = image::open(image_path)?.to_rgba8();
    draw_annotations(&mut img, &records);

    match image_extension(output_path).as_str() {
        "png" | "webp" | "gif" | "bmp" => img.save(output_path)?,
        _ => DynamicImage::ImageRgba8(img).to_rgb8().save(output_path)?,
    }
    Ok(())
}

/// Render up to `count` previews for one split
pub fn render_previews(layout: &CorpusLayout, config: &PreviewConfig) -> Result<PreviewReport> {
    let images_dir = layout.images_dir(config.split);
    if !images_dir.is_dir() {
        anyhow::bail!("No image directory at {}", images_dir.display());
    }

    if let Ok(manifest) = CorpusManifest::read(&layout.manifest_path()) {
        debug!("Corpus classes: {:?}", manifest.names);
    }

    let output_dir = layout.visualization_dir();
    fs::create_dir_all(&output_dir)?;

    let mut report = PreviewReport::default();
    for image_path in find_images_in_directory(&images_dir)?
        .into_iter()
        .take(config.count)
    {
        let label_path = layout.label_for_image(config.split, &image_path);
        if !label_path.exists() {
            warn!(
                "{}No label for {}",
                symbols::warning(),
                image_path.display()
            );
            report.skipped += 1;
            continue;
        }

        let Some(name) = image_path.file_name() else {
            continue;
        };
        let output_path = output_dir.join(format!("viz_{}", name.to_string_lossy()));
        match render_one(&image_path, &label_path, &output_path) {
            Ok(()) => report.written.push(output_path),
            Err(e) => {
                warn!(
                    "{}Could not preview {}: {}",
                    symbols::warning(),
                    image_path.display(),
                    e
                );
                report.skipped += 1;
            }
        }
    }

    info!(
        "{} Wrote {} preview(s) to {}",
        symbols::completed_successfully(),
        report.written.len(),
        output_dir.display()
    );
    Ok(report)
}

/// `preview` command entry point
pub fn run_preview(config: &PreviewConfig) -> Result<PreviewReport> {
    let layout = CorpusLayout::new(config.corpus_dir.clone());
    let report = render_previews(&layout, config)?;
    for path in &report.written {
        println!("{}", path.display());
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::BoundingRegion;
    use crate::config::BaseConfig;
    use crate::split::Split;
    use tempfile::TempDir;

    fn record(class_index: usize) -> AnnotationRecord {
        AnnotationRecord {
            class_index,
            region: BoundingRegion {
                x_center: 0.5,
                y_center: 0.5,
                width: 0.5,
                height: 0.5,
            },
        }
    }

    #[test]
    fn test_draw_annotations_outlines_box() {
        let mut img = RgbaImage::from_pixel(40, 40, Rgba([0, 0, 0, 0]));
        draw_annotations(&mut img, &[record(1)]);

        let color = class_color(1);
        // Box spans 10..30 on both axes
        assert_eq!(img.get_pixel(10, 20), &color);
        assert_eq!(img.get_pixel(12, 20), &color);
        assert_eq!(img.get_pixel(20, 10), &color);
        // Interior and exterior untouched
        assert_eq!(img.get_pixel(20, 20)[3], 0);
        assert_eq!(img.get_pixel(5, 5)[3], 0);
    }

    #[test]
    fn test_full_image_box_stays_in_bounds() {
        let mut img = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 0]));
        let full = AnnotationRecord {
            class_index: 0,
            region: BoundingRegion {
                x_center: 0.5,
                y_center: 0.5,
                width: 1.0,
                height: 1.0,
            },
        };
        draw_annotations(&mut img, &[full]);
        assert_eq!(img.get_pixel(0, 0), &class_color(0));
        assert_eq!(img.get_pixel(7, 7), &class_color(0));
    }

    #[test]
    fn test_class_colors_differ() {
        assert_ne!(class_color(0), class_color(1));
        assert_eq!(class_color(0), class_color(PALETTE.len()));
    }

    #[test]
    fn test_render_previews_writes_viz_files() {
        let temp_dir = TempDir::new().unwrap();
        let layout = CorpusLayout::new(temp_dir.path());
        layout.create_dirs().unwrap();

        for name in ["healthy_a", "healthy_b"] {
            RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 255]))
                .save(layout.image_path(Split::Train, name, "png"))
                .unwrap();
        }
        fs::write(
            layout.label_path(Split::Train, "healthy_a"),
            record(1).to_label_line(),
        )
        .unwrap();

        let config = PreviewConfig {
            base: BaseConfig {
                skip_metadata: true,
                strict: true,
            },
            corpus_dir: temp_dir.path().to_path_buf(),
            split: Split::Train,
            count: 5,
        };
        let report = render_previews(&layout, &config).unwrap();

        assert_eq!(report.written.len(), 1);
        assert_eq!(report.skipped, 1);
        let viz = layout.visualization_dir().join("viz_healthy_a.png");
        assert_eq!(report.written[0], viz);
        let drawn = image::open(&viz).unwrap().to_rgba8();
        assert_eq!(drawn.get_pixel(5, 10), &class_color(1));
    }
}
