//! Class catalog and YOLO-style label encoding.
//!
//! Class indices are the alphabetical rank of the class name. The label line
//! is `class_index x_center y_center width height` with six decimals, so the
//! same region always produces byte-identical text.

use anyhow::{anyhow, Result};
use serde::Serialize;

/// Normalized box, every field a fraction of the image dimensions
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingRegion {
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingRegion {
    /// Corner coordinates `(x1, y1, x2, y2)` in pixels for an image of the given size
    pub fn to_pixel_corners(&self, width: u32, height: u32) -> (f32, f32, f32, f32) {
        let (w, h) = (width as f64, height as f64);
        (
            ((self.x_center - self.width / 2.0) * w) as f32,
            ((self.y_center - self.height / 2.0) * h) as f32,
            ((self.x_center + self.width / 2.0) * w) as f32,
            ((self.y_center + self.height / 2.0) * h) as f32,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassLabel {
    pub index: usize,
    pub name: String,
}

/// Fixed, alphabetically ordered set of class names
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassCatalog {
    names: Vec<String>,
}

impl ClassCatalog {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn label(&self, name: &str) -> Option<ClassLabel> {
        self.names
            .binary_search_by(|n| n.as_str().cmp(name))
            .ok()
            .map(|index| ClassLabel {
                index,
                name: name.to_string(),
            })
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn labels(&self) -> impl Iterator<Item = ClassLabel> + '_ {
        self.names.iter().enumerate().map(|(index, name)| ClassLabel {
            index,
            name: name.clone(),
        })
    }
}

/// One annotation: the class index and its normalized box
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnnotationRecord {
    pub class_index: usize,
    pub region: BoundingRegion,
}

impl AnnotationRecord {
    /// Label file line, newline terminated
    pub fn to_label_line(&self) -> String {
        let r = &self.region;
        format!(
            "{} {:.6} {:.6} {:.6} {:.6}\n",
            self.class_index, r.x_center, r.y_center, r.width, r.height
        )
    }
}

pub fn encode(class_label: &ClassLabel, region: BoundingRegion) -> AnnotationRecord {
    AnnotationRecord {
        class_index: class_label.index,
        region,
    }
}

/// Parse a single label line produced by [`AnnotationRecord::to_label_line`]
pub fn parse_label_line(line: &str) -> Result<AnnotationRecord> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(anyhow!(
            "Label line must have 5 fields, found {}: '{}'",
            parts.len(),
            line.trim_end()
        ));
    }

    let class_index = parts[0]
        .parse::<usize>()
        .map_err(|_| anyhow!("Invalid class index: '{}'", parts[0]))?;
    let mut coords = [0.0f64; 4];
    for (slot, part) in coords.iter_mut().zip(&parts[1..]) {
        *slot = part
            .parse::<f64>()
            .map_err(|_| anyhow!("Invalid coordinate: '{part}'"))?;
    }

    Ok(AnnotationRecord {
        class_index,
        region: BoundingRegion {
            x_center: coords[0],
            y_center: coords[1],
            width: coords[2],
            height: coords[3],
        },
    })
}

/// Parse every non-empty line of a label file's contents
pub fn parse_label_file(contents: &str) -> Result<Vec<AnnotationRecord>> {
    contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_label_line)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_orders_alphabetically() {
        let catalog = ClassCatalog::new(["healthy", "diseased", "healthy"]);
        assert_eq!(catalog.names(), &["diseased".to_string(), "healthy".to_string()]);
        assert_eq!(catalog.label("diseased").unwrap().index, 0);
        assert_eq!(catalog.label("healthy").unwrap().index, 1);
        assert!(catalog.label("unknown").is_none());
        assert_eq!(catalog.name_of(1), Some("healthy"));
        assert_eq!(catalog.labels().count(), 2);
    }

    #[test]
    fn test_label_line_format() {
        let label = ClassLabel {
            index: 1,
            name: "healthy".to_string(),
        };
        let record = encode(
            &label,
            BoundingRegion {
                x_center: 0.5,
                y_center: 0.25,
                width: 1.0 / 3.0,
                height: 0.1,
            },
        );
        assert_eq!(
            record.to_label_line(),
            "1 0.500000 0.250000 0.333333 0.100000\n"
        );
    }

    #[test]
    fn test_encode_then_parse_recovers_record() {
        let region = BoundingRegion {
            x_center: 0.123_456_7,
            y_center: 0.987_654_3,
            width: 0.000_001_2,
            height: 0.5,
        };
        let record = AnnotationRecord {
            class_index: 3,
            region,
        };
        let parsed = parse_label_line(&record.to_label_line()).unwrap();
        assert_eq!(parsed.class_index, 3);
        assert!((parsed.region.x_center - region.x_center).abs() <= 1e-6);
        assert!((parsed.region.y_center - region.y_center).abs() <= 1e-6);
        assert!((parsed.region.width - region.width).abs() <= 1e-6);
        assert!((parsed.region.height - region.height).abs() <= 1e-6);
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(parse_label_line("0 0.5 0.5 0.5").is_err());
        assert!(parse_label_line("x 0.5 0.5 0.5 0.5").is_err());
        assert!(parse_label_line("0 0.5 nan? 0.5 0.5").is_err());
    }

    #[test]
    fn test_parse_label_file_skips_blank_lines() {
        let records = parse_label_file("0 0.5 0.5 0.2 0.2\n\n1 0.1 0.1 0.1 0.1\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].class_index, 1);
    }

    #[test]
    fn test_pixel_corners() {
        let region = BoundingRegion {
            x_center: 0.5,
            y_center: 0.5,
            width: 0.5,
            height: 0.25,
        };
        assert_eq!(region.to_pixel_corners(100, 80), (25.0, 30.0, 75.0, 50.0));
    }
}
