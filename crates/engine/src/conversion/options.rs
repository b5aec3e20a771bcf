//! Conversion requests and option translation
//!
//! Requests carry a loose option bag. Before rendering, the bag is merged
//! with overrides published by the page itself and translated into the
//! strict [`PdfOptions`] / [`ImageOptions`] the worker understands.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConversionError;

/// What the conversion produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Pdf,
    Image,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Image => "image",
        }
    }
}

/// CSS media type used while rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Screen,
    Print,
}

/// Image encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    #[default]
    Png,
    Jpeg,
}

impl ImageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }
}

/// Loose option bag supplied with a request
///
/// Field names follow the camelCase keys pages use when publishing
/// overrides, so both sources merge key by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOptions {
    #[serde(default, alias = "waitForNetworkIddle", skip_serializing_if = "Option::is_none")]
    pub wait_for_network_idle: Option<bool>,
    #[serde(default, rename = "waitForJS", skip_serializing_if = "Option::is_none")]
    pub wait_for_js: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    // PDF
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_header_footer: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub print_background: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landscape: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_ranges: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin_top: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin_right: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin_bottom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub margin_left: Option<String>,

    // Image
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub image_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_page: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omit_background: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_height: Option<f64>,
}

/// Page margins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Margin {
    pub top: Option<String>,
    pub right: Option<String>,
    pub bottom: Option<String>,
    pub left: Option<String>,
}

/// Options for PDF printing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfOptions {
    pub scale: Option<f64>,
    pub display_header_footer: bool,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
    pub print_background: bool,
    pub landscape: bool,
    pub page_ranges: Option<String>,
    pub format: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub margin: Margin,
}

/// Rectangle to capture
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Options for image capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOptions {
    #[serde(rename = "type")]
    pub image_type: ImageType,
    pub quality: Option<u8>,
    pub full_page: bool,
    pub omit_background: bool,
    pub clip: Option<Clip>,
}

/// Alternate spellings accepted for option keys, with their canonical key
const KEY_ALIASES: &[(&str, &str)] = &[("waitForNetworkIddle", "waitForNetworkIdle")];

impl ConversionOptions {
    /// Merge overrides published by the page over these options
    ///
    /// Non-object values are ignored and a `path` key is always dropped so
    /// a page can never redirect output to the filesystem.
    pub fn merge_overrides(&mut self, overrides: serde_json::Value) -> Result<(), ConversionError> {
        let serde_json::Value::Object(mut overrides) = overrides else {
            return Ok(());
        };
        overrides.remove("path");
        for (alias, canonical) in KEY_ALIASES {
            if let Some(value) = overrides.remove(*alias) {
                overrides.entry(*canonical).or_insert(value);
            }
        }
        if overrides.is_empty() {
            return Ok(());
        }

        let mut merged = match serde_json::to_value(&*self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        merged.extend(overrides);

        *self = serde_json::from_value(serde_json::Value::Object(merged))
            .map_err(|e| ConversionError::InvalidOptions(format!("invalid page options: {}", e)))?;
        Ok(())
    }

    /// Validated media type, if one was requested
    pub fn media(&self) -> Result<Option<MediaType>, ConversionError> {
        match self.media_type.as_deref() {
            None => Ok(None),
            Some("screen") => Ok(Some(MediaType::Screen)),
            Some("print") => Ok(Some(MediaType::Print)),
            Some(_) => Err(ConversionError::InvalidOptions(
                "mediaType must be equal to 'screen' or 'print'".to_string(),
            )),
        }
    }

    /// Translate into PDF printing options
    pub fn pdf_options(&self) -> PdfOptions {
        PdfOptions {
            scale: self.scale,
            display_header_footer: self.display_header_footer.unwrap_or(false),
            header_template: self.header_template.clone(),
            footer_template: self.footer_template.clone(),
            // Backgrounds are printed unless explicitly disabled
            print_background: self.print_background.unwrap_or(true),
            landscape: self.landscape.unwrap_or(false),
            page_ranges: self.page_ranges.clone(),
            format: self.format.clone(),
            width: self.width.clone(),
            height: self.height.clone(),
            margin: Margin {
                top: self.margin_top.clone(),
                right: self.margin_right.clone(),
                bottom: self.margin_bottom.clone(),
                left: self.margin_left.clone(),
            },
        }
    }

    /// Translate into image capture options
    pub fn image_options(&self) -> Result<ImageOptions, ConversionError> {
        let image_type = match self.image_type.as_deref() {
            None | Some("png") => ImageType::Png,
            Some("jpeg") => ImageType::Jpeg,
            Some(_) => {
                return Err(ConversionError::InvalidOptions(
                    "image type must be equal to 'jpeg' or 'png'".to_string(),
                ))
            }
        };

        let quality = match image_type {
            ImageType::Png => None,
            ImageType::Jpeg => self.quality,
        };

        let clip = match (self.clip_x, self.clip_y, self.clip_width, self.clip_height) {
            (None, None, None, None) => None,
            (Some(x), Some(y), Some(width), Some(height)) => Some(Clip {
                x,
                y,
                width,
                height,
            }),
            _ => {
                return Err(ConversionError::InvalidOptions(
                    "All clip properties need to be specified when at least one of them is passed. \
                     Make sure to specify values for \"clipX\", \"clipY\", \"clipWidth\", \"clipHeight\""
                        .to_string(),
                ))
            }
        };

        Ok(ImageOptions {
            image_type,
            quality,
            full_page: self.full_page.unwrap_or(false),
            omit_background: self.omit_background.unwrap_or(false),
            clip,
        })
    }
}

/// A unit of conversion work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionTask {
    /// Task identifier
    pub id: Uuid,
    /// URL of the content to convert
    pub html_url: String,
    /// Output kind
    pub kind: OutputKind,
    /// Request options
    #[serde(default)]
    pub options: ConversionOptions,
    /// Time the caller is still willing to wait; capped by the configured deadline
    #[serde(
        default,
        with = "crate::config::duration_millis::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

impl ConversionTask {
    /// Create a task of the given kind
    pub fn new(kind: OutputKind, html_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            html_url: html_url.into(),
            kind,
            options: ConversionOptions::default(),
            timeout: None,
        }
    }

    /// Convert `html_url` to PDF
    pub fn pdf(html_url: impl Into<String>) -> Self {
        Self::new(OutputKind::Pdf, html_url)
    }

    /// Capture `html_url` as an image
    pub fn image(html_url: impl Into<String>) -> Self {
        Self::new(OutputKind::Image, html_url)
    }

    /// Set request options
    pub fn with_options(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the time the caller is willing to wait
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Rendered document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOutput {
    /// Result type tag: `pdf`, `png` or `jpeg`
    pub content_type: String,
    /// Rendered bytes
    #[serde(skip)]
    pub content: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pdf_defaults() {
        let pdf = ConversionOptions::default().pdf_options();
        assert!(pdf.print_background);
        assert!(!pdf.landscape);
        assert_eq!(pdf.margin, Margin::default());
    }

    #[test]
    fn test_pdf_margin_assembly() {
        let options = ConversionOptions {
            margin_top: Some("1cm".into()),
            margin_left: Some("2cm".into()),
            print_background: Some(false),
            ..Default::default()
        };
        let pdf = options.pdf_options();
        assert_eq!(pdf.margin.top.as_deref(), Some("1cm"));
        assert_eq!(pdf.margin.left.as_deref(), Some("2cm"));
        assert!(pdf.margin.right.is_none());
        assert!(!pdf.print_background);
    }

    #[test]
    fn test_media_validation() {
        let mut options = ConversionOptions::default();
        assert_eq!(options.media().unwrap(), None);

        options.media_type = Some("print".into());
        assert_eq!(options.media().unwrap(), Some(MediaType::Print));

        options.media_type = Some("tv".into());
        let err = options.media().unwrap_err();
        assert!(err.is_weak());
        assert!(err.to_string().contains("'screen' or 'print'"));
    }

    #[test]
    fn test_image_type_defaults_to_png_and_drops_quality() {
        let options = ConversionOptions {
            quality: Some(80),
            ..Default::default()
        };
        let image = options.image_options().unwrap();
        assert_eq!(image.image_type, ImageType::Png);
        assert_eq!(image.quality, None);
        assert_eq!(image.clip, None);
    }

    #[test]
    fn test_jpeg_keeps_quality() {
        let options = ConversionOptions {
            image_type: Some("jpeg".into()),
            quality: Some(80),
            ..Default::default()
        };
        let image = options.image_options().unwrap();
        assert_eq!(image.image_type, ImageType::Jpeg);
        assert_eq!(image.quality, Some(80));
    }

    #[test]
    fn test_invalid_image_type() {
        let options = ConversionOptions {
            image_type: Some("gif".into()),
            ..Default::default()
        };
        assert!(options.image_options().unwrap_err().is_weak());
    }

    #[test]
    fn test_clip_is_all_or_nothing() {
        let partial = ConversionOptions {
            clip_x: Some(0.0),
            clip_y: Some(0.0),
            ..Default::default()
        };
        assert!(partial.image_options().is_err());

        let full = ConversionOptions {
            clip_x: Some(1.0),
            clip_y: Some(2.0),
            clip_width: Some(300.0),
            clip_height: Some(200.0),
            ..Default::default()
        };
        assert_eq!(
            full.image_options().unwrap().clip,
            Some(Clip {
                x: 1.0,
                y: 2.0,
                width: 300.0,
                height: 200.0
            })
        );
    }

    #[test]
    fn test_merge_overrides() {
        let mut options = ConversionOptions {
            landscape: Some(false),
            margin_top: Some("1cm".into()),
            ..Default::default()
        };
        options
            .merge_overrides(json!({
                "landscape": true,
                "path": "/etc/passwd",
                "mediaType": "screen"
            }))
            .unwrap();

        assert_eq!(options.landscape, Some(true));
        assert_eq!(options.margin_top.as_deref(), Some("1cm"));
        assert_eq!(options.media_type.as_deref(), Some("screen"));
    }

    #[test]
    fn test_merge_ignores_non_objects() {
        let mut options = ConversionOptions::default();
        options.merge_overrides(serde_json::Value::Null).unwrap();
        options.merge_overrides(json!("landscape")).unwrap();
        assert_eq!(options, ConversionOptions::default());
    }

    #[test]
    fn test_merge_rejects_mistyped_override() {
        let mut options = ConversionOptions::default();
        let err = options
            .merge_overrides(json!({ "landscape": "sideways" }))
            .unwrap_err();
        assert!(err.is_weak());
    }

    #[test]
    fn test_merge_accepts_legacy_key_override() {
        let mut options = ConversionOptions {
            wait_for_network_idle: Some(true),
            landscape: Some(true),
            ..Default::default()
        };
        options
            .merge_overrides(json!({ "waitForNetworkIddle": false }))
            .unwrap();

        assert_eq!(options.wait_for_network_idle, Some(false));
        assert_eq!(options.landscape, Some(true));
    }

    #[test]
    fn test_options_deserialize_legacy_keys() {
        let options: ConversionOptions = serde_json::from_value(json!({
            "waitForNetworkIddle": true,
            "waitForJS": true,
            "type": "jpeg"
        }))
        .unwrap();
        assert_eq!(options.wait_for_network_idle, Some(true));
        assert_eq!(options.wait_for_js, Some(true));
        assert_eq!(options.image_type.as_deref(), Some("jpeg"));
    }

    #[test]
    fn test_task_builders() {
        let task = ConversionTask::image("file:///tmp/report.html")
            .with_timeout(Duration::from_secs(2));
        assert_eq!(task.kind, OutputKind::Image);
        assert_eq!(task.timeout, Some(Duration::from_secs(2)));
        assert_ne!(task.id, ConversionTask::pdf("x").id);
    }

    #[test]
    fn test_task_timeout_in_millis() {
        let task = ConversionTask::pdf("file:///a.html").with_timeout(Duration::from_millis(1500));
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["timeout"], json!(1500));

        let parsed: ConversionTask = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.timeout, Some(Duration::from_millis(1500)));

        let untimed = serde_json::to_value(ConversionTask::pdf("file:///a.html")).unwrap();
        assert!(untimed.get("timeout").is_none());
    }
}
