//! Conversion requests and the steps that render them

mod options;
mod pipeline;

pub use options::{
    Clip, ConversionOptions, ConversionOutput, ConversionTask, ImageOptions, ImageType, Margin,
    MediaType, OutputKind, PdfOptions,
};
pub use pipeline::{convert, timeout_message, RenderTarget};
