use std::io::Cursor;

use image::ImageFormat;

use crate::error::DecodeError;
use crate::processor::PageImage;

/// Validates a single image and normalizes it to PNG.
pub fn decode_image(bytes: &[u8]) -> Result<PageImage, DecodeError> {
    let _span = tracing::info_span!("processor.image", bytes = bytes.len()).entered();

    let format = image::guess_format(bytes)
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;
    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| DecodeError::CorruptImage(e.to_string()))?;

    let data = if format == ImageFormat::Png {
        bytes.to_vec()
    } else {
        tracing::debug!(?format, "Converting image to PNG");
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)
            .map_err(|e| DecodeError::CorruptImage(format!("Failed to convert image: {}", e)))?;
        out.into_inner()
    };

    Ok(PageImage { index: 0, data })
}
