//! Page pipeline: turns a submitted document into ordered page images.

pub mod image;
pub mod pdf;

use std::sync::Arc;

use crate::error::{DecodeError, JobError};
use crate::job::SourceKind;

/// One rendered page, PNG encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 0-based position in the source document.
    pub index: u32,
    pub data: Vec<u8>,
}

/// Splits raw document bytes into page images.
///
/// Implementations are synchronous and may block (subprocesses, large image
/// decodes); [`PagePipeline`] runs them on the blocking pool.
pub trait PageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], kind: SourceKind) -> Result<Vec<PageImage>, DecodeError>;
}

/// Production decoder: `image` crate for pictures, poppler for PDFs.
pub struct RasterDecoder {
    dpi: u32,
}

impl RasterDecoder {
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }
}

impl PageDecoder for RasterDecoder {
    fn decode(&self, bytes: &[u8], kind: SourceKind) -> Result<Vec<PageImage>, DecodeError> {
        match kind {
            SourceKind::Image => image::decode_image(bytes).map(|page| vec![page]),
            SourceKind::Pdf => pdf::render_pages(bytes, self.dpi),
        }
    }
}

#[derive(Clone)]
pub struct PagePipeline {
    decoder: Arc<dyn PageDecoder>,
}

impl PagePipeline {
    pub fn new(dpi: u32) -> Self {
        Self::with_decoder(Arc::new(RasterDecoder::new(dpi)))
    }

    pub fn with_decoder(decoder: Arc<dyn PageDecoder>) -> Self {
        Self { decoder }
    }

    /// Decodes off the async executor. Pages come back in the decoder's index
    /// order, renumbered `0..n`; an empty document is a decode failure.
    pub async fn split(&self, bytes: Vec<u8>, kind: SourceKind) -> Result<Vec<PageImage>, JobError> {
        let decoder = Arc::clone(&self.decoder);
        let mut pages = tokio::task::spawn_blocking(move || decoder.decode(&bytes, kind))
            .await
            .map_err(|e| JobError::Internal(format!("Page decoding task failed: {}", e)))??;

        if pages.is_empty() {
            return Err(DecodeError::NoPages.into());
        }
        pages.sort_by_key(|p| p.index);
        for (position, page) in pages.iter_mut().enumerate() {
            page.index = position as u32;
        }
        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDecoder(Vec<PageImage>);

    impl PageDecoder for FixedDecoder {
        fn decode(&self, _: &[u8], _: SourceKind) -> Result<Vec<PageImage>, DecodeError> {
            Ok(self.0.clone())
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = ::image::RgbImage::from_pixel(4, 4, ::image::Rgb([255, 255, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, ::image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_single_image_is_one_page() {
        let pipeline = PagePipeline::new(150);
        let pages = pipeline.split(png_bytes(), SourceKind::Image).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].index, 0);
    }

    #[tokio::test]
    async fn test_empty_decode_is_no_pages() {
        let pipeline = PagePipeline::with_decoder(Arc::new(FixedDecoder(Vec::new())));
        let err = pipeline.split(vec![1], SourceKind::Pdf).await.unwrap_err();
        assert_eq!(err, JobError::Decode(DecodeError::NoPages));
    }

    #[tokio::test]
    async fn test_pages_sorted_by_index() {
        let pages = vec![
            PageImage { index: 2, data: vec![2] },
            PageImage { index: 0, data: vec![0] },
            PageImage { index: 1, data: vec![1] },
        ];
        let pipeline = PagePipeline::with_decoder(Arc::new(FixedDecoder(pages)));
        let pages = pipeline.split(vec![1], SourceKind::Pdf).await.unwrap();
        let order: Vec<u32> = pages.iter().map(|p| p.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_pages_renumbered_from_zero() {
        let pages = vec![
            PageImage { index: 7, data: vec![7] },
            PageImage { index: 1, data: vec![1] },
            PageImage { index: 4, data: vec![4] },
        ];
        let pipeline = PagePipeline::with_decoder(Arc::new(FixedDecoder(pages)));
        let pages = pipeline.split(vec![1], SourceKind::Pdf).await.unwrap();
        let order: Vec<(u32, u8)> = pages.iter().map(|p| (p.index, p.data[0])).collect();
        assert_eq!(order, vec![(0, 1), (1, 4), (2, 7)]);
    }

    #[tokio::test]
    async fn test_garbage_image_is_decode_error() {
        let pipeline = PagePipeline::new(150);
        let err = pipeline
            .split(b"definitely not an image".to_vec(), SourceKind::Image)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Decode(_)));
    }
}
