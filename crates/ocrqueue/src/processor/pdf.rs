use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

use crate::error::DecodeError;
use crate::processor::PageImage;

/// Renders every page of a PDF to PNG at `dpi`, in document order.
///
/// Page count comes from lopdf; PDFs lopdf cannot parse fall back to
/// `pdfinfo`. Rendering itself is done by poppler's `pdftoppm`.
pub fn render_pages(pdf_bytes: &[u8], dpi: u32) -> Result<Vec<PageImage>, DecodeError> {
    let _span = tracing::info_span!("processor.pdf", dpi, bytes = pdf_bytes.len()).entered();

    let expected = page_count(pdf_bytes)?;
    if expected == 0 {
        return Err(DecodeError::NoPages);
    }

    let work_dir = TempDir::new()
        .map_err(|e| DecodeError::Render(format!("Failed to create temp dir: {}", e)))?;
    let pdf_path = write_input(&work_dir, pdf_bytes).map_err(DecodeError::Render)?;
    let prefix = work_dir.path().join("page");

    let output = Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg(&pdf_path)
        .arg(&prefix)
        .output()
        .map_err(|e| {
            DecodeError::Render(format!(
                "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
                e
            ))
        })?;

    if !output.status.success() {
        return Err(DecodeError::Render(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let pages = collect_rendered(work_dir.path())?;
    if pages.is_empty() {
        return Err(DecodeError::Render("pdftoppm produced no pages".to_string()));
    }
    if pages.len() != expected {
        tracing::warn!(
            expected,
            rendered = pages.len(),
            "Rendered page count differs from document page count"
        );
    }

    Ok(pages)
}

fn write_input(dir: &TempDir, pdf_bytes: &[u8]) -> Result<std::path::PathBuf, String> {
    let path = dir.path().join("input.pdf");
    std::fs::write(&path, pdf_bytes).map_err(|e| format!("Failed to write temp PDF: {}", e))?;
    Ok(path)
}

/// Reads `page-N.png` files (pdftoppm zero-pads N by document length) and
/// returns them ordered by N.
fn collect_rendered(dir: &Path) -> Result<Vec<PageImage>, DecodeError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| DecodeError::Render(format!("Failed to list rendered pages: {}", e)))?;

    let mut numbered = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| DecodeError::Render(format!("Failed to list rendered pages: {}", e)))?;
        let name = entry.file_name();
        if let Some(number) = name.to_str().and_then(page_number) {
            numbered.push((number, entry.path()));
        }
    }
    numbered.sort_by_key(|(number, _)| *number);

    numbered
        .into_iter()
        .enumerate()
        .map(|(index, (_, path))| {
            let data = std::fs::read(&path).map_err(|e| {
                DecodeError::Render(format!("Failed to read {}: {}", path.display(), e))
            })?;
            Ok(PageImage {
                index: index as u32,
                data,
            })
        })
        .collect()
}

/// Extracts N from `page-N.png`.
fn page_number(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix("page-")?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

fn page_count(pdf_bytes: &[u8]) -> Result<usize, DecodeError> {
    match lopdf::Document::load_mem(pdf_bytes) {
        Ok(doc) => Ok(doc.get_pages().len()),
        Err(e) => {
            tracing::warn!("lopdf failed to parse PDF: {}. Falling back to pdfinfo.", e);
            count_with_pdfinfo(pdf_bytes)
        }
    }
}

/// Get the page count of a PDF using pdfinfo (poppler-utils).
fn count_with_pdfinfo(pdf_bytes: &[u8]) -> Result<usize, DecodeError> {
    let work_dir = TempDir::new()
        .map_err(|e| DecodeError::CorruptPdf(format!("Failed to create temp dir: {}", e)))?;
    let pdf_path = write_input(&work_dir, pdf_bytes).map_err(DecodeError::CorruptPdf)?;

    let output = Command::new("pdfinfo").arg(&pdf_path).output().map_err(|e| {
        DecodeError::CorruptPdf(format!(
            "Unreadable PDF and pdfinfo unavailable ({}). Make sure poppler-utils is installed.",
            e
        ))
    })?;

    if !output.status.success() {
        return Err(DecodeError::CorruptPdf(format!(
            "pdfinfo failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|count| count.trim().parse::<usize>().ok())
        .ok_or_else(|| DecodeError::CorruptPdf("pdfinfo reported no page count".to_string()))
}
