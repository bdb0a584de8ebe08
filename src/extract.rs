// 📄 Report text extraction
// Uploaded bytes → text with one report line per line.

use crate::error::IngestError;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// TextExtractor - turns an uploaded document into plain text
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, payload: &[u8]) -> Result<String, IngestError>;
}

/// Reports already exported as text (UTF-8, optional BOM)
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract_text(&self, payload: &[u8]) -> Result<String, IngestError> {
        let payload = payload.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(payload);
        String::from_utf8(payload.to_vec())
            .map_err(|e| IngestError::Extraction(format!("report is not valid UTF-8 text: {}", e)))
    }
}

/// PDF reports, via the layout text of every page
#[cfg(feature = "pdf")]
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

#[cfg(feature = "pdf")]
impl TextExtractor for PdfTextExtractor {
    fn extract_text(&self, payload: &[u8]) -> Result<String, IngestError> {
        pdf_extract::extract_text_from_mem(payload)
            .map_err(|e| IngestError::Extraction(format!("could not read PDF: {}", e)))
    }
}

/// Picks the extractor from the payload: PDF by magic bytes, text otherwise
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportExtractor;

pub fn is_pdf(payload: &[u8]) -> bool {
    payload.starts_with(PDF_MAGIC)
}

impl TextExtractor for ReportExtractor {
    fn extract_text(&self, payload: &[u8]) -> Result<String, IngestError> {
        if is_pdf(payload) {
            #[cfg(feature = "pdf")]
            return PdfTextExtractor.extract_text(payload);

            #[cfg(not(feature = "pdf"))]
            return Err(IngestError::Extraction(
                "PDF reports need the `pdf` feature; upload the report as text instead".to_string(),
            ));
        }

        PlainTextExtractor.extract_text(payload)
    }
}
