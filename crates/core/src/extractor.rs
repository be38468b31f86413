use crate::error::IndexError;
use lopdf::Document;
use std::path::Path;
use tracing::warn;

pub trait PdfExtractor {
    /// Raw text of every page, in page order. Pages without extractable
    /// text are kept as empty strings so page numbering is preserved.
    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, IndexError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, IndexError> {
        let document =
            Document::load(path).map_err(|error| IndexError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text,
                Err(error) => {
                    warn!(path = %path.display(), page = page_no, %error, "page text unreadable");
                    String::new()
                }
            };
            pages.push(text);
        }

        Ok(pages)
    }
}

#[cfg(test)]
mod tests {
    use super::{LopdfExtractor, PdfExtractor};
    use crate::error::IndexError;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn unreadable_pdf_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        let result = LopdfExtractor.extract_pages(&path);
        assert!(matches!(result, Err(IndexError::PdfParse(_))));
        Ok(())
    }
}
