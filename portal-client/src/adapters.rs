//! OS-facing side effects. The dispatcher only sees the traits; the system
//! implementations are thin wrappers over `open` and `arboard`.

use crate::error::AdapterError;

pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<(), AdapterError>;
}

pub trait Clipboard: Send + Sync {
    fn copy(&self, text: &str) -> Result<(), AdapterError>;
}

/// Opens URLs with the desktop's default handler
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemUrlOpener;

impl UrlOpener for SystemUrlOpener {
    fn open(&self, url: &str) -> Result<(), AdapterError> {
        open::that(url).map_err(|e| AdapterError(format!("failed to open {}: {}", url, e)))
    }
}

/// The desktop clipboard
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn copy(&self, text: &str) -> Result<(), AdapterError> {
        let mut clipboard = arboard::Clipboard::new()
            .map_err(|e| AdapterError(format!("clipboard unavailable: {}", e)))?;
        clipboard
            .set_text(text.to_string())
            .map_err(|e| AdapterError(format!("failed to copy to clipboard: {}", e)))
    }
}
