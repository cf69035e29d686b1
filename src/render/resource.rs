//! Display-ready page images

use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::store::CachedPage;

pub const JPEG_MIME: &str = "image/jpeg";

/// Encoded page image plus a URL the UI can display directly
///
/// Cloning is cheap; bytes and URL are shared.
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    page_number: u32,
    data: Arc<[u8]>,
    width: u32,
    height: u32,
    url: Arc<str>,
}

impl PageImage {
    pub fn from_jpeg(page_number: u32, data: Vec<u8>, width: u32, height: u32) -> Self {
        let url = format!("data:{};base64,{}", JPEG_MIME, STANDARD.encode(&data));
        Self {
            page_number,
            data: data.into(),
            width,
            height,
            url: url.into(),
        }
    }

    pub fn from_cached(page: CachedPage) -> Self {
        Self::from_jpeg(page.page_number, page.image_data, page.width, page.height)
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `data:image/jpeg;base64,...`
    pub fn url(&self) -> &str {
        &self.url
    }

    /// True when both handles share the same encoded bytes
    pub fn same_image(&self, other: &PageImage) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("page_number", &self.page_number)
            .field("bytes", &self.data.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl serde::Serialize for PageImage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url() {
        let image = PageImage::from_jpeg(3, vec![0xFF, 0xD8, 0xFF], 10, 20);
        assert_eq!(image.url(), "data:image/jpeg;base64,/9j/");
        assert_eq!(image.page_number(), 3);
        assert_eq!(image.data(), &[0xFF, 0xD8, 0xFF]);
        assert!(image.same_image(&image.clone()));
    }
}
