//! Client-facing references to images stored by ComfyUI.
//!
//! Output images are never copied by the relay. Clients receive an
//! [`ImageRef`] whose `url` points back at the relay's own image endpoint,
//! which proxies the bytes from the backend on demand.

use serde::Serialize;

/// Path of the relay's image proxy endpoint.
pub const DEFAULT_IMAGE_PATH: &str = "/api/image";

/// ComfyUI folder holding final outputs.
pub const FOLDER_OUTPUT: &str = "output";

/// ComfyUI folder holding intermediate/preview files.
pub const FOLDER_TEMP: &str = "temp";

/// One output image as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub filename: String,
    pub subfolder: String,
    /// ComfyUI folder type (`output`, `temp`, `input`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Relay URL the client can fetch the image from.
    pub url: String,
}

/// Builds derived URLs pointing at the relay's image endpoint.
#[derive(Debug, Clone)]
pub struct ImageUrlBuilder {
    base_path: String,
}

impl ImageUrlBuilder {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// `{base_path}?filename=..&subfolder=..&type=..` with form-encoded values.
    pub fn url_for(&self, filename: &str, subfolder: &str, kind: &str) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("filename", filename)
            .append_pair("subfolder", subfolder)
            .append_pair("type", kind)
            .finish();
        format!("{}?{query}", self.base_path)
    }

    pub fn image_ref(&self, filename: &str, subfolder: &str, kind: &str) -> ImageRef {
        ImageRef {
            filename: filename.to_string(),
            subfolder: subfolder.to_string(),
            kind: kind.to_string(),
            url: self.url_for(filename, subfolder, kind),
        }
    }
}

impl Default for ImageUrlBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGE_PATH)
    }
}

/// Folder types to try, in order, when fetching an image.
///
/// The requested type comes first, then `output`, then `temp`. An empty
/// request means "`output` then `temp`".
pub fn folder_fallback_order(requested: &str) -> Vec<&str> {
    if requested.is_empty() {
        return vec![FOLDER_OUTPUT, FOLDER_TEMP];
    }
    let mut order = vec![requested];
    if requested != FOLDER_OUTPUT {
        order.push(FOLDER_OUTPUT);
    }
    if requested != FOLDER_TEMP {
        order.push(FOLDER_TEMP);
    }
    order
}
