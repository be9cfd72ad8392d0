use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

/// Reference to an image attached to a user turn.
///
/// Both forms resolve to exactly one canonical `data:` (or remote) URI through
/// [`ImageRef::to_uri`]; provider transforms only ever see that string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    /// Already-encoded URI, typically `data:<mime>;base64,<payload>`.
    Uri(String),
    /// Raw bytes plus their MIME type.
    Bytes { data: Vec<u8>, mime_type: String },
}

impl ImageRef {
    /// Wraps raw image bytes.
    pub fn from_bytes(data: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self::Bytes {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Returns the canonical URI for this image.
    ///
    /// # Examples
    ///
    /// ```
    /// use kotoba_ping::types::ImageRef;
    ///
    /// let image = ImageRef::from_bytes(b"abc".to_vec(), "image/png");
    /// assert_eq!(image.to_uri(), "data:image/png;base64,YWJj");
    /// ```
    pub fn to_uri(&self) -> String {
        match self {
            Self::Uri(uri) => uri.clone(),
            Self::Bytes { data, mime_type } => {
                format!("data:{mime_type};base64,{}", STANDARD.encode(data))
            }
        }
    }
}

impl From<String> for ImageRef {
    fn from(uri: String) -> Self {
        Self::Uri(uri)
    }
}

impl From<&str> for ImageRef {
    fn from(uri: &str) -> Self {
        Self::Uri(uri.to_string())
    }
}

/// Splits a base64 `data:` URI into `(mime_type, payload)`.
///
/// Returns `None` for remote URLs and for data URIs that are not base64-encoded.
pub fn parse_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime_type = meta.strip_suffix(";base64")?;
    Some((mime_type, payload))
}

/// Message content, text with an optional image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Multimodal { text: String, image: ImageRef },
}

impl Content {
    /// Builds content from text and an optional image.
    pub fn new(text: impl Into<String>, image: Option<ImageRef>) -> Self {
        match image {
            Some(image) => Self::Multimodal {
                text: text.into(),
                image,
            },
            None => Self::Text(text.into()),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) | Self::Multimodal { text, .. } => text,
        }
    }

    /// Canonical image URI, if the content carries an image.
    pub fn image_uri(&self) -> Option<String> {
        match self {
            Self::Text(_) => None,
            Self::Multimodal { image, .. } => Some(image.to_uri()),
        }
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}
