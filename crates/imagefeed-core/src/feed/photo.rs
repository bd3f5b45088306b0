use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pixel dimensions of the original image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhotoSize {
    pub width: u32,
    pub height: u32,
}

impl PhotoSize {
    /// Height divided by width, used to size cells before the image loads.
    pub fn aspect_ratio(&self) -> Option<f64> {
        if self.width == 0 {
            return None;
        }
        Some(f64::from(self.height) / f64::from(self.width))
    }
}

/// A photo in the feed. Only `is_liked` ever changes, through [`Photo::with_liked`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Photo {
    pub id: String,
    pub size: PhotoSize,
    pub created_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub thumb_url: String,
    pub large_url: String,
    pub full_url: String,
    pub is_liked: bool,
}

impl Photo {
    pub fn with_liked(&self, is_liked: bool) -> Self {
        Self {
            is_liked,
            ..self.clone()
        }
    }
}

/// Photo record as returned by `GET /photos`.
#[derive(Debug, Deserialize)]
pub(crate) struct PhotoResult {
    id: String,
    #[serde(default)]
    created_at: Option<String>,
    width: u32,
    height: u32,
    #[serde(default)]
    liked_by_user: bool,
    #[serde(default)]
    description: Option<String>,
    urls: UrlsResult,
}

#[derive(Debug, Deserialize)]
struct UrlsResult {
    full: String,
    regular: String,
    thumb: String,
}

impl From<PhotoResult> for Photo {
    fn from(result: PhotoResult) -> Self {
        let created_at = result.created_at.as_deref().and_then(|raw| {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                tracing::debug!(photo = %result.id, raw, "ignoring unparseable created_at");
            }
            parsed
        });

        Self {
            id: result.id,
            size: PhotoSize {
                width: result.width,
                height: result.height,
            },
            created_at,
            description: result.description,
            thumb_url: result.urls.thumb,
            large_url: result.urls.regular,
            full_url: result.urls.full,
            is_liked: result.liked_by_user,
        }
    }
}

/// Parse an Unsplash timestamp, returning `None` for anything unrecognised.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|ts| ts.with_timezone(&Utc))
        .ok()
}
