mod cache;
mod error;
mod photo;

pub use cache::{PageFetch, PhotoFeedCache, PHOTOS_PER_PAGE};
pub use error::FeedError;
pub use photo::{Photo, PhotoSize};
