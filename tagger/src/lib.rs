//! Record addressing and content classification for atproto records.
//!
//! Everything here is pure: decoded records in, attributes out.

pub mod at_uri;
mod classify;
pub mod did;
pub mod hashtags;
pub mod record;

pub use at_uri::RecordUri;
pub use classify::{
    classify_post, has_media, has_video, is_nsfw, is_reply, FeedTag, PostClassification,
    NSFW_HASHTAGS, NSFW_SELF_LABELS,
};
pub use hashtags::extract_hashtags;
