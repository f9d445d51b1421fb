mod board;
mod counts;

pub use board::{is_content_hash, Attachment, Board, Post, Thread, ThreadPosts};
pub use counts::StoreCounts;
