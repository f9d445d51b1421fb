mod downloader;
mod sanitizer;

pub use downloader::HttpTransport;
pub use sanitizer::HtmlSanitizer;
