mod fetcher;

pub use fetcher::BoardClient;
