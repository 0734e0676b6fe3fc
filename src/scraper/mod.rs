pub mod cleaner;
pub mod fetcher;
pub mod http_client;
pub mod parsers;

pub use self::fetcher::{ChromiumRenderer, PageFetcher, PageRenderer};
pub use self::http_client::PhotoDownloader;
pub use self::parsers::{ProfileExtractor, Selectors};
