pub mod analyzer;
pub mod downloader;
pub mod parsers;
pub mod pipeline;

pub use analyzer::ParserAnalyzer;
pub use downloader::HttpDownloader;
pub use parsers::{link_parser, page_parser};
pub use pipeline::{JsonLinesWriter, ProcessorPipeline};
