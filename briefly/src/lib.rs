// Library interface for briefly modules
// This allows tests and the binary to import modules

pub mod articles;
pub mod audio;
pub mod broadcast;
pub mod error;
pub mod google_news;
pub mod ingestion;
pub mod llm;
pub mod mmr;
pub mod retry;
pub mod scraping;
pub mod segment;
pub mod selection;
pub mod server;
pub mod storage;
