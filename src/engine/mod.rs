pub mod batcher;
pub mod docs;
pub mod extract;
pub mod graph;
pub mod impact;
pub mod imports;
pub mod parser;
pub mod refactor;
pub mod resolve;
pub mod rewrite;
pub mod watcher;
