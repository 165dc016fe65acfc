pub mod writer_jsonl;

pub use writer_jsonl::write_jsonl;
