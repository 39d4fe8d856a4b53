pub mod segment_cache;
