//! 缓存层：提示词相似度、索引失效标记、跨查询缓存

pub mod index_mark;
pub mod query_cache;
pub mod similarity;

pub use index_mark::IndexMark;
pub use query_cache::{CacheHit, CachedAnswer, QueryCache};
pub use similarity::similarity;
