//! Knowledge 모듈 - 챗봇 지식베이스 검색 엔진
//!
//! - store: SQLite 문서 저장소 (ID upsert + 카테고리 조회)
//! - index: 문서별 임베딩 벡터 캐시 (프로세스 수명, degrade-once)
//! - rank: 키워드 스코어링 + 발췌 추출 (순수 함수)
//! - base: KnowledgeBase 파사드 (하이브리드 검색 + 통계 + CRUD)

mod base;
mod error;
mod index;
mod rank;
mod store;

// Re-exports
pub use base::{
    build_context, KbStats, KnowledgeBase, ScoreMethod, SearchResult, DEFAULT_SEARCH_LIMIT,
};
pub use error::KbError;
pub use index::{cosine_similarity, EmbeddingIndex};
pub use rank::{extract_relevant_chunk, format_similarity, keyword_score, tokenize, MAX_CHUNK_CHARS};
pub use store::{
    get_data_dir, hash_content, AddOutcome, DocumentMetadata, DocumentStore, KnowledgeDocument,
    NewDocument,
};
