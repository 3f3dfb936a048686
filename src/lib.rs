//! katec-kb - 챗봇 지식베이스 검색 엔진
//!
//! SQLite 문서 저장소 + 선택적 임베딩 시맨틱 검색을 결합한
//! 하이브리드 검색 엔진입니다. 임베딩 프로바이더가 없거나 죽어 있어도
//! 키워드 검색으로 항상 동작합니다.

pub mod cli;
pub mod embedding;
pub mod knowledge;

// Re-exports
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding};
pub use knowledge::{
    build_context, cosine_similarity, get_data_dir, DocumentMetadata, DocumentStore, EmbeddingIndex,
    KbError, KbStats, KnowledgeBase, KnowledgeDocument, NewDocument, ScoreMethod, SearchResult,
};
