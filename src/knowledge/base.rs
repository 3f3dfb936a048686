//! KnowledgeBase - 검색 엔진 + 관리 파사드
//!
//! 문서 저장소와 임베딩 인덱스를 소유하고 하이브리드 검색을
//! 제공합니다. 챗 라우트/관리 UI가 참조로 받아 쓰는 명시적 객체이며
//! 전역 싱글톤이 아닙니다.
//!
//! 검색 흐름:
//! 1. 임베딩 활성 시 쿼리 임베딩 + 캐시된 문서 벡터로 코사인 유사도
//! 2. 벡터 없는 문서(또는 임베딩 비활성)는 키워드 겹침 스코어
//! 3. 문서당 스코어 하나 (임베딩 우선), 내림차순 정렬, 상위 K
//! 4. 결과마다 관련 발췌 추출

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::embedding::EmbeddingProvider;

use super::index::{cosine_similarity, EmbeddingIndex};
use super::rank;
use super::store::{DocumentStore, KnowledgeDocument, NewDocument};

/// 검색 결과 기본 개수
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

// ============================================================================
// Types
// ============================================================================

/// 스코어 산출 방법
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScoreMethod {
    /// 쿼리/문서 임베딩 코사인 유사도
    Embedding,
    /// 키워드 겹침 폴백
    Keyword,
}

/// 검색 결과 (파생 데이터, 저장되지 않음)
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// 매칭된 문서
    pub document: KnowledgeDocument,
    /// 유사도 스코어 (0.0 ~ 1.0)
    pub similarity: f32,
    /// 인용/표시용 관련 발췌
    pub relevant_chunk: String,
    /// 스코어 산출 방법
    pub method: ScoreMethod,
}

/// 지식베이스 통계
#[derive(Debug, Clone, Serialize)]
pub struct KbStats {
    /// 전체 문서 수
    pub total_documents: usize,
    /// 카테고리 수
    pub categories: usize,
    /// 임베딩 보유 문서 수
    pub documents_with_embeddings: usize,
    /// 임베딩 프로바이더 활성 여부 (문서 보유 여부와 무관)
    pub embedding_enabled: bool,
    /// 가장 최근 문서 수정 시각
    pub last_updated: Option<DateTime<Utc>>,
}

// ============================================================================
// KnowledgeBase
// ============================================================================

/// 지식베이스 - 저장소 + 임베딩 인덱스 + 검색
pub struct KnowledgeBase {
    store: DocumentStore,
    index: EmbeddingIndex,
    init: OnceCell<()>,
}

impl KnowledgeBase {
    /// 지정된 DB 경로로 열기
    ///
    /// `provider`가 None이면 키워드 전용 모드입니다.
    pub fn open(path: &Path, provider: Option<Arc<dyn EmbeddingProvider>>) -> Result<Self> {
        let store = DocumentStore::open(path).context("Failed to open document store")?;

        Ok(Self {
            store,
            index: EmbeddingIndex::new(provider),
            init: OnceCell::new(),
        })
    }

    /// 기본 위치에서 열기 (~/.katec-kb/knowledge.db)
    pub fn open_default(provider: Option<Arc<dyn EmbeddingProvider>>) -> Result<Self> {
        let store = DocumentStore::open_default().context("Failed to open document store")?;

        Ok(Self {
            store,
            index: EmbeddingIndex::new(provider),
            init: OnceCell::new(),
        })
    }

    /// 1회 초기화 (single-flight)
    ///
    /// 프로바이더를 프로브하고 기존 문서 임베딩을 일괄 계산합니다.
    /// 동시에 여러 요청이 도착해도 첫 호출만 수행하고 나머지는
    /// 같은 작업을 기다립니다. 실패해도 초기화는 완료된 것으로
    /// 간주합니다 - 키워드 전용 모드로 계속 동작합니다.
    pub async fn initialize(&self) {
        self.init
            .get_or_init(|| async {
                self.index.probe().await;

                if self.index.is_enabled() {
                    match self.store.all_documents() {
                        Ok(docs) => self.index.ensure_embeddings(&docs).await,
                        Err(e) => {
                            tracing::warn!("Bulk embedding pass skipped: {}", e);
                        }
                    }
                }
            })
            .await;
    }

    /// 지식베이스 검색
    ///
    /// 스코어 내림차순 상위 `limit`개를 반환합니다. 동률은
    /// priority 내림차순, 그 다음 id 오름차순으로 깨서 같은 저장소
    /// 상태 + 같은 쿼리면 항상 같은 결과가 나옵니다.
    ///
    /// 공백 쿼리는 빈 목록이며(에러 아님), 프로바이더 장애는 해당
    /// 문서를 키워드 경로로 강등시킬 뿐 검색 전체를 중단하지 않습니다.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let limit = limit.max(1);

        self.initialize().await;

        let docs = self.store.all_documents()?;
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let query_tokens = rank::tokenize(query);

        // 임베딩 경로: 신규 문서 벡터 지연 계산 + 쿼리 임베딩.
        // 쿼리 임베딩 실패 시 전 문서가 키워드 경로로 강등됩니다.
        let query_vector = if self.index.is_enabled() {
            self.index.ensure_embeddings(&docs).await;
            self.index.embed(query).await
        } else {
            None
        };

        let mut results: Vec<SearchResult> = Vec::new();

        for document in docs {
            let (similarity, method) = match (&query_vector, self.index.get(&document.id)) {
                (Some(qv), Some(dv)) => (
                    cosine_similarity(qv, &dv).clamp(0.0, 1.0),
                    ScoreMethod::Embedding,
                ),
                _ => (
                    rank::keyword_score(&query_tokens, &document.content),
                    ScoreMethod::Keyword,
                ),
            };

            // 무관한 문서는 결과에서 제외
            if similarity <= 0.0 {
                continue;
            }

            results.push(SearchResult {
                document,
                similarity,
                relevant_chunk: String::new(),
                method,
            });
        }

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    b.document
                        .metadata
                        .priority
                        .partial_cmp(&a.document.metadata.priority)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        results.truncate(limit);

        for result in &mut results {
            result.relevant_chunk = rank::extract_relevant_chunk(
                &result.document.content,
                &query_tokens,
                rank::MAX_CHUNK_CHARS,
            );
        }

        tracing::debug!(
            "Search \"{}\" returned {} result(s) (embedding={})",
            query,
            results.len(),
            query_vector.is_some()
        );

        Ok(results)
    }

    /// 문서 추가 (upsert)
    ///
    /// ID가 비어 있으면 UUID v4를 생성합니다. content가 바뀐 경우에만
    /// 캐시된 임베딩을 무효화합니다 - 동일 내용 재삽입은 재계산을
    /// 건너뜁니다. 반환값은 최종 문서 ID입니다.
    pub fn add_document(&self, mut doc: NewDocument) -> Result<String> {
        if doc.id.trim().is_empty() {
            doc.id = uuid::Uuid::new_v4().to_string();
        }

        let outcome = self.store.add_document(&doc)?;

        if outcome.content_changed {
            self.index.invalidate(&doc.id);
        }

        Ok(doc.id)
    }

    /// ID로 문서 조회 (없으면 NotFound)
    pub fn document(&self, id: &str) -> Result<KnowledgeDocument> {
        Ok(self.store.get(id)?)
    }

    /// 카테고리별 문서 조회 (모르는 카테고리는 빈 목록)
    pub fn documents_by_category(&self, category: &str) -> Result<Vec<KnowledgeDocument>> {
        Ok(self.store.get_by_category(category)?)
    }

    /// 카테고리 목록 (최초 등장 순서)
    pub fn categories(&self) -> Result<Vec<String>> {
        Ok(self.store.list_categories()?)
    }

    /// 문서 삭제
    pub fn delete_document(&self, id: &str) -> Result<bool> {
        let deleted = self.store.delete(id)?;
        if deleted {
            self.index.invalidate(id);
        }
        Ok(deleted)
    }

    /// 지식베이스 통계
    pub fn stats(&self) -> Result<KbStats> {
        Ok(KbStats {
            total_documents: self.store.count()?,
            categories: self.store.list_categories()?.len(),
            documents_with_embeddings: self.index.vector_count(),
            embedding_enabled: self.index.is_enabled(),
            last_updated: self.store.last_updated()?,
        })
    }

    /// 내부 스토어 접근
    pub fn store(&self) -> &DocumentStore {
        &self.store
    }
}

// ============================================================================
// Context Formatting
// ============================================================================

/// 검색 결과를 챗 프롬프트용 컨텍스트 블록으로 포맷
///
/// 소비자(텍스트 생성)가 받는 형태: 제목, 유사도 퍼센트, 발췌, 태그.
/// 결과가 없으면 빈 문자열입니다.
pub fn build_context(results: &[SearchResult]) -> String {
    let mut out = String::new();

    for (i, result) in results.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }

        out.push_str(&format!(
            "### {} (relevance: {})\n{}\n",
            result.document.title,
            rank::format_similarity(result.similarity),
            result.relevant_chunk,
        ));

        if !result.document.tags.is_empty() {
            out.push_str(&format!("Tags: {}\n", result.document.tags.join(", ")));
        }
    }

    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::store::NewDocument;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// 단어 기반 결정적 테스트 프로바이더
    ///
    /// "cat"이 들어가면 [1,0], "dog"이 들어가면 [0,1] 방향 벡터를
    /// 돌려줘 코사인 유사도를 제어할 수 있습니다.
    struct AxisProvider;

    #[async_trait]
    impl EmbeddingProvider for AxisProvider {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            let lower = text.to_lowercase();
            let x = if lower.contains("cat") { 1.0 } else { 0.0 };
            let y = if lower.contains("dog") { 1.0 } else { 0.0 };
            Ok(vec![x, y, 0.1])
        }

        fn dimension(&self) -> usize {
            3
        }

        fn name(&self) -> &str {
            "axis"
        }
    }

    /// 항상 실패하는 프로바이더
    struct DownProvider;

    #[async_trait]
    impl EmbeddingProvider for DownProvider {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("provider unavailable")
        }

        fn dimension(&self) -> usize {
            3
        }

        fn name(&self) -> &str {
            "down"
        }
    }

    fn open_kb(provider: Option<Arc<dyn EmbeddingProvider>>) -> (TempDir, KnowledgeBase) {
        let dir = TempDir::new().unwrap();
        let kb = KnowledgeBase::open(&dir.path().join("kb.db"), provider).unwrap();
        (dir, kb)
    }

    fn doc(id: &str, title: &str, content: &str, category: &str, priority: f64) -> NewDocument {
        NewDocument {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            category: category.to_string(),
            tags: vec![],
            source: "test".to_string(),
            priority,
            extra: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty() {
        let (_dir, kb) = open_kb(None);
        kb.add_document(doc("a", "A", "some content", "product", 0.0))
            .unwrap();

        assert!(kb.search("", 5).await.unwrap().is_empty());
        assert!(kb.search("   ", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_store_returns_empty() {
        let (_dir, kb) = open_kb(None);

        assert!(kb.search("anything", 5).await.unwrap().is_empty());
        assert_eq!(kb.stats().unwrap().total_documents, 0);
    }

    #[tokio::test]
    async fn test_keyword_scenario_vietnamese_erp() {
        let (_dir, kb) = open_kb(None);
        kb.add_document(NewDocument {
            id: "erp-1".to_string(),
            title: "Katec ERP".to_string(),
            content: "Hệ thống ERP toàn diện với AI tích hợp, quản lý tài chính, nhân sự, \
                      kho vận và bán hàng cho doanh nghiệp vừa và nhỏ."
                .to_string(),
            category: "product".to_string(),
            tags: vec!["ERP".to_string(), "AI".to_string()],
            source: "seed".to_string(),
            priority: 5.0,
            extra: serde_json::Map::new(),
        })
        .unwrap();

        let results = kb.search("ERP tài chính", 3).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, "erp-1");
        assert!(results[0].similarity > 0.0);
        assert_eq!(results[0].method, ScoreMethod::Keyword);
        assert!(results[0].relevant_chunk.contains("tài chính"));
    }

    #[tokio::test]
    async fn test_limit_respected_and_clamped() {
        let (_dir, kb) = open_kb(None);
        for i in 0..10 {
            kb.add_document(doc(
                &format!("d-{}", i),
                "Doc",
                "shared keyword here",
                "product",
                0.0,
            ))
            .unwrap();
        }

        assert_eq!(kb.search("keyword", 3).await.unwrap().len(), 3);
        // limit 0은 최소 1로 클램프
        assert_eq!(kb.search("keyword", 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_deterministic() {
        let (_dir, kb) = open_kb(None);
        for i in 0..5 {
            kb.add_document(doc(
                &format!("d-{}", i),
                "Doc",
                "alpha beta gamma",
                "product",
                (i % 2) as f64,
            ))
            .unwrap();
        }

        let first = kb.search("alpha beta", 10).await.unwrap();
        let second = kb.search("alpha beta", 10).await.unwrap();

        let ids: Vec<&str> = first.iter().map(|r| r.document.id.as_str()).collect();
        let ids2: Vec<&str> = second.iter().map(|r| r.document.id.as_str()).collect();
        assert_eq!(ids, ids2);

        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.similarity, b.similarity);
        }
    }

    #[tokio::test]
    async fn test_tie_break_by_priority_then_id() {
        let (_dir, kb) = open_kb(None);
        kb.add_document(doc("low", "Low", "same matching words", "product", 5.0))
            .unwrap();
        kb.add_document(doc("high", "High", "same matching words", "product", 10.0))
            .unwrap();
        kb.add_document(doc("also-high", "Also", "same matching words", "product", 10.0))
            .unwrap();

        let results = kb.search("matching words", 10).await.unwrap();

        assert_eq!(results.len(), 3);
        // priority 10 문서들이 먼저, 그 안에서는 id 오름차순
        assert_eq!(results[0].document.id, "also-high");
        assert_eq!(results[1].document.id, "high");
        assert_eq!(results[2].document.id, "low");
    }

    #[tokio::test]
    async fn test_upsert_reflected_in_search() {
        let (_dir, kb) = open_kb(None);
        kb.add_document(doc("u-1", "Doc", "original topic", "product", 0.0))
            .unwrap();

        kb.add_document(doc("u-1", "Doc", "replacement subject", "product", 0.0))
            .unwrap();

        assert!(kb.search("original", 5).await.unwrap().is_empty());
        let results = kb.search("replacement", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, "u-1");
    }

    #[tokio::test]
    async fn test_embedding_score_takes_precedence() {
        let (_dir, kb) = open_kb(Some(Arc::new(AxisProvider)));
        kb.add_document(doc("cat-doc", "Cats", "all about cat care", "pets", 0.0))
            .unwrap();
        kb.add_document(doc("dog-doc", "Dogs", "all about dog care", "pets", 0.0))
            .unwrap();

        let results = kb.search("cat", 5).await.unwrap();

        assert!(!results.is_empty());
        assert_eq!(results[0].document.id, "cat-doc");
        assert_eq!(results[0].method, ScoreMethod::Embedding);
        assert!(results[0].similarity > 0.9);
    }

    #[tokio::test]
    async fn test_degradation_with_failing_provider() {
        let (_dir, kb) = open_kb(Some(Arc::new(DownProvider)));
        kb.add_document(doc("k-1", "Doc", "keyword fallback content", "product", 0.0))
            .unwrap();

        // 프로바이더가 죽어 있어도 검색은 성공 (키워드 폴백)
        let results = kb.search("fallback", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].method, ScoreMethod::Keyword);

        // 이후 임베딩은 영구 비활성으로 보고
        let stats = kb.stats().unwrap();
        assert!(!stats.embedding_enabled);
        assert_eq!(stats.documents_with_embeddings, 0);
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let (_dir, kb) = open_kb(Some(Arc::new(AxisProvider)));
        kb.add_document(doc("a", "A", "cat stuff", "pets", 0.0)).unwrap();
        kb.add_document(doc("b", "B", "dog stuff", "pets", 0.0)).unwrap();
        kb.initialize().await;

        let stats = kb.stats().unwrap();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.categories, 1);
        assert_eq!(stats.documents_with_embeddings, 2);
        assert!(stats.embedding_enabled);
        assert!(stats.last_updated.is_some());
    }

    #[tokio::test]
    async fn test_add_generates_id_when_empty() {
        let (_dir, kb) = open_kb(None);
        let id = kb
            .add_document(doc("", "Titled", "content body", "product", 0.0))
            .unwrap();

        assert!(!id.is_empty());
        assert_eq!(kb.document(&id).unwrap().title, "Titled");
    }

    #[tokio::test]
    async fn test_validation_error_surfaces() {
        let (_dir, kb) = open_kb(None);
        let err = kb
            .add_document(doc("v-1", "", "content", "product", 0.0))
            .unwrap_err();

        let kb_err = err.downcast_ref::<crate::knowledge::KbError>().unwrap();
        assert!(kb_err.is_validation());
        assert_eq!(kb.stats().unwrap().total_documents, 0);
    }

    #[tokio::test]
    async fn test_document_not_found() {
        let (_dir, kb) = open_kb(None);
        let err = kb.document("ghost").unwrap_err();
        let kb_err = err.downcast_ref::<crate::knowledge::KbError>().unwrap();
        assert!(kb_err.is_not_found());
    }

    #[tokio::test]
    async fn test_build_context_format() {
        let (_dir, kb) = open_kb(None);
        kb.add_document(NewDocument {
            id: "erp-1".to_string(),
            title: "Katec ERP".to_string(),
            content: "Hệ thống ERP quản lý tài chính".to_string(),
            category: "product".to_string(),
            tags: vec!["ERP".to_string(), "AI".to_string()],
            source: "seed".to_string(),
            priority: 0.0,
            extra: serde_json::Map::new(),
        })
        .unwrap();

        let results = kb.search("tài chính", 3).await.unwrap();
        let context = build_context(&results);

        assert!(context.contains("Katec ERP"));
        assert!(context.contains("%"));
        assert!(context.contains("Tags: ERP, AI"));

        // 결과 없음 -> 빈 컨텍스트
        assert_eq!(build_context(&[]), "");
    }
}
