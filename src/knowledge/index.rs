//! Embedding Index - 문서별 임베딩 벡터 캐시
//!
//! 문서 ID별 선택적 임베딩 벡터를 프로세스 수명 동안 메모리에
//! 유지하고 코사인 유사도를 제공합니다.
//!
//! 프로바이더 가용성은 초기화 시 1회 판정되어 프로세스 수명 동안
//! 바뀌지 않습니다 (degrade-once). 실패한 프로바이더를 요청마다
//! 재시도하여 지연을 누적시키지 않기 위한 정책입니다.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use crate::embedding::EmbeddingProvider;

use super::store::KnowledgeDocument;

/// 프로바이더 호출 타임아웃
///
/// 초과 시 해당 호출만 포기하고 키워드 경로로 폴백합니다.
const EMBED_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// EmbeddingIndex
// ============================================================================

/// Embedding Index - 문서 임베딩 캐시 + 유사도 계산
///
/// 벡터는 지연 계산됩니다: 삽입 직후가 아니라 일괄 초기화 또는
/// 첫 검색 시 계산되어 캐시됩니다. 일부 문서만 임베딩이 있는
/// 혼합 모드가 정상 동작입니다.
pub struct EmbeddingIndex {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    /// doc_id -> 임베딩 벡터
    vectors: RwLock<HashMap<String, Vec<f32>>>,
    /// 임베딩 계산에 실패한 doc_id (프로세스 수명 동안 재시도 안 함)
    failed: RwLock<HashSet<String>>,
    /// 프로바이더 가용성 (1회 판정, 불변)
    capability: OnceLock<bool>,
}

impl EmbeddingIndex {
    /// 새 인덱스 생성
    ///
    /// `provider`가 None이면 키워드 전용 모드로 확정됩니다.
    pub fn new(provider: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self {
            provider,
            vectors: RwLock::new(HashMap::new()),
            failed: RwLock::new(HashSet::new()),
            capability: OnceLock::new(),
        }
    }

    /// 프로바이더 1회 프로브
    ///
    /// 짧은 텍스트 임베딩을 시도하여 가용성을 판정합니다.
    /// 판정 결과는 이후 바뀌지 않습니다. 여러 번 호출해도 무해합니다.
    pub async fn probe(&self) {
        if self.capability.get().is_some() {
            return;
        }

        let enabled = match &self.provider {
            None => false,
            Some(provider) => {
                match tokio::time::timeout(EMBED_TIMEOUT, provider.embed("ping")).await {
                    Ok(Ok(_)) => true,
                    Ok(Err(e)) => {
                        tracing::warn!("Embedding provider probe failed: {}", e);
                        false
                    }
                    Err(_) => {
                        tracing::warn!("Embedding provider probe timed out");
                        false
                    }
                }
            }
        };

        // 동시 프로브 시 첫 판정이 이김
        let _ = self.capability.set(enabled);

        if self.is_enabled() {
            tracing::info!(
                "Embedding index enabled (provider: {})",
                self.provider.as_ref().map(|p| p.name()).unwrap_or("-")
            );
        } else {
            tracing::info!("Embedding index disabled, keyword-only search");
        }
    }

    /// 임베딩 활성화 여부
    ///
    /// 프로브 전에는 false입니다.
    pub fn is_enabled(&self) -> bool {
        self.capability.get().copied().unwrap_or(false)
    }

    /// 텍스트 임베딩 (실패 시 None)
    ///
    /// 프로바이더 에러와 타임아웃은 여기서 1회 로깅 후 흡수됩니다 -
    /// 호출자는 None을 받으면 키워드 경로로 폴백합니다.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if !self.is_enabled() {
            return None;
        }
        let provider = self.provider.as_ref()?;

        match tokio::time::timeout(EMBED_TIMEOUT, provider.embed(text)).await {
            Ok(Ok(vector)) => Some(vector),
            Ok(Err(e)) => {
                tracing::warn!("Embedding failed, falling back to keywords: {}", e);
                None
            }
            Err(_) => {
                tracing::warn!("Embedding timed out after {:?}", EMBED_TIMEOUT);
                None
            }
        }
    }

    /// 임베딩 없는 문서에 대해 계산 및 캐시
    ///
    /// 부분 실패는 치명적이지 않습니다 - 실패한 문서는 기록해 두고
    /// 이후 재시도하지 않으며, 해당 문서는 키워드 경로로 검색됩니다.
    pub async fn ensure_embeddings(&self, docs: &[KnowledgeDocument]) {
        if !self.is_enabled() {
            return;
        }

        let pending: Vec<&KnowledgeDocument> = {
            let vectors = self.vectors.read().unwrap_or_else(|e| e.into_inner());
            let failed = self.failed.read().unwrap_or_else(|e| e.into_inner());
            docs.iter()
                .filter(|d| !vectors.contains_key(&d.id) && !failed.contains(&d.id))
                .collect()
        };

        if pending.is_empty() {
            return;
        }

        let mut ok = 0usize;
        for doc in &pending {
            match self.embed(&doc.content).await {
                Some(vector) => {
                    self.vectors
                        .write()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(doc.id.clone(), vector);
                    ok += 1;
                }
                None => {
                    self.failed
                        .write()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(doc.id.clone());
                }
            }
        }

        tracing::debug!(
            "Computed embeddings for {}/{} pending documents",
            ok,
            pending.len()
        );
    }

    /// 캐시된 벡터 조회
    pub fn get(&self, doc_id: &str) -> Option<Vec<f32>> {
        self.vectors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(doc_id)
            .cloned()
    }

    /// 캐시 무효화 (content 변경 시)
    ///
    /// 실패 기록도 함께 지워 변경된 내용으로 재시도할 수 있게 합니다.
    pub fn invalidate(&self, doc_id: &str) {
        self.vectors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(doc_id);
        self.failed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(doc_id);
    }

    /// 임베딩 보유 문서 수
    pub fn vector_count(&self) -> usize {
        self.vectors.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

// ============================================================================
// Cosine Similarity
// ============================================================================

/// 코사인 유사도 계산
///
/// dot(a,b) / (|a|*|b|), 결과는 -1.0 ~ 1.0 범위입니다.
/// 길이 불일치 또는 영벡터는 0.0을 반환합니다 (0 나누기 방지).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
