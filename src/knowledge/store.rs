//! Document Store - rusqlite 기반 문서 저장소
//!
//! 챗봇 지식 문서를 ID 기준으로 저장하고 카테고리별로 조회합니다.
//! 저장 위치: ~/.katec-kb/knowledge.db
//!
//! 임베딩 벡터는 여기 저장하지 않습니다 - 프로세스 수명 동안
//! EmbeddingIndex가 메모리에 캐시합니다. 대신 content 해시를 보관하여
//! 재삽입 시 내용 변경 여부를 판단합니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::KbError;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.katec-kb/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".katec-kb")
}

// ============================================================================
// Types
// ============================================================================

/// 문서 메타데이터
///
/// 필수 필드 + 호출자 확장용 open map 구조입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// 마지막 수정 시각
    pub last_updated: DateTime<Utc>,
    /// 출처 (예: "seed", "admin-ui")
    pub source: String,
    /// 랭킹 동점 시 가중치 (높을수록 우선)
    pub priority: f64,
    /// 호출자 정의 확장 필드
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            last_updated: Utc::now(),
            source: String::new(),
            priority: 0.0,
            extra: serde_json::Map::new(),
        }
    }
}

/// 저장된 지식 문서
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    /// 전역 고유 ID (불변)
    pub id: String,
    /// 표시용 제목
    pub title: String,
    /// 본문 (검색/발췌의 원본)
    pub content: String,
    /// 단일 카테고리 라벨 (예: "product", "service")
    pub category: String,
    /// 자유 형식 태그 (순서 유지)
    pub tags: Vec<String>,
    /// 메타데이터
    pub metadata: DocumentMetadata,
}

/// 새 문서 입력용 구조체
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub source: String,
    pub priority: f64,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// 문서 추가 결과
///
/// content 변경 여부로 임베딩 캐시 무효화를 결정합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    /// 신규 삽입 여부 (false = 기존 ID 덮어쓰기)
    pub created: bool,
    /// content가 이전과 달라졌는지
    pub content_changed: bool,
}

// ============================================================================
// DocumentStore
// ============================================================================

/// Document Store - SQLite 기반 문서 저장소
///
/// ID 기준 upsert(last-write-wins)와 카테고리 조회를 제공합니다.
/// 삽입 순서는 rowid로 보존됩니다 (upsert 시에도 유지).
pub struct DocumentStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl DocumentStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self, KbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    KbError::Storage(rusqlite::Error::InvalidPath(PathBuf::from(format!(
                        "{}: {}",
                        parent.display(),
                        e
                    ))))
                })?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 기본 위치에서 열기 (~/.katec-kb/knowledge.db)
    pub fn open_default() -> Result<Self, KbError> {
        let db_path = get_data_dir().join("knowledge.db");
        Self::open(&db_path)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<(), KbError> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                category TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                source TEXT NOT NULL DEFAULT '',
                priority REAL NOT NULL DEFAULT 0,
                extra TEXT NOT NULL DEFAULT '{}',
                last_updated TEXT NOT NULL,
                content_hash TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_documents_category ON documents(category)",
            [],
        )?;

        tracing::debug!("Document store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 문서 추가 (ID가 같으면 덮어쓰기)
    ///
    /// 필수 필드(id, title, content, category)가 공백이면
    /// `KbError::Validation`으로 거부하며 저장소는 변경되지 않습니다.
    ///
    /// upsert는 단일 SQL 문으로 수행되어 부분 적용이 없고,
    /// ON CONFLICT UPDATE이므로 rowid(삽입 순서)가 유지됩니다.
    pub fn add_document(&self, doc: &NewDocument) -> Result<AddOutcome, KbError> {
        validate(doc)?;

        let content_hash = hash_content(&doc.content);
        let tags_json = serde_json::to_string(&doc.tags).unwrap_or_else(|_| "[]".to_string());
        let extra_json = serde_json::to_string(&doc.extra).unwrap_or_else(|_| "{}".to_string());
        let now = Utc::now().to_rfc3339();

        let conn = self.lock()?;

        // 기존 해시 조회 (내용 변경 판단용)
        let prev_hash: Option<String> = conn
            .query_row(
                "SELECT content_hash FROM documents WHERE id = ?1",
                params![doc.id],
                |row| row.get(0),
            )
            .ok();

        conn.execute(
            "INSERT INTO documents
                (id, title, content, category, tags, source, priority, extra, last_updated, content_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                category = excluded.category,
                tags = excluded.tags,
                source = excluded.source,
                priority = excluded.priority,
                extra = excluded.extra,
                last_updated = excluded.last_updated,
                content_hash = excluded.content_hash",
            params![
                doc.id,
                doc.title,
                doc.content,
                doc.category,
                tags_json,
                doc.source,
                doc.priority,
                extra_json,
                now,
                content_hash,
            ],
        )?;

        let outcome = AddOutcome {
            created: prev_hash.is_none(),
            content_changed: prev_hash.as_deref() != Some(content_hash.as_str()),
        };

        tracing::info!(
            "Added document: {} (category={}, created={}, content_changed={})",
            doc.id,
            doc.category,
            outcome.created,
            outcome.content_changed
        );

        Ok(outcome)
    }

    /// ID로 문서 조회
    ///
    /// 없으면 `KbError::NotFound`를 반환합니다.
    pub fn get(&self, id: &str) -> Result<KnowledgeDocument, KbError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, title, content, category, tags, source, priority, extra, last_updated
             FROM documents WHERE id = ?1",
        )?;

        stmt.query_row(params![id], row_to_document)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => KbError::NotFound { id: id.to_string() },
                other => KbError::Storage(other),
            })
    }

    /// 카테고리로 문서 조회 (삽입 순서)
    ///
    /// 모르는 카테고리는 에러가 아니라 빈 목록입니다.
    pub fn get_by_category(&self, category: &str) -> Result<Vec<KnowledgeDocument>, KbError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, title, content, category, tags, source, priority, extra, last_updated
             FROM documents WHERE category = ?1
             ORDER BY rowid",
        )?;

        let docs = stmt
            .query_map(params![category], row_to_document)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(docs)
    }

    /// 전체 문서 조회 (삽입 순서)
    ///
    /// 검색 스코어링과 일괄 임베딩 패스에서 사용합니다.
    pub fn all_documents(&self) -> Result<Vec<KnowledgeDocument>, KbError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, title, content, category, tags, source, priority, extra, last_updated
             FROM documents ORDER BY rowid",
        )?;

        let docs = stmt
            .query_map([], row_to_document)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(docs)
    }

    /// 현재 존재하는 카테고리 목록 (최초 등장 순서)
    pub fn list_categories(&self) -> Result<Vec<String>, KbError> {
        let conn = self.lock()?;

        let mut stmt =
            conn.prepare("SELECT category FROM documents GROUP BY category ORDER BY MIN(rowid)")?;

        let categories = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(categories)
    }

    /// 문서 삭제
    pub fn delete(&self, id: &str) -> Result<bool, KbError> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// 문서 수
    pub fn count(&self) -> Result<usize, KbError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// 가장 최근 수정 시각 (빈 저장소면 None)
    pub fn last_updated(&self) -> Result<Option<DateTime<Utc>>, KbError> {
        let conn = self.lock()?;
        let latest: Option<String> =
            conn.query_row("SELECT MAX(last_updated) FROM documents", [], |row| {
                row.get(0)
            })?;
        Ok(latest.map(parse_datetime))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, KbError> {
        self.conn.lock().map_err(|_| KbError::LockPoisoned)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 필수 필드 검증
///
/// 공백 제거 후 비어 있는 첫 필드명으로 Validation 에러를 만듭니다.
fn validate(doc: &NewDocument) -> Result<(), KbError> {
    let required: [(&'static str, &str); 4] = [
        ("id", &doc.id),
        ("title", &doc.title),
        ("content", &doc.content),
        ("category", &doc.category),
    ];

    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(KbError::Validation { field });
        }
    }

    Ok(())
}

/// content SHA-256 해시 (hex)
///
/// 재삽입 시 내용이 그대로면 임베딩 재계산을 건너뛰기 위한 지문입니다.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SELECT 행을 KnowledgeDocument로 매핑
fn row_to_document(row: &Row<'_>) -> rusqlite::Result<KnowledgeDocument> {
    let tags_json: String = row.get(4)?;
    let extra_json: String = row.get(7)?;

    Ok(KnowledgeDocument {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        category: row.get(3)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        metadata: DocumentMetadata {
            source: row.get(5)?,
            priority: row.get(6)?,
            extra: serde_json::from_str(&extra_json).unwrap_or_default(),
            last_updated: parse_datetime(row.get::<_, String>(8)?),
        },
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, DocumentStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = DocumentStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn sample_doc(id: &str, category: &str) -> NewDocument {
        NewDocument {
            id: id.to_string(),
            title: format!("Doc {}", id),
            content: format!("Content of {}", id),
            category: category.to_string(),
            tags: vec!["tag1".to_string()],
            source: "test".to_string(),
            priority: 1.0,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_add_and_get_document() {
        let (_dir, store) = create_test_store();

        let outcome = store.add_document(&sample_doc("erp-1", "product")).unwrap();
        assert!(outcome.created);
        assert!(outcome.content_changed);

        let doc = store.get("erp-1").unwrap();
        assert_eq!(doc.title, "Doc erp-1");
        assert_eq!(doc.category, "product");
        assert_eq!(doc.tags, vec!["tag1".to_string()]);
        assert_eq!(doc.metadata.source, "test");
        assert!((doc.metadata.priority - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_get_not_found() {
        let (_dir, store) = create_test_store();

        let err = store.get("missing").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_validation_rejects_empty_fields() {
        let (_dir, store) = create_test_store();

        let mut doc = sample_doc("v-1", "product");
        doc.title = "   ".to_string();

        let err = store.add_document(&doc).unwrap_err();
        match err {
            KbError::Validation { field } => assert_eq!(field, "title"),
            other => panic!("unexpected error: {:?}", other),
        }

        // 거부된 쓰기는 저장소를 변경하지 않음
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_validation_rejects_empty_category() {
        let (_dir, store) = create_test_store();

        let mut doc = sample_doc("v-2", "product");
        doc.category = String::new();

        let err = store.add_document(&doc).unwrap_err();
        match err {
            KbError::Validation { field } => assert_eq!(field, "category"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_upsert_replaces_content() {
        let (_dir, store) = create_test_store();

        store.add_document(&sample_doc("erp-1", "product")).unwrap();

        let mut updated = sample_doc("erp-1", "product");
        updated.content = "New content".to_string();

        let outcome = store.add_document(&updated).unwrap();
        assert!(!outcome.created);
        assert!(outcome.content_changed);

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get("erp-1").unwrap().content, "New content");
    }

    #[test]
    fn test_upsert_unchanged_content() {
        let (_dir, store) = create_test_store();

        store.add_document(&sample_doc("erp-1", "product")).unwrap();
        let outcome = store.add_document(&sample_doc("erp-1", "product")).unwrap();

        assert!(!outcome.created);
        assert!(!outcome.content_changed);
    }

    #[test]
    fn test_get_by_category() {
        let (_dir, store) = create_test_store();

        store.add_document(&sample_doc("p-1", "product")).unwrap();
        store.add_document(&sample_doc("s-1", "service")).unwrap();
        store.add_document(&sample_doc("p-2", "product")).unwrap();

        let products = store.get_by_category("product").unwrap();
        assert_eq!(products.len(), 2);
        assert!(products.iter().all(|d| d.category == "product"));
        // 삽입 순서 유지
        assert_eq!(products[0].id, "p-1");
        assert_eq!(products[1].id, "p-2");

        // 모르는 카테고리는 빈 목록 (에러 아님)
        let unknown = store.get_by_category("news").unwrap();
        assert!(unknown.is_empty());
    }

    #[test]
    fn test_list_categories_first_seen_order() {
        let (_dir, store) = create_test_store();

        store.add_document(&sample_doc("s-1", "service")).unwrap();
        store.add_document(&sample_doc("p-1", "product")).unwrap();
        store.add_document(&sample_doc("s-2", "service")).unwrap();

        let categories = store.list_categories().unwrap();
        assert_eq!(
            categories,
            vec!["service".to_string(), "product".to_string()]
        );
    }

    #[test]
    fn test_delete_document() {
        let (_dir, store) = create_test_store();

        store.add_document(&sample_doc("d-1", "product")).unwrap();
        assert!(store.delete("d-1").unwrap());
        assert!(!store.delete("d-1").unwrap());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_last_updated() {
        let (_dir, store) = create_test_store();

        assert!(store.last_updated().unwrap().is_none());

        store.add_document(&sample_doc("t-1", "product")).unwrap();
        assert!(store.last_updated().unwrap().is_some());
    }

    #[test]
    fn test_hash_content_stable() {
        assert_eq!(hash_content("abc"), hash_content("abc"));
        assert_ne!(hash_content("abc"), hash_content("abd"));
    }
}
