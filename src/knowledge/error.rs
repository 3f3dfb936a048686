//! 지식베이스 에러 타입
//!
//! 저장소/조회 계층의 타입 에러입니다.
//! 프로바이더(임베딩) 장애는 여기로 오지 않습니다 - 경계에서 흡수되어
//! 키워드 검색으로 폴백합니다.

use thiserror::Error;

/// 지식베이스 도메인 에러
#[derive(Debug, Error)]
pub enum KbError {
    /// 필수 필드 누락/공백 (문서 검증 실패)
    #[error("missing required field: {field}")]
    Validation {
        /// 누락된 필드명
        field: &'static str,
    },

    /// ID로 문서를 찾을 수 없음
    #[error("document not found: {id}")]
    NotFound {
        /// 조회한 문서 ID
        id: String,
    },

    /// SQLite 저장소 에러
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// 내부 락 오염 (다른 스레드 패닉)
    #[error("store lock poisoned")]
    LockPoisoned,
}

impl KbError {
    /// 검증 에러 여부
    pub fn is_validation(&self) -> bool {
        matches!(self, KbError::Validation { .. })
    }

    /// NotFound 에러 여부
    pub fn is_not_found(&self) -> bool {
        matches!(self, KbError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KbError::Validation { field: "title" };
        assert_eq!(err.to_string(), "missing required field: title");
        assert!(err.is_validation());

        let err = KbError::NotFound {
            id: "erp-1".to_string(),
        };
        assert_eq!(err.to_string(), "document not found: erp-1");
        assert!(err.is_not_found());
        assert!(!err.is_validation());
    }
}
