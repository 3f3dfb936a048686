//! 키워드 스코어링 및 발췌 추출
//!
//! 검색 엔진의 순수 함수 부분입니다:
//! - 토큰화: 소문자 유니코드 영숫자 단어 (베트남어 성조 문자 유지)
//! - 키워드 스코어: 쿼리 토큰 교집합 / 쿼리 토큰 수 → [0, 1]
//! - 발췌: 매칭 토큰 밀도가 가장 높은 구간 (최대 300자)
//!
//! 스테밍/불용어 처리는 하지 않습니다 - 순서 결정성이 우선입니다.

use std::collections::HashSet;

/// 발췌(relevant chunk) 최대 길이 (문자 수)
pub const MAX_CHUNK_CHARS: usize = 300;

// ============================================================================
// Tokenization
// ============================================================================

/// 텍스트를 소문자 토큰으로 분할
///
/// 유니코드 영숫자 연속 구간을 토큰으로 봅니다.
/// "Hệ thống ERP!" -> ["hệ", "thống", "erp"]
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Keyword Scoring
// ============================================================================

/// 키워드 겹침 스코어
///
/// content에 존재하는 쿼리 토큰 수를 쿼리 토큰 수로 나눠
/// [0, 1]로 정규화합니다. 빈 쿼리는 0.0입니다.
pub fn keyword_score(query_tokens: &[String], content: &str) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }

    let content_tokens: HashSet<String> = tokenize(content).into_iter().collect();
    let matched = query_tokens
        .iter()
        .filter(|t| content_tokens.contains(t.as_str()))
        .count();

    matched as f32 / query_tokens.len() as f32
}

// ============================================================================
// Relevant Chunk Extraction
// ============================================================================

/// content 내 토큰 위치 (문자 오프셋 기준)
struct TokenSpan {
    /// 시작 문자 인덱스
    start: usize,
    /// 끝 문자 인덱스 (exclusive)
    end: usize,
    /// 소문자 토큰
    token: String,
}

/// content를 토큰 + 문자 오프셋으로 분해
fn token_spans(content: &str) -> Vec<TokenSpan> {
    let mut spans = Vec::new();
    let mut current = String::new();
    let mut start = 0usize;

    for (i, c) in content.chars().enumerate() {
        if c.is_alphanumeric() {
            if current.is_empty() {
                start = i;
            }
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            spans.push(TokenSpan {
                start,
                end: i,
                token: std::mem::take(&mut current),
            });
        }
    }

    if !current.is_empty() {
        let end = content.chars().count();
        spans.push(TokenSpan {
            start,
            end,
            token: current,
        });
    }

    spans
}

/// 쿼리와 가장 관련 있는 발췌 추출
///
/// 쿼리 토큰이 가장 밀집된 `max_chars` 이내의 연속 구간을 고릅니다.
/// 동률이면 앞쪽 구간이 이깁니다 (결정성).
/// 매칭 토큰이 없으면 (순수 임베딩 매치) 앞부분 `max_chars` 자를
/// 돌려줍니다.
pub fn extract_relevant_chunk(content: &str, query_tokens: &[String], max_chars: usize) -> String {
    let chars: Vec<char> = content.chars().collect();

    // 짧은 본문은 그대로
    if chars.len() <= max_chars {
        return content.trim().to_string();
    }

    let query: HashSet<&str> = query_tokens.iter().map(String::as_str).collect();
    let spans = token_spans(content);
    let hits: Vec<usize> = spans
        .iter()
        .enumerate()
        .filter(|(_, s)| query.contains(s.token.as_str()))
        .map(|(i, _)| i)
        .collect();

    if hits.is_empty() {
        return slice_chars(&chars, 0, max_chars);
    }

    // 각 매칭 토큰에서 시작하는 윈도우 중 매칭 수가 최대인 것
    let mut best_start = spans[hits[0]].start;
    let mut best_count = 0usize;

    for &h in &hits {
        let window_start = spans[h].start;
        let window_end = window_start + max_chars;
        let count = hits
            .iter()
            .filter(|&&k| spans[k].start >= window_start && spans[k].end <= window_end)
            .count();

        if count > best_count {
            best_count = count;
            best_start = window_start;
        }
    }

    slice_chars(&chars, best_start, max_chars)
}

/// 문자 인덱스 기준 안전한 부분 문자열
fn slice_chars(chars: &[char], start: usize, len: usize) -> String {
    let end = (start + len).min(chars.len());
    chars[start.min(chars.len())..end]
        .iter()
        .collect::<String>()
        .trim()
        .to_string()
}

// ============================================================================
// Score Formatting
// ============================================================================

/// 유사도를 소비자용 퍼센트 문자열로 (0~100%, 소수 1자리)
///
/// 챗 프롬프트에 들어가는 안정적 표현입니다.
pub fn format_similarity(score: f32) -> String {
    let clamped = score.clamp(0.0, 1.0);
    format!("{:.1}%", clamped * 100.0)
}

// ============================================================================
// Tests
// ============================================================================
