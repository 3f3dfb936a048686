//! CLI 모듈
//!
//! 지식베이스 운영용 명령어입니다. 관리 UI/챗 라우트가 호출하는
//! 파사드 연산과 1:1로 대응합니다.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::embedding::{create_embedder, has_api_key, EmbeddingProvider};
use crate::knowledge::{
    build_context, get_data_dir, KnowledgeBase, NewDocument, ScoreMethod, DEFAULT_SEARCH_LIMIT,
};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "katec-kb")]
#[command(version, about = "챗봇 지식베이스 검색 엔진", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 문서 추가 (같은 ID면 덮어쓰기)
    Add {
        /// 문서 ID (생략 시 UUID 생성)
        #[arg(long)]
        id: Option<String>,

        /// 제목
        #[arg(short, long)]
        title: String,

        /// 본문 텍스트
        #[arg(short, long)]
        content: Option<String>,

        /// 본문을 읽을 파일 경로
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// 카테고리 (예: product, service)
        #[arg(long)]
        category: String,

        /// 태그 (쉼표 구분)
        #[arg(long)]
        tags: Option<String>,

        /// 출처
        #[arg(long, default_value = "cli")]
        source: String,

        /// 랭킹 동점 시 가중치
        #[arg(short, long, default_value = "0")]
        priority: f64,
    },

    /// 지식베이스 검색
    Search {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,

        /// 챗 프롬프트용 컨텍스트 블록 출력
        #[arg(long)]
        context: bool,
    },

    /// ID로 문서 전체 조회
    Get {
        /// 문서 ID
        id: String,
    },

    /// 문서 목록
    List {
        /// 카테고리 필터
        #[arg(short, long)]
        category: Option<String>,
    },

    /// 카테고리 목록
    Categories,

    /// 지식베이스 통계
    Stats,

    /// 임베딩 일괄 초기화
    Init,

    /// 문서 삭제
    Delete {
        /// 삭제할 문서 ID
        id: String,
    },
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Add {
            id,
            title,
            content,
            file,
            category,
            tags,
            source,
            priority,
        } => cmd_add(id, title, content, file, category, tags, source, priority).await,
        Commands::Search {
            query,
            limit,
            context,
        } => cmd_search(&query, limit, context).await,
        Commands::Get { id } => cmd_get(&id).await,
        Commands::List { category } => cmd_list(category).await,
        Commands::Categories => cmd_categories().await,
        Commands::Stats => cmd_stats().await,
        Commands::Init => cmd_init().await,
        Commands::Delete { id } => cmd_delete(&id).await,
    }
}

/// 지식베이스 열기 (프로바이더는 환경에서)
fn open_kb() -> Result<KnowledgeBase> {
    let provider: Option<Arc<dyn EmbeddingProvider>> =
        create_embedder().map(|e| Arc::new(e) as Arc<dyn EmbeddingProvider>);

    KnowledgeBase::open_default(provider).context("지식베이스 열기 실패")
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 추가 명령어 (add)
#[allow(clippy::too_many_arguments)]
async fn cmd_add(
    id: Option<String>,
    title: String,
    content: Option<String>,
    file: Option<PathBuf>,
    category: String,
    tags: Option<String>,
    source: String,
    priority: f64,
) -> Result<()> {
    let content = match (content, file) {
        (Some(text), None) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("파일 읽기 실패: {}", path.display()))?,
        (Some(_), Some(_)) => bail!("--content와 --file은 동시에 지정할 수 없습니다"),
        (None, None) => bail!("--content 또는 --file 중 하나를 지정해야 합니다"),
    };

    let tags = tags
        .map(|t| {
            t.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let kb = open_kb()?;

    let doc_id = kb.add_document(NewDocument {
        id: id.unwrap_or_default(),
        title,
        content,
        category: category.clone(),
        tags,
        source,
        priority,
        extra: serde_json::Map::new(),
    })?;

    println!("[OK] 문서가 추가되었습니다 (ID: {})", doc_id);
    println!("     카테고리: {}", category);

    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(query: &str, limit: usize, context: bool) -> Result<()> {
    println!("[*] 검색 중: \"{}\"", query);

    let kb = open_kb()?;
    let results = kb.search(query, limit).await.context("검색 실패")?;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        let method_str = match result.method {
            ScoreMethod::Embedding => "EMB",
            ScoreMethod::Keyword => "KWD",
        };

        println!(
            "{}. [{}] [유사도: {}] {}",
            i + 1,
            method_str,
            crate::knowledge::format_similarity(result.similarity),
            result.document.id
        );
        println!("   제목: {}", result.document.title);
        println!("   카테고리: {}", result.document.category);
        println!("   발췌: {}", truncate_text(&result.relevant_chunk, 200));

        if !result.document.tags.is_empty() {
            println!("   태그: {}", result.document.tags.join(", "));
        }

        println!();
    }

    if context {
        println!("--- 프롬프트 컨텍스트 ---");
        println!("{}", build_context(&results));
    }

    Ok(())
}

/// 문서 조회 명령어 (get)
async fn cmd_get(id: &str) -> Result<()> {
    let kb = open_kb()?;
    let doc = kb.document(id)?;

    println!("[OK] 문서 {}", doc.id);
    println!("     제목: {}", doc.title);
    println!("     카테고리: {}", doc.category);
    if !doc.tags.is_empty() {
        println!("     태그: {}", doc.tags.join(", "));
    }
    println!("     출처: {}", doc.metadata.source);
    println!("     우선순위: {}", doc.metadata.priority);
    println!(
        "     수정: {}",
        doc.metadata.last_updated.format("%Y-%m-%d %H:%M")
    );
    println!();
    println!("{}", doc.content);

    Ok(())
}

/// 목록 명령어 (list)
async fn cmd_list(category: Option<String>) -> Result<()> {
    let kb = open_kb()?;

    let docs = match category.as_deref() {
        Some(c) => kb.documents_by_category(c)?,
        None => kb.store().all_documents()?,
    };

    if docs.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 문서 ({} 건):\n", docs.len());

    for doc in docs {
        println!(
            "  {} [{}] {}",
            doc.id,
            doc.category,
            truncate_text(&doc.title, 40)
        );
        println!(
            "        {} | {} chars",
            doc.metadata.last_updated.format("%Y-%m-%d %H:%M"),
            doc.content.chars().count()
        );
    }

    Ok(())
}

/// 카테고리 목록 명령어 (categories)
async fn cmd_categories() -> Result<()> {
    let kb = open_kb()?;
    let categories = kb.categories()?;

    if categories.is_empty() {
        println!("[!] 카테고리가 없습니다.");
        return Ok(());
    }

    println!("[OK] 카테고리 ({} 개):", categories.len());
    for category in categories {
        println!("  - {}", category);
    }

    Ok(())
}

/// 통계 명령어 (stats)
async fn cmd_stats() -> Result<()> {
    println!("katec-kb v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] 데이터 디렉토리: {}", get_data_dir().display());

    if has_api_key() {
        println!("[OK] 임베딩 API 키: 설정됨");
    } else {
        println!("[!] 임베딩 API 키: 미설정 (키워드 전용 모드)");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    let kb = open_kb()?;
    kb.initialize().await;
    let stats = kb.stats()?;

    println!("[OK] 문서: {} 건 / 카테고리: {} 개", stats.total_documents, stats.categories);
    println!(
        "     임베딩: {} ({} 문서 보유)",
        if stats.embedding_enabled { "활성" } else { "비활성" },
        stats.documents_with_embeddings
    );
    if let Some(last) = stats.last_updated {
        println!("     마지막 수정: {}", last.format("%Y-%m-%d %H:%M"));
    }

    Ok(())
}

/// 임베딩 초기화 명령어 (init)
async fn cmd_init() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\
             설정: export GEMINI_API_KEY=your-key\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }

    println!("[*] 임베딩 일괄 초기화 중...");

    let kb = open_kb()?;
    kb.initialize().await;
    let stats = kb.stats()?;

    if stats.embedding_enabled {
        println!(
            "[OK] 완료: {}/{} 문서에 임베딩 생성됨",
            stats.documents_with_embeddings, stats.total_documents
        );
    } else {
        println!("[!] 임베딩 프로바이더를 사용할 수 없습니다. 키워드 전용 모드로 동작합니다.");
    }

    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(id: &str) -> Result<()> {
    let kb = open_kb()?;

    if kb.delete_document(id)? {
        println!("[OK] 문서 {} 삭제됨", id);
    } else {
        println!("[!] ID {}인 문서를 찾을 수 없습니다", id);
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
