//! `kb search` and `kb ask` command runners.

use anyhow::Result;

use opskb_core::models::{KnowledgeMatch, MatchOrigin};

use crate::config::Config;
use crate::pipeline::{Pipeline, RetrievalOverrides};

const EXCERPT_CHARS: usize = 240;

pub async fn run_search(config: &Config, query: &str, overrides: RetrievalOverrides) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pipeline = Pipeline::open(config).await?;
    let retriever = pipeline.retriever().await;
    let matches = retriever
        .retrieve(&overrides.request(config, query))
        .await?;

    if matches.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, m) in matches.iter().enumerate() {
        println!("{}. {} {}", i + 1, score_label(m), m.chunk.source_path);
        println!(
            "    chunk: {}  type: {}",
            m.chunk.chunk_index,
            m.chunk.source_type.as_str()
        );
        println!("    excerpt: \"{}\"", excerpt(&m.chunk.content));
        println!();
    }
    Ok(())
}

pub async fn run_ask(config: &Config, query: &str, overrides: RetrievalOverrides) -> Result<()> {
    if query.trim().is_empty() {
        anyhow::bail!(opskb_core::KbError::InvalidInput(
            "query must not be empty".to_string()
        ));
    }

    let pipeline = Pipeline::open(config).await?;
    let answerer = pipeline.answerer()?;
    let retriever = pipeline.retriever().await;
    let matches = retriever
        .retrieve(&overrides.request(config, query))
        .await?;
    let answer = answerer.answer(query, &matches).await?;

    println!("{}", answer.answer.trim());
    println!();
    println!("confidence: {:.2}", answer.confidence);
    if answer.sources.is_empty() {
        println!("sources: (none)");
    } else {
        println!("sources:");
        for (i, source) in answer.sources.iter().enumerate() {
            println!("  [{}] {}", i + 1, source);
        }
    }
    if let Some(usage) = answer.usage {
        tracing::info!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "token usage"
        );
    }
    Ok(())
}

fn score_label(m: &KnowledgeMatch) -> String {
    match (m.origin, m.similarity) {
        (_, Some(score)) => format!("[{:.2}]", score),
        (MatchOrigin::Keyword, None) => "[keyword]".to_string(),
        _ => "[unscored]".to_string(),
    }
}

/// Single-line excerpt, cut on a char boundary.
fn excerpt(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut.trim_end())
}
