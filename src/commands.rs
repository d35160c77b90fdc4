//! Implementations of the non-server CLI commands.
//!
//! Each prints a human-readable report to stdout; logs go to stderr.

use anyhow::Result;

use crate::analyzer::QueryAnalyzer;
use crate::chat::ChatService;
use crate::config::Config;
use crate::documents::DocumentStore;

fn load_documents(config: &Config) -> Result<DocumentStore> {
    Ok(DocumentStore::load_all(
        &config.documents.dir,
        &config.documents.include_globs,
    )?)
}

/// `datadoc documents`: lists the loaded documents.
pub fn run_documents(config: &Config) -> Result<()> {
    let store = load_documents(config)?;

    println!(
        "{:<40} {:>8} {:>9} {:>7}  TITLE",
        "FILENAME", "CHARS", "SECTIONS", "TABLES"
    );
    for doc in store.documents() {
        println!(
            "{:<40} {:>8} {:>9} {:>7}  {}",
            doc.filename,
            doc.raw_text.chars().count(),
            doc.sections.len(),
            doc.tables.len(),
            doc.title
        );
    }
    println!();
    println!("{} document(s) in {}", store.len(), config.documents.dir.display());
    Ok(())
}

/// `datadoc select <question>`: shows how each document scores and which
/// one would answer the question.
pub fn run_select(config: &Config, question: &str) -> Result<()> {
    let store = load_documents(config)?;
    let analyzer = QueryAnalyzer::new(&config.analyzer);

    let groups = analyzer.detect_groups(question);
    if groups.is_empty() {
        println!("Keyword groups: (none)");
    } else {
        println!("Keyword groups: {}", groups.join(", "));
    }
    println!();

    println!("{:<40} {:>10}", "FILENAME", "SCORE");
    for s in analyzer.score_documents(question, store.documents()) {
        println!("{:<40} {:>10.2}", s.filename, s.score);
    }
    println!();

    match analyzer.select_document(question, store.documents(), &[]) {
        Some(selection) => println!("Selected: {}", selection.document.filename),
        None => println!("Selected: (none)"),
    }
    Ok(())
}

/// `datadoc ask <question>`: answers one question through the completion
/// API, as `POST /ask` would.
pub async fn run_ask(config: &Config, question: &str, session: &str) -> Result<()> {
    let chat = ChatService::from_config(config)?;
    let answer = chat.answer(question, session, false).await?;

    println!("{}", answer.response);
    println!();
    match answer.document_used {
        Some(doc) => println!("document: {}", doc),
        None => println!("document: (none)"),
    }
    println!(
        "asked at: {}",
        answer.asked_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    Ok(())
}
