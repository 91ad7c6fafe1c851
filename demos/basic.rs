//! Basic graft example
//!
//! Merges two annotation layers of one corpus, then appends the parts of a
//! split document, all in memory.
//!
//! Run with: cargo run --example basic

use std::sync::Arc;
use tokio::sync::mpsc;

use graft_core::{ContentNode, CorpusStructure, DocumentGraph, Project, Relation, RelationKind};
use graft_merge::{DocumentHost, DocumentMapping, FusionMode, MergeConfig, MergeEngine, ResidencyBudget};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("graft Basic Example\n");

    println!("=== Structural Merge ===\n");
    structural_example().await?;

    println!("\n=== Append Merge ===\n");
    append_example().await?;

    Ok(())
}

/// A tokenized document at `path`
fn tokenized(structure: &CorpusStructure, path: &str, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (doc, _) = structure.ensure_document_path(path)?;
    let mut graph = DocumentGraph::new();
    let ds = graph.add_text(text);
    let mut start = 0;
    for word in text.split(' ') {
        let end = start + word.chars().count();
        let token = graph.add_node(ContentNode::token())?;
        graph.add_relation(Relation::textual(token, ds, start, end))?;
        start = end + 1;
    }
    doc.set_graph(graph)?;
    Ok(())
}

/// Feed every structure's documents in the proposed order and run the engine
async fn run(project: Arc<Project>, config: MergeConfig) -> Result<(), Box<dyn std::error::Error>> {
    let host = Arc::new(ResidencyBudget::new(2));
    let mut engine = MergeEngine::new(project.clone(), config, host.clone())?;
    engine.prepare()?;

    let (tx, rx) = mpsc::channel(4);
    for structure in project.structures() {
        let order = engine
            .propose_import_order(structure.id())?
            .unwrap_or_default();
        let (tx, host) = (tx.clone(), host.clone());
        tokio::spawn(async move {
            for id in order {
                host.request_admission(&id).await;
                if tx.send(id).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let summary = engine.run(rx).await?;
    println!("Summary: {:?}", summary);
    Ok(())
}

async fn structural_example() -> Result<(), Box<dyn std::error::Error>> {
    let project = Arc::new(Project::new());

    let tokens = project.add_structure(CorpusStructure::new("tokens"));
    tokenized(&tokens, "news/2024/article1", "Graft merges corpora")?;
    tokenized(&tokens, "news/2024/article2", "Nothing to merge here")?;

    // a second layer adds a phrase over the first two tokens of article1
    let phrases = project.add_structure(CorpusStructure::new("phrases"));
    tokenized(&phrases, "news/2024/article1", "Graft merges corpora")?;
    if let Some(doc) = phrases.node_by_path("news/2024/article1") {
        doc.annotate(Some("source"), "annotator", "phrases");
        if let Some(graph) = doc.graph_mut().as_mut() {
            let tokens: Vec<_> = graph.nodes().iter().take(2).map(|n| n.id).collect();
            let span = graph.add_node(ContentNode::span().with_annotation("cat", "NP"))?;
            for token in tokens {
                graph.add_relation(Relation::new(RelationKind::Spanning, span, token))?;
            }
        }
    }

    run(project.clone(), MergeConfig::default()).await?;

    if let Some(doc) = tokens.node_by_path("news/2024/article1") {
        let guard = doc.graph();
        if let Some(graph) = guard.as_ref() {
            println!(
                "{}: {} nodes, {} relations, {} datasource(s)",
                doc.path(),
                graph.node_count(),
                graph.relation_count(),
                graph.texts().len()
            );
        }
        for annotation in doc.meta().iter() {
            println!("  meta {} = {}", annotation.qname, annotation.value);
        }
    }
    println!("Structures left: {}", project.len());

    Ok(())
}

async fn append_example() -> Result<(), Box<dyn std::error::Error>> {
    let project = Arc::new(Project::new());
    let interviews = project.add_structure(CorpusStructure::new("interviews"));
    tokenized(&interviews, "interviews/part1", "Where were you")?;
    tokenized(&interviews, "interviews/part2", "At home")?;
    tokenized(&interviews, "interviews/part3", "All day")?;

    let config = MergeConfig::default()
        .with_mode(FusionMode::Append)
        .with_mapping(DocumentMapping::new("interview", ["part1", "part2", "part3"]));
    run(project, config).await?;

    if let Some(doc) = interviews.node_by_path("interviews/interview") {
        let guard = doc.graph();
        if let Some(text) = guard.as_ref().and_then(|g| g.primary_text()) {
            println!("{}:\n{}", doc.path(), text.text);
        }
    }

    Ok(())
}
