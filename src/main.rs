//! Watches a page root and logs every reconciled update.
//!
//! Usage: `context-pages [ROOT] [DEBOUNCE_MS]`
//!
//! Create folders, drop files into them or edit their sidecars from any
//! other program and watch the engine pick the changes up.

use anyhow::{Context, Result};
use context_pages::{prelude::*, run_update_logger};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("context_pages=debug".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let root = match args.next() {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let debounce_ms = match args.next() {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("Invalid debounce '{}'", raw))?,
        None => 200,
    };

    let (engine, changes) = PageEngineBuilder::new()
        .debounce_ms(debounce_ms)
        .poll_interval_ms(1000)
        .build();
    let (handle, task) = EngineService::spawn(engine, changes);

    let logger = tokio::spawn(run_update_logger(
        handle.subscribe(),
        handle.watch_snapshot(),
    ));

    handle
        .load(&root)
        .await
        .with_context(|| format!("Failed to load {}", root.display()))?;
    print_tree(&handle.snapshot());

    println!("Watching {} (Ctrl+C to exit)", root.display());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    println!("\nShutting down...");

    drop(handle);
    task.await?;
    logger.await?;
    Ok(())
}

fn print_tree(snapshot: &PageSnapshot) {
    let mut stack: Vec<(&PageNode, usize)> = snapshot.tree.iter().rev().map(|n| (n, 0)).collect();
    while let Some((node, depth)) = stack.pop() {
        let items = snapshot
            .page(&node.path)
            .map(|page| page.content.len())
            .unwrap_or(0);
        println!("{}{} ({} items)", "  ".repeat(depth), node.name(), items);
        stack.extend(node.children().iter().rev().map(|child| (child, depth + 1)));
    }
}
