//! CLI transport for direct terminal interaction

use crate::config::Config;
use crate::orchestration::{ArticlePipeline, Interrupt};
use crate::presenter::{ArticleSession, RenderOutcome, TerminalRenderer};
use anyhow::{Context, Result};
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Route Ctrl+C to `interrupt` while a run is active; exit otherwise
fn install_interrupt_handler(interrupt: Interrupt, running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        if running.load(Ordering::SeqCst) {
            interrupt.trigger();
        } else {
            println!();
            std::process::exit(130);
        }
    })
    .context("Failed to install Ctrl+C handler")
}

/// Generate one article and stream it to stdout
pub async fn run_generate(pipeline: Arc<ArticlePipeline>, query: &str) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    install_interrupt_handler(pipeline.interrupt().clone(), running)?;

    eprintln!("{}", "Génération de l'article...".dimmed());
    let mut session = ArticleSession::new();
    let mut renderer = TerminalRenderer::stdout();
    let outcome = session.generate(&pipeline, query, &mut renderer).await?;
    println!();

    match outcome {
        RenderOutcome::Complete(_) => Ok(()),
        RenderOutcome::Incomplete { error, .. } => {
            eprintln!("{} {}", "Article incomplet :".yellow().bold(), error);
            Err(error.into())
        }
    }
}

/// Interactive session: each line is a query
///
/// `clear` / `effacer` resets the stored query and article, `exit` / `quit`
/// leaves. Ctrl+C stops the article being generated.
pub async fn run_chat(pipeline: Arc<ArticlePipeline>) -> Result<()> {
    let interrupt = pipeline.interrupt().clone();
    let running = Arc::new(AtomicBool::new(false));
    install_interrupt_handler(interrupt.clone(), running.clone())?;

    println!(
        "{}",
        "Assistant de Recherches pour Internet - FR".bold()
    );
    println!(
        "{}\n",
        "Entrez votre requête (\"effacer\" pour réinitialiser, \"exit\" pour quitter)".dimmed()
    );

    let mut session = ArticleSession::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        match input.to_lowercase().as_str() {
            "exit" | "quit" => {
                println!("Au revoir !");
                break;
            }
            "clear" | "effacer" => {
                session.clear();
                println!("{}\n", "Requête et article effacés.".dimmed());
                continue;
            }
            "session" => {
                print_session(&session);
                continue;
            }
            _ => {}
        }

        interrupt.reset();
        running.store(true, Ordering::SeqCst);
        let mut renderer = TerminalRenderer::stdout();
        let result = session.generate(&pipeline, input, &mut renderer).await;
        running.store(false, Ordering::SeqCst);

        match result {
            Ok(RenderOutcome::Complete(_)) => println!("\n"),
            Ok(RenderOutcome::Incomplete { error, .. }) => {
                println!();
                eprintln!("{} {}\n", "Article incomplet :".yellow().bold(), error);
            }
            Err(e) => eprintln!("{} {}\n", "Erreur :".red().bold(), e),
        }
    }

    Ok(())
}

fn print_session(session: &ArticleSession) {
    if session.query().is_empty() {
        println!("{}\n", "(aucune requête)".dimmed());
        return;
    }
    println!("{} {}", "Requête :".bold(), session.query());
    println!(
        "{} {} caractères\n",
        "Article :".bold(),
        session.article().chars().count()
    );
}

/// Print the effective configuration
pub fn run_config(config: &Config, source: Option<&Path>) -> Result<()> {
    match source {
        Some(path) if path.exists() => {
            eprintln!("{} {}", "# config file:".dimmed(), path.display())
        }
        _ => eprintln!("{}", "# no config file, defaults in use".dimmed()),
    }
    print!("{}", config.to_toml()?);
    Ok(())
}
