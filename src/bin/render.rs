//! ABOUTME: Thin CLI wrapper — reads a template (or script) and a JSON context
//! file and prints the render to stdout, the one demonstration binary §1
//! explicitly keeps outside the engine's core.
//!
//! Built with `clap` exactly as the teacher's `main.rs` parses its own
//! arguments; unlike that REPL this binary is one-shot and carries no
//! sandboxed filesystem/network capabilities, help system, or highlighter —
//! none of those are this engine's concerns.

use arvo::{config::EngineConfig, value::Value, Engine};
use clap::Parser;
use indexmap::IndexMap;
use std::path::PathBuf;

/// Render a template or script against a JSON context.
#[derive(Parser, Debug)]
#[command(name = "arvo-render")]
#[command(version = arvo::config::VERSION)]
#[command(about = arvo::config::BANNER)]
struct CliArgs {
    /// Template or script file to render.
    template: PathBuf,

    /// JSON file providing the render context (object of name -> value).
    #[arg(long = "context", value_name = "FILE")]
    context: Option<PathBuf>,

    /// Treat the input as the line-oriented script dialect (§4.9) instead of
    /// the template dialect, printing the resulting structured data as JSON.
    #[arg(long = "script")]
    script: bool,
}

fn load_context(path: Option<&PathBuf>) -> Result<IndexMap<String, Value>, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(IndexMap::new());
    };
    let raw = std::fs::read_to_string(path)?;
    let json: serde_json::Value = serde_json::from_str(&raw)?;
    let serde_json::Value::Object(obj) = json else {
        return Err("context file must contain a JSON object".into());
    };
    let mut ctx = IndexMap::new();
    for (k, v) in obj {
        ctx.insert(k, Value::from_json(&v));
    }
    Ok(ctx)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let source = std::fs::read_to_string(&args.template)?;
    let context = load_context(args.context.as_ref())?;

    let engine = Engine::with_config(EngineConfig::default());

    if args.script {
        let data = engine.render_script_string(&source, context).await?;
        println!("{}", serde_json::to_string_pretty(&data.to_json())?);
    } else {
        let rendered = engine.render_string(&source, context).await?;
        print!("{}", rendered);
    }

    Ok(())
}
