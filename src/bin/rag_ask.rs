use anyhow::Result;
use clap::Parser;

use rag_query::config::Settings;
use rag_query::logger;
use rag_query::rag::QueryPipeline;

#[derive(Parser, Debug)]
#[command(name = "rag-ask")]
#[command(about = "Answer one question against the loaded corpus")]
struct Args {
    /// The question to answer
    question: String,

    /// Override the number of passages retrieved
    #[arg(long, env = "RAG_TOP_K")]
    top_k: Option<usize>,

    /// Override the context budget
    #[arg(long, env = "RAG_MAX_CONTEXT_UNITS")]
    max_context_units: Option<usize>,

    /// Print the retrieved passage ids and the prompt sent to the model
    #[arg(long)]
    show_prompt: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logger::init();

    let args = Args::parse();

    let mut settings = Settings::load()?;
    if let Some(top_k) = args.top_k {
        anyhow::ensure!(top_k >= 1, "--top-k must be at least 1");
        settings.top_k = top_k;
    }
    if let Some(units) = args.max_context_units {
        settings.max_context_units = units;
    }

    let pipeline = QueryPipeline::from_settings(&settings).await?;
    let traced = pipeline.answer_traced(&args.question).await;

    if args.show_prompt {
        println!("Retrieved:");
        for hit in &traced.trace.hits {
            let marker = if traced.trace.included.contains(&hit.id) { "+" } else { "-" };
            println!("  {} passage {} (score {:.3})", marker, hit.id, hit.score);
        }
        if let Some(ref prompt) = traced.trace.prompt {
            println!("\nPrompt:\n{}\n", prompt);
        }
    }

    println!("{}", traced.answer.text);
    Ok(())
}
