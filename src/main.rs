use anyhow::{Context, bail};
use chattwin::app::ChatTwin;
use chattwin::config::loader::{Backends, ConfigLoader, config_exists};
use chattwin::error::ErrorReport;
use chattwin::models::history::ConversationHistory;
use chattwin::observability::init_tracing;
use chattwin::services::persona_store::StoreHandle;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const USAGE: &str = "\
usage:
  chattwin stats <transcript>
  chattwin chat <transcript> <persona>
  chattwin load <persona>
  chattwin personas
  chattwin rebuild <transcript> <persona>
  chattwin forget <persona>

in a chat session: /reset clears the conversation, /metrics prints counters, exit quits";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load().context("failed to load configuration")?;
    let _guard = init_tracing(&config.logging);
    if config_exists() {
        info!("Configuration loaded from chattwin.toml");
    } else {
        info!("No chattwin.toml found, using built-in defaults");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let backends = match args.as_slice() {
        ["chat", _, _] | ["load", _] => Backends::ALL,
        ["rebuild", _, _] => Backends::EMBEDDING,
        _ => Backends::NONE,
    };
    ConfigLoader::validate(&config, backends).context("invalid configuration")?;

    let app = ChatTwin::from_config(&config);

    match args.as_slice() {
        ["stats", path] => {
            let text = read_transcript(path).await?;
            let analysis = app.analyze(&text);
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            Ok(())
        }
        ["chat", path, persona] => {
            let text = read_transcript(path).await?;
            let analysis = app.analyze(&text);
            let store = app
                .open_persona(&analysis.records, persona)
                .await
                .with_context(|| format!("failed to prepare persona '{persona}'"))?;
            chat_loop(&app, &store).await
        }
        ["load", persona] => {
            let store = app
                .load_persona(persona)
                .await
                .with_context(|| format!("no usable saved persona '{persona}'"))?;
            chat_loop(&app, &store).await
        }
        ["personas"] => {
            for persona in app.saved_personas().await? {
                println!("{persona}");
            }
            Ok(())
        }
        ["rebuild", path, persona] => {
            let text = read_transcript(path).await?;
            let analysis = app.analyze(&text);
            let store = app.rebuild_persona(&analysis.records, persona).await?;
            println!(
                "Rebuilt {} from {} messages",
                store.persona(),
                store.document_count()
            );
            Ok(())
        }
        ["forget", persona] => {
            app.forget_persona(persona).await?;
            println!("Removed {persona}");
            Ok(())
        }
        _ => {
            eprintln!("{USAGE}");
            bail!("unrecognized arguments: {:?}", args);
        }
    }
}

async fn read_transcript(path: &str) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read transcript {path}"))
}

/// 交互式对话；输入 `exit` 或 EOF 结束
async fn chat_loop(app: &ChatTwin, store: &StoreHandle) -> anyhow::Result<()> {
    info!(
        persona = store.persona(),
        documents = store.document_count(),
        "Persona ready"
    );
    println!("Chatting with {}. Type 'exit' to quit.", store.persona());

    let mut history = ConversationHistory::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        match query {
            "" => continue,
            "/reset" => {
                history.clear();
                println!("(conversation cleared)");
                continue;
            }
            "/metrics" => {
                print!("{}", app.metrics().gather());
                continue;
            }
            q if q.eq_ignore_ascii_case("exit") || q.eq_ignore_ascii_case("quit") => break,
            _ => {}
        }

        match app.ask(query, store, &mut history).await {
            Ok(reply) => println!("{}: {}", store.persona(), reply),
            Err(e) => {
                let report = ErrorReport::from(&e);
                let hint = if report.retryable { " (try again)" } else { "" };
                eprintln!("error [{}]: {}{}", report.code, report.message, hint);
            }
        }
    }

    Ok(())
}
