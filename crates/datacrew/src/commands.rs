//! datacrew command implementations

use anyhow::{Context, Result};
use serde_json::Value;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use datacrew_agent::crew::{self, PRESETS};
use datacrew_agent::{
    AgentDefinition, Confirmer, RunConfig, RunOutput, RunResult, Runner, SharedContext,
    StdinConfirmer,
};
use datacrew_config::{self, Config};
use datacrew_events::RunEvent;
use datacrew_memory::{Turn, TranscriptStore};
use datacrew_provider::OpenAiCompatProvider;

/// Longest tool output echoed while streaming
const MAX_STREAMED_OUTPUT: usize = 400;

/// Create config and data directory
pub async fn init_command() -> Result<()> {
    println!("◆ Initializing datacrew...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = datacrew_config::init().await?;

    println!("\n◆ datacrew initialized");
    println!("Config:     {}", datacrew_config::config_path().display());
    println!("Transcript: {}", config.transcript_path().display());
    println!("\nNext steps:");
    println!("  1. Add your API key to ~/.datacrew/config.json (or set OPENAI_API_KEY)");
    println!("  2. Point database.url at your SQLite database");
    println!("  3. Ask a question: datacrew ask \"How many users signed up last month?\"");

    Ok(())
}

/// Answer one question and exit
pub async fn ask_command(agent_name: &str, question: &str, stream: bool) -> Result<()> {
    let config = Config::load().await?;
    let confirmer: Arc<dyn Confirmer> = Arc::new(StdinConfirmer);
    let agent = resolve_agent(agent_name, &config.default_model(), confirmer)?;
    let provider = Arc::new(build_provider(&config)?);

    let mut memory =
        TranscriptStore::load_with_max_turns(config.transcript_path(), config.memory.max_turns)
            .await;
    let interrupt = Interrupt::install();

    let result = ask_once(&provider, &config, &agent, question, stream, &mut memory, &interrupt)
        .await?;
    println!("{}", render_output(&result));

    Ok(())
}

/// Interactive session
pub async fn chat_command(agent_name: &str) -> Result<()> {
    let config = Config::load().await?;
    let confirmer: Arc<dyn Confirmer> = Arc::new(StdinConfirmer);
    let model = config.default_model();
    let mut agent = resolve_agent(agent_name, &model, Arc::clone(&confirmer))?;
    let provider = Arc::new(build_provider(&config)?);

    let mut memory =
        TranscriptStore::load_with_max_turns(config.transcript_path(), config.memory.max_turns)
            .await;
    let interrupt = Interrupt::install();

    println!("◆ Interactive mode with {} (type 'help' for commands)", agent.name);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    loop {
        let Some(input) = prompt(&format!("◆ {} > ", agent.name))? else {
            break;
        };

        match parse_chat_line(&input) {
            ChatCommand::Empty => continue,
            ChatCommand::Exit => break,
            ChatCommand::Help => print_chat_help(),
            ChatCommand::Clear => {
                print!("\x1B[2J\x1B[1;1H");
                std::io::stdout().flush()?;
            }
            ChatCommand::Memory => print_turns(memory.turns(), None),
            ChatCommand::Reset => {
                memory.reset().await?;
                println!("◆ Memory cleared");
            }
            ChatCommand::Switch(name) => {
                let name = match name {
                    Some(name) => name,
                    None => {
                        println!("Agents: {}", PRESETS.join(", "));
                        match prompt("Agent: ")? {
                            Some(name) => name,
                            None => break,
                        }
                    }
                };
                match resolve_agent(&name, &model, Arc::clone(&confirmer)) {
                    Ok(next) => {
                        agent = next;
                        println!("◆ Switched to {}", agent.name);
                    }
                    Err(e) => println!("✗ {}", e),
                }
            }
            ChatCommand::Ask { question, stream } => {
                match ask_once(&provider, &config, &agent, &question, stream, &mut memory, &interrupt)
                    .await
                {
                    Ok(result) => println!("{}\n", render_output(&result)),
                    Err(e) => println!("✗ {:#}\n", e),
                }
            }
        }
    }

    if let Err(e) = memory.persist().await {
        warn!("Failed to save transcript: {}", e);
    }
    println!("◆ Goodbye");

    Ok(())
}

/// Print the stored transcript
pub async fn memory_show_command(limit: Option<usize>) -> Result<()> {
    let config = Config::load().await?;
    let memory =
        TranscriptStore::load_with_max_turns(config.transcript_path(), config.memory.max_turns)
            .await;

    if memory.is_empty() {
        println!("No conversation history");
    } else {
        print_turns(memory.turns(), limit);
    }

    Ok(())
}

/// Delete the stored transcript
pub async fn memory_reset_command() -> Result<()> {
    let config = Config::load().await?;
    let mut memory =
        TranscriptStore::load_with_max_turns(config.transcript_path(), config.memory.max_turns)
            .await;

    let removed = memory.len();
    memory
        .reset()
        .await
        .with_context(|| format!("Failed to reset {}", memory.path().display()))?;
    println!("◆ Memory cleared ({} turns removed)", removed);

    Ok(())
}

/// Show configuration status
pub async fn status_command() -> Result<()> {
    let config_path = datacrew_config::config_path();

    println!("◆ datacrew Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!(
        "Config:     {} {}",
        config_path.display(),
        if config_path.exists() {
            "[OK]"
        } else {
            "[Missing]"
        }
    );

    let config = Config::load().await?;
    println!("Model:      {}", config.default_model());
    println!(
        "API Key:    {}",
        if config.has_api_key() {
            "[Set]"
        } else {
            "[Missing]"
        }
    );
    println!("Database:   {}", config.database.url);
    println!("Dashboard:  {}", config.dashboard.url);
    println!(
        "Limits:     {} turns, {} delegation levels",
        config.max_turns(),
        config.max_delegation_depth()
    );

    let transcript = config.transcript_path();
    match TranscriptStore::read_snapshot(&transcript).await {
        Ok(Some(snapshot)) => println!(
            "Memory:     {} ({} turns)",
            transcript.display(),
            snapshot.len()
        ),
        Ok(None) => println!("Memory:     {} [Empty]", transcript.display()),
        Err(e) => println!("Memory:     {} [Unreadable: {}]", transcript.display(), e),
    }
    println!("Agents:     {}", PRESETS.join(", "));

    println!("\n◆ Ready");

    Ok(())
}

fn build_provider(config: &Config) -> Result<OpenAiCompatProvider> {
    let api_key = config
        .api_key()
        .context("No API key configured. Set one in ~/.datacrew/config.json or OPENAI_API_KEY")?;
    Ok(OpenAiCompatProvider::new(
        api_key,
        config.api_base(),
        Some(config.default_model()),
    ))
}

fn resolve_agent(
    name: &str,
    model: &str,
    confirmer: Arc<dyn Confirmer>,
) -> Result<AgentDefinition> {
    match crew::preset(name, model, confirmer) {
        Some(agent) => Ok(agent?),
        None => anyhow::bail!(
            "Unknown agent '{}'. Choose one of: {}",
            name.trim(),
            PRESETS.join(", ")
        ),
    }
}

/// One question, one fresh context
async fn ask_once(
    provider: &Arc<OpenAiCompatProvider>,
    config: &Config,
    agent: &AgentDefinition,
    question: &str,
    stream: bool,
    memory: &mut TranscriptStore,
    interrupt: &Interrupt,
) -> Result<RunResult> {
    let mut runner =
        Runner::with_shared_provider(Arc::clone(provider), RunConfig::from_config(config))
            .with_cancellation(interrupt.arm());

    let renderer = if stream {
        let run_id = Uuid::new_v4().to_string();
        debug!("◆ STREAMING RUN {}", run_id);
        let (events, stream) = datacrew_events::channel(run_id);
        runner = runner.with_events(events);
        Some(tokio::spawn(stream.dispatch(|stamped| {
            if let Some(line) = render_event(&stamped.event) {
                println!("{}", line);
            }
        })))
    } else {
        None
    };

    let mut ctx = SharedContext::from_config(config);
    let result = runner.run_with_memory(agent, question, &mut ctx, memory).await;
    interrupt.disarm();

    // closes the stream so the renderer can finish
    drop(runner);
    if let Some(renderer) = renderer {
        if let Err(e) = renderer.await {
            warn!("Event renderer stopped: {}", e);
        }
    }

    Ok(result?)
}

/// Ctrl-C cancels the active run; with no run active it exits
struct Interrupt {
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl Interrupt {
    fn install() -> Self {
        let active: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
        let watched = Arc::clone(&active);

        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                let token = watched.lock().ok().and_then(|mut slot| slot.take());
                match token {
                    Some(token) => {
                        info!("◆ INTERRUPTED, CANCELLING RUN");
                        token.cancel();
                    }
                    None => {
                        println!();
                        std::process::exit(130);
                    }
                }
            }
        });

        Self { active }
    }

    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut slot) = self.active.lock() {
            *slot = Some(token.clone());
        }
        token
    }

    fn disarm(&self) {
        if let Ok(mut slot) = self.active.lock() {
            slot.take();
        }
    }
}

/// Read one line from stdin; `None` at end of input
fn prompt(label: &str) -> Result<Option<String>> {
    print!("{}", label);
    std::io::stdout().flush()?;

    let mut input = String::new();
    if std::io::stdin().read_line(&mut input)? == 0 {
        return Ok(None);
    }
    Ok(Some(input))
}

fn print_chat_help() {
    println!("Commands:");
    println!("  <question>        ask the current agent");
    println!("  <question> --s    ask and show tool calls as they happen");
    println!("  switch [agent]    change agent ({})", PRESETS.join(", "));
    println!("  memory            show the conversation so far");
    println!("  reset             forget the conversation");
    println!("  clear             clear the screen");
    println!("  exit | quit | q   leave");
}

fn print_turns(turns: &[Turn], limit: Option<usize>) {
    let skip = limit.map_or(0, |n| turns.len().saturating_sub(n));
    for turn in &turns[skip..] {
        println!("[{}] {}", turn.role, turn.content);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChatCommand {
    Empty,
    Exit,
    Help,
    Clear,
    Memory,
    Reset,
    Switch(Option<String>),
    Ask { question: String, stream: bool },
}

/// Interpret one line of interactive input. A trailing `--s` asks with
/// streamed events.
fn parse_chat_line(line: &str) -> ChatCommand {
    let line = line.trim();
    if line.is_empty() {
        return ChatCommand::Empty;
    }

    match line.to_ascii_lowercase().as_str() {
        "exit" | "quit" | "q" => return ChatCommand::Exit,
        "help" => return ChatCommand::Help,
        "clear" => return ChatCommand::Clear,
        "memory" => return ChatCommand::Memory,
        "reset" => return ChatCommand::Reset,
        "switch" => return ChatCommand::Switch(None),
        _ => {}
    }

    if let Some(prefix) = line.get(..7) {
        if prefix.eq_ignore_ascii_case("switch ") {
            return ChatCommand::Switch(Some(line[7..].trim().to_string()));
        }
    }

    let (question, stream) = match line.strip_suffix("--s") {
        Some(question) => (question.trim_end(), true),
        None => (line, false),
    };
    if question.is_empty() {
        return ChatCommand::Empty;
    }

    ChatCommand::Ask {
        question: question.to_string(),
        stream,
    }
}

/// One line (or block) of streamed output per event
fn render_event(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::TextDelta { agent, delta } => {
            if delta.trim().is_empty() {
                None
            } else {
                Some(format!("[{}] {}", agent, delta))
            }
        }
        RunEvent::AgentSwitched { to, .. } => Some(format!("◆ Agent switched to {}", to)),
        RunEvent::ToolCallStarted {
            tool, arguments, ..
        } => Some(format!("→ Tool called: {}\n  Arguments: {}", tool, arguments)),
        RunEvent::ToolCallFinished {
            tool,
            output,
            is_error,
            ..
        } => {
            if *is_error {
                Some(format!("✗ {} failed: {}", tool, output))
            } else {
                Some(format!("← Tool output: {}", truncate(output, MAX_STREAMED_OUTPUT)))
            }
        }
        RunEvent::RunFailed { agent, reason } => Some(format!("✗ {} failed: {}", agent, reason)),
        RunEvent::RunCompleted { agent, .. } => Some(format!("◆ Run complete ({})", agent)),
    }
}

/// Final answer, one section per structured field
fn render_output(result: &RunResult) -> String {
    let body = match &result.output {
        RunOutput::Text(text) => text.clone(),
        RunOutput::Structured(Value::Object(fields)) => fields
            .iter()
            .map(|(key, value)| format!("{}:\n{}", section_title(key), render_value(value)))
            .collect::<Vec<_>>()
            .join("\n\n"),
        RunOutput::Structured(other) => render_value(other),
    };
    format!("\n◆ {}\n{}", result.agent, body)
}

fn section_title(field: &str) -> String {
    match field {
        "sql_query" => "SQL query".to_string(),
        "query_results" => "Results".to_string(),
        "chart_link" => "Chart".to_string(),
        "baseline_model_results" => "Overview".to_string(),
        "best_model" => "Best model".to_string(),
        "feature_importance" => "Feature importance".to_string(),
        "next_steps" => "Next steps".to_string(),
        other => {
            let spaced = other.replace('_', " ");
            let mut chars = spaced.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => spaced,
            }
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}
