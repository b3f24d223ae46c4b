use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use brandoit_contracts::catalog::{Vote, VoteWriter};
use brandoit_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use brandoit_contracts::history::SessionManifest;
use brandoit_contracts::ratio::{ratios_for_provider, AspectRatioOption};
use brandoit_engine::StudioEngine;
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};

#[derive(Debug, Parser)]
#[command(name = "brandoit-rs", version, about = "BranDoIt generation engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Refine(RefineArgs),
    Chat(ChatArgs),
    Export(ExportArgs),
    History(HistoryArgs),
    Ratios(RatiosArgs),
    Vote(VoteArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "gemini")]
    provider: String,
    #[arg(long)]
    ratio: Option<String>,
    #[arg(long)]
    style: Option<String>,
    #[arg(long = "graphic-type")]
    graphic_type: Option<String>,
    #[arg(long)]
    palette: Option<String>,
    #[arg(long, default_value = "png")]
    format: String,
    #[arg(long, default_value_t = 1)]
    n: u64,
    #[arg(long)]
    prefs: Option<PathBuf>,
    #[arg(long = "reference")]
    references: Vec<PathBuf>,
}

#[derive(Debug, Parser)]
struct RefineArgs {
    #[arg(long)]
    session: PathBuf,
    #[arg(long)]
    instruction: String,
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    ratio: Option<String>,
    #[arg(long)]
    format: Option<String>,
    #[arg(long)]
    prefs: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "gemini")]
    provider: String,
    #[arg(long, default_value = "png")]
    format: String,
    #[arg(long)]
    prefs: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long)]
    session: PathBuf,
    #[arg(long)]
    mark: Option<u64>,
    #[arg(long, default_value = "png")]
    format: String,
    #[arg(long)]
    dest: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct HistoryArgs {
    #[arg(long)]
    session: PathBuf,
}

#[derive(Debug, Parser)]
struct RatiosArgs {
    #[arg(long, default_value = "gemini")]
    provider: String,
    #[arg(long)]
    prefs: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct VoteArgs {
    #[arg(long)]
    session: PathBuf,
    #[arg(long)]
    asset: String,
    #[arg(long)]
    voter: String,
    #[arg(long, conflicts_with = "down")]
    up: bool,
    #[arg(long)]
    down: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("brandoit-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Refine(args) => run_refine(args),
        Command::Chat(args) => run_chat(args),
        Command::Export(args) => run_export(args),
        Command::History(args) => run_history(args),
        Command::Ratios(args) => run_ratios(args),
        Command::Vote(args) => run_vote(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let ratio_options = load_ratio_options(args.prefs.as_deref())?;
    let mut engine = StudioEngine::create(&args.out, &args.prompt, ratio_options)?;
    let settings = generate_settings(&args);
    let mark = engine.generate(&args.prompt, &settings)?;
    print_mark(&mark)?;
    Ok(0)
}

fn run_refine(args: RefineArgs) -> Result<i32> {
    let ratio_options = load_ratio_options(args.prefs.as_deref())?;
    let mut engine = StudioEngine::open(&args.session, ratio_options)?;

    let mut settings = Map::new();
    let latest = engine.session().latest_mark().cloned();
    let provider = args
        .provider
        .or_else(|| latest.as_ref().map(|mark| mark.provider.clone()))
        .unwrap_or_else(|| "gemini".to_string());
    settings.insert("provider".to_string(), Value::String(provider));
    if let Some(ratio) = args
        .ratio
        .or_else(|| latest.as_ref().map(|mark| mark.aspect_ratio.clone()))
    {
        settings.insert("aspect_ratio".to_string(), Value::String(ratio));
    }
    if let Some(format) = args.format {
        settings.insert("output_format".to_string(), Value::String(format));
    }

    let mark = engine.refine(&args.instruction, &settings)?;
    print_mark(&mark)?;
    Ok(0)
}

fn run_chat(args: ChatArgs) -> Result<i32> {
    let ratio_options = load_ratio_options(args.prefs.as_deref())?;
    let mut engine: Option<StudioEngine> = None;
    let mut settings = Map::new();
    settings.insert("provider".to_string(), Value::String(args.provider.clone()));
    settings.insert(
        "output_format".to_string(),
        Value::String(args.format.clone()),
    );

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("failed reading stdin")?;
        let intent = parse_intent(&line);
        match intent.action.as_str() {
            "noop" => continue,
            "refine" => {
                let Some(prompt) = intent.prompt.as_deref() else {
                    continue;
                };
                let mark = match engine.as_mut() {
                    Some(engine) => engine.refine(prompt, &settings),
                    None => {
                        let mut created = StudioEngine::create(
                            &args.out,
                            prompt,
                            ratio_options.clone(),
                        )?;
                        let mark = created.generate(prompt, &settings);
                        engine = Some(created);
                        mark
                    }
                };
                match mark {
                    Ok(mark) => print_mark(&mark)?,
                    Err(err) => print_event(json!({ "error": format!("{err:#}") }))?,
                }
            }
            "set_ratio" | "set_style" | "set_graphic_type" | "set_palette" => {
                for (key, value) in &intent.settings_update {
                    settings.insert(key.clone(), value.clone());
                }
                print_event(json!({ "settings": Value::Object(settings.clone()) }))?;
            }
            "set_provider" => {
                if let Some(provider) = intent.command_args.get("provider") {
                    settings.insert("provider".to_string(), provider.clone());
                }
                print_event(json!({ "settings": Value::Object(settings.clone()) }))?;
            }
            "add_references" => {
                if let Some(paths) = intent.command_args.get("paths") {
                    settings.insert("reference_images".to_string(), paths.clone());
                }
                print_event(json!({ "settings": Value::Object(settings.clone()) }))?;
            }
            "export" => {
                let format = intent
                    .command_args
                    .get("format")
                    .and_then(Value::as_str)
                    .unwrap_or("png");
                match engine.as_ref() {
                    Some(engine) => {
                        match engine.export(None, format, &args.out.join("exports")) {
                            Ok(path) => {
                                print_event(json!({ "exported": path.to_string_lossy() }))?
                            }
                            Err(err) => print_event(json!({ "error": format!("{err:#}") }))?,
                        }
                    }
                    None => print_event(json!({ "error": "nothing generated yet" }))?,
                }
            }
            "history" => match engine.as_ref() {
                Some(engine) => {
                    let marks: Vec<Value> = engine
                        .session()
                        .marks
                        .iter()
                        .map(|mark| serde_json::to_value(mark).unwrap_or(Value::Null))
                        .collect();
                    print_event(json!({ "marks": marks }))?;
                }
                None => print_event(json!({ "marks": [] }))?,
            },
            "help" => print_event(json!({ "commands": CHAT_HELP_COMMANDS }))?,
            _ => {
                print_event(json!({
                    "error": format!("unknown command; try one of {}", CHAT_HELP_COMMANDS.join(" ")),
                }))?;
            }
        }
    }
    Ok(0)
}

fn run_export(args: ExportArgs) -> Result<i32> {
    let engine = StudioEngine::open(&args.session, Vec::new())?;
    let dest = args
        .dest
        .unwrap_or_else(|| args.session.join("exports"));
    let path = engine.export(args.mark, &args.format, &dest)?;
    print_event(json!({ "exported": path.to_string_lossy() }))?;
    Ok(0)
}

fn run_history(args: HistoryArgs) -> Result<i32> {
    let manifest_path = args.session.join("session.json");
    if !manifest_path.exists() {
        anyhow::bail!("no session manifest at {}", manifest_path.display());
    }
    let manifest = SessionManifest::load(&manifest_path);
    let marks: Vec<Value> = manifest
        .marks
        .iter()
        .map(|mark| serde_json::to_value(mark).unwrap_or(Value::Null))
        .collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "session_id": manifest.session_id,
            "prompt_seed": manifest.prompt_seed,
            "marks": marks,
        }))?
    );
    Ok(0)
}

fn run_ratios(args: RatiosArgs) -> Result<i32> {
    let candidates = load_ratio_options(args.prefs.as_deref())?;
    let working = ratios_for_provider(&args.provider, &candidates);
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "provider": args.provider,
            "ratios": working,
        }))?
    );
    Ok(0)
}

fn run_vote(args: VoteArgs) -> Result<i32> {
    let manifest_path = args.session.join("session.json");
    if !manifest_path.exists() {
        anyhow::bail!("no session manifest at {}", manifest_path.display());
    }
    let manifest = SessionManifest::load(&manifest_path);
    let writer = VoteWriter::new(args.session.join("votes.jsonl"), manifest.session_id);
    let vote = match (args.up, args.down) {
        (false, true) => Vote::Down,
        _ => Vote::Up,
    };
    let payload = writer.record(&args.asset, &args.voter, vote)?;
    print_event(Value::Object(payload))?;
    Ok(0)
}

fn generate_settings(args: &GenerateArgs) -> Map<String, Value> {
    let mut settings = Map::new();
    settings.insert("provider".to_string(), Value::String(args.provider.clone()));
    settings.insert(
        "output_format".to_string(),
        Value::String(args.format.clone()),
    );
    settings.insert("n".to_string(), Value::Number(args.n.into()));
    if let Some(ratio) = &args.ratio {
        settings.insert("aspect_ratio".to_string(), Value::String(ratio.clone()));
    }
    if let Some(style) = &args.style {
        settings.insert("style".to_string(), Value::String(style.clone()));
    }
    if let Some(graphic_type) = &args.graphic_type {
        settings.insert(
            "graphic_type".to_string(),
            Value::String(graphic_type.clone()),
        );
    }
    if let Some(palette) = &args.palette {
        settings.insert("palette".to_string(), Value::String(palette.clone()));
    }
    if !args.references.is_empty() {
        settings.insert(
            "reference_images".to_string(),
            Value::Array(
                args.references
                    .iter()
                    .map(|path| Value::String(path.to_string_lossy().to_string()))
                    .collect(),
            ),
        );
    }
    settings
}

fn load_ratio_options(path: Option<&Path>) -> Result<Vec<AspectRatioOption>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    let parsed: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let rows = parsed
        .get("ratios")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok(rows
        .into_iter()
        .filter_map(|row| serde_json::from_value(row).ok())
        .collect())
}

fn print_mark(mark: &brandoit_contracts::history::MarkEntry) -> Result<()> {
    print_event(serde_json::to_value(mark)?)
}

fn print_event(payload: Value) -> Result<()> {
    println!("{}", serde_json::to_string(&payload)?);
    Ok(())
}
