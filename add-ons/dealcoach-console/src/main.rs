//! DealCoach console: run a sales roleplay from the terminal.
//!
//! Type what you would say to the prospect; a line counts as finished speech
//! once you stop typing for the silence timeout. `/end` scores the call,
//! `/quit` abandons it.

mod media;
mod report;

use dealcoach_core::{
    CoachConfig, CoachError, CoachResult, CoachState, CoachUpdate, Difficulty, OpenRouterAnalyzer,
    OpenRouterClient, OpenRouterResponder, Scenario, SessionArchive, SessionController,
    SessionLength, ANALYSIS_STEPS, PRODUCTS, PROSPECT_ROLES,
};
use dealcoach_voice::{LiveEvent, Phase, Recognition, Speaker};
use media::ConsoleMedia;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Default)]
struct Args {
    scenario: Scenario,
    history: bool,
    show: Option<u64>,
    microphone: bool,
    speaker: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[dealcoach] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(Some(args)) => args,
        Ok(None) => {
            print_usage();
            return;
        }
        Err(e) => {
            eprintln!("dealcoach: {}", e);
            eprintln!("Run `dealcoach --help` for usage.");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args).await {
        eprintln!("dealcoach: {}", e.user_message());
        std::process::exit(1);
    }
}

fn parse_args(mut raw: impl Iterator<Item = String>) -> Result<Option<Args>, String> {
    let mut args = Args::default();
    let mut overrides: Vec<(String, String)> = Vec::new();

    while let Some(flag) = raw.next() {
        match flag.as_str() {
            "--help" | "-h" => return Ok(None),
            "--history" => args.history = true,
            "--mic" => args.microphone = true,
            "--speak" => args.speaker = true,
            "--show" => {
                let id = raw.next().ok_or("--show needs a session id")?;
                args.show = Some(id.parse().map_err(|_| format!("invalid session id '{}'", id))?);
            }
            "--scenario" | "--product" | "--description" | "--role" | "--difficulty"
            | "--length" | "--context" => {
                let value = raw.next().ok_or_else(|| format!("{} needs a value", flag))?;
                overrides.push((flag, value));
            }
            other => return Err(format!("unknown argument '{}'", other)),
        }
    }

    // A scenario file first, then flag overrides on top.
    if let Some((_, path)) = overrides.iter().find(|(flag, _)| flag == "--scenario") {
        args.scenario = Scenario::load(path).map_err(|e| e.to_string())?;
    }
    for (flag, value) in overrides {
        match flag.as_str() {
            "--product" => args.scenario.product = pick(&value, PRODUCTS),
            "--description" => args.scenario.product_description = value,
            "--role" => args.scenario.prospect_role = pick(&value, PROSPECT_ROLES),
            "--context" => args.scenario.context = value,
            "--difficulty" => {
                args.scenario.difficulty = Difficulty::parse(&value)
                    .ok_or_else(|| format!("unknown difficulty '{}'", value))?;
            }
            "--length" => {
                args.scenario.length = SessionLength::from_tag(&value)
                    .ok_or_else(|| format!("unknown length '{}' (5, 10, 15 or none)", value))?;
            }
            _ => {}
        }
    }

    if (args.microphone || args.speaker) && !cfg!(feature = "device") {
        return Err("--mic and --speak need a build with `--features device`".to_string());
    }
    Ok(Some(args))
}

/// A 1-based index into `options`, or free text.
fn pick(value: &str, options: &[&str]) -> String {
    value
        .parse::<usize>()
        .ok()
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| options.get(i))
        .map(|s| s.to_string())
        .unwrap_or_else(|| value.to_string())
}

fn print_usage() {
    println!("DealCoach console v{}", VERSION);
    println!();
    println!("Usage: dealcoach [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --scenario <file>      Load a scenario TOML file");
    println!("  --product <n|text>     Product being sold");
    println!("  --description <text>   Short product description");
    println!("  --role <n|text>        Prospect role");
    println!("  --difficulty <level>   easy | medium | hard | impossible");
    println!("  --length <tier>        5 | 10 | 15 | none (minutes)");
    println!("  --context <text>       Call context, e.g. \"renewal after a failed rollout\"");
    println!("  --history              List past sessions");
    println!("  --show <id>            Show and export a past session");
    println!("  --mic / --speak        Microphone input / spoken replies (device builds)");
    println!();
    println!("Products:");
    for (i, product) in PRODUCTS.iter().enumerate() {
        println!("  {}. {}", i + 1, product);
    }
    println!("Prospect roles:");
    for (i, role) in PROSPECT_ROLES.iter().enumerate() {
        println!("  {}. {}", i + 1, role);
    }
    println!();
    println!("Configure via DEALCOACH_CONFIG (default config/dealcoach.toml) and OPENROUTER_API_KEY.");
}

async fn run(args: Args) -> CoachResult<()> {
    let config = CoachConfig::load()?;
    let archive = SessionArchive::open(config.archive_path())?;
    tracing::info!(storage = %config.storage_path, sessions = archive.len(), "DealCoach console started");
    let responder = Arc::new(OpenRouterResponder::from_config(&config));

    if args.history || args.show.is_some() {
        // Browsing needs no credentials.
        let analyzer = Arc::new(OpenRouterAnalyzer::new(
            OpenRouterClient::from_config(&config),
            &config.analysis_model,
            &config.seller_company,
        ));
        let media = ConsoleMedia::new(false, false);
        let mut controller =
            SessionController::new(config.clone(), responder, analyzer, Box::new(media), archive);
        controller.open_history()?;
        report::print_history(controller.history());
        if let Some(id) = args.show {
            controller.select_history(id)?;
            if let Some(record) = controller.report() {
                report::print_report(record);
            }
            export(&controller, &config)?;
        }
        return Ok(());
    }

    let analyzer = Arc::new(OpenRouterAnalyzer::from_config(&config)?);
    let media = ConsoleMedia::new(args.microphone, args.speaker);
    let feed = media.feed_slot();
    let mut controller =
        SessionController::new(config.clone(), responder, analyzer, Box::new(media), archive);

    let scenario = args.scenario;
    println!(
        "📞 {} · {} · {} · {}",
        scenario.product, scenario.prospect_role, scenario.difficulty, scenario.length
    );
    println!("   Type what you would say. /end scores the call, /quit abandons it.\n");
    controller.start(scenario).await?;

    let mut lines = spawn_stdin();
    loop {
        tokio::select! {
            update = controller.next_update() => match update {
                Some(update) => show_update(&update, &config.persona_name),
                None => break,
            },
            line = lines.recv() => match line.as_deref().map(str::trim) {
                Some("/end") => {
                    // Failures land in the banner below.
                    let _ = finish(&mut controller).await;
                    break;
                }
                Some("/quit") | None => {
                    controller.shutdown().await;
                    println!("Session abandoned.");
                    return Ok(());
                }
                Some("") => {}
                Some(text) => {
                    let pushed = feed
                        .lock()
                        .ok()
                        .and_then(|slot| slot.as_ref().map(|f| f.push(Recognition::final_text(text))));
                    if pushed != Some(true) {
                        println!("  (the prospect has the floor, wait for your turn)");
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                controller.shutdown().await;
                println!("\nSession abandoned.");
                return Ok(());
            }
        }
    }

    match controller.state() {
        CoachState::Report => {
            if let Some(record) = controller.report() {
                report::print_report(record);
            }
            if let Some(banner) = controller.banner() {
                println!("⚠️  {}", banner);
            }
            export(&controller, &config)?;
        }
        _ => {
            if let Some(banner) = controller.banner() {
                println!("⚠️  {}", banner);
            }
        }
    }
    Ok(())
}

/// End the call, printing progress captions while the analysis runs.
async fn finish(controller: &mut SessionController) -> CoachResult<()> {
    println!("\n📊 Analyzing your call...");
    let ending = controller.end_session();
    tokio::pin!(ending);
    let mut steps = ANALYSIS_STEPS.iter();
    let mut ticker = tokio::time::interval(Duration::from_millis(1500));
    loop {
        tokio::select! {
            result = &mut ending => return result,
            _ = ticker.tick() => {
                if let Some(step) = steps.next() {
                    println!("   {}", step);
                }
            }
        }
    }
}

fn show_update(update: &CoachUpdate, persona_name: &str) {
    match update {
        CoachUpdate::Live(LiveEvent::TurnFinalized(turn))
            if turn.speaker == Speaker::User && !turn.scripted =>
        {
            println!("  YOU: {}", turn.text);
        }
        CoachUpdate::Live(LiveEvent::PhaseChanged(Phase::Generating)) => {
            println!("  … {} is thinking", persona_name);
        }
        CoachUpdate::Live(LiveEvent::PhaseChanged(Phase::Listening)) => {
            println!("  ▶ your turn");
        }
        CoachUpdate::Countdown(remaining) if remaining.as_secs() % 60 == 0 => {
            println!("  ⏱  {} min left", remaining.as_secs() / 60);
        }
        CoachUpdate::WrapUpSent(remaining) => {
            println!("  ⏳ {}s left, time to wrap up", remaining.as_secs());
        }
        CoachUpdate::StateChanged(CoachState::Report) => {
            println!("\n⏰ Time is up.");
        }
        _ => {}
    }
}

fn export(controller: &SessionController, config: &CoachConfig) -> CoachResult<()> {
    let document = controller.export_document()?;
    let id = controller
        .report()
        .map(|r| r.id)
        .ok_or(CoachError::InvalidTransition {
            action: "export a transcript",
            state: "without a report",
        })?;
    let dir = config.exports_dir();
    let html = dir.join(format!("session-{}.html", id));
    let markdown = dir.join(format!("session-{}.md", id));
    document.write_to(&html)?;
    document.write_to(&markdown)?;
    println!("📄 Transcript saved to {} and {}", html.display(), markdown.display());
    Ok(())
}

/// Stdin lines on a channel; the channel closes on EOF.
fn spawn_stdin() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<Args>, String> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn flags_override_scenario_defaults() {
        let args = parse(&["--product", "2", "--role", "Head of Procurement", "--difficulty", "hard", "--length", "5"])
            .unwrap()
            .unwrap();
        assert_eq!(args.scenario.product, "Tax Software (CCH Axcess)");
        assert_eq!(args.scenario.prospect_role, "Head of Procurement");
        assert_eq!(args.scenario.difficulty, Difficulty::Hard);
        assert_eq!(args.scenario.length, SessionLength::Five);
        assert!(!args.history);
    }

    #[test]
    fn history_and_errors() {
        let args = parse(&["--show", "1760860000000"]).unwrap().unwrap();
        assert_eq!(args.show, Some(1_760_860_000_000));
        assert!(parse(&["--help"]).unwrap().is_none());
        assert!(parse(&["--length", "7"]).is_err());
        assert!(parse(&["--product"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
    }
}
