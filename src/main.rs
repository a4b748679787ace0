use anyhow::Context;
use clap::Parser;
use signup_basket::config::cli::{parse_pair, Command};
use signup_basket::domain::model::{ProfileId, SlotId};
use signup_basket::domain::ports::{ConfirmPrompt, ConfirmationHandler, FixedAnswer};
use signup_basket::utils::error::{ErrorSeverity, SignupError};
use signup_basket::utils::{logger, validation::Validate};
use signup_basket::{
    AppState, CliConfig, GroupKind, HttpBackend, LocalStore, SignupConfig, SlotFilter,
    StageOutcome, StartupReport,
};
use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

const TOKEN_FILE: &str = "session.token";

/// 在終端機詢問使用者 (y/N)
struct TerminalPrompt;

impl ConfirmationHandler for TerminalPrompt {
    fn confirm(&self, prompt: &ConfirmPrompt) -> bool {
        print!("⚠️  {} [y/N] ", prompt.message());
        if std::io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes" | "o" | "oui")
    }
}

fn exit_with(e: &SignupError) -> ! {
    tracing::error!(
        "❌ {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 4,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}

/// refresh token 每次刷新都會輪替，需要保存最新的一組
fn persist_refresh_token<P: signup_basket::domain::ports::PreferenceStore>(
    app: &AppState<P>,
    state_dir: &Path,
) -> anyhow::Result<()> {
    if let Some(session) = app.session_guard().current() {
        std::fs::create_dir_all(state_dir)?;
        std::fs::write(state_dir.join(TOKEN_FILE), &session.refresh_token)
            .context("failed to persist refresh token")?;
    }
    Ok(())
}

fn print_roster<P: signup_basket::domain::ports::PreferenceStore>(
    app: &AppState<P>,
    filter: SlotFilter,
) {
    let snapshot = app.snapshot();
    let projected = app.projected_slots();
    let visible: HashSet<&SlotId> = projected
        .filtered(filter)
        .into_iter()
        .map(|p| &p.slot.id)
        .collect();

    for period in snapshot.periods() {
        println!("\n📅 {}", period);
        for group in projected.groups_for_period(&period) {
            let label = match group.kind {
                GroupKind::Critical => "🔴 Needs people",
                GroupKind::Open => "🟢 Open",
                GroupKind::Full => "⚪ Full",
            };
            let rows: Vec<_> = group
                .slots
                .iter()
                .filter(|p| visible.contains(&p.slot.id))
                .collect();
            if rows.is_empty() {
                continue;
            }
            println!("  {}", label);
            for p in rows {
                println!(
                    "    {} {:<28} {}-{}  {}/{} {}",
                    if p.mine { "★" } else { " " },
                    p.slot.title,
                    p.slot.start.format("%H:%M"),
                    p.slot.end.format("%H:%M"),
                    p.slot.filled,
                    p.slot.max_allowed,
                    snapshot.attendees_for(&p.slot.id).join(", ")
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    let config = match SignupConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            logger::init_cli_logger(cli.verbose);
            exit_with(&e);
        }
    };

    // 初始化日誌
    let verbose = cli.verbose || config.logging.verbose;
    if cli.json_logs || config.logging.json || matches!(cli.command, Command::Watch) {
        logger::init_json_logger(verbose);
    } else {
        logger::init_cli_logger(verbose);
    }
    tracing::info!("Starting signup CLI");

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        exit_with(&e);
    }

    let state_dir = Path::new(&config.storage.state_dir).to_path_buf();
    let backend = Arc::new(
        HttpBackend::new(
            &config.service.base_url,
            &config.service.anon_key,
            config.request_timeout(),
        )
        .unwrap_or_else(|e| exit_with(&e)),
    );
    let confirmer: Arc<dyn ConfirmationHandler> = match &cli.command {
        Command::Submit { yes: true, .. } => Arc::new(FixedAnswer(true)),
        _ => Arc::new(TerminalPrompt),
    };
    let app = AppState::new(
        backend.clone(),
        backend,
        LocalStore::new(&state_dir),
        confirmer,
        config.engine_settings(),
    );

    // 優先使用上次保存的 refresh token
    let mut stored = config.stored_session();
    if let Ok(token) = std::fs::read_to_string(state_dir.join(TOKEN_FILE)) {
        if let Some(session) = stored.as_mut() {
            session.refresh_token = token.trim().to_string();
        }
    }

    match app.init(stored).await {
        Ok(StartupReport::Ready {
            slots,
            wizard_auto_open,
            ..
        }) => {
            persist_refresh_token(&app, &state_dir)?;
            println!("✅ Signed in, {} posts available", slots);
            if wizard_auto_open {
                println!("💡 No registration yet: use `signup submit --add SLOT:PROFILE`");
            }
        }
        Ok(StartupReport::SignedOut) => {
            eprintln!("❌ No session configured. Set [session].refresh_token in the config.");
            std::process::exit(1);
        }
        Ok(StartupReport::SessionRejected(e)) => exit_with(&SignupError::Auth(e)),
        Err(e) => exit_with(&e),
    }

    match cli.command {
        Command::Roster {
            only_available,
            only_mine,
        } => {
            print_roster(
                &app,
                SlotFilter {
                    only_available,
                    only_mine,
                },
            );
        }
        Command::Submit { add, remove, .. } => {
            for raw in &remove {
                let (slot, profile) = parse_pair(raw)
                    .with_context(|| format!("expected SLOT:PROFILE, got '{}'", raw))?;
                match app.stage_remove(&SlotId::from(slot), &ProfileId::from(profile)) {
                    Ok(outcome) => tracing::info!("➖ {} -> {:?}", raw, outcome),
                    Err(e) => exit_with(&SignupError::from(e)),
                }
            }
            for raw in &add {
                let (slot, profile) = parse_pair(raw)
                    .with_context(|| format!("expected SLOT:PROFILE, got '{}'", raw))?;
                match app.stage_add(&SlotId::from(slot), &ProfileId::from(profile)) {
                    Ok(StageOutcome::Declined) => println!("⏭️  Skipped {}", raw),
                    Ok(outcome) => tracing::info!("➕ {} -> {:?}", raw, outcome),
                    Err(e) => exit_with(&SignupError::from(e)),
                }
            }

            match app.submit().await {
                Ok(report) => {
                    println!(
                        "🎉 Registrations updated: {} added, {} removed",
                        report.added(),
                        report.removed()
                    );
                }
                Err(e) => exit_with(&SignupError::from(e)),
            }
            persist_refresh_token(&app, &state_dir)?;
        }
        Command::Balance => {
            println!("💰 Balance: {:.2}", app.balance().await);
        }
        Command::Watch => {
            let mut signals = app
                .take_poll_signals()
                .context("poll signal channel already taken")?;
            let mut persist = tokio::time::interval(app.poller().interval());
            tracing::info!("👀 Watching, press Ctrl+C to stop");
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Interrupted");
                        break;
                    }
                    Some(signal) = signals.recv() => {
                        app.handle_poll_signal(signal).await;
                        eprintln!("❌ Session lost, sign in again.");
                        std::process::exit(1);
                    }
                    _ = persist.tick() => persist_refresh_token(&app, &state_dir)?,
                }
            }
        }
    }

    app.poller().stop();
    Ok(())
}
