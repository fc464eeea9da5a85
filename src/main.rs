use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use kobber_lib::classify::Bucket;
use kobber_lib::commands;
use kobber_lib::config::{self, Config};
use kobber_lib::error::{CommandError, CrmError};
use kobber_lib::filter::{OpportunityFilter, OutcomeFilter};
use kobber_lib::form::OpportunityDraft;
use kobber_lib::lookup::{DuplicateLookup, LookupState};
use kobber_lib::money;
use kobber_lib::phone;
use kobber_lib::state::AppState;
use kobber_lib::stats::MonthKey;
use kobber_lib::types::{Opportunity, Outcome};

#[derive(Parser)]
#[command(name = "kobber")]
#[command(about = "Sales-lead tracking for the Kobber counter", version)]
#[command(after_help = "Environment:\n  KOBBER_CONFIG   Config file path\n  RUST_LOG        Log filter (default: info)")]
struct Cli {
    /// Config file (default: ~/.kobber/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print results as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Staff accounts
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    /// Sign in and remember the session
    Login {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },
    Logout,
    Whoami,
    /// Record a new opportunity
    Add(DraftArgs),
    /// Edit an opportunity in place (admin)
    Edit {
        id: String,
        #[command(flatten)]
        draft: DraftArgs,
    },
    /// Delete an opportunity (admin)
    Delete { id: String },
    Show { id: String },
    /// The most recent opportunities
    Recent,
    /// All opportunities matching a filter (admin)
    List(FilterArgs),
    /// Check whether a phone number already has a record
    Lookup {
        phone: Option<String>,
        /// Read numbers line by line from stdin, with the typing debounce
        #[arg(long, default_value_t = false)]
        interactive: bool,
    },
    /// Monthly summary (admin)
    Dashboard {
        /// YYYY-MM, default current month
        #[arg(long)]
        month: Option<MonthKey>,
    },
    Export {
        #[command(subcommand)]
        command: ExportCommand,
    },
    /// Hot backup of the database (admin)
    Backup {
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// Follow the recent list live until Ctrl-C
    Watch,
}

#[derive(Subcommand)]
enum UserCommand {
    /// Create an account (the first one needs no sign-in)
    Add {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Change your own password
    Passwd,
}

#[derive(Subcommand)]
enum ExportCommand {
    Csv {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    Pdf {
        #[arg(long)]
        month: Option<MonthKey>,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

#[derive(Args, Default)]
struct FilterArgs {
    #[arg(long)]
    month: Option<MonthKey>,
    #[arg(long)]
    salesperson: Option<String>,
    /// sale | loss
    #[arg(long, value_parser = parse_outcome)]
    outcome: Option<OutcomeFilter>,
    /// online | manual
    #[arg(long, value_parser = parse_bucket)]
    bucket: Option<Bucket>,
}

fn parse_outcome(value: &str) -> Result<OutcomeFilter, String> {
    OutcomeFilter::parse(value).ok_or_else(|| format!("expected sale or loss, got '{}'", value))
}

fn parse_bucket(value: &str) -> Result<Bucket, String> {
    Bucket::parse(value).ok_or_else(|| format!("expected online or manual, got '{}'", value))
}

impl From<FilterArgs> for OpportunityFilter {
    fn from(args: FilterArgs) -> Self {
        OpportunityFilter {
            month: args.month,
            salesperson: args.salesperson,
            outcome: args.outcome,
            bucket: args.bucket,
        }
    }
}

/// Form fields. Enum values accept the id or the label.
#[derive(Args)]
struct DraftArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    city: Option<String>,
    #[arg(long)]
    state: Option<String>,
    #[arg(long)]
    customer_type: Option<String>,
    #[arg(long)]
    shop_name: Option<String>,
    #[arg(long)]
    shop_focus: Option<String>,
    #[arg(long)]
    part: Option<String>,
    #[arg(long)]
    vehicle: Option<String>,
    #[arg(long)]
    source: Option<String>,
    #[arg(long, conflicts_with = "loss")]
    sale: bool,
    #[arg(long)]
    loss: bool,
    /// e.g. 1.234,56
    #[arg(long, conflicts_with = "amount_keys")]
    amount: Option<String>,
    /// Digits as typed into the masked field, read as cents (12345 = 123,45)
    #[arg(long)]
    amount_keys: Option<String>,
    #[arg(long)]
    payment: Option<String>,
    #[arg(long)]
    reason: Option<String>,
    #[arg(long)]
    missing_part: Option<String>,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long)]
    channel: Option<String>,
}

impl DraftArgs {
    /// Overlay the given flags on top of `draft`.
    fn apply(self, mut draft: OpportunityDraft) -> OpportunityDraft {
        let set = |field: &mut String, value: Option<String>| {
            if let Some(value) = value {
                *field = value;
            }
        };
        set(&mut draft.customer_name, self.name);
        set(&mut draft.customer_phone, self.phone);
        set(&mut draft.customer_email, self.email);
        set(&mut draft.customer_city, self.city);
        set(&mut draft.customer_state, self.state);
        set(&mut draft.customer_type, self.customer_type);
        set(&mut draft.shop_name, self.shop_name);
        set(&mut draft.shop_focus, self.shop_focus);
        set(&mut draft.part_sought, self.part);
        set(&mut draft.vehicle_model, self.vehicle);
        set(&mut draft.source, self.source);
        set(&mut draft.sale_amount, self.amount);
        if let Some(keys) = self.amount_keys {
            draft.sale_amount = money::from_keystrokes(&keys)
                .map(money::format_brl)
                .unwrap_or_default();
        }
        set(&mut draft.payment_method, self.payment);
        set(&mut draft.loss_reason, self.reason);
        set(&mut draft.missing_part, self.missing_part);
        set(&mut draft.notes, self.notes);
        set(&mut draft.channel, self.channel);
        if self.sale {
            draft.is_sale = Some(true);
        } else if self.loss {
            draft.is_sale = Some(false);
        }
        draft
    }
}

/// Session token remembered between runs.
#[derive(Serialize, Deserialize)]
struct StoredSession {
    token: String,
}

fn session_file(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(|dir| dir.join("session.json"))
        .unwrap_or_else(|| PathBuf::from("session.json"))
}

fn load_stored_session(path: &Path) -> Option<StoredSession> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn store_session(path: &Path, token: &str) -> Result<(), CommandError> {
    let content = serde_json::to_string(&StoredSession {
        token: token.to_string(),
    })
    .map_err(|e| CommandError::from(CrmError::Internal(e.to_string())))?;
    kobber_lib::util::atomic_write_str(path, &content)
        .map_err(|e| CommandError::from(CrmError::Internal(format!("Failed to save session: {}", e))))
}

fn forget_session(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

fn read_password(prompt: &str, given: Option<String>) -> Result<String, CommandError> {
    if let Some(password) = given {
        return Ok(password);
    }
    eprint!("{}: ", prompt);
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| CommandError::from(CrmError::InvalidInput(e.to_string())))?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

// ── Output ──────────────────────────────────────────────────────────

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => log::error!("Failed to serialize output: {}", e),
    }
}

fn outcome_text(opp: &Opportunity) -> String {
    match &opp.outcome {
        Outcome::Sale { amount_cents, .. } => {
            format!("VENDA {}", money::format_brl_symbol(*amount_cents))
        }
        Outcome::Loss { reason, .. } => format!("PERDA {}", reason.label()),
    }
}

fn print_line(opp: &Opportunity, tz: chrono_tz::Tz) {
    println!(
        "{}  {}  {:<24} {:<16} {:<24} {}",
        opp.created_at.with_timezone(&tz).format("%d/%m %H:%M"),
        &opp.id[..8.min(opp.id.len())],
        opp.customer.name,
        phone::format_display(&opp.customer.phone),
        opp.part_sought,
        outcome_text(opp),
    );
}

fn print_list(records: &[Opportunity], tz: chrono_tz::Tz, json: bool) {
    if json {
        print_json(&records);
        return;
    }
    if records.is_empty() {
        println!("(nenhuma oportunidade)");
    }
    for opp in records {
        print_line(opp, tz);
    }
}

fn print_detail(opp: &Opportunity, tz: chrono_tz::Tz) {
    println!("id:         {}", opp.id);
    println!(
        "criado:     {} por {}",
        opp.created_at.with_timezone(&tz).format("%d/%m/%Y %H:%M"),
        opp.salesperson_email
    );
    println!("cliente:    {} ({})", opp.customer.name, opp.customer_type);
    println!("telefone:   {}", phone::format_display(&opp.customer.phone));
    if !opp.customer.city.is_empty() {
        println!("cidade:     {} / {}", opp.customer.city, opp.customer.state);
    }
    if let Some(shop) = &opp.shop {
        println!("oficina:    {} ({})", shop.name, shop.focus);
    }
    println!("veículo:    {}", opp.vehicle_model);
    println!("peça:       {}", opp.part_sought);
    if let Some(source) = opp.source {
        println!("origem:     {}", source);
    }
    println!("resultado:  {}", outcome_text(opp));
    if let Outcome::Loss {
        missing_part: Some(part),
        ..
    } = &opp.outcome
    {
        println!("faltou:     {}", part);
    }
    if let Some(channel) = opp.channel {
        println!("canal:      {}", channel);
    }
    if !opp.notes.is_empty() {
        println!("obs:        {}", opp.notes);
    }
}

fn print_lookup(state: &LookupState, tz: chrono_tz::Tz) {
    if let Some(text) = state.describe(tz) {
        println!("{}", text);
    }
}

// ── Commands ────────────────────────────────────────────────────────

async fn run(cli: Cli) -> Result<(), CommandError> {
    let config_path = match cli.config {
        Some(path) => path,
        None => config::config_path().map_err(CrmError::from)?,
    };
    let config: Config = config::load_config(&config_path).map_err(CrmError::from)?;
    let tz = config.tz().map_err(CrmError::from)?;
    let debounce = Duration::from_millis(config.lookup_debounce_ms);
    let state = Arc::new(AppState::open(config, config_path.clone())?);

    let session_path = session_file(&config_path);
    if let Some(stored) = load_stored_session(&session_path) {
        if let Err(e) = commands::resume_session(&state, &stored.token) {
            log::warn!("Stored session not resumed: {}", e);
            forget_session(&session_path);
        }
    }

    let json = cli.json;
    match cli.command {
        Commands::User { command } => match command {
            UserCommand::Add {
                email,
                name,
                password,
            } => {
                let password = read_password("Password", password)?;
                let email = commands::register_user(&state, &email, name.as_deref(), &password)?;
                println!("Created account {}", email);
            }
            UserCommand::Passwd => {
                let current = read_password("Current password", None)?;
                let new = read_password("New password", None)?;
                commands::change_password(&state, &current, &new)?;
                forget_session(&session_path);
                println!("Password changed. Sign in again.");
            }
        },
        Commands::Login { email, password } => {
            let password = read_password("Password", password)?;
            let session = commands::sign_in(&state, &email, &password)?;
            store_session(&session_path, &session.token)?;
            println!(
                "Signed in as {}{}",
                session.email,
                if session.is_admin { " (admin)" } else { "" }
            );
        }
        Commands::Logout => {
            commands::sign_out(&state)?;
            forget_session(&session_path);
            println!("Signed out");
        }
        Commands::Whoami => match commands::current_session(&state) {
            Some(session) if json => print_json(&session),
            Some(session) => println!(
                "{}{} (until {})",
                session.email,
                if session.is_admin { " (admin)" } else { "" },
                session.expires_at.with_timezone(&tz).format("%d/%m/%Y")
            ),
            None => println!("Not signed in"),
        },
        Commands::Add(args) => {
            let draft = args.apply(OpportunityDraft::default());
            let opp = commands::submit_opportunity(&state, draft)?;
            if json {
                print_json(&opp);
            } else {
                println!("Saved {}", opp.id);
            }
        }
        Commands::Edit { id, draft } => {
            let existing = commands::get_opportunity(&state, &id)?;
            let draft = draft.apply(OpportunityDraft::from_opportunity(&existing));
            let opp = commands::update_opportunity(&state, &id, draft)?;
            if json {
                print_json(&opp);
            } else {
                println!("Updated {}", opp.id);
            }
        }
        Commands::Delete { id } => {
            commands::delete_opportunity(&state, &id)?;
            println!("Deleted {}", id);
        }
        Commands::Show { id } => {
            let opp = commands::get_opportunity(&state, &id)?;
            if json {
                print_json(&opp);
            } else {
                print_detail(&opp, tz);
            }
        }
        Commands::Recent => {
            let records = commands::get_recent_opportunities(&state)?;
            print_list(&records, tz, json);
        }
        Commands::List(filter) => {
            let records = commands::list_opportunities(&state, &filter.into())?;
            print_list(&records, tz, json);
        }
        Commands::Lookup { phone, interactive } => {
            if interactive {
                interactive_lookup(state.clone(), debounce, tz).await?;
            } else {
                let phone = phone.ok_or_else(|| {
                    CommandError::from(CrmError::InvalidInput("Give a phone number".into()))
                })?;
                let result = commands::lookup_customer(&state, &phone)?;
                if json {
                    print_json(&result);
                } else {
                    print_lookup(&result, tz);
                }
            }
        }
        Commands::Dashboard { month } => {
            let dashboard = commands::get_dashboard(&state, month)?;
            if json {
                print_json(&dashboard);
            } else {
                print_dashboard(&dashboard);
            }
        }
        Commands::Export { command } => {
            let path = match command {
                ExportCommand::Csv { filter, dir } => {
                    commands::export_csv(&state, &filter.into(), &dir)?
                }
                ExportCommand::Pdf { month, dir } => commands::export_pdf(&state, month, &dir)?,
            };
            println!("Wrote {}", path.display());
        }
        Commands::Backup { dest } => {
            let path = commands::backup_database(&state, dest.as_deref())?;
            println!("Backed up to {}", path.display());
        }
        Commands::Watch => watch_recent(state.clone(), tz).await?,
    }
    Ok(())
}

fn print_dashboard(dashboard: &commands::Dashboard) {
    let s = &dashboard.summary;
    println!("{}", s.month.label());
    println!("  Total vendido:    {}", money::format_brl_symbol(s.total_sales_cents));
    println!("  Vendas:           {}", s.sale_count);
    println!("  Perdas:           {}", s.loss_count);
    println!(
        "  Conversão:        {}%",
        format!("{:.1}", s.conversion_percent()).replace('.', ",")
    );
    println!("  Ticket médio:     {}", money::format_brl_symbol(s.average_ticket_cents));

    if !s.by_salesperson.is_empty() {
        println!("\nVendedores");
        for seller in &s.by_salesperson {
            println!(
                "  {:<28} {:>3}  {}",
                seller.email,
                seller.sale_count,
                money::format_brl_symbol(seller.total_cents)
            );
        }
    }
    if !s.loss_reasons.is_empty() {
        println!("\nMotivos de perda");
        for reason in &s.loss_reasons {
            println!("  {:<28} {:>3}", reason.reason.label(), reason.count);
        }
    }
    if !s.missing_parts.is_empty() {
        println!("\nPeças em falta: {}", s.missing_parts.join(", "));
    }

    let p = &dashboard.partition;
    println!(
        "\nOnline: {} ({})   Manual: {} ({})",
        p.online_count,
        money::format_brl_symbol(p.online_sales_cents),
        p.manual_count,
        money::format_brl_symbol(p.manual_sales_cents)
    );
    if !p.overlapping_ids.is_empty() {
        println!("  {} registro(s) casam com as duas regras", p.overlapping_ids.len());
    }
}

async fn watch_recent(state: Arc<AppState>, tz: chrono_tz::Tz) -> Result<(), CommandError> {
    let mut rx = commands::watch_recent(state)?;
    loop {
        {
            let snapshot = rx.borrow_and_update();
            println!("── {} ──", chrono::Utc::now().with_timezone(&tz).format("%H:%M:%S"));
            print_list(&snapshot.records, tz, false);
        }
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

/// Feed stdin lines to the debounced lookup, as if typed into the phone field.
async fn interactive_lookup(
    state: Arc<AppState>,
    debounce: Duration,
    tz: chrono_tz::Tz,
) -> Result<(), CommandError> {
    if commands::current_session(&state).is_none() {
        return Err(CrmError::NotSignedIn.into());
    }
    let (line_tx, mut lines) = tokio::sync::mpsc::channel::<String>(16);
    tokio::task::spawn_blocking(move || {
        for line in std::io::stdin().lock().lines().map_while(Result::ok) {
            if line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let mut lookup = DuplicateLookup::new(state, debounce);
    let mut rx = lookup.subscribe();
    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(line) => lookup.input(&line),
                None => break,
            },
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                print_lookup(&rx.borrow_and_update(), tz);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e.message);
            eprintln!("hint: {}", e.recovery_suggestion);
            ExitCode::FAILURE
        }
    }
}
