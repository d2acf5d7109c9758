use crate::api::error::ApiError;
use crate::api::multipart::UploadFile;
use crate::api::resources::{HistoryItem, NewUser, UserRecord, UserUpdate};
use crate::api::ApiClient;
use crate::config::Config;
use crate::history::HistoryFilter;
use crate::models;
use crate::session::sweeper::ExpirySweeper;
use crate::session::SessionStore;
use anyhow::{anyhow, Context as _, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

pub struct Context {
    pub config: Config,
    pub store: SessionStore,
    pub client: ApiClient,
    pub state_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Log in and store the session
    Login {
        #[arg(short, long)]
        username: Option<String>,
        #[arg(long, env = "RESTORA_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        #[arg(long, help = "Read the password from the first line of stdin")]
        password_stdin: bool,
        #[arg(long, help = "Ask the server for a long-lived token")]
        remember_me: bool,
    },
    /// Forget the stored session
    Logout,
    /// Show the local session state
    Status,
    /// Show the account the server thinks you are
    Whoami,
    /// Ask the server whether the stored token is still valid
    Validate,
    /// Upload a photo for restoration
    Restore {
        file: PathBuf,
        #[arg(long, help = "Model configuration to use")]
        model: Option<String>,
    },
    /// Browse restoration history
    History {
        #[command(subcommand)]
        action: Option<HistoryAction>,
    },
    /// Your own account
    Profile {
        #[command(subcommand)]
        action: Option<ProfileAction>,
    },
    /// Active logins for your account
    Sessions {
        #[command(subcommand)]
        action: Option<SessionsAction>,
    },
    /// User administration (admin only)
    Users {
        #[command(subcommand)]
        action: Option<UsersAction>,
    },
    /// Model configuration administration (admin only)
    Models {
        #[command(subcommand)]
        action: Option<ModelsAction>,
    },
    /// Interactive shell
    Shell,
}

#[derive(Subcommand, Debug, Clone)]
pub enum HistoryAction {
    List {
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    Show { id: String },
    Delete { id: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ProfileAction {
    Show,
    Update {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        full_name: Option<String>,
    },
    Password {
        #[arg(long)]
        current: String,
        #[arg(long)]
        new: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionsAction {
    List,
    Revoke { id: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum UsersAction {
    List,
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        role: Option<String>,
    },
    Update {
        id: String,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        password: Option<String>,
    },
    Delete { id: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ModelsAction {
    List,
    Show { id: String },
    Create {
        #[arg(long, help = "JSON document describing the model")]
        file: PathBuf,
    },
    Update {
        id: String,
        #[arg(long)]
        file: PathBuf,
    },
    Delete { id: String },
}

/// One line typed into the shell
#[derive(Parser, Debug)]
#[command(name = "", no_binary_name = true, disable_help_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: Command,
}

/// Turn pipeline errors into something a terminal user can act on
fn api_err(e: ApiError) -> anyhow::Error {
    if e.redirect_to().is_some() {
        anyhow!("Session ended; run `restora login` ({})", e)
    } else if let Some(status) = e.status() {
        anyhow!("{} (HTTP {})", e, status)
    } else {
        anyhow!(e)
    }
}

pub fn run(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Login {
            username,
            password,
            password_stdin,
            remember_me,
        } => login(ctx, username, password, password_stdin, remember_me),
        Command::Logout => {
            ctx.client.logout();
            println!("Logged out");
            Ok(())
        }
        Command::Status => {
            status(ctx);
            Ok(())
        }
        Command::Whoami => {
            let me = ctx.client.me().map_err(api_err)?;
            print_user(&me);
            Ok(())
        }
        Command::Validate => {
            let resp = ctx.client.validate_token().map_err(api_err)?;
            if resp.valid {
                println!(
                    "Token is valid{}",
                    resp.username
                        .map(|u| format!(" for {}", u))
                        .unwrap_or_default()
                );
            } else {
                println!("Token is not valid");
            }
            Ok(())
        }
        Command::Restore { file, model } => restore(ctx, &file, model.as_deref()),
        Command::History { action } => history(ctx, action),
        Command::Profile { action } => profile(ctx, action),
        Command::Sessions { action } => sessions(ctx, action),
        Command::Users { action } => users(ctx, action),
        Command::Models { action } => models_command(ctx, action),
        Command::Shell => run_shell(ctx),
    }
}

fn login(
    ctx: &Context,
    username: Option<String>,
    password: Option<String>,
    password_stdin: bool,
    remember_me: bool,
) -> Result<()> {
    let username = match username {
        Some(u) => u,
        None => prompt("Username: ")?,
    };
    let password = if password_stdin {
        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .context("Failed to read password from stdin")?;
        line.trim_end_matches(['\r', '\n']).to_string()
    } else {
        match password {
            Some(p) => p,
            None => prompt("Password (visible): ")?,
        }
    };

    let user = ctx
        .client
        .login(&username, &password, remember_me)
        .map_err(|e| anyhow!("Login failed: {}", e))?;
    match &user.role {
        Some(role) => println!("Logged in as {} ({})", user.username, role),
        None => println!("Logged in as {}", user.username),
    }
    if let Some(left) = ctx.store.remaining() {
        println!("Session valid for {}", format_duration(left));
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    let mut rl = DefaultEditor::new()?;
    let line = rl.readline(label)?;
    Ok(line.trim().to_string())
}

fn status(ctx: &Context) {
    // Same check a route guard does before rendering
    if ctx.store.check_token_expiry() {
        println!("Session expired. Run `restora login`.");
        return;
    }
    let session = ctx.store.snapshot();
    if !session.is_authenticated {
        println!("Not logged in");
        return;
    }

    let user = session.user.as_ref();
    println!(
        "Logged in as {}{}",
        user.map(|u| u.username.as_str()).unwrap_or("?"),
        user.and_then(|u| u.role.as_deref())
            .map(|r| format!(" ({})", r))
            .unwrap_or_default()
    );
    if let Some(expires_at) = session.expires_at.and_then(DateTime::<Utc>::from_timestamp_millis) {
        let local = expires_at.with_timezone(&Local);
        let left = ctx
            .store
            .remaining()
            .map(format_duration)
            .unwrap_or_else(|| "0s".to_string());
        println!("Expires {} (in {})", local.format("%Y-%m-%d %H:%M:%S"), left);
    }
    println!("API: {}", ctx.client.base_url());
}

fn restore(ctx: &Context, path: &std::path::Path, model: Option<&str>) -> Result<()> {
    let file = UploadFile::from_path(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut last = None;
    let result = ctx.client.restore(&file, model, |pct| {
        if last != Some(pct) {
            last = Some(pct);
            eprint!("\rUploading {}... {:>3}%", file.file_name, pct);
            let _ = std::io::stderr().flush();
        }
    });
    eprintln!();
    let result = result.map_err(api_err)?;

    println!(
        "Restoration {}{}",
        result
            .id
            .as_ref()
            .map(|id| format!("#{} ", id))
            .unwrap_or_default(),
        result.status.as_deref().unwrap_or("submitted")
    );
    if let Some(url) = &result.restored_image_url {
        println!("Result: {}", url);
    }
    if !result.extra.is_empty() {
        debug!(fields = ?result.extra, "Additional restore response fields");
    }
    Ok(())
}

fn history(ctx: &Context, action: Option<HistoryAction>) -> Result<()> {
    match action.unwrap_or(HistoryAction::List {
        search: None,
        status: None,
    }) {
        HistoryAction::List { search, status } => {
            let items = ctx.client.history().map_err(api_err)?;
            let filter = HistoryFilter { search, status };
            let shown = filter.apply(&items);
            if shown.is_empty() {
                println!(
                    "{}",
                    if filter.is_empty() {
                        "No restorations yet"
                    } else {
                        "No matching restorations"
                    }
                );
            }
            for item in &shown {
                print_history_line(item);
            }
            if !filter.is_empty() {
                println!("{} of {} shown", shown.len(), items.len());
            }
        }
        HistoryAction::Show { id } => {
            let item = ctx.client.history_item(&id).map_err(api_err)?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        HistoryAction::Delete { id } => {
            ctx.client.delete_history_item(&id).map_err(api_err)?;
            println!("Deleted history item {}", id);
        }
    }
    Ok(())
}

fn print_history_line(item: &HistoryItem) {
    println!(
        "  [{}] {:<32} {:<12} {:<14} {}",
        item.id,
        item.original_filename.as_deref().unwrap_or("-"),
        item.status.as_deref().unwrap_or("-"),
        item.model_name.as_deref().unwrap_or("-"),
        item.created_at.as_deref().unwrap_or("")
    );
}

fn profile(ctx: &Context, action: Option<ProfileAction>) -> Result<()> {
    match action.unwrap_or(ProfileAction::Show) {
        ProfileAction::Show => {
            let me = ctx.client.profile().map_err(api_err)?;
            print_user(&me);
        }
        ProfileAction::Update { email, full_name } => {
            if email.is_none() && full_name.is_none() {
                return Err(anyhow!("Nothing to update. Use --email or --full-name"));
            }
            let update = UserUpdate {
                email,
                full_name,
                ..UserUpdate::default()
            };
            let me = ctx.client.update_profile(&update).map_err(api_err)?;
            print_user(&me);
        }
        ProfileAction::Password { current, new } => {
            ctx.client
                .change_password(&current, &new)
                .map_err(api_err)?;
            println!("Password changed");
        }
    }
    Ok(())
}

fn print_user(user: &UserRecord) {
    println!("Username: {}", user.username);
    if let Some(id) = &user.id {
        println!("ID:       {}", id);
    }
    if let Some(name) = &user.full_name {
        println!("Name:     {}", name);
    }
    if let Some(email) = &user.email {
        println!("Email:    {}", email);
    }
    println!("Role:     {}", user.role.as_deref().unwrap_or("user"));
    if let Some(active) = user.is_active {
        println!("Active:   {}", if active { "yes" } else { "no" });
    }
}

fn sessions(ctx: &Context, action: Option<SessionsAction>) -> Result<()> {
    match action.unwrap_or(SessionsAction::List) {
        SessionsAction::List => {
            let sessions = ctx.client.sessions().map_err(api_err)?;
            if sessions.is_empty() {
                println!("No active sessions");
            }
            for s in sessions {
                let marker = if s.is_current == Some(true) { " *" } else { "" };
                println!(
                    "  [{}] {} {} {}{}",
                    s.id,
                    s.ip_address.as_deref().unwrap_or("-"),
                    s.user_agent.as_deref().unwrap_or("-"),
                    s.created_at.as_deref().unwrap_or(""),
                    marker
                );
            }
        }
        SessionsAction::Revoke { id } => {
            ctx.client.revoke_session(&id).map_err(api_err)?;
            println!("Revoked session {}", id);
        }
    }
    Ok(())
}

/// The server enforces roles; this only saves a round trip of confusion
fn warn_if_not_admin(ctx: &Context) {
    if ctx.store.user().is_some_and(|u| !u.is_admin()) {
        warn!("Logged-in user is not an admin; the server will likely refuse this");
    }
}

fn users(ctx: &Context, action: Option<UsersAction>) -> Result<()> {
    warn_if_not_admin(ctx);
    match action.unwrap_or(UsersAction::List) {
        UsersAction::List => {
            for user in ctx.client.users().map_err(api_err)? {
                println!(
                    "  [{}] {:<20} {:<8} {}{}",
                    user.id.as_ref().map(|id| id.to_string()).unwrap_or_default(),
                    user.username,
                    user.role.as_deref().unwrap_or("user"),
                    user.email.as_deref().unwrap_or(""),
                    if user.is_active == Some(false) { " (inactive)" } else { "" }
                );
            }
        }
        UsersAction::Create {
            username,
            password,
            email,
            role,
        } => {
            let created = ctx
                .client
                .create_user(&NewUser {
                    username,
                    password,
                    email,
                    full_name: None,
                    role,
                })
                .map_err(api_err)?;
            println!("Created user {}", created.username);
        }
        UsersAction::Update {
            id,
            role,
            active,
            password,
        } => {
            let update = UserUpdate {
                role,
                is_active: active,
                password,
                ..UserUpdate::default()
            };
            let updated = ctx.client.update_user(&id, &update).map_err(api_err)?;
            println!("Updated user {}", updated.username);
        }
        UsersAction::Delete { id } => {
            ctx.client.delete_user(&id).map_err(api_err)?;
            println!("Deleted user {}", id);
        }
    }
    Ok(())
}

fn models_command(ctx: &Context, action: Option<ModelsAction>) -> Result<()> {
    warn_if_not_admin(ctx);
    match action.unwrap_or(ModelsAction::List) {
        ModelsAction::List => {
            for model in ctx.client.models().map_err(api_err)? {
                println!(
                    "  [{}] {:<24} {}{}",
                    model.id,
                    model.name,
                    model.description.as_deref().unwrap_or(""),
                    if model.is_active == Some(false) { " (disabled)" } else { "" }
                );
            }
        }
        ModelsAction::Show { id } => {
            let configs = ctx.client.models().map_err(api_err)?;
            let model = configs
                .into_iter()
                .find(|m| m.id.0 == id)
                .ok_or_else(|| anyhow!("No model configuration with id {}", id))?;
            println!("{}", models::render_document(&serde_json::to_value(&model)?)?);
        }
        ModelsAction::Create { file } => {
            let document = models::load_document(&file)?;
            let created = ctx.client.create_model(&document).map_err(api_err)?;
            println!("Created model {} [{}]", created.name, created.id);
        }
        ModelsAction::Update { id, file } => {
            let document = models::load_document(&file)?;
            let updated = ctx.client.update_model(&id, &document).map_err(api_err)?;
            println!("Updated model {} [{}]", updated.name, updated.id);
        }
        ModelsAction::Delete { id } => {
            ctx.client.delete_model(&id).map_err(api_err)?;
            println!("Deleted model {}", id);
        }
    }
    Ok(())
}

pub fn run_shell(ctx: &Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history_path = ctx.state_dir.as_ref().map(|d| d.join("shell_history.txt"));
    if let Some(path) = &history_path {
        let _ = rl.load_history(path);
    }

    let sweeper = ExpirySweeper::start(
        ctx.store.clone(),
        Duration::from_secs(ctx.config.session.sweep_interval_secs),
    );
    let subscription = ctx.store.subscribe(|session| {
        if session.is_empty() {
            eprintln!("\n[session ended]");
        }
    });

    println!("restora - type help for commands, exit to quit");

    loop {
        match rl.readline("restora> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                match line {
                    "exit" | "quit" => break,
                    "help" => {
                        print_shell_help();
                        continue;
                    }
                    _ => {}
                }

                if let Err(e) = run_shell_line(ctx, line) {
                    eprintln!("Error: {:#}", e);
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    ctx.store.unsubscribe(subscription);
    sweeper.stop();
    if let Some(path) = &history_path {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        let _ = rl.save_history(path);
    }
    Ok(())
}

fn run_shell_line(ctx: &Context, line: &str) -> Result<()> {
    let words = shell_words::split(line).context("Could not parse command line")?;
    let parsed = ShellLine::try_parse_from(words).map_err(|e| anyhow!("{}", e))?;
    if matches!(parsed.command, Command::Shell) {
        return Err(anyhow!("Already in the shell"));
    }
    run(ctx, parsed.command)
}

fn print_shell_help() {
    println!("Commands:");
    println!("  login [-u USER]             - log in");
    println!("  logout                      - forget the session");
    println!("  status                      - show local session state");
    println!("  whoami | validate           - ask the server about your token");
    println!("  restore FILE [--model ID]   - upload a photo for restoration");
    println!("  history [list|show|delete]  - browse past restorations");
    println!("  profile [show|update|password]");
    println!("  sessions [list|revoke ID]");
    println!("Admin:");
    println!("  users [list|create|update|delete]");
    println!("  models [list|show|create|update|delete]");
    println!("  exit                        - quit");
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {}m", h, m)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(86_400)), "24h 0m");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(9)), "9s");
    }

    #[test]
    fn test_shell_line_parsing() {
        let words = shell_words::split("restore \"old photo.jpg\" --model 3").unwrap();
        let parsed = ShellLine::try_parse_from(words).unwrap();
        match parsed.command {
            Command::Restore { file, model } => {
                assert_eq!(file, PathBuf::from("old photo.jpg"));
                assert_eq!(model.as_deref(), Some("3"));
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let parsed = ShellLine::try_parse_from(["history", "list", "--status", "failed"]).unwrap();
        assert!(matches!(
            parsed.command,
            Command::History {
                action: Some(HistoryAction::List { status: Some(_), .. })
            }
        ));

        assert!(ShellLine::try_parse_from(["frobnicate"]).is_err());
    }

    #[test]
    fn test_api_err_messages() {
        let msg = api_err(ApiError::Expired).to_string();
        assert_eq!(
            msg,
            "Session ended; run `restora login` (Session expired. Please log in again.)"
        );

        let msg = api_err(ApiError::Unauthorized {
            message: "Invalid token".to_string(),
        })
        .to_string();
        assert!(msg.starts_with("Session ended; run `restora login`"));

        let msg = api_err(ApiError::Http {
            status: 404,
            status_text: "Not Found".to_string(),
            message: "Not Found".to_string(),
        })
        .to_string();
        assert_eq!(msg, "Not Found (HTTP 404)");
    }
}
