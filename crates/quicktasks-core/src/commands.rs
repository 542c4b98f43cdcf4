use std::sync::Arc;

use anyhow::{anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::engine::Engine;
use crate::filter::{TaskFilter, filtered_tasks};
use crate::identity::{IdentityProvider, IdentityState, LocalIdentity};
use crate::mode::{Effect, Mode};
use crate::preferences::{Preferences, Theme};
use crate::render::{Renderer, short_id, system_prefers_dark};
use crate::session::Session;
use crate::store::KeyValueStore;
use crate::task::Task;

/// Everything a command can touch during one run.
pub struct App {
    pub engine: Engine,
    pub preferences: Preferences,
    pub session: Session,
    pub kv: Arc<dyn KeyValueStore>,
    pub renderer: Renderer,
}

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "show",
        "lists",
        "new",
        "use",
        "rename-list",
        "drop",
        "add",
        "done",
        "reopen",
        "edit",
        "rm",
        "clear",
        "theme",
        "login",
        "logout",
        "guest",
        "whoami",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(app, inv), fields(command = %inv.command))]
pub async fn dispatch(app: &mut App, inv: Invocation) -> anyhow::Result<()> {
    let command = inv.command.as_str();
    let args = inv.args.as_slice();
    debug!(command, ?args, "dispatching command");

    match command {
        "show" => cmd_show(app, args),
        "lists" => cmd_lists(app),
        "new" => cmd_new(app, args),
        "use" => cmd_use(app, args).await,
        "rename-list" => cmd_rename_list(app, args),
        "drop" => cmd_drop(app, args),
        "add" => cmd_add(app, args),
        "done" => cmd_toggle(app, args, true),
        "reopen" => cmd_toggle(app, args, false),
        "edit" => cmd_edit(app, args),
        "rm" => cmd_rm(app, args),
        "clear" => cmd_clear(app).await,
        "theme" => cmd_theme(app, args),
        "login" => cmd_login(app, args).await,
        "logout" => cmd_logout(app).await,
        "guest" => cmd_guest(app).await,
        "whoami" => cmd_whoami(app),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

/// The active list's tasks under the current filter, each numbered by its
/// place in the unfiltered view. Numbers printed under one filter therefore
/// name the same task when passed back under another.
pub fn numbered_view(engine: &Engine) -> Vec<(usize, Task)> {
    let filter = engine.filter();
    filtered_tasks(engine.tasks(), TaskFilter::All)
        .into_iter()
        .enumerate()
        .map(|(idx, task)| (idx + 1, task))
        .filter(|(_, task)| filter.matches(task))
        .collect()
}

/// Re-selects the list the user last had open, or the only list there is.
#[instrument(skip(app))]
pub async fn restore_active_list(app: &mut App) {
    if !app.engine.mode().is_determined() {
        return;
    }

    let remembered = app
        .preferences
        .last_active_list()
        .filter(|id| app.engine.lists().iter().any(|list| list.id == *id))
        .map(str::to_string);
    let target = match remembered {
        Some(id) => Some(id),
        None if app.engine.lists().len() == 1 => {
            app.engine.lists().first().map(|list| list.id.clone())
        }
        None => None,
    };

    match target {
        Some(id) => {
            if let Err(refusal) = app.engine.select_list(&id).await {
                warn!(list_id = %id, %refusal, "could not restore active list");
                return;
            }
            app.preferences.set_last_active_list(Some(&id));
        }
        None => app.preferences.set_last_active_list(None),
    }
}

fn require_mode(app: &App) -> anyhow::Result<()> {
    if !app.engine.mode().is_determined() {
        bail!("not signed in; run `quicktasks guest` or `quicktasks login <owner>` first");
    }
    Ok(())
}

fn require_active_list(app: &App) -> anyhow::Result<()> {
    require_mode(app)?;
    if app.engine.active_list().is_none() {
        bail!("no list is selected; pick one with `quicktasks use <list>`");
    }
    Ok(())
}

/// A 1-based overview index or a unique id prefix.
fn resolve_list(app: &App, token: &str) -> anyhow::Result<String> {
    let lists = app.engine.lists();
    if let Ok(index) = token.parse::<usize>()
        && let Some(list) = index.checked_sub(1).and_then(|idx| lists.get(idx))
    {
        return Ok(list.id.clone());
    }

    let mut matches = lists.iter().filter(|list| list.id.starts_with(token));
    match (matches.next(), matches.next()) {
        (Some(list), None) => Ok(list.id.clone()),
        (Some(_), Some(_)) => Err(anyhow!("list reference is ambiguous: {token}")),
        (None, _) => Err(anyhow!("no list matches: {token}")),
    }
}

/// A 1-based index into the unfiltered view or a unique id prefix.
fn resolve_task(app: &App, token: &str) -> anyhow::Result<String> {
    if let Ok(index) = token.parse::<usize>() {
        let view = filtered_tasks(app.engine.tasks(), TaskFilter::All);
        if let Some(task) = index.checked_sub(1).and_then(|idx| view.get(idx)) {
            return Ok(task.id.clone());
        }
    }

    let mut matches = app
        .engine
        .tasks()
        .iter()
        .filter(|task| task.id.starts_with(token));
    match (matches.next(), matches.next()) {
        (Some(task), None) => Ok(task.id.clone()),
        (Some(_), Some(_)) => Err(anyhow!("task reference is ambiguous: {token}")),
        (None, _) => Err(anyhow!("no task matches: {token}")),
    }
}

fn first_arg<'a>(args: &'a [String], what: &str) -> anyhow::Result<&'a str> {
    args.first()
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing {what}"))
}

fn cmd_show(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    require_mode(app)?;
    if let Some(raw) = args.first() {
        app.engine.set_filter(raw.parse::<TaskFilter>()?);
    }

    let Some(list) = app.engine.active_list().cloned() else {
        cmd_lists(app)?;
        println!("Pick a list with `quicktasks use <list>`.");
        return Ok(());
    };

    app.renderer.print_tasks(
        &list,
        &numbered_view(&app.engine),
        app.engine.filter(),
        app.engine.counts(),
    )
}

fn cmd_lists(app: &mut App) -> anyhow::Result<()> {
    require_mode(app)?;
    app.renderer
        .print_lists(&app.engine.list_summaries(), app.engine.active_list_id())
}

fn cmd_new(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    require_mode(app)?;
    let list = app.engine.create_list(&args.join(" "))?;
    app.preferences.set_last_active_list(Some(&list.id));
    info!(list_id = %list.id, "command new");
    println!("Created list '{}' ({}).", list.name, short_id(&list.id));
    Ok(())
}

async fn cmd_use(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    require_mode(app)?;
    let list_id = resolve_list(app, first_arg(args, "list")?)?;
    app.engine.select_list(&list_id).await?;
    app.preferences.set_last_active_list(Some(&list_id));
    cmd_show(app, &[])
}

fn cmd_rename_list(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    require_mode(app)?;
    let list_id = resolve_list(app, first_arg(args, "list")?)?;
    app.engine.rename_list(&list_id, &args[1..].join(" "))?;
    println!("Renamed list {}.", short_id(&list_id));
    Ok(())
}

fn cmd_drop(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    require_mode(app)?;
    let list_id = resolve_list(app, first_arg(args, "list")?)?;
    app.engine.delete_list(&list_id)?;
    if app.preferences.last_active_list() == Some(list_id.as_str()) {
        app.preferences.set_last_active_list(None);
    }
    println!("Deleted list {} and its tasks.", short_id(&list_id));
    Ok(())
}

fn cmd_add(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    require_active_list(app)?;
    let task = app.engine.add_task(&args.join(" "))?;
    info!(task_id = %task.id, "command add");
    println!("Added task {}.", short_id(&task.id));
    Ok(())
}

fn cmd_toggle(app: &mut App, args: &[String], completed: bool) -> anyhow::Result<()> {
    require_active_list(app)?;
    let task_id = resolve_task(app, first_arg(args, "task")?)?;
    let unchanged = app
        .engine
        .tasks()
        .iter()
        .any(|task| task.id == task_id && task.completed == completed);
    app.engine.toggle_complete(&task_id, completed)?;
    println!("{}", toggle_message(&task_id, completed, unchanged));
    Ok(())
}

fn toggle_message(task_id: &str, completed: bool, unchanged: bool) -> String {
    let state = match (completed, unchanged) {
        (true, false) => "completed",
        (false, false) => "reopened",
        (true, true) => "already completed",
        (false, true) => "already open",
    };
    format!("Task {} {state}.", short_id(task_id))
}

fn cmd_edit(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    require_active_list(app)?;
    let task_id = resolve_task(app, first_arg(args, "task")?)?;
    let title = args[1..].join(" ");
    let title = title.trim();

    if title.is_empty() {
        app.engine.remove_task(&task_id)?;
        println!("Task {} had an empty title and was deleted.", short_id(&task_id));
    } else {
        app.engine.rename_task(&task_id, title)?;
        println!("Task {} renamed.", short_id(&task_id));
    }
    Ok(())
}

fn cmd_rm(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    require_active_list(app)?;
    let task_id = resolve_task(app, first_arg(args, "task")?)?;
    app.engine.remove_task(&task_id)?;
    println!("Deleted task {}.", short_id(&task_id));
    Ok(())
}

async fn cmd_clear(app: &mut App) -> anyhow::Result<()> {
    require_active_list(app)?;
    let removed = app.engine.clear_completed().await?;
    println!("Cleared {removed} completed task(s).");
    Ok(())
}

fn cmd_theme(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    if let Some(raw) = args.first() {
        let theme = raw.parse::<Theme>()?;
        app.preferences.set_theme(theme);
    }

    let theme = app.preferences.theme();
    println!("{theme} ({:?})", theme.resolved(system_prefers_dark()));
    Ok(())
}

async fn cmd_login(app: &mut App, args: &[String]) -> anyhow::Result<()> {
    let owner = first_arg(args, "owner")?.trim().to_string();
    if owner.is_empty() {
        bail!("owner cannot be empty");
    }
    if let Mode::Authenticated(current) = app.engine.mode()
        && *current != owner
    {
        bail!("already signed in as {current}; run `quicktasks logout` first");
    }

    let identity = LocalIdentity::new(owner.clone());
    identity.resolve(app.session.identity_state());
    identity.sign_in().await?;
    let transition = app.engine.sync_identity(&identity.current_state()).await;

    app.session.owner_id = Some(owner.clone());
    match transition.map(|t| t.effect) {
        Some(Effect::Migrate) => {
            if let Some(report) = app.engine.last_migration() {
                app.renderer.print_migration(report)?;
                app.session.guest = !report.is_complete();
            }
        }
        Some(_) => app.session.guest = false,
        None => {
            println!("Already signed in as {owner}.");
            return Ok(());
        }
    }
    app.session.save(&app.kv)?;

    restore_active_list(app).await;
    println!("Signed in as {owner}.");
    Ok(())
}

async fn cmd_logout(app: &mut App) -> anyhow::Result<()> {
    let Some(owner) = app.engine.mode().owner_id().map(str::to_string) else {
        bail!("not signed in");
    };

    let identity = LocalIdentity::new(owner.clone());
    identity.resolve(IdentityState::SignedIn(owner.clone()));
    identity.sign_out().await?;
    app.engine.sync_identity(&identity.current_state()).await;

    app.session = Session::default();
    app.session.save(&app.kv)?;
    app.preferences.set_last_active_list(None);
    println!("Signed out of {owner}.");
    Ok(())
}

async fn cmd_guest(app: &mut App) -> anyhow::Result<()> {
    match app.engine.mode() {
        Mode::Authenticated(owner) => {
            bail!("signed in as {owner}; run `quicktasks logout` first")
        }
        Mode::Guest => {
            println!("Already in guest mode.");
            return Ok(());
        }
        Mode::Undetermined => {}
    }

    app.engine.continue_as_guest().await;
    app.session.guest = true;
    app.session.save(&app.kv)?;

    restore_active_list(app).await;
    println!("Continuing as guest; tasks stay on this device.");
    Ok(())
}

fn cmd_whoami(app: &App) -> anyhow::Result<()> {
    match app.engine.mode() {
        Mode::Undetermined => println!("Not signed in."),
        Mode::Guest => println!("Guest (tasks stay on this device)."),
        Mode::Authenticated(owner) => println!("Signed in as {owner}."),
    }
    if let Some(list) = app.engine.active_list() {
        println!("Active list: {}", list.name);
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "Commands: show [all|active|completed], lists, new [name], use <list>, rename-list <list> <name>, drop <list>, add <title>, done <task>, reopen <task>, edit <task> <title>, rm <task>, clear, theme [light|dark|system], login <owner>, logout, guest, whoami, help, version"
    );
    Ok(())
}
