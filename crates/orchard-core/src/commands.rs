use anyhow::anyhow;
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::config::Config;
use crate::render::Renderer;
use crate::storage::KeyValueStorage;
use crate::store::TaskStore;
use crate::task::{Importance, Task};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add",
        "list",
        "info",
        "toggle",
        "done",
        "modify",
        "delete",
        "clear",
        "unlock",
        "legend",
        "export",
        "_commands",
        "_show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &str, known: &[&'a str]) -> Option<&'a str> {
    if let Some(exact) = known.iter().copied().find(|name| *name == token) {
        return Some(exact);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch<S: KeyValueStorage>(
    store: &mut TaskStore<S>,
    cfg: &Config,
    renderer: &Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let command = inv.command.as_str();
    debug!(
        command,
        targets = ?inv.targets,
        args = ?inv.command_args,
        "dispatching command"
    );

    match command {
        "add" => cmd_add(store, cfg, &inv),
        "list" => cmd_list(store, renderer, &inv.targets),
        "info" => cmd_info(store, renderer, &ids_from(&inv, true)?),
        "toggle" | "done" => cmd_toggle(store, &ids_from(&inv, true)?),
        "modify" => cmd_modify(store, &ids_from(&inv, false)?, &inv.command_args),
        "delete" => cmd_delete(store, &ids_from(&inv, true)?),
        "clear" => cmd_clear(store),
        "unlock" => cmd_unlock(store),
        "legend" => renderer.print_legend(),
        "export" => cmd_export(store),
        "_commands" => {
            for name in known_command_names() {
                println!("{name}");
            }
            Ok(())
        }
        "_show" => {
            for (key, value) in cfg.iter() {
                println!("{key}={value}");
            }
            Ok(())
        }
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

/// Text words and an optional `importance:LABEL` (or `imp:LABEL`) modifier.
/// `imp:very important` split across two words is joined back together.
pub fn parse_text_and_importance(
    args: &[String],
) -> anyhow::Result<(Option<String>, Option<Importance>)> {
    let mut words = Vec::new();
    let mut importance = None;

    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        let value = arg
            .strip_prefix("importance:")
            .or_else(|| arg.strip_prefix("imp:"));
        let Some(value) = value else {
            words.push(arg.as_str());
            continue;
        };

        let label = if value.eq_ignore_ascii_case("very")
            && iter
                .peek()
                .is_some_and(|next| next.eq_ignore_ascii_case("important"))
        {
            iter.next();
            "very important".to_string()
        } else {
            value.to_string()
        };
        importance = Some(label.parse::<Importance>()?);
    }

    let text = words.join(" ");
    let text = (!text.trim().is_empty()).then_some(text);
    Ok((text, importance))
}

fn ids_from(inv: &Invocation, allow_args: bool) -> anyhow::Result<Vec<u64>> {
    let mut ids = inv.targets.clone();
    if allow_args {
        for arg in &inv.command_args {
            let id = arg
                .parse::<u64>()
                .map_err(|_| anyhow!("{} expects task ids, got: {arg}", inv.command))?;
            ids.push(id);
        }
    }

    if ids.is_empty() {
        return Err(anyhow!("{} requires at least one task id", inv.command));
    }
    Ok(ids)
}

fn find_or_report<'a, S: KeyValueStorage>(store: &'a TaskStore<S>, id: u64) -> Option<&'a Task> {
    let task = store.task(id);
    if task.is_none() {
        warn!(id, "no task with this id");
        println!("No task with id {id}.");
    }
    task
}

/// The input form: adding is refused while a previous submission still holds
/// the add gate.
#[instrument(skip(store, cfg, inv))]
fn cmd_add<S: KeyValueStorage>(
    store: &mut TaskStore<S>,
    cfg: &Config,
    inv: &Invocation,
) -> anyhow::Result<()> {
    info!("command add");

    if !inv.targets.is_empty() {
        return Err(anyhow!("add does not take task ids"));
    }

    let (text, importance) = parse_text_and_importance(&inv.command_args)?;
    let text = text.ok_or_else(|| anyhow!("add requires a task description"))?;
    let importance = match importance {
        Some(importance) => importance,
        None => cfg.default_importance()?,
    };

    if !store.can_add() {
        return Err(anyhow!("task ids are exhausted; no more tasks can be added"));
    }
    if store.add_button_disabled() {
        return Err(anyhow!(
            "adding is locked by an unfinished submission; run `orchard unlock` to reset"
        ));
    }

    store.set_add_button_disabled(true);
    let id = store.id_counter();
    store.add_task(text, importance);
    store.set_add_button_disabled(false);

    println!("Created task {id}.");
    Ok(())
}

#[instrument(skip(store, renderer))]
fn cmd_list<S: KeyValueStorage>(
    store: &TaskStore<S>,
    renderer: &Renderer,
    targets: &[u64],
) -> anyhow::Result<()> {
    info!("command list");

    if targets.is_empty() {
        return renderer.print_task_table(store.tasks());
    }

    let selected: Vec<Task> = store
        .tasks()
        .iter()
        .filter(|task| targets.contains(&task.id))
        .cloned()
        .collect();
    renderer.print_task_table(&selected)
}

#[instrument(skip(store, renderer))]
fn cmd_info<S: KeyValueStorage>(
    store: &TaskStore<S>,
    renderer: &Renderer,
    ids: &[u64],
) -> anyhow::Result<()> {
    info!("command info");

    for (idx, id) in ids.iter().enumerate() {
        if idx > 0 {
            println!();
        }
        if let Some(task) = find_or_report(store, *id) {
            renderer.print_task_info(task)?;
        }
    }
    Ok(())
}

#[instrument(skip(store))]
fn cmd_toggle<S: KeyValueStorage>(store: &mut TaskStore<S>, ids: &[u64]) -> anyhow::Result<()> {
    info!("command toggle");

    for &id in ids {
        let known = find_or_report(store, id).is_some();
        store.toggle_complete(id);
        if known && let Some(task) = store.task(id) {
            if task.completed {
                println!("Completed task {id}.");
            } else {
                println!("Reopened task {id}.");
            }
        }
    }
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_modify<S: KeyValueStorage>(
    store: &mut TaskStore<S>,
    ids: &[u64],
    args: &[String],
) -> anyhow::Result<()> {
    info!("command modify");

    let (text, importance) = parse_text_and_importance(args)?;
    if text.is_none() && importance.is_none() {
        return Err(anyhow!("modify requires new text or importance:LABEL"));
    }

    for &id in ids {
        let known = find_or_report(store, id).is_some();
        store.update_task(id, text.as_deref(), importance);
        if known {
            println!("Modified task {id}.");
        }
    }
    Ok(())
}

#[instrument(skip(store))]
fn cmd_delete<S: KeyValueStorage>(store: &mut TaskStore<S>, ids: &[u64]) -> anyhow::Result<()> {
    info!("command delete");

    for &id in ids {
        let known = find_or_report(store, id).is_some();
        store.delete_task(id);
        if known {
            println!("Deleted task {id}.");
        }
    }
    Ok(())
}

#[instrument(skip(store))]
fn cmd_clear<S: KeyValueStorage>(store: &mut TaskStore<S>) -> anyhow::Result<()> {
    info!("command clear");

    let before = store.tasks().len();
    store.clear_todos();
    let kept = store.tasks().len();
    println!(
        "Cleared {} incomplete task(s); kept {kept} completed.",
        before - kept
    );
    Ok(())
}

#[instrument(skip(store))]
fn cmd_unlock<S: KeyValueStorage>(store: &mut TaskStore<S>) -> anyhow::Result<()> {
    info!("command unlock");

    if !store.add_button_disabled() {
        debug!("add gate already open");
    }
    store.set_add_button_disabled(false);
    println!("Adding is unlocked.");
    Ok(())
}

#[instrument(skip(store))]
fn cmd_export<S: KeyValueStorage>(store: &TaskStore<S>) -> anyhow::Result<()> {
    info!("command export");

    match store.stored_snapshot()? {
        Some(raw) => println!("{}", raw.trim_end()),
        None => println!("{}", serde_json::to_string(store.snapshot())?),
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!("usage: orchard [IDS...] COMMAND [ARGS...]");
    println!();
    println!("  add TEXT... [importance:LABEL]   create a task");
    println!("  list                             show all tasks");
    println!("  IDS info                         show task details");
    println!("  IDS toggle | done                flip completion");
    println!("  IDS modify [TEXT...] [imp:LABEL] change text and/or importance");
    println!("  IDS delete                       remove tasks");
    println!("  clear                            drop every task that is not completed");
    println!("  unlock                           release a stuck add gate");
    println!("  legend                           importance sizes and colours");
    println!("  export                           print the stored snapshot as saved");
    println!();
    println!("importance labels: none, general, important, very-important");
    Ok(())
}
