//! Line-oriented driver for a task panel session.
//!
//! Each stdin line is one edit or action, e.g. `title Fix login bug`,
//! `due 2026-03-01`, `field 7 Acme`, `blur`, `flush`, `close`.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Args, Subcommand};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use crate::error::{RemoteError, SyncError};
use crate::notification::{Notifier, ToastNotifier};
use crate::panel::{KeyOutcome, PanelSnapshot, SaveOutcome, TaskPanel};
use crate::remote::{HttpRemote, RemoteStore};
use crate::settings::Settings;
use crate::sync::{CommitOutcome, FlushReport};
use crate::types::{FieldValue, RecordId, TaskStatus};

#[derive(Debug, Clone, Subcommand)]
pub enum RootCommand {
    /// Open a task panel and apply edits read from stdin.
    Session(SessionArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    /// Edit an existing task instead of starting in create mode.
    #[arg(long, value_name = "TASK_ID")]
    pub task: Option<String>,

    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum SessionCommand {
    Title(String),
    Description(String),
    Status(TaskStatus),
    Priority(u8),
    Assignees(Vec<String>),
    Due(Option<NaiveDate>),
    Field { definition_id: RecordId, raw: String },
    Blur(Option<RecordId>),
    Refresh,
    Flush,
    Delete,
    Confirm,
    Cancel,
    Wait(Duration),
    State,
    Close,
}

enum Flow {
    Continue,
    Exit,
}

#[derive(Debug)]
struct CliError {
    exit_code: i32,
    code: &'static str,
    message: String,
}

type CliResult<T> = Result<T, CliError>;

pub async fn run(command: RootCommand, settings: Settings) -> i32 {
    let result = match command {
        RootCommand::Session(args) => run_session(args, settings).await,
    };
    match result {
        Ok(()) => 0,
        Err(err) => {
            print_error(&err);
            err.exit_code
        }
    }
}

async fn run_session(args: SessionArgs, settings: Settings) -> CliResult<()> {
    let mut config = settings.remote_config();
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    let remote = Arc::new(HttpRemote::new(config).map_err(remote_error)?);

    let snapshot = match args.task.as_deref() {
        Some(task_id) => load_snapshot(&remote, &RecordId::new(task_id.trim())).await?,
        None => PanelSnapshot::create(Vec::new()),
    };

    let notifier: Arc<dyn Notifier> = Arc::new(ToastNotifier::new(
        settings.notification_backend(),
        settings.notifications.display_duration_ms,
    ));
    let mut panel = TaskPanel::new(Arc::clone(&remote), notifier, settings.panel_options());
    panel.open(Arc::new(snapshot));
    info!(base_url = remote.base_url(), task = ?args.task, "session started");
    print_state(&panel);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.map_err(runtime_error)? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let command = match parse_command(line) {
            Ok(command) => command,
            Err(err) => {
                print_error(&err);
                continue;
            }
        };

        match apply(&mut panel, &remote, command).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => return Ok(()),
            Err(err) => print_error(&err),
        }
    }

    if panel.is_open() {
        let (outcome, report) = panel.close_with_flush().await;
        print_save(&outcome);
        print_flush(&report);
    }
    info!("session ended");
    Ok(())
}

async fn load_snapshot(remote: &HttpRemote, task_id: &RecordId) -> CliResult<PanelSnapshot> {
    let record = remote.fetch_task(task_id).await.map_err(|err| {
        if err.code == "NOT_FOUND" {
            not_found_error("TASK_NOT_FOUND", format!("task {task_id} not found"))
        } else {
            remote_error(err)
        }
    })?;
    let custom_fields = remote
        .fetch_custom_fields(task_id)
        .await
        .map_err(remote_error)?;
    Ok(PanelSnapshot::existing(record, custom_fields))
}

async fn apply(
    panel: &mut TaskPanel<HttpRemote>,
    remote: &HttpRemote,
    command: SessionCommand,
) -> CliResult<Flow> {
    match command {
        SessionCommand::Title(title) => panel.set_title(title),
        SessionCommand::Description(description) => panel.set_description(description),
        SessionCommand::Status(status) => panel.set_status(status),
        SessionCommand::Priority(priority) => panel.set_priority(priority),
        SessionCommand::Assignees(assignees) => panel.set_assignees(assignees),
        SessionCommand::Due(due_date) => panel.set_due_date(due_date),
        SessionCommand::Field { definition_id, raw } => {
            let kind = panel
                .custom_fields()
                .iter()
                .find(|editor| editor.definition().id == definition_id)
                .map(|editor| editor.definition().kind)
                .ok_or_else(|| {
                    not_found_error(
                        "FIELD_NOT_FOUND",
                        format!("custom field {definition_id} is not editable here"),
                    )
                })?;
            let value = FieldValue::parse_for(kind, &raw)
                .map_err(|message| usage_error("INVALID_VALUE", message))?;
            panel
                .set_custom_field(&definition_id, value)
                .map_err(sync_error)?;
        }
        SessionCommand::Blur(None) => print_save(&panel.blur().await),
        SessionCommand::Blur(Some(definition_id)) => {
            let outcome = panel
                .blur_custom_field(&definition_id)
                .await
                .map_err(sync_error)?;
            print_commit(&definition_id, &outcome);
        }
        SessionCommand::Refresh => {
            let Some(task_id) = panel.record_id() else {
                return Err(usage_error("NO_RECORD", "task has not been created yet"));
            };
            let values = remote
                .fetch_custom_fields(&task_id)
                .await
                .map_err(remote_error)?
                .into_iter()
                .filter_map(|entry| entry.value)
                .collect::<Vec<_>>();
            for (definition_id, outcome) in panel.reconcile_custom_values(&values) {
                println!("field {definition_id}: {outcome:?}");
            }
        }
        SessionCommand::Flush => {
            let report = panel.flush_handle().flush_pending_changes().await;
            print_flush(&report);
        }
        SessionCommand::Delete => {
            match panel.handle_key(KeyEvent::new(KeyCode::Backspace, KeyModifiers::CONTROL)) {
                KeyOutcome::OpenDeleteConfirmation => {
                    println!("delete this task? answer `confirm` or `cancel`");
                }
                _ => return Err(usage_error("NO_RECORD", "nothing to delete yet")),
            }
        }
        SessionCommand::Confirm => {
            if !panel.is_delete_confirmation_open() {
                return Err(usage_error("NOTHING_TO_CONFIRM", "no pending confirmation"));
            }
            panel.confirm_delete().await.map_err(sync_error)?;
            println!("deleted");
            return Ok(Flow::Exit);
        }
        SessionCommand::Cancel => panel.cancel_delete(),
        SessionCommand::Wait(duration) => tokio::time::sleep(duration).await,
        SessionCommand::State => print_state(panel),
        SessionCommand::Close => {
            let key = panel.handle_key(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE));
            if key == KeyOutcome::Ignored && panel.is_delete_confirmation_open() {
                return Err(usage_error(
                    "CONFIRMATION_OPEN",
                    "answer the delete confirmation first",
                ));
            }
            let (outcome, report) = panel.close_with_flush().await;
            print_save(&outcome);
            print_flush(&report);
            return Ok(Flow::Exit);
        }
    }
    Ok(Flow::Continue)
}

fn parse_command(line: &str) -> CliResult<SessionCommand> {
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "title" => SessionCommand::Title(rest.to_string()),
        "description" | "desc" => SessionCommand::Description(rest.to_string()),
        "status" => SessionCommand::Status(rest.parse().map_err(|()| {
            usage_error(
                "INVALID_STATUS",
                format!("unknown status '{rest}' (todo, in_progress, review, done)"),
            )
        })?),
        "priority" => SessionCommand::Priority(rest.parse().map_err(|_| {
            usage_error("INVALID_PRIORITY", format!("'{rest}' is not a priority"))
        })?),
        "assignees" => SessionCommand::Assignees(
            rest.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        "due" => SessionCommand::Due(parse_due_date(rest)?),
        "field" => {
            let (definition_id, raw) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            if definition_id.is_empty() {
                return Err(usage_error("MISSING_FIELD", "usage: field <DEFINITION_ID> <VALUE>"));
            }
            SessionCommand::Field {
                definition_id: RecordId::new(definition_id),
                raw: raw.trim().to_string(),
            }
        }
        "blur" => SessionCommand::Blur((!rest.is_empty()).then(|| RecordId::new(rest))),
        "refresh" => SessionCommand::Refresh,
        "flush" => SessionCommand::Flush,
        "delete" => SessionCommand::Delete,
        "confirm" => SessionCommand::Confirm,
        "cancel" => SessionCommand::Cancel,
        "wait" => SessionCommand::Wait(Duration::from_millis(rest.parse().map_err(|_| {
            usage_error("INVALID_DURATION", format!("'{rest}' is not a millisecond count"))
        })?)),
        "state" => SessionCommand::State,
        "close" | "quit" => SessionCommand::Close,
        other => {
            return Err(usage_error(
                "UNKNOWN_COMMAND",
                format!("unknown command '{other}'"),
            ));
        }
    };
    Ok(command)
}

fn parse_due_date(raw: &str) -> CliResult<Option<NaiveDate>> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| usage_error("INVALID_DATE", format!("'{raw}' is not a YYYY-MM-DD date")))
}

fn state_json<R: RemoteStore>(panel: &TaskPanel<R>) -> Value {
    let draft = panel.draft().unwrap_or_default();
    json!({
        "open": panel.is_open(),
        "record_id": panel.record_id(),
        "save_state": panel.save_state().as_str(),
        "saved": panel.saved_indicator_visible(),
        "pending_changes": panel.flush_handle().has_pending_changes(),
        "task": {
            "title": draft.title,
            "description": draft.description,
            "status": draft.status,
            "priority": draft.priority,
            "assignee_ids": draft.assignee_ids,
            "due_date": draft.due_date,
        },
        "custom_fields": panel
            .custom_fields()
            .iter()
            .map(|editor| json!({
                "definition_id": editor.definition().id,
                "name": editor.definition().name,
                "value_id": editor.value_id(),
                "value": editor.value(),
                "dirty": editor.is_dirty(),
            }))
            .collect::<Vec<_>>(),
    })
}

fn print_state<R: RemoteStore>(panel: &TaskPanel<R>) {
    let payload = state_json(panel);
    match serde_json::to_string_pretty(&payload) {
        Ok(value) => println!("{value}"),
        Err(_) => println!("{payload}"),
    }
}

fn print_save(outcome: &SaveOutcome) {
    match outcome {
        SaveOutcome::Unchanged => println!("task: unchanged"),
        SaveOutcome::Withheld => println!("task: not created, title is required"),
        SaveOutcome::Created(id) => println!("task: created {id}"),
        SaveOutcome::Updated(id) => println!("task: saved {id}"),
        SaveOutcome::Failed(err) => println!("task: failed ({err})"),
    }
}

fn print_commit(definition_id: &RecordId, outcome: &CommitOutcome) {
    match outcome {
        CommitOutcome::Unchanged => println!("field {definition_id}: unchanged"),
        CommitOutcome::Saved(value_id) => println!("field {definition_id}: saved as {value_id}"),
        CommitOutcome::Stale => println!("field {definition_id}: superseded"),
        CommitOutcome::Failed(err) => println!("field {definition_id}: failed ({err})"),
    }
}

fn print_flush(report: &FlushReport) {
    if report.attempted() == 0 {
        return;
    }
    println!(
        "flushed {} pending value(s), {} failed",
        report.saved.len(),
        report.failed.len()
    );
}

fn usage_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError {
        exit_code: 2,
        code,
        message: message.into(),
    }
}

fn not_found_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError {
        exit_code: 3,
        code,
        message: message.into(),
    }
}

fn runtime_error(err: impl std::fmt::Display) -> CliError {
    CliError {
        exit_code: 5,
        code: "RUNTIME_ERROR",
        message: err.to_string(),
    }
}

fn remote_error(err: RemoteError) -> CliError {
    let code = match err.code.as_str() {
        "AUTH_ERROR" => "AUTH_ERROR",
        "NOT_FOUND" => "NOT_FOUND",
        "REQUEST_FAILED" => "REQUEST_FAILED",
        "DECODE_FAILED" => "DECODE_FAILED",
        "CLIENT_INIT_FAILED" => "CLIENT_INIT_FAILED",
        _ => "HTTP_ERROR",
    };
    CliError {
        exit_code: 5,
        code,
        message: err.message,
    }
}

fn sync_error(err: SyncError) -> CliError {
    match err {
        SyncError::Validation(_) => usage_error("VALIDATION", err.to_string()),
        SyncError::MissingRecord(_) => not_found_error("MISSING_RECORD", err.to_string()),
        SyncError::Remote(remote) => remote_error(remote),
    }
}

fn print_error(err: &CliError) {
    error!(code = err.code, message = %err.message, "session command failed");
    eprintln!("error[{}]: {}", err.code, err.message);
}
