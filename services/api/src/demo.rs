use crate::infra::TracingNotifier;
use admissions::applications::{
    Actor, Application, ApplicationLifecycleService, ApplicationStatus, Document, DocumentUpload,
    HistoryEntry, HistoryOrder, Role, SqliteApplicationRepository, TransitionMode,
    TransitionPolicy,
};
use admissions::error::AppError;
use chrono::SecondsFormat;
use clap::Args;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

const APPLICANT: Actor = Actor::student(42);
const REVIEWER: Actor = Actor::admin(7);

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Use the strict transition table instead of the permissive default.
    #[arg(long)]
    pub(crate) strict: bool,
    /// Print the final application, history, and documents as JSON.
    #[arg(long)]
    pub(crate) json: bool,
    /// Stop after submission instead of walking through review and decision.
    #[arg(long)]
    pub(crate) skip_review: bool,
}

#[derive(Debug, Serialize)]
struct DemoReport {
    transition_policy: &'static str,
    application: Application,
    status_path: Vec<ApplicationStatus>,
    reviewer_next: Vec<ApplicationStatus>,
    history: Vec<HistoryEntry>,
    documents: Vec<Document>,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        strict,
        json: as_json,
        skip_review,
    } = args;

    let mode = if strict {
        TransitionMode::Strict
    } else {
        TransitionMode::Permissive
    };
    let repository = Arc::new(SqliteApplicationRepository::in_memory()?);
    let service = ApplicationLifecycleService::new(
        repository,
        Arc::new(TracingNotifier),
        TransitionPolicy::new(mode),
    );

    if !as_json {
        println!("Admissions lifecycle demo ({} policy)", mode.label());
    }

    let application = service.create(
        APPLICANT,
        json!({
            "personal": { "first_name": "Ada", "last_name": "Lovelace" },
            "academics": { "intended_major": "Mathematics", "gpa": 3.9 },
        }),
    )?;
    let id = application.id;
    step(
        as_json,
        &format!("Student {} created application {id}", APPLICANT.id),
    );

    match service.register_document(
        id,
        APPLICANT,
        DocumentUpload {
            file_name: "transcript.pdf".to_string(),
            content_type: None,
            size_bytes: 182_400,
        },
    ) {
        Ok(document) => step(
            as_json,
            &format!("Attached {} -> {}", document.file_name, document.storage_path),
        ),
        Err(err) => step(as_json, &format!("Document rejected: {err}")),
    }

    let mut script: Vec<(Actor, ApplicationStatus, Option<&str>)> =
        vec![(APPLICANT, ApplicationStatus::Submitted, None)];
    if !skip_review {
        script.push((
            REVIEWER,
            ApplicationStatus::Review,
            Some("Assigned to committee"),
        ));
        script.push((REVIEWER, ApplicationStatus::Accepted, Some("Congrats")));
    }

    for (actor, next, notes) in script {
        let outcome = service.change_status(id, actor, next, notes.map(str::to_string));
        let message = match outcome {
            Ok(updated) => format!("{} {} moved it to {}", actor.role, actor.id, updated.status),
            Err(err) => format!(
                "{} {} could not move it to {next}: {err}",
                actor.role, actor.id
            ),
        };
        step(as_json, &message);
        if next == ApplicationStatus::Review {
            if let Err(err) = service.add_note(id, REVIEWER, "Strong recommendation letters") {
                step(as_json, &format!("Note rejected: {err}"));
            }
        }
    }

    // Replaying the submission shows the trail is untouched by refused changes.
    if let Err(err) = service.request_submission(id, APPLICANT) {
        step(as_json, &format!("Resubmission refused: {err}"));
    }

    let application = service.get(id, REVIEWER)?;
    let history = service.history(id, REVIEWER, HistoryOrder::OldestFirst)?;
    let documents = service.documents(id, REVIEWER)?;
    let status_path = history.status_path();
    let reviewer_next = service.policy().targets(application.status, Role::Admin);

    if as_json {
        let report = DemoReport {
            transition_policy: mode.label(),
            application,
            status_path,
            reviewer_next,
            history: history.into_entries(),
            documents,
        };
        match serde_json::to_string_pretty(&report) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => eprintln!("failed to render demo report: {err}"),
        }
        return Ok(());
    }

    println!("\nFinal status: {}", application.status);
    if application.status.is_terminal() {
        println!("Decision recorded.");
    }
    println!("Path: {}", join_labels(&status_path, " -> "));
    println!(
        "A reviewer may still move it to: {}",
        join_labels(&reviewer_next, ", ")
    );
    println!("History ({} entries, oldest first):", history.len());
    for entry in &history {
        let status = entry
            .status
            .map(|status| status.label())
            .unwrap_or("note");
        let notes = entry.notes.as_deref().unwrap_or("-");
        println!(
            "  #{:<3} {}  {:<9}  by {:<4} {}",
            entry.id.0,
            entry.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            status,
            entry.actor.0,
            notes
        );
    }
    println!("Documents: {}", documents.len());

    Ok(())
}

fn step(quiet: bool, message: &str) {
    if !quiet {
        println!("- {message}");
    }
}

fn join_labels(statuses: &[ApplicationStatus], separator: &str) -> String {
    if statuses.is_empty() {
        return "-".to_string();
    }
    statuses
        .iter()
        .map(|status| status.label())
        .collect::<Vec<_>>()
        .join(separator)
}
