/*!
 * End-to-end translation jobs against a scripted provider.
 *
 * Jobs run either through `JobService` (spawned, polled) or directly through a
 * `JobRunner` when a test needs to control cancellation or timeouts.
 */

use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::common::{
    RecordingStore, ScriptedFactory, TestProject, fast_settings, job_service, phases_of, runner_plan, wait_for_job,
};
use lingodeck::Config;
use lingodeck::database::ProjectStore;
use lingodeck::database::models::{ImportMode, TermCategory, TranslationStatus, TranslationUpsert};
use lingodeck::errors::ProviderError;
use lingodeck::jobs::{JobRunner, JobService, JobState, ProgressPhase, ProgressStore, StartJobRequest};
use lingodeck::jobs::runner::NO_TRANSLATION_RETURNED;
use lingodeck::providers::mock::ScriptedProvider;
use lingodeck::sync::SyncService;
use lingodeck::translation::Strategy;

fn greeting_source() -> serde_json::Value {
    json!({"a": {"b": "Hello {name}"}})
}

fn fr_request(project: &TestProject) -> StartJobRequest {
    StartJobRequest::new(project.project.id, vec!["fr".to_string()])
}

fn store_of(project: &TestProject) -> Arc<dyn ProjectStore> {
    Arc::new(project.repo.clone())
}

/// A valid translation is persisted and reported per batch and per language
#[tokio::test]
async fn test_job_withValidTranslation_shouldPersistAsAiTranslated() {
    let project = TestProject::new(greeting_source()).await.unwrap();
    project
        .repo
        .add_protected_term(project.project.id, "Acme", TermCategory::Brand, false, vec![])
        .await
        .unwrap();
    let provider = ScriptedProvider::per_item(|_| Some("Bonjour {name}".to_string()));
    let (service, _) = job_service(store_of(&project), provider.clone());

    let job_id = service.start_job(fr_request(&project)).await.unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    assert_eq!(snapshot.state, JobState::Completed);
    let result = snapshot.result.unwrap();
    assert_eq!(result.total_translated, 1);
    assert_eq!(result.total_failed, 0);

    let translations = project.translations("fr").await.unwrap();
    assert_eq!(
        translations.get("a.b"),
        Some(&("Bonjour {name}".to_string(), TranslationStatus::AiTranslated))
    );

    assert_eq!(
        phases_of(&snapshot.progress_history, "fr"),
        vec!["checking", "checked", "tasks_found", "starting", "batch_done", "completed"]
    );
    let completed = snapshot.progress_history.last().unwrap();
    match &completed.phase {
        ProgressPhase::Completed {
            success_count,
            failure_count,
            ..
        } => {
            assert_eq!(*success_count, 1);
            assert_eq!(*failure_count, 0);
        }
        other => panic!("unexpected last phase {:?}", other),
    }
    assert_eq!(completed.language_name, "French");

    // The provider saw the term and the project's language pair
    let request = &provider.requests()[0];
    assert_eq!(request.protected_terms.len(), 1);
    assert_eq!(request.source_language, "en");
    assert_eq!(request.target_language, "fr");
}

/// A dropped placeholder fails validation and is never persisted
#[tokio::test]
async fn test_job_withDroppedPlaceholder_shouldRecordFailedItem() {
    let project = TestProject::new(greeting_source()).await.unwrap();
    let provider = ScriptedProvider::per_item(|_| Some("Bonjour".to_string()));
    let (service, _) = job_service(store_of(&project), provider.clone());

    let job_id = service.start_job(fr_request(&project)).await.unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    assert_eq!(snapshot.state, JobState::Completed);
    let result = snapshot.result.unwrap();
    assert_eq!(result.total_translated, 0);
    assert_eq!(result.total_failed, 1);
    let item = &result.failed_items[0];
    assert_eq!(item.key_path, "a.b");
    assert_eq!(item.language_code, "fr");
    assert_eq!(item.source_text, "Hello {name}");
    assert!(item.error.contains("{name}"), "reason was {}", item.error);

    assert!(project.translations("fr").await.unwrap().is_empty());

    // One batch call plus the consolidated retry
    assert_eq!(provider.call_count(), 2);
    assert!(phases_of(&snapshot.progress_history, "fr").contains(&"retrying"));
}

/// Locked rows are invisible to missing_only and need no provider call
#[tokio::test]
async fn test_job_withLockedKeyAndMissingOnly_shouldReportNoWork() {
    let project = TestProject::new(greeting_source()).await.unwrap();
    project
        .repo
        .set_manual_translation(project.project.id, "a.b", "fr", "Salut {name}", TranslationStatus::Locked)
        .await
        .unwrap();
    let provider = ScriptedProvider::echo("[fr] ");
    let (service, _) = job_service(store_of(&project), provider.clone());

    for strategy in ["missing_only", "missing_and_ai"] {
        let job_id = service
            .start_job(fr_request(&project).with_strategy(strategy))
            .await
            .unwrap();
        let snapshot = wait_for_job(&service, &job_id).await;
        assert_eq!(snapshot.state, JobState::Completed);
        assert!(phases_of(&snapshot.progress_history, "fr").contains(&"no_work"));
    }

    let mut request = fr_request(&project).with_strategy("full");
    request.include_locked = Some(false);
    let job_id = service.start_job(request).await.unwrap();
    wait_for_job(&service, &job_id).await;

    assert_eq!(provider.call_count(), 0);
    assert_eq!(
        project.translations("fr").await.unwrap().get("a.b"),
        Some(&("Salut {name}".to_string(), TranslationStatus::Locked))
    );
}

/// `full` without an explicit flag re-translates locked rows too
#[tokio::test]
async fn test_job_withFullStrategy_shouldOverwriteLockedByDefault() {
    let project = TestProject::new(greeting_source()).await.unwrap();
    project
        .repo
        .set_manual_translation(project.project.id, "a.b", "fr", "Salut {name}", TranslationStatus::Locked)
        .await
        .unwrap();
    let (service, _) = job_service(store_of(&project), ScriptedProvider::echo("[fr] "));

    let job_id = service
        .start_job(fr_request(&project).with_strategy("full"))
        .await
        .unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    assert_eq!(snapshot.result.unwrap().total_translated, 1);
    assert_eq!(
        project.translations("fr").await.unwrap().get("a.b"),
        Some(&("[fr] Hello {name}".to_string(), TranslationStatus::AiTranslated))
    );
}

/// A fatal error stops the job before any later language runs
#[tokio::test]
async fn test_job_withAuthError_shouldFailWithoutTouchingLaterLanguages() {
    let project = TestProject::new(greeting_source()).await.unwrap();
    let store = RecordingStore::new(project.repo.clone());
    let provider = ScriptedProvider::failing(ProviderError::AuthenticationError("invalid api key".to_string()));
    let (service, _) = job_service(store.clone(), provider.clone());

    let request = StartJobRequest::new(project.project.id, vec!["fr".to_string(), "de".to_string()]);
    let job_id = service.start_job(request).await.unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    assert_eq!(snapshot.state, JobState::Failed);
    assert!(snapshot.error.as_deref().unwrap_or_default().contains("invalid api key"));
    assert_eq!(provider.call_count(), 1);
    assert_eq!(store.writes(), 0);

    assert!(phases_of(&snapshot.progress_history, "de").is_empty());
    assert!(project.translations("de").await.unwrap().is_empty());

    let result = snapshot.result.unwrap();
    assert_eq!(result.failed_items.len(), 1);
    assert_eq!(result.failed_items[0].language_code, "fr");
}

/// Cancelling after batch 2 of 5 keeps both batches and runs no more
#[tokio::test]
async fn test_runner_withCancelAfterSecondBatch_shouldKeepCompletedBatches() {
    let project = TestProject::new(json!({
        "steps": {
            "one": "First step here",
            "two": "Second step here",
            "three": "Third step here",
            "four": "Fourth step here",
            "five": "Fifth step here"
        }
    }))
    .await
    .unwrap();

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    let provider = ScriptedProvider::new(move |request, index| {
        if index == 1 {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(ScriptedProvider::respond(request, |item| Some(format!("[fr] {}", item.source_text))))
    });
    let progress = Arc::new(ProgressStore::new());
    let runner = JobRunner::new(store_of(&project), progress.clone(), fast_settings(), cancel)
        .with_provider(Arc::new(provider.clone()));

    // A one-word budget gives every key its own batch
    let plan = runner_plan(&project, &["fr"], Strategy::MissingOnly, 1);
    let outcome = runner.run(&plan).await;

    assert_eq!(outcome.state, JobState::Cancelled);
    assert_eq!(provider.call_count(), 2);
    assert_eq!(outcome.result.total_translated, 2);

    let translations = project.translations("fr").await.unwrap();
    assert_eq!(translations.len(), 2);
    assert!(translations.contains_key("steps.one"));
    assert!(translations.contains_key("steps.two"));

    let view = progress.read(&plan.job_id).unwrap();
    let batches: Vec<usize> = view
        .progress_history
        .iter()
        .filter_map(|e| match e.phase {
            ProgressPhase::BatchDone {
                batch_number,
                total_batches,
                ..
            } => {
                assert_eq!(total_batches, 5);
                Some(batch_number)
            }
            _ => None,
        })
        .collect();
    assert_eq!(batches, vec![1, 2]);
    assert_eq!(view.progress.unwrap().phase.name(), "completed");
}

/// Re-running missing_only on a complete project writes nothing
#[tokio::test]
async fn test_job_withNothingMissing_shouldBeIdempotent() {
    let project = TestProject::new(json!({"a": "One", "b": "Two {n}"})).await.unwrap();
    let store = RecordingStore::new(project.repo.clone());
    let provider = ScriptedProvider::echo("[fr] ");
    let (service, _) = job_service(store.clone(), provider.clone());

    let first = service.start_job(fr_request(&project)).await.unwrap();
    assert_eq!(wait_for_job(&service, &first).await.result.unwrap().total_translated, 2);
    let writes = store.writes();
    let calls = provider.call_count();

    let second = service.start_job(fr_request(&project)).await.unwrap();
    let snapshot = wait_for_job(&service, &second).await;

    assert_eq!(snapshot.state, JobState::Completed);
    assert_eq!(store.writes(), writes);
    assert_eq!(provider.call_count(), calls);
    assert_eq!(
        phases_of(&snapshot.progress_history, "fr"),
        vec!["checking", "checked", "no_work", "completed"]
    );
}

/// A failing store write fails the job
#[tokio::test]
async fn test_job_withPersistenceFailure_shouldFail() {
    let project = TestProject::new(greeting_source()).await.unwrap();
    let store = RecordingStore::new(project.repo.clone());
    store.fail_upserts.store(true, Ordering::SeqCst);
    let (service, _) = job_service(store.clone(), ScriptedProvider::echo("[fr] "));

    let job_id = service.start_job(fr_request(&project)).await.unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    assert_eq!(snapshot.state, JobState::Failed);
    let error = snapshot.error.unwrap();
    assert!(error.contains("Persistence failure"), "error was {}", error);
    assert!(error.contains("disk full"));
    assert!(project.translations("fr").await.unwrap().is_empty());

    // The validated but unwritten key is still reported
    let result = snapshot.result.unwrap();
    assert_eq!(result.total_translated, 0);
    assert_eq!(result.total_failed, 1);
    assert_eq!(result.failed_items[0].key_path, "a.b");
    assert!(result.failed_items[0].error.contains("disk full"));
}

/// Transient errors are retried inside the batch
#[tokio::test]
async fn test_job_withTransientErrors_shouldRetryAndSucceed() {
    let project = TestProject::new(greeting_source()).await.unwrap();
    let provider = ScriptedProvider::new(|request, index| {
        if index < 2 {
            return Err(ProviderError::ServerError {
                status_code: 503,
                message: "overloaded".to_string(),
            });
        }
        Ok(ScriptedProvider::respond(request, |_| Some("Bonjour {name}".to_string())))
    });
    let (service, _) = job_service(store_of(&project), provider.clone());

    let job_id = service.start_job(fr_request(&project)).await.unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    assert_eq!(snapshot.state, JobState::Completed);
    assert_eq!(snapshot.result.unwrap().total_translated, 1);
    assert_eq!(provider.call_count(), 3);
    assert!(!phases_of(&snapshot.progress_history, "fr").contains(&"retrying"));
}

/// A batch that exhausts its retries gets one more chance in the retry pass
#[tokio::test]
async fn test_job_withExhaustedRetries_shouldRecoverInRetryPass() {
    let project = TestProject::new(greeting_source()).await.unwrap();
    // max_retries = 2 makes three attempts, the fourth call is the retry pass
    let provider = ScriptedProvider::new(|request, index| {
        if index < 3 {
            return Err(ProviderError::RateLimitExceeded("slow down".to_string()));
        }
        Ok(ScriptedProvider::respond(request, |_| Some("Bonjour {name}".to_string())))
    });
    let (service, _) = job_service(store_of(&project), provider.clone());

    let job_id = service.start_job(fr_request(&project)).await.unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    assert_eq!(snapshot.state, JobState::Completed);
    assert_eq!(provider.call_count(), 4);
    let result = snapshot.result.unwrap();
    assert_eq!(result.total_translated, 1);
    assert_eq!(result.total_failed, 0);

    let history = &snapshot.progress_history;
    let retrying = history.iter().find_map(|e| match e.phase {
        ProgressPhase::Retrying { retry_keys_count } => Some(retry_keys_count),
        _ => None,
    });
    assert_eq!(retrying, Some(1));
    let batch_failures = history.iter().find_map(|e| match e.phase {
        ProgressPhase::BatchDone { failure_count, .. } => Some(failure_count),
        _ => None,
    });
    assert_eq!(batch_failures, Some(1));
}

/// A batch that keeps failing is recorded and the next batch still runs
#[tokio::test]
async fn test_runner_withFailingFirstBatch_shouldContinueWithNextBatch() {
    let project = TestProject::new(json!({"a": "First step here", "b": "Second step here"}))
        .await
        .unwrap();
    let provider = ScriptedProvider::new(|request, _| {
        if request.items.iter().any(|item| item.key_path == "a") {
            return Err(ProviderError::ServerError {
                status_code: 502,
                message: "bad gateway".to_string(),
            });
        }
        Ok(ScriptedProvider::respond(request, |item| Some(format!("[fr] {}", item.source_text))))
    });
    let progress = Arc::new(ProgressStore::new());
    let runner = JobRunner::new(
        store_of(&project),
        progress.clone(),
        fast_settings(),
        Arc::new(AtomicBool::new(false)),
    )
    .with_provider(Arc::new(provider.clone()));
    let plan = runner_plan(&project, &["fr"], Strategy::MissingOnly, 3);

    let outcome = runner.run(&plan).await;

    assert_eq!(outcome.state, JobState::Completed);
    // three attempts on batch 1, one on batch 2, one in the retry pass
    assert_eq!(provider.call_count(), 5);

    let translations = project.translations("fr").await.unwrap();
    assert_eq!(
        translations["b"],
        ("[fr] Second step here".to_string(), TranslationStatus::AiTranslated)
    );
    assert!(!translations.contains_key("a"));

    let history = progress.read(&plan.job_id).unwrap().progress_history;
    let first_batch = history.iter().find_map(|e| match e.phase {
        ProgressPhase::BatchDone {
            batch_number: 1,
            batch_keys,
            failure_count,
            success_count,
            ..
        } => Some((batch_keys, failure_count, success_count)),
        _ => None,
    });
    assert_eq!(first_batch, Some((1, 1, 0)));
    assert!(phases_of(&history, "fr").contains(&"retrying"));

    assert_eq!(outcome.result.total_translated, 1);
    assert_eq!(outcome.result.failed_items.len(), 1);
    let failed = &outcome.result.failed_items[0];
    assert_eq!(failed.key_path, "a");
    assert!(failed.error.contains("502") && failed.error.contains("bad gateway"), "error was {}", failed.error);
}

/// Keys the provider leaves out fail with a fixed reason, others succeed
#[tokio::test]
async fn test_job_withSkippedKey_shouldFailOnlyThatKey() {
    let project = TestProject::new(json!({"a": "One", "b": "Two"})).await.unwrap();
    let provider = ScriptedProvider::per_item(|item| (item.key_path != "b").then(|| format!("[fr] {}", item.source_text)));
    let (service, _) = job_service(store_of(&project), provider.clone());

    let job_id = service.start_job(fr_request(&project)).await.unwrap();
    let result = wait_for_job(&service, &job_id).await.result.unwrap();

    assert_eq!(result.total_translated, 1);
    assert_eq!(result.failed_items.len(), 1);
    assert_eq!(result.failed_items[0].key_path, "b");
    assert_eq!(result.failed_items[0].error, NO_TRANSLATION_RETURNED);
    assert_eq!(provider.requests()[1].items.len(), 1);
}

/// A provider slower than the call timeout counts as a retryable timeout
#[tokio::test]
async fn test_runner_withSlowProvider_shouldTimeOut() {
    let project = TestProject::new(greeting_source()).await.unwrap();
    let provider = ScriptedProvider::echo("[fr] ").with_delay(Duration::from_millis(500));
    let mut settings = fast_settings();
    settings.call_timeout = Duration::from_millis(50);
    settings.max_retries = 0;

    let runner = JobRunner::new(
        store_of(&project),
        Arc::new(ProgressStore::new()),
        settings,
        Arc::new(AtomicBool::new(false)),
    )
    .with_provider(Arc::new(provider));
    let outcome = runner
        .run(&runner_plan(&project, &["fr"], Strategy::MissingOnly, 300))
        .await;

    assert_eq!(outcome.state, JobState::Completed);
    assert_eq!(outcome.result.total_failed, 1);
    assert!(outcome.result.failed_items[0].error.contains("timed out"));
}

/// validate_only clears invalid AI rows, keeps locked ones and calls nobody
#[tokio::test]
async fn test_job_withValidateOnly_shouldClearInvalidAiRows() {
    let project = TestProject::new(json!({
        "a": {"b": "Hello {name}", "c": "Goodbye {name}", "d": "Thanks"}
    }))
    .await
    .unwrap();
    let row = |key: &str, text: &str, status| TranslationUpsert {
        key_path: key.to_string(),
        text: text.to_string(),
        status,
    };
    project
        .repo
        .upsert_translations(
            project.project.id,
            "fr",
            vec![
                row("a.b", "Bonjour", TranslationStatus::AiTranslated),
                row("a.c", "Au revoir", TranslationStatus::Locked),
                row("a.d", "Merci", TranslationStatus::AiTranslated),
            ],
        )
        .await
        .unwrap();

    // No usable API key: validation must not need a provider
    let factory = ScriptedFactory::new(ScriptedProvider::echo(""));
    let service = JobService::new(store_of(&project), Config::default(), factory.clone());

    let job_id = service
        .start_job(fr_request(&project).with_strategy("validate_only"))
        .await
        .unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    assert_eq!(snapshot.state, JobState::Completed);
    assert_eq!(factory.created.load(Ordering::SeqCst), 0);

    let result = snapshot.result.unwrap();
    assert_eq!(result.total_validated, 3);
    assert_eq!(result.total_cleared, 1);
    assert_eq!(result.total_translated, 0);
    assert_eq!(result.total_failed, 2);

    let translations = project.translations("fr").await.unwrap();
    assert!(!translations.contains_key("a.b"));
    assert_eq!(translations["a.c"].1, TranslationStatus::Locked);
    assert_eq!(translations["a.d"].1, TranslationStatus::AiTranslated);
}

/// Clearing rows in validate_only regenerates the locale file
#[tokio::test]
async fn test_job_withValidateOnlyAndGenerateFiles_shouldRewriteClearedLanguage() {
    let project = TestProject::new(json!({"a": "Hello {name}", "b": "Thanks"})).await.unwrap();
    let row = |key: &str, text: &str| TranslationUpsert {
        key_path: key.to_string(),
        text: text.to_string(),
        status: TranslationStatus::AiTranslated,
    };
    project
        .repo
        .upsert_translations(project.project.id, "fr", vec![row("a", "Bonjour"), row("b", "Merci")])
        .await
        .unwrap();
    project
        .repo
        .upsert_translations(project.project.id, "de", vec![row("b", "Danke")])
        .await
        .unwrap();

    let factory = ScriptedFactory::new(ScriptedProvider::echo(""));
    let service = JobService::new(store_of(&project), Config::default(), factory);
    let mut request = StartJobRequest::new(project.project.id, vec!["fr".to_string(), "de".to_string()])
        .with_strategy("validate_only");
    request.generate_files = true;

    let job_id = service.start_job(request).await.unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    let result = snapshot.result.unwrap();
    assert_eq!(result.total_cleared, 1);
    // Only the language that lost rows is rewritten
    let path = project.locales_dir().join("fr.json");
    assert_eq!(result.generated_files, vec![path.display().to_string()]);
    assert!(!project.locales_dir().join("de.json").exists());

    let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written, json!({"a": "Hello {name}", "b": "Merci"}));
    assert_eq!(phases_of(&snapshot.progress_history, "fr").last(), Some(&"file_generated"));
}

/// generate_files writes the locale file after the language completes
#[tokio::test]
async fn test_job_withGenerateFiles_shouldWriteLocaleFile() {
    let project = TestProject::new(json!({"home": {"title": "Welcome", "count": 3}})).await.unwrap();
    let (service, _) = job_service(store_of(&project), ScriptedProvider::echo("[fr] "));

    let mut request = fr_request(&project);
    request.generate_files = true;
    let job_id = service.start_job(request).await.unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    let result = snapshot.result.unwrap();
    assert_eq!(result.generated_files.len(), 1);
    let path = project.locales_dir().join("fr.json");
    assert_eq!(result.generated_files[0], path.display().to_string());

    let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written, json!({"home": {"title": "[fr] Welcome", "count": 3}}));
    assert_eq!(phases_of(&snapshot.progress_history, "fr").last(), Some(&"file_generated"));
}

/// Without explicit languages the job covers known languages and locale files
#[tokio::test]
async fn test_job_withoutLanguages_shouldUseKnownLanguages() {
    let project = TestProject::new(json!({"a": "One"})).await.unwrap();
    project
        .repo
        .set_manual_translation(project.project.id, "a", "de", "Eins", TranslationStatus::NeedsReview)
        .await
        .unwrap();
    std::fs::write(project.locales_dir().join("es.json"), "{}").unwrap();
    std::fs::write(project.locales_dir().join("en.json"), "{}").unwrap();
    let provider = ScriptedProvider::echo("[x] ");
    let (service, _) = job_service(store_of(&project), provider.clone());

    let job_id = service
        .start_job(StartJobRequest::new(project.project.id, vec![]))
        .await
        .unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    let languages: HashSet<&str> = snapshot
        .progress_history
        .iter()
        .map(|e| e.language_code.as_str())
        .collect();
    assert_eq!(languages, HashSet::from(["de", "es"]));
    // de only had a needs_review row, which missing_only leaves alone
    assert_eq!(snapshot.result.unwrap().total_translated, 1);
}

/// Progress history holds one entry per identity, in sequence order
#[tokio::test]
async fn test_progress_withTwoLanguages_shouldHaveUniqueOrderedEvents() {
    let project = TestProject::new(json!({"a": "One", "b": "Two", "c": "Three"})).await.unwrap();
    let (service, _) = job_service(store_of(&project), ScriptedProvider::echo("[x] "));

    let request = StartJobRequest::new(project.project.id, vec!["fr".to_string(), "de".to_string(), "en".to_string()]);
    let job_id = service.start_job(request).await.unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    let history = &snapshot.progress_history;
    let identities: HashSet<_> = history.iter().map(|e| e.identity()).collect();
    assert_eq!(identities.len(), history.len());
    assert!(history.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert!(phases_of(history, "en").is_empty());

    // Incremental reads only return what came after the cursor
    let cursor = history[3].sequence;
    let tail = service.progress_since(&job_id, cursor);
    assert_eq!(tail.len(), history.len() - 4);
    assert_eq!(tail[0].sequence, history[4].sequence);

    let latest = snapshot.progress.unwrap();
    assert_eq!(latest.sequence, history.last().unwrap().sequence);
    assert_eq!(latest.language_code, "de");
}

/// A changed source text makes the AI row stale in merge projects too
#[tokio::test]
async fn test_job_withMergeProjectAfterSourceChange_shouldRetranslateChangedKey() {
    let project = TestProject::with_settings(greeting_source(), |p| p.import_mode = ImportMode::Merge)
        .await
        .unwrap();
    let provider = ScriptedProvider::echo("[fr] ");
    let (service, _) = job_service(store_of(&project), provider.clone());

    let job_id = service.start_job(fr_request(&project)).await.unwrap();
    wait_for_job(&service, &job_id).await;
    assert_eq!(project.translations("fr").await.unwrap()["a.b"].0, "[fr] Hello {name}");

    project.resync(json!({"a": {"b": "Goodbye {name}"}})).await.unwrap();
    assert!(project.translations("fr").await.unwrap().is_empty());

    let job_id = service
        .start_job(fr_request(&project).with_strategy("missing_only"))
        .await
        .unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    assert!(!phases_of(&snapshot.progress_history, "fr").contains(&"no_work"));
    assert_eq!(snapshot.result.unwrap().total_translated, 1);
    assert_eq!(provider.call_count(), 2);
    assert_eq!(
        project.translations("fr").await.unwrap()["a.b"],
        ("[fr] Goodbye {name}".to_string(), TranslationStatus::AiTranslated)
    );
}

/// Existing locale files of a merge project become locked rows that jobs skip
#[tokio::test]
async fn test_job_withImportedLocaleFile_shouldOnlyTranslateMissingKeys() {
    let project = TestProject::with_settings(
        json!({"home": {"title": "Welcome", "cta": "Buy {item}"}}),
        |p| p.import_mode = ImportMode::Merge,
    )
    .await
    .unwrap();
    std::fs::write(
        project.locales_dir().join("fr.json"),
        r#"{"home": {"title": "Bienvenue"}}"#,
    )
    .unwrap();

    let reports = SyncService::new(project.repo.clone())
        .import_existing_translations(project.project.id)
        .await
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!((reports[0].imported, reports[0].missing), (1, 1));
    assert_eq!(
        project.translations("fr").await.unwrap()["home.title"],
        ("Bienvenue".to_string(), TranslationStatus::Locked)
    );

    let provider = ScriptedProvider::echo("[fr] ");
    let (service, _) = job_service(store_of(&project), provider.clone());
    let job_id = service.start_job(fr_request(&project)).await.unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    assert_eq!(snapshot.result.unwrap().total_translated, 1);
    assert_eq!(provider.call_count(), 1);
    let translations = project.translations("fr").await.unwrap();
    assert_eq!(translations["home.title"], ("Bienvenue".to_string(), TranslationStatus::Locked));
    assert_eq!(
        translations["home.cta"],
        ("[fr] Buy {item}".to_string(), TranslationStatus::AiTranslated)
    );
}
