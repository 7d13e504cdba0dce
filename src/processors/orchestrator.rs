//! End-to-end translation run over a mapping file

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::core::batch_job::{BatchJob, BatchRequest, BatchStatus};
use crate::core::client::TranslationClient;
use crate::core::config::{AppSettings, PollPolicy};
use crate::core::errors::{Result, TranslationError};
use crate::core::grouper::{group_by_prefix, total_items};
use crate::core::models::{Batch, Mapping, ReconcileReport};
use crate::core::protocol::{build_messages, extract_json_object, normalize_envelope};
use crate::core::store::MappingStore;
use crate::core::token_budget::{BudgetReport, TokenBudgetEstimator};
use crate::utils::{format_duration, EtaTracker};

/// Clients used for one run
#[derive(Debug, Clone)]
pub struct TranslationContext {
    pub primary: TranslationClient,
    pub fallback: Option<TranslationClient>,
    pub max_retries: u32,
}

impl TranslationContext {
    pub fn new(primary: TranslationClient, fallback: Option<TranslationClient>, max_retries: u32) -> Self {
        Self {
            primary,
            fallback,
            max_retries,
        }
    }

    /// Translate one batch with the primary client, then the fallback
    pub async fn translate_batch(&self, batch: &Batch) -> Result<Map<String, Value>> {
        let messages = build_messages(batch)?;

        debug!("Using provider {} ({})", self.primary.name(), self.primary.model());
        let primary_err = match self.primary.call(&messages, self.max_retries).await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };
        warn!("Primary provider {} failed: {}", self.primary.name(), primary_err);

        let Some(fallback) = &self.fallback else {
            return Err(primary_err);
        };

        info!("Trying fallback provider {}", fallback.name());
        match fallback.call(&messages, self.max_retries).await {
            Ok(result) => Ok(result),
            Err(fallback_err) => {
                warn!("Fallback provider {} also failed: {}", fallback.name(), fallback_err);
                Err(primary_err)
            }
        }
    }
}

/// Source of the yes/no answer before any mutating call
pub trait Confirmation {
    fn confirm(&mut self, prompt: &str) -> bool;
}

/// Fixed answer, for `--yes` and non-interactive use
#[derive(Debug, Clone, Copy)]
pub struct PresetAnswer(pub bool);

impl Confirmation for PresetAnswer {
    fn confirm(&mut self, prompt: &str) -> bool {
        debug!("{} -> {}", prompt, if self.0 { "y" } else { "n" });
        self.0
    }
}

/// Whether an answer to the confirmation prompt means "go ahead"
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Per-run knobs coming from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub min_group_size: usize,
    pub max_group_items: usize,
    pub dry_run: bool,
    pub use_batch_api: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            min_group_size: 2,
            max_group_items: 100,
            dry_run: false,
            use_batch_api: false,
        }
    }
}

/// Pauses of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTiming {
    pub rate_limit_delay: Duration,
    pub poll: PollPolicy,
    pub output_tokens_per_entry: usize,
}

impl RunTiming {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            rate_limit_delay: settings.rate_limit_delay(),
            poll: settings.poll_policy(),
            output_tokens_per_entry: settings.output_tokens_per_entry,
        }
    }
}

impl Default for RunTiming {
    fn default() -> Self {
        Self::from_settings(&AppSettings::default())
    }
}

/// Orchestrator stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Grouping,
    Budgeting,
    Confirm,
    TranslatingSync,
    TranslatingBatch,
    Persisted,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Grouping => "grouping",
            Stage::Budgeting => "budgeting",
            Stage::Confirm => "confirm",
            Stage::TranslatingSync => "translating (sync)",
            Stage::TranslatingBatch => "translating (batch)",
            Stage::Persisted => "persisted",
            Stage::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// How the entries were actually translated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationMode {
    Sync,
    Batch,
}

impl fmt::Display for TranslationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationMode::Sync => write!(f, "sync"),
            TranslationMode::Batch => write!(f, "batch"),
        }
    }
}

/// Figures reported at the end of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub mode: TranslationMode,
    pub batches: usize,
    pub entries: usize,
    pub updated: usize,
    pub unmatched: Vec<String>,
    pub failed_batches: Vec<usize>,
    pub elapsed: Duration,
    pub budget: BudgetReport,
}

impl RunSummary {
    fn new(batches: &[Batch], budget: BudgetReport) -> Self {
        Self {
            started_at: Utc::now(),
            mode: TranslationMode::Sync,
            batches: batches.len(),
            entries: total_items(batches),
            updated: 0,
            unmatched: Vec::new(),
            failed_batches: Vec::new(),
            elapsed: Duration::ZERO,
            budget,
        }
    }

    fn record(&mut self, report: ReconcileReport) {
        self.updated += report.updated;
        self.unmatched.extend(report.unmatched);
    }
}

/// Result of [`Orchestrator::run`]
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Every entry already has a translation
    NothingToDo,
    /// Budget computed, nothing sent
    DryRun(BudgetReport),
    /// User declined; mapping untouched
    Cancelled(BudgetReport),
    Completed(RunSummary),
}

/// Drives grouping, budgeting, confirmation, translation and checkpointing
pub struct Orchestrator {
    context: TranslationContext,
    store: MappingStore,
    options: RunOptions,
    timing: RunTiming,
    stage: Stage,
}

impl Orchestrator {
    pub fn new(context: TranslationContext, store: MappingStore, options: RunOptions, timing: RunTiming) -> Self {
        Self {
            context,
            store,
            options,
            timing,
            stage: Stage::Init,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn enter(&mut self, stage: Stage) {
        debug!("Stage {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    /// Run the whole pipeline once
    pub async fn run(&mut self, confirmation: &mut dyn Confirmation) -> Result<RunOutcome> {
        let started = Instant::now();

        self.enter(Stage::Grouping);
        let mut mapping = self.store.load()?;
        let batches = group_by_prefix(&mapping, self.options.min_group_size, self.options.max_group_items);
        let total = total_items(&batches);
        info!("{} entries to translate in {} batches", total, batches.len());

        if batches.is_empty() {
            self.enter(Stage::Done);
            return Ok(RunOutcome::NothingToDo);
        }

        self.enter(Stage::Budgeting);
        let budget = self.budget(&batches);
        info!(
            "Estimated tokens: input {}, output {}, total {}, cost {:.4} (at {} per 1000 tokens)",
            budget.totals.input_tokens,
            budget.totals.estimated_output_tokens,
            budget.totals.total,
            budget.estimated_cost(),
            budget.cost_per_1k_tokens
        );

        if self.options.dry_run {
            info!("Dry run, nothing will be translated");
            self.enter(Stage::Done);
            return Ok(RunOutcome::DryRun(budget));
        }

        let mut use_batch = self.options.use_batch_api;
        if use_batch && !self.context.primary.supports_batch() {
            warn!("{} does not support the batch API, using regular translation", self.context.primary.name());
            use_batch = false;
        }

        self.enter(Stage::Confirm);
        let prompt = if use_batch {
            "Translate with the batch API? This may take a long time. (y/N)"
        } else {
            "Continue with translation? (y/N)"
        };
        if !confirmation.confirm(prompt) {
            info!("Translation cancelled");
            self.enter(Stage::Done);
            return Ok(RunOutcome::Cancelled(budget));
        }

        let mut summary = RunSummary::new(&batches, budget);

        let mut translated_by_batch = false;
        if use_batch {
            self.enter(Stage::TranslatingBatch);
            match self.translate_with_batch_api(&mut mapping, &batches).await {
                Ok((report, failed)) => {
                    summary.record(report);
                    summary.failed_batches = failed;
                    summary.mode = TranslationMode::Batch;
                    translated_by_batch = true;
                }
                Err(e) => {
                    warn!("Batch translation failed ({}), falling back to regular translation", e);
                }
            }
        }

        if !translated_by_batch {
            self.enter(Stage::TranslatingSync);
            self.translate_sync(&mut mapping, &batches, &mut summary).await?;
        }

        self.enter(Stage::Persisted);
        summary.elapsed = started.elapsed();
        info!(
            "Finished: {} of {} entries updated, {} batches failed, {} unmatched ids, took {}",
            summary.updated,
            summary.entries,
            summary.failed_batches.len(),
            summary.unmatched.len(),
            format_duration(summary.elapsed)
        );

        self.enter(Stage::Done);
        Ok(RunOutcome::Completed(summary))
    }

    /// Advisory estimate; a tokenizer failure leaves it empty instead of aborting
    fn budget(&self, batches: &[Batch]) -> BudgetReport {
        let config = self.context.primary.config();
        let rate = config.cost_per_1k_tokens;

        TokenBudgetEstimator::with_output_rate(&config.model, self.timing.output_tokens_per_entry)
            .and_then(|estimator| estimator.estimate_all(batches, rate))
            .unwrap_or_else(|e| {
                warn!("Token estimation unavailable: {}", e);
                BudgetReport {
                    batches: batches.len(),
                    entries: total_items(batches),
                    cost_per_1k_tokens: rate,
                    ..Default::default()
                }
            })
    }

    async fn translate_sync(&self, mapping: &mut Mapping, batches: &[Batch], summary: &mut RunSummary) -> Result<()> {
        let total = total_items(batches);
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }

        let mut eta = EtaTracker::new(batches.len());
        let mut done = 0;

        for (i, batch) in batches.iter().enumerate() {
            let batch_start = Instant::now();
            pb.set_message(format!("{} ({} entries)", batch.label(), batch.len()));
            info!("Translating batch {}/{}: {} ({} entries)", i + 1, batches.len(), batch.label(), batch.len());

            match self.context.translate_batch(batch).await.and_then(normalize_envelope) {
                Ok(translations) => {
                    let report = mapping.apply_translations(&translations);
                    info!("Updated {} translations", report.updated);
                    summary.record(report);
                }
                Err(e) => {
                    error!("All providers failed, skipping batch {} ({}): {}", i + 1, batch.label(), e);
                    summary.failed_batches.push(i);
                }
            }

            done += batch.len();
            self.store.save(mapping)?;
            pb.inc(batch.len() as u64);

            let snap = eta.record(batch_start.elapsed());
            info!(
                "Batch took {}, average {}, elapsed {}, remaining ~{}, total ~{}, progress {:.1}% ({}/{})",
                format_duration(snap.last),
                format_duration(snap.average),
                format_duration(snap.elapsed),
                format_duration(snap.remaining),
                format_duration(snap.total_estimate),
                snap.percent,
                done,
                total
            );

            sleep(self.timing.rate_limit_delay).await;
        }

        pb.finish_with_message("Completed");
        Ok(())
    }

    /// Submit every batch as one bulk job and merge its results.
    ///
    /// Returns the merged report and the indices of batches without a usable
    /// result; any job-level failure is an error so the caller can fall back.
    async fn translate_with_batch_api(
        &self,
        mapping: &mut Mapping,
        batches: &[Batch],
    ) -> Result<(ReconcileReport, Vec<usize>)> {
        let client = &self.context.primary;

        let mut requests = Vec::with_capacity(batches.len());
        let mut by_custom_id = HashMap::with_capacity(batches.len());
        for (i, batch) in batches.iter().enumerate() {
            let custom_id = format!("request-{}", i);
            by_custom_id.insert(custom_id.clone(), i);
            requests.push(BatchRequest {
                custom_id,
                messages: build_messages(batch)?,
            });
        }

        info!("Submitting {} batches to the batch API", requests.len());
        let description = format!("SFX Translation Batch {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
        let job = client
            .submit_batch(&requests, &description)
            .await
            .ok_or_else(|| TranslationError::BatchJobFailed {
                job_id: String::new(),
                status: "not created".to_string(),
            })?;

        let job = self.wait_for_job(client, &job.id).await?;
        if job.status != BatchStatus::Completed {
            return Err(TranslationError::BatchJobFailed {
                job_id: job.id,
                status: job.status.to_string(),
            });
        }

        let results = client
            .fetch_results(&job)
            .await
            .ok_or_else(|| TranslationError::BatchJobFailed {
                job_id: job.id.clone(),
                status: "results unavailable".to_string(),
            })?;
        info!("Fetched {} results from batch job {}", results.len(), job.id);

        let mut report = ReconcileReport::default();
        let mut answered = BTreeSet::new();
        for result in &results {
            let Some(&index) = by_custom_id.get(&result.custom_id) else {
                warn!("No batch matches result {}", result.custom_id);
                continue;
            };

            let parsed = result
                .content()
                .and_then(extract_json_object)
                .and_then(normalize_envelope);
            match parsed {
                Ok(translations) => {
                    report.absorb(mapping.apply_translations(&translations));
                    answered.insert(index);
                }
                Err(e) => warn!("Unusable result for {}: {}", result.custom_id, e),
            }
        }

        self.store.save(mapping)?;

        let failed: Vec<usize> = (0..batches.len()).filter(|i| !answered.contains(i)).collect();
        if !failed.is_empty() {
            warn!("{} batches got no usable result and stay untranslated", failed.len());
        }
        Ok((report, failed))
    }

    /// Poll until the job reaches a terminal state or the poll budget runs out
    async fn wait_for_job(&self, client: &TranslationClient, job_id: &str) -> Result<BatchJob> {
        let poll = self.timing.poll;
        info!("Waiting for batch job {}", job_id);

        for attempt in 1..=poll.max_attempts {
            let job = client.poll_status(job_id).await?;
            info!("Batch job {} status: {}", job_id, job.status);

            if job.status.is_terminal() {
                return Ok(job);
            }
            if attempt < poll.max_attempts {
                sleep(poll.interval).await;
            }
        }

        Err(TranslationError::BatchJobTimeout {
            job_id: job_id.to_string(),
            polls: poll.max_attempts,
        })
    }
}
