//! CLI command definitions and handlers

use clap::Subcommand;
use std::io;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

use crate::cli::prompts::{select_model, select_provider, StdinConfirm};
use crate::core::client::TranslationClient;
use crate::core::config::{AppSettings, RetryPolicy};
use crate::core::grouper::{group_by_prefix, total_items};
use crate::core::models::{Batch, BatchItem};
use crate::core::protocol::build_messages;
use crate::core::registry::{ClientKind, ModelInfo, ProviderEntry, ProviderRegistry};
use crate::core::store::{write_groups, MappingStore};
use crate::processors::orchestrator::{
    Confirmation, Orchestrator, PresetAnswer, RunOptions, RunOutcome, RunTiming, TranslationContext,
};
use crate::processors::renamer::{regenerate_mapping, rename_to_translations, restore_originals};
use crate::processors::structure::{create_placeholders, Structure};
use crate::utils::{format_duration, mask_api_key};

/// Commands for SFX Translator
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Translate pending entries of mapping.json
    Translate {
        /// Provider id from providers.json (prompted if omitted)
        #[arg(short, long)]
        provider: Option<String>,

        /// Model of the provider (prompted if omitted)
        #[arg(short, long)]
        model: Option<String>,

        /// Provider tried when the primary one fails
        #[arg(long)]
        fallback_provider: Option<String>,

        /// Model of the fallback provider
        #[arg(long, requires = "fallback_provider")]
        fallback_model: Option<String>,

        /// Groups smaller than this are sent one entry at a time
        #[arg(long, default_value_t = 2)]
        min_group_size: usize,

        /// Largest number of entries per request (0 = no limit)
        #[arg(long, default_value_t = 100)]
        max_group_items: usize,

        /// Only show the token estimate
        #[arg(long)]
        dry_run: bool,

        /// Use the asynchronous batch API when the provider supports it
        #[arg(long)]
        batch: bool,

        /// Skip every prompt and use defaults
        #[arg(short, long)]
        yes: bool,
    },

    /// Write group.json for the current mapping
    Group {
        /// Groups smaller than this are split into single entries
        #[arg(long, default_value_t = 2)]
        min_group_size: usize,

        /// Largest number of entries per group (0 = no limit)
        #[arg(long, default_value_t = 100)]
        max_group_items: usize,
    },

    /// Scan an audio library and write structure.json and mapping.json
    Scan {
        /// Library root (defaults to SFX_DIR)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Rename audio files to their translations
    Rename {
        /// Library root (defaults to SFX_DIR)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Restore original file names and regenerate mapping.json
    Restore {
        /// Library root (defaults to SFX_DIR)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Recreate the library layout with empty audio files
    Placeholders {
        /// Directory to create the placeholders in
        #[arg(short, long)]
        dir: PathBuf,
    },

    /// Manage providers.json
    Providers {
        #[command(subcommand)]
        action: ProviderAction,
    },
}

/// Provider catalog operations
#[derive(Subcommand, Debug)]
pub enum ProviderAction {
    /// List all providers
    List,

    /// Show the configuration of a provider
    Show { id: String },

    /// List the models of a provider
    Models { id: String },

    /// Set the default provider
    Default { id: String },

    /// Set the default model of a provider
    SetModel { id: String, model: String },

    /// Add a provider
    Add {
        id: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Chat completion endpoint
        #[arg(long)]
        api_url: String,

        /// API key stored in the catalog
        #[arg(long)]
        api_key: Option<String>,

        /// Environment variable holding the API key
        #[arg(long)]
        api_key_env: Option<String>,

        /// Client type: openai or siliconflow
        #[arg(long, default_value = "openai")]
        client_type: ClientKind,

        /// Model id, may be repeated
        #[arg(long = "model")]
        models: Vec<String>,

        /// Default model (defaults to the first --model)
        #[arg(long)]
        default_model: Option<String>,
    },

    /// Remove a provider
    Remove { id: String },

    /// Send a one-entry test request to a provider
    Test {
        id: String,

        /// Model to test (defaults to the provider default)
        #[arg(short, long)]
        model: Option<String>,
    },
}

/// Handle translate command
#[allow(clippy::too_many_arguments)]
pub async fn handle_translate(
    settings: &AppSettings,
    provider: Option<String>,
    model: Option<String>,
    fallback_provider: Option<String>,
    fallback_model: Option<String>,
    min_group_size: usize,
    max_group_items: usize,
    dry_run: bool,
    batch: bool,
    yes: bool,
) -> anyhow::Result<()> {
    let registry = ProviderRegistry::load(settings.providers_path())?;
    let stdin = io::stdin();
    let stdout = io::stdout();

    let provider = match provider {
        Some(id) => id,
        None if yes => registry.get_default_provider()?,
        None => select_provider(&registry, &mut stdin.lock(), &mut stdout.lock())?,
    };
    let model = match model {
        Some(m) => Some(m),
        None if yes => None,
        None => select_model(&registry, &provider, &mut stdin.lock(), &mut stdout.lock())?,
    };

    let retry = settings.retry_policy();
    let primary = TranslationClient::new(registry.get_provider_config(&provider, model.as_deref())?, retry)?;

    let fallback = match fallback_provider {
        Some(id) if id == provider => {
            warn!("Fallback provider is the same as the primary one, ignoring it");
            None
        }
        Some(id) => match registry
            .get_provider_config(&id, fallback_model.as_deref())
            .and_then(|config| TranslationClient::new(config, retry))
        {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("Fallback provider {} unavailable, continuing without it: {}", id, e);
                None
            }
        },
        None => None,
    };

    info!("Starting translation");
    info!("Mapping: {}", settings.mapping_path().display());
    info!(
        "Provider: {} ({}), key {}",
        primary.name(),
        primary.model(),
        mask_api_key(&primary.config().api_key)
    );
    if let Some(fb) = &fallback {
        info!("Fallback provider: {} ({})", fb.name(), fb.model());
    }

    let context = TranslationContext::new(primary, fallback, settings.max_retries);
    let options = RunOptions {
        min_group_size,
        max_group_items,
        dry_run,
        use_batch_api: batch,
    };
    let mut orchestrator = Orchestrator::new(
        context,
        MappingStore::new(settings.mapping_path()),
        options,
        RunTiming::from_settings(settings),
    );

    let mut confirmation: Box<dyn Confirmation> = if yes {
        Box::new(PresetAnswer(true))
    } else {
        Box::new(StdinConfirm)
    };

    match orchestrator.run(confirmation.as_mut()).await? {
        RunOutcome::NothingToDo => {
            println!("✅ All entries are already translated");
        }
        RunOutcome::DryRun(budget) => {
            println!("\n📊 Token estimate (dry run)");
            println!("   Batches: {}", budget.batches);
            println!("   Entries: {}", budget.entries);
            println!("   Input tokens: {}", budget.totals.input_tokens);
            println!("   Output tokens: {}", budget.totals.estimated_output_tokens);
            println!("   Total tokens: {}", budget.totals.total);
            println!("   Estimated cost: {:.4}", budget.estimated_cost());
        }
        RunOutcome::Cancelled(_) => {
            println!("Translation cancelled, mapping unchanged");
        }
        RunOutcome::Completed(summary) => {
            println!("\n✅ Translation completed!");
            println!("   Mode: {}", summary.mode);
            println!("   Started: {}", summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
            println!("   Updated: {}/{}", summary.updated, summary.entries);
            println!("   Failed batches: {}/{}", summary.failed_batches.len(), summary.batches);
            if !summary.unmatched.is_empty() {
                println!("   Unknown ids in responses: {}", summary.unmatched.len());
            }
            println!("   Time: {}", format_duration(summary.elapsed));
        }
    }

    Ok(())
}

/// Handle group command
pub async fn handle_group(settings: &AppSettings, min_group_size: usize, max_group_items: usize) -> anyhow::Result<()> {
    let mapping = MappingStore::new(settings.mapping_path()).load()?;
    let batches = group_by_prefix(&mapping, min_group_size, max_group_items);
    let path = settings.group_path();
    write_groups(&path, &batches)?;

    println!("✅ {} groups with {} entries written to {}", batches.len(), total_items(&batches), path.display());
    Ok(())
}

/// Handle scan command
pub async fn handle_scan(settings: &AppSettings, dir: Option<PathBuf>) -> anyhow::Result<()> {
    let root = settings.library_dir(dir.as_deref())?;
    info!("Scanning {}", root.display());

    let structure = Structure::scan(&root)?;
    let index = structure.index();
    if index.is_empty() {
        anyhow::bail!("No audio files found in {}", root.display());
    }

    structure.save(&settings.structure_path())?;
    let mapping = index.to_mapping();
    MappingStore::new(settings.mapping_path()).save(&mapping)?;

    println!("✅ Scanned {} audio files", index.len());
    println!("   Structure: {}", settings.structure_path().display());
    println!("   Mapping: {}", settings.mapping_path().display());
    Ok(())
}

/// Handle rename command
pub async fn handle_rename(settings: &AppSettings, dir: Option<PathBuf>) -> anyhow::Result<()> {
    let root = settings.library_dir(dir.as_deref())?;
    let index = Structure::load(&settings.structure_path())?.index();
    let mapping = MappingStore::new(settings.mapping_path()).load()?;

    let report = rename_to_translations(&root, &index, &mapping);

    println!("\n✅ Rename completed!");
    println!("   Renamed: {}", report.renamed);
    println!("   Skipped: {}", report.skipped);
    println!("   Failed: {}", report.failed);
    Ok(())
}

/// Handle restore command
pub async fn handle_restore(settings: &AppSettings, dir: Option<PathBuf>) -> anyhow::Result<()> {
    let root = settings.library_dir(dir.as_deref())?;
    let index = Structure::load(&settings.structure_path())?.index();
    let store = MappingStore::new(settings.mapping_path());
    let previous = store.load()?;

    let report = restore_originals(&root, &index, &previous);
    println!("✅ Restored {} files ({} skipped, {} failed)", report.renamed, report.skipped, report.failed);

    let backup = store.backup()?;
    println!("   Previous mapping backed up to {}", backup.display());

    let regenerated = regenerate_mapping(&index, &previous);
    store.save(&regenerated)?;

    let with_translation = regenerated.translated_count();
    println!("\n📝 Regenerated mapping with {} entries", regenerated.len());
    println!("   With translation: {}", with_translation);
    println!("   Without translation: {}", regenerated.len() - with_translation);
    Ok(())
}

/// Handle placeholders command
pub async fn handle_placeholders(settings: &AppSettings, dir: PathBuf) -> anyhow::Result<()> {
    let index = Structure::load(&settings.structure_path())?.index();
    let report = create_placeholders(&dir, &index)?;

    println!("✅ Created {} placeholder files in {}", report.created, dir.display());
    if report.existing > 0 {
        println!("   Already present: {}", report.existing);
    }
    Ok(())
}

/// Handle providers command
pub async fn handle_providers(settings: &AppSettings, action: ProviderAction) -> anyhow::Result<()> {
    let mut registry = ProviderRegistry::load(settings.providers_path())?;

    match action {
        ProviderAction::List => {
            let default = registry.get_default_provider().ok();
            println!("Providers:");
            for (id, name) in registry.list_providers() {
                let marker = if default.as_deref() == Some(id.as_str()) { " (default)" } else { "" };
                println!("  {} - {}{}", id, name, marker);
            }
        }
        ProviderAction::Show { id } => {
            let config = registry.get_provider_config(&id, None)?;
            println!("{} ({})", config.name, config.id);
            println!("   API URL: {}", config.api_url);
            println!("   API key: {}", mask_api_key(&config.api_key));
            println!("   Client type: {}", config.client_type);
            println!("   Default model: {}", config.model);
            println!("   Temperature: {}", config.temperature);
            println!("   Timeout: {}s", config.timeout_secs);
            println!("   Cost per 1k tokens: {}", config.cost_per_1k_tokens);
            println!("   Models: {}", config.models.len());
        }
        ProviderAction::Models { id } => {
            let default = registry.get_default_model(&id)?;
            println!("Models of {}:", id);
            for model in registry.get_provider_models(&id)? {
                let marker = if default.as_deref() == Some(model.id.as_str()) { " (default)" } else { "" };
                print!("  {} - {}{}", model.id, model.display_name(), marker);
                if !model.description.is_empty() {
                    print!(": {}", model.description);
                }
                println!();
            }
        }
        ProviderAction::Default { id } => {
            registry.set_default_provider(&id)?;
            registry.save()?;
            println!("✅ Default provider set to {}", id);
        }
        ProviderAction::SetModel { id, model } => {
            registry.set_default_model(&id, &model)?;
            registry.save()?;
            println!("✅ Default model of {} set to {}", id, model);
        }
        ProviderAction::Add {
            id,
            name,
            api_url,
            api_key,
            api_key_env,
            client_type,
            models,
            default_model,
        } => {
            let default_model = default_model.or_else(|| models.first().cloned());
            let entry = ProviderEntry {
                name: name.unwrap_or_else(|| id.clone()),
                api_url: Some(api_url),
                api_key,
                api_key_env,
                client_type: Some(client_type),
                models: models.into_iter().map(ModelInfo::new).collect(),
                default_model,
                ..Default::default()
            };
            registry.add_provider(&id, entry)?;
            registry.save()?;
            println!("✅ Added provider {}", id);
        }
        ProviderAction::Remove { id } => {
            registry.remove_provider(&id)?;
            registry.save()?;
            println!("✅ Removed provider {}", id);
        }
        ProviderAction::Test { id, model } => {
            let config = registry.get_provider_config(&id, model.as_deref())?;
            println!("Testing {} with model {}...", config.id, config.model);
            let client = TranslationClient::new(config, RetryPolicy::immediate())?;

            let sample = Batch::new(vec![BatchItem {
                id: "test".to_string(),
                original: "DOORWood_Open".to_string(),
            }]);
            let start = Instant::now();
            match client.call(&build_messages(&sample)?, 1).await {
                Ok(result) => {
                    println!("✅ {} answered in {}", id, format_duration(start.elapsed()));
                    println!("   {}", serde_json::Value::Object(result));
                }
                Err(e) => {
                    anyhow::bail!("Provider {} failed: {}", id, e);
                }
            }
        }
    }

    Ok(())
}
