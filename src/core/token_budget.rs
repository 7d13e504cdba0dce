//! Token budget estimation for planning and cost preview

use serde::Serialize;
use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{Batch, TokenEstimate};
use crate::core::protocol::{build_user_prompt, SYSTEM_PROMPT};

/// Output tokens assumed per translated entry
pub const DEFAULT_OUTPUT_TOKENS_PER_ENTRY: usize = 20;

/// Estimates prompt size with the tokenizer of the model family
pub struct TokenBudgetEstimator {
    bpe: CoreBPE,
    output_tokens_per_entry: usize,
}

impl TokenBudgetEstimator {
    /// Create an estimator for a model; unknown models use `cl100k_base`
    pub fn new(model: &str) -> Result<Self> {
        Self::with_output_rate(model, DEFAULT_OUTPUT_TOKENS_PER_ENTRY)
    }

    pub fn with_output_rate(model: &str, output_tokens_per_entry: usize) -> Result<Self> {
        Ok(Self {
            bpe: encoding_for_model(model)?,
            output_tokens_per_entry,
        })
    }

    /// Token count of a piece of text
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Estimate one batch using the same prompts sync mode sends
    pub fn estimate(&self, batch: &Batch) -> Result<TokenEstimate> {
        let user_prompt = build_user_prompt(batch)?;
        let input_tokens = self.count(SYSTEM_PROMPT) + self.count(&user_prompt);
        let estimated_output_tokens = batch.len() * self.output_tokens_per_entry;

        Ok(TokenEstimate {
            input_tokens,
            estimated_output_tokens,
            total: input_tokens + estimated_output_tokens,
        })
    }

    /// Sum estimates over every batch of a run
    pub fn estimate_all(&self, batches: &[Batch], cost_per_1k_tokens: f64) -> Result<BudgetReport> {
        let mut totals = TokenEstimate::default();
        for (i, batch) in batches.iter().enumerate() {
            let estimate = self.estimate(batch)?;
            debug!(
                "Batch {} ({}, {} entries): input {}, output {}, total {}",
                i + 1,
                batch.label(),
                batch.len(),
                estimate.input_tokens,
                estimate.estimated_output_tokens,
                estimate.total
            );
            totals += estimate;
        }

        Ok(BudgetReport {
            batches: batches.len(),
            entries: batches.iter().map(Batch::len).sum(),
            totals,
            cost_per_1k_tokens,
        })
    }
}

fn encoding_for_model(model: &str) -> Result<CoreBPE> {
    // Qwen models tokenize close enough to GPT-3.5
    let target = if model.to_lowercase().contains("qwen") {
        "gpt-3.5-turbo"
    } else {
        model
    };

    match tiktoken_rs::get_bpe_from_model(target) {
        Ok(bpe) => Ok(bpe),
        Err(_) => {
            debug!("No tokenizer for model {}, using cl100k_base", model);
            tiktoken_rs::cl100k_base()
                .map_err(|e| TranslationError::config(format!("Failed to load tokenizer: {}", e)))
        }
    }
}

/// Pre-flight token and cost summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BudgetReport {
    pub batches: usize,
    pub entries: usize,
    pub totals: TokenEstimate,
    pub cost_per_1k_tokens: f64,
}

impl BudgetReport {
    pub fn estimated_cost(&self) -> f64 {
        self.totals.total as f64 * self.cost_per_1k_tokens / 1000.0
    }
}
