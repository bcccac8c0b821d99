//! Grounded prompt assembly under a context budget.
//!
//! Passages are appended whole, most similar first, until the next one would
//! push the context block over budget. A passage is never cut mid-text.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Deserialize;
use tiktoken_rs::CoreBPE;

use super::passage_store::Passage;
use crate::error::{Error, Result};

pub const DEFAULT_PREAMBLE: &str = "You are an expert assistant answering from the provided context. \
Answer the question using only the numbered passages below. \
If the context does not contain the answer, say that you do not know.";

const PASSAGE_SEPARATOR: &str = "\n\n";

static CL100K: OnceCell<Arc<CoreBPE>> = OnceCell::new();

/// Unit the context budget is measured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetUnit {
    Chars,
    Tokens,
}

/// Measures text in [`BudgetUnit`]s.
#[derive(Clone)]
pub enum ContextMeter {
    Chars,
    Tokens(Arc<CoreBPE>),
}

impl ContextMeter {
    pub fn new(unit: BudgetUnit) -> Result<Self> {
        match unit {
            BudgetUnit::Chars => Ok(Self::Chars),
            BudgetUnit::Tokens => {
                let bpe = CL100K.get_or_try_init(|| {
                    tiktoken_rs::cl100k_base()
                        .map(Arc::new)
                        .map_err(|e| Error::Config(format!("Failed to load cl100k tokenizer: {}", e)))
                })?;
                Ok(Self::Tokens(bpe.clone()))
            }
        }
    }

    pub fn unit(&self) -> BudgetUnit {
        match self {
            Self::Chars => BudgetUnit::Chars,
            Self::Tokens(_) => BudgetUnit::Tokens,
        }
    }

    pub fn measure(&self, text: &str) -> usize {
        match self {
            Self::Chars => text.chars().count(),
            Self::Tokens(bpe) => bpe.encode_with_special_tokens(text).len(),
        }
    }
}

impl std::fmt::Debug for ContextMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ContextMeter").field(&self.unit()).finish()
    }
}

/// A retrieved passage with its 1-based retrieval rank.
#[derive(Debug, Clone, Copy)]
pub struct RankedPassage<'a> {
    pub rank: usize,
    pub score: f32,
    pub passage: &'a Passage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub text: String,
    /// Ids of the passages that made it into the context, in prompt order.
    pub included: Vec<usize>,
    /// Size of the context block in budget units.
    pub context_units: usize,
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    preamble: String,
    meter: ContextMeter,
}

impl PromptBuilder {
    pub fn new(meter: ContextMeter) -> Self {
        Self {
            preamble: DEFAULT_PREAMBLE.to_string(),
            meter,
        }
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = preamble.into();
        self
    }

    pub fn meter(&self) -> &ContextMeter {
        &self.meter
    }

    pub fn build(&self, question: &str, passages: &[RankedPassage<'_>], max_context_units: usize) -> Prompt {
        let mut ordered: Vec<&RankedPassage<'_>> = passages.iter().collect();
        ordered.sort_by_key(|p| p.rank);

        let mut context = String::new();
        let mut context_units = 0;
        let mut included = Vec::new();

        for ranked in ordered {
            let entry = render_entry(ranked);
            let mut candidate = context.clone();
            if !candidate.is_empty() {
                candidate.push_str(PASSAGE_SEPARATOR);
            }
            candidate.push_str(&entry);

            let units = self.meter.measure(&candidate);
            if units > max_context_units {
                break;
            }
            context = candidate;
            context_units = units;
            included.push(ranked.passage.id);
        }

        let text = format!(
            "{}\n\nContext:\n{}\n\nQuestion: {}\n\nAnswer:",
            self.preamble, context, question
        );

        Prompt {
            text,
            included,
            context_units,
        }
    }
}

fn render_entry(ranked: &RankedPassage<'_>) -> String {
    match ranked.passage.source() {
        Some(source) => format!(
            "[{}] (source: {}, score: {:.3})\n{}",
            ranked.rank,
            source,
            ranked.score,
            ranked.passage.text.trim()
        ),
        None => format!(
            "[{}] (score: {:.3})\n{}",
            ranked.rank,
            ranked.score,
            ranked.passage.text.trim()
        ),
    }
}
