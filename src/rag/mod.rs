pub mod corpus;
pub mod embeddings;
pub mod passage_store;
pub mod pipeline;
pub mod prompt;
pub mod vector_index;

pub use self::corpus::{load_corpus, Corpus, CorpusManifest};
pub use self::embeddings::{Embedder, FastEmbedEmbedder};
pub use self::passage_store::{Passage, PassageStore};
pub use self::pipeline::{Answer, AnswerKind, PipelineOptions, PipelineState, QueryPipeline};
pub use self::prompt::{BudgetUnit, ContextMeter, Prompt, PromptBuilder, RankedPassage};
pub use self::vector_index::{SearchHit, VectorIndex};
