use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("KV store error: {0}")]
    Kv(#[from] doppel_kv::KvError),

    #[error("Memory store error: {0}")]
    Memory(#[from] doppel_memory::MemoryError),

    #[error("Admission error: {0}")]
    Admission(#[from] doppel_admission::AdmissionError),

    #[error("Generation failed: {0}")]
    Generation(#[from] doppel_llm::ProviderError),

    #[error("Generation timed out after {ms}ms")]
    GenerationTimeout { ms: u64 },

    #[error("No adapter registered for channel {0}")]
    NoAdapter(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
