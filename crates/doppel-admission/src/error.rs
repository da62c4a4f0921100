use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Memory store error: {0}")]
    Memory(#[from] doppel_memory::MemoryError),

    #[error("KV store error: {0}")]
    Kv(#[from] doppel_kv::KvError),
}

pub type Result<T> = std::result::Result<T, AdmissionError>;
