//! Pipeline processors with enum dispatch.
//!
//! The worker loop owns a `type → processor` map; each processor consumes
//! one job, mutates durable state and enqueues the next stage on success.

pub mod detect;
pub mod ingest;
pub mod orchestrate;

pub use detect::DetectProcessor;
pub use ingest::IngestProcessor;
pub use orchestrate::ScanOrchestrator;

use data_store::Job;
use serde_json::Value;

use crate::errors::ScanResult;
use crate::payloads::{JOB_DETECT, JOB_INGEST, JOB_SCAN};

/// Concrete processor with enum dispatch.
pub enum Processor {
    Orchestrate(ScanOrchestrator),
    Ingest(IngestProcessor),
    Detect(DetectProcessor),
    #[cfg(test)]
    Scripted(ScriptedBehaviour),
}

/// Deterministic stand-in used by worker-loop tests.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub enum ScriptedBehaviour {
    Succeed,
    Fail(&'static str),
}

impl Processor {
    /// The job type this processor consumes.
    pub fn job_type(&self) -> &'static str {
        match self {
            Self::Orchestrate(_) => JOB_SCAN,
            Self::Ingest(_) => JOB_INGEST,
            Self::Detect(_) => JOB_DETECT,
            #[cfg(test)]
            Self::Scripted(_) => "scripted",
        }
    }

    /// Runs the processor against one claimed job.
    pub async fn process(&self, job: &Job) -> ScanResult<Option<Value>> {
        match self {
            Self::Orchestrate(p) => p.process(job).await,
            Self::Ingest(p) => p.process(job).await,
            Self::Detect(p) => p.process(job).await,
            #[cfg(test)]
            Self::Scripted(behaviour) => match behaviour {
                ScriptedBehaviour::Succeed => Ok(None),
                ScriptedBehaviour::Fail(message) => {
                    Err(crate::errors::ScanError::Config((*message).to_string()))
                }
            },
        }
    }

    #[cfg(test)]
    pub fn scripted(behaviour: ScriptedBehaviour) -> Self {
        Self::Scripted(behaviour)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use data_store::{AccountConfig, Database};

    pub fn sample_account_config() -> AccountConfig {
        serde_json::from_value(serde_json::json!({
            "github": {"token": "ghp_test"},
            "llm": {
                "provider": "openai",
                "url": "https://api.openai.com",
                "model": "gpt-4o-mini",
                "api_key": "sk-test",
                "batch": false
            },
            "embedding": {
                "provider": "openai",
                "url": "https://api.openai.com",
                "model": "text-embedding-3-small",
                "api_key": "sk-test",
                "dimensions": 1536
            },
            "vector_store": {"url": "http://localhost:6334"}
        }))
        .expect("static test config")
    }

    pub fn seed_account(db: &Database) -> i64 {
        db.create_account("key-test", None, &sample_account_config())
            .expect("seed account")
    }
}
