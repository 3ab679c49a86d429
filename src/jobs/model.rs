use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Translation,
    Analysis,
    Extraction,
}

impl JobType {
    pub const ALL: [JobType; 3] = [JobType::Translation, JobType::Analysis, JobType::Extraction];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Translation => "translation",
            JobType::Analysis => "analysis",
            JobType::Extraction => "extraction",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "translation" => Ok(JobType::Translation),
            "analysis" => Ok(JobType::Analysis),
            "extraction" => Ok(JobType::Extraction),
            _ => Err(format!("Unknown job type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Transitions the batch runner is allowed to make.
    ///
    /// `processing → pending` exists only for rate-limit deferral.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific reference to the content a job works on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobPayload {
    Translation {
        chapter_id: String,
        target_language: String,
    },
    Analysis {
        chapter_id: String,
    },
    Extraction {
        upload_id: String,
    },
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::Translation { .. } => JobType::Translation,
            JobPayload::Analysis { .. } => JobType::Analysis,
            JobPayload::Extraction { .. } => JobType::Extraction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Empty unless the last attempt failed or was deferred.
    pub error_message: String,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payload: JobPayload,
}

/// What an upstream producer submits; the store assigns id, status and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub payload: JobPayload,
}

impl NewJob {
    pub fn translation(chapter_id: impl Into<String>, target_language: impl Into<String>) -> Self {
        Self {
            payload: JobPayload::Translation {
                chapter_id: chapter_id.into(),
                target_language: target_language.into(),
            },
        }
    }

    pub fn analysis(chapter_id: impl Into<String>) -> Self {
        Self {
            payload: JobPayload::Analysis {
                chapter_id: chapter_id.into(),
            },
        }
    }

    pub fn extraction(upload_id: impl Into<String>) -> Self {
        Self {
            payload: JobPayload::Extraction {
                upload_id: upload_id.into(),
            },
        }
    }

    pub fn job_type(&self) -> JobType {
        self.payload.job_type()
    }
}

impl Job {
    pub(crate) fn from_new(new: NewJob, created_at: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            job_type: new.payload.job_type(),
            status: JobStatus::Pending,
            error_message: String::new(),
            retry_count: 0,
            created_at,
            updated_at: created_at,
            payload: new.payload,
        }
    }
}
