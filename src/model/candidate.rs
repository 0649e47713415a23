//! Candidates and the global candidate status lifecycle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CandidateId, UserId};
use crate::error::Error;

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// A person moving through the hiring pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,

    /// How the candidate entered the system. Workflow guards filter on it.
    pub source: CandidateSource,
    pub experience_level: Option<ExperienceLevel>,

    /// Global lifecycle state, independent of any process stage.
    pub status: CandidateStatus,

    /// Kept sorted and unique.
    pub tags: Vec<String>,

    /// Quick scores by criterion (e.g. "technical", "culture"). Each one is
    /// updated independently.
    pub scores: BTreeMap<String, f64>,

    /// Recruiter currently responsible for the candidate.
    pub assignee: Option<UserId>,

    pub last_contacted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Candidate {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Global candidate status.
///
/// `New` is the only initial state. `Hired` and `Archived` are terminal;
/// archiving is how candidates are deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateStatus {
    New,
    Contacted,
    Screening,
    InterviewScheduled,
    InterviewCompleted,
    OfferSent,
    OfferAccepted,
    OfferRejected,
    Hired,
    Rejected,
    OnHold,
    Archived,
}

impl CandidateStatus {
    pub const ALL: [CandidateStatus; 12] = [
        CandidateStatus::New,
        CandidateStatus::Contacted,
        CandidateStatus::Screening,
        CandidateStatus::InterviewScheduled,
        CandidateStatus::InterviewCompleted,
        CandidateStatus::OfferSent,
        CandidateStatus::OfferAccepted,
        CandidateStatus::OfferRejected,
        CandidateStatus::Hired,
        CandidateStatus::Rejected,
        CandidateStatus::OnHold,
        CandidateStatus::Archived,
    ];

    /// Statuses reachable in one step from `self`.
    ///
    /// Exhaustive on purpose: a new status does not compile until its
    /// outgoing transitions are declared here.
    pub fn allowed_targets(self) -> &'static [CandidateStatus] {
        use CandidateStatus::*;
        match self {
            New => &[Contacted, Screening, Rejected, OnHold, Archived],
            Contacted => &[Screening, InterviewScheduled, Rejected, OnHold, Archived],
            Screening => &[InterviewScheduled, Rejected, OnHold, Archived],
            InterviewScheduled => &[InterviewCompleted, Rejected, OnHold, Archived],
            InterviewCompleted => &[InterviewScheduled, OfferSent, Rejected, OnHold, Archived],
            OfferSent => &[OfferAccepted, OfferRejected, OnHold, Archived],
            OfferAccepted => &[Hired, Archived],
            OfferRejected => &[OfferSent, OnHold, Archived],
            Rejected => &[Contacted, Archived],
            OnHold => &[Contacted, Screening, Rejected, Archived],
            Hired | Archived => &[],
        }
    }

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: CandidateStatus) -> bool {
        self.allowed_targets().contains(&to)
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// Whether entering this status counts as contacting the candidate.
    pub fn counts_as_contact(self) -> bool {
        !matches!(self, CandidateStatus::New | CandidateStatus::Archived)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CandidateStatus::New => "NEW",
            CandidateStatus::Contacted => "CONTACTED",
            CandidateStatus::Screening => "SCREENING",
            CandidateStatus::InterviewScheduled => "INTERVIEW_SCHEDULED",
            CandidateStatus::InterviewCompleted => "INTERVIEW_COMPLETED",
            CandidateStatus::OfferSent => "OFFER_SENT",
            CandidateStatus::OfferAccepted => "OFFER_ACCEPTED",
            CandidateStatus::OfferRejected => "OFFER_REJECTED",
            CandidateStatus::Hired => "HIRED",
            CandidateStatus::Rejected => "REJECTED",
            CandidateStatus::OnHold => "ON_HOLD",
            CandidateStatus::Archived => "ARCHIVED",
        }
    }
}

impl std::fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CandidateStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        CandidateStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| Error::Validation(format!("unknown candidate status: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    #[default]
    Manual,
    Import,
    PublicApplication,
    Referral,
    Sourcing,
}

impl CandidateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CandidateSource::Manual => "manual",
            CandidateSource::Import => "import",
            CandidateSource::PublicApplication => "public_application",
            CandidateSource::Referral => "referral",
            CandidateSource::Sourcing => "sourcing",
        }
    }
}

impl std::str::FromStr for CandidateSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(CandidateSource::Manual),
            "import" => Ok(CandidateSource::Import),
            "public_application" => Ok(CandidateSource::PublicApplication),
            "referral" => Ok(CandidateSource::Referral),
            "sourcing" => Ok(CandidateSource::Sourcing),
            other => Err(Error::Validation(format!("unknown candidate source: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Junior,
    Mid,
    Senior,
    Lead,
    Executive,
}

impl ExperienceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ExperienceLevel::Junior => "junior",
            ExperienceLevel::Mid => "mid",
            ExperienceLevel::Senior => "senior",
            ExperienceLevel::Lead => "lead",
            ExperienceLevel::Executive => "executive",
        }
    }
}

impl std::str::FromStr for ExperienceLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "junior" => Ok(ExperienceLevel::Junior),
            "mid" => Ok(ExperienceLevel::Mid),
            "senior" => Ok(ExperienceLevel::Senior),
            "lead" => Ok(ExperienceLevel::Lead),
            "executive" => Ok(ExperienceLevel::Executive),
            other => Err(Error::Validation(format!("unknown experience level: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for candidate intake (manual entry, import, public application).
#[derive(Debug, Clone)]
pub struct NewCandidate {
    pub(crate) first_name: String,
    pub(crate) last_name: String,
    pub(crate) email: String,
    pub(crate) phone: Option<String>,
    pub(crate) source: CandidateSource,
    pub(crate) experience_level: Option<ExperienceLevel>,
    pub(crate) tags: Vec<String>,
}

impl NewCandidate {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            phone: None,
            source: CandidateSource::Manual,
            experience_level: None,
            tags: Vec::new(),
        }
    }

    pub fn phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn source(mut self, source: CandidateSource) -> Self {
        self.source = source;
        self
    }

    pub fn experience_level(mut self, level: ExperienceLevel) -> Self {
        self.experience_level = Some(level);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Materialize the candidate in the `New` state.
    pub(crate) fn into_candidate(self, now: DateTime<Utc>) -> Candidate {
        let mut tags = self.tags;
        tags.sort();
        tags.dedup();
        Candidate {
            id: CandidateId::new(),
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone: self.phone,
            source: self.source,
            experience_level: self.experience_level,
            status: CandidateStatus::New,
            tags,
            scores: BTreeMap::new(),
            assignee: None,
            last_contacted_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
