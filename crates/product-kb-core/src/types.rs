//! Domain enums shared across the engine.
//!
//! Every enum here is stored as its snake_case string form in SQLite, so each
//! carries `as_str`/`parse` alongside the serde derives.

use serde::{Deserialize, Serialize};

/// The kind of embeddable text unit a knowledge chunk was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    /// One table row, in the deterministic structured format.
    SpecRow,
    /// A normalized spec fact used by retrieval.
    SpecFact,
    /// A feature/highlight block.
    FeatureBlock,
    /// A unique selling point.
    Usp,
    Faq,
    Comparison,
    Global,
    /// Free prose, chunked by paragraph.
    Paragraph,
}

impl ChunkType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SpecRow => "spec_row",
            Self::SpecFact => "spec_fact",
            Self::FeatureBlock => "feature_block",
            Self::Usp => "usp",
            Self::Faq => "faq",
            Self::Comparison => "comparison",
            Self::Global => "global",
            Self::Paragraph => "paragraph",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "spec_row" => Some(Self::SpecRow),
            "spec_fact" => Some(Self::SpecFact),
            "feature_block" => Some(Self::FeatureBlock),
            "usp" => Some(Self::Usp),
            "faq" => Some(Self::Faq),
            "comparison" => Some(Self::Comparison),
            "global" => Some(Self::Global),
            "paragraph" => Some(Self::Paragraph),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who may see a chunk in retrieval results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Private,
    PublicBenchmark,
}

impl Visibility {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::PublicBenchmark => "public_benchmark",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Self::Private),
            "public_benchmark" => Some(Self::PublicBenchmark),
            _ => None,
        }
    }
}

/// Whether a chunk made it through the pipeline intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    #[default]
    Complete,
    /// Parsed with an unrecognized symbol or truncated content.
    Incomplete,
    /// Embedding failed; a later pass should re-embed.
    RetryNeeded,
}

impl CompletionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Incomplete => "incomplete",
            Self::RetryNeeded => "retry_needed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "complete" => Some(Self::Complete),
            "incomplete" => Some(Self::Incomplete),
            "retry_needed" => Some(Self::RetryNeeded),
            _ => None,
        }
    }
}

/// Lifecycle of a campaign variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl CampaignStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared type of a spec item's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpecDataType {
    #[default]
    Text,
    Numeric,
    Enum,
}

impl SpecDataType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Numeric => "numeric",
            Self::Enum => "enum",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "numeric" => Some(Self::Numeric),
            "enum" => Some(Self::Enum),
            _ => None,
        }
    }
}

/// State of a stored spec value within its campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueStatus {
    #[default]
    Active,
    Superseded,
    /// A later ingest produced a different value for the same item.
    Conflict,
}

impl ValueStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
            Self::Conflict => "conflict",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "superseded" => Some(Self::Superseded),
            "conflict" => Some(Self::Conflict),
            _ => None,
        }
    }
}

/// What a lineage event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageAction {
    Created,
    Updated,
    Deleted,
    Reconciled,
    Published,
    RolledBack,
}

impl LineageAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Reconciled => "reconciled",
            Self::Published => "published",
            Self::RolledBack => "rolled_back",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "deleted" => Some(Self::Deleted),
            "reconciled" => Some(Self::Reconciled),
            "published" => Some(Self::Published),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }
}

impl std::fmt::Display for LineageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of drift finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    StaleCampaign,
    HashChanged,
    EmbeddingDrift,
    Conflict,
}

impl AlertType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StaleCampaign => "stale_campaign",
            Self::HashChanged => "hash_changed",
            Self::EmbeddingDrift => "embedding_drift",
            Self::Conflict => "conflict",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stale_campaign" => Some(Self::StaleCampaign),
            "hash_changed" => Some(Self::HashChanged),
            "embedding_drift" => Some(Self::EmbeddingDrift),
            "conflict" => Some(Self::Conflict),
            _ => None,
        }
    }
}

/// Workflow state of a drift alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    #[default]
    Open,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "acknowledged" => Some(Self::Acknowledged),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// Classified intent of a retrieval question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    SpecLookup,
    UspLookup,
    Comparison,
    Faq,
    #[default]
    Unknown,
}

impl Intent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SpecLookup => "spec_lookup",
            Self::UspLookup => "usp_lookup",
            Self::Comparison => "comparison",
            Self::Faq => "faq",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "spec_lookup" => Some(Self::SpecLookup),
            "usp_lookup" => Some(Self::UspLookup),
            "comparison" => Some(Self::Comparison),
            "faq" => Some(Self::Faq),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of comparing one dimension between two products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Better,
    Worse,
    Equal,
    NotComparable,
}

impl Verdict {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Better => "better",
            Self::Worse => "worse",
            Self::Equal => "equal",
            Self::NotComparable => "not_comparable",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "better" => Some(Self::Better),
            "worse" => Some(Self::Worse),
            "equal" => Some(Self::Equal),
            "not_comparable" => Some(Self::NotComparable),
            _ => None,
        }
    }
}

/// Whether a comparison row may be shown outside the owning tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Shareability {
    Public,
    #[default]
    Restricted,
}

impl Shareability {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Restricted => "restricted",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "restricted" => Some(Self::Restricted),
            _ => None,
        }
    }
}

/// State of a queued re-embedding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReembedStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

impl ReembedStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
