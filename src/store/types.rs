use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Registration pipeline state for a single build attempt.
///
/// The `Building` variant carries the orchestrator-reported step name and is
/// persisted as `building:<step>`. Only `Complete` and `Error` are terminal;
/// a new registration may only begin from a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    WaitingToStart,
    Building(String),
    Complete,
    Error,
}

impl RegistrationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RegistrationState::Complete | RegistrationState::Error)
    }

    pub fn building(step: impl Into<String>) -> Self {
        RegistrationState::Building(step.into())
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationState::WaitingToStart => write!(f, "waiting_to_start"),
            RegistrationState::Building(step) => write!(f, "building:{step}"),
            RegistrationState::Complete => write!(f, "complete"),
            RegistrationState::Error => write!(f, "error"),
        }
    }
}

impl FromStr for RegistrationState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting_to_start" => Ok(RegistrationState::WaitingToStart),
            "complete" => Ok(RegistrationState::Complete),
            "error" => Ok(RegistrationState::Error),
            other => match other.strip_prefix("building:") {
                Some(step) if !step.is_empty() => {
                    Ok(RegistrationState::Building(step.to_string()))
                }
                _ => Err(format!("unrecognized registration state '{other}'")),
            },
        }
    }
}

impl Serialize for RegistrationState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RegistrationState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Release approval workflow state. There is no terminal state: both
/// `Approved` and `Denied` permit a fresh transition back to `UnderReview`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseApproval {
    NotRequested,
    UnderReview,
    Approved,
    Denied,
}

impl fmt::Display for ReleaseApproval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReleaseApproval::NotRequested => "not_requested",
            ReleaseApproval::UnderReview => "under_review",
            ReleaseApproval::Approved => "approved",
            ReleaseApproval::Denied => "denied",
        };
        write!(f, "{s}")
    }
}

/// The three named version slots on a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    Dev,
    Beta,
    Release,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Dev => "dev",
            Tag::Beta => "beta",
            Tag::Release => "release",
        }
    }

    pub fn parse(s: &str) -> Option<Tag> {
        match s {
            "dev" => Some(Tag::Dev),
            "beta" => Some(Tag::Beta),
            "release" => Some(Tag::Release),
            _ => None,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lightweight reference from a module's tag slots and release history to a
/// stored [`ModuleVersion`]. The commit hash is the authoritative key; the
/// version string and timestamp are denormalized for display and ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRef {
    pub git_commit_hash: String,
    pub version: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentVersions {
    pub dev: Option<VersionRef>,
    pub beta: Option<VersionRef>,
    pub release: Option<VersionRef>,
}

impl CurrentVersions {
    pub fn get(&self, tag: Tag) -> Option<&VersionRef> {
        match tag {
            Tag::Dev => self.dev.as_ref(),
            Tag::Beta => self.beta.as_ref(),
            Tag::Release => self.release.as_ref(),
        }
    }

    pub fn set(&mut self, tag: Tag, value: Option<VersionRef>) {
        match tag {
            Tag::Dev => self.dev = value,
            Tag::Beta => self.beta = value,
            Tag::Release => self.release = value,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleState {
    pub active: bool,
    pub released: bool,
    pub registration: RegistrationState,
    #[serde(default)]
    pub error_message: String,
    pub release_approval: ReleaseApproval,
    #[serde(default)]
    pub review_message: String,
}

impl ModuleState {
    pub fn new_registration() -> Self {
        Self {
            active: true,
            released: false,
            registration: RegistrationState::WaitingToStart,
            error_message: String::new(),
            release_approval: ReleaseApproval::NotRequested,
            review_message: String::new(),
        }
    }
}

/// One registered git repository.
///
/// `module_name` is unset until the first successful build reports the name
/// declared in the repository manifest; once set it never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub module_name: Option<String>,
    pub module_name_lc: Option<String>,
    pub git_url: String,
    pub owners: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub language: String,
    pub state: ModuleState,
    pub current_versions: CurrentVersions,
    pub release_version_list: Vec<VersionRef>,
    /// Registration id of the most recent attempt.
    pub registration_id: String,
    pub created_at: i64,
}

impl Module {
    pub fn is_owner(&self, username: &str) -> bool {
        self.owners.iter().any(|o| o == username)
    }

    /// Key used for the versions collection. Falls back to the git URL for
    /// modules whose first build has not yet fixed a name.
    pub fn version_key(&self) -> &str {
        self.module_name_lc.as_deref().unwrap_or(&self.git_url)
    }

    pub fn display_name(&self) -> &str {
        self.module_name.as_deref().unwrap_or(&self.git_url)
    }
}

/// One built version of a module, keyed by `(module_name_lc, git_commit_hash)`.
/// Immutable once written except for `released`/`release_timestamp`, set
/// exactly once when the version is first promoted to the release tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub module_name_lc: String,
    pub git_commit_hash: String,
    pub version: String,
    pub timestamp: i64,
    pub registration_id: String,
    #[serde(default)]
    pub narrative_methods: Vec<String>,
    #[serde(default)]
    pub module_description: String,
    #[serde(default)]
    pub module_language: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub compilation_report: Option<serde_json::Value>,
    #[serde(default)]
    pub dynamic_service: bool,
    #[serde(default)]
    pub released: bool,
    #[serde(default)]
    pub release_timestamp: Option<i64>,
}

impl ModuleVersion {
    pub fn as_ref(&self) -> VersionRef {
        VersionRef {
            git_commit_hash: self.git_commit_hash.clone(),
            version: self.version.clone(),
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildLogLine {
    pub content: String,
    pub is_error: bool,
}

/// Append-only log of one registration attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildLog {
    pub registration_id: String,
    pub timestamp: i64,
    pub git_url: String,
    pub module_name_lc: Option<String>,
    /// Mirror of the module's registration state for this attempt.
    pub registration: RegistrationState,
    #[serde(default)]
    pub error_message: String,
    pub log: Vec<BuildLogLine>,
}

/// Identifies a module by name and/or git URL. Both fields are normalized
/// (trimmed, name lowercased); when both are supplied they must agree on the
/// same module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSelector {
    pub module_name: Option<String>,
    pub git_url: Option<String>,
}

impl ModuleSelector {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            module_name: Some(name.into()),
            git_url: None,
        }
    }

    pub fn by_url(url: impl Into<String>) -> Self {
        Self {
            module_name: None,
            git_url: Some(url.into()),
        }
    }

    pub fn normalized(&self) -> Self {
        Self {
            module_name: self
                .module_name
                .as_deref()
                .map(|n| n.trim().to_lowercase())
                .filter(|n| !n.is_empty()),
            git_url: self
                .git_url
                .as_deref()
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        let s = self.normalized();
        s.module_name.is_none() && s.git_url.is_none()
    }
}

impl fmt::Display for ModuleSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.module_name, &self.git_url) {
            (Some(n), Some(u)) => write!(f, "{n} ({u})"),
            (Some(n), None) => write!(f, "{n}"),
            (None, Some(u)) => write!(f, "{u}"),
            (None, None) => write!(f, "<empty selector>"),
        }
    }
}
