use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reachability of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    Up,
    Down,
    /// Not probed (cancelled before scheduling, or never observed).
    Unknown,
}

impl DomainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainStatus::Up => "up",
            DomainStatus::Down => "down",
            DomainStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(DomainStatus::Up),
            "down" => Ok(DomainStatus::Down),
            "unknown" => Ok(DomainStatus::Unknown),
            other => Err(anyhow::anyhow!("unknown domain status '{}'", other)),
        }
    }
}

/// RDP/VDP classification. Derived heuristically, never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProgramType {
    Rdp,
    Vdp,
    Unknown,
}

impl ProgramType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramType::Rdp => "RDP",
            ProgramType::Vdp => "VDP",
            ProgramType::Unknown => "UNKNOWN",
        }
    }

    /// Classify from the registry's free-text classification field.
    ///
    /// Explicit mentions win. Otherwise this is a default guess: programs that pay
    /// bounties are assumed RDP, the rest VDP.
    pub fn classify(classification: &str, offers_bounties: bool) -> Self {
        let text = classification.to_uppercase();
        if text.contains("RDP") || text.contains("REMOTE") {
            ProgramType::Rdp
        } else if text.contains("VDP") || text.contains("VULNERABILITY") {
            ProgramType::Vdp
        } else if offers_bounties {
            ProgramType::Rdp
        } else {
            ProgramType::Vdp
        }
    }
}

impl fmt::Display for ProgramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProgramType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RDP" => Ok(ProgramType::Rdp),
            "VDP" => Ok(ProgramType::Vdp),
            "UNKNOWN" => Ok(ProgramType::Unknown),
            other => Err(anyhow::anyhow!("unknown program type '{}'", other)),
        }
    }
}

/// A program as the registry lists it, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramListing {
    pub handle: String,
    pub name: String,
    pub url: String,
    pub primary_domain: Option<String>,
    pub offers_bounties: bool,
    /// Raw classification text (e.g. the submission state).
    pub classification: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub handle: String,
    pub name: String,
    pub url: String,
    pub primary_domain: Option<String>,
    pub offers_bounties: bool,
    pub program_type: ProgramType,
    pub last_scanned: DateTime<Utc>,
}

impl Program {
    pub fn from_listing(listing: &ProgramListing, now: DateTime<Utc>) -> Self {
        Self {
            handle: listing.handle.clone(),
            name: listing.name.clone(),
            url: listing.url.clone(),
            primary_domain: listing.primary_domain.clone().filter(|d| !d.trim().is_empty()),
            offers_bounties: listing.offers_bounties,
            program_type: ProgramType::classify(&listing.classification, listing.offers_bounties),
            last_scanned: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    pub program: String,
    pub status: DomainStatus,
    pub discovered_at: DateTime<Utc>,
    pub last_checked: DateTime<Utc>,
    pub is_new: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub id: i64,
    pub domain: String,
    pub program: String,
    pub old_status: DomainStatus,
    pub new_status: DomainStatus,
    pub changed_at: DateTime<Utc>,
    pub notified: bool,
}

impl StatusChange {
    /// DOWN -> UP, the transition worth alerting on.
    pub fn is_recovery(&self) -> bool {
        self.old_status == DomainStatus::Down && self.new_status == DomainStatus::Up
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationKind {
    Created,
    Updated,
}

/// Result of recording one observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub kind: ObservationKind,
    pub transition: Option<StatusChange>,
}

/// Aggregate counts for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_domains: u64,
    pub new_domains: u64,
    pub up_domains: u64,
    pub down_domains: u64,
    pub unknown_domains: u64,
    pub total_programs: u64,
}

/// Metadata from the enrichment tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub domain: String,
    pub program: String,
    pub status: DomainStatus,
    pub status_code: Option<u16>,
    pub title: Option<String>,
    pub technologies: Vec<String>,
    pub server: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub last_checked: DateTime<Utc>,
}
