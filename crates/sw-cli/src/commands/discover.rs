//! Discovery, commit and registry commands.

use crate::config::AppConfig;
use anyhow::{anyhow, bail, Context, Result};
use clap::ValueEnum;
use std::path::Path;
use std::sync::Arc;
use sw_connectors::DiscoveryOrchestrator;
use sw_core::{
    CandidateStatus, DiscoveryReport, DiscoveryService, FilterSpec, IdentityKey, JsonFileRegistry,
    ReconciledCandidate, Resolution, Selection, ServiceError,
};
use tracing::debug;

/// Which candidates `discover --commit` commits straight away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CommitMode {
    /// Only candidates with no registry entry.
    New,
    /// Every candidate; conflicts still need `--resolve`.
    All,
}

impl CommitMode {
    pub fn selects(&self, candidate: &ReconciledCandidate) -> bool {
        match self {
            CommitMode::New => candidate.status() == CandidateStatus::New,
            CommitMode::All => true,
        }
    }
}

/// Conflict resolution chosen on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResolveMode {
    /// Keep registry values on conflicting fields.
    Keep,
    /// Take the source's values.
    Take,
}

impl From<ResolveMode> for Resolution {
    fn from(mode: ResolveMode) -> Self {
        match mode {
            ResolveMode::Keep => Resolution::KeepExisting,
            ResolveMode::Take => Resolution::TakeIncoming,
        }
    }
}

/// Builds the discovery service described by `config`.
pub async fn build_service(config: &AppConfig) -> Result<DiscoveryService> {
    let mut orchestrator = DiscoveryOrchestrator::new(config.discovery.orchestrator.clone());
    for source in config.build_sources().await? {
        orchestrator.add_source(source);
    }

    let registry = JsonFileRegistry::open(&config.registry.path)
        .await
        .with_context(|| {
            format!(
                "Failed to open registry: {}",
                config.registry.path.display()
            )
        })?;

    debug!(
        sources = orchestrator.source_count(),
        registry = %config.registry.path.display(),
        "Discovery service ready"
    );
    Ok(DiscoveryService::new(
        orchestrator,
        Arc::new(registry),
        config.discovery.service.clone(),
    ))
}

fn selection(candidate: &ReconciledCandidate, resolve: Option<ResolveMode>) -> Selection {
    match resolve {
        Some(mode) if candidate.status() == CandidateStatus::Conflicting => {
            Selection::resolved(candidate.id, mode.into())
        }
        _ => Selection::new(candidate.id),
    }
}

/// Selections for every candidate `mode` picks.
pub fn select_by_mode(
    candidates: &[ReconciledCandidate],
    mode: CommitMode,
    resolve: Option<ResolveMode>,
) -> Vec<Selection> {
    candidates
        .iter()
        .filter(|c| mode.selects(c))
        .map(|c| selection(c, resolve))
        .collect()
}

/// Turns candidate ids, or unambiguous id prefixes, into selections.
pub fn resolve_selection(
    candidates: &[ReconciledCandidate],
    ids: &[String],
    resolve: Option<ResolveMode>,
) -> Result<Vec<Selection>> {
    let mut selections = Vec::with_capacity(ids.len());
    for raw in ids {
        let prefix = raw.trim().to_ascii_lowercase();
        if prefix.is_empty() {
            bail!("empty candidate id");
        }
        let matches: Vec<&ReconciledCandidate> = candidates
            .iter()
            .filter(|c| c.id.to_string().starts_with(&prefix))
            .collect();
        match matches.as_slice() {
            [only] => selections.push(selection(only, resolve)),
            [] => bail!("no pending candidate matches id '{}'", raw),
            _ => bail!(
                "candidate id '{}' is ambiguous ({} matches)",
                raw,
                matches.len()
            ),
        }
    }
    Ok(selections)
}

/// Parses `field=value` filter expressions; no expressions means no filter.
pub fn parse_filter(expressions: &[String]) -> Result<Option<FilterSpec>> {
    if expressions.is_empty() {
        return Ok(None);
    }
    let spec = FilterSpec::parse(expressions.iter().map(|s| s.as_str()))?;
    Ok(Some(spec))
}

/// Parses `value/type` identity keys.
pub fn parse_keys(raw: &[String]) -> Result<Vec<IdentityKey>> {
    raw.iter()
        .map(|k| k.parse::<IdentityKey>().map_err(|e| anyhow!(e)))
        .collect()
}

/// `report` narrowed to the candidates its session still holds.
///
/// A session emptied by commits or ignores yields no candidates.
pub async fn pending_report(
    service: &DiscoveryService,
    report: &DiscoveryReport,
) -> Result<DiscoveryReport> {
    let candidates = match service.pending(report.session_id, None).await {
        Ok(candidates) => candidates,
        Err(ServiceError::SessionNotFound(_)) => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    Ok(DiscoveryReport {
        candidates,
        ..report.clone()
    })
}

pub fn save_report(path: &Path, report: &DiscoveryReport) -> Result<()> {
    let body = serde_json::to_string_pretty(report)?;
    std::fs::write(path, body)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    Ok(())
}

pub fn load_report(path: &Path) -> Result<DiscoveryReport> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report: {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse report: {}", path.display()))
}
