//! Terminal rendering of reports, assets and source status.

use colored::{ColoredString, Colorize};
use sw_connectors::{CandidateStatus, ConnectorHealth, SourceStatus};
use sw_core::{
    Asset, CommitError, CommitOutcome, CommitReport, DiscoveryReport, ReconciledCandidate,
};

pub fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

fn status_label(status: CandidateStatus) -> ColoredString {
    let text = format!("{:<11}", status.to_string());
    match status {
        CandidateStatus::New => text.green(),
        CandidateStatus::Existing => text.cyan(),
        CandidateStatus::Conflicting => text.yellow(),
    }
}

fn describe(candidate: &ReconciledCandidate) -> String {
    let asset = &candidate.candidate;
    let mut parts = vec![candidate.key.to_string()];
    if asset.domain.is_some() {
        if let Some(ip) = asset.ip {
            parts.push(format!("ip={}", ip));
        }
    }
    if !asset.ports.is_empty() {
        let ports: Vec<String> = asset
            .ports
            .iter()
            .map(|p| format!("{}/{}", p.portid, p.protocol))
            .collect();
        parts.push(format!("ports={}", ports.join(",")));
    }
    parts.push(format!("via {}", asset.source_name));
    parts.join("  ")
}

pub fn print_candidates(candidates: &[ReconciledCandidate]) {
    for candidate in candidates {
        println!(
            "  {} {} {}",
            short_id(&candidate.id).dimmed(),
            status_label(candidate.status()),
            describe(candidate)
        );
        for conflict in &candidate.conflicts {
            println!(
                "             {} {}: registry has {}, source reports {}",
                "≠".yellow(),
                conflict.field,
                conflict.existing.bold(),
                conflict.incoming.bold()
            );
        }
        if !candidate.adds.is_empty() {
            let mut adds = Vec::new();
            if candidate.adds.ip {
                adds.push("ip".to_string());
            }
            adds.extend(
                candidate
                    .adds
                    .ports
                    .iter()
                    .map(|p| format!("{}/{}", p.portid, p.protocol)),
            );
            adds.extend(candidate.adds.hostnames.iter().cloned());
            println!("             {} adds {}", "+".green(), adds.join(", "));
        }
    }
}

pub fn print_report(report: &DiscoveryReport) {
    println!(
        "{} {} {}",
        "Discovery".bold(),
        report.seed.to_string().cyan(),
        format!("(session {})", report.session_id).dimmed()
    );
    println!("─────────────────────────────────────────");
    if report.candidates.is_empty() {
        println!("No candidates found");
    } else {
        print_candidates(&report.candidates);
    }

    if !report.errors.is_empty() {
        println!();
        println!("{}", "Source errors:".red().bold());
        for error in &report.errors {
            let retry = if error.retryable { "retryable" } else { "permanent" };
            println!(
                "  {} {} [{}, {}]: {}",
                "✗".red(),
                error.source_name,
                error.kind,
                retry,
                error.message
            );
        }
    }

    println!();
    println!(
        "{} new, {} existing, {} conflicting from {} source(s) in {}ms",
        report.count(CandidateStatus::New).to_string().green(),
        report.count(CandidateStatus::Existing).to_string().cyan(),
        report.count(CandidateStatus::Conflicting).to_string().yellow(),
        report.sources_queried.len(),
        report.duration_ms
    );
}

pub fn print_commit(report: &CommitReport) {
    println!("{}", "Commit".bold());
    println!("──────");
    for result in &report.results {
        let key = result
            .key
            .as_ref()
            .map(|k| k.to_string())
            .unwrap_or_else(|| short_id(&result.candidate_id));
        match &result.result {
            Ok(CommitOutcome::Created) => println!("  {} {} created", "✓".green(), key),
            Ok(CommitOutcome::Updated) => println!("  {} {} updated", "✓".green(), key),
            Err(e @ CommitError::Conflict { .. }) => println!(
                "  {} {}: {} (use --resolve keep|take)",
                "⚠".yellow(),
                key,
                e
            ),
            Err(e) => println!("  {} {}: {}", "✗".red(), key, e),
        }
    }
    let summary = &report.summary;
    println!();
    println!(
        "{} created, {} updated, {} rejected in {}ms",
        summary.created.to_string().green(),
        summary.updated.to_string().cyan(),
        summary.rejected.to_string().red(),
        summary.duration_ms
    );
}

pub fn print_assets(assets: &[Asset]) {
    println!("{}", "Registry".bold());
    println!("────────");
    if assets.is_empty() {
        println!("No assets found");
        return;
    }
    for asset in assets {
        let key = asset
            .identity_key()
            .map(|k| k.to_string())
            .unwrap_or_else(|| asset.id.to_string());
        let ports: Vec<String> = asset.ports.iter().map(|p| p.to_string()).collect();
        let sources: Vec<&str> = asset.sources.keys().map(|s| s.as_str()).collect();
        println!("  {}", key.cyan());
        if let (Some(_), Some(ip)) = (&asset.domain, asset.ip) {
            println!("      ip:        {}", ip);
        }
        if !ports.is_empty() {
            println!("      ports:     {}", ports.join(", "));
        }
        if !asset.hostnames.is_empty() {
            let hostnames: Vec<&str> = asset.hostnames.iter().map(|h| h.as_str()).collect();
            println!("      hostnames: {}", hostnames.join(", "));
        }
        if let Some(os) = &asset.os {
            println!("      os:        {}", os);
        }
        println!("      sources:   {}", sources.join(", "));
        if let Some(seen) = asset.last_seen() {
            println!("      last seen: {}", seen.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    }
    println!();
    println!("{} asset(s)", assets.len());
}

pub fn print_sources(statuses: &[SourceStatus]) {
    println!("{}", "Sources".bold());
    println!("───────");
    if statuses.is_empty() {
        println!("No sources configured");
        return;
    }
    for status in statuses {
        let health = match &status.health {
            ConnectorHealth::Healthy => "healthy".green(),
            ConnectorHealth::Degraded(reason) => format!("degraded: {}", reason).yellow(),
            ConnectorHealth::Unhealthy(reason) => format!("unhealthy: {}", reason).red(),
            ConnectorHealth::Unknown => "unknown".white(),
        };
        let enabled = if status.enabled { "" } else { " (disabled)" };
        println!(
            "  {} [{}]{} {}",
            status.name.cyan(),
            status.connector_type,
            enabled,
            health
        );
        if let Some(until) = status.blocked_until {
            println!(
                "      {} throttled until {}",
                "⏸".yellow(),
                until.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }
}
