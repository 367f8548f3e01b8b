//! Command-line interface for scamshield.
//!
//! Provides commands for analyzing an email, listing recorded analyses,
//! replaying one of them and showing the resolved configuration.

use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{self, ResolvedConfig};
use crate::core::{EngineError, EventLog, Orchestrator};
use crate::domain::{Analysis, Email, EvidenceSet, EvidenceStatus};
use crate::retrieval::{Embedder, HashingEmbedder, InMemoryIndex};
use crate::sources::{
    ContentAnalysisSource, JudgmentSource, KeywordJudge, PatternBlocklist, SenderReputationSource,
    SignalSource, StaticDomainIntel, UrlInspectionSource,
};

/// scamshield - Email fraud and phishing risk scoring
#[derive(Parser, Debug)]
#[command(name = "scamshield")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze an email given as JSON
    Analyze {
        /// Input file ("-" or omitted reads from stdin)
        #[arg(value_name = "FILE|-")]
        input: Option<PathBuf>,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,

        /// Record the analysis events under the state directory
        #[arg(long)]
        record: bool,
    },

    /// List recorded analyses
    History {
        /// Maximum number of analyses to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Replay a recorded analysis
    Show {
        /// Analysis ID (UUID)
        analysis_id: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Analyze {
                input,
                json,
                record,
            } => analyze(input, json, record).await,
            Commands::History { limit } => list_analyses(limit).await,
            Commands::Show { analysis_id } => show_analysis(&analysis_id).await,
            Commands::Config => show_config(),
        }
    }
}

/// Wire the built-in sources from the resolved configuration
pub async fn build_orchestrator(cfg: &ResolvedConfig) -> Result<Orchestrator> {
    let intel = StaticDomainIntel::new(cfg.reputation.domains.clone());
    let blocklist = PatternBlocklist::new(&cfg.reputation.blocklist)
        .context("Invalid URL blocklist pattern")?
        .with_confidence(cfg.reputation.blocklist_confidence);

    let embedder = Arc::new(HashingEmbedder::new(cfg.embedding.dimension));
    let index = match &cfg.exemplars {
        Some(path) => InMemoryIndex::from_corpus(embedder.as_ref(), path).await?,
        None => {
            warn!("No exemplar corpus configured; content similarity will be zero");
            InMemoryIndex::new(embedder.dimension())
        }
    };

    let sources: Vec<Arc<dyn SignalSource>> = vec![
        Arc::new(SenderReputationSource::new(Arc::new(intel))),
        Arc::new(UrlInspectionSource::new(Arc::new(blocklist))),
        Arc::new(
            ContentAnalysisSource::new(embedder, Arc::new(index)).with_top_k(cfg.embedding.top_k),
        ),
        Arc::new(JudgmentSource::new(Arc::new(KeywordJudge))),
    ];

    Ok(Orchestrator::new(sources))
}

fn read_email(input: Option<PathBuf>) -> Result<Email> {
    let content = match input.filter(|path| path.as_os_str() != "-") {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read from stdin")?;
            buffer
        }
    };

    serde_json::from_str(&content).context("Failed to parse email JSON")
}

/// Persist an analysis with its evidence and verdict
async fn record_analysis(cfg: &ResolvedConfig, analysis: &Analysis) -> Result<()> {
    let log = EventLog::open(&cfg.analyses_dir(), analysis.id).await?;
    log.record(analysis).await?;
    info!(analysis_id = %analysis.id, path = %log.analysis_dir().display(), "Analysis recorded");
    Ok(())
}

#[instrument(skip_all)]
async fn analyze(input: Option<PathBuf>, json: bool, record: bool) -> Result<()> {
    let cfg = config::config()?;
    let email = read_email(input)?;
    let orchestrator = build_orchestrator(cfg).await?;

    let report = match orchestrator.analyze_detailed(email, &cfg.engine).await {
        Ok(report) => report,
        Err(EngineError::Exhausted {
            attempted,
            analysis,
        }) => {
            if record {
                record_analysis(cfg, &analysis).await?;
            }
            anyhow::bail!(
                "Analysis {} produced no usable evidence ({} sources attempted)",
                analysis.id,
                attempted
            );
        }
        Err(e) => return Err(e.into()),
    };

    if record {
        record_analysis(cfg, &report.analysis).await?;
    }

    if json {
        println!("{}", report.verdict.to_json()?);
        return Ok(());
    }

    let verdict = &report.verdict;
    println!("Analysis:    {}", report.analysis.id);
    println!("Fraud score: {}/100 ({})", verdict.fraud_score, verdict.risk_level);
    println!("Action:      {}", verdict.risk_level.recommended_action());
    println!(
        "Complete:    {}",
        if verdict.complete { "yes" } else { "no" }
    );
    println!("\nReasoning:");
    for entry in &verdict.reasoning {
        println!("  {:>+7.2}  {}", entry.contribution, entry.cause);
    }
    print_evidence(&report.evidence);

    Ok(())
}

fn print_evidence(evidence: &EvidenceSet) {
    println!("\nEvidence:");
    for record in evidence.iter() {
        println!(
            "  {:<18} {:<10} confidence={:.2} attempts={} {}ms",
            record.source.as_str(),
            record.status.label(),
            record.confidence,
            record.attempts,
            record.elapsed_ms
        );
        if let EvidenceStatus::Failed { reason } = &record.status {
            println!("      reason: {}", reason);
        }
        for (name, value) in &record.findings {
            println!("      {} = {}", name, value);
        }
    }
}

/// List recorded analyses, newest first
async fn list_analyses(limit: usize) -> Result<()> {
    let base = config::analyses_dir()?;
    let ids = EventLog::list(&base).await?;

    let mut analyses = Vec::new();
    for id in ids {
        let log = EventLog::open(&base, id).await?;
        match log.load_analysis().await {
            Ok(analysis) => analyses.push(analysis),
            Err(e) => warn!(analysis_id = %id, error = %e, "Skipping unreadable analysis"),
        }
    }

    if analyses.is_empty() {
        println!("No analyses found");
        return Ok(());
    }

    analyses.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    println!("{:<38} {:<22} {:<10} {:<6}", "ANALYSIS ID", "STARTED", "STATE", "SCORE");
    println!("{}", "-".repeat(78));

    for analysis in analyses.into_iter().take(limit) {
        let score = analysis
            .fraud_score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<22} {:<10} {:<6}",
            analysis.id,
            analysis.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            format!("{:?}", analysis.state).to_lowercase(),
            score
        );
    }

    Ok(())
}

/// Replay a recorded analysis
async fn show_analysis(id_str: &str) -> Result<()> {
    let id = Uuid::parse_str(id_str).with_context(|| format!("Invalid analysis ID: {}", id_str))?;

    let base = config::analyses_dir()?;
    if !base.join(id.to_string()).exists() {
        anyhow::bail!("No recorded analysis {}", id);
    }

    let log = EventLog::open(&base, id).await?;
    let analysis = log.load_analysis().await?;

    println!("Analysis ID: {}", analysis.id);
    if let Some(fingerprint) = &analysis.fingerprint {
        println!("Email:       {}", fingerprint);
    }
    println!("State: {:?}", analysis.state);
    println!("Started: {}", analysis.started_at);
    if let Some(finished) = analysis.finished_at {
        println!("Finished: {}", finished);
    }

    println!("\nSources:");
    for (source, progress) in &analysis.sources {
        println!("  {}: {:?}", source, progress);
    }

    println!("\nEvents:");
    for event in &analysis.events {
        println!(
            "  {}  {:<18} {}",
            event.timestamp.format("%H:%M:%S%.3f"),
            format!("{:?}", event.event_type),
            event.summary
        );
    }

    if let Some(evidence) = &analysis.evidence {
        print_evidence(evidence);
    }

    if let Some(verdict) = &analysis.verdict {
        println!("\nVerdict:");
        println!("{}", serde_json::to_string_pretty(verdict)?);
    }

    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Config file: {}", cfg.config_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "(none - using defaults)".to_string()));
    println!();
    println!("Paths:");
    println!("  Home:      {}", cfg.home.display());
    println!("  Analyses:  {}", cfg.analyses_dir().display());
    println!(
        "  Exemplars: {}",
        cfg.exemplars
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!();
    println!("Reputation:");
    println!("  Known domains:     {}", cfg.reputation.domains.len());
    println!("  Blocklist entries: {}", cfg.reputation.blocklist.len());
    println!();
    println!("Engine:");
    println!("{}", serde_yaml::to_string(&cfg.engine).context("Failed to render engine config")?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn analyze_args(args: &[&str]) -> (Option<PathBuf>, bool, bool) {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Analyze {
                input,
                json,
                record,
            } => (input, json, record),
            other => panic!("expected analyze, got {:?}", other),
        }
    }

    #[test]
    fn test_analyze_takes_positional_file() {
        let (input, json, record) = analyze_args(&["scamshield", "analyze", "mail.json", "--json"]);
        assert_eq!(input, Some(PathBuf::from("mail.json")));
        assert!(json);
        assert!(!record);

        let (input, _, record) = analyze_args(&["scamshield", "analyze", "-", "--record"]);
        assert_eq!(input, Some(PathBuf::from("-")));
        assert!(record);

        let (input, _, _) = analyze_args(&["scamshield", "analyze"]);
        assert!(input.is_none());

        assert!(Cli::try_parse_from(["scamshield", "analyze", "--input", "mail.json"]).is_err());
    }

    #[test]
    fn test_read_email_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mail.json");
        let email = Email::new("billing@paypa1.com").with_subject("Invoice");
        std::fs::write(&path, serde_json::to_string(&email).unwrap()).unwrap();

        assert_eq!(read_email(Some(path)).unwrap(), email);
        assert!(read_email(Some(temp.path().join("missing.json"))).is_err());
    }
}
