//! Append-only analysis log with file-based persistence.
//!
//! Each analysis gets its own directory under `<home>/analyses/<id>/`
//! holding `events.jsonl` (one event per line), `evidence.json` once the
//! round closed and `verdict.json` once scored.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{Analysis, AnalysisEvent, AnalysisEventType, EvidenceSet, Verdict};

const EVIDENCE_FILE: &str = "evidence.json";
const VERDICT_FILE: &str = "verdict.json";

/// File-based event log for one analysis
pub struct EventLog {
    analysis_dir: PathBuf,
    events_path: PathBuf,
}

impl EventLog {
    /// Create or open the log for an analysis under `base_dir`
    pub async fn open(base_dir: &Path, analysis_id: Uuid) -> Result<Self> {
        let analysis_dir = base_dir.join(analysis_id.to_string());

        fs::create_dir_all(&analysis_dir).await.with_context(|| {
            format!(
                "Failed to create analysis directory: {}",
                analysis_dir.display()
            )
        })?;

        let events_path = analysis_dir.join("events.jsonl");

        Ok(Self {
            analysis_dir,
            events_path,
        })
    }

    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    pub fn analysis_dir(&self) -> &Path {
        &self.analysis_dir
    }

    /// Append an event to the log
    pub async fn append(&self, event: &AnalysisEvent) -> Result<()> {
        self.append_all(std::slice::from_ref(event)).await
    }

    /// Append several events with a single open/flush
    pub async fn append_all(&self, events: &[AnalysisEvent]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let mut buffer = String::new();
        for event in events {
            let json = serde_json::to_string(event).context("Failed to serialize event")?;
            buffer.push_str(&json);
            buffer.push('\n');
        }

        file.write_all(buffer.as_bytes())
            .await
            .context("Failed to write events")?;
        file.flush().await.context("Failed to flush events")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<AnalysisEvent>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path)
            .await
            .with_context(|| format!("Failed to open events file: {}", self.events_path.display()))?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: AnalysisEvent = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Persist a whole analysis: its events, evidence and verdict
    pub async fn record(&self, analysis: &Analysis) -> Result<()> {
        self.append_all(&analysis.events).await?;
        if let Some(evidence) = &analysis.evidence {
            self.store_evidence(evidence).await?;
        }
        if let Some(verdict) = &analysis.verdict {
            self.store_verdict(verdict).await?;
        }
        Ok(())
    }

    /// Rebuild the analysis record from its events and stored outputs
    pub async fn load_analysis(&self) -> Result<Analysis> {
        let events = self.replay().await?;
        let mut analysis =
            Analysis::from_events(&events).context("Failed to reconstruct analysis state")?;
        analysis.evidence = self.load_evidence().await?;
        analysis.verdict = self.load_verdict().await?;
        Ok(analysis)
    }

    /// Get the last event of a specific type
    pub async fn last_event_of_type(
        &self,
        event_type: AnalysisEventType,
    ) -> Result<Option<AnalysisEvent>> {
        let events = self.replay().await?;
        Ok(events.into_iter().rev().find(|e| e.event_type == event_type))
    }

    /// Store the frozen evidence next to the events
    pub async fn store_evidence(&self, evidence: &EvidenceSet) -> Result<PathBuf> {
        self.write_json(EVIDENCE_FILE, evidence).await
    }

    /// Load the stored evidence, if the round closed
    pub async fn load_evidence(&self) -> Result<Option<EvidenceSet>> {
        self.read_json(EVIDENCE_FILE).await
    }

    /// Store the verdict next to the events
    pub async fn store_verdict(&self, verdict: &Verdict) -> Result<PathBuf> {
        self.write_json(VERDICT_FILE, verdict).await
    }

    /// Load the stored verdict, if the analysis was scored
    pub async fn load_verdict(&self) -> Result<Option<Verdict>> {
        self.read_json(VERDICT_FILE).await
    }

    async fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.analysis_dir.join(name);
        let json = serde_json::to_string_pretty(value)
            .with_context(|| format!("Failed to serialize {}", name))?;

        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(path)
    }

    async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.analysis_dir.join(name);

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        Ok(Some(value))
    }

    /// List all analysis ids under `base_dir`
    pub async fn list(base_dir: &Path) -> Result<Vec<Uuid>> {
        if !base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut analyses = Vec::new();
        let mut entries = fs::read_dir(base_dir)
            .await
            .with_context(|| format!("Failed to list analyses: {}", base_dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        analyses.push(uuid);
                    }
                }
            }
        }

        Ok(analyses)
    }
}
