//! Server statistics
//!
//! Snapshot types returned by the registry, their text and JSON reports,
//! and the SIGHUP-driven reporter task.

use std::path::Path;

use serde::Serialize;

use crate::session::SessionCounters;

/// Header printed before the per-client lines
pub const CLIENTS_HEADER: &str = "@CLIENTS@";
/// Header printed before the server totals line
pub const SERVER_HEADER: &str = "@SERVER@";

/// Registry-wide message totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub auth: u64,
    pub name: u64,
    pub say: u64,
    pub kick: u64,
    pub list: u64,
    pub leave: u64,
}

/// Counters for one live, named session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub name: String,
    #[serde(flatten)]
    pub counters: SessionCounters,
}

/// Consistent view of the registry counters
///
/// `clients` is sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub clients: Vec<SessionStats>,
    pub totals: Totals,
}

/// Report output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum StatsFormat {
    /// `@CLIENTS@` / `@SERVER@` line report
    #[default]
    Text,
    /// One JSON object per report
    Json,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    server: &'a str,
    #[serde(flatten)]
    stats: &'a StatsSnapshot,
}

impl StatsSnapshot {
    /// Line report: one line per client, then the server totals
    pub fn render_text(&self, server_name: &str) -> String {
        let mut out = String::new();
        out.push_str(CLIENTS_HEADER);
        out.push('\n');
        for client in &self.clients {
            let c = client.counters;
            out.push_str(&format!(
                "{}:SAY:{}:KICK:{}:LIST:{}\n",
                client.name, c.say, c.kick, c.list
            ));
        }
        out.push_str(SERVER_HEADER);
        out.push('\n');
        let t = self.totals;
        out.push_str(&format!(
            "{}:AUTH:{}:NAME:{}:SAY:{}:KICK:{}:LIST:{}:LEAVE:{}\n",
            server_name, t.auth, t.name, t.say, t.kick, t.list, t.leave
        ));
        out
    }

    pub fn render_json(&self, server_name: &str) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(&JsonReport {
            server: server_name,
            stats: self,
        })?;
        json.push('\n');
        Ok(json)
    }

    pub fn render(&self, server_name: &str, format: StatsFormat) -> Result<String, serde_json::Error> {
        match format {
            StatsFormat::Text => Ok(self.render_text(server_name)),
            StatsFormat::Json => self.render_json(server_name),
        }
    }
}

/// Base name of the executable path, used to label the totals line
pub fn server_name_from_path(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Dump a stats report to stderr on every SIGHUP
///
/// Runs until the registry goes away.
#[cfg(unix)]
pub async fn run_sighup_reporter(
    registry: crate::server::RegistryHandle,
    server_name: String,
    format: StatsFormat,
) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::{debug, warn};

    let mut hangups = signal(SignalKind::hangup())?;
    let mut stderr = tokio::io::stderr();

    while hangups.recv().await.is_some() {
        debug!("SIGHUP received, collecting stats");
        let Ok(snapshot) = registry.stats().await else {
            debug!("Registry closed, stopping stats reporter");
            break;
        };
        match snapshot.render(&server_name, format) {
            Ok(report) => {
                stderr.write_all(report.as_bytes()).await?;
                stderr.flush().await?;
            }
            Err(e) => warn!("Failed to render stats: {}", e),
        }
    }
    Ok(())
}
