//! # Overview Page
//!
//! A single HTML page summarising every channel (mounted flowcell, its latest
//! QC result and the runs recorded for it) and every sequencing experiment in
//! the run database.

use crate::channel::ChannelState;
use crate::record::RunEntry;
use crate::tail::parse_timestamp;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

/// QC groups shown on a channel card, `*` being all pores.
const QC_GROUPS: [&str; 5] = ["*", "1", "2", "3", "4"];

/// Everything the page shows, computed from one consistent snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct OverviewSnapshot {
    pub generated_at: String,
    pub channels: Vec<ChannelSummary>,
    pub experiments: Vec<ExperimentGroup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelSummary {
    pub name: String,
    /// Flowcell id, `-` when none is mounted, `NO RECORDS` when it has no runs.
    pub flowcell_id: String,
    pub asic_id_eeprom: Option<String>,
    pub current_run: Option<String>,
    pub latest_qc: Option<QcSummary>,
    pub runs: Vec<RunLink>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QcSummary {
    pub date: String,
    /// Group label → active channels in the first mux scan.
    pub group_totals: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunLink {
    pub title: String,
    pub report: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentGroup {
    pub title: String,
    pub samples: Vec<SampleGroup>,
}

impl ExperimentGroup {
    pub fn run_count(&self) -> usize {
        self.samples.iter().map(|s| s.runs.len()).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleGroup {
    pub sample: String,
    pub report: PathBuf,
    pub runs: Vec<RunSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub sequencing_kit: Option<String>,
    pub protocol_start: Option<String>,
    /// `H:MM:SS`, absent while the run has no end.
    pub duration: Option<String>,
}

/// Consumes an overview snapshot.
pub trait OverviewRenderer: Send + Sync {
    fn render(&self, snapshot: &OverviewSnapshot) -> io::Result<()>;
}

fn report_path(output_dir: &Path, title: &str, sample: &str) -> PathBuf {
    output_dir.join("runs").join(title).join(sample).join("report.html")
}

fn title_and_sample(entry: &RunEntry) -> (String, String) {
    let title = entry
        .run_data
        .user_filename_input
        .clone()
        .unwrap_or_else(|| "-".to_string());
    let sample = entry
        .run_data
        .sample_name()
        .map(str::to_string)
        .unwrap_or_else(|| title.clone());
    (title, sample)
}

fn duration(start: Option<&str>, end: Option<&str>) -> Option<String> {
    let secs = (parse_timestamp(end?)? - parse_timestamp(start?)?).num_seconds();
    if secs < 0 {
        return None;
    }
    Some(format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60))
}

fn summarise_channel(state: &ChannelState, entries: &[RunEntry], output_dir: &Path) -> ChannelSummary {
    let asic = state.flowcell().asic_id_eeprom.clone();
    let mine: Vec<&RunEntry> = entries
        .iter()
        .filter(|e| asic.is_some() && e.flowcell.asic_id_eeprom == asic)
        .collect();

    let latest_qc_entry = mine
        .iter()
        .filter(|e| e.run_data.is_qc())
        .max_by(|a, b| a.run_data.protocol_start.cmp(&b.run_data.protocol_start))
        .copied();
    let latest_qc = latest_qc_entry.map(|e| QcSummary {
        date: e
            .run_data
            .protocol_start
            .as_deref()
            .and_then(|s| s.get(..10))
            .unwrap_or("-")
            .to_string(),
        group_totals: e
            .mux_scans
            .first()
            .map(|scan| {
                QC_GROUPS
                    .iter()
                    .filter_map(|g| scan.group_total(g).map(|n| (g.to_string(), n)))
                    .collect()
            })
            .unwrap_or_default(),
    });

    let runs: Vec<RunLink> = mine
        .iter()
        .filter(|e| !e.run_data.is_qc())
        .map(|e| {
            let (title, sample) = title_and_sample(e);
            RunLink {
                report: report_path(output_dir, &title, &sample),
                title,
            }
        })
        .collect();

    let flowcell_id = match (&asic, latest_qc_entry, mine.first()) {
        (None, _, _) => "-".to_string(),
        (Some(_), None, None) => "NO RECORDS".to_string(),
        (Some(_), Some(qc), _) => qc.flowcell.flowcell_id.clone().unwrap_or_default(),
        (Some(_), None, Some(run)) => run.flowcell.flowcell_id.clone().unwrap_or_default(),
    };

    ChannelSummary {
        name: state.minion_id().to_string(),
        flowcell_id,
        asic_id_eeprom: asic,
        current_run: state.run().user_filename_input.clone(),
        latest_qc,
        runs,
    }
}

/// Group sequencing runs by title, then sample, newest first.
fn group_experiments(entries: &[RunEntry], output_dir: &Path) -> Vec<ExperimentGroup> {
    let mut sequencing: Vec<&RunEntry> = entries
        .iter()
        .filter(|e| {
            e.run_data
                .experiment_type
                .as_deref()
                .is_some_and(|t| t.to_lowercase().contains("seq"))
        })
        .collect();
    sequencing.sort_by(|a, b| b.run_data.protocol_start.cmp(&a.run_data.protocol_start));

    let mut groups: Vec<ExperimentGroup> = Vec::new();
    for entry in sequencing {
        let (title, sample) = title_and_sample(entry);
        let run = RunSummary {
            run_id: entry.run_data.run_id.clone().unwrap_or_default(),
            sequencing_kit: entry.run_data.sequencing_kit.clone(),
            protocol_start: entry.run_data.protocol_start.clone(),
            duration: duration(
                entry.run_data.protocol_start.as_deref(),
                entry.run_data.protocol_end.as_deref(),
            ),
        };

        let group = match groups.iter().position(|g| g.title == title) {
            Some(i) => &mut groups[i],
            None => {
                groups.push(ExperimentGroup {
                    title: title.clone(),
                    samples: Vec::new(),
                });
                let last = groups.len() - 1;
                &mut groups[last]
            }
        };
        match group.samples.iter_mut().find(|s| s.sample == sample) {
            Some(s) => s.runs.push(run),
            None => group.samples.push(SampleGroup {
                report: report_path(output_dir, &title, &sample),
                sample,
                runs: vec![run],
            }),
        }
    }
    groups
}

/// Build the page contents from channel states and database entries.
pub fn build_snapshot(
    channels: &[&ChannelState],
    entries: &[RunEntry],
    output_dir: &Path,
) -> OverviewSnapshot {
    OverviewSnapshot {
        generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M").to_string(),
        channels: channels
            .iter()
            .map(|state| summarise_channel(state, entries, output_dir))
            .collect(),
        experiments: group_experiments(entries, output_dir),
    }
}

/// Writes the overview as a static HTML page.
#[derive(Debug, Clone)]
pub struct HtmlOverview {
    path: PathBuf,
}

impl HtmlOverview {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn to_html(snapshot: &OverviewSnapshot) -> String {
        let mut html = String::new();
        let _ = write!(
            html,
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
             <meta http-equiv=\"refresh\" content=\"60\">\n<title>GridION overview</title>\n\
             </head>\n<body>\n<h1>GridION overview</h1>\n<p class=\"generated\">{}</p>\n",
            escape(&snapshot.generated_at)
        );

        html.push_str("<div class=\"channels\">\n");
        for channel in &snapshot.channels {
            let _ = write!(
                html,
                "<div class=\"channel {name}\">\n<h2>{name}</h2>\n<p class=\"flowcell\">{fc}</p>\n",
                name = escape(&channel.name),
                fc = escape(&channel.flowcell_id)
            );
            if let Some(run) = &channel.current_run {
                let _ = writeln!(html, "<p class=\"current\">{}</p>", escape(run));
            }
            if let Some(qc) = &channel.latest_qc {
                let _ = write!(html, "<table class=\"qc\">\n<tr><th>QC {}</th>", escape(&qc.date));
                for (group, total) in &qc.group_totals {
                    let _ = write!(html, "<td>{}: {}</td>", escape(group), total);
                }
                html.push_str("</tr>\n</table>\n");
            }
            if !channel.runs.is_empty() {
                html.push_str("<ul class=\"runs\">\n");
                for run in &channel.runs {
                    let _ = writeln!(
                        html,
                        "<li><a href=\"file://{}\">{}</a></li>",
                        escape(&run.report.display().to_string()),
                        escape(&run.title)
                    );
                }
                html.push_str("</ul>\n");
            }
            html.push_str("</div>\n");
        }
        html.push_str("</div>\n");

        html.push_str(
            "<table class=\"experiments\">\n<tr><th>Run title</th><th>Sample</th>\
             <th>Run</th><th>Kit</th><th>Start</th><th>Duration</th></tr>\n",
        );
        for exp in &snapshot.experiments {
            let mut first_of_exp = true;
            for sample in &exp.samples {
                let mut first_of_sample = true;
                for run in &sample.runs {
                    html.push_str("<tr>");
                    if first_of_exp {
                        let _ = write!(
                            html,
                            "<td rowspan=\"{}\">{}</td>",
                            exp.run_count(),
                            escape(&exp.title)
                        );
                        first_of_exp = false;
                    }
                    if first_of_sample {
                        let _ = write!(
                            html,
                            "<td rowspan=\"{}\"><a href=\"file://{}\">{}</a></td>",
                            sample.runs.len(),
                            escape(&sample.report.display().to_string()),
                            escape(&sample.sample)
                        );
                        first_of_sample = false;
                    }
                    let _ = writeln!(
                        html,
                        "<td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                        escape(&run.run_id),
                        escape(run.sequencing_kit.as_deref().unwrap_or("-")),
                        escape(run.protocol_start.as_deref().unwrap_or("-")),
                        escape(run.duration.as_deref().unwrap_or("N/A"))
                    );
                }
            }
        }
        html.push_str("</table>\n</body>\n</html>\n");
        html
    }
}

impl OverviewRenderer for HtmlOverview {
    fn render(&self, snapshot: &OverviewSnapshot) -> io::Result<()> {
        let html = Self::to_html(snapshot);
        // Write then rename so browsers never load a half-written page
        let tmp = self.path.with_extension("html.tmp");
        std::fs::write(&tmp, html)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), "Rendered overview");
        Ok(())
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
