//! # Log Line Parser
//!
//! Turns one log line into a typed [`Parsed`] result. Each stream has its own
//! ordered phrase catalogue; the first phrase contained in the line decides
//! how values are extracted. The parser never touches channel state.

mod catalogue;

use crate::tail::{timestamp_text, Stream};
use catalogue::{Extract, Phrase, BREAM_PHRASES, SERVER_PHRASES};
use regex::Regex;

/// Lifecycle events recognised in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    ProtocolStarted,
    ProtocolFinished,
    FlowcellDiscovered,
    FlowcellDisconnected,
    MuxScanFinished,
    QcFinished,
    SequencingStarted,
}

/// One `group N has M channels in mux P` observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxSample {
    pub group: String,
    pub channels: u32,
    pub mux: u32,
}

/// A reported number of active channels for a group (`*` for all pores).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxTotal {
    pub group: String,
    pub channels: u32,
}

/// Everything extracted from a single line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parsed {
    /// Raw timestamp text of the line.
    pub timestamp: Option<String>,
    /// Field updates in the order they appeared.
    pub updates: Vec<(String, String)>,
    /// Whether `updates` replace values that are already set.
    pub overwrite: bool,
    pub mux_samples: Vec<MuxSample>,
    pub mux_totals: Vec<MuxTotal>,
    pub event: Option<Event>,
}

impl Parsed {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
            && self.mux_samples.is_empty()
            && self.mux_totals.is_empty()
            && self.event.is_none()
    }
}

/// Compiled extraction patterns.
#[derive(Debug, Clone)]
pub struct LineParser {
    assignment: Regex,
    argument: Regex,
    context_tag: Regex,
    mux_sample: Regex,
    mux_group_total: Regex,
    mux_pore_total: Regex,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser {
    pub fn new() -> Self {
        Self {
            assignment: pattern(r"([^\s,=]+)\s*=\s*([^\s,=]+)"),
            argument: pattern(r"([^\s,]+) was set to (.+)"),
            context_tag: pattern(r"'([^\s,]+)'[:,] u?'([^\s,]+)'"),
            mux_sample: pattern(r"group ([0-9]+) has ([0-9]+) channels in mux ([0-9]+)"),
            mux_group_total: pattern(r"roup ([0-9]+) has ([0-9]+) active"),
            mux_pore_total: pattern(r"total of ([0-9]+) single pores"),
        }
    }

    /// Parse `line` read from `stream`. Unrecognised lines give an empty result.
    pub fn parse(&self, stream: Stream, line: &str) -> Parsed {
        let catalogue = match stream {
            Stream::Primary => SERVER_PHRASES,
            Stream::Secondary => BREAM_PHRASES,
        };
        let Some(phrase) = catalogue.iter().find(|p| p.matches(line)) else {
            return Parsed::default();
        };
        self.extract(phrase, line)
    }

    fn extract(&self, phrase: &Phrase, line: &str) -> Parsed {
        let mut parsed = Parsed {
            timestamp: timestamp_text(line).map(str::to_string),
            overwrite: phrase.overwrite,
            event: phrase.event,
            ..Default::default()
        };

        match phrase.extract {
            Extract::Nothing => {}
            Extract::Assignments => parsed.updates = pairs(&self.assignment, line),
            Extract::Arguments => {
                parsed.updates = self
                    .argument
                    .captures_iter(line)
                    .map(|c| (c[1].to_string(), c[2].trim().to_string()))
                    .collect();
            }
            Extract::ContextTags => {
                let mut updates = pairs(&self.context_tag, line);
                let flowcell = updates
                    .iter()
                    .find(|(k, _)| k == "filename")
                    .and_then(|(_, v)| v.split('_').nth(2))
                    .map(str::to_string);
                if let Some(flowcell_id) = flowcell {
                    updates.push(("flowcell_id".to_string(), flowcell_id));
                }
                parsed.updates = updates;
            }
            Extract::MuxSamples => {
                parsed.mux_samples = self
                    .mux_sample
                    .captures_iter(line)
                    .filter_map(|c| {
                        Some(MuxSample {
                            group: c[1].to_string(),
                            channels: c[2].parse().ok()?,
                            mux: c[3].parse().ok()?,
                        })
                    })
                    .collect();
            }
            Extract::MuxGroupTotals => {
                parsed.mux_totals = self
                    .mux_group_total
                    .captures_iter(line)
                    .filter_map(|c| {
                        Some(MuxTotal {
                            group: c[1].to_string(),
                            channels: c[2].parse().ok()?,
                        })
                    })
                    .collect();
            }
            Extract::MuxPoreTotal => {
                parsed.mux_totals = self
                    .mux_pore_total
                    .captures_iter(line)
                    .filter_map(|c| {
                        Some(MuxTotal {
                            group: "*".to_string(),
                            channels: c[1].parse().ok()?,
                        })
                    })
                    .collect();
            }
            Extract::StartTime => {
                if let Some(ts) = &parsed.timestamp {
                    parsed
                        .updates
                        .push(("sequencing_start_time".to_string(), ts.clone()));
                }
            }
        }
        parsed
    }
}

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("log phrase pattern is valid")
}

fn pairs(re: &Regex, line: &str) -> Vec<(String, String)> {
    re.captures_iter(line)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(line: &str) -> Parsed {
        LineParser::new().parse(Stream::Primary, line)
    }

    fn bream(line: &str) -> Parsed {
        LineParser::new().parse(Stream::Secondary, line)
    }

    fn value<'a>(parsed: &'a Parsed, key: &str) -> Option<&'a str> {
        parsed
            .updates
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_protocol_started_pairs() {
        let p = server(
            "2018-06-14 12:00:00.123 INFO: protocol_started (engine) run_id = R1-abc, \
             flowcell_id = FAH12345, asic_id_eeprom = E99",
        );
        assert_eq!(p.event, Some(Event::ProtocolStarted));
        assert!(p.overwrite);
        assert_eq!(p.timestamp.as_deref(), Some("2018-06-14 12:00:00.123"));
        assert_eq!(value(&p, "run_id"), Some("R1-abc"));
        assert_eq!(value(&p, "flowcell_id"), Some("FAH12345"));
        assert_eq!(value(&p, "asic_id_eeprom"), Some("E99"));
    }

    #[test]
    fn test_assignment_without_spaces() {
        let p = server("2018-06-14 12:00:00.123 [engine/info]: : data_acquisition_started run_id=R2");
        assert_eq!(value(&p, "run_id"), Some("R2"));
        assert!(p.event.is_none());
    }

    #[test]
    fn test_flowcell_events() {
        let p = server(
            "2018-06-14 12:00:00.123 [engine/info]: : flowcell_discovered asic_id = 1234, flowcell_id = FAH1",
        );
        assert_eq!(p.event, Some(Event::FlowcellDiscovered));
        assert_eq!(value(&p, "asic_id"), Some("1234"));

        let p = server("2018-06-14 12:00:00.123 [engine/info]: : flowcell_disconnected");
        assert_eq!(p.event, Some(Event::FlowcellDisconnected));
        assert!(p.updates.is_empty());

        let p = server("2018-06-14 12:00:00.123 script protocol_finished");
        assert_eq!(p.event, Some(Event::ProtocolFinished));
    }

    #[test]
    fn test_first_match_wins() {
        // Both needles appear; the earlier catalogue entry decides
        let p = server("2018-06-14 12:00:00.123 protocol_started after protocol_finished");
        assert_eq!(p.event, Some(Event::ProtocolStarted));
    }

    #[test]
    fn test_phrases_are_stream_specific() {
        let line = "2018-06-14 12:00:00.123 protocol_started run_id = R1";
        assert!(bream(line).is_empty());
        let line = "2018-06-14 12:00:00,123 - bream - INFO - STARTING MAIN LOOP";
        assert!(server(line).is_empty());
    }

    #[test]
    fn test_argument_lines() {
        let p = bream("2018-06-14 12:00:00,123 - root - INFO - argument sample was set to my sample ");
        assert!(p.overwrite);
        assert_eq!(value(&p, "sample"), Some("my sample"));
    }

    #[test]
    fn test_context_tags_derive_flowcell_id() {
        let p = bream(
            "2018-06-14 12:00:00,123 - bream - INFO - Context tags set to {'experiment_type': 'genomic_dna', \
             'filename': 'gxb01_20180614_FAH12345_GA10000_sequencing_run_x', u'sequencing_kit': u'sqk-lsk108'}",
        );
        assert!(p.overwrite);
        assert_eq!(value(&p, "experiment_type"), Some("genomic_dna"));
        assert_eq!(value(&p, "sequencing_kit"), Some("sqk-lsk108"));
        assert_eq!(value(&p, "flowcell_id"), Some("FAH12345"));
    }

    #[test]
    fn test_short_filename_gives_no_flowcell() {
        let p = bream("2018-06-14 12:00:00,123 - INFO - Adding the following context_tags: {'filename': 'a_b'}");
        assert_eq!(value(&p, "filename"), Some("a_b"));
        assert_eq!(value(&p, "flowcell_id"), None);
    }

    #[test]
    fn test_mux_samples() {
        let p = bream(
            "2018-06-14 12:00:00,123 - bream.core.base.database - INFO - group 1 has 490 channels in mux 2",
        );
        assert!(!p.overwrite);
        assert_eq!(
            p.mux_samples,
            vec![MuxSample {
                group: "1".into(),
                channels: 490,
                mux: 2
            }]
        );
    }

    #[test]
    fn test_mux_group_total_any_case() {
        let p = bream("2018-06-14 12:00:00,123 - INFO - [user message]--> Group 3 has 412 active channels");
        assert_eq!(
            p.mux_totals,
            vec![MuxTotal {
                group: "3".into(),
                channels: 412
            }]
        );
    }

    #[test]
    fn test_mux_pore_total() {
        let p = bream("2018-06-14 12:00:00,123 - INFO - [user message]--> A total of 1402 single pores were found");
        assert_eq!(p.mux_totals[0].group, "*");
        assert_eq!(p.mux_totals[0].channels, 1402);
    }

    #[test]
    fn test_secondary_events() {
        let p = bream("2018-06-14 12:00:00,123 - INFO - [user message]--> Finished Mux Scan");
        assert_eq!(p.event, Some(Event::MuxScanFinished));

        let p = bream("2018-06-14 12:00:00,123 - <class 'platform_qc.PlatformQCExperiment'> finished");
        assert_eq!(p.event, Some(Event::QcFinished));

        let p = bream("2018-06-14 12:00:00,123 - bream - INFO - STARTING MAIN LOOP");
        assert_eq!(p.event, Some(Event::SequencingStarted));
        assert!(!p.overwrite);
        assert_eq!(value(&p, "sequencing_start_time"), Some("2018-06-14 12:00:00,123"));
    }

    #[test]
    fn test_unmatched_line_is_empty() {
        let p = server("2018-06-14 12:00:00.123 heartbeat ok");
        assert!(p.is_empty());
        assert_eq!(p, Parsed::default());
    }
}
