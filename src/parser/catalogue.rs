//! The phrases recognised in each log stream, in match order.

use super::Event;

/// How values are pulled out of a matched line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Extract {
    Nothing,
    /// `key = value` pairs.
    Assignments,
    /// `key was set to value`.
    Arguments,
    /// `'key': 'value'` pairs.
    ContextTags,
    /// `group N has M channels in mux P`.
    MuxSamples,
    /// `group N has M active`.
    MuxGroupTotals,
    /// `total of M single pores`, recorded under group `*`.
    MuxPoreTotal,
    /// The line's own timestamp as `sequencing_start_time`.
    StartTime,
}

#[derive(Debug)]
pub(super) struct Phrase {
    pub needles: &'static [&'static str],
    pub ignore_case: bool,
    pub extract: Extract,
    pub overwrite: bool,
    pub event: Option<Event>,
}

impl Phrase {
    pub fn matches(&self, line: &str) -> bool {
        if self.ignore_case {
            let lower = line.to_lowercase();
            self.needles.iter().any(|n| lower.contains(n))
        } else {
            self.needles.iter().any(|n| line.contains(n))
        }
    }
}

pub(super) const SERVER_PHRASES: &[Phrase] = &[
    Phrase {
        needles: &["protocol_started"],
        ignore_case: false,
        extract: Extract::Assignments,
        overwrite: true,
        event: Some(Event::ProtocolStarted),
    },
    Phrase {
        needles: &["protocol_finished"],
        ignore_case: false,
        extract: Extract::Nothing,
        overwrite: false,
        event: Some(Event::ProtocolFinished),
    },
    Phrase {
        needles: &["[engine/info]: : flowcell_discovered"],
        ignore_case: false,
        extract: Extract::Assignments,
        overwrite: true,
        event: Some(Event::FlowcellDiscovered),
    },
    Phrase {
        needles: &["[engine/info]: : data_acquisition_started"],
        ignore_case: false,
        extract: Extract::Assignments,
        overwrite: true,
        event: None,
    },
    Phrase {
        needles: &["flowcell_disconnected"],
        ignore_case: false,
        extract: Extract::Nothing,
        overwrite: false,
        event: Some(Event::FlowcellDisconnected),
    },
];

pub(super) const BREAM_PHRASES: &[Phrase] = &[
    Phrase {
        needles: &["root - INFO - argument"],
        ignore_case: false,
        extract: Extract::Arguments,
        overwrite: true,
        event: None,
    },
    Phrase {
        needles: &[
            "INFO - Adding the following context_tags:",
            "INFO - Context tags set to",
        ],
        ignore_case: false,
        extract: Extract::ContextTags,
        overwrite: true,
        event: None,
    },
    Phrase {
        needles: &["bream.core.base.database - INFO - group"],
        ignore_case: false,
        extract: Extract::MuxSamples,
        overwrite: false,
        event: None,
    },
    // Lowercase needle, compared against the lowercased line
    Phrase {
        needles: &["[user message]--> group "],
        ignore_case: true,
        extract: Extract::MuxGroupTotals,
        overwrite: false,
        event: None,
    },
    Phrase {
        needles: &["[user message]--> A total of"],
        ignore_case: false,
        extract: Extract::MuxPoreTotal,
        overwrite: false,
        event: None,
    },
    Phrase {
        needles: &["INFO - [user message]--> Finished Mux Scan"],
        ignore_case: false,
        extract: Extract::Nothing,
        overwrite: false,
        event: Some(Event::MuxScanFinished),
    },
    Phrase {
        needles: &["platform_qc.PlatformQCExperiment'> finished"],
        ignore_case: false,
        extract: Extract::Nothing,
        overwrite: false,
        event: Some(Event::QcFinished),
    },
    Phrase {
        needles: &["INFO - STARTING MAIN LOOP"],
        ignore_case: false,
        extract: Extract::StartTime,
        overwrite: false,
        event: Some(Event::SequencingStarted),
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_needles_are_lowercase() {
        for phrase in SERVER_PHRASES.iter().chain(BREAM_PHRASES) {
            if phrase.ignore_case {
                for needle in phrase.needles {
                    assert_eq!(*needle, needle.to_lowercase());
                }
            }
        }
    }

    #[test]
    fn test_only_field_phrases_overwrite() {
        for phrase in SERVER_PHRASES.iter().chain(BREAM_PHRASES) {
            if phrase.overwrite {
                assert!(matches!(
                    phrase.extract,
                    Extract::Assignments | Extract::Arguments | Extract::ContextTags
                ));
            }
        }
    }
}
