//! Persisted record types.
//!
//! A saved run is a three-element JSON array `[flowcell, run_data, mux_scans]`,
//! the same shape the report tool reads. Field values are kept as the strings
//! they appear as in the instrument logs.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Maximum number of per-mux samples kept for one group in one scan.
pub const MAX_MUX_SAMPLES: usize = 4;

/// Groups whose samples contribute to a scan's `total`.
const COUNTED_GROUPS: [&str; 4] = ["1", "2", "3", "4"];

/// Identity of the flowcell mounted on a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowcellRecord {
    pub flowcell_id: Option<String>,
    pub asic_id: Option<String>,
    /// Stable hardware serial, the primary key component.
    pub asic_id_eeprom: Option<String>,
    #[serde(alias = "flowcell")]
    pub flowcell_type: Option<String>,
}

impl FlowcellRecord {
    /// Returns the slot for a log key, or `None` if the key is not a flowcell field.
    pub fn field_mut(&mut self, key: &str) -> Option<&mut Option<String>> {
        match key {
            "flowcell_id" => Some(&mut self.flowcell_id),
            "asic_id" => Some(&mut self.asic_id),
            "asic_id_eeprom" => Some(&mut self.asic_id_eeprom),
            "flowcell_type" | "flowcell" => Some(&mut self.flowcell_type),
            _ => None,
        }
    }
}

/// Metadata of one experiment execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Option<String>,
    /// Run title entered by the operator.
    pub user_filename_input: Option<String>,
    pub minion_id: Option<String>,
    pub sequencing_kit: Option<String>,
    pub protocol_start: Option<String>,
    pub protocol_end: Option<String>,
    /// Data directory relative to the data root.
    #[serde(rename = "relative_path", alias = "relative_data_path")]
    pub relative_data_path: Option<String>,
    pub sample: Option<String>,
    pub fastq_reads_per_file: Option<String>,
    pub experiment_type: Option<String>,

    /// Any other key the log phrases carried.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Option<String>>,
}

impl RunRecord {
    /// Creates an empty run bound to a device.
    pub fn new(minion_id: &str) -> Self {
        Self {
            minion_id: Some(minion_id.to_string()),
            ..Default::default()
        }
    }

    /// Returns the slot for a log key. Unknown keys land in `extra`.
    pub fn field_mut(&mut self, key: &str) -> &mut Option<String> {
        match key {
            "run_id" => &mut self.run_id,
            "user_filename_input" => &mut self.user_filename_input,
            "minion_id" => &mut self.minion_id,
            "sequencing_kit" => &mut self.sequencing_kit,
            "protocol_start" => &mut self.protocol_start,
            "protocol_end" => &mut self.protocol_end,
            "relative_path" | "relative_data_path" => &mut self.relative_data_path,
            "sample" => &mut self.sample,
            "fastq_reads_per_file" => &mut self.fastq_reads_per_file,
            "experiment_type" => &mut self.experiment_type,
            other => self.extra.entry(other.to_string()).or_default(),
        }
    }

    /// Platform QC runs are imported once and never reloaded.
    pub fn is_qc(&self) -> bool {
        self.experiment_type
            .as_deref()
            .is_some_and(|t| t.to_lowercase().contains("qc"))
    }

    /// Sample name, falling back to the run title.
    pub fn sample_name(&self) -> Option<&str> {
        self.sample
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.user_filename_input.as_deref())
    }
}

/// One pore-quality assessment cycle.
///
/// Serialized as a flat object: `{"timestamp": .., "1": [..], "group 1 total": n, "total": n}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Map<String, Value>", try_from = "Map<String, Value>")]
pub struct MuxScan {
    pub timestamp: Option<String>,
    /// Group label → per-mux active channel counts.
    pub groups: BTreeMap<String, Vec<u32>>,
    /// Group label → reported total of active channels.
    pub group_totals: BTreeMap<String, u32>,
    /// Set when the scan is closed.
    pub total: Option<u32>,
}

impl MuxScan {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: Some(timestamp.into()),
            ..Default::default()
        }
    }

    /// A scan stays open until its total is computed.
    pub fn is_open(&self) -> bool {
        self.total.is_none()
    }

    /// Appends a sample for `group`. Returns false once the group is full.
    pub fn push_sample(&mut self, group: &str, channels: u32) -> bool {
        let samples = self.groups.entry(group.to_string()).or_default();
        if samples.len() >= MAX_MUX_SAMPLES {
            return false;
        }
        samples.push(channels);
        true
    }

    pub fn set_group_total(&mut self, group: &str, channels: u32) {
        self.group_totals.insert(group.to_string(), channels);
    }

    pub fn group_total(&self, group: &str) -> Option<u32> {
        self.group_totals.get(group).copied()
    }

    /// Closes the scan, computing the sum of all counted group samples.
    pub fn close(&mut self) -> u32 {
        let total = COUNTED_GROUPS
            .iter()
            .filter_map(|g| self.groups.get(*g))
            .flat_map(|samples| samples.iter())
            .sum();
        self.total = Some(total);
        total
    }
}

impl From<MuxScan> for Map<String, Value> {
    fn from(scan: MuxScan) -> Self {
        let mut map = Map::new();
        if let Some(ts) = scan.timestamp {
            map.insert("timestamp".into(), Value::String(ts));
        }
        for (group, samples) in scan.groups {
            map.insert(group, Value::from(samples));
        }
        for (group, total) in scan.group_totals {
            map.insert(format!("group {} total", group), Value::from(total));
        }
        if let Some(total) = scan.total {
            map.insert("total".into(), Value::from(total));
        }
        map
    }
}

impl TryFrom<Map<String, Value>> for MuxScan {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> Result<Self, Self::Error> {
        let mut scan = MuxScan::default();
        for (key, value) in map {
            if key == "timestamp" {
                scan.timestamp = value.as_str().map(str::to_string);
            } else if key == "total" {
                scan.total = Some(count_from_value(&key, &value)?);
            } else if let Some(group) = key
                .strip_prefix("group ")
                .and_then(|k| k.strip_suffix(" total"))
            {
                scan.group_totals
                    .insert(group.to_string(), count_from_value(&key, &value)?);
            } else if let Value::Array(items) = &value {
                let samples = items
                    .iter()
                    .map(|v| count_from_value(&key, v))
                    .collect::<Result<Vec<_>, _>>()?;
                scan.groups.insert(key, samples);
            } else {
                return Err(format!("unexpected mux scan field '{}'", key));
            }
        }
        Ok(scan)
    }
}

/// Older records stored counts as the strings captured from the log.
fn count_from_value(key: &str, value: &Value) -> Result<u32, String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| format!("'{}' is not a channel count: {}", key, n)),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| format!("'{}' is not a channel count: {}", key, s)),
        other => Err(format!("'{}' is not a channel count: {}", key, other)),
    }
}

/// A completed run as stored in the run database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunEntry {
    pub flowcell: FlowcellRecord,
    pub run_data: RunRecord,
    pub mux_scans: Vec<MuxScan>,
}

impl RunEntry {
    /// Database key `(asic_id_eeprom, run_id)`, if both are known.
    pub fn key(&self) -> Option<(&str, &str)> {
        Some((
            self.flowcell.asic_id_eeprom.as_deref()?,
            self.run_data.run_id.as_deref()?,
        ))
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        let (flowcell, run_data, mux_scans): (FlowcellRecord, RunRecord, Vec<MuxScan>) =
            serde_json::from_str(content)?;
        Ok(Self {
            flowcell,
            run_data,
            mux_scans,
        })
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Written as the `[flowcell, run_data, mux_scans]` triple of the record files.
impl Serialize for RunEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.flowcell, &self.run_data, &self.mux_scans).serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mux_scan_total_sums_all_groups() {
        let mut scan = MuxScan::new("2018-06-14 10:00:00.000");
        for n in [2, 3, 4, 1] {
            assert!(scan.push_sample("1", n));
        }
        scan.push_sample("2", 5);
        assert!(scan.is_open());
        assert_eq!(scan.close(), 15);
        assert_eq!(scan.total, Some(15));
        assert!(!scan.is_open());
    }

    #[test]
    fn test_mux_scan_caps_samples_per_group() {
        let mut scan = MuxScan::default();
        for n in 0..MAX_MUX_SAMPLES as u32 {
            assert!(scan.push_sample("3", n));
        }
        assert!(!scan.push_sample("3", 99));
        assert_eq!(scan.groups["3"].len(), MAX_MUX_SAMPLES);
    }

    #[test]
    fn test_mux_scan_star_group_not_counted() {
        let mut scan = MuxScan::default();
        scan.push_sample("*", 500);
        scan.push_sample("1", 10);
        scan.set_group_total("*", 500);
        assert_eq!(scan.close(), 10);
        assert_eq!(scan.group_total("*"), Some(500));
    }

    #[test]
    fn test_mux_scan_flat_json_shape() {
        let mut scan = MuxScan::new("ts");
        scan.push_sample("1", 7);
        scan.set_group_total("1", 7);
        scan.close();

        let value = serde_json::to_value(&scan).unwrap();
        assert_eq!(value["timestamp"], "ts");
        assert_eq!(value["1"], serde_json::json!([7]));
        assert_eq!(value["group 1 total"], 7);
        assert_eq!(value["total"], 7);
    }

    #[test]
    fn test_mux_scan_accepts_string_counts() {
        let json = r#"{"timestamp": "ts", "group * total": "412", "1": [100, 90]}"#;
        let scan: MuxScan = serde_json::from_str(json).unwrap();
        assert_eq!(scan.group_total("*"), Some(412));
        assert_eq!(scan.groups["1"], vec![100, 90]);
        assert!(scan.is_open());
    }

    #[test]
    fn test_mux_scan_rejects_garbage_count() {
        let json = r#"{"group 1 total": "lots"}"#;
        assert!(serde_json::from_str::<MuxScan>(json).is_err());
    }

    #[test]
    fn test_run_record_unknown_keys_go_to_extra() {
        let mut run = RunRecord::new("GA10000");
        *run.field_mut("sequencing_start_time") = Some("t0".into());
        *run.field_mut("run_id") = Some("R1".into());
        assert_eq!(run.run_id.as_deref(), Some("R1"));
        assert_eq!(run.extra["sequencing_start_time"].as_deref(), Some("t0"));

        let value = serde_json::to_value(&run).unwrap();
        assert_eq!(value["sequencing_start_time"], "t0");
        assert_eq!(value["minion_id"], "GA10000");
    }

    #[test]
    fn test_legacy_keys_are_accepted() {
        let json = r#"[
            {"flowcell_id": "FAH1", "asic_id": "1", "asic_id_eeprom": "E1", "flowcell": "FLO-MIN106"},
            {"run_id": "R1", "relative_path": "a/b/c", "experiment_type": "sequencing"},
            []
        ]"#;
        let entry = RunEntry::from_json(json).unwrap();
        assert_eq!(entry.flowcell.flowcell_type.as_deref(), Some("FLO-MIN106"));
        assert_eq!(entry.run_data.relative_data_path.as_deref(), Some("a/b/c"));
        assert_eq!(entry.key(), Some(("E1", "R1")));
        assert!(!entry.run_data.is_qc());
    }

    #[test]
    fn test_entry_json_is_three_element_array() {
        let entry = RunEntry {
            flowcell: FlowcellRecord::default(),
            run_data: RunRecord::new("GA20000"),
            mux_scans: vec![MuxScan::new("ts")],
        };
        let value: Value = serde_json::from_str(&entry.to_json_pretty().unwrap()).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(3));
        assert_eq!(RunEntry::from_json(&value.to_string()).unwrap(), entry);
    }

    #[test]
    fn test_is_qc_and_sample_name() {
        let mut run = RunRecord::new("GA10000");
        run.experiment_type = Some("platform_QC".into());
        assert!(run.is_qc());

        run.user_filename_input = Some("title".into());
        assert_eq!(run.sample_name(), Some("title"));
        run.sample = Some("s1".into());
        assert_eq!(run.sample_name(), Some("s1"));
    }
}
