//! Parser for act's `--json` log stream.
//!
//! Each stdout line is a logrus JSON record. Lines that do not parse (act's
//! own non-JSON chatter, partial writes) are counted and skipped.

use std::collections::BTreeMap;
use std::io::{self, BufRead};

use serde::{Deserialize, Deserializer};

use super::result::{Annotation, AnnotationLevel, RunResult, Summary};
use crate::util::strip_uuids;

/// Prefix wrapped steps print before each line of their step summary.
pub const SUMMARY_MARKER: &str = "wfkit-summary::";

/// Target act's records are re-emitted on.
pub const ACT_LOG_TARGET: &str = "wfkit::act";

/// One act log record. Only the fields the collector reads are modelled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogRecord {
    #[serde(default)]
    pub level: String,
    #[serde(default)]
    pub msg: String,
    /// Display name, which for generated workflows contains the run id.
    #[serde(default)]
    pub job: String,
    #[serde(rename = "jobID", default)]
    pub job_id: String,
    /// Step id chain, outermost first.
    #[serde(rename = "stepID", default, deserialize_with = "null_as_default")]
    pub step_id: Vec<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arg: Option<String>,
    #[serde(rename = "kvPairs", default, deserialize_with = "null_as_default")]
    pub kv_pairs: BTreeMap<String, String>,
    #[serde(default)]
    pub raw_output: bool,
    #[serde(rename = "jobResult", default)]
    pub job_result: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl LogRecord {
    /// Job key outputs and results are filed under: the job id when act
    /// reports one, the cleaned display name otherwise.
    pub fn job_key(&self) -> String {
        if self.job_id.is_empty() {
            strip_uuids(&self.job)
        } else {
            self.job_id.clone()
        }
    }

    /// Outermost step id. Outputs set inside composite actions collapse onto it.
    pub fn step_key(&self) -> &str {
        self.step_id.first().map(String::as_str).unwrap_or_default()
    }
}

/// Builds a [`RunResult`] (minus `success`) from log records.
#[derive(Debug, Default)]
pub struct LogCollector {
    result: RunResult,
    records: usize,
    malformed: usize,
}

impl LogCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and apply one line of output.
    pub fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<LogRecord>(line) {
            Ok(record) => self.handle_record(record),
            Err(err) => {
                self.malformed += 1;
                tracing::debug!(target: ACT_LOG_TARGET, error = %err, line, "unparseable act log line");
            }
        }
    }

    pub fn handle_record(&mut self, record: LogRecord) {
        self.records += 1;
        tracing::info!(
            target: ACT_LOG_TARGET,
            job = %strip_uuids(&record.job),
            "{}",
            record.msg.trim_end()
        );

        let job = record.job_key();

        if let Some(result) = &record.job_result {
            self.result.job_results.insert(job.clone(), result.clone());
        }

        match record.command.as_deref() {
            Some("set-output") => {
                if let (Some(name), Some(value)) = (&record.name, &record.arg) {
                    self.result
                        .outputs
                        .insert(&job, record.step_key(), name, value.clone());
                }
            }
            Some(command) => {
                if let Some(level) = AnnotationLevel::from_command(command) {
                    self.result.annotations.push(Annotation {
                        level,
                        title: record.kv_pairs.get("title").cloned().unwrap_or_default(),
                        message: record.arg.clone().unwrap_or_default(),
                    });
                }
            }
            None => {
                if let Some(pos) = record.msg.find(SUMMARY_MARKER) {
                    let text = record.msg[pos + SUMMARY_MARKER.len()..].trim_end_matches(['\r', '\n']);
                    self.push_summary(job, record.step_key(), text);
                }
            }
        }
    }

    fn push_summary(&mut self, job: String, step: &str, text: &str) {
        let summaries = &mut self.result.summaries;
        match summaries
            .iter_mut()
            .find(|s| s.job == job && s.step == step)
        {
            Some(existing) => {
                existing.text.push('\n');
                existing.text.push_str(text);
            }
            None => summaries.push(Summary {
                job,
                step: step.to_string(),
                text: text.to_string(),
            }),
        }
    }

    /// Read `reader` to the end, applying every line. Invalid UTF-8 is
    /// replaced rather than treated as an error.
    pub fn consume<R: BufRead>(&mut self, mut reader: R) -> io::Result<()> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                return Ok(());
            }
            self.handle_line(&String::from_utf8_lossy(&buf));
        }
    }

    /// Records applied so far.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Lines skipped because they were not JSON records.
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    /// The collected result; `success` is left for the caller to set.
    pub fn finish(self) -> RunResult {
        self.result
    }
}
