//! Newline-delimited observation/decision traces.
//!
//! Each line is one JSON object `{"In": [..], "Out": bool}`. Readers stop at the
//! first record that fails to parse, so a truncated trailing line is ignored.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use thiserror::Error;

/// One recorded decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(rename = "In")]
    pub input: Vec<f64>,
    #[serde(rename = "Out")]
    pub output: bool,
}

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("trace encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Appends traces to any writer, flushing after every record.
#[derive(Debug)]
pub struct TraceWriter<W: Write> {
    out: W,
}

impl<W: Write> TraceWriter<W> {
    #[must_use]
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn append(&mut self, trace: &Trace) -> Result<(), TraceError> {
        serde_json::to_writer(&mut self.out, trace)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Read traces until end of input or the first malformed record.
pub fn read_traces<R: Read>(reader: R) -> Vec<Trace> {
    serde_json::Deserializer::from_reader(reader)
        .into_iter::<Trace>()
        .map_while(Result::ok)
        .collect()
}

/// Open and read a trace file.
pub fn load_traces(path: impl AsRef<Path>) -> Result<Vec<Trace>, TraceError> {
    let file = File::open(path)?;
    Ok(read_traces(BufReader::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_emits_one_record_per_line() {
        let mut writer = TraceWriter::new(Vec::new());
        writer
            .append(&Trace {
                input: vec![0.5, -0.25],
                output: true,
            })
            .unwrap();
        writer
            .append(&Trace {
                input: vec![1.0],
                output: false,
            })
            .unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines, vec![r#"{"In":[0.5,-0.25],"Out":true}"#, r#"{"In":[1.0],"Out":false}"#]);
    }

    #[test]
    fn reader_stops_at_first_malformed_record() {
        let input = concat!(
            "{\"In\":[1.0,2.0],\"Out\":true}\n",
            "{\"In\":[3.0],\"Out\":false}\n",
            "{\"In\":\"oops\",\"Out\":true}\n",
            "{\"In\":[4.0],\"Out\":true}\n",
        );
        let traces = read_traces(input.as_bytes());
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[1].input, vec![3.0]);
    }

    #[test]
    fn reader_accepts_integer_inputs_and_truncated_tail() {
        let input = "{\"In\":[1,2],\"Out\":false}\n{\"In\":[3";
        let traces = read_traces(input.as_bytes());
        assert_eq!(traces, vec![Trace { input: vec![1.0, 2.0], output: false }]);
    }
}
