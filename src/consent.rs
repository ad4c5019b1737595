//! License consent before any dataset is fetched.

use std::io::{self, BufRead, Write};

use camino::Utf8Path;
use crossterm::tty::IsTty;
use tracing::error;

use crate::error::OdsError;
use crate::manifest::ResourceMeta;
use crate::progress::{ProgressEvent, ProgressSink};

pub const CONSENT_QUESTION: &str = "Do you wish to proceed with the download? [yes/no]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    Unrecognized(String),
}

impl Answer {
    pub fn parse(input: &str) -> Self {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "yes" | "y" => Answer::Yes,
            "no" | "n" => Answer::No,
            _ => Answer::Unrecognized(input.trim().to_string()),
        }
    }
}

/// Asks the user a yes/no question. Returns `ConsentUnavailable` when no
/// answer can be read at all.
pub trait Prompt {
    fn ask(&mut self, dataset: &str, question: &str) -> Result<Answer, OdsError>;
}

impl<F> Prompt for F
where
    F: FnMut(&str, &str) -> Result<Answer, OdsError>,
{
    fn ask(&mut self, dataset: &str, question: &str) -> Result<Answer, OdsError> {
        self(dataset, question)
    }
}

/// Reads the answer from standard input; refuses when stdin is not a terminal.
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&mut self, dataset: &str, question: &str) -> Result<Answer, OdsError> {
        let stdin = io::stdin();
        if !stdin.is_tty() {
            return Err(unavailable(dataset, "stdin is not a terminal"));
        }
        // stdout is reserved for JSON output.
        let mut stderr = io::stderr();
        writeln!(stderr, "{question}").map_err(|err| unavailable(dataset, &err.to_string()))?;
        stderr
            .flush()
            .map_err(|err| unavailable(dataset, &err.to_string()))?;

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => Err(unavailable(dataset, "end of input")),
            Ok(_) => Ok(Answer::parse(&line)),
            Err(err) => Err(unavailable(dataset, &err.to_string())),
        }
    }
}

fn unavailable(dataset: &str, reason: &str) -> OdsError {
    error!(
        dataset,
        reason,
        "stdin is not available for consent; set override_manual_authorize=true to proceed with the download"
    );
    OdsError::ConsentUnavailable(dataset.to_string())
}

/// Decides whether a dataset may be fetched.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsentGate {
    override_manual_authorize: bool,
}

impl ConsentGate {
    pub fn new(override_manual_authorize: bool) -> Self {
        Self {
            override_manual_authorize,
        }
    }

    pub fn is_overridden(&self) -> bool {
        self.override_manual_authorize
    }

    pub fn authorize(
        &self,
        dataset: &str,
        meta: &ResourceMeta,
        location: &Utf8Path,
        prompt: &mut dyn Prompt,
        sink: &dyn ProgressSink,
    ) -> Result<bool, OdsError> {
        for line in notice_lines(dataset, meta, location, self.override_manual_authorize) {
            sink.event(ProgressEvent::Notice(line));
        }
        if self.override_manual_authorize {
            return Ok(true);
        }
        loop {
            match prompt.ask(dataset, CONSENT_QUESTION)? {
                Answer::Yes => return Ok(true),
                Answer::No => return Ok(false),
                Answer::Unrecognized(response) => {
                    sink.event(ProgressEvent::Notice(format!(
                        "Your response was {response:?}. Please respond with 'yes', 'y' or 'no', 'n'"
                    )));
                }
            }
        }
    }
}

/// Text shown before consent is requested.
pub fn notice_lines(
    dataset: &str,
    meta: &ResourceMeta,
    location: &Utf8Path,
    overridden: bool,
) -> Vec<String> {
    let mut lines = vec![format!("Acquiring resource: {dataset}"), String::new()];
    lines.push("Details of data:".to_string());
    lines.push(meta.details.clone().unwrap_or_default());
    lines.push(String::new());
    if let Some(citation) = meta.citation.as_deref().filter(|c| !c.is_empty()) {
        lines.push("Please cite:".to_string());
        lines.push(citation.to_string());
        lines.push(String::new());
    }
    if let Some(size) = meta.size.filter(|size| *size > 0) {
        lines.push(format!(
            "After downloading the data will take up {size} bytes of space."
        ));
        lines.push(String::new());
    }
    lines.push(format!("Data will be stored in {location}."));
    lines.push(String::new());
    if let Some(license) = meta.license.as_deref().filter(|l| !l.is_empty()) {
        if overridden {
            lines.push("You have agreed to the following license:".to_string());
        } else {
            lines.push("You must also agree to the following license:".to_string());
        }
        lines.push(license.to_string());
        lines.push(String::new());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_answers() {
        assert_eq!(Answer::parse("Y\n"), Answer::Yes);
        assert_eq!(Answer::parse(" yes "), Answer::Yes);
        assert_eq!(Answer::parse("N"), Answer::No);
        assert_eq!(
            Answer::parse("maybe"),
            Answer::Unrecognized("maybe".to_string())
        );
        assert_eq!(Answer::parse(""), Answer::Unrecognized(String::new()));
    }

    #[test]
    fn notice_wording_depends_on_override() {
        let meta = ResourceMeta {
            license: Some("CC-BY".to_string()),
            citation: None,
            size: Some(0),
            details: Some("details".to_string()),
        };
        let location = Utf8Path::new("/data/x");
        let prompted = notice_lines("x", &meta, location, false);
        assert!(prompted.iter().any(|l| l == "You must also agree to the following license:"));
        assert!(!prompted.iter().any(|l| l.starts_with("Please cite")));
        assert!(!prompted.iter().any(|l| l.contains("bytes of space")));

        let overridden = notice_lines("x", &meta, location, true);
        assert!(overridden.iter().any(|l| l == "You have agreed to the following license:"));
    }
}
