use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use crate::span::{NodeId, Span};

/// A secondary location attached to an error, e.g. the other side of a
/// type mismatch or the sub-expression that defeated a delay proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Note {
    pub msg: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("type error: {msg}")]
    Type { msg: String, span: Span, notes: Vec<Note> },

    #[error("timing error: {msg}")]
    Timing { msg: String, span: Span, notes: Vec<Note> },

    #[error("control-flow error: {msg}")]
    ControlFlow { msg: String, span: Span, notes: Vec<Note> },

    #[error("name error: {msg}")]
    Name { msg: String, span: Span, notes: Vec<Note> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Type,
    Timing,
    ControlFlow,
    Name,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Type => write!(f, "type"),
            ErrorKind::Timing => write!(f, "timing"),
            ErrorKind::ControlFlow => write!(f, "control-flow"),
            ErrorKind::Name => write!(f, "name"),
        }
    }
}

impl CompileError {
    pub fn type_err(msg: impl Into<String>, span: Span) -> Self {
        Self::Type { msg: msg.into(), span, notes: Vec::new() }
    }

    pub fn timing(msg: impl Into<String>, span: Span) -> Self {
        Self::Timing { msg: msg.into(), span, notes: Vec::new() }
    }

    pub fn control_flow(msg: impl Into<String>, span: Span) -> Self {
        Self::ControlFlow { msg: msg.into(), span, notes: Vec::new() }
    }

    pub fn name(msg: impl Into<String>, span: Span) -> Self {
        Self::Name { msg: msg.into(), span, notes: Vec::new() }
    }

    /// Attach a note pointing at a related location.
    pub fn with_note(mut self, msg: impl Into<String>, span: Span) -> Self {
        let note = Note { msg: msg.into(), span };
        match &mut self {
            CompileError::Type { notes, .. }
            | CompileError::Timing { notes, .. }
            | CompileError::ControlFlow { notes, .. }
            | CompileError::Name { notes, .. } => notes.push(note),
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::Type { .. } => ErrorKind::Type,
            CompileError::Timing { .. } => ErrorKind::Timing,
            CompileError::ControlFlow { .. } => ErrorKind::ControlFlow,
            CompileError::Name { .. } => ErrorKind::Name,
        }
    }

    pub fn msg(&self) -> &str {
        match self {
            CompileError::Type { msg, .. }
            | CompileError::Timing { msg, .. }
            | CompileError::ControlFlow { msg, .. }
            | CompileError::Name { msg, .. } => msg,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            CompileError::Type { span, .. }
            | CompileError::Timing { span, .. }
            | CompileError::ControlFlow { span, .. }
            | CompileError::Name { span, .. } => *span,
        }
    }

    pub fn notes(&self) -> &[Note] {
        match self {
            CompileError::Type { notes, .. }
            | CompileError::Timing { notes, .. }
            | CompileError::ControlFlow { notes, .. }
            | CompileError::Name { notes, .. } => notes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Note,
}

/// One record of the diagnostics channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: ErrorKind,
    pub span: Span,
    pub message: String,
    /// The function whose compilation this record abandons, if any.
    pub function: Option<NodeId>,
}

/// Ordered diagnostics sink shared by all passes.
///
/// An error recorded against a function marks it failed; later passes skip
/// failed functions but keep processing the rest of the module.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    records: Vec<Diagnostic>,
    failed: BTreeSet<NodeId>,
    module_failed: bool,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, function: Option<NodeId>, err: CompileError) {
        tracing::debug!(kind = %err.kind(), function = ?function, "{}", err.msg());
        match function {
            Some(f) => {
                self.failed.insert(f);
            }
            None => self.module_failed = true,
        }
        let kind = err.kind();
        self.records.push(Diagnostic {
            severity: Severity::Error,
            kind,
            span: err.span(),
            message: err.msg().to_string(),
            function,
        });
        for note in err.notes() {
            self.records.push(Diagnostic {
                severity: Severity::Note,
                kind,
                span: note.span,
                message: note.msg.clone(),
                function,
            });
        }
    }

    /// Mark a function failed without recording a new error, used when a
    /// function is abandoned because something it depends on failed.
    pub fn abandon(&mut self, function: NodeId) {
        self.failed.insert(function);
    }

    pub fn is_failed(&self, function: NodeId) -> bool {
        self.failed.contains(&function)
    }

    pub fn failed_functions(&self) -> &BTreeSet<NodeId> {
        &self.failed
    }

    /// True when an error was recorded outside any function (module-level code).
    pub fn module_failed(&self) -> bool {
        self.module_failed
    }

    pub fn has_errors(&self) -> bool {
        self.records.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.records.iter().filter(|d| d.severity == Severity::Error).count()
    }

    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.records.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn into_records(self) -> Vec<Diagnostic> {
        self.records
    }
}

/// Render diagnostics as plain text, one line per record.
///
/// Used where no source text is available and by snapshot tests.
pub fn render_plain(records: &[Diagnostic]) -> String {
    let mut out = String::new();
    for d in records {
        match d.severity {
            Severity::Error => {
                out.push_str(&format!(
                    "error[{}] {}..{}: {}\n",
                    d.kind, d.span.start, d.span.end, d.message
                ));
            }
            Severity::Note => {
                out.push_str(&format!("  note {}..{}: {}\n", d.span.start, d.span.end, d.message));
            }
        }
    }
    out
}

/// Render diagnostics with ariadne against the module source.
///
/// Each error becomes one report; the notes that follow it become secondary
/// labels of that report.
pub fn render(source: &str, records: &[Diagnostic]) -> String {
    use ariadne::{Config, Label, Report, ReportKind, Source};

    let mut out = Vec::new();
    let mut i = 0;
    while i < records.len() {
        let d = &records[i];
        i += 1;
        if d.severity != Severity::Error {
            continue;
        }
        let mut report = Report::build(ReportKind::Error, (), d.span.start)
            .with_config(Config::default().with_color(false))
            .with_message(format!("{} error", d.kind))
            .with_label(Label::new(d.span.start..d.span.end).with_message(&d.message));
        while i < records.len() && records[i].severity == Severity::Note {
            let note = &records[i];
            report = report.with_label(Label::new(note.span.start..note.span.end).with_message(&note.message));
            i += 1;
        }
        if report.finish().write(Source::from(source), &mut out).is_err() {
            out.extend_from_slice(format!("error[{}]: {}\n", d.kind, d.message).as_bytes());
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_marks_function_failed() {
        let mut diags = Diagnostics::new();
        diags.push(Some(NodeId(4)), CompileError::type_err("mismatch", Span::new(1, 2)));
        assert!(diags.is_failed(NodeId(4)));
        assert!(!diags.is_failed(NodeId(5)));
        assert!(!diags.module_failed());
        assert_eq!(diags.error_count(), 1);
    }

    #[test]
    fn notes_follow_their_error() {
        let mut diags = Diagnostics::new();
        let err = CompileError::timing("cannot interleave", Span::new(0, 4))
            .with_note("called here", Span::new(10, 12));
        diags.push(None, err);
        let records = diags.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].severity, Severity::Error);
        assert_eq!(records[1].severity, Severity::Note);
        assert_eq!(records[1].kind, ErrorKind::Timing);
        assert!(diags.module_failed());
    }

    #[test]
    fn plain_rendering() {
        let mut diags = Diagnostics::new();
        diags.push(
            None,
            CompileError::name("duplicate parameter 'x'", Span::new(3, 4)).with_note("first defined here", Span::new(1, 2)),
        );
        assert_eq!(
            render_plain(diags.records()),
            "error[name] 3..4: duplicate parameter 'x'\n  note 1..2: first defined here\n"
        );
    }

    #[test]
    fn error_display_includes_kind() {
        let err = CompileError::control_flow("bad arity", Span::dummy());
        assert_eq!(err.to_string(), "control-flow error: bad arity");
        assert_eq!(err.kind(), ErrorKind::ControlFlow);
    }

    #[test]
    fn ariadne_rendering_mentions_message() {
        let mut diags = Diagnostics::new();
        diags.push(None, CompileError::type_err("cannot unify int with str", Span::new(0, 5)));
        let text = render("x = 1 + 'a'\n", diags.records());
        assert!(text.contains("type error"));
        assert!(text.contains("cannot unify int with str"));
    }
}
