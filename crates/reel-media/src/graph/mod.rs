//! Typed FFmpeg filter graph.
//!
//! A [`FilterGraph`] is an ordered list of [`Stage`]s. Each stage reads one or
//! more [`Pad`]s (an input slot such as `[0:v]` or a label produced by an
//! earlier stage), applies a chain of [`Filter`]s and writes exactly one
//! output [`Label`].
//!
//! [`FilterGraph::push`] enforces define-before-use and unique labels, so a
//! graph that was built successfully never references a missing stream.
//! `Display` is the only place graph text is produced.

pub mod escape;

use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Filter graph construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("label '{0}' is produced more than once")]
    DuplicateLabel(String),

    #[error("label '{0}' is used before it is produced")]
    UndefinedLabel(String),

    #[error("label '{0}' is produced but never consumed")]
    DanglingLabel(String),

    #[error("input slot {slot} out of range ({inputs} inputs)")]
    InputOutOfRange { slot: usize, inputs: usize },

    #[error("stage producing '{0}' has no filters")]
    EmptyStage(String),

    #[error("layer {0} has no planned input slot")]
    UnplannedLayer(usize),

    #[error("invalid label name '{0}'")]
    InvalidLabel(String),
}

/// Name of an intermediate stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label(String);

impl Label {
    /// Labels are restricted to `[A-Za-z0-9_]`.
    pub fn new(name: impl Into<String>) -> Result<Self, GraphError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if valid {
            Ok(Self(name))
        } else {
            Err(GraphError::InvalidLabel(name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

/// Stream type selector on an input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "v",
            StreamKind::Audio => "a",
        }
    }
}

/// A stage input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pad {
    /// Stream of an encoder input, by slot index.
    Input { slot: usize, stream: StreamKind },
    /// Output of an earlier stage.
    Label(Label),
}

impl Pad {
    pub fn video(slot: usize) -> Self {
        Pad::Input {
            slot,
            stream: StreamKind::Video,
        }
    }

    pub fn audio(slot: usize) -> Self {
        Pad::Input {
            slot,
            stream: StreamKind::Audio,
        }
    }
}

impl From<Label> for Pad {
    fn from(label: Label) -> Self {
        Pad::Label(label)
    }
}

impl From<&Label> for Pad {
    fn from(label: &Label) -> Self {
        Pad::Label(label.clone())
    }
}

impl fmt::Display for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pad::Input { slot, stream } => write!(f, "[{}:{}]", slot, stream.as_str()),
            Pad::Label(label) => label.fmt(f),
        }
    }
}

/// A single filter with positional and named parameters.
///
/// Values are written verbatim; callers escape text with [`escape`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    name: String,
    params: Vec<(Option<String>, String)>,
}

impl Filter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// A pre-formed filter chain (e.g. a style preset expression).
    pub fn raw(expression: impl Into<String>) -> Self {
        Self::new(expression)
    }

    /// Positional parameter.
    pub fn arg(mut self, value: impl ToString) -> Self {
        self.params.push((None, value.to_string()));
        self
    }

    /// Named `key=value` parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((Some(key.into()), value.to_string()));
        self
    }

    /// Named parameter wrapped in single quotes (expressions with commas).
    pub fn quoted(self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.param(key, format!("'{}'", value))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of a named parameter.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.as_deref() == Some(key))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (i, (key, value)) in self.params.iter().enumerate() {
            f.write_str(if i == 0 { "=" } else { ":" })?;
            if let Some(key) = key {
                write!(f, "{}=", key)?;
            }
            f.write_str(value)?;
        }
        Ok(())
    }
}

/// One `;`-separated graph statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub inputs: Vec<Pad>,
    pub filters: Vec<Filter>,
    pub output: Label,
}

impl Stage {
    pub fn new(inputs: Vec<Pad>, output: Label) -> Self {
        Self {
            inputs,
            filters: Vec::new(),
            output,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pad in &self.inputs {
            pad.fmt(f)?;
        }
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            filter.fmt(f)?;
        }
        self.output.fmt(f)
    }
}

/// Ordered, validated list of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGraph {
    input_count: usize,
    stages: Vec<Stage>,
    produced: HashSet<Label>,
}

impl FilterGraph {
    /// Empty graph over `input_count` encoder inputs.
    pub fn new(input_count: usize) -> Self {
        Self {
            input_count,
            stages: Vec::new(),
            produced: HashSet::new(),
        }
    }

    /// Append a stage; rejects unknown inputs and duplicate outputs.
    pub fn push(&mut self, stage: Stage) -> Result<&Label, GraphError> {
        if stage.filters.is_empty() {
            return Err(GraphError::EmptyStage(stage.output.as_str().to_string()));
        }
        for pad in &stage.inputs {
            match pad {
                Pad::Input { slot, .. } if *slot >= self.input_count => {
                    return Err(GraphError::InputOutOfRange {
                        slot: *slot,
                        inputs: self.input_count,
                    });
                }
                Pad::Label(label) if !self.produced.contains(label) => {
                    return Err(GraphError::UndefinedLabel(label.as_str().to_string()));
                }
                _ => {}
            }
        }
        if !self.produced.insert(stage.output.clone()) {
            return Err(GraphError::DuplicateLabel(
                stage.output.as_str().to_string(),
            ));
        }
        self.stages.push(stage);
        Ok(&self.stages[self.stages.len() - 1].output)
    }

    /// Check the graph terminates in `final_label` with no dangling streams.
    pub fn validate(&self, final_label: &Label) -> Result<(), GraphError> {
        if !self.produced.contains(final_label) {
            return Err(GraphError::UndefinedLabel(
                final_label.as_str().to_string(),
            ));
        }
        let consumed: HashSet<&Label> = self
            .stages
            .iter()
            .flat_map(|s| s.inputs.iter())
            .filter_map(|p| match p {
                Pad::Label(label) => Some(label),
                Pad::Input { .. } => None,
            })
            .collect();
        for stage in &self.stages {
            if &stage.output != final_label && !consumed.contains(&stage.output) {
                return Err(GraphError::DanglingLabel(
                    stage.output.as_str().to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn contains(&self, label: &Label) -> bool {
        self.produced.contains(label)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn input_count(&self) -> usize {
        self.input_count
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Display for FilterGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            stage.fmt(f)?;
        }
        Ok(())
    }
}

/// Bracketed names found in one statement of serialized graph text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageLabels {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Scan serialized graph text for stage inputs and outputs.
///
/// Backslash escapes and single-quoted sections are skipped, so escaped
/// `;`/`[` inside drawtext text never split a stage. Input-slot references
/// (`[0:v]`) are left out.
pub fn scan_labels(text: &str) -> Vec<StageLabels> {
    let mut stages = Vec::new();
    let mut current = StageLabels::default();
    let mut seen_filter = false;
    let mut chars = text.chars();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
                seen_filter = true;
            }
            '\'' => {
                quoted = !quoted;
                seen_filter = true;
            }
            _ if quoted => {}
            ';' => {
                stages.push(std::mem::take(&mut current));
                seen_filter = false;
            }
            '[' => {
                let name: String = chars.by_ref().take_while(|&c| c != ']').collect();
                if name.contains(':') {
                    continue;
                }
                if seen_filter {
                    current.outputs.push(name);
                } else {
                    current.inputs.push(name);
                }
            }
            c if c.is_whitespace() => {}
            _ => seen_filter = true,
        }
    }
    if !current.inputs.is_empty() || !current.outputs.is_empty() || seen_filter {
        stages.push(current);
    }
    stages
}

/// Labels produced anywhere in serialized graph text.
pub fn produced_labels(text: &str) -> Vec<String> {
    scan_labels(text)
        .into_iter()
        .flat_map(|s| s.outputs)
        .collect()
}

/// Define-before-use check over serialized graph text.
pub fn check_label_closure(text: &str) -> Result<(), GraphError> {
    let mut defined = HashSet::new();
    for stage in scan_labels(text) {
        for input in &stage.inputs {
            if !defined.contains(input) {
                return Err(GraphError::UndefinedLabel(input.clone()));
            }
        }
        for output in stage.outputs {
            if !defined.insert(output.clone()) {
                return Err(GraphError::DuplicateLabel(output));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(name: &str) -> Label {
        Label::new(name).unwrap()
    }

    fn two_stage_graph() -> FilterGraph {
        let mut graph = FilterGraph::new(2);
        graph
            .push(
                Stage::new(vec![Pad::video(0)], label("base"))
                    .filter(Filter::new("scale").arg(720).arg(720))
                    .filter(Filter::new("setsar").arg(1)),
            )
            .unwrap();
        graph
            .push(
                Stage::new(vec![label("base").into()], label("faded"))
                    .filter(Filter::new("fade").param("t", "out").param("st", 22).param("d", 3)),
            )
            .unwrap();
        graph
    }

    #[test]
    fn test_serialization() {
        assert_eq!(
            two_stage_graph().to_string(),
            "[0:v]scale=720:720,setsar=1[base];[base]fade=t=out:st=22:d=3[faded]"
        );
    }

    #[test]
    fn test_quoted_param() {
        let filter = Filter::new("overlay")
            .param("x", 10)
            .param("y", 20)
            .quoted("enable", "between(t,10,15)");
        assert_eq!(filter.to_string(), "overlay=x=10:y=20:enable='between(t,10,15)'");
        assert_eq!(filter.get("x"), Some("10"));
    }

    #[test]
    fn test_rejects_undefined_label() {
        let mut graph = FilterGraph::new(1);
        let err = graph
            .push(Stage::new(vec![label("ghost").into()], label("out")).filter(Filter::new("null")))
            .unwrap_err();
        assert_eq!(err, GraphError::UndefinedLabel("ghost".into()));
    }

    #[test]
    fn test_rejects_duplicate_label() {
        let mut graph = two_stage_graph();
        let err = graph
            .push(Stage::new(vec![label("faded").into()], label("base")).filter(Filter::new("null")))
            .unwrap_err();
        assert_eq!(err, GraphError::DuplicateLabel("base".into()));
    }

    #[test]
    fn test_rejects_out_of_range_slot() {
        let mut graph = FilterGraph::new(2);
        let err = graph
            .push(Stage::new(vec![Pad::video(2)], label("x")).filter(Filter::new("null")))
            .unwrap_err();
        assert_eq!(err, GraphError::InputOutOfRange { slot: 2, inputs: 2 });
    }

    #[test]
    fn test_rejects_empty_stage() {
        let mut graph = FilterGraph::new(1);
        assert!(matches!(
            graph.push(Stage::new(vec![Pad::video(0)], label("x"))),
            Err(GraphError::EmptyStage(_))
        ));
    }

    #[test]
    fn test_validate_dangling() {
        let graph = two_stage_graph();
        assert!(graph.validate(&label("faded")).is_ok());
        assert_eq!(
            graph.validate(&label("base")),
            Err(GraphError::DanglingLabel("faded".into()))
        );
        assert_eq!(
            graph.validate(&label("final")),
            Err(GraphError::UndefinedLabel("final".into()))
        );
    }

    #[test]
    fn test_label_names() {
        assert!(Label::new("img_3").is_ok());
        assert!(Label::new("").is_err());
        assert!(Label::new("a;b").is_err());
        assert!(Label::new("0:v").is_err());
    }

    #[test]
    fn test_scan_skips_escaped_text() {
        let text = "[0:v]null[base];[base]drawtext=text=a\\;b\\[x\\]:fontsize=4[t0];[t0]overlay=enable='between(t,1,2)'[final]";
        let stages = scan_labels(text);
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[1].inputs, vec!["base"]);
        assert_eq!(stages[1].outputs, vec!["t0"]);
        assert_eq!(produced_labels(text), vec!["base", "t0", "final"]);
        assert!(check_label_closure(text).is_ok());
    }

    #[test]
    fn test_closure_detects_forward_reference() {
        let text = "[late]null[a];[0:v]null[late]";
        assert_eq!(
            check_label_closure(text),
            Err(GraphError::UndefinedLabel("late".into()))
        );
    }
}
