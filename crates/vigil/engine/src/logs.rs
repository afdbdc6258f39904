//! Log line ingress.
//!
//! Turns raw log lines into count records so log volume per event type can be
//! windowed and scored like any other metric. Lines are matched against known
//! event templates (`<*>` marks a variable token); unmatched lines are counted
//! per level on a separate series. Unmatched shapes that keep recurring are
//! promoted to templates of their own by the [`TemplateMiner`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vigil_types::{Record, SeriesKey};

use crate::config::LogIngressConfig;
use crate::error::{LogError, LogResult};

/// Series name for lines matching a known template.
pub const EVENTS_SERIES: &str = "log.events";

/// Series name for lines matching no template.
pub const UNKNOWN_SERIES: &str = "log.unknown";

const WILDCARD: &str = "<*>";

/// Variable-token masks, applied in order to lowercased text.
const MASKS: &[(&str, &str)] = &[
    (r"\d{4}-\d{2}-\d{2}", "<DATE>"),
    (r"\d{2}-\d{2}-\d{2}", "<DATE>"),
    (r"\d{2}/[a-z]{3}/\d{4}", "<DATE>"),
    (r"\d{2}:\d{2}:\d{2}", "<TIME>"),
    (r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b", "<IP>"),
    (
        r"[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}",
        "<ID>",
    ),
    (r"\b[a-z0-9._-]*mesos[-_]slave[-_]*\d+\b", "<HOST>"),
    (r"\b[a-z0-9._-]*node[-_]*\d+\b", "<HOST>"),
    (r"/(?:[\w.-]+/)*[\w.-]+", "<PATH>"),
    (r"\d+\.\d+", "<NUM>"),
    (r"\d+", "<NUM>"),
];

/// Masks variable tokens out of log text.
#[derive(Debug, Clone)]
pub struct LogNormalizer {
    masks: Vec<(Regex, &'static str)>,
}

impl LogNormalizer {
    pub fn new() -> LogResult<Self> {
        let masks = MASKS
            .iter()
            .map(|(pattern, label)| Ok((Regex::new(pattern)?, *label)))
            .collect::<LogResult<Vec<_>>>()?;
        Ok(Self { masks })
    }

    /// Lowercase and replace variable tokens with typed placeholders.
    pub fn normalize(&self, text: &str) -> String {
        self.masks
            .iter()
            .fold(text.to_lowercase(), |acc, (re, label)| {
                re.replace_all(&acc, *label).into_owned()
            })
    }

    /// Lowercase and replace variable tokens with `<*>`, collapsing runs of
    /// wildcard tokens into one.
    pub fn to_template(&self, text: &str) -> String {
        let masked = self
            .masks
            .iter()
            .fold(text.to_lowercase(), |acc, (re, _)| {
                re.replace_all(&acc, WILDCARD).into_owned()
            });

        let mut tokens: Vec<&str> = Vec::new();
        for token in masked.split_whitespace() {
            if token == WILDCARD && tokens.last() == Some(&WILDCARD) {
                continue;
            }
            tokens.push(token);
        }
        tokens.join(" ")
    }
}

/// A known event shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub event_id: String,
    pub template: String,
    #[serde(default)]
    pub abnormal: bool,
}

/// Matches lines against templates compiled once at construction.
#[derive(Debug, Clone)]
pub struct TemplateMatcher {
    compiled: Vec<(EventTemplate, Regex)>,
}

impl TemplateMatcher {
    pub fn new(templates: Vec<EventTemplate>) -> LogResult<Self> {
        let compiled = templates
            .into_iter()
            .map(|t| {
                let regex = compile_template(&t.template).map_err(|source| {
                    LogError::InvalidTemplate {
                        event_id: t.event_id.clone(),
                        source,
                    }
                })?;
                Ok((t, regex))
            })
            .collect::<LogResult<Vec<_>>>()?;
        Ok(Self { compiled })
    }

    /// First template matching at the start of `content`.
    pub fn find(&self, content: &str) -> Option<&EventTemplate> {
        let content = content.to_lowercase();
        self.compiled
            .iter()
            .find(|(_, re)| re.is_match(&content))
            .map(|(t, _)| t)
    }

    /// Add a template after construction; it is tried after existing ones.
    pub fn push(&mut self, template: EventTemplate) -> LogResult<()> {
        let regex =
            compile_template(&template.template).map_err(|source| LogError::InvalidTemplate {
                event_id: template.event_id.clone(),
                source,
            })?;
        self.compiled.push((template, regex));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

/// `<*>` matches one whitespace-free token; everything else is literal.
fn compile_template(template: &str) -> Result<Regex, regex::Error> {
    let escaped = regex::escape(&template.trim().to_lowercase());
    let pattern = escaped.replace(&regex::escape(WILDCARD), r"([^ ]+)");
    Regex::new(&format!("^{pattern}"))
}

/// Share of `<*>` tokens in a template; an empty template counts as all wildcard.
fn wildcard_ratio(template: &str) -> f64 {
    let tokens: Vec<&str> = template.split_whitespace().collect();
    if tokens.is_empty() {
        return 1.0;
    }
    let wildcards = tokens.iter().filter(|t| **t == WILDCARD).count();
    wildcards as f64 / tokens.len() as f64
}

/// What the miner made of one unmatched shape.
#[derive(Debug, Clone, PartialEq)]
pub enum MinedShape {
    /// Seen, not yet often enough.
    Pending,
    /// Mostly wildcards, or the pending table is full.
    Ignored,
    /// Crossed the sample threshold with this line.
    Promoted(EventTemplate),
    /// Promoted earlier.
    Known(EventTemplate),
}

/// Groups unmatched lines by their `<*>` shape and promotes recurring shapes
/// to abnormal event templates with ids `M1`, `M2`, ...
#[derive(Debug, Clone)]
pub struct TemplateMiner {
    min_samples: usize,
    max_wildcard_ratio: f64,
    max_pending: usize,
    pending: HashMap<String, usize>,
    promoted: HashMap<String, EventTemplate>,
}

impl TemplateMiner {
    pub fn new(config: &LogIngressConfig) -> Self {
        Self {
            min_samples: config.min_template_samples.max(1),
            max_wildcard_ratio: config.max_wildcard_ratio,
            max_pending: config.max_pending_shapes,
            pending: HashMap::new(),
            promoted: HashMap::new(),
        }
    }

    /// Count one occurrence of `shape`.
    pub fn observe(&mut self, shape: &str) -> MinedShape {
        if let Some(template) = self.promoted.get(shape) {
            return MinedShape::Known(template.clone());
        }
        if wildcard_ratio(shape) >= self.max_wildcard_ratio {
            return MinedShape::Ignored;
        }
        if !self.pending.contains_key(shape) && self.pending.len() >= self.max_pending {
            return MinedShape::Ignored;
        }

        let seen = self.pending.entry(shape.to_string()).or_insert(0);
        *seen += 1;
        if *seen < self.min_samples {
            return MinedShape::Pending;
        }

        self.pending.remove(shape);
        let template = EventTemplate {
            event_id: format!("M{}", self.promoted.len() + 1),
            template: shape.to_string(),
            abnormal: true,
        };
        info!(
            event_id = %template.event_id,
            template = %template.template,
            "Promoted log template"
        );
        self.promoted.insert(shape.to_string(), template.clone());
        MinedShape::Promoted(template)
    }

    /// Templates promoted so far.
    pub fn promoted(&self) -> impl Iterator<Item = &EventTemplate> {
        self.promoted.values()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// One log line as shipped by a collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub content: String,
}

/// Converts log lines to count records.
#[derive(Debug, Clone)]
pub struct LogIngress {
    levels: Vec<String>,
    matcher: TemplateMatcher,
    normalizer: LogNormalizer,
    miner: Option<TemplateMiner>,
}

impl LogIngress {
    pub fn new(config: &LogIngressConfig, templates: Vec<EventTemplate>) -> LogResult<Self> {
        let matcher = TemplateMatcher::new(templates)?;
        info!(
            templates = matcher.len(),
            levels = ?config.levels,
            mining = config.mine_templates,
            "Log ingress ready"
        );
        Ok(Self {
            levels: config.levels.iter().map(|l| l.to_uppercase()).collect(),
            matcher,
            normalizer: LogNormalizer::new()?,
            miner: config.mine_templates.then(|| TemplateMiner::new(config)),
        })
    }

    pub fn matcher(&self) -> &TemplateMatcher {
        &self.matcher
    }

    /// Count record for `line`, or `None` when its level is filtered out.
    pub fn to_record(&mut self, line: &LogLine) -> Option<Record> {
        let level = line.level.to_uppercase();
        if !self.levels.is_empty() && !self.levels.contains(&level) {
            return None;
        }

        if let Some(template) = self.matcher.find(&line.content) {
            return Some(event_record(template, &level, line.timestamp));
        }

        let shape = self.normalizer.to_template(&line.content);
        let mined = match self.miner.as_mut() {
            Some(miner) => miner.observe(&shape),
            None => MinedShape::Ignored,
        };

        match mined {
            MinedShape::Promoted(template) => {
                // Lines whose shape collapsed a run of wildcards only match by shape
                if let Err(e) = self.matcher.push(template.clone()) {
                    warn!(event_id = %template.event_id, error = %e, "Mined template not compiled");
                }
                Some(event_record(&template, &level, line.timestamp))
            }
            MinedShape::Known(template) => Some(event_record(&template, &level, line.timestamp)),
            MinedShape::Pending | MinedShape::Ignored => {
                debug!(level = %level, template = %shape, "Unmatched log line");
                let series = SeriesKey::new(UNKNOWN_SERIES).with_tag("level", level.as_str());
                Some(Record::new(series, line.timestamp, 1.0).with_tag("template", shape))
            }
        }
    }
}

/// Count record on the event series of `template`; abnormal events get their
/// own series.
fn event_record(template: &EventTemplate, level: &str, timestamp: DateTime<Utc>) -> Record {
    let mut series = SeriesKey::new(EVENTS_SERIES)
        .with_tag("event", template.event_id.as_str())
        .with_tag("level", level);
    if template.abnormal {
        series = series.with_tag("abnormal", "true");
    }
    Record::new(series, timestamp, 1.0)
}
