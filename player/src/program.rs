//! Game documents: a named game with tasks, each task an ordered step program.
//!
//! Field names follow the on-disk snake_case vocabulary (`goto_step_if_found`,
//! `click_all`, ...). Steps are tagged by `type`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_THRESHOLD: f64 = 0.8;
pub const DEFAULT_TEMPLATE_TIMEOUT_SECS: f64 = 10.0;
pub const DEFAULT_ACTION_DELAY_SECS: f64 = 0.5;
pub const DEFAULT_WAIT_SECS: f64 = 1.0;
pub const DEFAULT_SWIPE_MS: u64 = 300;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Game {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tasks: BTreeMap<String, Program>,
}

impl Game {
    pub fn task(&self, key: &str) -> Option<&Program> {
        self.tasks.get(key)
    }
}

/// An ordered list of steps plus display metadata.
///
/// Steps are addressed 1-based by jump targets; index 0 never names a step.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Program {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Program {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            name: None,
            description: None,
            steps,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step at a 1-based index.
    pub fn step(&self, index: usize) -> Option<&Step> {
        index.checked_sub(1).and_then(|i| self.steps.get(i))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// A failing required step aborts the run.
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(flatten)]
    pub action: Action,
}

impl Step {
    pub fn new(action: Action) -> Self {
        Self {
            name: None,
            required: true,
            action,
        }
    }

    pub fn named(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(action)
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.action.kind())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Wait {
        #[serde(default = "default_wait_secs")]
        duration: f64,
    },
    Click {
        #[serde(default)]
        x: Option<i32>,
        #[serde(default)]
        y: Option<i32>,
        #[serde(default = "default_delay_secs")]
        delay: f64,
    },
    Swipe {
        #[serde(default)]
        x1: Option<i32>,
        #[serde(default)]
        y1: Option<i32>,
        #[serde(default)]
        x2: Option<i32>,
        #[serde(default)]
        y2: Option<i32>,
        /// Gesture length in milliseconds.
        #[serde(default = "default_swipe_ms")]
        duration: u64,
        #[serde(default = "default_delay_secs")]
        delay: f64,
    },
    #[serde(rename = "wait_template")]
    WaitForTemplate {
        #[serde(default)]
        template: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout: f64,
        #[serde(default = "default_threshold")]
        threshold: f64,
    },
    FindAndClick(FindAndClick),
    Screenshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        save_path: Option<PathBuf>,
    },
    Notification {
        #[serde(default = "default_notification_message")]
        message: String,
    },
    StopTask {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Action {
    /// The `type` tag used on disk.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Wait { .. } => "wait",
            Action::Click { .. } => "click",
            Action::Swipe { .. } => "swipe",
            Action::WaitForTemplate { .. } => "wait_template",
            Action::FindAndClick(_) => "find_and_click",
            Action::Screenshot { .. } => "screenshot",
            Action::Notification { .. } => "notification",
            Action::StopTask { .. } => "stop_task",
        }
    }
}

/// Locate the first matching candidate template and tap it.
///
/// Candidates are tried in list order. A document may carry the legacy single
/// `template` field; it expands to a one-element `templates` list on load.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(from = "FindAndClickDoc")]
pub struct FindAndClick {
    pub templates: Vec<String>,
    pub threshold: f64,
    /// Total budget in seconds, split evenly across candidates.
    pub timeout: f64,
    pub delay: f64,
    pub click_all: bool,
    pub continue_if_not_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goto_step_if_found: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goto_step_if_not_found: Option<usize>,
}

impl FindAndClick {
    pub fn new<I, S>(templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            templates: templates.into_iter().map(Into::into).collect(),
            threshold: DEFAULT_THRESHOLD,
            timeout: DEFAULT_TEMPLATE_TIMEOUT_SECS,
            delay: DEFAULT_ACTION_DELAY_SECS,
            click_all: false,
            continue_if_not_found: false,
            goto_step_if_found: None,
            goto_step_if_not_found: None,
        }
    }
}

#[derive(Deserialize)]
struct FindAndClickDoc {
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    templates: Vec<String>,
    #[serde(default = "default_threshold")]
    threshold: f64,
    #[serde(default = "default_timeout_secs")]
    timeout: f64,
    #[serde(default = "default_delay_secs")]
    delay: f64,
    #[serde(default)]
    click_all: bool,
    #[serde(default)]
    continue_if_not_found: bool,
    #[serde(default)]
    goto_step_if_found: Option<usize>,
    #[serde(default)]
    goto_step_if_not_found: Option<usize>,
}

impl From<FindAndClickDoc> for FindAndClick {
    fn from(doc: FindAndClickDoc) -> Self {
        let mut templates: Vec<String> = doc
            .templates
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .collect();
        if templates.is_empty()
            && let Some(single) = doc.template.filter(|t| !t.trim().is_empty())
        {
            templates.push(single);
        }
        Self {
            templates,
            threshold: doc.threshold,
            timeout: doc.timeout,
            delay: doc.delay,
            click_all: doc.click_all,
            continue_if_not_found: doc.continue_if_not_found,
            goto_step_if_found: doc.goto_step_if_found,
            goto_step_if_not_found: doc.goto_step_if_not_found,
        }
    }
}

fn default_required() -> bool {
    true
}

fn default_wait_secs() -> f64 {
    DEFAULT_WAIT_SECS
}

fn default_delay_secs() -> f64 {
    DEFAULT_ACTION_DELAY_SECS
}

fn default_swipe_ms() -> u64 {
    DEFAULT_SWIPE_MS
}

fn default_timeout_secs() -> f64 {
    DEFAULT_TEMPLATE_TIMEOUT_SECS
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_notification_message() -> String {
    "Reached notification step".to_string()
}
