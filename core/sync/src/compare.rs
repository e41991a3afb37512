//! Add-on comparison: what it takes to make the local set match a remote one.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use tracing::{debug, info};

use settingsync_common::{compare_versions, AddOnId, AddOnRecord};

use crate::ignore::IgnoreSet;

/// How a remote add-on relates to the local install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    NotInstalled,
    VersionMismatch,
    UpToDate,
    /// Local is ahead. Never downgraded.
    NewerLocal,
}

/// Result of comparing one remote add-on against local state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonOutcome {
    pub id: AddOnId,
    pub display_name: String,
    pub local_version: Option<String>,
    pub remote_version: String,
    pub status: ComparisonStatus,
    pub local_enabled: Option<bool>,
    pub remote_enabled: bool,
    pub needs_install: bool,
    pub needs_version_update: bool,
    pub needs_enable_disable: bool,
}

impl ComparisonOutcome {
    pub fn has_changes(&self) -> bool {
        self.needs_install || self.needs_version_update || self.needs_enable_disable
    }
}

/// Compare a remote add-on list against the local one.
///
/// Ignored ids are dropped from both sides first. The output follows the
/// remote list order; a remote id listed twice is compared once.
pub fn compare(
    local: &[AddOnRecord],
    remote: &[AddOnRecord],
    ignore: &IgnoreSet,
) -> Vec<ComparisonOutcome> {
    let local_by_key: HashMap<String, &AddOnRecord> = local
        .iter()
        .filter(|r| !ignore.is_ignored(&r.id))
        .map(|r| (r.id.key(), r))
        .collect();

    let mut seen = HashSet::new();
    let mut outcomes = Vec::with_capacity(remote.len());

    for r in remote {
        if ignore.is_ignored(&r.id) || !seen.insert(r.id.key()) {
            continue;
        }

        let outcome = match local_by_key.get(&r.id.key()) {
            None => ComparisonOutcome {
                id: r.id.clone(),
                display_name: r.label().to_string(),
                local_version: None,
                remote_version: r.version.clone(),
                status: ComparisonStatus::NotInstalled,
                local_enabled: None,
                remote_enabled: r.enabled,
                needs_install: true,
                needs_version_update: false,
                needs_enable_disable: false,
            },
            Some(l) => {
                let status = match compare_versions(&l.version, &r.version) {
                    Ordering::Less => ComparisonStatus::VersionMismatch,
                    Ordering::Greater => ComparisonStatus::NewerLocal,
                    Ordering::Equal => ComparisonStatus::UpToDate,
                };
                if status == ComparisonStatus::VersionMismatch {
                    debug!("{} needs update: {} -> {}", r.id, l.version, r.version);
                }
                ComparisonOutcome {
                    id: r.id.clone(),
                    display_name: r.label().to_string(),
                    local_version: Some(l.version.clone()),
                    remote_version: r.version.clone(),
                    status,
                    local_enabled: Some(l.enabled),
                    remote_enabled: r.enabled,
                    needs_install: false,
                    needs_version_update: status == ComparisonStatus::VersionMismatch,
                    needs_enable_disable: l.enabled != r.enabled,
                }
            }
        };
        outcomes.push(outcome);
    }

    info!("Compared {} remote add-ons", outcomes.len());
    outcomes
}

/// Number of names listed per group before "...and N more".
const PREVIEW_COUNT: usize = 3;

/// Outcomes partitioned by the action they need.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet<'a> {
    pub to_install: Vec<&'a ComparisonOutcome>,
    pub to_update: Vec<&'a ComparisonOutcome>,
    /// Installs already establish enablement, so they never appear here.
    pub to_toggle: Vec<&'a ComparisonOutcome>,
}

impl<'a> ChangeSet<'a> {
    pub fn from_outcomes(outcomes: &'a [ComparisonOutcome]) -> Self {
        Self {
            to_install: outcomes.iter().filter(|o| o.needs_install).collect(),
            to_update: outcomes.iter().filter(|o| o.needs_version_update).collect(),
            to_toggle: outcomes
                .iter()
                .filter(|o| o.needs_enable_disable && !o.needs_install)
                .collect(),
        }
    }

    pub fn total(&self) -> usize {
        self.to_install.len() + self.to_update.len() + self.to_toggle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// One line, e.g. "install 2, update 1, change state of 1".
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.to_install.is_empty() {
            parts.push(format!("install {}", self.to_install.len()));
        }
        if !self.to_update.is_empty() {
            parts.push(format!("update {}", self.to_update.len()));
        }
        if !self.to_toggle.is_empty() {
            parts.push(format!("change state of {}", self.to_toggle.len()));
        }
        parts.join(", ")
    }

    /// Multi-line report shown when the user asks for details.
    pub fn details(&self) -> String {
        let mut report = String::from("Add-on sync details:\n\n");

        write_group(
            &mut report,
            &format!("Install {} add-ons", self.to_install.len()),
            &self.to_install,
            |o| o.display_name.clone(),
        );
        write_group(
            &mut report,
            &format!("Update {} add-ons", self.to_update.len()),
            &self.to_update,
            |o| {
                format!(
                    "{} {} -> {}",
                    o.display_name,
                    o.local_version.as_deref().unwrap_or("?"),
                    o.remote_version
                )
            },
        );
        write_group(
            &mut report,
            &format!("Change state of {} add-ons", self.to_toggle.len()),
            &self.to_toggle,
            |o| {
                let action = if o.remote_enabled { "enable" } else { "disable" };
                format!("{} - {}", o.display_name, action)
            },
        );

        report.trim_end().to_string()
    }
}

fn write_group(
    report: &mut String,
    heading: &str,
    items: &[&ComparisonOutcome],
    line: impl Fn(&ComparisonOutcome) -> String,
) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(report, "{}", heading);
    for item in items.iter().take(PREVIEW_COUNT) {
        let _ = writeln!(report, "• {}", line(item));
    }
    if items.len() > PREVIEW_COUNT {
        let _ = writeln!(report, "• ...and {} more", items.len() - PREVIEW_COUNT);
    }
    report.push('\n');
}
