// Execution naming and labeling
//
// Every execution gets a cluster-safe name derived from its proc, and a label
// set that lets the engine find the Job (and its pods) again by selector.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Label carrying the execution name on Jobs and pod templates
pub const EXECUTION_LABEL: &str = "procyard.io/execution";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "procyard";

/// Kubernetes caps label values (and so job names) at 63 characters
const MAX_NAME_LEN: usize = 63;
const SUFFIX_LEN: usize = 16;
const FALLBACK_PREFIX: &str = "proc";

lazy_static! {
    static ref INVALID_CHARS: Regex = Regex::new("[^a-z0-9-]+").expect("static regex");
    static ref DASH_RUNS: Regex = Regex::new("-{2,}").expect("static regex");
}

/// Derive a unique execution name: `<sanitized proc name>-<16 hex chars>`
pub fn derive_execution_name(proc_name: &str) -> String {
    let suffix = &Uuid::new_v4().simple().to_string()[..SUFFIX_LEN];
    format!("{}-{}", name_prefix(proc_name), suffix)
}

/// Lower-case DNS-1123 prefix of at most 63 - 17 characters
pub fn name_prefix(proc_name: &str) -> String {
    let lowered = proc_name.to_lowercase();
    let replaced = INVALID_CHARS.replace_all(&lowered, "-");
    let collapsed = DASH_RUNS.replace_all(&replaced, "-");

    let max_prefix = MAX_NAME_LEN - SUFFIX_LEN - 1;
    let truncated: String = collapsed.chars().take(max_prefix).collect();
    let trimmed = truncated.trim_matches('-');

    if trimmed.is_empty() {
        FALLBACK_PREFIX.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Labels attached to a submitted Job and its pod template
pub fn label_set_for(execution_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (EXECUTION_LABEL.to_string(), execution_name.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
    ])
}

/// Selector matching exactly the objects labeled by [`label_set_for`]
pub fn label_selector_for(execution_name: &str) -> String {
    format!("{}={}", EXECUTION_LABEL, execution_name)
}

/// Does a label set carry the identity of `execution_name`
pub fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector.split(',').all(|term| match term.split_once('=') {
        Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
        None => false,
    })
}
