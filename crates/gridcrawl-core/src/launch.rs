//! Helpers for building launch environments.

use std::collections::BTreeMap;

use crate::types::PWD_EXPANSION_VAR;

/// Environment variable carrying the task's search path.
pub const TASK_PATH_ENV: &str = "TASK_PATH";

const PATH_SEPARATOR: &str = ":";

/// Append `value` to the variable `key`, joining with `separator` when the
/// variable is already set.
pub fn add_to_environment(
    env: &mut BTreeMap<String, String>,
    key: &str,
    value: &str,
    separator: &str,
) {
    if value.is_empty() {
        return;
    }
    env.entry(key.to_string())
        .and_modify(|existing| {
            existing.push_str(separator);
            existing.push_str(value);
        })
        .or_insert_with(|| value.to_string());
}

/// `TASK_PATH` made of the configured entries followed by everything in
/// the container's working directory.
pub fn search_path_environment(application_path: &[String]) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for entry in application_path {
        add_to_environment(&mut env, TASK_PATH_ENV, entry.trim(), PATH_SEPARATOR);
    }
    add_to_environment(
        &mut env,
        TASK_PATH_ENV,
        &format!("{PWD_EXPANSION_VAR}/*"),
        PATH_SEPARATOR,
    );
    env
}
