//! wardend command line specs

use crate::prelude::*;

#[test]
fn check_config_accepts_defaults() {
    let ws = Workspace::empty();
    ws.wardend()
        .args(&["--check-config"])
        .passes()
        .stdout_eq("configuration ok (mode: hybrid, cluster: off)\n");
}

#[test]
fn check_config_reads_the_given_file() {
    let ws = Workspace::with_config(
        r#"
[locking]
compatibility_mode = "strict"
default_timeout = "10m"

[locking.cluster]
enabled = true
"#,
    );
    ws.wardend()
        .args(&["--check-config"])
        .arg_path(&ws.config_path())
        .passes()
        .stdout_has("mode: strict")
        .stdout_has("cluster: on");
}

#[test]
fn check_config_rejects_inconsistent_timeouts() {
    let ws = Workspace::with_config(
        r#"
[locking]
default_timeout = "2h"
max_timeout = "1h"
"#,
    );
    ws.wardend()
        .args(&["--check-config"])
        .arg_path(&ws.config_path())
        .fails()
        .code(1)
        .stderr_has("invalid configuration")
        .stderr_has("max_timeout");
}

#[test]
fn check_config_reports_parse_errors() {
    let ws = Workspace::with_config("[locking\n");
    ws.wardend()
        .args(&["--check-config"])
        .arg_path(&ws.config_path())
        .fails()
        .stderr_has("TOML parse error");
}

#[test]
fn unknown_option_prints_usage() {
    let ws = Workspace::empty();
    ws.wardend()
        .args(&["--frobnicate"])
        .fails()
        .code(2)
        .stderr_has("usage: wardend");
}

#[test]
fn self_test_passes_on_memory_backend() {
    let ws = Workspace::with_config(
        r#"
[locking]
backend = "memory"
compatibility_mode = "hybrid"
"#,
    );
    ws.wardend()
        .args(&["--self-test"])
        .arg_path(&ws.config_path())
        .passes()
        .stdout_has("\"success\": true")
        .stdout_has("UnlockByPull");
}
