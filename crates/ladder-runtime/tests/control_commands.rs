use std::sync::Arc;

use ladder_runtime::control::{handle_command, ControlContext};
use ladder_runtime::image::ImageTables;
use ladder_runtime::plugins::PluginDriver;
use ladder_runtime::sync::PiMutex;
use ladder_runtime::{LifecycleManager, PlcState};

fn context_with_build_dir(build_dir: &std::path::Path) -> ControlContext {
    let tables = Arc::new(PiMutex::new(ImageTables::new()));
    let plugins = Arc::new(PluginDriver::new(tables.clone()));
    ControlContext {
        lifecycle: Arc::new(LifecycleManager::new(
            build_dir.to_path_buf(),
            tables,
            plugins,
        )),
    }
}

#[test]
fn ping_answers_ok() {
    let dir = tempfile::tempdir().unwrap();
    let context = context_with_build_dir(dir.path());
    assert_eq!(handle_command("PING", &context), "PING:OK\n");
}

#[test]
fn status_reports_the_lifecycle_state() {
    let dir = tempfile::tempdir().unwrap();
    let context = context_with_build_dir(dir.path());
    assert_eq!(handle_command("STATUS", &context), "STATUS:STOPPED\n");

    // A failed start moves the state to EMPTY and STATUS follows.
    assert_eq!(handle_command("START", &context), "START:ERROR\n");
    assert_eq!(handle_command("STATUS", &context), "STATUS:EMPTY\n");
}

#[test]
fn stop_from_stopped_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let context = context_with_build_dir(dir.path());
    assert_eq!(handle_command("STOP", &context), "STOP:ERROR\n");
    assert_eq!(context.lifecycle.state(), PlcState::Stopped);
}

#[test]
fn stop_after_failed_start_recovers_to_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let context = context_with_build_dir(dir.path());
    assert_eq!(handle_command("START", &context), "START:ERROR\n");
    assert_eq!(handle_command("STOP", &context), "STOP:OK\n");
    assert_eq!(handle_command("STATUS", &context), "STATUS:STOPPED\n");
}

#[test]
fn stats_before_any_cycle_is_the_null_shape() {
    let dir = tempfile::tempdir().unwrap();
    let context = context_with_build_dir(dir.path());
    let response = handle_command("STATS", &context);
    assert!(response.starts_with("STATS:{"));
    assert!(response.contains("\"scan_count\":0"));
    assert!(response.contains("\"scan_time_min\":null"));
    assert!(response.contains("\"scan_time_max\":null"));
    assert!(response.contains("\"scan_time_avg\":null"));
    assert!(response.contains("\"cycle_time_min\":null"));
    assert!(response.contains("\"cycle_latency_min\":null"));
    assert!(response.contains("\"overruns\":0"));
    assert!(response.ends_with("}\n"));
}

#[test]
fn debug_with_unparseable_hex_reports_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let context = context_with_build_dir(dir.path());
    assert_eq!(
        handle_command("DEBUG:zz", &context),
        "DEBUG:ERROR_PARSING\n"
    );
    assert_eq!(handle_command("DEBUG:", &context), "DEBUG:ERROR_PARSING\n");
}

#[test]
fn debug_without_a_program_reports_a_processing_error() {
    let dir = tempfile::tempdir().unwrap();
    let context = context_with_build_dir(dir.path());
    assert_eq!(
        handle_command("DEBUG:41", &context),
        "DEBUG:ERROR_PROCESSING\n"
    );
}

#[test]
fn unknown_commands_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let context = context_with_build_dir(dir.path());
    assert_eq!(handle_command("RESET", &context), "COMMAND:ERROR\n");
    assert_eq!(handle_command("", &context), "COMMAND:ERROR\n");
    assert_eq!(handle_command("ping", &context), "COMMAND:ERROR\n");
}

#[test]
fn every_response_is_a_single_lf_terminated_line() {
    let dir = tempfile::tempdir().unwrap();
    let context = context_with_build_dir(dir.path());
    for command in ["PING", "STATUS", "START", "STOP", "STATS", "DEBUG:zz", "???"] {
        let response = handle_command(command, &context);
        assert!(response.ends_with('\n'), "{command} response unterminated");
        assert_eq!(
            response.matches('\n').count(),
            1,
            "{command} response is not one line"
        );
    }
}
