use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ladder_runtime::image::ImageTables;
use ladder_runtime::plugins::PluginDriver;
use ladder_runtime::sync::PiMutex;
use ladder_runtime::RuntimeError;

const SCRIPT: &str = r#"
fn init() {
    log_info("gateway ready, config at " + config_path());
    write_int_memory(0, 5);
}

fn start_loop() {
    while plugin_running() {
        let seed = read_int_memory(0);
        write_int_memory(1, seed + 1);
        sleep_ms(5);
    }
}

fn stop_loop() {
    write_int_memory(2, 99);
}

fn cleanup() {
    write_int_memory(3, 7);
}
"#;

fn write_fixture(dir: &Path, script: &str) -> std::path::PathBuf {
    let script_path = dir.join("gateway.rhai");
    std::fs::write(&script_path, script).unwrap();
    let conf_path = dir.join("plugins.conf");
    std::fs::write(
        &conf_path,
        format!("gateway,{},1,1,./gateway.conf\n", script_path.display()),
    )
    .unwrap();
    conf_path
}

fn read_mem(tables: &Arc<PiMutex<ImageTables>>, index: usize) -> u16 {
    tables.lock().read_int_mem(index).unwrap()
}

fn wait_for<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn scripted_plugin_full_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let conf = write_fixture(dir.path(), SCRIPT);

    let tables = Arc::new(PiMutex::new(ImageTables::new()));
    tables.lock().fill_null_with_scratch();
    let driver = PluginDriver::new(tables.clone());

    assert_eq!(driver.load_config(&conf).unwrap(), 1);
    driver.init().unwrap();
    assert_eq!(read_mem(&tables, 0), 5);

    driver.start();
    wait_for(|| read_mem(&tables, 1) == 6);

    driver.stop();
    assert_eq!(read_mem(&tables, 2), 99);

    // After stop, no script code runs again.
    assert!(tables.lock().write_int_mem(1, 0));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(read_mem(&tables, 1), 0);

    driver.destroy();
    assert_eq!(read_mem(&tables, 3), 7);
    assert_eq!(driver.plugin_count(), 0);
}

#[test]
fn writes_to_unbound_slots_are_inert() {
    let dir = tempfile::tempdir().unwrap();
    let conf = write_fixture(dir.path(), SCRIPT);

    // No scratch fill: every slot is unbound, init's write must be a no-op.
    let tables = Arc::new(PiMutex::new(ImageTables::new()));
    let driver = PluginDriver::new(tables.clone());
    driver.load_config(&conf).unwrap();
    driver.init().unwrap();
    assert!(tables.lock().read_int_mem(0).is_none());
    driver.destroy();
}

#[test]
fn script_without_init_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let conf = write_fixture(dir.path(), "fn start_loop() {}\n");

    let tables = Arc::new(PiMutex::new(ImageTables::new()));
    let driver = PluginDriver::new(tables);
    let err = driver.load_config(&conf).unwrap_err();
    assert!(matches!(err, RuntimeError::PluginLoad { .. }));
    assert_eq!(driver.plugin_count(), 0);
}

#[test]
fn missing_script_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let conf = dir.path().join("plugins.conf");
    std::fs::write(&conf, "ghost,./no-such-plugin.rhai,1,1,./ghost.conf\n").unwrap();

    let tables = Arc::new(PiMutex::new(ImageTables::new()));
    let driver = PluginDriver::new(tables);
    assert!(matches!(
        driver.load_config(&conf).unwrap_err(),
        RuntimeError::PluginLoad { .. }
    ));
}

#[test]
fn disabled_plugins_are_bound_but_never_run() {
    let dir = tempfile::tempdir().unwrap();
    let script_path = dir.path().join("gateway.rhai");
    std::fs::write(&script_path, SCRIPT).unwrap();
    let conf = dir.path().join("plugins.conf");
    std::fs::write(
        &conf,
        format!("gateway,{},0,1,./gateway.conf\n", script_path.display()),
    )
    .unwrap();

    let tables = Arc::new(PiMutex::new(ImageTables::new()));
    tables.lock().fill_null_with_scratch();
    let driver = PluginDriver::new(tables.clone());
    assert_eq!(driver.load_config(&conf).unwrap(), 1);
    driver.init().unwrap();
    driver.start();
    // Disabled: init never wrote its marker.
    assert_eq!(read_mem(&tables, 0), 0);
    driver.destroy();
}

#[test]
fn restart_reloads_the_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let conf = write_fixture(dir.path(), SCRIPT);

    let tables = Arc::new(PiMutex::new(ImageTables::new()));
    tables.lock().fill_null_with_scratch();
    let driver = PluginDriver::new(tables.clone());
    driver.load_config(&conf).unwrap();
    driver.init().unwrap();
    driver.start();
    wait_for(|| read_mem(&tables, 1) == 6);

    driver.restart(&conf).unwrap();
    assert_eq!(driver.plugin_count(), 1);
    // The fresh worker keeps refreshing the derived cell.
    assert!(tables.lock().write_int_mem(1, 0));
    wait_for(|| read_mem(&tables, 1) == 6);
    driver.destroy();
}

#[test]
fn restart_with_a_bad_config_leaves_the_driver_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let conf = write_fixture(dir.path(), SCRIPT);

    let tables = Arc::new(PiMutex::new(ImageTables::new()));
    tables.lock().fill_null_with_scratch();
    let driver = PluginDriver::new(tables.clone());
    driver.load_config(&conf).unwrap();
    driver.init().unwrap();
    driver.start();

    let missing = dir.path().join("nope.conf");
    assert!(driver.restart(&missing).is_err());
    assert_eq!(driver.plugin_count(), 0);
}

#[test]
fn empty_configuration_is_a_valid_driver() {
    let dir = tempfile::tempdir().unwrap();
    let conf = dir.path().join("plugins.conf");
    std::fs::write(&conf, "# no plugins\n").unwrap();

    let tables = Arc::new(PiMutex::new(ImageTables::new()));
    let driver = PluginDriver::new(tables);
    assert_eq!(driver.load_config(&conf).unwrap(), 0);
    driver.init().unwrap();
    driver.start();
    driver.stop();
    driver.destroy();
}
