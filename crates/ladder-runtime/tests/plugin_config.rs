use std::path::PathBuf;

use ladder_runtime::plugins::{
    load_plugin_config, parse_plugin_config, PluginKind, MAX_PLUGINS,
};
use ladder_runtime::RuntimeError;

#[test]
fn parses_native_and_scripted_entries() {
    let text = "\
# field I/O plugins
modbus_master,./plugins/libmodbus.so,1,0,./modbus.conf

gateway,./plugins/gateway.rhai,0,1,./gateway.conf,./plugins/modules
";
    let configs = parse_plugin_config(text);
    assert_eq!(configs.len(), 2);

    assert_eq!(configs[0].name, "modbus_master");
    assert_eq!(configs[0].path, PathBuf::from("./plugins/libmodbus.so"));
    assert!(configs[0].enabled);
    assert_eq!(configs[0].kind, PluginKind::Native);
    assert_eq!(configs[0].config_path, PathBuf::from("./modbus.conf"));
    assert!(configs[0].module_path.is_none());

    assert_eq!(configs[1].name, "gateway");
    assert!(!configs[1].enabled);
    assert_eq!(configs[1].kind, PluginKind::Scripted);
    assert_eq!(
        configs[1].module_path,
        Some(PathBuf::from("./plugins/modules"))
    );
}

#[test]
fn comments_and_blank_lines_are_ignored() {
    let text = "# a comment\n\n   \n#another\np,./p.so,1,0,./p.conf\n";
    assert_eq!(parse_plugin_config(text).len(), 1);
}

#[test]
fn short_lines_are_skipped() {
    let text = "only,four,fields,here\np,./p.so,1,0,./p.conf\n";
    let configs = parse_plugin_config(text);
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].name, "p");
}

#[test]
fn fields_are_trimmed() {
    let text = "p , ./p.so , 1 , 0 , ./p.conf \n";
    let configs = parse_plugin_config(text);
    assert_eq!(configs[0].name, "p");
    assert_eq!(configs[0].path, PathBuf::from("./p.so"));
}

#[test]
fn non_numeric_enabled_means_disabled() {
    let configs = parse_plugin_config("p,./p.so,yes,0,./p.conf\n");
    assert!(!configs[0].enabled);
}

#[test]
fn unknown_kind_is_skipped() {
    let configs = parse_plugin_config("p,./p.so,1,7,./p.conf\n");
    assert!(configs.is_empty());
}

#[test]
fn fields_past_the_sixth_are_ignored() {
    let configs = parse_plugin_config("p,./p.so,1,1,./p.conf,./mods,extra,junk\n");
    assert_eq!(configs.len(), 1);
    assert_eq!(configs[0].module_path, Some(PathBuf::from("./mods")));
}

#[test]
fn empty_module_path_reads_as_none() {
    let configs = parse_plugin_config("p,./p.rhai,1,1,./p.conf,\n");
    assert!(configs[0].module_path.is_none());
}

#[test]
fn entry_count_is_capped() {
    let mut text = String::new();
    for i in 0..MAX_PLUGINS + 4 {
        text.push_str(&format!("p{i},./p{i}.so,1,0,./p{i}.conf\n"));
    }
    assert_eq!(parse_plugin_config(&text).len(), MAX_PLUGINS);
}

#[test]
fn missing_file_is_a_config_error() {
    let err = load_plugin_config(std::path::Path::new("./does-not-exist.conf")).unwrap_err();
    assert!(matches!(err, RuntimeError::PluginConfig(_)));
}

#[test]
fn config_file_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plugins.conf");
    std::fs::write(&path, "p,./p.so,1,0,./p.conf\n").unwrap();
    let configs = load_plugin_config(&path).unwrap();
    assert_eq!(configs.len(), 1);
}
