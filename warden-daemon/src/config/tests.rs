use super::*;
use std::path::PathBuf;
use std::time::Duration;

fn tokens(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn apply(settings: &mut ServiceSettings, setting: &str, values: &[&str]) -> Result<(), SettingError> {
    settings.apply(setting, tokens(values))
}

#[test]
fn test_process_settings() {
    let mut settings = ServiceSettings::new();
    apply(&mut settings, "type", &["process"]).unwrap();
    apply(&mut settings, "command", &["/something/test"]).unwrap();
    apply(&mut settings, "depends-on", &["abc"]).unwrap();
    apply(&mut settings, "rlimit-nofile", &["50:100"]).unwrap();
    apply(&mut settings, "rlimit-core", &["60:"]).unwrap();
    apply(&mut settings, "rlimit-data", &["-:-"]).unwrap();

    assert_eq!(settings.service_type, Some(ServiceType::Process));
    assert_eq!(settings.command, vec!["/something/test".to_string()]);
    assert_eq!(settings.rlimits.len(), 3);

    let nofile = &settings.rlimits[0];
    assert_eq!(nofile.resource, ResourceKind::NoFile);
    assert!(nofile.soft_is_set() && nofile.hard_is_set());
    assert_eq!(nofile.soft, Some(LimitValue::Value(50)));
    assert_eq!(nofile.hard, Some(LimitValue::Value(100)));

    let core = &settings.rlimits[1];
    assert_eq!(core.resource, ResourceKind::Core);
    assert!(core.soft_is_set());
    assert!(!core.hard_is_set());
    assert_eq!(core.soft, Some(LimitValue::Value(60)));

    let data = &settings.rlimits[2];
    assert_eq!(data.resource, ResourceKind::Data);
    assert_eq!(data.soft, Some(LimitValue::Unlimited));
    assert_eq!(data.hard, Some(LimitValue::Unlimited));

    assert_eq!(settings.depends.len(), 1);
    assert_eq!(settings.depends[0].name, "abc");
    assert_eq!(settings.depends[0].dep_type, DependencyType::Regular);
}

#[test]
fn test_finish_splits_config_and_dependencies() {
    let mut settings = ServiceSettings::new();
    apply(&mut settings, "command", &["/bin/server", "--port", "80"]).unwrap();
    apply(&mut settings, "waits-for", &["net"]).unwrap();
    apply(&mut settings, "depends-ms", &["mounts"]).unwrap();

    let (config, deps) = settings.finish().unwrap();
    assert_eq!(config.service_type, ServiceType::Process);
    assert_eq!(config.command, tokens(&["/bin/server", "--port", "80"]));
    assert_eq!(config.stop_timeout, Duration::from_secs(10));
    assert_eq!(
        deps,
        vec![
            PrelimDep::new("net", DependencyType::WaitsFor),
            PrelimDep::new("mounts", DependencyType::Milestone),
        ]
    );
}

#[test]
fn test_command_appends() {
    let mut settings = ServiceSettings::new();
    apply(&mut settings, "command", &["/bin/echo", "one"]).unwrap();
    apply(&mut settings, "command", &["two"]).unwrap();
    assert_eq!(settings.command, tokens(&["/bin/echo", "one", "two"]));
}

#[test]
fn test_duplicate_rlimits_accumulate() {
    let mut settings = ServiceSettings::new();
    apply(&mut settings, "rlimit-nofile", &["10"]).unwrap();
    apply(&mut settings, "rlimit-nofile", &["20:30"]).unwrap();

    assert_eq!(settings.rlimits.len(), 2);
    assert_eq!(settings.rlimits[0].soft, Some(LimitValue::Value(10)));
    assert_eq!(settings.rlimits[0].hard, Some(LimitValue::Value(10)));
    assert_eq!(settings.rlimits[1].soft, Some(LimitValue::Value(20)));
}

#[test]
fn test_type_redeclared() {
    let mut settings = ServiceSettings::new();
    apply(&mut settings, "type", &["process"]).unwrap();
    let err = apply(&mut settings, "type", &["scripted"]).unwrap_err();
    assert_eq!(err, SettingError::TypeRedeclared);
}

#[test]
fn test_unknown_type_keyword() {
    let mut settings = ServiceSettings::new();
    let err = apply(&mut settings, "type", &["oneshot"]).unwrap_err();
    assert_eq!(err, SettingError::UnknownServiceType("oneshot".to_string()));
}

#[test]
fn test_unknown_setting() {
    let mut settings = ServiceSettings::new();
    let err = apply(&mut settings, "colour", &["blue"]).unwrap_err();
    assert_eq!(err, SettingError::UnknownSetting("colour".to_string()));
    assert!(err.to_string().contains("colour"));
}

#[test]
fn test_unknown_rlimit_resource() {
    let mut settings = ServiceSettings::new();
    let err = apply(&mut settings, "rlimit-bananas", &["1"]).unwrap_err();
    assert_eq!(err, SettingError::UnknownResource("bananas".to_string()));
}

#[test]
fn test_command_invalid_for_internal() {
    let mut settings = ServiceSettings::new();
    apply(&mut settings, "type", &["internal"]).unwrap();
    let err = apply(&mut settings, "command", &["/bin/true"]).unwrap_err();
    assert_eq!(
        err,
        SettingError::InvalidForType {
            setting: "command".to_string(),
            service_type: ServiceType::Internal,
        }
    );
}

#[test]
fn test_type_declared_after_incompatible_setting() {
    let mut settings = ServiceSettings::new();
    apply(&mut settings, "command", &["/bin/true"]).unwrap();
    let err = apply(&mut settings, "type", &["triggered"]).unwrap_err();
    assert!(matches!(err, SettingError::InvalidForType { ref setting, .. } if setting == "command"));
}

#[test]
fn test_pid_file_requires_bgprocess() {
    let mut settings = ServiceSettings::new();
    apply(&mut settings, "command", &["/usr/sbin/daemon"]).unwrap();
    apply(&mut settings, "pid-file", &["/run/daemon.pid"]).unwrap();
    // No type declared: defaults to process, which rejects pid-file
    let err = settings.finish().unwrap_err();
    assert!(matches!(err, SettingError::InvalidForType { ref setting, service_type: ServiceType::Process } if setting == "pid-file"));

    let mut settings = ServiceSettings::new();
    apply(&mut settings, "type", &["bgprocess"]).unwrap();
    apply(&mut settings, "command", &["/usr/sbin/daemon"]).unwrap();
    apply(&mut settings, "pid-file", &["/run/daemon.pid"]).unwrap();
    let (config, _) = settings.finish().unwrap();
    assert_eq!(config.pid_file, Some(PathBuf::from("/run/daemon.pid")));
}

#[test]
fn test_stop_command_is_scripted_only() {
    let mut settings = ServiceSettings::new();
    apply(&mut settings, "type", &["process"]).unwrap();
    assert!(apply(&mut settings, "stop-command", &["/bin/true"]).is_err());

    let mut settings = ServiceSettings::new();
    apply(&mut settings, "type", &["scripted"]).unwrap();
    apply(&mut settings, "command", &["/sbin/mount", "-a"]).unwrap();
    apply(&mut settings, "stop-command", &["/sbin/umount", "-a"]).unwrap();
    let (config, _) = settings.finish().unwrap();
    assert_eq!(config.stop_command, tokens(&["/sbin/umount", "-a"]));
}

#[test]
fn test_missing_command() {
    for keyword in ["process", "bgprocess", "scripted"] {
        let mut settings = ServiceSettings::new();
        apply(&mut settings, "type", &[keyword]).unwrap();
        let err = settings.finish().unwrap_err();
        assert!(matches!(err, SettingError::MissingCommand(_)), "type {}", keyword);
    }

    let mut settings = ServiceSettings::new();
    apply(&mut settings, "type", &["internal"]).unwrap();
    let (config, deps) = settings.finish().unwrap();
    assert_eq!(config.service_type, ServiceType::Internal);
    assert!(config.command.is_empty());
    assert!(deps.is_empty());
}

#[test]
fn test_dependency_takes_one_name() {
    let mut settings = ServiceSettings::new();
    let err = apply(&mut settings, "depends-on", &["a", "b"]).unwrap_err();
    assert_eq!(err, SettingError::ExpectedSingleValue("depends-on".to_string()));

    let err = apply(&mut settings, "waits-for", &[]).unwrap_err();
    assert_eq!(err, SettingError::MissingValue("waits-for".to_string()));
}

#[test]
fn test_dependency_directories() {
    let mut settings = ServiceSettings::new();
    apply(&mut settings, "type", &["internal"]).unwrap();
    apply(&mut settings, "waits-for.d", &["boot.d"]).unwrap();
    apply(&mut settings, "depends-on.d", &["required.d"]).unwrap();

    assert_eq!(
        settings.dep_dirs,
        vec![
            PrelimDepDir {
                dir: "boot.d".to_string(),
                dep_type: DependencyType::WaitsFor,
            },
            PrelimDepDir {
                dir: "required.d".to_string(),
                dep_type: DependencyType::Regular,
            },
        ]
    );
    assert!(settings.depends.is_empty());
}

#[test]
fn test_ordering_settings() {
    let mut settings = ServiceSettings::new();
    apply(&mut settings, "type", &["internal"]).unwrap();
    apply(&mut settings, "after", &["network"]).unwrap();
    apply(&mut settings, "before", &["login"]).unwrap();

    assert_eq!(
        settings.depends,
        vec![
            PrelimDep::new("network", DependencyType::After),
            PrelimDep {
                name: "login".to_string(),
                dep_type: DependencyType::After,
                reversed: true,
            },
        ]
    );

    let err = apply(&mut settings, "after.d", &["order.d"]).unwrap_err();
    assert_eq!(err, SettingError::UnknownSetting("after.d".to_string()));
}

#[test]
fn test_restart_settings() {
    let mut settings = ServiceSettings::new();
    apply(&mut settings, "command", &["/bin/sleep", "100"]).unwrap();
    apply(&mut settings, "restart", &["on-failure"]).unwrap();
    apply(&mut settings, "smooth-recovery", &["yes"]).unwrap();
    apply(&mut settings, "restart-delay", &["1.5"]).unwrap();
    apply(&mut settings, "restart-limit-interval", &["30s"]).unwrap();
    apply(&mut settings, "restart-limit-count", &["0"]).unwrap();
    apply(&mut settings, "stop-timeout", &["500ms"]).unwrap();

    let (config, _) = settings.finish().unwrap();
    assert_eq!(config.restart.policy, RestartPolicy::on_failure());
    assert!(config.restart.smooth_recovery);
    assert_eq!(config.restart.delay, Duration::from_millis(1500));
    assert_eq!(config.restart.limit_interval, Duration::from_secs(30));
    assert_eq!(config.restart.limit_count, 0);
    assert_eq!(config.stop_timeout, Duration::from_millis(500));
}

#[test]
fn test_invalid_values() {
    let mut settings = ServiceSettings::new();
    assert!(matches!(
        apply(&mut settings, "restart", &["sometimes"]),
        Err(SettingError::InvalidValue { .. })
    ));
    assert!(matches!(
        apply(&mut settings, "smooth-recovery", &["maybe"]),
        Err(SettingError::InvalidValue { .. })
    ));
    assert!(matches!(
        apply(&mut settings, "restart-limit-count", &["-1"]),
        Err(SettingError::InvalidValue { .. })
    ));
    assert!(matches!(
        apply(&mut settings, "rlimit-nofile", &["1:2:3"]),
        Err(SettingError::InvalidValue { .. })
    ));
    assert!(matches!(
        apply(&mut settings, "rlimit-nofile", &["lots"]),
        Err(SettingError::InvalidValue { .. })
    ));
}

#[test]
fn test_smooth_recovery_is_process_only() {
    let mut settings = ServiceSettings::new();
    apply(&mut settings, "type", &["scripted"]).unwrap();
    assert!(matches!(
        apply(&mut settings, "smooth-recovery", &["yes"]),
        Err(SettingError::InvalidForType { .. })
    ));
}

// --- rlimit value grammar ---

#[test]
fn test_rlimit_bare_value_sets_both() {
    let entry = parse_rlimit(ResourceKind::Stack, "8192").unwrap();
    assert_eq!(entry.soft, Some(LimitValue::Value(8192)));
    assert_eq!(entry.hard, Some(LimitValue::Value(8192)));
}

#[test]
fn test_rlimit_unlimited_forms() {
    let entry = parse_rlimit(ResourceKind::Core, "-").unwrap();
    assert_eq!(entry.soft, Some(LimitValue::Unlimited));
    assert_eq!(entry.hard, Some(LimitValue::Unlimited));

    let entry = parse_rlimit(ResourceKind::Core, "-:100").unwrap();
    assert_eq!(entry.soft, Some(LimitValue::Unlimited));
    assert_eq!(entry.hard, Some(LimitValue::Value(100)));

    let entry = parse_rlimit(ResourceKind::Core, "100:-").unwrap();
    assert_eq!(entry.soft, Some(LimitValue::Value(100)));
    assert_eq!(entry.hard, Some(LimitValue::Unlimited));
}

#[test]
fn test_rlimit_blank_soft_side() {
    let entry = parse_rlimit(ResourceKind::NoFile, ":4096").unwrap();
    assert!(!entry.soft_is_set());
    assert_eq!(entry.hard, Some(LimitValue::Value(4096)));
}

#[test]
fn test_rlimit_wrapper_arg() {
    let entry = parse_rlimit(ResourceKind::NoFile, "50:100").unwrap();
    assert_eq!(entry.to_wrapper_arg(), "nofile=50:100");
    let entry = parse_rlimit(ResourceKind::Core, "60:").unwrap();
    assert_eq!(entry.to_wrapper_arg(), "core=60:");
    let entry = parse_rlimit(ResourceKind::Data, "-:-").unwrap();
    assert_eq!(entry.to_wrapper_arg(), "data=-:-");
}

#[test]
fn test_rlimit_resource_aliases() {
    assert_eq!(ResourceKind::from_setting_suffix("as"), Some(ResourceKind::AddrSpace));
    assert_eq!(ResourceKind::from_setting_suffix("addrspace"), Some(ResourceKind::AddrSpace));
    assert_eq!(ResourceKind::from_setting_suffix("rss"), None);
}

#[test]
fn test_dependency_type_settings() {
    for dep_type in DependencyType::ALL {
        assert_eq!(DependencyType::from_setting(dep_type.setting_name()), Some(dep_type));
    }
    assert!(DependencyType::Regular.requires_success());
    assert!(DependencyType::Milestone.requires_success());
    assert!(!DependencyType::WaitsFor.requires_success());
    assert!(!DependencyType::After.requires_success());
    assert!(!DependencyType::After.activates());
    assert!(DependencyType::WaitsFor.activates());
}
