use super::*;

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.listen_addr.port(), DEFAULT_PORT);
    assert_eq!(settings.backend.kind, BackendKind::Redis);
    assert_eq!(settings.store.digest_prefix, "hrd");
    assert_eq!(settings.store.metadata_prefix, "hrm");
    assert_eq!(settings.store.lock_namespace, "hrl");
    assert_eq!(settings.proxy.retry_after_secs, 10);
    assert_eq!(settings.purge.allowed_ips.len(), 2);
    assert!(settings.purge.allowed_ips.iter().all(IpAddr::is_loopback));
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.backend.kind = Some(BackendKind::Redis);

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        backend: BackendOverride {
            backend_kind: Some(BackendKindArg::Memory),
            redis_url: None,
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.listen_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.backend.kind, BackendKind::Memory);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn store_namespaces_must_be_header_safe_and_distinct() {
    let mut raw = RawSettings::default();
    raw.store.digest_prefix = Some("has space".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "store.digest_prefix",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.store.metadata_prefix = Some("hrd".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "store.metadata_prefix",
            ..
        })
    ));
}

#[test]
fn poll_interval_cannot_exceed_wait_timeout() {
    let mut raw = RawSettings::default();
    raw.proxy.lock_wait_timeout_ms = Some(10);
    raw.proxy.lock_poll_interval_ms = Some(20);

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "proxy.lock_poll_interval_ms",
            ..
        })
    ));
}

#[test]
fn upstream_must_be_http() {
    let mut raw = RawSettings::default();
    raw.proxy.upstream = Some("ftp://origin.test/".to_string());

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "proxy.upstream",
            ..
        })
    ));
}

#[test]
fn purge_allow_list_is_parsed() {
    let mut raw = RawSettings::default();
    raw.purge.allowed_ips = Some(vec!["10.0.0.1".to_string(), " ::1 ".to_string()]);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.purge.allowed_ips.len(), 2);

    let mut raw = RawSettings::default();
    raw.purge.allowed_ips = Some(vec!["localhost".to_string()]);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["strata"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_purge_arguments() {
    let args = CliArgs::parse_from([
        "strata",
        "purge",
        "--redis-url",
        "redis://cache.internal/",
        "https://example.org/posts?page=2",
    ]);

    match args.command.expect("purge command") {
        Command::Purge(purge) => {
            assert_eq!(purge.url, "https://example.org/posts?page=2");
            assert_eq!(
                purge.backend.redis_url.as_deref(),
                Some("redis://cache.internal/")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "strata",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--upstream",
        "http://origin:3000/",
        "--backend-kind",
        "memory",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(
                serve.overrides.upstream.as_deref(),
                Some("http://origin:3000/")
            );
            assert_eq!(
                serve.overrides.backend.backend_kind,
                Some(BackendKindArg::Memory)
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
#[serial_test::serial]
fn environment_overrides_file_values() {
    let vars = [
        ("STRATA__BACKEND__KIND", "memory"),
        ("STRATA__PURGE__ALLOWED_IPS", "10.0.0.1,10.0.0.2,::1"),
        ("STRATA__STORE__LOCK_NAMESPACE", "locks"),
    ];
    // SAFETY: serialized with every other test that touches the environment.
    unsafe {
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
    }

    let result = load(&CliArgs::parse_from(["strata", "purge", "/posts"]));

    unsafe {
        for (key, _) in vars {
            std::env::remove_var(key);
        }
    }

    let settings = result.expect("valid settings");
    assert_eq!(settings.backend.kind, BackendKind::Memory);
    assert_eq!(settings.store.lock_namespace, "locks");
    assert_eq!(settings.purge.allowed_ips.len(), 3);
}
