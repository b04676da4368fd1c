// File: config_tests.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#[cfg(test)]
mod tests {
    use crate::config::*;
    use crate::error::FtwError;
    use pretty_assertions::assert_eq;
    use regex::Regex;
    use rstest::*;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_runner_config_default() {
        let config = RunnerConfig::default();

        assert!(config.include().is_none());
        assert!(config.exclude().is_none());
        assert_eq!(config.show_time(), false);
        assert_eq!(config.show_only_failed(), false);
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.read_timeout(), Duration::from_secs(1));
        assert_eq!(config.max_marker_retries(), 20);
        assert_eq!(config.max_marker_log_lines(), 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_set_show_time() {
        let mut config = RunnerConfig::new();

        config.set_show_time(true);
        assert_eq!(config.show_time(), true);

        config.set_show_time(false);
        assert_eq!(config.show_time(), false);
    }

    #[test]
    fn test_set_show_only_failed() {
        let mut config = RunnerConfig::new();
        config.set_show_only_failed(true);
        assert_eq!(config.show_only_failed(), true);
    }

    #[test]
    fn test_set_timeouts() {
        let mut config = RunnerConfig::new();
        config.set_connect_timeout(Duration::from_millis(250));
        config.set_read_timeout(Duration::from_millis(100));

        assert_eq!(config.connect_timeout(), Duration::from_millis(250));
        assert_eq!(config.read_timeout(), Duration::from_millis(100));
    }

    #[rstest]
    #[case(1, 1)]
    #[case(5, 100)]
    #[case(20, 500)]
    fn test_set_marker_limits(#[case] retries: usize, #[case] lines: usize) {
        let mut config = RunnerConfig::new();
        config.set_max_marker_retries(retries);
        config.set_max_marker_log_lines(lines);

        assert_eq!(config.max_marker_retries(), retries);
        assert_eq!(config.max_marker_log_lines(), lines);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_include_and_exclude_are_exclusive() {
        let mut config = RunnerConfig::new();
        config.set_include(Some(Regex::new("^920").unwrap()));
        assert!(config.validate().is_ok());

        config.set_exclude(Some(Regex::new("^930").unwrap()));
        assert!(matches!(
            config.validate(),
            Err(FtwError::Configuration(_))
        ));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let mut config = RunnerConfig::new();
        config.set_max_marker_retries(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ftw_config_defaults() {
        let config = FtwConfig::default();
        assert_eq!(config.logmarkerheadername, "X-CRS-Test");
        assert_eq!(config.mode, RunMode::Default);
        assert!(!config.is_cloud_mode());
        assert!(config.logfile.is_none());
        assert!(config.overrides().unwrap().is_empty());
    }

    #[test]
    fn test_ftw_config_from_yaml() {
        let yaml = r#"
logfile: /var/log/apache2/error.log
logmarkerheadername: X-Marker
mode: cloud
maxmarkerretries: 7
testoverride:
  input:
    dest_addr: 10.0.0.5
    port: 8080
  ignore:
    "^920": "known false positive"
  forcefail:
    "930110-1": "regression"
"#;
        let config = FtwConfig::from_yaml(yaml).unwrap();

        assert_eq!(
            config.logfile,
            Some(PathBuf::from("/var/log/apache2/error.log"))
        );
        assert_eq!(config.logmarkerheadername, "X-Marker");
        assert!(config.is_cloud_mode());
        assert_eq!(config.maxmarkerretries, Some(7));
        assert_eq!(config.maxmarkerloglines, None);
        assert_eq!(config.testoverride.input.dest_addr.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.testoverride.input.port, Some(8080));
        assert_eq!(config.testoverride.input.protocol, None);
    }

    #[test]
    fn test_ftw_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "logfile: /tmp/modsec.log").unwrap();
        file.flush().unwrap();

        let config = FtwConfig::from_file(file.path()).unwrap();
        assert_eq!(config.logfile, Some(PathBuf::from("/tmp/modsec.log")));
        assert_eq!(config.logmarkerheadername, DEFAULT_LOG_MARKER_HEADER);
    }

    #[test]
    fn test_ftw_config_bad_yaml() {
        let err = FtwConfig::from_yaml("mode: [nonsense").unwrap_err();
        assert!(matches!(err, FtwError::Yaml { .. }));

        assert!(FtwConfig::from_yaml("mode: sideways").is_err());
    }

    fn overrides(ignore: &[&str], forcefail: &[&str], forcepass: &[&str]) -> Overrides {
        let table = |keys: &[&str]| {
            keys.iter()
                .map(|k| (k.to_string(), format!("reason for {}", k)))
                .collect()
        };
        Overrides::compile(&TestOverride {
            input: InputOverride::default(),
            ignore: table(ignore),
            forcefail: table(forcefail),
            forcepass: table(forcepass),
        })
        .unwrap()
    }

    #[rstest]
    #[case("920100-1", Some(ForcedResult::Ignore))]
    #[case("930110-1", Some(ForcedResult::ForceFail))]
    #[case("941100-1", Some(ForcedResult::ForcePass))]
    #[case("942100-1", None)]
    fn test_override_lookup(#[case] title: &str, #[case] expected: Option<ForcedResult>) {
        let overrides = overrides(&["^920"], &["^930"], &["^941"]);
        assert_eq!(overrides.lookup(title).map(|(forced, _)| forced), expected);
    }

    #[test]
    fn test_override_precedence() {
        let overrides = overrides(&["^920100"], &["^920"], &["."]);

        assert_eq!(
            overrides.lookup("920100-1"),
            Some((ForcedResult::Ignore, "reason for ^920100"))
        );
        assert_eq!(
            overrides.lookup("920200-1").map(|(f, _)| f),
            Some(ForcedResult::ForceFail)
        );
        assert_eq!(
            overrides.lookup("949110-1").map(|(f, _)| f),
            Some(ForcedResult::ForcePass)
        );
    }

    #[test]
    fn test_invalid_override_pattern() {
        let mut table = TestOverride::default();
        table
            .ignore
            .insert("(unclosed".to_string(), "oops".to_string());
        assert!(matches!(
            Overrides::compile(&table),
            Err(FtwError::Configuration(_))
        ));
    }
}
