use std::{fs, path::PathBuf, process::Command};

#[test]
fn basic_workflow() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("basic_workflow");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config_path = test_dir.join("config.toml");
    let config_contents = String::new()
        + "[disease]\n"
        + "beta_s = 0.9\n"
        + "beta_p = 0.1\n"
        + "gamma = 0.3\n"
        + "\n"
        + "[decision]\n"
        + "rate = 0.05\n"
        + "horizon = 20\n"
        + "\n"
        + "[decision.payoffs]\n"
        + "susceptible = 1.0\n"
        + "protected = 0.95\n"
        + "infected = 0.1\n"
        + "recovered = 0.95\n"
        + "\n"
        + "[init]\n"
        + "susceptible = 190\n"
        + "protected = 0\n"
        + "infected = 10\n"
        + "recovered = 0\n"
        + "\n"
        + "[run]\n"
        + "time_steps = 20000\n"
        + "seed = 7\n";

    fs::write(&config_path, config_contents).expect("failed to write config file");

    fn run_bin(args: &[&str]) {
        let bin = PathBuf::from(env!("CARGO_BIN_EXE_spir"));

        let output = Command::new(bin)
            .args(args)
            .output()
            .expect("failed to execute command");

        let stdout_str =
            std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
        let stderr_str =
            std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

        assert!(
            output.status.success(),
            "failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
        );
    }

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    run_bin(&["--sim-dir", test_dir_str, "create"]);
    run_bin(&["--sim-dir", test_dir_str, "create"]);

    assert!(test_dir.join("run-0000").join("series.msgpack").is_file());
    assert!(test_dir.join("run-0001").join("series.msgpack").is_file());

    run_bin(&["--sim-dir", test_dir_str, "analyze"]);

    let results = fs::read_to_string(test_dir.join("results.json"))
        .expect("failed to read analysis results");
    assert!(results.contains("peak_prevalence"));
    assert!(results.contains("attack_rate"));
    assert!(results.contains("run_length"));

    run_bin(&["--sim-dir", test_dir_str, "clean"]);

    assert!(!test_dir.join("run-0000").exists());
    assert!(!test_dir.join("results.json").exists());

    fs::remove_dir_all(&test_dir).ok();
}
