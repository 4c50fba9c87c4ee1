use std::{fs, path::Path, path::PathBuf, process::Command};

fn history_contents() -> String {
    let mut contents = String::new();
    for (year, n_clusters) in [(1850, 40), (1860, 45), (1870, 50)] {
        for cluster in 0..n_clusters {
            let elapsed = (year - 1850) as f64;
            let base = 2000.0 + 1500.0 * cluster as f64;
            let rate = 10.0 + 3.0 * cluster as f64 + (cluster % 7) as f64;
            let population = base + elapsed * rate;
            contents += &format!(
                "[[population]]\ncluster = {cluster}\nyear = {year}\npopulation = {population:.1}\n\n"
            );
        }
    }
    contents
}

fn set_up(name: &str, config_contents: &str) -> PathBuf {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name);

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    fs::write(test_dir.join("config.toml"), config_contents).expect("failed to write config file");
    fs::write(test_dir.join("history.toml"), history_contents())
        .expect("failed to write history file");

    test_dir
}

fn run_bin(test_dir: &Path, args: &[&str]) {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_clustersim"));

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    let output = Command::new(bin)
        .arg("--sim-dir")
        .arg(test_dir_str)
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

#[test]
fn basic_workflow() {
    let config_contents = String::new()
        + "[model]\n"
        + "kind = \"duranton\"\n"
        + "relocation_prob = 0.01\n"
        + "\n"
        + "[lumps]\n"
        + "dist = \"log_normal\"\n"
        + "mu = 5.0\n"
        + "sigma = 1.0\n"
        + "\n"
        + "[output]\n"
        + "n_steps = 20\n"
        + "seed = 7\n"
        + "\n"
        + "[analysis]\n"
        + "frequency = 5\n"
        + "zipf_threshold = 5000.0\n";

    let test_dir = set_up("basic_workflow", &config_contents);

    run_bin(&test_dir, &["create"]);
    run_bin(&test_dir, &["create"]);

    run_bin(&test_dir, &["resume", "--run-idx", "0"]);
    run_bin(&test_dir, &["resume", "--run-idx", "0"]);

    run_bin(&test_dir, &["resume", "--run-idx", "1"]);
    run_bin(&test_dir, &["resume", "--run-idx", "1"]);

    let run_dir = test_dir.join("run-0000");
    for file_idx in 0..3 {
        assert!(run_dir.join(format!("trajectory-{file_idx:04}.msgpack")).exists());
    }

    run_bin(&test_dir, &["analyze"]);

    let results = fs::read_to_string(run_dir.join("results.json")).expect("failed to read results");
    let results: serde_json::Value =
        serde_json::from_str(&results).expect("failed to parse results");
    let counts = results[0]["cluster_count"]
        .as_array()
        .expect("cluster count series missing");
    assert_eq!(counts.len(), 13);
    assert_eq!(counts[0]["year"], 1850);
    assert_eq!(counts[0]["value"], 40);

    run_bin(&test_dir, &["clean"]);
    assert!(!run_dir.join("results.json").exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn ensemble_workflow() {
    let config_contents = String::new()
        + "[model]\n"
        + "kind = \"barthelemy\"\n"
        + "\n"
        + "[output]\n"
        + "n_steps = 10\n"
        + "seed = 3\n";

    let test_dir = set_up("ensemble_workflow", &config_contents);

    run_bin(&test_dir, &["fit"]);
    let calib = fs::read_to_string(test_dir.join("calibration.json"))
        .expect("failed to read calibration");
    let calib: serde_json::Value = serde_json::from_str(&calib).expect("failed to parse calibration");
    for curve in ["cluster_count", "total_population", "mean_growth", "std_growth"] {
        assert!(calib[curve]["x_vals"].is_array(), "{curve} missing");
    }

    run_bin(&test_dir, &["create", "--n-runs", "3"]);
    for run_idx in 0..3 {
        let run_dir = test_dir.join(format!("run-{run_idx:04}"));
        assert!(run_dir.join("trajectory-0000.msgpack").exists());
        assert!(run_dir.join("checkpoint.msgpack").exists());
    }

    run_bin(&test_dir, &["resume", "--run-idx", "2"]);
    run_bin(&test_dir, &["analyze"]);

    fs::remove_dir_all(&test_dir).ok();
}
