use assert_cmd::prelude::*; // Add methods on commands
use predicates::prelude::*; // Used for writing assertions
use std::fs;
use std::process::Command; // Run programs

#[test]
fn help_lists_kill_flag() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("provision")?;

    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--kill"))
        .stdout(predicate::str::contains("--topology"));

    Ok(())
}

#[test]
fn missing_config_file_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let mut cmd = Command::cargo_bin("provision")?;

    cmd.arg("--config").arg(dir.path().join("absent.toml")).arg("--kill");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));

    Ok(())
}

#[test]
fn kill_conflicts_with_setup_only() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("provision")?;

    cmd.arg("--kill").arg("--setup-only");

    cmd.assert().failure();

    Ok(())
}

#[test]
fn unknown_topology_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("provision")?;

    cmd.arg("--topology").arg("ring");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("ring"));

    Ok(())
}

#[test]
fn setup_only_needs_the_env_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("provision.toml");
    let env_file = dir.path().join("env_variables.txt");
    fs::write(
        &config,
        format!(
            "env_file = {:?}\n\n[remote]\ncommands = []\n",
            env_file.display().to_string()
        ),
    )?;

    let mut cmd = Command::cargo_bin("provision")?;
    cmd.env_remove("PROVISION_CONFIG")
        .arg("--config")
        .arg(&config)
        .arg("--setup-only");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));

    fs::write(
        &env_file,
        "INSTANCE_IP=192.0.2.10\nPRIVATE_KEY_FILE=key.pem\n",
    )?;
    let mut cmd = Command::cargo_bin("provision")?;
    cmd.arg("--config").arg(&config).arg("--setup-only");
    // nothing to run remotely, so no machine is contacted
    cmd.assert().success();

    Ok(())
}
