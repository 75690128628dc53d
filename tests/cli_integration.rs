use assert_cmd::Command;
use predicates::prelude::*;

fn write_note(root: &std::path::Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[test]
fn scan_and_stats_round_trip() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let config_dir = temp.path().join("config");
    let vault_root = temp.path().join("vault");
    std::fs::create_dir_all(vault_root.join(".obsidian"))?;
    write_note(&vault_root, "a.md", "#topic\n[[b]]\n");
    write_note(&vault_root, "b.md", "# B\n");

    let mut scan = Command::cargo_bin("vaultctl")?;
    scan.env("VAULT_ENGINE_CONFIG_DIR", &config_dir)
        .arg("scan")
        .arg(&vault_root)
        .arg("--analyze");
    scan.assert()
        .success()
        .stdout(predicate::str::contains("scanned 2 notes"))
        .stdout(predicate::str::contains("resolved 1/1 links"));

    let mut vaults = Command::cargo_bin("vaultctl")?;
    vaults.env("VAULT_ENGINE_CONFIG_DIR", &config_dir).arg("vaults");
    vaults.assert().success().stdout(predicate::str::contains("notes)"));

    Ok(())
}

#[test]
fn stats_on_unknown_vault_exits_with_not_found_code() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let config_dir = temp.path().join("config");

    let mut cmd = Command::cargo_bin("vaultctl")?;
    cmd.env("VAULT_ENGINE_CONFIG_DIR", &config_dir)
        .arg("stats")
        .arg("nonexistent-vault-id");
    cmd.assert().code(2);
    Ok(())
}
