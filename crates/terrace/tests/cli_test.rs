#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

const STACK: &str = r#"
stack "demo"

provider "test" kind="mock"

resource "net" type="test:network" {
    cidr "10.0.0.0/16"
}

resource "vm" type="test:vm" {
    netId { $ref "net" "id" }
}

output "vmNetId" { $ref "vm" "netId" }
"#;

/// スタックディレクトリで実行するコマンド
fn terrace(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("terrace").unwrap();
    cmd.current_dir(dir)
        .env_remove("TERRACE_STACK_PATH")
        .env_remove("TERRACE_STAGE")
        .env("NO_COLOR", "1");
    cmd
}

fn stack_dir(content: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("stack.kdl"), content).unwrap();
    dir
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("terrace").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("outputs"));
}

/// バージョン表示が正しく動作することを確認
#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("terrace").unwrap();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("terrace"));
}

/// applyコマンドのヘルプが正しく表示されることを確認
#[test]
fn test_apply_help() {
    let mut cmd = Command::cargo_bin("terrace").unwrap();
    cmd.arg("apply")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[STAGE]"))
        .stdout(predicate::str::contains("--yes"))
        .stdout(predicate::str::contains("--parallelism"))
        .stdout(predicate::str::contains("--timeout"));
}

/// 不正なコマンドでエラーになることを確認
#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("terrace").unwrap();
    cmd.arg("invalid-command").assert().failure();
}

/// スタックファイルがない場所では失敗することを確認
#[test]
fn test_validate_without_stack() {
    let dir = tempfile::tempdir().unwrap();
    terrace(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("TERRACE_STACK_PATH"));
}

/// 位置引数と-sフラグの同時指定はエラーになることを確認
#[test]
fn test_stage_conflict() {
    let dir = stack_dir(STACK);
    terrace(dir.path())
        .args(["plan", "prod", "-s", "dev"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_validate_stack() {
    let dir = stack_dir(STACK);
    terrace(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("ノード: 2個"))
        .stdout(predicate::str::contains("vm (test:vm) ← net"));
}

#[test]
fn test_validate_reports_missing_provider() {
    let dir = stack_dir(r#"resource "vm" type="gcp:compute:Instance" {}"#);
    terrace(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("vm (gcp:compute:Instance)"));
}

#[test]
fn test_validate_rejects_cycle() {
    let dir = stack_dir(
        r#"
        provider "test" kind="mock"
        resource "a" type="test:a" { b { $ref "b" "id" } }
        resource "b" type="test:b" { a { $ref "a" "id" } }
        "#,
    );
    terrace(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("スタック定義エラー"));
}

/// --yes なしの apply は計画を表示するだけ
#[test]
fn test_apply_without_yes_only_plans() {
    let dir = stack_dir(STACK);
    terrace(dir.path())
        .arg("apply")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 to create"))
        .stdout(predicate::str::contains("cidr = 10.0.0.0/16"))
        .stdout(predicate::str::contains("netId = <net.id>"))
        .stdout(predicate::str::contains("--yes"));
    assert!(!dir.path().join(".terrace/default/state.json").exists());
}

/// apply → 再apply → outputs → destroy の一連の流れ
#[test]
fn test_apply_lifecycle() {
    let dir = stack_dir(STACK);

    terrace(dir.path())
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 created"))
        .stdout(predicate::str::contains("vmNetId = net_id"));
    assert!(dir.path().join(".terrace/default/state.json").exists());

    terrace(dir.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("変更はありません"));

    terrace(dir.path())
        .args(["apply", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 created, 0 updated, 2 unchanged"));

    terrace(dir.path())
        .args(["outputs", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""vmNetId": "net_id""#));

    terrace(dir.path())
        .args(["destroy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("削除が完了しました"));

    terrace(dir.path())
        .args(["destroy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("削除するリソースはありません"));
}

/// ステージ設定とシークレット
#[test]
fn test_apply_with_stage_config_and_secret() {
    let dir = stack_dir(
        r#"
        config {
            location "westeurope"
            admin-password secret=#true
        }
        provider "test" kind="mock"
        resource "rg" type="test:rg" {
            location { $config "location" }
        }
        resource "db" type="test:db" {
            conn { $format "pw={}" { - { $secret "admin-password" } } }
        }
        output "location" { $ref "rg" "location" }
        output "password" { $secret "admin-password" }
        output "conn" {
            $format "{}:{}" {
                - { $ref "db" "id" }
                - { $secret "admin-password" }
            }
        }
        "#,
    );
    std::fs::write(
        dir.path().join("terrace.prod.yaml"),
        "config:\n  location: japaneast\n",
    )
    .unwrap();

    terrace(dir.path())
        .args(["apply", "prod", "--yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("admin-password"));

    terrace(dir.path())
        .args(["apply", "prod", "--yes"])
        .env("TERRACE_SECRET_ADMIN_PASSWORD", "hunter2")
        .assert()
        .success()
        .stdout(predicate::str::contains("location = japaneast"))
        .stdout(predicate::str::contains("password = [secret]"))
        .stdout(predicate::str::contains("conn = [secret]"))
        .stdout(predicate::str::contains("hunter2").not());

    let state = std::fs::read_to_string(dir.path().join(".terrace/prod/state.json")).unwrap();
    assert!(!state.contains("hunter2"));

    terrace(dir.path())
        .args(["outputs", "prod", "--json"])
        .env("TERRACE_SECRET_ADMIN_PASSWORD", "hunter2")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""conn": "[secret]""#))
        .stdout(predicate::str::contains("hunter2").not());
}

/// 依存先の失敗は終了コード1になる
#[test]
fn test_apply_failure_exits_nonzero() {
    let dir = stack_dir(
        r#"
        provider "test" kind="mock"
        resource "vm" type="test:vm" {}
        resource "other" type="gcp:compute:Instance" {}
        "#,
    );
    terrace(dir.path())
        .args(["apply", "--yes"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("1 created"))
        .stdout(predicate::str::contains("1 failed"));
}
