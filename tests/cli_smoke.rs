use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn famtask_help_works() {
    Command::cargo_bin("famtask")
        .expect("binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Family task lifecycle engine"));
}

#[test]
fn subcommand_help_works() {
    let subcommands = [
        "init",
        "add",
        "list",
        "show",
        "update",
        "toggle",
        "subtask",
        "skip",
        "delete",
        "history",
        "approvals",
        "next-date",
        "reminders",
    ];

    for cmd in subcommands {
        Command::cargo_bin("famtask")
            .expect("binary")
            .arg(cmd)
            .arg("--help")
            .assert()
            .success();
    }
}

#[test]
fn approvals_subcommand_help_works() {
    for cmd in ["list", "approve", "reject"] {
        Command::cargo_bin("famtask")
            .expect("binary")
            .args(["approvals", cmd, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn next_date_needs_no_session() {
    Command::cargo_bin("famtask")
        .expect("binary")
        .env_remove("FAMTASK_UID")
        .args(["next-date", "2024-01-31", "monthly"])
        .assert()
        .success()
        .stdout(contains("2024-02-29"));
}
