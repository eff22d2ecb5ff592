mod support;

use predicates::str::contains;
use serde_json::Value;

use support::TestRoot;

fn add_task(root: &TestRoot, args: &[&str]) -> Value {
    let mut full = vec!["add"];
    full.extend_from_slice(args);
    root.json("mom", "admin", &full)["task"].clone()
}

#[test]
fn init_creates_config_and_data_dir() -> Result<(), Box<dyn std::error::Error>> {
    let root = TestRoot::new();

    let data = root.json("mom", "admin", &["init"]);
    assert_eq!(data["created"]["config"], true);
    assert_eq!(data["created"]["data_dir"], true);
    assert!(root.path().join(".famtask.toml").exists());
    assert!(root.data_dir().exists());

    let config = std::fs::read_to_string(root.path().join(".famtask.toml"))?;
    assert!(config.contains("mom"));

    let again = root.json("mom", "admin", &["init"]);
    assert_eq!(again["created"]["config"], false);
    assert_eq!(again["created"]["data_dir"], false);
    Ok(())
}

#[test]
fn add_list_and_show_round_trip() {
    let root = TestRoot::new();
    let task = add_task(
        &root,
        &[
            "Soccer practice",
            "--date",
            "2099-03-02",
            "--time",
            "17:30",
            "--category",
            "sports",
            "--subtask",
            "Pack bag",
        ],
    );
    let id = task["id"].as_str().expect("id").to_string();
    assert_eq!(task["dueDate"], "2099-03-02");
    assert_eq!(task["dueTime"], "17:30");
    assert_eq!(task["createdBy"], "mom");
    assert_eq!(task["familyId"], support::FAMILY);
    assert_eq!(task["subtasks"][0]["title"], "Pack bag");

    let list = root.json("dad", "parent", &["list"]);
    assert_eq!(list["total"], 1);
    assert_eq!(list["tasks"][0]["id"], id.as_str());

    let shown = root.json("dad", "parent", &["show", id.as_str()]);
    assert_eq!(shown["title"], "Soccer practice");

    let by_date = root.json("dad", "parent", &["list", "--date", "2099-03-03"]);
    assert_eq!(by_date["total"], 0);
}

#[test]
fn private_tasks_are_hidden_from_others() {
    let root = TestRoot::new();
    let task = add_task(&root, &["Birthday gift", "--date", "2099-03-02", "--private"]);
    let id = task["id"].as_str().expect("id");

    assert_eq!(root.json("mom", "admin", &["list"])["total"], 1);
    assert_eq!(root.json("dad", "parent", &["list"])["total"], 0);

    root.as_user("dad", "parent")
        .args(["show", id])
        .assert()
        .code(2)
        .stderr(contains("not found"));
}

#[test]
fn toggling_a_weekly_task_rolls_it_forward() {
    let root = TestRoot::new();
    let task = add_task(
        &root,
        &["Bins", "--date", "2099-03-02", "--recurrence", "weekly"],
    );
    let id = task["id"].as_str().expect("id");

    let toggled = root.json("mom", "admin", &["toggle", id]);
    assert_eq!(toggled["status"], "applied");
    assert_eq!(toggled["effect"], "rolled_forward");
    assert_eq!(toggled["due_date"], "2099-03-09");

    let shown = root.json("mom", "admin", &["show", id]);
    assert_eq!(shown["dueDate"], "2099-03-09");
    assert_eq!(shown["completed"], false);
}

#[test]
fn toggling_a_one_off_task_completes_and_reopens() {
    let root = TestRoot::new();
    let task = add_task(&root, &["Dentist", "--date", "2099-03-02"]);
    let id = task["id"].as_str().expect("id");

    assert_eq!(root.json("mom", "admin", &["toggle", id])["effect"], "completed");
    assert_eq!(root.json("mom", "admin", &["show", id])["completed"], true);
    assert_eq!(root.json("mom", "admin", &["toggle", id])["effect"], "reopened");
}

#[test]
fn update_changes_fields() {
    let root = TestRoot::new();
    let task = add_task(&root, &["Dentist", "--date", "2099-03-02", "--time", "09:00"]);
    let id = task["id"].as_str().expect("id");

    let updated = root.json(
        "mom",
        "admin",
        &["update", id, "--title", "Orthodontist", "--clear-time"],
    );
    assert_eq!(updated["status"], "applied");

    let shown = root.json("mom", "admin", &["show", id]);
    assert_eq!(shown["title"], "Orthodontist");
    assert!(shown.get("dueTime").is_none());
}

#[test]
fn skip_and_delete() {
    let root = TestRoot::new();
    let task = add_task(
        &root,
        &["Piano", "--date", "2099-03-02", "--recurrence", "daily"],
    );
    let id = task["id"].as_str().expect("id");

    let skipped = root.json("mom", "admin", &["skip", id]);
    assert_eq!(skipped["due_date"], "2099-03-03");

    let deleted = root.json("mom", "admin", &["delete", id]);
    assert_eq!(deleted["status"], "applied");
    assert_eq!(root.json("mom", "admin", &["list"])["total"], 0);
    assert_eq!(root.json("mom", "admin", &["list", "--all"])["total"], 1);
}

#[test]
fn dependent_delete_waits_for_approval() {
    let root = TestRoot::new();
    let task = add_task(&root, &["Dishes", "--date", "2099-03-02"]);
    let id = task["id"].as_str().expect("id");

    let pending = root.json("kid", "dependent", &["delete", id]);
    assert_eq!(pending["status"], "pending_approval");
    assert_eq!(root.json("mom", "admin", &["list"])["total"], 1);

    let approvals = root.json("dad", "parent", &["approvals", "list"]);
    assert_eq!(approvals["total"], 1);
    let request = &approvals["requests"][0];
    assert_eq!(request["action"], "delete");
    assert_eq!(request["requestedBy"], "kid");
    let request_id = request["id"].as_str().expect("request id");

    root.as_user("kid", "dependent")
        .args(["approvals", "approve", request_id])
        .assert()
        .code(3);

    root.as_user("dad", "parent")
        .args(["approvals", "approve", request_id])
        .assert()
        .code(3);

    let approved = root.json("mom", "admin", &["approvals", "approve", request_id]);
    assert_eq!(approved["status"], "approved");
    assert_eq!(root.json("mom", "admin", &["list"])["total"], 0);
    assert_eq!(root.json("dad", "parent", &["approvals", "list"])["total"], 0);

    root.as_user("mom", "admin")
        .args(["approvals", "approve", request_id])
        .assert()
        .code(2);
}

#[test]
fn dependent_toggle_is_applied_on_approval() {
    let root = TestRoot::new();
    let task = add_task(
        &root,
        &["Homework", "--date", "2099-03-02", "--recurrence", "weekly"],
    );
    let id = task["id"].as_str().expect("id");

    let pending = root.json("kid", "dependent", &["toggle", id]);
    assert_eq!(pending["status"], "pending_approval");
    assert_eq!(root.json("kid", "dependent", &["show", id])["dueDate"], "2099-03-02");

    let approvals = root.json("mom", "admin", &["approvals", "list"]);
    let request_id = approvals["requests"][0]["id"].as_str().expect("request id");
    root.json("mom", "admin", &["approvals", "approve", request_id]);

    assert_eq!(root.json("kid", "dependent", &["show", id])["dueDate"], "2099-03-09");
}

#[test]
fn rejected_requests_change_nothing() {
    let root = TestRoot::new();
    let task = add_task(&root, &["Dishes", "--date", "2099-03-02"]);
    let id = task["id"].as_str().expect("id");

    root.json("kid", "dependent", &["update", id, "--title", "No dishes"]);
    let approvals = root.json("mom", "admin", &["approvals", "list"]);
    let request_id = approvals["requests"][0]["id"].as_str().expect("request id");

    let rejected = root.json("mom", "admin", &["approvals", "reject", request_id]);
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(root.json("mom", "admin", &["show", id])["title"], "Dishes");
}

#[test]
fn history_lists_completed_past_tasks() {
    let root = TestRoot::new();
    let old = add_task(&root, &["Old chore", "--date", "2020-01-06"]);
    let old_id = old["id"].as_str().expect("id");
    add_task(&root, &["Open chore", "--date", "2020-01-07"]);
    root.json("mom", "admin", &["toggle", old_id]);

    let history = root.json("mom", "admin", &["history", "--before", "2020-02-01"]);
    assert_eq!(history["total"], 1);
    assert_eq!(history["tasks"][0]["id"], old_id);
}

#[test]
fn reminders_plan_covers_future_tasks() {
    let root = TestRoot::new();
    add_task(&root, &["Future", "--date", "2099-03-02", "--time", "18:00"]);
    add_task(&root, &["Past", "--date", "2020-01-06"]);

    let plan = root.json("mom", "admin", &["reminders"]);
    assert_eq!(plan["tasks"], 1);
    assert_eq!(plan["reminders"].as_array().map(Vec::len), Some(3));
}

#[test]
fn session_comes_from_config() {
    let root = TestRoot::new();
    root.write_config("[session]\nuid = \"mom\"\nfamily_id = \"fam-1\"\nrole = \"admin\"\n");

    root.cmd()
        .args(["add", "Laundry", "--date", "2099-03-02"])
        .assert()
        .success()
        .stdout(contains("Laundry"));
    assert_eq!(root.json("dad", "parent", &["list"])["total"], 1);
}

#[test]
fn missing_session_is_a_user_error() {
    let root = TestRoot::new();
    let output = root
        .cmd()
        .args(["--json", "list"])
        .output()
        .expect("run famtask");
    assert_eq!(output.status.code(), Some(2));

    let value: Value = serde_json::from_slice(&output.stdout).expect("json error");
    assert_eq!(value["status"], "error");
    assert_eq!(value["command"], "list");
    assert_eq!(value["error"]["kind"], "user_error");
}

#[test]
fn invalid_arguments_are_rejected() {
    let root = TestRoot::new();
    root.as_user("mom", "admin")
        .args(["add", "Gym", "--recurrence", "fortnightly"])
        .assert()
        .code(2)
        .stderr(contains("unknown recurrence"));
    root.as_user("mom", "admin")
        .args(["add", "Gym", "--weekdays", "1,9", "--recurrence", "custom_weekly"])
        .assert()
        .code(2);
}

#[test]
fn notices_are_written_as_json_lines() -> Result<(), Box<dyn std::error::Error>> {
    let root = TestRoot::new();
    let task = add_task(&root, &["Dishes", "--date", "2099-03-02"]);
    let id = task["id"].as_str().expect("id");
    let notices = root.path().join("notices.jsonl");

    root.as_user("kid", "dependent")
        .arg("--notices")
        .arg(&notices)
        .args(["delete", id])
        .assert()
        .success();

    let contents = std::fs::read_to_string(&notices)?;
    let line: Value = serde_json::from_str(contents.lines().next().ok_or("no notice")?)?;
    assert_eq!(line["kind"], "approval_pending");
    assert_eq!(line["action"], "delete");
    assert_eq!(line["task_id"], id);
    Ok(())
}
