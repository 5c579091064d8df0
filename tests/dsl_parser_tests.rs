//! End-to-end tests for the plan DSL front end.

use forgeops::dsl;
use forgeops::plan::Connection;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn parses_a_complete_plan() {
    let source = r#"
# demo plan
node 'web1' {
  connection => local
  address => '10.0.0.5'
  variables => { region => 'eu-west', tier => 'front' }
}

task 'demo' on 'web1' {
  file { '/tmp/x':
    ensure  => present,
    content => 'hi'
  }
}
"#;
    let plan = dsl::parse(source).unwrap();

    let host = plan.host("web1").unwrap();
    assert_eq!(host.connection, Connection::Local);
    assert_eq!(host.address.as_deref(), Some("10.0.0.5"));
    assert_eq!(host.variables["region"], json!("eu-west"));

    assert_eq!(plan.tasks.len(), 1);
    let task = &plan.tasks[0];
    assert_eq!(task.name, "demo");
    assert_eq!(task.hosts, vec!["web1"]);

    let action = &task.actions[0];
    assert_eq!(action.kind, "file");
    assert_eq!(action.data["name"], json!("/tmp/x"));
    assert_eq!(action.data["path"], json!("/tmp/x"));
    assert_eq!(action.data["state"], json!("present"));
    assert_eq!(action.data["content"], json!("hi"));
}

#[test]
fn plans_without_nodes_get_an_implicit_local_host() {
    let plan = dsl::parse("task 't' on 'local' { exec { 'x': command => 'true' } }").unwrap();
    assert_eq!(plan.hosts.len(), 1);
    assert_eq!(plan.host("local").unwrap().connection, Connection::Local);
}

#[test]
fn node_extra_attributes_fold_into_variables() {
    let plan = dsl::parse("node 'db' { connection => local, datacenter => 'ams1' }").unwrap();
    let host = plan.host("db").unwrap();
    assert_eq!(host.variables["datacenter"], json!("ams1"));
}

#[test]
fn package_list_titles_expand_to_packages() {
    let plan = dsl::parse(
        "task 't' on 'local' { package { ['nginx', 'curl']: ensure => present } }",
    )
    .unwrap();
    let action = &plan.tasks[0].actions[0];
    assert_eq!(action.data["packages"], json!(["nginx", "curl"]));
    assert!(!action.data.contains_key("name"));
}

#[test]
fn list_titles_are_rejected_for_other_kinds() {
    let err = dsl::parse("task 't' on 'local' { file { ['/a', '/b']: ensure => present } }")
        .unwrap_err();
    assert!(err.to_string().contains("only package resources"));
}

#[test]
fn ensure_is_an_alias_that_never_overwrites_state() {
    let plan = dsl::parse(
        "task 't' on 'local' { file { '/a': state => directory, ensure => present } }",
    )
    .unwrap();
    assert_eq!(plan.tasks[0].actions[0].data["state"], json!("directory"));

    let plan = dsl::parse(
        "task 't' on 'local' { file { '/a': ensure => present, state => directory } }",
    )
    .unwrap();
    // Explicit state wins regardless of declaration order.
    assert_eq!(plan.tasks[0].actions[0].data["state"], json!("directory"));
}

#[test]
fn depends_on_accumulates_scalars_and_lists() {
    let plan = dsl::parse(
        r#"
task 't' on 'local' {
  exec { 'later':
    command    => 'true',
    depends_on => 'file./a',
    depends_on => ['file./b', 'file./c']
  }
}
"#,
    )
    .unwrap();
    assert_eq!(
        plan.tasks[0].actions[0].depends_on,
        vec!["file./a", "file./b", "file./c"]
    );
}

#[test]
fn branches_nest_resources() {
    let plan = dsl::parse(
        r#"
task 't' on 'local' {
  exec { 'deploy':
    command    => '/usr/local/bin/deploy',
    on_success => {
      service { 'app': state => running }
    },
    on_failure => {
      exec { 'alert': command => '/usr/local/bin/alert' }
      file { '/var/run/deploy.failed': ensure => present }
    }
  }
}
"#,
    )
    .unwrap();
    let action = &plan.tasks[0].actions[0];
    assert_eq!(action.on_success.len(), 1);
    assert_eq!(action.on_success[0].kind, "service");
    assert_eq!(action.on_failure.len(), 2);
    assert_eq!(action.on_failure[1].kind, "file");
}

#[test]
fn scalar_types_round_trip() {
    let plan = dsl::parse(
        r#"
task 't' on 'local' {
  sysctl { net.ipv4.ip_forward:
    value         => 1,
    persist       => true,
    apply_runtime => FALSE
  }
}
"#,
    )
    .unwrap();
    let data = &plan.tasks[0].actions[0].data;
    assert_eq!(data["name"], json!("net.ipv4.ip_forward"));
    assert_eq!(data["value"], json!(1));
    assert_eq!(data["persist"], json!(true));
    assert_eq!(data["apply_runtime"], json!(false));
}

#[test]
fn task_host_lists() {
    let plan = dsl::parse(
        "node 'a' {} node 'b' {} task 't' on ['a', 'b'] { exec { 'x': command => 'true' } }",
    )
    .unwrap();
    assert_eq!(plan.tasks[0].hosts, vec!["a", "b"]);
}

#[test]
fn parse_errors_carry_positions() {
    let err = dsl::parse("task 'broken' on 'local' {\n  file { '/a' content => 'x' }\n}")
        .unwrap_err();
    let (line, _column) = err.position().unwrap();
    assert_eq!(line, 2);
}

#[test]
fn parsing_is_deterministic() {
    let source = r#"
node 'web' { connection => local }
task 't' on 'web' {
  package { ['a', 'b']: ensure => present }
  file { '/etc/motd': content => 'hello' }
}
"#;
    assert_eq!(dsl::parse(source).unwrap(), dsl::parse(source).unwrap());
}
