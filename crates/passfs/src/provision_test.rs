// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use rstest::rstest;

use super::{validate_username, Provisioner, SystemProvisioner};
use crate::config::Provision;
use crate::identity::PasswdFile;
use crate::Error;

const PASSWD: &str = "alice:x:1000:1000:Alice:/home/alice:/bin/bash\n";

fn write_tool(dir: &Path, name: &str, script: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn fixture(create_tool: &str, delete_tool: &str) -> (tempfile::TempDir, SystemProvisioner<PasswdFile>) {
    let tmpdir = tempfile::tempdir().unwrap();
    let passwd = tmpdir.path().join("passwd");
    std::fs::write(&passwd, PASSWD).unwrap();
    let options = Provision {
        create_tool: create_tool.to_string(),
        delete_tool: delete_tool.to_string(),
        timeout_seconds: 5,
    };
    let bridge = SystemProvisioner::new(PasswdFile::new(passwd), options);
    (tmpdir, bridge)
}

#[rstest]
#[case("alice", true)]
#[case("", false)]
#[case("a/b", false)]
#[case("/alice", false)]
fn test_validate_username(#[case] name: &str, #[case] ok: bool) {
    assert_eq!(validate_username(name).is_ok(), ok);
}

#[rstest]
#[tokio::test]
async fn test_create_conflict_before_spawn() {
    // the create tool would fail loudly if it were ever invoked
    let (_tmpdir, bridge) = fixture("false", "false");
    let err = bridge.create_account("alice").await.unwrap_err();
    assert!(matches!(err, Error::AccountExists(name) if name == "alice"));
}

#[rstest]
#[tokio::test]
async fn test_create_appends_record() {
    let tmpdir = tempfile::tempdir().unwrap();
    let passwd = tmpdir.path().join("passwd");
    std::fs::write(&passwd, PASSWD).unwrap();
    let create = write_tool(
        tmpdir.path(),
        "adduser-stub",
        &format!(
            "#!/bin/sh\necho \"eve:x:1003:1003::/home/eve:/bin/sh\" >> {}\n",
            passwd.display()
        ),
    );
    let options = Provision {
        create_tool: create,
        delete_tool: "false".to_string(),
        timeout_seconds: 5,
    };
    let bridge = SystemProvisioner::new(PasswdFile::new(passwd), options);

    let record = bridge.create_account("eve").await.unwrap();
    assert_eq!(record.uid, 1003);
    assert_eq!(record.home, "/home/eve");
}

#[rstest]
#[tokio::test]
async fn test_create_tool_failure() {
    let (_tmpdir, bridge) = fixture("false", "false");
    let err = bridge.create_account("eve").await.unwrap_err();
    assert!(matches!(err, Error::ProcessFailed { code: 1, .. }));
}

#[rstest]
#[tokio::test]
async fn test_create_missing_tool() {
    let (_tmpdir, bridge) = fixture("/nonexistent/adduser", "false");
    let err = bridge.create_account("eve").await.unwrap_err();
    assert!(matches!(err, Error::ProcessSpawnError { .. }));
}

#[rstest]
#[tokio::test]
async fn test_delete_unknown_account() {
    let (_tmpdir, bridge) = fixture("false", "true");
    let err = bridge.delete_account("mallory").await.unwrap_err();
    assert!(matches!(err, Error::UserNotFound(name) if name == "mallory"));
}

#[rstest]
#[tokio::test]
async fn test_delete_existing_account() {
    let (_tmpdir, bridge) = fixture("false", "true");
    bridge.delete_account("alice").await.unwrap();
}

#[rstest]
#[tokio::test]
async fn test_tool_timeout_is_bounded() {
    let tmpdir = tempfile::tempdir().unwrap();
    let passwd = tmpdir.path().join("passwd");
    std::fs::write(&passwd, PASSWD).unwrap();
    let slow = write_tool(tmpdir.path(), "slow-tool", "#!/bin/sh\nsleep 30\n");
    let options = Provision {
        create_tool: "false".to_string(),
        delete_tool: slow,
        timeout_seconds: 1,
    };
    let bridge = SystemProvisioner::new(PasswdFile::new(passwd), options);
    let err = bridge.delete_account("alice").await.unwrap_err();
    assert!(matches!(err, Error::ProcessTimeout { seconds: 1, .. }));
}
