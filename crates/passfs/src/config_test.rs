// Copyright (c) Contributors to the passfs project.
// SPDX-License-Identifier: Apache-2.0

use rstest::rstest;

use super::Config;

#[rstest]
fn test_config_defaults() {
    let config = Config::default();
    assert_eq!(config.vfs.root.to_str(), Some("/opt/users"));
    assert_eq!(config.identity.passwd_file.to_str(), Some("/etc/passwd"));
    assert_eq!(config.provision.create_tool, "adduser");
    assert_eq!(config.provision.delete_tool, "userdel");
}

#[rstest]
fn test_config_load_string() {
    let config = Config::load_string(
        "[vfs]\nroot = \"/srv/users\"\n\n[provision]\ntimeout_seconds = 5\n",
    )
    .unwrap();
    assert_eq!(config.vfs.root.to_str(), Some("/srv/users"));
    assert_eq!(config.provision.timeout_seconds, 5);
    // unspecified sections keep their defaults
    assert_eq!(config.identity.passwd_file.to_str(), Some("/etc/passwd"));
}

#[rstest]
fn test_config_load_string_invalid() {
    Config::load_string("vfs = 42")
        .expect_err("a scalar where a table is expected should fail to load");
}
