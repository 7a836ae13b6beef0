// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local administrator-account audit.
//!
//! `admin_discover` enumerates accounts with administrative rights;
//! `admin_demote` is delegated to a platform layer this build does not
//! ship, so it degrades to a typed failure rather than guessing at
//! account mutations.

use serde_json::json;

/// Groups whose members hold administrative rights on Unix.
#[cfg(unix)]
const ADMIN_GROUPS: [&str; 3] = ["sudo", "wheel", "admin"];

/// Enumerate local admin accounts.
#[cfg(unix)]
pub fn discover() -> anyhow::Result<serde_json::Value> {
    let contents = std::fs::read_to_string("/etc/group")?;
    let mut admins: Vec<String> = Vec::new();

    for line in contents.lines() {
        let mut fields = line.split(':');
        let group = fields.next().unwrap_or_default();
        if !ADMIN_GROUPS.contains(&group) {
            continue;
        }
        let members = fields.nth(2).unwrap_or_default();
        for member in members.split(',').filter(|m| !m.is_empty()) {
            if !admins.iter().any(|a| a == member) {
                admins.push(member.to_owned());
            }
        }
    }
    // root is always an administrator.
    if !admins.iter().any(|a| a == "root") {
        admins.insert(0, "root".to_owned());
    }

    Ok(json!({ "admins": admins }))
}

#[cfg(not(unix))]
pub fn discover() -> anyhow::Result<serde_json::Value> {
    let out = std::process::Command::new("net")
        .args(["localgroup", "Administrators"])
        .output()?;
    let text = String::from_utf8_lossy(&out.stdout);
    let admins: Vec<String> = text
        .lines()
        .skip_while(|l| !l.starts_with('-'))
        .skip(1)
        .take_while(|l| !l.contains("command completed"))
        .map(|l| l.trim().to_owned())
        .filter(|l| !l.is_empty())
        .collect();
    Ok(json!({ "admins": admins }))
}

#[cfg(test)]
#[path = "admin_tests.rs"]
mod tests;
