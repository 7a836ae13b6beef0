// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use sysinfo::System;

use super::{collect, device_info};

#[test]
fn collect_reports_core_vitals() {
    let mut sys = System::new();
    sys.refresh_all();
    let payload = collect(&mut sys);

    assert!(payload["memoryTotalBytes"].as_u64().unwrap_or(0) > 0);
    assert!(payload["uptimeSecs"].is_u64());
    assert!(payload["cpuPercent"].is_number());
    assert!(payload["processCount"].as_u64().unwrap_or(0) > 0);
}

#[test]
fn device_info_carries_identity() {
    let info = device_info("1.4.2");
    assert_eq!(info["agentVersion"], "1.4.2");
    assert_eq!(info["arch"], std::env::consts::ARCH);
    assert!(info["hostname"].is_string() || info["hostname"].is_null());
}
