// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine-bound key derivation and config-at-rest encryption.

pub mod machine;
pub mod vault;

pub use machine::{machine_id, machine_key, MachineKey};
pub use vault::{decrypt, encrypt, is_encrypted};
