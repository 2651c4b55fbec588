// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// SOCKS5 front end plus the L (local/encrypting) and R (remote/decrypting)
// tunnel relay modes, all driven by the reactor.

pub mod socks;
pub mod state_machine;

pub use state_machine::{ProxyDriver, ProxyMode, ProxyModeConfig, ProxyState};
