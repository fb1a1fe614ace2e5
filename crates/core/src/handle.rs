// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handles — named OS resources owned by the spawner, referenced by Desd
//! only by name; Desd never opens or closes one itself.

use crate::error::CoreError;
use crate::ids::HandleName;
use crate::simple_display;
use std::str::FromStr;

/// The kind of OS resource a handle name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    Null,
    Log,
    PipeEndpoint,
    TcpListener,
    UdpSocket,
    FileOpen,
    InheritedFd,
}

simple_display!(HandleKind {
    Null => "null",
    Log => "log",
    PipeEndpoint => "pipe_endpoint",
    TcpListener => "tcp_listener",
    UdpSocket => "udp_socket",
    FileOpen => "file_open",
    InheritedFd => "inherited_fd",
});

impl FromStr for HandleKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "null" => Ok(HandleKind::Null),
            "log" => Ok(HandleKind::Log),
            "pipe_endpoint" => Ok(HandleKind::PipeEndpoint),
            "tcp_listener" => Ok(HandleKind::TcpListener),
            "udp_socket" => Ok(HandleKind::UdpSocket),
            "file_open" => Ok(HandleKind::FileOpen),
            "inherited_fd" => Ok(HandleKind::InheritedFd),
            other => Err(CoreError::UnknownHandleKind(other.to_string())),
        }
    }
}

/// A reference to a spawner-owned resource. The bare name `-` is the null
/// handle; everything else names a configured handle of some
/// [`HandleKind`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Handle {
    pub kind: HandleKind,
    pub name: HandleName,
}

impl Handle {
    pub fn new(kind: HandleKind, name: HandleName) -> Self {
        Self { kind, name }
    }

    pub fn null() -> Self {
        Self { kind: HandleKind::Null, name: HandleName::unchecked("-") }
    }

    pub fn is_null(&self) -> bool {
        self.name.as_str() == "-"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_kind_round_trips() {
        for (s, k) in [
            ("null", HandleKind::Null),
            ("log", HandleKind::Log),
            ("pipe_endpoint", HandleKind::PipeEndpoint),
            ("tcp_listener", HandleKind::TcpListener),
            ("udp_socket", HandleKind::UdpSocket),
            ("file_open", HandleKind::FileOpen),
            ("inherited_fd", HandleKind::InheritedFd),
        ] {
            assert_eq!(s.parse::<HandleKind>().unwrap(), k);
            assert_eq!(k.to_string(), s);
        }
    }

    #[test]
    fn null_handle_detected() {
        assert!(Handle::null().is_null());
        let h = Handle::new(HandleKind::Log, HandleName::parse("app_log").unwrap());
        assert!(!h.is_null());
    }
}
