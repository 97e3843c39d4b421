use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Directory holding IPC socket files.
pub const IPC_DIR: &str = "/tmp/courier";

/// Where a ZeroMQ socket binds or connects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Unix domain socket `{IPC_DIR}/{name}.sock`. Same host only.
    Ipc(String),
    Tcp { host: String, port: u16 },
}

impl Transport {
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc://{IPC_DIR}/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    /// Socket file backing an IPC transport.
    pub fn socket_path(&self) -> Option<PathBuf> {
        match self {
            Self::Ipc(name) => Some(PathBuf::from(IPC_DIR).join(format!("{name}.sock"))),
            Self::Tcp { .. } => None,
        }
    }

    /// Make an IPC endpoint bindable: create [`IPC_DIR`] and remove a socket
    /// file left by a previous run (it would fail the bind with `EADDRINUSE`).
    /// Nothing to do for TCP.
    pub fn prepare_bind(&self) -> io::Result<()> {
        let Some(path) = self.socket_path() else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale IPC socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_endpoint_lives_under_ipc_dir() {
        let t = Transport::ipc("courier-frontend");
        assert_eq!(t.endpoint(), "ipc:///tmp/courier/courier-frontend.sock");
        assert_eq!(
            t.socket_path(),
            Some(PathBuf::from("/tmp/courier/courier-frontend.sock"))
        );
    }

    #[test]
    fn tcp_endpoint_has_no_socket_file() {
        let t = Transport::tcp("127.0.0.1", 5555);
        assert_eq!(t.to_string(), "tcp://127.0.0.1:5555");
        assert_eq!(t.socket_path(), None);
        assert!(t.prepare_bind().is_ok());
    }
}
